use std::vec;

use crate::constants::StaggerLoc;
use crate::errors::{Error, Result};

/// A fixed-capacity map keyed by stagger location.
///
/// Holds exactly one slot per location that is valid for the table's rank (4 slots in 2D, 8
/// in 3D). Locations belonging to the other rank are rejected with `Error::StaggerRank`.
///
#[derive(Clone, Debug)]
pub(crate) struct StaggerTable<T> {
    rank: usize,
    slots: Box<[Option<T>]>,
}

impl<T> StaggerTable<T> {
    pub(crate) fn new(rank: usize) -> Result<Self> {
        let slots = StaggerLoc::all(rank)?.iter().map(|_| None).collect();

        Ok(Self { rank, slots })
    }

    pub(crate) fn get(&self, loc: StaggerLoc) -> Result<Option<&T>> {
        loc.check_rank(self.rank)?;
        Ok(self.slots[loc.index()].as_ref())
    }

    pub(crate) fn get_mut(&mut self, loc: StaggerLoc) -> Result<Option<&mut T>> {
        loc.check_rank(self.rank)?;
        Ok(self.slots[loc.index()].as_mut())
    }

    pub(crate) fn contains(&self, loc: StaggerLoc) -> Result<bool> {
        Ok(self.get(loc)?.is_some())
    }

    /// Put a value in the slot for `loc`, returning whatever was there before.
    pub(crate) fn insert(&mut self, loc: StaggerLoc, value: T) -> Result<Option<T>> {
        loc.check_rank(self.rank)?;
        Ok(self.slots[loc.index()].replace(value))
    }

    pub(crate) fn clear(&mut self) {
        for slot in self.slots.iter_mut() {
            *slot = None;
        }
    }

    /// Iterate over every slot, occupied or not, in slot index order.
    pub(crate) fn iter(&self) -> impl Iterator<Item = (StaggerLoc, Option<&T>)> + '_ {
        // Rank was validated in `new`
        let locs = StaggerLoc::all(self.rank).unwrap_or(&[]);
        locs.iter()
            .copied()
            .zip(self.slots.iter().map(Option::as_ref))
    }

    /// Build a new table of the same rank by mapping each occupied slot.
    pub(crate) fn try_map<U, F>(&self, mut f: F) -> Result<StaggerTable<U>>
    where
        F: FnMut(StaggerLoc, &T) -> Result<U>,
    {
        let mut mapped = StaggerTable::new(self.rank)?;
        for (loc, value) in self.iter() {
            if let Some(value) = value {
                mapped.insert(loc, f(loc, value)?)?;
            }
        }

        Ok(mapped)
    }
}

/// One or more stagger locations, in request order.
///
/// Operations that accept several locations take `impl Into<StaggerLocs>`, so a single
/// `StaggerLoc`, an array, a slice or a `Vec` can be passed interchangeably.
///
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StaggerLocs(Vec<StaggerLoc>);

impl StaggerLocs {
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_slice(&self) -> &[StaggerLoc] {
        &self.0
    }

    /// The single location requested, if exactly one was.
    pub fn single(&self) -> Option<StaggerLoc> {
        match self.0.as_slice() {
            [loc] => Some(*loc),
            _ => None,
        }
    }

    pub(crate) fn check_rank(&self, rank: usize) -> Result<()> {
        if self.0.is_empty() {
            return Err(Error::Argument("no stagger location given".into()));
        }
        for loc in &self.0 {
            loc.check_rank(rank)?;
        }

        Ok(())
    }
}

impl From<StaggerLoc> for StaggerLocs {
    fn from(loc: StaggerLoc) -> Self {
        Self(vec![loc])
    }
}

impl From<Vec<StaggerLoc>> for StaggerLocs {
    fn from(locs: Vec<StaggerLoc>) -> Self {
        Self(locs)
    }
}

impl From<&[StaggerLoc]> for StaggerLocs {
    fn from(locs: &[StaggerLoc]) -> Self {
        Self(locs.to_vec())
    }
}

impl<const N: usize> From<[StaggerLoc; N]> for StaggerLocs {
    fn from(locs: [StaggerLoc; N]) -> Self {
        Self(locs.to_vec())
    }
}

impl IntoIterator for StaggerLocs {
    type Item = StaggerLoc;
    type IntoIter = vec::IntoIter<StaggerLoc>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}
