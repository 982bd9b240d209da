use ndarray::Slice;

use crate::constants::{GridItem, StaggerLoc};
use crate::engine::Bounds;
use crate::errors::{Error, Result};
use crate::field::Field;
use crate::slice::{pad_slices, resolve};
use crate::stagger::StaggerTable;

/// Local index-space box of one stagger location, as cached on our side.
///
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StaggerBounds {
    pub lower: Vec<i32>,
    pub upper: Vec<i32>,
    pub size: Vec<usize>,
}

impl StaggerBounds {
    pub(crate) fn new(bounds: Bounds, rank: usize) -> Result<Self> {
        let Bounds { lower, upper } = bounds;
        if lower.len() != rank || upper.len() != rank {
            return Err(Error::native(
                "coord_bounds",
                format!(
                    "expected {rank} bounds per side, got {} and {}",
                    lower.len(),
                    upper.len()
                ),
            ));
        }
        let size = lower
            .iter()
            .zip(&upper)
            .map(|(lower, upper)| (upper - lower).max(0) as usize)
            .collect();

        Ok(Self { lower, upper, size })
    }

    /// Bounds of a sliced view. Upper bounds follow the sliced shape, lower bounds are kept
    /// since only serial slicing is supported and no renumbering is needed.
    fn resliced(&self, shape: &[usize]) -> Self {
        Self {
            lower: self.lower.clone(),
            upper: shape.iter().map(|&n| n as i32).collect(),
            size: shape.to_vec(),
        }
    }
}

/// Metadata mirrored on our side for every stagger location of a grid: bounds and the views
/// aliasing coordinate, mask and area buffers.
///
#[derive(Clone)]
pub(crate) struct Shadow {
    pub(crate) rank: usize,
    pub(crate) bounds: StaggerTable<StaggerBounds>,

    /// One field per coordinate dimension
    pub(crate) coords: StaggerTable<Vec<Field>>,
    pub(crate) mask: StaggerTable<Field>,
    pub(crate) area: StaggerTable<Field>,
}

impl Shadow {
    pub(crate) fn new(rank: usize) -> Result<Self> {
        Ok(Self {
            rank,
            bounds: StaggerTable::new(rank)?,
            coords: StaggerTable::new(rank)?,
            mask: StaggerTable::new(rank)?,
            area: StaggerTable::new(rank)?,
        })
    }

    /// One flag per stagger location, true where coordinates have been added
    pub(crate) fn staggerloc(&self) -> Vec<bool> {
        self.coords
            .iter()
            .map(|(_, coords)| coords.is_some())
            .collect()
    }

    pub(crate) fn bounds(&self, loc: StaggerLoc) -> Result<Option<&StaggerBounds>> {
        self.bounds.get(loc)
    }

    pub(crate) fn coord(&self, coord_dim: usize, loc: StaggerLoc) -> Result<&Field> {
        self.check_dim(coord_dim)?;
        let coords = self
            .coords
            .get(loc)?
            .ok_or(Error::CoordsNotAllocated(loc))?;

        Ok(&coords[coord_dim])
    }

    pub(crate) fn coord_mut(&mut self, coord_dim: usize, loc: StaggerLoc) -> Result<&mut Field> {
        self.check_dim(coord_dim)?;
        let coords = self
            .coords
            .get_mut(loc)?
            .ok_or(Error::CoordsNotAllocated(loc))?;

        Ok(&mut coords[coord_dim])
    }

    pub(crate) fn items(&self, item: GridItem) -> &StaggerTable<Field> {
        match item {
            GridItem::Mask => &self.mask,
            GridItem::Area => &self.area,
        }
    }

    pub(crate) fn items_mut(&mut self, item: GridItem) -> &mut StaggerTable<Field> {
        match item {
            GridItem::Mask => &mut self.mask,
            GridItem::Area => &mut self.area,
        }
    }

    pub(crate) fn item(&self, item: GridItem, loc: StaggerLoc) -> Result<&Field> {
        self.items(item)
            .get(loc)?
            .ok_or(Error::ItemNotAllocated { item, loc })
    }

    pub(crate) fn item_mut(&mut self, item: GridItem, loc: StaggerLoc) -> Result<&mut Field> {
        self.items_mut(item)
            .get_mut(loc)?
            .ok_or(Error::ItemNotAllocated { item, loc })
    }

    /// Drop every view. Called before the engine releases the memory they alias.
    pub(crate) fn clear(&mut self) {
        self.bounds.clear();
        self.coords.clear();
        self.mask.clear();
        self.area.clear();
    }

    /// Restrict every view to a sub-box of the index space.
    ///
    /// Slices select cells, `cells` holding the cell count along each dimension. Selections are
    /// widened by one point along the dimensions in which a stagger location is offset, so that
    /// eg the corners surrounding the selected cells are all kept.
    ///
    pub(crate) fn slice(&self, slices: &[Slice], cells: &[usize]) -> Result<Self> {
        let slices = pad_slices(slices, self.rank)?;
        if cells.len() != self.rank {
            return Err(Error::Argument(format!(
                "expected {} cell counts, got {}",
                self.rank,
                cells.len()
            )));
        }
        let slice_field = |loc: StaggerLoc, field: &Field| -> Result<Field> {
            let resolved = field
                .shape()
                .iter()
                .zip(slices.iter().zip(cells))
                .enumerate()
                .map(|(axis, (&len, (&slice, &cells)))| {
                    resolve(slice, cells, len, loc.is_offset(axis))
                })
                .collect::<Result<Vec<_>>>()?;

            Ok(field.slice(&resolved))
        };

        let coords = self.coords.try_map(|loc, fields| {
            fields
                .iter()
                .map(|field| slice_field(loc, field))
                .collect::<Result<Vec<_>>>()
        })?;
        let mask = self.mask.try_map(slice_field)?;
        let area = self.area.try_map(slice_field)?;

        let mut bounds = StaggerTable::new(self.rank)?;
        for (loc, cached) in self.bounds.iter() {
            if let Some(cached) = cached {
                let shape = coords
                    .get(loc)?
                    .and_then(|fields| fields.first())
                    .or(mask.get(loc)?)
                    .or(area.get(loc)?)
                    .map(Field::shape);
                let resliced = match shape {
                    Some(shape) => cached.resliced(shape),
                    None => cached.clone(),
                };
                bounds.insert(loc, resliced)?;
            }
        }

        Ok(Self {
            rank: self.rank,
            bounds,
            coords,
            mask,
            area,
        })
    }

    fn check_dim(&self, coord_dim: usize) -> Result<()> {
        if coord_dim < self.rank {
            Ok(())
        } else {
            Err(Error::CoordDim {
                dim: coord_dim,
                rank: self.rank,
            })
        }
    }
}
