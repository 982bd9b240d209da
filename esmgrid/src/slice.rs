use std::marker::PhantomData;

use ndarray::{ArrayViewD, ArrayViewMutD, Slice};

use crate::constants::{GridItem, StaggerLoc, TypeKind};
use crate::errors::{Error, Result};
use crate::field::{Element, FieldViewMut};
use crate::grid::Grid;
use crate::shadow::{Shadow, StaggerBounds};

/// A non-owning view of a [`Grid`], optionally restricted to a sub-box of its index space.
///
/// Obtained from [`Grid::index`] or [`Grid::view`]. The view borrows the grid it came from, so
/// the grid can be neither used nor destroyed while the view is alive, and a view has no way to
/// release native memory itself.
///
pub struct GridSlice<'g> {
    rank: usize,
    coord_type: TypeKind,
    has_corners: bool,
    shadow: Shadow,
    _grid: PhantomData<&'g mut Grid>,
}

impl<'g> GridSlice<'g> {
    pub(crate) fn new(
        rank: usize,
        coord_type: TypeKind,
        has_corners: bool,
        shadow: Shadow,
    ) -> Self {
        Self {
            rank,
            coord_type,
            has_corners,
            shadow,
            _grid: PhantomData,
        }
    }

    pub fn rank(&self) -> usize {
        self.rank
    }

    pub fn coord_type(&self) -> TypeKind {
        self.coord_type
    }

    pub fn has_corners(&self) -> bool {
        self.has_corners
    }

    pub fn staggerloc(&self) -> Vec<bool> {
        self.shadow.staggerloc()
    }

    pub fn bounds(&self, loc: StaggerLoc) -> Result<Option<&StaggerBounds>> {
        self.shadow.bounds(loc)
    }

    pub fn lower_bounds(&self, loc: StaggerLoc) -> Result<Option<&[i32]>> {
        Ok(self.bounds(loc)?.map(|bounds| bounds.lower.as_slice()))
    }

    pub fn upper_bounds(&self, loc: StaggerLoc) -> Result<Option<&[i32]>> {
        Ok(self.bounds(loc)?.map(|bounds| bounds.upper.as_slice()))
    }

    pub fn size(&self, loc: StaggerLoc) -> Result<Option<&[usize]>> {
        Ok(self.bounds(loc)?.map(|bounds| bounds.size.as_slice()))
    }

    pub fn get_coords<T: Element>(
        &self,
        coord_dim: usize,
        loc: StaggerLoc,
    ) -> Result<ArrayViewD<'_, T>> {
        self.shadow.coord(coord_dim, loc)?.view()
    }

    pub fn get_coords_mut<T: Element>(
        &mut self,
        coord_dim: usize,
        loc: StaggerLoc,
    ) -> Result<ArrayViewMutD<'_, T>> {
        self.shadow.coord_mut(coord_dim, loc)?.view_mut()
    }

    pub fn coords_field_mut(
        &mut self,
        coord_dim: usize,
        loc: StaggerLoc,
    ) -> Result<FieldViewMut<'_>> {
        Ok(self.shadow.coord_mut(coord_dim, loc)?.field_view_mut())
    }

    pub fn get_item<T: Element>(&self, item: GridItem, loc: StaggerLoc) -> Result<ArrayViewD<'_, T>> {
        self.shadow.item(item, loc)?.view()
    }

    pub fn get_item_mut<T: Element>(
        &mut self,
        item: GridItem,
        loc: StaggerLoc,
    ) -> Result<ArrayViewMutD<'_, T>> {
        self.shadow.item_mut(item, loc)?.view_mut()
    }

    pub fn item_field_mut(&mut self, item: GridItem, loc: StaggerLoc) -> Result<FieldViewMut<'_>> {
        Ok(self.shadow.item_mut(item, loc)?.field_view_mut())
    }
}

/// Pad a per-axis slice list with full ranges up to `rank` axes.
pub(crate) fn pad_slices(slices: &[Slice], rank: usize) -> Result<Vec<Slice>> {
    if slices.len() > rank {
        return Err(Error::Argument(format!(
            "too many indices for a rank {rank} grid: {}",
            slices.len()
        )));
    }
    let mut padded = slices.to_vec();
    padded.resize(rank, Slice::from(..));

    Ok(padded)
}

/// Resolve a possibly negative, possibly out of range slice selecting cells along an axis with
/// `cells` cells, for a field holding `len` points along that axis.
///
/// Indices count cells and are clamped the way Python slices are. When `extend` is set, a
/// non-empty selection is widened by one point past its stop, which keeps the extra point a
/// staggered dimension has over the cell centers. The result is clamped to `len`, so periodic
/// dimensions that carry no extra point are not widened.
///
pub(crate) fn resolve(slice: Slice, cells: usize, len: usize, extend: bool) -> Result<Slice> {
    if slice.step <= 0 {
        return Err(Error::Argument(format!(
            "slice step must be positive, got {}",
            slice.step
        )));
    }
    let cells = cells as isize;
    let clamp = |index: isize| {
        if index < 0 {
            (index + cells).max(0)
        } else {
            index.min(cells)
        }
    };

    let start = clamp(slice.start);
    let mut end = slice.end.map_or(cells, clamp).max(start);
    if extend && end > start {
        end += 1;
    }
    let len = len as isize;

    Ok(Slice::new(start.min(len), Some(end.min(len)), slice.step))
}
