use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::sync::Arc;

use ndarray::{ArrayViewD, ArrayViewMutD, Slice};
use tracing::{debug, error, warn};

use crate::constants::{CoordSys, FileFormat, GridItem, StaggerLoc, TypeKind};
use crate::engine::{Engine, FileRequest, GridHandle};
use crate::errors::{Error, Result};
use crate::field::{Element, Field, FieldViewMut};
use crate::helpers::meshgrid;
use crate::options::{GridOptions, Mode};
use crate::shadow::{Shadow, StaggerBounds};
use crate::slice::GridSlice;
use crate::stagger::StaggerLocs;

/// A logically rectangular grid whose coordinates and items live in a native engine.
///
/// The `Grid` exclusively owns its engine allocation. Coordinate, mask and area arrays handed
/// out by the accessors are views directly aliasing engine memory: writing through them writes
/// to the engine, and they are never copies. Views borrow the grid, so none can outlive it.
///
/// Native memory is released exactly once, either by an explicit call to [`Grid::destroy`] or
/// when the grid is dropped.
///
/// ```
/// # use std::sync::Arc;
/// # use esmgrid::{Grid, GridOptions, HeapEngine, StaggerLoc};
/// let engine = Arc::new(HeapEngine::new());
/// let mut grid = Grid::create(
///     engine,
///     GridOptions::in_memory(&[4, 3]).staggerloc(StaggerLoc::Center),
/// )?;
///
/// let mut lon = grid.get_coords_mut::<f64>(0, StaggerLoc::Center)?;
/// lon.fill(45.0);
/// assert_eq!(grid.size(StaggerLoc::Center)?, Some(&[4, 3][..]));
/// # Ok::<(), esmgrid::Error>(())
/// ```
///
pub struct Grid {
    engine: Arc<dyn Engine>,
    handle: GridHandle,
    finalized: bool,

    max_index: Vec<i32>,
    rank: usize,

    /// Rank of the coordinate arrays as stored by the engine
    ndims: usize,
    num_peri_dims: usize,
    periodic_dim: Option<usize>,
    pole_dim: Option<usize>,
    coord_sys: CoordSys,
    coord_type: TypeKind,
    has_corners: bool,

    shadow: Shadow,
    meta: BTreeMap<String, String>,
}

/// Everything known about a grid once the engine has created it.
struct Created {
    handle: GridHandle,
    max_index: Vec<i32>,
    rank: usize,
    ndims: usize,
    num_peri_dims: usize,
    periodic_dim: Option<usize>,
    pole_dim: Option<usize>,
    coord_sys: CoordSys,
    coord_type: TypeKind,
}

impl Grid {
    /// Create a grid, in memory or from file depending on `options`.
    ///
    /// Arguments that don't apply to the selected creation mode are logged and ignored. Once
    /// the engine has created the grid, coordinates are added for any requested stagger
    /// locations, then area and mask for from-file grids that ask for them. If any of those
    /// steps fail the engine allocation is released before the error is returned.
    ///
    pub fn create(engine: Arc<dyn Engine>, options: GridOptions) -> Result<Self> {
        for argument in options.ignored_arguments()? {
            warn!(
                argument,
                "argument does not apply to this kind of grid and will be ignored"
            );
        }

        match options.mode()? {
            Mode::InMemory { max_index } => Self::create_in_memory(engine, max_index, &options),
            Mode::FromFile { filename, filetype } => {
                Self::create_from_file(engine, filename, filetype, &options)
            }
        }
    }

    /// Create an in-memory grid with default options and no coordinates yet.
    pub fn new(engine: Arc<dyn Engine>, max_index: &[i32]) -> Result<Self> {
        Self::create(engine, GridOptions::in_memory(max_index))
    }

    /// Create a grid from a SCRIP or GRIDSPEC file with default options.
    pub fn from_file<P>(engine: Arc<dyn Engine>, filename: P, filetype: FileFormat) -> Result<Self>
    where
        P: AsRef<Path>,
    {
        Self::create(
            engine,
            GridOptions::from_file(filename.as_ref(), filetype),
        )
    }

    fn create_in_memory(
        engine: Arc<dyn Engine>,
        max_index: &[i32],
        options: &GridOptions,
    ) -> Result<Self> {
        let rank = max_index.len();
        StaggerLoc::all(rank)?;
        if let Some(n) = max_index.iter().find(|&&n| n < 1) {
            return Err(Error::Argument(format!(
                "max_index entries must be positive, got {n}"
            )));
        }

        let coord_type = options.coord_typekind.unwrap_or(TypeKind::R8);
        if !matches!(coord_type, TypeKind::R4 | TypeKind::R8) {
            return Err(Error::Argument(format!(
                "coordinate typekind must be R4 or R8, got {coord_type}"
            )));
        }
        let coord_sys = options.coord_sys.unwrap_or_default();

        let (handle, num_peri_dims, periodic_dim, pole_dim) =
            match options.num_peri_dims.unwrap_or(0) {
                0 => {
                    let handle = engine.create_no_periodic(max_index, coord_sys, coord_type)?;
                    (handle, 0, None, None)
                }
                1 => {
                    let periodic_dim = options.periodic_dim.unwrap_or(0);
                    let pole_dim = options
                        .pole_dim
                        .unwrap_or(if periodic_dim == 1 { 0 } else { 1 });
                    if periodic_dim >= rank || pole_dim >= rank || periodic_dim == pole_dim {
                        return Err(Error::Argument(format!(
                            "periodic_dim {periodic_dim} and pole_dim {pole_dim} must be \
                             distinct dimensions of a rank {rank} grid"
                        )));
                    }
                    let handle = engine.create_one_periodic(
                        max_index,
                        periodic_dim,
                        pole_dim,
                        coord_sys,
                        coord_type,
                    )?;
                    (handle, 1, Some(periodic_dim), Some(pole_dim))
                }
                n => return Err(Error::PeriodicDims(n)),
            };

        let mut grid = Self::wrap(
            engine,
            Created {
                handle,
                max_index: max_index.to_vec(),
                rank,
                ndims: rank,
                num_peri_dims,
                periodic_dim,
                pole_dim,
                coord_sys,
                coord_type,
            },
        )?;

        if let Some(locs) = options.staggerloc.as_ref().filter(|locs| !locs.is_empty()) {
            grid.link_coords(locs.clone().into(), false)?;
        }

        Ok(grid)
    }

    fn create_from_file(
        engine: Arc<dyn Engine>,
        filename: &Path,
        filetype: FileFormat,
        options: &GridOptions,
    ) -> Result<Self> {
        let (rank, ndims, max_index) = match filetype {
            FileFormat::Scrip => {
                let inquiry = engine.inquire_scrip(filename)?;
                (inquiry.rank, inquiry.rank, inquiry.max_index)
            }
            FileFormat::Gridspec => {
                let inquiry = engine.inquire_gridspec(filename)?;
                (inquiry.rank, inquiry.ndims, inquiry.max_index)
            }
            _ => {
                return Err(Error::Argument(format!(
                    "filetype must be SCRIP or GRIDSPEC for Grid objects, got {filetype}"
                )))
            }
        };
        StaggerLoc::all(rank)?;
        if max_index.len() != rank {
            return Err(Error::native(
                "inquire",
                format!("rank {rank} grid reported {} extents", max_index.len()),
            ));
        }

        let reg_decomp = match &options.reg_decomp {
            Some(reg_decomp) => reg_decomp.clone(),
            None => vec![engine.pet_count() as i32, 1],
        };
        let is_sphere = options.is_sphere.unwrap_or(true);
        let add_corner_stagger = options.add_corner_stagger.unwrap_or(false);
        let add_user_area = options.add_user_area.unwrap_or(false);
        let add_mask = options.add_mask.unwrap_or(false);

        let handle = engine.create_from_file(&FileRequest {
            filename,
            filetype,
            reg_decomp: &reg_decomp,
            decompflag: options.decompflag.as_deref(),
            is_sphere,
            add_corner_stagger,
            add_user_area,
            add_mask,
            varname: options.varname.as_deref(),
            coord_names: options.coord_names.as_deref(),
        })?;

        // Spherical grids from file are taken to be periodic across the first dimension
        let (num_peri_dims, periodic_dim, pole_dim) = if is_sphere {
            (1, Some(0), Some(1))
        } else {
            (0, None, None)
        };

        let mut grid = Self::wrap(
            engine,
            Created {
                handle,
                max_index,
                rank,
                ndims,
                num_peri_dims,
                periodic_dim,
                pole_dim,
                coord_sys: CoordSys::SphDeg,
                coord_type: TypeKind::R8,
            },
        )?;

        let center = StaggerLoc::center(rank)?;
        let mut locs = vec![center];
        if add_corner_stagger {
            locs.push(StaggerLoc::corner(rank)?);
        }
        grid.link_coords(locs.into(), true)?;

        if add_user_area {
            grid.link_items(GridItem::Area, center.into(), true)?;
        }
        if add_mask {
            grid.link_items(GridItem::Mask, center.into(), true)?;
        }

        Ok(grid)
    }

    fn wrap(engine: Arc<dyn Engine>, created: Created) -> Result<Self> {
        debug!(
            handle = created.handle.raw(),
            rank = created.rank,
            max_index = ?created.max_index,
            "created grid"
        );

        let shadow = match Shadow::new(created.rank) {
            Ok(shadow) => shadow,
            Err(err) => {
                engine.destroy(created.handle)?;
                return Err(err);
            }
        };
        let grid = Self {
            engine,
            handle: created.handle,
            finalized: false,
            max_index: created.max_index,
            rank: created.rank,
            ndims: created.ndims,
            num_peri_dims: created.num_peri_dims,
            periodic_dim: created.periodic_dim,
            pole_dim: created.pole_dim,
            coord_sys: created.coord_sys,
            coord_type: created.coord_type,
            has_corners: false,
            shadow,
            meta: BTreeMap::new(),
        };

        Ok(grid)
    }

    pub fn handle(&self) -> GridHandle {
        self.handle
    }

    /// Whether the engine memory for this grid has been released
    pub fn finalized(&self) -> bool {
        self.finalized
    }

    /// Number of cells in each dimension
    pub fn max_index(&self) -> &[i32] {
        &self.max_index
    }

    pub fn rank(&self) -> usize {
        self.rank
    }

    /// Rank of the coordinate arrays as stored by the engine. This is 1 for grids read from
    /// files that describe coordinates with one axis per dimension.
    pub fn ndims(&self) -> usize {
        self.ndims
    }

    pub fn num_peri_dims(&self) -> usize {
        self.num_peri_dims
    }

    pub fn periodic_dim(&self) -> Option<usize> {
        self.periodic_dim
    }

    pub fn pole_dim(&self) -> Option<usize> {
        self.pole_dim
    }

    pub fn coord_sys(&self) -> CoordSys {
        self.coord_sys
    }

    /// Element kind of the coordinate arrays
    pub fn coord_type(&self) -> TypeKind {
        self.coord_type
    }

    /// Element kind of cell areas
    pub fn area_type(&self) -> TypeKind {
        GridItem::Area.kind()
    }

    /// Whether coordinates have been added at a corner stagger location
    pub fn has_corners(&self) -> bool {
        self.has_corners
    }

    /// The cell center stagger location for this grid's rank
    pub fn default_stagger(&self) -> StaggerLoc {
        if self.rank == 3 {
            StaggerLoc::CenterVCenter
        } else {
            StaggerLoc::Center
        }
    }

    /// Number of parallel workers the engine is running with
    pub fn pet_count(&self) -> usize {
        self.engine.pet_count()
    }

    /// One flag per stagger location, in slot order, true where coordinates have been added.
    pub fn staggerloc(&self) -> Vec<bool> {
        self.shadow.staggerloc()
    }

    /// Cached bounds for a stagger location, if any coordinates or items were added there.
    pub fn cached_bounds(&self, loc: StaggerLoc) -> Result<Option<&StaggerBounds>> {
        self.shadow.bounds(loc)
    }

    pub fn lower_bounds(&self, loc: StaggerLoc) -> Result<Option<&[i32]>> {
        Ok(self.cached_bounds(loc)?.map(|bounds| bounds.lower.as_slice()))
    }

    pub fn upper_bounds(&self, loc: StaggerLoc) -> Result<Option<&[i32]>> {
        Ok(self.cached_bounds(loc)?.map(|bounds| bounds.upper.as_slice()))
    }

    pub fn size(&self, loc: StaggerLoc) -> Result<Option<&[usize]>> {
        Ok(self.cached_bounds(loc)?.map(|bounds| bounds.size.as_slice()))
    }

    /// Free-form metadata attached to this grid by callers
    pub fn meta(&self) -> &BTreeMap<String, String> {
        &self.meta
    }

    pub fn meta_mut(&mut self) -> &mut BTreeMap<String, String> {
        &mut self.meta
    }

    /// Query the engine for the local bounds of a stagger location.
    ///
    /// The first query caches the result. Subsequent queries are checked against the cache and
    /// fail with `Error::BoundsChanged` if the engine reports something different.
    ///
    pub fn bounds(&mut self, loc: StaggerLoc) -> Result<StaggerBounds> {
        self.check_live()?;
        self.verify_bounds(loc)
    }

    /// Add coordinates at one or more stagger locations.
    ///
    /// The engine allocates the storage, which is then aliased and zeroed. Adding coordinates
    /// at a location that already has them fails with `Error::CoordsAlreadyLinked`; every
    /// location is checked before anything is allocated.
    ///
    /// If a `coord_dim` is given, exactly one location must be too, and the view of that
    /// coordinate dimension is returned.
    ///
    pub fn add_coords<L>(
        &mut self,
        locs: L,
        coord_dim: Option<usize>,
    ) -> Result<Option<FieldViewMut<'_>>>
    where
        L: Into<StaggerLocs>,
    {
        let locs = locs.into();
        if let Some(dim) = coord_dim {
            if dim >= self.rank {
                return Err(Error::CoordDim {
                    dim,
                    rank: self.rank,
                });
            }
        }
        let single = locs.single();
        if coord_dim.is_some() && single.is_none() {
            return Err(Error::SingleStaggerloc(locs.len()));
        }
        self.link_coords(locs, false)?;

        match (single, coord_dim) {
            (Some(loc), Some(dim)) => Ok(Some(self.coords_field_mut(dim, loc)?)),
            _ => Ok(None),
        }
    }

    /// Add a mask or area at one or more stagger locations.
    ///
    /// Masks are initialized to 1 and areas to 0. Adding an item at a location that already has
    /// it fails with `Error::ItemAlreadyLinked`. If a single location is given, the item's view
    /// is returned.
    ///
    pub fn add_item<L>(&mut self, item: GridItem, locs: L) -> Result<Option<FieldViewMut<'_>>>
    where
        L: Into<StaggerLocs>,
    {
        let locs = locs.into();
        let single = locs.single();
        self.link_items(item, locs, false)?;

        match single {
            Some(loc) => Ok(Some(self.item_field_mut(item, loc)?)),
            None => Ok(None),
        }
    }

    /// View the coordinates along `coord_dim` at a stagger location.
    pub fn get_coords<T: Element>(
        &self,
        coord_dim: usize,
        loc: StaggerLoc,
    ) -> Result<ArrayViewD<'_, T>> {
        self.check_live()?;
        self.shadow.coord(coord_dim, loc)?.view()
    }

    pub fn get_coords_mut<T: Element>(
        &mut self,
        coord_dim: usize,
        loc: StaggerLoc,
    ) -> Result<ArrayViewMutD<'_, T>> {
        self.check_live()?;
        self.shadow.coord_mut(coord_dim, loc)?.view_mut()
    }

    /// Like `get_coords_mut` but without committing to an element type.
    pub fn coords_field_mut(
        &mut self,
        coord_dim: usize,
        loc: StaggerLoc,
    ) -> Result<FieldViewMut<'_>> {
        self.check_live()?;
        Ok(self.shadow.coord_mut(coord_dim, loc)?.field_view_mut())
    }

    pub fn get_item<T: Element>(&self, item: GridItem, loc: StaggerLoc) -> Result<ArrayViewD<'_, T>> {
        self.check_live()?;
        self.shadow.item(item, loc)?.view()
    }

    pub fn get_item_mut<T: Element>(
        &mut self,
        item: GridItem,
        loc: StaggerLoc,
    ) -> Result<ArrayViewMutD<'_, T>> {
        self.check_live()?;
        self.shadow.item_mut(item, loc)?.view_mut()
    }

    pub fn item_field_mut(&mut self, item: GridItem, loc: StaggerLoc) -> Result<FieldViewMut<'_>> {
        self.check_live()?;
        Ok(self.shadow.item_mut(item, loc)?.field_view_mut())
    }

    /// Copy `data` into the coordinates along `coord_dim` at a stagger location.
    pub fn set_coords<T: Element>(
        &mut self,
        coord_dim: usize,
        loc: StaggerLoc,
        data: ArrayViewD<'_, T>,
    ) -> Result<()> {
        let mut coords = self.get_coords_mut::<T>(coord_dim, loc)?;
        assign(&mut coords, data)
    }

    /// Copy `data` into a mask or area at a stagger location.
    pub fn set_item<T: Element>(
        &mut self,
        item: GridItem,
        loc: StaggerLoc,
        data: ArrayViewD<'_, T>,
    ) -> Result<()> {
        let mut values = self.get_item_mut::<T>(item, loc)?;
        assign(&mut values, data)
    }

    /// A view of this grid restricted to a sub-box of its index space.
    ///
    /// Only supported when running on a single worker. Missing trailing slices select whole
    /// dimensions.
    ///
    pub fn index(&mut self, slices: &[Slice]) -> Result<GridSlice<'_>> {
        let pet_count = self.engine.pet_count();
        if pet_count > 1 {
            return Err(Error::SerialMethod(pet_count));
        }
        self.check_live()?;
        let cells: Vec<usize> = self.max_index.iter().map(|&n| n as usize).collect();
        let shadow = self.shadow.slice(slices, &cells)?;

        Ok(GridSlice::new(
            self.rank,
            self.coord_type,
            self.has_corners,
            shadow,
        ))
    }

    /// A non-owning alias of this whole grid.
    pub fn view(&mut self) -> Result<GridSlice<'_>> {
        self.check_live()?;

        Ok(GridSlice::new(
            self.rank,
            self.coord_type,
            self.has_corners,
            self.shadow.clone(),
        ))
    }

    /// Write the grid at a stagger location to a diagnostic file via the engine.
    pub fn write<P>(&self, filename: P, loc: StaggerLoc) -> Result<()>
    where
        P: AsRef<Path>,
    {
        self.check_live()?;
        loc.check_rank(self.rank)?;
        self.engine.write(self.handle, filename.as_ref(), loc)
    }

    /// Release the engine memory behind this grid. Calling it again does nothing.
    pub fn destroy(&mut self) -> Result<()> {
        if self.finalized {
            return Ok(());
        }
        self.shadow.clear();
        self.engine.destroy(self.handle)?;
        self.finalized = true;
        debug!(handle = self.handle.raw(), "destroyed grid");

        Ok(())
    }

    fn check_live(&self) -> Result<()> {
        if self.finalized {
            Err(Error::Finalized)
        } else {
            Ok(())
        }
    }

    fn verify_bounds(&mut self, loc: StaggerLoc) -> Result<StaggerBounds> {
        match self.shadow.bounds(loc)?.cloned() {
            None => {
                let bounds = self
                    .engine
                    .coord_bounds(self.handle, loc)
                    .map_err(|err| {
                        debug!(?loc, %err, "bounds query failed");
                        Error::BoundsNotCreated(loc)
                    })?;
                let bounds = StaggerBounds::new(bounds, self.rank)?;
                self.shadow.bounds.insert(loc, bounds.clone())?;

                Ok(bounds)
            }
            Some(cached) => {
                let bounds = self.engine.coord_bounds(self.handle, loc)?;
                if StaggerBounds::new(bounds, self.rank)? != cached {
                    return Err(Error::BoundsChanged(loc));
                }

                Ok(cached)
            }
        }
    }

    fn link_coords(&mut self, locs: StaggerLocs, from_file: bool) -> Result<()> {
        self.check_live()?;
        locs.check_rank(self.rank)?;
        for (i, &loc) in locs.as_slice().iter().enumerate() {
            if self.shadow.coords.contains(loc)? || locs.as_slice()[..i].contains(&loc) {
                return Err(Error::CoordsAlreadyLinked(loc));
            }
        }

        for loc in locs {
            // Grids read from file already hold their coordinates
            if !from_file {
                self.engine.add_coord(self.handle, loc)?;
            }
            self.allocate_coords(loc, from_file)?;
        }

        Ok(())
    }

    fn allocate_coords(&mut self, loc: StaggerLoc, from_file: bool) -> Result<()> {
        let size = self.verify_bounds(loc)?.size;
        let mut fields = if self.ndims == self.rank || self.ndims == 0 {
            (0..self.rank)
                .map(|dim| self.link_coord_buffer(dim, loc, &size))
                .collect::<Result<Vec<_>>>()?
        } else if self.ndims == 1 {
            match self.coord_type {
                TypeKind::R4 => self.link_coord_axes::<f32>(loc, &size)?,
                TypeKind::R8 => self.link_coord_axes::<f64>(loc, &size)?,
                kind => {
                    return Err(Error::TypeMismatch {
                        expected: TypeKind::R8,
                        found: kind,
                    })
                }
            }
        } else {
            return Err(Error::CoordDims {
                ndims: self.ndims,
                rank: self.rank,
            });
        };

        // Engines don't initialize fresh allocations
        if !from_file {
            for field in fields.iter_mut() {
                field.field_view_mut().fill_zero();
            }
        }

        self.shadow.coords.insert(loc, fields)?;
        if loc.is_corner() {
            self.has_corners = true;
        }
        debug!(handle = self.handle.raw(), ?loc, ?size, "linked coordinates");

        Ok(())
    }

    fn link_coord_buffer(&self, coord_dim: usize, loc: StaggerLoc, size: &[usize]) -> Result<Field> {
        let buffer = self.engine.coord_ptr(self.handle, coord_dim, loc)?;

        // The engine contract keeps the buffer alive until `destroy`, which clears the shadow
        // first
        unsafe { Field::from_native(buffer, self.coord_type, size) }
    }

    /// Link coordinates stored as one axis per dimension, expanding them into full-rank
    /// arrays. The expanded arrays are copies: writes to them don't reach the engine.
    fn link_coord_axes<T: Element>(&self, loc: StaggerLoc, size: &[usize]) -> Result<Vec<Field>> {
        let axes = (0..self.rank)
            .map(|dim| {
                let buffer = self.engine.coord_ptr(self.handle, dim, loc)?;
                let axis = unsafe { Field::from_native(buffer, T::KIND, &size[dim..dim + 1])? };
                let values = axis.view::<T>()?.iter().copied().collect::<Vec<T>>();

                Ok(values)
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(meshgrid(&axes)?.into_iter().map(Field::owned).collect())
    }

    fn link_items(&mut self, item: GridItem, locs: StaggerLocs, from_file: bool) -> Result<()> {
        self.check_live()?;
        locs.check_rank(self.rank)?;
        for (i, &loc) in locs.as_slice().iter().enumerate() {
            if self.shadow.items(item).contains(loc)? || locs.as_slice()[..i].contains(&loc) {
                return Err(Error::ItemAlreadyLinked { item, loc });
            }
        }

        for loc in locs {
            if !from_file {
                self.engine.add_item(self.handle, item, loc)?;
            }
            self.allocate_item(item, loc, from_file)?;
        }

        Ok(())
    }

    fn allocate_item(&mut self, item: GridItem, loc: StaggerLoc, from_file: bool) -> Result<()> {
        let size = self.verify_bounds(loc)?.size;
        let buffer = self.engine.item_ptr(self.handle, item, loc)?;
        let mut field = unsafe { Field::from_native(buffer, item.kind(), &size)? };

        if !from_file {
            let mut view = field.field_view_mut();
            match item {
                GridItem::Mask => view.fill_one(),
                GridItem::Area => view.fill_zero(),
            }
        }

        self.shadow.items_mut(item).insert(loc, field)?;
        debug!(handle = self.handle.raw(), ?item, ?loc, "linked item");

        Ok(())
    }
}

fn assign<T: Element>(dest: &mut ArrayViewMutD<'_, T>, data: ArrayViewD<'_, T>) -> Result<()> {
    if dest.shape() != data.shape() {
        return Err(Error::ShapeMismatch {
            expected: dest.shape().to_vec(),
            found: data.shape().to_vec(),
        });
    }
    dest.assign(&data);

    Ok(())
}

impl Drop for Grid {
    fn drop(&mut self) {
        if let Err(err) = self.destroy() {
            error!(handle = self.handle.raw(), %err, "failed to release native grid");
        }
    }
}

impl fmt::Display for Grid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Grid:")?;
        writeln!(f, "    type = {}", self.coord_type)?;
        writeln!(f, "    areatype = {}", self.area_type())?;
        writeln!(f, "    rank = {}", self.rank)?;
        writeln!(f, "    max_index = {:?}", self.max_index)?;
        writeln!(f, "    num_peri_dims = {}", self.num_peri_dims)?;
        writeln!(f, "    periodic_dim = {:?}", self.periodic_dim)?;
        writeln!(f, "    pole_dim = {:?}", self.pole_dim)?;
        writeln!(f, "    coord_sys = {}", self.coord_sys)?;
        writeln!(f, "    staggerloc = {:?}", self.staggerloc())?;
        writeln!(f, "    finalized = {}", self.finalized)?;
        for (loc, bounds) in self.shadow.bounds.iter() {
            if let Some(bounds) = bounds {
                writeln!(
                    f,
                    "    {loc}: lower bounds = {:?}, upper bounds = {:?}",
                    bounds.lower, bounds.upper
                )?;
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::atomic::Ordering;

    use ndarray::{Array2, ArrayD, Axis};
    use paste::paste;

    use crate::heap::HeapEngine;
    use crate::testing::{engine, random_array, rectilinear_file, scrip_file, FlakyEngine};

    fn grid_2d(locs: &[StaggerLoc]) -> Grid {
        Grid::create(
            engine(),
            GridOptions::in_memory(&[4, 3]).staggerloc(locs),
        )
        .unwrap()
    }

    macro_rules! grid_tests {
        ($name:ident, $t:ty, $kind:expr) => {
            paste! {
                fn [<$name _grid>](max_index: &[i32], locs: &[StaggerLoc]) -> Grid {
                    Grid::create(
                        engine(),
                        GridOptions::in_memory(max_index)
                            .coord_typekind($kind)
                            .staggerloc(locs),
                    )
                    .unwrap()
                }

                #[test]
                fn [<$name _create_with_coords>]() {
                    let grid = [<$name _grid>](
                        &[4, 3],
                        &[StaggerLoc::Center, StaggerLoc::Corner],
                    );
                    assert_eq!(grid.rank(), 2);
                    assert_eq!(grid.coord_type(), $kind);
                    assert_eq!(grid.staggerloc(), vec![true, false, false, true]);
                    assert!(grid.has_corners());

                    let lon = grid.get_coords::<$t>(0, StaggerLoc::Center).unwrap();
                    assert_eq!(lon.shape(), &[4, 3]);
                    assert!(lon.iter().all(|&v| v == 0.0));

                    let lat = grid.get_coords::<$t>(1, StaggerLoc::Corner).unwrap();
                    assert_eq!(lat.shape(), &[5, 4]);
                    assert_eq!(grid.size(StaggerLoc::Corner).unwrap(), Some(&[5, 4][..]));
                }

                #[test]
                fn [<$name _writes_reach_engine_memory>]() {
                    let mut grid = [<$name _grid>](&[4, 3], &[StaggerLoc::Center]);
                    grid.get_coords_mut::<$t>(1, StaggerLoc::Center).unwrap()[[3, 2]] = 7.5;

                    let lat = grid.get_coords::<$t>(1, StaggerLoc::Center).unwrap();
                    assert_eq!(lat[[3, 2]], 7.5);
                    assert_eq!(lat.iter().filter(|&&v| v != 0.0).count(), 1);
                }

                #[test]
                fn [<$name _add_coords_returns_view>]() {
                    let mut grid = [<$name _grid>](&[4, 3], &[]);
                    let view = grid.add_coords(StaggerLoc::Edge2, Some(1)).unwrap().unwrap();
                    assert_eq!(view.kind(), $kind);
                    assert_eq!(view.shape(), &[4, 4]);

                    let mut view = view.into_typed::<$t>().unwrap();
                    view.fill(3.0);
                    let lat = grid.get_coords::<$t>(1, StaggerLoc::Edge2).unwrap();
                    assert!(lat.iter().all(|&v| v == 3.0));
                }

                #[test]
                fn [<$name _slice_matches_parent>]() {
                    let mut grid = [<$name _grid>](
                        &[4, 4],
                        &[StaggerLoc::Center, StaggerLoc::Corner],
                    );
                    for loc in [StaggerLoc::Center, StaggerLoc::Corner] {
                        let shape = grid.size(loc).unwrap().unwrap().to_vec();
                        for dim in 0..2 {
                            let data = random_array(&shape, dim as u64).mapv(|v| v as $t);
                            grid.set_coords(dim, loc, data.view()).unwrap();
                        }
                    }
                    let center = grid.get_coords::<$t>(0, StaggerLoc::Center).unwrap().to_owned();
                    let corner = grid.get_coords::<$t>(1, StaggerLoc::Corner).unwrap().to_owned();

                    let mut sliced = grid.index(&[Slice::from(1..3), Slice::from(1..3)]).unwrap();
                    assert_eq!(sliced.rank(), 2);
                    assert!(sliced.has_corners());

                    let sliced_center = sliced.get_coords::<$t>(0, StaggerLoc::Center).unwrap();
                    assert_eq!(sliced_center.shape(), &[2, 2]);
                    assert_eq!(
                        sliced_center,
                        center.slice_each_axis(|_| Slice::from(1..3))
                    );
                    assert_eq!(sliced.upper_bounds(StaggerLoc::Center).unwrap(), Some(&[2, 2][..]));
                    assert_eq!(sliced.lower_bounds(StaggerLoc::Center).unwrap(), Some(&[0, 0][..]));
                    assert_eq!(sliced.size(StaggerLoc::Center).unwrap(), Some(&[2, 2][..]));

                    let sliced_corner = sliced.get_coords::<$t>(1, StaggerLoc::Corner).unwrap();
                    assert_eq!(sliced_corner.shape(), &[3, 3]);
                    assert_eq!(
                        sliced_corner,
                        corner.slice_each_axis(|_| Slice::from(1..4))
                    );
                    assert_eq!(sliced.upper_bounds(StaggerLoc::Corner).unwrap(), Some(&[3, 3][..]));

                    sliced.get_coords_mut::<$t>(0, StaggerLoc::Center).unwrap()[[0, 0]] = 99.0;
                    drop(sliced);
                    assert_eq!(
                        grid.get_coords::<$t>(0, StaggerLoc::Center).unwrap()[[1, 1]],
                        99.0
                    );
                }
            }
        };
    }

    grid_tests!(r4, f32, TypeKind::R4);
    grid_tests!(r8, f64, TypeKind::R8);

    #[test]
    fn staggerloc_length_follows_rank() {
        let grid = Grid::new(engine(), &[3, 4]).unwrap();
        assert_eq!(grid.staggerloc(), vec![false; 4]);
        assert_eq!(grid.default_stagger(), StaggerLoc::Center);

        let grid = Grid::new(engine(), &[3, 4, 5]).unwrap();
        assert_eq!(grid.rank(), 3);
        assert_eq!(grid.staggerloc(), vec![false; 8]);
        assert_eq!(grid.default_stagger(), StaggerLoc::CenterVCenter);
        assert!(!grid.has_corners());
    }

    #[test]
    fn defaults() {
        let grid = Grid::new(engine(), &[3, 4]).unwrap();
        assert_eq!(grid.coord_type(), TypeKind::R8);
        assert_eq!(grid.area_type(), TypeKind::R8);
        assert_eq!(grid.coord_sys(), CoordSys::SphDeg);
        assert_eq!(grid.num_peri_dims(), 0);
        assert_eq!(grid.periodic_dim(), None);
        assert_eq!(grid.max_index(), &[3, 4]);
        assert_eq!(grid.ndims(), 2);
        assert_eq!(grid.pet_count(), 1);
        assert!(!grid.finalized());

        let grid = Grid::create(engine(), GridOptions::in_memory(&[3, 4]).num_peri_dims(1)).unwrap();
        assert_eq!(grid.periodic_dim(), Some(0));
        assert_eq!(grid.pole_dim(), Some(1));

        // The pole moves out of the way of a periodic second dimension
        let grid = Grid::create(
            engine(),
            GridOptions::in_memory(&[3, 4]).num_peri_dims(1).periodic_dim(1),
        )
        .unwrap();
        assert_eq!(grid.periodic_dim(), Some(1));
        assert_eq!(grid.pole_dim(), Some(0));
    }

    #[test]
    fn argument_errors() {
        assert!(matches!(
            Grid::create(engine(), GridOptions::default()),
            Err(Error::Argument(_))
        ));
        assert!(matches!(Grid::new(engine(), &[4]), Err(Error::Rank(1))));
        assert!(matches!(
            Grid::new(engine(), &[4, 0]),
            Err(Error::Argument(_))
        ));
        assert!(matches!(
            Grid::create(engine(), GridOptions::in_memory(&[4, 4]).num_peri_dims(2)),
            Err(Error::PeriodicDims(2))
        ));
        assert!(matches!(
            Grid::create(
                engine(),
                GridOptions::in_memory(&[4, 4])
                    .num_peri_dims(1)
                    .periodic_dim(1)
                    .pole_dim(1)
            ),
            Err(Error::Argument(_))
        ));
        assert!(matches!(
            Grid::create(
                engine(),
                GridOptions::in_memory(&[4, 4]).coord_typekind(TypeKind::I4)
            ),
            Err(Error::Argument(_))
        ));
        assert!(matches!(
            Grid::from_file(engine(), "mesh.nc", FileFormat::Ugrid),
            Err(Error::Argument(_))
        ));
        assert!(matches!(
            Grid::create(
                engine(),
                GridOptions::in_memory(&[4, 4]).staggerloc(StaggerLoc::CornerVFace)
            ),
            Err(Error::StaggerRank { .. })
        ));
    }

    #[test]
    fn failed_construction_releases_grid() {
        let engine = engine();
        let result = Grid::create(
            engine.clone(),
            GridOptions::in_memory(&[4, 4]).staggerloc([StaggerLoc::Center, StaggerLoc::Center]),
        );
        assert!(matches!(result, Err(Error::CoordsAlreadyLinked(StaggerLoc::Center))));
        assert_eq!(engine.live_grids(), 0);
        assert_eq!(engine.destroyed(), 1);
    }

    #[test]
    fn duplicate_coords() {
        let mut grid = grid_2d(&[StaggerLoc::Center]);
        grid.get_coords_mut::<f64>(1, StaggerLoc::Center).unwrap()[[2, 1]] = 42.0;
        assert!(matches!(
            grid.add_coords(StaggerLoc::Center, None),
            Err(Error::CoordsAlreadyLinked(StaggerLoc::Center))
        ));
        assert!(matches!(
            grid.add_coords(StaggerLoc::Center, Some(1)),
            Err(Error::CoordsAlreadyLinked(StaggerLoc::Center))
        ));

        // The existing coordinates are untouched
        let lat = grid.get_coords::<f64>(1, StaggerLoc::Center).unwrap();
        assert_eq!(lat[[2, 1]], 42.0);
        assert_eq!(lat.iter().filter(|&&v| v != 0.0).count(), 1);

        // Nothing is allocated when any requested location is a duplicate
        assert!(matches!(
            grid.add_coords([StaggerLoc::Corner, StaggerLoc::Center], None),
            Err(Error::CoordsAlreadyLinked(StaggerLoc::Center))
        ));
        assert_eq!(grid.staggerloc(), vec![true, false, false, false]);
        assert!(grid.add_coords(StaggerLoc::Corner, None).unwrap().is_none());
    }

    #[test]
    fn add_coords_arguments() {
        let mut grid = grid_2d(&[]);
        assert!(matches!(
            grid.add_coords([StaggerLoc::Center, StaggerLoc::Corner], Some(0)),
            Err(Error::SingleStaggerloc(2))
        ));
        assert!(matches!(
            grid.add_coords(StaggerLoc::Center, Some(2)),
            Err(Error::CoordDim { dim: 2, rank: 2 })
        ));
        assert!(matches!(
            grid.add_coords(Vec::new(), None),
            Err(Error::Argument(_))
        ));
        assert_eq!(grid.staggerloc(), vec![false; 4]);
    }

    #[test]
    fn items_are_initialized() {
        let mut grid = grid_2d(&[StaggerLoc::Center]);

        let mask = grid.add_item(GridItem::Mask, StaggerLoc::Center).unwrap().unwrap();
        assert_eq!(mask.kind(), TypeKind::I4);
        let mask = mask.into_typed::<i32>().unwrap();
        assert_eq!(mask.shape(), &[4, 3]);
        assert!(mask.iter().all(|&m| m == 1));

        assert!(grid
            .add_item(GridItem::Area, [StaggerLoc::Center, StaggerLoc::Corner])
            .unwrap()
            .is_none());
        let area = grid.get_item::<f64>(GridItem::Area, StaggerLoc::Corner).unwrap();
        assert_eq!(area.shape(), &[5, 4]);
        assert!(area.iter().all(|&a| a == 0.0));

        // Items don't add coordinates
        assert_eq!(grid.staggerloc(), vec![true, false, false, false]);
    }

    #[test]
    fn duplicate_items() {
        let mut grid = grid_2d(&[StaggerLoc::Center]);
        grid.add_item(GridItem::Mask, StaggerLoc::Center).unwrap();
        grid.get_item_mut::<i32>(GridItem::Mask, StaggerLoc::Center).unwrap()[[0, 0]] = 0;

        assert!(matches!(
            grid.add_item(GridItem::Mask, StaggerLoc::Center),
            Err(Error::ItemAlreadyLinked {
                item: GridItem::Mask,
                loc: StaggerLoc::Center
            })
        ));

        // The existing mask is untouched
        let mask = grid.get_item::<i32>(GridItem::Mask, StaggerLoc::Center).unwrap();
        assert_eq!(mask[[0, 0]], 0);
    }

    #[test]
    fn missing_data() {
        let mut grid = grid_2d(&[StaggerLoc::Center]);
        assert!(matches!(
            grid.get_coords::<f64>(0, StaggerLoc::Corner),
            Err(Error::CoordsNotAllocated(StaggerLoc::Corner))
        ));
        assert!(matches!(
            grid.get_coords::<f64>(2, StaggerLoc::Center),
            Err(Error::CoordDim { dim: 2, .. })
        ));
        assert!(matches!(
            grid.get_coords::<f32>(0, StaggerLoc::Center),
            Err(Error::TypeMismatch { .. })
        ));
        assert!(matches!(
            grid.get_item_mut::<f64>(GridItem::Area, StaggerLoc::Center),
            Err(Error::ItemNotAllocated { .. })
        ));
        assert!(matches!(
            grid.get_coords::<f64>(0, StaggerLoc::CenterVFace),
            Err(Error::StaggerRank { .. })
        ));
    }

    #[test]
    fn set_coords_checks_shape() {
        let mut grid = grid_2d(&[StaggerLoc::Center]);
        let data = Array2::<f64>::ones((3, 4)).into_dyn();
        assert!(matches!(
            grid.set_coords(0, StaggerLoc::Center, data.view()),
            Err(Error::ShapeMismatch { .. })
        ));

        let data = Array2::from_shape_fn((4, 3), |(i, j)| (i * 3 + j) as f64).into_dyn();
        grid.set_coords(0, StaggerLoc::Center, data.view()).unwrap();
        assert_eq!(grid.get_coords::<f64>(0, StaggerLoc::Center).unwrap(), data.view());

        grid.add_item(GridItem::Area, StaggerLoc::Center).unwrap();
        grid.set_item(GridItem::Area, StaggerLoc::Center, data.view()).unwrap();
        assert_eq!(
            grid.get_item::<f64>(GridItem::Area, StaggerLoc::Center).unwrap()[[3, 2]],
            11.0
        );
    }

    #[test]
    fn bounds_round_trip() {
        let mut grid = grid_2d(&[StaggerLoc::Center, StaggerLoc::Edge1]);
        let bounds = grid.bounds(StaggerLoc::Edge1).unwrap();
        assert_eq!(bounds.lower, vec![0, 0]);
        assert_eq!(bounds.upper, vec![5, 3]);
        assert_eq!(bounds.size, vec![5, 3]);
        assert_eq!(grid.cached_bounds(StaggerLoc::Edge1).unwrap(), Some(&bounds));
        assert_eq!(grid.lower_bounds(StaggerLoc::Center).unwrap(), Some(&[0, 0][..]));
        assert_eq!(grid.upper_bounds(StaggerLoc::Center).unwrap(), Some(&[4, 3][..]));

        // Querying again agrees with the cache
        assert_eq!(grid.bounds(StaggerLoc::Edge1).unwrap(), bounds);
        assert_eq!(grid.cached_bounds(StaggerLoc::Corner).unwrap(), None);
    }

    #[test]
    fn bounds_not_created() {
        let mut grid = grid_2d(&[StaggerLoc::Center]);
        assert!(matches!(
            grid.bounds(StaggerLoc::Corner),
            Err(Error::BoundsNotCreated(StaggerLoc::Corner))
        ));

        let engine = FlakyEngine::new();
        let mut grid = Grid::new(engine.clone(), &[4, 3]).unwrap();
        engine.fail_bounds.store(true, Ordering::SeqCst);
        assert!(matches!(
            grid.add_coords(StaggerLoc::Center, None),
            Err(Error::BoundsNotCreated(StaggerLoc::Center))
        ));
    }

    #[test]
    fn bounds_changed() {
        let engine = FlakyEngine::new();
        let mut grid = Grid::create(
            engine.clone(),
            GridOptions::in_memory(&[4, 3]).staggerloc(StaggerLoc::Center),
        )
        .unwrap();

        engine.drift.store(true, Ordering::SeqCst);
        assert!(matches!(
            grid.bounds(StaggerLoc::Center),
            Err(Error::BoundsChanged(StaggerLoc::Center))
        ));
        assert!(matches!(
            grid.add_item(GridItem::Mask, StaggerLoc::Center),
            Err(Error::BoundsChanged(StaggerLoc::Center))
        ));

        // The cached bounds are kept
        assert_eq!(grid.size(StaggerLoc::Center).unwrap(), Some(&[4, 3][..]));
    }

    #[test]
    fn destroy_is_counted_once() {
        let engine = engine();
        let mut grid = grid_with(&engine, &[StaggerLoc::Center]);
        grid.destroy().unwrap();
        assert!(grid.finalized());
        assert_eq!(engine.destroyed(), 1);

        grid.destroy().unwrap();
        assert!(matches!(
            grid.get_coords::<f64>(0, StaggerLoc::Center),
            Err(Error::Finalized)
        ));
        assert!(matches!(
            grid.add_coords(StaggerLoc::Corner, None),
            Err(Error::Finalized)
        ));
        assert!(matches!(grid.bounds(StaggerLoc::Center), Err(Error::Finalized)));

        drop(grid);
        assert_eq!(engine.destroyed(), 1);
        assert_eq!(engine.live_grids(), 0);
    }

    #[test]
    fn views_never_destroy() {
        let engine = engine();
        let mut grid = grid_with(&engine, &[StaggerLoc::Center]);
        {
            let mut view = grid.view().unwrap();
            view.get_coords_mut::<f64>(0, StaggerLoc::Center).unwrap().fill(1.5);
            let sliced = grid_slice_count(&view);
            assert_eq!(sliced, 12);
        }
        assert_eq!(engine.destroyed(), 0);
        assert!(grid
            .get_coords::<f64>(0, StaggerLoc::Center)
            .unwrap()
            .iter()
            .all(|&v| v == 1.5));

        {
            let _sliced = grid.index(&[Slice::from(0..1)]).unwrap();
        }
        assert_eq!(engine.destroyed(), 0);

        drop(grid);
        assert_eq!(engine.destroyed(), 1);
    }

    fn grid_with(engine: &Arc<HeapEngine>, locs: &[StaggerLoc]) -> Grid {
        Grid::create(
            engine.clone(),
            GridOptions::in_memory(&[4, 3]).staggerloc(locs),
        )
        .unwrap()
    }

    fn grid_slice_count(view: &GridSlice<'_>) -> usize {
        view.get_coords::<f64>(0, StaggerLoc::Center).unwrap().len()
    }

    #[test]
    fn slicing_is_serial_only() {
        let engine = Arc::new(HeapEngine::with_pets(2, 0).unwrap());
        let mut grid = Grid::create(
            engine,
            GridOptions::in_memory(&[4, 4]).staggerloc(StaggerLoc::Center),
        )
        .unwrap();
        assert_eq!(grid.size(StaggerLoc::Center).unwrap(), Some(&[2, 4][..]));
        assert!(matches!(
            grid.index(&[Slice::from(0..1)]),
            Err(Error::SerialMethod(2))
        ));
    }

    #[test]
    fn slice_edges_and_items() {
        let mut grid = grid_2d(&[StaggerLoc::Edge1]);
        grid.add_item(GridItem::Mask, StaggerLoc::Corner).unwrap();

        let sliced = grid.index(&[Slice::from(1..3), Slice::from(1..3)]).unwrap();
        let edge = sliced.get_coords::<f64>(0, StaggerLoc::Edge1).unwrap();
        assert_eq!(edge.shape(), &[3, 2]);
        let mask = sliced.get_item::<i32>(GridItem::Mask, StaggerLoc::Corner).unwrap();
        assert_eq!(mask.shape(), &[3, 3]);
        assert_eq!(sliced.upper_bounds(StaggerLoc::Corner).unwrap(), Some(&[3, 3][..]));
        assert_eq!(sliced.staggerloc(), vec![false, true, false, false]);
    }

    #[test]
    fn slice_3d() {
        let mut grid = Grid::create(
            engine(),
            GridOptions::in_memory(&[3, 4, 5])
                .staggerloc([StaggerLoc::CenterVCenter, StaggerLoc::CornerVFace]),
        )
        .unwrap();
        assert!(grid.has_corners());
        assert_eq!(grid.size(StaggerLoc::CornerVFace).unwrap(), Some(&[4, 5, 6][..]));

        let sliced = grid.index(&[Slice::from(..), Slice::from(1..3)]).unwrap();
        assert_eq!(
            sliced.size(StaggerLoc::CenterVCenter).unwrap(),
            Some(&[3, 2, 5][..])
        );
        assert_eq!(
            sliced
                .get_coords::<f64>(2, StaggerLoc::CornerVFace)
                .unwrap()
                .shape(),
            &[4, 3, 6]
        );
    }

    #[test]
    fn slice_arguments() {
        let mut grid = grid_2d(&[StaggerLoc::Center]);
        assert!(matches!(
            grid.index(&[Slice::from(..); 3]),
            Err(Error::Argument(_))
        ));
        assert!(matches!(
            grid.index(&[Slice::new(0, None, -1)]),
            Err(Error::Argument(_))
        ));

        let sliced = grid.index(&[Slice::from(-2..)]).unwrap();
        assert_eq!(sliced.size(StaggerLoc::Center).unwrap(), Some(&[2, 3][..]));
    }

    #[test]
    fn negative_slices_keep_surrounding_points() {
        let mut grid = Grid::create(
            engine(),
            GridOptions::in_memory(&[4, 4]).staggerloc([
                StaggerLoc::Center,
                StaggerLoc::Corner,
                StaggerLoc::Edge1,
            ]),
        )
        .unwrap();
        for loc in [StaggerLoc::Corner, StaggerLoc::Edge1] {
            let mut rows = grid.get_coords_mut::<f64>(0, loc).unwrap();
            for (index, value) in rows.indexed_iter_mut() {
                *value = index[0] as f64;
            }
        }

        let rows = |grid: &mut Grid, slice: Slice, loc: StaggerLoc| {
            let sliced = grid.index(&[slice]).unwrap();
            let size = sliced.size(StaggerLoc::Center).unwrap().unwrap().to_vec();
            let coords = sliced.get_coords::<f64>(0, loc).unwrap();
            let rows: Vec<f64> = coords.index_axis(Axis(1), 0).iter().copied().collect();
            (size, rows)
        };

        for loc in [StaggerLoc::Corner, StaggerLoc::Edge1] {
            let (size, expected) = rows(&mut grid, Slice::from(2..4), loc);
            assert_eq!(size, vec![2, 4]);
            assert_eq!(expected, vec![2.0, 3.0, 4.0]);
            assert_eq!(rows(&mut grid, Slice::from(-2..), loc), (size.clone(), expected));
            assert_eq!(
                rows(&mut grid, Slice::from(-3..-1), loc),
                (size, vec![1.0, 2.0, 3.0])
            );
        }
    }

    #[test]
    fn gridspec_axes_are_expanded() {
        let engine = engine();
        let file = rectilinear_file(8, 4);
        engine.mount("ll.nc", file.clone()).unwrap();

        let grid = Grid::create(
            engine,
            GridOptions::from_file("ll.nc", FileFormat::Gridspec).add_corner_stagger(true),
        )
        .unwrap();
        assert_eq!(grid.rank(), 2);
        assert_eq!(grid.ndims(), 1);
        assert_eq!(grid.max_index(), &[8, 4]);
        assert_eq!(grid.coord_type(), TypeKind::R8);
        assert_eq!(grid.num_peri_dims(), 1);
        assert_eq!(grid.periodic_dim(), Some(0));
        assert!(grid.has_corners());
        assert_eq!(grid.staggerloc(), vec![true, false, false, true]);

        let lon = grid.get_coords::<f64>(0, StaggerLoc::Center).unwrap();
        let lat = grid.get_coords::<f64>(1, StaggerLoc::Center).unwrap();
        assert_eq!(lon.shape(), &[8, 4]);
        for i in 0..8 {
            for j in 0..4 {
                assert_eq!(lon[[i, j]], file.coords[0][[i]]);
                assert_eq!(lat[[i, j]], file.coords[1][[j]]);
            }
        }

        // Periodic in longitude, so no extra corner there
        let lat_corners = grid.get_coords::<f64>(1, StaggerLoc::Corner).unwrap();
        assert_eq!(lat_corners.shape(), &[8, 5]);
        assert_eq!(lat_corners[[0, 0]], -90.0);
        assert_eq!(lat_corners[[7, 4]], 90.0);
    }

    #[test]
    fn scrip_with_area() {
        let engine = engine();
        let file = scrip_file(&[5, 3], 7);
        engine.mount("scrip.nc", file.clone()).unwrap();

        let grid = Grid::create(
            engine,
            GridOptions::from_file("scrip.nc", FileFormat::Scrip)
                .is_sphere(false)
                .add_user_area(true),
        )
        .unwrap();
        assert_eq!(grid.ndims(), 2);
        assert_eq!(grid.num_peri_dims(), 0);
        assert!(!grid.has_corners());

        // Coordinates read from file are kept
        assert_eq!(
            grid.get_coords::<f64>(0, StaggerLoc::Center).unwrap(),
            file.coords[0].view()
        );
        let area = grid.get_item::<f64>(GridItem::Area, StaggerLoc::Center).unwrap();
        assert!(area.iter().all(|&a| a == 2.5));
    }

    #[test]
    fn gridspec_mask_from_variable() {
        let engine = engine();
        let mut sst = ArrayD::<f64>::zeros(ndarray::IxDyn(&[8, 4]));
        sst[[1, 2]] = f64::NAN;
        sst[[6, 0]] = f64::NAN;
        let file = rectilinear_file(8, 4).variable("sst", sst).unwrap();
        engine.mount("sst.nc", file).unwrap();

        let grid = Grid::create(
            engine,
            GridOptions::from_file("sst.nc", FileFormat::Gridspec)
                .add_mask(true)
                .varname("sst")
                .coord_names("lon", "lat"),
        )
        .unwrap();
        let mask = grid.get_item::<i32>(GridItem::Mask, StaggerLoc::Center).unwrap();
        assert_eq!(mask.iter().filter(|&&m| m == 0).count(), 2);
        assert_eq!(mask[[1, 2]], 0);
        assert_eq!(mask[[6, 0]], 0);
    }

    #[test]
    fn file_grid_is_decomposed() {
        let engine = Arc::new(HeapEngine::with_pets(2, 1).unwrap());
        let file = rectilinear_file(8, 4);
        engine.mount("ll.nc", file.clone()).unwrap();

        let grid = Grid::from_file(engine, "ll.nc", FileFormat::Gridspec).unwrap();
        assert_eq!(grid.lower_bounds(StaggerLoc::Center).unwrap(), Some(&[4, 0][..]));
        assert_eq!(grid.upper_bounds(StaggerLoc::Center).unwrap(), Some(&[8, 4][..]));

        let lon = grid.get_coords::<f64>(0, StaggerLoc::Center).unwrap();
        let expected = file.coords[0].slice_axis(Axis(0), Slice::from(4..8));
        assert_eq!(lon.index_axis(Axis(1), 0), expected);
    }

    #[test]
    fn write_vtk() {
        let dir = tempfile::tempdir().unwrap();
        let mut grid = grid_2d(&[StaggerLoc::Center]);
        grid.add_item(GridItem::Area, StaggerLoc::Center).unwrap();

        grid.write(dir.path().join("out"), StaggerLoc::Center).unwrap();
        let written = std::fs::read_to_string(dir.path().join("out.vtk")).unwrap();
        assert!(written.contains("DIMENSIONS 4 3 1"));
        assert!(written.contains("SCALARS area double 1"));

        assert!(matches!(
            grid.write(dir.path().join("corner"), StaggerLoc::Corner),
            Err(Error::Native { .. })
        ));
    }

    #[test]
    fn display_and_meta() {
        let mut grid = grid_2d(&[StaggerLoc::Center]);
        grid.meta_mut()
            .insert("source".to_string(), "unit test".to_string());
        assert_eq!(grid.meta().get("source").map(String::as_str), Some("unit test"));

        let summary = grid.to_string();
        assert!(summary.contains("rank = 2"));
        assert!(summary.contains("max_index = [4, 3]"));
        assert!(summary.contains("CENTER: lower bounds = [0, 0], upper bounds = [4, 3]"));
    }
}
