use std::path::Path;
use std::ptr::NonNull;

use crate::constants::{CoordSys, DecompFlag, FileFormat, GridItem, StaggerLoc, TypeKind};
use crate::errors::Result;

/// Opaque reference to a grid allocated by an [`Engine`].
///
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct GridHandle(u64);

impl GridHandle {
    pub fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub fn raw(self) -> u64 {
        self.0
    }
}

/// A contiguous, column-major buffer owned by the engine.
///
/// `len` counts elements of `kind`, not bytes.
///
#[derive(Clone, Copy, Debug)]
pub struct NativeBuffer {
    pub ptr: NonNull<u8>,
    pub len: usize,
    pub kind: TypeKind,
}

/// Local index-space box owned by this worker for one stagger location.
///
/// Lower bounds are inclusive and upper bounds exclusive, both zero based.
///
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Bounds {
    pub lower: Vec<i32>,
    pub upper: Vec<i32>,
}

/// Result of inquiring a SCRIP file
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ScripInquiry {
    pub rank: usize,
    pub max_index: Vec<i32>,
}

/// Result of inquiring a GRIDSPEC file.
///
/// `ndims` is the rank of the coordinate variables, which is 1 for rectilinear grids
/// described by one axis per dimension.
///
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GridspecInquiry {
    pub rank: usize,
    pub ndims: usize,
    pub max_index: Vec<i32>,
}

/// Everything the engine needs to build a grid from a file.
#[derive(Clone, Debug)]
pub struct FileRequest<'a> {
    pub filename: &'a Path,
    pub filetype: FileFormat,
    pub reg_decomp: &'a [i32],
    pub decompflag: Option<&'a [DecompFlag]>,
    pub is_sphere: bool,
    pub add_corner_stagger: bool,
    pub add_user_area: bool,
    pub add_mask: bool,
    pub varname: Option<&'a str>,
    pub coord_names: Option<&'a [String]>,
}

/// The native grid engine a [`Grid`](crate::Grid) delegates to.
///
/// Grid topology, decomposition and file ingestion all live behind this trait. Coordinates and
/// items are allocated by the engine and handed back as raw buffers, which the grid aliases
/// without copying.
///
/// # Safety
///
/// Implementors must guarantee that a buffer returned by `coord_ptr` or `item_ptr` points to
/// `len` initialized, properly aligned elements of `kind`, laid out in column-major order with
/// the shape given by `coord_bounds` for the same stagger location, and that it stays valid and
/// does not move until `destroy` is called for the grid. The engine must not hand out
/// overlapping buffers for different coordinates or items.
///
pub unsafe trait Engine: Send + Sync {
    /// Number of parallel workers (PETs) sharing the grid
    fn pet_count(&self) -> usize;

    /// Index of this worker, in `0..pet_count()`
    fn local_pet(&self) -> usize;

    fn create_no_periodic(
        &self,
        max_index: &[i32],
        coord_sys: CoordSys,
        coord_type: TypeKind,
    ) -> Result<GridHandle>;

    fn create_one_periodic(
        &self,
        max_index: &[i32],
        periodic_dim: usize,
        pole_dim: usize,
        coord_sys: CoordSys,
        coord_type: TypeKind,
    ) -> Result<GridHandle>;

    /// Create a grid from a SCRIP or GRIDSPEC file.
    ///
    /// Center coordinates are loaded, as are corner coordinates, area and mask when the request
    /// asks for them.
    ///
    fn create_from_file(&self, request: &FileRequest<'_>) -> Result<GridHandle>;

    fn inquire_scrip(&self, filename: &Path) -> Result<ScripInquiry>;

    fn inquire_gridspec(&self, filename: &Path) -> Result<GridspecInquiry>;

    /// Allocate coordinate storage at a stagger location.
    fn add_coord(&self, grid: GridHandle, loc: StaggerLoc) -> Result<()>;

    /// Allocate item storage at a stagger location.
    fn add_item(&self, grid: GridHandle, item: GridItem, loc: StaggerLoc) -> Result<()>;

    /// Local bounds of this worker's piece of the grid at a stagger location.
    fn coord_bounds(&self, grid: GridHandle, loc: StaggerLoc) -> Result<Bounds>;

    fn coord_ptr(&self, grid: GridHandle, coord_dim: usize, loc: StaggerLoc)
        -> Result<NativeBuffer>;

    fn item_ptr(&self, grid: GridHandle, item: GridItem, loc: StaggerLoc) -> Result<NativeBuffer>;

    /// Write the grid at a stagger location to a diagnostic file.
    fn write(&self, grid: GridHandle, filename: &Path, loc: StaggerLoc) -> Result<()>;

    /// Release all memory held for a grid. Buffers previously returned for it become invalid.
    fn destroy(&self, grid: GridHandle) -> Result<()>;
}
