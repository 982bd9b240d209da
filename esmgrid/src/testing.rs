use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use ndarray::{Array1, ArrayD, IxDyn, ShapeBuilder};
use rand::{rngs::StdRng, Rng, SeedableRng};

use crate::constants::{CoordSys, FileFormat, GridItem, StaggerLoc, TypeKind};
use crate::engine::{
    Bounds, Engine, FileRequest, GridHandle, GridspecInquiry, NativeBuffer, ScripInquiry,
};
use crate::errors::{Error, Result};
use crate::heap::{GridFile, HeapEngine};

pub(crate) fn engine() -> Arc<HeapEngine> {
    Arc::new(HeapEngine::new())
}

/// Random values in column-major order, reproducible for a given seed
pub(crate) fn random_array(shape: &[usize], seed: u64) -> ArrayD<f64> {
    let mut rng = StdRng::seed_from_u64(seed);
    ArrayD::from_shape_simple_fn(IxDyn(shape).f(), || rng.gen_range(-180.0..180.0))
}

/// A global rectilinear GRIDSPEC grid described by one axis per dimension
pub(crate) fn rectilinear_file(nlon: usize, nlat: usize) -> GridFile {
    let dlon = 360.0 / nlon as f64;
    let dlat = 180.0 / nlat as f64;
    let lon = Array1::from_shape_fn(nlon, |i| (i as f64 + 0.5) * dlon).into_dyn();
    let lat = Array1::from_shape_fn(nlat, |j| -90.0 + (j as f64 + 0.5) * dlat).into_dyn();
    let lon_corners = Array1::from_shape_fn(nlon + 1, |i| i as f64 * dlon).into_dyn();
    let lat_corners = Array1::from_shape_fn(nlat + 1, |j| -90.0 + j as f64 * dlat).into_dyn();

    GridFile::new(FileFormat::Gridspec, vec![lon, lat])
        .and_then(|file| file.corners(vec![lon_corners, lat_corners]))
        .expect("valid rectilinear grid")
}

/// A curvilinear SCRIP grid with random coordinates
pub(crate) fn scrip_file(shape: &[usize], seed: u64) -> GridFile {
    let coords = (0..shape.len())
        .map(|dim| random_array(shape, seed + dim as u64))
        .collect();
    let area = ArrayD::from_elem(IxDyn(shape), 2.5);

    GridFile::new(FileFormat::Scrip, coords)
        .and_then(|file| file.area(area))
        .expect("valid SCRIP grid")
}

/// Wraps a `HeapEngine`, optionally misbehaving when asked for bounds.
pub(crate) struct FlakyEngine {
    pub(crate) inner: HeapEngine,

    /// Report bounds one cell larger in the first dimension than the real ones
    pub(crate) drift: AtomicBool,

    /// Fail every bounds query
    pub(crate) fail_bounds: AtomicBool,
}

impl FlakyEngine {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self {
            inner: HeapEngine::new(),
            drift: AtomicBool::new(false),
            fail_bounds: AtomicBool::new(false),
        })
    }
}

unsafe impl Engine for FlakyEngine {
    fn pet_count(&self) -> usize {
        self.inner.pet_count()
    }

    fn local_pet(&self) -> usize {
        self.inner.local_pet()
    }

    fn create_no_periodic(
        &self,
        max_index: &[i32],
        coord_sys: CoordSys,
        coord_type: TypeKind,
    ) -> Result<GridHandle> {
        self.inner.create_no_periodic(max_index, coord_sys, coord_type)
    }

    fn create_one_periodic(
        &self,
        max_index: &[i32],
        periodic_dim: usize,
        pole_dim: usize,
        coord_sys: CoordSys,
        coord_type: TypeKind,
    ) -> Result<GridHandle> {
        self.inner
            .create_one_periodic(max_index, periodic_dim, pole_dim, coord_sys, coord_type)
    }

    fn create_from_file(&self, request: &FileRequest<'_>) -> Result<GridHandle> {
        self.inner.create_from_file(request)
    }

    fn inquire_scrip(&self, filename: &Path) -> Result<ScripInquiry> {
        self.inner.inquire_scrip(filename)
    }

    fn inquire_gridspec(&self, filename: &Path) -> Result<GridspecInquiry> {
        self.inner.inquire_gridspec(filename)
    }

    fn add_coord(&self, grid: GridHandle, loc: StaggerLoc) -> Result<()> {
        self.inner.add_coord(grid, loc)
    }

    fn add_item(&self, grid: GridHandle, item: GridItem, loc: StaggerLoc) -> Result<()> {
        self.inner.add_item(grid, item, loc)
    }

    fn coord_bounds(&self, grid: GridHandle, loc: StaggerLoc) -> Result<Bounds> {
        if self.fail_bounds.load(Ordering::SeqCst) {
            return Err(Error::native("coord_bounds", "injected failure"));
        }
        let mut bounds = self.inner.coord_bounds(grid, loc)?;
        if self.drift.load(Ordering::SeqCst) {
            bounds.upper[0] += 1;
        }

        Ok(bounds)
    }

    fn coord_ptr(
        &self,
        grid: GridHandle,
        coord_dim: usize,
        loc: StaggerLoc,
    ) -> Result<NativeBuffer> {
        self.inner.coord_ptr(grid, coord_dim, loc)
    }

    fn item_ptr(&self, grid: GridHandle, item: GridItem, loc: StaggerLoc) -> Result<NativeBuffer> {
        self.inner.item_ptr(grid, item, loc)
    }

    fn write(&self, grid: GridHandle, filename: &Path, loc: StaggerLoc) -> Result<()> {
        self.inner.write(grid, filename, loc)
    }

    fn destroy(&self, grid: GridHandle) -> Result<()> {
        self.inner.destroy(grid)
    }
}
