//! An in-process [`Engine`] keeping grids on the Rust heap.
//!
//! `HeapEngine` implements the engine contract without any native library. It decomposes grids
//! across a configurable number of workers the same way a distributed engine would, reads
//! grids from in-memory "files" mounted at paths, and writes legacy VTK files for inspection.
//! It backs the Python module and the test suite.
//!
use std::collections::{BTreeMap, HashMap};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::ptr::NonNull;

use ndarray::{ArrayD, Slice};
use parking_lot::Mutex;
use tracing::debug;

use crate::constants::{CoordSys, FileFormat, GridItem, StaggerLoc, TypeKind};
use crate::engine::{
    Bounds, Engine, FileRequest, GridHandle, GridspecInquiry, NativeBuffer, ScripInquiry,
};
use crate::errors::{Error, Result};
use crate::helpers::volume;

/// Grid definition mounted in a [`HeapEngine`] in place of a file on disk.
///
/// Coordinates are given either as full arrays with one extent per dimension, or as one axis
/// per dimension. Corner coordinates, if any, have one more point than cells in every
/// dimension. Data variables are used to derive masks: a `NaN` marks a masked cell.
///
#[derive(Clone, Debug)]
pub struct GridFile {
    pub format: FileFormat,
    pub max_index: Vec<i32>,
    pub coords: Vec<ArrayD<f64>>,
    pub corners: Option<Vec<ArrayD<f64>>>,
    pub area: Option<ArrayD<f64>>,
    pub variables: BTreeMap<String, ArrayD<f64>>,
    pub coord_names: Vec<String>,
}

impl GridFile {
    /// Describe a grid by its center coordinates, one array per dimension.
    pub fn new(format: FileFormat, coords: Vec<ArrayD<f64>>) -> Result<Self> {
        let max_index: Vec<usize> = match coords.first() {
            Some(first) if first.ndim() == 1 => coords.iter().map(|axis| axis.len()).collect(),
            Some(first) => first.shape().to_vec(),
            None => return Err(Error::Rank(0)),
        };

        let file = Self {
            format,
            max_index: max_index.iter().map(|&n| n as i32).collect(),
            coords,
            corners: None,
            area: None,
            variables: BTreeMap::new(),
            coord_names: vec!["lon".to_string(), "lat".to_string()],
        };
        file.validate()?;

        Ok(file)
    }

    pub fn corners(mut self, corners: Vec<ArrayD<f64>>) -> Result<Self> {
        self.corners = Some(corners);
        self.validate()?;

        Ok(self)
    }

    pub fn area(mut self, area: ArrayD<f64>) -> Result<Self> {
        self.area = Some(area);
        self.validate()?;

        Ok(self)
    }

    pub fn variable(mut self, name: &str, data: ArrayD<f64>) -> Result<Self> {
        self.variables.insert(name.to_string(), data);
        self.validate()?;

        Ok(self)
    }

    pub fn coord_names(mut self, lon: &str, lat: &str) -> Self {
        self.coord_names = vec![lon.to_string(), lat.to_string()];
        self
    }

    pub fn rank(&self) -> usize {
        self.max_index.len()
    }

    /// Rank of the coordinate arrays
    pub fn ndims(&self) -> usize {
        self.coords.first().map_or(0, |coords| coords.ndim())
    }

    fn validate(&self) -> Result<()> {
        let rank = self.rank();
        StaggerLoc::all(rank)?;
        if self.coords.len() != rank {
            return Err(Error::CoordDims {
                ndims: self.coords.len(),
                rank,
            });
        }

        let cells: Vec<usize> = self.max_index.iter().map(|&n| n as usize).collect();
        let points: Vec<usize> = cells.iter().map(|n| n + 1).collect();
        let axes = self.ndims() == 1;
        if axes && self.format == FileFormat::Scrip {
            return Err(Error::Argument(
                "SCRIP files hold full coordinate arrays".into(),
            ));
        }

        let check = |array: &ArrayD<f64>, dim: usize, extents: &[usize]| {
            let expected = if axes {
                vec![extents[dim]]
            } else {
                extents.to_vec()
            };
            if array.shape() == expected.as_slice() {
                Ok(())
            } else {
                Err(Error::ShapeMismatch {
                    expected,
                    found: array.shape().to_vec(),
                })
            }
        };

        for (dim, coords) in self.coords.iter().enumerate() {
            check(coords, dim, &cells)?;
        }
        if let Some(corners) = &self.corners {
            if corners.len() != rank {
                return Err(Error::CoordDims {
                    ndims: corners.len(),
                    rank,
                });
            }
            for (dim, corners) in corners.iter().enumerate() {
                check(corners, dim, &points)?;
            }
        }
        for data in self.area.iter().chain(self.variables.values()) {
            if data.shape() != cells.as_slice() {
                return Err(Error::ShapeMismatch {
                    expected: cells.clone(),
                    found: data.shape().to_vec(),
                });
            }
        }

        Ok(())
    }
}

enum HeapBuffer {
    I4(Vec<i32>),
    R4(Vec<f32>),
    R8(Vec<f64>),
}

impl HeapBuffer {
    fn zeroed(kind: TypeKind, len: usize) -> Result<Self> {
        match kind {
            TypeKind::I4 => Ok(Self::I4(vec![0; len])),
            TypeKind::R4 => Ok(Self::R4(vec![0.0; len])),
            TypeKind::R8 => Ok(Self::R8(vec![0.0; len])),
            TypeKind::I8 => Err(Error::native(
                "allocate",
                "64 bit integer buffers are not supported",
            )),
        }
    }

    fn native(&mut self) -> NativeBuffer {
        fn raw<T>(data: &mut [T]) -> NonNull<u8> {
            NonNull::from(data).cast()
        }

        match self {
            Self::I4(data) => NativeBuffer {
                ptr: raw(data.as_mut_slice()),
                len: data.len(),
                kind: TypeKind::I4,
            },
            Self::R4(data) => NativeBuffer {
                ptr: raw(data.as_mut_slice()),
                len: data.len(),
                kind: TypeKind::R4,
            },
            Self::R8(data) => NativeBuffer {
                ptr: raw(data.as_mut_slice()),
                len: data.len(),
                kind: TypeKind::R8,
            },
        }
    }

    fn get(&self, index: usize) -> f64 {
        match self {
            Self::I4(data) => data[index] as f64,
            Self::R4(data) => data[index] as f64,
            Self::R8(data) => data[index],
        }
    }
}

struct HeapGrid {
    max_index: Vec<i32>,
    periodic_dim: Option<usize>,
    coord_type: TypeKind,

    /// Number of blocks per dimension
    decomp: Vec<usize>,

    /// Coordinates are stored as one axis per dimension
    axes: bool,

    coords: HashMap<StaggerLoc, Vec<HeapBuffer>>,
    mask: HashMap<StaggerLoc, HeapBuffer>,
    area: HashMap<StaggerLoc, HeapBuffer>,
}

impl HeapGrid {
    fn rank(&self) -> usize {
        self.max_index.len()
    }

    fn items(&mut self, item: GridItem) -> &mut HashMap<StaggerLoc, HeapBuffer> {
        match item {
            GridItem::Mask => &mut self.mask,
            GridItem::Area => &mut self.area,
        }
    }

    /// This worker's block of the index space at a stagger location.
    ///
    /// Cells are balanced over the blocks of each dimension, remainders going to the first
    /// blocks. Locations offset in a dimension have one extra point on the last block, unless
    /// that dimension is periodic.
    ///
    fn local_bounds(&self, loc: StaggerLoc, local_pet: usize) -> Result<Bounds> {
        loc.check_rank(self.rank())?;
        let mut pet = local_pet;
        let mut lower = Vec::with_capacity(self.rank());
        let mut upper = Vec::with_capacity(self.rank());

        for (dim, (&cells, &blocks)) in self.max_index.iter().zip(&self.decomp).enumerate() {
            let position = pet % blocks;
            pet /= blocks;

            let cells = cells as usize;
            let (base, extra) = (cells / blocks, cells % blocks);
            let start = position * base + position.min(extra);
            let mut len = base + usize::from(position < extra);
            if loc.is_offset(dim) && self.periodic_dim != Some(dim) && position == blocks - 1 {
                len += 1;
            }

            lower.push(start as i32);
            upper.push((start + len) as i32);
        }

        Ok(Bounds { lower, upper })
    }

    fn has_storage(&self, loc: StaggerLoc) -> bool {
        self.coords.contains_key(&loc) || self.mask.contains_key(&loc) || self.area.contains_key(&loc)
    }
}

#[derive(Default)]
struct HeapState {
    next_handle: u64,
    grids: HashMap<GridHandle, HeapGrid>,
    files: HashMap<PathBuf, GridFile>,
    destroyed: usize,
}

impl HeapState {
    fn grid(&mut self, handle: GridHandle) -> Result<&mut HeapGrid> {
        self.grids
            .get_mut(&handle)
            .ok_or_else(|| Error::native("grid", format!("no grid with handle {}", handle.raw())))
    }

    fn file(&self, filename: &Path) -> Result<&GridFile> {
        self.files.get(filename).ok_or_else(|| {
            Error::native(
                "open",
                format!("no grid file mounted at {}", filename.display()),
            )
        })
    }

    fn register(&mut self, grid: HeapGrid) -> GridHandle {
        self.next_handle += 1;
        let handle = GridHandle::new(self.next_handle);
        self.grids.insert(handle, grid);

        handle
    }
}

/// Engine keeping every grid in process memory.
///
/// Simulates running as one of `pet_count` parallel workers: each grid is block decomposed and
/// only the block belonging to `local_pet` is stored and reported.
///
pub struct HeapEngine {
    pet_count: usize,
    local_pet: usize,
    state: Mutex<HeapState>,
}

impl Default for HeapEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl HeapEngine {
    /// A single worker engine
    pub fn new() -> Self {
        Self {
            pet_count: 1,
            local_pet: 0,
            state: Mutex::new(HeapState::default()),
        }
    }

    /// An engine acting as worker `local_pet` out of `pet_count`.
    pub fn with_pets(pet_count: usize, local_pet: usize) -> Result<Self> {
        if pet_count == 0 || local_pet >= pet_count {
            return Err(Error::Argument(format!(
                "PET {local_pet} is not one of {pet_count} PETs"
            )));
        }

        Ok(Self {
            pet_count,
            local_pet,
            state: Mutex::new(HeapState::default()),
        })
    }

    /// Make a grid definition readable at `path`.
    pub fn mount<P>(&self, path: P, file: GridFile) -> Result<()>
    where
        P: Into<PathBuf>,
    {
        file.validate()?;
        self.state.lock().files.insert(path.into(), file);

        Ok(())
    }

    /// Number of grids currently allocated
    pub fn live_grids(&self) -> usize {
        self.state.lock().grids.len()
    }

    /// Number of grids released so far
    pub fn destroyed(&self) -> usize {
        self.state.lock().destroyed
    }

    fn create(
        &self,
        max_index: &[i32],
        periodic_dim: Option<usize>,
        coord_type: TypeKind,
    ) -> Result<GridHandle> {
        let rank = max_index.len();
        StaggerLoc::all(rank)?;
        if max_index.iter().any(|&n| n < 1) {
            return Err(Error::native(
                "create",
                format!("invalid max_index {max_index:?}"),
            ));
        }

        let mut decomp = vec![1; rank];
        decomp[0] = self.pet_count;
        let handle = self.state.lock().register(HeapGrid {
            max_index: max_index.to_vec(),
            periodic_dim,
            coord_type,
            decomp,
            axes: false,
            coords: HashMap::new(),
            mask: HashMap::new(),
            area: HashMap::new(),
        });
        debug!(handle = handle.raw(), ?max_index, "allocated heap grid");

        Ok(handle)
    }

    fn decomposition(&self, reg_decomp: &[i32], rank: usize) -> Result<Vec<usize>> {
        if reg_decomp.len() > rank || reg_decomp.iter().any(|&n| n < 1) {
            return Err(Error::native(
                "create_from_file",
                format!("invalid reg_decomp {reg_decomp:?} for a rank {rank} grid"),
            ));
        }
        let mut decomp: Vec<usize> = reg_decomp.iter().map(|&n| n as usize).collect();
        decomp.resize(rank, 1);
        if decomp.iter().product::<usize>() != self.pet_count {
            return Err(Error::native(
                "create_from_file",
                format!(
                    "reg_decomp {reg_decomp:?} does not match {} PETs",
                    self.pet_count
                ),
            ));
        }

        Ok(decomp)
    }
}

fn extents(bounds: &Bounds) -> Vec<usize> {
    bounds
        .lower
        .iter()
        .zip(&bounds.upper)
        .map(|(lower, upper)| (upper - lower).max(0) as usize)
        .collect()
}

/// Extract a local block from a file array, as a column-major buffer.
///
/// `dim` selects the axis being extracted when the file holds one axis per dimension.
///
fn extract(array: &ArrayD<f64>, bounds: &Bounds, dim: Option<usize>) -> Result<Vec<f64>> {
    let ranges: Vec<(usize, usize)> = match dim {
        Some(dim) => vec![(bounds.lower[dim] as usize, bounds.upper[dim] as usize)],
        None => bounds
            .lower
            .iter()
            .zip(&bounds.upper)
            .map(|(&lower, &upper)| (lower as usize, upper as usize))
            .collect(),
    };
    if ranges.len() != array.ndim()
        || ranges
            .iter()
            .zip(array.shape())
            .any(|(&(_, upper), &len)| upper > len)
    {
        return Err(Error::native(
            "read",
            format!(
                "variable of shape {:?} does not cover {:?}",
                array.shape(),
                ranges
            ),
        ));
    }

    let block = array.slice_each_axis(|axis| {
        let (lower, upper) = ranges[axis.axis.index()];
        Slice::from(lower..upper)
    });

    // Iterating the transpose in logical order visits the first axis fastest
    Ok(block.t().iter().copied().collect())
}

unsafe impl Engine for HeapEngine {
    fn pet_count(&self) -> usize {
        self.pet_count
    }

    fn local_pet(&self) -> usize {
        self.local_pet
    }

    fn create_no_periodic(
        &self,
        max_index: &[i32],
        _coord_sys: CoordSys,
        coord_type: TypeKind,
    ) -> Result<GridHandle> {
        self.create(max_index, None, coord_type)
    }

    fn create_one_periodic(
        &self,
        max_index: &[i32],
        periodic_dim: usize,
        pole_dim: usize,
        _coord_sys: CoordSys,
        coord_type: TypeKind,
    ) -> Result<GridHandle> {
        let rank = max_index.len();
        if periodic_dim >= rank || pole_dim >= rank || periodic_dim == pole_dim {
            return Err(Error::native(
                "create_one_periodic",
                format!("bad periodic_dim {periodic_dim} or pole_dim {pole_dim}"),
            ));
        }

        self.create(max_index, Some(periodic_dim), coord_type)
    }

    fn create_from_file(&self, request: &FileRequest<'_>) -> Result<GridHandle> {
        let mut state = self.state.lock();
        let file = state.file(request.filename)?;
        if file.format != request.filetype {
            return Err(Error::native(
                "create_from_file",
                format!(
                    "{} is a {} file, not {}",
                    request.filename.display(),
                    file.format,
                    request.filetype
                ),
            ));
        }
        if let Some(names) = request.coord_names {
            if request.filetype != FileFormat::Gridspec || names != file.coord_names.as_slice() {
                return Err(Error::native(
                    "create_from_file",
                    format!("coordinate variables {names:?} not found"),
                ));
            }
        }

        let rank = file.rank();
        let mask_source = if request.add_mask {
            let varname = request.varname.ok_or_else(|| {
                Error::native("create_from_file", "a mask needs a variable name")
            })?;
            if request.filetype != FileFormat::Gridspec {
                return Err(Error::native(
                    "create_from_file",
                    "masks can only be derived from GRIDSPEC variables",
                ));
            }
            let data = file.variables.get(varname).ok_or_else(|| {
                Error::native("create_from_file", format!("variable {varname} not found"))
            })?;
            Some(data)
        } else {
            None
        };
        if request.add_user_area && file.area.is_none() {
            return Err(Error::native("create_from_file", "file holds no cell areas"));
        }
        let corner_source = if request.add_corner_stagger {
            Some(file.corners.as_ref().ok_or_else(|| {
                Error::native("create_from_file", "file holds no corner coordinates")
            })?)
        } else {
            None
        };

        let mut grid = HeapGrid {
            max_index: file.max_index.clone(),
            periodic_dim: request.is_sphere.then_some(0),
            coord_type: TypeKind::R8,
            decomp: self.decomposition(request.reg_decomp, rank)?,
            axes: file.ndims() == 1,
            coords: HashMap::new(),
            mask: HashMap::new(),
            area: HashMap::new(),
        };

        let load = |grid: &HeapGrid, loc: StaggerLoc, arrays: &[ArrayD<f64>]| {
            let bounds = grid.local_bounds(loc, self.local_pet)?;
            arrays
                .iter()
                .enumerate()
                .map(|(dim, array)| {
                    let dim = grid.axes.then_some(dim);
                    Ok(HeapBuffer::R8(extract(array, &bounds, dim)?))
                })
                .collect::<Result<Vec<_>>>()
        };

        let center = StaggerLoc::center(rank)?;
        let coords = load(&grid, center, &file.coords)?;
        grid.coords.insert(center, coords);
        if let Some(corners) = corner_source {
            let corner = StaggerLoc::corner(rank)?;
            let coords = load(&grid, corner, corners)?;
            grid.coords.insert(corner, coords);
        }

        let cells = grid.local_bounds(center, self.local_pet)?;
        if let (true, Some(area)) = (request.add_user_area, &file.area) {
            grid.area
                .insert(center, HeapBuffer::R8(extract(area, &cells, None)?));
        }
        if let Some(data) = mask_source {
            let mask = extract(data, &cells, None)?
                .into_iter()
                .map(|value| i32::from(!value.is_nan()))
                .collect();
            grid.mask.insert(center, HeapBuffer::I4(mask));
        }

        let handle = state.register(grid);
        debug!(
            handle = handle.raw(),
            filename = %request.filename.display(),
            "read heap grid from file"
        );

        Ok(handle)
    }

    fn inquire_scrip(&self, filename: &Path) -> Result<ScripInquiry> {
        let state = self.state.lock();
        let file = state.file(filename)?;
        if file.format != FileFormat::Scrip {
            return Err(Error::native(
                "inquire_scrip",
                format!("{} is not a SCRIP file", filename.display()),
            ));
        }

        Ok(ScripInquiry {
            rank: file.rank(),
            max_index: file.max_index.clone(),
        })
    }

    fn inquire_gridspec(&self, filename: &Path) -> Result<GridspecInquiry> {
        let state = self.state.lock();
        let file = state.file(filename)?;
        if file.format != FileFormat::Gridspec {
            return Err(Error::native(
                "inquire_gridspec",
                format!("{} is not a GRIDSPEC file", filename.display()),
            ));
        }

        Ok(GridspecInquiry {
            rank: file.rank(),
            ndims: file.ndims(),
            max_index: file.max_index.clone(),
        })
    }

    fn add_coord(&self, handle: GridHandle, loc: StaggerLoc) -> Result<()> {
        let mut state = self.state.lock();
        let grid = state.grid(handle)?;
        if grid.coords.contains_key(&loc) {
            return Err(Error::native(
                "add_coord",
                format!("coordinates already allocated at {loc}"),
            ));
        }
        let bounds = grid.local_bounds(loc, self.local_pet)?;
        let len = volume(&extents(&bounds));
        let coords = (0..grid.rank())
            .map(|_| HeapBuffer::zeroed(grid.coord_type, len))
            .collect::<Result<Vec<_>>>()?;
        grid.coords.insert(loc, coords);

        Ok(())
    }

    fn add_item(&self, handle: GridHandle, item: GridItem, loc: StaggerLoc) -> Result<()> {
        let mut state = self.state.lock();
        let grid = state.grid(handle)?;
        if grid.items(item).contains_key(&loc) {
            return Err(Error::native(
                "add_item",
                format!("{item} already allocated at {loc}"),
            ));
        }
        let bounds = grid.local_bounds(loc, self.local_pet)?;
        let buffer = HeapBuffer::zeroed(item.kind(), volume(&extents(&bounds)))?;
        grid.items(item).insert(loc, buffer);

        Ok(())
    }

    fn coord_bounds(&self, handle: GridHandle, loc: StaggerLoc) -> Result<Bounds> {
        let mut state = self.state.lock();
        let grid = state.grid(handle)?;
        if !grid.has_storage(loc) {
            return Err(Error::native(
                "coord_bounds",
                format!("nothing allocated at {loc}"),
            ));
        }

        grid.local_bounds(loc, self.local_pet)
    }

    fn coord_ptr(
        &self,
        handle: GridHandle,
        coord_dim: usize,
        loc: StaggerLoc,
    ) -> Result<NativeBuffer> {
        let mut state = self.state.lock();
        let grid = state.grid(handle)?;
        let coords = grid.coords.get_mut(&loc).ok_or_else(|| {
            Error::native("coord_ptr", format!("no coordinates allocated at {loc}"))
        })?;
        let buffer = coords.get_mut(coord_dim).ok_or_else(|| {
            Error::native("coord_ptr", format!("no coordinate dimension {coord_dim}"))
        })?;

        Ok(buffer.native())
    }

    fn item_ptr(&self, handle: GridHandle, item: GridItem, loc: StaggerLoc) -> Result<NativeBuffer> {
        let mut state = self.state.lock();
        let grid = state.grid(handle)?;
        let buffer = grid
            .items(item)
            .get_mut(&loc)
            .ok_or_else(|| Error::native("item_ptr", format!("no {item} allocated at {loc}")))?;

        Ok(buffer.native())
    }

    /// Write the local block at a stagger location as a legacy VTK structured grid, named after
    /// `filename` with a `.vtk` extension appended. Masks and areas at the same location are
    /// written as point data.
    fn write(&self, handle: GridHandle, filename: &Path, loc: StaggerLoc) -> Result<()> {
        let mut state = self.state.lock();
        let grid = state.grid(handle)?;
        let bounds = grid.local_bounds(loc, self.local_pet)?;
        let mut shape = extents(&bounds);
        let axes = grid.axes;
        let coords = grid.coords.get(&loc).ok_or_else(|| {
            Error::native("write", format!("no coordinates allocated at {loc}"))
        })?;

        let mut path = filename.as_os_str().to_owned();
        path.push(".vtk");
        let mut out = BufWriter::new(File::create(PathBuf::from(path))?);

        let points = volume(&shape);
        let rank = shape.len();
        shape.resize(3, 1);
        writeln!(out, "# vtk DataFile Version 3.0")?;
        writeln!(out, "grid at {loc}")?;
        writeln!(out, "ASCII")?;
        writeln!(out, "DATASET STRUCTURED_GRID")?;
        writeln!(out, "DIMENSIONS {} {} {}", shape[0], shape[1], shape[2])?;
        writeln!(out, "POINTS {points} double")?;
        for index in 0..points {
            let mut rest = index;
            let mut point = [0.0; 3];
            for dim in 0..rank {
                let position = rest % shape[dim];
                rest /= shape[dim];
                point[dim] = if axes {
                    coords[dim].get(position)
                } else {
                    coords[dim].get(index)
                };
            }
            writeln!(out, "{} {} {}", point[0], point[1], point[2])?;
        }

        let mask = grid.mask.get(&loc);
        let area = grid.area.get(&loc);
        if mask.is_some() || area.is_some() {
            writeln!(out, "POINT_DATA {points}")?;
        }
        if let Some(mask) = mask {
            writeln!(out, "SCALARS mask int 1")?;
            writeln!(out, "LOOKUP_TABLE default")?;
            for index in 0..points {
                writeln!(out, "{}", mask.get(index))?;
            }
        }
        if let Some(area) = area {
            writeln!(out, "SCALARS area double 1")?;
            writeln!(out, "LOOKUP_TABLE default")?;
            for index in 0..points {
                writeln!(out, "{}", area.get(index))?;
            }
        }
        out.flush()?;

        Ok(())
    }

    fn destroy(&self, handle: GridHandle) -> Result<()> {
        let mut state = self.state.lock();
        state
            .grids
            .remove(&handle)
            .ok_or_else(|| Error::native("destroy", format!("no grid with handle {}", handle.raw())))?;
        state.destroyed += 1;
        debug!(handle = handle.raw(), "released heap grid");

        Ok(())
    }
}
