use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use ndarray::{ArrayViewD, Slice};
use numpy::{PyArrayDyn, PyReadonlyArrayDyn};
use pyo3::exceptions::{PyTypeError, PyUserWarning};
use pyo3::once_cell::GILOnceCell;
use pyo3::prelude::*;
use pyo3::types::{PySlice, PyTuple};

use esmgrid::{
    CoordSys, DecompFlag, Engine, FileFormat, Grid, GridFile, GridItem, GridOptions,
    GridSlice, HeapEngine, StaggerLoc, TypeKind,
};

use super::helpers::{convert_error, parse, parse_all, staggerlocs, StateError};

static DEFAULT_ENGINE: GILOnceCell<Arc<HeapEngine>> = GILOnceCell::new();

fn default_engine(py: Python) -> Arc<HeapEngine> {
    DEFAULT_ENGINE
        .get_or_init(py, || Arc::new(HeapEngine::new()))
        .clone()
}

/// Hand a view to Python as a numpy array sharing its memory. `container` is kept alive for as
/// long as the array is.
fn alias<T>(view: ArrayViewD<'_, T>, container: &PyAny) -> PyObject
where
    T: esmgrid::Element + numpy::Element,
{
    let array = unsafe { PyArrayDyn::borrow_from_array(&view, container) };
    array.to_object(container.py())
}

fn stagger_or_default(grid: &Grid, staggerloc: Option<&str>) -> PyResult<StaggerLoc> {
    match staggerloc {
        Some(name) => parse(name),
        None => Ok(grid.default_stagger()),
    }
}

/// Holds the engine grids are created with, and the files they can be read from.
#[pyclass(name = "Manager")]
#[derive(Clone)]
pub struct PyManager {
    engine: Arc<HeapEngine>,
}

#[pymethods]
impl PyManager {
    /// The process wide engine, running as a single PET
    #[new]
    fn new(py: Python) -> Self {
        Self {
            engine: default_engine(py),
        }
    }

    /// A separate engine acting as PET `local_pet` out of `pet_count`
    #[staticmethod]
    fn with_pets(pet_count: usize, local_pet: usize) -> PyResult<Self> {
        Ok(Self {
            engine: Arc::new(HeapEngine::with_pets(pet_count, local_pet).map_err(convert_error)?),
        })
    }

    #[getter]
    fn pet_count(&self) -> usize {
        self.engine.pet_count()
    }

    #[getter]
    fn local_pet(&self) -> usize {
        self.engine.local_pet()
    }

    #[getter]
    fn live_grids(&self) -> usize {
        self.engine.live_grids()
    }

    #[getter]
    fn destroyed(&self) -> usize {
        self.engine.destroyed()
    }

    /// Make a grid description readable as `path`.
    #[pyo3(signature = (path, filetype, coords, corners=None, area=None, variables=None, coord_names=None))]
    #[allow(clippy::too_many_arguments)]
    fn mount(
        &self,
        path: PathBuf,
        filetype: &str,
        coords: Vec<PyReadonlyArrayDyn<f64>>,
        corners: Option<Vec<PyReadonlyArrayDyn<f64>>>,
        area: Option<PyReadonlyArrayDyn<f64>>,
        variables: Option<HashMap<String, PyReadonlyArrayDyn<f64>>>,
        coord_names: Option<(String, String)>,
    ) -> PyResult<()> {
        let owned = |arrays: Vec<PyReadonlyArrayDyn<f64>>| {
            arrays
                .iter()
                .map(|array| array.as_array().to_owned())
                .collect::<Vec<_>>()
        };

        let mut file = GridFile::new(parse::<FileFormat>(filetype)?, owned(coords))
            .map_err(convert_error)?;
        if let Some(corners) = corners {
            file = file.corners(owned(corners)).map_err(convert_error)?;
        }
        if let Some(area) = area {
            file = file.area(area.as_array().to_owned()).map_err(convert_error)?;
        }
        for (name, data) in variables.unwrap_or_default() {
            file = file
                .variable(&name, data.as_array().to_owned())
                .map_err(convert_error)?;
        }
        if let Some((lon, lat)) = coord_names {
            file = file.coord_names(&lon, &lat);
        }

        self.engine.mount(path, file).map_err(convert_error)
    }
}

/// A logically rectangular grid. Coordinate, mask and area arrays returned by its methods share
/// memory with the engine.
#[pyclass(name = "Grid")]
pub struct PyGrid {
    inner: Grid,

    /// Weak reference to the base object of the arrays currently aliasing engine memory
    exports: Option<PyObject>,
}

/// Base object of every array aliasing a grid's memory, including views numpy derives from
/// them. Keeps the grid alive while any such array is, and lets the grid tell whether one is.
#[pyclass(weakref)]
struct Exports {
    _grid: Py<PyGrid>,
}

#[pymethods]
impl PyGrid {
    #[new]
    #[pyo3(signature = (
        max_index=None,
        num_peri_dims=None,
        periodic_dim=None,
        pole_dim=None,
        coord_sys=None,
        coord_typekind=None,
        staggerloc=None,
        filename=None,
        filetype=None,
        reg_decomp=None,
        decompflag=None,
        is_sphere=None,
        add_corner_stagger=None,
        add_user_area=None,
        add_mask=None,
        varname=None,
        coord_names=None,
        manager=None,
    ))]
    #[allow(clippy::too_many_arguments)]
    fn new(
        py: Python,
        max_index: Option<Vec<i32>>,
        num_peri_dims: Option<usize>,
        periodic_dim: Option<usize>,
        pole_dim: Option<usize>,
        coord_sys: Option<&str>,
        coord_typekind: Option<&str>,
        staggerloc: Option<&PyAny>,
        filename: Option<PathBuf>,
        filetype: Option<&str>,
        reg_decomp: Option<Vec<i32>>,
        decompflag: Option<Vec<String>>,
        is_sphere: Option<bool>,
        add_corner_stagger: Option<bool>,
        add_user_area: Option<bool>,
        add_mask: Option<bool>,
        varname: Option<String>,
        coord_names: Option<Vec<String>>,
        manager: Option<PyRef<PyManager>>,
    ) -> PyResult<Self> {
        let options = GridOptions {
            max_index,
            num_peri_dims,
            periodic_dim,
            pole_dim,
            coord_sys: coord_sys.map(parse::<CoordSys>).transpose()?,
            coord_typekind: coord_typekind.map(parse::<TypeKind>).transpose()?,
            staggerloc: staggerloc.map(staggerlocs).transpose()?,
            filename,
            filetype: filetype.map(parse::<FileFormat>).transpose()?,
            reg_decomp,
            decompflag: decompflag
                .map(|flags| parse_all::<DecompFlag>(&flags))
                .transpose()?,
            is_sphere,
            add_corner_stagger,
            add_user_area,
            add_mask,
            varname,
            coord_names,
        };

        let from_file = options.max_index.is_none();
        for argument in options.ignored_arguments().map_err(convert_error)? {
            let mode = if from_file { "in memory" } else { "from file" };
            PyErr::warn(
                py,
                py.get_type::<PyUserWarning>(),
                &format!("{argument} is only used for grids created {mode}, it will be ignored"),
                1,
            )?;
        }

        let engine = match manager {
            Some(manager) => manager.engine.clone(),
            None => default_engine(py),
        };

        Ok(Self {
            inner: Grid::create(engine, options).map_err(convert_error)?,
            exports: None,
        })
    }

    #[getter]
    fn rank(&self) -> usize {
        self.inner.rank()
    }

    #[getter]
    fn max_index(&self) -> Vec<i32> {
        self.inner.max_index().to_vec()
    }

    #[getter]
    fn ndims(&self) -> usize {
        self.inner.ndims()
    }

    #[getter]
    fn num_peri_dims(&self) -> usize {
        self.inner.num_peri_dims()
    }

    #[getter]
    fn periodic_dim(&self) -> Option<usize> {
        self.inner.periodic_dim()
    }

    #[getter]
    fn pole_dim(&self) -> Option<usize> {
        self.inner.pole_dim()
    }

    #[getter]
    fn coord_sys(&self) -> &'static str {
        self.inner.coord_sys().name()
    }

    #[getter]
    fn r#type(&self) -> &'static str {
        self.inner.coord_type().name()
    }

    #[getter]
    fn area_type(&self) -> &'static str {
        self.inner.area_type().name()
    }

    #[getter]
    fn staggerloc(&self) -> Vec<bool> {
        self.inner.staggerloc()
    }

    #[getter]
    fn has_corners(&self) -> bool {
        self.inner.has_corners()
    }

    #[getter]
    fn finalized(&self) -> bool {
        self.inner.finalized()
    }

    #[pyo3(signature = (staggerloc=None))]
    fn lower_bounds(&self, staggerloc: Option<&str>) -> PyResult<Option<Vec<i32>>> {
        let loc = stagger_or_default(&self.inner, staggerloc)?;
        let bounds = self.inner.lower_bounds(loc).map_err(convert_error)?;

        Ok(bounds.map(<[i32]>::to_vec))
    }

    #[pyo3(signature = (staggerloc=None))]
    fn upper_bounds(&self, staggerloc: Option<&str>) -> PyResult<Option<Vec<i32>>> {
        let loc = stagger_or_default(&self.inner, staggerloc)?;
        let bounds = self.inner.upper_bounds(loc).map_err(convert_error)?;

        Ok(bounds.map(<[i32]>::to_vec))
    }

    #[pyo3(signature = (staggerloc=None))]
    fn size(&self, staggerloc: Option<&str>) -> PyResult<Option<Vec<usize>>> {
        let loc = stagger_or_default(&self.inner, staggerloc)?;
        let size = self.inner.size(loc).map_err(convert_error)?;

        Ok(size.map(<[usize]>::to_vec))
    }

    fn get_meta(&self, key: &str) -> Option<String> {
        self.inner.meta().get(key).cloned()
    }

    fn set_meta(&mut self, key: String, value: String) {
        self.inner.meta_mut().insert(key, value);
    }

    /// Add coordinates at one or more stagger locations. With a `coord_dim`, the new
    /// coordinates along that dimension are returned.
    #[pyo3(signature = (staggerloc=None, coord_dim=None))]
    fn add_coords(
        slf: &PyCell<Self>,
        staggerloc: Option<&PyAny>,
        coord_dim: Option<usize>,
    ) -> PyResult<Option<PyObject>> {
        let locs = {
            let mut grid = slf.borrow_mut();
            let locs = match staggerloc {
                Some(names) => staggerlocs(names)?,
                None => vec![grid.inner.default_stagger()],
            };
            grid.inner
                .add_coords(locs.clone(), coord_dim)
                .map_err(convert_error)?;

            locs
        };

        match (coord_dim, locs.as_slice()) {
            (Some(dim), &[loc]) => Ok(Some(Self::coords(slf, dim, loc)?)),
            _ => Ok(None),
        }
    }

    /// Add a mask (`"MASK"`) or area (`"AREA"`) at one or more stagger locations. For a single
    /// location the new item is returned.
    #[pyo3(signature = (item, staggerloc=None))]
    fn add_item(
        slf: &PyCell<Self>,
        item: &str,
        staggerloc: Option<&PyAny>,
    ) -> PyResult<Option<PyObject>> {
        let item = parse::<GridItem>(item)?;
        let locs = {
            let mut grid = slf.borrow_mut();
            let locs = match staggerloc {
                Some(names) => staggerlocs(names)?,
                None => vec![grid.inner.default_stagger()],
            };
            grid.inner
                .add_item(item, locs.clone())
                .map_err(convert_error)?;

            locs
        };

        match locs.as_slice() {
            &[loc] => Ok(Some(Self::item(slf, item, loc)?)),
            _ => Ok(None),
        }
    }

    #[pyo3(signature = (coord_dim, staggerloc=None))]
    fn get_coords(
        slf: &PyCell<Self>,
        coord_dim: usize,
        staggerloc: Option<&str>,
    ) -> PyResult<PyObject> {
        let loc = stagger_or_default(&slf.borrow().inner, staggerloc)?;
        Self::coords(slf, coord_dim, loc)
    }

    #[pyo3(signature = (item, staggerloc=None))]
    fn get_item(slf: &PyCell<Self>, item: &str, staggerloc: Option<&str>) -> PyResult<PyObject> {
        let loc = stagger_or_default(&slf.borrow().inner, staggerloc)?;
        Self::item(slf, parse(item)?, loc)
    }

    /// Write the grid to `<filename>.vtk` for inspection.
    #[pyo3(signature = (filename, staggerloc=None))]
    fn write(&self, filename: PathBuf, staggerloc: Option<&str>) -> PyResult<()> {
        let loc = stagger_or_default(&self.inner, staggerloc)?;
        self.inner.write(filename, loc).map_err(convert_error)
    }

    /// Release the engine memory behind this grid. Fails while any array obtained from the
    /// grid, or from a view of it, is still alive.
    fn destroy(&mut self, py: Python) -> PyResult<()> {
        if self.exported(py)? {
            return Err(StateError::new_err(
                "arrays aliasing this grid's memory are still alive, release them before \
                 destroying the grid",
            ));
        }
        self.inner.destroy().map_err(convert_error)
    }

    /// A view of the whole grid that never releases engine memory.
    fn copy(slf: &PyCell<Self>) -> PyResult<PyGridSlice> {
        PyGridSlice::new(slf.py(), slf.into(), vec![])
    }

    fn __getitem__(slf: &PyCell<Self>, key: &PyAny) -> PyResult<PyGridSlice> {
        let keys = match key.downcast::<PyTuple>() {
            Ok(tuple) => tuple.iter().collect(),
            Err(_) => vec![key],
        };
        let slices = keys
            .into_iter()
            .map(to_slice)
            .collect::<PyResult<Vec<_>>>()?;

        PyGridSlice::new(slf.py(), slf.into(), slices)
    }

    fn __repr__(&self) -> String {
        self.inner.to_string()
    }
}

impl PyGrid {
    /// The base object for new arrays, shared with any arrays still alive.
    fn exports(slf: &PyCell<Self>) -> PyResult<PyObject> {
        let py = slf.py();
        if let Some(weak) = &slf.borrow().exports {
            let exports = weak.call0(py)?;
            if !exports.is_none(py) {
                return Ok(exports);
            }
        }

        let exports = Py::new(py, Exports { _grid: slf.into() })?.into_py(py);
        let weak = py
            .import("weakref")?
            .getattr("ref")?
            .call1((exports.clone_ref(py),))?;
        slf.borrow_mut().exports = Some(weak.into());

        Ok(exports)
    }

    /// Whether any array aliasing this grid's memory is alive
    fn exported(&self, py: Python) -> PyResult<bool> {
        match &self.exports {
            Some(weak) => Ok(!weak.call0(py)?.is_none(py)),
            None => Ok(false),
        }
    }

    fn coords(slf: &PyCell<Self>, coord_dim: usize, loc: StaggerLoc) -> PyResult<PyObject> {
        let exports = Self::exports(slf)?;
        let exports = exports.as_ref(slf.py());
        let grid = slf.borrow();
        match grid.inner.coord_type() {
            TypeKind::R4 => Ok(alias(
                grid.inner
                    .get_coords::<f32>(coord_dim, loc)
                    .map_err(convert_error)?,
                exports,
            )),
            _ => Ok(alias(
                grid.inner
                    .get_coords::<f64>(coord_dim, loc)
                    .map_err(convert_error)?,
                exports,
            )),
        }
    }

    fn item(slf: &PyCell<Self>, item: GridItem, loc: StaggerLoc) -> PyResult<PyObject> {
        let exports = Self::exports(slf)?;
        let exports = exports.as_ref(slf.py());
        let grid = slf.borrow();
        match item {
            GridItem::Mask => Ok(alias(
                grid.inner
                    .get_item::<i32>(item, loc)
                    .map_err(convert_error)?,
                exports,
            )),
            GridItem::Area => Ok(alias(
                grid.inner
                    .get_item::<f64>(item, loc)
                    .map_err(convert_error)?,
                exports,
            )),
        }
    }
}

fn to_slice(key: &PyAny) -> PyResult<Slice> {
    let slice = key
        .downcast::<PySlice>()
        .map_err(|_| PyTypeError::new_err("grid indices must be slices"))?;
    let start: Option<isize> = slice.getattr("start")?.extract()?;
    let stop: Option<isize> = slice.getattr("stop")?.extract()?;
    let step: Option<isize> = slice.getattr("step")?.extract()?;

    Ok(Slice::new(start.unwrap_or(0), stop, step.unwrap_or(1)))
}

/// A non-owning view of a `Grid`, possibly restricted to a sub-box of its index space.
///
/// Holds a reference to the grid it came from, so the grid stays alive while the view does.
#[pyclass(name = "GridSlice")]
pub struct PyGridSlice {
    grid: Py<PyGrid>,
    slices: Vec<Slice>,
}

impl PyGridSlice {
    fn new(py: Python, grid: Py<PyGrid>, slices: Vec<Slice>) -> PyResult<Self> {
        let slice = Self { grid, slices };

        // Fail on bad indices or parallel runs now rather than on first access
        slice.with(py, |_| Ok(()))?;

        Ok(slice)
    }

    fn with<R>(
        &self,
        py: Python,
        f: impl FnOnce(&GridSlice<'_>) -> PyResult<R>,
    ) -> PyResult<R> {
        let mut grid = self.grid.borrow_mut(py);
        let sliced = if self.slices.is_empty() {
            grid.inner.view()
        } else {
            grid.inner.index(&self.slices)
        };

        f(&sliced.map_err(convert_error)?)
    }

    fn default_stagger(&self, py: Python, staggerloc: Option<&str>) -> PyResult<StaggerLoc> {
        stagger_or_default(&self.grid.borrow(py).inner, staggerloc)
    }

    /// Read a property the view shares with its grid
    fn parent<R>(&self, py: Python, f: impl FnOnce(&Grid) -> R) -> R {
        f(&self.grid.borrow(py).inner)
    }
}

#[pymethods]
impl PyGridSlice {
    #[getter]
    fn rank(&self, py: Python) -> PyResult<usize> {
        self.with(py, |sliced| Ok(sliced.rank()))
    }

    #[getter]
    fn max_index(&self, py: Python) -> Vec<i32> {
        self.parent(py, |grid| grid.max_index().to_vec())
    }

    #[getter]
    fn ndims(&self, py: Python) -> usize {
        self.parent(py, Grid::ndims)
    }

    #[getter]
    fn num_peri_dims(&self, py: Python) -> usize {
        self.parent(py, Grid::num_peri_dims)
    }

    #[getter]
    fn periodic_dim(&self, py: Python) -> Option<usize> {
        self.parent(py, Grid::periodic_dim)
    }

    #[getter]
    fn pole_dim(&self, py: Python) -> Option<usize> {
        self.parent(py, Grid::pole_dim)
    }

    #[getter]
    fn coord_sys(&self, py: Python) -> &'static str {
        self.parent(py, |grid| grid.coord_sys().name())
    }

    #[getter]
    fn r#type(&self, py: Python) -> &'static str {
        self.parent(py, |grid| grid.coord_type().name())
    }

    #[getter]
    fn area_type(&self, py: Python) -> &'static str {
        self.parent(py, |grid| grid.area_type().name())
    }

    #[getter]
    fn finalized(&self, py: Python) -> bool {
        self.parent(py, Grid::finalized)
    }

    #[getter]
    fn staggerloc(&self, py: Python) -> PyResult<Vec<bool>> {
        self.with(py, |sliced| Ok(sliced.staggerloc()))
    }

    #[getter]
    fn has_corners(&self, py: Python) -> PyResult<bool> {
        self.with(py, |sliced| Ok(sliced.has_corners()))
    }

    #[pyo3(signature = (staggerloc=None))]
    fn lower_bounds(&self, py: Python, staggerloc: Option<&str>) -> PyResult<Option<Vec<i32>>> {
        let loc = self.default_stagger(py, staggerloc)?;
        self.with(py, |sliced| {
            let bounds = sliced.lower_bounds(loc).map_err(convert_error)?;
            Ok(bounds.map(<[i32]>::to_vec))
        })
    }

    #[pyo3(signature = (staggerloc=None))]
    fn upper_bounds(&self, py: Python, staggerloc: Option<&str>) -> PyResult<Option<Vec<i32>>> {
        let loc = self.default_stagger(py, staggerloc)?;
        self.with(py, |sliced| {
            let bounds = sliced.upper_bounds(loc).map_err(convert_error)?;
            Ok(bounds.map(<[i32]>::to_vec))
        })
    }

    #[pyo3(signature = (staggerloc=None))]
    fn size(&self, py: Python, staggerloc: Option<&str>) -> PyResult<Option<Vec<usize>>> {
        let loc = self.default_stagger(py, staggerloc)?;
        self.with(py, |sliced| {
            let size = sliced.size(loc).map_err(convert_error)?;
            Ok(size.map(<[usize]>::to_vec))
        })
    }

    #[pyo3(signature = (coord_dim, staggerloc=None))]
    fn get_coords(
        slf: &PyCell<Self>,
        coord_dim: usize,
        staggerloc: Option<&str>,
    ) -> PyResult<PyObject> {
        let py = slf.py();
        let this = slf.borrow();
        let loc = this.default_stagger(py, staggerloc)?;
        let exports = PyGrid::exports(this.grid.as_ref(py))?;
        let exports = exports.as_ref(py);
        this.with(py, |sliced| match sliced.coord_type() {
            TypeKind::R4 => Ok(alias(
                sliced
                    .get_coords::<f32>(coord_dim, loc)
                    .map_err(convert_error)?,
                exports,
            )),
            _ => Ok(alias(
                sliced
                    .get_coords::<f64>(coord_dim, loc)
                    .map_err(convert_error)?,
                exports,
            )),
        })
    }

    #[pyo3(signature = (item, staggerloc=None))]
    fn get_item(slf: &PyCell<Self>, item: &str, staggerloc: Option<&str>) -> PyResult<PyObject> {
        let py = slf.py();
        let this = slf.borrow();
        let item = parse::<GridItem>(item)?;
        let loc = this.default_stagger(py, staggerloc)?;
        let exports = PyGrid::exports(this.grid.as_ref(py))?;
        let exports = exports.as_ref(py);
        this.with(py, |sliced| match item {
            GridItem::Mask => Ok(alias(
                sliced.get_item::<i32>(item, loc).map_err(convert_error)?,
                exports,
            )),
            GridItem::Area => Ok(alias(
                sliced.get_item::<f64>(item, loc).map_err(convert_error)?,
                exports,
            )),
        })
    }
}
