mod grid;
mod helpers;

pub use grid::{PyGrid, PyGridSlice, PyManager};
pub use helpers::{ArgumentError, NativeError, SerialError, StateError};

use pyo3::prelude::*;

#[pymodule]
fn _esmgrid(py: Python, m: &PyModule) -> PyResult<()> {
    m.add_class::<PyManager>()?;
    m.add_class::<PyGrid>()?;
    m.add_class::<PyGridSlice>()?;

    m.add("ArgumentError", py.get_type::<ArgumentError>())?;
    m.add("StateError", py.get_type::<StateError>())?;
    m.add("SerialError", py.get_type::<SerialError>())?;
    m.add("NativeError", py.get_type::<NativeError>())?;

    Ok(())
}
