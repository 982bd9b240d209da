use std::str::FromStr;

use pyo3::create_exception;
use pyo3::exceptions::{PyRuntimeError, PyTypeError, PyValueError};
use pyo3::prelude::*;

use esmgrid::{Error, StaggerLoc};

create_exception!(_esmgrid, ArgumentError, PyValueError);
create_exception!(_esmgrid, StateError, PyRuntimeError);
create_exception!(_esmgrid, SerialError, PyRuntimeError);
create_exception!(_esmgrid, NativeError, PyRuntimeError);

pub(crate) fn convert_error(cause: Error) -> PyErr {
    let message = cause.to_string();
    match cause {
        Error::IO(cause) => cause.into(),
        Error::Argument(_)
        | Error::PeriodicDims(_)
        | Error::Rank(_)
        | Error::StaggerRank { .. }
        | Error::SingleStaggerloc(_)
        | Error::CoordDim { .. }
        | Error::CoordDims { .. }
        | Error::ShapeMismatch { .. } => ArgumentError::new_err(message),
        Error::CoordsAlreadyLinked(_)
        | Error::ItemAlreadyLinked { .. }
        | Error::CoordsNotAllocated(_)
        | Error::ItemNotAllocated { .. }
        | Error::BoundsNotCreated(_)
        | Error::BoundsChanged(_)
        | Error::Finalized => StateError::new_err(message),
        Error::TypeMismatch { .. } | Error::BufferSize { .. } => PyTypeError::new_err(message),
        Error::SerialMethod(_) => SerialError::new_err(message),
        Error::Native { .. } => NativeError::new_err(message),
    }
}

/// Parse one of the named constants, eg `"CENTER"` or `"R8"`, case insensitively.
pub(crate) fn parse<T>(name: &str) -> PyResult<T>
where
    T: FromStr<Err = Error>,
{
    T::from_str(name).map_err(convert_error)
}

pub(crate) fn parse_all<T>(names: &[String]) -> PyResult<Vec<T>>
where
    T: FromStr<Err = Error>,
{
    names.iter().map(|name| parse(name)).collect()
}

/// Accept either a single stagger location name or a sequence of them.
pub(crate) fn staggerlocs(names: &PyAny) -> PyResult<Vec<StaggerLoc>> {
    match names.extract::<String>() {
        Ok(name) => Ok(vec![parse(&name)?]),
        Err(_) => parse_all(&names.extract::<Vec<String>>()?),
    }
}
