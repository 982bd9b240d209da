use std::io;
use std::result;

use thiserror::Error;

use crate::constants::{GridItem, StaggerLoc, TypeKind};

#[derive(Debug, Error)]
pub enum Error {
    /// Missing, conflicting or unsupported construction arguments
    #[error("invalid grid argument: {0}")]
    Argument(String),

    #[error("number of periodic dimensions should be 0 or 1, got {0}")]
    PeriodicDims(usize),

    #[error("grid rank must be 2 or 3, got {0}")]
    Rank(usize),

    #[error("stagger location {loc:?} is not defined for a rank {rank} grid")]
    StaggerRank { loc: StaggerLoc, rank: usize },

    #[error("operation accepts exactly one stagger location, got {0}")]
    SingleStaggerloc(usize),

    #[error("coordinate dimension {dim} is out of range for a rank {rank} grid")]
    CoordDim { dim: usize, rank: usize },

    #[error("coordinate arrays of dimension {ndims} cannot be linked to a rank {rank} grid")]
    CoordDims { ndims: usize, rank: usize },

    #[error("shape mismatch: expected {expected:?}, got {found:?}")]
    ShapeMismatch {
        expected: Vec<usize>,
        found: Vec<usize>,
    },

    #[error("coordinates at {0:?} have already been added")]
    CoordsAlreadyLinked(StaggerLoc),

    #[error("{item:?} at {loc:?} has already been added")]
    ItemAlreadyLinked { item: GridItem, loc: StaggerLoc },

    #[error("no coordinates have been added at {0:?}")]
    CoordsNotAllocated(StaggerLoc),

    #[error("no {item:?} has been added at {loc:?}")]
    ItemNotAllocated { item: GridItem, loc: StaggerLoc },

    /// The engine could not report bounds for a stagger location
    #[error("grid bounds at {0:?} are not available")]
    BoundsNotCreated(StaggerLoc),

    /// Cached bounds disagree with a fresh query against the engine
    #[error("grid bounds at {0:?} changed on the native side")]
    BoundsChanged(StaggerLoc),

    #[error("expected {expected:?} data, found {found:?}")]
    TypeMismatch { expected: TypeKind, found: TypeKind },

    #[error("native buffer holds {found} elements, expected {expected}")]
    BufferSize { expected: usize, found: usize },

    #[error("method is only supported in serial, {0} PETs are running")]
    SerialMethod(usize),

    #[error("native grid memory has already been released")]
    Finalized,

    #[error("{call} failed: {message}")]
    Native { call: &'static str, message: String },

    #[error(transparent)]
    IO(#[from] io::Error),
}

impl Error {
    pub(crate) fn native<M>(call: &'static str, message: M) -> Self
    where
        M: Into<String>,
    {
        Self::Native {
            call,
            message: message.into(),
        }
    }
}

pub type Result<T> = result::Result<T, Error>;
