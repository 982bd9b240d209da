mod constants;
mod engine;
mod errors;
mod field;
mod grid;
mod heap;
mod helpers;
mod options;
mod shadow;
mod slice;
mod stagger;

#[cfg(test)]
mod testing;

pub use constants::{CoordSys, DecompFlag, FileFormat, GridItem, StaggerLoc, TypeKind};

pub use engine::Bounds;
pub use engine::Engine;
pub use engine::FileRequest;
pub use engine::GridHandle;
pub use engine::GridspecInquiry;
pub use engine::NativeBuffer;
pub use engine::ScripInquiry;

pub use errors::{Error, Result};

pub use field::Element;
pub use field::FieldViewMut;

pub use grid::Grid;
pub use heap::{GridFile, HeapEngine};
pub use options::{GridOptions, Mode};
pub use shadow::StaggerBounds;
pub use slice::GridSlice;
pub use stagger::StaggerLocs;
