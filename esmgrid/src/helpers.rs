use ndarray::{Array, ArrayD, IxDyn, ShapeBuilder};

use crate::errors::{Error, Result};

/// Expand one coordinate axis per dimension into full-rank coordinate arrays, `ij` indexed.
///
/// Output arrays are column-major, matching engine memory.
///
pub(crate) fn meshgrid<T>(axes: &[Vec<T>]) -> Result<Vec<ArrayD<T>>>
where
    T: Copy,
{
    match axes.len() {
        2 | 3 => {}
        rank => return Err(Error::Rank(rank)),
    }
    let shape: Vec<usize> = axes.iter().map(Vec::len).collect();

    Ok(axes
        .iter()
        .enumerate()
        .map(|(dim, axis)| Array::from_shape_fn(IxDyn(&shape).f(), |index| axis[index[dim]]))
        .collect())
}

/// Product of the entries of a shape, ie the number of elements
pub(crate) fn volume(shape: &[usize]) -> usize {
    shape.iter().product()
}
