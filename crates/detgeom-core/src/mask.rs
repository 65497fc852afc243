//! In-place edge masking of module data.

use ndarray::{Array2, ArrayViewMut, Dimension, Zip};

use crate::{AssemblyError, Element};

/// Set every pixel flagged in `edges` to the fill value, in place.
///
/// `data` holds one module with any leading axes, `(..., y, x)`; `edges`
/// is the `(y, x)` mask broadcast over the leading axes.
pub fn apply_edge_mask<T, D>(
    edges: &Array2<bool>,
    mut data: ArrayViewMut<'_, T, D>,
) -> Result<(), AssemblyError>
where
    T: Element,
    D: Dimension,
{
    let ndim = data.ndim();
    if ndim < 2 {
        return Err(AssemblyError::InvalidNdim {
            what: "module",
            expected: "at least 2",
            got: ndim,
        });
    }
    let shape = data.shape();
    let (my, mx) = edges.dim();
    if (shape[ndim - 2], shape[ndim - 1]) != (my, mx) {
        return Err(AssemblyError::ShapeMismatch {
            what: "module",
            expected: vec![my, mx],
            got: shape[ndim - 2..].to_vec(),
        });
    }

    let edges = edges
        .broadcast(data.raw_dim())
        .ok_or_else(|| AssemblyError::ShapeMismatch {
            what: "module",
            expected: vec![my, mx],
            got: data.shape().to_vec(),
        })?;
    let fill = T::fill_value();
    Zip::from(&mut data).and(&edges).par_for_each(|v, &edge| {
        if edge {
            *v = fill;
        }
    });
    Ok(())
}
