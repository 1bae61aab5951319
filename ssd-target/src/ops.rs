//! Numeric kernels of the SSD target pipeline.
//!
//! Every kernel borrows its inputs and returns freshly allocated outputs.

use crate::common::*;

pub use bipartite_match::*;
pub use box_coder::*;
pub use detection_output::*;
pub use iou_similarity::*;
pub use loss::*;
pub use mine_hard_examples::*;
pub use multiclass_nms::*;
pub use prior_box::*;
pub use target_assign::*;

mod bipartite_match;
mod box_coder;
mod detection_output;
mod iou_similarity;
mod loss;
mod mine_hard_examples;
mod multiclass_nms;
mod prior_box;
mod target_assign;

/// Checks that `boxes` is a `[N, 4]` box array.
pub(crate) fn ensure_box_array(boxes: &ArrayView2<'_, f32>, what: &str) -> Result<()> {
    let (_, num_coords) = boxes.dim();
    ensure_shape!(
        num_coords == 4,
        "{} must be a [N, 4] box array, but got shape {:?}",
        what,
        boxes.shape()
    );
    Ok(())
}

/// Collects the rows of a `[N, 4]` array as unchecked boxes.
pub(crate) fn box_rows(boxes: ArrayView2<'_, f32>) -> Vec<XYXY_<f32>> {
    boxes
        .outer_iter()
        .map(|row| XYXY_::from([row[0], row[1], row[2], row[3]]))
        .collect()
}

/// Merges the two leading axes, `[A, B, C]` into `[A * B, C]`.
pub fn flatten_batch<T>(array: ArrayView3<'_, T>) -> Array2<T>
where
    T: Clone,
{
    let (a, b, c) = array.dim();
    Array2::from_shape_fn((a * b, c), |(row, col)| {
        array[[row / b, row % b, col]].clone()
    })
}
