use super::{box_rows, ensure_box_array};
use crate::common::*;

/// Computes the pairwise intersection-over-union of two box sets.
///
/// `x` is `[N, 4]` and `y` is `[M, 4]`, both in `[xmin, ymin, xmax, ymax]`
/// layout. The output `[N, M]` holds `IoU(x[i], y[j])` at `[i, j]`. Rows of a
/// batched `x` keep their segment offsets on the output.
///
/// Pairs that do not overlap, or involve a box of non-positive area, score 0.
pub fn iou_similarity(x: ArrayView2<'_, f32>, y: ArrayView2<'_, f32>) -> Result<Array2<f32>> {
    ensure_box_array(&x, "x")?;
    ensure_box_array(&y, "y")?;

    let x_boxes = box_rows(x);
    let y_boxes = box_rows(y);

    let similarity = Array2::from_shape_fn((x_boxes.len(), y_boxes.len()), |(row, col)| {
        x_boxes[row].iou_with(&y_boxes[col])
    });
    Ok(similarity)
}
