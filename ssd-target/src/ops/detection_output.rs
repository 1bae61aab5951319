use super::{decode_center_size, Detection, MulticlassNms};
use crate::common::*;

/// Decodes `[N, M, 4]` location offsets against the priors and runs
/// multi-class NMS with `[N, C, M]` scores.
pub fn detection_output(
    scores: ArrayView3<'_, f32>,
    loc: ArrayView3<'_, f32>,
    prior_box: ArrayView2<'_, f32>,
    prior_box_var: Option<ArrayView2<'_, f32>>,
    nms: &MulticlassNms,
) -> Result<Vec<Vec<Detection>>> {
    let decoded = decode_center_size(loc, prior_box, prior_box_var)?;
    nms.forward(decoded.view(), scores)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ops::{encode_center_size, MulticlassNmsInit};
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    #[test]
    fn decode_then_suppress() -> Result<()> {
        let prior_box = array![[0.0, 0.0, 0.5, 0.5], [0.4, 0.4, 0.9, 0.9]];
        let prior_box_var = array![[0.1, 0.1, 0.2, 0.2], [0.1, 0.1, 0.2, 0.2]];
        let gt = array![[0.1, 0.1, 0.5, 0.6]];

        // both priors regress onto the same box
        let loc = encode_center_size(gt.view(), prior_box.view(), Some(prior_box_var.view()))?;
        let scores = array![[[0.1, 0.2], [0.9, 0.6]]];

        let nms = MulticlassNmsInit::default().build()?;
        let detections = detection_output(
            scores.view(),
            loc.view(),
            prior_box.view(),
            Some(prior_box_var.view()),
            &nms,
        )?;

        assert_eq!(detections[0].len(), 1);
        let det = &detections[0][0];
        assert_eq!(det.label, 1);
        assert_abs_diff_eq!(det.score, 0.9);
        for (&value, &expect) in izip!(&det.bbox.xyxy(), gt.iter()) {
            assert_abs_diff_eq!(value, expect, epsilon = 1e-5);
        }
        Ok(())
    }

    #[test]
    fn mismatched_scores() {
        let prior_box = array![[0.0, 0.0, 0.5, 0.5]];
        let loc = Array3::zeros((1, 1, 4));
        let scores = Array3::zeros((1, 2, 3));
        let nms = MulticlassNmsInit::default().build().unwrap();
        let err =
            detection_output(scores.view(), loc.view(), prior_box.view(), None, &nms).unwrap_err();
        assert!(err.downcast_ref::<SsdError>().unwrap().is_shape());
    }
}
