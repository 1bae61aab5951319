use super::box_rows;
use crate::common::*;

#[derive(Debug, Clone)]
pub struct MulticlassNmsInit {
    /// The ignored class, or `None` to consider all classes.
    pub background_label: Option<usize>,
    pub score_threshold: R64,
    /// Candidates per class entering NMS, or `None` to keep all.
    pub nms_top_k: Option<usize>,
    pub nms_threshold: R64,
    pub nms_eta: R64,
    /// Detections kept per image, or `None` to keep all.
    pub keep_top_k: Option<usize>,
}

impl Default for MulticlassNmsInit {
    fn default() -> Self {
        Self {
            background_label: Some(0),
            score_threshold: r64(0.01),
            nms_top_k: Some(400),
            nms_threshold: r64(0.3),
            nms_eta: r64(1.0),
            keep_top_k: Some(200),
        }
    }
}

impl MulticlassNmsInit {
    pub fn build(self) -> Result<MulticlassNms> {
        let Self {
            background_label,
            score_threshold,
            nms_top_k,
            nms_threshold,
            nms_eta,
            keep_top_k,
        } = self;

        ensure_config!(
            nms_threshold >= 0.0 && nms_threshold <= 1.0,
            "nms_threshold must be in range [0, 1]"
        );
        ensure_config!(
            nms_eta > 0.0 && nms_eta <= 1.0,
            "nms_eta must be in range (0, 1]"
        );

        Ok(MulticlassNms {
            background_label,
            score_threshold: score_threshold.raw() as f32,
            nms_top_k,
            nms_threshold: nms_threshold.raw() as f32,
            nms_eta: nms_eta.raw() as f32,
            keep_top_k,
        })
    }
}

/// A kept detection.
#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
    pub label: usize,
    pub score: f32,
    pub bbox: XYXY_<f32>,
}

/// Per-class non-maximum suppression over a batch.
#[derive(Debug, Clone)]
pub struct MulticlassNms {
    background_label: Option<usize>,
    score_threshold: f32,
    nms_top_k: Option<usize>,
    nms_threshold: f32,
    nms_eta: f32,
    keep_top_k: Option<usize>,
}

impl MulticlassNms {
    /// Runs NMS on `[N, M, 4]` boxes with `[N, C, M]` class scores.
    ///
    /// Detections of each image are ordered by class, then by descending
    /// score.
    pub fn forward(
        &self,
        boxes: ArrayView3<'_, f32>,
        scores: ArrayView3<'_, f32>,
    ) -> Result<Vec<Vec<Detection>>> {
        let (batch_size, num_boxes, num_coords) = boxes.dim();
        let (scores_batch_size, _num_classes, scores_num_boxes) = scores.dim();
        ensure_shape!(
            num_coords == 4 && scores_batch_size == batch_size && scores_num_boxes == num_boxes,
            "expect boxes [N, M, 4] and scores [N, C, M], but got {:?} and {:?}",
            boxes.shape(),
            scores.shape()
        );

        let detections: Vec<_> = izip!(boxes.outer_iter(), scores.outer_iter())
            .map(|(boxes, scores)| self.forward_image(box_rows(boxes), scores))
            .collect();

        debug!(
            "kept {} detections over {} images",
            detections.iter().map(Vec::len).sum::<usize>(),
            batch_size
        );

        Ok(detections)
    }

    fn forward_image(&self, boxes: Vec<XYXY_<f32>>, scores: ArrayView2<'_, f32>) -> Vec<Detection> {
        let mut kept: Vec<(usize, usize)> = scores
            .outer_iter()
            .enumerate()
            .filter(|(label, _)| Some(*label) != self.background_label)
            .flat_map(|(label, class_scores)| {
                self.suppress(&boxes, class_scores)
                    .into_iter()
                    .map(move |index| (label, index))
            })
            .collect();

        if let Some(keep_top_k) = self.keep_top_k {
            if kept.len() > keep_top_k {
                kept.sort_by(|&(lhs_label, lhs_index), &(rhs_label, rhs_index)| {
                    let lhs_score = scores[[lhs_label, lhs_index]];
                    let rhs_score = scores[[rhs_label, rhs_index]];
                    rhs_score
                        .total_cmp(&lhs_score)
                        .then_with(|| (lhs_label, lhs_index).cmp(&(rhs_label, rhs_index)))
                });
                kept.truncate(keep_top_k);
                // stable sort restores the class order, scores stay descending
                kept.sort_by_key(|&(label, _)| label);
            }
        }

        kept.into_iter()
            .map(|(label, index)| Detection {
                label,
                score: scores[[label, index]],
                bbox: boxes[index],
            })
            .collect()
    }

    /// Greedy NMS of one class, returning kept box indices by descending score.
    fn suppress(&self, boxes: &[XYXY_<f32>], scores: ArrayView1<'_, f32>) -> Vec<usize> {
        let mut candidates: Vec<usize> = scores
            .iter()
            .enumerate()
            .filter(|(_, &score)| score > self.score_threshold)
            .map(|(index, _)| index)
            .collect();
        candidates.sort_by(|&lhs, &rhs| scores[rhs].total_cmp(&scores[lhs]));
        if let Some(nms_top_k) = self.nms_top_k {
            candidates.truncate(nms_top_k);
        }

        let mut threshold = self.nms_threshold;
        let mut kept: Vec<usize> = vec![];

        for index in candidates {
            let keep = kept
                .iter()
                .all(|&prev| boxes[index].iou_with(&boxes[prev]) <= threshold);
            if keep {
                kept.push(index);
                if self.nms_eta < 1.0 && threshold > 0.5 {
                    threshold *= self.nms_eta;
                }
            }
        }

        kept
    }
}

/// Flattens detections into `[K, 6]` rows of
/// `[label, score, xmin, ymin, xmax, ymax]` with per-image segment offsets.
pub fn detections_to_array(detections: &[Vec<Detection>]) -> (Array2<f32>, Lod) {
    let lod = Lod::from_lengths(detections.iter().map(Vec::len));
    let rows: Vec<[f32; 6]> = detections
        .iter()
        .flatten()
        .map(|det| {
            let [xmin, ymin, xmax, ymax] = det.bbox.xyxy();
            [det.label as f32, det.score, xmin, ymin, xmax, ymax]
        })
        .collect();
    let array = Array2::from_shape_fn((rows.len(), 6), |(row, col)| rows[row][col]);
    (array, lod)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn boxes() -> Array3<f32> {
        array![[
            [0.0, 0.0, 10.0, 10.0],
            [1.0, 1.0, 11.0, 11.0],
            [20.0, 20.0, 30.0, 30.0],
            [0.0, 0.0, 10.0, 9.0]
        ]]
    }

    #[test]
    fn suppress_overlapping_boxes() -> Result<()> {
        let nms = MulticlassNmsInit {
            nms_threshold: r64(0.5),
            ..Default::default()
        }
        .build()?;
        let scores = array![[[0.9, 0.9, 0.9, 0.9], [0.9, 0.8, 0.7, 0.001]]];

        let detections = nms.forward(boxes().view(), scores.view())?;
        assert_eq!(detections.len(), 1);

        // background class 0 is skipped, box 1 overlaps box 0, box 3 is below threshold
        let kept: Vec<_> = detections[0].iter().map(|det| (det.label, det.score)).collect();
        assert_eq!(kept, vec![(1, 0.9), (1, 0.7)]);
        assert_eq!(detections[0][1].bbox.xyxy(), [20.0, 20.0, 30.0, 30.0]);
        Ok(())
    }

    #[test]
    fn keep_top_k_across_classes() -> Result<()> {
        let nms = MulticlassNmsInit {
            background_label: None,
            keep_top_k: Some(2),
            ..Default::default()
        }
        .build()?;
        let scores = array![[[0.3, 0.0, 0.0, 0.0], [0.0, 0.0, 0.8, 0.0], [0.0, 0.0, 0.0, 0.5]]];

        let detections = nms.forward(boxes().view(), scores.view())?;
        let kept: Vec<_> = detections[0].iter().map(|det| (det.label, det.score)).collect();
        assert_eq!(kept, vec![(1, 0.8), (2, 0.5)]);
        Ok(())
    }

    #[test]
    fn adaptive_threshold() -> Result<()> {
        // box 0 and box 1 have IoU 81 / 119, box 0 and box 3 have IoU 0.9
        let scores = array![[[0.0, 0.0, 0.0, 0.0], [0.9, 0.8, 0.7, 0.6]]];

        let nms = MulticlassNmsInit {
            nms_threshold: r64(0.7),
            ..Default::default()
        }
        .build()?;
        let detections = nms.forward(boxes().view(), scores.view())?;
        assert_eq!(detections[0].len(), 3);

        let nms = MulticlassNmsInit {
            nms_threshold: r64(0.7),
            nms_eta: r64(0.5),
            ..Default::default()
        }
        .build()?;
        let detections = nms.forward(boxes().view(), scores.view())?;
        // the threshold drops to 0.35 after the first kept box
        assert_eq!(detections[0].len(), 2);
        Ok(())
    }

    #[test]
    fn flatten_detections() -> Result<()> {
        let nms = MulticlassNmsInit::default().build()?;
        let boxes = ndarray::concatenate(Axis(0), &[boxes().view(), boxes().view()])?;
        let scores = array![
            [[0.0, 0.0, 0.0, 0.0], [0.9, 0.0, 0.0, 0.0]],
            [[0.0, 0.0, 0.0, 0.0], [0.0, 0.0, 0.0, 0.0]]
        ];

        let detections = nms.forward(boxes.view(), scores.view())?;
        let (array, lod) = detections_to_array(&detections);
        assert_eq!(lod.offsets(), &[0, 1, 1]);
        assert_eq!(array, array![[1.0, 0.9, 0.0, 0.0, 10.0, 10.0]]);
        Ok(())
    }

    #[test]
    fn invalid_options() {
        let result = MulticlassNmsInit {
            nms_eta: r64(0.0),
            ..Default::default()
        }
        .build();
        assert!(result.unwrap_err().downcast_ref::<SsdError>().unwrap().is_config());
    }
}
