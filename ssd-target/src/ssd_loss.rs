//! The multi-box loss of SSD.

use crate::{
    common::*,
    ops::{
        bipartite_match, encode_center_size, flatten_batch, iou_similarity,
        softmax_with_cross_entropy, smooth_l1, target_assign, HardNegativeMiner,
        HardNegativeMinerInit, LossComposer, MatchOutput, MatchType, MiningOutput, MiningType,
        NegativeIndices, TargetAssignOutput,
    },
};

pub use ssd_loss::*;
pub use ssd_loss_output::*;

mod ssd_loss {
    use super::*;

    #[derive(Debug, Clone, Default)]
    pub struct SsdLossInit {
        pub background_label: Option<usize>,
        pub overlap_threshold: Option<f64>,
        pub neg_pos_ratio: Option<f64>,
        pub neg_overlap: Option<f64>,
        pub loc_loss_weight: Option<f64>,
        pub conf_loss_weight: Option<f64>,
        pub match_type: Option<MatchType>,
        pub mining_type: Option<MiningType>,
        pub sample_size: Option<usize>,
    }

    impl SsdLossInit {
        pub fn build(self) -> Result<SsdLoss> {
            let Self {
                background_label,
                overlap_threshold,
                neg_pos_ratio,
                neg_overlap,
                loc_loss_weight,
                conf_loss_weight,
                match_type,
                mining_type,
                sample_size,
            } = self;

            let background_label = background_label.unwrap_or(0);
            let overlap_threshold = overlap_threshold.unwrap_or(0.5);
            let neg_pos_ratio = neg_pos_ratio.unwrap_or(3.0);
            let neg_overlap = neg_overlap.unwrap_or(0.5);
            let loc_loss_weight = loc_loss_weight.unwrap_or(1.0);
            let conf_loss_weight = conf_loss_weight.unwrap_or(1.0);
            let match_type = match_type.unwrap_or(MatchType::PerPrediction);
            let mining_type = mining_type.unwrap_or(MiningType::MaxNegative);

            ensure_config!(
                (0.0..=1.0).contains(&overlap_threshold),
                "overlap_threshold must be in range [0, 1]"
            );
            ensure_config!(
                loc_loss_weight >= 0.0,
                "loc_loss_weight must be non-negative"
            );
            ensure_config!(
                conf_loss_weight >= 0.0,
                "conf_loss_weight must be non-negative"
            );

            let miner = HardNegativeMinerInit {
                mining_type,
                neg_pos_ratio,
                neg_dist_threshold: neg_overlap,
                sample_size,
            }
            .build()?;

            Ok(SsdLoss {
                background_label,
                overlap_threshold: overlap_threshold as f32,
                match_type,
                miner,
                composer: LossComposer {
                    conf_loss_weight: conf_loss_weight as f32,
                    loc_loss_weight: loc_loss_weight as f32,
                },
            })
        }
    }

    /// Inputs of [SsdLoss::forward].
    #[derive(Debug, Clone)]
    pub struct SsdLossInput<'a> {
        /// `[N, Np, 4]` predicted location offsets.
        pub location: ArrayView3<'a, f32>,
        /// `[N, Np, C]` class logits.
        pub confidence: ArrayView3<'a, f32>,
        /// `[Ng, 4]` ground truth boxes of all instances.
        pub gt_box: ArrayView2<'a, f32>,
        /// Ground truth rows of each instance.
        pub gt_lod: &'a Lod,
        /// `[Ng, 1]` ground truth class labels.
        pub gt_label: ArrayView2<'a, i64>,
        /// `[Np, 4]` prior boxes.
        pub prior_box: ArrayView2<'a, f32>,
        /// `[Np, 4]` prior box variances, all ones when absent.
        pub prior_box_var: Option<ArrayView2<'a, f32>>,
    }

    #[derive(Debug, Clone, CopyGetters)]
    pub struct SsdLoss {
        #[get_copy = "pub"]
        background_label: usize,
        #[get_copy = "pub"]
        overlap_threshold: f32,
        #[get_copy = "pub"]
        match_type: MatchType,
        miner: HardNegativeMiner,
        composer: LossComposer,
    }

    impl SsdLoss {
        pub fn miner(&self) -> &HardNegativeMiner {
            &self.miner
        }

        pub fn composer(&self) -> &LossComposer {
            &self.composer
        }

        /// Computes the per-prior loss of shape `[N * Np, 1]`.
        pub fn forward(
            &self,
            input: SsdLossInput<'_>,
        ) -> Result<(SsdLossOutput, SsdLossAuxiliary)> {
            self.check_input(&input)?;
            let SsdLossInput {
                location,
                confidence,
                gt_box,
                gt_lod,
                gt_label,
                prior_box,
                prior_box_var,
            } = input;
            let (batch_size, num_priors, _num_classes) = confidence.dim();
            let background_label = self.background_label as i64;

            // match priors with ground truth boxes
            let iou = iou_similarity(gt_box, prior_box)?;
            let MatchOutput {
                match_indices,
                match_dist,
            } = bipartite_match(
                iou.view(),
                Some(gt_lod),
                self.match_type,
                self.overlap_threshold,
            )?;

            // classification loss to rank negatives
            let gt_label = gt_label.insert_axis(Axis(2));
            let confidence = flatten_batch(confidence);
            let mining_loss = {
                let TargetAssignOutput { out, .. } = target_assign(
                    gt_label,
                    gt_lod,
                    match_indices.view(),
                    None,
                    background_label,
                )?;
                softmax_with_cross_entropy(confidence.view(), flatten_batch(out.view()).view())?
                    .into_shape((batch_size, num_priors))?
            };

            let MiningOutput {
                neg_indices,
                updated_match_indices,
            } = self
                .miner
                .mine(mining_loss.view(), match_indices.view(), match_dist.view())?;

            // assign targets
            let encoded_box = encode_center_size(gt_box, prior_box, prior_box_var)?;
            let TargetAssignOutput {
                out: target_bbox,
                out_weight: target_loc_weight,
            } = target_assign(
                encoded_box.view(),
                gt_lod,
                updated_match_indices.view(),
                None,
                0.0,
            )?;
            let TargetAssignOutput {
                out: target_label,
                out_weight: target_conf_weight,
            } = target_assign(
                gt_label,
                gt_lod,
                updated_match_indices.view(),
                Some(&neg_indices),
                background_label,
            )?;

            // weighted losses
            let conf_loss = softmax_with_cross_entropy(
                confidence.view(),
                flatten_batch(target_label.view()).view(),
            )?;
            let loc_loss = smooth_l1(
                flatten_batch(location).view(),
                flatten_batch(target_bbox.view()).view(),
                1.0,
            )?;
            let conf_weight = flatten_batch(target_conf_weight.view());
            let loc_weight = flatten_batch(target_loc_weight.view());
            let loss = self.composer.compose(
                conf_loss.view(),
                conf_weight.view(),
                loc_loss.view(),
                loc_weight.view(),
            )?;

            debug!(
                "ssd loss over {} instances, {} positives, {} negatives",
                batch_size,
                updated_match_indices.iter().filter(|&&index| index >= 0).count(),
                neg_indices.indices().len()
            );

            let output = SsdLossOutput {
                loss,
                conf_loss: &conf_loss * &conf_weight,
                loc_loss: &loc_loss * &loc_weight,
            };
            let aux = SsdLossAuxiliary {
                iou,
                match_indices,
                match_dist,
                neg_indices,
                updated_match_indices,
                target_label,
                target_conf_weight,
                target_bbox,
                target_loc_weight,
            };

            Ok((output, aux))
        }

        fn check_input(&self, input: &SsdLossInput<'_>) -> Result<()> {
            let SsdLossInput {
                location,
                confidence,
                gt_box,
                gt_lod,
                gt_label,
                prior_box,
                prior_box_var,
            } = input;

            let (batch_size, num_priors, num_classes) = confidence.dim();
            ensure_config!(
                location.dim() == (batch_size, num_priors, 4),
                "expect location of shape [{}, {}, 4], but got {:?}",
                batch_size,
                num_priors,
                location.shape()
            );
            ensure_config!(
                self.background_label < num_classes,
                "background label {} is out of range of {} classes",
                self.background_label,
                num_classes
            );
            ensure_config!(
                prior_box.dim() == (num_priors, 4),
                "expect prior_box of shape [{}, 4], but got {:?}",
                num_priors,
                prior_box.shape()
            );
            if let Some(prior_box_var) = prior_box_var {
                ensure_config!(
                    prior_box_var.dim() == prior_box.dim(),
                    "prior_box_var {:?} and prior_box {:?} differ in shape",
                    prior_box_var.shape(),
                    prior_box.shape()
                );
            }

            let (num_gt, gt_coords) = gt_box.dim();
            ensure_config!(
                gt_coords == 4,
                "expect gt_box of shape [Ng, 4], but got {:?}",
                gt_box.shape()
            );
            ensure_config!(
                gt_label.dim() == (num_gt, 1),
                "expect gt_label of shape [{}, 1], but got {:?}",
                num_gt,
                gt_label.shape()
            );
            ensure_config!(
                gt_lod.total_len() == num_gt && gt_lod.num_groups() == batch_size,
                "ground truth offsets {:?} do not partition {} boxes into {} instances",
                gt_lod.offsets(),
                num_gt,
                batch_size
            );

            let num_degenerate = gt_box
                .outer_iter()
                .filter(|row| row[2] <= row[0] || row[3] <= row[1])
                .count();
            if num_degenerate > 0 {
                warn!(
                    "{} of {} ground truth boxes have zero area and match no prior",
                    num_degenerate, num_gt
                );
            }
            let num_empty = gt_lod.lengths().filter(|&len| len == 0).count();
            if num_empty > 0 {
                warn!(
                    "{} of {} instances have no ground truth box",
                    num_empty, batch_size
                );
            }

            Ok(())
        }
    }
}

mod ssd_loss_output {
    use super::*;

    /// Per-prior losses, each `[N * Np, 1]`.
    #[derive(Debug, Clone, PartialEq)]
    pub struct SsdLossOutput {
        /// Weighted sum of the confidence and location losses.
        pub loss: Array2<f32>,
        pub conf_loss: Array2<f32>,
        pub loc_loss: Array2<f32>,
    }

    /// Intermediate results of the loss.
    #[derive(Debug, Clone, PartialEq)]
    pub struct SsdLossAuxiliary {
        /// `[Ng, Np]`
        pub iou: Array2<f32>,
        /// `[N, Np]`
        pub match_indices: Array2<i32>,
        pub match_dist: Array2<f32>,
        pub neg_indices: NegativeIndices,
        pub updated_match_indices: Array2<i32>,
        /// `[N, Np, 1]`
        pub target_label: Array3<i64>,
        pub target_conf_weight: Array3<f32>,
        /// `[N, Np, 4]`
        pub target_bbox: Array3<f32>,
        pub target_loc_weight: Array3<f32>,
    }
}
