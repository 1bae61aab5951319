//! JSON5 configuration of the loss, prior box and detection output stages.

use crate::{
    common::*,
    ops::{MulticlassNmsInit, PriorBoxInit, PriorSizes},
    ssd_loss::SsdLossInit,
};

pub use detection_output::*;
pub use prior_box::*;
pub use ssd_loss::*;

/// The complete configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SsdConfig {
    #[serde(default)]
    pub loss: SsdLossConfig,
    pub prior_box: Option<PriorBoxConfig>,
    pub detection_output: Option<DetectionOutputConfig>,
}

impl SsdConfig {
    pub fn open<P>(path: P) -> Result<Self>
    where
        P: AsRef<Path>,
    {
        load_json5(path.as_ref())
    }
}

fn load_json5<T>(path: &Path) -> Result<T>
where
    T: serde::de::DeserializeOwned,
{
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("unable to read {}", path.display()))?;
    let config = json5::from_str(&text)
        .with_context(|| format!("unable to parse {}", path.display()))?;
    Ok(config)
}

mod ssd_loss {
    use super::*;

    /// Options of the multi-box loss. Absent fields take the loss defaults.
    #[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
    #[serde(default)]
    pub struct SsdLossConfig {
        pub background_label: Option<usize>,
        pub overlap_threshold: Option<R64>,
        pub neg_pos_ratio: Option<R64>,
        pub neg_overlap: Option<R64>,
        pub loc_loss_weight: Option<R64>,
        pub conf_loss_weight: Option<R64>,
        /// `bipartite` or `per_prediction`.
        pub match_type: Option<String>,
        /// `max_negative` or `hard_example`.
        pub mining_type: Option<String>,
        pub sample_size: Option<usize>,
    }

    impl SsdLossConfig {
        pub fn load<P>(path: P) -> Result<Self>
        where
            P: AsRef<Path>,
        {
            load_json5(path.as_ref())
        }

        pub fn to_init(&self) -> Result<SsdLossInit> {
            let Self {
                background_label,
                overlap_threshold,
                neg_pos_ratio,
                neg_overlap,
                loc_loss_weight,
                conf_loss_weight,
                ref match_type,
                ref mining_type,
                sample_size,
            } = *self;

            Ok(SsdLossInit {
                background_label,
                overlap_threshold: overlap_threshold.map(R64::raw),
                neg_pos_ratio: neg_pos_ratio.map(R64::raw),
                neg_overlap: neg_overlap.map(R64::raw),
                loc_loss_weight: loc_loss_weight.map(R64::raw),
                conf_loss_weight: conf_loss_weight.map(R64::raw),
                match_type: match_type
                    .as_deref()
                    .map(|value| parse_option("match_type", value))
                    .transpose()?,
                mining_type: mining_type
                    .as_deref()
                    .map(|value| parse_option("mining_type", value))
                    .transpose()?,
                sample_size,
            })
        }
    }
}

mod prior_box {
    use super::*;

    /// Options of the multi-layer prior box generator.
    ///
    /// Sizes are either given per layer by `min_sizes` and `max_sizes`, or
    /// derived from `min_ratio`, `max_ratio` and `base_size`.
    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    pub struct PriorBoxConfig {
        pub num_layers: usize,
        pub min_sizes: Option<Vec<Vec<R64>>>,
        pub max_sizes: Option<Vec<Vec<R64>>>,
        pub min_ratio: Option<usize>,
        pub max_ratio: Option<usize>,
        pub base_size: Option<R64>,
        #[serde(default)]
        pub aspect_ratios: Vec<Vec<R64>>,
        pub steps: Option<Vec<R64>>,
        pub step_w: Option<Vec<R64>>,
        pub step_h: Option<Vec<R64>>,
        pub offset: Option<R64>,
        pub variances: Option<[R64; 4]>,
        #[serde(default)]
        pub flip: bool,
        #[serde(default)]
        pub clip: bool,
    }

    impl PriorBoxConfig {
        pub fn load<P>(path: P) -> Result<Self>
        where
            P: AsRef<Path>,
        {
            load_json5(path.as_ref())
        }

        pub fn to_init(&self) -> Result<PriorBoxInit> {
            let to_f32 = |values: &[R64]| -> Vec<f32> {
                values.iter().map(|value| value.raw() as f32).collect()
            };
            let to_f32_lists = |lists: &[Vec<R64>]| -> Vec<Vec<f32>> {
                lists.iter().map(|list| to_f32(list)).collect()
            };

            let sizes = match (&self.min_sizes, &self.max_sizes) {
                (Some(min_sizes), Some(max_sizes)) => PriorSizes::Explicit {
                    min_sizes: to_f32_lists(min_sizes),
                    max_sizes: to_f32_lists(max_sizes),
                },
                (None, None) => match (self.min_ratio, self.max_ratio, self.base_size) {
                    (Some(min_ratio), Some(max_ratio), Some(base_size)) => PriorSizes::Ratio {
                        min_ratio,
                        max_ratio,
                        base_size: base_size.raw() as f32,
                    },
                    _ => bail!(SsdError::Config(
                        "either min_sizes and max_sizes, or min_ratio, max_ratio and base_size \
                         are required"
                            .into()
                    )),
                },
                _ => bail!(SsdError::Config(
                    "min_sizes and max_sizes must be given together".into()
                )),
            };

            let mut init = PriorBoxInit::new(self.num_layers, sizes);
            init.aspect_ratios = to_f32_lists(&self.aspect_ratios);
            init.steps = self.steps.as_deref().map(to_f32);
            init.step_w = self.step_w.as_deref().map(to_f32);
            init.step_h = self.step_h.as_deref().map(to_f32);
            if let Some(offset) = self.offset {
                init.offset = offset.raw() as f32;
            }
            if let Some(variances) = self.variances {
                init.variances = variances.map(|var| var.raw() as f32);
            }
            init.flip = self.flip;
            init.clip = self.clip;
            Ok(init)
        }
    }
}

mod detection_output {
    use super::*;

    /// Options of NMS on decoded detections. Negative label and counts mean
    /// "none" and "all".
    #[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
    #[serde(default)]
    pub struct DetectionOutputConfig {
        pub background_label: Option<i64>,
        pub nms_threshold: Option<R64>,
        pub nms_top_k: Option<i64>,
        pub keep_top_k: Option<i64>,
        pub score_threshold: Option<R64>,
        pub nms_eta: Option<R64>,
    }

    impl DetectionOutputConfig {
        pub fn load<P>(path: P) -> Result<Self>
        where
            P: AsRef<Path>,
        {
            load_json5(path.as_ref())
        }

        pub fn to_init(&self) -> MulticlassNmsInit {
            let Self {
                background_label,
                nms_threshold,
                nms_top_k,
                keep_top_k,
                score_threshold,
                nms_eta,
            } = *self;
            let default = MulticlassNmsInit::default();
            let non_negative = |value: i64| (value >= 0).then(|| value as usize);

            MulticlassNmsInit {
                background_label: background_label
                    .map_or(default.background_label, non_negative),
                score_threshold: score_threshold.unwrap_or(default.score_threshold),
                nms_top_k: nms_top_k.map_or(default.nms_top_k, non_negative),
                nms_threshold: nms_threshold.unwrap_or(default.nms_threshold),
                nms_eta: nms_eta.unwrap_or(default.nms_eta),
                keep_top_k: keep_top_k.map_or(default.keep_top_k, non_negative),
            }
        }
    }
}
