use crate::common::*;

pub use kernel::*;
pub use multi_layer::*;

const ASPECT_RATIO_EPS: f32 = 1e-6;

mod kernel {
    use super::*;

    /// Attributes of prior boxes on one feature map.
    #[derive(Debug, Clone, PartialEq)]
    pub struct PriorBoxAttrs {
        pub min_sizes: Vec<f32>,
        /// Either empty or one per min size.
        pub max_sizes: Vec<f32>,
        pub aspect_ratios: Vec<f32>,
        pub variances: [f32; 4],
        pub flip: bool,
        pub clip: bool,
        /// Zero derives the step from the image and feature map sizes.
        pub step_w: f32,
        pub step_h: f32,
        pub offset: f32,
    }

    impl Default for PriorBoxAttrs {
        fn default() -> Self {
            Self {
                min_sizes: vec![],
                max_sizes: vec![],
                aspect_ratios: vec![],
                variances: [0.1; 4],
                flip: false,
                clip: false,
                step_w: 0.0,
                step_h: 0.0,
                offset: 0.5,
            }
        }
    }

    impl PriorBoxAttrs {
        pub fn validate(&self) -> Result<()> {
            let Self {
                ref min_sizes,
                ref max_sizes,
                ref aspect_ratios,
                step_w,
                step_h,
                ..
            } = *self;

            ensure_config!(!min_sizes.is_empty(), "min_sizes must not be empty");
            ensure_config!(
                min_sizes.iter().all(|&size| size > 0.0),
                "min_sizes must be positive, but got {:?}",
                min_sizes
            );
            ensure_config!(
                max_sizes.is_empty() || max_sizes.len() == min_sizes.len(),
                "expect {} max_sizes, but got {}",
                min_sizes.len(),
                max_sizes.len()
            );
            ensure_config!(
                izip!(min_sizes, max_sizes).all(|(min, max)| max > min),
                "each max size must be greater than its min size, got {:?} and {:?}",
                min_sizes,
                max_sizes
            );
            ensure_config!(
                aspect_ratios.iter().all(|&ratio| ratio > 0.0),
                "aspect ratios must be positive, but got {:?}",
                aspect_ratios
            );
            ensure_config!(
                step_w >= 0.0 && step_h >= 0.0,
                "steps must be non-negative"
            );
            Ok(())
        }

        /// Aspect ratios starting from 1 without duplicates, with the
        /// reciprocals when `flip` is set.
        pub fn expanded_aspect_ratios(&self) -> Vec<f32> {
            let mut expanded: Vec<f32> = vec![1.0];
            self.aspect_ratios.iter().for_each(|&ratio| {
                let exists = expanded
                    .iter()
                    .any(|&prev| abs_diff_eq!(ratio, prev, epsilon = ASPECT_RATIO_EPS));
                if !exists {
                    expanded.push(ratio);
                    if self.flip {
                        expanded.push(1.0 / ratio);
                    }
                }
            });
            expanded
        }

        /// Number of prior boxes centered on one feature map cell.
        pub fn num_priors_per_cell(&self) -> usize {
            let num_ratios = self.expanded_aspect_ratios().len();
            self.min_sizes.len() * num_ratios + self.max_sizes.len()
        }
    }

    /// Prior boxes and their variances, both `[num_priors, 4]`.
    #[derive(Debug, Clone, PartialEq)]
    pub struct PriorBoxOutput {
        pub boxes: Array2<f32>,
        pub variances: Array2<f32>,
    }

    /// Generates the prior boxes of a `[h, w]` feature map over a `[h, w]`
    /// image.
    ///
    /// Boxes are ordered by cell in row-major order. Within a cell, each min
    /// size contributes its square box, then the square box of
    /// `sqrt(min_size * max_size)`, then one box per non-unit aspect ratio.
    /// Coordinates are normalized by the image size.
    pub fn prior_box(
        feature_size: [usize; 2],
        image_size: [usize; 2],
        attrs: &PriorBoxAttrs,
    ) -> Result<PriorBoxOutput> {
        attrs.validate()?;
        let [feature_h, feature_w] = feature_size;
        let [image_h, image_w] = image_size;
        ensure_shape!(
            feature_h > 0 && feature_w > 0 && image_h > 0 && image_w > 0,
            "feature map {:?} and image {:?} must not be empty",
            feature_size,
            image_size
        );

        let (image_h, image_w) = (image_h as f32, image_w as f32);
        let step_w = match attrs.step_w {
            step if step == 0.0 => image_w / feature_w as f32,
            step => step,
        };
        let step_h = match attrs.step_h {
            step if step == 0.0 => image_h / feature_h as f32,
            step => step,
        };
        let ratios: Vec<f32> = attrs
            .expanded_aspect_ratios()
            .into_iter()
            .filter(|ratio| (ratio - 1.0).abs() >= ASPECT_RATIO_EPS)
            .collect();

        let mut boxes: Vec<XYXY<f32>> = vec![];
        for (row, col) in iproduct!(0..feature_h, 0..feature_w) {
            let cx = (col as f32 + attrs.offset) * step_w;
            let cy = (row as f32 + attrs.offset) * step_h;

            for (index, &min_size) in attrs.min_sizes.iter().enumerate() {
                let mut sizes = vec![(min_size, min_size)];
                if let Some(&max_size) = attrs.max_sizes.get(index) {
                    let size = (min_size * max_size).sqrt();
                    sizes.push((size, size));
                }
                sizes.extend(ratios.iter().map(|&ratio| {
                    let sqrt = ratio.sqrt();
                    (min_size * sqrt, min_size / sqrt)
                }));

                for (box_w, box_h) in sizes {
                    let rect = XYXY::try_from_xyxy([
                        (cx - box_w / 2.0) / image_w,
                        (cy - box_h / 2.0) / image_h,
                        (cx + box_w / 2.0) / image_w,
                        (cy + box_h / 2.0) / image_h,
                    ])?;
                    let rect = if attrs.clip {
                        rect.clamp(0.0, 1.0)
                    } else {
                        rect
                    };
                    boxes.push(rect);
                }
            }
        }

        let num_priors = boxes.len();
        let boxes = Array2::from_shape_vec(
            (num_priors, 4),
            boxes.iter().flat_map(|rect| rect.xyxy()).collect(),
        )?;
        let variances = Array2::from_shape_fn((num_priors, 4), |(_, index)| attrs.variances[index]);

        Ok(PriorBoxOutput { boxes, variances })
    }
}

mod multi_layer {
    use super::*;

    /// Prior box sizes of all feature layers.
    #[derive(Debug, Clone, PartialEq)]
    pub enum PriorSizes {
        /// Sizes per layer.
        Explicit {
            min_sizes: Vec<Vec<f32>>,
            max_sizes: Vec<Vec<f32>>,
        },
        /// Sizes derived from percentages of `base_size`. Needs more than two
        /// layers.
        Ratio {
            min_ratio: usize,
            max_ratio: usize,
            base_size: f32,
        },
    }

    #[derive(Debug, Clone)]
    pub struct PriorBoxInit {
        pub num_layers: usize,
        pub sizes: PriorSizes,
        /// Either empty or one list per layer.
        pub aspect_ratios: Vec<Vec<f32>>,
        /// Steps on both axes per layer. Overrides `step_w` and `step_h`.
        pub steps: Option<Vec<f32>>,
        pub step_w: Option<Vec<f32>>,
        pub step_h: Option<Vec<f32>>,
        pub offset: f32,
        pub variances: [f32; 4],
        pub flip: bool,
        pub clip: bool,
    }

    impl PriorBoxInit {
        pub fn new(num_layers: usize, sizes: PriorSizes) -> Self {
            let PriorBoxAttrs {
                offset,
                variances,
                flip,
                clip,
                ..
            } = PriorBoxAttrs::default();

            Self {
                num_layers,
                sizes,
                aspect_ratios: vec![],
                steps: None,
                step_w: None,
                step_h: None,
                offset,
                variances,
                flip,
                clip,
            }
        }

        pub fn build(self) -> Result<MultiBoxPriors> {
            let Self {
                num_layers,
                sizes,
                aspect_ratios,
                steps,
                step_w,
                step_h,
                offset,
                variances,
                flip,
                clip,
            } = self;

            ensure_config!(num_layers > 0, "at least one feature layer is required");

            let (min_sizes, max_sizes) = match sizes {
                PriorSizes::Explicit {
                    min_sizes,
                    max_sizes,
                } => {
                    ensure_config!(
                        min_sizes.len() == num_layers && max_sizes.len() == num_layers,
                        "expect min_sizes and max_sizes for {} layers, but got {} and {}",
                        num_layers,
                        min_sizes.len(),
                        max_sizes.len()
                    );
                    (min_sizes, max_sizes)
                }
                PriorSizes::Ratio {
                    min_ratio,
                    max_ratio,
                    base_size,
                } => derive_sizes(num_layers, min_ratio, max_ratio, base_size)?,
            };

            let check_len = |name: &str, len: usize| -> Result<()> {
                ensure_config!(
                    len == num_layers,
                    "{} must have one entry per layer, expect {} but got {}",
                    name,
                    num_layers,
                    len
                );
                Ok(())
            };

            if !aspect_ratios.is_empty() {
                check_len("aspect_ratios", aspect_ratios.len())?;
            }
            let (step_w, step_h) = match steps {
                Some(steps) => {
                    check_len("steps", steps.len())?;
                    (Some(steps.clone()), Some(steps))
                }
                None => (step_w, step_h),
            };
            if let Some(step_w) = &step_w {
                check_len("step_w", step_w.len())?;
            }
            if let Some(step_h) = &step_h {
                check_len("step_h", step_h.len())?;
            }

            let layers: Vec<_> = (0..num_layers)
                .map(|index| -> Result<_> {
                    let attrs = PriorBoxAttrs {
                        min_sizes: min_sizes[index].clone(),
                        max_sizes: max_sizes[index].clone(),
                        aspect_ratios: aspect_ratios.get(index).cloned().unwrap_or_default(),
                        variances,
                        flip,
                        clip,
                        step_w: step_w.as_ref().map_or(0.0, |steps| steps[index]),
                        step_h: step_h.as_ref().map_or(0.0, |steps| steps[index]),
                        offset,
                    };
                    attrs.validate().with_context(|| {
                        format!("invalid prior box attributes of layer {}", index)
                    })?;
                    Ok(attrs)
                })
                .collect::<Result<_>>()?;

            Ok(MultiBoxPriors { layers })
        }
    }

    /// Derives per-layer sizes from percentages of `base_size`.
    ///
    /// The first layer gets 10% and 20% of the base size, the remaining
    /// layers step evenly from `min_ratio` to `max_ratio`. Sizes beyond the
    /// layer count are dropped.
    fn derive_sizes(
        num_layers: usize,
        min_ratio: usize,
        max_ratio: usize,
        base_size: f32,
    ) -> Result<(Vec<Vec<f32>>, Vec<Vec<f32>>)> {
        ensure_config!(
            num_layers > 2,
            "explicit min_sizes and max_sizes are required for {} layers",
            num_layers
        );
        ensure_config!(
            min_ratio <= max_ratio,
            "min_ratio {} must not exceed max_ratio {}",
            min_ratio,
            max_ratio
        );
        ensure_config!(base_size > 0.0, "base_size must be positive");

        let step = (max_ratio - min_ratio) / (num_layers - 2);
        ensure_config!(
            step > 0,
            "ratios {}..={} are too close for {} layers",
            min_ratio,
            max_ratio,
            num_layers
        );

        let (min_sizes, max_sizes): (Vec<_>, Vec<_>) =
            iter::once((0.10 * base_size, 0.20 * base_size))
                .chain((min_ratio..=max_ratio).step_by(step).map(|ratio| {
                    (
                        base_size * ratio as f32 / 100.0,
                        base_size * (ratio + step) as f32 / 100.0,
                    )
                }))
                .take(num_layers)
                .map(|(min, max)| (vec![min], vec![max]))
                .unzip();

        // a floored step can produce extra sizes, only the leading ones are used
        ensure_config!(
            min_sizes.len() == num_layers,
            "ratios {}..={} yield only {} layers of sizes, but {} layers are given",
            min_ratio,
            max_ratio,
            min_sizes.len(),
            num_layers
        );

        Ok((min_sizes, max_sizes))
    }

    /// Prior box generator over multiple feature layers.
    #[derive(Debug, Clone, PartialEq, Getters)]
    pub struct MultiBoxPriors {
        #[get = "pub"]
        layers: Vec<PriorBoxAttrs>,
    }

    impl MultiBoxPriors {
        /// Generates and concatenates the priors of all layers.
        pub fn generate(
            &self,
            feature_sizes: &[[usize; 2]],
            image_size: [usize; 2],
        ) -> Result<PriorBoxOutput> {
            ensure_shape!(
                feature_sizes.len() == self.layers.len(),
                "expect {} feature maps, but got {}",
                self.layers.len(),
                feature_sizes.len()
            );

            let outputs: Vec<_> = izip!(feature_sizes, &self.layers)
                .map(|(&feature_size, attrs)| prior_box(feature_size, image_size, attrs))
                .collect::<Result<_>>()?;

            let boxes: Vec<_> = outputs.iter().map(|output| output.boxes.view()).collect();
            let variances: Vec<_> = outputs.iter().map(|output| output.variances.view()).collect();

            Ok(PriorBoxOutput {
                boxes: ndarray::concatenate(Axis(0), &boxes)?,
                variances: ndarray::concatenate(Axis(0), &variances)?,
            })
        }
    }
}
