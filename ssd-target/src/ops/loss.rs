use crate::common::*;

pub use composer::*;
pub use cross_entropy::*;
pub use smooth_l1::*;

mod cross_entropy {
    use super::*;

    /// Softmax cross entropy of `[R, C]` logits against `[R, 1]` class labels.
    ///
    /// The result is `[R, 1]`, computed through a log-softmax with the row
    /// maximum subtracted.
    pub fn softmax_with_cross_entropy(
        logits: ArrayView2<'_, f32>,
        labels: ArrayView2<'_, i64>,
    ) -> Result<Array2<f32>> {
        let (num_rows, num_classes) = logits.dim();
        ensure_shape!(
            labels.dim() == (num_rows, 1),
            "expect labels of shape [{}, 1], but got {:?}",
            num_rows,
            labels.shape()
        );

        let losses: Vec<f32> = logits
            .outer_iter()
            .zip(labels.iter())
            .map(|(row, &label)| -> Result<f32> {
                ensure_shape!(
                    (0..num_classes as i64).contains(&label),
                    "label {} is out of range of {} classes",
                    label,
                    num_classes
                );
                let max = row.fold(f32::NEG_INFINITY, |max, &value| max.max(value));
                let log_sum_exp = row.iter().map(|&value| (value - max).exp()).sum::<f32>().ln();
                Ok(log_sum_exp - (row[label as usize] - max))
            })
            .collect::<Result<_>>()?;

        Ok(Array2::from_shape_vec((num_rows, 1), losses)?)
    }
}

mod smooth_l1 {
    use super::*;

    /// Smooth L1 distance between `[R, D]` arrays, summed into `[R, 1]`.
    ///
    /// Each difference `d` contributes `0.5 * (sigma * d)^2` if
    /// `|d| < 1 / sigma^2`, otherwise `|d| - 0.5 / sigma^2`.
    pub fn smooth_l1(
        x: ArrayView2<'_, f32>,
        y: ArrayView2<'_, f32>,
        sigma: f32,
    ) -> Result<Array2<f32>> {
        ensure_shape!(
            x.dim() == y.dim(),
            "smooth_l1 inputs differ in shape, {:?} and {:?}",
            x.shape(),
            y.shape()
        );
        ensure_config!(sigma > 0.0, "sigma must be positive, but got {}", sigma);

        let sigma2 = sigma * sigma;
        let losses: Array1<f32> = x
            .outer_iter()
            .zip(y.outer_iter())
            .map(|(x, y)| {
                izip!(x.iter(), y.iter())
                    .map(|(&x, &y)| {
                        let diff = x - y;
                        if diff.abs() < 1.0 / sigma2 {
                            0.5 * sigma2 * diff * diff
                        } else {
                            diff.abs() - 0.5 / sigma2
                        }
                    })
                    .sum::<f32>()
            })
            .collect();

        Ok(losses.insert_axis(Axis(1)))
    }
}

mod composer {
    use super::*;

    /// Elementwise product of two equally shaped arrays.
    pub fn elementwise_mul(
        lhs: ArrayView2<'_, f32>,
        rhs: ArrayView2<'_, f32>,
    ) -> Result<Array2<f32>> {
        ensure_shape!(
            lhs.dim() == rhs.dim(),
            "cannot multiply arrays of shape {:?} and {:?}",
            lhs.shape(),
            rhs.shape()
        );
        Ok(&lhs * &rhs)
    }

    /// Sum of equally shaped arrays scaled by their weights.
    pub fn weighted_sum(inputs: &[ArrayView2<'_, f32>], weights: &[f32]) -> Result<Array2<f32>> {
        ensure_config!(
            inputs.len() == weights.len(),
            "{} inputs are given {} weights",
            inputs.len(),
            weights.len()
        );
        let first = match inputs.first() {
            Some(first) => first,
            None => bail!(SsdError::Config("weighted_sum needs at least one input".into())),
        };
        ensure_shape!(
            inputs.iter().all(|input| input.dim() == first.dim()),
            "weighted_sum inputs differ in shape"
        );

        let mut sum = Array2::zeros(first.dim());
        izip!(inputs, weights).for_each(|(input, &weight)| {
            sum.scaled_add(weight, input);
        });
        Ok(sum)
    }

    /// Combines weighted classification and localization losses.
    #[derive(Debug, Clone, Copy, PartialEq)]
    pub struct LossComposer {
        pub conf_loss_weight: f32,
        pub loc_loss_weight: f32,
    }

    impl Default for LossComposer {
        fn default() -> Self {
            Self {
                conf_loss_weight: 1.0,
                loc_loss_weight: 1.0,
            }
        }
    }

    impl LossComposer {
        /// Computes
        /// `conf_loss_weight * conf_loss * conf_weight + loc_loss_weight * loc_loss * loc_weight`
        /// per row, without reduction.
        pub fn compose(
            &self,
            conf_loss: ArrayView2<'_, f32>,
            conf_weight: ArrayView2<'_, f32>,
            loc_loss: ArrayView2<'_, f32>,
            loc_weight: ArrayView2<'_, f32>,
        ) -> Result<Array2<f32>> {
            let conf_loss = elementwise_mul(conf_loss, conf_weight)?;
            let loc_loss = elementwise_mul(loc_loss, loc_weight)?;
            weighted_sum(
                &[conf_loss.view(), loc_loss.view()],
                &[self.conf_loss_weight, self.loc_loss_weight],
            )
        }
    }
}
