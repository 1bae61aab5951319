use super::NegativeIndices;
use crate::common::*;

/// Assigned targets of one batch.
#[derive(Debug, Clone, PartialEq)]
pub struct TargetAssignOutput<T> {
    /// `[batch, priors, K]` assigned target rows.
    pub out: Array3<T>,
    /// `[batch, priors, 1]` weights, 1 for positives and mined negatives.
    pub out_weight: Array3<f32>,
}

/// Gathers per-prior targets by the match indices.
///
/// `x` is `[M, Px, K]` with its leading rows partitioned into instances by
/// `x_lod`. For instance `i` and prior `j` matched to the local row `id`, the
/// target is `x[x_lod[i] + id][j % Px]` with weight 1. Unmatched priors get
/// `mismatch_value` with weight 0. Finally the negatives of each instance
/// are overwritten with `mismatch_value` and weight 1.
pub fn target_assign<T>(
    x: ArrayView3<'_, T>,
    x_lod: &Lod,
    match_indices: ArrayView2<'_, i32>,
    neg_indices: Option<&NegativeIndices>,
    mismatch_value: T,
) -> Result<TargetAssignOutput<T>>
where
    T: Clone,
{
    let (num_rows, num_cols, k) = x.dim();
    let (batch_size, num_priors) = match_indices.dim();

    x_lod.ensure_covers(num_rows, "the assigned input")?;
    ensure_shape!(
        x_lod.num_groups() == batch_size,
        "the assigned input has {} instances, but match indices have {}",
        x_lod.num_groups(),
        batch_size
    );
    ensure_shape!(
        num_cols >= 1,
        "the second dimension of the assigned input must not be zero"
    );
    if let Some(neg) = neg_indices {
        ensure_shape!(
            neg.num_groups() == batch_size,
            "negative indices have {} instances, but match indices have {}",
            neg.num_groups(),
            batch_size
        );
    }

    let mut out = Array3::from_elem((batch_size, num_priors, k), mismatch_value.clone());
    let mut out_weight = Array3::zeros((batch_size, num_priors, 1));

    for (instance, rows) in x_lod.groups().enumerate() {
        for (prior, &id) in match_indices.row(instance).iter().enumerate() {
            if id < 0 {
                continue;
            }
            let id = id as usize;
            ensure_shape!(
                id < rows.len(),
                "match index {} of instance {} exceeds its {} rows",
                id,
                instance,
                rows.len()
            );

            out.slice_mut(s![instance, prior, ..])
                .assign(&x.slice(s![rows.start + id, prior % num_cols, ..]));
            out_weight[[instance, prior, 0]] = 1.0;
        }
    }

    if let Some(neg) = neg_indices {
        for (instance, group) in neg.groups().enumerate() {
            for &prior in group {
                ensure_shape!(
                    prior < num_priors,
                    "negative index {} of instance {} exceeds {} priors",
                    prior,
                    instance,
                    num_priors
                );
                out.slice_mut(s![instance, prior, ..])
                    .fill(mismatch_value.clone());
                out_weight[[instance, prior, 0]] = 1.0;
            }
        }
    }

    Ok(TargetAssignOutput { out, out_weight })
}
