use super::{box_rows, ensure_box_array};
use crate::common::*;

/// Box coding direction.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, EnumString, AsRefStr, Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum CodeType {
    EncodeCenterSize,
    DecodeCenterSize,
}

/// Applies `code_type` to `target_box` relative to the prior boxes.
///
/// Encoding expects `target_box` as `[R, 4]` corners and decoding expects
/// `[R, C, 4]` offsets, where `C` is the number of priors. Both produce
/// `[R, C, 4]`.
pub fn box_coder(
    code_type: CodeType,
    prior_box: ArrayView2<'_, f32>,
    prior_box_var: Option<ArrayView2<'_, f32>>,
    target_box: ArrayViewD<'_, f32>,
) -> Result<Array3<f32>> {
    match code_type {
        CodeType::EncodeCenterSize => {
            let target_box = target_box.into_dimensionality::<Ix2>().map_err(|_| {
                SsdError::Shape("encode_center_size expects a 2-D target box".into())
            })?;
            encode_center_size(target_box, prior_box, prior_box_var)
        }
        CodeType::DecodeCenterSize => {
            let target_box = target_box.into_dimensionality::<Ix3>().map_err(|_| {
                SsdError::Shape("decode_center_size expects a 3-D target box".into())
            })?;
            decode_center_size(target_box, prior_box, prior_box_var)
        }
    }
}

/// Encodes every target box against every prior box.
///
/// For a prior with center `(pcx, pcy)`, size `(pw, ph)` and variance
/// `(vx, vy, vw, vh)`, the target box `(tcx, tcy, tw, th)` is encoded as
///
/// ```text
/// ((tcx - pcx) / pw / vx, (tcy - pcy) / ph / vy, ln(|tw / pw|) / vw, ln(|th / ph|) / vh)
/// ```
pub fn encode_center_size(
    target_box: ArrayView2<'_, f32>,
    prior_box: ArrayView2<'_, f32>,
    prior_box_var: Option<ArrayView2<'_, f32>>,
) -> Result<Array3<f32>> {
    ensure_box_array(&target_box, "target_box")?;
    let priors = box_rows(prior_box);
    let variances = prior_variances(prior_box, prior_box_var)?;
    let targets = box_rows(target_box);

    let mut output = Array3::zeros((targets.len(), priors.len(), 4));
    iproduct!(targets.iter().enumerate(), izip!(&priors, &variances).enumerate()).for_each(
        |((row, target), (col, (prior, var)))| {
            let [vx, vy, vw, vh] = *var;
            let (pw, ph) = (prior.w(), prior.h());
            let code = [
                (target.cx() - prior.cx()) / pw / vx,
                (target.cy() - prior.cy()) / ph / vy,
                (target.w() / pw).abs().ln() / vw,
                (target.h() / ph).abs().ln() / vh,
            ];
            output
                .slice_mut(s![row, col, ..])
                .iter_mut()
                .zip(code)
                .for_each(|(dst, src)| *dst = src);
        },
    );

    Ok(output)
}

/// Decodes `[R, C, 4]` offsets into `[xmin, ymin, xmax, ymax]` corners.
///
/// Offset `[r, c]` is decoded against prior `c`. This is the inverse of
/// [encode_center_size].
pub fn decode_center_size(
    target_box: ArrayView3<'_, f32>,
    prior_box: ArrayView2<'_, f32>,
    prior_box_var: Option<ArrayView2<'_, f32>>,
) -> Result<Array3<f32>> {
    let priors = box_rows(prior_box);
    let variances = prior_variances(prior_box, prior_box_var)?;
    let (num_rows, num_cols, num_coords) = target_box.dim();
    ensure_shape!(
        num_cols == priors.len() && num_coords == 4,
        "expect target box of shape [N, {}, 4], but got {:?}",
        priors.len(),
        target_box.shape()
    );

    let mut output = Array3::zeros((num_rows, num_cols, 4));
    iproduct!(0..num_rows, izip!(&priors, &variances).enumerate()).for_each(
        |(row, (col, (prior, var)))| {
            let [vx, vy, vw, vh] = *var;
            let code = target_box.slice(s![row, col, ..]);
            let (pw, ph) = (prior.w(), prior.h());

            let cx = vx * code[0] * pw + prior.cx();
            let cy = vy * code[1] * ph + prior.cy();
            let w = (vw * code[2]).exp() * pw;
            let h = (vh * code[3]).exp() * ph;

            let corners = [cx - w / 2.0, cy - h / 2.0, cx + w / 2.0, cy + h / 2.0];
            output
                .slice_mut(s![row, col, ..])
                .iter_mut()
                .zip(corners)
                .for_each(|(dst, src)| *dst = src);
        },
    );

    Ok(output)
}

/// Resolves per-prior variances, all ones when no variance is given.
fn prior_variances(
    prior_box: ArrayView2<'_, f32>,
    prior_box_var: Option<ArrayView2<'_, f32>>,
) -> Result<Vec<[f32; 4]>> {
    ensure_box_array(&prior_box, "prior_box")?;
    let num_priors = prior_box.nrows();

    let variances = match prior_box_var {
        Some(var) => {
            ensure_shape!(
                var.dim() == (num_priors, 4),
                "expect prior_box_var of shape [{}, 4], but got {:?}",
                num_priors,
                var.shape()
            );
            var.outer_iter()
                .map(|row| [row[0], row[1], row[2], row[3]])
                .collect()
        }
        None => vec![[1.0; 4]; num_priors],
    };
    Ok(variances)
}
