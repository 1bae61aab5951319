//! Graph construction helpers.
//!
//! Each helper validates its arguments, declares the intermediate variables
//! and appends the operators to a [Program].

use crate::{
    common::*,
    graph::{
        BipartiteMatchOp, BoxCoderOp, CastOp, ConcatOp, DataType, ElementwiseMulOp,
        IouSimilarityOp, MineHardExamplesOp, MulticlassNmsOp, Program, PriorBoxOp, ReshapeOp,
        SmoothL1Op, SoftmaxWithCrossEntropyOp, TargetAssignOp, VarId, WeightedSumOp,
    },
    ops::{CodeType, MatchType, MulticlassNmsInit, PriorBoxInit},
    ssd_loss::SsdLossInit,
};

/// Pairwise IoU of `x` boxes against `y` boxes.
pub fn iou_similarity(program: &mut Program, x: VarId, y: VarId) -> Result<VarId> {
    let out = program.create_tmp_variable(DataType::F32);
    program.append_op(IouSimilarityOp { x, y, out })?;
    Ok(out)
}

pub fn box_coder(
    program: &mut Program,
    prior_box: VarId,
    prior_box_var: Option<VarId>,
    target_box: VarId,
    code_type: CodeType,
) -> Result<VarId> {
    let output_box = program.create_tmp_variable(DataType::F32);
    program.append_op(BoxCoderOp {
        prior_box,
        prior_box_var,
        target_box,
        output_box,
        code_type,
    })?;
    Ok(output_box)
}

/// Returns the match indices and the match distances.
pub fn bipartite_match(
    program: &mut Program,
    dist_matrix: VarId,
    match_type: MatchType,
    dist_threshold: f32,
) -> Result<(VarId, VarId)> {
    let match_indices = program.create_tmp_variable(DataType::I32);
    let match_dist = program.create_tmp_variable(DataType::F32);
    program.append_op(BipartiteMatchOp {
        dist_mat: dist_matrix,
        match_indices,
        match_dist,
        match_type,
        dist_threshold,
    })?;
    Ok((match_indices, match_dist))
}

/// Returns the assigned targets and their weights.
pub fn target_assign(
    program: &mut Program,
    input: VarId,
    matched_indices: VarId,
    negative_indices: Option<VarId>,
    mismatch_value: i64,
) -> Result<(VarId, VarId)> {
    let out = program.create_tmp_variable(program.var(input)?.dtype());
    let out_weight = program.create_tmp_variable(DataType::F32);
    program.append_op(TargetAssignOp {
        x: input,
        match_indices: matched_indices,
        neg_indices: negative_indices,
        out,
        out_weight,
        mismatch_value,
    })?;
    Ok((out, out_weight))
}

/// Variables consumed by [ssd_loss].
#[derive(Debug, Clone, Copy)]
pub struct SsdLossVars {
    /// `[N, Np, 4]`
    pub location: VarId,
    /// `[N, Np, C]` with static `Np` and `C`.
    pub confidence: VarId,
    /// `[Ng, 4]` with segment offsets per instance.
    pub gt_box: VarId,
    /// `[Ng, 1]` integer labels.
    pub gt_label: VarId,
    /// `[Np, 4]`
    pub prior_box: VarId,
    pub prior_box_var: Option<VarId>,
}

/// Appends the multi-box loss and returns the `[N * Np, 1]` loss variable.
pub fn ssd_loss(program: &mut Program, vars: SsdLossVars, init: SsdLossInit) -> Result<VarId> {
    let SsdLossVars {
        location,
        confidence,
        gt_box,
        gt_label,
        prior_box,
        prior_box_var,
    } = vars;
    let loss = init.build()?;
    let background_label = loss.background_label() as i64;

    for (name, var) in [
        ("location", Some(location)),
        ("confidence", Some(confidence)),
        ("gt_box", Some(gt_box)),
        ("prior_box", Some(prior_box)),
        ("prior_box_var", prior_box_var),
    ] {
        if let Some(var) = var {
            let dtype = program.var(var)?.dtype();
            ensure_config!(dtype == DataType::F32, "{} must be f32, but got {}", name, dtype);
        }
    }
    let label_dtype = program.var(gt_label)?.dtype();
    ensure_config!(
        matches!(label_dtype, DataType::I32 | DataType::I64),
        "gt_label must be an integer tensor, but got {}",
        label_dtype
    );

    let (num, num_prior, num_class) = match program.var(confidence)?.shape().as_deref() {
        Some(&[num, num_prior, num_class]) if num_prior >= 0 && num_class >= 0 => {
            (num, num_prior, num_class)
        }
        shape => bail!(SsdError::Config(format!(
            "confidence must have a static [N, Np, C] shape, but got {:?}",
            shape
        ))),
    };
    // dimensions of -1 on either side are left to the kernels
    let compatible = |expect: isize, dim: isize| expect < 0 || dim < 0 || expect == dim;
    for (name, var, expect) in [
        ("location", Some(location), vec![num, num_prior, 4]),
        ("gt_box", Some(gt_box), vec![-1, 4]),
        ("gt_label", Some(gt_label), vec![-1, 1]),
        ("prior_box", Some(prior_box), vec![num_prior, 4]),
        ("prior_box_var", prior_box_var, vec![num_prior, 4]),
    ] {
        let var = match var {
            Some(var) => var,
            None => continue,
        };
        if let Some(shape) = program.var(var)?.shape() {
            ensure_config!(
                shape.len() == expect.len()
                    && izip!(&expect, shape).all(|(&expect, &dim)| compatible(expect, dim)),
                "{} of shape {:?} does not match the expected shape {:?} \
                 for confidence of shape [{}, {}, {}]",
                name,
                shape,
                expect,
                num,
                num_prior,
                num_class
            );
        }
    }
    ensure_config!(
        (loss.background_label() as isize) < num_class,
        "background label {} is out of range of {} classes",
        loss.background_label(),
        num_class
    );

    // match priors with ground truth boxes
    let iou = iou_similarity(program, gt_box, prior_box)?;
    let (matched_indices, matched_dist) =
        bipartite_match(program, iou, loss.match_type(), loss.overlap_threshold())?;

    // classification loss to rank negatives
    let gt_label = reshape(program, gt_label, vec![-1, 1, 1])?;
    let (target_label, _) =
        target_assign(program, gt_label, matched_indices, None, background_label)?;
    let confidence = reshape(program, confidence, vec![-1, num_class])?;
    let target_label = cast(program, target_label, DataType::I64)?;
    let target_label = reshape(program, target_label, vec![-1, 1])?;
    let conf_loss = softmax_with_cross_entropy(program, confidence, target_label)?;
    let conf_loss = reshape(program, conf_loss, vec![num, num_prior])?;

    let neg_indices = program.create_tmp_variable(DataType::I32);
    let updated_matched_indices = program.create_tmp_variable(DataType::I32);
    program.append_op(MineHardExamplesOp {
        cls_loss: conf_loss,
        match_indices: matched_indices,
        match_dist: matched_dist,
        neg_indices,
        updated_match_indices: updated_matched_indices,
        miner: loss.miner().clone(),
    })?;

    // assign targets
    let encoded_bbox = box_coder(
        program,
        prior_box,
        prior_box_var,
        gt_box,
        CodeType::EncodeCenterSize,
    )?;
    let (target_bbox, target_loc_weight) =
        target_assign(program, encoded_bbox, updated_matched_indices, None, 0)?;
    let (target_label, target_conf_weight) = target_assign(
        program,
        gt_label,
        updated_matched_indices,
        Some(neg_indices),
        background_label,
    )?;

    // confidence loss
    let target_label = cast(program, target_label, DataType::I64)?;
    let target_label = reshape(program, target_label, vec![-1, 1])?;
    let conf_loss = softmax_with_cross_entropy(program, confidence, target_label)?;
    let target_conf_weight = reshape(program, target_conf_weight, vec![-1, 1])?;
    let conf_loss = elementwise_mul(program, conf_loss, target_conf_weight)?;

    // localization loss
    let location = reshape(program, location, vec![-1, 4])?;
    let target_bbox = reshape(program, target_bbox, vec![-1, 4])?;
    let loc_loss = smooth_l1(program, location, target_bbox, 1.0)?;
    let target_loc_weight = reshape(program, target_loc_weight, vec![-1, 1])?;
    let loc_loss = elementwise_mul(program, loc_loss, target_loc_weight)?;

    let composer = loss.composer();
    let out = program.create_tmp_variable(DataType::F32);
    program.append_op(WeightedSumOp {
        inputs: vec![conf_loss, loc_loss],
        weights: vec![composer.conf_loss_weight, composer.loc_loss_weight],
        out,
    })?;

    Ok(out)
}

/// Appends prior box generation over the `[N, C, H, W]` feature maps and
/// returns the concatenated boxes and variances.
pub fn prior_box(
    program: &mut Program,
    inputs: &[VarId],
    image: VarId,
    init: PriorBoxInit,
) -> Result<(VarId, VarId)> {
    ensure_config!(
        init.num_layers == inputs.len(),
        "prior box is configured for {} layers, but {} inputs are given",
        init.num_layers,
        inputs.len()
    );
    let priors = init.build()?;

    let (boxes, variances): (Vec<_>, Vec<_>) = izip!(inputs, priors.layers())
        .map(|(&input, attrs)| -> Result<_> {
            let boxes = program.create_tmp_variable(DataType::F32);
            let variances = program.create_tmp_variable(DataType::F32);
            program.append_op(PriorBoxOp {
                input,
                image,
                boxes,
                variances,
                attrs: attrs.clone(),
            })?;
            Ok((boxes, variances))
        })
        .collect::<Result<Vec<_>>>()?
        .into_iter()
        .unzip();

    if boxes.len() == 1 {
        return Ok((boxes[0], variances[0]));
    }

    let boxes = concat(program, boxes)?;
    let variances = concat(program, variances)?;
    Ok((boxes, variances))
}

/// Decodes the location predictions and appends multi-class NMS.
///
/// The output is a `[K, 6]` tensor of `[label, score, xmin, ymin, xmax,
/// ymax]` rows with one segment per image.
pub fn detection_output(
    program: &mut Program,
    scores: VarId,
    loc: VarId,
    prior_box: VarId,
    prior_box_var: Option<VarId>,
    init: MulticlassNmsInit,
) -> Result<VarId> {
    let nms = init.build()?;
    let decoded_box = box_coder(
        program,
        prior_box,
        prior_box_var,
        loc,
        CodeType::DecodeCenterSize,
    )?;

    let out = program.create_tmp_variable(DataType::F32);
    program.append_op(MulticlassNmsOp {
        scores,
        bboxes: decoded_box,
        out,
        nms,
    })?;
    Ok(out)
}

fn reshape(program: &mut Program, x: VarId, shape: Vec<isize>) -> Result<VarId> {
    let out = program.create_tmp_variable(program.var(x)?.dtype());
    program.append_op(ReshapeOp {
        x,
        out,
        shape: shape.clone(),
    })?;
    program.set_shape(out, shape)?;
    Ok(out)
}

fn cast(program: &mut Program, x: VarId, dtype: DataType) -> Result<VarId> {
    let out = program.create_tmp_variable(dtype);
    program.append_op(CastOp { x, out, dtype })?;
    Ok(out)
}

fn concat(program: &mut Program, inputs: Vec<VarId>) -> Result<VarId> {
    let out = program.create_tmp_variable(program.var(inputs[0])?.dtype());
    program.append_op(ConcatOp { inputs, out })?;
    Ok(out)
}

fn softmax_with_cross_entropy(program: &mut Program, logits: VarId, label: VarId) -> Result<VarId> {
    let loss = program.create_tmp_variable(DataType::F32);
    program.append_op(SoftmaxWithCrossEntropyOp { logits, label, loss })?;
    Ok(loss)
}

fn smooth_l1(program: &mut Program, x: VarId, y: VarId, sigma: f32) -> Result<VarId> {
    let out = program.create_tmp_variable(DataType::F32);
    program.append_op(SmoothL1Op { x, y, out, sigma })?;
    Ok(out)
}

fn elementwise_mul(program: &mut Program, x: VarId, y: VarId) -> Result<VarId> {
    let out = program.create_tmp_variable(DataType::F32);
    program.append_op(ElementwiseMulOp { x, y, out })?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        graph::{Executor, LodTensor, OpKind, Scope},
        ops::{MiningType, PriorSizes},
    };
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    fn loss_program(init: SsdLossInit) -> Result<(Program, SsdLossVars, VarId)> {
        let mut program = Program::new();
        let vars = SsdLossVars {
            location: program.data_with_shape("location", DataType::F32, &[-1, 2, 4])?,
            confidence: program.data_with_shape("confidence", DataType::F32, &[-1, 2, 3])?,
            gt_box: program.data("gt_box", DataType::F32)?,
            gt_label: program.data("gt_label", DataType::I64)?,
            prior_box: program.data("prior_box", DataType::F32)?,
            prior_box_var: None,
        };
        let loss = ssd_loss(&mut program, vars, init)?;
        Ok((program, vars, loss))
    }

    #[test]
    fn ssd_loss_wiring() -> Result<()> {
        let (program, vars, loss) = loss_program(SsdLossInit::default())?;

        let kinds: Vec<_> = program.ops().iter().map(|op| op.kind()).collect();
        assert_eq!(kinds[0], OpKind::IouSimilarity);
        assert_eq!(kinds[1], OpKind::BipartiteMatch);
        assert_eq!(kinds.last(), Some(&OpKind::WeightedSum));
        assert_eq!(
            kinds.iter().filter(|&&kind| kind == OpKind::TargetAssign).count(),
            3
        );

        let mut scope = Scope::new();
        scope.feed(vars.location, LodTensor::new(Array3::<f32>::zeros((1, 2, 4))));
        scope.feed(vars.confidence, LodTensor::new(Array3::<f32>::zeros((1, 2, 3))));
        scope.feed(
            vars.gt_box,
            LodTensor::with_lod(array![[0.0f32, 0.0, 10.0, 10.0]], Lod::single(1))?,
        );
        scope.feed(
            vars.gt_label,
            LodTensor::with_lod(array![[1i64]], Lod::single(1))?,
        );
        scope.feed(
            vars.prior_box,
            LodTensor::new(array![[0.0f32, 0.0, 10.0, 10.0], [20.0, 20.0, 30.0, 30.0]]),
        );
        Executor::new().run(&program, &mut scope)?;

        let loss = scope.get(loss)?.view::<f32, Ix2>()?;
        assert_eq!(loss.dim(), (2, 1));
        for &value in loss.iter() {
            assert_abs_diff_eq!(value, 3f32.ln(), epsilon = 1e-6);
        }
        Ok(())
    }

    #[test]
    fn ssd_loss_argument_errors() -> Result<()> {
        let is_config_error = |result: Result<(Program, SsdLossVars, VarId)>| {
            result.unwrap_err().downcast_ref::<SsdError>().unwrap().is_config()
        };

        assert!(is_config_error(loss_program(SsdLossInit {
            mining_type: Some(MiningType::HardExample),
            ..Default::default()
        })));
        assert!(is_config_error(loss_program(SsdLossInit {
            background_label: Some(3),
            ..Default::default()
        })));

        let mut program = Program::new();
        let vars = SsdLossVars {
            location: program.data_with_shape("location", DataType::F32, &[-1, 5, 4])?,
            confidence: program.data_with_shape("confidence", DataType::F32, &[-1, 2, 3])?,
            gt_box: program.data("gt_box", DataType::F32)?,
            gt_label: program.data("gt_label", DataType::I64)?,
            prior_box: program.data("prior_box", DataType::F32)?,
            prior_box_var: None,
        };
        let err = ssd_loss(&mut program, vars, SsdLossInit::default()).unwrap_err();
        assert!(err.downcast_ref::<SsdError>().unwrap().is_config());

        let vars = SsdLossVars {
            confidence: program.data("unshaped", DataType::F32)?,
            ..vars
        };
        let err = ssd_loss(&mut program, vars, SsdLossInit::default()).unwrap_err();
        assert!(err.downcast_ref::<SsdError>().unwrap().is_config());

        // statically shaped boxes and labels must agree with the confidence
        let confidence = program.data_with_shape("confidence_5", DataType::F32, &[-1, 5, 3])?;
        let vars = SsdLossVars {
            confidence,
            ..vars
        };
        let num_ops = program.ops().len();
        let mismatched = [
            SsdLossVars {
                prior_box: program.data_with_shape("prior_box_4", DataType::F32, &[4, 4])?,
                ..vars
            },
            SsdLossVars {
                prior_box_var: Some(program.data_with_shape(
                    "prior_box_var_4",
                    DataType::F32,
                    &[5, 3],
                )?),
                ..vars
            },
            SsdLossVars {
                gt_box: program.data_with_shape("gt_box_5", DataType::F32, &[-1, 5])?,
                ..vars
            },
            SsdLossVars {
                gt_label: program.data_with_shape("gt_label_2", DataType::I64, &[-1, 2])?,
                ..vars
            },
        ];
        for vars in mismatched {
            let err = ssd_loss(&mut program, vars, SsdLossInit::default()).unwrap_err();
            assert!(err.downcast_ref::<SsdError>().unwrap().is_config());
        }
        assert_eq!(program.ops().len(), num_ops);

        let vars = SsdLossVars {
            gt_box: program.data_with_shape("gt_box_any", DataType::F32, &[-1, 4])?,
            gt_label: program.data_with_shape("gt_label_any", DataType::I64, &[-1, 1])?,
            prior_box: program.data_with_shape("prior_box_5", DataType::F32, &[5, 4])?,
            prior_box_var: Some(program.data_with_shape(
                "prior_box_var_5",
                DataType::F32,
                &[-1, 4],
            )?),
            ..vars
        };
        assert!(ssd_loss(&mut program, vars, SsdLossInit::default()).is_ok());
        Ok(())
    }

    #[test]
    fn multi_layer_prior_box() -> Result<()> {
        let mut program = Program::new();
        let image = program.data("image", DataType::F32)?;
        let feature_a = program.data("feature_a", DataType::F32)?;
        let feature_b = program.data("feature_b", DataType::F32)?;

        let init = PriorBoxInit::new(
            2,
            PriorSizes::Explicit {
                min_sizes: vec![vec![30.0], vec![60.0]],
                max_sizes: vec![vec![60.0], vec![90.0]],
            },
        );
        let (boxes, variances) = prior_box(&mut program, &[feature_a, feature_b], image, init)?;

        let mut scope = Scope::new();
        scope.feed(image, LodTensor::new(ArrayD::<f32>::zeros(IxDyn(&[1, 3, 96, 96]))));
        scope.feed(feature_a, LodTensor::new(ArrayD::<f32>::zeros(IxDyn(&[1, 8, 4, 4]))));
        scope.feed(feature_b, LodTensor::new(ArrayD::<f32>::zeros(IxDyn(&[1, 8, 2, 2]))));
        Executor::new().run(&program, &mut scope)?;

        assert_eq!(scope.get(boxes)?.shape(), &[(16 + 4) * 2, 4]);
        assert_eq!(scope.get(variances)?.shape(), &[(16 + 4) * 2, 4]);

        let init = PriorBoxInit::new(
            3,
            PriorSizes::Ratio {
                min_ratio: 20,
                max_ratio: 90,
                base_size: 300.0,
            },
        );
        let err = prior_box(&mut program, &[feature_a, feature_b], image, init).unwrap_err();
        assert!(err.downcast_ref::<SsdError>().unwrap().is_config());
        Ok(())
    }

    #[test]
    fn detection_output_graph() -> Result<()> {
        let mut program = Program::new();
        let scores = program.data("scores", DataType::F32)?;
        let loc = program.data("loc", DataType::F32)?;
        let prior = program.data("prior_box", DataType::F32)?;
        let out = detection_output(
            &mut program,
            scores,
            loc,
            prior,
            None,
            MulticlassNmsInit::default(),
        )?;

        let mut scope = Scope::new();
        scope.feed(scores, LodTensor::new(array![[[0.1f32, 0.1], [0.9, 0.8]]]));
        scope.feed(loc, LodTensor::new(Array3::<f32>::zeros((1, 2, 4))));
        scope.feed(
            prior,
            LodTensor::new(array![[0.0f32, 0.0, 0.4, 0.4], [0.5, 0.5, 1.0, 1.0]]),
        );
        Executor::new().run(&program, &mut scope)?;

        let out = scope.get(out)?;
        assert_eq!(out.lod.as_ref().map(Lod::offsets), Some(&[0, 2][..]));
        let rows = out.view::<f32, Ix2>()?;
        assert_eq!(rows.row(0).to_vec(), vec![1.0, 0.9, 0.0, 0.0, 0.4, 0.4]);
        Ok(())
    }
}
