use super::{DataType, LodTensor, Operator, Program, TensorData, TensorElement, VarId};
use crate::{
    common::*,
    ops::{
        bipartite_match, box_coder, detections_to_array, elementwise_mul, iou_similarity,
        prior_box, smooth_l1, softmax_with_cross_entropy, target_assign, weighted_sum,
        MatchOutput, MiningOutput, NegativeIndices, PriorBoxOutput, TargetAssignOutput,
    },
};

/// Run-time values of program variables.
#[derive(Debug, Clone, Default)]
pub struct Scope {
    tensors: HashMap<VarId, LodTensor>,
}

impl Scope {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the value of a variable, replacing the previous one.
    pub fn feed(&mut self, var: VarId, tensor: LodTensor) {
        self.tensors.insert(var, tensor);
    }

    pub fn get(&self, var: VarId) -> Result<&LodTensor> {
        self.tensors
            .get(&var)
            .ok_or_else(|| format_err!("{} has no value", var))
    }

    pub fn take(&mut self, var: VarId) -> Result<LodTensor> {
        self.tensors
            .remove(&var)
            .ok_or_else(|| format_err!("{} has no value", var))
    }

    pub fn contains(&self, var: VarId) -> bool {
        self.tensors.contains_key(&var)
    }
}

/// Evaluates programs operator by operator.
#[derive(Debug, Clone, Copy, Default)]
pub struct Executor;

impl Executor {
    pub fn new() -> Self {
        Self
    }

    /// Runs every operator of `program` in order, reading the fed data from
    /// `scope` and writing the produced variables into it.
    pub fn run(&self, program: &Program, scope: &mut Scope) -> Result<()> {
        for (index, desc) in program.vars().iter().enumerate() {
            if !desc.is_data() {
                continue;
            }
            let tensor = scope.get(VarId(index)).map_err(|_| {
                SsdError::Config(format!("data '{}' is not fed", desc.name()))
            })?;
            ensure_shape!(
                tensor.dtype() == desc.dtype(),
                "data '{}' is declared as {}, but fed with {}",
                desc.name(),
                desc.dtype(),
                tensor.dtype()
            );
            if let Some(shape) = desc.shape() {
                let matches = shape.len() == tensor.shape().len()
                    && izip!(shape, tensor.shape())
                        .all(|(&expect, &dim)| expect < 0 || expect as usize == dim);
                ensure_shape!(
                    matches,
                    "data '{}' is declared with shape {:?}, but fed with {:?}",
                    desc.name(),
                    shape,
                    tensor.shape()
                );
            }
        }

        for (index, op) in program.ops().iter().enumerate() {
            let outputs = self
                .run_op(op, scope)
                .with_context(|| format!("failed to run {} (op #{})", op.kind(), index))?;
            outputs
                .into_iter()
                .for_each(|(var, tensor)| scope.feed(var, tensor));
        }

        Ok(())
    }

    fn run_op(&self, op: &Operator, scope: &Scope) -> Result<Vec<(VarId, LodTensor)>> {
        let outputs = match op {
            Operator::IouSimilarity(op) => {
                let x = scope.get(op.x)?;
                let y = scope.get(op.y)?;
                let out = iou_similarity(x.view()?, y.view()?)?;
                vec![(op.out, with_lod(out, x.lod.clone()))]
            }
            Operator::BoxCoder(op) => {
                let prior_box = scope.get(op.prior_box)?.view()?;
                let prior_box_var = op
                    .prior_box_var
                    .map(|var| scope.get(var)?.view())
                    .transpose()?;
                let target_box = scope.get(op.target_box)?;
                let out = box_coder(op.code_type, prior_box, prior_box_var, target_box.view()?)?;
                vec![(op.output_box, with_lod(out, target_box.lod.clone()))]
            }
            Operator::BipartiteMatch(op) => {
                let dist = scope.get(op.dist_mat)?;
                let MatchOutput {
                    match_indices,
                    match_dist,
                } = bipartite_match(
                    dist.view()?,
                    dist.lod.as_ref(),
                    op.match_type,
                    op.dist_threshold,
                )?;
                vec![
                    (op.match_indices, LodTensor::new(match_indices)),
                    (op.match_dist, LodTensor::new(match_dist)),
                ]
            }
            Operator::TargetAssign(op) => {
                let x = scope.get(op.x)?;
                let match_indices = scope.get(op.match_indices)?.view()?;
                let neg_indices = op
                    .neg_indices
                    .map(|var| negative_indices(scope.get(var)?))
                    .transpose()?;
                let neg_indices = neg_indices.as_ref();
                let mismatch_value = op.mismatch_value;

                let (out, out_weight) = match x.dtype() {
                    DataType::F32 => {
                        assign_typed(x, match_indices, neg_indices, mismatch_value as f32)?
                    }
                    DataType::I32 => {
                        assign_typed(x, match_indices, neg_indices, mismatch_value as i32)?
                    }
                    DataType::I64 => assign_typed(x, match_indices, neg_indices, mismatch_value)?,
                };
                vec![
                    (op.out, LodTensor::new(out)),
                    (op.out_weight, LodTensor::new(out_weight)),
                ]
            }
            Operator::MineHardExamples(op) => {
                let MiningOutput {
                    neg_indices,
                    updated_match_indices,
                } = op.miner.mine(
                    scope.get(op.cls_loss)?.view()?,
                    scope.get(op.match_indices)?.view()?,
                    scope.get(op.match_dist)?.view()?,
                )?;

                let indices: Vec<i32> =
                    neg_indices.indices().iter().map(|&index| index as i32).collect();
                let indices = Array2::from_shape_vec((indices.len(), 1), indices)?;
                vec![
                    (
                        op.neg_indices,
                        LodTensor::with_lod(indices, neg_indices.lod().clone())?,
                    ),
                    (
                        op.updated_match_indices,
                        LodTensor::new(updated_match_indices),
                    ),
                ]
            }
            Operator::SoftmaxWithCrossEntropy(op) => {
                let logits = scope.get(op.logits)?;
                let label = scope.get(op.label)?;
                let loss = softmax_with_cross_entropy(logits.view()?, label.view()?)?;
                vec![(op.loss, with_lod(loss, logits.lod.clone()))]
            }
            Operator::SmoothL1(op) => {
                let x = scope.get(op.x)?;
                let y = scope.get(op.y)?;
                let out = smooth_l1(x.view()?, y.view()?, op.sigma)?;
                vec![(op.out, with_lod(out, x.lod.clone()))]
            }
            Operator::Reshape(op) => {
                let x = scope.get(op.x)?;
                let shape = infer_shape(x.shape(), &op.shape)?;
                let data = x.data.reshape(&shape)?;
                let lod = x
                    .lod
                    .clone()
                    .filter(|_| shape.first() == x.shape().first());
                vec![(op.out, LodTensor { data, lod })]
            }
            Operator::Cast(op) => {
                let x = scope.get(op.x)?;
                vec![(
                    op.out,
                    LodTensor {
                        data: x.data.cast(op.dtype),
                        lod: x.lod.clone(),
                    },
                )]
            }
            Operator::ElementwiseMul(op) => {
                let x = scope.get(op.x)?;
                let y = scope.get(op.y)?;
                let out = elementwise_mul(x.view()?, y.view()?)?;
                vec![(op.out, with_lod(out, x.lod.clone()))]
            }
            Operator::WeightedSum(op) => {
                let inputs: Vec<ArrayView2<'_, f32>> = op
                    .inputs
                    .iter()
                    .map(|&var| scope.get(var)?.view())
                    .collect::<Result<_>>()?;
                let out = weighted_sum(&inputs, &op.weights)?;
                vec![(op.out, LodTensor::new(out))]
            }
            Operator::PriorBox(op) => {
                let feature_size = spatial_size(scope.get(op.input)?.shape(), "prior box input")?;
                let image_size = spatial_size(scope.get(op.image)?.shape(), "prior box image")?;
                let PriorBoxOutput { boxes, variances } =
                    prior_box(feature_size, image_size, &op.attrs)?;
                vec![
                    (op.boxes, LodTensor::new(boxes)),
                    (op.variances, LodTensor::new(variances)),
                ]
            }
            Operator::Concat(op) => {
                let inputs: Vec<&LodTensor> = op
                    .inputs
                    .iter()
                    .map(|&var| scope.get(var))
                    .collect::<Result<_>>()?;
                let dtype = inputs[0].dtype();
                let out = match dtype {
                    DataType::F32 => concat_typed::<f32>(&inputs)?,
                    DataType::I32 => concat_typed::<i32>(&inputs)?,
                    DataType::I64 => concat_typed::<i64>(&inputs)?,
                };
                vec![(op.out, LodTensor::new(out))]
            }
            Operator::MulticlassNms(op) => {
                let detections = op.nms.forward(
                    scope.get(op.bboxes)?.view()?,
                    scope.get(op.scores)?.view()?,
                )?;
                let (out, lod) = detections_to_array(&detections);
                vec![(op.out, LodTensor::with_lod(out, lod)?)]
            }
        };

        Ok(outputs)
    }
}

fn with_lod<T, D>(array: Array<T, D>, lod: Option<Lod>) -> LodTensor
where
    T: TensorElement,
    D: Dimension,
{
    let num_rows = array.shape().first().cloned();
    LodTensor {
        data: array.into(),
        lod: lod.filter(|lod| Some(lod.total_len()) == num_rows),
    }
}

fn negative_indices(tensor: &LodTensor) -> Result<NegativeIndices> {
    let view: ArrayView2<'_, i32> = tensor.view()?;
    ensure_shape!(
        view.ncols() == 1,
        "expect negative indices of shape [Neg, 1], but got {:?}",
        view.shape()
    );
    let indices: Vec<usize> = view
        .iter()
        .map(|&index| -> Result<usize> {
            ensure_shape!(index >= 0, "negative index {} is invalid", index);
            Ok(index as usize)
        })
        .collect::<Result<_>>()?;
    NegativeIndices::new(indices, tensor.lod_or_single())
}

fn assign_typed<T>(
    x: &LodTensor,
    match_indices: ArrayView2<'_, i32>,
    neg_indices: Option<&NegativeIndices>,
    mismatch_value: T,
) -> Result<(TensorData, Array3<f32>)>
where
    T: TensorElement,
{
    let TargetAssignOutput { out, out_weight } = target_assign(
        x.view::<T, Ix3>()?,
        &x.lod_or_single(),
        match_indices,
        neg_indices,
        mismatch_value,
    )?;
    Ok((out.into(), out_weight))
}

fn concat_typed<T>(inputs: &[&LodTensor]) -> Result<TensorData>
where
    T: TensorElement,
{
    let views: Vec<ArrayViewD<'_, T>> = inputs
        .iter()
        .map(|tensor| tensor.view::<T, IxDyn>())
        .collect::<Result<_>>()?;
    let out = ndarray::concatenate(Axis(0), &views)
        .map_err(|err| SsdError::Shape(format!("cannot concatenate: {}", err)))?;
    Ok(out.into())
}

/// Resolves a target shape with at most one inferred `-1` dimension.
fn infer_shape(input: &[usize], target: &[isize]) -> Result<Vec<usize>> {
    let num_elements: usize = input.iter().product();
    let num_inferred = target.iter().filter(|&&dim| dim == -1).count();
    ensure_shape!(
        num_inferred <= 1 && target.iter().all(|&dim| dim >= -1),
        "invalid target shape {:?}",
        target
    );

    let known: usize = target
        .iter()
        .filter(|&&dim| dim >= 0)
        .map(|&dim| dim as usize)
        .product();
    let inferred = if num_inferred == 1 {
        ensure_shape!(
            known > 0 && num_elements % known == 0,
            "cannot reshape {:?} into {:?}",
            input,
            target
        );
        num_elements / known
    } else {
        0
    };

    let shape: Vec<usize> = target
        .iter()
        .map(|&dim| if dim == -1 { inferred } else { dim as usize })
        .collect();
    ensure_shape!(
        shape.iter().product::<usize>() == num_elements,
        "cannot reshape {:?} into {:?}",
        input,
        target
    );
    Ok(shape)
}

/// Extracts `[h, w]` of a `[N, C, H, W]` shape.
fn spatial_size(shape: &[usize], what: &str) -> Result<[usize; 2]> {
    ensure_shape!(
        shape.len() == 4,
        "expect {} in [N, C, H, W] layout, but got shape {:?}",
        what,
        shape
    );
    Ok([shape[2], shape[3]])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{ConcatOp, ReshapeOp, TargetAssignOp};
    use ndarray::array;

    #[test]
    fn infer_reshape_shape() -> Result<()> {
        assert_eq!(infer_shape(&[2, 3, 4], &[-1, 4])?, vec![6, 4]);
        assert_eq!(infer_shape(&[2, 3], &[3, 2])?, vec![3, 2]);
        assert!(infer_shape(&[2, 3], &[-1, 4]).is_err());
        assert!(infer_shape(&[2, 3], &[-1, -1]).is_err());
        Ok(())
    }

    #[test]
    fn reshape_keeps_lod_of_rows() -> Result<()> {
        let mut program = Program::new();
        let x = program.data("x", DataType::I64)?;
        let rows = program.create_tmp_variable(DataType::I64);
        let flat = program.create_tmp_variable(DataType::I64);
        program.append_op(ReshapeOp {
            x,
            out: rows,
            shape: vec![-1, 1, 1],
        })?;
        program.append_op(ReshapeOp {
            x,
            out: flat,
            shape: vec![1, -1],
        })?;

        let mut scope = Scope::new();
        let lod = Lod::from_lengths([2, 1]);
        scope.feed(x, LodTensor::with_lod(array![[1i64], [2], [3]], lod.clone())?);
        Executor::new().run(&program, &mut scope)?;

        let rows = scope.get(rows)?;
        assert_eq!(rows.shape(), &[3, 1, 1]);
        assert_eq!(rows.lod, Some(lod));
        assert_eq!(scope.get(flat)?.lod, None);
        Ok(())
    }

    #[test]
    fn target_assign_dispatches_on_dtype() -> Result<()> {
        let mut program = Program::new();
        let x = program.data("x", DataType::I32)?;
        let match_indices = program.data("match_indices", DataType::I32)?;
        let out = program.create_tmp_variable(DataType::I32);
        let out_weight = program.create_tmp_variable(DataType::F32);
        program.append_op(TargetAssignOp {
            x,
            match_indices,
            neg_indices: None,
            out,
            out_weight,
            mismatch_value: 7,
        })?;

        let mut scope = Scope::new();
        scope.feed(x, LodTensor::with_lod(array![[[1i32]], [[2]]], Lod::single(2))?);
        scope.feed(match_indices, LodTensor::new(array![[1i32, -1]]));
        Executor::new().run(&program, &mut scope)?;

        assert_eq!(
            scope.take(out)?.view::<i32, Ix3>()?,
            array![[[2], [7]]]
        );
        Ok(())
    }

    #[test]
    fn feeds_are_checked() -> Result<()> {
        let mut program = Program::new();
        let a = program.data_with_shape("a", DataType::F32, &[-1, 4])?;
        let b = program.data("b", DataType::F32)?;
        let out = program.create_tmp_variable(DataType::F32);
        program.append_op(ConcatOp {
            inputs: vec![a, b],
            out,
        })?;

        let mut scope = Scope::new();
        scope.feed(a, LodTensor::new(Array2::<f32>::zeros((2, 4))));
        let err = Executor::new().run(&program, &mut scope).unwrap_err();
        assert!(err.downcast_ref::<SsdError>().unwrap().is_config());

        scope.feed(b, LodTensor::new(Array2::<i64>::zeros((1, 4))));
        let err = Executor::new().run(&program, &mut scope).unwrap_err();
        assert!(err.downcast_ref::<SsdError>().unwrap().is_shape());

        scope.feed(b, LodTensor::new(Array2::<f32>::ones((1, 4))));
        Executor::new().run(&program, &mut scope)?;
        assert_eq!(scope.get(out)?.shape(), &[3, 4]);

        scope.feed(a, LodTensor::new(Array2::<f32>::zeros((2, 3))));
        assert!(Executor::new().run(&program, &mut scope).is_err());
        Ok(())
    }
}
