use super::DataType;
use crate::{
    common::*,
    ops::{CodeType, HardNegativeMiner, MatchType, MulticlassNms, PriorBoxAttrs},
};

/// Handle of a variable in a [Program](super::Program).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VarId(pub(crate) usize);

impl VarId {
    pub fn index(&self) -> usize {
        self.0
    }
}

impl fmt::Display for VarId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "var#{}", self.0)
    }
}

/// Operator kinds known to the graph.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    EnumString,
    AsRefStr,
    Display,
    EnumIter,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum OpKind {
    IouSimilarity,
    BoxCoder,
    BipartiteMatch,
    TargetAssign,
    MineHardExamples,
    SoftmaxWithCrossEntropy,
    SmoothL1,
    Reshape,
    Cast,
    ElementwiseMul,
    WeightedSum,
    PriorBox,
    Concat,
    MulticlassNms,
}

/// Variables bound to the slots of an operator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpSlots {
    pub inputs: Vec<(&'static str, Vec<VarId>)>,
    pub outputs: Vec<(&'static str, Vec<VarId>)>,
}

impl OpSlots {
    pub fn input(&self, name: &str) -> &[VarId] {
        Self::find(&self.inputs, name)
    }

    pub fn output(&self, name: &str) -> &[VarId] {
        Self::find(&self.outputs, name)
    }

    fn find<'a>(slots: &'a [(&'static str, Vec<VarId>)], name: &str) -> &'a [VarId] {
        slots
            .iter()
            .find(|(slot, _)| *slot == name)
            .map(|(_, vars)| vars.as_slice())
            .unwrap_or(&[])
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct IouSimilarityOp {
    pub x: VarId,
    pub y: VarId,
    pub out: VarId,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BoxCoderOp {
    pub prior_box: VarId,
    pub prior_box_var: Option<VarId>,
    pub target_box: VarId,
    pub output_box: VarId,
    pub code_type: CodeType,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BipartiteMatchOp {
    pub dist_mat: VarId,
    pub match_indices: VarId,
    pub match_dist: VarId,
    pub match_type: MatchType,
    pub dist_threshold: f32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TargetAssignOp {
    pub x: VarId,
    pub match_indices: VarId,
    pub neg_indices: Option<VarId>,
    pub out: VarId,
    pub out_weight: VarId,
    /// Converted to the element type of `x`.
    pub mismatch_value: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MineHardExamplesOp {
    pub cls_loss: VarId,
    pub match_indices: VarId,
    pub match_dist: VarId,
    pub neg_indices: VarId,
    pub updated_match_indices: VarId,
    pub miner: HardNegativeMiner,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SoftmaxWithCrossEntropyOp {
    pub logits: VarId,
    pub label: VarId,
    pub loss: VarId,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SmoothL1Op {
    pub x: VarId,
    pub y: VarId,
    pub out: VarId,
    pub sigma: f32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReshapeOp {
    pub x: VarId,
    pub out: VarId,
    /// Target shape, where at most one `-1` is inferred.
    pub shape: Vec<isize>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CastOp {
    pub x: VarId,
    pub out: VarId,
    pub dtype: DataType,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ElementwiseMulOp {
    pub x: VarId,
    pub y: VarId,
    pub out: VarId,
}

#[derive(Debug, Clone, PartialEq)]
pub struct WeightedSumOp {
    pub inputs: Vec<VarId>,
    pub weights: Vec<f32>,
    pub out: VarId,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PriorBoxOp {
    /// `[N, C, H, W]` feature map.
    pub input: VarId,
    /// `[N, C, H, W]` image.
    pub image: VarId,
    pub boxes: VarId,
    pub variances: VarId,
    pub attrs: PriorBoxAttrs,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConcatOp {
    pub inputs: Vec<VarId>,
    pub out: VarId,
}

#[derive(Debug, Clone)]
pub struct MulticlassNmsOp {
    pub scores: VarId,
    pub bboxes: VarId,
    pub out: VarId,
    pub nms: MulticlassNms,
}

/// An operator with its variables and attributes.
#[derive(Debug, Clone)]
pub enum Operator {
    IouSimilarity(IouSimilarityOp),
    BoxCoder(BoxCoderOp),
    BipartiteMatch(BipartiteMatchOp),
    TargetAssign(TargetAssignOp),
    MineHardExamples(MineHardExamplesOp),
    SoftmaxWithCrossEntropy(SoftmaxWithCrossEntropyOp),
    SmoothL1(SmoothL1Op),
    Reshape(ReshapeOp),
    Cast(CastOp),
    ElementwiseMul(ElementwiseMulOp),
    WeightedSum(WeightedSumOp),
    PriorBox(PriorBoxOp),
    Concat(ConcatOp),
    MulticlassNms(MulticlassNmsOp),
}

impl Operator {
    pub fn kind(&self) -> OpKind {
        match self {
            Self::IouSimilarity(_) => OpKind::IouSimilarity,
            Self::BoxCoder(_) => OpKind::BoxCoder,
            Self::BipartiteMatch(_) => OpKind::BipartiteMatch,
            Self::TargetAssign(_) => OpKind::TargetAssign,
            Self::MineHardExamples(_) => OpKind::MineHardExamples,
            Self::SoftmaxWithCrossEntropy(_) => OpKind::SoftmaxWithCrossEntropy,
            Self::SmoothL1(_) => OpKind::SmoothL1,
            Self::Reshape(_) => OpKind::Reshape,
            Self::Cast(_) => OpKind::Cast,
            Self::ElementwiseMul(_) => OpKind::ElementwiseMul,
            Self::WeightedSum(_) => OpKind::WeightedSum,
            Self::PriorBox(_) => OpKind::PriorBox,
            Self::Concat(_) => OpKind::Concat,
            Self::MulticlassNms(_) => OpKind::MulticlassNms,
        }
    }

    /// Binds the variables of this operator to the slot names of its kind.
    pub fn slots(&self) -> OpSlots {
        let (inputs, outputs) = match self {
            Self::IouSimilarity(op) => (
                vec![("X", vec![op.x]), ("Y", vec![op.y])],
                vec![("Out", vec![op.out])],
            ),
            Self::BoxCoder(op) => (
                vec![
                    ("PriorBox", vec![op.prior_box]),
                    ("PriorBoxVar", op.prior_box_var.into_iter().collect()),
                    ("TargetBox", vec![op.target_box]),
                ],
                vec![("OutputBox", vec![op.output_box])],
            ),
            Self::BipartiteMatch(op) => (
                vec![("DistMat", vec![op.dist_mat])],
                vec![
                    ("ColToRowMatchIndices", vec![op.match_indices]),
                    ("ColToRowMatchDist", vec![op.match_dist]),
                ],
            ),
            Self::TargetAssign(op) => (
                vec![
                    ("X", vec![op.x]),
                    ("MatchIndices", vec![op.match_indices]),
                    ("NegIndices", op.neg_indices.into_iter().collect()),
                ],
                vec![("Out", vec![op.out]), ("OutWeight", vec![op.out_weight])],
            ),
            Self::MineHardExamples(op) => (
                vec![
                    ("ClsLoss", vec![op.cls_loss]),
                    ("MatchIndices", vec![op.match_indices]),
                    ("MatchDist", vec![op.match_dist]),
                ],
                vec![
                    ("NegIndices", vec![op.neg_indices]),
                    ("UpdatedMatchIndices", vec![op.updated_match_indices]),
                ],
            ),
            Self::SoftmaxWithCrossEntropy(op) => (
                vec![("Logits", vec![op.logits]), ("Label", vec![op.label])],
                vec![("Loss", vec![op.loss])],
            ),
            Self::SmoothL1(op) => (
                vec![("X", vec![op.x]), ("Y", vec![op.y])],
                vec![("Out", vec![op.out])],
            ),
            Self::Reshape(op) => (vec![("X", vec![op.x])], vec![("Out", vec![op.out])]),
            Self::Cast(op) => (vec![("X", vec![op.x])], vec![("Out", vec![op.out])]),
            Self::ElementwiseMul(op) => (
                vec![("X", vec![op.x]), ("Y", vec![op.y])],
                vec![("Out", vec![op.out])],
            ),
            Self::WeightedSum(op) => (
                vec![("X", op.inputs.clone())],
                vec![("Out", vec![op.out])],
            ),
            Self::PriorBox(op) => (
                vec![("Input", vec![op.input]), ("Image", vec![op.image])],
                vec![
                    ("Boxes", vec![op.boxes]),
                    ("Variances", vec![op.variances]),
                ],
            ),
            Self::Concat(op) => (vec![("X", op.inputs.clone())], vec![("Out", vec![op.out])]),
            Self::MulticlassNms(op) => (
                vec![("Scores", vec![op.scores]), ("BBoxes", vec![op.bboxes])],
                vec![("Out", vec![op.out])],
            ),
        };

        OpSlots { inputs, outputs }
    }
}

macro_rules! impl_from_op {
    ($($op:ident => $variant:ident),* $(,)?) => {
        $(
            impl From<$op> for Operator {
                fn from(from: $op) -> Self {
                    Self::$variant(from)
                }
            }
        )*
    };
}

impl_from_op! {
    IouSimilarityOp => IouSimilarity,
    BoxCoderOp => BoxCoder,
    BipartiteMatchOp => BipartiteMatch,
    TargetAssignOp => TargetAssign,
    MineHardExamplesOp => MineHardExamples,
    SoftmaxWithCrossEntropyOp => SoftmaxWithCrossEntropy,
    SmoothL1Op => SmoothL1,
    ReshapeOp => Reshape,
    CastOp => Cast,
    ElementwiseMulOp => ElementwiseMul,
    WeightedSumOp => WeightedSum,
    PriorBoxOp => PriorBox,
    ConcatOp => Concat,
    MulticlassNmsOp => MulticlassNms,
}
