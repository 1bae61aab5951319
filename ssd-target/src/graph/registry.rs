use super::{DataType, OpKind};
use crate::common::*;

/// Element type constraint of a slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotDtype {
    Any,
    OneOf(&'static [DataType]),
    /// Same as the first variable of the named input slot.
    SameAs(&'static str),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotSchema {
    pub name: &'static str,
    pub dtype: SlotDtype,
    /// The slot may be left empty.
    pub dispensable: bool,
    /// The slot may take more than one variable.
    pub duplicable: bool,
}

impl SlotSchema {
    const fn new(name: &'static str, dtype: SlotDtype) -> Self {
        Self {
            name,
            dtype,
            dispensable: false,
            duplicable: false,
        }
    }

    const fn dispensable(self) -> Self {
        Self {
            dispensable: true,
            ..self
        }
    }

    const fn duplicable(self) -> Self {
        Self {
            duplicable: true,
            ..self
        }
    }
}

/// Input and output slots of an operator kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpSchema {
    pub kind: OpKind,
    pub inputs: Vec<SlotSchema>,
    pub outputs: Vec<SlotSchema>,
}

const FLOAT: SlotDtype = SlotDtype::OneOf(&[DataType::F32]);
const INT32: SlotDtype = SlotDtype::OneOf(&[DataType::I32]);
const LABEL: SlotDtype = SlotDtype::OneOf(&[DataType::I64]);

lazy_static! {
    /// Slot schemas of every operator kind.
    pub static ref OP_REGISTRY: IndexMap<OpKind, OpSchema> = {
        use SlotDtype::*;
        let slot = SlotSchema::new;

        let schemas = vec![
            (
                OpKind::IouSimilarity,
                vec![slot("X", FLOAT), slot("Y", FLOAT)],
                vec![slot("Out", FLOAT)],
            ),
            (
                OpKind::BoxCoder,
                vec![
                    slot("PriorBox", FLOAT),
                    slot("PriorBoxVar", FLOAT).dispensable(),
                    slot("TargetBox", FLOAT),
                ],
                vec![slot("OutputBox", FLOAT)],
            ),
            (
                OpKind::BipartiteMatch,
                vec![slot("DistMat", FLOAT)],
                vec![
                    slot("ColToRowMatchIndices", INT32),
                    slot("ColToRowMatchDist", FLOAT),
                ],
            ),
            (
                OpKind::TargetAssign,
                vec![
                    slot("X", Any),
                    slot("MatchIndices", INT32),
                    slot("NegIndices", INT32).dispensable(),
                ],
                vec![slot("Out", SameAs("X")), slot("OutWeight", FLOAT)],
            ),
            (
                OpKind::MineHardExamples,
                vec![
                    slot("ClsLoss", FLOAT),
                    slot("MatchIndices", INT32),
                    slot("MatchDist", FLOAT),
                ],
                vec![
                    slot("NegIndices", INT32),
                    slot("UpdatedMatchIndices", INT32),
                ],
            ),
            (
                OpKind::SoftmaxWithCrossEntropy,
                vec![slot("Logits", FLOAT), slot("Label", LABEL)],
                vec![slot("Loss", FLOAT)],
            ),
            (
                OpKind::SmoothL1,
                vec![slot("X", FLOAT), slot("Y", FLOAT)],
                vec![slot("Out", FLOAT)],
            ),
            (
                OpKind::Reshape,
                vec![slot("X", Any)],
                vec![slot("Out", SameAs("X"))],
            ),
            (OpKind::Cast, vec![slot("X", Any)], vec![slot("Out", Any)]),
            (
                OpKind::ElementwiseMul,
                vec![slot("X", FLOAT), slot("Y", FLOAT)],
                vec![slot("Out", FLOAT)],
            ),
            (
                OpKind::WeightedSum,
                vec![slot("X", FLOAT).duplicable()],
                vec![slot("Out", FLOAT)],
            ),
            (
                OpKind::PriorBox,
                vec![slot("Input", Any), slot("Image", Any)],
                vec![slot("Boxes", FLOAT), slot("Variances", FLOAT)],
            ),
            (
                OpKind::Concat,
                vec![slot("X", Any).duplicable()],
                vec![slot("Out", SameAs("X"))],
            ),
            (
                OpKind::MulticlassNms,
                vec![slot("Scores", FLOAT), slot("BBoxes", FLOAT)],
                vec![slot("Out", FLOAT)],
            ),
        ];

        schemas
            .into_iter()
            .map(|(kind, inputs, outputs)| {
                (
                    kind,
                    OpSchema {
                        kind,
                        inputs,
                        outputs,
                    },
                )
            })
            .collect()
    };
}

/// Looks up the schema of `kind`.
pub fn op_schema(kind: OpKind) -> Result<&'static OpSchema> {
    OP_REGISTRY
        .get(&kind)
        .ok_or_else(|| format_err!("operator {} is not registered", kind))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_kind_is_registered() {
        for kind in OpKind::iter() {
            let schema = op_schema(kind).unwrap();
            assert_eq!(schema.kind, kind);
            assert!(!schema.outputs.is_empty());
        }
        assert_eq!(OP_REGISTRY.len(), OpKind::iter().count());
    }

    #[test]
    fn target_assign_slots() {
        let schema = op_schema(OpKind::TargetAssign).unwrap();
        let names: Vec<_> = schema.inputs.iter().map(|slot| slot.name).collect();
        assert_eq!(names, ["X", "MatchIndices", "NegIndices"]);
        assert!(schema.inputs[2].dispensable);
        assert_eq!(schema.outputs[0].dtype, SlotDtype::SameAs("X"));
    }
}
