use super::{op_schema, DataType, Operator, SlotDtype, SlotSchema, VarId};
use crate::common::*;

/// Declared variable of a program.
#[derive(Debug, Clone, PartialEq, Eq, Getters, CopyGetters)]
pub struct VarDesc {
    #[get = "pub"]
    name: String,
    #[get_copy = "pub"]
    dtype: DataType,
    /// Static shape where `-1` marks an unknown dimension.
    #[get = "pub"]
    shape: Option<Vec<isize>>,
    #[get_copy = "pub"]
    is_data: bool,
}

/// An append-only list of operators over declared variables.
///
/// Every variable is written once, either fed as data or produced by one
/// operator, and must be written before it is read.
#[derive(Debug, Clone, Default)]
pub struct Program {
    vars: Vec<VarDesc>,
    ops: Vec<Operator>,
    defined: HashSet<VarId>,
}

impl Program {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declares an input variable fed at run time.
    pub fn data(&mut self, name: &str, dtype: DataType) -> Result<VarId> {
        self.declare_data(name, dtype, None)
    }

    /// Declares an input variable with a static shape.
    pub fn data_with_shape(
        &mut self,
        name: &str,
        dtype: DataType,
        shape: &[isize],
    ) -> Result<VarId> {
        ensure_config!(
            shape.iter().all(|&dim| dim >= -1),
            "invalid shape {:?} of '{}'",
            shape,
            name
        );
        self.declare_data(name, dtype, Some(shape.to_vec()))
    }

    fn declare_data(
        &mut self,
        name: &str,
        dtype: DataType,
        shape: Option<Vec<isize>>,
    ) -> Result<VarId> {
        ensure_config!(
            self.var_by_name(name).is_none(),
            "variable '{}' is already declared",
            name
        );
        let id = self.push_var(name.to_string(), dtype, shape, true);
        self.defined.insert(id);
        Ok(id)
    }

    /// Declares an intermediate variable to be produced by an operator.
    pub fn create_tmp_variable(&mut self, dtype: DataType) -> VarId {
        let name = format!("tmp_{}", self.vars.len());
        self.push_var(name, dtype, None, false)
    }

    fn push_var(
        &mut self,
        name: String,
        dtype: DataType,
        shape: Option<Vec<isize>>,
        is_data: bool,
    ) -> VarId {
        let id = VarId(self.vars.len());
        self.vars.push(VarDesc {
            name,
            dtype,
            shape,
            is_data,
        });
        id
    }

    /// Records the static shape of an intermediate variable.
    pub fn set_shape(&mut self, id: VarId, shape: Vec<isize>) -> Result<()> {
        let desc = self.var_mut(id)?;
        ensure_config!(!desc.is_data, "the shape of data '{}' is fixed", desc.name);
        desc.shape = Some(shape);
        Ok(())
    }

    pub fn var(&self, id: VarId) -> Result<&VarDesc> {
        self.vars
            .get(id.0)
            .ok_or_else(|| SsdError::Config(format!("{} is not declared", id)).into())
    }

    fn var_mut(&mut self, id: VarId) -> Result<&mut VarDesc> {
        self.vars
            .get_mut(id.0)
            .ok_or_else(|| SsdError::Config(format!("{} is not declared", id)).into())
    }

    pub fn var_by_name(&self, name: &str) -> Option<VarId> {
        self.vars
            .iter()
            .position(|desc| desc.name == name)
            .map(VarId)
    }

    pub fn vars(&self) -> &[VarDesc] {
        &self.vars
    }

    pub fn ops(&self) -> &[Operator] {
        &self.ops
    }

    /// Appends an operator after checking its slots against the registry.
    pub fn append_op<O>(&mut self, op: O) -> Result<()>
    where
        O: Into<Operator>,
    {
        let op = op.into();
        let kind = op.kind();
        let schema = op_schema(kind)?;
        let slots = op.slots();

        for (name, _) in &slots.inputs {
            ensure_config!(
                schema.inputs.iter().any(|slot| slot.name == *name),
                "{} has no input slot '{}'",
                kind,
                name
            );
        }
        for (name, _) in &slots.outputs {
            ensure_config!(
                schema.outputs.iter().any(|slot| slot.name == *name),
                "{} has no output slot '{}'",
                kind,
                name
            );
        }

        for slot in &schema.inputs {
            let vars = slots.input(slot.name);
            self.check_arity(kind.as_ref(), slot, vars.len())?;

            for &var in vars {
                let desc = self.var(var)?;
                ensure_config!(
                    self.defined.contains(&var),
                    "input '{}' of {} is read before it is written",
                    desc.name,
                    kind
                );
                self.check_dtype(kind.as_ref(), slot, desc, &slots.inputs)?;
            }
        }

        for slot in &schema.outputs {
            let vars = slots.output(slot.name);
            self.check_arity(kind.as_ref(), slot, vars.len())?;

            for &var in vars {
                let desc = self.var(var)?;
                ensure_config!(
                    !self.defined.contains(&var),
                    "output '{}' of {} is already written",
                    desc.name,
                    kind
                );
                self.check_dtype(kind.as_ref(), slot, desc, &slots.inputs)?;
            }
        }

        let outputs: Vec<VarId> = slots
            .outputs
            .iter()
            .flat_map(|(_, vars)| vars.iter().cloned())
            .collect();
        let unique: HashSet<_> = outputs.iter().collect();
        ensure_config!(
            unique.len() == outputs.len(),
            "{} writes a variable twice",
            kind
        );
        self.defined.extend(outputs);

        debug!("append {} as op #{}", kind, self.ops.len());
        self.ops.push(op);
        Ok(())
    }

    fn check_arity(&self, op: &str, slot: &SlotSchema, len: usize) -> Result<()> {
        ensure_config!(
            len > 0 || slot.dispensable,
            "slot '{}' of {} is required",
            slot.name,
            op
        );
        ensure_config!(
            len <= 1 || slot.duplicable,
            "slot '{}' of {} takes one variable, but got {}",
            slot.name,
            op,
            len
        );
        Ok(())
    }

    fn check_dtype(
        &self,
        op: &str,
        slot: &SlotSchema,
        desc: &VarDesc,
        inputs: &[(&'static str, Vec<VarId>)],
    ) -> Result<()> {
        let expect = match slot.dtype {
            SlotDtype::Any => return Ok(()),
            SlotDtype::OneOf(dtypes) => dtypes.to_vec(),
            SlotDtype::SameAs(name) => {
                let source = inputs
                    .iter()
                    .find(|(slot, _)| *slot == name)
                    .and_then(|(_, vars)| vars.first())
                    .ok_or_else(|| format_err!("slot '{}' of {} has no source", name, op))?;
                vec![self.var(*source)?.dtype]
            }
        };

        ensure_config!(
            expect.contains(&desc.dtype),
            "slot '{}' of {} expects {:?}, but '{}' is {}",
            slot.name,
            op,
            expect,
            desc.name,
            desc.dtype
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{CastOp, IouSimilarityOp, ReshapeOp, WeightedSumOp};

    fn is_config_error(result: Result<()>) -> bool {
        result.unwrap_err().downcast_ref::<SsdError>().unwrap().is_config()
    }

    #[test]
    fn append_checks_dtypes() -> Result<()> {
        let mut program = Program::new();
        let x = program.data("x", DataType::F32)?;
        let y = program.data("y", DataType::I64)?;
        let out = program.create_tmp_variable(DataType::F32);

        assert!(is_config_error(program.append_op(IouSimilarityOp { x, y, out })));

        let y = program.data("y2", DataType::F32)?;
        program.append_op(IouSimilarityOp { x, y, out })?;
        assert_eq!(program.ops().len(), 1);
        Ok(())
    }

    #[test]
    fn variables_are_written_once() -> Result<()> {
        let mut program = Program::new();
        let x = program.data("x", DataType::F32)?;
        let tmp = program.create_tmp_variable(DataType::F32);
        let out = program.create_tmp_variable(DataType::F32);

        // tmp is never produced
        assert!(is_config_error(program.append_op(ReshapeOp {
            x: tmp,
            out,
            shape: vec![-1],
        })));
        // data cannot be overwritten
        assert!(is_config_error(program.append_op(CastOp {
            x,
            out: x,
            dtype: DataType::F32,
        })));

        program.append_op(ReshapeOp {
            x,
            out,
            shape: vec![-1],
        })?;
        assert!(is_config_error(program.append_op(ReshapeOp {
            x,
            out,
            shape: vec![-1],
        })));
        Ok(())
    }

    #[test]
    fn same_as_and_duplicable_slots() -> Result<()> {
        let mut program = Program::new();
        let x = program.data_with_shape("x", DataType::I64, &[-1, 1])?;
        assert_eq!(program.var(x)?.shape(), &Some(vec![-1, 1]));
        assert!(program.data("x", DataType::F32).is_err());

        let out = program.create_tmp_variable(DataType::F32);
        assert!(is_config_error(program.append_op(ReshapeOp {
            x,
            out,
            shape: vec![-1],
        })));

        let a = program.data("a", DataType::F32)?;
        let b = program.data("b", DataType::F32)?;
        let sum = program.create_tmp_variable(DataType::F32);
        program.append_op(WeightedSumOp {
            inputs: vec![a, b],
            weights: vec![1.0, 2.0],
            out: sum,
        })?;
        assert_eq!(program.var_by_name("b"), Some(b));
        Ok(())
    }
}
