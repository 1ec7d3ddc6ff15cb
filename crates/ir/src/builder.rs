//! Append-style construction of unit bodies.

use primitive_types::U256;
use smallvec::SmallVec;

use crate::{
    dialect::Dialect, BlockId, BuiltinRef, FuncRef, Function, OpKind, Operation, Value, ValueId,
};

/// Builds the body of one [`Function`] block by block.
pub struct FunctionBuilder<'a> {
    func: &'a mut Function,
    dialect: &'a Dialect,
    current: Option<BlockId>,
}

impl<'a> FunctionBuilder<'a> {
    pub fn new(func: &'a mut Function, dialect: &'a Dialect) -> Self {
        Self {
            func,
            dialect,
            current: None,
        }
    }

    pub fn make_block(&mut self) -> BlockId {
        self.func.dfg.make_block()
    }

    pub fn switch_to_block(&mut self, block: BlockId) {
        self.current = Some(block);
    }

    pub fn arg(&self, idx: usize) -> ValueId {
        self.func.arg_values[idx]
    }

    pub fn make_imm(&mut self, imm: impl Into<U256>) -> ValueId {
        self.func.dfg.make_imm_value(imm)
    }

    pub fn make_unreachable(&mut self) -> ValueId {
        self.func.dfg.make_value(Value::Unreachable)
    }

    pub fn builtin(&mut self, builtin: BuiltinRef, args: &[ValueId]) -> SmallVec<[ValueId; 2]> {
        let data = self.dialect.builtin(builtin);
        assert_eq!(args.len(), data.inputs, "arity mismatch for `{}`", data.name);

        let outputs: SmallVec<[ValueId; 2]> = (0..data.outputs)
            .map(|_| self.func.dfg.make_value(Value::Inst))
            .collect();
        self.append(Operation {
            inputs: args.iter().copied().collect(),
            outputs: outputs.clone(),
            kind: OpKind::Builtin(builtin),
        });
        outputs
    }

    /// Appends a call to `callee`. The callee's return arity is not
    /// recoverable from this builder, so it is passed explicitly.
    pub fn call(
        &mut self,
        callee: FuncRef,
        args: &[ValueId],
        ret_count: usize,
    ) -> SmallVec<[ValueId; 2]> {
        let outputs: SmallVec<[ValueId; 2]> = (0..ret_count)
            .map(|_| self.func.dfg.make_value(Value::Inst))
            .collect();
        self.append(Operation {
            inputs: args.iter().copied().collect(),
            outputs: outputs.clone(),
            kind: OpKind::Call(callee),
        });
        outputs
    }

    /// Appends an operation that materializes `value`, which must be a
    /// literal or unreachable definition.
    pub fn materialize(&mut self, value: ValueId) {
        assert!(
            !self.func.dfg.value(value).is_ordinary(),
            "cannot materialize ordinary value {value}"
        );
        self.append(Operation {
            inputs: SmallVec::new(),
            outputs: [value].into_iter().collect(),
            kind: OpKind::Assign,
        });
    }

    pub fn jump(&mut self, dest: BlockId) {
        self.append(Operation {
            inputs: SmallVec::new(),
            outputs: SmallVec::new(),
            kind: OpKind::Jump(dest),
        });
    }

    pub fn branch(&mut self, cond: ValueId, nz: BlockId, z: BlockId) {
        self.append(Operation {
            inputs: [cond].into_iter().collect(),
            outputs: SmallVec::new(),
            kind: OpKind::Branch { nz, z },
        });
    }

    pub fn ret(&mut self, vals: &[ValueId]) {
        self.append(Operation {
            inputs: vals.iter().copied().collect(),
            outputs: SmallVec::new(),
            kind: OpKind::Return,
        });
    }

    fn append(&mut self, op: Operation) {
        let block = self.current.expect("no current block");
        debug_assert!(
            !self
                .func
                .dfg
                .block(block)
                .ops
                .last()
                .is_some_and(|last| last.is_terminator(self.dialect)),
            "appending to a terminated block"
        );
        self.func.dfg.block_mut(block).ops.push(op);
    }
}

#[cfg(test)]
mod tests {
    use super::FunctionBuilder;
    use crate::{Dialect, Function, OpKind, Signature, Value};

    #[test]
    fn build_branching_body() {
        let dialect = Dialect::evm();
        let mut func = Function::new(Signature::new("f", 2, 1));
        let mut builder = FunctionBuilder::new(&mut func, &dialect);

        let b0 = builder.make_block();
        let b1 = builder.make_block();
        let b2 = builder.make_block();

        builder.switch_to_block(b0);
        let lt = dialect.lookup("lt").unwrap();
        let cond = builder.builtin(lt, &[builder.arg(0), builder.arg(1)])[0];
        builder.branch(cond, b1, b2);

        builder.switch_to_block(b1);
        builder.ret(&[builder.arg(0)]);

        builder.switch_to_block(b2);
        builder.ret(&[builder.arg(1)]);

        assert_eq!(func.dfg.num_blocks(), 3);
        assert_eq!(func.entry_block(), b0);

        let ops = &func.dfg.block(b0).ops;
        assert_eq!(ops.len(), 2);
        assert_eq!(ops[0].kind, OpKind::Builtin(lt));
        assert_eq!(ops[0].outputs.as_slice(), &[cond]);
        assert_eq!(ops[1].kind, OpKind::Branch { nz: b1, z: b2 });
        assert_eq!(ops[1].branch_dests().as_slice(), &[b1, b2]);

        assert!(matches!(func.dfg.value(cond), Value::Inst));
    }

    #[test]
    fn immediates_are_interned() {
        let dialect = Dialect::evm();
        let mut func = Function::new(Signature::new("g", 0, 0));
        let mut builder = FunctionBuilder::new(&mut func, &dialect);

        let a = builder.make_imm(42u64);
        let b = builder.make_imm(42u64);
        let c = builder.make_imm(43u64);
        assert_eq!(a, b);
        assert_ne!(a, c);
    }
}
