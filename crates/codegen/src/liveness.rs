//! Compute the "liveness" of values in a control flow graph.
//!
//! Block-level sets are computed by backward path exploration: starting
//! from each use of a value, the CFG is traversed backwards until the
//! value's (unique) definition is reached, marking the value live-in and
//! live-out along the encountered paths.
//!
//! On top of the block-level sets, [`Liveness::op_live_outs`] exposes the
//! record the stack scheduler consumes: for every block, one live-out set
//! per operation, aligned one-to-one with the block's operation list.
//! Literal and unreachable values are not tracked; literals can be
//! rematerialized with a push-constant at any point, so they never need to
//! be kept alive on the stack.

use cranelift_entity::SecondaryMap;
use ostinato_ir::{BlockId, Function, ValueId};

use crate::{bitset::BitSet, cfg::ControlFlowGraph};

#[derive(Default)]
pub struct Liveness {
    /// block => (live_ins, live_outs)
    live_ins: SecondaryMap<BlockId, BitSet<ValueId>>,
    live_outs: SecondaryMap<BlockId, BitSet<ValueId>>,

    /// value => defining location
    defs: SecondaryMap<ValueId, Option<ValDef>>,

    /// block => one live-out set per operation
    op_live_outs: SecondaryMap<BlockId, Vec<BitSet<ValueId>>>,
}

impl Liveness {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn compute(&mut self, func: &Function, cfg: &ControlFlowGraph) {
        self.clear();

        for arg in &func.arg_values {
            self.defs[*arg] = Some(ValDef::FnArg);
        }
        for block in cfg.post_order() {
            for op in &func.dfg.block(block).ops {
                for &out in &op.outputs {
                    self.defs[out] = Some(ValDef::Normal(block));
                }
            }
        }

        for block in cfg.post_order() {
            for op in &func.dfg.block(block).ops {
                for &input in &op.inputs {
                    if func.dfg.value(input).is_ordinary() {
                        self.up_and_mark(cfg, block, input);
                    }
                }
            }
        }

        for (block, data) in func.dfg.blocks.iter() {
            let mut live = self.live_outs[block].clone();
            let mut records = vec![BitSet::default(); data.ops.len()];
            for (idx, op) in data.ops.iter().enumerate().rev() {
                records[idx] = live.clone();
                for &out in &op.outputs {
                    live.remove(out);
                }
                for &input in &op.inputs {
                    if func.dfg.value(input).is_ordinary() {
                        live.insert(input);
                    }
                }
            }
            self.op_live_outs[block] = records;
        }
    }

    pub fn block_live_ins(&self, block: BlockId) -> &BitSet<ValueId> {
        &self.live_ins[block]
    }

    pub fn block_live_outs(&self, block: BlockId) -> &BitSet<ValueId> {
        &self.live_outs[block]
    }

    /// One live-out set per operation of `block`, in operation order.
    pub fn op_live_outs(&self, block: BlockId) -> &[BitSet<ValueId>] {
        &self.op_live_outs[block]
    }

    /// Propagate liveness of `val` "upward" from its use in `block`.
    fn up_and_mark(&mut self, cfg: &ControlFlowGraph, block: BlockId, val: ValueId) {
        let def = self.defs[val].expect("use of undefined value");

        // If `val` is defined in this block, there's nothing to do.
        if def == ValDef::Normal(block) {
            return;
        }

        if self.live_ins[block].contains(val) {
            // Already marked, so propagation to preds already done
            return;
        }
        self.live_ins[block].insert(val);

        for &pred in cfg.preds_of(block) {
            self.live_outs[pred].insert(val);
            self.up_and_mark(cfg, pred, val);
        }
    }

    /// Reset the `Liveness` struct so that it can be reused.
    pub fn clear(&mut self) {
        self.live_ins.clear();
        self.live_outs.clear();
        self.defs.clear();
        self.op_live_outs.clear();
    }
}

#[derive(Copy, Clone, PartialEq, Eq)]
enum ValDef {
    FnArg,
    Normal(BlockId),
}

#[cfg(test)]
mod tests {
    use super::Liveness;
    use crate::cfg::ControlFlowGraph;
    use ostinato_ir::{Dialect, Function, FunctionBuilder, Signature};

    #[test]
    fn diamond() {
        let dialect = Dialect::evm();
        let mut func = Function::new(Signature::new("f", 2, 1));
        let mut builder = FunctionBuilder::new(&mut func, &dialect);

        let add = dialect.lookup("add").unwrap();
        let mul = dialect.lookup("mul").unwrap();

        let b0 = builder.make_block();
        let b1 = builder.make_block();
        let b2 = builder.make_block();
        let b3 = builder.make_block();

        let v0 = builder.arg(0);
        let v1 = builder.arg(1);

        builder.switch_to_block(b0);
        let v2 = builder.builtin(add, &[v0, v1])[0];
        builder.branch(v2, b1, b2);

        builder.switch_to_block(b1);
        let v3 = builder.builtin(add, &[v2, v2])[0];
        builder.builtin(dialect.lookup("mstore").unwrap(), &[v3, v3]);
        builder.jump(b3);

        builder.switch_to_block(b2);
        builder.builtin(mul, &[v0, v0]);
        builder.jump(b3);

        builder.switch_to_block(b3);
        builder.ret(&[v0]);

        let mut cfg = ControlFlowGraph::new();
        cfg.compute(&func);
        let mut live = Liveness::new();
        live.compute(&func, &cfg);

        assert_eq!(live.block_live_ins(b0), &[v0, v1].as_slice().into());
        assert_eq!(live.block_live_outs(b0), &[v0, v2].as_slice().into());

        assert_eq!(live.block_live_ins(b1), &[v0, v2].as_slice().into());
        assert_eq!(live.block_live_outs(b1), &[v0].as_slice().into());

        assert_eq!(live.block_live_ins(b2), &[v0].as_slice().into());
        assert_eq!(live.block_live_outs(b2), &[v0].as_slice().into());

        assert_eq!(live.block_live_ins(b3), &[v0].as_slice().into());
        assert_eq!(live.block_live_outs(b3), &[].as_slice().into());

        // Per-operation records line up with the block's operation list.
        let records = live.op_live_outs(b0);
        assert_eq!(records.len(), 2);
        // After `add`: the branch still consumes v2, and v0 flows into both
        // successors.
        assert_eq!(records[0], [v0, v2].as_slice().into());
        // After the branch: exactly the block's live-outs.
        assert_eq!(records[1], [v0, v2].as_slice().into());

        let records = live.op_live_outs(b1);
        assert_eq!(records.len(), 3);
        assert_eq!(records[0], [v0, v3].as_slice().into());
        assert_eq!(records[1], [v0].as_slice().into());
    }
}
