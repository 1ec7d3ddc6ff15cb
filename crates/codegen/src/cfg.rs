use std::collections::BTreeSet;

use cranelift_entity::{packed_option::PackedOption, SecondaryMap};
use ostinato_ir::{BlockId, Function};

/// Predecessor/successor edges of a unit, derived from each block's last
/// operation.
#[derive(Default, Debug, Clone, PartialEq, Eq)]
pub struct ControlFlowGraph {
    entry: PackedOption<BlockId>,
    blocks: SecondaryMap<BlockId, BlockNode>,
}

impl ControlFlowGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn compute(&mut self, func: &Function) {
        self.clear();

        if func.dfg.num_blocks() == 0 {
            return;
        }
        self.entry = func.entry_block().into();

        for (block, data) in func.dfg.blocks.iter() {
            let Some(last_op) = data.ops.last() else {
                continue;
            };
            for dest in last_op.branch_dests() {
                self.add_edge(block, dest);
            }
        }
    }

    pub fn preds_of(&self, block: BlockId) -> impl Iterator<Item = &BlockId> {
        self.blocks[block].preds.iter()
    }

    pub fn succs_of(&self, block: BlockId) -> impl Iterator<Item = &BlockId> {
        self.blocks[block].succs.iter()
    }

    pub fn entry(&self) -> Option<BlockId> {
        self.entry.expand()
    }

    pub fn post_order(&self) -> CfgPostOrder<'_> {
        CfgPostOrder::new(self)
    }

    pub fn add_edge(&mut self, from: BlockId, to: BlockId) {
        self.blocks[to].preds.insert(from);
        self.blocks[from].succs.insert(to);
    }

    pub fn clear(&mut self) {
        self.entry = None.into();
        self.blocks.clear();
    }
}

#[derive(Default, Clone, Debug, PartialEq, Eq)]
struct BlockNode {
    preds: BTreeSet<BlockId>,
    succs: BTreeSet<BlockId>,
}

pub struct CfgPostOrder<'a> {
    cfg: &'a ControlFlowGraph,
    node_state: SecondaryMap<BlockId, NodeState>,
    stack: Vec<BlockId>,
}

impl<'a> CfgPostOrder<'a> {
    fn new(cfg: &'a ControlFlowGraph) -> Self {
        let mut stack = Vec::new();

        if let Some(entry) = cfg.entry() {
            stack.push(entry);
        }

        Self {
            cfg,
            node_state: SecondaryMap::default(),
            stack,
        }
    }
}

impl Iterator for CfgPostOrder<'_> {
    type Item = BlockId;

    fn next(&mut self) -> Option<BlockId> {
        while let Some(&block) = self.stack.last() {
            if self.node_state[block].is_unvisited() {
                self.node_state[block].set_visited();
                for &succ in self.cfg.succs_of(block) {
                    if self.node_state[succ].is_unvisited() {
                        self.stack.push(succ);
                    }
                }
            } else {
                self.stack.pop().unwrap();
                if !self.node_state[block].has_finished() {
                    self.node_state[block].set_finished();
                    return Some(block);
                }
            }
        }

        None
    }
}

#[derive(Default, Debug, Clone, Copy)]
struct NodeState(u8);

impl NodeState {
    fn is_unvisited(self) -> bool {
        self.0 == 0
    }

    fn has_finished(self) -> bool {
        self.0 == 2
    }

    fn set_visited(&mut self) {
        self.0 = 1;
    }

    fn set_finished(&mut self) {
        self.0 = 2;
    }
}

#[cfg(test)]
mod tests {
    use super::ControlFlowGraph;
    use ostinato_ir::{Dialect, Function, FunctionBuilder, Signature};

    #[test]
    fn diamond_edges() {
        let dialect = Dialect::evm();
        let mut func = Function::new(Signature::new("main", 0, 0));
        let mut builder = FunctionBuilder::new(&mut func, &dialect);

        let b0 = builder.make_block();
        let b1 = builder.make_block();
        let b2 = builder.make_block();
        let b3 = builder.make_block();

        builder.switch_to_block(b0);
        let gas = dialect.lookup("gas").unwrap();
        let cond = builder.builtin(gas, &[])[0];
        builder.branch(cond, b1, b2);

        builder.switch_to_block(b1);
        builder.jump(b3);
        builder.switch_to_block(b2);
        builder.jump(b3);

        builder.switch_to_block(b3);
        let stop = dialect.lookup("stop").unwrap();
        builder.builtin(stop, &[]);

        let mut cfg = ControlFlowGraph::new();
        cfg.compute(&func);

        assert_eq!(cfg.entry(), Some(b0));
        assert_eq!(cfg.succs_of(b0).copied().collect::<Vec<_>>(), vec![b1, b2]);
        assert_eq!(cfg.preds_of(b3).copied().collect::<Vec<_>>(), vec![b1, b2]);

        let post: Vec<_> = cfg.post_order().collect();
        assert_eq!(post.len(), 4);
        assert_eq!(*post.last().unwrap(), b0);
    }
}
