//! Data flow graph arenas for one compilation unit.

use cranelift_entity::{entity_impl, PrimaryMap};
use primitive_types::U256;
use rustc_hash::FxHashMap;

use crate::{Operation, Value, ValueId};

/// An opaque reference to [`Block`]. Block 0 is the entry of a unit.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Copy, Hash)]
pub struct BlockId(pub u32);
cranelift_entity::entity_impl!(BlockId, "block");

/// A basic block: a straight-line sequence of operations ending in a
/// single control transfer.
#[derive(Debug, Clone, Default)]
pub struct Block {
    pub ops: Vec<Operation>,
}

impl Block {
    pub fn new() -> Self {
        Self::default()
    }
}

pub struct DataFlowGraph {
    #[doc(hidden)]
    pub blocks: PrimaryMap<BlockId, Block>,
    #[doc(hidden)]
    pub values: PrimaryMap<ValueId, Value>,
    immediates: FxHashMap<U256, ValueId>,
}

impl DataFlowGraph {
    pub fn new() -> Self {
        Self {
            blocks: PrimaryMap::default(),
            values: PrimaryMap::default(),
            immediates: FxHashMap::default(),
        }
    }

    pub fn make_block(&mut self) -> BlockId {
        self.blocks.push(Block::new())
    }

    pub fn make_value(&mut self, value: Value) -> ValueId {
        self.values.push(value)
    }

    /// Immediates are interned, so requesting the same word twice yields
    /// the same value.
    pub fn make_imm_value(&mut self, imm: impl Into<U256>) -> ValueId {
        let imm: U256 = imm.into();
        if let Some(&value) = self.immediates.get(&imm) {
            return value;
        }

        let value = self.make_value(Value::Imm { imm });
        self.immediates.insert(imm, value);
        value
    }

    pub fn value(&self, value: ValueId) -> &Value {
        &self.values[value]
    }

    pub fn value_is_imm(&self, value: ValueId) -> bool {
        self.values[value].is_imm()
    }

    pub fn value_imm(&self, value: ValueId) -> Option<U256> {
        self.values[value].imm()
    }

    pub fn block(&self, block: BlockId) -> &Block {
        &self.blocks[block]
    }

    pub fn block_mut(&mut self, block: BlockId) -> &mut Block {
        &mut self.blocks[block]
    }

    pub fn num_blocks(&self) -> usize {
        self.blocks.len()
    }
}

impl Default for DataFlowGraph {
    fn default() -> Self {
        Self::new()
    }
}
