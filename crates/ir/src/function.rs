use smallvec::SmallVec;

use crate::{BlockId, DataFlowGraph, Value, ValueId};

/// One compilation unit: the module entry sequence or a function body.
pub struct Function {
    pub sig: Signature,
    pub arg_values: SmallVec<[ValueId; 8]>,
    pub dfg: DataFlowGraph,
}

impl Function {
    pub fn new(sig: Signature) -> Self {
        let mut dfg = DataFlowGraph::new();
        let arg_values = (0..sig.arg_count())
            .map(|idx| dfg.make_value(Value::Arg { idx }))
            .collect();

        Self {
            sig,
            arg_values,
            dfg,
        }
    }

    /// The designated entry block of the unit.
    pub fn entry_block(&self) -> BlockId {
        assert!(self.dfg.num_blocks() > 0, "unit has no basic blocks");
        BlockId(0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Signature {
    /// Name of the function.
    name: String,

    arg_count: usize,
    ret_count: usize,

    /// Identifier of the source construct this function originates from,
    /// carried through to the assembly for diagnostics.
    debug_id: Option<u32>,
}

impl Signature {
    pub fn new(name: &str, arg_count: usize, ret_count: usize) -> Self {
        Self {
            name: name.to_string(),
            arg_count,
            ret_count,
            debug_id: None,
        }
    }

    pub fn with_debug_id(mut self, debug_id: u32) -> Self {
        self.debug_id = Some(debug_id);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn arg_count(&self) -> usize {
        self.arg_count
    }

    pub fn ret_count(&self) -> usize {
        self.ret_count
    }

    pub fn debug_id(&self) -> Option<u32> {
        self.debug_id
    }
}
