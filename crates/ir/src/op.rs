//! Operations, the ordered body of a basic block.

use smallvec::SmallVec;

use crate::{dialect::Dialect, BlockId, BuiltinRef, FuncRef, ValueId};

/// One operation of a basic block: an ordered list of input values, an
/// ordered list of output values, and the effect to emit.
#[derive(Debug, Clone)]
pub struct Operation {
    pub inputs: SmallVec<[ValueId; 4]>,
    pub outputs: SmallVec<[ValueId; 2]>,
    pub kind: OpKind,
}

/// The effect of an [`Operation`]. The set of kinds is closed; every
/// consumer matches exhaustively.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpKind {
    /// A dialect primitive.
    Builtin(BuiltinRef),

    /// A call to a user-defined function.
    Call(FuncRef),

    /// Materializes constant-valued definitions. All outputs must be
    /// literal or unreachable values; the effect is push-constants only.
    Assign,

    /// An unconditional jump.
    Jump(BlockId),

    /// A conditional jump: `nz` if the single input is non-zero, `z`
    /// otherwise.
    Branch { nz: BlockId, z: BlockId },

    /// A return from a function body. The inputs are the return values.
    Return,
}

impl Operation {
    /// Successor blocks this operation transfers control to.
    pub fn branch_dests(&self) -> SmallVec<[BlockId; 2]> {
        match self.kind {
            OpKind::Jump(dest) => [dest].into_iter().collect(),
            OpKind::Branch { nz, z } => [nz, z].into_iter().collect(),
            _ => SmallVec::new(),
        }
    }

    /// `true` if control does not fall through to a following operation.
    pub fn is_terminator(&self, dialect: &Dialect) -> bool {
        match self.kind {
            OpKind::Jump(..) | OpKind::Branch { .. } | OpKind::Return => true,
            OpKind::Builtin(builtin) => dialect.builtin(builtin).terminator,
            OpKind::Call(..) | OpKind::Assign => false,
        }
    }
}
