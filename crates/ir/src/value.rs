//! SSA value definitions.

use cranelift_entity::entity_impl;
use primitive_types::U256;

/// An opaque reference to [`Value`].
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Copy, Hash)]
pub struct ValueId(pub u32);
cranelift_entity::entity_impl!(ValueId, "v");

/// A value definition.
///
/// Only `Inst` and `Arg` values occupy a stack slot at runtime. Literal
/// values can be rematerialized with a push-constant instruction at any
/// program point, and unreachable values can never be observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Value {
    /// The value is defined by an operation.
    Inst,

    /// The value is a function argument.
    Arg { idx: usize },

    /// The value is a literal word.
    Imm { imm: U256 },

    /// The value originates on a dead path and must never be scheduled.
    Unreachable,
}

impl Value {
    pub fn is_imm(&self) -> bool {
        matches!(self, Self::Imm { .. })
    }

    pub fn imm(&self) -> Option<U256> {
        match self {
            Self::Imm { imm } => Some(*imm),
            _ => None,
        }
    }

    pub fn is_unreachable(&self) -> bool {
        matches!(self, Self::Unreachable)
    }

    /// `true` if the value occupies a stack slot at runtime.
    pub fn is_ordinary(&self) -> bool {
        matches!(self, Self::Inst | Self::Arg { .. })
    }
}
