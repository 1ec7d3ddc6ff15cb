use core::fmt;

use ostinato_ir::{BlockId, ValueId};
use thiserror::Error;

/// The compilation unit a diagnostic is attributed to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnitName {
    Main,
    Func(String),
}

impl fmt::Display for UnitName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Main => write!(f, "the entry sequence"),
            Self::Func(name) => write!(f, "function %{name}"),
        }
    }
}

/// A program point within a block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulePoint {
    /// The operation at the given index of the block.
    Op(usize),
    /// The layout construction at the block's exit.
    Exit,
}

impl fmt::Display for SchedulePoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Op(idx) => write!(f, "operation {idx}"),
            Self::Exit => write!(f, "block exit"),
        }
    }
}

/// A required stack rearrangement could not be expressed within the
/// machine's addressable depth. Recorded and reported as a compile
/// diagnostic; scheduling continues with best-effort code.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error(
    "stack too deep in {unit} at {block}, {point}: needed slot is {depth} slots below the top"
)]
pub struct StackTooDeep {
    pub unit: UnitName,
    pub block: BlockId,
    pub point: SchedulePoint,
    /// The value that could not be reached, when the slot held one.
    pub value: Option<ValueId>,
    /// Depth of the needed slot, measured from the stack top.
    pub depth: usize,
}
