pub mod asm;
pub mod bitset;
pub mod cfg;
pub mod liveness;
pub mod stackify;

pub use asm::{AsmInst, Assembly, Label, TextAssembly};
pub use stackify::{
    lower_module, FunctionLabels, LabelNaming, SchedulePoint, StackSlot, StackTooDeep, Stackifier,
    UnitName,
};
