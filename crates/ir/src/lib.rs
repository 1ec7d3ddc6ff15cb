pub mod builder;
pub mod dfg;
pub mod dialect;
pub mod function;
pub mod module;
pub mod op;
pub mod value;

pub use builder::FunctionBuilder;
pub use dfg::{Block, BlockId, DataFlowGraph};
pub use dialect::{BuiltinData, BuiltinRef, Dialect};
pub use function::{Function, Signature};
pub use module::{FuncRef, Module};
pub use op::{OpKind, Operation};
pub use primitive_types::U256;
pub use value::{Value, ValueId};
