//! Stack scheduling for a bounded-reach operand stack.
//!
//! - Each block `B` has a required entry layout `StackIn(B)`.
//!   - The unit entry is fixed up front: empty for the module entry
//!     sequence, `[ret addr, args...]` for a function body.
//!   - Any other block inherits its layout from the first predecessor that
//!     reaches it; later predecessors normalize their exit stack to the
//!     inherited layout, edge by edge.
//! - Within a block, every operation gets its inputs arranged on the stack
//!   top (`DUP*`/`SWAP*`/push-constant), dead slots are popped, and the
//!   operation's outputs replace its consumed inputs.
//! - When a needed slot sits beyond `DUP16`/`SWAP16` reach, the scheduler
//!   records a [`StackTooDeep`] diagnostic and continues with best-effort
//!   code, so one run surfaces every violation in the program.
//!
//! Internal invariants (operation/liveness record alignment, entry layouts
//! established before a block is visited, label table completeness) are
//! asserted; breaking them is a bug in the graph builder or the oracle,
//! not a user-facing condition.

mod diag;
mod eval_stack;
mod schedule;

pub use diag::{SchedulePoint, StackTooDeep, UnitName};
pub use eval_stack::{EvalStack, StackSlot};
pub use schedule::{FunctionLabels, Stackifier};

use crate::{asm::Assembly, cfg::ControlFlowGraph, liveness::Liveness};
use ostinato_ir::{Dialect, Module};

/// `DUP16` duplicates `stack[15]`.
const DUP_MAX: usize = 16;
/// `SWAP16` exchanges the top with `stack[16]`.
const SWAP_MAX: usize = 16;
/// Maximum `SWAP*` chain length used to consume a last-use operand directly
/// from the stack instead of duplicating it and popping the original later.
const CONSUME_LAST_USE_MAX_SWAPS: usize = 3;

/// Label-naming policy for function entry points. Labels are never named
/// from anything but the function's declared name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LabelNaming {
    /// Always allocate anonymous labels.
    Anonymous,
    /// Name labels after their function; duplicate source names fall back
    /// to anonymous labels.
    Named,
    /// Name labels after their function; a duplicate source name is an
    /// internal fault.
    NamedUnique,
}

/// Lowers a whole module through `asm`.
///
/// The entry sequence is scheduled first, from a forced-empty entry stack,
/// then every function body, each with a fresh control-flow graph, liveness
/// oracle, and scheduler instance. Returns every depth-limit violation
/// found across all units, in processing order; the instruction stream
/// itself is delivered entirely through `asm`.
pub fn lower_module(
    asm: &mut dyn Assembly,
    dialect: &Dialect,
    module: &Module,
    naming: LabelNaming,
) -> Vec<StackTooDeep> {
    let func_labels = FunctionLabels::assign(asm, module, naming);

    tracing::debug!("lower entry sequence");
    let mut cfg = ControlFlowGraph::new();
    cfg.compute(&module.main);
    let mut liveness = Liveness::new();
    liveness.compute(&module.main, &cfg);

    let mut main = Stackifier::for_main(asm, dialect, &module.main, &liveness, &func_labels);
    main.set_entry_layout(Vec::new());
    let mut errors = main.run();

    for (func_ref, func) in module.funcs.iter() {
        tracing::debug!(func = func.sig.name(), "lower function");
        let mut cfg = ControlFlowGraph::new();
        cfg.compute(func);
        let mut liveness = Liveness::new();
        liveness.compute(func, &cfg);

        let xform = Stackifier::for_function(asm, dialect, func, &liveness, &func_labels, func_ref);
        errors.extend(xform.run());
    }

    errors
}
