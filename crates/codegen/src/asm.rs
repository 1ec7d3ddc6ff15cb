//! The instruction sink boundary.
//!
//! The scheduler produces a linear stream of label definitions and
//! primitive instruction requests. Everything downstream of [`Assembly`]
//! (bytecode encoding, jump resolution, size optimization) is out of scope
//! here; [`TextAssembly`] renders the stream as text for tests and
//! diagnostics.

use primitive_types::U256;
use rustc_hash::FxHashMap;
use std::fmt::Write;

use ostinato_ir::{BuiltinRef, Dialect};

/// An identifier for a jump target. Owned by the assembly once allocated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Label(pub u32);

/// A primitive instruction request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AsmInst {
    /// Discard the top stack slot.
    Pop,
    /// `SWAPn`: exchange the top slot with the slot `n` positions below it.
    Swap(u8),
    /// `DUPn`: duplicate the slot `n - 1` positions below the top.
    Dup(u8),
    /// Push a constant word.
    Push(U256),
    /// Push the code offset of a label.
    PushLabel(Label),
    /// Jump to the code offset on top of the stack.
    Jump,
    /// Jump if the slot below the target offset is non-zero; consumes both.
    JumpIf,
    /// A dialect primitive, consuming and producing its declared arities.
    Builtin(BuiltinRef),
}

/// Accepts the scheduler's output stream.
pub trait Assembly {
    /// Allocates a fresh anonymous label.
    fn new_label(&mut self) -> Label;

    /// Allocates a label carrying a human-readable hint for diagnostics,
    /// along with the argument and return arities of the code it heads and
    /// an optional source-construct identifier.
    fn named_label(
        &mut self,
        name: &str,
        args: usize,
        rets: usize,
        debug_id: Option<u32>,
    ) -> Label;

    /// Defines `label` at the current position of the stream.
    fn append_label(&mut self, label: Label);

    fn append_inst(&mut self, inst: AsmInst);

    /// Diagnostic bookkeeping: the stack height at a point where the
    /// assembly cannot derive it from the instruction stream, such as a
    /// block entry or a call continuation.
    fn set_stack_height(&mut self, height: usize);
}

/// Renders the instruction stream as text, one instruction per line, and
/// tracks the stack height implied by the stream.
pub struct TextAssembly<'a> {
    dialect: &'a Dialect,
    next_label: u32,
    names: FxHashMap<Label, String>,
    out: String,
    height: usize,
}

impl<'a> TextAssembly<'a> {
    pub fn new(dialect: &'a Dialect) -> Self {
        Self {
            dialect,
            next_label: 0,
            names: FxHashMap::default(),
            out: String::new(),
            height: 0,
        }
    }

    pub fn finish(self) -> String {
        self.out
    }

    /// The stack height implied by the instructions appended so far, as of
    /// the latest height report.
    pub fn height(&self) -> usize {
        self.height
    }

    fn label_name(&self, label: Label) -> String {
        match self.names.get(&label) {
            Some(name) => name.clone(),
            None => format!("L{}", label.0),
        }
    }

    fn alloc(&mut self) -> Label {
        let label = Label(self.next_label);
        self.next_label += 1;
        label
    }
}

impl Assembly for TextAssembly<'_> {
    fn new_label(&mut self) -> Label {
        self.alloc()
    }

    fn named_label(
        &mut self,
        name: &str,
        _args: usize,
        _rets: usize,
        _debug_id: Option<u32>,
    ) -> Label {
        let label = self.alloc();
        self.names.insert(label, name.to_string());
        label
    }

    fn append_label(&mut self, label: Label) {
        let name = self.label_name(label);
        writeln!(self.out, "{name}:").unwrap();
    }

    fn append_inst(&mut self, inst: AsmInst) {
        match inst {
            AsmInst::Pop => {
                self.height -= 1;
                writeln!(self.out, "  POP").unwrap();
            }
            AsmInst::Swap(n) => {
                writeln!(self.out, "  SWAP{n}").unwrap();
            }
            AsmInst::Dup(n) => {
                self.height += 1;
                writeln!(self.out, "  DUP{n}").unwrap();
            }
            AsmInst::Push(imm) => {
                self.height += 1;
                writeln!(self.out, "  PUSH 0x{imm:x}").unwrap();
            }
            AsmInst::PushLabel(label) => {
                self.height += 1;
                let name = self.label_name(label);
                writeln!(self.out, "  PUSH :{name}").unwrap();
            }
            AsmInst::Jump => {
                self.height -= 1;
                writeln!(self.out, "  JUMP").unwrap();
            }
            AsmInst::JumpIf => {
                self.height -= 2;
                writeln!(self.out, "  JUMPI").unwrap();
            }
            AsmInst::Builtin(builtin) => {
                let data = self.dialect.builtin(builtin);
                self.height = self.height - data.inputs + data.outputs;
                writeln!(self.out, "  {}", data.name.to_uppercase()).unwrap();
            }
        }
    }

    fn set_stack_height(&mut self, height: usize) {
        self.height = height;
    }
}
