use ostinato_ir::{DataFlowGraph, ValueId, U256};

use crate::asm::{AsmInst, Assembly, Label};

use super::{DUP_MAX, SWAP_MAX};

/// One position on the operand stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StackSlot {
    Value(ValueId),
    /// A concrete jump target, pushed as a call continuation.
    Label(Label),
    /// The callee-side return address; opaque to the unit holding it.
    FuncRetAddr,
}

/// Working model of the operand stack. Index 0 is the bottom, the last
/// element is the top. Mutations that correspond to emitted code take the
/// sink and append the matching instruction, so the model and the stream
/// can never drift apart.
#[derive(Debug, Clone, Default)]
pub struct EvalStack {
    slots: Vec<StackSlot>,
}

impl EvalStack {
    pub fn from_layout(layout: &[StackSlot]) -> Self {
        Self {
            slots: layout.to_vec(),
        }
    }

    pub fn height(&self) -> usize {
        self.slots.len()
    }

    pub fn slots(&self) -> &[StackSlot] {
        &self.slots
    }

    pub fn top(&self) -> Option<&StackSlot> {
        self.slots.last()
    }

    /// Depth of the copy of `slot` nearest the top (0 = top).
    pub fn depth_of(&self, slot: &StackSlot) -> Option<usize> {
        self.slots.iter().rev().position(|s| s == slot)
    }

    pub fn count(&self, slot: &StackSlot) -> usize {
        self.slots.iter().filter(|s| *s == slot).count()
    }

    pub fn pop(&mut self, asm: &mut dyn Assembly) {
        assert!(!self.slots.is_empty(), "stack underflow");
        self.slots.pop();
        asm.append_inst(AsmInst::Pop);
    }

    pub fn swap(&mut self, depth: usize, asm: &mut dyn Assembly) {
        if depth == 0 {
            return;
        }
        debug_assert!(depth <= SWAP_MAX, "SWAP out of range");
        debug_assert!(depth < self.slots.len());

        asm.append_inst(AsmInst::Swap(depth as u8));
        let top = self.slots.len() - 1;
        self.slots.swap(top, top - depth);
    }

    /// Duplicate the slot `depth` positions below the top (`DUP{depth+1}`).
    pub fn dup(&mut self, depth: usize, asm: &mut dyn Assembly) {
        debug_assert!(depth < DUP_MAX, "DUP out of range");
        debug_assert!(depth < self.slots.len());

        asm.append_inst(AsmInst::Dup(depth as u8 + 1));
        let slot = self.slots[self.slots.len() - 1 - depth];
        self.slots.push(slot);
    }

    pub fn push_imm(&mut self, stack_as: ValueId, imm: U256, asm: &mut dyn Assembly) {
        asm.append_inst(AsmInst::Push(imm));
        self.slots.push(StackSlot::Value(stack_as));
    }

    /// Push a constant zero standing in for `stack_as`. Used for slots
    /// whose real content can never be observed.
    pub fn push_junk(&mut self, stack_as: StackSlot, asm: &mut dyn Assembly) {
        asm.append_inst(AsmInst::Push(U256::zero()));
        self.slots.push(stack_as);
    }

    pub fn push_label(&mut self, label: Label, asm: &mut dyn Assembly) {
        asm.append_inst(AsmInst::PushLabel(label));
        self.slots.push(StackSlot::Label(label));
    }

    /// Record a slot produced by an operation's own effect; emits nothing.
    pub fn push_value(&mut self, value: ValueId) {
        self.slots.push(StackSlot::Value(value));
    }

    /// Remove the top `n` slots consumed by an operation's own effect;
    /// emits nothing.
    pub fn pop_operands(&mut self, n: usize) {
        assert!(n <= self.slots.len(), "operand consumption underflow");
        self.slots.truncate(self.slots.len() - n);
    }

    /// Rotate the slot at `depth` to the top with a swap chain, preserving
    /// the relative order of the slots above it.
    pub fn rotate_to_top(&mut self, depth: usize, asm: &mut dyn Assembly) {
        for k in 1..=depth {
            self.swap(k, asm);
        }
    }

    pub fn display(&self, dfg: &DataFlowGraph) -> String {
        let mut parts = Vec::with_capacity(self.slots.len());
        for slot in &self.slots {
            parts.push(match slot {
                StackSlot::Value(v) => match dfg.value_imm(*v) {
                    Some(imm) => format!("{imm}"),
                    None if dfg.value(*v).is_unreachable() => "[unreachable]".to_string(),
                    None => format!("{v}"),
                },
                StackSlot::Label(label) => format!("LABEL[{}]", label.0),
                StackSlot::FuncRetAddr => "RET".to_string(),
            });
        }
        format!("[{}]", parts.join(", "))
    }
}

#[cfg(test)]
mod tests {
    use super::{EvalStack, StackSlot};
    use crate::asm::{AsmInst, Assembly, Label};
    use ostinato_ir::{ValueId, U256};

    #[derive(Default)]
    struct RecordingAsm {
        insts: Vec<AsmInst>,
    }

    impl Assembly for RecordingAsm {
        fn new_label(&mut self) -> Label {
            Label(0)
        }

        fn named_label(&mut self, _: &str, _: usize, _: usize, _: Option<u32>) -> Label {
            Label(0)
        }

        fn append_label(&mut self, _: Label) {}

        fn append_inst(&mut self, inst: AsmInst) {
            self.insts.push(inst);
        }

        fn set_stack_height(&mut self, _: usize) {}
    }

    fn v(n: u32) -> StackSlot {
        StackSlot::Value(ValueId(n))
    }

    #[test]
    fn swap_exchanges_with_slot_below() {
        let mut asm = RecordingAsm::default();
        let mut stack = EvalStack::from_layout(&[v(0), v(1), v(2), v(3)]);

        stack.swap(2, &mut asm);
        assert_eq!(stack.slots(), &[v(0), v(3), v(2), v(1)]);
        assert_eq!(asm.insts, vec![AsmInst::Swap(2)]);

        // Depth zero is the top itself; nothing to do.
        stack.swap(0, &mut asm);
        assert_eq!(asm.insts.len(), 1);
    }

    #[test]
    fn dup_copies_to_top() {
        let mut asm = RecordingAsm::default();
        let mut stack = EvalStack::from_layout(&[v(0), v(1)]);

        stack.dup(1, &mut asm);
        assert_eq!(stack.slots(), &[v(0), v(1), v(0)]);
        assert_eq!(asm.insts, vec![AsmInst::Dup(2)]);
    }

    #[test]
    fn rotate_preserves_order_above() {
        let mut asm = RecordingAsm::default();
        let mut stack = EvalStack::from_layout(&[v(0), v(1), v(2), v(3)]);

        stack.rotate_to_top(2, &mut asm);
        assert_eq!(stack.slots(), &[v(0), v(2), v(3), v(1)]);
        assert_eq!(asm.insts, vec![AsmInst::Swap(1), AsmInst::Swap(2)]);
    }

    #[test]
    fn pushes_and_pops_track_the_model() {
        let mut asm = RecordingAsm::default();
        let mut stack = EvalStack::default();

        stack.push_imm(ValueId(7), U256::from(5u64), &mut asm);
        stack.push_label(Label(3), &mut asm);
        assert_eq!(stack.slots(), &[v(7), StackSlot::Label(Label(3))]);

        stack.pop(&mut asm);
        assert_eq!(stack.height(), 1);
        assert_eq!(
            asm.insts,
            vec![
                AsmInst::Push(U256::from(5u64)),
                AsmInst::PushLabel(Label(3)),
                AsmInst::Pop,
            ]
        );

        assert_eq!(stack.depth_of(&v(7)), Some(0));
        assert_eq!(stack.depth_of(&StackSlot::FuncRetAddr), None);
    }

    #[test]
    #[should_panic(expected = "stack underflow")]
    fn pop_from_empty_stack() {
        let mut asm = RecordingAsm::default();
        let mut stack = EvalStack::default();
        stack.pop(&mut asm);
    }
}
