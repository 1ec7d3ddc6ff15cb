use std::collections::VecDeque;

use cranelift_entity::SecondaryMap;
use rustc_hash::FxHashSet;
use smallvec::SmallVec;

use ostinato_ir::{
    BlockId, Dialect, FuncRef, Function, Module, OpKind, Operation, Value, ValueId,
};

use crate::{
    asm::{AsmInst, Assembly, Label},
    bitset::BitSet,
    liveness::Liveness,
};

use super::{
    diag::{SchedulePoint, StackTooDeep, UnitName},
    eval_stack::{EvalStack, StackSlot},
    LabelNaming, CONSUME_LAST_USE_MAX_SWAPS, DUP_MAX, SWAP_MAX,
};

/// Entry labels for every function of the module, allocated once per run
/// so call sites and definitions agree on label identity across units.
pub struct FunctionLabels {
    labels: SecondaryMap<FuncRef, Option<Label>>,
}

impl FunctionLabels {
    /// Allocates one label per function, in declaration order, honoring the
    /// naming policy. A duplicate source name under
    /// [`LabelNaming::NamedUnique`] is an internal fault.
    pub fn assign(asm: &mut dyn Assembly, module: &Module, naming: LabelNaming) -> Self {
        let mut labels = SecondaryMap::new();
        let mut assigned_names: FxHashSet<&str> = FxHashSet::default();

        for (func, data) in module.funcs.iter() {
            let sig = &data.sig;
            let name_already_seen = !assigned_names.insert(sig.name());
            if naming == LabelNaming::NamedUnique {
                assert!(
                    !name_already_seen,
                    "duplicate function name `{}`",
                    sig.name()
                );
            }

            let use_named_label = naming != LabelNaming::Anonymous && !name_already_seen;
            let label = if use_named_label {
                asm.named_label(sig.name(), sig.arg_count(), sig.ret_count(), sig.debug_id())
            } else {
                asm.new_label()
            };
            labels[func] = Some(label);
        }

        Self { labels }
    }

    pub fn get(&self, func: FuncRef) -> Label {
        self.labels[func].unwrap_or_else(|| panic!("no label allocated for {func}"))
    }
}

#[derive(Debug, Clone, Default)]
struct BlockData {
    label: Option<Label>,
    /// The stack layout a predecessor must produce before jumping in.
    stack_in: Option<Vec<StackSlot>>,
}

/// Schedules one unit: walks its blocks in an order where every block's
/// entry layout is established before the block is visited, arranges
/// operands, and constructs successor layouts at block exits. Owns its
/// block metadata and working stack; borrows everything else.
pub struct Stackifier<'a> {
    asm: &'a mut dyn Assembly,
    dialect: &'a Dialect,
    func: &'a Function,
    liveness: &'a Liveness,
    func_labels: &'a FunctionLabels,

    unit: UnitName,
    /// Set for function units; the entry block is labeled with the
    /// function's table label so call sites can target it.
    self_ref: Option<FuncRef>,

    block_data: SecondaryMap<BlockId, BlockData>,
    stack: EvalStack,
    ready: VecDeque<BlockId>,
    emitted: BitSet<BlockId>,
    errors: Vec<StackTooDeep>,
}

impl<'a> Stackifier<'a> {
    pub fn for_main(
        asm: &'a mut dyn Assembly,
        dialect: &'a Dialect,
        func: &'a Function,
        liveness: &'a Liveness,
        func_labels: &'a FunctionLabels,
    ) -> Self {
        Self::new(asm, dialect, func, liveness, func_labels, UnitName::Main, None)
    }

    pub fn for_function(
        asm: &'a mut dyn Assembly,
        dialect: &'a Dialect,
        func: &'a Function,
        liveness: &'a Liveness,
        func_labels: &'a FunctionLabels,
        func_ref: FuncRef,
    ) -> Self {
        let unit = UnitName::Func(func.sig.name().to_string());
        Self::new(asm, dialect, func, liveness, func_labels, unit, Some(func_ref))
    }

    fn new(
        asm: &'a mut dyn Assembly,
        dialect: &'a Dialect,
        func: &'a Function,
        liveness: &'a Liveness,
        func_labels: &'a FunctionLabels,
        unit: UnitName,
        self_ref: Option<FuncRef>,
    ) -> Self {
        Self {
            asm,
            dialect,
            func,
            liveness,
            func_labels,
            unit,
            self_ref,
            block_data: SecondaryMap::new(),
            stack: EvalStack::default(),
            ready: VecDeque::new(),
            emitted: BitSet::default(),
            errors: Vec::new(),
        }
    }

    /// Fixes the entry block's required layout before traversal. The driver
    /// forces this to the empty layout for the module entry sequence.
    pub fn set_entry_layout(&mut self, layout: Vec<StackSlot>) {
        let entry = self.func.entry_block();
        self.block_data[entry].stack_in = Some(layout);
    }

    /// Schedules the whole unit and returns the violations found.
    pub fn run(mut self) -> Vec<StackTooDeep> {
        let entry = self.func.entry_block();

        if let Some(func_ref) = self.self_ref {
            self.block_data[entry].label = Some(self.func_labels.get(func_ref));
            if self.block_data[entry].stack_in.is_none() {
                // Calling convention: the caller pushes its continuation,
                // then the arguments in declared order.
                let mut layout = vec![StackSlot::FuncRetAddr];
                layout.extend(self.func.arg_values.iter().map(|&v| StackSlot::Value(v)));
                self.block_data[entry].stack_in = Some(layout);
            }
        }

        self.ready.push_back(entry);
        while let Some(block) = self.ready.pop_front() {
            if self.emitted.contains(block) {
                continue;
            }
            self.emitted.insert(block);
            self.gen_block(block);
        }

        self.errors
    }

    fn gen_block(&mut self, block: BlockId) {
        let label = self.block_label(block);
        self.asm.append_label(label);

        let stack_in = self.block_data[block]
            .stack_in
            .clone()
            .unwrap_or_else(|| panic!("no starting layout for {block}"));
        self.stack = EvalStack::from_layout(&stack_in);
        self.asm.set_stack_height(self.stack.height());
        tracing::trace!(
            %block,
            stack = %self.stack.display(&self.func.dfg),
            "generate block"
        );

        let func = self.func;
        let ops = &func.dfg.block(block).ops;
        let live = self.liveness.op_live_outs(block);
        assert_eq!(
            ops.len(),
            live.len(),
            "operation/liveness record mismatch in {block}"
        );

        for (idx, (op, live_out)) in ops.iter().zip(live.iter()).enumerate() {
            self.gen_op(block, idx, op, live_out);
        }
    }

    fn gen_op(&mut self, block: BlockId, idx: usize, op: &Operation, live_out: &BitSet<ValueId>) {
        let point = SchedulePoint::Op(idx);
        match op.kind {
            OpKind::Builtin(builtin) => {
                let data = self.dialect.builtin(builtin);
                debug_assert_eq!(
                    op.inputs.len(),
                    data.inputs,
                    "arity mismatch for `{}`",
                    data.name
                );

                let target: SmallVec<[StackSlot; 8]> =
                    op.inputs.iter().map(|&v| StackSlot::Value(v)).collect();
                self.create_stack_top(&target, live_out, block, point);
                self.asm.append_inst(AsmInst::Builtin(builtin));
                self.stack.pop_operands(op.inputs.len());
                self.push_outputs(op);
            }

            OpKind::Call(callee) => {
                let continuation = self.asm.new_label();
                let mut target: SmallVec<[StackSlot; 8]> = SmallVec::new();
                target.push(StackSlot::Label(continuation));
                target.extend(op.inputs.iter().map(|&v| StackSlot::Value(v)));
                self.create_stack_top(&target, live_out, block, point);

                self.asm
                    .append_inst(AsmInst::PushLabel(self.func_labels.get(callee)));
                self.asm.append_inst(AsmInst::Jump);
                self.stack.pop_operands(op.inputs.len() + 1);

                self.asm.append_label(continuation);
                self.push_outputs(op);
                self.asm.set_stack_height(self.stack.height());
            }

            OpKind::Assign => {
                debug_assert!(op.inputs.is_empty(), "assign takes no inputs");
                let func = self.func;
                for &out in &op.outputs {
                    match func.dfg.value(out) {
                        Value::Imm { imm } => self.stack.push_imm(out, *imm, self.asm),
                        Value::Unreachable => {
                            self.stack.push_junk(StackSlot::Value(out), self.asm)
                        }
                        _ => panic!("assign output {out} is not a constant"),
                    }
                }
            }

            OpKind::Jump(dest) => {
                self.exit_to(dest, live_out, block);
                let label = self.block_label(dest);
                self.asm.append_inst(AsmInst::PushLabel(label));
                self.asm.append_inst(AsmInst::Jump);
                self.ready.push_back(dest);
            }

            OpKind::Branch { nz, z } => {
                debug_assert_eq!(op.inputs.len(), 1, "branch takes exactly one input");
                let cond = StackSlot::Value(op.inputs[0]);

                // The non-zero edge's layout must sit under the condition
                // when the conditional jump is taken.
                match self.block_data[nz].stack_in.clone() {
                    Some(mut want) => {
                        want.push(cond);
                        self.create_exact_stack(&want, block, SchedulePoint::Exit);
                    }
                    None => {
                        self.create_stack_top(&[cond], live_out, block, point);
                        let below = self.stack.slots()[..self.stack.height() - 1].to_vec();
                        self.block_data[nz].stack_in = Some(below);
                    }
                }
                let nz_label = self.block_label(nz);
                self.asm.append_inst(AsmInst::PushLabel(nz_label));
                self.asm.append_inst(AsmInst::JumpIf);
                self.stack.pop_operands(1);

                self.exit_to(z, live_out, block);
                let z_label = self.block_label(z);
                self.asm.append_inst(AsmInst::PushLabel(z_label));
                self.asm.append_inst(AsmInst::Jump);

                self.ready.push_back(nz);
                self.ready.push_back(z);
            }

            OpKind::Return => {
                assert!(
                    self.self_ref.is_some(),
                    "return outside a function body"
                );
                let mut target: Vec<StackSlot> =
                    op.inputs.iter().map(|&v| StackSlot::Value(v)).collect();
                target.push(StackSlot::FuncRetAddr);
                self.create_exact_stack(&target, block, SchedulePoint::Exit);
                self.asm.append_inst(AsmInst::Jump);
                self.stack.pop_operands(target.len());
            }
        }
    }

    fn push_outputs(&mut self, op: &Operation) {
        let func = self.func;
        for &out in &op.outputs {
            debug_assert!(
                matches!(func.dfg.value(out), Value::Inst),
                "effect output {out} is not an instruction-defined value"
            );
            self.stack.push_value(out);
        }
    }

    fn block_label(&mut self, block: BlockId) -> Label {
        if let Some(label) = self.block_data[block].label {
            return label;
        }
        let label = self.asm.new_label();
        self.block_data[block].label = Some(label);
        label
    }

    /// Presents `target`'s required entry layout along the edge to it. The
    /// first edge to reach a block establishes the layout; later edges
    /// normalize to it.
    fn exit_to(&mut self, target: BlockId, live_out: &BitSet<ValueId>, block: BlockId) {
        match self.block_data[target].stack_in.clone() {
            Some(want) => self.create_exact_stack(&want, block, SchedulePoint::Exit),
            None => {
                self.discard_dead(live_out, &[]);
                self.block_data[target].stack_in = Some(self.stack.slots().to_vec());
            }
        }
    }

    /// Pop dead value slots off the top. A slot survives if its value is
    /// still live, if `keep` needs it, or if it is not a value slot at all.
    fn discard_dead(&mut self, live_out: &BitSet<ValueId>, keep: &[StackSlot]) {
        while let Some(&top) = self.stack.top() {
            let StackSlot::Value(v) = top else { break };
            if live_out.contains(v) || keep.contains(&top) {
                break;
            }
            self.stack.pop(self.asm);
        }
    }

    /// Rearranges the stack so that `target` occupies the top positions,
    /// first element deepest. Consumed copies of still-live values must
    /// survive below the operand segment.
    fn create_stack_top(
        &mut self,
        target: &[StackSlot],
        live_out: &BitSet<ValueId>,
        block: BlockId,
        point: SchedulePoint,
    ) {
        self.discard_dead(live_out, target);

        if self.top_matches(target) && self.consume_in_place_is_safe(target, live_out) {
            return;
        }

        for (slot_idx, &want) in target.iter().enumerate() {
            // A last-use operand near the top is consumed directly instead
            // of being duplicated and popped later.
            if slot_idx == 0 {
                if let StackSlot::Value(v) = want {
                    if self.is_consumable(v, target, live_out) {
                        match self.stack.depth_of(&want) {
                            Some(0) => continue,
                            Some(depth) if depth <= CONSUME_LAST_USE_MAX_SWAPS => {
                                self.stack.rotate_to_top(depth, self.asm);
                                continue;
                            }
                            _ => {}
                        }
                    }
                }
            }
            self.bring_up_slot(want, false, block, point);
        }
    }

    fn top_matches(&self, target: &[StackSlot]) -> bool {
        let height = self.stack.height();
        height >= target.len() && self.stack.slots()[height - target.len()..] == *target
    }

    /// Consuming the matched top segment must not destroy the last stack
    /// copy of a value that stays live past the operation.
    fn consume_in_place_is_safe(&self, target: &[StackSlot], live_out: &BitSet<ValueId>) -> bool {
        let below = &self.stack.slots()[..self.stack.height() - target.len()];
        target.iter().all(|&slot| {
            let StackSlot::Value(v) = slot else {
                return true;
            };
            if !live_out.contains(v) {
                return true;
            }
            self.func.dfg.value_is_imm(v) || below.contains(&slot)
        })
    }

    /// The first operand slot may take ownership of an existing copy when
    /// nothing else needs that copy afterwards.
    fn is_consumable(&self, v: ValueId, target: &[StackSlot], live_out: &BitSet<ValueId>) -> bool {
        !live_out.contains(v) && !target[1..].contains(&StackSlot::Value(v))
    }

    /// Put a copy of `want` on top of the stack: push a literal or label,
    /// duplicate an existing slot within reach, or record a violation and
    /// push junk as a stand-in.
    ///
    /// Every live value is on the stack at every point of its unit, so an
    /// ordinary operand with no stack copy is an internal fault. An
    /// inherited entry layout, however, may carry slots that are dead in
    /// the successor (the establishing predecessor happened to hold them);
    /// a later predecessor fills those with junk, which the successor can
    /// never read.
    fn bring_up_slot(
        &mut self,
        want: StackSlot,
        junk_if_absent: bool,
        block: BlockId,
        point: SchedulePoint,
    ) {
        match want {
            StackSlot::Label(label) => self.stack.push_label(label, self.asm),

            StackSlot::Value(v) => {
                let func = self.func;
                match func.dfg.value(v) {
                    Value::Imm { imm } => {
                        let imm = *imm;
                        self.stack.push_imm(v, imm, self.asm);
                    }
                    Value::Unreachable => self.stack.push_junk(want, self.asm),
                    Value::Inst | Value::Arg { .. } => match self.stack.depth_of(&want) {
                        Some(depth) if depth < DUP_MAX => self.stack.dup(depth, self.asm),
                        Some(depth) => {
                            self.report_too_deep(block, point, Some(v), depth);
                            self.stack.push_junk(want, self.asm);
                        }
                        None if junk_if_absent => self.stack.push_junk(want, self.asm),
                        None => panic!(
                            "operand {v} is not on the stack and cannot be rematerialized"
                        ),
                    },
                }
            }

            StackSlot::FuncRetAddr => match self.stack.depth_of(&want) {
                Some(depth) if depth < DUP_MAX => self.stack.dup(depth, self.asm),
                Some(depth) => {
                    self.report_too_deep(block, point, None, depth);
                    self.stack.push_junk(want, self.asm);
                }
                None => panic!("return address is not on the stack"),
            },
        }
    }

    /// Transforms the whole stack into exactly `target`, fixing positions
    /// bottom to top so earlier placements are not disturbed. Slots needed
    /// multiple times are duplicated; surplus slots are popped from the top.
    fn create_exact_stack(&mut self, target: &[StackSlot], block: BlockId, point: SchedulePoint) {
        self.pop_surplus(target);

        for pos in 0..target.len() {
            let want = target[pos];
            if pos < self.stack.height() && self.stack.slots()[pos] == want {
                continue;
            }

            if pos >= self.stack.height() {
                // The prefix below is already correct; a fresh copy on top
                // lands in its final position.
                self.bring_up_slot(want, true, block, point);
                continue;
            }

            // Wrong occupant at `pos`. If the wanted slot is already on top
            // and no later position depends on that copy, move it down;
            // otherwise sink a fresh copy.
            let depth = self.stack.height() - 1 - pos;
            if self.stack.top() == Some(&want) && depth <= SWAP_MAX && self.can_spare_top(target, pos)
            {
                self.stack.swap(depth, self.asm);
                continue;
            }

            self.bring_up_slot(want, true, block, point);
            let depth = self.stack.height() - 1 - pos;
            if depth > SWAP_MAX {
                self.report_too_deep(block, point, want_value(want), depth);
                // Drop the copy again; the position stays wrong, but the
                // stack shape survives for the rest of the unit.
                self.stack.pop(self.asm);
            } else {
                self.stack.swap(depth, self.asm);
            }
        }

        while self.stack.height() > target.len() {
            self.stack.pop(self.asm);
        }

        debug_assert!(
            !self.errors.is_empty() || self.stack.slots() == target,
            "exact stack construction diverged from its target"
        );
    }

    /// Pop slots with more copies on the stack than `target` needs.
    fn pop_surplus(&mut self, target: &[StackSlot]) {
        while let Some(&top) = self.stack.top() {
            if top == StackSlot::FuncRetAddr {
                break;
            }
            let needed = target.iter().filter(|&&s| s == top).count();
            if self.stack.count(&top) > needed {
                self.stack.pop(self.asm);
            } else {
                break;
            }
        }
    }

    /// Moving the top copy of `target[pos]` down is allowed when the
    /// remaining positions can still be satisfied without it.
    fn can_spare_top(&self, target: &[StackSlot], pos: usize) -> bool {
        let want = target[pos];
        let needed_later = target[pos + 1..].iter().filter(|&&s| s == want).count();
        if needed_later == 0 {
            return true;
        }
        if let StackSlot::Value(v) = want {
            if self.func.dfg.value_is_imm(v) {
                return true;
            }
        }
        let copies_below = self.stack.slots()[..self.stack.height() - 1]
            .iter()
            .filter(|&&s| s == want)
            .count();
        copies_below >= needed_later
    }

    fn report_too_deep(
        &mut self,
        block: BlockId,
        point: SchedulePoint,
        value: Option<ValueId>,
        depth: usize,
    ) {
        // One diagnostic per program point; further shortfalls at the same
        // point add no information.
        if self
            .errors
            .last()
            .is_some_and(|e| e.block == block && e.point == point)
        {
            return;
        }
        tracing::debug!(%block, %point, depth, "stack too deep");
        self.errors.push(StackTooDeep {
            unit: self.unit.clone(),
            block,
            point,
            value,
            depth,
        });
    }
}

fn want_value(slot: StackSlot) -> Option<ValueId> {
    match slot {
        StackSlot::Value(v) => Some(v),
        _ => None,
    }
}
