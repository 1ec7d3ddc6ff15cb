use ostinato_codegen::{
    asm::{AsmInst, Assembly, Label, TextAssembly},
    lower_module, LabelNaming, SchedulePoint, UnitName,
};
use ostinato_ir::{Dialect, FunctionBuilder, Module, Signature};

/// Wraps [`TextAssembly`] and checks, instruction by instruction, that the
/// scheduler never underflows the stack, never exceeds the machine's
/// addressable reach, and reports heights consistent with the stream.
struct CheckedAssembly<'a> {
    inner: TextAssembly<'a>,
    dialect: &'a Dialect,
    height: usize,
    reported_heights: Vec<usize>,
}

impl<'a> CheckedAssembly<'a> {
    fn new(dialect: &'a Dialect) -> Self {
        Self {
            inner: TextAssembly::new(dialect),
            dialect,
            height: 0,
            reported_heights: Vec::new(),
        }
    }

    fn finish(self) -> String {
        self.inner.finish()
    }
}

impl Assembly for CheckedAssembly<'_> {
    fn new_label(&mut self) -> Label {
        self.inner.new_label()
    }

    fn named_label(&mut self, name: &str, args: usize, rets: usize, debug_id: Option<u32>) -> Label {
        self.inner.named_label(name, args, rets, debug_id)
    }

    fn append_label(&mut self, label: Label) {
        self.inner.append_label(label);
    }

    fn append_inst(&mut self, inst: AsmInst) {
        match inst {
            AsmInst::Pop => {
                assert!(self.height >= 1, "POP of an empty stack");
                self.height -= 1;
            }
            AsmInst::Swap(n) => {
                assert!((1..=16).contains(&n), "SWAP{n} exceeds addressable reach");
                assert!(self.height > n as usize, "SWAP{n} reaches below the stack");
            }
            AsmInst::Dup(n) => {
                assert!((1..=16).contains(&n), "DUP{n} exceeds addressable reach");
                assert!(self.height >= n as usize, "DUP{n} reaches below the stack");
                self.height += 1;
            }
            AsmInst::Push(_) | AsmInst::PushLabel(_) => self.height += 1,
            AsmInst::Jump => {
                assert!(self.height >= 1, "JUMP without a target on the stack");
                self.height -= 1;
            }
            AsmInst::JumpIf => {
                assert!(self.height >= 2, "JUMPI without target and condition");
                self.height -= 2;
            }
            AsmInst::Builtin(builtin) => {
                let data = self.dialect.builtin(builtin);
                assert!(
                    self.height >= data.inputs,
                    "`{}` consumes more slots than the stack holds",
                    data.name
                );
                self.height = self.height - data.inputs + data.outputs;
            }
        }
        self.inner.append_inst(inst);
    }

    fn set_stack_height(&mut self, height: usize) {
        self.reported_heights.push(height);
        self.height = height;
        self.inner.set_stack_height(height);
    }
}

#[test]
fn literal_materialization_is_one_push() {
    let dialect = Dialect::evm();
    let mut module = Module::new();
    {
        let mut builder = FunctionBuilder::new(&mut module.main, &dialect);
        let b0 = builder.make_block();
        builder.switch_to_block(b0);
        let five = builder.make_imm(5u64);
        builder.materialize(five);
    }

    let mut asm = CheckedAssembly::new(&dialect);
    let errors = lower_module(&mut asm, &dialect, &module, LabelNaming::Anonymous);
    assert!(errors.is_empty());

    // The entry sequence always starts from an empty stack.
    assert_eq!(asm.reported_heights[0], 0);
    // The block ends with exactly the literal on the stack.
    assert_eq!(asm.height, 1);

    insta::assert_snapshot!(asm.finish(), @r"
    L0:
      PUSH 0x5
    ");
}

#[test]
fn call_and_return_round_trip() {
    let dialect = Dialect::evm();
    let mut module = Module::new();

    let f = module.declare_function(Signature::new("f", 2, 1));
    {
        let mut builder = FunctionBuilder::new(module.func_mut(f), &dialect);
        let b0 = builder.make_block();
        builder.switch_to_block(b0);
        let add = dialect.lookup("add").unwrap();
        let sum = builder.builtin(add, &[builder.arg(0), builder.arg(1)])[0];
        builder.ret(&[sum]);
    }

    {
        let mut builder = FunctionBuilder::new(&mut module.main, &dialect);
        let b0 = builder.make_block();
        builder.switch_to_block(b0);
        let three = builder.make_imm(3u64);
        let four = builder.make_imm(4u64);
        let ret = builder.call(f, &[three, four], 1)[0];
        builder.builtin(dialect.lookup("sstore").unwrap(), &[ret, ret]);
        builder.builtin(dialect.lookup("stop").unwrap(), &[]);
    }

    let mut asm = CheckedAssembly::new(&dialect);
    let errors = lower_module(&mut asm, &dialect, &module, LabelNaming::Named);
    assert!(errors.is_empty());

    insta::assert_snapshot!(asm.finish(), @r"
    L1:
      PUSH :L2
      PUSH 0x3
      PUSH 0x4
      PUSH :f
      JUMP
    L2:
      DUP1
      DUP1
      SSTORE
      POP
      STOP
    f:
      ADD
      SWAP1
      JUMP
    ");
}

fn diamond_module(dialect: &Dialect) -> Module {
    let mut module = Module::new();
    let mut builder = FunctionBuilder::new(&mut module.main, dialect);

    let gas = dialect.lookup("gas").unwrap();
    let lt = dialect.lookup("lt").unwrap();

    let b0 = builder.make_block();
    let b1 = builder.make_block();
    let b2 = builder.make_block();
    let b3 = builder.make_block();

    builder.switch_to_block(b0);
    let v0 = builder.builtin(gas, &[])[0];
    let v1 = builder.builtin(gas, &[])[0];
    let cond = builder.builtin(lt, &[v0, v1])[0];
    builder.branch(cond, b1, b2);

    // The true path consumes v1 before the join; the false path does not,
    // so its edge has to normalize to the join's inherited layout.
    builder.switch_to_block(b1);
    builder.builtin(dialect.lookup("mstore").unwrap(), &[v1, v1]);
    builder.jump(b3);

    builder.switch_to_block(b2);
    builder.jump(b3);

    builder.switch_to_block(b3);
    builder.builtin(dialect.lookup("sstore").unwrap(), &[v0, v0]);
    builder.builtin(dialect.lookup("stop").unwrap(), &[]);

    module
}

#[test]
fn diverging_edges_normalize_to_the_join_layout() {
    let dialect = Dialect::evm();
    let module = diamond_module(&dialect);

    let mut asm = CheckedAssembly::new(&dialect);
    let errors = lower_module(&mut asm, &dialect, &module, LabelNaming::Anonymous);
    assert!(errors.is_empty());

    insta::assert_snapshot!(asm.finish(), @r"
    L0:
      GAS
      GAS
      DUP2
      DUP2
      LT
      PUSH :L1
      JUMPI
      PUSH :L2
      JUMP
    L1:
      DUP1
      DUP1
      MSTORE
      POP
      PUSH :L3
      JUMP
    L2:
      POP
      PUSH :L3
      JUMP
    L3:
      DUP1
      DUP1
      SSTORE
      POP
      STOP
    ");
}

#[test]
fn label_allocation_is_deterministic() {
    let dialect = Dialect::evm();
    let module = diamond_module(&dialect);

    let mut first = TextAssembly::new(&dialect);
    lower_module(&mut first, &dialect, &module, LabelNaming::Anonymous);
    let mut second = TextAssembly::new(&dialect);
    lower_module(&mut second, &dialect, &module, LabelNaming::Anonymous);

    assert_eq!(first.finish(), second.finish());
}

#[test]
fn unreachable_operand_beyond_reach_is_reported_not_emitted() {
    let dialect = Dialect::evm();
    let mut module = Module::new();

    // 18 arguments put the first one 17 slots below the top at entry,
    // past DUP16 reach.
    let h = module.declare_function(Signature::new("h", 18, 1));
    let add = dialect.lookup("add").unwrap();
    {
        let mut builder = FunctionBuilder::new(module.func_mut(h), &dialect);
        let b0 = builder.make_block();
        builder.switch_to_block(b0);
        let first = builder.arg(0);
        let last = builder.arg(17);
        let sum = builder.builtin(add, &[first, last])[0];
        builder.ret(&[sum]);
    }

    {
        let mut builder = FunctionBuilder::new(&mut module.main, &dialect);
        let b0 = builder.make_block();
        builder.switch_to_block(b0);
        builder.builtin(dialect.lookup("stop").unwrap(), &[]);
    }

    let mut asm = CheckedAssembly::new(&dialect);
    let errors = lower_module(&mut asm, &dialect, &module, LabelNaming::Named);

    // One violation per program point, and the offending instruction is
    // never emitted (CheckedAssembly would have panicked).
    assert_eq!(errors.len(), 2);

    let arg0 = module.func(h).arg_values[0];
    assert_eq!(errors[0].unit, UnitName::Func("h".to_string()));
    assert_eq!(errors[0].point, SchedulePoint::Op(0));
    assert_eq!(errors[0].value, Some(arg0));
    assert_eq!(errors[0].depth, 17);

    assert_eq!(errors[1].point, SchedulePoint::Exit);
    assert!(errors[1].depth > 16);

    let display = errors[0].to_string();
    assert!(display.contains("stack too deep"));
    assert!(display.contains("function %h"));
}

#[test]
#[should_panic(expected = "duplicate function name")]
fn duplicate_named_function_faults() {
    let dialect = Dialect::evm();
    let mut module = Module::new();

    for _ in 0..2 {
        let f = module.declare_function(Signature::new("f", 2, 1));
        let mut builder = FunctionBuilder::new(module.func_mut(f), &dialect);
        let b0 = builder.make_block();
        builder.switch_to_block(b0);
        builder.ret(&[builder.arg(0)]);
    }
    {
        let mut builder = FunctionBuilder::new(&mut module.main, &dialect);
        let b0 = builder.make_block();
        builder.switch_to_block(b0);
        builder.builtin(dialect.lookup("stop").unwrap(), &[]);
    }

    let mut asm = TextAssembly::new(&dialect);
    lower_module(&mut asm, &dialect, &module, LabelNaming::NamedUnique);
}

#[test]
fn duplicate_names_fall_back_to_anonymous_labels() {
    let dialect = Dialect::evm();
    let mut module = Module::new();

    for _ in 0..2 {
        let f = module.declare_function(Signature::new("f", 2, 1));
        let mut builder = FunctionBuilder::new(module.func_mut(f), &dialect);
        let b0 = builder.make_block();
        builder.switch_to_block(b0);
        builder.ret(&[builder.arg(0)]);
    }
    {
        let mut builder = FunctionBuilder::new(&mut module.main, &dialect);
        let b0 = builder.make_block();
        builder.switch_to_block(b0);
        builder.builtin(dialect.lookup("stop").unwrap(), &[]);
    }

    let mut asm = CheckedAssembly::new(&dialect);
    let errors = lower_module(&mut asm, &dialect, &module, LabelNaming::Named);
    assert!(errors.is_empty());

    let output = asm.finish();
    assert!(output.contains("f:"));
    assert!(output.contains("L1:"));
}
