use cranelift_entity::{entity_impl, PrimaryMap};

use crate::{Function, Signature};

/// An opaque reference to a function of a [`Module`].
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FuncRef(pub u32);
cranelift_entity::entity_impl!(FuncRef, "func");

/// A whole program: the entry sequence plus every function it references.
pub struct Module {
    /// The entry sequence. It is compiled from an empty stack and takes no
    /// arguments.
    pub main: Function,

    /// Holds all functions declared in the program.
    pub funcs: PrimaryMap<FuncRef, Function>,
}

impl Module {
    pub fn new() -> Self {
        Self {
            main: Function::new(Signature::new("main", 0, 0)),
            funcs: PrimaryMap::default(),
        }
    }

    pub fn declare_function(&mut self, sig: Signature) -> FuncRef {
        self.funcs.push(Function::new(sig))
    }

    pub fn func(&self, func: FuncRef) -> &Function {
        &self.funcs[func]
    }

    pub fn func_mut(&mut self, func: FuncRef) -> &mut Function {
        &mut self.funcs[func]
    }
}

impl Default for Module {
    fn default() -> Self {
        Self::new()
    }
}
