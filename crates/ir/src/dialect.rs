//! Target dialect: the namespace of builtin operations a unit may use.

use cranelift_entity::PrimaryMap;
use indexmap::IndexMap;

/// An opaque reference to [`BuiltinData`].
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Copy, Hash)]
pub struct BuiltinRef(pub u32);
cranelift_entity::entity_impl!(BuiltinRef);

#[derive(Debug, Clone)]
pub struct BuiltinData {
    pub name: &'static str,
    pub inputs: usize,
    pub outputs: usize,
    /// Halts control flow; a block may end with a terminating builtin.
    pub terminator: bool,
}

/// A registry of builtins. Registration order is preserved, so builtin
/// references are deterministic for a fixed declaration sequence.
#[derive(Debug, Default)]
pub struct Dialect {
    builtins: PrimaryMap<BuiltinRef, BuiltinData>,
    by_name: IndexMap<&'static str, BuiltinRef>,
}

impl Dialect {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn declare(
        &mut self,
        name: &'static str,
        inputs: usize,
        outputs: usize,
        terminator: bool,
    ) -> BuiltinRef {
        assert!(
            !self.by_name.contains_key(name),
            "duplicate builtin `{name}`"
        );

        let builtin = self.builtins.push(BuiltinData {
            name,
            inputs,
            outputs,
            terminator,
        });
        self.by_name.insert(name, builtin);
        builtin
    }

    pub fn builtin(&self, builtin: BuiltinRef) -> &BuiltinData {
        &self.builtins[builtin]
    }

    pub fn lookup(&self, name: &str) -> Option<BuiltinRef> {
        self.by_name.get(name).copied()
    }

    /// The EVM-flavored builtin set used by tests and demos.
    pub fn evm() -> Self {
        let mut dialect = Self::new();
        for (name, inputs, outputs) in [
            ("add", 2, 1),
            ("sub", 2, 1),
            ("mul", 2, 1),
            ("div", 2, 1),
            ("lt", 2, 1),
            ("gt", 2, 1),
            ("eq", 2, 1),
            ("iszero", 1, 1),
            ("and", 2, 1),
            ("or", 2, 1),
            ("xor", 2, 1),
            ("not", 1, 1),
            ("shl", 2, 1),
            ("shr", 2, 1),
            ("keccak256", 2, 1),
            ("address", 0, 1),
            ("caller", 0, 1),
            ("callvalue", 0, 1),
            ("calldataload", 1, 1),
            ("calldatasize", 0, 1),
            ("gas", 0, 1),
            ("mload", 1, 1),
            ("mstore", 2, 0),
            ("sload", 1, 1),
            ("sstore", 2, 0),
        ] {
            dialect.declare(name, inputs, outputs, false);
        }
        for (name, inputs) in [("stop", 0), ("return", 2), ("revert", 2), ("invalid", 0)] {
            dialect.declare(name, inputs, 0, true);
        }
        dialect
    }
}

#[cfg(test)]
mod tests {
    use super::Dialect;

    #[test]
    fn evm_builtins() {
        let dialect = Dialect::evm();

        let add = dialect.lookup("add").unwrap();
        assert_eq!(dialect.builtin(add).inputs, 2);
        assert_eq!(dialect.builtin(add).outputs, 1);
        assert!(!dialect.builtin(add).terminator);

        let stop = dialect.lookup("stop").unwrap();
        assert!(dialect.builtin(stop).terminator);

        assert!(dialect.lookup("dup1").is_none());
    }

    #[test]
    #[should_panic(expected = "duplicate builtin")]
    fn duplicate_declaration() {
        let mut dialect = Dialect::new();
        dialect.declare("noop", 0, 0, false);
        dialect.declare("noop", 1, 1, false);
    }
}
