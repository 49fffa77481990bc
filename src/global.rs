use crate::types::{GlobalType, Mutability};
use crate::values::Value;

/// A global instance: a typed cell that is writable only when declared
/// `var`.
#[derive(Debug, Clone)]
pub struct GlobalInstance {
    ty: GlobalType,
    value: Value,
}

impl GlobalInstance {
    pub fn new(ty: GlobalType, value: Value) -> Self {
        Self { ty, value }
    }

    pub fn ty(&self) -> &GlobalType {
        &self.ty
    }

    pub fn mutability(&self) -> Mutability {
        self.ty.mutability
    }

    pub fn value(&self) -> Value {
        self.value
    }

    /// Embedder-boundary write: silently ignored for `const` globals.
    /// (`global.set` on a constant never reaches execution; the validator
    /// rejects it.)
    pub fn set_value(&mut self, value: Value) {
        if self.ty.mutability == Mutability::Var {
            self.value = value;
        }
    }

    /// Instruction-level write; mutability was established by validation.
    pub(crate) fn set_unchecked(&mut self, value: Value) {
        self.value = value;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ValType;

    #[test]
    fn const_globals_ignore_embedder_writes() {
        let mut g = GlobalInstance::new(
            GlobalType {
                content: ValType::I32,
                mutability: Mutability::Const,
            },
            Value::I32(7),
        );
        g.set_value(Value::I32(9));
        assert_eq!(g.value(), Value::I32(7));

        let mut g = GlobalInstance::new(
            GlobalType {
                content: ValType::I32,
                mutability: Mutability::Var,
            },
            Value::I32(7),
        );
        g.set_value(Value::I32(9));
        assert_eq!(g.value(), Value::I32(9));
    }
}
