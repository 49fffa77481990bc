use crate::ast::{ConstExpr, ConstOp};
use crate::indices::FuncAddr;
use crate::values::Value;
use smallvec::SmallVec;

/// Evaluates constant initializer expressions in an instantiation context:
/// `globals` holds the values of every global materialized so far (imports
/// first), `funcs` the module's function index space resolved to store
/// addresses.
///
/// Indices were checked by the validator, so evaluation cannot fail.
#[derive(Debug, Default)]
pub struct ConstExprEvaluator {
    stack: SmallVec<[Value; 2]>,
}

impl ConstExprEvaluator {
    pub fn eval(&mut self, expr: &ConstExpr, globals: &[Value], funcs: &[FuncAddr]) -> Value {
        for op in expr.ops() {
            match *op {
                ConstOp::I32Const(value) => self.stack.push(Value::I32(value)),
                ConstOp::I64Const(value) => self.stack.push(Value::I64(value)),
                ConstOp::F32Const(bits) => self.stack.push(Value::F32(bits)),
                ConstOp::F64Const(bits) => self.stack.push(Value::F64(bits)),
                ConstOp::V128Const(value) => self.stack.push(Value::V128(value)),
                ConstOp::GlobalGet(index) => {
                    self.stack.push(globals[index.as_u32() as usize]);
                }
                ConstOp::RefNull(ty) => self.stack.push(Value::null_ref(ty)),
                ConstOp::RefFunc(index) => {
                    self.stack
                        .push(Value::FuncRef(Some(funcs[index.as_u32() as usize])));
                }
            }
        }

        assert_eq!(self.stack.len(), 1);
        self.stack.pop().expect("empty const-expr stack")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indices::GlobalIndex;

    #[test]
    fn global_get_reads_the_materialized_value() {
        let mut eval = ConstExprEvaluator::default();
        let globals = [Value::I32(41), Value::I64(7)];
        let expr = ConstExpr::new(vec![ConstOp::GlobalGet(GlobalIndex::from_u32(0))]);
        assert_eq!(eval.eval(&expr, &globals, &[]), Value::I32(41));
    }

    #[test]
    fn ref_func_resolves_to_the_store_address() {
        let mut eval = ConstExprEvaluator::default();
        let funcs = [FuncAddr::from_u32(9)];
        let expr = ConstExpr::new(vec![ConstOp::RefFunc(crate::indices::FuncIndex::from_u32(
            0,
        ))]);
        assert_eq!(
            eval.eval(&expr, &[], &funcs),
            Value::FuncRef(Some(FuncAddr::from_u32(9)))
        );
    }
}
