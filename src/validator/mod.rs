//! Structural and type validation over the AST module.
//!
//! Only validated modules reach the instantiator; the interpreter relies
//! on every index being resolvable and every body being well-typed.

mod func;

use crate::ast::{self, ConstExpr, ConstOp, DataMode, ElementMode};
use crate::config::{Config, Proposal};
use crate::errors::{Error, ValidationErrorKind};
use crate::indices::{EntityIndex, FuncIndex};
use crate::types::{FuncType, Limits, ValType};
use hashbrown::{HashMap, HashSet};
use log::debug;

/// The module validator. Holds only the configuration snapshot (memory
/// page cap, enabled proposals).
#[derive(Debug, Clone)]
pub struct Validator {
    config: Config,
}

impl Validator {
    pub fn new(config: &Config) -> Self {
        Self { config: *config }
    }

    pub fn validate(&self, module: &ast::Module) -> crate::Result<()> {
        self.check_functions(module)?;
        self.check_tables(module)?;
        self.check_memories(module)?;
        self.check_globals(module)?;
        self.check_exports(module)?;
        self.check_start(module)?;
        self.check_elements(module)?;
        self.check_datas(module)?;
        self.check_code(module)?;
        debug!("validated module: {} defined functions", module.num_defined_funcs());
        Ok(())
    }

    fn check_functions(&self, module: &ast::Module) -> crate::Result<()> {
        for (_, ty) in module.functions.iter() {
            if module.types.get(*ty).is_none() {
                return Err(Error::validation(ValidationErrorKind::UnknownType));
            }
        }
        Ok(())
    }

    fn check_limits(&self, limits: &Limits) -> crate::Result<()> {
        if !limits.is_well_formed() {
            return Err(Error::validation(ValidationErrorKind::InvalidLimits));
        }
        Ok(())
    }

    fn check_tables(&self, module: &ast::Module) -> crate::Result<()> {
        if module.tables.len() > 1 && !self.config.has_proposal(Proposal::ReferenceTypes) {
            return Err(Error::validation(ValidationErrorKind::InvalidLimits));
        }
        for (_, ty) in module.tables.iter() {
            self.check_limits(&ty.limits)?;
        }
        Ok(())
    }

    fn check_memories(&self, module: &ast::Module) -> crate::Result<()> {
        if module.memories.len() > 1 {
            return Err(Error::validation(ValidationErrorKind::InvalidLimits));
        }
        let cap = self.config.max_memory_pages();
        for (_, ty) in module.memories.iter() {
            self.check_limits(&ty.limits)?;
            // Declared bounds beyond the configured cap are rejected here
            // rather than silently clamped.
            if ty.limits.min > cap || ty.limits.max.is_some_and(|max| max > cap) {
                return Err(Error::validation(ValidationErrorKind::InvalidLimits));
            }
        }
        Ok(())
    }

    /// Constant expressions may read only imported immutable globals and
    /// must produce exactly the expected type.
    fn check_const_expr(
        &self,
        module: &ast::Module,
        expr: &ConstExpr,
        expected: ValType,
    ) -> Result<(), ValidationErrorKind> {
        let [op] = expr.ops() else {
            return Err(ValidationErrorKind::InvalidConstExpr);
        };
        let produced = match *op {
            ConstOp::I32Const(_) => ValType::I32,
            ConstOp::I64Const(_) => ValType::I64,
            ConstOp::F32Const(_) => ValType::F32,
            ConstOp::F64Const(_) => ValType::F64,
            ConstOp::V128Const(_) => ValType::V128,
            ConstOp::GlobalGet(index) => {
                if index.as_u32() >= module.num_imported_globals {
                    return Err(ValidationErrorKind::InvalidConstExpr);
                }
                let ty = module
                    .globals
                    .get(index)
                    .ok_or(ValidationErrorKind::UnknownGlobal)?;
                if ty.mutability != crate::types::Mutability::Const {
                    return Err(ValidationErrorKind::InvalidConstExpr);
                }
                ty.content
            }
            ConstOp::RefNull(ty) => ty.into(),
            ConstOp::RefFunc(index) => {
                if module.func_type(index).is_none() {
                    return Err(ValidationErrorKind::UnknownFunc);
                }
                ValType::FuncRef
            }
        };
        if produced != expected {
            return Err(ValidationErrorKind::InvalidConstExpr);
        }
        Ok(())
    }

    fn check_globals(&self, module: &ast::Module) -> crate::Result<()> {
        let defined = module.globals.len() as u32 - module.num_imported_globals;
        debug_assert_eq!(defined as usize, module.global_inits.len());
        for (i, init) in module.global_inits.iter().enumerate() {
            let index =
                crate::indices::GlobalIndex::from_u32(module.num_imported_globals + i as u32);
            let ty = module.globals[index];
            self.check_const_expr(module, init, ty.content)
                .map_err(Error::validation)?;
        }
        Ok(())
    }

    fn check_exports(&self, module: &ast::Module) -> crate::Result<()> {
        let mut seen: HashMap<&str, ()> = HashMap::new();
        for export in &module.exports {
            if seen.insert(export.name.as_str(), ()).is_some() {
                return Err(Error::validation(ValidationErrorKind::DuplicateExportName));
            }
            let ok = match export.desc {
                EntityIndex::Function(index) => module.functions.get(index).is_some(),
                EntityIndex::Table(index) => module.tables.get(index).is_some(),
                EntityIndex::Memory(index) => module.memories.get(index).is_some(),
                EntityIndex::Global(index) => module.globals.get(index).is_some(),
            };
            if !ok {
                let kind = match export.desc {
                    EntityIndex::Function(_) => ValidationErrorKind::UnknownFunc,
                    EntityIndex::Table(_) => ValidationErrorKind::UnknownTable,
                    EntityIndex::Memory(_) => ValidationErrorKind::UnknownMemory,
                    EntityIndex::Global(_) => ValidationErrorKind::UnknownGlobal,
                };
                return Err(Error::validation(kind));
            }
        }
        Ok(())
    }

    fn check_start(&self, module: &ast::Module) -> crate::Result<()> {
        let Some(start) = module.start else {
            return Ok(());
        };
        let ty = module
            .func_type(start)
            .ok_or_else(|| Error::validation(ValidationErrorKind::UnknownFunc))?;
        if !ty.params().is_empty() || !ty.results().is_empty() {
            return Err(Error::validation(ValidationErrorKind::InvalidStartFunc));
        }
        Ok(())
    }

    fn check_elements(&self, module: &ast::Module) -> crate::Result<()> {
        for segment in &module.elements {
            for item in &segment.items {
                self.check_const_expr(module, item, segment.ty.into())
                    .map_err(Error::validation)?;
            }
            if let ElementMode::Active { table, offset } = &segment.mode {
                let table_ty = module
                    .tables
                    .get(*table)
                    .ok_or_else(|| Error::validation(ValidationErrorKind::UnknownTable))?;
                if table_ty.elem != segment.ty {
                    return Err(Error::validation(ValidationErrorKind::TypeCheckFailed));
                }
                self.check_const_expr(module, offset, ValType::I32)
                    .map_err(Error::validation)?;
            }
        }
        Ok(())
    }

    fn check_datas(&self, module: &ast::Module) -> crate::Result<()> {
        for segment in &module.datas {
            if let DataMode::Active { memory, offset } = &segment.mode {
                if module.memories.get(*memory).is_none() {
                    return Err(Error::validation(ValidationErrorKind::UnknownMemory));
                }
                self.check_const_expr(module, offset, ValType::I32)
                    .map_err(Error::validation)?;
            }
        }
        Ok(())
    }

    /// Functions that may be referenced by `ref.func` in code: those
    /// mentioned outside code, in element segments, global initializers or
    /// exports.
    fn declared_funcs(&self, module: &ast::Module) -> HashSet<FuncIndex> {
        let mut declared = HashSet::new();
        for segment in &module.elements {
            for item in &segment.items {
                if let [ConstOp::RefFunc(index)] = item.ops() {
                    declared.insert(*index);
                }
            }
        }
        for init in &module.global_inits {
            if let [ConstOp::RefFunc(index)] = init.ops() {
                declared.insert(*index);
            }
        }
        for export in &module.exports {
            if let EntityIndex::Function(index) = export.desc {
                declared.insert(index);
            }
        }
        declared
    }

    fn check_code(&self, module: &ast::Module) -> crate::Result<()> {
        let declared = self.declared_funcs(module);
        for (i, body) in module.code.iter().enumerate() {
            let func_index = FuncIndex::from_u32(module.num_imported_funcs + i as u32);
            let ty: &FuncType = module
                .func_type(func_index)
                .ok_or_else(|| Error::validation(ValidationErrorKind::UnknownType))?;
            func::validate_func(module, &declared, ty, body).map_err(|(kind, offset)| {
                Error::Validation {
                    kind,
                    func: Some(func_index.as_u32()),
                    offset: Some(offset),
                }
            })?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader::Loader;

    fn validate(wat: &str) -> crate::Result<()> {
        let config = Config::default();
        let module = Loader::new(&config).parse_wat(wat).unwrap();
        Validator::new(&config).validate(&module)
    }

    fn kind(result: crate::Result<()>) -> ValidationErrorKind {
        match result.unwrap_err() {
            Error::Validation { kind, .. } => kind,
            other => panic!("expected validation error, got {other:?}"),
        }
    }

    #[test]
    fn well_typed_module_validates() {
        validate(
            r#"(module
                (func (export "add") (param i32 i32) (result i32)
                    local.get 0
                    local.get 1
                    i32.add))"#,
        )
        .unwrap();
    }

    #[test]
    fn stack_underflow_is_a_type_error() {
        let result = validate(r#"(module (func (result i32) i32.add))"#);
        assert_eq!(kind(result), ValidationErrorKind::TypeCheckFailed);
    }

    #[test]
    fn mismatched_end_types_reject() {
        let result = validate(r#"(module (func (result i32) i64.const 1))"#);
        assert_eq!(kind(result), ValidationErrorKind::TypeCheckFailed);
    }

    #[test]
    fn branches_check_their_label_types() {
        validate(
            r#"(module (func (result i32)
                (block (result i32)
                    i32.const 1
                    br 0)))"#,
        )
        .unwrap();
        let result = validate
            (r#"(module (func (result i32)
                (block (result i32)
                    br 0)))"#,
        );
        assert_eq!(kind(result), ValidationErrorKind::TypeCheckFailed);
    }

    #[test]
    fn code_after_unreachable_is_polymorphic() {
        validate(
            r#"(module (func (result i32)
                unreachable
                i32.add))"#,
        )
        .unwrap();
    }

    #[test]
    fn global_set_on_const_is_invalid_mut() {
        let result = validate(
            r#"(module
                (global i32 (i32.const 1))
                (func (global.set 0 (i32.const 2))))"#,
        );
        assert_eq!(kind(result), ValidationErrorKind::InvalidMut);
    }

    #[test]
    fn unknown_local_rejects() {
        let result = validate(r#"(module (func (drop (local.get 3))))"#);
        assert_eq!(kind(result), ValidationErrorKind::UnknownLocal);
    }

    #[test]
    fn over_aligned_load_rejects() {
        let result = validate(
            r#"(module (memory 1)
                (func (result i32) (i32.load align=8 (i32.const 0))))"#,
        );
        assert_eq!(kind(result), ValidationErrorKind::InvalidAlignment);
    }

    #[test]
    fn duplicate_export_names_reject() {
        let result = validate(
            r#"(module
                (func (export "f"))
                (func (export "f")))"#,
        );
        assert_eq!(kind(result), ValidationErrorKind::DuplicateExportName);
    }

    #[test]
    fn start_function_must_take_and_return_nothing() {
        let result = validate(
            r#"(module
                (func $s (param i32))
                (start $s))"#,
        );
        assert_eq!(kind(result), ValidationErrorKind::InvalidStartFunc);
    }

    #[test]
    fn declared_memory_beyond_the_page_cap_rejects() {
        let mut config = Config::default();
        config.set_max_memory_pages(16);
        let module = Loader::new(&config)
            .parse_wat(r#"(module (memory 1 64))"#)
            .unwrap();
        let result = Validator::new(&config).validate(&module);
        assert_eq!(kind(result), ValidationErrorKind::InvalidLimits);
    }

    #[test]
    fn global_init_may_only_read_imported_const_globals() {
        let result = validate(
            r#"(module
                (global $a i32 (i32.const 1))
                (global $b i32 (global.get $a)))"#,
        );
        assert_eq!(kind(result), ValidationErrorKind::InvalidConstExpr);
    }

    #[test]
    fn validation_errors_cite_function_and_offset() {
        let config = Config::default();
        let module = Loader::new(&config)
            .parse_wat(
                r#"(module
                    (func (result i32)
                        i32.const 1
                        i64.const 2
                        i32.add))"#,
            )
            .unwrap();
        match Validator::new(&config).validate(&module).unwrap_err() {
            Error::Validation { func, offset, .. } => {
                assert_eq!(func, Some(0));
                assert_eq!(offset, Some(2));
            }
            other => panic!("expected validation error, got {other:?}"),
        }
    }
}
