//! Import objects: named host modules the embedder builds and registers
//! with a store to extend the module environment.

use crate::func::FunctionInstance;
use crate::global::GlobalInstance;
use crate::interpreter::HostContext;
use crate::memory::MemoryInstance;
use crate::table::TableInstance;
use crate::trap::Trap;
use crate::types::FuncType;
use crate::values::Value;
use std::rc::Rc;

/// A host function body. Runs synchronously on the interpreter's thread;
/// the context exposes the caller's memory, the store, and re-entry into
/// the interpreter.
pub trait HostCallable {
    fn call(&self, ctx: &mut HostContext<'_>, args: &[Value]) -> Result<Vec<Value>, Trap>;
}

impl<F> HostCallable for F
where
    F: Fn(&mut HostContext<'_>, &[Value]) -> Result<Vec<Value>, Trap>,
{
    fn call(&self, ctx: &mut HostContext<'_>, args: &[Value]) -> Result<Vec<Value>, Trap> {
        self(ctx, args)
    }
}

/// A named host module publishing functions, tables, memories and globals
/// to be linked at instantiation.
///
/// Adding an instance moves it into the import object; registering the
/// import object with a store moves everything into the store keyed under
/// the module name.
pub struct ImportObject {
    name: String,
    pub(crate) funcs: Vec<(String, FunctionInstance)>,
    pub(crate) tables: Vec<(String, TableInstance)>,
    pub(crate) memories: Vec<(String, MemoryInstance)>,
    pub(crate) globals: Vec<(String, GlobalInstance)>,
}

impl ImportObject {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            funcs: Vec::new(),
            tables: Vec::new(),
            memories: Vec::new(),
            globals: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn add_func(
        &mut self,
        name: impl Into<String>,
        ty: FuncType,
        callable: impl HostCallable + 'static,
    ) -> &mut Self {
        self.funcs
            .push((name.into(), FunctionInstance::host(ty, Rc::new(callable))));
        self
    }

    pub fn add_table(&mut self, name: impl Into<String>, table: TableInstance) -> &mut Self {
        self.tables.push((name.into(), table));
        self
    }

    pub fn add_memory(&mut self, name: impl Into<String>, memory: MemoryInstance) -> &mut Self {
        self.memories.push((name.into(), memory));
        self
    }

    pub fn add_global(&mut self, name: impl Into<String>, global: GlobalInstance) -> &mut Self {
        self.globals.push((name.into(), global));
        self
    }
}

impl core::fmt::Debug for ImportObject {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ImportObject")
            .field("name", &self.name)
            .field("funcs", &self.funcs.len())
            .field("tables", &self.tables.len())
            .field("memories", &self.memories.len())
            .field("globals", &self.globals.len())
            .finish()
    }
}
