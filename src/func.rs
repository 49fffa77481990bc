use crate::ast::FunctionBody;
use crate::import::HostCallable;
use crate::indices::ModuleAddr;
use crate::types::FuncType;
use core::fmt;
use std::rc::Rc;
use std::sync::Arc;

/// A function defined in Wasm code: its type, the module context it closes
/// over (for resolving calls, type indices, tables and memories), and its
/// shared body.
#[derive(Debug, Clone)]
pub struct WasmFunc {
    pub(crate) ty: FuncType,
    pub(crate) module: ModuleAddr,
    pub(crate) body: Arc<FunctionBody>,
}

/// A host-provided function: its declared type and the callable supplied
/// through an import object.
#[derive(Clone)]
pub struct HostFunc {
    pub(crate) ty: FuncType,
    pub(crate) callable: Rc<dyn HostCallable>,
}

impl fmt::Debug for HostFunc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostFunc").field("ty", &self.ty).finish_non_exhaustive()
    }
}

/// A function instance in the store.
#[derive(Debug, Clone)]
pub enum FunctionInstance {
    Wasm(WasmFunc),
    Host(HostFunc),
}

impl FunctionInstance {
    pub(crate) fn wasm(ty: FuncType, module: ModuleAddr, body: Arc<FunctionBody>) -> Self {
        Self::Wasm(WasmFunc { ty, module, body })
    }

    pub(crate) fn host(ty: FuncType, callable: Rc<dyn HostCallable>) -> Self {
        Self::Host(HostFunc { ty, callable })
    }

    pub fn ty(&self) -> &FuncType {
        match self {
            Self::Wasm(f) => &f.ty,
            Self::Host(f) => &f.ty,
        }
    }

    pub fn is_host(&self) -> bool {
        matches!(self, Self::Host(_))
    }
}
