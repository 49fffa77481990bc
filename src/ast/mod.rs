//! The parsed-but-unvalidated representation of a module.
//!
//! The loader produces this; the validator checks it; the interpreter
//! instantiates it. Index spaces follow the binary format: imported
//! entities occupy the front of each space, defined entities follow.

mod instructions;

pub use instructions::{Instruction, MemArg, COST_TABLE_LEN, NO_ELSE};

use crate::indices::{EntityIndex, FuncIndex, GlobalIndex, MemoryIndex, TableIndex, TypeIndex};
use crate::types::{FuncType, GlobalType, MemoryType, RefType, TableType, ValType};
use cranelift_entity::PrimaryMap;
use std::sync::Arc;

/// A single operation of a constant initializer expression.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ConstOp {
    I32Const(i32),
    I64Const(i64),
    F32Const(u32),
    F64Const(u64),
    V128Const(u128),
    GlobalGet(GlobalIndex),
    RefNull(RefType),
    RefFunc(FuncIndex),
}

/// A constant initializer expression, used by global, element and data
/// segment definitions.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ConstExpr {
    ops: Vec<ConstOp>,
}

impl ConstExpr {
    pub fn new(ops: Vec<ConstOp>) -> Self {
        Self { ops }
    }

    pub fn ops(&self) -> &[ConstOp] {
        &self.ops
    }
}

/// What an import provides to the module.
#[derive(Debug, Clone, PartialEq)]
pub enum ImportDesc {
    Func(TypeIndex),
    Table(TableType),
    Memory(MemoryType),
    Global(GlobalType),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Import {
    pub module: String,
    pub field: String,
    pub desc: ImportDesc,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Export {
    pub name: String,
    pub desc: EntityIndex,
}

/// Where an element segment's items land.
#[derive(Debug, Clone, PartialEq)]
pub enum ElementMode {
    Active { table: TableIndex, offset: ConstExpr },
    Passive,
    Declared,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ElementSegment {
    pub ty: RefType,
    pub mode: ElementMode,
    /// Items normalized to constant expressions; plain function-index
    /// vectors become `ref.func` expressions.
    pub items: Vec<ConstExpr>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum DataMode {
    Active { memory: MemoryIndex, offset: ConstExpr },
    Passive,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DataSegment {
    pub mode: DataMode,
    pub bytes: Arc<[u8]>,
}

/// A custom section (id 0), retained opaquely.
#[derive(Debug, Clone, PartialEq)]
pub struct CustomSection {
    pub name: String,
    pub bytes: Vec<u8>,
}

/// The locals declaration and code of a defined function.
#[derive(Debug, Clone, PartialEq)]
pub struct FunctionBody {
    /// Declared locals, expanded from their run-length encoding. Parameters
    /// are not included.
    pub locals: Vec<ValType>,
    pub instrs: Box<[Instruction]>,
}

/// A parsed module. Owned by whoever drove the loader; instantiation only
/// borrows it (code bodies are shared into the store via `Arc`).
#[derive(Debug, Default)]
pub struct Module {
    pub types: PrimaryMap<TypeIndex, FuncType>,
    pub imports: Vec<Import>,

    /// Type of every function in the index space, imports included.
    pub functions: PrimaryMap<FuncIndex, TypeIndex>,
    pub tables: PrimaryMap<TableIndex, TableType>,
    pub memories: PrimaryMap<MemoryIndex, MemoryType>,
    pub globals: PrimaryMap<GlobalIndex, GlobalType>,
    /// Initializers of defined globals, parallel to the tail of `globals`.
    pub global_inits: Vec<ConstExpr>,

    pub num_imported_funcs: u32,
    pub num_imported_tables: u32,
    pub num_imported_memories: u32,
    pub num_imported_globals: u32,

    pub exports: Vec<Export>,
    pub start: Option<FuncIndex>,
    pub elements: Vec<ElementSegment>,
    pub datas: Vec<DataSegment>,
    pub data_count: Option<u32>,

    /// Bodies of defined functions, parallel to the tail of `functions`.
    pub code: Vec<Arc<FunctionBody>>,
    pub custom_sections: Vec<CustomSection>,
}

impl Module {
    pub fn func_type(&self, func: FuncIndex) -> Option<&FuncType> {
        let ty = *self.functions.get(func)?;
        self.types.get(ty)
    }

    pub fn is_imported_func(&self, func: FuncIndex) -> bool {
        func.as_u32() < self.num_imported_funcs
    }

    /// The body of a defined function, if `func` is not imported.
    pub fn func_body(&self, func: FuncIndex) -> Option<&Arc<FunctionBody>> {
        let defined = func.as_u32().checked_sub(self.num_imported_funcs)?;
        self.code.get(defined as usize)
    }

    pub fn num_defined_funcs(&self) -> u32 {
        self.functions.len() as u32 - self.num_imported_funcs
    }
}
