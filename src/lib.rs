//! An embeddable WebAssembly runtime.
//!
//! `reedvm` loads Wasm binary modules, validates them against the core
//! specification, instantiates them into an isolated store and invokes
//! exported functions with typed arguments. Execution is interpreted,
//! with per-opcode cost metering and a trap model that never corrupts the
//! store.
//!
//! The highest-level entry point is [`Vm`], which drives the whole
//! load → validate → instantiate → invoke pipeline:
//!
//! ```no_run
//! use reedvm::{Config, Value, Vm};
//!
//! # fn main() -> reedvm::Result<()> {
//! let mut vm = Vm::new(Config::default())?;
//! let results = vm.run_wasm_from_file("add.wasm", "add", &[Value::I32(3), Value::I32(4)])?;
//! assert_eq!(results, vec![Value::I32(7)]);
//! # Ok(())
//! # }
//! ```
//!
//! The pipeline stages ([`Loader`], [`Validator`], [`Interpreter`],
//! [`Store`], [`Statistics`]) are public for embedders that want to drive
//! them separately, and [`ImportObject`] extends the module environment
//! with host functions, tables, memories and globals ([`WasiModule`] is
//! the built-in one).

pub mod ast;
mod config;
mod const_eval;
mod errors;
mod func;
mod global;
mod import;
mod indices;
mod instance;
mod interpreter;
mod loader;
pub mod logging;
mod memory;
mod statistics;
mod store;
mod table;
mod trap;
mod types;
mod utils;
mod validator;
mod values;
mod vm;
mod wasi;

pub use config::{Config, HostRegistration, Proposal, DEFAULT_MAX_MEMORY_PAGES};
pub use const_eval::ConstExprEvaluator;
pub use errors::{
    code_is_ok, message_for_code, Error, LinkErrorKind, LoadErrorKind, ValidationErrorKind,
};
pub use func::FunctionInstance;
pub use global::GlobalInstance;
pub use import::{HostCallable, ImportObject};
pub use indices::{
    DataIndex, ElemIndex, EntityIndex, FuncAddr, FuncIndex, GlobalAddr, GlobalIndex, MemAddr,
    MemoryIndex, ModuleAddr, TableAddr, TableIndex, TypeIndex,
};
pub use instance::{ExportEntry, ExternVal, ModuleInstance};
pub use interpreter::{HostContext, Interpreter};
pub use loader::Loader;
pub use memory::MemoryInstance;
pub use statistics::Statistics;
pub use store::Store;
pub use table::TableInstance;
pub use trap::Trap;
pub use types::{
    BlockType, ExternType, FuncType, GlobalType, Limits, MemoryType, Mutability, RefType,
    TableType, ValType,
};
pub use validator::Validator;
pub use values::{ExternRef, Value};
pub use vm::Vm;
pub use wasi::{WasiModule, WASI_MODULE_NAME};

/// WebAssembly page size: 64 KiB.
pub const WASM_PAGE_SIZE: u32 = 0x10000;

/// The number of pages a 32-bit memory can address.
pub const WASM32_MAX_PAGES: u32 = 1 << 16;

/// Maximum number of activation frames in one invocation, host
/// re-entries included.
pub const CALL_STACK_LIMIT: usize = interpreter::CALL_STACK_LIMIT;

pub type Result<T, E = Error> = core::result::Result<T, E>;
