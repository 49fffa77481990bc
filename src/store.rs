//! The owning registry of all runtime instances.
//!
//! Instances live in per-kind slabs indexed by typed addresses; references
//! between instances are addresses, never pointers, which keeps the
//! (cyclic) module graph acyclic in ownership terms and makes reset a
//! truncation.

use crate::errors::Error;
use crate::func::FunctionInstance;
use crate::global::GlobalInstance;
use crate::indices::{FuncAddr, GlobalAddr, MemAddr, ModuleAddr, TableAddr};
use crate::instance::ModuleInstance;
use crate::memory::MemoryInstance;
use crate::table::TableInstance;
use hashbrown::HashMap;
use log::debug;

/// Per-kind slab lengths, used to mark the registered region and to roll
/// back failed instantiations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub(crate) struct StoreMarks {
    funcs: usize,
    tables: usize,
    memories: usize,
    globals: usize,
    modules: usize,
}

#[derive(Debug, Default)]
pub struct Store {
    funcs: Vec<FunctionInstance>,
    tables: Vec<TableInstance>,
    memories: Vec<MemoryInstance>,
    globals: Vec<GlobalInstance>,
    modules: Vec<ModuleInstance>,
    /// Registered (named) modules; everything at slab positions below
    /// `registered` belongs to them or to registered host modules and
    /// survives reset.
    named: HashMap<String, ModuleAddr>,
    registered: StoreMarks,
    /// The most recently instantiated anonymous module.
    active: Option<ModuleAddr>,
}

macro_rules! slab_impls {
    ($bind:ident $(($ty:path, $addr:ty, $push:ident, $get:ident, $get_mut:ident, $field:expr))*) => {
        $(
            impl Store {
                pub fn $get(&self, addr: $addr) -> Option<&$ty> {
                    let $bind = self;
                    $field.get(addr.as_u32() as usize)
                }

                pub fn $get_mut(&mut self, addr: $addr) -> Option<&mut $ty> {
                    let $bind = self;
                    $field.get_mut(addr.as_u32() as usize)
                }

                pub fn $push(&mut self, val: $ty) -> $addr {
                    let $bind = self;
                    let addr = <$addr>::from_u32($field.len() as u32);
                    $field.push(val);
                    addr
                }
            }

            impl ::core::ops::Index<$addr> for Store {
                type Output = $ty;

                fn index(&self, addr: $addr) -> &Self::Output {
                    self.$get(addr).expect("stale instance address")
                }
            }

            impl ::core::ops::IndexMut<$addr> for Store {
                fn index_mut(&mut self, addr: $addr) -> &mut Self::Output {
                    self.$get_mut(addr).expect("stale instance address")
                }
            }
        )*
    };
}

slab_impls! {
    s
    (FunctionInstance, FuncAddr, push_function, get_function, get_function_mut, s.funcs)
    (TableInstance, TableAddr, push_table, get_table, get_table_mut, s.tables)
    (MemoryInstance, MemAddr, push_memory, get_memory, get_memory_mut, s.memories)
    (GlobalInstance, GlobalAddr, push_global, get_global, get_global_mut, s.globals)
    (ModuleInstance, ModuleAddr, push_module, get_module, get_module_mut, s.modules)
}

impl Store {
    pub fn new() -> Self {
        Self::default()
    }

    /// The anonymous module: the most recently instantiated unnamed one.
    pub fn active_module(&self) -> Option<ModuleAddr> {
        self.active
    }

    pub(crate) fn set_active_module(&mut self, addr: ModuleAddr) {
        self.active = Some(addr);
    }

    /// Find a registered module by name.
    pub fn find_module(&self, name: &str) -> Option<ModuleAddr> {
        self.named.get(name).copied()
    }

    pub fn module_names(&self) -> impl Iterator<Item = &str> {
        self.named.keys().map(String::as_str)
    }

    /// Promote the module (and every instance allocated so far) into the
    /// registered region so it survives reset.
    pub(crate) fn register_module(
        &mut self,
        name: &str,
        addr: ModuleAddr,
    ) -> crate::Result<()> {
        if self.named.contains_key(name) {
            return Err(Error::ModuleNameConflict(name.to_owned()));
        }
        self.named.insert(name.to_owned(), addr);
        self.registered = self.marks();
        Ok(())
    }

    pub(crate) fn marks(&self) -> StoreMarks {
        StoreMarks {
            funcs: self.funcs.len(),
            tables: self.tables.len(),
            memories: self.memories.len(),
            globals: self.globals.len(),
            modules: self.modules.len(),
        }
    }

    /// Roll the slabs back to a snapshot taken before a failed
    /// instantiation.
    pub(crate) fn rollback(&mut self, marks: StoreMarks) {
        self.funcs.truncate(marks.funcs);
        self.tables.truncate(marks.tables);
        self.memories.truncate(marks.memories);
        self.globals.truncate(marks.globals);
        self.modules.truncate(marks.modules);
        if let Some(active) = self.active {
            if active.as_u32() as usize >= self.modules.len() {
                self.active = None;
            }
        }
    }

    /// Clear the anonymous module and every instance not owned by a
    /// registered module or host import object. Addresses in the cleared
    /// region are reused by later instantiations.
    pub fn reset(&mut self) {
        let marks = self.registered;
        debug!(
            "store reset: dropping {} funcs, {} tables, {} memories, {} globals, {} modules",
            self.funcs.len() - marks.funcs,
            self.tables.len() - marks.tables,
            self.memories.len() - marks.memories,
            self.globals.len() - marks.globals,
            self.modules.len() - marks.modules,
        );
        self.rollback(marks);
        self.active = None;
    }

    /// Lookup of an exported function by `(module-name, field-name)` across
    /// registered modules.
    pub fn find_func(&self, module: &str, field: &str) -> Option<FuncAddr> {
        let module = self.get_module(self.find_module(module)?)?;
        module.exported_func(field)
    }

    /// Exported function `name -> address` pairs of the anonymous module.
    pub fn function_exports(&self) -> Vec<(String, FuncAddr)> {
        self.active
            .and_then(|addr| self.get_module(addr))
            .map(|module| module.function_exports())
            .unwrap_or_default()
    }

    pub fn table_exports(&self) -> Vec<(String, TableAddr)> {
        self.active
            .and_then(|addr| self.get_module(addr))
            .map(|module| module.table_exports())
            .unwrap_or_default()
    }

    pub fn memory_exports(&self) -> Vec<(String, MemAddr)> {
        self.active
            .and_then(|addr| self.get_module(addr))
            .map(|module| module.memory_exports())
            .unwrap_or_default()
    }

    pub fn global_exports(&self) -> Vec<(String, GlobalAddr)> {
        self.active
            .and_then(|addr| self.get_module(addr))
            .map(|module| module.global_exports())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::global::GlobalInstance;
    use crate::types::{GlobalType, Mutability, ValType};
    use crate::values::Value;

    fn global(v: i32) -> GlobalInstance {
        GlobalInstance::new(
            GlobalType {
                content: ValType::I32,
                mutability: Mutability::Var,
            },
            Value::I32(v),
        )
    }

    #[test]
    fn addresses_are_monotone_and_stable() {
        let mut store = Store::new();
        let a = store.push_global(global(1));
        let b = store.push_global(global(2));
        assert_eq!(a.as_u32(), 0);
        assert_eq!(b.as_u32(), 1);
        assert_eq!(store[a].value(), Value::I32(1));
        assert_eq!(store[b].value(), Value::I32(2));
    }

    #[test]
    fn reset_clears_only_the_unregistered_region() {
        let mut store = Store::new();
        let kept = store.push_global(global(1));
        // Pretend a host module registration happened here.
        store.registered = store.marks();
        let dropped = store.push_global(global(2));

        store.reset();
        assert!(store.get_global(kept).is_some());
        assert!(store.get_global(dropped).is_none());

        // The dropped address is reused after reset.
        let reused = store.push_global(global(3));
        assert_eq!(reused, dropped);
        assert_eq!(store[reused].value(), Value::I32(3));
    }
}
