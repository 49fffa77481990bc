//! The interpreter: instruction execution (in [`exec`]) plus the
//! instantiator that materializes validated modules into a store, wires
//! imports, runs initializers and the start function, and registers the
//! result anonymously or under a name.

mod exec;
mod num;

pub(crate) use exec::CALL_STACK_LIMIT;

use crate::ast::{self, DataMode, ElementMode, ImportDesc};
use crate::config::Config;
use crate::const_eval::ConstExprEvaluator;
use crate::errors::{Error, LinkErrorKind};
use crate::func::FunctionInstance;
use crate::global::GlobalInstance;
use crate::import::ImportObject;
use crate::indices::{EntityIndex, FuncAddr, GlobalAddr, MemAddr, ModuleAddr, TableAddr};
use crate::instance::{ExternVal, ModuleInstance};
use crate::memory::MemoryInstance;
use crate::statistics::Statistics;
use crate::store::Store;
use crate::table::TableInstance;
use crate::trap::Trap;
use crate::types::Limits;
use crate::values::Value;
use log::{debug, error};
use std::sync::Arc;
use std::time::Instant;

/// What a host function sees while it runs: the caller's memory (if the
/// calling module declares one), the store, and re-entry into the
/// interpreter sharing the same statistics and depth accounting.
pub struct HostContext<'a> {
    pub(crate) config: &'a Config,
    pub(crate) store: &'a mut Store,
    pub(crate) stats: &'a mut Statistics,
    pub(crate) memory: Option<MemAddr>,
    pub(crate) depth: usize,
}

impl HostContext<'_> {
    pub fn store(&mut self) -> &mut Store {
        self.store
    }

    pub fn memory_addr(&self) -> Option<MemAddr> {
        self.memory
    }

    pub fn memory(&mut self) -> Option<&mut MemoryInstance> {
        let addr = self.memory?;
        self.store.get_memory_mut(addr)
    }

    /// Re-enter the interpreter from host code. Shares the store and the
    /// statistics, so cost metering continues across the host frame.
    pub fn invoke(&mut self, func: FuncAddr, args: &[Value]) -> Result<Vec<Value>, Trap> {
        exec::invoke(self.config, self.store, self.stats, func, args, self.depth)
    }
}

/// Pending active-segment writes, bounds-checked in full before anything
/// is copied.
struct TableWrite {
    table: TableAddr,
    offset: u32,
    items: Vec<Value>,
}

struct MemoryWrite {
    memory: MemAddr,
    offset: u32,
    bytes: Arc<[u8]>,
}

/// Executes validated modules against a store. Holds only the
/// configuration snapshot; all state lives in the store and statistics
/// passed per call.
#[derive(Debug, Clone)]
pub struct Interpreter {
    config: Config,
}

impl Interpreter {
    pub fn new(config: &Config) -> Self {
        Self { config: *config }
    }

    /// Instantiate `module` as the anonymous module, replacing any prior
    /// anonymous module.
    pub fn instantiate(
        &self,
        store: &mut Store,
        stats: &mut Statistics,
        module: &ast::Module,
    ) -> crate::Result<ModuleAddr> {
        self.instantiate_inner(store, stats, module, None)
    }

    /// Instantiate `module` and register it under `name`; it and its
    /// instances survive store resets from then on.
    pub fn register_module(
        &self,
        store: &mut Store,
        stats: &mut Statistics,
        module: &ast::Module,
        name: &str,
    ) -> crate::Result<ModuleAddr> {
        self.instantiate_inner(store, stats, module, Some(name))
    }

    /// Move an import object's instances into the store as a registered
    /// host module.
    pub fn register_import(
        &self,
        store: &mut Store,
        import: ImportObject,
    ) -> crate::Result<ModuleAddr> {
        if store.find_module(import.name()).is_some() {
            return Err(Error::ModuleNameConflict(import.name().to_owned()));
        }
        // Clear the anonymous region first so the promoted marks cannot
        // capture unregistered instances.
        store.reset();

        let name = import.name().to_owned();
        let inst = ModuleInstance::new(Some(name.clone()), Box::default());
        let addr = store.push_module(inst);
        for (field, func) in import.funcs {
            let faddr = store.push_function(func);
            let module = store.get_module_mut(addr).expect("just pushed");
            module.push_func(faddr);
            module.push_export(field, ExternVal::Func(faddr));
        }
        for (field, table) in import.tables {
            let taddr = store.push_table(table);
            let module = store.get_module_mut(addr).expect("just pushed");
            module.push_table(taddr);
            module.push_export(field, ExternVal::Table(taddr));
        }
        for (field, memory) in import.memories {
            let maddr = store.push_memory(memory);
            let module = store.get_module_mut(addr).expect("just pushed");
            module.push_memory(maddr);
            module.push_export(field, ExternVal::Memory(maddr));
        }
        for (field, global) in import.globals {
            let gaddr = store.push_global(global);
            let module = store.get_module_mut(addr).expect("just pushed");
            module.push_global(gaddr);
            module.push_export(field, ExternVal::Global(gaddr));
        }
        store.register_module(&name, addr)?;
        debug!("registered host module {name}");
        Ok(addr)
    }

    /// Invoke the function at `func` with typed arguments, metering into
    /// `stats`.
    pub fn invoke(
        &self,
        store: &mut Store,
        stats: &mut Statistics,
        func: FuncAddr,
        args: &[Value],
    ) -> crate::Result<Vec<Value>> {
        let ty = store
            .get_function(func)
            .ok_or_else(|| Error::FuncNotFound {
                module: None,
                field: format!("function address {}", func.as_u32()),
            })?
            .ty();
        if ty.params().len() != args.len()
            || args
                .iter()
                .zip(ty.params())
                .any(|(value, ty)| value.ty() != *ty)
        {
            return Err(Error::FuncSigMismatch);
        }

        let started = Instant::now();
        let result = exec::invoke(&self.config, store, stats, func, args, 0);
        stats.add_exec_time(started.elapsed());
        result.map_err(|trap| {
            error!("wasm trap: {trap}");
            Error::Trap(trap)
        })
    }

    /// Invoke an exported function of the anonymous module by name.
    pub fn invoke_by_name(
        &self,
        store: &mut Store,
        stats: &mut Statistics,
        name: &str,
        args: &[Value],
    ) -> crate::Result<Vec<Value>> {
        let func = store
            .active_module()
            .and_then(|addr| store.get_module(addr))
            .and_then(|module| module.exported_func(name))
            .ok_or_else(|| Error::FuncNotFound {
                module: None,
                field: name.to_owned(),
            })?;
        self.invoke(store, stats, func, args)
    }

    /// Invoke an exported function of a registered module by name.
    pub fn invoke_registered(
        &self,
        store: &mut Store,
        stats: &mut Statistics,
        module: &str,
        name: &str,
        args: &[Value],
    ) -> crate::Result<Vec<Value>> {
        let func = store
            .find_func(module, name)
            .ok_or_else(|| Error::FuncNotFound {
                module: Some(module.to_owned()),
                field: name.to_owned(),
            })?;
        self.invoke(store, stats, func, args)
    }

    fn instantiate_inner(
        &self,
        store: &mut Store,
        stats: &mut Statistics,
        module: &ast::Module,
        name: Option<&str>,
    ) -> crate::Result<ModuleAddr> {
        if let Some(name) = name {
            if store.find_module(name).is_some() {
                return Err(Error::ModuleNameConflict(name.to_owned()));
            }
        }
        // Every instantiation replaces the anonymous module, so its region
        // is reclaimed before new instances are allocated.
        store.reset();
        let marks = store.marks();

        let addr = match self.try_instantiate(store, module, name) {
            Ok(addr) => addr,
            Err(err) => {
                store.rollback(marks);
                error!("instantiation failed: {err}");
                return Err(err);
            }
        };

        if let Some(start) = store[addr].start() {
            debug!("running start function at address {}", start.as_u32());
            let started = Instant::now();
            let result = exec::invoke(&self.config, store, stats, start, &[], 0);
            stats.add_exec_time(started.elapsed());
            if let Err(trap) = result {
                store.rollback(marks);
                error!("start function trapped: {trap}");
                return Err(Error::Trap(trap));
            }
        }

        match name {
            Some(name) => {
                store.register_module(name, addr)?;
                debug!("registered module {name}");
            }
            None => store.set_active_module(addr),
        }
        Ok(addr)
    }

    fn try_instantiate(
        &self,
        store: &mut Store,
        module: &ast::Module,
        name: Option<&str>,
    ) -> crate::Result<ModuleAddr> {
        let mut func_addrs: Vec<FuncAddr> = Vec::with_capacity(module.functions.len());
        let mut table_addrs: Vec<TableAddr> = Vec::with_capacity(module.tables.len());
        let mut mem_addrs: Vec<MemAddr> = Vec::with_capacity(module.memories.len());
        let mut global_addrs: Vec<GlobalAddr> = Vec::with_capacity(module.globals.len());

        self.resolve_imports(
            store,
            module,
            &mut func_addrs,
            &mut table_addrs,
            &mut mem_addrs,
            &mut global_addrs,
        )?;

        let types: Box<[crate::types::FuncType]> = module.types.values().cloned().collect();
        let inst_addr = store.push_module(ModuleInstance::new(name.map(String::from), types));

        // Defined instances, in the order functions, tables, memories,
        // globals.
        for i in 0..module.num_defined_funcs() {
            let index = crate::indices::FuncIndex::from_u32(module.num_imported_funcs + i);
            let ty = module.func_type(index).expect("validated").clone();
            let body = module.func_body(index).expect("validated").clone();
            func_addrs.push(store.push_function(FunctionInstance::wasm(ty, inst_addr, body)));
        }
        for (index, ty) in module.tables.iter() {
            if index.as_u32() >= module.num_imported_tables {
                table_addrs.push(store.push_table(TableInstance::new(*ty)));
            }
        }
        for (index, ty) in module.memories.iter() {
            if index.as_u32() >= module.num_imported_memories {
                mem_addrs.push(
                    store.push_memory(MemoryInstance::new(*ty, self.config.max_memory_pages())),
                );
            }
        }

        let mut const_eval = ConstExprEvaluator::default();
        let mut global_vals: Vec<Value> =
            global_addrs.iter().map(|addr| store[*addr].value()).collect();
        for (i, init) in module.global_inits.iter().enumerate() {
            let index =
                crate::indices::GlobalIndex::from_u32(module.num_imported_globals + i as u32);
            let ty = module.globals[index];
            let value = const_eval.eval(init, &global_vals, &func_addrs);
            global_vals.push(value);
            global_addrs.push(store.push_global(GlobalInstance::new(ty, value)));
        }

        {
            let inst = store.get_module_mut(inst_addr).expect("just pushed");
            for addr in &func_addrs {
                inst.push_func(*addr);
            }
            for addr in &table_addrs {
                inst.push_table(*addr);
            }
            for addr in &mem_addrs {
                inst.push_memory(*addr);
            }
            for addr in &global_addrs {
                inst.push_global(*addr);
            }
        }

        // Element and data segments: evaluate and bounds-check everything
        // against the final sizes, then copy. A failed check aborts before
        // any slot or byte was written.
        let mut table_writes: Vec<TableWrite> = Vec::new();
        let mut memory_writes: Vec<MemoryWrite> = Vec::new();
        let mut elem_runtime: Vec<Option<Vec<Value>>> = Vec::with_capacity(module.elements.len());
        let mut data_runtime: Vec<Option<Arc<[u8]>>> = Vec::with_capacity(module.datas.len());

        for segment in &module.elements {
            let items: Vec<Value> = segment
                .items
                .iter()
                .map(|expr| const_eval.eval(expr, &global_vals, &func_addrs))
                .collect();
            match &segment.mode {
                ElementMode::Active { table, offset } => {
                    let offset = const_eval
                        .eval(offset, &global_vals, &func_addrs)
                        .unwrap_i32() as u32;
                    let table = table_addrs[table.as_u32() as usize];
                    let size = store[table].size();
                    if u64::from(offset) + items.len() as u64 > u64::from(size) {
                        return Err(Error::link(
                            LinkErrorKind::OutOfBoundsInit,
                            format!(
                                "element segment [{offset}, {}) exceeds table size {size}",
                                u64::from(offset) + items.len() as u64,
                            ),
                        ));
                    }
                    table_writes.push(TableWrite {
                        table,
                        offset,
                        items,
                    });
                    elem_runtime.push(None);
                }
                ElementMode::Passive => elem_runtime.push(Some(items)),
                ElementMode::Declared => elem_runtime.push(None),
            }
        }

        for segment in &module.datas {
            match &segment.mode {
                DataMode::Active { memory, offset } => {
                    let offset = const_eval
                        .eval(offset, &global_vals, &func_addrs)
                        .unwrap_i32() as u32;
                    let memory = mem_addrs[memory.as_u32() as usize];
                    let size = store[memory].byte_len();
                    if u64::from(offset) + segment.bytes.len() as u64 > size as u64 {
                        return Err(Error::link(
                            LinkErrorKind::OutOfBoundsInit,
                            format!(
                                "data segment [{offset}, {}) exceeds memory size {size}",
                                u64::from(offset) + segment.bytes.len() as u64,
                            ),
                        ));
                    }
                    memory_writes.push(MemoryWrite {
                        memory,
                        offset,
                        bytes: segment.bytes.clone(),
                    });
                    data_runtime.push(None);
                }
                DataMode::Passive => data_runtime.push(Some(segment.bytes.clone())),
            }
        }

        for write in table_writes {
            let table = store.get_table_mut(write.table).expect("live table");
            let offset = write.offset as usize;
            table.elems_mut()[offset..offset + write.items.len()]
                .copy_from_slice(&write.items);
        }
        for write in memory_writes {
            store[write.memory]
                .store(u64::from(write.offset), &write.bytes)
                .expect("bounds checked above");
        }

        {
            let inst = store.get_module_mut(inst_addr).expect("just pushed");
            for items in elem_runtime {
                inst.push_elem_segment(items);
            }
            for bytes in data_runtime {
                inst.push_data_segment(bytes);
            }
            for export in &module.exports {
                let value = match export.desc {
                    EntityIndex::Function(index) => {
                        ExternVal::Func(func_addrs[index.as_u32() as usize])
                    }
                    EntityIndex::Table(index) => {
                        ExternVal::Table(table_addrs[index.as_u32() as usize])
                    }
                    EntityIndex::Memory(index) => {
                        ExternVal::Memory(mem_addrs[index.as_u32() as usize])
                    }
                    EntityIndex::Global(index) => {
                        ExternVal::Global(global_addrs[index.as_u32() as usize])
                    }
                };
                inst.push_export(export.name.clone(), value);
            }
        }
        if let Some(start) = module.start {
            let addr = func_addrs[start.as_u32() as usize];
            store
                .get_module_mut(inst_addr)
                .expect("just pushed")
                .set_start(addr);
        }

        Ok(inst_addr)
    }

    /// Resolve each declared import against the store's registered
    /// modules, checking external-type compatibility.
    fn resolve_imports(
        &self,
        store: &Store,
        module: &ast::Module,
        func_addrs: &mut Vec<FuncAddr>,
        table_addrs: &mut Vec<TableAddr>,
        mem_addrs: &mut Vec<MemAddr>,
        global_addrs: &mut Vec<GlobalAddr>,
    ) -> crate::Result<()> {
        for import in &module.imports {
            let what = || format!("{}.{}", import.module, import.field);
            let maddr = store
                .find_module(&import.module)
                .ok_or_else(|| Error::link(LinkErrorKind::UnknownImport, what()))?;
            let ext = store[maddr]
                .export(&import.field)
                .ok_or_else(|| Error::link(LinkErrorKind::UnknownImport, what()))?;
            match (&import.desc, ext) {
                (ImportDesc::Func(ty), ExternVal::Func(addr)) => {
                    let expected = module.types.get(*ty).expect("validated type index");
                    if store[addr].ty() != expected {
                        return Err(Error::link(LinkErrorKind::IncompatibleImportType, what()));
                    }
                    func_addrs.push(addr);
                }
                (ImportDesc::Table(declared), ExternVal::Table(addr)) => {
                    let table = &store[addr];
                    let provided = Limits::new(table.size(), table.ty().limits.max);
                    if table.elem_type() != declared.elem
                        || !provided.satisfies(&declared.limits)
                    {
                        return Err(Error::link(LinkErrorKind::IncompatibleImportType, what()));
                    }
                    table_addrs.push(addr);
                }
                (ImportDesc::Memory(declared), ExternVal::Memory(addr)) => {
                    let memory = &store[addr];
                    let provided = Limits::new(memory.page_count(), memory.ty().limits.max);
                    if !provided.satisfies(&declared.limits) {
                        return Err(Error::link(LinkErrorKind::IncompatibleImportType, what()));
                    }
                    mem_addrs.push(addr);
                }
                (ImportDesc::Global(declared), ExternVal::Global(addr)) => {
                    let global = &store[addr];
                    if global.ty().content != declared.content
                        || global.ty().mutability != declared.mutability
                    {
                        return Err(Error::link(LinkErrorKind::IncompatibleImportType, what()));
                    }
                    global_addrs.push(addr);
                }
                _ => {
                    return Err(Error::link(LinkErrorKind::IncompatibleImportType, what()));
                }
            }
        }
        Ok(())
    }
}
