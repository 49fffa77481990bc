use crate::enum_accessors;
use crate::indices::{
    DataIndex, ElemIndex, FuncAddr, FuncIndex, GlobalAddr, GlobalIndex, MemAddr, MemoryIndex,
    TableAddr, TableIndex,
};
use crate::types::FuncType;
use crate::values::Value;
use hashbrown::HashMap;
use std::sync::Arc;

/// The store address of an exported entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExternVal {
    Func(FuncAddr),
    Table(TableAddr),
    Memory(MemAddr),
    Global(GlobalAddr),
}

impl ExternVal {
    enum_accessors! {
        e
        (Func(FuncAddr) func unwrap_func *e)
        (Table(TableAddr) table unwrap_table *e)
        (Memory(MemAddr) memory unwrap_memory *e)
        (Global(GlobalAddr) global unwrap_global *e)
    }
}

#[derive(Debug, Clone)]
pub struct ExportEntry {
    pub name: String,
    pub value: ExternVal,
}

/// A module instance: the namespace produced by instantiation. It resolves
/// the module's index spaces to store addresses and owns the runtime state
/// of passive element and data segments.
#[derive(Debug, Default)]
pub struct ModuleInstance {
    name: Option<String>,
    types: Box<[FuncType]>,
    func_addrs: Vec<FuncAddr>,
    table_addrs: Vec<TableAddr>,
    mem_addrs: Vec<MemAddr>,
    global_addrs: Vec<GlobalAddr>,
    /// Exports in section order, plus per-kind lookup maps.
    exports: Vec<ExportEntry>,
    export_index: HashMap<String, ExternVal>,
    /// Runtime element segments; `None` once dropped (or after an active
    /// segment was consumed by instantiation).
    elem_segments: Vec<Option<Vec<Value>>>,
    /// Runtime data segments; `None` once dropped.
    data_segments: Vec<Option<Arc<[u8]>>>,
    start: Option<FuncAddr>,
}

impl ModuleInstance {
    pub(crate) fn new(name: Option<String>, types: Box<[FuncType]>) -> Self {
        Self {
            name,
            types,
            ..Self::default()
        }
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn types(&self) -> &[FuncType] {
        &self.types
    }

    pub fn func_type(&self, index: u32) -> Option<&FuncType> {
        self.types.get(index as usize)
    }

    pub fn func_addr(&self, index: FuncIndex) -> Option<FuncAddr> {
        self.func_addrs.get(index.as_u32() as usize).copied()
    }

    pub fn table_addr(&self, index: TableIndex) -> Option<TableAddr> {
        self.table_addrs.get(index.as_u32() as usize).copied()
    }

    pub fn mem_addr(&self, index: MemoryIndex) -> Option<MemAddr> {
        self.mem_addrs.get(index.as_u32() as usize).copied()
    }

    pub fn global_addr(&self, index: GlobalIndex) -> Option<GlobalAddr> {
        self.global_addrs.get(index.as_u32() as usize).copied()
    }

    /// The module's default memory, if it declares or imports one.
    pub fn default_memory(&self) -> Option<MemAddr> {
        self.mem_addrs.first().copied()
    }

    pub fn start(&self) -> Option<FuncAddr> {
        self.start
    }

    pub fn exports(&self) -> &[ExportEntry] {
        &self.exports
    }

    pub fn export(&self, name: &str) -> Option<ExternVal> {
        self.export_index.get(name).copied()
    }

    pub fn exported_func(&self, name: &str) -> Option<FuncAddr> {
        self.export(name)?.func()
    }

    pub fn function_exports(&self) -> Vec<(String, FuncAddr)> {
        self.exports
            .iter()
            .filter_map(|e| Some((e.name.clone(), e.value.func()?)))
            .collect()
    }

    pub fn table_exports(&self) -> Vec<(String, TableAddr)> {
        self.exports
            .iter()
            .filter_map(|e| Some((e.name.clone(), e.value.table()?)))
            .collect()
    }

    pub fn memory_exports(&self) -> Vec<(String, MemAddr)> {
        self.exports
            .iter()
            .filter_map(|e| Some((e.name.clone(), e.value.memory()?)))
            .collect()
    }

    pub fn global_exports(&self) -> Vec<(String, GlobalAddr)> {
        self.exports
            .iter()
            .filter_map(|e| Some((e.name.clone(), e.value.global()?)))
            .collect()
    }

    pub(crate) fn push_func(&mut self, addr: FuncAddr) {
        self.func_addrs.push(addr);
    }

    pub(crate) fn push_table(&mut self, addr: TableAddr) {
        self.table_addrs.push(addr);
    }

    pub(crate) fn push_memory(&mut self, addr: MemAddr) {
        self.mem_addrs.push(addr);
    }

    pub(crate) fn push_global(&mut self, addr: GlobalAddr) {
        self.global_addrs.push(addr);
    }

    pub(crate) fn push_export(&mut self, name: String, value: ExternVal) {
        self.export_index.insert(name.clone(), value);
        self.exports.push(ExportEntry { name, value });
    }

    pub(crate) fn set_start(&mut self, addr: FuncAddr) {
        self.start = Some(addr);
    }

    pub(crate) fn push_elem_segment(&mut self, items: Option<Vec<Value>>) {
        self.elem_segments.push(items);
    }

    pub(crate) fn push_data_segment(&mut self, bytes: Option<Arc<[u8]>>) {
        self.data_segments.push(bytes);
    }

    /// A passive element segment's items; empty once dropped.
    pub(crate) fn elem_segment(&self, index: ElemIndex) -> &[Value] {
        match self.elem_segments.get(index.as_u32() as usize) {
            Some(Some(items)) => items,
            _ => &[],
        }
    }

    pub(crate) fn drop_elem_segment(&mut self, index: ElemIndex) {
        if let Some(slot) = self.elem_segments.get_mut(index.as_u32() as usize) {
            *slot = None;
        }
    }

    /// A passive data segment's bytes; empty once dropped.
    pub(crate) fn data_segment(&self, index: DataIndex) -> &[u8] {
        match self.data_segments.get(index.as_u32() as usize) {
            Some(Some(bytes)) => bytes,
            _ => &[],
        }
    }

    pub(crate) fn drop_data_segment(&mut self, index: DataIndex) {
        if let Some(slot) = self.data_segments.get_mut(index.as_u32() as usize) {
            *slot = None;
        }
    }
}
