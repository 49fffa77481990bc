//! Streaming binary decoder producing an [`ast::Module`](crate::ast::Module).
//!
//! Sections are framed by their declared length and must appear in
//! canonical order, each at most once; custom sections may appear anywhere
//! and are retained opaquely. Enabled proposals gate the accepted syntax.

mod code;
mod reader;

use crate::ast::{
    self, ConstExpr, ConstOp, CustomSection, DataMode, DataSegment, ElementMode, ElementSegment,
    Export, Import, ImportDesc,
};
use crate::config::{Config, Proposal};
use crate::errors::{Error, LoadErrorKind};
use crate::indices::{EntityIndex, FuncIndex, GlobalIndex, MemoryIndex, TableIndex, TypeIndex};
use crate::types::{
    BlockType, FuncType, GlobalType, Limits, MemoryType, Mutability, RefType, TableType, ValType,
};
use log::debug;
use reader::Reader;
use std::path::Path;
use std::sync::Arc;

const MAGIC: [u8; 4] = [0x00, 0x61, 0x73, 0x6D];
const VERSION: [u8; 4] = [0x01, 0x00, 0x00, 0x00];

/// The streaming binary decoder. Cheap to construct; holds only the
/// configuration snapshot that gates proposal syntax.
#[derive(Debug, Clone)]
pub struct Loader {
    config: Config,
}

impl Loader {
    pub fn new(config: &Config) -> Self {
        Self { config: *config }
    }

    /// Load and parse a module from a `.wasm` file.
    pub fn parse_file(&self, path: impl AsRef<Path>) -> crate::Result<ast::Module> {
        let path = path.as_ref();
        let bytes = std::fs::read(path).map_err(|err| {
            log::error!("failed to read wasm file {}: {err}", path.display());
            Error::load(LoadErrorKind::IllegalPath, 0)
        })?;
        self.parse_bytes(&bytes)
    }

    /// Assemble WebAssembly text and feed it through the binary pipeline.
    pub fn parse_wat(&self, source: &str) -> crate::Result<ast::Module> {
        let bytes = wat::parse_str(source).map_err(|err| {
            log::error!("failed to assemble wat: {err}");
            Error::load(LoadErrorKind::IllegalGrammar, 0)
        })?;
        self.parse_bytes(&bytes)
    }

    /// Parse a module from an in-memory binary.
    pub fn parse_bytes(&self, bytes: &[u8]) -> crate::Result<ast::Module> {
        let mut r = Reader::new(bytes);
        if r.read_bytes(4)? != MAGIC {
            return Err(Error::load(LoadErrorKind::MalformedMagic, 0));
        }
        if r.read_bytes(4)? != VERSION {
            return Err(Error::load(LoadErrorKind::MalformedVersion, 4));
        }

        let mut module = ast::Module::default();
        let mut last_rank = 0u8;
        let mut declared_code_count = None;
        let mut data_section_count = None;

        while !r.is_empty() {
            let section_offset = r.pos();
            let id = r.read_u8()?;
            let len = self.read_section_len(&mut r)?;
            let start = r.pos();

            if id != 0 {
                let rank = section_rank(id)
                    .ok_or_else(|| Error::load(LoadErrorKind::UnknownSection, section_offset))?;
                if rank <= last_rank {
                    return Err(Error::load(LoadErrorKind::UnknownSection, section_offset));
                }
                last_rank = rank;
            }

            match id {
                0 => self.read_custom_section(&mut r, &mut module, len)?,
                1 => self.read_type_section(&mut r, &mut module)?,
                2 => self.read_import_section(&mut r, &mut module)?,
                3 => {
                    let count = r.read_u32_leb()?;
                    for _ in 0..count {
                        let ty = TypeIndex::from_u32(r.read_u32_leb()?);
                        module.functions.push(ty);
                    }
                    declared_code_count = Some(count);
                }
                4 => {
                    let count = r.read_u32_leb()?;
                    for _ in 0..count {
                        let ty = self.read_table_type(&mut r)?;
                        module.tables.push(ty);
                    }
                }
                5 => {
                    let count = r.read_u32_leb()?;
                    for _ in 0..count {
                        let limits = self.read_limits(&mut r)?;
                        module.memories.push(MemoryType { limits });
                    }
                }
                6 => self.read_global_section(&mut r, &mut module)?,
                7 => self.read_export_section(&mut r, &mut module)?,
                8 => {
                    module.start = Some(FuncIndex::from_u32(r.read_u32_leb()?));
                }
                9 => self.read_element_section(&mut r, &mut module)?,
                10 => {
                    let count = r.read_u32_leb()?;
                    for _ in 0..count {
                        let body_size = r.read_u32_leb()? as usize;
                        let body_start = r.pos();
                        let body = code::read_function_body(&mut r, &self.config)?;
                        if r.pos() - body_start != body_size {
                            return Err(Error::load(
                                LoadErrorKind::SectionSizeMismatch,
                                body_start,
                            ));
                        }
                        module.code.push(Arc::new(body));
                    }
                }
                11 => {
                    data_section_count = Some(self.read_data_section(&mut r, &mut module)?);
                }
                12 => {
                    if !self.config.has_proposal(Proposal::BulkMemoryOperations) {
                        return Err(Error::load(LoadErrorKind::DisabledProposal, section_offset));
                    }
                    module.data_count = Some(r.read_u32_leb()?);
                }
                _ => unreachable!("ranked above"),
            }

            if r.pos() - start != len {
                return Err(Error::load(LoadErrorKind::SectionSizeMismatch, start));
            }
        }

        let declared = declared_code_count.unwrap_or(0);
        if declared as usize != module.code.len() {
            return Err(Error::load(LoadErrorKind::IllegalGrammar, r.pos()));
        }
        if let Some(count) = module.data_count {
            if count != data_section_count.unwrap_or(0) {
                return Err(Error::load(LoadErrorKind::IllegalGrammar, r.pos()));
            }
        }

        debug!(
            "loaded module: {} types, {} funcs ({} imported), {} tables, {} memories, {} globals, {} exports",
            module.types.len(),
            module.functions.len(),
            module.num_imported_funcs,
            module.tables.len(),
            module.memories.len(),
            module.globals.len(),
            module.exports.len(),
        );
        Ok(module)
    }

    fn read_section_len(&self, r: &mut Reader<'_>) -> crate::Result<usize> {
        Ok(r.read_u32_leb()? as usize)
    }

    fn read_custom_section(
        &self,
        r: &mut Reader<'_>,
        module: &mut ast::Module,
        len: usize,
    ) -> crate::Result<()> {
        let start = r.pos();
        let name = r.read_name()?;
        let consumed = r.pos() - start;
        let rest = len
            .checked_sub(consumed)
            .ok_or_else(|| Error::load(LoadErrorKind::SectionSizeMismatch, start))?;
        let bytes = r.read_bytes(rest)?.to_vec();
        module.custom_sections.push(CustomSection { name, bytes });
        Ok(())
    }

    fn read_type_section(&self, r: &mut Reader<'_>, module: &mut ast::Module) -> crate::Result<()> {
        let count = r.read_u32_leb()?;
        for _ in 0..count {
            let offset = r.pos();
            if r.read_u8()? != 0x60 {
                return Err(Error::load(LoadErrorKind::IllegalGrammar, offset));
            }
            let param_count = r.read_u32_leb()?;
            let mut params = Vec::with_capacity(param_count.min(64) as usize);
            for _ in 0..param_count {
                params.push(read_valtype(r, &self.config)?);
            }
            let result_count = r.read_u32_leb()?;
            let mut results = Vec::with_capacity(result_count.min(64) as usize);
            for _ in 0..result_count {
                results.push(read_valtype(r, &self.config)?);
            }
            module.types.push(FuncType::new(params, results));
        }
        Ok(())
    }

    fn read_import_section(
        &self,
        r: &mut Reader<'_>,
        module: &mut ast::Module,
    ) -> crate::Result<()> {
        let count = r.read_u32_leb()?;
        for _ in 0..count {
            let module_name = r.read_name()?;
            let field = r.read_name()?;
            let offset = r.pos();
            let desc = match r.read_u8()? {
                0x00 => {
                    let ty = TypeIndex::from_u32(r.read_u32_leb()?);
                    module.functions.push(ty);
                    module.num_imported_funcs += 1;
                    ImportDesc::Func(ty)
                }
                0x01 => {
                    let ty = self.read_table_type(r)?;
                    module.tables.push(ty);
                    module.num_imported_tables += 1;
                    ImportDesc::Table(ty)
                }
                0x02 => {
                    let limits = self.read_limits(r)?;
                    let ty = MemoryType { limits };
                    module.memories.push(ty);
                    module.num_imported_memories += 1;
                    ImportDesc::Memory(ty)
                }
                0x03 => {
                    let ty = self.read_global_type(r)?;
                    module.globals.push(ty);
                    module.num_imported_globals += 1;
                    ImportDesc::Global(ty)
                }
                _ => return Err(Error::load(LoadErrorKind::IllegalGrammar, offset)),
            };
            module.imports.push(Import {
                module: module_name,
                field,
                desc,
            });
        }
        Ok(())
    }

    fn read_global_section(
        &self,
        r: &mut Reader<'_>,
        module: &mut ast::Module,
    ) -> crate::Result<()> {
        let count = r.read_u32_leb()?;
        for _ in 0..count {
            let ty = self.read_global_type(r)?;
            let init = self.read_const_expr(r)?;
            module.globals.push(ty);
            module.global_inits.push(init);
        }
        Ok(())
    }

    fn read_export_section(
        &self,
        r: &mut Reader<'_>,
        module: &mut ast::Module,
    ) -> crate::Result<()> {
        let count = r.read_u32_leb()?;
        for _ in 0..count {
            let name = r.read_name()?;
            let offset = r.pos();
            let kind = r.read_u8()?;
            let index = r.read_u32_leb()?;
            let desc = match kind {
                0x00 => EntityIndex::Function(FuncIndex::from_u32(index)),
                0x01 => EntityIndex::Table(TableIndex::from_u32(index)),
                0x02 => EntityIndex::Memory(MemoryIndex::from_u32(index)),
                0x03 => EntityIndex::Global(GlobalIndex::from_u32(index)),
                _ => return Err(Error::load(LoadErrorKind::IllegalGrammar, offset)),
            };
            module.exports.push(Export { name, desc });
        }
        Ok(())
    }

    fn read_element_section(
        &self,
        r: &mut Reader<'_>,
        module: &mut ast::Module,
    ) -> crate::Result<()> {
        let count = r.read_u32_leb()?;
        for _ in 0..count {
            let offset = r.pos();
            let flags = r.read_u32_leb()?;
            if flags > 7 {
                return Err(Error::load(LoadErrorKind::IllegalGrammar, offset));
            }
            if flags != 0
                && !self.config.has_proposal(Proposal::BulkMemoryOperations)
                && !self.config.has_proposal(Proposal::ReferenceTypes)
            {
                return Err(Error::load(LoadErrorKind::DisabledProposal, offset));
            }

            let active = flags & 0b001 == 0;
            let explicit_table = flags & 0b010 != 0 && active;
            let declared = flags & 0b011 == 0b011;
            let exprs = flags & 0b100 != 0;

            let table = if explicit_table {
                TableIndex::from_u32(r.read_u32_leb()?)
            } else {
                TableIndex::from_u32(0)
            };
            let mode = if active {
                ElementMode::Active {
                    table,
                    offset: self.read_const_expr(r)?,
                }
            } else if declared {
                ElementMode::Declared
            } else {
                ElementMode::Passive
            };

            // Flag combinations 1-3 carry an element kind byte, 5-7 a
            // reference type; flags 0 and 4 imply funcref.
            let ty = if flags == 0 || flags == 4 {
                RefType::FuncRef
            } else if exprs {
                read_reftype(r, &self.config)?
            } else {
                let kind_offset = r.pos();
                if r.read_u8()? != 0x00 {
                    return Err(Error::load(LoadErrorKind::IllegalGrammar, kind_offset));
                }
                RefType::FuncRef
            };

            let item_count = r.read_u32_leb()?;
            let mut items = Vec::with_capacity(item_count.min(1024) as usize);
            for _ in 0..item_count {
                if exprs {
                    items.push(self.read_const_expr(r)?);
                } else {
                    let func = FuncIndex::from_u32(r.read_u32_leb()?);
                    items.push(ConstExpr::new(vec![ConstOp::RefFunc(func)]));
                }
            }
            module.elements.push(ElementSegment { ty, mode, items });
        }
        Ok(())
    }

    fn read_data_section(
        &self,
        r: &mut Reader<'_>,
        module: &mut ast::Module,
    ) -> crate::Result<u32> {
        let count = r.read_u32_leb()?;
        for _ in 0..count {
            let offset = r.pos();
            let flags = r.read_u32_leb()?;
            let mode = match flags {
                0 => DataMode::Active {
                    memory: MemoryIndex::from_u32(0),
                    offset: self.read_const_expr(r)?,
                },
                1 => {
                    if !self.config.has_proposal(Proposal::BulkMemoryOperations) {
                        return Err(Error::load(LoadErrorKind::DisabledProposal, offset));
                    }
                    DataMode::Passive
                }
                2 => {
                    if !self.config.has_proposal(Proposal::BulkMemoryOperations) {
                        return Err(Error::load(LoadErrorKind::DisabledProposal, offset));
                    }
                    DataMode::Active {
                        memory: MemoryIndex::from_u32(r.read_u32_leb()?),
                        offset: self.read_const_expr(r)?,
                    }
                }
                _ => return Err(Error::load(LoadErrorKind::IllegalGrammar, offset)),
            };
            let len = r.read_u32_leb()? as usize;
            let bytes: Arc<[u8]> = r.read_bytes(len)?.into();
            module.datas.push(DataSegment { mode, bytes });
        }
        Ok(count)
    }

    fn read_table_type(&self, r: &mut Reader<'_>) -> crate::Result<TableType> {
        let elem = read_reftype(r, &self.config)?;
        let limits = self.read_limits(r)?;
        Ok(TableType { elem, limits })
    }

    fn read_global_type(&self, r: &mut Reader<'_>) -> crate::Result<GlobalType> {
        let content = read_valtype(r, &self.config)?;
        let offset = r.pos();
        let mutability = match r.read_u8()? {
            0x00 => Mutability::Const,
            0x01 => Mutability::Var,
            _ => return Err(Error::load(LoadErrorKind::IllegalGrammar, offset)),
        };
        Ok(GlobalType {
            content,
            mutability,
        })
    }

    fn read_limits(&self, r: &mut Reader<'_>) -> crate::Result<Limits> {
        let offset = r.pos();
        match r.read_u8()? {
            0x00 => Ok(Limits::new(r.read_u32_leb()?, None)),
            0x01 => {
                let min = r.read_u32_leb()?;
                let max = r.read_u32_leb()?;
                Ok(Limits::new(min, Some(max)))
            }
            // Shared (threads) and 64-bit (memory64) limits.
            0x02 | 0x03 => Err(self.gate_err(Proposal::Threads, offset)),
            0x04 | 0x05 => Err(self.gate_err(Proposal::Memory64, offset)),
            _ => Err(Error::load(LoadErrorKind::IllegalGrammar, offset)),
        }
    }

    fn gate_err(&self, proposal: Proposal, offset: usize) -> Error {
        if self.config.has_proposal(proposal) {
            Error::load(LoadErrorKind::IllegalGrammar, offset)
        } else {
            Error::load(LoadErrorKind::DisabledProposal, offset)
        }
    }

    /// A constant initializer expression: exactly one const-producing
    /// operation followed by `end`. Semantic checks (types, which globals
    /// may be referenced) belong to the validator.
    fn read_const_expr(&self, r: &mut Reader<'_>) -> crate::Result<ConstExpr> {
        let mut ops = Vec::new();
        loop {
            let offset = r.pos();
            let opcode = r.read_u8()?;
            let op = match opcode {
                0x0B => break,
                0x41 => ConstOp::I32Const(r.read_i32_leb()?),
                0x42 => ConstOp::I64Const(r.read_i64_leb()?),
                0x43 => ConstOp::F32Const(r.read_f32_bits()?),
                0x44 => ConstOp::F64Const(r.read_f64_bits()?),
                0x23 => ConstOp::GlobalGet(GlobalIndex::from_u32(r.read_u32_leb()?)),
                0xD0 => {
                    self.require_ref_values(offset)?;
                    ConstOp::RefNull(read_reftype(r, &self.config)?)
                }
                0xD2 => {
                    self.require_ref_values(offset)?;
                    ConstOp::RefFunc(FuncIndex::from_u32(r.read_u32_leb()?))
                }
                0xFD => {
                    if !self.config.has_proposal(Proposal::Simd) {
                        return Err(Error::load(LoadErrorKind::DisabledProposal, offset));
                    }
                    if r.read_u32_leb()? != 0x0C {
                        return Err(Error::load(LoadErrorKind::IllegalGrammar, offset));
                    }
                    let bytes = r.read_bytes(16)?;
                    ConstOp::V128Const(u128::from_le_bytes(bytes.try_into().unwrap()))
                }
                _ => return Err(Error::load(LoadErrorKind::IllegalGrammar, offset)),
            };
            ops.push(op);
        }
        if ops.len() != 1 {
            return Err(Error::load(LoadErrorKind::IllegalGrammar, r.pos()));
        }
        Ok(ConstExpr::new(ops))
    }

    fn require_ref_values(&self, offset: usize) -> crate::Result<()> {
        if self.config.has_proposal(Proposal::ReferenceTypes)
            || self.config.has_proposal(Proposal::BulkMemoryOperations)
        {
            Ok(())
        } else {
            Err(Error::load(LoadErrorKind::DisabledProposal, offset))
        }
    }
}

fn section_rank(id: u8) -> Option<u8> {
    match id {
        1 => Some(1),
        2 => Some(2),
        3 => Some(3),
        4 => Some(4),
        5 => Some(5),
        6 => Some(6),
        7 => Some(7),
        8 => Some(8),
        9 => Some(9),
        12 => Some(10),
        10 => Some(11),
        11 => Some(12),
        _ => None,
    }
}

pub(crate) fn read_valtype(r: &mut Reader<'_>, config: &Config) -> crate::Result<ValType> {
    let offset = r.pos();
    let byte = r.read_u8()?;
    let ty = ValType::from_byte(byte)
        .ok_or_else(|| Error::load(LoadErrorKind::IllegalGrammar, offset))?;
    match ty {
        ValType::V128 if !config.has_proposal(Proposal::Simd) => {
            Err(Error::load(LoadErrorKind::DisabledProposal, offset))
        }
        ValType::ExternRef | ValType::FuncRef
            if !config.has_proposal(Proposal::ReferenceTypes) =>
        {
            Err(Error::load(LoadErrorKind::DisabledProposal, offset))
        }
        _ => Ok(ty),
    }
}

pub(crate) fn read_reftype(r: &mut Reader<'_>, config: &Config) -> crate::Result<RefType> {
    let offset = r.pos();
    let byte = r.read_u8()?;
    let ty = RefType::from_byte(byte)
        .ok_or_else(|| Error::load(LoadErrorKind::IllegalGrammar, offset))?;
    if ty == RefType::ExternRef && !config.has_proposal(Proposal::ReferenceTypes) {
        return Err(Error::load(LoadErrorKind::DisabledProposal, offset));
    }
    Ok(ty)
}

pub(crate) fn read_blocktype(r: &mut Reader<'_>, config: &Config) -> crate::Result<BlockType> {
    let byte = r.peek_u8()?;
    if byte == 0x40 {
        r.read_u8()?;
        return Ok(BlockType::Empty);
    }
    if ValType::from_byte(byte).is_some() {
        return Ok(BlockType::Value(read_valtype(r, config)?));
    }
    let offset = r.pos();
    let value = r.read_s33_leb()?;
    if value < 0 {
        return Err(Error::load(LoadErrorKind::IllegalGrammar, offset));
    }
    Ok(BlockType::Func(TypeIndex::from_u32(value as u32)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::Instruction;

    fn loader() -> Loader {
        Loader::new(&Config::default())
    }

    fn load_kind(err: Error) -> LoadErrorKind {
        match err {
            Error::Load { kind, .. } => kind,
            other => panic!("expected load error, got {other:?}"),
        }
    }

    #[test]
    fn rejects_bad_magic_and_version() {
        let err = loader().parse_bytes(b"\x00asn\x01\x00\x00\x00").unwrap_err();
        assert_eq!(load_kind(err), LoadErrorKind::MalformedMagic);
        let err = loader().parse_bytes(b"\x00asm\x02\x00\x00\x00").unwrap_err();
        assert_eq!(load_kind(err), LoadErrorKind::MalformedVersion);
    }

    #[test]
    fn parses_a_minimal_module() {
        let module = loader()
            .parse_wat(
                r#"(module
                    (func (export "add") (param i32 i32) (result i32)
                        local.get 0
                        local.get 1
                        i32.add))"#,
            )
            .unwrap();
        assert_eq!(module.functions.len(), 1);
        assert_eq!(module.exports.len(), 1);
        assert_eq!(module.exports[0].name, "add");
        let body = &module.code[0];
        assert_eq!(
            body.instrs.as_ref(),
            &[
                Instruction::LocalGet { local: 0 },
                Instruction::LocalGet { local: 1 },
                Instruction::I32Add,
                Instruction::End,
            ]
        );
    }

    #[test]
    fn control_fixups_resolve_end_and_else() {
        let module = loader()
            .parse_wat(
                r#"(module
                    (func (param i32) (result i32)
                        local.get 0
                        if (result i32)
                            i32.const 1
                        else
                            i32.const 2
                        end))"#,
            )
            .unwrap();
        let instrs = &module.code[0].instrs;
        let (else_pc, end_pc) = match &instrs[1] {
            Instruction::If { else_pc, end_pc, .. } => (*else_pc, *end_pc),
            other => panic!("expected if, got {other:?}"),
        };
        assert_eq!(instrs[else_pc as usize], Instruction::Else { end_pc });
        assert_eq!(instrs[end_pc as usize], Instruction::End);
        assert_eq!(instrs[instrs.len() - 1], Instruction::End);
    }

    #[test]
    fn section_out_of_order_rejects() {
        // Function section (3) followed by type section (1).
        let bytes = [
            0x00, 0x61, 0x73, 0x6D, 0x01, 0x00, 0x00, 0x00, // header
            0x03, 0x02, 0x01, 0x00, // function section referencing type 0
            0x01, 0x04, 0x01, 0x60, 0x00, 0x00, // type section
        ];
        let err = loader().parse_bytes(&bytes).unwrap_err();
        assert_eq!(load_kind(err), LoadErrorKind::UnknownSection);
    }

    #[test]
    fn section_size_mismatch_rejects() {
        // Type section claims 5 bytes but holds a 4-byte payload.
        let bytes = [
            0x00, 0x61, 0x73, 0x6D, 0x01, 0x00, 0x00, 0x00, // header
            0x01, 0x05, 0x01, 0x60, 0x00, 0x00,
        ];
        let err = loader().parse_bytes(&bytes).unwrap_err();
        assert!(matches!(
            load_kind(err),
            LoadErrorKind::SectionSizeMismatch | LoadErrorKind::UnexpectedEnd
        ));
    }

    #[test]
    fn disabled_simd_is_a_decode_error() {
        let mut config = Config::default();
        config.remove_proposal(Proposal::Simd);
        let err = Loader::new(&config)
            .parse_wat(r#"(module (func (result v128) v128.const i32x4 1 2 3 4))"#)
            .unwrap_err();
        assert_eq!(load_kind(err), LoadErrorKind::DisabledProposal);
    }

    #[test]
    fn custom_sections_are_retained() {
        let module = loader()
            .parse_wat(r#"(module (@custom "note" "hi"))"#)
            .unwrap();
        assert_eq!(module.custom_sections.len(), 1);
        assert_eq!(module.custom_sections[0].name, "note");
        assert_eq!(module.custom_sections[0].bytes, b"hi");
    }

    #[test]
    fn data_count_without_bulk_memory_rejects() {
        let mut config = Config::default();
        config.remove_proposal(Proposal::BulkMemoryOperations);
        // Empty module plus a data-count section declaring zero segments.
        let bytes = [
            0x00, 0x61, 0x73, 0x6D, 0x01, 0x00, 0x00, 0x00, // header
            0x0C, 0x01, 0x00, // data count section
        ];
        let err = Loader::new(&config).parse_bytes(&bytes).unwrap_err();
        assert_eq!(load_kind(err), LoadErrorKind::DisabledProposal);
    }
}
