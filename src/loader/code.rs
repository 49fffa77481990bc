use super::reader::Reader;
use super::{read_blocktype, read_reftype, read_valtype};
use crate::ast::{FunctionBody, Instruction, MemArg, NO_ELSE};
use crate::config::{Config, Proposal};
use crate::errors::{Error, LoadErrorKind};
use crate::indices::{DataIndex, ElemIndex, FuncIndex, GlobalIndex, TableIndex, TypeIndex};

/// Hard cap on declared locals per function, mirroring the implementation
/// limits appendix of the core spec.
const MAX_LOCALS: usize = 50_000;

pub(crate) fn read_function_body(r: &mut Reader<'_>, config: &Config) -> crate::Result<FunctionBody> {
    let group_count = r.read_u32_leb()?;
    let mut locals = Vec::new();
    for _ in 0..group_count {
        let n = r.read_u32_leb()? as usize;
        let ty = read_valtype(r, config)?;
        if locals.len() + n > MAX_LOCALS {
            return Err(r.err(LoadErrorKind::IllegalGrammar));
        }
        locals.extend(core::iter::repeat(ty).take(n));
    }
    let instrs = read_instrs(r, config)?;
    Ok(FunctionBody { locals, instrs })
}

/// An open structured-control construct awaiting its `end`, tracked so the
/// branch targets of `Block`/`If`/`Else` can be patched in one pass.
enum OpenCtrl {
    Block(usize),
    Loop,
    If(usize),
    Else { if_pc: usize, else_pc: usize },
}

fn read_instrs(r: &mut Reader<'_>, config: &Config) -> crate::Result<Box<[Instruction]>> {
    let mut instrs: Vec<Instruction> = Vec::new();
    let mut open: Vec<OpenCtrl> = Vec::new();
    loop {
        let offset = r.pos();
        let instr = read_instruction(r, config)?;
        let pc = instrs.len();
        match &instr {
            Instruction::Block { .. } => open.push(OpenCtrl::Block(pc)),
            Instruction::Loop { .. } => open.push(OpenCtrl::Loop),
            Instruction::If { .. } => open.push(OpenCtrl::If(pc)),
            Instruction::Else { .. } => match open.pop() {
                Some(OpenCtrl::If(if_pc)) => open.push(OpenCtrl::Else { if_pc, else_pc: pc }),
                _ => return Err(Error::load(LoadErrorKind::IllegalGrammar, offset)),
            },
            Instruction::End => match open.pop() {
                Some(OpenCtrl::Block(block_pc)) => match &mut instrs[block_pc] {
                    Instruction::Block { end_pc, .. } => *end_pc = pc as u32,
                    _ => unreachable!(),
                },
                Some(OpenCtrl::Loop) => {}
                Some(OpenCtrl::If(if_pc)) => match &mut instrs[if_pc] {
                    Instruction::If { end_pc, .. } => *end_pc = pc as u32,
                    _ => unreachable!(),
                },
                Some(OpenCtrl::Else { if_pc, else_pc }) => {
                    match &mut instrs[if_pc] {
                        Instruction::If { else_pc: e, end_pc, .. } => {
                            *e = else_pc as u32;
                            *end_pc = pc as u32;
                        }
                        _ => unreachable!(),
                    }
                    match &mut instrs[else_pc] {
                        Instruction::Else { end_pc } => *end_pc = pc as u32,
                        _ => unreachable!(),
                    }
                }
                None => {
                    instrs.push(instr);
                    return Ok(instrs.into_boxed_slice());
                }
            },
            _ => {}
        }
        instrs.push(instr);
    }
}

fn read_memarg(r: &mut Reader<'_>) -> crate::Result<MemArg> {
    let align = r.read_u32_leb()?;
    let offset = r.read_u32_leb()?;
    Ok(MemArg { align, offset })
}

fn gated(config: &Config, proposal: Proposal, offset: usize) -> Error {
    if config.has_proposal(proposal) {
        // Recognized but not implemented by this runtime.
        Error::load(LoadErrorKind::IllegalOpCode, offset)
    } else {
        Error::load(LoadErrorKind::DisabledProposal, offset)
    }
}

fn require(config: &Config, proposal: Proposal, offset: usize) -> crate::Result<()> {
    if config.has_proposal(proposal) {
        Ok(())
    } else {
        Err(Error::load(LoadErrorKind::DisabledProposal, offset))
    }
}

fn read_instruction(r: &mut Reader<'_>, config: &Config) -> crate::Result<Instruction> {
    use Instruction::*;
    let offset = r.pos();
    let opcode = r.read_u8()?;
    let instr = match opcode {
        0x00 => Unreachable,
        0x01 => Nop,
        0x02 => Block {
            ty: read_blocktype(r, config)?,
            end_pc: 0,
        },
        0x03 => Loop {
            ty: read_blocktype(r, config)?,
        },
        0x04 => If {
            ty: read_blocktype(r, config)?,
            else_pc: NO_ELSE,
            end_pc: 0,
        },
        0x05 => Else { end_pc: 0 },
        // Exception handling opcodes.
        0x06..=0x0A | 0x18 | 0x19 => {
            return Err(gated(config, Proposal::ExceptionHandling, offset))
        }
        0x0B => End,
        0x0C => Br {
            depth: r.read_u32_leb()?,
        },
        0x0D => BrIf {
            depth: r.read_u32_leb()?,
        },
        0x0E => {
            let count = r.read_u32_leb()?;
            let mut targets = Vec::with_capacity(count.min(1024) as usize);
            for _ in 0..count {
                targets.push(r.read_u32_leb()?);
            }
            BrTable {
                targets: targets.into_boxed_slice(),
                default: r.read_u32_leb()?,
            }
        }
        0x0F => Return,
        0x10 => Call {
            func: FuncIndex::from_u32(r.read_u32_leb()?),
        },
        0x11 => {
            let ty = TypeIndex::from_u32(r.read_u32_leb()?);
            let table_idx = r.read_u32_leb()?;
            if table_idx != 0 && !config.has_proposal(Proposal::ReferenceTypes) {
                return Err(Error::load(LoadErrorKind::IllegalGrammar, offset));
            }
            CallIndirect {
                ty,
                table: TableIndex::from_u32(table_idx),
            }
        }
        // Tail calls.
        0x12 | 0x13 => return Err(gated(config, Proposal::TailCall, offset)),
        // Typed function references.
        0x14 | 0x15 => return Err(gated(config, Proposal::FunctionReferences, offset)),
        0x1A => Drop,
        0x1B => Select,
        0x1C => {
            require(config, Proposal::ReferenceTypes, offset)?;
            let count = r.read_u32_leb()?;
            if count != 1 {
                return Err(Error::load(LoadErrorKind::IllegalGrammar, offset));
            }
            TypedSelect {
                ty: read_valtype(r, config)?,
            }
        }
        0x20 => LocalGet {
            local: r.read_u32_leb()?,
        },
        0x21 => LocalSet {
            local: r.read_u32_leb()?,
        },
        0x22 => LocalTee {
            local: r.read_u32_leb()?,
        },
        0x23 => GlobalGet {
            global: GlobalIndex::from_u32(r.read_u32_leb()?),
        },
        0x24 => GlobalSet {
            global: GlobalIndex::from_u32(r.read_u32_leb()?),
        },
        0x25 => {
            require(config, Proposal::ReferenceTypes, offset)?;
            TableGet {
                table: TableIndex::from_u32(r.read_u32_leb()?),
            }
        }
        0x26 => {
            require(config, Proposal::ReferenceTypes, offset)?;
            TableSet {
                table: TableIndex::from_u32(r.read_u32_leb()?),
            }
        }
        0x28 => I32Load(read_memarg(r)?),
        0x29 => I64Load(read_memarg(r)?),
        0x2A => F32Load(read_memarg(r)?),
        0x2B => F64Load(read_memarg(r)?),
        0x2C => I32Load8S(read_memarg(r)?),
        0x2D => I32Load8U(read_memarg(r)?),
        0x2E => I32Load16S(read_memarg(r)?),
        0x2F => I32Load16U(read_memarg(r)?),
        0x30 => I64Load8S(read_memarg(r)?),
        0x31 => I64Load8U(read_memarg(r)?),
        0x32 => I64Load16S(read_memarg(r)?),
        0x33 => I64Load16U(read_memarg(r)?),
        0x34 => I64Load32S(read_memarg(r)?),
        0x35 => I64Load32U(read_memarg(r)?),
        0x36 => I32Store(read_memarg(r)?),
        0x37 => I64Store(read_memarg(r)?),
        0x38 => F32Store(read_memarg(r)?),
        0x39 => F64Store(read_memarg(r)?),
        0x3A => I32Store8(read_memarg(r)?),
        0x3B => I32Store16(read_memarg(r)?),
        0x3C => I64Store8(read_memarg(r)?),
        0x3D => I64Store16(read_memarg(r)?),
        0x3E => I64Store32(read_memarg(r)?),
        0x3F => {
            if r.read_u8()? != 0x00 {
                return Err(Error::load(LoadErrorKind::IllegalGrammar, offset));
            }
            MemorySize
        }
        0x40 => {
            if r.read_u8()? != 0x00 {
                return Err(Error::load(LoadErrorKind::IllegalGrammar, offset));
            }
            MemoryGrow
        }
        0x41 => I32Const(r.read_i32_leb()?),
        0x42 => I64Const(r.read_i64_leb()?),
        0x43 => F32Const(r.read_f32_bits()?),
        0x44 => F64Const(r.read_f64_bits()?),
        0x45 => I32Eqz,
        0x46 => I32Eq,
        0x47 => I32Ne,
        0x48 => I32LtS,
        0x49 => I32LtU,
        0x4A => I32GtS,
        0x4B => I32GtU,
        0x4C => I32LeS,
        0x4D => I32LeU,
        0x4E => I32GeS,
        0x4F => I32GeU,
        0x50 => I64Eqz,
        0x51 => I64Eq,
        0x52 => I64Ne,
        0x53 => I64LtS,
        0x54 => I64LtU,
        0x55 => I64GtS,
        0x56 => I64GtU,
        0x57 => I64LeS,
        0x58 => I64LeU,
        0x59 => I64GeS,
        0x5A => I64GeU,
        0x5B => F32Eq,
        0x5C => F32Ne,
        0x5D => F32Lt,
        0x5E => F32Gt,
        0x5F => F32Le,
        0x60 => F32Ge,
        0x61 => F64Eq,
        0x62 => F64Ne,
        0x63 => F64Lt,
        0x64 => F64Gt,
        0x65 => F64Le,
        0x66 => F64Ge,
        0x67 => I32Clz,
        0x68 => I32Ctz,
        0x69 => I32Popcnt,
        0x6A => I32Add,
        0x6B => I32Sub,
        0x6C => I32Mul,
        0x6D => I32DivS,
        0x6E => I32DivU,
        0x6F => I32RemS,
        0x70 => I32RemU,
        0x71 => I32And,
        0x72 => I32Or,
        0x73 => I32Xor,
        0x74 => I32Shl,
        0x75 => I32ShrS,
        0x76 => I32ShrU,
        0x77 => I32Rotl,
        0x78 => I32Rotr,
        0x79 => I64Clz,
        0x7A => I64Ctz,
        0x7B => I64Popcnt,
        0x7C => I64Add,
        0x7D => I64Sub,
        0x7E => I64Mul,
        0x7F => I64DivS,
        0x80 => I64DivU,
        0x81 => I64RemS,
        0x82 => I64RemU,
        0x83 => I64And,
        0x84 => I64Or,
        0x85 => I64Xor,
        0x86 => I64Shl,
        0x87 => I64ShrS,
        0x88 => I64ShrU,
        0x89 => I64Rotl,
        0x8A => I64Rotr,
        0x8B => F32Abs,
        0x8C => F32Neg,
        0x8D => F32Ceil,
        0x8E => F32Floor,
        0x8F => F32Trunc,
        0x90 => F32Nearest,
        0x91 => F32Sqrt,
        0x92 => F32Add,
        0x93 => F32Sub,
        0x94 => F32Mul,
        0x95 => F32Div,
        0x96 => F32Min,
        0x97 => F32Max,
        0x98 => F32Copysign,
        0x99 => F64Abs,
        0x9A => F64Neg,
        0x9B => F64Ceil,
        0x9C => F64Floor,
        0x9D => F64Trunc,
        0x9E => F64Nearest,
        0x9F => F64Sqrt,
        0xA0 => F64Add,
        0xA1 => F64Sub,
        0xA2 => F64Mul,
        0xA3 => F64Div,
        0xA4 => F64Min,
        0xA5 => F64Max,
        0xA6 => F64Copysign,
        0xA7 => I32WrapI64,
        0xA8 => I32TruncF32S,
        0xA9 => I32TruncF32U,
        0xAA => I32TruncF64S,
        0xAB => I32TruncF64U,
        0xAC => I64ExtendI32S,
        0xAD => I64ExtendI32U,
        0xAE => I64TruncF32S,
        0xAF => I64TruncF32U,
        0xB0 => I64TruncF64S,
        0xB1 => I64TruncF64U,
        0xB2 => F32ConvertI32S,
        0xB3 => F32ConvertI32U,
        0xB4 => F32ConvertI64S,
        0xB5 => F32ConvertI64U,
        0xB6 => F32DemoteF64,
        0xB7 => F64ConvertI32S,
        0xB8 => F64ConvertI32U,
        0xB9 => F64ConvertI64S,
        0xBA => F64ConvertI64U,
        0xBB => F64PromoteF32,
        0xBC => I32ReinterpretF32,
        0xBD => I64ReinterpretF64,
        0xBE => F32ReinterpretI32,
        0xBF => F64ReinterpretI64,
        0xC0 => I32Extend8S,
        0xC1 => I32Extend16S,
        0xC2 => I64Extend8S,
        0xC3 => I64Extend16S,
        0xC4 => I64Extend32S,
        0xD0 => {
            require(config, Proposal::ReferenceTypes, offset)?;
            RefNull {
                ty: read_reftype(r, config)?,
            }
        }
        0xD1 => {
            require(config, Proposal::ReferenceTypes, offset)?;
            RefIsNull
        }
        0xD2 => {
            require(config, Proposal::ReferenceTypes, offset)?;
            RefFunc {
                func: FuncIndex::from_u32(r.read_u32_leb()?),
            }
        }
        0xFC => read_fc_instruction(r, config, offset)?,
        0xFD => {
            require(config, Proposal::Simd, offset)?;
            read_simd_instruction(r, offset)?
        }
        // Atomics.
        0xFE => return Err(gated(config, Proposal::Threads, offset)),
        _ => return Err(Error::load(LoadErrorKind::IllegalOpCode, offset)),
    };
    Ok(instr)
}

fn read_fc_instruction(
    r: &mut Reader<'_>,
    config: &Config,
    offset: usize,
) -> crate::Result<Instruction> {
    use Instruction::*;
    let sub = r.read_u32_leb()?;
    let instr = match sub {
        0..=7 => {
            require(config, Proposal::BulkMemoryOperations, offset)?;
            match sub {
                0 => I32TruncSatF32S,
                1 => I32TruncSatF32U,
                2 => I32TruncSatF64S,
                3 => I32TruncSatF64U,
                4 => I64TruncSatF32S,
                5 => I64TruncSatF32U,
                6 => I64TruncSatF64S,
                _ => I64TruncSatF64U,
            }
        }
        8 => {
            require(config, Proposal::BulkMemoryOperations, offset)?;
            let data = DataIndex::from_u32(r.read_u32_leb()?);
            if r.read_u8()? != 0x00 {
                return Err(Error::load(LoadErrorKind::IllegalGrammar, offset));
            }
            MemoryInit { data }
        }
        9 => {
            require(config, Proposal::BulkMemoryOperations, offset)?;
            DataDrop {
                data: DataIndex::from_u32(r.read_u32_leb()?),
            }
        }
        10 => {
            require(config, Proposal::BulkMemoryOperations, offset)?;
            if r.read_u8()? != 0x00 || r.read_u8()? != 0x00 {
                return Err(Error::load(LoadErrorKind::IllegalGrammar, offset));
            }
            MemoryCopy
        }
        11 => {
            require(config, Proposal::BulkMemoryOperations, offset)?;
            if r.read_u8()? != 0x00 {
                return Err(Error::load(LoadErrorKind::IllegalGrammar, offset));
            }
            MemoryFill
        }
        12 => {
            require(config, Proposal::BulkMemoryOperations, offset)?;
            let elem = ElemIndex::from_u32(r.read_u32_leb()?);
            let table = TableIndex::from_u32(r.read_u32_leb()?);
            TableInit { elem, table }
        }
        13 => {
            require(config, Proposal::BulkMemoryOperations, offset)?;
            ElemDrop {
                elem: ElemIndex::from_u32(r.read_u32_leb()?),
            }
        }
        14 => {
            require(config, Proposal::BulkMemoryOperations, offset)?;
            let dst = TableIndex::from_u32(r.read_u32_leb()?);
            let src = TableIndex::from_u32(r.read_u32_leb()?);
            TableCopy { dst, src }
        }
        15 => {
            require(config, Proposal::ReferenceTypes, offset)?;
            TableGrow {
                table: TableIndex::from_u32(r.read_u32_leb()?),
            }
        }
        16 => {
            require(config, Proposal::ReferenceTypes, offset)?;
            TableSize {
                table: TableIndex::from_u32(r.read_u32_leb()?),
            }
        }
        17 => {
            require(config, Proposal::ReferenceTypes, offset)?;
            TableFill {
                table: TableIndex::from_u32(r.read_u32_leb()?),
            }
        }
        _ => return Err(Error::load(LoadErrorKind::IllegalOpCode, offset)),
    };
    Ok(instr)
}

fn read_simd_instruction(r: &mut Reader<'_>, offset: usize) -> crate::Result<Instruction> {
    use Instruction::*;
    let sub = r.read_u32_leb()?;
    let instr = match sub {
        0x00 => V128Load(read_memarg(r)?),
        0x0B => V128Store(read_memarg(r)?),
        0x0C => {
            let bytes = r.read_bytes(16)?;
            V128Const(u128::from_le_bytes(bytes.try_into().unwrap()))
        }
        0x0F => I8x16Splat,
        0x10 => I16x8Splat,
        0x11 => I32x4Splat,
        0x12 => I64x2Splat,
        0x1B => I32x4ExtractLane { lane: r.read_u8()? },
        0x1C => I32x4ReplaceLane { lane: r.read_u8()? },
        0x4D => V128Not,
        0x4E => V128And,
        0x4F => V128AndNot,
        0x50 => V128Or,
        0x51 => V128Xor,
        0x53 => V128AnyTrue,
        0x6E => I8x16Add,
        0x71 => I8x16Sub,
        0x8E => I16x8Add,
        0x91 => I16x8Sub,
        0xAE => I32x4Add,
        0xB1 => I32x4Sub,
        0xB5 => I32x4Mul,
        0xCE => I64x2Add,
        0xD1 => I64x2Sub,
        _ => return Err(Error::load(LoadErrorKind::IllegalOpCode, offset)),
    };
    Ok(instr)
}
