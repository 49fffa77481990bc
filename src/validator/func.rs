//! The stack-polymorphic operand-and-label type checker, a direct
//! rendition of the validation algorithm from the core spec appendix.

use crate::ast::{self, Instruction, MemArg};
use crate::errors::ValidationErrorKind;
use crate::indices::{DataIndex, ElemIndex, FuncIndex, TableIndex};
use crate::types::{BlockType, FuncType, Mutability, RefType, TableType, ValType};
use hashbrown::HashSet;
use smallvec::SmallVec;

type VResult<T> = Result<T, ValidationErrorKind>;

/// `None` stands for the unknown type that materializes below an
/// unreachable point.
type Operand = Option<ValType>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FrameKind {
    Func,
    Block,
    Loop,
    If,
    Else,
}

struct CtrlFrame {
    kind: FrameKind,
    start_types: Vec<ValType>,
    end_types: Vec<ValType>,
    height: usize,
    unreachable: bool,
}

impl CtrlFrame {
    /// The types a branch to this label carries: the params for a loop,
    /// the results otherwise.
    fn label_types(&self) -> &[ValType] {
        if self.kind == FrameKind::Loop {
            &self.start_types
        } else {
            &self.end_types
        }
    }
}

pub(super) struct FuncValidator<'m> {
    module: &'m ast::Module,
    declared_funcs: &'m HashSet<FuncIndex>,
    locals: Vec<ValType>,
    ops: SmallVec<[Operand; 32]>,
    ctrls: Vec<CtrlFrame>,
}

/// Check one function body; errors carry the instruction position within
/// the body.
pub(super) fn validate_func(
    module: &ast::Module,
    declared_funcs: &HashSet<FuncIndex>,
    ty: &FuncType,
    body: &ast::FunctionBody,
) -> Result<(), (ValidationErrorKind, usize)> {
    let mut locals = ty.params().to_vec();
    locals.extend_from_slice(&body.locals);

    let mut v = FuncValidator {
        module,
        declared_funcs,
        locals,
        ops: SmallVec::new(),
        ctrls: Vec::new(),
    };
    v.ctrls.push(CtrlFrame {
        kind: FrameKind::Func,
        start_types: Vec::new(),
        end_types: ty.results().to_vec(),
        height: 0,
        unreachable: false,
    });

    for (pc, instr) in body.instrs.iter().enumerate() {
        v.instr(instr).map_err(|kind| (kind, pc))?;
    }
    if !v.ctrls.is_empty() {
        return Err((ValidationErrorKind::TypeCheckFailed, body.instrs.len()));
    }
    Ok(())
}

impl FuncValidator<'_> {
    fn push(&mut self, ty: ValType) {
        self.ops.push(Some(ty));
    }

    fn push_operand(&mut self, op: Operand) {
        self.ops.push(op);
    }

    fn pop(&mut self) -> VResult<Operand> {
        let frame = self.ctrls.last().expect("no open control frame");
        if self.ops.len() == frame.height {
            if frame.unreachable {
                return Ok(None);
            }
            return Err(ValidationErrorKind::TypeCheckFailed);
        }
        Ok(self.ops.pop().expect("operand stack underflow"))
    }

    fn pop_expect(&mut self, expect: ValType) -> VResult<Operand> {
        let actual = self.pop()?;
        match actual {
            Some(ty) if ty != expect => Err(ValidationErrorKind::TypeCheckFailed),
            _ => Ok(actual),
        }
    }

    fn pop_many(&mut self, types: &[ValType]) -> VResult<()> {
        for ty in types.iter().rev() {
            self.pop_expect(*ty)?;
        }
        Ok(())
    }

    fn push_many(&mut self, types: &[ValType]) {
        for ty in types {
            self.push(*ty);
        }
    }

    fn push_ctrl(&mut self, kind: FrameKind, start_types: Vec<ValType>, end_types: Vec<ValType>) {
        let height = self.ops.len();
        for ty in &start_types {
            self.push(*ty);
        }
        self.ctrls.push(CtrlFrame {
            kind,
            start_types,
            end_types,
            height,
            unreachable: false,
        });
    }

    fn pop_ctrl(&mut self) -> VResult<CtrlFrame> {
        let end_types = {
            let frame = self
                .ctrls
                .last()
                .ok_or(ValidationErrorKind::TypeCheckFailed)?;
            frame.end_types.clone()
        };
        self.pop_many(&end_types)?;
        let frame = self.ctrls.pop().expect("checked above");
        if self.ops.len() != frame.height {
            return Err(ValidationErrorKind::TypeCheckFailed);
        }
        Ok(frame)
    }

    fn set_unreachable(&mut self) {
        let frame = self.ctrls.last_mut().expect("no open control frame");
        self.ops.truncate(frame.height);
        frame.unreachable = true;
    }

    fn label(&self, depth: u32) -> VResult<&CtrlFrame> {
        let index = (self.ctrls.len() as u64)
            .checked_sub(1 + depth as u64)
            .ok_or(ValidationErrorKind::TypeCheckFailed)?;
        Ok(&self.ctrls[index as usize])
    }

    fn block_types(&self, ty: BlockType) -> VResult<(Vec<ValType>, Vec<ValType>)> {
        match ty {
            BlockType::Empty => Ok((Vec::new(), Vec::new())),
            BlockType::Value(t) => Ok((Vec::new(), vec![t])),
            BlockType::Func(index) => {
                let ty = self
                    .module
                    .types
                    .get(index)
                    .ok_or(ValidationErrorKind::UnknownType)?;
                Ok((ty.params().to_vec(), ty.results().to_vec()))
            }
        }
    }

    fn func_type(&self, func: FuncIndex) -> VResult<&FuncType> {
        self.module
            .func_type(func)
            .ok_or(ValidationErrorKind::UnknownFunc)
    }

    fn table_type(&self, table: TableIndex) -> VResult<&TableType> {
        self.module
            .tables
            .get(table)
            .ok_or(ValidationErrorKind::UnknownTable)
    }

    fn local_type(&self, local: u32) -> VResult<ValType> {
        self.locals
            .get(local as usize)
            .copied()
            .ok_or(ValidationErrorKind::UnknownLocal)
    }

    fn check_memory(&self) -> VResult<()> {
        if self.module.memories.is_empty() {
            return Err(ValidationErrorKind::UnknownMemory);
        }
        Ok(())
    }

    fn check_align(&self, memarg: &MemArg, width: u32) -> VResult<()> {
        self.check_memory()?;
        if memarg.align >= 32 || (1u64 << memarg.align) > u64::from(width) {
            return Err(ValidationErrorKind::InvalidAlignment);
        }
        Ok(())
    }

    fn check_data(&self, data: DataIndex) -> VResult<()> {
        let count = self
            .module
            .data_count
            .ok_or(ValidationErrorKind::UnknownData)?;
        if data.as_u32() >= count {
            return Err(ValidationErrorKind::UnknownData);
        }
        Ok(())
    }

    fn elem_type(&self, elem: ElemIndex) -> VResult<RefType> {
        self.module
            .elements
            .get(elem.as_u32() as usize)
            .map(|seg| seg.ty)
            .ok_or(ValidationErrorKind::UnknownElem)
    }

    fn load(&mut self, memarg: &MemArg, width: u32, result: ValType) -> VResult<()> {
        self.check_align(memarg, width)?;
        self.pop_expect(ValType::I32)?;
        self.push(result);
        Ok(())
    }

    fn store(&mut self, memarg: &MemArg, width: u32, operand: ValType) -> VResult<()> {
        self.check_align(memarg, width)?;
        self.pop_expect(operand)?;
        self.pop_expect(ValType::I32)?;
        Ok(())
    }

    fn unop(&mut self, ty: ValType) -> VResult<()> {
        self.pop_expect(ty)?;
        self.push(ty);
        Ok(())
    }

    fn binop(&mut self, ty: ValType) -> VResult<()> {
        self.pop_expect(ty)?;
        self.pop_expect(ty)?;
        self.push(ty);
        Ok(())
    }

    fn testop(&mut self, ty: ValType) -> VResult<()> {
        self.pop_expect(ty)?;
        self.push(ValType::I32);
        Ok(())
    }

    fn relop(&mut self, ty: ValType) -> VResult<()> {
        self.pop_expect(ty)?;
        self.pop_expect(ty)?;
        self.push(ValType::I32);
        Ok(())
    }

    fn cvtop(&mut self, from: ValType, to: ValType) -> VResult<()> {
        self.pop_expect(from)?;
        self.push(to);
        Ok(())
    }

    fn instr(&mut self, instr: &Instruction) -> VResult<()> {
        use Instruction::*;
        use ValType::*;
        match instr {
            Unreachable => self.set_unreachable(),
            Nop => {}
            Block { ty, .. } => {
                let (params, results) = self.block_types(*ty)?;
                self.pop_many(&params)?;
                self.push_ctrl(FrameKind::Block, params, results);
            }
            Loop { ty } => {
                let (params, results) = self.block_types(*ty)?;
                self.pop_many(&params)?;
                self.push_ctrl(FrameKind::Loop, params, results);
            }
            If { ty, .. } => {
                self.pop_expect(I32)?;
                let (params, results) = self.block_types(*ty)?;
                self.pop_many(&params)?;
                self.push_ctrl(FrameKind::If, params, results);
            }
            Else { .. } => {
                let frame = self.pop_ctrl()?;
                if frame.kind != FrameKind::If {
                    return Err(ValidationErrorKind::TypeCheckFailed);
                }
                self.push_ctrl(FrameKind::Else, frame.start_types, frame.end_types);
            }
            End => {
                let frame = self.pop_ctrl()?;
                // An `if` without `else` falls through its (empty) else
                // arm, so its params must equal its results.
                if frame.kind == FrameKind::If && frame.start_types != frame.end_types {
                    return Err(ValidationErrorKind::TypeCheckFailed);
                }
                let end_types = frame.end_types;
                self.push_many(&end_types);
            }
            Br { depth } => {
                let types = self.label(*depth)?.label_types().to_vec();
                self.pop_many(&types)?;
                self.set_unreachable();
            }
            BrIf { depth } => {
                self.pop_expect(I32)?;
                let types = self.label(*depth)?.label_types().to_vec();
                self.pop_many(&types)?;
                self.push_many(&types);
            }
            BrTable { targets, default } => {
                self.pop_expect(I32)?;
                let default_types = self.label(*default)?.label_types().to_vec();
                for target in targets.iter() {
                    let types = self.label(*target)?.label_types().to_vec();
                    if types.len() != default_types.len() {
                        return Err(ValidationErrorKind::TypeCheckFailed);
                    }
                    // Pop against this label's types, then restore the
                    // operands so every target is checked against the
                    // same stack.
                    let mut popped = Vec::with_capacity(types.len());
                    for ty in types.iter().rev() {
                        popped.push(self.pop_expect(*ty)?);
                    }
                    for op in popped.into_iter().rev() {
                        self.push_operand(op);
                    }
                }
                self.pop_many(&default_types)?;
                self.set_unreachable();
            }
            Return => {
                let types = self.ctrls[0].end_types.clone();
                self.pop_many(&types)?;
                self.set_unreachable();
            }
            Call { func } => {
                let ty = self.func_type(*func)?.clone();
                self.pop_many(ty.params())?;
                self.push_many(ty.results());
            }
            CallIndirect { ty, table } => {
                let table_ty = self.table_type(*table)?;
                if table_ty.elem != RefType::FuncRef {
                    return Err(ValidationErrorKind::TypeCheckFailed);
                }
                let ty = self
                    .module
                    .types
                    .get(*ty)
                    .ok_or(ValidationErrorKind::UnknownType)?
                    .clone();
                self.pop_expect(I32)?;
                self.pop_many(ty.params())?;
                self.push_many(ty.results());
            }

            RefNull { ty } => self.push((*ty).into()),
            RefIsNull => {
                match self.pop()? {
                    Some(ty) if !ty.is_ref() => {
                        return Err(ValidationErrorKind::TypeCheckFailed)
                    }
                    _ => {}
                }
                self.push(I32);
            }
            RefFunc { func } => {
                self.func_type(*func)?;
                if !self.declared_funcs.contains(func) {
                    return Err(ValidationErrorKind::UnknownFunc);
                }
                self.push(FuncRef);
            }

            Drop => {
                self.pop()?;
            }
            Select => {
                self.pop_expect(I32)?;
                let t1 = self.pop()?;
                let t2 = self.pop()?;
                let result = match (t1, t2) {
                    (Some(a), Some(b)) => {
                        if a != b || !a.is_num() {
                            return Err(ValidationErrorKind::TypeCheckFailed);
                        }
                        Some(a)
                    }
                    (Some(t), None) | (None, Some(t)) => {
                        if !t.is_num() {
                            return Err(ValidationErrorKind::TypeCheckFailed);
                        }
                        Some(t)
                    }
                    (None, None) => None,
                };
                self.push_operand(result);
            }
            TypedSelect { ty } => {
                self.pop_expect(I32)?;
                self.pop_expect(*ty)?;
                self.pop_expect(*ty)?;
                self.push(*ty);
            }

            LocalGet { local } => {
                let ty = self.local_type(*local)?;
                self.push(ty);
            }
            LocalSet { local } => {
                let ty = self.local_type(*local)?;
                self.pop_expect(ty)?;
            }
            LocalTee { local } => {
                let ty = self.local_type(*local)?;
                self.pop_expect(ty)?;
                self.push(ty);
            }
            GlobalGet { global } => {
                let ty = self
                    .module
                    .globals
                    .get(*global)
                    .ok_or(ValidationErrorKind::UnknownGlobal)?;
                self.push(ty.content);
            }
            GlobalSet { global } => {
                let ty = *self
                    .module
                    .globals
                    .get(*global)
                    .ok_or(ValidationErrorKind::UnknownGlobal)?;
                if ty.mutability != Mutability::Var {
                    return Err(ValidationErrorKind::InvalidMut);
                }
                self.pop_expect(ty.content)?;
            }

            TableGet { table } => {
                let elem = self.table_type(*table)?.elem;
                self.pop_expect(I32)?;
                self.push(elem.into());
            }
            TableSet { table } => {
                let elem = self.table_type(*table)?.elem;
                self.pop_expect(elem.into())?;
                self.pop_expect(I32)?;
            }
            TableInit { elem, table } => {
                let table_elem = self.table_type(*table)?.elem;
                let seg_ty = self.elem_type(*elem)?;
                if seg_ty != table_elem {
                    return Err(ValidationErrorKind::TypeCheckFailed);
                }
                self.pop_expect(I32)?;
                self.pop_expect(I32)?;
                self.pop_expect(I32)?;
            }
            ElemDrop { elem } => {
                self.elem_type(*elem)?;
            }
            TableCopy { dst, src } => {
                let dst_elem = self.table_type(*dst)?.elem;
                let src_elem = self.table_type(*src)?.elem;
                if dst_elem != src_elem {
                    return Err(ValidationErrorKind::TypeCheckFailed);
                }
                self.pop_expect(I32)?;
                self.pop_expect(I32)?;
                self.pop_expect(I32)?;
            }
            TableGrow { table } => {
                let elem = self.table_type(*table)?.elem;
                self.pop_expect(I32)?;
                self.pop_expect(elem.into())?;
                self.push(I32);
            }
            TableSize { table } => {
                self.table_type(*table)?;
                self.push(I32);
            }
            TableFill { table } => {
                let elem = self.table_type(*table)?.elem;
                self.pop_expect(I32)?;
                self.pop_expect(elem.into())?;
                self.pop_expect(I32)?;
            }

            I32Load(m) => self.load(m, 4, I32)?,
            I64Load(m) => self.load(m, 8, I64)?,
            F32Load(m) => self.load(m, 4, F32)?,
            F64Load(m) => self.load(m, 8, F64)?,
            I32Load8S(m) | I32Load8U(m) => self.load(m, 1, I32)?,
            I32Load16S(m) | I32Load16U(m) => self.load(m, 2, I32)?,
            I64Load8S(m) | I64Load8U(m) => self.load(m, 1, I64)?,
            I64Load16S(m) | I64Load16U(m) => self.load(m, 2, I64)?,
            I64Load32S(m) | I64Load32U(m) => self.load(m, 4, I64)?,
            I32Store(m) => self.store(m, 4, I32)?,
            I64Store(m) => self.store(m, 8, I64)?,
            F32Store(m) => self.store(m, 4, F32)?,
            F64Store(m) => self.store(m, 8, F64)?,
            I32Store8(m) => self.store(m, 1, I32)?,
            I32Store16(m) => self.store(m, 2, I32)?,
            I64Store8(m) => self.store(m, 1, I64)?,
            I64Store16(m) => self.store(m, 2, I64)?,
            I64Store32(m) => self.store(m, 4, I64)?,
            MemorySize => {
                self.check_memory()?;
                self.push(I32);
            }
            MemoryGrow => {
                self.check_memory()?;
                self.pop_expect(I32)?;
                self.push(I32);
            }
            MemoryInit { data } => {
                self.check_memory()?;
                self.check_data(*data)?;
                self.pop_expect(I32)?;
                self.pop_expect(I32)?;
                self.pop_expect(I32)?;
            }
            DataDrop { data } => self.check_data(*data)?,
            MemoryCopy | MemoryFill => {
                self.check_memory()?;
                self.pop_expect(I32)?;
                self.pop_expect(I32)?;
                self.pop_expect(I32)?;
            }

            I32Const(_) => self.push(I32),
            I64Const(_) => self.push(I64),
            F32Const(_) => self.push(F32),
            F64Const(_) => self.push(F64),

            I32Eqz => self.testop(I32)?,
            I32Eq | I32Ne | I32LtS | I32LtU | I32GtS | I32GtU | I32LeS | I32LeU | I32GeS
            | I32GeU => self.relop(I32)?,
            I64Eqz => self.testop(I64)?,
            I64Eq | I64Ne | I64LtS | I64LtU | I64GtS | I64GtU | I64LeS | I64LeU | I64GeS
            | I64GeU => self.relop(I64)?,
            F32Eq | F32Ne | F32Lt | F32Gt | F32Le | F32Ge => self.relop(F32)?,
            F64Eq | F64Ne | F64Lt | F64Gt | F64Le | F64Ge => self.relop(F64)?,

            I32Clz | I32Ctz | I32Popcnt => self.unop(I32)?,
            I32Add | I32Sub | I32Mul | I32DivS | I32DivU | I32RemS | I32RemU | I32And | I32Or
            | I32Xor | I32Shl | I32ShrS | I32ShrU | I32Rotl | I32Rotr => self.binop(I32)?,
            I64Clz | I64Ctz | I64Popcnt => self.unop(I64)?,
            I64Add | I64Sub | I64Mul | I64DivS | I64DivU | I64RemS | I64RemU | I64And | I64Or
            | I64Xor | I64Shl | I64ShrS | I64ShrU | I64Rotl | I64Rotr => self.binop(I64)?,
            F32Abs | F32Neg | F32Ceil | F32Floor | F32Trunc | F32Nearest | F32Sqrt => {
                self.unop(F32)?
            }
            F32Add | F32Sub | F32Mul | F32Div | F32Min | F32Max | F32Copysign => {
                self.binop(F32)?
            }
            F64Abs | F64Neg | F64Ceil | F64Floor | F64Trunc | F64Nearest | F64Sqrt => {
                self.unop(F64)?
            }
            F64Add | F64Sub | F64Mul | F64Div | F64Min | F64Max | F64Copysign => {
                self.binop(F64)?
            }

            I32WrapI64 => self.cvtop(I64, I32)?,
            I32TruncF32S | I32TruncF32U | I32TruncSatF32S | I32TruncSatF32U => {
                self.cvtop(F32, I32)?
            }
            I32TruncF64S | I32TruncF64U | I32TruncSatF64S | I32TruncSatF64U => {
                self.cvtop(F64, I32)?
            }
            I64ExtendI32S | I64ExtendI32U => self.cvtop(I32, I64)?,
            I64TruncF32S | I64TruncF32U | I64TruncSatF32S | I64TruncSatF32U => {
                self.cvtop(F32, I64)?
            }
            I64TruncF64S | I64TruncF64U | I64TruncSatF64S | I64TruncSatF64U => {
                self.cvtop(F64, I64)?
            }
            F32ConvertI32S | F32ConvertI32U => self.cvtop(I32, F32)?,
            F32ConvertI64S | F32ConvertI64U => self.cvtop(I64, F32)?,
            F32DemoteF64 => self.cvtop(F64, F32)?,
            F64ConvertI32S | F64ConvertI32U => self.cvtop(I32, F64)?,
            F64ConvertI64S | F64ConvertI64U => self.cvtop(I64, F64)?,
            F64PromoteF32 => self.cvtop(F32, F64)?,
            I32ReinterpretF32 => self.cvtop(F32, I32)?,
            I64ReinterpretF64 => self.cvtop(F64, I64)?,
            F32ReinterpretI32 => self.cvtop(I32, F32)?,
            F64ReinterpretI64 => self.cvtop(I64, F64)?,
            I32Extend8S | I32Extend16S => self.unop(I32)?,
            I64Extend8S | I64Extend16S | I64Extend32S => self.unop(I64)?,

            V128Load(m) => self.load(m, 16, V128)?,
            V128Store(m) => self.store(m, 16, V128)?,
            V128Const(_) => self.push(V128),
            I8x16Splat | I16x8Splat | I32x4Splat => self.cvtop(I32, V128)?,
            I64x2Splat => self.cvtop(I64, V128)?,
            I32x4ExtractLane { lane } => {
                if *lane >= 4 {
                    return Err(ValidationErrorKind::InvalidLaneIdx);
                }
                self.cvtop(V128, I32)?
            }
            I32x4ReplaceLane { lane } => {
                if *lane >= 4 {
                    return Err(ValidationErrorKind::InvalidLaneIdx);
                }
                self.pop_expect(I32)?;
                self.pop_expect(V128)?;
                self.push(V128);
            }
            V128Not => self.unop(V128)?,
            V128And | V128AndNot | V128Or | V128Xor => self.binop(V128)?,
            V128AnyTrue => self.testop(V128)?,
            I8x16Add | I8x16Sub | I16x8Add | I16x8Sub | I32x4Add | I32x4Sub | I32x4Mul
            | I64x2Add | I64x2Sub => self.binop(V128)?,
        }
        Ok(())
    }
}
