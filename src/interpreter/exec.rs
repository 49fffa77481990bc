//! The instruction machine: operand stack, label and activation frames,
//! trap generation and cost metering. Naive clone-and-dispatch; every
//! store access goes through addresses so host functions can re-enter
//! with the same store.

use super::num::{self, canon_f32, canon_f64};
use super::HostContext;
use crate::ast::{FunctionBody, Instruction, MemArg, NO_ELSE};
use crate::config::Config;
use crate::types::BlockType;
use crate::func::FunctionInstance;
use crate::indices::{FuncAddr, MemAddr, ModuleAddr};
use crate::statistics::Statistics;
use crate::store::Store;
use crate::trap::Trap;
use crate::values::Value;
use std::sync::Arc;

/// Maximum number of activation frames, counting host re-entries.
pub(crate) const CALL_STACK_LIMIT: usize = 2048;

#[derive(Debug, Clone, Copy)]
struct Label {
    /// Where a branch to this label continues.
    branch_pc: u32,
    /// Operands a branch carries across the unwind.
    arity: u32,
    /// Operand-stack height at label entry (below the block params).
    height: u32,
    /// Loop labels survive the branch; block labels are popped.
    is_loop: bool,
}

struct Frame {
    module: ModuleAddr,
    body: Arc<FunctionBody>,
    locals: Vec<Value>,
    pc: usize,
    /// Operand-stack height at activation entry (after params were moved
    /// into locals); results land here.
    height: usize,
    arity: usize,
    labels: Vec<Label>,
}

/// Execute `func` with `args`, returning the result values or a trap.
/// `base_depth` carries the activation count of enclosing interpreter
/// entries when a host function re-enters.
pub(crate) fn invoke(
    config: &Config,
    store: &mut Store,
    stats: &mut Statistics,
    func: FuncAddr,
    args: &[Value],
    base_depth: usize,
) -> Result<Vec<Value>, Trap> {
    let mut stack: Vec<Value> = args.to_vec();
    let mut frames: Vec<Frame> = Vec::new();
    call_function(config, store, stats, &mut stack, &mut frames, func, base_depth, None)?;
    run(config, store, stats, &mut stack, &mut frames, base_depth)?;
    Ok(stack)
}

fn pop(stack: &mut Vec<Value>) -> Value {
    stack.pop().expect("operand stack underflow")
}

fn pop_i32(stack: &mut Vec<Value>) -> i32 {
    pop(stack).unwrap_i32()
}

fn pop_u32(stack: &mut Vec<Value>) -> u32 {
    pop_i32(stack) as u32
}

fn pop_i64(stack: &mut Vec<Value>) -> i64 {
    pop(stack).unwrap_i64()
}

fn pop_f32(stack: &mut Vec<Value>) -> f32 {
    pop(stack).unwrap_f32()
}

fn pop_f64(stack: &mut Vec<Value>) -> f64 {
    pop(stack).unwrap_f64()
}

fn pop_f32_bits(stack: &mut Vec<Value>) -> u32 {
    pop(stack).f32_bits().expect("expected f32")
}

fn pop_f64_bits(stack: &mut Vec<Value>) -> u64 {
    pop(stack).f64_bits().expect("expected f64")
}

fn pop_v128(stack: &mut Vec<Value>) -> u128 {
    pop(stack).unwrap_v128()
}

fn push_f32(stack: &mut Vec<Value>, x: f32) {
    stack.push(Value::F32(x.to_bits()));
}

fn push_f64(stack: &mut Vec<Value>, x: f64) {
    stack.push(Value::F64(x.to_bits()));
}

fn push_bool(stack: &mut Vec<Value>, b: bool) {
    stack.push(Value::I32(b as i32));
}

fn binop_i32(stack: &mut Vec<Value>, f: impl FnOnce(i32, i32) -> i32) {
    let b = pop_i32(stack);
    let a = pop_i32(stack);
    stack.push(Value::I32(f(a, b)));
}

fn binop_i32_trap(
    stack: &mut Vec<Value>,
    f: impl FnOnce(i32, i32) -> Result<i32, Trap>,
) -> Result<(), Trap> {
    let b = pop_i32(stack);
    let a = pop_i32(stack);
    stack.push(Value::I32(f(a, b)?));
    Ok(())
}

fn binop_i64(stack: &mut Vec<Value>, f: impl FnOnce(i64, i64) -> i64) {
    let b = pop_i64(stack);
    let a = pop_i64(stack);
    stack.push(Value::I64(f(a, b)));
}

fn binop_i64_trap(
    stack: &mut Vec<Value>,
    f: impl FnOnce(i64, i64) -> Result<i64, Trap>,
) -> Result<(), Trap> {
    let b = pop_i64(stack);
    let a = pop_i64(stack);
    stack.push(Value::I64(f(a, b)?));
    Ok(())
}

fn unop_i32(stack: &mut Vec<Value>, f: impl FnOnce(i32) -> i32) {
    let a = pop_i32(stack);
    stack.push(Value::I32(f(a)));
}

fn unop_i64(stack: &mut Vec<Value>, f: impl FnOnce(i64) -> i64) {
    let a = pop_i64(stack);
    stack.push(Value::I64(f(a)));
}

/// Arithmetic float ops canonicalize NaN results.
fn binop_f32(stack: &mut Vec<Value>, f: impl FnOnce(f32, f32) -> f32) {
    let b = pop_f32(stack);
    let a = pop_f32(stack);
    push_f32(stack, canon_f32(f(a, b)));
}

fn binop_f64(stack: &mut Vec<Value>, f: impl FnOnce(f64, f64) -> f64) {
    let b = pop_f64(stack);
    let a = pop_f64(stack);
    push_f64(stack, canon_f64(f(a, b)));
}

fn unop_f32(stack: &mut Vec<Value>, f: impl FnOnce(f32) -> f32) {
    let a = pop_f32(stack);
    push_f32(stack, canon_f32(f(a)));
}

fn unop_f64(stack: &mut Vec<Value>, f: impl FnOnce(f64) -> f64) {
    let a = pop_f64(stack);
    push_f64(stack, canon_f64(f(a)));
}

fn cmp_i32(stack: &mut Vec<Value>, f: impl FnOnce(i32, i32) -> bool) {
    let b = pop_i32(stack);
    let a = pop_i32(stack);
    push_bool(stack, f(a, b));
}

fn cmp_u32(stack: &mut Vec<Value>, f: impl FnOnce(u32, u32) -> bool) {
    let b = pop_u32(stack);
    let a = pop_u32(stack);
    push_bool(stack, f(a, b));
}

fn cmp_i64(stack: &mut Vec<Value>, f: impl FnOnce(i64, i64) -> bool) {
    let b = pop_i64(stack);
    let a = pop_i64(stack);
    push_bool(stack, f(a, b));
}

fn cmp_u64(stack: &mut Vec<Value>, f: impl FnOnce(u64, u64) -> bool) {
    let b = pop_i64(stack) as u64;
    let a = pop_i64(stack) as u64;
    push_bool(stack, f(a, b));
}

fn cmp_f32(stack: &mut Vec<Value>, f: impl FnOnce(f32, f32) -> bool) {
    let b = pop_f32(stack);
    let a = pop_f32(stack);
    push_bool(stack, f(a, b));
}

fn cmp_f64(stack: &mut Vec<Value>, f: impl FnOnce(f64, f64) -> bool) {
    let b = pop_f64(stack);
    let a = pop_f64(stack);
    push_bool(stack, f(a, b));
}

fn binop_v128(stack: &mut Vec<Value>, f: impl FnOnce(u128, u128) -> u128) {
    let b = pop_v128(stack);
    let a = pop_v128(stack);
    stack.push(Value::V128(f(a, b)));
}

/// The `(params, results)` arity of a block type, resolved against the
/// frame's module instance.
fn block_arity(store: &Store, module: ModuleAddr, ty: BlockType) -> (usize, usize) {
    match ty {
        BlockType::Empty => (0, 0),
        BlockType::Value(_) => (0, 1),
        BlockType::Func(index) => {
            let ty = store[module]
                .func_type(index.as_u32())
                .expect("validated block type");
            (ty.params().len(), ty.results().len())
        }
    }
}

fn default_memory(store: &Store, module: ModuleAddr) -> MemAddr {
    store[module].default_memory().expect("validated memory access")
}

fn mem_load<const N: usize>(
    store: &Store,
    module: ModuleAddr,
    stack: &mut Vec<Value>,
    memarg: &MemArg,
) -> Result<[u8; N], Trap> {
    let maddr = default_memory(store, module);
    let base = pop_u32(stack);
    let ea = u64::from(base) + u64::from(memarg.offset);
    store[maddr].load::<N>(ea)
}

fn mem_store(
    store: &mut Store,
    module: ModuleAddr,
    stack: &mut Vec<Value>,
    memarg: &MemArg,
    bytes: &[u8],
) -> Result<(), Trap> {
    let maddr = default_memory(store, module);
    let base = pop_u32(stack);
    let ea = u64::from(base) + u64::from(memarg.offset);
    store[maddr].store(ea, bytes)
}

/// Transfer control to a label. `depth == labels.len()` targets the
/// implicit function label and returns from the activation; the caller
/// must then check for an empty frame stack.
fn branch(stack: &mut Vec<Value>, frames: &mut Vec<Frame>, depth: u32) {
    let frame = frames.last_mut().expect("no active frame");
    if depth as usize == frame.labels.len() {
        let keep = stack.split_off(stack.len() - frame.arity);
        stack.truncate(frame.height);
        stack.extend(keep);
        frames.pop();
        return;
    }
    let idx = frame.labels.len() - 1 - depth as usize;
    let label = frame.labels[idx];
    let keep = stack.split_off(stack.len() - label.arity as usize);
    stack.truncate(label.height as usize);
    stack.extend(keep);
    frame.labels.truncate(if label.is_loop { idx + 1 } else { idx });
    frame.pc = label.branch_pc as usize;
}

/// Invoke a function at `addr`: host callables run in place, Wasm bodies
/// push an activation frame. Arguments are taken from the operand stack.
#[allow(clippy::too_many_arguments)]
fn call_function(
    config: &Config,
    store: &mut Store,
    stats: &mut Statistics,
    stack: &mut Vec<Value>,
    frames: &mut Vec<Frame>,
    addr: FuncAddr,
    base_depth: usize,
    caller_memory: Option<MemAddr>,
) -> Result<(), Trap> {
    let callee = store[addr].clone();
    match callee {
        FunctionInstance::Host(host) => {
            let params_len = host.ty.params().len();
            let args = stack.split_off(stack.len() - params_len);
            let mut ctx = HostContext {
                config,
                store,
                stats,
                memory: caller_memory,
                depth: base_depth + frames.len() + 1,
            };
            let results = host.callable.call(&mut ctx, &args)?;
            if results.len() != host.ty.results().len()
                || results
                    .iter()
                    .zip(host.ty.results())
                    .any(|(value, ty)| value.ty() != *ty)
            {
                log::error!("host function returned values not matching its declared type");
                return Err(Trap::HostFunctionFailed);
            }
            stack.extend(results);
        }
        FunctionInstance::Wasm(wasm) => {
            if base_depth + frames.len() + 1 > CALL_STACK_LIMIT {
                return Err(Trap::CallStackExhausted);
            }
            let params_len = wasm.ty.params().len();
            let mut locals = stack.split_off(stack.len() - params_len);
            locals.reserve(wasm.body.locals.len());
            for ty in &wasm.body.locals {
                locals.push(Value::default_for(*ty));
            }
            frames.push(Frame {
                module: wasm.module,
                height: stack.len(),
                arity: wasm.ty.results().len(),
                locals,
                pc: 0,
                labels: Vec::new(),
                body: wasm.body,
            });
        }
    }
    Ok(())
}

fn run(
    config: &Config,
    store: &mut Store,
    stats: &mut Statistics,
    stack: &mut Vec<Value>,
    frames: &mut Vec<Frame>,
    base_depth: usize,
) -> Result<(), Trap> {
    use Instruction::*;

    while !frames.is_empty() {
        let (instr, module) = {
            let frame = frames.last_mut().expect("no active frame");
            let instr = frame.body.instrs[frame.pc].clone();
            frame.pc += 1;
            (instr, frame.module)
        };

        stats.add_instr(instr.cost_index())?;

        match instr {
            Unreachable => return Err(Trap::Unreachable),
            Nop => {}

            Block { ty, end_pc } => {
                let (params, results) = block_arity(store, module, ty);
                let frame = frames.last_mut().expect("no active frame");
                frame.labels.push(Label {
                    branch_pc: end_pc + 1,
                    arity: results as u32,
                    height: (stack.len() - params) as u32,
                    is_loop: false,
                });
            }
            Loop { ty } => {
                let (params, _) = block_arity(store, module, ty);
                let frame = frames.last_mut().expect("no active frame");
                frame.labels.push(Label {
                    branch_pc: frame.pc as u32,
                    arity: params as u32,
                    height: (stack.len() - params) as u32,
                    is_loop: true,
                });
            }
            If { ty, else_pc, end_pc } => {
                let cond = pop_i32(stack);
                let (params, results) = block_arity(store, module, ty);
                let frame = frames.last_mut().expect("no active frame");
                frame.labels.push(Label {
                    branch_pc: end_pc + 1,
                    arity: results as u32,
                    height: (stack.len() - params) as u32,
                    is_loop: false,
                });
                if cond == 0 {
                    if else_pc != NO_ELSE {
                        frame.pc = else_pc as usize + 1;
                    } else {
                        // No else arm: fall straight to `end`.
                        frame.pc = end_pc as usize;
                    }
                }
            }
            Else { end_pc } => {
                // Reached by falling out of the then-arm; `end` pops the
                // label.
                let frame = frames.last_mut().expect("no active frame");
                frame.pc = end_pc as usize;
            }
            End => {
                let frame = frames.last_mut().expect("no active frame");
                if frame.labels.pop().is_none() {
                    let (height, arity) = (frame.height, frame.arity);
                    debug_assert_eq!(stack.len(), height + arity);
                    frames.pop();
                }
            }
            Br { depth } => branch(stack, frames, depth),
            BrIf { depth } => {
                if pop_i32(stack) != 0 {
                    branch(stack, frames, depth);
                }
            }
            BrTable { targets, default } => {
                let index = pop_u32(stack) as usize;
                let depth = targets.get(index).copied().unwrap_or(default);
                branch(stack, frames, depth);
            }
            Return => branch_to_function_end(stack, frames),
            Call { func } => {
                let addr = store[module].func_addr(func).expect("validated call");
                let caller_memory = store[module].default_memory();
                call_function(
                    config, store, stats, stack, frames, addr, base_depth, caller_memory,
                )?;
            }
            CallIndirect { ty, table } => {
                let taddr = store[module].table_addr(table).expect("validated table");
                let index = pop_u32(stack);
                let slot = store[taddr]
                    .get(index)
                    .map_err(|_| Trap::UndefinedElement)?;
                let faddr = match slot {
                    Value::FuncRef(Some(addr)) => addr,
                    Value::FuncRef(None) => return Err(Trap::UndefinedElement),
                    _ => return Err(Trap::UndefinedElement),
                };
                let expected = store[module]
                    .func_type(ty.as_u32())
                    .expect("validated type index");
                if store[faddr].ty() != expected {
                    return Err(Trap::IndirectCallTypeMismatch);
                }
                let caller_memory = store[module].default_memory();
                call_function(
                    config, store, stats, stack, frames, faddr, base_depth, caller_memory,
                )?;
            }

            RefNull { ty } => stack.push(Value::null_ref(ty)),
            RefIsNull => {
                let value = pop(stack);
                push_bool(stack, value.is_null_ref());
            }
            RefFunc { func } => {
                let addr = store[module].func_addr(func).expect("validated ref.func");
                stack.push(Value::FuncRef(Some(addr)));
            }

            Drop => {
                pop(stack);
            }
            Select | TypedSelect { .. } => {
                let cond = pop_i32(stack);
                let b = pop(stack);
                let a = pop(stack);
                stack.push(if cond != 0 { a } else { b });
            }

            LocalGet { local } => {
                let frame = frames.last().expect("no active frame");
                stack.push(frame.locals[local as usize]);
            }
            LocalSet { local } => {
                let value = pop(stack);
                let frame = frames.last_mut().expect("no active frame");
                frame.locals[local as usize] = value;
            }
            LocalTee { local } => {
                let value = *stack.last().expect("operand stack underflow");
                let frame = frames.last_mut().expect("no active frame");
                frame.locals[local as usize] = value;
            }
            GlobalGet { global } => {
                let gaddr = store[module].global_addr(global).expect("validated global");
                stack.push(store[gaddr].value());
            }
            GlobalSet { global } => {
                let gaddr = store[module].global_addr(global).expect("validated global");
                let value = pop(stack);
                store[gaddr].set_unchecked(value);
            }

            TableGet { table } => {
                let taddr = store[module].table_addr(table).expect("validated table");
                let index = pop_u32(stack);
                stack.push(store[taddr].get(index)?);
            }
            TableSet { table } => {
                let taddr = store[module].table_addr(table).expect("validated table");
                let value = pop(stack);
                let index = pop_u32(stack);
                store[taddr].set(index, value)?;
            }
            TableSize { table } => {
                let taddr = store[module].table_addr(table).expect("validated table");
                stack.push(Value::I32(store[taddr].size() as i32));
            }
            TableGrow { table } => {
                let taddr = store[module].table_addr(table).expect("validated table");
                let delta = pop_u32(stack);
                let init = pop(stack);
                let result = match store[taddr].grow(delta, init) {
                    Some(old) => old as i32,
                    None => -1,
                };
                stack.push(Value::I32(result));
            }
            TableFill { table } => {
                let taddr = store[module].table_addr(table).expect("validated table");
                let len = pop_u32(stack);
                let value = pop(stack);
                let offset = pop_u32(stack);
                store[taddr].fill(offset, len, value)?;
            }
            TableCopy { dst, src } => {
                let daddr = store[module].table_addr(dst).expect("validated table");
                let saddr = store[module].table_addr(src).expect("validated table");
                let len = pop_u32(stack) as usize;
                let s = pop_u32(stack) as usize;
                let d = pop_u32(stack) as usize;
                if (s as u64 + len as u64) > store[saddr].size() as u64
                    || (d as u64 + len as u64) > store[daddr].size() as u64
                {
                    return Err(Trap::TableOutOfBounds);
                }
                if daddr == saddr {
                    store[daddr].elems_mut().copy_within(s..s + len, d);
                } else {
                    let items: Vec<Value> = store[saddr].elems()[s..s + len].to_vec();
                    store[daddr].elems_mut()[d..d + len].copy_from_slice(&items);
                }
            }
            TableInit { elem, table } => {
                let taddr = store[module].table_addr(table).expect("validated table");
                let len = pop_u32(stack) as usize;
                let s = pop_u32(stack) as usize;
                let d = pop_u32(stack) as usize;
                let segment = store[module].elem_segment(elem);
                if (s as u64 + len as u64) > segment.len() as u64 {
                    return Err(Trap::TableOutOfBounds);
                }
                let items: Vec<Value> = segment[s..s + len].to_vec();
                if (d as u64 + len as u64) > store[taddr].size() as u64 {
                    return Err(Trap::TableOutOfBounds);
                }
                store[taddr].elems_mut()[d..d + len].copy_from_slice(&items);
            }
            ElemDrop { elem } => {
                store
                    .get_module_mut(module)
                    .expect("live module")
                    .drop_elem_segment(elem);
            }

            I32Load(m) => {
                let bytes = mem_load::<4>(store, module, stack, &m)?;
                stack.push(Value::I32(i32::from_le_bytes(bytes)));
            }
            I64Load(m) => {
                let bytes = mem_load::<8>(store, module, stack, &m)?;
                stack.push(Value::I64(i64::from_le_bytes(bytes)));
            }
            F32Load(m) => {
                let bytes = mem_load::<4>(store, module, stack, &m)?;
                stack.push(Value::F32(u32::from_le_bytes(bytes)));
            }
            F64Load(m) => {
                let bytes = mem_load::<8>(store, module, stack, &m)?;
                stack.push(Value::F64(u64::from_le_bytes(bytes)));
            }
            I32Load8S(m) => {
                let bytes = mem_load::<1>(store, module, stack, &m)?;
                stack.push(Value::I32(bytes[0] as i8 as i32));
            }
            I32Load8U(m) => {
                let bytes = mem_load::<1>(store, module, stack, &m)?;
                stack.push(Value::I32(bytes[0] as i32));
            }
            I32Load16S(m) => {
                let bytes = mem_load::<2>(store, module, stack, &m)?;
                stack.push(Value::I32(i16::from_le_bytes(bytes) as i32));
            }
            I32Load16U(m) => {
                let bytes = mem_load::<2>(store, module, stack, &m)?;
                stack.push(Value::I32(u16::from_le_bytes(bytes) as i32));
            }
            I64Load8S(m) => {
                let bytes = mem_load::<1>(store, module, stack, &m)?;
                stack.push(Value::I64(bytes[0] as i8 as i64));
            }
            I64Load8U(m) => {
                let bytes = mem_load::<1>(store, module, stack, &m)?;
                stack.push(Value::I64(bytes[0] as i64));
            }
            I64Load16S(m) => {
                let bytes = mem_load::<2>(store, module, stack, &m)?;
                stack.push(Value::I64(i16::from_le_bytes(bytes) as i64));
            }
            I64Load16U(m) => {
                let bytes = mem_load::<2>(store, module, stack, &m)?;
                stack.push(Value::I64(u16::from_le_bytes(bytes) as i64));
            }
            I64Load32S(m) => {
                let bytes = mem_load::<4>(store, module, stack, &m)?;
                stack.push(Value::I64(i32::from_le_bytes(bytes) as i64));
            }
            I64Load32U(m) => {
                let bytes = mem_load::<4>(store, module, stack, &m)?;
                stack.push(Value::I64(u32::from_le_bytes(bytes) as i64));
            }
            I32Store(m) => {
                let value = pop_i32(stack);
                mem_store(store, module, stack, &m, &value.to_le_bytes())?;
            }
            I64Store(m) => {
                let value = pop_i64(stack);
                mem_store(store, module, stack, &m, &value.to_le_bytes())?;
            }
            F32Store(m) => {
                let bits = pop_f32_bits(stack);
                mem_store(store, module, stack, &m, &bits.to_le_bytes())?;
            }
            F64Store(m) => {
                let bits = pop_f64_bits(stack);
                mem_store(store, module, stack, &m, &bits.to_le_bytes())?;
            }
            I32Store8(m) => {
                let value = pop_i32(stack);
                mem_store(store, module, stack, &m, &[value as u8])?;
            }
            I32Store16(m) => {
                let value = pop_i32(stack);
                mem_store(store, module, stack, &m, &(value as u16).to_le_bytes())?;
            }
            I64Store8(m) => {
                let value = pop_i64(stack);
                mem_store(store, module, stack, &m, &[value as u8])?;
            }
            I64Store16(m) => {
                let value = pop_i64(stack);
                mem_store(store, module, stack, &m, &(value as u16).to_le_bytes())?;
            }
            I64Store32(m) => {
                let value = pop_i64(stack);
                mem_store(store, module, stack, &m, &(value as u32).to_le_bytes())?;
            }
            MemorySize => {
                let maddr = default_memory(store, module);
                stack.push(Value::I32(store[maddr].page_count() as i32));
            }
            MemoryGrow => {
                let maddr = default_memory(store, module);
                let delta = pop_u32(stack);
                let result = match store[maddr].grow(delta) {
                    Some(old) => old as i32,
                    None => -1,
                };
                stack.push(Value::I32(result));
            }
            MemoryInit { data } => {
                let maddr = default_memory(store, module);
                let len = pop_u32(stack) as usize;
                let s = pop_u32(stack) as usize;
                let d = pop_u32(stack) as usize;
                let segment = store[module].data_segment(data);
                if (s as u64 + len as u64) > segment.len() as u64 {
                    return Err(Trap::MemoryOutOfBounds);
                }
                let bytes: Vec<u8> = segment[s..s + len].to_vec();
                store[maddr].store(d as u64, &bytes)?;
            }
            DataDrop { data } => {
                store
                    .get_module_mut(module)
                    .expect("live module")
                    .drop_data_segment(data);
            }
            MemoryCopy => {
                let maddr = default_memory(store, module);
                let len = pop_u32(stack) as usize;
                let s = pop_u32(stack) as usize;
                let d = pop_u32(stack) as usize;
                let size = store[maddr].byte_len();
                if (s as u64 + len as u64) > size as u64 || (d as u64 + len as u64) > size as u64 {
                    return Err(Trap::MemoryOutOfBounds);
                }
                store[maddr].data_mut().copy_within(s..s + len, d);
            }
            MemoryFill => {
                let maddr = default_memory(store, module);
                let len = pop_u32(stack) as usize;
                let value = pop_i32(stack) as u8;
                let d = pop_u32(stack) as usize;
                if (d as u64 + len as u64) > store[maddr].byte_len() as u64 {
                    return Err(Trap::MemoryOutOfBounds);
                }
                store[maddr].data_mut()[d..d + len].fill(value);
            }

            I32Const(v) => stack.push(Value::I32(v)),
            I64Const(v) => stack.push(Value::I64(v)),
            F32Const(bits) => stack.push(Value::F32(bits)),
            F64Const(bits) => stack.push(Value::F64(bits)),

            I32Eqz => {
                let a = pop_i32(stack);
                push_bool(stack, a == 0);
            }
            I32Eq => cmp_i32(stack, |a, b| a == b),
            I32Ne => cmp_i32(stack, |a, b| a != b),
            I32LtS => cmp_i32(stack, |a, b| a < b),
            I32LtU => cmp_u32(stack, |a, b| a < b),
            I32GtS => cmp_i32(stack, |a, b| a > b),
            I32GtU => cmp_u32(stack, |a, b| a > b),
            I32LeS => cmp_i32(stack, |a, b| a <= b),
            I32LeU => cmp_u32(stack, |a, b| a <= b),
            I32GeS => cmp_i32(stack, |a, b| a >= b),
            I32GeU => cmp_u32(stack, |a, b| a >= b),
            I64Eqz => {
                let a = pop_i64(stack);
                push_bool(stack, a == 0);
            }
            I64Eq => cmp_i64(stack, |a, b| a == b),
            I64Ne => cmp_i64(stack, |a, b| a != b),
            I64LtS => cmp_i64(stack, |a, b| a < b),
            I64LtU => cmp_u64(stack, |a, b| a < b),
            I64GtS => cmp_i64(stack, |a, b| a > b),
            I64GtU => cmp_u64(stack, |a, b| a > b),
            I64LeS => cmp_i64(stack, |a, b| a <= b),
            I64LeU => cmp_u64(stack, |a, b| a <= b),
            I64GeS => cmp_i64(stack, |a, b| a >= b),
            I64GeU => cmp_u64(stack, |a, b| a >= b),
            F32Eq => cmp_f32(stack, |a, b| a == b),
            F32Ne => cmp_f32(stack, |a, b| a != b),
            F32Lt => cmp_f32(stack, |a, b| a < b),
            F32Gt => cmp_f32(stack, |a, b| a > b),
            F32Le => cmp_f32(stack, |a, b| a <= b),
            F32Ge => cmp_f32(stack, |a, b| a >= b),
            F64Eq => cmp_f64(stack, |a, b| a == b),
            F64Ne => cmp_f64(stack, |a, b| a != b),
            F64Lt => cmp_f64(stack, |a, b| a < b),
            F64Gt => cmp_f64(stack, |a, b| a > b),
            F64Le => cmp_f64(stack, |a, b| a <= b),
            F64Ge => cmp_f64(stack, |a, b| a >= b),

            I32Clz => unop_i32(stack, |a| a.leading_zeros() as i32),
            I32Ctz => unop_i32(stack, |a| a.trailing_zeros() as i32),
            I32Popcnt => unop_i32(stack, |a| a.count_ones() as i32),
            I32Add => binop_i32(stack, i32::wrapping_add),
            I32Sub => binop_i32(stack, i32::wrapping_sub),
            I32Mul => binop_i32(stack, i32::wrapping_mul),
            I32DivS => binop_i32_trap(stack, num::i32_div_s)?,
            I32DivU => binop_i32_trap(stack, num::i32_div_u)?,
            I32RemS => binop_i32_trap(stack, num::i32_rem_s)?,
            I32RemU => binop_i32_trap(stack, num::i32_rem_u)?,
            I32And => binop_i32(stack, |a, b| a & b),
            I32Or => binop_i32(stack, |a, b| a | b),
            I32Xor => binop_i32(stack, |a, b| a ^ b),
            I32Shl => binop_i32(stack, |a, b| a.wrapping_shl(b as u32)),
            I32ShrS => binop_i32(stack, |a, b| a.wrapping_shr(b as u32)),
            I32ShrU => binop_i32(stack, |a, b| ((a as u32).wrapping_shr(b as u32)) as i32),
            I32Rotl => binop_i32(stack, |a, b| a.rotate_left((b as u32) % 32)),
            I32Rotr => binop_i32(stack, |a, b| a.rotate_right((b as u32) % 32)),
            I64Clz => unop_i64(stack, |a| a.leading_zeros() as i64),
            I64Ctz => unop_i64(stack, |a| a.trailing_zeros() as i64),
            I64Popcnt => unop_i64(stack, |a| a.count_ones() as i64),
            I64Add => binop_i64(stack, i64::wrapping_add),
            I64Sub => binop_i64(stack, i64::wrapping_sub),
            I64Mul => binop_i64(stack, i64::wrapping_mul),
            I64DivS => binop_i64_trap(stack, num::i64_div_s)?,
            I64DivU => binop_i64_trap(stack, num::i64_div_u)?,
            I64RemS => binop_i64_trap(stack, num::i64_rem_s)?,
            I64RemU => binop_i64_trap(stack, num::i64_rem_u)?,
            I64And => binop_i64(stack, |a, b| a & b),
            I64Or => binop_i64(stack, |a, b| a | b),
            I64Xor => binop_i64(stack, |a, b| a ^ b),
            I64Shl => binop_i64(stack, |a, b| a.wrapping_shl(b as u32)),
            I64ShrS => binop_i64(stack, |a, b| a.wrapping_shr(b as u32)),
            I64ShrU => binop_i64(stack, |a, b| ((a as u64).wrapping_shr(b as u32)) as i64),
            I64Rotl => binop_i64(stack, |a, b| a.rotate_left((b as u32) % 64)),
            I64Rotr => binop_i64(stack, |a, b| a.rotate_right((b as u32) % 64)),

            F32Abs => {
                let bits = pop_f32_bits(stack);
                stack.push(Value::F32(bits & 0x7FFF_FFFF));
            }
            F32Neg => {
                let bits = pop_f32_bits(stack);
                stack.push(Value::F32(bits ^ 0x8000_0000));
            }
            F32Ceil => unop_f32(stack, f32::ceil),
            F32Floor => unop_f32(stack, f32::floor),
            F32Trunc => unop_f32(stack, f32::trunc),
            F32Nearest => unop_f32(stack, f32::round_ties_even),
            F32Sqrt => unop_f32(stack, f32::sqrt),
            F32Add => binop_f32(stack, |a, b| a + b),
            F32Sub => binop_f32(stack, |a, b| a - b),
            F32Mul => binop_f32(stack, |a, b| a * b),
            F32Div => binop_f32(stack, |a, b| a / b),
            F32Min => binop_f32(stack, num::f32_min),
            F32Max => binop_f32(stack, num::f32_max),
            F32Copysign => {
                let b = pop_f32_bits(stack);
                let a = pop_f32_bits(stack);
                stack.push(Value::F32((a & 0x7FFF_FFFF) | (b & 0x8000_0000)));
            }
            F64Abs => {
                let bits = pop_f64_bits(stack);
                stack.push(Value::F64(bits & 0x7FFF_FFFF_FFFF_FFFF));
            }
            F64Neg => {
                let bits = pop_f64_bits(stack);
                stack.push(Value::F64(bits ^ 0x8000_0000_0000_0000));
            }
            F64Ceil => unop_f64(stack, f64::ceil),
            F64Floor => unop_f64(stack, f64::floor),
            F64Trunc => unop_f64(stack, f64::trunc),
            F64Nearest => unop_f64(stack, f64::round_ties_even),
            F64Sqrt => unop_f64(stack, f64::sqrt),
            F64Add => binop_f64(stack, |a, b| a + b),
            F64Sub => binop_f64(stack, |a, b| a - b),
            F64Mul => binop_f64(stack, |a, b| a * b),
            F64Div => binop_f64(stack, |a, b| a / b),
            F64Min => binop_f64(stack, num::f64_min),
            F64Max => binop_f64(stack, num::f64_max),
            F64Copysign => {
                let b = pop_f64_bits(stack);
                let a = pop_f64_bits(stack);
                stack.push(Value::F64(
                    (a & 0x7FFF_FFFF_FFFF_FFFF) | (b & 0x8000_0000_0000_0000),
                ));
            }

            I32WrapI64 => {
                let a = pop_i64(stack);
                stack.push(Value::I32(a as i32));
            }
            I32TruncF32S => {
                let a = pop_f32(stack);
                stack.push(Value::I32(num::i32_trunc_f32(a)?));
            }
            I32TruncF32U => {
                let a = pop_f32(stack);
                stack.push(Value::I32(num::u32_trunc_f32(a)? as i32));
            }
            I32TruncF64S => {
                let a = pop_f64(stack);
                stack.push(Value::I32(num::i32_trunc_f64(a)?));
            }
            I32TruncF64U => {
                let a = pop_f64(stack);
                stack.push(Value::I32(num::u32_trunc_f64(a)? as i32));
            }
            I64ExtendI32S => {
                let a = pop_i32(stack);
                stack.push(Value::I64(a as i64));
            }
            I64ExtendI32U => {
                let a = pop_i32(stack);
                stack.push(Value::I64(a as u32 as i64));
            }
            I64TruncF32S => {
                let a = pop_f32(stack);
                stack.push(Value::I64(num::i64_trunc_f32(a)?));
            }
            I64TruncF32U => {
                let a = pop_f32(stack);
                stack.push(Value::I64(num::u64_trunc_f32(a)? as i64));
            }
            I64TruncF64S => {
                let a = pop_f64(stack);
                stack.push(Value::I64(num::i64_trunc_f64(a)?));
            }
            I64TruncF64U => {
                let a = pop_f64(stack);
                stack.push(Value::I64(num::u64_trunc_f64(a)? as i64));
            }
            F32ConvertI32S => {
                let a = pop_i32(stack);
                push_f32(stack, a as f32);
            }
            F32ConvertI32U => {
                let a = pop_u32(stack);
                push_f32(stack, a as f32);
            }
            F32ConvertI64S => {
                let a = pop_i64(stack);
                push_f32(stack, a as f32);
            }
            F32ConvertI64U => {
                let a = pop_i64(stack) as u64;
                push_f32(stack, a as f32);
            }
            F32DemoteF64 => {
                let a = pop_f64(stack);
                push_f32(stack, canon_f32(a as f32));
            }
            F64ConvertI32S => {
                let a = pop_i32(stack);
                push_f64(stack, a as f64);
            }
            F64ConvertI32U => {
                let a = pop_u32(stack);
                push_f64(stack, a as f64);
            }
            F64ConvertI64S => {
                let a = pop_i64(stack);
                push_f64(stack, a as f64);
            }
            F64ConvertI64U => {
                let a = pop_i64(stack) as u64;
                push_f64(stack, a as f64);
            }
            F64PromoteF32 => {
                let a = pop_f32(stack);
                push_f64(stack, canon_f64(a as f64));
            }
            I32ReinterpretF32 => {
                let bits = pop_f32_bits(stack);
                stack.push(Value::I32(bits as i32));
            }
            I64ReinterpretF64 => {
                let bits = pop_f64_bits(stack);
                stack.push(Value::I64(bits as i64));
            }
            F32ReinterpretI32 => {
                let a = pop_i32(stack);
                stack.push(Value::F32(a as u32));
            }
            F64ReinterpretI64 => {
                let a = pop_i64(stack);
                stack.push(Value::F64(a as u64));
            }
            I32Extend8S => unop_i32(stack, |a| a as i8 as i32),
            I32Extend16S => unop_i32(stack, |a| a as i16 as i32),
            I64Extend8S => unop_i64(stack, |a| a as i8 as i64),
            I64Extend16S => unop_i64(stack, |a| a as i16 as i64),
            I64Extend32S => unop_i64(stack, |a| a as i32 as i64),

            I32TruncSatF32S => {
                let a = pop_f32(stack);
                stack.push(Value::I32(a as i32));
            }
            I32TruncSatF32U => {
                let a = pop_f32(stack);
                stack.push(Value::I32((a as u32) as i32));
            }
            I32TruncSatF64S => {
                let a = pop_f64(stack);
                stack.push(Value::I32(a as i32));
            }
            I32TruncSatF64U => {
                let a = pop_f64(stack);
                stack.push(Value::I32((a as u32) as i32));
            }
            I64TruncSatF32S => {
                let a = pop_f32(stack);
                stack.push(Value::I64(a as i64));
            }
            I64TruncSatF32U => {
                let a = pop_f32(stack);
                stack.push(Value::I64((a as u64) as i64));
            }
            I64TruncSatF64S => {
                let a = pop_f64(stack);
                stack.push(Value::I64(a as i64));
            }
            I64TruncSatF64U => {
                let a = pop_f64(stack);
                stack.push(Value::I64((a as u64) as i64));
            }

            V128Load(m) => {
                let bytes = mem_load::<16>(store, module, stack, &m)?;
                stack.push(Value::V128(u128::from_le_bytes(bytes)));
            }
            V128Store(m) => {
                let value = pop_v128(stack);
                mem_store(store, module, stack, &m, &value.to_le_bytes())?;
            }
            V128Const(v) => stack.push(Value::V128(v)),
            I8x16Splat => {
                let a = pop_i32(stack) as i8;
                stack.push(Value::V128(num::from_i8x16([a; 16])));
            }
            I16x8Splat => {
                let a = pop_i32(stack) as i16;
                stack.push(Value::V128(num::from_i16x8([a; 8])));
            }
            I32x4Splat => {
                let a = pop_i32(stack);
                stack.push(Value::V128(num::from_i32x4([a; 4])));
            }
            I64x2Splat => {
                let a = pop_i64(stack);
                stack.push(Value::V128(num::from_i64x2([a; 2])));
            }
            I32x4ExtractLane { lane } => {
                let v = num::i32x4(pop_v128(stack));
                stack.push(Value::I32(v[lane as usize]));
            }
            I32x4ReplaceLane { lane } => {
                let a = pop_i32(stack);
                let mut v = num::i32x4(pop_v128(stack));
                v[lane as usize] = a;
                stack.push(Value::V128(num::from_i32x4(v)));
            }
            V128Not => {
                let a = pop_v128(stack);
                stack.push(Value::V128(!a));
            }
            V128And => binop_v128(stack, |a, b| a & b),
            V128AndNot => binop_v128(stack, |a, b| a & !b),
            V128Or => binop_v128(stack, |a, b| a | b),
            V128Xor => binop_v128(stack, |a, b| a ^ b),
            V128AnyTrue => {
                let a = pop_v128(stack);
                push_bool(stack, a != 0);
            }
            I8x16Add => binop_v128(stack, |a, b| {
                lanewise16(a, b, i8::wrapping_add)
            }),
            I8x16Sub => binop_v128(stack, |a, b| {
                lanewise16(a, b, i8::wrapping_sub)
            }),
            I16x8Add => binop_v128(stack, |a, b| {
                lanewise8(a, b, i16::wrapping_add)
            }),
            I16x8Sub => binop_v128(stack, |a, b| {
                lanewise8(a, b, i16::wrapping_sub)
            }),
            I32x4Add => binop_v128(stack, |a, b| {
                lanewise4(a, b, i32::wrapping_add)
            }),
            I32x4Sub => binop_v128(stack, |a, b| {
                lanewise4(a, b, i32::wrapping_sub)
            }),
            I32x4Mul => binop_v128(stack, |a, b| {
                lanewise4(a, b, i32::wrapping_mul)
            }),
            I64x2Add => binop_v128(stack, |a, b| {
                lanewise2(a, b, i64::wrapping_add)
            }),
            I64x2Sub => binop_v128(stack, |a, b| {
                lanewise2(a, b, i64::wrapping_sub)
            }),
        }
    }
    Ok(())
}

/// `return`: unwind the current activation, carrying its results.
fn branch_to_function_end(stack: &mut Vec<Value>, frames: &mut Vec<Frame>) {
    let frame = frames.last().expect("no active frame");
    let keep = stack.split_off(stack.len() - frame.arity);
    stack.truncate(frame.height);
    stack.extend(keep);
    frames.pop();
}

fn lanewise16(a: u128, b: u128, f: impl Fn(i8, i8) -> i8) -> u128 {
    let (a, b) = (num::i8x16(a), num::i8x16(b));
    num::from_i8x16(core::array::from_fn(|i| f(a[i], b[i])))
}

fn lanewise8(a: u128, b: u128, f: impl Fn(i16, i16) -> i16) -> u128 {
    let (a, b) = (num::i16x8(a), num::i16x8(b));
    num::from_i16x8(core::array::from_fn(|i| f(a[i], b[i])))
}

fn lanewise4(a: u128, b: u128, f: impl Fn(i32, i32) -> i32) -> u128 {
    let (a, b) = (num::i32x4(a), num::i32x4(b));
    num::from_i32x4(core::array::from_fn(|i| f(a[i], b[i])))
}

fn lanewise2(a: u128, b: u128, f: impl Fn(i64, i64) -> i64) -> u128 {
    let (a, b) = (num::i64x2(a), num::i64x2(b));
    num::from_i64x2(core::array::from_fn(|i| f(a[i], b[i])))
}
