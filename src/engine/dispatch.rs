//! Component G — the flat interpreter loop (spec.md §4.G).
//!
//! Grounded on `examples/other_examples/a24a0efb_wasmi-labs-wasmi__crates-wasmi-src-engine-executor-instrs.rs.rs`'s
//! `Executor` shape: one operand stack per activation, a `pc` indexing
//! into the lowered op array, and a big match over the opcode. Call
//! nesting is modeled as native Rust recursion — each `run` invocation
//! is one activation record — rather than a manually threaded frame
//! stack, since the call graph here is never deeper than the host's own
//! call stack and `max_call_depth` already bounds it (DESIGN.md).

use crate::cancel::CancellationToken;
use crate::error::{Error, TraceFrame};
use crate::func::Func;
use crate::global::Global;
use crate::indices::{DefinedFuncIndex, FuncIndex, TableIndex, TypeIndex};
use crate::ir::{DropKeep, IrOpKind, LoadKind, MemArg, StoreKind};
use crate::lower::OpKind;
use crate::memory::Memory;
use crate::module::{FunctionLocals, Module};
use crate::numeric;
use crate::segment::{DataSegment, ElementSegment};
use crate::store::{func_handle, InstanceHandle, Store};
use crate::table::Table;
use crate::trap::Trap;
use crate::types::{FuncType, RefType, ValType};
use crate::values::Val;
use std::cell::Cell;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use super::simd;

/// One operand-stack slot. A v128 occupies two adjacent slots tagged
/// `V128Lo`/`V128Hi` rather than a single 16-byte slot, so every other
/// value stays a plain word (DESIGN.md Open Question #1); the tag lets
/// untyped stack ops (`drop`, `select`) discover a v128's width without
/// needing the static type the unlowered IR doesn't carry for them.
#[derive(Debug, Clone, Copy)]
pub(super) enum StackSlot {
    Word(u64),
    V128Lo(u64),
    V128Hi(u64),
    FuncRef(Option<Func>),
    ExternRef(Option<u64>),
}

fn slot_word(slot: StackSlot) -> u64 {
    match slot {
        StackSlot::Word(w) | StackSlot::V128Lo(w) | StackSlot::V128Hi(w) => w,
        StackSlot::FuncRef(_) | StackSlot::ExternRef(_) => panic!("expected a numeric stack slot"),
    }
}

pub(super) fn pop_word(stack: &mut Vec<StackSlot>) -> u64 {
    slot_word(stack.pop().expect("operand stack underflow"))
}

pub(super) fn push_word(stack: &mut Vec<StackSlot>, w: u64) {
    stack.push(StackSlot::Word(w));
}

fn u32_bits(v: i32) -> u32 {
    u32::from_ne_bytes(v.to_ne_bytes())
}

fn i32_from_u32_bits(v: u32) -> i32 {
    i32::from_ne_bytes(v.to_ne_bytes())
}

pub(super) fn pop_i32(stack: &mut Vec<StackSlot>) -> i32 {
    i32::from_ne_bytes(u32::try_from(pop_word(stack)).expect("i32 word fits in u32").to_ne_bytes())
}

pub(super) fn push_i32(stack: &mut Vec<StackSlot>, v: i32) {
    push_word(stack, u64::from(u32_bits(v)));
}

pub(super) fn pop_i64(stack: &mut Vec<StackSlot>) -> i64 {
    i64::from_ne_bytes(pop_word(stack).to_ne_bytes())
}

pub(super) fn push_i64(stack: &mut Vec<StackSlot>, v: i64) {
    push_word(stack, u64::from_ne_bytes(v.to_ne_bytes()));
}

pub(super) fn pop_f32_bits(stack: &mut Vec<StackSlot>) -> u32 {
    u32::try_from(pop_word(stack)).expect("f32 word fits in u32")
}

pub(super) fn push_f32_bits(stack: &mut Vec<StackSlot>, bits: u32) {
    push_word(stack, u64::from(bits));
}

fn pop_f32(stack: &mut Vec<StackSlot>) -> f32 {
    f32::from_bits(pop_f32_bits(stack))
}

fn push_f32(stack: &mut Vec<StackSlot>, v: f32) {
    push_f32_bits(stack, v.to_bits());
}

fn pop_f64(stack: &mut Vec<StackSlot>) -> f64 {
    f64::from_bits(pop_word(stack))
}

fn push_f64(stack: &mut Vec<StackSlot>, v: f64) {
    push_word(stack, v.to_bits());
}

pub(super) fn push_bool(stack: &mut Vec<StackSlot>, b: bool) {
    push_i32(stack, if b { 1 } else { 0 });
}

fn pop_bool(stack: &mut Vec<StackSlot>) -> bool {
    pop_i32(stack) != 0
}

/// Splits a v128 value into its little-endian `(lo, hi)` 64-bit halves
/// by shift-and-mask, never by reinterpreting through a byte slice of a
/// different width (numeric.rs's endian-independence rule extended to
/// the stack representation itself).
pub(super) fn v128_to_words(v: u128) -> (u64, u64) {
    let lo = u64::try_from(v & u128::from(u64::MAX)).expect("masked to 64 bits");
    let hi = u64::try_from(v >> 64).expect("shifted to 64 bits");
    (lo, hi)
}

pub(super) fn words_to_v128(lo: u64, hi: u64) -> u128 {
    u128::from(lo) | (u128::from(hi) << 64)
}

pub(super) fn pop_v128(stack: &mut Vec<StackSlot>) -> u128 {
    let hi = pop_word(stack);
    let lo = pop_word(stack);
    words_to_v128(lo, hi)
}

pub(super) fn push_v128(stack: &mut Vec<StackSlot>, v: u128) {
    let (lo, hi) = v128_to_words(v);
    stack.push(StackSlot::V128Lo(lo));
    stack.push(StackSlot::V128Hi(hi));
}

pub(super) fn pop_val(stack: &mut Vec<StackSlot>, ty: ValType) -> Val {
    match ty {
        ValType::I32 => Val::I32(pop_i32(stack)),
        ValType::I64 => Val::I64(pop_i64(stack)),
        ValType::F32 => Val::F32(pop_f32_bits(stack)),
        ValType::F64 => Val::F64(pop_word(stack)),
        ValType::V128 => Val::V128(pop_v128(stack)),
        ValType::Ref(RefType::Func) => match stack.pop().expect("operand stack underflow") {
            StackSlot::FuncRef(f) => Val::FuncRef(f),
            _ => panic!("expected a funcref stack slot"),
        },
        ValType::Ref(RefType::Extern) => match stack.pop().expect("operand stack underflow") {
            StackSlot::ExternRef(e) => Val::ExternRef(e),
            _ => panic!("expected an externref stack slot"),
        },
    }
}

pub(super) fn push_val(stack: &mut Vec<StackSlot>, val: Val) {
    match val {
        Val::I32(v) => push_i32(stack, v),
        Val::I64(v) => push_i64(stack, v),
        Val::F32(bits) => push_f32_bits(stack, bits),
        Val::F64(bits) => push_word(stack, bits),
        Val::V128(v) => push_v128(stack, v),
        Val::FuncRef(f) => stack.push(StackSlot::FuncRef(f)),
        Val::ExternRef(e) => stack.push(StackSlot::ExternRef(e)),
    }
}

fn zero_val(ty: ValType) -> Val {
    match ty {
        ValType::I32 => Val::I32(0),
        ValType::I64 => Val::I64(0),
        ValType::F32 => Val::F32(0),
        ValType::F64 => Val::F64(0),
        ValType::V128 => Val::V128(0),
        ValType::Ref(RefType::Func) => Val::FuncRef(None),
        ValType::Ref(RefType::Extern) => Val::ExternRef(None),
    }
}

/// Pops exactly one value off the stack without knowing its static
/// type, detecting a v128's second word via the `V128Hi` tag (spec.md
/// §4.G "drop"/untyped "select").
fn pop_value_generic(stack: &mut Vec<StackSlot>) -> Vec<StackSlot> {
    let top = stack.pop().expect("operand stack underflow");
    match top {
        StackSlot::V128Hi(_) => {
            let lo = stack.pop().expect("v128 low word missing");
            vec![lo, top]
        }
        other => vec![other],
    }
}

/// Discards `drop_keep.drop` words below the top `drop_keep.keep`
/// words (spec.md §4.F step 5 / §4.G "br"). The IR producer computes
/// both counts relative to the function's own local-stack baseline, so
/// applying this generically at a return-target branch already
/// collapses the stack to exactly `locals_base + keep` words.
fn apply_drop_keep(stack: &mut Vec<StackSlot>, drop_keep: DropKeep) {
    if drop_keep.drop == 0 {
        return;
    }
    let keep = usize::try_from(drop_keep.keep).expect("keep count fits in usize");
    let drop = usize::try_from(drop_keep.drop).expect("drop count fits in usize");
    let len = stack.len();
    let kept_start = len - keep;
    let new_len = len - drop - keep;
    stack.copy_within(kept_start..len, new_len);
    stack.truncate(new_len + keep);
}

thread_local! {
    static CALL_DEPTH: Cell<u32> = const { Cell::new(0) };
}

/// RAII guard enforcing `EngineConfig::max_call_depth` across the
/// native-recursion call graph (spec.md §6 "Call-stack depth", §9
/// design note: nesting via recursion means the depth bound has to be
/// tracked explicitly rather than falling out of a frame vector).
struct DepthGuard;

impl DepthGuard {
    fn enter(max_call_depth: u32) -> Result<Self, Error> {
        let depth = CALL_DEPTH.with(|d| {
            let next = d.get() + 1;
            d.set(next);
            next
        });
        if depth > max_call_depth {
            CALL_DEPTH.with(|d| d.set(d.get() - 1));
            return Err(Error::trap(Trap::StackOverflow, vec![]));
        }
        Ok(DepthGuard)
    }
}

impl Drop for DepthGuard {
    fn drop(&mut self) {
        CALL_DEPTH.with(|d| d.set(d.get() - 1));
    }
}

fn with_frame(err: Error, debug_name: &str, source_offset: u32) -> Error {
    match err {
        Error::Trap { trap, mut trace } => {
            trace.push(TraceFrame {
                debug_name: debug_name.to_string(),
                source_offset,
            });
            Error::Trap { trap, trace }
        }
        other => other,
    }
}

fn trap_here(trap: Trap, debug_name: &str, source_offset: u32) -> Error {
    tracing::trace!(?trap, debug_name, source_offset, "trap");
    with_frame(Error::trap(trap, vec![]), debug_name, source_offset)
}

/// The `check-exit-code` operation (spec.md §5, §4.G "Termination
/// hook"): an instance closed via `Store::close` or by a fired
/// cancellation token surfaces as an exit error the next time execution
/// reaches a function entry, whether or not the module was compiled
/// with `ensure_termination` (`Store::close` must take effect
/// regardless of that flag; the synthesized `CheckExitCode` op exists so
/// a module compiled *with* the flag also rechecks the token from
/// inside an already-running call tree via the watchdog-written
/// close-state word).
fn check_exit_code(store: &Store, instance: InstanceHandle, token: &CancellationToken) -> crate::Result<()> {
    let closed = store.with_instance(instance, |data| {
        crate::store::decode_close_state(data.close_state.load(Ordering::SeqCst))
    });
    if let Some(code) = closed {
        let name = store.with_instance(instance, |data| data.name.clone());
        return Err(Error::Exit { name, code });
    }
    if token.is_fired() {
        let name = store.with_instance(instance, |data| data.name.clone());
        let code = token.reason().map(|reason| reason.exit_code()).unwrap_or(1);
        return Err(Error::Exit { name, code });
    }
    Ok(())
}

/// Pops `func_ty.results` off the stack (last result on top) and writes
/// them into `results` in declaration order (spec.md §8 invariant 1:
/// the operand stack's final depth equals the callee's result arity).
fn finish(stack: &mut Vec<StackSlot>, results: &mut [Val], func_ty: &FuncType) -> crate::Result<()> {
    let mut vals = Vec::with_capacity(func_ty.results.len());
    for ty in func_ty.results.iter().rev() {
        vals.push(pop_val(stack, *ty));
    }
    vals.reverse();
    for (slot, val) in results.iter_mut().zip(vals) {
        *slot = val;
    }
    Ok(())
}

/// Runs one activation of a Wasm-defined function (spec.md §4.G). Each
/// `call`/`call_indirect` recurses back into [`crate::engine::call`],
/// which re-enters this function for a Wasm callee or the host bridge
/// for a host-provided one.
#[allow(clippy::too_many_lines)]
pub(crate) fn run(
    store: &Store,
    instance: InstanceHandle,
    defined_index: DefinedFuncIndex,
    params: &[Val],
    results: &mut [Val],
    token: &CancellationToken,
) -> crate::Result<()> {
    // spec.md §5: "If the token is already fired at call entry, the
    // call returns immediately without executing any Wasm", and
    // spec.md §4.I "Close": an instance closed before this call started
    // must already refuse it. Checked unconditionally, regardless of
    // `ensure_termination` (see `check_exit_code`).
    check_exit_code(store, instance, token)?;

    let _depth_guard = DepthGuard::enter(store.engine().config().max_call_depth)?;

    let (module, memory, tables, globals, data_segments, element_segments) = store.with_instance(instance, |data| {
        (
            data.module.clone(),
            data.memory.clone(),
            data.tables.clone(),
            data.globals.clone(),
            data.data_segments.clone(),
            data.element_segments.clone(),
        )
    });

    let debug_name = module.name().unwrap_or("<anonymous>").to_string();
    let defined_index_usize = usize::try_from(u32::from(defined_index)).expect("index space fits in usize");
    let locals_layout = module.function_locals(defined_index_usize);
    let body = module.body(defined_index_usize);
    let type_index = module.defined_functions()[defined_index_usize];
    let type_index_usize = usize::try_from(u32::from(type_index)).expect("index space fits in usize");
    let func_ty = module.types()[type_index_usize].clone();

    let mut stack: Vec<StackSlot> = Vec::with_capacity(usize::try_from(locals_layout.total_words).unwrap_or(0) + 16);
    for param in params {
        push_val(&mut stack, *param);
    }
    for local_idx in params.len()..locals_layout.local_count() {
        let idx_u32 = u32::try_from(local_idx).expect("local index fits in u32");
        push_val(&mut stack, zero_val(locals_layout.ty(idx_u32)));
    }

    let mut pc: usize = 0;
    loop {
        let Some(op) = body.get(pc) else {
            panic!("function body fell off the end without an explicit return");
        };
        let source_offset = op.source_offset;

        match &op.kind {
            OpKind::Br { target, drop_keep } => {
                apply_drop_keep(&mut stack, *drop_keep);
                if *target == u64::MAX {
                    return finish(&mut stack, results, &func_ty);
                }
                pc = usize::try_from(*target).expect("branch target fits in usize");
                continue;
            }
            OpKind::BrIf { target, drop_keep } => {
                if pop_bool(&mut stack) {
                    apply_drop_keep(&mut stack, *drop_keep);
                    if *target == u64::MAX {
                        return finish(&mut stack, results, &func_ty);
                    }
                    pc = usize::try_from(*target).expect("branch target fits in usize");
                    continue;
                }
            }
            OpKind::BrTable { targets, default } => {
                let index = u32_bits(pop_i32(&mut stack));
                let (target, drop_keep) = usize::try_from(index)
                    .ok()
                    .and_then(|i| targets.get(i))
                    .copied()
                    .unwrap_or(*default);
                apply_drop_keep(&mut stack, drop_keep);
                if target == u64::MAX {
                    return finish(&mut stack, results, &func_ty);
                }
                pc = usize::try_from(target).expect("branch target fits in usize");
                continue;
            }
            OpKind::Call(func_index) => {
                exec_call(store, instance, *func_index, &mut stack, token, &debug_name, source_offset)?;
            }
            OpKind::CallIndirect { type_index, table_index } => {
                exec_call_indirect(
                    store,
                    instance,
                    &module,
                    &tables,
                    *type_index,
                    *table_index,
                    &mut stack,
                    token,
                    &debug_name,
                    source_offset,
                )?;
            }
            OpKind::Op(IrOpKind::CheckExitCode) => {
                check_exit_code(store, instance, token)?;
            }
            OpKind::Op(ir_op) => {
                exec_op(
                    ir_op,
                    &mut stack,
                    instance,
                    locals_layout,
                    &memory,
                    &tables,
                    &globals,
                    &data_segments,
                    &element_segments,
                    &debug_name,
                    source_offset,
                )?;
            }
        }
        pc += 1;
    }
}

#[allow(clippy::too_many_arguments)]
fn exec_call(
    store: &Store,
    instance: InstanceHandle,
    func_index: FuncIndex,
    stack: &mut Vec<StackSlot>,
    token: &CancellationToken,
    debug_name: &str,
    source_offset: u32,
) -> crate::Result<()> {
    let func = func_handle(instance, func_index);
    let ty = func.ty(store);
    let mut args = Vec::with_capacity(ty.params.len());
    for p in ty.params.iter().rev() {
        args.push(pop_val(stack, *p));
    }
    args.reverse();
    let mut call_results = vec![Val::I32(0); ty.results.len()];
    crate::engine::call(store, func, &args, &mut call_results, token)
        .map_err(|e| with_frame(e, debug_name, source_offset))?;
    for v in call_results {
        push_val(stack, v);
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn exec_call_indirect(
    store: &Store,
    instance: InstanceHandle,
    module: &Module,
    tables: &[Arc<Table>],
    type_index: TypeIndex,
    table_index: TableIndex,
    stack: &mut Vec<StackSlot>,
    token: &CancellationToken,
    debug_name: &str,
    source_offset: u32,
) -> crate::Result<()> {
    let table_idx = usize::try_from(u32::from(table_index)).expect("index space fits in usize");
    let table = &tables[table_idx];
    let elem_idx = u32_bits(pop_i32(stack));
    let val = table
        .get(u64::from(elem_idx))
        .map_err(|t| trap_here(t, debug_name, source_offset))?;
    let func = match val {
        Val::FuncRef(Some(f)) => f,
        Val::FuncRef(None) => return Err(trap_here(Trap::IndirectCallToNull, debug_name, source_offset)),
        _ => return Err(trap_here(Trap::BadSignature, debug_name, source_offset)),
    };

    let type_idx = usize::try_from(u32::from(type_index)).expect("index space fits in usize");
    let expected_ty = &module.types()[type_idx];
    let actual_ty = func.ty(store);
    if actual_ty != *expected_ty {
        return Err(trap_here(Trap::BadSignature, debug_name, source_offset));
    }

    let mut args = Vec::with_capacity(expected_ty.params.len());
    for p in expected_ty.params.iter().rev() {
        args.push(pop_val(stack, *p));
    }
    args.reverse();
    let mut call_results = vec![Val::I32(0); expected_ty.results.len()];
    crate::engine::call(store, func, &args, &mut call_results, token)
        .map_err(|e| with_frame(e, debug_name, source_offset))?;
    for v in call_results {
        push_val(stack, v);
    }
    Ok(())
}

#[allow(clippy::too_many_arguments, clippy::too_many_lines)]
fn exec_op(
    op: &IrOpKind,
    stack: &mut Vec<StackSlot>,
    instance: InstanceHandle,
    locals_layout: &FunctionLocals,
    memory: &Option<Arc<Memory>>,
    tables: &[Arc<Table>],
    globals: &[Arc<Global>],
    data_segments: &[Arc<DataSegment>],
    element_segments: &[Arc<ElementSegment>],
    debug_name: &str,
    source_offset: u32,
) -> crate::Result<()> {
    match op {
        IrOpKind::Label(_)
        | IrOpKind::Block(_)
        | IrOpKind::Loop(_)
        | IrOpKind::If(_)
        | IrOpKind::Else
        | IrOpKind::End
        | IrOpKind::CheckExitCode
        | IrOpKind::I32ReinterpretF32
        | IrOpKind::I64ReinterpretF64
        | IrOpKind::F32ReinterpretI32
        | IrOpKind::F64ReinterpretI64
        | IrOpKind::Br { .. }
        | IrOpKind::BrIf { .. }
        | IrOpKind::BrTable { .. }
        | IrOpKind::Return { .. }
        | IrOpKind::Call(_)
        | IrOpKind::CallIndirect { .. } => {
            unreachable!("lowering strips or rewrites this op before it reaches the dispatch loop")
        }

        IrOpKind::Unreachable => return Err(trap_here(Trap::Unreachable, debug_name, source_offset)),
        IrOpKind::Nop => {}

        IrOpKind::Drop => {
            pop_value_generic(stack);
        }
        IrOpKind::Select | IrOpKind::TypedSelect(_) => {
            let cond = pop_bool(stack);
            let b = pop_value_generic(stack);
            let a = pop_value_generic(stack);
            for slot in if cond { a } else { b } {
                stack.push(slot);
            }
        }

        IrOpKind::LocalGet(idx) => {
            let layout_idx = u32::from(*idx);
            let off = usize::try_from(locals_layout.offset(layout_idx)).expect("offset fits in usize");
            let words = usize::try_from(locals_layout.ty(layout_idx).stack_words()).expect("word count fits in usize");
            local_get(stack, off, words);
        }
        IrOpKind::LocalSet(idx) => {
            let layout_idx = u32::from(*idx);
            let off = usize::try_from(locals_layout.offset(layout_idx)).expect("offset fits in usize");
            let words = usize::try_from(locals_layout.ty(layout_idx).stack_words()).expect("word count fits in usize");
            local_set(stack, off, words);
        }
        IrOpKind::LocalTee(idx) => {
            let layout_idx = u32::from(*idx);
            let off = usize::try_from(locals_layout.offset(layout_idx)).expect("offset fits in usize");
            let words = usize::try_from(locals_layout.ty(layout_idx).stack_words()).expect("word count fits in usize");
            local_tee(stack, off, words);
        }

        IrOpKind::GlobalGet(idx) => {
            let i = usize::try_from(u32::from(*idx)).expect("index space fits in usize");
            push_val(stack, globals[i].get());
        }
        IrOpKind::GlobalSet(idx) => {
            let i = usize::try_from(u32::from(*idx)).expect("index space fits in usize");
            let v = pop_val(stack, globals[i].ty().value_type);
            globals[i].set(v);
        }

        IrOpKind::RefNull(RefType::Func) => stack.push(StackSlot::FuncRef(None)),
        IrOpKind::RefNull(RefType::Extern) => stack.push(StackSlot::ExternRef(None)),
        IrOpKind::RefIsNull => {
            let is_null = match stack.pop().expect("operand stack underflow") {
                StackSlot::FuncRef(f) => f.is_none(),
                StackSlot::ExternRef(e) => e.is_none(),
                _ => panic!("expected a reference stack slot"),
            };
            push_bool(stack, is_null);
        }
        IrOpKind::RefFunc(idx) => stack.push(StackSlot::FuncRef(Some(func_handle(instance, *idx)))),

        IrOpKind::I32Const(v) => push_i32(stack, *v),
        IrOpKind::I64Const(v) => push_i64(stack, *v),
        IrOpKind::F32Const(bits) => push_f32_bits(stack, *bits),
        IrOpKind::F64Const(bits) => push_word(stack, *bits),
        IrOpKind::V128Const(v) => push_v128(stack, *v),

        IrOpKind::I32Eqz => {
            let v = pop_i32(stack);
            push_bool(stack, v == 0);
        }
        IrOpKind::I32Eq => i32_cmp(stack, |a, b| a == b),
        IrOpKind::I32Ne => i32_cmp(stack, |a, b| a != b),
        IrOpKind::I32LtS => i32_cmp(stack, |a, b| a < b),
        IrOpKind::I32LtU => u32_cmp(stack, |a, b| a < b),
        IrOpKind::I32GtS => i32_cmp(stack, |a, b| a > b),
        IrOpKind::I32GtU => u32_cmp(stack, |a, b| a > b),
        IrOpKind::I32LeS => i32_cmp(stack, |a, b| a <= b),
        IrOpKind::I32LeU => u32_cmp(stack, |a, b| a <= b),
        IrOpKind::I32GeS => i32_cmp(stack, |a, b| a >= b),
        IrOpKind::I32GeU => u32_cmp(stack, |a, b| a >= b),
        IrOpKind::I32Clz => {
            let v = u32_bits(pop_i32(stack));
            push_i32(stack, i32::try_from(v.leading_zeros()).expect("clz fits in i32"));
        }
        IrOpKind::I32Ctz => {
            let v = u32_bits(pop_i32(stack));
            push_i32(stack, i32::try_from(v.trailing_zeros()).expect("ctz fits in i32"));
        }
        IrOpKind::I32Popcnt => {
            let v = u32_bits(pop_i32(stack));
            push_i32(stack, i32::try_from(v.count_ones()).expect("popcount fits in i32"));
        }
        IrOpKind::I32Add => {
            let b = pop_i32(stack);
            let a = pop_i32(stack);
            push_i32(stack, a.wrapping_add(b));
        }
        IrOpKind::I32Sub => {
            let b = pop_i32(stack);
            let a = pop_i32(stack);
            push_i32(stack, a.wrapping_sub(b));
        }
        IrOpKind::I32Mul => {
            let b = pop_i32(stack);
            let a = pop_i32(stack);
            push_i32(stack, a.wrapping_mul(b));
        }
        IrOpKind::I32DivS => {
            let b = pop_i32(stack);
            let a = pop_i32(stack);
            if b == 0 {
                return Err(trap_here(Trap::IntegerDivisionByZero, debug_name, source_offset));
            }
            if a == i32::MIN && b == -1 {
                return Err(trap_here(Trap::IntegerOverflow, debug_name, source_offset));
            }
            push_i32(stack, a.wrapping_div(b));
        }
        IrOpKind::I32DivU => {
            let b = u32_bits(pop_i32(stack));
            let a = u32_bits(pop_i32(stack));
            if b == 0 {
                return Err(trap_here(Trap::IntegerDivisionByZero, debug_name, source_offset));
            }
            push_i32(stack, i32_from_u32_bits(a / b));
        }
        IrOpKind::I32RemS => {
            let b = pop_i32(stack);
            let a = pop_i32(stack);
            if b == 0 {
                return Err(trap_here(Trap::IntegerDivisionByZero, debug_name, source_offset));
            }
            push_i32(stack, a.wrapping_rem(b));
        }
        IrOpKind::I32RemU => {
            let b = u32_bits(pop_i32(stack));
            let a = u32_bits(pop_i32(stack));
            if b == 0 {
                return Err(trap_here(Trap::IntegerDivisionByZero, debug_name, source_offset));
            }
            push_i32(stack, i32_from_u32_bits(a % b));
        }
        IrOpKind::I32And => {
            let b = pop_i32(stack);
            let a = pop_i32(stack);
            push_i32(stack, a & b);
        }
        IrOpKind::I32Or => {
            let b = pop_i32(stack);
            let a = pop_i32(stack);
            push_i32(stack, a | b);
        }
        IrOpKind::I32Xor => {
            let b = pop_i32(stack);
            let a = pop_i32(stack);
            push_i32(stack, a ^ b);
        }
        IrOpKind::I32Shl => {
            let shift = u32_bits(pop_i32(stack)) % 32;
            let a = pop_i32(stack);
            push_i32(stack, a.wrapping_shl(shift));
        }
        IrOpKind::I32ShrS => {
            let shift = u32_bits(pop_i32(stack)) % 32;
            let a = pop_i32(stack);
            push_i32(stack, a.wrapping_shr(shift));
        }
        IrOpKind::I32ShrU => {
            let shift = u32_bits(pop_i32(stack)) % 32;
            let a = u32_bits(pop_i32(stack));
            push_i32(stack, i32_from_u32_bits(a.wrapping_shr(shift)));
        }
        IrOpKind::I32Rotl => {
            let shift = u32_bits(pop_i32(stack)) % 32;
            let a = u32_bits(pop_i32(stack));
            push_i32(stack, i32_from_u32_bits(a.rotate_left(shift)));
        }
        IrOpKind::I32Rotr => {
            let shift = u32_bits(pop_i32(stack)) % 32;
            let a = u32_bits(pop_i32(stack));
            push_i32(stack, i32_from_u32_bits(a.rotate_right(shift)));
        }

        IrOpKind::I64Eqz => {
            let v = pop_i64(stack);
            push_bool(stack, v == 0);
        }
        IrOpKind::I64Eq => i64_cmp(stack, |a, b| a == b),
        IrOpKind::I64Ne => i64_cmp(stack, |a, b| a != b),
        IrOpKind::I64LtS => i64_cmp(stack, |a, b| a < b),
        IrOpKind::I64LtU => u64_cmp(stack, |a, b| a < b),
        IrOpKind::I64GtS => i64_cmp(stack, |a, b| a > b),
        IrOpKind::I64GtU => u64_cmp(stack, |a, b| a > b),
        IrOpKind::I64LeS => i64_cmp(stack, |a, b| a <= b),
        IrOpKind::I64LeU => u64_cmp(stack, |a, b| a <= b),
        IrOpKind::I64GeS => i64_cmp(stack, |a, b| a >= b),
        IrOpKind::I64GeU => u64_cmp(stack, |a, b| a >= b),
        IrOpKind::I64Clz => {
            let v = u64::from_ne_bytes(pop_i64(stack).to_ne_bytes());
            push_i64(stack, i64::from(v.leading_zeros()));
        }
        IrOpKind::I64Ctz => {
            let v = u64::from_ne_bytes(pop_i64(stack).to_ne_bytes());
            push_i64(stack, i64::from(v.trailing_zeros()));
        }
        IrOpKind::I64Popcnt => {
            let v = u64::from_ne_bytes(pop_i64(stack).to_ne_bytes());
            push_i64(stack, i64::from(v.count_ones()));
        }
        IrOpKind::I64Add => {
            let b = pop_i64(stack);
            let a = pop_i64(stack);
            push_i64(stack, a.wrapping_add(b));
        }
        IrOpKind::I64Sub => {
            let b = pop_i64(stack);
            let a = pop_i64(stack);
            push_i64(stack, a.wrapping_sub(b));
        }
        IrOpKind::I64Mul => {
            let b = pop_i64(stack);
            let a = pop_i64(stack);
            push_i64(stack, a.wrapping_mul(b));
        }
        IrOpKind::I64DivS => {
            let b = pop_i64(stack);
            let a = pop_i64(stack);
            if b == 0 {
                return Err(trap_here(Trap::IntegerDivisionByZero, debug_name, source_offset));
            }
            if a == i64::MIN && b == -1 {
                return Err(trap_here(Trap::IntegerOverflow, debug_name, source_offset));
            }
            push_i64(stack, a.wrapping_div(b));
        }
        IrOpKind::I64DivU => {
            let b = u64::from_ne_bytes(pop_i64(stack).to_ne_bytes());
            let a = u64::from_ne_bytes(pop_i64(stack).to_ne_bytes());
            if b == 0 {
                return Err(trap_here(Trap::IntegerDivisionByZero, debug_name, source_offset));
            }
            push_i64(stack, i64::from_ne_bytes((a / b).to_ne_bytes()));
        }
        IrOpKind::I64RemS => {
            let b = pop_i64(stack);
            let a = pop_i64(stack);
            if b == 0 {
                return Err(trap_here(Trap::IntegerDivisionByZero, debug_name, source_offset));
            }
            push_i64(stack, a.wrapping_rem(b));
        }
        IrOpKind::I64RemU => {
            let b = u64::from_ne_bytes(pop_i64(stack).to_ne_bytes());
            let a = u64::from_ne_bytes(pop_i64(stack).to_ne_bytes());
            if b == 0 {
                return Err(trap_here(Trap::IntegerDivisionByZero, debug_name, source_offset));
            }
            push_i64(stack, i64::from_ne_bytes((a % b).to_ne_bytes()));
        }
        IrOpKind::I64And => {
            let b = pop_i64(stack);
            let a = pop_i64(stack);
            push_i64(stack, a & b);
        }
        IrOpKind::I64Or => {
            let b = pop_i64(stack);
            let a = pop_i64(stack);
            push_i64(stack, a | b);
        }
        IrOpKind::I64Xor => {
            let b = pop_i64(stack);
            let a = pop_i64(stack);
            push_i64(stack, a ^ b);
        }
        IrOpKind::I64Shl => {
            let shift = u32::try_from(u64::from_ne_bytes(pop_i64(stack).to_ne_bytes()) % 64).expect("mod 64 fits in u32");
            let a = pop_i64(stack);
            push_i64(stack, a.wrapping_shl(shift));
        }
        IrOpKind::I64ShrS => {
            let shift = u32::try_from(u64::from_ne_bytes(pop_i64(stack).to_ne_bytes()) % 64).expect("mod 64 fits in u32");
            let a = pop_i64(stack);
            push_i64(stack, a.wrapping_shr(shift));
        }
        IrOpKind::I64ShrU => {
            let shift = u32::try_from(u64::from_ne_bytes(pop_i64(stack).to_ne_bytes()) % 64).expect("mod 64 fits in u32");
            let a = u64::from_ne_bytes(pop_i64(stack).to_ne_bytes());
            push_i64(stack, i64::from_ne_bytes(a.wrapping_shr(shift).to_ne_bytes()));
        }
        IrOpKind::I64Rotl => {
            let shift = u32::try_from(u64::from_ne_bytes(pop_i64(stack).to_ne_bytes()) % 64).expect("mod 64 fits in u32");
            let a = u64::from_ne_bytes(pop_i64(stack).to_ne_bytes());
            push_i64(stack, i64::from_ne_bytes(a.rotate_left(shift).to_ne_bytes()));
        }
        IrOpKind::I64Rotr => {
            let shift = u32::try_from(u64::from_ne_bytes(pop_i64(stack).to_ne_bytes()) % 64).expect("mod 64 fits in u32");
            let a = u64::from_ne_bytes(pop_i64(stack).to_ne_bytes());
            push_i64(stack, i64::from_ne_bytes(a.rotate_right(shift).to_ne_bytes()));
        }

        IrOpKind::F32Eq => f32_cmp(stack, |a, b| a == b),
        IrOpKind::F32Ne => f32_cmp(stack, |a, b| a != b),
        IrOpKind::F32Lt => f32_cmp(stack, |a, b| a < b),
        IrOpKind::F32Gt => f32_cmp(stack, |a, b| a > b),
        IrOpKind::F32Le => f32_cmp(stack, |a, b| a <= b),
        IrOpKind::F32Ge => f32_cmp(stack, |a, b| a >= b),
        IrOpKind::F32Abs => {
            let v = pop_f32(stack);
            push_f32(stack, v.abs());
        }
        IrOpKind::F32Neg => {
            let v = pop_f32(stack);
            push_f32(stack, -v);
        }
        IrOpKind::F32Ceil => {
            let v = pop_f32(stack);
            push_f32(stack, v.ceil());
        }
        IrOpKind::F32Floor => {
            let v = pop_f32(stack);
            push_f32(stack, v.floor());
        }
        IrOpKind::F32Trunc => {
            let v = pop_f32(stack);
            push_f32(stack, v.trunc());
        }
        IrOpKind::F32Nearest => {
            let v = pop_f32(stack);
            push_f32(stack, numeric::f32_nearest(v));
        }
        IrOpKind::F32Sqrt => {
            let v = pop_f32(stack);
            push_f32(stack, v.sqrt());
        }
        IrOpKind::F32Add => {
            let b = pop_f32(stack);
            let a = pop_f32(stack);
            push_f32(stack, a + b);
        }
        IrOpKind::F32Sub => {
            let b = pop_f32(stack);
            let a = pop_f32(stack);
            push_f32(stack, a - b);
        }
        IrOpKind::F32Mul => {
            let b = pop_f32(stack);
            let a = pop_f32(stack);
            push_f32(stack, a * b);
        }
        IrOpKind::F32Div => {
            let b = pop_f32(stack);
            let a = pop_f32(stack);
            push_f32(stack, a / b);
        }
        IrOpKind::F32Min => {
            let b = pop_f32(stack);
            let a = pop_f32(stack);
            push_f32(stack, numeric::f32_min(a, b));
        }
        IrOpKind::F32Max => {
            let b = pop_f32(stack);
            let a = pop_f32(stack);
            push_f32(stack, numeric::f32_max(a, b));
        }
        IrOpKind::F32Copysign => {
            let b = pop_f32(stack);
            let a = pop_f32(stack);
            push_f32(stack, a.copysign(b));
        }

        IrOpKind::F64Eq => f64_cmp(stack, |a, b| a == b),
        IrOpKind::F64Ne => f64_cmp(stack, |a, b| a != b),
        IrOpKind::F64Lt => f64_cmp(stack, |a, b| a < b),
        IrOpKind::F64Gt => f64_cmp(stack, |a, b| a > b),
        IrOpKind::F64Le => f64_cmp(stack, |a, b| a <= b),
        IrOpKind::F64Ge => f64_cmp(stack, |a, b| a >= b),
        IrOpKind::F64Abs => {
            let v = pop_f64(stack);
            push_f64(stack, v.abs());
        }
        IrOpKind::F64Neg => {
            let v = pop_f64(stack);
            push_f64(stack, -v);
        }
        IrOpKind::F64Ceil => {
            let v = pop_f64(stack);
            push_f64(stack, v.ceil());
        }
        IrOpKind::F64Floor => {
            let v = pop_f64(stack);
            push_f64(stack, v.floor());
        }
        IrOpKind::F64Trunc => {
            let v = pop_f64(stack);
            push_f64(stack, v.trunc());
        }
        IrOpKind::F64Nearest => {
            let v = pop_f64(stack);
            push_f64(stack, numeric::f64_nearest(v));
        }
        IrOpKind::F64Sqrt => {
            let v = pop_f64(stack);
            push_f64(stack, v.sqrt());
        }
        IrOpKind::F64Add => {
            let b = pop_f64(stack);
            let a = pop_f64(stack);
            push_f64(stack, a + b);
        }
        IrOpKind::F64Sub => {
            let b = pop_f64(stack);
            let a = pop_f64(stack);
            push_f64(stack, a - b);
        }
        IrOpKind::F64Mul => {
            let b = pop_f64(stack);
            let a = pop_f64(stack);
            push_f64(stack, a * b);
        }
        IrOpKind::F64Div => {
            let b = pop_f64(stack);
            let a = pop_f64(stack);
            push_f64(stack, a / b);
        }
        IrOpKind::F64Min => {
            let b = pop_f64(stack);
            let a = pop_f64(stack);
            push_f64(stack, numeric::f64_min(a, b));
        }
        IrOpKind::F64Max => {
            let b = pop_f64(stack);
            let a = pop_f64(stack);
            push_f64(stack, numeric::f64_max(a, b));
        }
        IrOpKind::F64Copysign => {
            let b = pop_f64(stack);
            let a = pop_f64(stack);
            push_f64(stack, a.copysign(b));
        }

        IrOpKind::I32WrapI64 => {
            let v = pop_i64(stack);
            let low4: [u8; 4] = v.to_le_bytes()[0..4].try_into().expect("4 bytes");
            push_i32(stack, i32::from_le_bytes(low4));
        }
        IrOpKind::I32TruncF32S => trunc_to_i32(stack, debug_name, source_offset, |v| numeric::trunc_f32_to_i32(pop_f32(v), true))?,
        IrOpKind::I32TruncF32U => trunc_to_i32(stack, debug_name, source_offset, |v| numeric::trunc_f32_to_i32(pop_f32(v), false))?,
        IrOpKind::I32TruncF64S => trunc_to_i32(stack, debug_name, source_offset, |v| numeric::trunc_f64_to_i32(pop_f64(v), true))?,
        IrOpKind::I32TruncF64U => trunc_to_i32(stack, debug_name, source_offset, |v| numeric::trunc_f64_to_i32(pop_f64(v), false))?,
        IrOpKind::I64ExtendI32S => {
            let v = pop_i32(stack);
            push_i64(stack, i64::from(v));
        }
        IrOpKind::I64ExtendI32U => {
            let v = u32_bits(pop_i32(stack));
            push_i64(stack, i64::from(v));
        }
        IrOpKind::I64TruncF32S => trunc_to_i64(stack, debug_name, source_offset, |v| numeric::trunc_f32_to_i64(pop_f32(v), true))?,
        IrOpKind::I64TruncF32U => trunc_to_i64(stack, debug_name, source_offset, |v| numeric::trunc_f32_to_i64(pop_f32(v), false))?,
        IrOpKind::I64TruncF64S => trunc_to_i64(stack, debug_name, source_offset, |v| numeric::trunc_f64_to_i64(pop_f64(v), true))?,
        IrOpKind::I64TruncF64U => trunc_to_i64(stack, debug_name, source_offset, |v| numeric::trunc_f64_to_i64(pop_f64(v), false))?,
        IrOpKind::F32ConvertI32S => {
            let v = pop_i32(stack);
            push_f32(stack, convert_i32_s_to_f32(v));
        }
        IrOpKind::F32ConvertI32U => {
            let v = u32_bits(pop_i32(stack));
            push_f32(stack, convert_u32_to_f32(v));
        }
        IrOpKind::F32ConvertI64S => {
            let v = pop_i64(stack);
            push_f32(stack, convert_i64_s_to_f32(v));
        }
        IrOpKind::F32ConvertI64U => {
            let v = u64::from_ne_bytes(pop_i64(stack).to_ne_bytes());
            push_f32(stack, convert_u64_to_f32(v));
        }
        IrOpKind::F32DemoteF64 => {
            let v = pop_f64(stack);
            push_f32(stack, demote_f64_to_f32(v));
        }
        IrOpKind::F64ConvertI32S => {
            let v = pop_i32(stack);
            push_f64(stack, convert_i32_s_to_f64(v));
        }
        IrOpKind::F64ConvertI32U => {
            let v = u32_bits(pop_i32(stack));
            push_f64(stack, convert_u32_to_f64(v));
        }
        IrOpKind::F64ConvertI64S => {
            let v = pop_i64(stack);
            push_f64(stack, convert_i64_s_to_f64(v));
        }
        IrOpKind::F64ConvertI64U => {
            let v = u64::from_ne_bytes(pop_i64(stack).to_ne_bytes());
            push_f64(stack, convert_u64_to_f64(v));
        }
        IrOpKind::F64PromoteF32 => {
            let v = pop_f32(stack);
            push_f64(stack, promote_f32_to_f64(v));
        }
        IrOpKind::I32Extend8S => {
            let v = pop_i32(stack);
            let byte = v.to_le_bytes()[0];
            push_i32(stack, i32::from(i8::from_ne_bytes([byte])));
        }
        IrOpKind::I32Extend16S => {
            let v = pop_i32(stack);
            let bytes: [u8; 2] = v.to_le_bytes()[0..2].try_into().expect("2 bytes");
            push_i32(stack, i32::from(i16::from_le_bytes(bytes)));
        }
        IrOpKind::I64Extend8S => {
            let v = pop_i64(stack);
            let byte = v.to_le_bytes()[0];
            push_i64(stack, i64::from(i8::from_ne_bytes([byte])));
        }
        IrOpKind::I64Extend16S => {
            let v = pop_i64(stack);
            let bytes: [u8; 2] = v.to_le_bytes()[0..2].try_into().expect("2 bytes");
            push_i64(stack, i64::from(i16::from_le_bytes(bytes)));
        }
        IrOpKind::I64Extend32S => {
            let v = pop_i64(stack);
            let bytes: [u8; 4] = v.to_le_bytes()[0..4].try_into().expect("4 bytes");
            push_i64(stack, i64::from(i32::from_le_bytes(bytes)));
        }
        IrOpKind::I32TruncSatF32S => {
            let v = pop_f32(stack);
            push_i32(stack, numeric::trunc_sat_f32_to_i32(v, true));
        }
        IrOpKind::I32TruncSatF32U => {
            let v = pop_f32(stack);
            push_i32(stack, numeric::trunc_sat_f32_to_i32(v, false));
        }
        IrOpKind::I32TruncSatF64S => {
            let v = pop_f64(stack);
            push_i32(stack, numeric::trunc_sat_f64_to_i32(v, true));
        }
        IrOpKind::I32TruncSatF64U => {
            let v = pop_f64(stack);
            push_i32(stack, numeric::trunc_sat_f64_to_i32(v, false));
        }
        IrOpKind::I64TruncSatF32S => {
            let v = pop_f32(stack);
            push_i64(stack, numeric::trunc_sat_f32_to_i64(v, true));
        }
        IrOpKind::I64TruncSatF32U => {
            let v = pop_f32(stack);
            push_i64(stack, numeric::trunc_sat_f32_to_i64(v, false));
        }
        IrOpKind::I64TruncSatF64S => {
            let v = pop_f64(stack);
            push_i64(stack, numeric::trunc_sat_f64_to_i64(v, true));
        }
        IrOpKind::I64TruncSatF64U => {
            let v = pop_f64(stack);
            push_i64(stack, numeric::trunc_sat_f64_to_i64(v, false));
        }

        IrOpKind::Load { kind, memarg } => exec_load(stack, memory, *kind, memarg, debug_name, source_offset)?,
        IrOpKind::Store { kind, memarg } => exec_store(stack, memory, *kind, memarg, debug_name, source_offset)?,
        IrOpKind::MemorySize => {
            let mem = memory.as_ref().expect("validator guarantees memory.size only occurs when a memory is defined");
            push_i32(stack, i32::try_from(mem.size_pages()).expect("page count fits in i32"));
        }
        IrOpKind::MemoryGrow => {
            let mem = memory.as_ref().expect("validator guarantees memory.grow only occurs when a memory is defined");
            let delta = u32_bits(pop_i32(stack));
            let v = match mem.grow(u64::from(delta)) {
                Some(old) => i32::try_from(old).expect("page count fits in i32"),
                None => -1,
            };
            push_i32(stack, v);
        }
        IrOpKind::MemoryFill => {
            let mem = memory.as_ref().expect("validator guarantees memory.fill only occurs when a memory is defined");
            let len = u32_bits(pop_i32(stack));
            let val = pop_i32(stack);
            let dest = u32_bits(pop_i32(stack));
            mem.fill(u64::from(dest), val.to_le_bytes()[0], usize::try_from(len).expect("len fits in usize"))
                .map_err(|t| trap_here(t, debug_name, source_offset))?;
        }
        IrOpKind::MemoryCopy => {
            let mem = memory.as_ref().expect("validator guarantees memory.copy only occurs when a memory is defined");
            let len = u32_bits(pop_i32(stack));
            let src = u32_bits(pop_i32(stack));
            let dst = u32_bits(pop_i32(stack));
            mem.copy_within(u64::from(dst), u64::from(src), usize::try_from(len).expect("len fits in usize"))
                .map_err(|t| trap_here(t, debug_name, source_offset))?;
        }
        IrOpKind::MemoryInit(idx) => {
            let mem = memory.as_ref().expect("validator guarantees memory.init only occurs when a memory is defined");
            let len = u32_bits(pop_i32(stack));
            let src = u32_bits(pop_i32(stack));
            let dst = u32_bits(pop_i32(stack));
            let i = usize::try_from(u32::from(*idx)).expect("index space fits in usize");
            let bytes = data_segments[i].bytes();
            mem.init_from_segment(u64::from(dst), &bytes, u64::from(src), usize::try_from(len).expect("len fits in usize"))
                .map_err(|t| trap_here(t, debug_name, source_offset))?;
        }
        IrOpKind::DataDrop(idx) => {
            let i = usize::try_from(u32::from(*idx)).expect("index space fits in usize");
            data_segments[i].drop_segment();
        }

        IrOpKind::TableGet(table_index) => {
            let i = usize::try_from(u32::from(*table_index)).expect("index space fits in usize");
            let index = u32_bits(pop_i32(stack));
            let val = tables[i].get(u64::from(index)).map_err(|t| trap_here(t, debug_name, source_offset))?;
            push_val(stack, val);
        }
        IrOpKind::TableSet(table_index) => {
            let i = usize::try_from(u32::from(*table_index)).expect("index space fits in usize");
            let val = pop_val(stack, ValType::Ref(tables[i].ty().element));
            let index = u32_bits(pop_i32(stack));
            tables[i].set(u64::from(index), val).map_err(|t| trap_here(t, debug_name, source_offset))?;
        }
        IrOpKind::TableSize(table_index) => {
            let i = usize::try_from(u32::from(*table_index)).expect("index space fits in usize");
            push_i32(stack, i32::try_from(tables[i].size()).expect("table size fits in i32"));
        }
        IrOpKind::TableGrow(table_index) => {
            let i = usize::try_from(u32::from(*table_index)).expect("index space fits in usize");
            let n = u32_bits(pop_i32(stack));
            let init = pop_val(stack, ValType::Ref(tables[i].ty().element));
            let v = match tables[i].grow(u64::from(n), init) {
                Some(old) => i32::try_from(old).expect("table size fits in i32"),
                None => -1,
            };
            push_i32(stack, v);
        }
        IrOpKind::TableFill(table_index) => {
            let i = usize::try_from(u32::from(*table_index)).expect("index space fits in usize");
            let n = u32_bits(pop_i32(stack));
            let val = pop_val(stack, ValType::Ref(tables[i].ty().element));
            let off = u32_bits(pop_i32(stack));
            tables[i]
                .fill(u64::from(off), val, u64::from(n))
                .map_err(|t| trap_here(t, debug_name, source_offset))?;
        }
        IrOpKind::TableCopy { dst, src } => {
            exec_table_copy(stack, tables, *dst, *src, debug_name, source_offset)?;
        }
        IrOpKind::TableInit { elem, table } => {
            let tidx = usize::try_from(u32::from(*table)).expect("index space fits in usize");
            let eidx = usize::try_from(u32::from(*elem)).expect("index space fits in usize");
            let n = u32_bits(pop_i32(stack));
            let src = u32_bits(pop_i32(stack));
            let dst = u32_bits(pop_i32(stack));
            let values = element_segments[eidx].values();
            tables[tidx]
                .init_from_segment(u64::from(dst), &values, u64::from(src), u64::from(n))
                .map_err(|t| trap_here(t, debug_name, source_offset))?;
        }
        IrOpKind::ElemDrop(idx) => {
            let i = usize::try_from(u32::from(*idx)).expect("index space fits in usize");
            element_segments[i].drop_segment();
        }

        IrOpKind::Simd(simd_op) => simd::exec(*simd_op, stack),
    }
    Ok(())
}

fn i32_cmp(stack: &mut Vec<StackSlot>, f: impl Fn(i32, i32) -> bool) {
    let b = pop_i32(stack);
    let a = pop_i32(stack);
    push_bool(stack, f(a, b));
}

fn u32_cmp(stack: &mut Vec<StackSlot>, f: impl Fn(u32, u32) -> bool) {
    let b = u32_bits(pop_i32(stack));
    let a = u32_bits(pop_i32(stack));
    push_bool(stack, f(a, b));
}

fn i64_cmp(stack: &mut Vec<StackSlot>, f: impl Fn(i64, i64) -> bool) {
    let b = pop_i64(stack);
    let a = pop_i64(stack);
    push_bool(stack, f(a, b));
}

fn u64_cmp(stack: &mut Vec<StackSlot>, f: impl Fn(u64, u64) -> bool) {
    let b = u64::from_ne_bytes(pop_i64(stack).to_ne_bytes());
    let a = u64::from_ne_bytes(pop_i64(stack).to_ne_bytes());
    push_bool(stack, f(a, b));
}

fn f32_cmp(stack: &mut Vec<StackSlot>, f: impl Fn(f32, f32) -> bool) {
    let b = pop_f32(stack);
    let a = pop_f32(stack);
    push_bool(stack, f(a, b));
}

fn f64_cmp(stack: &mut Vec<StackSlot>, f: impl Fn(f64, f64) -> bool) {
    let b = pop_f64(stack);
    let a = pop_f64(stack);
    push_bool(stack, f(a, b));
}

fn trunc_to_i32(
    stack: &mut Vec<StackSlot>,
    debug_name: &str,
    source_offset: u32,
    f: impl FnOnce(&mut Vec<StackSlot>) -> Option<i32>,
) -> crate::Result<()> {
    match f(stack) {
        Some(v) => {
            push_i32(stack, v);
            Ok(())
        }
        None => Err(trap_here(Trap::BadConversionToInteger, debug_name, source_offset)),
    }
}

fn trunc_to_i64(
    stack: &mut Vec<StackSlot>,
    debug_name: &str,
    source_offset: u32,
    f: impl FnOnce(&mut Vec<StackSlot>) -> Option<i64>,
) -> crate::Result<()> {
    match f(stack) {
        Some(v) => {
            push_i64(stack, v);
            Ok(())
        }
        None => Err(trap_here(Trap::BadConversionToInteger, debug_name, source_offset)),
    }
}

// Integer-to-float conversions intentionally use the host's own `as`
// cast: it is the IEEE-754 round-to-nearest conversion spec.md §4.A
// requires, not a lossy reinterpretation (numeric.rs takes the same
// stance for the inverse, truncating direction).
#[allow(clippy::cast_precision_loss)]
fn convert_i32_s_to_f32(v: i32) -> f32 {
    v as f32
}
#[allow(clippy::cast_precision_loss)]
fn convert_u32_to_f32(v: u32) -> f32 {
    v as f32
}
#[allow(clippy::cast_precision_loss)]
fn convert_i64_s_to_f32(v: i64) -> f32 {
    v as f32
}
#[allow(clippy::cast_precision_loss)]
fn convert_u64_to_f32(v: u64) -> f32 {
    v as f32
}
#[allow(clippy::cast_precision_loss)]
fn convert_i32_s_to_f64(v: i32) -> f64 {
    f64::from(v)
}
#[allow(clippy::cast_precision_loss)]
fn convert_u32_to_f64(v: u32) -> f64 {
    f64::from(v)
}
#[allow(clippy::cast_precision_loss)]
fn convert_i64_s_to_f64(v: i64) -> f64 {
    v as f64
}
#[allow(clippy::cast_precision_loss)]
fn convert_u64_to_f64(v: u64) -> f64 {
    v as f64
}
fn demote_f64_to_f32(v: f64) -> f32 {
    v as f32
}
fn promote_f32_to_f64(v: f32) -> f64 {
    f64::from(v)
}

fn effective_addr(base: u32, memarg: &MemArg) -> Option<u64> {
    u64::from(base).checked_add(memarg.offset)
}

fn exec_load(
    stack: &mut Vec<StackSlot>,
    memory: &Option<Arc<Memory>>,
    kind: LoadKind,
    memarg: &MemArg,
    debug_name: &str,
    source_offset: u32,
) -> crate::Result<()> {
    let mem = memory.as_ref().expect("validator guarantees loads only occur when a memory is defined");
    let base = u32_bits(pop_i32(stack));
    let addr = effective_addr(base, memarg).ok_or_else(|| trap_here(Trap::MemoryOutOfBounds, debug_name, source_offset))?;
    let read = |len: usize| mem.read(addr, len).map_err(|t| trap_here(t, debug_name, source_offset));

    match kind {
        LoadKind::I32 => {
            let b = read(4)?;
            push_i32(stack, i32::from_le_bytes(b.try_into().expect("4 bytes")));
        }
        LoadKind::I64 => {
            let b = read(8)?;
            push_i64(stack, i64::from_le_bytes(b.try_into().expect("8 bytes")));
        }
        LoadKind::F32 => {
            let b = read(4)?;
            push_f32_bits(stack, u32::from_le_bytes(b.try_into().expect("4 bytes")));
        }
        LoadKind::F64 => {
            let b = read(8)?;
            push_word(stack, u64::from_le_bytes(b.try_into().expect("8 bytes")));
        }
        LoadKind::I32_8S => {
            let b = read(1)?;
            push_i32(stack, i32::from(i8::from_ne_bytes([b[0]])));
        }
        LoadKind::I32_8U => {
            let b = read(1)?;
            push_i32(stack, i32::from(b[0]));
        }
        LoadKind::I32_16S => {
            let b = read(2)?;
            push_i32(stack, i32::from(i16::from_le_bytes(b.try_into().expect("2 bytes"))));
        }
        LoadKind::I32_16U => {
            let b = read(2)?;
            push_i32(stack, i32::from(u16::from_le_bytes(b.try_into().expect("2 bytes"))));
        }
        LoadKind::I64_8S => {
            let b = read(1)?;
            push_i64(stack, i64::from(i8::from_ne_bytes([b[0]])));
        }
        LoadKind::I64_8U => {
            let b = read(1)?;
            push_i64(stack, i64::from(b[0]));
        }
        LoadKind::I64_16S => {
            let b = read(2)?;
            push_i64(stack, i64::from(i16::from_le_bytes(b.try_into().expect("2 bytes"))));
        }
        LoadKind::I64_16U => {
            let b = read(2)?;
            push_i64(stack, i64::from(u16::from_le_bytes(b.try_into().expect("2 bytes"))));
        }
        LoadKind::I64_32S => {
            let b = read(4)?;
            push_i64(stack, i64::from(i32::from_le_bytes(b.try_into().expect("4 bytes"))));
        }
        LoadKind::I64_32U => {
            let b = read(4)?;
            push_i64(stack, i64::from(u32::from_le_bytes(b.try_into().expect("4 bytes"))));
        }
        LoadKind::V128 => {
            let b = read(16)?;
            let lo = u64::from_le_bytes(b[0..8].try_into().expect("8 bytes"));
            let hi = u64::from_le_bytes(b[8..16].try_into().expect("8 bytes"));
            push_v128(stack, words_to_v128(lo, hi));
        }
    }
    Ok(())
}

fn exec_store(
    stack: &mut Vec<StackSlot>,
    memory: &Option<Arc<Memory>>,
    kind: StoreKind,
    memarg: &MemArg,
    debug_name: &str,
    source_offset: u32,
) -> crate::Result<()> {
    let mem = memory.as_ref().expect("validator guarantees stores only occur when a memory is defined");

    macro_rules! do_store {
        ($bytes:expr, $base:expr) => {{
            let addr =
                effective_addr($base, memarg).ok_or_else(|| trap_here(Trap::MemoryOutOfBounds, debug_name, source_offset))?;
            mem.write(addr, $bytes).map_err(|t| trap_here(t, debug_name, source_offset))
        }};
    }

    match kind {
        StoreKind::I32 => {
            let v = pop_i32(stack);
            let base = u32_bits(pop_i32(stack));
            do_store!(&v.to_le_bytes(), base)?;
        }
        StoreKind::I64 => {
            let v = pop_i64(stack);
            let base = u32_bits(pop_i32(stack));
            do_store!(&v.to_le_bytes(), base)?;
        }
        StoreKind::F32 => {
            let bits = pop_f32_bits(stack);
            let base = u32_bits(pop_i32(stack));
            do_store!(&bits.to_le_bytes(), base)?;
        }
        StoreKind::F64 => {
            let bits = pop_word(stack);
            let base = u32_bits(pop_i32(stack));
            do_store!(&bits.to_le_bytes(), base)?;
        }
        StoreKind::I32_8 => {
            let v = pop_i32(stack);
            let base = u32_bits(pop_i32(stack));
            do_store!(&v.to_le_bytes()[0..1], base)?;
        }
        StoreKind::I32_16 => {
            let v = pop_i32(stack);
            let base = u32_bits(pop_i32(stack));
            do_store!(&v.to_le_bytes()[0..2], base)?;
        }
        StoreKind::I64_8 => {
            let v = pop_i64(stack);
            let base = u32_bits(pop_i32(stack));
            do_store!(&v.to_le_bytes()[0..1], base)?;
        }
        StoreKind::I64_16 => {
            let v = pop_i64(stack);
            let base = u32_bits(pop_i32(stack));
            do_store!(&v.to_le_bytes()[0..2], base)?;
        }
        StoreKind::I64_32 => {
            let v = pop_i64(stack);
            let base = u32_bits(pop_i32(stack));
            do_store!(&v.to_le_bytes()[0..4], base)?;
        }
        StoreKind::V128 => {
            let v = pop_v128(stack);
            let base = u32_bits(pop_i32(stack));
            let (lo, hi) = v128_to_words(v);
            let mut bytes = [0u8; 16];
            bytes[0..8].copy_from_slice(&lo.to_le_bytes());
            bytes[8..16].copy_from_slice(&hi.to_le_bytes());
            do_store!(&bytes, base)?;
        }
    }
    Ok(())
}

fn exec_table_copy(
    stack: &mut Vec<StackSlot>,
    tables: &[Arc<Table>],
    dst: TableIndex,
    src: TableIndex,
    debug_name: &str,
    source_offset: u32,
) -> crate::Result<()> {
    let dst_idx = usize::try_from(u32::from(dst)).expect("index space fits in usize");
    let src_idx = usize::try_from(u32::from(src)).expect("index space fits in usize");
    let n = u32_bits(pop_i32(stack));
    let s = u32_bits(pop_i32(stack));
    let d = u32_bits(pop_i32(stack));

    if dst_idx == src_idx {
        tables[dst_idx]
            .copy_within(u64::from(d), u64::from(s), u64::from(n))
            .map_err(|t| trap_here(t, debug_name, source_offset))?;
        return Ok(());
    }

    let mut buf = Vec::with_capacity(usize::try_from(n).expect("count fits in usize"));
    for i in 0..n {
        buf.push(
            tables[src_idx]
                .get(u64::from(s) + u64::from(i))
                .map_err(|t| trap_here(t, debug_name, source_offset))?,
        );
    }
    for (i, val) in buf.into_iter().enumerate() {
        let i_u32 = u32::try_from(i).expect("count fits in u32");
        tables[dst_idx]
            .set(u64::from(d) + u64::from(i_u32), val)
            .map_err(|t| trap_here(t, debug_name, source_offset))?;
    }
    Ok(())
}

/// Locals occupy the bottom `total_words` slots of this activation's own
/// stack at a fixed offset for the lifetime of the call, so `local.get`
/// just copies the slot(s) at that offset onto the top (spec.md §4.G
/// "local.get/local.set").
fn local_get(stack: &mut Vec<StackSlot>, off: usize, words: usize) {
    for i in 0..words {
        stack.push(stack[off + i]);
    }
}

fn local_set(stack: &mut Vec<StackSlot>, off: usize, words: usize) {
    let mut buf = [StackSlot::Word(0); 2];
    for i in (0..words).rev() {
        buf[i] = stack.pop().expect("operand stack underflow");
    }
    stack[off..off + words].copy_from_slice(&buf[..words]);
}

fn local_tee(stack: &mut Vec<StackSlot>, off: usize, words: usize) {
    let mut buf = [StackSlot::Word(0); 2];
    for i in (0..words).rev() {
        buf[i] = stack.pop().expect("operand stack underflow");
    }
    stack[off..off + words].copy_from_slice(&buf[..words]);
    for slot in &buf[..words] {
        stack.push(*slot);
    }
}
