//! The host embedding surface (spec §6): a slot-numbered value window
//! the embedder reads and writes to call into Djuru and back out again,
//! grounded on `original_source/src/api/msc.h`'s `MSCInterpret`/
//! `msc_call`/`msc_ensureSlots`/slot-accessor family.
//!
//! Where mosc threads a single `WrenVM*` through a flat C API, [`Vm`]
//! owns every piece that family reaches for: the heap, the symbol
//! table, the core classes (which themselves hold the [`Config`]
//! callbacks), the table of already-loaded modules, and a handle arena.
//! `Config::bind_extern_method`-installed methods never go through the
//! slot window at all -- `MethodImpl::Extern` shares `Primitive`'s
//! direct `(heap, core, receiver, args)` calling convention (see
//! `interpreter::run_method`), so the slots here exist only for the
//! opposite direction: host code calling into the VM.

use std::any::Any;
use std::ptr::NonNull;

use djuru_core::{InterpretResult, MethodSymbol, ObjHeader, SymbolTable, Value};

use crate::config::{Config, ErrorKind};
use crate::corelib;
use crate::gc::{self, Roots};
use crate::heap::Heap;
use crate::interpreter::{self, CoreClasses};
use crate::loader;
use crate::object::{ExternObj, FiberObj, FiberState, ListObj, MapObj, StringObj};

/// A reusable call handle bound to a method signature (spec §6
/// `make_call_handle`). Carries nothing but the interned symbol --
/// dispatch always goes through [`interpreter::call`] against whatever
/// receiver currently sits in slot 0.
pub struct CallHandle {
    symbol: MethodSymbol,
    arity: usize,
}

/// An opaque pin against collection (spec §6 `make_handle`/
/// `release_handle`); indexes into `Vm::handles`. A released handle
/// leaves a `None` hole rather than shifting later indices, so older
/// `Handle`s already in the host's hands stay valid.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Handle(usize);

/// One module the VM has already compiled and loaded, so a repeated
/// `import` is a no-op lookup rather than recompiling (spec §4.4).
struct LoadedModule {
    name: String,
    module_ptr: NonNull<ObjHeader>,
}

pub struct Vm {
    heap: Heap,
    symbols: SymbolTable,
    core: CoreClasses,
    modules: Vec<LoadedModule>,
    handles: Vec<Option<Value>>,
    /// The slot window a foreign call reads/writes: slot 0 is the
    /// receiver (on the way in) and the return value (on the way out);
    /// 1..N are arguments.
    slots: Vec<Value>,
    /// Set by a host-initiated `abort_fiber` ahead of the next `call`/
    /// `interpret`, since nothing is actually running yet for the error
    /// to attach to otherwise.
    pending_abort: Option<Value>,
}

impl Vm {
    #[must_use]
    pub fn new(config: Config) -> Vm {
        let mut heap = Heap::new();
        heap.min_heap_size = config.min_heap_size;
        heap.next_gc = config.initial_heap_size;
        heap.growth_percent = config.heap_growth_percent;
        let mut symbols = SymbolTable::new();
        let core = corelib::bootstrap(&mut heap, &mut symbols, config);
        Vm {
            heap,
            symbols,
            core,
            modules: Vec::new(),
            handles: Vec::new(),
            slots: vec![Value::NULL],
            pending_abort: None,
        }
    }

    /// Compiles and runs `source` as module `name`, mirroring
    /// `MSCInterpret`'s `RESULT_COMPILATION_ERROR`/`RESULT_RUNTIME_ERROR`/
    /// success trichotomy (spec §6). A module already loaded under this
    /// name is simply re-run -- unlike `import`, a direct `interpret`
    /// call is the host asking for this exact source to execute, not a
    /// script-level dependency that should only ever run once.
    pub fn interpret(&mut self, name: &str, source: &str) -> InterpretResult {
        let compiled = match djuru_compiler::compile_module(source, name, &mut self.symbols) {
            Ok(compiled) => compiled,
            Err(errors) => {
                let mut config = self.core.config.borrow_mut();
                for error in &errors {
                    config.report_error(ErrorKind::Compile, Some(error.module.as_str()), error.line as i32, &error.message);
                }
                return InterpretResult::CompileError;
            }
        };

        let (module_ptr, closure_ptr) = {
            let mut config = self.core.config.borrow_mut();
            loader::load_module(&mut self.heap, &compiled, &mut self.symbols, Some(&mut config))
        };
        self.register_module(name, module_ptr);

        let fiber = FiberObj::new(FiberState::Root);
        let fiber_ptr = self.heap.allocate(fiber, 64);
        let result = self.run_on_fiber(fiber_ptr, closure_ptr, &[Value::NULL]);
        self.collect_if_needed(Some(fiber_ptr));

        match result {
            Ok(_) => InterpretResult::Success,
            Err(_) => InterpretResult::RuntimeError,
        }
    }

    /// Records `module_ptr` under `name` if it is not already present.
    /// Re-interpreting the same name replaces the slot, since a fresh
    /// `interpret` call always recompiles from scratch.
    fn register_module(&mut self, name: &str, module_ptr: NonNull<ObjHeader>) {
        if let Some(existing) = self.modules.iter_mut().find(|m| m.name == name) {
            existing.module_ptr = module_ptr;
        } else {
            self.modules.push(LoadedModule {
                name: name.to_string(),
                module_ptr,
            });
        }
    }

    /// Drives `closure` to completion on a fresh frame over `args`,
    /// reporting the initial runtime error and one `StackTrace` frame
    /// per still-live call frame, innermost first (spec's error
    /// propagation rules), before returning it to the caller.
    fn run_on_fiber(&mut self, fiber_ptr: NonNull<ObjHeader>, closure: NonNull<ObjHeader>, args: &[Value]) -> Result<Value, Value> {
        if let Some(abort) = self.pending_abort.take() {
            return Err(abort);
        }
        let result = interpreter::call(&mut self.heap, fiber_ptr, &self.core, closure, args);
        if let Err(error) = &result {
            self.report_runtime_error(fiber_ptr, *error);
        }
        result
    }

    fn report_runtime_error(&mut self, fiber_ptr: NonNull<ObjHeader>, error: Value) {
        let message = crate::corelib::as_string(error).map(StringObj::as_str).unwrap_or("(non-string error)").to_string();
        let mut config = self.core.config.borrow_mut();
        config.report_error(ErrorKind::Runtime, None, 0, &message);

        let fiber = unsafe { &*fiber_ptr.cast::<FiberObj>().as_ptr() };
        while let Some(frame) = fiber.pop_frame() {
            let closure = unsafe { &*frame.closure.cast::<crate::object::ClosureObj>().as_ptr() };
            let function = unsafe { &*closure.function.cast::<crate::object::FunctionObj>().as_ptr() };
            let module_name = function
                .module
                .as_obj()
                .map(|m| unsafe { &*m.cast::<crate::object::ModuleObj>().as_ptr() }.name.as_ref())
                .unwrap_or("");
            let line = function.line_for(frame.ip.saturating_sub(1));
            let trace = format!("in {}", function.name);
            config.report_error(ErrorKind::StackTrace, Some(module_name), line as i32, &trace);
        }
    }

    /// Checks both `Heap::should_collect` and the `A.gc()` flag,
    /// running one collection if either fired. `current_fiber` is
    /// whichever fiber was just driven to completion (or `None`,
    /// between top-level calls).
    fn collect_if_needed(&mut self, current_fiber: Option<NonNull<ObjHeader>>) {
        let requested = self.core.gc_requested.replace(false);
        if !requested && !self.heap.should_collect() {
            return;
        }
        let module_ptrs: Vec<NonNull<ObjHeader>> = self.modules.iter().map(|m| m.module_ptr).collect();
        let handle_values: Vec<Value> = self.handles.iter().flatten().copied().collect();
        gc::collect(
            &mut self.heap,
            Roots {
                modules: &module_ptrs,
                current_fiber,
                handles: &handle_values,
            },
        );
    }

    /// Grows the slot window to at least `count` entries, all
    /// initialized to `null` (spec §6 `ensure_slots`).
    pub fn ensure_slots(&mut self, count: usize) {
        if self.slots.len() < count {
            self.slots.resize(count, Value::NULL);
        }
    }

    fn slot(&self, index: usize) -> Value {
        self.slots[index]
    }

    fn set_slot(&mut self, index: usize, value: Value) {
        self.slots[index] = value;
    }

    pub fn set_slot_null(&mut self, slot: usize) {
        self.set_slot(slot, Value::NULL);
    }

    pub fn set_slot_bool(&mut self, slot: usize, value: bool) {
        self.set_slot(slot, Value::boolean(value));
    }

    #[must_use]
    pub fn get_slot_bool(&self, slot: usize) -> Option<bool> {
        self.slot(slot).as_bool()
    }

    pub fn set_slot_double(&mut self, slot: usize, value: f64) {
        self.set_slot(slot, Value::number(value));
    }

    #[must_use]
    pub fn get_slot_double(&self, slot: usize) -> Option<f64> {
        self.slot(slot).as_number()
    }

    pub fn set_slot_string(&mut self, slot: usize, value: &str) {
        let obj = self.heap.allocate(StringObj::new(value.to_string()), value.len() + 24);
        self.set_slot(slot, Value::from_obj(obj));
    }

    /// `bytes` and `string` share one representation here (`StringObj`
    /// is a `Box<str>`, not byte-oriented): a slot written as bytes
    /// round-trips through `get_slot_bytes`, matching the reference
    /// API's C-string-with-explicit-length pair without needing a
    /// second object kind for the same payload.
    pub fn set_slot_bytes(&mut self, slot: usize, value: &[u8]) {
        let text = String::from_utf8_lossy(value).into_owned();
        self.set_slot_string(slot, &text);
    }

    #[must_use]
    pub fn get_slot_string(&self, slot: usize) -> Option<&str> {
        crate::corelib::as_string(self.slot(slot)).map(StringObj::as_str)
    }

    #[must_use]
    pub fn get_slot_bytes(&self, slot: usize) -> Option<&[u8]> {
        self.get_slot_string(slot).map(str::as_bytes)
    }

    pub fn set_slot_new_list(&mut self, slot: usize) {
        let obj = self.heap.allocate(ListObj::new(), 32);
        self.set_slot(slot, Value::from_obj(obj));
    }

    pub fn set_slot_new_map(&mut self, slot: usize) {
        let obj = self.heap.allocate(MapObj::new(), 32);
        self.set_slot(slot, Value::from_obj(obj));
    }

    /// Builds a host-owned extern value directly into `slot`, using the
    /// class value already sitting in `class_slot`. Unlike a
    /// constructor-driven allocation (`Config::bind_extern_class`), this
    /// is the host handing over an already-built payload imperatively --
    /// the direct equivalent of `wrenSetSlotNewForeign` handing back a
    /// pointer for the caller to initialize in place.
    pub fn set_slot_new_extern<T: Any>(&mut self, slot: usize, class_slot: usize, payload: T) {
        let class_value = self.slot(class_slot);
        let class_ptr = class_value.as_obj().expect("class_slot must hold a Class value");
        let obj = ExternObj::new(class_ptr, Box::new(payload), None);
        let ptr = self.heap.allocate(obj, 64);
        self.set_slot(slot, Value::from_obj(ptr));
    }

    #[must_use]
    pub fn get_slot_extern<T: Any>(&self, slot: usize) -> Option<&T> {
        let ptr = self.slot(slot).as_obj()?;
        let obj = unsafe { &*ptr.cast::<ExternObj>().as_ptr() };
        obj.payload.downcast_ref::<T>()
    }

    /// Pins slot `slot`'s value against collection until released (spec
    /// §6 `make_handle`).
    pub fn make_handle(&mut self, slot: usize) -> Handle {
        let value = self.slot(slot);
        if let Some(index) = self.handles.iter().position(Option::is_none) {
            self.handles[index] = Some(value);
            Handle(index)
        } else {
            self.handles.push(Some(value));
            Handle(self.handles.len() - 1)
        }
    }

    pub fn release_handle(&mut self, handle: Handle) {
        self.handles[handle.0] = None;
    }

    fn handle_value(&self, handle: Handle) -> Value {
        self.handles[handle.0].expect("use of a released handle")
    }

    /// Writes a pinned handle's value into `slot`, the read side of
    /// `make_handle`.
    pub fn set_slot_handle(&mut self, slot: usize, handle: Handle) {
        let value = self.handle_value(handle);
        self.set_slot(slot, value);
    }

    /// Interns `signature` into a reusable [`CallHandle`] (spec §6
    /// `make_call_handle`). The arity is parsed out of the signature's
    /// parenthesized arm the same way the compiler's own signature
    /// strings encode it -- one `_` per parameter, comma-separated.
    pub fn make_call_handle(&mut self, signature: &str) -> CallHandle {
        let arity = signature
            .rfind('(')
            .map(|open| {
                let inner = &signature[open + 1..signature.len() - 1];
                if inner.is_empty() { 0 } else { inner.matches(',').count() + 1 }
            })
            .unwrap_or(0);
        CallHandle {
            symbol: self.symbols.intern(signature),
            arity,
        }
    }

    /// Invokes `handle` with slot 0 as the receiver and slots 1..=arity
    /// as arguments, leaving the result in slot 0 afterward (spec §6
    /// `call`). Runs on a fresh root fiber each time: a call handle is a
    /// one-shot round trip into Djuru and back, not a resumable fiber of
    /// its own.
    pub fn call(&mut self, handle: &CallHandle) -> InterpretResult {
        let args: Vec<Value> = (0..=handle.arity).map(|i| self.slots.get(i).copied().unwrap_or(Value::NULL)).collect();
        let fiber = FiberObj::new(FiberState::Root);
        let fiber_ptr = self.heap.allocate(fiber, 64);

        let result = if let Some(abort) = self.pending_abort.take() {
            Err(abort)
        } else {
            let result = interpreter::call_by_symbol(&mut self.heap, fiber_ptr, &self.core, &args, handle.symbol);
            if let Err(error) = &result {
                self.report_runtime_error(fiber_ptr, *error);
            }
            result
        };
        self.collect_if_needed(Some(fiber_ptr));

        match result {
            Ok(value) => {
                self.set_slot(0, value);
                InterpretResult::Success
            }
            Err(error) => {
                self.set_slot(0, error);
                InterpretResult::RuntimeError
            }
        }
    }

    /// Signals a runtime error whose value is in `slot` (spec §6
    /// `abort_fiber`). Nothing is actually executing between host calls,
    /// so this just queues the error for the very next `call`/
    /// `interpret` to fail with immediately instead of running at all.
    pub fn abort_fiber(&mut self, slot: usize) {
        self.pending_abort = Some(self.slot(slot));
    }

    #[must_use]
    pub fn has_module(&self, name: &str) -> bool {
        self.modules.iter().any(|m| m.name == name)
    }

    #[must_use]
    pub fn has_variable(&self, module: &str, name: &str) -> bool {
        self.find_module(module).and_then(|m| m.find(name)).is_some()
    }

    /// Reads module-level variable `name` from `module` into `slot`
    /// (spec §6 `get_variable`). Panics if the module or variable is
    /// unknown -- same "caller already checked `has_module`/
    /// `has_variable`" contract the reference API documents.
    pub fn get_variable(&mut self, module: &str, name: &str, slot: usize) {
        let module_obj = self.find_module(module).expect("unknown module");
        let index = module_obj.find(name).expect("unknown module variable");
        self.set_slot(slot, module_obj.get(index));
    }

    fn find_module(&self, name: &str) -> Option<&'static crate::object::ModuleObj> {
        let entry = self.modules.iter().find(|m| m.name == name)?;
        Some(unsafe { &*entry.module_ptr.cast::<crate::object::ModuleObj>().as_ptr() })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interprets_an_empty_module_successfully() {
        let mut vm = Vm::new(Config::new());
        assert_eq!(vm.interpret("main", ""), InterpretResult::Success);
    }

    #[test]
    fn compile_error_is_reported_and_returned() {
        use std::cell::RefCell;
        use std::rc::Rc;

        let seen = Rc::new(RefCell::new(Vec::new()));
        let seen_clone = Rc::clone(&seen);
        let config = Config::new().with_error_fn(move |kind, _module, _line, message| {
            seen_clone.borrow_mut().push((kind, message.to_string()));
        });
        let mut vm = Vm::new(config);
        let result = vm.interpret("main", "kulu (\n");
        assert_eq!(result, InterpretResult::CompileError);
        assert!(!seen.borrow().is_empty());
    }

    #[test]
    fn write_string_reaches_the_configured_sink() {
        use std::cell::RefCell;
        use std::rc::Rc;

        let out = Rc::new(RefCell::new(String::new()));
        let out_clone = Rc::clone(&out);
        let config = Config::new().with_write_fn(move |text| out_clone.borrow_mut().push_str(text));
        let mut vm = Vm::new(config);
        assert_eq!(vm.interpret("main", "A.seben_(\"hi\")\n"), InterpretResult::Success);
        assert_eq!(out.borrow().as_str(), "hi");
    }

    #[test]
    fn handles_round_trip_through_slots() {
        let mut vm = Vm::new(Config::new());
        vm.ensure_slots(1);
        vm.set_slot_double(0, 42.0);
        let handle = vm.make_handle(0);
        vm.set_slot_null(0);
        vm.set_slot_handle(0, handle);
        assert_eq!(vm.get_slot_double(0), Some(42.0));
        vm.release_handle(handle);
    }
}
