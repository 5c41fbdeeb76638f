//! `Djuru` (spec §4.5): cooperative, stack-carrying coroutines.
//! Grounded on `original_source/src/builtin/Core.c`'s `djuru_*`
//! primitives. `weele`/`alaTeme`/`aladie`/`mine`/`djo`/`sissanTa`/`tike`
//! switch which fiber is running and are handled by
//! `interpreter::fiber_control` instead of a primitive here.

use djuru_core::{SymbolTable, Value};

use crate::corelib::expect_closure;
use crate::heap::Heap;
use crate::interpreter::{runtime_error, CoreClasses};
use crate::object::{ClassObj, FiberObj, FiberState, FunctionObj, MethodImpl::Primitive};

fn recv(receiver: Value) -> &'static FiberObj {
    // SAFETY: only ever called on a receiver resolved through `Djuru`'s
    // method table, which only `FiberObj` instances dispatch into.
    unsafe { &*receiver.as_obj().expect("receiver of a Djuru method is a fiber").cast::<FiberObj>().as_ptr() }
}

/// `djuru_new`: a fiber is constructed around a closure that takes at
/// most one parameter; the closure itself isn't run until the fiber's
/// first `weele`/`alaTeme`/`aladie`.
fn fiber_new(heap: &mut Heap, _core: &CoreClasses, _receiver: Value, args: &[Value]) -> Result<Value, Value> {
    let closure_ptr = expect_closure(heap, args[0], "Argument")?;
    let function = unsafe { &*closure_ptr.function.cast::<FunctionObj>().as_ptr() };
    if function.arity > 1 {
        return Err(runtime_error(heap, "Function cannot take more than one parameter."));
    }
    let fiber = FiberObj::new(FiberState::Other);
    let obj_ptr = heap.allocate(fiber, 64);
    let obj = unsafe { &*obj_ptr.cast::<FiberObj>().as_ptr() };
    let closure_obj_ptr = args[0].as_obj().expect("expect_closure validated this");
    obj.set_pending_closure(Some(closure_obj_ptr));
    Ok(Value::from_obj(obj_ptr))
}

fn fiber_is_done(_heap: &mut Heap, _core: &CoreClasses, receiver: Value, _args: &[Value]) -> Result<Value, Value> {
    let fiber = recv(receiver);
    Ok(Value::boolean(fiber.is_done() && fiber.pending_closure().is_none() || !fiber.error.get().is_null()))
}

fn fiber_error(_heap: &mut Heap, _core: &CoreClasses, receiver: Value, _args: &[Value]) -> Result<Value, Value> {
    Ok(recv(receiver).error.get())
}

pub fn install(class: &ClassObj, symbols: &mut SymbolTable) {
    class.set_static_method(symbols.intern("kura(_)"), Primitive(fiber_new));

    class.set_method(symbols.intern("ok()"), Primitive(fiber_is_done));
    class.set_method(symbols.intern("fili()"), Primitive(fiber_error));
}
