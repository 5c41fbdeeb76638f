//! `Fn` (spec §4.3): a callable closure value. Grounded on
//! `original_source/src/builtin/Core.c`'s `fn_*` primitives.
//! `call(...)` is handled directly by `interpreter::dispatch`'s
//! `call_symbols` fast path rather than a primitive here -- the closure
//! carries its own code, so there's nothing for a `Fn`-table lookup to
//! add.

use djuru_core::{ObjKind, SymbolTable, Value};

use crate::corelib::{alloc_string, expect_closure};
use crate::heap::Heap;
use crate::interpreter::CoreClasses;
use crate::object::{ClassObj, ClosureObj, FunctionObj, MethodImpl::Primitive};

/// `fn_new`: the argument is already a function value, so this is a
/// type-checking identity.
fn fn_new(heap: &mut Heap, _core: &CoreClasses, _receiver: Value, args: &[Value]) -> Result<Value, Value> {
    expect_closure(heap, args[0], "Argument")?;
    Ok(args[0])
}

/// A bare, not-yet-closed-over `FunctionObj` never reaches a `Fn`
/// method as a receiver at the language level (`CLOSURE` always wraps
/// one before it's pushed as a value), but `class_of` maps both kinds
/// here, so this handles both rather than assuming `Closure`.
fn function_of(receiver: Value) -> &'static FunctionObj {
    let ptr = receiver.as_obj().expect("receiver of a Fn method is a function or closure");
    if receiver.obj_kind() == Some(ObjKind::Closure) {
        let closure = unsafe { &*ptr.cast::<ClosureObj>().as_ptr() };
        unsafe { &*closure.function.cast::<FunctionObj>().as_ptr() }
    } else {
        unsafe { &*ptr.cast::<FunctionObj>().as_ptr() }
    }
}

fn fn_arity(_heap: &mut Heap, _core: &CoreClasses, receiver: Value, _args: &[Value]) -> Result<Value, Value> {
    Ok(Value::number(f64::from(function_of(receiver).arity)))
}

fn fn_to_string(heap: &mut Heap, _core: &CoreClasses, _receiver: Value, _args: &[Value]) -> Result<Value, Value> {
    Ok(alloc_string(heap, "<fn>"))
}

pub fn install(class: &ClassObj, symbols: &mut SymbolTable) {
    class.set_static_method(symbols.intern("new(_)"), Primitive(fn_new));

    class.set_method(symbols.intern("arity()"), Primitive(fn_arity));
    class.set_method(symbols.intern("toString()"), Primitive(fn_to_string));
}
