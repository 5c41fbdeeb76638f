//! `Range` (spec §4.8): an endpoint pair driving `for`-loop iteration.
//! Grounded on `original_source/src/builtin/Core.c`'s `range_*`
//! primitives (lines ~879-960).

use djuru_core::{SymbolTable, Value};

use crate::corelib::alloc_string;
use crate::heap::Heap;
use crate::interpreter::CoreClasses;
use crate::object::{ClassObj, MethodImpl::Primitive, RangeObj};

fn recv(receiver: Value) -> &'static RangeObj {
    // SAFETY: only ever called on a receiver resolved through `Range`'s
    // method table, which only `RangeObj` instances dispatch into.
    unsafe { &*receiver.as_obj().expect("receiver of a Range method is a range").cast::<RangeObj>().as_ptr() }
}

fn range_from(_heap: &mut Heap, _core: &CoreClasses, receiver: Value, _args: &[Value]) -> Result<Value, Value> {
    Ok(Value::number(recv(receiver).from))
}

fn range_to(_heap: &mut Heap, _core: &CoreClasses, receiver: Value, _args: &[Value]) -> Result<Value, Value> {
    Ok(Value::number(recv(receiver).to))
}

fn range_min(_heap: &mut Heap, _core: &CoreClasses, receiver: Value, _args: &[Value]) -> Result<Value, Value> {
    let r = recv(receiver);
    Ok(Value::number(r.from.min(r.to)))
}

fn range_max(_heap: &mut Heap, _core: &CoreClasses, receiver: Value, _args: &[Value]) -> Result<Value, Value> {
    let r = recv(receiver);
    Ok(Value::number(r.from.max(r.to)))
}

fn range_is_inclusive(_heap: &mut Heap, _core: &CoreClasses, receiver: Value, _args: &[Value]) -> Result<Value, Value> {
    Ok(Value::boolean(recv(receiver).inclusive))
}

/// `iterate(_)`: the compiler only ever emits a step-less for-loop
/// iteration (`RangeObj::iterate` steps by exactly one in the
/// direction from `from` to `to`), so this reuses that directly rather
/// than reimplementing the reference's variable-step form.
fn range_iterate(_heap: &mut Heap, _core: &CoreClasses, receiver: Value, args: &[Value]) -> Result<Value, Value> {
    let r = recv(receiver);
    let iter = args[0].as_number();
    Ok(match r.iterate(iter) {
        Some(next) => Value::number(next),
        None => Value::FALSE,
    })
}

fn range_iterator_value(_heap: &mut Heap, _core: &CoreClasses, _receiver: Value, args: &[Value]) -> Result<Value, Value> {
    Ok(args[0])
}

fn range_to_string(heap: &mut Heap, _core: &CoreClasses, receiver: Value, _args: &[Value]) -> Result<Value, Value> {
    let r = recv(receiver);
    let op = if r.inclusive { ".." } else { "..." };
    Ok(alloc_string(heap, format!("{}{op}{}", crate::corelib::num::format_num(r.from), crate::corelib::num::format_num(r.to))))
}

pub fn install(class: &ClassObj, symbols: &mut SymbolTable) {
    class.set_method(symbols.intern("from()"), Primitive(range_from));
    class.set_method(symbols.intern("to()"), Primitive(range_to));
    class.set_method(symbols.intern("min()"), Primitive(range_min));
    class.set_method(symbols.intern("max()"), Primitive(range_max));
    class.set_method(symbols.intern("isInclusive()"), Primitive(range_is_inclusive));
    class.set_method(symbols.intern("iterate(_)"), Primitive(range_iterate));
    class.set_method(symbols.intern("iteratorValue(_)"), Primitive(range_iterator_value));
    class.set_method(symbols.intern("toString()"), Primitive(range_to_string));
}
