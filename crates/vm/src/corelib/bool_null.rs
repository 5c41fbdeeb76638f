//! `Bool` and `Null`, the two singleton-value classes (spec §3, §4.8).
//! Grounded on `original_source/src/builtin/Core.c`'s `bool_not`/
//! `bool_toString` (lines ~1-40) and the `null_*` primitives alongside
//! them.

use djuru_core::{SymbolTable, Value};

use crate::corelib::alloc_string;
use crate::interpreter::CoreClasses;
use crate::object::{ClassObj, MethodImpl::Primitive};

fn bool_not(_heap: &mut crate::heap::Heap, _core: &CoreClasses, receiver: Value, _args: &[Value]) -> Result<Value, Value> {
    Ok(Value::boolean(!receiver.as_bool().expect("receiver of a Bool method is a bool")))
}

/// Mirrors the language's own `tien`/`galon` boolean keywords (spec's
/// glossary line for `gansan/foyi/tien/galon`) rather than the
/// reference VM's English `"true"`/`"false"`.
fn bool_to_string(heap: &mut crate::heap::Heap, _core: &CoreClasses, receiver: Value, _args: &[Value]) -> Result<Value, Value> {
    let text = if receiver.as_bool().expect("receiver of a Bool method is a bool") {
        "tien"
    } else {
        "galon"
    };
    Ok(alloc_string(heap, text))
}

pub fn install_bool(class: &ClassObj, symbols: &mut SymbolTable) {
    class.set_method(symbols.intern("!"), Primitive(bool_not));
    class.set_method(symbols.intern("toString()"), Primitive(bool_to_string));
}

fn null_not(_heap: &mut crate::heap::Heap, _core: &CoreClasses, _receiver: Value, _args: &[Value]) -> Result<Value, Value> {
    Ok(Value::TRUE)
}

fn null_to_string(heap: &mut crate::heap::Heap, _core: &CoreClasses, _receiver: Value, _args: &[Value]) -> Result<Value, Value> {
    Ok(alloc_string(heap, "null"))
}

pub fn install_null(class: &ClassObj, symbols: &mut SymbolTable) {
    class.set_method(symbols.intern("!"), Primitive(null_not));
    class.set_method(symbols.intern("toString()"), Primitive(null_to_string));
}
