//! `Map` (spec §4.8): an open-addressed hash map. Grounded on
//! `original_source/src/builtin/Core.c`'s `map_*` primitives (lines
//! ~452-565). `addCore`/`addAllCore` are compiler-literal fast paths
//! this compiler doesn't emit (map literals lower through `[_]=(_)`),
//! so they have no counterpart here.

use djuru_core::{ObjKind, SymbolTable, Value};

use crate::corelib::{runtime_error, validate_index};
use crate::heap::Heap;
use crate::interpreter::CoreClasses;
use crate::object::{ClassObj, MapObj, MethodImpl::Primitive};

fn recv(receiver: Value) -> &'static MapObj {
    // SAFETY: only ever called on a receiver resolved through `Map`'s
    // method table, which only `MapObj` instances dispatch into.
    unsafe { &*receiver.as_obj().expect("receiver of a Map method is a map").cast::<MapObj>().as_ptr() }
}

/// `validateKey`/`MSCMapIsValidKey`: only value types with stable,
/// payload-independent identity (or content hash, for strings) may key
/// a map -- lists, maps, instances, and closures have none.
fn validate_key(heap: &mut Heap, key: Value) -> Result<(), Value> {
    let ok = key.is_bool() || key.is_null() || key.is_number() || key.obj_kind() == Some(ObjKind::String) || key.obj_kind() == Some(ObjKind::Class);
    if ok {
        Ok(())
    } else {
        Err(runtime_error(heap, "Key must be a value type."))
    }
}

fn map_new(heap: &mut Heap, _core: &CoreClasses, _receiver: Value, _args: &[Value]) -> Result<Value, Value> {
    Ok(Value::from_obj(heap.allocate(MapObj::new(), 48)))
}

fn map_subscript(heap: &mut Heap, _core: &CoreClasses, receiver: Value, args: &[Value]) -> Result<Value, Value> {
    validate_key(heap, args[0])?;
    Ok(recv(receiver).table.borrow().get(args[0]).unwrap_or(Value::NULL))
}

fn map_subscript_set(heap: &mut Heap, _core: &CoreClasses, receiver: Value, args: &[Value]) -> Result<Value, Value> {
    validate_key(heap, args[0])?;
    recv(receiver).table.borrow_mut().set(args[0], args[1]);
    Ok(args[1])
}

fn map_clear(_heap: &mut Heap, _core: &CoreClasses, receiver: Value, _args: &[Value]) -> Result<Value, Value> {
    *recv(receiver).table.borrow_mut() = Default::default();
    Ok(Value::NULL)
}

fn map_contains_key(heap: &mut Heap, _core: &CoreClasses, receiver: Value, args: &[Value]) -> Result<Value, Value> {
    validate_key(heap, args[0])?;
    Ok(Value::boolean(recv(receiver).table.borrow().contains(args[0])))
}

fn map_count(_heap: &mut Heap, _core: &CoreClasses, receiver: Value, _args: &[Value]) -> Result<Value, Value> {
    Ok(Value::number(recv(receiver).table.borrow().count() as f64))
}

fn map_remove(heap: &mut Heap, _core: &CoreClasses, receiver: Value, args: &[Value]) -> Result<Value, Value> {
    validate_key(heap, args[0])?;
    Ok(recv(receiver).table.borrow_mut().remove(args[0]).unwrap_or(Value::NULL))
}

/// `iterate(_)`: walks occupied buckets in index order. The compiler
/// never emits a step argument, so (unlike the reference) this only
/// ever scans forward.
fn map_iterate(heap: &mut Heap, _core: &CoreClasses, receiver: Value, args: &[Value]) -> Result<Value, Value> {
    let table = recv(receiver).table.borrow();
    let iter = if args[0].is_null() {
        None
    } else {
        let index = crate::corelib::expect_number(heap, args[0], "Iterator")?;
        Some(crate::corelib::expect_integer(heap, index, "Iterator")? as usize)
    };
    Ok(match table.iterate(iter) {
        Some(next) => Value::number(next as f64),
        None => Value::FALSE,
    })
}

fn map_key_iterator_value(heap: &mut Heap, _core: &CoreClasses, receiver: Value, args: &[Value]) -> Result<Value, Value> {
    let index = validate_index(heap, args[0], recv(receiver).table.borrow().capacity(), "Iterator")?;
    recv(receiver)
        .table
        .borrow()
        .entry_at(index)
        .map(|(k, _)| k)
        .ok_or_else(|| runtime_error(heap, "Invalid map iterator."))
}

fn map_value_iterator_value(heap: &mut Heap, _core: &CoreClasses, receiver: Value, args: &[Value]) -> Result<Value, Value> {
    let index = validate_index(heap, args[0], recv(receiver).table.borrow().capacity(), "Iterator")?;
    recv(receiver)
        .table
        .borrow()
        .entry_at(index)
        .map(|(_, v)| v)
        .ok_or_else(|| runtime_error(heap, "Invalid map iterator."))
}

pub fn install(class: &ClassObj, symbols: &mut SymbolTable) {
    class.set_static_method(symbols.intern("new()"), Primitive(map_new));

    class.set_method(symbols.intern("[_]"), Primitive(map_subscript));
    class.set_method(symbols.intern("[_]=(_)"), Primitive(map_subscript_set));
    class.set_method(symbols.intern("clear()"), Primitive(map_clear));
    class.set_method(symbols.intern("containsKey(_)"), Primitive(map_contains_key));
    class.set_method(symbols.intern("count()"), Primitive(map_count));
    class.set_method(symbols.intern("remove(_)"), Primitive(map_remove));
    class.set_method(symbols.intern("iterate(_)"), Primitive(map_iterate));
    class.set_method(symbols.intern("keyIteratorValue(_)"), Primitive(map_key_iterator_value));
    class.set_method(symbols.intern("valueIteratorValue(_)"), Primitive(map_value_iterator_value));
}
