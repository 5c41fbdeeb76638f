//! `List` (spec §4.8): a growable array. Grounded on
//! `original_source/src/builtin/Core.c`'s `list_*` primitives (lines
//! ~279-450). `addCore`/`addAllCore` exist there only as compiler-emitted
//! fast paths for list-literal construction; this compiler lowers list
//! literals through ordinary `add(_)` calls instead, so they have no
//! counterpart here.

use djuru_core::{SymbolTable, Value};

use crate::corelib::{calculate_range, validate_index, values_equal};
use crate::heap::Heap;
use crate::interpreter::{runtime_error, CoreClasses};
use crate::object::{ClassObj, ListObj, MethodImpl::Primitive, RangeObj};

fn recv(receiver: Value) -> &'static ListObj {
    // SAFETY: only ever called on a receiver resolved through `List`'s
    // method table, which only `ListObj` instances dispatch into.
    unsafe { &*receiver.as_obj().expect("receiver of a List method is a list").cast::<ListObj>().as_ptr() }
}

fn list_new(heap: &mut Heap, _core: &CoreClasses, _receiver: Value, _args: &[Value]) -> Result<Value, Value> {
    Ok(Value::from_obj(heap.allocate(ListObj::new(), 32)))
}

fn list_filled(heap: &mut Heap, _core: &CoreClasses, _receiver: Value, args: &[Value]) -> Result<Value, Value> {
    let size = crate::corelib::expect_number(heap, args[0], "Size")?;
    let size = crate::corelib::expect_integer(heap, size, "Size")?;
    if size < 0.0 {
        return Err(runtime_error(heap, "Size cannot be negative."));
    }
    let list = ListObj::new();
    for _ in 0..size as usize {
        list.push(args[1]);
    }
    Ok(Value::from_obj(heap.allocate(list, 32)))
}

fn list_add(_heap: &mut Heap, _core: &CoreClasses, receiver: Value, args: &[Value]) -> Result<Value, Value> {
    recv(receiver).push(args[0]);
    Ok(args[0])
}

fn list_clear(_heap: &mut Heap, _core: &CoreClasses, receiver: Value, _args: &[Value]) -> Result<Value, Value> {
    let list = recv(receiver);
    while list.len() > 0 {
        list.remove_at(list.len() - 1);
    }
    Ok(Value::NULL)
}

fn list_count(_heap: &mut Heap, _core: &CoreClasses, receiver: Value, _args: &[Value]) -> Result<Value, Value> {
    Ok(Value::number(recv(receiver).len() as f64))
}

fn list_insert(heap: &mut Heap, _core: &CoreClasses, receiver: Value, args: &[Value]) -> Result<Value, Value> {
    let list = recv(receiver);
    // `count + 1` so inserting at the very end is valid.
    let index = validate_index(heap, args[0], list.len() + 1, "Index")?;
    list.insert(index, args[1]);
    Ok(args[1])
}

fn list_iterate(heap: &mut Heap, _core: &CoreClasses, receiver: Value, args: &[Value]) -> Result<Value, Value> {
    let list = recv(receiver);
    if args[0].is_null() {
        return Ok(if list.is_empty() { Value::FALSE } else { Value::number(0.0) });
    }
    let index = crate::corelib::expect_number(heap, args[0], "Iterator")?;
    let index = crate::corelib::expect_integer(heap, index, "Iterator")?;
    let next = index + 1.0;
    if next >= list.len() as f64 {
        Ok(Value::FALSE)
    } else {
        Ok(Value::number(next))
    }
}

fn list_iterator_value(heap: &mut Heap, _core: &CoreClasses, receiver: Value, args: &[Value]) -> Result<Value, Value> {
    let list = recv(receiver);
    let index = validate_index(heap, args[0], list.len(), "Iterator")?;
    Ok(list.get(index).expect("validated index is in bounds"))
}

fn list_remove_at(heap: &mut Heap, _core: &CoreClasses, receiver: Value, args: &[Value]) -> Result<Value, Value> {
    let list = recv(receiver);
    let index = validate_index(heap, args[0], list.len(), "Index")?;
    Ok(list.remove_at(index))
}

fn list_remove_value(_heap: &mut Heap, _core: &CoreClasses, receiver: Value, args: &[Value]) -> Result<Value, Value> {
    let list = recv(receiver);
    let found = (0..list.len()).find(|&i| values_equal(list.get(i).expect("index in bounds"), args[0]));
    Ok(match found {
        Some(index) => list.remove_at(index),
        None => Value::NULL,
    })
}

fn list_index_of(_heap: &mut Heap, _core: &CoreClasses, receiver: Value, args: &[Value]) -> Result<Value, Value> {
    let list = recv(receiver);
    let found = (0..list.len()).find(|&i| values_equal(list.get(i).expect("index in bounds"), args[0]));
    Ok(Value::number(found.map_or(-1.0, |i| i as f64)))
}

fn list_swap(heap: &mut Heap, _core: &CoreClasses, receiver: Value, args: &[Value]) -> Result<Value, Value> {
    let list = recv(receiver);
    let a = validate_index(heap, args[0], list.len(), "Index 0")?;
    let b = validate_index(heap, args[1], list.len(), "Index 1")?;
    let va = list.get(a).expect("validated index is in bounds");
    let vb = list.get(b).expect("validated index is in bounds");
    list.set(a, vb);
    list.set(b, va);
    Ok(Value::NULL)
}

fn list_subscript(heap: &mut Heap, _core: &CoreClasses, receiver: Value, args: &[Value]) -> Result<Value, Value> {
    let list = recv(receiver);
    if args[0].is_number() {
        let index = validate_index(heap, args[0], list.len(), "Subscript")?;
        return Ok(list.get(index).expect("validated index is in bounds"));
    }
    let Some(range_ptr) = args[0].as_obj().filter(|_| args[0].obj_kind() == Some(djuru_core::ObjKind::Range)) else {
        return Err(runtime_error(heap, "Subscript must be a number or a range."));
    };
    // SAFETY: `obj_kind` just confirmed this points at a `RangeObj`.
    let range = unsafe { &*range_ptr.cast::<RangeObj>().as_ptr() };
    let (start, count, step) = calculate_range(heap, range, list.len())?;
    let result = ListObj::new();
    let mut index = start as i64;
    for _ in 0..count {
        result.push(list.get(index as usize).expect("range bounds were validated"));
        index += step as i64;
    }
    Ok(Value::from_obj(heap.allocate(result, 32)))
}

fn list_subscript_set(heap: &mut Heap, _core: &CoreClasses, receiver: Value, args: &[Value]) -> Result<Value, Value> {
    let list = recv(receiver);
    let index = validate_index(heap, args[0], list.len(), "Subscript")?;
    list.set(index, args[1]);
    Ok(args[1])
}

pub fn install(class: &ClassObj, symbols: &mut SymbolTable) {
    class.set_static_method(symbols.intern("new()"), Primitive(list_new));
    class.set_static_method(symbols.intern("filled(_,_)"), Primitive(list_filled));

    class.set_method(symbols.intern("[_]"), Primitive(list_subscript));
    class.set_method(symbols.intern("[_]=(_)"), Primitive(list_subscript_set));
    class.set_method(symbols.intern("add(_)"), Primitive(list_add));
    class.set_method(symbols.intern("clear()"), Primitive(list_clear));
    class.set_method(symbols.intern("count()"), Primitive(list_count));
    class.set_method(symbols.intern("insert(_,_)"), Primitive(list_insert));
    class.set_method(symbols.intern("iterate(_)"), Primitive(list_iterate));
    class.set_method(symbols.intern("iteratorValue(_)"), Primitive(list_iterator_value));
    class.set_method(symbols.intern("removeAt(_)"), Primitive(list_remove_at));
    class.set_method(symbols.intern("removeValue(_)"), Primitive(list_remove_value));
    class.set_method(symbols.intern("indexOf(_)"), Primitive(list_index_of));
    class.set_method(symbols.intern("swap(_,_)"), Primitive(list_swap));
}
