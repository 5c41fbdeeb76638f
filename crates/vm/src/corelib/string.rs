//! `String` (spec §4.8): immutable UTF-8 bytes. Grounded on
//! `original_source/src/builtin/Core.c`'s `string_*` primitives
//! (lines ~965-1170); every index and length below is a *byte*
//! position, matching the reference (`byteAt`/`codePointAt` take byte
//! offsets, and `count`/codepoint-position APIs don't exist there).

use djuru_core::{SymbolTable, Value};

use crate::corelib::{alloc_string, as_string, calculate_range, expect_string, validate_index};
use crate::heap::Heap;
use crate::interpreter::{runtime_error, CoreClasses};
use crate::object::string::find;
use crate::object::{ClassObj, MethodImpl::Primitive, RangeObj, StringObj};

fn recv(receiver: Value) -> &'static StringObj {
    as_string(receiver).expect("receiver of a String method is a string")
}

fn decode_at(bytes: &[u8], index: usize) -> Option<char> {
    std::str::from_utf8(bytes.get(index..)?).ok()?.chars().next()
}

fn string_plus(heap: &mut Heap, _core: &CoreClasses, receiver: Value, args: &[Value]) -> Result<Value, Value> {
    let right = expect_string(heap, args[0], "Right operand")?;
    let mut out = recv(receiver).as_str().to_string();
    out.push_str(right);
    Ok(alloc_string(heap, out))
}

fn string_subscript(heap: &mut Heap, _core: &CoreClasses, receiver: Value, args: &[Value]) -> Result<Value, Value> {
    let s = recv(receiver);
    let bytes = s.as_str().as_bytes();
    if args[0].is_number() {
        let index = validate_index(heap, args[0], bytes.len(), "Subscript")?;
        return Ok(match decode_at(bytes, index) {
            Some(ch) => alloc_string(heap, ch.to_string()),
            None => alloc_string(heap, ""),
        });
    }
    let Some(range_ptr) = args[0].as_obj().filter(|_| args[0].obj_kind() == Some(djuru_core::ObjKind::Range)) else {
        return Err(runtime_error(heap, "Subscript must be a number or a range."));
    };
    // SAFETY: `obj_kind` just confirmed this points at a `RangeObj`.
    let range = unsafe { &*range_ptr.cast::<RangeObj>().as_ptr() };
    let (start, count, step) = calculate_range(heap, range, bytes.len())?;
    let mut out = String::new();
    let mut index = start as i64;
    for _ in 0..count {
        if index < 0 {
            break;
        }
        if let Some(ch) = decode_at(bytes, index as usize) {
            out.push(ch);
        }
        index += step as i64;
    }
    Ok(alloc_string(heap, out))
}

fn string_byte_at(heap: &mut Heap, _core: &CoreClasses, receiver: Value, args: &[Value]) -> Result<Value, Value> {
    let bytes = recv(receiver).as_str().as_bytes();
    let index = validate_index(heap, args[0], bytes.len(), "Index")?;
    Ok(Value::number(f64::from(bytes[index])))
}

fn string_byte_count(_heap: &mut Heap, _core: &CoreClasses, receiver: Value, _args: &[Value]) -> Result<Value, Value> {
    Ok(Value::number(recv(receiver).as_str().len() as f64))
}

fn string_code_point_at(heap: &mut Heap, _core: &CoreClasses, receiver: Value, args: &[Value]) -> Result<Value, Value> {
    let bytes = recv(receiver).as_str().as_bytes();
    let index = validate_index(heap, args[0], bytes.len(), "Index")?;
    Ok(Value::number(match decode_at(bytes, index) {
        Some(ch) => f64::from(ch as u32),
        None => -1.0,
    }))
}

fn string_contains(heap: &mut Heap, _core: &CoreClasses, receiver: Value, args: &[Value]) -> Result<Value, Value> {
    let needle = expect_string(heap, args[0], "Argument")?;
    let haystack = recv(receiver).as_str();
    Ok(Value::boolean(find(haystack.as_bytes(), needle.as_bytes(), 0).is_some()))
}

fn string_ends_with(heap: &mut Heap, _core: &CoreClasses, receiver: Value, args: &[Value]) -> Result<Value, Value> {
    let needle = expect_string(heap, args[0], "Argument")?;
    Ok(Value::boolean(recv(receiver).as_str().ends_with(needle)))
}

fn string_starts_with(heap: &mut Heap, _core: &CoreClasses, receiver: Value, args: &[Value]) -> Result<Value, Value> {
    let needle = expect_string(heap, args[0], "Argument")?;
    Ok(Value::boolean(recv(receiver).as_str().starts_with(needle)))
}

fn string_index_of(heap: &mut Heap, _core: &CoreClasses, receiver: Value, args: &[Value]) -> Result<Value, Value> {
    let needle = expect_string(heap, args[0], "Argument")?;
    let haystack = recv(receiver).as_str().as_bytes();
    let start = if args.len() > 1 { validate_index(heap, args[1], haystack.len(), "Start")? } else { 0 };
    Ok(Value::number(match find(haystack, needle.as_bytes(), start) {
        Some(i) => i as f64,
        None => -1.0,
    }))
}

/// `iterate(_)`: advances to the start byte of the next UTF-8 sequence.
/// Unlike the reference's `iterate(_,_)`, this VM's compiler never
/// emits a step argument for `for`-loops, so there is no variable-step
/// form here.
fn string_iterate(heap: &mut Heap, _core: &CoreClasses, receiver: Value, args: &[Value]) -> Result<Value, Value> {
    let bytes = recv(receiver).as_str().as_bytes();
    if args[0].is_null() {
        return Ok(if bytes.is_empty() { Value::FALSE } else { Value::number(0.0) });
    }
    let mut index = validate_index(heap, args[0], bytes.len(), "Iterator")? + 1;
    while index < bytes.len() && (bytes[index] & 0xc0) == 0x80 {
        index += 1;
    }
    Ok(if index >= bytes.len() { Value::FALSE } else { Value::number(index as f64) })
}

fn string_iterate_byte(heap: &mut Heap, _core: &CoreClasses, receiver: Value, args: &[Value]) -> Result<Value, Value> {
    let bytes = recv(receiver).as_str().as_bytes();
    if args[0].is_null() {
        return Ok(if bytes.is_empty() { Value::FALSE } else { Value::number(0.0) });
    }
    let index = validate_index(heap, args[0], bytes.len(), "Iterator")? + 1;
    Ok(if index >= bytes.len() { Value::FALSE } else { Value::number(index as f64) })
}

fn string_iterator_value(heap: &mut Heap, _core: &CoreClasses, receiver: Value, args: &[Value]) -> Result<Value, Value> {
    let bytes = recv(receiver).as_str().as_bytes();
    let index = validate_index(heap, args[0], bytes.len(), "Iterator")?;
    Ok(match decode_at(bytes, index) {
        Some(ch) => alloc_string(heap, ch.to_string()),
        None => alloc_string(heap, ""),
    })
}

fn string_to_string(_heap: &mut Heap, _core: &CoreClasses, receiver: Value, _args: &[Value]) -> Result<Value, Value> {
    Ok(receiver)
}

fn string_compare_to(heap: &mut Heap, _core: &CoreClasses, receiver: Value, args: &[Value]) -> Result<Value, Value> {
    let other = expect_string(heap, args[0], "Argument")?;
    let ordering = recv(receiver).as_str().cmp(other);
    Ok(Value::number(match ordering {
        std::cmp::Ordering::Less => -1.0,
        std::cmp::Ordering::Equal => 0.0,
        std::cmp::Ordering::Greater => 1.0,
    }))
}

fn string_from_code_point(heap: &mut Heap, _core: &CoreClasses, _receiver: Value, args: &[Value]) -> Result<Value, Value> {
    let value = crate::corelib::expect_number(heap, args[0], "Code point")?;
    let value = crate::corelib::expect_integer(heap, value, "Code point")?;
    if value < 0.0 {
        return Err(runtime_error(heap, "Code point cannot be negative."));
    }
    if value > 0x0010_ffff as f64 {
        return Err(runtime_error(heap, "Code point cannot be greater than 0x10ffff."));
    }
    let ch = char::from_u32(value as u32).ok_or_else(|| runtime_error(heap, "Code point cannot be greater than 0x10ffff."))?;
    Ok(alloc_string(heap, ch.to_string()))
}

fn string_from_byte(heap: &mut Heap, _core: &CoreClasses, _receiver: Value, args: &[Value]) -> Result<Value, Value> {
    let value = crate::corelib::expect_number(heap, args[0], "Byte")?;
    let value = crate::corelib::expect_integer(heap, value, "Byte")?;
    if value < 0.0 {
        return Err(runtime_error(heap, "Byte cannot be negative."));
    }
    if value > 255.0 {
        return Err(runtime_error(heap, "Byte cannot be greater than 0xff."));
    }
    let byte = value as u8;
    // A single raw byte may not be valid UTF-8 on its own; the
    // reference stores it as a length-1 byte string regardless, so a
    // lossy decode (replacement character for non-ASCII bytes) is the
    // closest this VM's UTF-8-native `StringObj` can come.
    let text = if byte.is_ascii() { (byte as char).to_string() } else { String::from_utf8_lossy(&[byte]).into_owned() };
    Ok(alloc_string(heap, text))
}

pub fn install(class: &ClassObj, symbols: &mut SymbolTable) {
    class.set_method(symbols.intern("+(_)"), Primitive(string_plus));
    class.set_method(symbols.intern("[_]"), Primitive(string_subscript));
    class.set_method(symbols.intern("byteAt(_)"), Primitive(string_byte_at));
    class.set_method(symbols.intern("byteCount()"), Primitive(string_byte_count));
    class.set_method(symbols.intern("codePointAt(_)"), Primitive(string_code_point_at));
    class.set_method(symbols.intern("contains(_)"), Primitive(string_contains));
    class.set_method(symbols.intern("endsWith(_)"), Primitive(string_ends_with));
    class.set_method(symbols.intern("startsWith(_)"), Primitive(string_starts_with));
    class.set_method(symbols.intern("indexOf(_)"), Primitive(string_index_of));
    class.set_method(symbols.intern("indexOf(_,_)"), Primitive(string_index_of));
    class.set_method(symbols.intern("iterate(_)"), Primitive(string_iterate));
    class.set_method(symbols.intern("iterateByte(_)"), Primitive(string_iterate_byte));
    class.set_method(symbols.intern("iteratorValue(_)"), Primitive(string_iterator_value));
    class.set_method(symbols.intern("toString()"), Primitive(string_to_string));
    class.set_method(symbols.intern("compareTo(_)"), Primitive(string_compare_to));

    class.set_static_method(symbols.intern("fromCodePoint(_)"), Primitive(string_from_code_point));
    class.set_static_method(symbols.intern("fromByte(_)"), Primitive(string_from_byte));
}
