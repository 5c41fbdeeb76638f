//! The built-in classes every value kind dispatches through when it has
//! no user-defined class of its own (spec §4.7, §4.8): `Object`, `Class`,
//! `Bool`, `Null`, `Num`, `String`, `List`, `Map`, `Range`, `Fn`, and
//! `Djuru` (fiber), plus the free-function `A` (system) surface.
//!
//! Grounded on `original_source/src/builtin/Core.c`: each submodule here
//! owns one class's primitive table, installed the same way the
//! reference VM's `DEF_PRIMITIVE`/`PRIMITIVE` macros bind a C function
//! pointer to a signature string, just expressed as `ClassObj::set_method`
//! against an interned `MethodSymbol` instead of a macro-generated
//! registration table.

mod bool_null;
mod fiber;
mod function;
mod list;
mod map;
mod num;
mod object_class;
mod range;
mod string;
mod system;

use std::cell::{Cell, RefCell};
use std::ptr::NonNull;

use djuru_core::{ObjHeader, ObjKind, SymbolTable, Value};

use crate::config::Config;
use crate::heap::Heap;
use crate::interpreter::{call_symbols, CoreClasses, FiberSymbols};
use crate::object::{ClassObj, ClosureObj, RangeObj, StringObj};

fn new_class(heap: &mut Heap, name: &str, superclass: Option<NonNull<ObjHeader>>) -> NonNull<ObjHeader> {
    let class = ClassObj::new(name.into(), false);
    class.set_superclass(superclass);
    heap.allocate(class, 96)
}

fn class_ref(ptr: NonNull<ObjHeader>) -> &'static ClassObj {
    // SAFETY: every pointer `bootstrap` hands to this helper was just
    // allocated as a `ClassObj` by `new_class` above.
    unsafe { &*ptr.cast::<ClassObj>().as_ptr() }
}

/// Allocates a `StringObj` for `s` and wraps it as a `Value`, the
/// allocation every `toString`/error-message primitive below needs.
pub(crate) fn alloc_string(heap: &mut Heap, s: impl Into<String>) -> Value {
    let s = s.into();
    let size = s.len() + 24;
    Value::from_obj(heap.allocate(StringObj::new(s), size))
}

pub(crate) fn as_string(value: Value) -> Option<&'static StringObj> {
    if value.obj_kind() != Some(ObjKind::String) {
        return None;
    }
    Some(unsafe { &*value.as_obj()?.cast::<StringObj>().as_ptr() })
}

/// Value equality (spec §3), as opposed to `Value::is_identical`'s raw
/// bit comparison: strings compare by content, numbers by numeric value
/// (so `0 == -0` even though they're different bit patterns and
/// `Value::number`'s NaN canonicalization means an arithmetic NaN never
/// equals itself, matching IEEE 754), everything else by identity.
/// Grounded on `Core.c`'s `wrenValuesEqual` (referenced from both
/// `object_eqeq` and `num_eqeq`).
pub(crate) fn values_equal(a: Value, b: Value) -> bool {
    if let (Some(sa), Some(sb)) = (as_string(a), as_string(b)) {
        return sa.as_str() == sb.as_str();
    }
    if a.is_number() && b.is_number() {
        return a.as_number() == b.as_number();
    }
    a.is_identical(b)
}

/// `A.yira(_)`'s text conversion: the same representation each built-in
/// class's own `toString()` primitive produces, computed directly
/// instead of dispatching to it. The reference VM's print wrapper lives
/// in a core-module bootstrap script (`Core.c`'s `coreModuleSource`,
/// run once at startup via `MSCInterpret`) that calls `toString`
/// polymorphically as ordinary bytecode; that script's text isn't part
/// of this port's reference slice, and no `PrimitiveFn` here can
/// re-enter dispatch the way compiled bytecode can. User classes that
/// override `toString` fall back to `Object`'s "instance of ClassName"
/// shape rather than their override, the one place `yira` diverges from
/// a true polymorphic print.
pub(crate) fn stringify(heap: &mut Heap, core: &CoreClasses, value: Value) -> Value {
    if as_string(value).is_some() {
        return value;
    }
    if let Some(n) = value.as_number() {
        return alloc_string(heap, num::format_num(n));
    }
    if let Some(b) = value.as_bool() {
        return alloc_string(heap, if b { "tien" } else { "galon" });
    }
    if value.is_null() {
        return alloc_string(heap, "null");
    }
    if value.obj_kind() == Some(ObjKind::Closure) {
        return alloc_string(heap, "<fn>");
    }
    if let Some(range) = as_range(value) {
        let op = if range.inclusive { ".." } else { "..." };
        return alloc_string(heap, format!("{}{op}{}", num::format_num(range.from), num::format_num(range.to)));
    }
    let class = crate::interpreter::class_ptr(crate::interpreter::class_of(core, value));
    alloc_string(heap, format!("instance of {}", class.name))
}

pub(crate) fn as_range(value: Value) -> Option<&'static RangeObj> {
    if value.obj_kind() != Some(ObjKind::Range) {
        return None;
    }
    Some(unsafe { &*value.as_obj()?.cast::<RangeObj>().as_ptr() })
}

pub(crate) use crate::interpreter::runtime_error;

/// Builds every core class, installs its primitives, and returns the
/// `CoreClasses` table the interpreter threads through `run`/`dispatch`.
/// Superclass order matters here: `Object` must exist (with no
/// superclass of its own) before anything else can be linked to it.
#[must_use]
pub fn bootstrap(heap: &mut Heap, symbols: &mut SymbolTable, config: Config) -> CoreClasses {
    let object = new_class(heap, "Object", None);
    object_class::install_object(class_ref(object), symbols);
    object_class::install_class_statics(class_ref(object), symbols);

    // `Class` is never itself a receiver's class-of-instances (no value
    // has `ObjKind::Instance` with this as its class) -- it only exists
    // as the value `SomeClass.type` returns, per `class_of`'s
    // `ObjKind::Class => core.class` mapping.
    let class = new_class(heap, "Class", Some(object));

    let bool_class = new_class(heap, "Bool", Some(object));
    bool_null::install_bool(class_ref(bool_class), symbols);

    let null_class = new_class(heap, "Null", Some(object));
    bool_null::install_null(class_ref(null_class), symbols);

    let num = new_class(heap, "Num", Some(object));
    num::install(class_ref(num), symbols);

    let string = new_class(heap, "String", Some(object));
    string::install(class_ref(string), symbols);

    let list = new_class(heap, "List", Some(object));
    list::install(class_ref(list), symbols);

    let map = new_class(heap, "Map", Some(object));
    map::install(class_ref(map), symbols);

    let range = new_class(heap, "Range", Some(object));
    range::install(class_ref(range), symbols);

    let fn_class = new_class(heap, "Fn", Some(object));
    function::install(class_ref(fn_class), symbols);

    let fiber = new_class(heap, "Djuru", Some(object));
    let fiber_symbols = FiberSymbols::new(symbols);
    fiber::install(class_ref(fiber), symbols);

    let system_class = new_class(heap, "A", Some(object));
    system::install(class_ref(system_class), symbols);

    CoreClasses {
        object,
        class,
        num,
        bool_class,
        null_class,
        string,
        list,
        map,
        range,
        fiber,
        fn_class,
        system: system_class,
        fiber_symbols,
        call_symbols: call_symbols(symbols),
        config: RefCell::new(config),
        gc_requested: Cell::new(false),
    }
}

/// Shared argument-validation helper: every arity-checked primitive
/// raises the same shape of message as `Core.c`'s `validateFn`/
/// `RETURN_ERROR` pairs, just spelled out once instead of per call site.
pub(crate) fn expect_number(heap: &mut Heap, value: Value, what: &str) -> Result<f64, Value> {
    value.as_number().ok_or_else(|| runtime_error(heap, format!("{what} must be a number.")))
}

pub(crate) fn expect_string(heap: &mut Heap, value: Value, what: &str) -> Result<&'static str, Value> {
    as_string(value).map(StringObj::as_str).ok_or_else(|| runtime_error(heap, format!("{what} must be a string.")))
}

/// `validateFn`: anywhere the reference takes a `Closure` argument
/// (`Djuru.kura`, `Fn.new`).
pub(crate) fn expect_closure(heap: &mut Heap, value: Value, what: &str) -> Result<&'static ClosureObj, Value> {
    if value.obj_kind() != Some(ObjKind::Closure) {
        return Err(runtime_error(heap, format!("{what} must be a function.")));
    }
    let ptr = value.as_obj().expect("obj_kind implies as_obj");
    // SAFETY: kind check above guarantees this points at a `ClosureObj`.
    Ok(unsafe { &*ptr.cast::<ClosureObj>().as_ptr() })
}

/// `validateIntValue`: a bounds-checkable number must also be a whole
/// number -- fractional indices/steps are always a user error.
pub(crate) fn expect_integer(heap: &mut Heap, value: f64, what: &str) -> Result<f64, Value> {
    if value.trunc() == value {
        Ok(value)
    } else {
        Err(runtime_error(heap, format!("{what} must be an integer.")))
    }
}

/// `validateIndexValue`/`validateIndex` (`Primitive.c`): negative
/// indices count from the end of a `count`-long sequence; anything
/// still out of `[0, count)` after that is an error.
pub(crate) fn validate_index_value(heap: &mut Heap, value: f64, count: usize, what: &str) -> Result<usize, Value> {
    let value = expect_integer(heap, value, what)?;
    let adjusted = if value < 0.0 { value + count as f64 } else { value };
    if adjusted >= 0.0 && adjusted < count as f64 {
        Ok(adjusted as usize)
    } else {
        Err(runtime_error(heap, format!("{what} out of bounds.")))
    }
}

pub(crate) fn validate_index(heap: &mut Heap, arg: Value, count: usize, what: &str) -> Result<usize, Value> {
    let value = expect_number(heap, arg, what)?;
    validate_index_value(heap, value, count, what)
}

/// `calculateRange` (`Primitive.c`): turns a (possibly negative,
/// possibly exclusive, possibly descending) range over a `length`-long
/// sequence into a `(start, result_len, step)` walk of raw positions.
/// The empty-range-at-the-end special case lets `seq[0..-1]` and
/// `seq[0...seq.count]` both copy a sequence, even an empty one.
pub(crate) fn calculate_range(heap: &mut Heap, range: &RangeObj, length: usize) -> Result<(usize, usize, i32), Value> {
    let len = length as f64;
    if range.from == len && range.to == (if range.inclusive { -1.0 } else { len }) {
        return Ok((0, 0, 0));
    }
    let from = validate_index_value(heap, range.from, length, "Range start")?;
    let mut value = expect_integer(heap, range.to, "Range end")?;
    if value < 0.0 {
        value += len;
    }
    if !range.inclusive {
        if value == from as f64 {
            return Ok((from, 0, 0));
        }
        value += if value >= from as f64 { -1.0 } else { 1.0 };
    }
    if value < 0.0 || value >= len {
        return Err(runtime_error(heap, "Range end out of bounds."));
    }
    let to = value as usize;
    let result_len = (from as i64 - to as i64).unsigned_abs() as usize + 1;
    let step = if from <= to { 1 } else { -1 };
    Ok((from, result_len, step))
}
