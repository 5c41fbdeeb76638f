//! `Object`, the root of every class (spec §4.7), and `Class`, the type
//! of a class value itself. Grounded on `original_source/src/builtin/
//! Core.c`'s `object_*`/`class_*` primitives (lines ~834-965).

use djuru_core::{SymbolTable, Value};

use crate::corelib::{alloc_string, values_equal};
use crate::interpreter::{class_of, class_ptr, runtime_error, CoreClasses};
use crate::object::ClassObj;

fn object_not(_heap: &mut crate::heap::Heap, _core: &CoreClasses, _receiver: Value, _args: &[Value]) -> Result<Value, Value> {
    Ok(Value::FALSE)
}

fn object_eqeq(_heap: &mut crate::heap::Heap, _core: &CoreClasses, receiver: Value, args: &[Value]) -> Result<Value, Value> {
    Ok(Value::boolean(values_equal(receiver, args[0])))
}

fn object_bangeq(_heap: &mut crate::heap::Heap, _core: &CoreClasses, receiver: Value, args: &[Value]) -> Result<Value, Value> {
    Ok(Value::boolean(!values_equal(receiver, args[0])))
}

fn object_is(heap: &mut crate::heap::Heap, core: &CoreClasses, receiver: Value, args: &[Value]) -> Result<Value, Value> {
    let target_ptr = match args[0].obj_kind() {
        Some(djuru_core::ObjKind::Class) => args[0].as_obj().expect("obj_kind implies as_obj"),
        _ => return Err(runtime_error(heap, "Right operand must be a class.")),
    };
    let mut cursor = Some(class_of(core, receiver));
    while let Some(ptr) = cursor {
        if ptr == target_ptr {
            return Ok(Value::TRUE);
        }
        cursor = class_ptr(ptr).superclass();
    }
    Ok(Value::FALSE)
}

fn object_to_string(heap: &mut crate::heap::Heap, core: &CoreClasses, receiver: Value, _args: &[Value]) -> Result<Value, Value> {
    let class = class_ptr(class_of(core, receiver));
    Ok(alloc_string(heap, format!("instance of {}", class.name)))
}

fn object_type(_heap: &mut crate::heap::Heap, core: &CoreClasses, receiver: Value, _args: &[Value]) -> Result<Value, Value> {
    Ok(Value::from_obj(class_of(core, receiver)))
}

pub fn install_object(class: &ClassObj, symbols: &mut SymbolTable) {
    use crate::object::MethodImpl::Primitive;
    class.set_method(symbols.intern("!"), Primitive(object_not));
    class.set_method(symbols.intern("==(_)"), Primitive(object_eqeq));
    class.set_method(symbols.intern("!=(_)"), Primitive(object_bangeq));
    class.set_method(symbols.intern("is(_)"), Primitive(object_is));
    class.set_method(symbols.intern("toString()"), Primitive(object_to_string));
    class.set_method(symbols.intern("type()"), Primitive(object_type));
}

fn class_name(heap: &mut crate::heap::Heap, _core: &CoreClasses, receiver: Value, _args: &[Value]) -> Result<Value, Value> {
    let ptr = receiver.as_obj().expect("receiver of a class-value call is the class itself");
    Ok(alloc_string(heap, class_ptr(ptr).name.to_string()))
}

fn class_supertype(_heap: &mut crate::heap::Heap, _core: &CoreClasses, receiver: Value, _args: &[Value]) -> Result<Value, Value> {
    let ptr = receiver.as_obj().expect("receiver of a class-value call is the class itself");
    Ok(class_ptr(ptr).superclass().map(Value::from_obj).unwrap_or(Value::NULL))
}

/// Everything a class value itself needs when it is the receiver (e.g.
/// `Point.name`, `Point == Point`). A `Class`-kind receiver dispatches
/// through its *own* static table (`resolve_call`'s `ObjKind::Class`
/// branch) and never reaches an instance table at all, unlike the
/// reference VM's metaclass model where a class is simply an instance
/// of its (usually anonymous) metaclass and so picks up `Class`'s and
/// `Object`'s instance methods the ordinary way. This VM has no
/// metaclass, so the class-only members (`name`/`supertype`) plus the
/// `Object` members a class value still needs to answer to
/// (`==`/`!=`/`!`/`is`/`toString`/`type`) all have to live on `Object`'s
/// static table instead, which every class's static-method chain
/// bottoms out at.
pub fn install_class_statics(object_class: &ClassObj, symbols: &mut SymbolTable) {
    use crate::object::MethodImpl::Primitive;
    object_class.set_static_method(symbols.intern("name()"), Primitive(class_name));
    object_class.set_static_method(symbols.intern("supertype()"), Primitive(class_supertype));
    object_class.set_static_method(symbols.intern("toString()"), Primitive(class_name));
    object_class.set_static_method(symbols.intern("!"), Primitive(object_not));
    object_class.set_static_method(symbols.intern("==(_)"), Primitive(object_eqeq));
    object_class.set_static_method(symbols.intern("!=(_)"), Primitive(object_bangeq));
    object_class.set_static_method(symbols.intern("is(_)"), Primitive(object_is));
    object_class.set_static_method(symbols.intern("type()"), Primitive(object_type));
}
