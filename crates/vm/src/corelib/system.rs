//! `A` (spec §4.8): free-standing host-facing functions, not tied to any
//! instance. Grounded on `original_source/src/builtin/Core.c`'s
//! `system_*` primitives, all living on `A`'s *static* table only, the
//! same way `Object`'s class-level methods do. `yira(_)` is the one
//! addition with no `Core.c` registration of its own (see its doc
//! comment below).

use djuru_core::{SymbolTable, Value};

use crate::corelib::{expect_string, stringify};
use crate::heap::Heap;
use crate::interpreter::CoreClasses;
use crate::object::{ClassObj, MethodImpl::Primitive};

fn system_clock(_heap: &mut Heap, _core: &CoreClasses, _receiver: Value, _args: &[Value]) -> Result<Value, Value> {
    let elapsed = std::time::SystemTime::now().duration_since(std::time::UNIX_EPOCH).unwrap_or_default();
    Ok(Value::number(elapsed.as_secs_f64()))
}

/// `system_gc`: a full collection needs the loaded-modules table and
/// the currently running fiber (`gc::Roots`), neither of which a
/// `PrimitiveFn` receives -- only `api::Vm`'s call sites have both. This
/// just raises the flag; `Vm::interpret`/`Vm::call` honor it once the
/// fiber returns control with `gc_requested` set.
fn system_gc(_heap: &mut Heap, core: &CoreClasses, _receiver: Value, _args: &[Value]) -> Result<Value, Value> {
    core.gc_requested.set(true);
    Ok(Value::NULL)
}

/// `system_writeString` (`A.seben_(_)`): forwards to the host's
/// configured `write_fn` (spec §6); discarded entirely if the embedder
/// never set one.
fn system_write_string(heap: &mut Heap, core: &CoreClasses, _receiver: Value, args: &[Value]) -> Result<Value, Value> {
    let text = expect_string(heap, args[0], "Argument")?;
    core.config.borrow_mut().write(text);
    Ok(args[0])
}

/// `A.yira(_)`: not a `Core.c` primitive -- it only turns up as example
/// usage (`Compiler.c`'s for-loop desugaring comments), never as a
/// `DEF_PRIMITIVE` registration, which points to it living in the
/// reference VM's embedded core-module bootstrap script the same way
/// Wren's `core.wren` defines `System.print` as `writeString_(obj
/// .toString)` plus a trailing newline. That script's text isn't part
/// of this port's reference slice, so this reimplements the same shape
/// directly: stringify the argument (see `stringify`'s note on why that
/// isn't a true polymorphic `toString` dispatch here) and forward it to
/// `seben_(_)`'s write destination with `"\n"` appended, then hand the
/// original argument back the way the reference's `print` does.
fn system_print(heap: &mut Heap, core: &CoreClasses, _receiver: Value, args: &[Value]) -> Result<Value, Value> {
    let text = stringify(heap, core, args[0]);
    let text = expect_string(heap, text, "Argument")?;
    let mut config = core.config.borrow_mut();
    config.write(text);
    config.write("\n");
    Ok(args[0])
}

pub fn install(class: &ClassObj, symbols: &mut SymbolTable) {
    class.set_static_method(symbols.intern("waati()"), Primitive(system_clock));
    class.set_static_method(symbols.intern("gc()"), Primitive(system_gc));
    class.set_static_method(symbols.intern("seben_(_)"), Primitive(system_write_string));
    class.set_static_method(symbols.intern("yira(_)"), Primitive(system_print));
}
