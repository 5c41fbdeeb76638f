//! Turns a `djuru_compiler::types::CompiledModule` into real heap
//! objects (spec §4.2, §4.4, §4.7).
//!
//! Class bodies compile to *structural* data (`CompiledClass`/
//! `CompiledMethod` entries on `CompiledModule.classes`), not inline
//! bytecode -- the module body only carries a name-string constant, a
//! `CLASS`/`EXTERN_CLASS` fixup opcode, and (for non-extern classes) an
//! `END_CLASS` fixup. So unlike a plain function, a class comes into
//! being here, in the loader, before the module body ever runs: each
//! `CompiledClass` is built into a `ClassObj` with its superclass
//! resolved and its methods compiled and installed, then immediately
//! bound to its pre-declared module variable. By the time the
//! interpreter executes `CLASS`/`EndClass` for that declaration, the
//! class value already exists and those opcodes are simple stack
//! fixups (see `djuru_core::opcode`).

use std::ptr::NonNull;

use djuru_compiler::types::{
    CompiledClass, CompiledFunction, CompiledMethod, CompiledModule, ConstantValue, MethodKind,
};
use djuru_core::{ObjHeader, Opcode, SymbolTable, Value};

use crate::config::Config;
use crate::heap::Heap;
use crate::object::{ClassObj, ClosureObj, FunctionObj, MethodImpl, ModuleObj};

/// Resolves `function`'s constant pool and allocates a `FunctionObj` for
/// it, recursing into any nested `ConstantValue::Function` constants
/// (one per closure literal appearing in its body).
pub fn load_function(heap: &mut Heap, module: Value, function: &CompiledFunction) -> NonNull<ObjHeader> {
    let mut constants = Vec::with_capacity(function.constants.len());
    for constant in &function.constants {
        let value = match constant {
            ConstantValue::Number(n) => Value::number(*n),
            ConstantValue::String(s) => {
                let obj = heap.allocate(crate::object::StringObj::new(s.clone()), s.len() + 24);
                Value::from_obj(obj)
            }
            ConstantValue::Function(nested) => {
                let obj = load_function(heap, module, nested);
                Value::from_obj(obj)
            }
            // Overwritten by `bind_method_code` once the enclosing
            // class's superclass is resolved; `Value::NULL` until then.
            ConstantValue::Null => Value::NULL,
        };
        constants.push(value);
    }

    let obj = FunctionObj::new(
        function.name.clone().into_boxed_str(),
        function.arity,
        function.code.clone().into_boxed_slice(),
        function.lines.clone().into_boxed_slice(),
        constants.into_boxed_slice(),
        function.upvalues.clone().into_boxed_slice(),
        function.max_slots,
        module,
    );
    heap.allocate(obj, 64 + function.code.len())
}

/// Builds the `ModuleObj` for `compiled` (its variable slots pre-sized
/// and named, each initialized to `undefined` until the module body or
/// a class binding actually assigns them), binds every declared class
/// (spec §4.7), and returns the module together with the zero-upvalue
/// closure over its body, ready for the interpreter to call.
pub fn load_module(
    heap: &mut Heap,
    compiled: &CompiledModule,
    symbols: &mut SymbolTable,
    mut config: Option<&mut Config>,
) -> (NonNull<ObjHeader>, NonNull<ObjHeader>) {
    let module_obj = ModuleObj::new(compiled.name.clone().into_boxed_str());
    for name in &compiled.module_vars {
        module_obj.declare(name, Value::UNDEFINED);
    }
    let module_ptr = heap.allocate(module_obj, 64 + compiled.module_vars.len() * 8);
    let module_value = Value::from_obj(module_ptr);
    let module_obj = unsafe { &*module_ptr.cast::<ModuleObj>().as_ptr() };

    for class in &compiled.classes {
        let class_ptr = bind_class(heap, module_value, module_obj, class, symbols, config.as_deref_mut(), &compiled.name);
        if let Some(index) = module_obj.find(&class.name) {
            module_obj.set(index, Value::from_obj(class_ptr));
        }
    }

    let function_ptr = load_function(heap, module_value, &compiled.body);
    let closure = ClosureObj::new(function_ptr, Box::new([]));
    let closure_ptr = heap.allocate(closure, 32);

    (module_ptr, closure_ptr)
}

/// Builds one `CompiledClass` into a `ClassObj`: resolves the superclass
/// by name against already-bound module variables, compiles each
/// method's body, and installs it into the instance or static method
/// table (spec §4.7's single-inheritance, two-table -- instance and
/// static -- dispatch model).
fn bind_class(
    heap: &mut Heap,
    module_value: Value,
    module_obj: &ModuleObj,
    class: &CompiledClass,
    symbols: &mut SymbolTable,
    mut config: Option<&mut Config>,
    module_name: &str,
) -> NonNull<ObjHeader> {
    let superclass_ptr = class.superclass_name.as_deref().and_then(|name| {
        let index = module_obj.find(name)?;
        module_obj.get(index).as_obj()
    });
    let superclass_field_count = superclass_ptr
        .map(|ptr| unsafe { &*ptr.cast::<ClassObj>().as_ptr() }.field_count())
        .unwrap_or(0);
    let superclass_value = superclass_ptr.map(Value::from_obj).unwrap_or(Value::NULL);

    let class_obj = ClassObj::new(class.name.clone().into_boxed_str(), class.is_extern);
    class_obj.set_superclass(superclass_ptr);
    class_obj.set_field_count(superclass_field_count + class.field_count);
    if class.is_extern {
        if let Some(config) = config.as_deref_mut() {
            if let Some((allocate, finalizer)) = config.bind_extern_class(module_name, &class.name) {
                class_obj.set_extern_allocate(allocate, finalizer);
            }
        }
    }
    let class_ptr = heap.allocate(class_obj, 128 + class.methods.len() * 16);

    for method in &class.methods {
        bind_method(
            heap,
            module_value,
            class_ptr,
            superclass_field_count,
            superclass_value,
            method,
            symbols,
            config.as_deref_mut(),
            module_name,
            &class.name,
        );
    }

    class_ptr
}

/// Compiles and installs one method. `Construct` methods are installed
/// twice: under their `"init name(...)"` signature in the instance
/// table (so `super.init ...(...)` chaining finds the body), and again
/// under the bare, unprefixed signature in the static table as
/// `MethodImpl::Construct` (so `ClassName.new(...)`, which the compiler
/// dispatches as an ordinary call against the class value, allocates a
/// fresh instance before running that same body).
#[allow(clippy::too_many_arguments)]
fn bind_method(
    heap: &mut Heap,
    module_value: Value,
    class_ptr: NonNull<ObjHeader>,
    superclass_field_count: u16,
    superclass_value: Value,
    method: &CompiledMethod,
    symbols: &mut SymbolTable,
    config: Option<&mut Config>,
    module_name: &str,
    class_name: &str,
) {
    let class = unsafe { &*class_ptr.cast::<ClassObj>().as_ptr() };

    // `new`/`init ...` bodies still compile to ordinary bytecode even on
    // an extern class (spec's supplemented extern-class surface): only
    // its *other* methods are empty placeholders the host must bind.
    if class.is_extern && method.kind != MethodKind::Construct {
        if let Some(config) = config {
            let is_static = method.kind == MethodKind::Static;
            if let Some(primitive) = config.bind_extern_method(module_name, class_name, is_static, &method.signature) {
                if is_static {
                    class.set_static_method(method.symbol, MethodImpl::Extern(primitive));
                } else {
                    class.set_method(method.symbol, MethodImpl::Extern(primitive));
                }
            }
        }
        return;
    }

    let function_ptr = load_function(heap, module_value, &method.function);
    bind_method_code(function_ptr, superclass_field_count, superclass_value);
    let closure = ClosureObj::new(function_ptr, Box::new([]));
    let closure_ptr = heap.allocate(closure, 32);

    match method.kind {
        MethodKind::Instance => class.set_method(method.symbol, MethodImpl::Block(closure_ptr)),
        MethodKind::Static => class.set_static_method(method.symbol, MethodImpl::Block(closure_ptr)),
        MethodKind::Construct => {
            class.set_method(method.symbol, MethodImpl::Block(closure_ptr));
            let bare = method.signature.strip_prefix("init ").unwrap_or(&method.signature);
            let bare_symbol = symbols.intern(bare);
            class.set_static_method(bare_symbol, MethodImpl::Construct(closure_ptr));
        }
    }
}

/// Walks a method's bytecode once, mirroring the reference VM's
/// `bindMethodCode`: shifts every `LOAD_FIELD_THIS`/`STORE_FIELD_THIS`
/// operand down past the inherited fields, patches each reserved
/// `SUPER_n` constant slot with the resolved superclass, and recurses
/// into any nested closures (since a block literal inside a method can
/// itself reference `this`'s fields or call `super`).
fn bind_method_code(function_ptr: NonNull<ObjHeader>, field_count: u16, superclass: Value) {
    // SAFETY: this runs immediately after `load_function` allocated
    // `function_ptr` and before anything else can reach it, so taking a
    // unique reference here does not alias any other live borrow.
    let function = unsafe { &mut *function_ptr.cast::<FunctionObj>().as_ptr() };
    let code_len = function.code.len();
    let mut ip = 0usize;
    while ip < code_len {
        let op = Opcode::from_u8(function.code[ip]).expect("well-formed bytecode");
        ip += 1;
        if op.is_direct_call() {
            ip += 2;
            continue;
        }
        if op.is_direct_super() {
            let slot = u16::from_be_bytes([function.code[ip + 2], function.code[ip + 3]]) as usize;
            function.patch_constant(slot, superclass);
            ip += 4;
            continue;
        }
        match op {
            Opcode::Constant
            | Opcode::LoadModuleVar
            | Opcode::StoreModuleVar
            | Opcode::Jump
            | Opcode::Loop
            | Opcode::JumpIf
            | Opcode::And
            | Opcode::Or
            | Opcode::ImportModule
            | Opcode::ImportVariable
            | Opcode::Call => {
                ip += if op == Opcode::Call { 4 } else { 2 };
            }
            Opcode::LoadLocal | Opcode::StoreLocal | Opcode::LoadUpvalue | Opcode::StoreUpvalue | Opcode::CloseUpvalue => {
                ip += 1;
            }
            Opcode::LoadFieldThis | Opcode::StoreFieldThis => {
                function.code[ip] = function.code[ip].wrapping_add(field_count as u8);
                ip += 1;
            }
            Opcode::Closure => {
                let const_idx = u16::from_be_bytes([function.code[ip], function.code[ip + 1]]) as usize;
                ip += 2;
                let nested_value = function.constant(const_idx);
                if let Some(nested_ptr) = nested_value.as_obj() {
                    bind_method_code(nested_ptr, field_count, superclass);
                    let nested = unsafe { &*nested_ptr.cast::<FunctionObj>().as_ptr() };
                    ip += 2 * nested.upvalue_count();
                }
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use djuru_core::ObjKind;

    #[test]
    fn loads_empty_module_into_a_callable_closure() {
        let mut symbols = SymbolTable::new();
        let compiled = djuru_compiler::compile_module("", "main", &mut symbols).unwrap();
        let mut heap = Heap::new();
        let (module_ptr, closure_ptr) = load_module(&mut heap, &compiled, &mut symbols, None);
        assert_eq!(unsafe { module_ptr.as_ref() }.kind, ObjKind::Module);
        assert_eq!(unsafe { closure_ptr.as_ref() }.kind, ObjKind::Closure);
    }

    #[test]
    fn binds_a_class_declaration_before_the_body_runs() {
        let mut symbols = SymbolTable::new();
        let source = "kulu Point {\n  dilan new() {}\n  x { 0 }\n}\n";
        let compiled = djuru_compiler::compile_module(source, "main", &mut symbols).unwrap();
        let mut heap = Heap::new();
        let (module_ptr, _closure_ptr) = load_module(&mut heap, &compiled, &mut symbols, None);
        let module = unsafe { &*module_ptr.cast::<ModuleObj>().as_ptr() };
        let index = module.find("Point").expect("Point should be a declared module var");
        let class_value = module.get(index);
        assert_eq!(class_value.obj_kind(), Some(ObjKind::Class));
        let class_ptr = class_value.as_obj().unwrap();
        let class = unsafe { &*class_ptr.cast::<ClassObj>().as_ptr() };
        assert_eq!(class.field_count(), 0);
        let new_symbol = symbols.find("new()").expect("new() should be interned");
        assert!(matches!(class.static_method(new_symbol), MethodImpl::Construct(_)));
    }

    #[test]
    fn subclass_fields_are_shifted_past_the_superclass() {
        let mut symbols = SymbolTable::new();
        let source = "kulu Base {\n  dilan new() {}\n  a=(v) { _a = v }\n}\nkulu Sub ye Base {\n  dilan new() {}\n  b=(v) { _b = v }\n}\n";
        let compiled = djuru_compiler::compile_module(source, "main", &mut symbols).unwrap();
        let mut heap = Heap::new();
        let (module_ptr, _closure_ptr) = load_module(&mut heap, &compiled, &mut symbols, None);
        let module = unsafe { &*module_ptr.cast::<ModuleObj>().as_ptr() };
        let sub_index = module.find("Sub").unwrap();
        let sub_ptr = module.get(sub_index).as_obj().unwrap();
        let sub = unsafe { &*sub_ptr.cast::<ClassObj>().as_ptr() };
        assert_eq!(sub.field_count(), 2);
        assert!(sub.superclass().is_some());
    }
}
