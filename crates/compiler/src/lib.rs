//! Djuru Compiler: lexer, Pratt parser, and single-pass bytecode emitter.
//!
//! The public entry point is [`compile_module`], which turns one source
//! file into a [`types::CompiledModule`] -- a representation-agnostic
//! tree that `djuru-vm` turns into real heap objects (functions,
//! closures, classes) during module load, and then runs through the
//! class-binding pass described in spec §4.2 before first use.

pub mod compiler;
pub mod lexer;
pub mod signature;
pub mod token;
pub mod types;

use djuru_core::error::CompileError;
use djuru_core::symbol::SymbolTable;

pub use compiler::Compiler;
pub use types::CompiledModule;

/// Compiles one module's source text.
///
/// `symbols` is the VM-global method symbol table (spec §4.2: "All
/// method names across the VM share a single monotonic symbol table");
/// it is threaded through so method signatures seen during compilation
/// share interned slots with primitives bound directly by the VM.
pub fn compile_module(
    source: &str,
    module_name: &str,
    symbols: &mut SymbolTable,
) -> Result<CompiledModule, Vec<CompileError>> {
    tracing::debug!(module = module_name, "compiling module");
    Compiler::new(source, module_name, symbols).compile()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compiles_empty_module() {
        let mut symbols = SymbolTable::new();
        let module = compile_module("", "main", &mut symbols).expect("compiles");
        assert_eq!(module.name, "main");
    }

    #[test]
    fn compiles_var_declaration_and_arithmetic() {
        let mut symbols = SymbolTable::new();
        let module = compile_module("nin x = 1 + 2\n", "main", &mut symbols).expect("compiles");
        assert!(!module.body.code.is_empty());
    }

    #[test]
    fn compiles_function_declaration() {
        let mut symbols = SymbolTable::new();
        let src = "tii add(a, b) {\n  segin a + b\n}\n";
        let module = compile_module(src, "main", &mut symbols).expect("compiles");
        assert!(module
            .body
            .constants
            .iter()
            .any(|c| matches!(c, types::ConstantValue::Function(_))));
    }

    #[test]
    fn compiles_class_with_field_and_method() {
        let mut symbols = SymbolTable::new();
        let src = "kulu Point {\n  dilan new(x, y) {\n    _x = x\n    _y = y\n  }\n  x { _x }\n}\n";
        let module = compile_module(src, "main", &mut symbols).expect("compiles");
        assert_eq!(module.classes.len(), 1);
        let point = &module.classes[0];
        assert_eq!(point.field_count, 2);
        assert!(point.methods.iter().any(|m| m.signature == "init new(_,_)"));
        assert!(point.methods.iter().any(|m| m.signature == "x()"));
    }

    #[test]
    fn reports_syntax_errors() {
        let mut symbols = SymbolTable::new();
        let errors = compile_module("nin = \n", "main", &mut symbols).unwrap_err();
        assert!(!errors.is_empty());
    }
}
