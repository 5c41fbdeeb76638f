//! Host configuration (spec §6): the callbacks an embedder supplies to
//! customize output, module resolution/loading, and extern-method/class
//! binding. Grounded on `original_source/src/api/msc.h`'s `MSCConfig`
//! and its `MSCWriteFn`/`MSCResolveModuleFn`/`MSCLoadModuleFn`/
//! `MSCBindExternMethodFn`/`MSCBindExternClassFn`/`MSCErrorHandler`
//! typedefs, expressed as boxed `Fn`/`FnMut` trait objects instead of
//! raw function pointers plus a `void *userData` -- a host closure
//! already captures whatever state it needs.

use std::any::Any;

use crate::object::{Finalizer, PrimitiveFn};

/// Builds one extern instance's opaque payload. Unlike `PrimitiveFn`,
/// this needs no heap/value access -- mosc's `MSCForeignMethodFn`
/// allocate callback only ever initializes its own payload struct, never
/// touches other Djuru values, so a bare `fn() -> Box<dyn Any>` is this
/// VM's equivalent instead of threading slot-write access through here.
pub type ExternAllocateFn = fn() -> Box<dyn Any>;

/// Mirrors `MSCError`: where a reported failure came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Compile,
    Runtime,
    /// One frame of an uncaught runtime error's stack trace; the host's
    /// error handler is invoked once per frame, innermost first, after
    /// the initial `Runtime` report.
    StackTrace,
}

pub type WriteFn = Box<dyn FnMut(&str)>;
pub type ErrorFn = Box<dyn FnMut(ErrorKind, Option<&str>, i32, &str)>;
pub type ResolveModuleFn = Box<dyn FnMut(&str, &str) -> Option<String>>;
pub type LoadModuleFn = Box<dyn FnMut(&str) -> Option<String>>;
pub type BindExternMethodFn = Box<dyn FnMut(&str, &str, bool, &str) -> Option<PrimitiveFn>>;
pub type BindExternClassFn = Box<dyn FnMut(&str, &str) -> Option<(ExternAllocateFn, Option<Finalizer>)>>;

/// Every field is optional; an unset callback degrades the same way the
/// reference does with a `NULL` function pointer (`writeFn == NULL`
/// discards printed text; an unresolved `resolveModuleFn` falls back to
/// the requested name unchanged).
pub struct Config {
    write_fn: Option<WriteFn>,
    error_fn: Option<ErrorFn>,
    resolve_module_fn: Option<ResolveModuleFn>,
    load_module_fn: Option<LoadModuleFn>,
    bind_extern_method_fn: Option<BindExternMethodFn>,
    bind_extern_class_fn: Option<BindExternClassFn>,
    pub min_heap_size: usize,
    pub initial_heap_size: usize,
    pub heap_growth_percent: u32,
}

impl Default for Config {
    fn default() -> Config {
        use djuru_core::limits::{DEFAULT_HEAP_GROWTH_PERCENT, DEFAULT_INITIAL_HEAP_SIZE, DEFAULT_MIN_HEAP_SIZE};
        Config {
            write_fn: None,
            error_fn: None,
            resolve_module_fn: None,
            load_module_fn: None,
            bind_extern_method_fn: None,
            bind_extern_class_fn: None,
            min_heap_size: DEFAULT_MIN_HEAP_SIZE,
            initial_heap_size: DEFAULT_INITIAL_HEAP_SIZE,
            heap_growth_percent: DEFAULT_HEAP_GROWTH_PERCENT,
        }
    }
}

impl Config {
    #[must_use]
    pub fn new() -> Config {
        Config::default()
    }

    #[must_use]
    pub fn with_min_heap_size(mut self, bytes: usize) -> Config {
        self.min_heap_size = bytes;
        self
    }

    #[must_use]
    pub fn with_initial_heap_size(mut self, bytes: usize) -> Config {
        self.initial_heap_size = bytes;
        self
    }

    #[must_use]
    pub fn with_heap_growth_percent(mut self, percent: u32) -> Config {
        self.heap_growth_percent = percent;
        self
    }

    #[must_use]
    pub fn with_write_fn(mut self, f: impl FnMut(&str) + 'static) -> Config {
        self.write_fn = Some(Box::new(f));
        self
    }

    #[must_use]
    pub fn with_error_fn(mut self, f: impl FnMut(ErrorKind, Option<&str>, i32, &str) + 'static) -> Config {
        self.error_fn = Some(Box::new(f));
        self
    }

    #[must_use]
    pub fn with_resolve_module_fn(mut self, f: impl FnMut(&str, &str) -> Option<String> + 'static) -> Config {
        self.resolve_module_fn = Some(Box::new(f));
        self
    }

    #[must_use]
    pub fn with_load_module_fn(mut self, f: impl FnMut(&str) -> Option<String> + 'static) -> Config {
        self.load_module_fn = Some(Box::new(f));
        self
    }

    #[must_use]
    pub fn with_bind_extern_method_fn(mut self, f: impl FnMut(&str, &str, bool, &str) -> Option<PrimitiveFn> + 'static) -> Config {
        self.bind_extern_method_fn = Some(Box::new(f));
        self
    }

    #[must_use]
    pub fn with_bind_extern_class_fn(mut self, f: impl FnMut(&str, &str) -> Option<(ExternAllocateFn, Option<Finalizer>)> + 'static) -> Config {
        self.bind_extern_class_fn = Some(Box::new(f));
        self
    }

    /// `A.seben_(_)`'s destination; text is discarded if no write
    /// callback was configured.
    pub fn write(&mut self, text: &str) {
        if let Some(f) = self.write_fn.as_mut() {
            f(text);
        }
    }

    pub fn report_error(&mut self, kind: ErrorKind, module: Option<&str>, line: i32, message: &str) {
        if let Some(f) = self.error_fn.as_mut() {
            f(kind, module, line, message);
        }
    }

    /// Canonicalizes an import name relative to its importing module;
    /// `None` from the host (or no callback at all) means "use the
    /// requested name unchanged".
    #[must_use]
    pub fn resolve_module(&mut self, importer: &str, name: &str) -> String {
        self.resolve_module_fn.as_mut().and_then(|f| f(importer, name)).unwrap_or_else(|| name.to_string())
    }

    #[must_use]
    pub fn load_module(&mut self, name: &str) -> Option<String> {
        self.load_module_fn.as_mut().and_then(|f| f(name))
    }

    #[must_use]
    pub fn bind_extern_method(&mut self, module: &str, class_name: &str, is_static: bool, signature: &str) -> Option<PrimitiveFn> {
        self.bind_extern_method_fn.as_mut().and_then(|f| f(module, class_name, is_static, signature))
    }

    #[must_use]
    pub fn bind_extern_class(&mut self, module: &str, class_name: &str) -> Option<(ExternAllocateFn, Option<Finalizer>)> {
        self.bind_extern_class_fn.as_mut().and_then(|f| f(module, class_name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_engine_limits() {
        use djuru_core::limits::{DEFAULT_HEAP_GROWTH_PERCENT, DEFAULT_INITIAL_HEAP_SIZE, DEFAULT_MIN_HEAP_SIZE};
        let config = Config::new();
        assert_eq!(config.min_heap_size, DEFAULT_MIN_HEAP_SIZE);
        assert_eq!(config.initial_heap_size, DEFAULT_INITIAL_HEAP_SIZE);
        assert_eq!(config.heap_growth_percent, DEFAULT_HEAP_GROWTH_PERCENT);
    }

    #[test]
    fn builders_override_heap_policy() {
        let config = Config::new().with_min_heap_size(1024).with_initial_heap_size(2048).with_heap_growth_percent(75);
        assert_eq!(config.min_heap_size, 1024);
        assert_eq!(config.initial_heap_size, 2048);
        assert_eq!(config.heap_growth_percent, 75);
    }

    #[test]
    fn unset_write_fn_silently_discards_output() {
        let mut config = Config::new();
        config.write("discarded");
    }

    #[test]
    fn resolve_module_falls_back_to_the_requested_name() {
        let mut config = Config::new();
        assert_eq!(config.resolve_module("main", "./util"), "./util");
    }

    #[test]
    fn resolve_module_uses_the_configured_callback() {
        let mut config = Config::new().with_resolve_module_fn(|_importer, name| Some(format!("resolved/{name}")));
        assert_eq!(config.resolve_module("main", "util"), "resolved/util");
    }
}
