//! Compile-time engine limits.
//!
//! Values here are taken from the reference implementation's
//! `common/constants.h` rather than re-derived; changing them changes
//! wire-compatible behavior of compiled functions (constant pool index
//! width, jump offset width, etc).

/// Maximum number of locals live in a single function at once.
pub const MAX_LOCALS: usize = 256;

/// Maximum number of upvalues a single closure may capture.
pub const MAX_UPVALUES: usize = 256;

/// Maximum number of parameters (and call arguments) a method may take.
pub const MAX_PARAMETERS: usize = 16;

/// Arities above this use the generic `CALL`/`SUPER` opcodes with an
/// explicit 16-bit arity operand instead of a dedicated `CALL_n`.
pub const MAX_DIRECT_CALL_ARITY: u8 = 16;

/// Maximum forward/backward jump distance encodable in a 16-bit operand.
pub const MAX_JUMP: usize = 1 << 16;

/// Maximum number of entries in a function's constant pool.
pub const MAX_CONSTANTS: usize = 1 << 16;

/// Maximum number of module-level variables in a single module.
pub const MAX_MODULE_VARS: usize = 1 << 16;

/// Maximum number of fields across a class and all its superclasses.
pub const MAX_FIELDS: usize = 1 << 16;

/// Maximum nesting depth of `${ ... }` string interpolation.
pub const MAX_INTERPOLATION_NESTING: usize = 8;

/// Map load factor numerator (load factor <= this / 100).
pub const MAP_LOAD_PERCENT: usize = 90;

/// Map capacity growth multiplier when load factor is exceeded.
pub const MAP_GROW_FACTOR: usize = 2;

/// Minimum map capacity (always a power of two).
pub const MAP_MIN_CAPACITY: usize = 16;

/// List buffer growth multiplier.
pub const LIST_GROW_FACTOR: usize = 2;

/// Size of the collector's explicit LIFO temp-roots stack.
pub const MAX_TEMP_ROOTS: usize = 8;

/// Default heap growth-policy values (see `djuru_vm::config::Config`).
pub const DEFAULT_MIN_HEAP_SIZE: usize = 1024 * 1024;
pub const DEFAULT_INITIAL_HEAP_SIZE: usize = 10 * 1024 * 1024;
pub const DEFAULT_HEAP_GROWTH_PERCENT: u32 = 50;
