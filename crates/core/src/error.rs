//! Error taxonomy shared by the compiler and the VM.
//!
//! Kept as a plain enum with a hand-rolled `Display`, matching the
//! teacher's low-dependency error style (see `error.rs` in the teacher's
//! runtime crate) rather than pulling in `thiserror`. Unlike the teacher
//! (which reports errors through thread-local FFI state because its
//! generated code calls back into Rust across an LLVM boundary), this VM
//! is a single in-process `Result`-returning API, so errors are ordinary
//! values, not thread-locals.

use std::fmt;

/// A compile-time diagnostic: module name, 1-based source line, message.
/// Multiple may accumulate for one `compile()` call (see §4.1: lexer
/// errors never abort parsing), but if any are produced no bytecode is
/// emitted for that function.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompileError {
    pub module: String,
    pub line: u32,
    pub message: String,
}

impl fmt::Display for CompileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}: {}", self.module, self.line, self.message)
    }
}

impl std::error::Error for CompileError {}

/// A non-recoverable condition from spec §7: these are reported as
/// compile errors where possible (limits exceeded at compile time), or
/// otherwise abort the current `interpret` call immediately.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FatalCause {
    MaxLocalsExceeded,
    MaxUpvaluesExceeded,
    MaxConstantsExceeded,
    MaxFieldsExceeded,
    MaxModuleVarsExceeded,
    MaxParametersExceeded,
    JumpTooLarge,
    InterpolationTooDeep,
    OutOfMemory,
}

impl fmt::Display for FatalCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            FatalCause::MaxLocalsExceeded => "too many local variables in one function",
            FatalCause::MaxUpvaluesExceeded => "too many closed-over variables in one function",
            FatalCause::MaxConstantsExceeded => "too many constants in one function",
            FatalCause::MaxFieldsExceeded => "too many fields across a class hierarchy",
            FatalCause::MaxModuleVarsExceeded => "too many module-level variables",
            FatalCause::MaxParametersExceeded => "too many parameters in a method signature",
            FatalCause::JumpTooLarge => "jump offset too large to encode",
            FatalCause::InterpolationTooDeep => "string interpolation nested too deeply",
            FatalCause::OutOfMemory => "allocator returned null",
        };
        f.write_str(msg)
    }
}

impl std::error::Error for FatalCause {}

/// The top-level error type threaded through compilation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VmError {
    Compile(CompileError),
    Fatal(FatalCause),
}

impl fmt::Display for VmError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VmError::Compile(e) => write!(f, "{e}"),
            VmError::Fatal(cause) => write!(f, "fatal: {cause}"),
        }
    }
}

impl std::error::Error for VmError {}

impl From<CompileError> for VmError {
    fn from(e: CompileError) -> Self {
        VmError::Compile(e)
    }
}

impl From<FatalCause> for VmError {
    fn from(cause: FatalCause) -> Self {
        VmError::Fatal(cause)
    }
}

/// Result of a top-level `interpret()` call, mirroring
/// `RESULT_COMPILATION_ERROR` / `RESULT_RUNTIME_ERROR` from spec §6.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InterpretResult {
    Success,
    CompileError,
    RuntimeError,
}
