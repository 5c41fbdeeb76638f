//! A plain tagged-union `Value`, compiled in instead of [`crate::value`]
//! when the `tagged-repr` feature is enabled.
//!
//! Spec §9: "NaN-boxed values are a performance choice, not a correctness
//! requirement: provide an alternative tagged-union representation behind
//! a compile-time switch so tests can run without bit tricks." This type
//! offers the exact same public surface as the boxed `Value` so the rest
//! of the VM is written once against either representation.

use std::fmt;
use std::ptr::NonNull;

pub use crate::header::{ObjHeader, ObjKind};

#[derive(Clone, Copy, PartialEq)]
pub enum Value {
    Null,
    Undefined,
    Bool(bool),
    /// The distinguished `Num.nan` singleton (compares equal to itself,
    /// unlike an ordinary arithmetic NaN).
    NanSingleton,
    Number(f64),
    Obj(NonNull<ObjHeader>),
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "Value::Null"),
            Value::Undefined => write!(f, "Value::Undefined"),
            Value::Bool(b) => write!(f, "Value::Bool({b})"),
            Value::NanSingleton => write!(f, "Value::Nan"),
            Value::Number(n) => write!(f, "Value::Number({n})"),
            Value::Obj(p) => write!(f, "Value::Obj({:p})", p.as_ptr()),
        }
    }
}

impl Value {
    pub const NULL: Value = Value::Null;
    pub const TRUE: Value = Value::Bool(true);
    pub const FALSE: Value = Value::Bool(false);
    pub const UNDEFINED: Value = Value::Undefined;
    pub const NAN: Value = Value::NanSingleton;

    #[must_use]
    pub fn number(n: f64) -> Value {
        if n.is_nan() {
            // Any arithmetic NaN collapses to one canonical form, kept
            // distinct from the `NAN` singleton by variant, not by bits.
            return Value::Number(f64::NAN);
        }
        Value::Number(n)
    }

    #[must_use]
    pub fn boolean(b: bool) -> Value {
        Value::Bool(b)
    }

    #[must_use]
    pub fn from_obj(ptr: NonNull<ObjHeader>) -> Value {
        Value::Obj(ptr)
    }

    #[must_use]
    pub fn is_number(self) -> bool {
        matches!(self, Value::Number(_))
    }

    #[must_use]
    pub fn as_number(self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(n),
            _ => None,
        }
    }

    #[must_use]
    pub fn is_null(self) -> bool {
        matches!(self, Value::Null)
    }

    #[must_use]
    pub fn is_undefined(self) -> bool {
        matches!(self, Value::Undefined)
    }

    #[must_use]
    pub fn is_bool(self) -> bool {
        matches!(self, Value::Bool(_))
    }

    #[must_use]
    pub fn as_bool(self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(b),
            _ => None,
        }
    }

    #[must_use]
    pub fn is_falsey(self) -> bool {
        matches!(self, Value::Null | Value::Bool(false))
    }

    #[must_use]
    pub fn is_obj(self) -> bool {
        matches!(self, Value::Obj(_))
    }

    #[must_use]
    pub fn as_obj(self) -> Option<NonNull<ObjHeader>> {
        match self {
            Value::Obj(p) => Some(p),
            _ => None,
        }
    }

    #[must_use]
    pub fn obj_kind(self) -> Option<ObjKind> {
        // SAFETY: the pointer is only ever constructed by `from_obj` from
        // a live heap allocation owned by the VM's heap.
        self.as_obj().map(|p| unsafe { p.as_ref() }.kind)
    }

    #[must_use]
    pub fn is_identical(self, other: Value) -> bool {
        match (self, other) {
            (Value::Null, Value::Null)
            | (Value::Undefined, Value::Undefined)
            | (Value::NanSingleton, Value::NanSingleton) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Number(a), Value::Number(b)) => a.to_bits() == b.to_bits(),
            (Value::Obj(a), Value::Obj(b)) => a == b,
            _ => false,
        }
    }

    #[must_use]
    pub fn primitive_hash(self) -> Option<u64> {
        match self {
            Value::Null => Some(1),
            Value::Undefined => Some(2),
            Value::NanSingleton => Some(3),
            Value::Bool(b) => Some(if b { 4 } else { 5 }),
            Value::Number(n) => Some(n.to_bits()),
            Value::Obj(_) => None,
        }
    }
}
