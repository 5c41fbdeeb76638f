//! The NaN-boxed `Value` representation (spec §3 "Value").
//!
//! This crate only knows about the *header* of a heap object (`ObjHeader`)
//! and a type tag (`ObjKind`); the concrete per-kind payloads (String,
//! Class, Closure, ...) are defined in `djuru-vm`, which lays each one out
//! as a `#[repr(C)]` struct whose first field is an `ObjHeader`. That lets
//! this crate hand out an opaque `NonNull<ObjHeader>` and the VM crate cast
//! it back to the concrete type once it has checked `ObjHeader::kind` --
//! the same "inheritance by first field" trick the reference C
//! implementation uses (`Object` as the first member of every struct in
//! `memory/Value.h`), just expressed with a Rust enum tag instead of a C
//! union of structs.
//!
//! # Encoding
//!
//! A `u64` is a normal IEEE-754 double unless its bits fall in the quiet-
//! NaN space (exponent all ones, quiet bit set). Within that space:
//! - the **sign bit clear** means a singleton, tagged in the low 3 bits
//!   of the payload (null / true / false / undefined / the `Num.nan`
//!   singleton);
//! - the **sign bit set** means a heap pointer, with the full 48-bit
//!   payload holding the pointer (no further tag needed -- the sign bit
//!   alone distinguishes "pointer" from "singleton").
//!
//! This mirrors the reference VM's NaN-boxing rather than the teacher
//! workspace's tag layout (which reserves a 4-bit tag purely for its own
//! fixed set of boxed kinds); the scheme here instead keeps the full
//! 48-bit payload free for pointers, which real heap addresses need.

use std::fmt;
use std::ptr::NonNull;

pub use crate::header::{ObjHeader, ObjKind};

// ---------------------------------------------------------------------
// NaN-boxed encoding
// ---------------------------------------------------------------------

/// Exponent-all-ones + quiet bit, sign bit clear. Any value with these
/// bits set (regardless of the rest) is either a boxed singleton or an
/// ordinary quiet NaN we've chosen to canonicalize away from.
const QNAN: u64 = 0x7ffc_0000_0000_0000;
const SIGN_BIT: u64 = 0x8000_0000_0000_0000;

/// Mask for the 48-bit pointer payload.
const POINTER_MASK: u64 = 0x0000_ffff_ffff_ffff;

/// Mask for the 3-bit singleton tag (payload bits 0-2).
const SINGLETON_TAG_MASK: u64 = 0x7;

const TAG_NULL: u64 = 1;
const TAG_FALSE: u64 = 2;
const TAG_TRUE: u64 = 3;
const TAG_UNDEFINED: u64 = 4;
const TAG_NAN_SINGLETON: u64 = 5;

/// Canonical positive quiet NaN used for the result of float operations
/// that produce NaN (tag 0, unused by any singleton), so arithmetic NaNs
/// are never confused with `Value::NAN` (which compares equal to itself
/// by identity; see spec §8 Boundaries).
const CANONICAL_ARITH_NAN: u64 = QNAN;

#[derive(Clone, Copy, PartialEq)]
pub struct Value(u64);

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(n) = self.as_number() {
            write!(f, "Value::Number({n})")
        } else if self.is_null() {
            write!(f, "Value::Null")
        } else if self.is_undefined() {
            write!(f, "Value::Undefined")
        } else if let Some(b) = self.as_bool() {
            write!(f, "Value::Bool({b})")
        } else if self == Value::NAN {
            write!(f, "Value::Nan")
        } else if self.is_obj() {
            write!(f, "Value::Obj({:p})", self.as_obj().unwrap().as_ptr())
        } else {
            write!(f, "Value(0x{:016x})", self.0)
        }
    }
}

impl Value {
    pub const NULL: Value = Value(QNAN | TAG_NULL);
    pub const TRUE: Value = Value(QNAN | TAG_TRUE);
    pub const FALSE: Value = Value(QNAN | TAG_FALSE);
    /// Used only as a sentinel for absent map entries and uninitialized
    /// module slots; never produced by user code directly.
    pub const UNDEFINED: Value = Value(QNAN | TAG_UNDEFINED);
    pub const NAN: Value = Value(QNAN | TAG_NAN_SINGLETON);

    #[must_use]
    pub fn number(n: f64) -> Value {
        if n.is_nan() {
            // Canonicalize so every arithmetic-produced NaN shares one
            // bit pattern, distinct from the `Value::NAN` singleton.
            return Value(CANONICAL_ARITH_NAN);
        }
        Value(n.to_bits())
    }

    #[must_use]
    pub fn boolean(b: bool) -> Value {
        if b {
            Value::TRUE
        } else {
            Value::FALSE
        }
    }

    /// Build a `Value` from an object pointer. The pointer must remain
    /// valid for as long as this `Value` (or any copy of it) is
    /// reachable -- enforcing that is the collector's job, not this
    /// type's; this constructor is safe to call but the resulting
    /// `Value` carries the same aliasing obligations as the raw pointer.
    #[must_use]
    pub fn from_obj(ptr: NonNull<ObjHeader>) -> Value {
        let addr = ptr.as_ptr() as u64;
        debug_assert_eq!(addr & !POINTER_MASK, 0, "pointer does not fit in 48 bits");
        Value(SIGN_BIT | QNAN | (addr & POINTER_MASK))
    }

    #[must_use]
    pub fn is_number(self) -> bool {
        (self.0 & QNAN) != QNAN
    }

    #[must_use]
    pub fn as_number(self) -> Option<f64> {
        self.is_number().then(|| f64::from_bits(self.0))
    }

    #[must_use]
    pub fn is_null(self) -> bool {
        self == Value::NULL
    }

    #[must_use]
    pub fn is_undefined(self) -> bool {
        self == Value::UNDEFINED
    }

    #[must_use]
    pub fn is_bool(self) -> bool {
        self == Value::TRUE || self == Value::FALSE
    }

    #[must_use]
    pub fn as_bool(self) -> Option<bool> {
        if self == Value::TRUE {
            Some(true)
        } else if self == Value::FALSE {
            Some(false)
        } else {
            None
        }
    }

    /// Only `null` and `false` are falsey; everything else (including
    /// `0`, `""`, and `undefined`) is truthy.
    #[must_use]
    pub fn is_falsey(self) -> bool {
        self.is_null() || self == Value::FALSE
    }

    #[must_use]
    pub fn is_obj(self) -> bool {
        (self.0 & (QNAN | SIGN_BIT)) == (QNAN | SIGN_BIT)
    }

    #[must_use]
    pub fn as_obj(self) -> Option<NonNull<ObjHeader>> {
        if !self.is_obj() {
            return None;
        }
        NonNull::new((self.0 & POINTER_MASK) as *mut ObjHeader)
    }

    #[must_use]
    pub fn obj_kind(self) -> Option<ObjKind> {
        // SAFETY: `as_obj` only returns pointers constructed via
        // `from_obj`, which always points at a live `ObjHeader` for as
        // long as the collector keeps the object reachable.
        self.as_obj().map(|p| unsafe { p.as_ref() }.kind)
    }

    /// Bitwise/pointer identity, the cheaper of the two equality kinds
    /// spec §3 distinguishes ("identity" vs "value equality").
    #[must_use]
    pub fn is_identical(self, other: Value) -> bool {
        self.0 == other.0
    }

    #[must_use]
    pub fn raw_bits(self) -> u64 {
        self.0
    }

    #[must_use]
    pub fn from_raw_bits(bits: u64) -> Value {
        Value(bits)
    }

    /// Hash contribution for hashable primitives (bool, null, number);
    /// heap kinds needing payload-aware hashing (String) are handled by
    /// the VM crate, which has access to their payload.
    #[must_use]
    pub fn primitive_hash(self) -> Option<u64> {
        if self.is_obj() {
            return None;
        }
        Some(self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn singletons_are_disjoint_and_stable() {
        assert!(Value::NULL.is_null());
        assert!(!Value::NULL.is_undefined());
        assert_ne!(Value::TRUE.raw_bits(), Value::FALSE.raw_bits());
        assert_ne!(Value::NULL.raw_bits(), Value::UNDEFINED.raw_bits());
        assert!(Value::NULL.is_identical(Value::NULL));
    }

    #[test]
    fn numbers_round_trip() {
        for n in [0.0, -0.0, 1.5, -42.0, f64::INFINITY, f64::NEG_INFINITY] {
            let v = Value::number(n);
            assert!(v.is_number());
            assert_eq!(v.as_number().unwrap().to_bits(), n.to_bits());
        }
    }

    #[test]
    fn nan_identity_differs_from_ieee_nan() {
        let produced = Value::number(f64::NAN);
        assert!(produced.is_number());
        // Value::NAN is the language-level singleton; an arithmetic NaN
        // is a different, canonical bit pattern.
        assert_ne!(produced.raw_bits(), Value::NAN.raw_bits());
        // But the singleton always matches itself by identity.
        assert!(Value::NAN.is_identical(Value::NAN));
    }

    #[test]
    fn falsey_rule_is_null_and_false_only() {
        assert!(Value::NULL.is_falsey());
        assert!(Value::FALSE.is_falsey());
        assert!(!Value::TRUE.is_falsey());
        assert!(!Value::number(0.0).is_falsey());
        assert!(!Value::UNDEFINED.is_falsey());
    }

    #[test]
    fn obj_pointer_round_trips() {
        let header = Box::new(ObjHeader::new(ObjKind::String));
        let ptr = NonNull::from(Box::leak(header));
        let v = Value::from_obj(ptr);
        assert!(v.is_obj());
        assert_eq!(v.as_obj(), Some(ptr));
        assert_eq!(v.obj_kind(), Some(ObjKind::String));
        // SAFETY: test-only cleanup of the leaked box.
        unsafe {
            drop(Box::from_raw(ptr.as_ptr()));
        }
    }
}
