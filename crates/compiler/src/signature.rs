//! Method signature construction (spec §4.1: "A method's identity on a
//! class is a string composed of `<name>` plus a parameter-shape suffix").
//!
//! Signatures are built once, at the call site or method declaration, and
//! interned through [`djuru_core::SymbolTable::intern`]. The placeholder
//! character for each parameter is always `_`, regardless of the
//! parameter's actual name, since overload identity only depends on
//! arity and call shape, never on parameter names.

use std::fmt::Write as _;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignatureKind {
    /// `name(...)`, arity parameters.
    Call,
    /// `name=(_)`, a single-parameter setter.
    Setter,
    /// `[...]`, a subscript getter.
    SubscriptGet,
    /// `[...]=(_)`, a subscript setter (the trailing `_` is the value,
    /// counted separately from the bracketed index arity).
    SubscriptSet,
    /// `init name(...)`, a constructor initializer.
    Construct,
}

/// Builds a method signature string for the given name, kind, and arity.
///
/// `arity` is the number of parameters inside the parens/brackets; for
/// `SubscriptSet` it is the number of index parameters (the trailing
/// value parameter is implicit and always exactly one).
#[must_use]
pub fn build(name: &str, kind: SignatureKind, arity: u8) -> String {
    let mut sig = String::new();
    match kind {
        SignatureKind::Call => {
            sig.push_str(name);
            push_parens(&mut sig, arity);
        }
        SignatureKind::Setter => {
            sig.push_str(name);
            sig.push_str("=(_)");
        }
        SignatureKind::SubscriptGet => {
            push_brackets(&mut sig, arity);
        }
        SignatureKind::SubscriptSet => {
            push_brackets(&mut sig, arity);
            sig.push_str("=(_)");
        }
        SignatureKind::Construct => {
            sig.push_str("init ");
            sig.push_str(name);
            push_parens(&mut sig, arity);
        }
    }
    sig
}

fn push_parens(sig: &mut String, arity: u8) {
    sig.push('(');
    push_placeholders(sig, arity);
    sig.push(')');
}

fn push_brackets(sig: &mut String, arity: u8) {
    sig.push('[');
    push_placeholders(sig, arity);
    sig.push(']');
}

fn push_placeholders(sig: &mut String, arity: u8) {
    for i in 0..arity {
        if i > 0 {
            sig.push(',');
        }
        let _ = write!(sig, "_");
    }
}

/// Recovers the arity encoded in a signature built by [`build`], used by
/// the compiler when it needs to know how many argument slots a call
/// site reserves without re-deriving it from the parse.
#[must_use]
pub fn arity_of(sig: &str) -> u8 {
    let Some(open) = sig.find(['(', '[']) else {
        return 0;
    };
    let close = sig.rfind([')', ']']).unwrap_or(sig.len());
    if close <= open + 1 {
        return 0;
    }
    sig[open + 1..close].split(',').count() as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn call_signature_shape() {
        assert_eq!(build("foo", SignatureKind::Call, 0), "foo()");
        assert_eq!(build("foo", SignatureKind::Call, 2), "foo(_,_)");
    }

    #[test]
    fn setter_ignores_arity() {
        assert_eq!(build("foo", SignatureKind::Setter, 1), "foo=(_)");
    }

    #[test]
    fn subscript_signatures() {
        assert_eq!(build("", SignatureKind::SubscriptGet, 1), "[_]");
        assert_eq!(build("", SignatureKind::SubscriptSet, 2), "[_,_]=(_)");
    }

    #[test]
    fn construct_signature_has_init_prefix() {
        assert_eq!(build("new", SignatureKind::Construct, 1), "init new(_)");
    }

    #[test]
    fn arity_of_round_trips() {
        assert_eq!(arity_of("foo(_,_,_)"), 3);
        assert_eq!(arity_of("foo()"), 0);
        assert_eq!(arity_of("[_,_]=(_)"), 2);
        assert_eq!(arity_of("foo=(_)"), 1);
    }
}
