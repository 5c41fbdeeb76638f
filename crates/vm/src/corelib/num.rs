//! `Num` (spec §4.8): doubles, with the arithmetic, comparison, bitwise,
//! and math-function surface `original_source/src/builtin/Core.c`'s
//! `DEF_NUM_INFIX`/`DEF_NUM_BITWISE`/`DEF_NUM_FN` families generate.

use djuru_core::{SymbolTable, Value};

use crate::corelib::{alloc_string, expect_number, values_equal};
use crate::heap::Heap;
use crate::interpreter::{runtime_error, CoreClasses};
use crate::object::{ClassObj, MethodImpl::Primitive, RangeObj};

fn recv(receiver: Value) -> f64 {
    receiver.as_number().expect("receiver of a Num method is a number")
}

/// `%.14g`, the format `MSCStringFromNum` uses -- `nan`/`infinity`/
/// `-infinity` spelled out by hand since libc's own `%g` disagrees
/// across platforms on how it signs them.
pub(crate) fn format_num(n: f64) -> String {
    if n.is_nan() {
        return "nan".to_string();
    }
    if n.is_infinite() {
        return if n > 0.0 { "infinity".to_string() } else { "-infinity".to_string() };
    }
    if n == 0.0 {
        return if n.is_sign_negative() { "-0".to_string() } else { "0".to_string() };
    }
    const PRECISION: i32 = 14;
    let neg = n.is_sign_negative();
    let abs = n.abs();
    let mut exp = abs.log10().floor() as i32;
    let mut mantissa = abs / 10f64.powi(exp);
    if mantissa >= 10.0 {
        mantissa /= 10.0;
        exp += 1;
    } else if mantissa < 1.0 {
        mantissa *= 10.0;
        exp -= 1;
    }
    let body = if exp < -4 || exp >= PRECISION {
        let mut m = format!("{:.*}", (PRECISION - 1) as usize, mantissa);
        trim_trailing_zeros(&mut m);
        format!("{m}e{}{:02}", if exp >= 0 { "+" } else { "-" }, exp.abs())
    } else {
        let digits = (PRECISION - 1 - exp).max(0) as usize;
        let mut s = format!("{:.*}", digits, abs);
        trim_trailing_zeros(&mut s);
        s
    };
    if neg {
        format!("-{body}")
    } else {
        body
    }
}

fn trim_trailing_zeros(s: &mut String) {
    if s.contains('.') {
        while s.ends_with('0') {
            s.pop();
        }
        if s.ends_with('.') {
            s.pop();
        }
    }
}

macro_rules! infix_num {
    ($name:ident, $what:expr, |$a:ident, $b:ident| $body:expr) => {
        fn $name(heap: &mut Heap, _core: &CoreClasses, receiver: Value, args: &[Value]) -> Result<Value, Value> {
            let $a = recv(receiver);
            let $b = expect_number(heap, args[0], $what)?;
            Ok($body)
        }
    };
}

infix_num!(num_plus, "Right operand", |a, b| Value::number(a + b));
infix_num!(num_multiply, "Right operand", |a, b| Value::number(a * b));
infix_num!(num_divide, "Right operand", |a, b| Value::number(a / b));
infix_num!(num_lt, "Right operand", |a, b| Value::boolean(a < b));
infix_num!(num_gt, "Right operand", |a, b| Value::boolean(a > b));
infix_num!(num_lte, "Right operand", |a, b| Value::boolean(a <= b));
infix_num!(num_gte, "Right operand", |a, b| Value::boolean(a >= b));
infix_num!(num_mod, "Right operand", |a, b| Value::number(a % b));

/// `-(_)`: the compiler emits the same signature string for unary minus
/// (arity 0) and binary minus (arity 1), so this one primitive branches
/// on how many arguments actually arrived.
fn num_minus(heap: &mut Heap, _core: &CoreClasses, receiver: Value, args: &[Value]) -> Result<Value, Value> {
    let a = recv(receiver);
    match args.first() {
        None => Ok(Value::number(-a)),
        Some(&arg) => {
            let b = expect_number(heap, arg, "Right operand")?;
            Ok(Value::number(a - b))
        }
    }
}

macro_rules! bitwise_num {
    ($name:ident, |$a:ident, $b:ident| $body:expr) => {
        fn $name(heap: &mut Heap, _core: &CoreClasses, receiver: Value, args: &[Value]) -> Result<Value, Value> {
            let $a = recv(receiver) as i64 as u32;
            let $b = expect_number(heap, args[0], "Right operand")? as i64 as u32;
            Ok(Value::number($body as f64))
        }
    };
}

bitwise_num!(num_bitwise_and, |a, b| a & b);
bitwise_num!(num_bitwise_or, |a, b| a | b);
bitwise_num!(num_bitwise_xor, |a, b| a ^ b);
bitwise_num!(num_left_shift, |a, b| a.wrapping_shl(b));
bitwise_num!(num_right_shift, |a, b| a.wrapping_shr(b));

fn num_bitwise_not(_heap: &mut Heap, _core: &CoreClasses, receiver: Value, _args: &[Value]) -> Result<Value, Value> {
    Ok(Value::number(!(recv(receiver) as i64 as u32) as f64))
}

macro_rules! unary_fn {
    ($name:ident, |$a:ident| $body:expr) => {
        fn $name(_heap: &mut Heap, _core: &CoreClasses, receiver: Value, _args: &[Value]) -> Result<Value, Value> {
            let $a = recv(receiver);
            Ok(Value::number($body))
        }
    };
}

unary_fn!(num_abs, |a| a.abs());
unary_fn!(num_acos, |a| a.acos());
unary_fn!(num_asin, |a| a.asin());
unary_fn!(num_atan, |a| a.atan());
unary_fn!(num_cbrt, |a| a.cbrt());
unary_fn!(num_ceil, |a| a.ceil());
unary_fn!(num_cos, |a| a.cos());
unary_fn!(num_floor, |a| a.floor());
unary_fn!(num_round, |a| a.round());
unary_fn!(num_sin, |a| a.sin());
unary_fn!(num_sqrt, |a| a.sqrt());
unary_fn!(num_tan, |a| a.tan());
unary_fn!(num_log, |a| a.ln());
unary_fn!(num_log2, |a| a.log2());
unary_fn!(num_exp, |a| a.exp());
unary_fn!(num_fraction, |a| a.fract());
unary_fn!(num_truncate, |a| a.trunc());

fn num_eqeq(_heap: &mut Heap, _core: &CoreClasses, receiver: Value, args: &[Value]) -> Result<Value, Value> {
    Ok(Value::boolean(args[0].is_number() && values_equal(receiver, args[0])))
}

fn num_bangeq(_heap: &mut Heap, _core: &CoreClasses, receiver: Value, args: &[Value]) -> Result<Value, Value> {
    Ok(Value::boolean(!args[0].is_number() || !values_equal(receiver, args[0])))
}

fn num_dot_dot(heap: &mut Heap, _core: &CoreClasses, receiver: Value, args: &[Value]) -> Result<Value, Value> {
    let from = recv(receiver);
    let to = expect_number(heap, args[0], "Right hand side of range")?;
    Ok(Value::from_obj(heap.allocate(RangeObj::new(from, to, true), 40)))
}

fn num_dot_dot_dot(heap: &mut Heap, _core: &CoreClasses, receiver: Value, args: &[Value]) -> Result<Value, Value> {
    let from = recv(receiver);
    let to = expect_number(heap, args[0], "Right hand side of range")?;
    Ok(Value::from_obj(heap.allocate(RangeObj::new(from, to, false), 40)))
}

fn num_atan2(heap: &mut Heap, _core: &CoreClasses, receiver: Value, args: &[Value]) -> Result<Value, Value> {
    let x = expect_number(heap, args[0], "x value")?;
    Ok(Value::number(recv(receiver).atan2(x)))
}

fn num_min(heap: &mut Heap, _core: &CoreClasses, receiver: Value, args: &[Value]) -> Result<Value, Value> {
    let a = recv(receiver);
    let b = expect_number(heap, args[0], "Other value")?;
    Ok(Value::number(if a <= b { a } else { b }))
}

fn num_max(heap: &mut Heap, _core: &CoreClasses, receiver: Value, args: &[Value]) -> Result<Value, Value> {
    let a = recv(receiver);
    let b = expect_number(heap, args[0], "Other value")?;
    Ok(Value::number(if a > b { a } else { b }))
}

fn num_clamp(heap: &mut Heap, _core: &CoreClasses, receiver: Value, args: &[Value]) -> Result<Value, Value> {
    let a = recv(receiver);
    let min = expect_number(heap, args[0], "Min value")?;
    let max = expect_number(heap, args[1], "Max value")?;
    Ok(Value::number(a.clamp(min, max)))
}

fn num_pow(heap: &mut Heap, _core: &CoreClasses, receiver: Value, args: &[Value]) -> Result<Value, Value> {
    let power = expect_number(heap, args[0], "Power value")?;
    Ok(Value::number(recv(receiver).powf(power)))
}

fn num_is_infinity(_heap: &mut Heap, _core: &CoreClasses, receiver: Value, _args: &[Value]) -> Result<Value, Value> {
    Ok(Value::boolean(recv(receiver).is_infinite()))
}

fn num_is_integer(_heap: &mut Heap, _core: &CoreClasses, receiver: Value, _args: &[Value]) -> Result<Value, Value> {
    let n = recv(receiver);
    Ok(Value::boolean(!n.is_nan() && !n.is_infinite() && n.trunc() == n))
}

fn num_is_nan(_heap: &mut Heap, _core: &CoreClasses, receiver: Value, _args: &[Value]) -> Result<Value, Value> {
    Ok(Value::boolean(recv(receiver).is_nan()))
}

fn num_sign(_heap: &mut Heap, _core: &CoreClasses, receiver: Value, _args: &[Value]) -> Result<Value, Value> {
    let n = recv(receiver);
    let sign = if n > 0.0 {
        1.0
    } else if n < 0.0 {
        -1.0
    } else {
        0.0
    };
    Ok(Value::number(sign))
}

fn num_to_string(heap: &mut Heap, _core: &CoreClasses, receiver: Value, _args: &[Value]) -> Result<Value, Value> {
    Ok(alloc_string(heap, format_num(recv(receiver))))
}

/// `Num.fromString(_)`: empty string is `null`, trailing garbage after
/// the parsed prefix is also `null` (not an error) -- only a string
/// that fails to start with a number at all, or overflows, errors.
/// Mirrors `strtod`'s "parse the longest valid prefix" behavior by
/// shrinking the candidate slice until Rust's own parser accepts it.
fn num_from_string(heap: &mut Heap, _core: &CoreClasses, _receiver: Value, args: &[Value]) -> Result<Value, Value> {
    let text = crate::corelib::expect_string(heap, args[0], "Argument")?;
    let trimmed = text.trim_start();
    if trimmed.is_empty() {
        return Ok(Value::NULL);
    }
    for end in (1..=trimmed.len()).rev() {
        if !trimmed.is_char_boundary(end) {
            continue;
        }
        if let Ok(value) = trimmed[..end].parse::<f64>() {
            if value.is_infinite() {
                return Err(runtime_error(heap, "Number literal is too large."));
            }
            return Ok(Value::number(value));
        }
    }
    Ok(Value::NULL)
}

macro_rules! const_num {
    ($name:ident, $value:expr) => {
        fn $name(_heap: &mut Heap, _core: &CoreClasses, _receiver: Value, _args: &[Value]) -> Result<Value, Value> {
            Ok(Value::number($value))
        }
    };
}

const_num!(num_infinity, f64::INFINITY);
const_num!(num_pi, std::f64::consts::PI);
const_num!(num_tau, std::f64::consts::TAU);
const_num!(num_largest, f64::MAX);
const_num!(num_smallest, f64::MIN_POSITIVE);
const_num!(num_max_safe_integer, 9_007_199_254_740_991.0);
const_num!(num_min_safe_integer, -9_007_199_254_740_991.0);

fn num_nan(_heap: &mut Heap, _core: &CoreClasses, _receiver: Value, _args: &[Value]) -> Result<Value, Value> {
    Ok(Value::NAN)
}

pub fn install(class: &ClassObj, symbols: &mut SymbolTable) {
    class.set_method(symbols.intern("+(_)"), Primitive(num_plus));
    class.set_method(symbols.intern("-(_)"), Primitive(num_minus));
    class.set_method(symbols.intern("*(_)"), Primitive(num_multiply));
    class.set_method(symbols.intern("/(_)"), Primitive(num_divide));
    class.set_method(symbols.intern("%(_)"), Primitive(num_mod));
    class.set_method(symbols.intern("<(_)"), Primitive(num_lt));
    class.set_method(symbols.intern(">(_)"), Primitive(num_gt));
    class.set_method(symbols.intern("<=(_)"), Primitive(num_lte));
    class.set_method(symbols.intern(">=(_)"), Primitive(num_gte));
    class.set_method(symbols.intern("==(_)"), Primitive(num_eqeq));
    class.set_method(symbols.intern("!=(_)"), Primitive(num_bangeq));
    class.set_method(symbols.intern("&(_)"), Primitive(num_bitwise_and));
    class.set_method(symbols.intern("|(_)"), Primitive(num_bitwise_or));
    class.set_method(symbols.intern("^(_)"), Primitive(num_bitwise_xor));
    class.set_method(symbols.intern("<<(_)"), Primitive(num_left_shift));
    class.set_method(symbols.intern(">>(_)"), Primitive(num_right_shift));
    class.set_method(symbols.intern("~"), Primitive(num_bitwise_not));
    class.set_method(symbols.intern("..(_)"), Primitive(num_dot_dot));
    class.set_method(symbols.intern("...(_)"), Primitive(num_dot_dot_dot));

    class.set_method(symbols.intern("abs()"), Primitive(num_abs));
    class.set_method(symbols.intern("acos()"), Primitive(num_acos));
    class.set_method(symbols.intern("asin()"), Primitive(num_asin));
    class.set_method(symbols.intern("atan()"), Primitive(num_atan));
    class.set_method(symbols.intern("atan(_)"), Primitive(num_atan2));
    class.set_method(symbols.intern("cbrt()"), Primitive(num_cbrt));
    class.set_method(symbols.intern("ceil()"), Primitive(num_ceil));
    class.set_method(symbols.intern("cos()"), Primitive(num_cos));
    class.set_method(symbols.intern("floor()"), Primitive(num_floor));
    class.set_method(symbols.intern("round()"), Primitive(num_round));
    class.set_method(symbols.intern("sin()"), Primitive(num_sin));
    class.set_method(symbols.intern("sqrt()"), Primitive(num_sqrt));
    class.set_method(symbols.intern("tan()"), Primitive(num_tan));
    class.set_method(symbols.intern("log()"), Primitive(num_log));
    class.set_method(symbols.intern("log2()"), Primitive(num_log2));
    class.set_method(symbols.intern("exp()"), Primitive(num_exp));
    class.set_method(symbols.intern("fraction()"), Primitive(num_fraction));
    class.set_method(symbols.intern("truncate()"), Primitive(num_truncate));
    class.set_method(symbols.intern("isInfinity()"), Primitive(num_is_infinity));
    class.set_method(symbols.intern("isInteger()"), Primitive(num_is_integer));
    class.set_method(symbols.intern("isNan()"), Primitive(num_is_nan));
    class.set_method(symbols.intern("sign()"), Primitive(num_sign));
    class.set_method(symbols.intern("toString()"), Primitive(num_to_string));
    class.set_method(symbols.intern("min(_)"), Primitive(num_min));
    class.set_method(symbols.intern("max(_)"), Primitive(num_max));
    class.set_method(symbols.intern("clamp(_,_)"), Primitive(num_clamp));
    class.set_method(symbols.intern("pow(_)"), Primitive(num_pow));

    // Unary `+x` is a compiler-level no-op (Open Question (a)) -- it
    // never emits a method call, so Num has no primitive for it.

    class.set_static_method(symbols.intern("fromString(_)"), Primitive(num_from_string));
    class.set_static_method(symbols.intern("infinity()"), Primitive(num_infinity));
    class.set_static_method(symbols.intern("nan()"), Primitive(num_nan));
    class.set_static_method(symbols.intern("pi()"), Primitive(num_pi));
    class.set_static_method(symbols.intern("tau()"), Primitive(num_tau));
    class.set_static_method(symbols.intern("largest()"), Primitive(num_largest));
    class.set_static_method(symbols.intern("smallest()"), Primitive(num_smallest));
    class.set_static_method(symbols.intern("maxSafeInteger()"), Primitive(num_max_safe_integer));
    class.set_static_method(symbols.intern("minSafeInteger()"), Primitive(num_min_safe_integer));
}
