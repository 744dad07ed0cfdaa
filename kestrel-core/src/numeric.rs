// RUST CONCEPT: Numeric type promotion system
// Arithmetic between different numeric kinds promotes both operands to the
// higher kind, computes there, and demotes the result when it fits a lower
// exact kind (a bignum that fits in i64, a rational with denominator 1).
//
// Hierarchy: Fixnum < Bignum < Rational (exact) < Flonum < Complex (inexact).
// Mixing exact and inexact promotes to inexact.

use std::cmp::Ordering;

use num_bigint::BigInt;
use num_complex::Complex64;
use num_rational::BigRational;
use num_traits::{Signed, ToPrimitive, Zero};

use crate::error::RuntimeError;
use crate::value::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Level {
    Fixnum,
    Bignum,
    Rational,
    Flonum,
    Complex,
}

// Unwrapped working form; the Rc boxes of Value are only rebuilt at the end
#[derive(Debug, Clone)]
enum Num {
    Fix(i64),
    Big(BigInt),
    Rat(BigRational),
    Flo(f64),
    Cpx(Complex64),
}

impl Num {
    fn level(&self) -> Level {
        match self {
            Num::Fix(_) => Level::Fixnum,
            Num::Big(_) => Level::Bignum,
            Num::Rat(_) => Level::Rational,
            Num::Flo(_) => Level::Flonum,
            Num::Cpx(_) => Level::Complex,
        }
    }

    fn promote(self, target: Level) -> Num {
        match (self, target) {
            (Num::Fix(i), Level::Bignum) => Num::Big(BigInt::from(i)),
            (Num::Fix(i), Level::Rational) => Num::Rat(BigRational::from(BigInt::from(i))),
            (Num::Fix(i), Level::Flonum) => Num::Flo(i as f64),
            (Num::Fix(i), Level::Complex) => Num::Cpx(Complex64::new(i as f64, 0.0)),
            (Num::Big(i), Level::Rational) => Num::Rat(BigRational::from(i)),
            (Num::Big(i), Level::Flonum) => Num::Flo(big_to_f64(&i)),
            (Num::Big(i), Level::Complex) => Num::Cpx(Complex64::new(big_to_f64(&i), 0.0)),
            (Num::Rat(r), Level::Flonum) => Num::Flo(rat_to_f64(&r)),
            (Num::Rat(r), Level::Complex) => Num::Cpx(Complex64::new(rat_to_f64(&r), 0.0)),
            (Num::Flo(f), Level::Complex) => Num::Cpx(Complex64::new(f, 0.0)),
            // already there (never asked to demote)
            (n, _) => n,
        }
    }

    fn into_value(self) -> Value {
        match self {
            Num::Fix(i) => Value::fixnum(i),
            Num::Big(i) => Value::integer(i),
            Num::Rat(r) => Value::rational(r),
            Num::Flo(f) => Value::flonum(f),
            Num::Cpx(z) => Value::complex(z),
        }
    }
}

fn big_to_f64(i: &BigInt) -> f64 {
    i.to_f64().unwrap_or(if i.is_negative() {
        f64::NEG_INFINITY
    } else {
        f64::INFINITY
    })
}

fn rat_to_f64(r: &BigRational) -> f64 {
    r.to_f64()
        .unwrap_or_else(|| big_to_f64(r.numer()) / big_to_f64(r.denom()))
}

fn to_num(who: &str, v: &Value) -> Result<Num, RuntimeError> {
    match v {
        Value::Fixnum(i) => Ok(Num::Fix(**i)),
        Value::Bignum(i) => Ok(Num::Big((**i).clone())),
        Value::Rational(r) => Ok(Num::Rat((**r).clone())),
        Value::Flonum(f) => Ok(Num::Flo(**f)),
        Value::Complex(z) => Ok(Num::Cpx(**z)),
        other => Err(RuntimeError::type_error(who, "number?", other)),
    }
}

// RUST CONCEPT: Promote two values to a common level
fn promote_pair(who: &str, a: &Value, b: &Value) -> Result<(Num, Num), RuntimeError> {
    let a = to_num(who, a)?;
    let b = to_num(who, b)?;
    let target = a.level().max(b.level());
    Ok((a.promote(target), b.promote(target)))
}

pub fn add(a: &Value, b: &Value) -> Result<Value, RuntimeError> {
    let result = match promote_pair("+", a, b)? {
        (Num::Fix(x), Num::Fix(y)) => match x.checked_add(y) {
            Some(n) => Num::Fix(n),
            None => Num::Big(BigInt::from(x) + BigInt::from(y)),
        },
        (Num::Big(x), Num::Big(y)) => Num::Big(x + y),
        (Num::Rat(x), Num::Rat(y)) => Num::Rat(x + y),
        (Num::Flo(x), Num::Flo(y)) => Num::Flo(x + y),
        (Num::Cpx(x), Num::Cpx(y)) => Num::Cpx(x + y),
        _ => unreachable!("promote_pair yields matching levels"),
    };
    Ok(result.into_value())
}

pub fn sub(a: &Value, b: &Value) -> Result<Value, RuntimeError> {
    let result = match promote_pair("-", a, b)? {
        (Num::Fix(x), Num::Fix(y)) => match x.checked_sub(y) {
            Some(n) => Num::Fix(n),
            None => Num::Big(BigInt::from(x) - BigInt::from(y)),
        },
        (Num::Big(x), Num::Big(y)) => Num::Big(x - y),
        (Num::Rat(x), Num::Rat(y)) => Num::Rat(x - y),
        (Num::Flo(x), Num::Flo(y)) => Num::Flo(x - y),
        (Num::Cpx(x), Num::Cpx(y)) => Num::Cpx(x - y),
        _ => unreachable!("promote_pair yields matching levels"),
    };
    Ok(result.into_value())
}

pub fn mul(a: &Value, b: &Value) -> Result<Value, RuntimeError> {
    let result = match promote_pair("*", a, b)? {
        (Num::Fix(x), Num::Fix(y)) => match x.checked_mul(y) {
            Some(n) => Num::Fix(n),
            None => Num::Big(BigInt::from(x) * BigInt::from(y)),
        },
        (Num::Big(x), Num::Big(y)) => Num::Big(x * y),
        (Num::Rat(x), Num::Rat(y)) => Num::Rat(x * y),
        (Num::Flo(x), Num::Flo(y)) => Num::Flo(x * y),
        (Num::Cpx(x), Num::Cpx(y)) => Num::Cpx(x * y),
        _ => unreachable!("promote_pair yields matching levels"),
    };
    Ok(result.into_value())
}

// RUST CONCEPT: Exact division produces rationals
// 1/2 stays 1/2; only an exact zero divisor is an error, inexact division
// follows IEEE (inf, nan).
pub fn div(a: &Value, b: &Value) -> Result<Value, RuntimeError> {
    let (x, y) = promote_pair("/", a, b)?;
    let result = match (x, y) {
        (Num::Fix(_), Num::Fix(0)) => return Err(RuntimeError::DivisionByZero("/".to_string())),
        (Num::Fix(x), Num::Fix(y)) => Num::Rat(BigRational::new(BigInt::from(x), BigInt::from(y))),
        (Num::Big(x), Num::Big(y)) => {
            if y.is_zero() {
                return Err(RuntimeError::DivisionByZero("/".to_string()));
            }
            Num::Rat(BigRational::new(x, y))
        }
        (Num::Rat(x), Num::Rat(y)) => {
            if y.is_zero() {
                return Err(RuntimeError::DivisionByZero("/".to_string()));
            }
            Num::Rat(x / y)
        }
        (Num::Flo(x), Num::Flo(y)) => Num::Flo(x / y),
        (Num::Cpx(x), Num::Cpx(y)) => Num::Cpx(x / y),
        _ => unreachable!("promote_pair yields matching levels"),
    };
    Ok(result.into_value())
}

pub fn negate(a: &Value) -> Result<Value, RuntimeError> {
    sub(&Value::fixnum(0), a)
}

/// Numeric equality (`=`); complex numbers compare componentwise.
pub fn num_eq(a: &Value, b: &Value) -> Result<bool, RuntimeError> {
    Ok(match promote_pair("=", a, b)? {
        (Num::Fix(x), Num::Fix(y)) => x == y,
        (Num::Big(x), Num::Big(y)) => x == y,
        (Num::Rat(x), Num::Rat(y)) => x == y,
        (Num::Flo(x), Num::Flo(y)) => x == y,
        (Num::Cpx(x), Num::Cpx(y)) => x == y,
        _ => unreachable!("promote_pair yields matching levels"),
    })
}

/// Ordering of two reals; None when a NaN is involved.
pub fn compare(who: &str, a: &Value, b: &Value) -> Result<Option<Ordering>, RuntimeError> {
    if let Value::Complex(_) = a {
        return Err(RuntimeError::type_error(who, "real?", a));
    }
    if let Value::Complex(_) = b {
        return Err(RuntimeError::type_error(who, "real?", b));
    }
    Ok(match promote_pair(who, a, b)? {
        (Num::Fix(x), Num::Fix(y)) => Some(x.cmp(&y)),
        (Num::Big(x), Num::Big(y)) => Some(x.cmp(&y)),
        (Num::Rat(x), Num::Rat(y)) => Some(x.cmp(&y)),
        (Num::Flo(x), Num::Flo(y)) => x.partial_cmp(&y),
        _ => unreachable!("complex operands rejected above"),
    })
}

pub fn is_zero(a: &Value) -> Result<bool, RuntimeError> {
    Ok(match to_num("zero?", a)? {
        Num::Fix(i) => i == 0,
        Num::Big(i) => i.is_zero(),
        Num::Rat(r) => r.is_zero(),
        Num::Flo(f) => f == 0.0,
        Num::Cpx(z) => z.re == 0.0 && z.im == 0.0,
    })
}

pub fn is_exact(a: &Value) -> Result<bool, RuntimeError> {
    Ok(to_num("exact?", a)?.level() <= Level::Rational)
}

pub fn is_integer(a: &Value) -> bool {
    match a {
        Value::Fixnum(_) | Value::Bignum(_) => true,
        Value::Flonum(f) => f.is_finite() && f.fract() == 0.0,
        _ => false,
    }
}

pub fn abs(a: &Value) -> Result<Value, RuntimeError> {
    let result = match to_num("abs", a)? {
        Num::Fix(i) => match i.checked_abs() {
            Some(n) => Num::Fix(n),
            None => Num::Big(BigInt::from(i).abs()),
        },
        Num::Big(i) => Num::Big(i.abs()),
        Num::Rat(r) => Num::Rat(r.abs()),
        Num::Flo(f) => Num::Flo(f.abs()),
        Num::Cpx(_) => return Err(RuntimeError::type_error("abs", "real?", a)),
    };
    Ok(result.into_value())
}

// ---------------------------------------------------------------------------
// Integer division

enum IntDiv {
    Quotient,
    Remainder,
    Modulo,
}

fn exact_integer(who: &str, v: &Value) -> Result<BigInt, RuntimeError> {
    match v {
        Value::Fixnum(i) => Ok(BigInt::from(**i)),
        Value::Bignum(i) => Ok((**i).clone()),
        other => Err(RuntimeError::type_error(who, "exact-integer?", other)),
    }
}

fn integer_division(who: &str, op: IntDiv, a: &Value, b: &Value) -> Result<Value, RuntimeError> {
    // fast path, and i64::MIN / -1 falls through to bignums
    if let (Some(x), Some(y)) = (a.as_fixnum(), b.as_fixnum()) {
        if y == 0 {
            return Err(RuntimeError::DivisionByZero(who.to_string()));
        }
        let result = match op {
            IntDiv::Quotient => x.checked_div(y),
            IntDiv::Remainder => x.checked_rem(y),
            IntDiv::Modulo => x.checked_rem_euclid(y).map(|r| if y < 0 && r != 0 { r + y } else { r }),
        };
        if let Some(n) = result {
            return Ok(Value::fixnum(n));
        }
    }
    let x = exact_integer(who, a)?;
    let y = exact_integer(who, b)?;
    if y.is_zero() {
        return Err(RuntimeError::DivisionByZero(who.to_string()));
    }
    let result = match op {
        IntDiv::Quotient => &x / &y,
        IntDiv::Remainder => &x % &y,
        IntDiv::Modulo => {
            let r = &x % &y;
            if !r.is_zero() && (r.is_negative() != y.is_negative()) { r + &y } else { r }
        }
    };
    Ok(Value::integer(result))
}

pub fn quotient(a: &Value, b: &Value) -> Result<Value, RuntimeError> {
    integer_division("quotient", IntDiv::Quotient, a, b)
}

pub fn remainder(a: &Value, b: &Value) -> Result<Value, RuntimeError> {
    integer_division("remainder", IntDiv::Remainder, a, b)
}

pub fn modulo(a: &Value, b: &Value) -> Result<Value, RuntimeError> {
    integer_division("modulo", IntDiv::Modulo, a, b)
}

// ---------------------------------------------------------------------------
// Exactness conversion

pub fn exact_to_inexact(a: &Value) -> Result<Value, RuntimeError> {
    let n = to_num("exact->inexact", a)?;
    let target = n.level().max(Level::Flonum);
    Ok(n.promote(target).into_value())
}

pub fn inexact_to_exact(a: &Value) -> Result<Value, RuntimeError> {
    match to_num("inexact->exact", a)? {
        Num::Flo(f) => BigRational::from_float(f)
            .map(Value::rational)
            .ok_or_else(|| RuntimeError::type_error("inexact->exact", "rational?", a)),
        Num::Cpx(_) => Err(RuntimeError::type_error("inexact->exact", "real?", a)),
        exact => Ok(exact.into_value()),
    }
}

pub fn to_f64(who: &str, a: &Value) -> Result<f64, RuntimeError> {
    match to_num(who, a)?.promote(Level::Flonum) {
        Num::Flo(f) => Ok(f),
        _ => Err(RuntimeError::type_error(who, "real?", a)),
    }
}

// ---------------------------------------------------------------------------
// Transcendental and rounding operations

/// Exact base and non-negative fixnum exponent stay exact.
pub fn expt(base: &Value, exponent: &Value) -> Result<Value, RuntimeError> {
    if let Some(e) = exponent.as_fixnum() {
        if e >= 0 && matches!(base, Value::Fixnum(_) | Value::Bignum(_) | Value::Rational(_)) {
            let e = u32::try_from(e).map_err(|_| RuntimeError::User("expt: exponent too large".to_string()))?;
            return Ok(match to_num("expt", base)? {
                Num::Fix(b) => Num::Big(num_traits::pow(BigInt::from(b), e as usize)),
                Num::Big(b) => Num::Big(num_traits::pow(b, e as usize)),
                Num::Rat(r) => Num::Rat(num_traits::pow(r, e as usize)),
                other => other,
            }
            .into_value());
        }
        if e < 0 && matches!(base, Value::Fixnum(_) | Value::Bignum(_) | Value::Rational(_)) {
            let positive = expt(base, &Value::integer(-BigInt::from(e)))?;
            return div(&Value::fixnum(1), &positive);
        }
    }
    inexact_expt(base, exponent)
}

#[cfg(feature = "advanced_math")]
fn inexact_expt(base: &Value, exponent: &Value) -> Result<Value, RuntimeError> {
    if let (Value::Complex(_), _) | (_, Value::Complex(_)) = (base, exponent) {
        let b = match to_num("expt", base)?.promote(Level::Complex) {
            Num::Cpx(z) => z,
            _ => unreachable!("promoted to complex"),
        };
        let e = match to_num("expt", exponent)?.promote(Level::Complex) {
            Num::Cpx(z) => z,
            _ => unreachable!("promoted to complex"),
        };
        return Ok(Value::complex(b.powc(e)));
    }
    Ok(Value::flonum(to_f64("expt", base)?.powf(to_f64("expt", exponent)?)))
}

#[cfg(not(feature = "advanced_math"))]
fn inexact_expt(_base: &Value, exponent: &Value) -> Result<Value, RuntimeError> {
    Err(RuntimeError::type_error("expt", "exact-nonnegative-integer?", exponent))
}

#[cfg(feature = "advanced_math")]
pub fn sqrt(a: &Value) -> Result<Value, RuntimeError> {
    if let Some(n) = a.as_fixnum() {
        if n >= 0 {
            let root = (n as f64).sqrt() as i64;
            if root.checked_mul(root) == Some(n) {
                return Ok(Value::fixnum(root));
            }
        }
    }
    if let Value::Complex(z) = a {
        return Ok(Value::complex(z.sqrt()));
    }
    let f = to_f64("sqrt", a)?;
    if f < 0.0 {
        return Ok(Value::complex(Complex64::new(0.0, (-f).sqrt())));
    }
    Ok(Value::flonum(f.sqrt()))
}

#[cfg(feature = "advanced_math")]
pub fn exp(a: &Value) -> Result<Value, RuntimeError> {
    if a.as_fixnum() == Some(0) {
        return Ok(Value::fixnum(1));
    }
    Ok(Value::flonum(to_f64("exp", a)?.exp()))
}

#[cfg(feature = "advanced_math")]
pub fn log(a: &Value) -> Result<Value, RuntimeError> {
    if a.as_fixnum() == Some(1) {
        return Ok(Value::fixnum(0));
    }
    if a.as_fixnum() == Some(0) {
        return Err(RuntimeError::DivisionByZero("log".to_string()));
    }
    Ok(Value::flonum(to_f64("log", a)?.ln()))
}

#[cfg(feature = "advanced_math")]
pub fn sin(a: &Value) -> Result<Value, RuntimeError> {
    if a.as_fixnum() == Some(0) {
        return Ok(Value::fixnum(0));
    }
    Ok(Value::flonum(to_f64("sin", a)?.sin()))
}

#[cfg(feature = "advanced_math")]
pub fn cos(a: &Value) -> Result<Value, RuntimeError> {
    if a.as_fixnum() == Some(0) {
        return Ok(Value::fixnum(1));
    }
    Ok(Value::flonum(to_f64("cos", a)?.cos()))
}

#[cfg(feature = "advanced_math")]
#[derive(Clone, Copy)]
pub enum Rounding {
    Floor,
    Ceiling,
    Round,
}

// Integers round to themselves; rationals stay exact; `round` is
// round-half-to-even like every Scheme
#[cfg(feature = "advanced_math")]
pub fn round_with(mode: Rounding, a: &Value) -> Result<Value, RuntimeError> {
    let who = match mode {
        Rounding::Floor => "floor",
        Rounding::Ceiling => "ceiling",
        Rounding::Round => "round",
    };
    match to_num(who, a)? {
        Num::Fix(_) | Num::Big(_) => Ok(a.clone()),
        Num::Rat(r) => {
            let rounded = match mode {
                Rounding::Floor => r.floor(),
                Rounding::Ceiling => r.ceil(),
                Rounding::Round => {
                    let floor = r.floor();
                    let diff = &r - &floor;
                    let half = BigRational::new(BigInt::from(1), BigInt::from(2));
                    match diff.cmp(&half) {
                        Ordering::Less => floor,
                        Ordering::Greater => floor + BigRational::from(BigInt::from(1)),
                        Ordering::Equal => {
                            let even = (floor.to_integer() % BigInt::from(2)).is_zero();
                            if even { floor } else { floor + BigRational::from(BigInt::from(1)) }
                        }
                    }
                }
            };
            Ok(Value::integer(rounded.to_integer()))
        }
        Num::Flo(f) => Ok(Value::flonum(match mode {
            Rounding::Floor => f.floor(),
            Rounding::Ceiling => f.ceil(),
            Rounding::Round => f.round_ties_even(),
        })),
        Num::Cpx(_) => Err(RuntimeError::type_error(who, "real?", a)),
    }
}
