// Arithmetic primitives - thin wrappers over the numeric tower
//
// Results are built with the uncached constructors; only literals and
// explicit runtime construction go through the constructor cache.

use crate::error::RuntimeError;
use crate::interpreter::Runtime;
use crate::numeric;
use crate::value::Value;

// (+ n ...)
pub fn add_impl(_rt: &mut Runtime, args: &[Value]) -> Result<Value, RuntimeError> {
    args.iter().try_fold(Value::fixnum(0), |acc, v| numeric::add(&acc, v))
}

// (- n) negates, (- n m ...) subtracts left to right
pub fn sub_impl(_rt: &mut Runtime, args: &[Value]) -> Result<Value, RuntimeError> {
    match args {
        [only] => numeric::negate(only),
        [first, rest @ ..] => rest.iter().try_fold(first.clone(), |acc, v| numeric::sub(&acc, v)),
        [] => Ok(Value::fixnum(0)),
    }
}

pub fn mul_impl(_rt: &mut Runtime, args: &[Value]) -> Result<Value, RuntimeError> {
    args.iter().try_fold(Value::fixnum(1), |acc, v| numeric::mul(&acc, v))
}

// (/ n) is the reciprocal
pub fn div_impl(_rt: &mut Runtime, args: &[Value]) -> Result<Value, RuntimeError> {
    match args {
        [only] => numeric::div(&Value::fixnum(1), only),
        [first, rest @ ..] => rest.iter().try_fold(first.clone(), |acc, v| numeric::div(&acc, v)),
        [] => Ok(Value::fixnum(1)),
    }
}

pub fn quotient_impl(_rt: &mut Runtime, args: &[Value]) -> Result<Value, RuntimeError> {
    numeric::quotient(&args[0], &args[1])
}

pub fn remainder_impl(_rt: &mut Runtime, args: &[Value]) -> Result<Value, RuntimeError> {
    numeric::remainder(&args[0], &args[1])
}

pub fn modulo_impl(_rt: &mut Runtime, args: &[Value]) -> Result<Value, RuntimeError> {
    numeric::modulo(&args[0], &args[1])
}

pub fn abs_impl(_rt: &mut Runtime, args: &[Value]) -> Result<Value, RuntimeError> {
    numeric::abs(&args[0])
}

pub fn add1_impl(_rt: &mut Runtime, args: &[Value]) -> Result<Value, RuntimeError> {
    numeric::add(&args[0], &Value::fixnum(1))
}

pub fn sub1_impl(_rt: &mut Runtime, args: &[Value]) -> Result<Value, RuntimeError> {
    numeric::sub(&args[0], &Value::fixnum(1))
}

pub fn expt_impl(_rt: &mut Runtime, args: &[Value]) -> Result<Value, RuntimeError> {
    numeric::expt(&args[0], &args[1])
}

pub fn exact_to_inexact_impl(_rt: &mut Runtime, args: &[Value]) -> Result<Value, RuntimeError> {
    numeric::exact_to_inexact(&args[0])
}

pub fn inexact_to_exact_impl(_rt: &mut Runtime, args: &[Value]) -> Result<Value, RuntimeError> {
    numeric::inexact_to_exact(&args[0])
}

pub fn is_number_impl(_rt: &mut Runtime, args: &[Value]) -> Result<Value, RuntimeError> {
    Ok(Value::Bool(args[0].is_number()))
}

pub fn is_integer_impl(_rt: &mut Runtime, args: &[Value]) -> Result<Value, RuntimeError> {
    Ok(Value::Bool(numeric::is_integer(&args[0])))
}

pub fn is_exact_impl(_rt: &mut Runtime, args: &[Value]) -> Result<Value, RuntimeError> {
    numeric::is_exact(&args[0]).map(Value::Bool)
}

pub fn is_inexact_impl(_rt: &mut Runtime, args: &[Value]) -> Result<Value, RuntimeError> {
    numeric::is_exact(&args[0]).map(|exact| Value::Bool(!exact))
}

pub fn is_zero_impl(_rt: &mut Runtime, args: &[Value]) -> Result<Value, RuntimeError> {
    numeric::is_zero(&args[0]).map(Value::Bool)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_impl() {
        let mut rt = Runtime::new();
        let result = add_impl(&mut rt, &[Value::fixnum(5), Value::fixnum(3)]).unwrap();
        assert_eq!(result.as_fixnum(), Some(8));

        let result = add_impl(&mut rt, &[]).unwrap();
        assert_eq!(result.as_fixnum(), Some(0));

        let result = add_impl(&mut rt, &[Value::fixnum(1), Value::flonum(0.5)]).unwrap();
        assert!(matches!(&result, Value::Flonum(f) if **f == 1.5), "Expected 1.5, got {:?}", result);
    }

    #[test]
    fn test_add_overflow_promotes() {
        let mut rt = Runtime::new();
        let result = add_impl(&mut rt, &[Value::fixnum(i64::MAX), Value::fixnum(1)]).unwrap();
        assert!(matches!(result, Value::Bignum(_)), "Expected bignum, got {:?}", result);
        assert_eq!(result.to_string(), "9223372036854775808");
    }

    #[test]
    fn test_sub_and_negate() {
        let mut rt = Runtime::new();
        let result = sub_impl(&mut rt, &[Value::fixnum(10), Value::fixnum(3), Value::fixnum(2)]).unwrap();
        assert_eq!(result.as_fixnum(), Some(5));
        let result = sub_impl(&mut rt, &[Value::fixnum(4)]).unwrap();
        assert_eq!(result.as_fixnum(), Some(-4));
    }

    #[test]
    fn test_div_exact_rational() {
        let mut rt = Runtime::new();
        let result = div_impl(&mut rt, &[Value::fixnum(1), Value::fixnum(3)]).unwrap();
        assert_eq!(result.to_string(), "1/3");
        let result = div_impl(&mut rt, &[Value::fixnum(2)]).unwrap();
        assert_eq!(result.to_string(), "1/2");
    }

    #[test]
    fn test_div_by_exact_zero() {
        let mut rt = Runtime::new();
        let result = div_impl(&mut rt, &[Value::fixnum(1), Value::fixnum(0)]);
        assert!(matches!(result, Err(RuntimeError::DivisionByZero(_))), "Expected DivisionByZero, got {:?}", result);
    }

    #[test]
    fn test_type_error_names_the_primitive() {
        let mut rt = Runtime::new();
        let result = add_impl(&mut rt, &[Value::fixnum(1), Value::string("x")]);
        assert!(matches!(&result, Err(RuntimeError::Type { who, .. }) if who == "+"), "Expected type error, got {:?}", result);
    }
}
