// Advanced math primitives (feature-gated): sqrt exp log sin cos floor
// ceiling round

use crate::error::RuntimeError;
use crate::interpreter::Runtime;
use crate::numeric::{self, Rounding};
use crate::value::Value;

pub fn sqrt_impl(_rt: &mut Runtime, args: &[Value]) -> Result<Value, RuntimeError> {
    numeric::sqrt(&args[0])
}

pub fn exp_impl(_rt: &mut Runtime, args: &[Value]) -> Result<Value, RuntimeError> {
    numeric::exp(&args[0])
}

pub fn log_impl(_rt: &mut Runtime, args: &[Value]) -> Result<Value, RuntimeError> {
    numeric::log(&args[0])
}

pub fn sin_impl(_rt: &mut Runtime, args: &[Value]) -> Result<Value, RuntimeError> {
    numeric::sin(&args[0])
}

pub fn cos_impl(_rt: &mut Runtime, args: &[Value]) -> Result<Value, RuntimeError> {
    numeric::cos(&args[0])
}

pub fn floor_impl(_rt: &mut Runtime, args: &[Value]) -> Result<Value, RuntimeError> {
    numeric::round_with(Rounding::Floor, &args[0])
}

pub fn ceiling_impl(_rt: &mut Runtime, args: &[Value]) -> Result<Value, RuntimeError> {
    numeric::round_with(Rounding::Ceiling, &args[0])
}

pub fn round_impl(_rt: &mut Runtime, args: &[Value]) -> Result<Value, RuntimeError> {
    numeric::round_with(Rounding::Round, &args[0])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sqrt_impl() {
        let mut rt = Runtime::new();
        let result = sqrt_impl(&mut rt, &[Value::fixnum(16)]).unwrap();
        assert_eq!(result.as_fixnum(), Some(4));
        let result = sqrt_impl(&mut rt, &[Value::flonum(2.25)]).unwrap();
        assert!(matches!(&result, Value::Flonum(f) if **f == 1.5), "Expected 1.5, got {:?}", result);
    }

    #[test]
    fn test_round_half_even() {
        let mut rt = Runtime::new();
        let result = round_impl(&mut rt, &[Value::flonum(2.5)]).unwrap();
        assert!(matches!(&result, Value::Flonum(f) if **f == 2.0), "Expected 2.0, got {:?}", result);
        let result = floor_impl(&mut rt, &[Value::flonum(-1.5)]).unwrap();
        assert!(matches!(&result, Value::Flonum(f) if **f == -2.0), "Expected -2.0, got {:?}", result);
    }
}
