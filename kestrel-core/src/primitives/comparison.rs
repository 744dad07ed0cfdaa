// Numeric comparison primitives: = < > <= >=
//
// Every argument is checked even after the answer is known, so (< 2 1 'x)
// is a contract violation rather than #f.

use std::cmp::Ordering;

use crate::error::RuntimeError;
use crate::interpreter::Runtime;
use crate::numeric;
use crate::value::Value;

fn chain(who: &str, args: &[Value], accept: fn(Ordering) -> bool) -> Result<Value, RuntimeError> {
    let mut result = true;
    for pair in args.windows(2) {
        let ordered = numeric::compare(who, &pair[0], &pair[1])?.is_some_and(accept);
        result = result && ordered;
    }
    if let [only] = args {
        numeric::compare(who, only, only)?;
    }
    Ok(Value::Bool(result))
}

pub fn num_eq_impl(_rt: &mut Runtime, args: &[Value]) -> Result<Value, RuntimeError> {
    let mut result = true;
    for pair in args.windows(2) {
        result = numeric::num_eq(&pair[0], &pair[1])? && result;
    }
    if let [only] = args {
        numeric::num_eq(only, only)?;
    }
    Ok(Value::Bool(result))
}

pub fn less_than_impl(_rt: &mut Runtime, args: &[Value]) -> Result<Value, RuntimeError> {
    chain("<", args, |o| o == Ordering::Less)
}

pub fn greater_than_impl(_rt: &mut Runtime, args: &[Value]) -> Result<Value, RuntimeError> {
    chain(">", args, |o| o == Ordering::Greater)
}

pub fn less_equal_impl(_rt: &mut Runtime, args: &[Value]) -> Result<Value, RuntimeError> {
    chain("<=", args, |o| o != Ordering::Greater)
}

pub fn greater_equal_impl(_rt: &mut Runtime, args: &[Value]) -> Result<Value, RuntimeError> {
    chain(">=", args, |o| o != Ordering::Less)
}

fn extremum(who: &str, args: &[Value], keep: Ordering) -> Result<Value, RuntimeError> {
    let mut best = args[0].clone();
    let mut inexact = !numeric::is_exact(&best)?;
    for v in &args[1..] {
        inexact |= !numeric::is_exact(v)?;
        if numeric::compare(who, v, &best)? == Some(keep) {
            best = v.clone();
        }
    }
    // any inexact argument makes the result inexact
    if inexact { numeric::exact_to_inexact(&best) } else { Ok(best) }
}

pub fn max_impl(_rt: &mut Runtime, args: &[Value]) -> Result<Value, RuntimeError> {
    extremum("max", args, Ordering::Greater)
}

pub fn min_impl(_rt: &mut Runtime, args: &[Value]) -> Result<Value, RuntimeError> {
    extremum("min", args, Ordering::Less)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_less_than_impl() {
        let mut rt = Runtime::new();
        let result = less_than_impl(&mut rt, &[Value::fixnum(3), Value::fixnum(7)]).unwrap();
        assert!(matches!(result, Value::Bool(true)));

        let result = less_than_impl(&mut rt, &[Value::fixnum(1), Value::fixnum(5), Value::fixnum(2)]).unwrap();
        assert!(matches!(result, Value::Bool(false)));
    }

    #[test]
    fn test_mixed_exactness() {
        let mut rt = Runtime::new();
        let result = num_eq_impl(&mut rt, &[Value::fixnum(2), Value::flonum(2.0)]).unwrap();
        assert!(matches!(result, Value::Bool(true)));
        let result = greater_equal_impl(&mut rt, &[Value::flonum(2.5), Value::fixnum(2)]).unwrap();
        assert!(matches!(result, Value::Bool(true)));
    }

    #[test]
    fn test_nan_is_unordered() {
        let mut rt = Runtime::new();
        let result = less_equal_impl(&mut rt, &[Value::flonum(f64::NAN), Value::fixnum(1)]).unwrap();
        assert!(matches!(result, Value::Bool(false)));
    }

    #[test]
    fn test_all_arguments_are_checked() {
        let mut rt = Runtime::new();
        let result = less_than_impl(&mut rt, &[Value::fixnum(2), Value::fixnum(1), Value::Null]);
        assert!(matches!(result, Err(RuntimeError::Type { .. })), "Expected type error, got {:?}", result);
    }

    #[test]
    fn test_max_contaminates_exactness() {
        let mut rt = Runtime::new();
        let result = max_impl(&mut rt, &[Value::fixnum(3), Value::flonum(1.0)]).unwrap();
        assert!(matches!(&result, Value::Flonum(f) if **f == 3.0), "Expected 3.0, got {:?}", result);
    }
}
