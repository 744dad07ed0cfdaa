// unsafe-undefined checks
//
// `unsafe-undefined` itself is a value bound at registration time. The
// checks pass any other value through and name the variable on failure.

use crate::error::RuntimeError;
use crate::interpreter::Runtime;
use crate::value::Value;

fn variable_name(v: &Value) -> String {
    match v {
        Value::Symbol(s) => s.name().to_string(),
        other => other.display_string(),
    }
}

pub fn check_not_unsafe_undefined_impl(_rt: &mut Runtime, args: &[Value]) -> Result<Value, RuntimeError> {
    match &args[0] {
        Value::Undefined => Err(RuntimeError::User(format!(
            "{}: undefined; use before initialization",
            variable_name(&args[1])
        ))),
        v => Ok(v.clone()),
    }
}

pub fn check_not_unsafe_undefined_assign_impl(_rt: &mut Runtime, args: &[Value]) -> Result<Value, RuntimeError> {
    match &args[0] {
        Value::Undefined => Err(RuntimeError::User(format!(
            "{}: undefined; assignment before initialization",
            variable_name(&args[1])
        ))),
        v => Ok(v.clone()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checks_pass_values_through() {
        let mut rt = Runtime::new();
        let x = rt.symbol_value("x");
        let result = check_not_unsafe_undefined_impl(&mut rt, &[Value::fixnum(3), x]).unwrap();
        assert_eq!(result.as_fixnum(), Some(3));
    }

    #[test]
    fn test_undefined_is_reported() {
        let mut rt = Runtime::new();
        let result = rt.eval_str("(check-not-unsafe-undefined unsafe-undefined 'x)");
        assert!(
            matches!(&result, Err(RuntimeError::User(msg)) if msg == "x: undefined; use before initialization"),
            "Expected use-before-init error, got {:?}",
            result
        );
        let result = rt.eval_str("(check-not-unsafe-undefined/assign unsafe-undefined 'y)");
        assert!(
            matches!(&result, Err(RuntimeError::User(msg)) if msg == "y: undefined; assignment before initialization"),
            "Expected assignment error, got {:?}",
            result
        );
    }
}
