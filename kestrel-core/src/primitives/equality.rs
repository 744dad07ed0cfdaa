// Equality primitives: eq? eqv? equal? not
//
// equal? is a control primitive. Comparing through a proxy runs the proxy's
// handlers, which are ordinary procedures, so the comparison has to be able
// to suspend in the middle of a structure.

use crate::cont::Cont;
use crate::equal;
use crate::error::RuntimeError;
use crate::interpreter::{Runtime, Step};
use crate::value::Value;

pub fn eq_impl(_rt: &mut Runtime, args: &[Value]) -> Result<Value, RuntimeError> {
    Ok(Value::Bool(equal::eq(&args[0], &args[1])))
}

pub fn eqv_impl(_rt: &mut Runtime, args: &[Value]) -> Result<Value, RuntimeError> {
    Ok(Value::Bool(equal::eqv(&args[0], &args[1])))
}

pub fn equal_impl(_rt: &mut Runtime, args: Vec<Value>, cont: Cont) -> Result<Step, RuntimeError> {
    let mut args = args.into_iter();
    match (args.next(), args.next()) {
        (Some(a), Some(b)) => equal::equal_step(a, b, cont),
        _ => Ok(Step::plug1(Value::Bool(false), cont)),
    }
}

pub fn not_impl(_rt: &mut Runtime, args: &[Value]) -> Result<Value, RuntimeError> {
    Ok(Value::Bool(!args[0].is_true()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_eq_on_small_values() {
        let mut rt = Runtime::new();
        // fixnums and characters are eq? by value
        let result = eq_impl(&mut rt, &[Value::fixnum(7), Value::fixnum(7)]).unwrap();
        assert!(matches!(result, Value::Bool(true)));
        let result = eq_impl(&mut rt, &[Value::char('a'), Value::char('a')]).unwrap();
        assert!(matches!(result, Value::Bool(true)));
        let result = eq_impl(&mut rt, &[Value::string("a"), Value::string("a")]).unwrap();
        assert!(matches!(result, Value::Bool(false)));
    }

    #[test]
    fn test_eqv_on_flonums() {
        let mut rt = Runtime::new();
        let result = eqv_impl(&mut rt, &[Value::flonum(1.5), Value::flonum(1.5)]).unwrap();
        assert!(matches!(result, Value::Bool(true)));
        let result = eqv_impl(&mut rt, &[Value::fixnum(1), Value::flonum(1.0)]).unwrap();
        assert!(matches!(result, Value::Bool(false)));
    }

    #[test]
    fn test_equal_runs_in_the_trampoline() {
        let mut rt = Runtime::new();
        let a = rt.list(vec![Value::fixnum(1), Value::string("x")]);
        let b = rt.list(vec![Value::fixnum(1), Value::string("x")]);
        let step = equal_impl(&mut rt, vec![a, b], Cont::done()).unwrap();
        let result = rt.execute(step).unwrap().check_one().unwrap();
        assert!(matches!(result, Value::Bool(true)));
    }

    #[test]
    fn test_not_impl() {
        let mut rt = Runtime::new();
        assert!(matches!(not_impl(&mut rt, &[Value::Bool(false)]).unwrap(), Value::Bool(true)));
        assert!(matches!(not_impl(&mut rt, &[Value::Null]).unwrap(), Value::Bool(false)));
    }
}
