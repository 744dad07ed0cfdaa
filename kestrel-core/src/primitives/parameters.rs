// make-parameter
//
// A parameter is called like a procedure: no arguments reads it, one
// argument sets it. The optional guard filters values on the way in; the
// initial value is stored as given.

use std::cell::RefCell;
use std::rc::Rc;

use crate::error::RuntimeError;
use crate::interpreter::Runtime;
use crate::value::{Parameter, Value};

use super::check_procedure;

pub fn make_parameter_impl(_rt: &mut Runtime, args: &[Value]) -> Result<Value, RuntimeError> {
    let guard = match args.get(1) {
        Some(g) => {
            check_procedure("make-parameter", g)?;
            Some(g.clone())
        }
        None => None,
    };
    Ok(Value::Parameter(Rc::new(Parameter {
        value: RefCell::new(args[0].clone()),
        guard,
    })))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parameter_read_and_set() {
        let mut rt = Runtime::new();
        let result = rt.eval_str("(define p (make-parameter 1)) (p 5) (p)").unwrap();
        assert_eq!(result.as_fixnum(), Some(5));
    }

    #[test]
    fn test_guard_runs_on_set() {
        let mut rt = Runtime::new();
        let result = rt
            .eval_str("(define p (make-parameter 1 (lambda (v) (* v 10)))) (define before (p)) (p 2) (list before (p))")
            .unwrap();
        assert_eq!(result.to_string(), "(1 20)");
    }

    #[test]
    fn test_parameter_arity() {
        let mut rt = Runtime::new();
        let result = rt.eval_str("((make-parameter 1) 2 3)");
        assert!(matches!(result, Err(RuntimeError::Arity { given: 2, .. })), "Expected arity error, got {:?}", result);
    }
}
