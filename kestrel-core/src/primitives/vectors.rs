// Vector primitives
//
// Storage strategy is invisible to programs except through
// vector-strategy, which reports the current representation.

use std::rc::Rc;

use crate::cont::Cont;
use crate::error::RuntimeError;
use crate::interpreter::{Runtime, Step};
use crate::proxy;
use crate::value::{ProxyTarget, Value, Vector, VectorStrategy};

use super::boxes::wrap;
use super::{check_index, check_list};

pub fn vector_impl(rt: &mut Runtime, args: &[Value]) -> Result<Value, RuntimeError> {
    Ok(rt.vector(args.to_vec()))
}

// (make-vector n [fill]) with fill defaulting to 0
pub fn make_vector_impl(rt: &mut Runtime, args: &[Value]) -> Result<Value, RuntimeError> {
    let len = check_index("make-vector", &args[0])?;
    let fill = args.get(1).cloned().unwrap_or_else(|| Value::fixnum(0));
    Ok(Value::Vector(Rc::new(Vector::filled(len, &fill, rt.config.vector_strategies))))
}

pub fn vector_ref_impl(_rt: &mut Runtime, args: Vec<Value>, cont: Cont) -> Result<Step, RuntimeError> {
    let index = check_index("vector-ref", &args[1])?;
    let target = args.into_iter().next().unwrap_or(Value::Void);
    proxy::ref_step(target, Some(index), cont)
}

pub fn vector_set_impl(_rt: &mut Runtime, args: Vec<Value>, cont: Cont) -> Result<Step, RuntimeError> {
    let index = check_index("vector-set!", &args[1])?;
    let mut args = args.into_iter();
    let target = args.next().unwrap_or(Value::Void);
    let value = args.nth(1).unwrap_or(Value::Void);
    proxy::set_step(target, Some(index), value, cont)
}

fn plain_vector<'a>(who: &str, v: &'a Value) -> Result<&'a Vector, RuntimeError> {
    match v.unwrap_proxy() {
        Value::Vector(vec) => Ok(vec),
        _ => Err(RuntimeError::type_error(who, "vector?", v)),
    }
}

pub fn vector_length_impl(_rt: &mut Runtime, args: &[Value]) -> Result<Value, RuntimeError> {
    Ok(Value::fixnum(plain_vector("vector-length", &args[0])?.len() as i64))
}

// Reads the raw slots; handlers of a proxied vector are not consulted
pub fn vector_to_list_impl(rt: &mut Runtime, args: &[Value]) -> Result<Value, RuntimeError> {
    let items = plain_vector("vector->list", &args[0])?.to_vec();
    Ok(rt.list(items))
}

pub fn list_to_vector_impl(rt: &mut Runtime, args: &[Value]) -> Result<Value, RuntimeError> {
    let items = check_list("list->vector", &args[0])?;
    Ok(rt.vector(items))
}

pub fn is_vector_impl(_rt: &mut Runtime, args: &[Value]) -> Result<Value, RuntimeError> {
    let is_vector = match &args[0] {
        Value::Vector(_) => true,
        Value::Proxy(p) => p.target == ProxyTarget::Vector,
        _ => false,
    };
    Ok(Value::Bool(is_vector))
}

pub fn vector_strategy_impl(rt: &mut Runtime, args: &[Value]) -> Result<Value, RuntimeError> {
    let name = match plain_vector("vector-strategy", &args[0])?.strategy() {
        VectorStrategy::Fixnum => "fixnum",
        VectorStrategy::Flonum => "flonum",
        VectorStrategy::Object => "object",
    };
    Ok(rt.symbol_value(name))
}

pub fn chaperone_vector_impl(_rt: &mut Runtime, args: &[Value]) -> Result<Value, RuntimeError> {
    wrap("chaperone-vector", ProxyTarget::Vector, true, args)
}

pub fn impersonate_vector_impl(_rt: &mut Runtime, args: &[Value]) -> Result<Value, RuntimeError> {
    wrap("impersonate-vector", ProxyTarget::Vector, false, args)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vector_ref_and_set() {
        let mut rt = Runtime::new();
        let result = rt.eval_str("(define v (make-vector 3 0)) (vector-set! v 1 'x) (list (vector-ref v 1) (vector-length v))").unwrap();
        assert_eq!(result.to_string(), "(x 3)");
    }

    #[test]
    fn test_strategy_switches_on_heterogeneous_write() {
        let mut rt = Runtime::new();
        let result = rt
            .eval_str("(define v (vector 1 2 3)) (define before (vector-strategy v)) (vector-set! v 0 \"s\") (list before (vector-strategy v) v)")
            .unwrap();
        assert_eq!(result.to_string(), "(fixnum object #(\"s\" 2 3))");
    }

    #[test]
    fn test_strategies_can_be_disabled() {
        let config = crate::config::RuntimeConfig::default().with_vector_strategies(false);
        let mut rt = Runtime::with_config(config);
        let result = rt.eval_str("(vector-strategy (vector 1.5 2.5))").unwrap();
        assert_eq!(result.to_string(), "object");
    }

    #[test]
    fn test_index_out_of_range() {
        let mut rt = Runtime::new();
        let result = rt.eval_str("(vector-ref (vector 1 2) 2)");
        assert!(matches!(&result, Err(RuntimeError::User(msg)) if msg.contains("index is out of range")), "Expected range error, got {:?}", result);
    }

    #[test]
    fn test_literal_vector_is_immutable() {
        let mut rt = Runtime::new();
        let result = rt.eval_str("(vector-set! #(1 2) 0 5)");
        assert!(matches!(result, Err(RuntimeError::Type { .. })), "Expected type error, got {:?}", result);
    }

    #[test]
    fn test_chaperoned_vector_reads_through_handler() {
        let mut rt = Runtime::new();
        let result = rt
            .eval_str("(define log '()) (define v (chaperone-vector (vector 1 2) (lambda (v i x) (set! log (cons i log)) x) (lambda (v i x) x))) (list (vector-ref v 1) log)")
            .unwrap();
        assert_eq!(result.to_string(), "(2 (1))");
    }
}
