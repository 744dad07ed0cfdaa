// Pair and list primitives: immutable cons pairs plus mutable mpairs
//
// cons honours the runtime's cons-specialization switch, so a fixnum car
// may be stored unboxed; car reconstructs the boxed form either way.

use crate::error::RuntimeError;
use crate::interpreter::Runtime;
use crate::value::{MPair, Value};

use super::{check_index, check_list};
use std::rc::Rc;

pub fn cons_impl(rt: &mut Runtime, args: &[Value]) -> Result<Value, RuntimeError> {
    Ok(rt.cons(args[0].clone(), args[1].clone()))
}

pub fn car_impl(_rt: &mut Runtime, args: &[Value]) -> Result<Value, RuntimeError> {
    match &args[0] {
        Value::Pair(p) => Ok(p.car()),
        other => Err(RuntimeError::type_error("car", "pair?", other)),
    }
}

pub fn cdr_impl(_rt: &mut Runtime, args: &[Value]) -> Result<Value, RuntimeError> {
    match &args[0] {
        Value::Pair(p) => Ok(p.cdr().clone()),
        other => Err(RuntimeError::type_error("cdr", "pair?", other)),
    }
}

pub fn list_impl(rt: &mut Runtime, args: &[Value]) -> Result<Value, RuntimeError> {
    Ok(rt.list(args.to_vec()))
}

pub fn is_null_impl(_rt: &mut Runtime, args: &[Value]) -> Result<Value, RuntimeError> {
    Ok(Value::Bool(matches!(args[0], Value::Null)))
}

pub fn is_pair_impl(_rt: &mut Runtime, args: &[Value]) -> Result<Value, RuntimeError> {
    Ok(Value::Bool(matches!(args[0], Value::Pair(_))))
}

pub fn is_list_impl(_rt: &mut Runtime, args: &[Value]) -> Result<Value, RuntimeError> {
    Ok(Value::Bool(args[0].list_to_vec().is_some()))
}

pub fn length_impl(_rt: &mut Runtime, args: &[Value]) -> Result<Value, RuntimeError> {
    let items = check_list("length", &args[0])?;
    Ok(Value::fixnum(items.len() as i64))
}

pub fn reverse_impl(rt: &mut Runtime, args: &[Value]) -> Result<Value, RuntimeError> {
    let mut items = check_list("reverse", &args[0])?;
    items.reverse();
    Ok(rt.list(items))
}

// The last argument becomes the tail as is and need not be a list
pub fn append_impl(rt: &mut Runtime, args: &[Value]) -> Result<Value, RuntimeError> {
    let Some((last, init)) = args.split_last() else {
        return Ok(Value::Null);
    };
    let mut items = Vec::new();
    for list in init {
        items.extend(check_list("append", list)?);
    }
    Ok(Value::list_with(items, last.clone(), rt.config.cons_specialization))
}

pub fn list_ref_impl(_rt: &mut Runtime, args: &[Value]) -> Result<Value, RuntimeError> {
    let index = check_index("list-ref", &args[1])?;
    let mut current = args[0].clone();
    for _ in 0..index {
        current = match &current {
            Value::Pair(p) => p.cdr().clone(),
            _ => return Err(RuntimeError::type_error("list-ref", "list with enough elements", &args[0])),
        };
    }
    match &current {
        Value::Pair(p) => Ok(p.car()),
        _ => Err(RuntimeError::type_error("list-ref", "list with enough elements", &args[0])),
    }
}

// -- mutable pairs -----------------------------------------------------------

pub fn mcons_impl(_rt: &mut Runtime, args: &[Value]) -> Result<Value, RuntimeError> {
    Ok(Value::MPair(Rc::new(MPair::new(args[0].clone(), args[1].clone()))))
}

fn check_mpair<'a>(who: &str, v: &'a Value) -> Result<&'a MPair, RuntimeError> {
    match v {
        Value::MPair(p) => Ok(p),
        other => Err(RuntimeError::type_error(who, "mpair?", other)),
    }
}

pub fn mcar_impl(_rt: &mut Runtime, args: &[Value]) -> Result<Value, RuntimeError> {
    Ok(check_mpair("mcar", &args[0])?.car.borrow().clone())
}

pub fn mcdr_impl(_rt: &mut Runtime, args: &[Value]) -> Result<Value, RuntimeError> {
    Ok(check_mpair("mcdr", &args[0])?.cdr.borrow().clone())
}

pub fn set_mcar_impl(_rt: &mut Runtime, args: &[Value]) -> Result<Value, RuntimeError> {
    *check_mpair("set-mcar!", &args[0])?.car.borrow_mut() = args[1].clone();
    Ok(Value::Void)
}

pub fn set_mcdr_impl(_rt: &mut Runtime, args: &[Value]) -> Result<Value, RuntimeError> {
    *check_mpair("set-mcdr!", &args[0])?.cdr.borrow_mut() = args[1].clone();
    Ok(Value::Void)
}

pub fn is_mpair_impl(_rt: &mut Runtime, args: &[Value]) -> Result<Value, RuntimeError> {
    Ok(Value::Bool(matches!(args[0], Value::MPair(_))))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cons_car_cdr() {
        let mut rt = Runtime::new();
        let pair = cons_impl(&mut rt, &[Value::fixnum(1), Value::fixnum(2)]).unwrap();
        assert_eq!(pair.to_string(), "(1 . 2)");
        assert_eq!(car_impl(&mut rt, &[pair.clone()]).unwrap().as_fixnum(), Some(1));
        assert_eq!(cdr_impl(&mut rt, &[pair]).unwrap().as_fixnum(), Some(2));
    }

    #[test]
    fn test_specialized_and_boxed_pairs_print_alike() {
        let mut rt = Runtime::with_config(crate::config::RuntimeConfig::default().with_cons_specialization(false));
        let boxed = cons_impl(&mut rt, &[Value::fixnum(1), Value::Null]).unwrap();
        let mut rt = Runtime::new();
        let unboxed = cons_impl(&mut rt, &[Value::fixnum(1), Value::Null]).unwrap();
        assert_eq!(boxed.to_string(), unboxed.to_string());
        assert!(crate::equal::equal_sync(&boxed, &unboxed).unwrap_or(false));
    }

    #[test]
    fn test_car_of_non_pair() {
        let mut rt = Runtime::new();
        let result = car_impl(&mut rt, &[Value::Null]);
        assert!(matches!(result, Err(RuntimeError::Type { .. })), "Expected type error, got {:?}", result);
    }

    #[test]
    fn test_append_keeps_improper_tail() {
        let mut rt = Runtime::new();
        let a = rt.list(vec![Value::fixnum(1), Value::fixnum(2)]);
        let result = append_impl(&mut rt, &[a, Value::fixnum(3)]).unwrap();
        assert_eq!(result.to_string(), "(1 2 . 3)");
    }

    #[test]
    fn test_mpair_mutation() {
        let mut rt = Runtime::new();
        let p = mcons_impl(&mut rt, &[Value::fixnum(1), Value::fixnum(2)]).unwrap();
        set_mcar_impl(&mut rt, &[p.clone(), Value::fixnum(10)]).unwrap();
        assert_eq!(mcar_impl(&mut rt, &[p.clone()]).unwrap().as_fixnum(), Some(10));
        assert_eq!(mcdr_impl(&mut rt, &[p]).unwrap().as_fixnum(), Some(2));
    }
}
