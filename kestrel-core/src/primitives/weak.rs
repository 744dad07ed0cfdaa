// Weak boxes and ephemerons

use std::rc::Rc;

use crate::error::RuntimeError;
use crate::interpreter::Runtime;
use crate::value::Value;
use crate::weak::{Ephemeron, WeakBox};

pub fn make_weak_box_impl(_rt: &mut Runtime, args: &[Value]) -> Result<Value, RuntimeError> {
    Ok(Value::WeakBox(Rc::new(WeakBox::new(&args[0]))))
}

// (weak-box-value wb [gone]) where `gone` defaults to #f
pub fn weak_box_value_impl(_rt: &mut Runtime, args: &[Value]) -> Result<Value, RuntimeError> {
    match &args[0] {
        Value::WeakBox(wb) => Ok(wb.get().unwrap_or_else(|| args.get(1).cloned().unwrap_or(Value::Bool(false)))),
        other => Err(RuntimeError::type_error("weak-box-value", "weak-box?", other)),
    }
}

pub fn make_ephemeron_impl(_rt: &mut Runtime, args: &[Value]) -> Result<Value, RuntimeError> {
    Ok(Value::Ephemeron(Rc::new(Ephemeron::new(&args[0], args[1].clone()))))
}

pub fn ephemeron_value_impl(_rt: &mut Runtime, args: &[Value]) -> Result<Value, RuntimeError> {
    match &args[0] {
        Value::Ephemeron(e) => Ok(e.get().unwrap_or_else(|| args.get(1).cloned().unwrap_or(Value::Bool(false)))),
        other => Err(RuntimeError::type_error("ephemeron-value", "ephemeron?", other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_weak_box_follows_target_lifetime() {
        let mut rt = Runtime::new();
        let target = Value::string("payload");
        let wb = make_weak_box_impl(&mut rt, &[target.clone()]).unwrap();
        {
            let result = weak_box_value_impl(&mut rt, &[wb.clone()]).unwrap();
            assert!(result.ptr_eq(&target));
        }

        drop(target);
        let result = weak_box_value_impl(&mut rt, &[wb]).unwrap();
        assert!(matches!(result, Value::Bool(false)), "Expected #f after drop, got {:?}", result);
    }

    #[test]
    fn test_ephemeron_drops_value_with_key() {
        let mut rt = Runtime::new();
        let key = Value::string("k");
        let e = make_ephemeron_impl(&mut rt, &[key.clone(), Value::fixnum(9)]).unwrap();
        assert_eq!(ephemeron_value_impl(&mut rt, &[e.clone()]).unwrap().as_fixnum(), Some(9));

        drop(key);
        let result = ephemeron_value_impl(&mut rt, &[e, Value::Null]).unwrap();
        assert!(matches!(result, Value::Null), "Expected default, got {:?}", result);
    }
}
