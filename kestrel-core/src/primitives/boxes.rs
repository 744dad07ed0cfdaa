// Box primitives, including chaperone and impersonator wrappers
//
// unbox and set-box! go through the proxy layer, so they are control
// primitives: a proxied box calls its handlers on the way through.

use std::rc::Rc;

use crate::cont::Cont;
use crate::error::RuntimeError;
use crate::interpreter::{Runtime, Step};
use crate::proxy;
use crate::value::{Proxy, ProxyTarget, Value};

use super::check_procedure;

pub fn box_impl(_rt: &mut Runtime, args: &[Value]) -> Result<Value, RuntimeError> {
    Ok(Value::new_box(args[0].clone(), false))
}

pub fn box_immutable_impl(_rt: &mut Runtime, args: &[Value]) -> Result<Value, RuntimeError> {
    Ok(Value::new_box(args[0].clone(), true))
}

pub fn unbox_impl(_rt: &mut Runtime, args: Vec<Value>, cont: Cont) -> Result<Step, RuntimeError> {
    let target = args.into_iter().next().unwrap_or(Value::Void);
    proxy::ref_step(target, None, cont)
}

pub fn set_box_impl(_rt: &mut Runtime, args: Vec<Value>, cont: Cont) -> Result<Step, RuntimeError> {
    let mut args = args.into_iter();
    let target = args.next().unwrap_or(Value::Void);
    let value = args.next().unwrap_or(Value::Void);
    proxy::set_step(target, None, value, cont)
}

pub fn is_box_impl(_rt: &mut Runtime, args: &[Value]) -> Result<Value, RuntimeError> {
    let is_box = match &args[0] {
        Value::Box(_) => true,
        Value::Proxy(p) => p.target == ProxyTarget::Box,
        _ => false,
    };
    Ok(Value::Bool(is_box))
}

// Shared by the box and vector wrappers
pub(crate) fn wrap(
    who: &str,
    target: ProxyTarget,
    chaperone: bool,
    args: &[Value],
) -> Result<Value, RuntimeError> {
    let inner = &args[0];
    let fits = match inner {
        Value::Box(_) => target == ProxyTarget::Box,
        Value::Vector(_) => target == ProxyTarget::Vector,
        Value::Proxy(p) => p.target == target,
        _ => false,
    };
    if !fits {
        let expected = match target {
            ProxyTarget::Box => "box?",
            ProxyTarget::Vector => "vector?",
        };
        return Err(RuntimeError::type_error(who, expected, inner));
    }
    // impersonators may change results, which an immutable value forbids
    if !chaperone && inner.is_immutable() {
        return Err(RuntimeError::type_error(who, "(not/c immutable?)", inner));
    }
    check_procedure(who, &args[1])?;
    check_procedure(who, &args[2])?;
    Ok(Value::Proxy(Rc::new(Proxy {
        inner: inner.clone(),
        ref_handler: args[1].clone(),
        set_handler: args[2].clone(),
        chaperone,
        target,
    })))
}

pub fn chaperone_box_impl(_rt: &mut Runtime, args: &[Value]) -> Result<Value, RuntimeError> {
    wrap("chaperone-box", ProxyTarget::Box, true, args)
}

pub fn impersonate_box_impl(_rt: &mut Runtime, args: &[Value]) -> Result<Value, RuntimeError> {
    wrap("impersonate-box", ProxyTarget::Box, false, args)
}
