// Reading and writing boxes and vectors that may sit behind proxies.
//
// Plain containers answer immediately. A proxy layer pushes a frame, reads
// (or writes) the layer below, then calls its handler through the
// trampoline. Chaperone handlers must hand back something eqv? to what they
// were given.

use crate::cont::{Cont, ContKind, Values};
use crate::equal;
use crate::error::RuntimeError;
use crate::interpreter::Step;
use crate::value::{Proxy, ProxyTarget, Value};

fn who(index: Option<usize>) -> &'static str {
    match index {
        None => "unbox",
        Some(_) => "vector-ref",
    }
}

/// Slot read on an unproxied container. None for proxies, wrong kinds and
/// out-of-range indices.
pub fn direct_ref(container: &Value, index: Option<usize>) -> Option<Value> {
    match (container, index) {
        (Value::Box(b), None) => Some(b.get()),
        (Value::Vector(v), Some(i)) => v.get(i),
        _ => None,
    }
}

fn check_target(container: &Value, index: Option<usize>) -> Result<(), RuntimeError> {
    let expected = match index {
        None => ProxyTarget::Box,
        Some(_) => ProxyTarget::Vector,
    };
    let actual = match container {
        Value::Box(_) => Some(ProxyTarget::Box),
        Value::Vector(_) => Some(ProxyTarget::Vector),
        Value::Proxy(p) => Some(p.target),
        _ => None,
    };
    if actual == Some(expected) {
        Ok(())
    } else {
        let kind = match expected {
            ProxyTarget::Box => "box?",
            ProxyTarget::Vector => "vector?",
        };
        Err(RuntimeError::type_error(who(index), kind, container))
    }
}

fn range_error(who: &str, index: usize, container: &Value) -> RuntimeError {
    RuntimeError::User(format!(
        "{}: index is out of range\n  index: {}\n  valid range: [0, {}]\n  vector: {}",
        who,
        index,
        container_len(container).saturating_sub(1),
        container
    ))
}

fn container_len(container: &Value) -> usize {
    match container.unwrap_proxy() {
        Value::Vector(v) => v.len(),
        _ => 1,
    }
}

/// Reads slot `index` (None for a box) and delivers it to `cont`.
pub fn ref_step(
    container: Value,
    index: Option<usize>,
    cont: Cont,
) -> Result<Step, RuntimeError> {
    check_target(&container, index)?;
    if let Some(i) = index {
        if i >= container_len(&container) {
            return Err(range_error(who(index), i, &container));
        }
    }
    match &container {
        Value::Proxy(p) => {
            let inner = p.inner.clone();
            let cont = cont.push(ContKind::ProxyRef {
                proxy: p.clone(),
                index,
            });
            ref_step(inner, index, cont)
        }
        _ => match direct_ref(&container, index) {
            Some(v) => Ok(Step::plug1(v, cont)),
            None => Err(RuntimeError::type_error(who(index), "box? or vector?", &container)),
        },
    }
}

fn handler_args(proxy: &Proxy, index: Option<usize>, value: Value) -> Vec<Value> {
    match index {
        None => vec![proxy.inner.clone(), value],
        Some(i) => vec![proxy.inner.clone(), Value::fixnum(i as i64), value],
    }
}

// The layer below produced `vals`; run this layer's read handler on it
pub(crate) fn after_inner_ref(
    proxy: &Proxy,
    index: Option<usize>,
    vals: Values,
    cont: Cont,
) -> Result<Step, RuntimeError> {
    let value = vals.check_one()?;
    let cont = if proxy.chaperone {
        cont.push(ContKind::ChaperoneCheck {
            original: value.clone(),
        })
    } else {
        cont
    };
    Ok(Step::Apply {
        callee: proxy.ref_handler.clone(),
        args: handler_args(proxy, index, value),
        cont,
    })
}

pub(crate) fn chaperone_check(original: &Value, vals: Values, cont: Cont) -> Result<Step, RuntimeError> {
    let result = vals.check_one()?;
    if equal::eqv(&result, original) {
        Ok(Step::plug1(result, cont))
    } else {
        Err(RuntimeError::User(format!(
            "chaperone: non-chaperone result; received a value that is not the original\n  original: {}\n  received: {}",
            original, result
        )))
    }
}

/// Writes `value` into slot `index`, running set handlers on the way down.
pub fn set_step(
    container: Value,
    index: Option<usize>,
    value: Value,
    cont: Cont,
) -> Result<Step, RuntimeError> {
    let who = match index {
        None => "set-box!",
        Some(_) => "vector-set!",
    };
    check_target(&container, index).map_err(|_| {
        RuntimeError::type_error(who, if index.is_some() { "vector?" } else { "box?" }, &container)
    })?;
    if container.is_immutable() {
        let expected = match index {
            None => "(and/c box? (not/c immutable?))",
            Some(_) => "(and/c vector? (not/c immutable?))",
        };
        return Err(RuntimeError::type_error(who, expected, &container));
    }
    match &container {
        Value::Proxy(p) => {
            let mut cont = cont.push(ContKind::ProxySet {
                inner: p.inner.clone(),
                index,
            });
            if p.chaperone {
                cont = cont.push(ContKind::ChaperoneCheck {
                    original: value.clone(),
                });
            }
            Ok(Step::Apply {
                callee: p.set_handler.clone(),
                args: handler_args(p, index, value),
                cont,
            })
        }
        Value::Box(b) => {
            b.set(value);
            Ok(Step::plug1(Value::Void, cont))
        }
        Value::Vector(v) => {
            let i = index.unwrap_or(0);
            if v.set(i, value) {
                Ok(Step::plug1(Value::Void, cont))
            } else {
                Err(range_error(who, i, &container))
            }
        }
        _ => Err(RuntimeError::type_error(who, "box? or vector?", &container)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_direct_ref() {
        let b = Value::new_box(Value::fixnum(1), false);
        assert_eq!(direct_ref(&b, None).and_then(|v| v.as_fixnum()), Some(1));
        assert!(direct_ref(&b, Some(0)).is_none());

        let v = Value::vector(vec![Value::fixnum(4), Value::fixnum(5)], true);
        assert_eq!(direct_ref(&v, Some(1)).and_then(|x| x.as_fixnum()), Some(5));
        assert!(direct_ref(&v, Some(2)).is_none());
    }

    #[test]
    fn test_chaperone_check_rejects_replacement() {
        let original = Value::string("a");
        let ok = chaperone_check(&original, Values::one(original.clone()), Cont::done());
        assert!(ok.is_ok());
        let bad = chaperone_check(&original, Values::one(Value::string("a")), Cont::done());
        assert!(matches!(bad, Err(RuntimeError::User(_))), "Expected chaperone error");
    }
}
