// Control primitives: continuations, multiple values, apply and the
// higher-order list functions
//
// RUST CONCEPT: Host loops in continuation-passing style
// map and friends cannot call the procedure and wait for the answer; they
// return an Apply step whose continuation is a host closure that carries the
// loop state forward. The native stack stays flat however long the list.

use crate::cont::{Cont, Values};
use crate::error::RuntimeError;
use crate::interpreter::{Runtime, Step};
use crate::value::Value;

use super::{check_list, check_procedure};

// (call/cc f): f receives the current continuation as a procedure
pub fn call_cc_impl(_rt: &mut Runtime, args: Vec<Value>, cont: Cont) -> Result<Step, RuntimeError> {
    let f = args.into_iter().next().unwrap_or(Value::Void);
    check_procedure("call-with-current-continuation", &f)?;
    Ok(Step::Apply {
        callee: f,
        args: vec![Value::Continuation(cont.clone())],
        cont,
    })
}

pub fn values_impl(_rt: &mut Runtime, args: Vec<Value>, cont: Cont) -> Result<Step, RuntimeError> {
    Ok(Step::Plug {
        vals: Values::many(args),
        cont,
    })
}

// (call-with-values producer consumer)
pub fn call_with_values_impl(_rt: &mut Runtime, args: Vec<Value>, cont: Cont) -> Result<Step, RuntimeError> {
    let mut args = args.into_iter();
    let producer = args.next().unwrap_or(Value::Void);
    let consumer = args.next().unwrap_or(Value::Void);
    check_procedure("call-with-values", &producer)?;
    check_procedure("call-with-values", &consumer)?;
    Ok(Step::Apply {
        callee: producer,
        args: Vec::new(),
        cont: cont.push(crate::cont::ContKind::CallWithValues { consumer }),
    })
}

// (apply f a ... lst): a tail call with the spread arguments
pub fn apply_impl(_rt: &mut Runtime, mut args: Vec<Value>, cont: Cont) -> Result<Step, RuntimeError> {
    let f = args.remove(0);
    check_procedure("apply", &f)?;
    let last = args.pop().unwrap_or(Value::Null);
    args.extend(check_list("apply", &last)?);
    Ok(Step::Apply {
        callee: f,
        args,
        cont,
    })
}

pub fn continuation_depth_impl(_rt: &mut Runtime, _args: Vec<Value>, cont: Cont) -> Result<Step, RuntimeError> {
    let depth = cont.depth() as i64;
    Ok(Step::plug1(Value::fixnum(depth), cont))
}

pub fn is_procedure_impl(_rt: &mut Runtime, args: &[Value]) -> Result<Value, RuntimeError> {
    Ok(Value::Bool(args[0].is_procedure()))
}

pub fn procedure_arity_includes_impl(_rt: &mut Runtime, args: &[Value]) -> Result<Value, RuntimeError> {
    let arity = args[0]
        .arity()
        .ok_or_else(|| RuntimeError::type_error("procedure-arity-includes?", "procedure?", &args[0]))?;
    let n = super::check_index("procedure-arity-includes?", &args[1])?;
    Ok(Value::Bool(arity.accepts(n)))
}

pub fn void_impl(_rt: &mut Runtime, _args: &[Value]) -> Result<Value, RuntimeError> {
    Ok(Value::Void)
}

// (error 'who "message" v ...) or (error "message" v ...)
pub fn error_impl(_rt: &mut Runtime, args: &[Value]) -> Result<Value, RuntimeError> {
    let mut message = match (&args[0], args.get(1)) {
        (Value::Symbol(who), Some(Value::String(msg))) => format!("{}: {}", who.name(), msg.text()),
        (Value::Symbol(who), None) => format!("error: {}", who.name()),
        (Value::String(msg), _) => msg.text().clone(),
        (other, _) => other.to_string(),
    };
    let skip = match (&args[0], args.get(1)) {
        (Value::Symbol(_), Some(Value::String(_))) => 2,
        _ => 1,
    };
    for irritant in &args[skip..] {
        message.push(' ');
        message.push_str(&irritant.to_string());
    }
    Err(RuntimeError::User(message))
}

// -- higher-order list functions ---------------------------------------------

// The lists as vectors, all the same length
fn columns(who: &str, lists: &[Value]) -> Result<(Vec<Vec<Value>>, usize), RuntimeError> {
    let lists = lists
        .iter()
        .map(|l| check_list(who, l))
        .collect::<Result<Vec<_>, _>>()?;
    let len = lists.first().map_or(0, Vec::len);
    if lists.iter().any(|l| l.len() != len) {
        return Err(RuntimeError::User(format!("{}: all lists must have same size", who)));
    }
    Ok((lists, len))
}

fn row(lists: &[Vec<Value>], index: usize) -> Vec<Value> {
    lists.iter().map(|l| l[index].clone()).collect()
}

enum Walk {
    Map(Vec<Value>),
    ForEach,
    AndMap,
    OrMap,
}

struct Loop {
    walk: Walk,
    f: Value,
    lists: Vec<Vec<Value>>,
    len: usize,
}

fn step_loop(rt: &mut Runtime, mut state: Loop, index: usize, last: Value, cont: Cont) -> Result<Step, RuntimeError> {
    if index == state.len {
        let result = match state.walk {
            Walk::Map(acc) => rt.list(acc),
            Walk::ForEach => Value::Void,
            Walk::AndMap | Walk::OrMap => last,
        };
        return Ok(Step::plug1(result, cont));
    }
    let args = row(&state.lists, index);
    let f = state.f.clone();
    // the final andmap/ormap call is in tail position
    if index + 1 == state.len && matches!(state.walk, Walk::AndMap | Walk::OrMap) {
        return Ok(Step::Apply { callee: f, args, cont });
    }
    let next = cont.then(move |rt, vals, cont| {
        let value = vals.check_one()?;
        match &mut state.walk {
            Walk::Map(acc) => acc.push(value.clone()),
            Walk::AndMap if !value.is_true() => return Ok(Step::plug1(value, cont)),
            Walk::OrMap if value.is_true() => return Ok(Step::plug1(value, cont)),
            _ => {}
        }
        step_loop(rt, state, index + 1, value, cont)
    });
    Ok(Step::Apply {
        callee: f,
        args,
        cont: next,
    })
}

fn start(rt: &mut Runtime, who: &str, walk: Walk, mut args: Vec<Value>, cont: Cont) -> Result<Step, RuntimeError> {
    let f = args.remove(0);
    check_procedure(who, &f)?;
    let (lists, len) = columns(who, &args)?;
    let empty = match walk {
        Walk::AndMap => Value::Bool(true),
        Walk::OrMap => Value::Bool(false),
        _ => Value::Void,
    };
    step_loop(rt, Loop { walk, f, lists, len }, 0, empty, cont)
}

pub fn map_impl(rt: &mut Runtime, args: Vec<Value>, cont: Cont) -> Result<Step, RuntimeError> {
    start(rt, "map", Walk::Map(Vec::new()), args, cont)
}

pub fn for_each_impl(rt: &mut Runtime, args: Vec<Value>, cont: Cont) -> Result<Step, RuntimeError> {
    start(rt, "for-each", Walk::ForEach, args, cont)
}

pub fn andmap_impl(rt: &mut Runtime, args: Vec<Value>, cont: Cont) -> Result<Step, RuntimeError> {
    start(rt, "andmap", Walk::AndMap, args, cont)
}

pub fn ormap_impl(rt: &mut Runtime, args: Vec<Value>, cont: Cont) -> Result<Step, RuntimeError> {
    start(rt, "ormap", Walk::OrMap, args, cont)
}

// (foldl f init lst ...): f gets the elements, then the accumulator
pub fn foldl_impl(_rt: &mut Runtime, mut args: Vec<Value>, cont: Cont) -> Result<Step, RuntimeError> {
    let f = args.remove(0);
    check_procedure("foldl", &f)?;
    let init = args.remove(0);
    let (lists, len) = columns("foldl", &args)?;
    fold_step(f, lists, len, 0, init, cont)
}

fn fold_step(f: Value, lists: Vec<Vec<Value>>, len: usize, index: usize, acc: Value, cont: Cont) -> Result<Step, RuntimeError> {
    if index == len {
        return Ok(Step::plug1(acc, cont));
    }
    let mut args = row(&lists, index);
    args.push(acc);
    let callee = f.clone();
    let next = cont.then(move |_rt, vals, cont| fold_step(f, lists, len, index + 1, vals.check_one()?, cont));
    Ok(Step::Apply {
        callee,
        args,
        cont: next,
    })
}

// (filter pred lst)
pub fn filter_impl(_rt: &mut Runtime, args: Vec<Value>, cont: Cont) -> Result<Step, RuntimeError> {
    let pred = args[0].clone();
    check_procedure("filter", &pred)?;
    let items = check_list("filter", &args[1])?;
    filter_step(pred, items, 0, Vec::new(), cont)
}

fn filter_step(pred: Value, items: Vec<Value>, index: usize, kept: Vec<Value>, cont: Cont) -> Result<Step, RuntimeError> {
    let Some(item) = items.get(index).cloned() else {
        return Ok(Step::Plug {
            vals: Values::one(Value::list(kept)),
            cont,
        });
    };
    let callee = pred.clone();
    let next = cont.then(move |_rt, vals, cont| {
        let mut kept = kept;
        if vals.check_one()?.is_true() {
            kept.push(items[index].clone());
        }
        filter_step(pred, items, index + 1, kept, cont)
    });
    Ok(Step::Apply {
        callee,
        args: vec![item],
        cont: next,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_values_and_call_with_values() {
        let mut rt = Runtime::new();
        let result = rt.eval_str("(call-with-values (lambda () (values 1 2 3)) list)").unwrap();
        assert_eq!(result.to_string(), "(1 2 3)");
    }

    #[test]
    fn test_apply_spreads_last_list() {
        let mut rt = Runtime::new();
        let result = rt.eval_str("(apply + 1 2 '(3 4))").unwrap();
        assert_eq!(result.as_fixnum(), Some(10));
    }

    #[test]
    fn test_call_cc_escape() {
        let mut rt = Runtime::new();
        let result = rt.eval_str("(+ 1 (call/cc (lambda (k) (+ 10 (k 5)))))").unwrap();
        assert_eq!(result.as_fixnum(), Some(6));
    }

    #[test]
    fn test_map_and_fold() {
        let mut rt = Runtime::new();
        let result = rt.eval_str("(map (lambda (x y) (* x y)) '(1 2 3) '(4 5 6))").unwrap();
        assert_eq!(result.to_string(), "(4 10 18)");
        let result = rt.eval_str("(foldl cons '() '(1 2 3))").unwrap();
        assert_eq!(result.to_string(), "(3 2 1)");
        let result = rt.eval_str("(filter (lambda (x) (< x 3)) '(1 5 2 4))").unwrap();
        assert_eq!(result.to_string(), "(1 2)");
    }

    #[test]
    fn test_andmap_ormap() {
        let mut rt = Runtime::new();
        assert!(matches!(rt.eval_str("(andmap number? '(1 2 x))").unwrap(), Value::Bool(false)));
        assert!(matches!(rt.eval_str("(andmap number? '())").unwrap(), Value::Bool(true)));
        assert_eq!(rt.eval_str("(ormap (lambda (x) (and (> x 1) x)) '(1 2 3))").unwrap().as_fixnum(), Some(2));
    }

    #[test]
    fn test_map_length_mismatch() {
        let mut rt = Runtime::new();
        let result = rt.eval_str("(map + '(1 2) '(1))");
        assert!(matches!(result, Err(RuntimeError::User(_))), "Expected User error, got {:?}", result);
    }

    #[test]
    fn test_error_message() {
        let mut rt = Runtime::new();
        let result = rt.eval_str("(error 'boom \"went wrong:\" 42)");
        assert!(matches!(&result, Err(RuntimeError::User(msg)) if msg == "boom: went wrong: 42"), "Expected user error, got {:?}", result);
    }

    #[test]
    fn test_continuation_depth_in_tail_loop() {
        let mut rt = Runtime::new();
        let result = rt
            .eval_str("(define (loop n) (if (= n 0) (continuation-depth) (loop (- n 1)))) (list (loop 0) (loop 1000))")
            .unwrap();
        let depths = result.list_to_vec().unwrap();
        assert_eq!(depths[0].as_fixnum(), depths[1].as_fixnum());
    }
}
