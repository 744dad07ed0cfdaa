// The three equality tiers.
//
// eq? and eqv? are plain functions. equal? walks both structures with an
// explicit work list; when it reaches a proxy the list is parked in a
// continuation frame while the handler runs, and picked up again when the
// handler's result is delivered.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use crate::cont::{Cont, ContKind};
use crate::error::RuntimeError;
use crate::interpreter::Step;
use crate::proxy;
use crate::value::{ProxyTarget, Value};

/// Identity, except fixnums and characters compare by value.
pub fn eq(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Fixnum(x), Value::Fixnum(y)) => x == y,
        (Value::Char(x), Value::Char(y)) => x == y,
        _ => a.ptr_eq(b),
    }
}

fn flonum_eqv(x: f64, y: f64) -> bool {
    x.to_bits() == y.to_bits() || (x.is_nan() && y.is_nan())
}

/// Value equality for numbers and characters, identity for the rest.
pub fn eqv(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Fixnum(x), Value::Fixnum(y)) => x == y,
        (Value::Bignum(x), Value::Bignum(y)) => x == y,
        (Value::Flonum(x), Value::Flonum(y)) => flonum_eqv(**x, **y),
        (Value::Rational(x), Value::Rational(y)) => x == y,
        (Value::Complex(x), Value::Complex(y)) => flonum_eqv(x.re, y.re) && flonum_eqv(x.im, y.im),
        (Value::Char(x), Value::Char(y)) => x == y,
        _ => a.ptr_eq(b),
    }
}

// RUST CONCEPT: Work items instead of recursion
// Compare is a pending structural comparison. Refs reads slot `index` of two
// containers (None means the box content) and then compares the results;
// reading may have to call a proxy handler.
#[derive(Clone, Debug)]
pub enum EqualTask {
    Compare(Value, Value),
    Refs {
        left: Value,
        right: Value,
        index: Option<usize>,
    },
}

enum Scan {
    Equal,
    Differ,
    // A read that needs a proxy handler
    Blocked {
        left: Value,
        right: Value,
        index: Option<usize>,
    },
}

fn container_target(v: &Value) -> Option<ProxyTarget> {
    match v {
        Value::Box(_) => Some(ProxyTarget::Box),
        Value::Vector(_) => Some(ProxyTarget::Vector),
        Value::Proxy(p) => Some(p.target),
        _ => None,
    }
}

fn vector_len(v: &Value) -> usize {
    match v.unwrap_proxy() {
        Value::Vector(vec) => vec.len(),
        _ => 0,
    }
}

// One shallow comparison; children are pushed onto `tasks`
fn compare_shallow(a: Value, b: Value, tasks: &mut Vec<EqualTask>) -> bool {
    if eqv(&a, &b) {
        return true;
    }
    match (&a, &b) {
        (Value::Pair(x), Value::Pair(y)) => {
            tasks.push(EqualTask::Compare(x.cdr().clone(), y.cdr().clone()));
            tasks.push(EqualTask::Compare(x.car(), y.car()));
            true
        }
        (Value::MPair(x), Value::MPair(y)) => {
            tasks.push(EqualTask::Compare(x.cdr.borrow().clone(), y.cdr.borrow().clone()));
            tasks.push(EqualTask::Compare(x.car.borrow().clone(), y.car.borrow().clone()));
            true
        }
        (Value::String(x), Value::String(y)) => *x.text() == *y.text(),
        (Value::Bytes(x), Value::Bytes(y)) => *x.bytes() == *y.bytes(),
        _ => match (container_target(&a), container_target(&b)) {
            (Some(ProxyTarget::Box), Some(ProxyTarget::Box)) => {
                tasks.push(EqualTask::Refs {
                    left: a,
                    right: b,
                    index: None,
                });
                true
            }
            (Some(ProxyTarget::Vector), Some(ProxyTarget::Vector)) => {
                let len = vector_len(&a);
                if len != vector_len(&b) {
                    return false;
                }
                for i in (0..len).rev() {
                    tasks.push(EqualTask::Refs {
                        left: a.clone(),
                        right: b.clone(),
                        index: Some(i),
                    });
                }
                true
            }
            _ => false,
        },
    }
}

fn scan(tasks: &mut Vec<EqualTask>) -> Scan {
    while let Some(task) = tasks.pop() {
        match task {
            EqualTask::Compare(a, b) => {
                if !compare_shallow(a, b, tasks) {
                    return Scan::Differ;
                }
            }
            EqualTask::Refs { left, right, index } => {
                match (proxy::direct_ref(&left, index), proxy::direct_ref(&right, index)) {
                    (Some(l), Some(r)) => tasks.push(EqualTask::Compare(l, r)),
                    _ => return Scan::Blocked { left, right, index },
                }
            }
        }
    }
    Scan::Equal
}

/// Structural equality without leaving Rust. None when a proxy handler
/// would have to run.
pub fn equal_sync(a: &Value, b: &Value) -> Option<bool> {
    let mut tasks = vec![EqualTask::Compare(a.clone(), b.clone())];
    match scan(&mut tasks) {
        Scan::Equal => Some(true),
        Scan::Differ => Some(false),
        Scan::Blocked { .. } => None,
    }
}

/// equal? through the trampoline; delivers a boolean to `cont`.
pub fn equal_step(a: Value, b: Value, cont: Cont) -> Result<Step, RuntimeError> {
    equal_loop(vec![EqualTask::Compare(a, b)], cont)
}

pub(crate) fn equal_loop(
    mut tasks: Vec<EqualTask>,
    cont: Cont,
) -> Result<Step, RuntimeError> {
    match scan(&mut tasks) {
        Scan::Equal => Ok(Step::plug1(Value::Bool(true), cont)),
        Scan::Differ => Ok(Step::plug1(Value::Bool(false), cont)),
        Scan::Blocked { left, right, index } => {
            let cont = cont.push(ContKind::EqualLeft { right, index, tasks });
            proxy::ref_step(left, index, cont)
        }
    }
}

// The left slot has been read; read the right one
pub(crate) fn resume_left(
    left: Value,
    right: Value,
    index: Option<usize>,
    tasks: Vec<EqualTask>,
    cont: Cont,
) -> Result<Step, RuntimeError> {
    let cont = cont.push(ContKind::EqualRight { left, tasks });
    proxy::ref_step(right, index, cont)
}

pub(crate) fn resume_right(
    left: Value,
    right: Value,
    mut tasks: Vec<EqualTask>,
    cont: Cont,
) -> Result<Step, RuntimeError> {
    tasks.push(EqualTask::Compare(left, right));
    equal_loop(tasks, cont)
}

fn hash_flonum(f: f64, state: &mut DefaultHasher) {
    if f.is_nan() {
        f64::NAN.to_bits().hash(state);
    } else {
        f.to_bits().hash(state);
    }
}

// RUST CONCEPT: A structural hash consistent with equal?
// Only defined for keys that can never change and hold no proxy: if two such
// keys are equal? their hashes match. Everything else gets None and is always
// compared.
pub fn equal_hash(value: &Value) -> Option<u64> {
    let mut state = DefaultHasher::new();
    let mut pending = vec![value.clone()];
    while let Some(item) = pending.pop() {
        match &item {
            Value::Void => 0u8.hash(&mut state),
            Value::Null => 1u8.hash(&mut state),
            Value::Bool(b) => (2u8, *b).hash(&mut state),
            Value::Undefined => 3u8.hash(&mut state),
            Value::Fixnum(n) => (4u8, **n).hash(&mut state),
            Value::Bignum(n) => (5u8, &**n).hash(&mut state),
            Value::Flonum(f) => {
                6u8.hash(&mut state);
                hash_flonum(**f, &mut state);
            }
            Value::Rational(r) => (7u8, &**r).hash(&mut state),
            Value::Complex(z) => {
                8u8.hash(&mut state);
                hash_flonum(z.re, &mut state);
                hash_flonum(z.im, &mut state);
            }
            Value::Char(c) => (9u8, **c).hash(&mut state),
            Value::String(s) if s.is_immutable() => (10u8, s.text().as_str()).hash(&mut state),
            Value::Bytes(b) if b.is_immutable() => (11u8, b.bytes().as_slice()).hash(&mut state),
            Value::Symbol(s) => (12u8, s.addr()).hash(&mut state),
            Value::Keyword(k) => (13u8, k.addr()).hash(&mut state),
            Value::Pair(p) => {
                14u8.hash(&mut state);
                pending.push(p.cdr().clone());
                pending.push(p.car());
            }
            Value::Vector(v) if v.is_immutable() => {
                (15u8, v.len()).hash(&mut state);
                pending.extend(v.to_vec().into_iter().rev());
            }
            Value::Box(b) if b.is_immutable() => {
                16u8.hash(&mut state);
                pending.push(b.get());
            }
            Value::String(_)
            | Value::Bytes(_)
            | Value::Vector(_)
            | Value::Box(_)
            | Value::MPair(_)
            | Value::Hash(_)
            | Value::Proxy(_)
            | Value::Cell(_)
            | Value::WeakBox(_)
            | Value::Ephemeron(_)
            | Value::Port(_)
            | Value::Semaphore(_) => return None,
            // equal? is identity for everything left
            other => (17u8, other.heap_addr().unwrap_or(0)).hash(&mut state),
        }
    }
    Some(state.finish())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::rc::Rc;

    use crate::value::Vector;

    #[test]
    fn test_eq_on_fixnums_and_chars() {
        assert!(eq(&Value::fixnum(7), &Value::fixnum(7)));
        assert!(eq(&Value::char('a'), &Value::char('a')));
        assert!(!eq(&Value::string("a"), &Value::string("a")));
        assert!(!eq(&Value::flonum(1.5), &Value::flonum(1.5)));
    }

    #[test]
    fn test_eqv_on_numbers() {
        assert!(eqv(&Value::flonum(1.5), &Value::flonum(1.5)));
        assert!(eqv(&Value::flonum(f64::NAN), &Value::flonum(f64::NAN)));
        assert!(!eqv(&Value::flonum(0.0), &Value::flonum(-0.0)));
        assert!(!eqv(&Value::fixnum(1), &Value::flonum(1.0)));
        let pair = Value::cons(Value::fixnum(1), Value::Null);
        assert!(eqv(&pair, &pair.clone()));
        assert!(!eqv(&pair, &Value::cons(Value::fixnum(1), Value::Null)));
    }

    #[test]
    fn test_equal_sync_structures() {
        let a = Value::list(vec![Value::fixnum(1), Value::string("x"), Value::vector(vec![Value::fixnum(2)], true)]);
        let b = Value::list(vec![Value::fixnum(1), Value::string("x"), Value::vector(vec![Value::fixnum(2)], false)]);
        assert_eq!(equal_sync(&a, &b), Some(true));

        let c = Value::list(vec![Value::fixnum(1), Value::string("y")]);
        assert_eq!(equal_sync(&a, &c), Some(false));
    }

    #[test]
    fn test_specialized_and_generic_pairs_are_equal() {
        let special = Value::cons_with(Value::fixnum(1), Value::fixnum(2), true);
        let generic = Value::cons_with(Value::fixnum(1), Value::fixnum(2), false);
        assert_eq!(equal_sync(&special, &generic), Some(true));
        assert_eq!(equal_hash(&special), equal_hash(&generic));
    }

    #[test]
    fn test_long_lists_do_not_recurse() {
        let items: Vec<Value> = (0..100_000).map(Value::fixnum).collect();
        let a = Value::list(items.clone());
        let b = Value::list(items);
        assert_eq!(equal_sync(&a, &b), Some(true));
    }

    #[test]
    fn test_equal_hash_only_for_immutable_keys() {
        let pair = Value::cons(Value::fixnum(1), Value::fixnum(2));
        assert!(equal_hash(&pair).is_some());
        assert_eq!(equal_hash(&pair), equal_hash(&Value::cons(Value::fixnum(1), Value::fixnum(2))));

        assert!(equal_hash(&Value::string("abc")).is_none());
        assert!(equal_hash(&Value::immutable_string("abc")).is_some());

        let mutable = Value::Vector(Rc::new(Vector::new(vec![Value::fixnum(1)], false, true)));
        assert!(equal_hash(&Value::cons(mutable, Value::Null)).is_none());
    }
}
