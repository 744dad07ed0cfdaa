// Hash table primitives
//
// hash-ref, hash-set! and hash-has-key? are control primitives: on an
// equal?-keyed table a lookup may compare against a proxied key, which runs
// handler procedures in the middle of the scan.

use std::rc::Rc;

use crate::cont::Cont;
use crate::error::RuntimeError;
use crate::hash::{self, HashKind, HashTable, MissPolicy};
use crate::interpreter::{Runtime, Step};
use crate::value::Value;

fn make(kind: HashKind) -> Value {
    Value::Hash(Rc::new(HashTable::new(kind)))
}

pub fn make_hash_impl(_rt: &mut Runtime, _args: &[Value]) -> Result<Value, RuntimeError> {
    Ok(make(HashKind::Equal))
}

pub fn make_hasheqv_impl(_rt: &mut Runtime, _args: &[Value]) -> Result<Value, RuntimeError> {
    Ok(make(HashKind::Eqv))
}

pub fn make_hasheq_impl(_rt: &mut Runtime, _args: &[Value]) -> Result<Value, RuntimeError> {
    Ok(make(HashKind::Eq))
}

pub fn make_weak_hasheq_impl(_rt: &mut Runtime, _args: &[Value]) -> Result<Value, RuntimeError> {
    Ok(make(HashKind::WeakEq))
}

fn check_table(who: &str, v: &Value) -> Result<Rc<HashTable>, RuntimeError> {
    match v {
        Value::Hash(table) => Ok(table.clone()),
        other => Err(RuntimeError::type_error(who, "hash?", other)),
    }
}

// (hash-ref table key [failure]) where failure is a thunk or a plain value
pub fn hash_ref_impl(_rt: &mut Runtime, args: Vec<Value>, cont: Cont) -> Result<Step, RuntimeError> {
    let table = check_table("hash-ref", &args[0])?;
    let mut args = args.into_iter().skip(1);
    let key = args.next().unwrap_or(Value::Void);
    let miss = match args.next() {
        Some(f) if f.is_procedure() => MissPolicy::Thunk(f),
        Some(v) => MissPolicy::Default(v),
        None => MissPolicy::Fail,
    };
    hash::ref_step(&table, key, miss, cont)
}

pub fn hash_set_impl(_rt: &mut Runtime, args: Vec<Value>, cont: Cont) -> Result<Step, RuntimeError> {
    let table = check_table("hash-set!", &args[0])?;
    let mut args = args.into_iter().skip(1);
    let (Some(key), Some(value)) = (args.next(), args.next()) else {
        return Err(RuntimeError::type_error("hash-set!", "key and value", &Value::Void));
    };
    hash::set_step(&table, key, value, cont)
}

// A miss delivers no values at all; that is the not-found signal
pub fn hash_has_key_impl(_rt: &mut Runtime, args: Vec<Value>, cont: Cont) -> Result<Step, RuntimeError> {
    let table = check_table("hash-has-key?", &args[0])?;
    let key = args.into_iter().nth(1).unwrap_or(Value::Void);
    let cont = cont.then(|_rt, vals, k| Ok(Step::plug1(Value::Bool(!vals.is_empty()), k)));
    hash::ref_step(&table, key, MissPolicy::Report, cont)
}

pub fn hash_count_impl(_rt: &mut Runtime, args: &[Value]) -> Result<Value, RuntimeError> {
    let table = check_table("hash-count", &args[0])?;
    Ok(Value::fixnum(table.len() as i64))
}

pub fn hash_keys_impl(rt: &mut Runtime, args: &[Value]) -> Result<Value, RuntimeError> {
    let table = check_table("hash-keys", &args[0])?;
    Ok(rt.list(table.keys()))
}

pub fn is_hash_impl(_rt: &mut Runtime, args: &[Value]) -> Result<Value, RuntimeError> {
    Ok(Value::Bool(matches!(args[0], Value::Hash(_))))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(rt: &mut Runtime, step: Step) -> Value {
        rt.execute(step).unwrap().check_one().unwrap()
    }

    #[test]
    fn test_equal_table_finds_fresh_key() {
        let mut rt = Runtime::new();
        let table = make_hash_impl(&mut rt, &[]).unwrap();
        let key = rt.list(vec![Value::fixnum(1), Value::fixnum(2)]);
        let step = hash_set_impl(&mut rt, vec![table.clone(), key, Value::string("v")], Cont::done()).unwrap();
        run(&mut rt, step);

        let probe = rt.list(vec![Value::fixnum(1), Value::fixnum(2)]);
        let step = hash_ref_impl(&mut rt, vec![table.clone(), probe], Cont::done()).unwrap();
        assert_eq!(run(&mut rt, step).display_string(), "v");
        assert_eq!(hash_count_impl(&mut rt, &[table]).unwrap().as_fixnum(), Some(1));
    }

    #[test]
    fn test_missing_key_uses_failure_value() {
        let mut rt = Runtime::new();
        let table = make_hasheq_impl(&mut rt, &[]).unwrap();
        let step = hash_ref_impl(&mut rt, vec![table.clone(), Value::fixnum(1), Value::Bool(false)], Cont::done()).unwrap();
        assert!(matches!(run(&mut rt, step), Value::Bool(false)));

        let step = hash_ref_impl(&mut rt, vec![table, Value::fixnum(1)], Cont::done());
        let result = step.and_then(|s| rt.execute(s));
        assert!(matches!(&result, Err(RuntimeError::User(msg)) if msg.starts_with("hash-ref: no value found")), "Expected not-found error, got {:?}", result.err());
    }

    #[test]
    fn test_has_key() {
        let mut rt = Runtime::new();
        let table = make_hasheqv_impl(&mut rt, &[]).unwrap();
        let step = hash_set_impl(&mut rt, vec![table.clone(), Value::flonum(1.5), Value::Null], Cont::done()).unwrap();
        run(&mut rt, step);

        let step = hash_has_key_impl(&mut rt, vec![table.clone(), Value::flonum(1.5)], Cont::done()).unwrap();
        assert!(matches!(run(&mut rt, step), Value::Bool(true)));
        let step = hash_has_key_impl(&mut rt, vec![table, Value::flonum(2.5)], Cont::done()).unwrap();
        assert!(matches!(run(&mut rt, step), Value::Bool(false)));
    }
}
