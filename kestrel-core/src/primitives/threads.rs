// Thread and semaphore stubs
//
// There is exactly one thread of evaluation. `thread` runs its thunk to
// completion before returning the handle, and a semaphore wait that would
// block can never be woken up, so it fails instead of hanging.

use std::rc::Rc;

use tracing::warn;

use crate::cont::Cont;
use crate::error::RuntimeError;
use crate::interpreter::{Runtime, Step};
use crate::value::{Semaphore, ThreadHandle, Value};

use super::check_procedure;

pub fn thread_impl(rt: &mut Runtime, args: Vec<Value>, cont: Cont) -> Result<Step, RuntimeError> {
    let thunk = args.into_iter().next().unwrap_or(Value::Void);
    check_procedure("thread", &thunk)?;
    let handle = Value::Thread(Rc::new(ThreadHandle { id: rt.next_thread_id() }));
    Ok(Step::Apply {
        callee: thunk,
        args: Vec::new(),
        cont: cont.then(move |_rt, _vals, k| Ok(Step::plug1(handle, k))),
    })
}

pub fn current_thread_impl(rt: &mut Runtime, _args: &[Value]) -> Result<Value, RuntimeError> {
    Ok(rt.main_thread())
}

pub fn is_thread_impl(_rt: &mut Runtime, args: &[Value]) -> Result<Value, RuntimeError> {
    Ok(Value::Bool(matches!(args[0], Value::Thread(_))))
}

pub fn make_semaphore_impl(_rt: &mut Runtime, args: &[Value]) -> Result<Value, RuntimeError> {
    let count = match args.first() {
        Some(v) => super::check_index("make-semaphore", v)? as i64,
        None => 0,
    };
    Ok(Value::Semaphore(Rc::new(Semaphore::new(count))))
}

fn check_semaphore<'a>(who: &str, v: &'a Value) -> Result<&'a Semaphore, RuntimeError> {
    match v {
        Value::Semaphore(s) => Ok(s),
        other => Err(RuntimeError::type_error(who, "semaphore?", other)),
    }
}

pub fn semaphore_post_impl(_rt: &mut Runtime, args: &[Value]) -> Result<Value, RuntimeError> {
    check_semaphore("semaphore-post", &args[0])?.post();
    Ok(Value::Void)
}

pub fn semaphore_wait_impl(_rt: &mut Runtime, args: &[Value]) -> Result<Value, RuntimeError> {
    let sema = check_semaphore("semaphore-wait", &args[0])?;
    if sema.try_wait() {
        return Ok(Value::Void);
    }
    warn!("semaphore wait with a zero count and no other thread to post");
    Err(RuntimeError::User("semaphore-wait: waiting for a semaphore will never finish".to_string()))
}

pub fn semaphore_try_wait_impl(_rt: &mut Runtime, args: &[Value]) -> Result<Value, RuntimeError> {
    Ok(Value::Bool(check_semaphore("semaphore-try-wait?", &args[0])?.try_wait()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_semaphore_counts() {
        let mut rt = Runtime::new();
        let sema = make_semaphore_impl(&mut rt, &[Value::fixnum(1)]).unwrap();
        semaphore_wait_impl(&mut rt, &[sema.clone()]).unwrap();
        let result = semaphore_try_wait_impl(&mut rt, &[sema.clone()]).unwrap();
        assert!(matches!(result, Value::Bool(false)));
        semaphore_post_impl(&mut rt, &[sema.clone()]).unwrap();
        semaphore_wait_impl(&mut rt, &[sema]).unwrap();
    }

    #[test]
    fn test_semaphore_wait_never_finishes() {
        let mut rt = Runtime::new();
        let sema = make_semaphore_impl(&mut rt, &[]).unwrap();
        let result = semaphore_wait_impl(&mut rt, &[sema]);
        assert!(
            matches!(&result, Err(RuntimeError::User(msg)) if msg.contains("waiting for a semaphore will never finish")),
            "Expected never-finish error, got {:?}",
            result
        );
    }

    #[test]
    fn test_thread_runs_thunk() {
        let mut rt = Runtime::new();
        let result = rt
            .eval_str("(define hit 0) (define t (thread (lambda () (set! hit 1)))) (list hit (thread? t) (eq? (current-thread) (current-thread)))")
            .unwrap();
        assert_eq!(result.to_string(), "(1 #t #t)");
    }
}
