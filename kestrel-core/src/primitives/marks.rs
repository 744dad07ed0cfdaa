// Continuation mark primitives
//
// A mark set is a snapshot of the continuation; reading it walks the Mark
// frames innermost first.

use crate::cont::Cont;
use crate::error::RuntimeError;
use crate::interpreter::{Runtime, Step};
use crate::value::Value;

pub fn current_continuation_marks_impl(_rt: &mut Runtime, _args: Vec<Value>, cont: Cont) -> Result<Step, RuntimeError> {
    let marks = Value::MarkSet(cont.clone());
    Ok(Step::plug1(marks, cont))
}

fn mark_source<'a>(who: &str, set: &'a Value, current: &'a Cont) -> Result<&'a Cont, RuntimeError> {
    match set {
        Value::MarkSet(k) => Ok(k),
        // #f stands for the current continuation
        Value::Bool(false) => Ok(current),
        other => Err(RuntimeError::type_error(who, "(or/c continuation-mark-set? #f)", other)),
    }
}

// (continuation-mark-set-first set key [default])
pub fn continuation_mark_set_first_impl(_rt: &mut Runtime, args: Vec<Value>, cont: Cont) -> Result<Step, RuntimeError> {
    let source = mark_source("continuation-mark-set-first", &args[0], &cont)?;
    let found = source.first_mark(&args[1]);
    let result = found.unwrap_or_else(|| args.get(2).cloned().unwrap_or(Value::Bool(false)));
    Ok(Step::plug1(result, cont))
}

pub fn continuation_mark_set_to_list_impl(rt: &mut Runtime, args: Vec<Value>, cont: Cont) -> Result<Step, RuntimeError> {
    let source = mark_source("continuation-mark-set->list", &args[0], &cont)?;
    let marks = rt.list(source.marks_for(&args[1]));
    Ok(Step::plug1(marks, cont))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_marks_innermost_first() {
        let mut rt = Runtime::new();
        let result = rt
            .eval_str(
                "(with-continuation-mark 'k 1
                   (car (list (with-continuation-mark 'k 2
                                (continuation-mark-set->list (current-continuation-marks) 'k)))))",
            )
            .unwrap();
        assert_eq!(result.to_string(), "(2 1)");
    }

    #[test]
    fn test_tail_mark_replaces() {
        let mut rt = Runtime::new();
        let result = rt
            .eval_str(
                "(with-continuation-mark 'k 1
                   (with-continuation-mark 'k 2
                     (continuation-mark-set->list (current-continuation-marks) 'k)))",
            )
            .unwrap();
        assert_eq!(result.to_string(), "(2)");
    }

    #[test]
    fn test_mark_set_first_default() {
        let mut rt = Runtime::new();
        let result = rt.eval_str("(continuation-mark-set-first #f 'missing 'none)").unwrap();
        assert_eq!(result.to_string(), "none");
        let result = rt.eval_str("(with-continuation-mark 'k 7 (continuation-mark-set-first #f 'k))").unwrap();
        assert_eq!(result.as_fixnum(), Some(7));
    }
}
