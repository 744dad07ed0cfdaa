// Regexp values and a literal matcher
//
// The four constructors only record the source and flavour. Matching looks
// for the pattern source as a plain substring; there is no regular
// expression engine behind it.

use std::rc::Rc;

use crate::error::RuntimeError;
use crate::interpreter::Runtime;
use crate::value::{Regexp, RegexpKind, Value};

fn text_source(who: &str, v: &Value) -> Result<String, RuntimeError> {
    match v {
        Value::String(s) => Ok(s.text().clone()),
        Value::Bytes(b) => Ok(String::from_utf8_lossy(&b.bytes()).into_owned()),
        other => Err(RuntimeError::type_error(who, "string?", other)),
    }
}

fn make(who: &str, kind: RegexpKind, v: &Value) -> Result<Value, RuntimeError> {
    let byte_flavour = matches!(kind, RegexpKind::ByteRegexp | RegexpKind::BytePregexp);
    match (v, byte_flavour) {
        (Value::String(_), false) | (Value::Bytes(_), true) => {}
        (other, true) => return Err(RuntimeError::type_error(who, "bytes?", other)),
        (other, false) => return Err(RuntimeError::type_error(who, "string?", other)),
    }
    Ok(Value::Regexp(Rc::new(Regexp {
        source: text_source(who, v)?,
        kind,
    })))
}

pub fn regexp_impl(_rt: &mut Runtime, args: &[Value]) -> Result<Value, RuntimeError> {
    make("regexp", RegexpKind::Regexp, &args[0])
}

pub fn pregexp_impl(_rt: &mut Runtime, args: &[Value]) -> Result<Value, RuntimeError> {
    make("pregexp", RegexpKind::Pregexp, &args[0])
}

pub fn byte_regexp_impl(_rt: &mut Runtime, args: &[Value]) -> Result<Value, RuntimeError> {
    make("byte-regexp", RegexpKind::ByteRegexp, &args[0])
}

pub fn byte_pregexp_impl(_rt: &mut Runtime, args: &[Value]) -> Result<Value, RuntimeError> {
    make("byte-pregexp", RegexpKind::BytePregexp, &args[0])
}

// A pattern may be a regexp value or a plain string
fn pattern(who: &str, v: &Value) -> Result<String, RuntimeError> {
    match v {
        Value::Regexp(r) => Ok(r.source.clone()),
        other => text_source(who, other),
    }
}

// (regexp-match pattern input): a one-element list holding the match, or #f
pub fn regexp_match_impl(_rt: &mut Runtime, args: &[Value]) -> Result<Value, RuntimeError> {
    let needle = pattern("regexp-match", &args[0])?;
    let haystack = text_source("regexp-match", &args[1])?;
    if !haystack.contains(&needle) {
        return Ok(Value::Bool(false));
    }
    let matched = match &args[1] {
        Value::Bytes(_) => Value::bytes(needle.into_bytes(), false),
        _ => Value::string(&needle),
    };
    Ok(Value::list(vec![matched]))
}

pub fn regexp_match_p_impl(_rt: &mut Runtime, args: &[Value]) -> Result<Value, RuntimeError> {
    let needle = pattern("regexp-match?", &args[0])?;
    let haystack = text_source("regexp-match?", &args[1])?;
    Ok(Value::Bool(haystack.contains(&needle)))
}

pub fn is_regexp_impl(_rt: &mut Runtime, args: &[Value]) -> Result<Value, RuntimeError> {
    Ok(Value::Bool(matches!(args[0], Value::Regexp(_))))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_regexp_prints_with_flavour() {
        let mut rt = Runtime::new();
        let rx = regexp_impl(&mut rt, &[Value::string("ab")]).unwrap();
        assert_eq!(rx.to_string(), "#rx\"ab\"");
        let result = byte_regexp_impl(&mut rt, &[Value::string("ab")]);
        assert!(matches!(result, Err(RuntimeError::Type { .. })), "Expected type error, got {:?}", result);
    }

    #[test]
    fn test_literal_match() {
        let mut rt = Runtime::new();
        let result = rt.eval_str("(regexp-match (regexp \"lo\") \"hello\")").unwrap();
        assert_eq!(result.to_string(), "(\"lo\")");
        assert!(matches!(rt.eval_str("(regexp-match? \"z\" \"hello\")").unwrap(), Value::Bool(false)));
    }
}
