// String, symbol and keyword primitives

use crate::error::RuntimeError;
use crate::interpreter::Runtime;
use crate::value::{Symbol, Value};

use super::check_string;

// The result is always a fresh mutable string
pub fn string_append_impl(_rt: &mut Runtime, args: &[Value]) -> Result<Value, RuntimeError> {
    let mut out = String::new();
    for arg in args {
        out.push_str(&check_string("string-append", arg)?);
    }
    Ok(Value::string(&out))
}

pub fn string_length_impl(_rt: &mut Runtime, args: &[Value]) -> Result<Value, RuntimeError> {
    let text = check_string("string-length", &args[0])?;
    Ok(Value::fixnum(text.chars().count() as i64))
}

pub fn string_eq_impl(_rt: &mut Runtime, args: &[Value]) -> Result<Value, RuntimeError> {
    let first = check_string("string=?", &args[0])?;
    let mut result = true;
    for arg in &args[1..] {
        result = check_string("string=?", arg)? == first && result;
    }
    Ok(Value::Bool(result))
}

pub fn is_string_impl(_rt: &mut Runtime, args: &[Value]) -> Result<Value, RuntimeError> {
    Ok(Value::Bool(matches!(args[0], Value::String(_))))
}

pub fn is_symbol_impl(_rt: &mut Runtime, args: &[Value]) -> Result<Value, RuntimeError> {
    Ok(Value::Bool(matches!(args[0], Value::Symbol(_))))
}

pub fn is_keyword_impl(_rt: &mut Runtime, args: &[Value]) -> Result<Value, RuntimeError> {
    Ok(Value::Bool(matches!(args[0], Value::Keyword(_))))
}

pub fn symbol_to_string_impl(_rt: &mut Runtime, args: &[Value]) -> Result<Value, RuntimeError> {
    match &args[0] {
        Value::Symbol(s) => Ok(Value::string(s.name())),
        other => Err(RuntimeError::type_error("symbol->string", "symbol?", other)),
    }
}

pub fn string_to_symbol_impl(rt: &mut Runtime, args: &[Value]) -> Result<Value, RuntimeError> {
    let text = check_string("string->symbol", &args[0])?;
    Ok(rt.symbol_value(&text))
}

// Never eq? to any other symbol, even one with the same name
pub fn string_to_uninterned_symbol_impl(_rt: &mut Runtime, args: &[Value]) -> Result<Value, RuntimeError> {
    let text = check_string("string->uninterned-symbol", &args[0])?;
    Ok(Value::Symbol(Symbol::uninterned(&text)))
}

pub fn string_to_unreadable_symbol_impl(rt: &mut Runtime, args: &[Value]) -> Result<Value, RuntimeError> {
    let text = check_string("string->unreadable-symbol", &args[0])?;
    Ok(Value::Symbol(rt.intern_unreadable(&text)))
}

pub fn string_to_keyword_impl(rt: &mut Runtime, args: &[Value]) -> Result<Value, RuntimeError> {
    let text = check_string("string->keyword", &args[0])?;
    Ok(Value::Keyword(rt.keyword(&text)))
}

pub fn number_to_string_impl(_rt: &mut Runtime, args: &[Value]) -> Result<Value, RuntimeError> {
    if !args[0].is_number() {
        return Err(RuntimeError::type_error("number->string", "number?", &args[0]));
    }
    Ok(Value::string(&args[0].to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::equal::eq;

    #[test]
    fn test_string_append_is_mutable() {
        let mut rt = Runtime::new();
        let result = string_append_impl(&mut rt, &[Value::immutable_string("ab"), Value::string("c")]).unwrap();
        assert_eq!(result.display_string(), "abc");
        assert!(!result.is_immutable());
    }

    #[test]
    fn test_symbol_pools() {
        let mut rt = Runtime::new();
        let a = string_to_symbol_impl(&mut rt, &[Value::string("s")]).unwrap();
        let b = string_to_symbol_impl(&mut rt, &[Value::string("s")]).unwrap();
        let hidden = string_to_unreadable_symbol_impl(&mut rt, &[Value::string("s")]).unwrap();
        let fresh = string_to_uninterned_symbol_impl(&mut rt, &[Value::string("s")]).unwrap();
        assert!(eq(&a, &b));
        assert!(!eq(&a, &hidden));
        assert!(!eq(&a, &fresh));
    }

    #[test]
    fn test_string_length_counts_chars() {
        let mut rt = Runtime::new();
        let result = string_length_impl(&mut rt, &[Value::string("héllo")]).unwrap();
        assert_eq!(result.as_fixnum(), Some(5));
    }
}
