// Primitives module - organized into separate files by family

// Numbers
pub mod arithmetic;
pub mod comparison;
#[cfg(feature = "advanced_math")]
pub mod math;

// Data structures
pub mod pairs;
pub mod boxes;
pub mod vectors;
pub mod hashes;
pub mod strings;
pub mod weak;

// Equality
pub mod equality;

// Control
pub mod control;
pub mod marks;
pub mod parameters;
pub mod threads;

// Ports and output
pub mod ports;

// Odds and ends
pub mod regexps;
pub mod undefined;

use crate::error::RuntimeError;
use crate::value::Value;

// Shared argument checks

pub(crate) fn check_index(who: &str, v: &Value) -> Result<usize, RuntimeError> {
    v.as_fixnum()
        .and_then(|n| usize::try_from(n).ok())
        .ok_or_else(|| RuntimeError::type_error(who, "exact-nonnegative-integer?", v))
}

pub(crate) fn check_procedure(who: &str, v: &Value) -> Result<(), RuntimeError> {
    if v.is_procedure() {
        Ok(())
    } else {
        Err(RuntimeError::type_error(who, "procedure?", v))
    }
}

pub(crate) fn check_list(who: &str, v: &Value) -> Result<Vec<Value>, RuntimeError> {
    v.list_to_vec().ok_or_else(|| RuntimeError::type_error(who, "list?", v))
}

pub(crate) fn check_string(who: &str, v: &Value) -> Result<String, RuntimeError> {
    match v {
        Value::String(s) => Ok(s.text().clone()),
        other => Err(RuntimeError::type_error(who, "string?", other)),
    }
}
