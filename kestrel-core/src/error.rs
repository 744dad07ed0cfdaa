// Error taxonomy for the runtime
//
// Every user-visible failure is a RuntimeError: one uniform error that carries
// a message and aborts the current top-level computation. Internal invariant
// violations (frame/shape length mismatch and similar producer bugs) are
// assertions and never show up here.
//
// RUST CONCEPT: thiserror derives Display and std::error::Error from the
// #[error(...)] attributes, so each variant documents its own message.

use crate::parser::ParseError;

#[derive(Debug, Clone, thiserror::Error)]
pub enum RuntimeError {
    #[error("{0}: undefined; cannot reference an identifier before its definition")]
    Unbound(String),

    #[error("application: not a procedure; expected a procedure that can be applied to arguments, given: {0}")]
    NotCallable(String),

    #[error("{name}: arity mismatch; expected {expected}, given {given}")]
    Arity {
        name: String,
        expected: String,
        given: usize,
    },

    // Wrong number of delivered values at a receiver with a fixed count
    #[error("result arity mismatch; expected {expected} value(s), received {received}")]
    ValueCount { expected: usize, received: usize },

    #[error("{who}: contract violation; expected: {expected}, given: {given}")]
    Type {
        who: String,
        expected: String,
        given: String,
    },

    #[error("{0}: division by zero")]
    DivisionByZero(String),

    #[error("{0}")]
    User(String),

    #[error("read: {0}")]
    Read(#[from] ParseError),

    #[error("{form}: bad syntax in {datum}")]
    Syntax { form: String, datum: String },

    #[error("module: {0}")]
    Module(String),

    #[error("continuation frame already consumed; re-entry is not supported here")]
    ContinuationReentry,
}

impl RuntimeError {
    // Shorthand used all over the primitives
    pub fn type_error(who: &str, expected: &str, given: &crate::value::Value) -> Self {
        RuntimeError::Type {
            who: who.to_string(),
            expected: expected.to_string(),
            given: given.to_string(),
        }
    }

    pub fn syntax(form: &str, datum: &crate::value::Value) -> Self {
        RuntimeError::Syntax {
            form: form.to_string(),
            datum: datum.to_string(),
        }
    }

    /// The message carried by the uniform user-level exception.
    pub fn message(&self) -> String {
        self.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages_are_self_describing() {
        let err = RuntimeError::Unbound("foo".to_string());
        assert!(err.message().starts_with("foo: undefined"));

        let err = RuntimeError::Arity {
            name: "loop".to_string(),
            expected: "2".to_string(),
            given: 3,
        };
        assert_eq!(err.to_string(), "loop: arity mismatch; expected 2, given 3");

        let err = RuntimeError::ValueCount {
            expected: 1,
            received: 2,
        };
        assert!(err.message().contains("received 2"));
    }

    #[test]
    fn test_parse_error_converts() {
        let err: RuntimeError = ParseError::UnexpectedEndOfInput.into();
        assert!(matches!(err, RuntimeError::Read(_)));
        assert_eq!(err.to_string(), "read: unexpected end of input");
    }
}
