//! # Kestrel Core
//!
//! Runtime core for a Scheme-like language machine. Programs are read into
//! datums, expanded into an AST with static frame shapes, and run by a
//! trampoline that never grows the host stack.
//!
//! ## Features
//!
//! - **Proper tail calls**: a tail call keeps the caller's continuation
//! - **First-class continuations**: `call/cc`, multiple values, marks
//! - **Canonical constructors**: interned symbols, cached small numbers
//! - **Specialized storage**: unboxed pairs, strategy vectors, fixnum cells
//! - **Environment sharing**: closures reuse frames they would only copy
//! - **Numeric tower**: fixnum, bignum, rational, flonum, complex
//!
//! ## Example
//!
//! ```
//! use kestrel_core::Runtime;
//!
//! let mut rt = Runtime::new();
//! let value = rt
//!     .eval_str("(define (loop n acc) (if (= n 0) acc (loop (- n 1) (+ acc 1)))) (loop 100000 0)")
//!     .unwrap();
//! assert_eq!(value.to_string(), "100000");
//! ```

// Public modules
pub mod ast;
pub mod builtins;
pub mod cell;
pub mod config;
pub mod cont;
pub mod env;
pub mod equal;
pub mod error;
pub mod expander;
pub mod hash;
pub mod interpreter;
pub mod memo;
pub mod numeric;
pub mod output;
pub mod parser;
pub mod primitives;
pub mod proxy;
pub mod tokenizer;
pub mod value;
pub mod weak;

// Re-exports for convenience
pub use config::RuntimeConfig;
pub use cont::Values;
pub use error::RuntimeError;
pub use interpreter::{EvalStats, Runtime, Step};
pub use output::{BufferOutput, Output, StdoutOutput};
pub use value::Value;
