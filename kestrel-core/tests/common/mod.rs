// Shared helpers for the integration tests
//
// Each test binary only uses some of these.
#![allow(dead_code)]

use kestrel_core::{BufferOutput, Runtime, RuntimeConfig, RuntimeError, Value};

// Fresh runtime with default switches; returns the last form's value
pub fn eval_str(src: &str) -> Result<Value, RuntimeError> {
    Runtime::new().eval_str(src)
}

pub fn eval_with(config: RuntimeConfig, src: &str) -> Result<Value, RuntimeError> {
    Runtime::with_config(config).eval_str(src)
}

// Runs `src` and returns what it printed to the console port
pub fn eval_output(src: &str) -> Result<String, RuntimeError> {
    let mut rt = Runtime::new();
    let buffer = BufferOutput::new();
    rt.set_output(Box::new(buffer.clone()));
    rt.eval_str(src)?;
    Ok(buffer.contents())
}

// Every combination of the three optimization switches
pub fn all_configs() -> Vec<RuntimeConfig> {
    let mut configs = Vec::new();
    for sharing in [true, false] {
        for cons in [true, false] {
            for vectors in [true, false] {
                configs.push(
                    RuntimeConfig::default()
                        .with_env_sharing(sharing)
                        .with_cons_specialization(cons)
                        .with_vector_strategies(vectors),
                );
            }
        }
    }
    configs
}
