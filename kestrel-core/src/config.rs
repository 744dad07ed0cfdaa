// Runtime configuration
//
// Each switch toggles an optimization that must never change what a program
// computes, so the test suite can run the same programs both ways.

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeConfig {
    /// Reuse the live frame when a closure is re-entered from its own body.
    pub env_sharing: bool,
    /// Store a fixnum car unboxed inside the pair.
    pub cons_specialization: bool,
    /// Homogeneous fixnum/flonum vectors get unboxed storage.
    pub vector_strategies: bool,
    /// Log evaluation statistics after every top-level run.
    pub trace_stats: bool,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            env_sharing: true,
            cons_specialization: true,
            vector_strategies: true,
            trace_stats: false,
        }
    }
}

impl RuntimeConfig {
    pub fn new() -> Self {
        Self::default()
    }

    // Reads KESTREL_ENV_SHARING, KESTREL_CONS_SPECIALIZATION and
    // KESTREL_VECTOR_STRATEGIES; "0", "false", "off" and "no" disable a switch.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let flag = |key: &str, default: bool| match lookup(key) {
            Some(v) => !matches!(
                v.trim().to_ascii_lowercase().as_str(),
                "0" | "false" | "off" | "no"
            ),
            None => default,
        };
        let defaults = Self::default();
        Self {
            env_sharing: flag("KESTREL_ENV_SHARING", defaults.env_sharing),
            cons_specialization: flag("KESTREL_CONS_SPECIALIZATION", defaults.cons_specialization),
            vector_strategies: flag("KESTREL_VECTOR_STRATEGIES", defaults.vector_strategies),
            trace_stats: flag("KESTREL_TRACE_STATS", defaults.trace_stats),
        }
    }

    pub fn with_env_sharing(mut self, on: bool) -> Self {
        self.env_sharing = on;
        self
    }

    pub fn with_cons_specialization(mut self, on: bool) -> Self {
        self.cons_specialization = on;
        self
    }

    pub fn with_vector_strategies(mut self, on: bool) -> Self {
        self.vector_strategies = on;
        self
    }

    pub fn with_trace_stats(mut self, on: bool) -> Self {
        self.trace_stats = on;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults_enable_optimizations() {
        let config = RuntimeConfig::default();
        assert!(config.env_sharing);
        assert!(config.cons_specialization);
        assert!(config.vector_strategies);
        assert!(!config.trace_stats);
    }

    #[test]
    fn test_lookup_disables_switches() {
        let vars: HashMap<&str, &str> = [("KESTREL_ENV_SHARING", "0"), ("KESTREL_CONS_SPECIALIZATION", "off")]
            .into_iter()
            .collect();
        let config = RuntimeConfig::from_lookup(|k| vars.get(k).map(|v| v.to_string()));
        assert!(!config.env_sharing);
        assert!(!config.cons_specialization);
        assert!(config.vector_strategies);
    }

    #[test]
    fn test_builder() {
        let config = RuntimeConfig::new()
            .with_env_sharing(false)
            .with_vector_strategies(false);
        assert!(!config.env_sharing);
        assert!(!config.vector_strategies);
        assert!(config.cons_specialization);
    }
}
