//! Runtime configuration.

use std::env;

use serde::Deserialize;
use sysobj_gc::Strategy;

use crate::defaults::{
    DEFAULT_LEAK_REPORT_LIMIT, DEFAULT_TRAP_CONTRACT_VIOLATIONS, ENV_LEAK_REPORT_LIMIT,
    ENV_STRATEGY, ENV_TRAP_VIOLATIONS,
};
use crate::error::ConfigError;

/// Options for a type registry
///
/// ```
/// use sysobj_core::{RuntimeOptions, Strategy};
///
/// let options = RuntimeOptions::from_toml_str("strategy = \"mark-sweep\"").unwrap();
/// assert_eq!(options.strategy, Strategy::MarkSweep);
/// assert!(!options.trap_contract_violations);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct RuntimeOptions {
    /// Block strategy instances are allocated through
    pub strategy: Strategy,
    /// Panic after logging a contract violation
    pub trap_contract_violations: bool,
    /// Leaked blocks listed individually at teardown
    pub leak_report_limit: usize,
}

impl Default for RuntimeOptions {
    fn default() -> Self {
        Self {
            strategy: Strategy::default(),
            trap_contract_violations: DEFAULT_TRAP_CONTRACT_VIOLATIONS,
            leak_report_limit: DEFAULT_LEAK_REPORT_LIMIT,
        }
    }
}

impl RuntimeOptions {
    /// Defaults overridden by `SYSOBJ_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut options = Self::default();
        if let Ok(value) = env::var(ENV_STRATEGY) {
            options.strategy = value.parse().map_err(|_| ConfigError::InvalidValue {
                key: ENV_STRATEGY,
                value,
            })?;
        }
        if let Ok(value) = env::var(ENV_TRAP_VIOLATIONS) {
            options.trap_contract_violations = parse_flag(&value).ok_or(ConfigError::InvalidValue {
                key: ENV_TRAP_VIOLATIONS,
                value,
            })?;
        }
        if let Ok(value) = env::var(ENV_LEAK_REPORT_LIMIT) {
            options.leak_report_limit = value.parse().map_err(|_| ConfigError::InvalidValue {
                key: ENV_LEAK_REPORT_LIMIT,
                value,
            })?;
        }
        Ok(options)
    }

    /// Parse options from TOML text. Missing keys keep their defaults.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    pub fn with_strategy(mut self, strategy: Strategy) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn with_trap(mut self, trap: bool) -> Self {
        self.trap_contract_violations = trap;
        self
    }
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
