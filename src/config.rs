//! # Configuration System
//!
//! Hierarchical configuration loading from:
//! - config.toml (default configuration)
//! - config.local.toml (git-ignored local overrides)
//! - Environment variables (METRICA_* prefix, `__` nesting separator)
//!
//! ## Example
//!
//! ```toml
//! # config.toml
//! [logging]
//! level = "debug"
//! format = "text"
//!
//! [limits]
//! max_formula_length = 4096
//! ```
//!
//! Environment variable overrides:
//! ```bash
//! METRICA_LOGGING__LEVEL=trace
//! METRICA_LIMITS__MAX_EVAL_DEPTH=128
//! ```

use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

/// Main configuration struct
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub limits: EvalLimits,
}

/// Controls the subscriber installed by [`init_logging`]: a filter
/// directive used when `RUST_LOG` is unset, and the event format.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Filter directive (`trace`, `debug`, `info`, `warn`, `error`, or
    /// any `EnvFilter` expression)
    pub level: String,
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            level: "info".to_string(),
            format: LogFormat::default(),
        }
    }
}

/// How log events are rendered
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    /// Human-readable single-line text
    #[default]
    Text,
    /// Newline-delimited JSON events
    Json,
}

/// Cooperative guards for the formula engine and the input adapters.
///
/// These bound pathological inputs (formulas and blocks are user-authored);
/// violations surface through the regular error taxonomy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvalLimits {
    /// Maximum formula / widget expression length in characters
    #[serde(default = "default_max_formula_length")]
    pub max_formula_length: usize,

    /// Maximum expression nesting depth during evaluation
    #[serde(default = "default_max_eval_depth")]
    pub max_eval_depth: usize,

    /// Maximum number of lines accepted in one input block
    #[serde(default = "default_max_block_lines")]
    pub max_block_lines: usize,
}

impl Default for EvalLimits {
    fn default() -> Self {
        EvalLimits {
            max_formula_length: default_max_formula_length(),
            max_eval_depth: default_max_eval_depth(),
            max_block_lines: default_max_block_lines(),
        }
    }
}

fn default_max_formula_length() -> usize {
    4096
}

fn default_max_eval_depth() -> usize {
    64
}

fn default_max_block_lines() -> usize {
    1024
}

impl Config {
    /// Load configuration from default locations.
    ///
    /// Merges in order:
    /// 1. config.toml (base configuration)
    /// 2. config.local.toml (local overrides, git-ignored)
    /// 3. Environment variables (METRICA_* prefix)
    pub fn load() -> Result<Self, figment::Error> {
        Figment::new()
            .merge(Toml::file("config.toml"))
            .merge(Toml::file("config.local.toml"))
            .merge(Env::prefixed("METRICA_").split("__"))
            .extract()
    }

    /// Load configuration from a specific file path
    pub fn from_file(path: &str) -> Result<Self, figment::Error> {
        Figment::new()
            .merge(Toml::file(path))
            .merge(Env::prefixed("METRICA_").split("__"))
            .extract()
    }
}

/// Initialize a global tracing subscriber from the logging configuration.
/// Safe to call more than once; later calls are no-ops.
pub fn init_logging(config: &LoggingConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(config.level.clone()));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    let result = match config.format {
        LogFormat::Json => builder.json().try_init(),
        LogFormat::Text => builder.try_init(),
    };
    if result.is_err() {
        tracing::debug!("tracing subscriber already initialized");
    }
}
