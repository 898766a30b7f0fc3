pub mod env;
pub mod types;
mod validate;

pub use types::{Config, ConfigError, ObservabilityConfig, Result};

#[cfg(test)]
pub(crate) use env::load_from;
