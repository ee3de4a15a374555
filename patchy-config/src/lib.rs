//! Configuration management for Patchy
//!
//! Configuration is split by domain (database, patches, logging), loaded from
//! an optional YAML file, overridden by `PATCHY_*` environment variables and
//! validated before use.

pub mod error;
pub mod loader;
pub mod validation;

// Domain-specific configuration modules
pub mod domains;

// Re-export main types
pub use error::{ConfigError, ConfigResult};
pub use loader::ConfigLoader;
pub use validation::Validatable;

// Re-export domain configurations
pub use domains::{
    database::DatabaseConfig,
    logging::{LogFormat, LogLevel, LoggingConfig},
    patches::PatchesConfig,
    PatchyConfig,
};

// Re-export utilities
pub use domains::utils::serde_duration;
