//! Configuration merge system
//!
//! Implements the 4-layer configuration merge:
//! 1. Built-in defaults
//! 2. Config file (`--config`, or `./volu-bq.toml` when present)
//! 3. Environment (`CACHE_DIR`, `GCP_PROJECT`, `BQ_LOCATION`, ...)
//! 4. CLI flags

mod defaults;
mod effective;
mod env;
mod merge;
mod settings;

pub use defaults::BuiltinDefaults;
pub use effective::{
    ConfigError, ConfigFile, ConfigOrigin, ConfigSource, EffectiveConfig, DEFAULT_CONFIG_FILE,
};
pub use env::EnvLayer;
pub use merge::{deep_merge, insert_path, merge_layers};
pub use settings::Settings;
