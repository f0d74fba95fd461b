//! Configuration system for mnemos.
//!
//! Provides TOML-based configuration with:
//! - Storage, generation, embedding, retrieval and memory sections
//! - Config file layering (user config dir + project-local overrides)
//! - API keys referenced by environment variable name, never stored inline

pub mod discovery;
pub mod error;
pub mod types;

pub use discovery::{
    load_config, load_config_file, load_config_with_options, save_config, user_config_dir,
    user_config_path, ConfigSource, LoadedConfig,
};
pub use error::{ConfigError, Result};
pub use types::*;
