//! Configuration error types.

/// Result type alias for config operations.
pub type Result<T> = std::result::Result<T, ConfigError>;

/// Errors that can occur during configuration loading.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read a config file.
    #[error("failed to read config file '{path}': {source}")]
    ReadFile {
        path: String,
        source: std::io::Error,
    },

    /// Failed to write a config file.
    #[error("failed to write config file '{path}': {source}")]
    WriteFile {
        path: String,
        source: std::io::Error,
    },

    /// Failed to parse TOML.
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    /// Failed to serialize config.
    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    /// Failed to read the file named by `rag.system_prompt_file`.
    #[error("failed to read system prompt '{path}': {source}")]
    ReadPrompt {
        path: String,
        source: std::io::Error,
    },

    /// No data directory given and none could be derived for this platform.
    #[error("no data directory configured and no platform default available; set [storage] data_dir")]
    NoDataDir,

    /// A value is outside its allowed range.
    #[error("invalid value for '{field}': {reason}")]
    InvalidValue { field: String, reason: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_file_display() {
        let err = ConfigError::ReadFile {
            path: "/etc/mnemos.toml".to_string(),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "gone"),
        };
        let msg = err.to_string();
        assert!(msg.contains("/etc/mnemos.toml"));
        assert!(msg.contains("gone"));
    }

    #[test]
    fn test_invalid_value_display() {
        let err = ConfigError::InvalidValue {
            field: "rag.top_p".to_string(),
            reason: "must be within 0..=1".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "invalid value for 'rag.top_p': must be within 0..=1"
        );
    }
}
