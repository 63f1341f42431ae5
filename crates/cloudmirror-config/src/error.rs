use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Config directory not found")]
    ConfigDirNotFound,

    #[error(
        "Config file not found. Looked in:\n\
        - CLOUDMIRROR_CONFIG_PATH\n\
        - current directory: cloudmirror.local.yaml, cloudmirror.yaml\n\
        - ./.cloudmirror/ directory\n\
        - ~/.config/cloudmirror/config.yaml"
    )]
    NotFound,

    #[error("Invalid config: {0}")]
    Invalid(String),

    #[error("Failed to parse {path}: {source}")]
    Yaml {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ConfigError>;
