use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RelayError {
    #[error("config not found at {0}: run 'relayd config init'")]
    ConfigNotFound(PathBuf),

    #[error("config already exists at {0} (use --force to overwrite)")]
    ConfigExists(PathBuf),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),
}

pub type Result<T> = std::result::Result<T, RelayError>;
