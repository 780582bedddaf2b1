use std::path::PathBuf;
use thiserror::Error;

/// Core error type for configuration and server setup.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Failed to read config at {path}: {source}")]
    ConfigRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config at {path}: {source}")]
    ConfigParse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Bundle file name {file} is configured more than once")]
    DuplicateBundle { file: String },

    #[error("Bundle entry must not be empty")]
    EmptyEntry,
}

pub type Result<T> = std::result::Result<T, Error>;
