//! Core error types

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Stack descriptor not found: {path}")]
    StackNotFound { path: String },

    #[error("Invalid stack descriptor: {message}")]
    InvalidStack { message: String },

    #[error("Missing required field: {field}")]
    MissingField { field: String },

    #[error("Unknown environment: {name}")]
    UnknownEnvironment { name: String },

    #[error("Environment inheritance cycle: {chain}")]
    InheritanceCycle { chain: String },

    #[error("Malformed env file {path} at line {line}: {message}")]
    EnvFileParse {
        path: String,
        line: usize,
        message: String,
    },

    #[error("Failed to parse YAML: {0}")]
    YamlParse(#[from] serde_yaml::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, CoreError>;
