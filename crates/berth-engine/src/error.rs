//! Engine error types

use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    /// Template syntax or evaluation error, identified by template name
    #[error("Template '{name}' failed: {message}")]
    Template { name: String, message: String },

    /// A manifest file could not be read
    #[error("Failed to read manifest '{file}' for '{item}': {message}")]
    ManifestRead {
        item: String,
        file: String,
        message: String,
    },

    /// A rendered manifest document could not be decoded
    #[error("Failed to decode manifest '{file}' for '{item}': {message}")]
    ManifestParse {
        item: String,
        file: String,
        message: String,
    },

    #[error(transparent)]
    Core(#[from] berth_core::CoreError),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl EngineError {
    /// Build a template error from a MiniJinja error
    pub fn template(name: &str, err: &minijinja::Error) -> Self {
        Self::Template {
            name: name.to_string(),
            message: err.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;
