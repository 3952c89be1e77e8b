//! Variable resolution
//!
//! Templating sees one flat key -> string table, merged once per invocation
//! from three sources, lowest to highest precedence:
//! 1. A snapshot of the process environment (taken explicitly, never read
//!    ambiently after construction)
//! 2. `.env`-style files (descriptor `envFiles` plus `--env-file` flags)
//! 3. Inline `KEY=value` overrides (`--set`)

use indexmap::IndexMap;
use serde::Serialize;
use std::path::Path;

use crate::error::{CoreError, Result};

/// Merged variable table used by templating
#[derive(Debug, Clone, Default, Serialize)]
#[serde(transparent)]
pub struct Vars(IndexMap<String, String>);

impl Vars {
    /// Create an empty table
    pub fn new() -> Self {
        Self(IndexMap::new())
    }

    /// Snapshot the current process environment into a table
    pub fn from_process_env() -> Self {
        Self(std::env::vars().collect())
    }

    /// Look up a variable
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    /// Look up a variable, falling back to a default
    pub fn get_or<'a>(&'a self, key: &str, fallback: &'a str) -> &'a str {
        self.get(key).unwrap_or(fallback)
    }

    /// Set a single variable, replacing any existing value
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.insert(key.into(), value.into());
    }

    /// Merge another table on top of this one (overlay wins)
    pub fn merge(&mut self, overlay: &Vars) {
        for (k, v) in &overlay.0 {
            self.0.insert(k.clone(), v.clone());
        }
    }

    /// Merge a `.env` file on top of this table
    pub fn merge_env_file<P: AsRef<Path>>(&mut self, path: P) -> Result<()> {
        let parsed = parse_env_file(path)?;
        self.merge(&parsed);
        Ok(())
    }

    /// Number of variables in the table
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Check whether the table is empty
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterate over entries in insertion order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl FromIterator<(String, String)> for Vars {
    fn from_iter<T: IntoIterator<Item = (String, String)>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Parse a `.env`-style file into a variable table
///
/// Accepts `KEY=value` lines, `#` comments and blank lines. An optional
/// `export ` prefix is tolerated and single or double quotes around the
/// value are stripped. A non-comment line without `=` is a fatal
/// configuration error carrying the file and line number.
pub fn parse_env_file<P: AsRef<Path>>(path: P) -> Result<Vars> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path)?;
    let mut vars = Vars::new();

    for (idx, raw) in content.lines().enumerate() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let line = line.strip_prefix("export ").unwrap_or(line).trim_start();

        let (key, value) = line.split_once('=').ok_or_else(|| CoreError::EnvFileParse {
            path: path.display().to_string(),
            line: idx + 1,
            message: format!("expected KEY=value, got '{raw}'"),
        })?;

        let key = key.trim();
        if key.is_empty() {
            return Err(CoreError::EnvFileParse {
                path: path.display().to_string(),
                line: idx + 1,
                message: "empty variable name".to_string(),
            });
        }

        vars.set(key, unquote(value.trim()));
    }

    Ok(vars)
}

/// Parse inline `KEY=value` overrides (the `--set` flags)
pub fn parse_set_vars(set_args: &[String]) -> Result<Vars> {
    let mut vars = Vars::new();

    for arg in set_args {
        let (key, value) = arg.split_once('=').ok_or_else(|| CoreError::InvalidStack {
            message: format!("Invalid --set format: '{}'. Expected key=value", arg),
        })?;
        vars.set(key.trim(), value);
    }

    Ok(vars)
}

/// Strip one layer of matching single or double quotes
fn unquote(value: &str) -> String {
    let bytes = value.as_bytes();
    if bytes.len() >= 2 {
        let (first, last) = (bytes[0], bytes[bytes.len() - 1]);
        if (first == b'"' && last == b'"') || (first == b'\'' && last == b'\'') {
            return value[1..value.len() - 1].to_string();
        }
    }
    value.to_string()
}
