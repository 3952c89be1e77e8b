//! Per-invocation render context

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::PathBuf;

use crate::vars::Vars;

/// The template environment for one invocation
///
/// Owned by the invocation and passed by shared reference into every
/// template evaluation. `now` is frozen at construction so that a single
/// render pass is deterministic.
#[derive(Debug, Clone, Serialize)]
pub struct RenderContext {
    /// Active environment name
    pub env: String,

    /// Target namespace ("" means cluster-scoped / manifest-declared)
    pub namespace: String,

    /// Allocated slot number (0 when slotless)
    pub slot: u32,

    /// Project root directory, manifest paths resolve against it
    pub project_root: PathBuf,

    /// Frozen timestamp for this invocation
    pub now: DateTime<Utc>,

    /// Merged variable table
    pub vars: Vars,
}

impl RenderContext {
    /// Create a context for an environment with the merged variable table
    pub fn new(env: impl Into<String>, project_root: impl Into<PathBuf>, vars: Vars) -> Self {
        Self {
            env: env.into(),
            namespace: String::new(),
            slot: 0,
            project_root: project_root.into(),
            now: Utc::now(),
            vars,
        }
    }

    /// Set the target namespace
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    /// Set the slot number
    pub fn with_slot(mut self, slot: u32) -> Self {
        self.slot = slot;
        self
    }

    /// Override the frozen timestamp (tests and replayed invocations)
    pub fn with_now(mut self, now: DateTime<Utc>) -> Self {
        self.now = now;
        self
    }
}
