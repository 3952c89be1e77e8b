//! Stack descriptor model and validation
//!
//! The descriptor is a single YAML file describing a deployable stack:
//! environments (with inheritance), infrastructure manifest groups, services
//! with image specs and per-environment overlays, and the state backend used
//! by the slot store. The raw file is template-rendered once with the merged
//! variable table before being parsed into this model.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::error::{CoreError, Result};

/// A parsed, environment-agnostic stack descriptor
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Stack {
    /// Project name (required, non-empty)
    pub project: String,

    /// Namespace naming configuration
    #[serde(default)]
    pub namespace: NamespaceConfig,

    /// Maximum number of environment slots (0 = unbounded)
    #[serde(default)]
    pub max_slots: u32,

    /// `.env`-style files merged into the variable table
    #[serde(default)]
    pub env_files: Vec<PathBuf>,

    /// Named environments, each optionally inheriting another via `from`
    #[serde(default)]
    pub environments: IndexMap<String, EnvironmentSpec>,

    /// Ordered infrastructure manifest groups (rendered before services)
    #[serde(default)]
    pub infrastructure: Vec<InfraGroup>,

    /// Ordered service specs
    #[serde(default)]
    pub services: Vec<ServiceSpec>,

    /// Slot store backing configuration
    #[serde(default)]
    pub state: StateBackend,

    /// Lifecycle hooks
    #[serde(default)]
    pub hooks: Hooks,
}

/// Namespace naming configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NamespaceConfig {
    /// Per-environment namespace templates, e.g. `"{{ project }}-ai-{{ slot }}"`
    #[serde(default)]
    pub patterns: IndexMap<String, String>,
}

/// A single environment definition
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnvironmentSpec {
    /// Parent environment to inherit from
    #[serde(default)]
    pub from: Option<String>,

    /// Host-path mounts overlaid onto service workloads
    #[serde(default)]
    pub mounts: Vec<HostMount>,

    /// Document kinds dropped from rendered service manifests
    #[serde(default)]
    pub drop_kinds: Vec<String>,

    /// Environment-scoped variables merged into the render context
    #[serde(default)]
    pub vars: IndexMap<String, String>,
}

/// A host-path volume plus its matching container mount
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HostMount {
    pub name: String,
    pub host_path: String,
    pub mount_path: String,
}

/// An ordered group of raw infrastructure manifests
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InfraGroup {
    pub name: String,

    /// Manifest files, relative to the project root
    #[serde(default)]
    pub manifests: Vec<PathBuf>,

    /// Conditional inclusion template; a falsy render excludes the group
    #[serde(default)]
    pub when: Option<String>,
}

/// A deployable service
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceSpec {
    pub name: String,

    /// Manifest files, relative to the project root
    #[serde(default)]
    pub manifests: Vec<PathBuf>,

    /// Conditional inclusion template; a falsy render excludes the service
    #[serde(default)]
    pub when: Option<String>,

    /// Image resolution spec for the service's Deployment
    #[serde(default)]
    pub image: Option<ImageSpec>,

    /// Image build spec (consumed by the container engine wrapper)
    #[serde(default)]
    pub build: Option<BuildSpec>,
}

/// How a service's container image is resolved
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageSpec {
    /// Image repository, e.g. `registry.example.com/svc`
    pub repository: String,

    /// Template producing the image tag, e.g. `"{{ env }}-{{ trunc_sha(vars.GIT_SHA) }}"`
    #[serde(default)]
    pub tag_template: Option<String>,
}

/// How a service image is built
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildSpec {
    /// Build context directory, relative to the project root
    pub context: PathBuf,

    /// Dockerfile path (default: `<context>/Dockerfile`)
    #[serde(default)]
    pub dockerfile: Option<PathBuf>,
}

/// Slot store backing configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateBackend {
    /// Control namespace holding the slot records
    #[serde(default = "default_state_namespace")]
    pub namespace: String,

    /// Record name prefix; a slot's record is named `<prefix><slot>`
    #[serde(default = "default_state_prefix")]
    pub prefix: String,
}

impl Default for StateBackend {
    fn default() -> Self {
        Self {
            namespace: default_state_namespace(),
            prefix: default_state_prefix(),
        }
    }
}

fn default_state_namespace() -> String {
    "berth-system".to_string()
}

fn default_state_prefix() -> String {
    "berth-slot-".to_string()
}

/// Lifecycle hooks, run by the CLI around apply/destroy
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Hooks {
    #[serde(default)]
    pub pre_apply: Vec<HookStep>,
    #[serde(default)]
    pub post_apply: Vec<HookStep>,
    #[serde(default)]
    pub pre_destroy: Vec<HookStep>,
    #[serde(default)]
    pub post_destroy: Vec<HookStep>,
}

/// One hook step: either a shell command body or a named built-in
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HookStep {
    pub name: String,

    /// Shell command body, template-rendered against the current context
    #[serde(default)]
    pub run: Option<String>,

    /// Built-in step name (e.g. `wait-ready`)
    #[serde(default)]
    pub uses: Option<String>,

    /// Conditional inclusion template
    #[serde(default)]
    pub when: Option<String>,
}

impl Stack {
    /// Parse a stack descriptor from already-rendered YAML text
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let stack: Stack = serde_yaml::from_str(yaml)?;
        stack.validate()?;
        Ok(stack)
    }

    /// Validate structural invariants of the descriptor
    ///
    /// Checks that `project` is non-empty, every `from` reference names an
    /// existing environment, and the inheritance graph is acyclic.
    pub fn validate(&self) -> Result<()> {
        if self.project.trim().is_empty() {
            return Err(CoreError::MissingField {
                field: "project".to_string(),
            });
        }

        for (name, env) in &self.environments {
            if let Some(parent) = &env.from {
                if !self.environments.contains_key(parent) {
                    return Err(CoreError::InvalidStack {
                        message: format!(
                            "environment '{name}' inherits from unknown environment '{parent}'"
                        ),
                    });
                }
            }
        }

        // Walking every chain surfaces cycles at load time rather than at
        // first resolution.
        for name in self.environments.keys() {
            crate::environment::resolve_environment(self, name)?;
        }

        for group in &self.infrastructure {
            if group.name.trim().is_empty() {
                return Err(CoreError::MissingField {
                    field: "infrastructure[].name".to_string(),
                });
            }
        }

        for service in &self.services {
            if service.name.trim().is_empty() {
                return Err(CoreError::MissingField {
                    field: "services[].name".to_string(),
                });
            }
        }

        Ok(())
    }

    /// Get the namespace pattern for an environment, if any
    pub fn namespace_pattern(&self, env: &str) -> Option<&str> {
        self.namespace.patterns.get(env).map(String::as_str)
    }
}
