//! Berth Core - Core types for the declarative stack orchestrator
//!
//! This crate provides the foundational types used throughout Berth:
//! - `Stack`: The parsed stack descriptor (environments, infrastructure, services)
//! - `Vars`: The merged variable table (process env + env files + overrides)
//! - `RenderContext`: Per-invocation template environment
//! - Environment inheritance resolution

pub mod context;
pub mod environment;
pub mod error;
pub mod stack;
pub mod vars;

pub use context::RenderContext;
pub use environment::resolve_environment;
pub use error::{CoreError, Result};
pub use stack::{
    BuildSpec, EnvironmentSpec, HookStep, Hooks, HostMount, ImageSpec, InfraGroup,
    NamespaceConfig, ServiceSpec, Stack, StateBackend,
};
pub use vars::{parse_env_file, parse_set_vars, Vars};
