//! Template renderer based on MiniJinja
//!
//! A fresh environment is configured per render with strict undefined
//! behavior: referencing a variable the context does not carry is a fatal
//! template error, not a silent empty string.

use berth_core::RenderContext;
use minijinja::{Environment, Value};

use crate::error::{EngineError, Result};
use crate::functions;

/// The template renderer
///
/// Cheap to construct; holds only the project name exposed to templates.
#[derive(Debug, Clone, Default)]
pub struct Renderer {
    project: String,
}

impl Renderer {
    /// Create a renderer with no project bound (descriptor first pass)
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind the project name exposed to templates as `project`
    pub fn with_project(mut self, project: impl Into<String>) -> Self {
        self.project = project.into();
        self
    }

    /// Create a configured MiniJinja environment for one render pass
    fn create_environment(&self, ctx: &RenderContext) -> Environment<'static> {
        let mut env = Environment::new();
        env.set_undefined_behavior(minijinja::UndefinedBehavior::Strict);

        env.add_filter("default", functions::default);
        env.add_filter("to_lower", functions::to_lower);
        env.add_filter("slug", functions::slug);
        env.add_filter("trunc_sha", functions::trunc_sha);

        env.add_function("ternary", functions::ternary);

        // env_or and now close over per-invocation state: the variable table
        // and the frozen timestamp. now() must not read the wall clock, so a
        // render pass is deterministic and repeatable.
        let vars = ctx.vars.clone();
        env.add_function("env_or", move |key: String, fallback: String| -> String {
            vars.get_or(&key, &fallback).to_string()
        });

        let frozen = ctx.now.format("%Y-%m-%dT%H:%M:%SZ").to_string();
        env.add_function("now", move || -> String { frozen.clone() });

        env
    }

    /// Render a named template source against a context
    ///
    /// Errors identify the template by `name`.
    pub fn render(&self, name: &str, source: &str, ctx: &RenderContext) -> Result<String> {
        let env = self.create_environment(ctx);

        // The timestamp is reachable only through now(); a same-named
        // context variable would shadow the registered function.
        let template_ctx = minijinja::context! {
            project => &self.project,
            env => &ctx.env,
            namespace => &ctx.namespace,
            slot => ctx.slot,
            vars => Value::from_serialize(&ctx.vars),
        };

        env.render_str(source, template_ctx)
            .map_err(|e| EngineError::template(name, &e))
    }
}
