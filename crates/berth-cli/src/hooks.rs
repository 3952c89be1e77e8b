//! Hook executor
//!
//! Descriptor hooks run sequentially around apply and destroy. A step is
//! either a shell `run` body, template-rendered against the invocation
//! context, or a named built-in. Pre hooks are fatal to the surrounding
//! workflow; post hooks are best-effort at the call site.

use miette::{bail, IntoDiagnostic, Result};
use std::time::Duration;
use tracing::info;

use berth_core::{HookStep, RenderContext, Stack};
use berth_engine::{when_included, Renderer};

use crate::tools::{run_shell, with_retries, Kubectl};

/// The one built-in step: wait for every service rollout to complete
const BUILTIN_WAIT_READY: &str = "wait-ready";

/// Run all steps of one hook phase in declaration order
pub async fn run_phase(
    phase: &str,
    steps: &[HookStep],
    stack: &Stack,
    ctx: &RenderContext,
    kubectl: &Kubectl,
    timeout: Duration,
) -> Result<()> {
    let renderer = Renderer::new().with_project(&stack.project);

    for step in steps {
        let label = format!("hooks.{phase}.{}", step.name);
        if !when_included(&renderer, ctx, &label, step.when.as_deref()).into_diagnostic()? {
            continue;
        }

        info!(hook = %label, "running hook");
        match (&step.run, &step.uses) {
            (Some(body), _) => {
                let rendered = renderer.render(&label, body, ctx).into_diagnostic()?;
                run_shell(&rendered, ctx, timeout).await?;
            }
            (None, Some(uses)) if uses == BUILTIN_WAIT_READY => {
                wait_ready(stack, ctx, kubectl, &renderer).await?;
            }
            (None, Some(uses)) => {
                bail!("hook '{}' names unknown built-in '{uses}'", step.name);
            }
            (None, None) => {
                bail!("hook '{}' has neither 'run' nor 'uses'", step.name);
            }
        }
    }
    Ok(())
}

/// Block until every included service's deployment rollout completes
async fn wait_ready(
    stack: &Stack,
    ctx: &RenderContext,
    kubectl: &Kubectl,
    renderer: &Renderer,
) -> Result<()> {
    for service in &stack.services {
        let label = format!("services.{}", service.name);
        if !when_included(renderer, ctx, &label, service.when.as_deref()).into_diagnostic()? {
            continue;
        }
        with_retries(3, || kubectl.rollout_status(&service.name, &ctx.namespace)).await?;
    }
    Ok(())
}
