//! Up command - the ensure-ready workflow
//!
//! Resolve the stack, find or allocate a slot, re-resolve the namespace
//! for the slot actually held, render, apply, run hooks. Safe to re-run:
//! an invocation that already holds a slot converges on it.

use console::style;
use miette::{IntoDiagnostic, Result};
use tracing::{debug, warn};

use berth_engine::{encode_documents, render_stack, resolve_namespace, when_included, Renderer};
use berth_store::{
    allocate, find_matching, update_attributes, update_namespace, AllocateRequest,
};

use crate::commands::{GlobalOpts, Session};
use crate::github::{self, Gh};
use crate::hooks;
use crate::tools::{with_retries, Docker, Kubectl};

pub async fn run(opts: &GlobalOpts, build: bool) -> Result<()> {
    let env = opts.require_env()?;
    let mut session = Session::open(opts)?;
    let backend = session.backend(opts);

    // Label-carried overrides from the bound issue or PR, best-effort.
    if !opts.dry_run && (opts.issue > 0 || opts.pr > 0) {
        let gh = Gh::new(opts.call_timeout());
        match gh.metadata(opts.issue, opts.pr).await {
            Ok(Some(info)) => {
                let overrides = github::label_overrides(&info.labels);
                if !overrides.is_empty() {
                    debug!(count = overrides.len(), subject = %info.url, "applying label overrides");
                    session.ctx.vars.merge(&overrides);
                }
            }
            Ok(None) => {}
            Err(e) => debug!(error = %e, "issue metadata unavailable, continuing without"),
        }
    }

    // Find the slot this invocation is bound to, or take a fresh one.
    let records = backend.list().await.into_diagnostic()?;
    let record = match find_matching(&records, &env, opts.slot, opts.issue, opts.pr) {
        Some(existing) => {
            debug!(slot = existing.slot, "reusing existing slot");
            if let Err(e) =
                update_attributes(&*backend, &existing.name, opts.issue, opts.pr).await
            {
                warn!(error = %e, "failed to update slot attributes");
            }
            existing
        }
        None => {
            let request = AllocateRequest {
                env: env.clone(),
                max_slots: session.stack.max_slots,
                preferred: opts.slot,
                issue: opts.issue,
                pr: opts.pr,
            };
            allocate(&*backend, &session.stack, &session.ctx, &request)
                .await
                .into_diagnostic()?
        }
    };

    // Re-resolve the namespace for the slot actually held.
    let ctx = session.ctx.clone().with_slot(record.slot);
    let namespace = resolve_namespace(&session.stack, &ctx, &env).into_diagnostic()?;
    let ctx = ctx.with_namespace(namespace.clone());
    if !namespace.is_empty() && namespace != record.namespace {
        if let Err(e) = update_namespace(&*backend, &record.name, &namespace).await {
            warn!(error = %e, "failed to update slot namespace");
        }
    }

    let documents = render_stack(&session.stack, &ctx, &session.filters).into_diagnostic()?;
    let stream = encode_documents(&documents).into_diagnostic()?;

    if opts.dry_run {
        print!("{stream}");
        eprintln!(
            "{} would deploy {} documents to slot {} ({})",
            style("dry-run").yellow(),
            documents.len(),
            record.slot,
            namespace
        );
        return Ok(());
    }

    if build {
        build_images(&session, &ctx, opts).await?;
    }

    let kubectl = Kubectl::new(opts.call_timeout());
    kubectl.ensure_namespace(&ctx.namespace).await?;

    hooks::run_phase(
        "preApply",
        &session.stack.hooks.pre_apply,
        &session.stack,
        &ctx,
        &kubectl,
        opts.call_timeout(),
    )
    .await?;

    with_retries(3, || kubectl.apply(&stream, &ctx.namespace)).await?;

    if let Err(e) = hooks::run_phase(
        "postApply",
        &session.stack.hooks.post_apply,
        &session.stack,
        &ctx,
        &kubectl,
        opts.call_timeout(),
    )
    .await
    {
        warn!(error = %e, "post-apply hook failed");
    }

    eprintln!(
        "{} {} slot {} in {} ({} documents)",
        style("deployed").green().bold(),
        env,
        record.slot,
        namespace,
        documents.len()
    );
    Ok(())
}

/// Build and push the image of every included service with a build block
async fn build_images(session: &Session, ctx: &berth_core::RenderContext, opts: &GlobalOpts) -> Result<()> {
    let docker = Docker::new(opts.call_timeout());
    let renderer = Renderer::new().with_project(&session.stack.project);

    for service in &session.stack.services {
        if !session.filters.includes(&service.name) {
            continue;
        }
        let label = format!("services.{}", service.name);
        if !when_included(&renderer, ctx, &label, service.when.as_deref()).into_diagnostic()? {
            continue;
        }
        let (Some(build), Some(image)) = (&service.build, &service.image) else {
            continue;
        };

        let tag = match &image.tag_template {
            Some(template) => renderer
                .render(&format!("{label}.image.tag"), template, ctx)
                .into_diagnostic()?
                .trim()
                .to_string(),
            None => String::new(),
        };
        let reference = if tag.is_empty() {
            image.repository.clone()
        } else {
            format!("{}:{tag}", image.repository)
        };

        let context_dir = ctx.project_root.join(&build.context);
        let dockerfile = match &build.dockerfile {
            Some(path) => ctx.project_root.join(path),
            None => context_dir.join("Dockerfile"),
        };

        eprintln!(
            "{} {} -> {}",
            style("building").cyan(),
            service.name,
            reference
        );
        docker.build(&context_dir, &dockerfile, &reference).await?;
        docker.push(&reference).await?;
    }
    Ok(())
}
