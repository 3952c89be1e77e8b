//! Down command - tear an environment down and release its slot

use console::style;
use miette::{miette, IntoDiagnostic, Result};
use tracing::warn;

use berth_engine::{encode_documents, render_stack, resolve_namespace};
use berth_store::find_matching;

use crate::commands::{GlobalOpts, Session};
use crate::hooks;
use crate::tools::Kubectl;

pub async fn run(opts: &GlobalOpts) -> Result<()> {
    let env = opts.require_env()?;
    let session = Session::open(opts)?;
    let backend = session.backend(opts);

    let records = backend.list().await.into_diagnostic()?;
    let record = find_matching(&records, &env, opts.slot, opts.issue, opts.pr)
        .ok_or_else(|| {
            miette!(
                "no slot record matches env '{env}' (slot {}, issue {}, pr {})",
                opts.slot,
                opts.issue,
                opts.pr
            )
        })?;

    // The record's namespace is authoritative for teardown; fall back to
    // the pattern only when the record predates namespace tracking.
    let ctx = session.ctx.clone().with_slot(record.slot);
    let namespace = if !ctx.namespace.is_empty() {
        ctx.namespace.clone()
    } else if !record.namespace.is_empty() {
        record.namespace.clone()
    } else {
        resolve_namespace(&session.stack, &ctx, &env).into_diagnostic()?
    };
    let ctx = ctx.with_namespace(namespace.clone());

    let documents = render_stack(&session.stack, &ctx, &session.filters).into_diagnostic()?;
    let stream = encode_documents(&documents).into_diagnostic()?;

    if opts.dry_run {
        eprintln!(
            "{} would delete {} documents from slot {} ({}) and release {}",
            style("dry-run").yellow(),
            documents.len(),
            record.slot,
            namespace,
            record.name
        );
        return Ok(());
    }

    let kubectl = Kubectl::new(opts.call_timeout());

    hooks::run_phase(
        "preDestroy",
        &session.stack.hooks.pre_destroy,
        &session.stack,
        &ctx,
        &kubectl,
        opts.call_timeout(),
    )
    .await?;

    kubectl.delete(&stream, &ctx.namespace).await?;
    backend.delete(&record.name).await.into_diagnostic()?;

    if let Err(e) = hooks::run_phase(
        "postDestroy",
        &session.stack.hooks.post_destroy,
        &session.stack,
        &ctx,
        &kubectl,
        opts.call_timeout(),
    )
    .await
    {
        warn!(error = %e, "post-destroy hook failed");
    }

    eprintln!(
        "{} {} slot {} ({})",
        style("released").green().bold(),
        env,
        record.slot,
        namespace
    );
    Ok(())
}
