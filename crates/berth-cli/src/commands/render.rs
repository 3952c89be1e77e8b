//! Render command - produce the manifest stream without touching the cluster

use console::style;
use miette::{IntoDiagnostic, Result, WrapErr};
use std::fs;
use std::path::Path;

use berth_engine::{encode_documents, render_stack, resolve_namespace};

use crate::commands::{GlobalOpts, Session};

pub async fn run(opts: &GlobalOpts, output: Option<&Path>) -> Result<()> {
    let session = Session::open(opts)?;

    let namespace = resolve_namespace(&session.stack, &session.ctx, &session.ctx.env)
        .into_diagnostic()?;
    let ctx = session.ctx.clone().with_namespace(namespace);

    let documents = render_stack(&session.stack, &ctx, &session.filters).into_diagnostic()?;
    let stream = encode_documents(&documents).into_diagnostic()?;

    match output {
        Some(path) => {
            fs::write(path, &stream)
                .into_diagnostic()
                .wrap_err_with(|| format!("failed to write {}", path.display()))?;
            eprintln!(
                "{} {} ({} documents)",
                style("wrote").green(),
                path.display(),
                documents.len()
            );
        }
        None => print!("{stream}"),
    }

    Ok(())
}
