//! Slots command - inspect and manage slot records directly

use chrono::Utc;
use console::style;
use miette::{miette, IntoDiagnostic, Result};
use std::time::Duration;
use tracing::debug;

use berth_store::{allocate as allocate_slot, find_matching, garbage_collect, AllocateRequest};

use crate::commands::{GlobalOpts, Session};
use crate::github::Gh;

pub async fn list(opts: &GlobalOpts, json: bool) -> Result<()> {
    let session = Session::open(opts)?;
    let backend = session.backend(opts);

    let mut records = backend.list().await.into_diagnostic()?;
    if let Some(env) = &opts.env {
        if !env.is_empty() {
            records.retain(|r| &r.env == env);
        }
    }
    records.sort_by(|a, b| a.env.cmp(&b.env).then(a.slot.cmp(&b.slot)));

    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&records).into_diagnostic()?
        );
        return Ok(());
    }

    if records.is_empty() {
        eprintln!("no slot records");
        return Ok(());
    }

    let now = Utc::now();
    println!(
        "{:<20} {:>4}  {:<10} {:<24} {:>6} {:>6} {:>8}",
        "NAME",
        "SLOT",
        "ENV",
        "NAMESPACE",
        "ISSUE",
        "PR",
        "AGE"
    );
    for record in &records {
        println!(
            "{:<20} {:>4}  {:<10} {:<24} {:>6} {:>6} {:>7}h",
            record.name,
            record.slot,
            record.env,
            record.namespace,
            record.issue,
            record.pr,
            record.age(now).num_hours()
        );
    }
    Ok(())
}

pub async fn allocate(opts: &GlobalOpts) -> Result<()> {
    let env = opts.require_env()?;
    let session = Session::open(opts)?;
    let backend = session.backend(opts);

    let request = AllocateRequest {
        env: env.clone(),
        max_slots: session.stack.max_slots,
        preferred: opts.slot,
        issue: opts.issue,
        pr: opts.pr,
    };
    let record = allocate_slot(&*backend, &session.stack, &session.ctx, &request)
        .await
        .into_diagnostic()?;

    println!(
        "{} slot {} for {} ({})",
        style("allocated").green().bold(),
        record.slot,
        env,
        record.namespace
    );
    Ok(())
}

pub async fn release(opts: &GlobalOpts) -> Result<()> {
    let env = opts.require_env()?;
    let session = Session::open(opts)?;
    let backend = session.backend(opts);

    let records = backend.list().await.into_diagnostic()?;
    let record = find_matching(&records, &env, opts.slot, opts.issue, opts.pr)
        .ok_or_else(|| miette!("no slot record matches env '{env}'"))?;

    backend.delete(&record.name).await.into_diagnostic()?;
    println!(
        "{} {} (slot {})",
        style("released").green().bold(),
        record.name,
        record.slot
    );
    Ok(())
}

pub async fn gc(opts: &GlobalOpts, ttl_hours: Option<u64>) -> Result<()> {
    let session = Session::open(opts)?;
    let backend = session.backend(opts);

    let ttl = ttl_hours.map(|h| Duration::from_secs(h * 60 * 60));
    let env_filter = opts.env.as_deref().filter(|e| !e.is_empty());

    let removed = garbage_collect(&*backend, env_filter, ttl)
        .await
        .into_diagnostic()?;

    if removed.is_empty() {
        eprintln!("nothing to collect");
        return Ok(());
    }

    // Deletion already happened; the notification is decoupled on purpose.
    if !opts.dry_run {
        let gh = Gh::new(opts.call_timeout());
        for record in &removed {
            if record.issue == 0 && record.pr == 0 {
                continue;
            }
            let body = format!(
                "Environment slot {} ({}) expired and was reclaimed.",
                record.slot, record.namespace
            );
            if let Err(e) = gh.comment(record.issue, record.pr, &body).await {
                debug!(record = %record.name, error = %e, "expiry comment not posted");
            }
        }
    }

    for record in &removed {
        println!(
            "{} {} (slot {}, {})",
            style("reclaimed").yellow(),
            record.name,
            record.slot,
            record.env
        );
    }
    Ok(())
}
