use std::path::Path;

use log::{error, info, warn};

use crate::{
    api::PlanEntry,
    model::{ReconciliationOutcome, Status},
    Reposync,
};

/// Handler to sync command
/// Returns whether every repository reached a non failed state
pub fn do_sync(reposync: &Reposync) -> anyhow::Result<bool> {
    let outcomes = reposync.sync()?;
    for (spec, outcome) in reposync.config().repositories.iter().zip(&outcomes) {
        let line = render_outcome(&spec.url, outcome);
        match outcome.status {
            Status::Success | Status::RecoveredSuccess => info!("{}", line),
            Status::Degraded => warn!("{}", line),
            Status::Failed => error!("{}", line),
        }
    }

    let failed = outcomes.iter().filter(|outcome| outcome.is_failed()).count();
    info!(
        "Processed {} repositories, {} failed",
        outcomes.len(),
        failed
    );
    Ok(failed == 0)
}

/// Handler to plan command
pub fn do_plan(reposync: &Reposync) -> anyhow::Result<bool> {
    let entries = reposync.plan();
    for entry in &entries {
        match &entry.resolved {
            Ok(_) => info!("{}", render_plan(entry)),
            Err(_) => error!("{}", render_plan(entry)),
        }
    }
    Ok(entries.iter().all(|entry| entry.resolved.is_ok()))
}

/// Handler to init command
pub fn do_init(directory: &Path) -> anyhow::Result<bool> {
    Reposync::init(directory)?;
    Ok(true)
}

fn render_outcome(url: &str, outcome: &ReconciliationOutcome) -> String {
    let mut line = format!(
        "{} {} -> {}",
        outcome.status,
        url,
        outcome.final_path.display()
    );
    if let Some(commit) = &outcome.resulting_commit {
        line.push_str(&format!(" @ {commit}"));
    }
    if let Some(backup) = &outcome.backup_path {
        line.push_str(&format!(" (previous content in {})", backup.display()));
    }
    if let Some(error) = &outcome.error {
        line.push_str(&format!(": {error}"));
    }
    line
}

fn render_plan(entry: &PlanEntry) -> String {
    match &entry.resolved {
        Ok((target, state)) => format!(
            "{} -> {} ({}, branch {}{})",
            entry.spec.url,
            target.path().display(),
            state,
            entry.spec.branch,
            entry
                .spec
                .commit
                .as_ref()
                .map(|commit| format!(", commit {commit}"))
                .unwrap_or_default()
        ),
        Err(error) => format!("{}: {}", entry.spec.url, error),
    }
}
