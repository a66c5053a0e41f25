//! Background decision sweeper
//!
//! **[KYC-SW-010]** Recovery path for "database unavailable at decision
//! time": non-terminal submissions with no decision record are
//! periodically re-run through the orchestrator. Re-runs are idempotent
//! (the stored decision wins), so sweeping a just-decided submission is
//! harmless.

use crate::db::submissions;
use crate::orchestrator::SubmissionOrchestrator;
use chrono::{Duration as ChronoDuration, Utc};
use sqlx::SqlitePool;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

/// Only sweep submissions at least this many minutes old, to stay clear of
/// in-flight first-pass processing
const SWEEP_GRACE_MINUTES: i64 = 5;

/// Spawn the sweeper loop
pub fn spawn_decision_sweeper(
    db: SqlitePool,
    orchestrator: Arc<SubmissionOrchestrator>,
    interval: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            if let Err(e) = sweep_once(&db, &orchestrator).await {
                tracing::warn!(error = %e, "Decision sweep pass failed");
            }
        }
    })
}

/// One sweep pass; returns the number of submissions re-run
pub async fn sweep_once(
    db: &SqlitePool,
    orchestrator: &SubmissionOrchestrator,
) -> kasama_common::Result<usize> {
    let cutoff = Utc::now() - ChronoDuration::minutes(SWEEP_GRACE_MINUTES);
    let stranded: Vec<_> = submissions::list_undecided(db)
        .await?
        .into_iter()
        .filter(|s| s.created_at < cutoff)
        .collect();

    if stranded.is_empty() {
        return Ok(0);
    }

    tracing::info!(count = stranded.len(), "Re-running stranded submissions");
    let mut processed = 0;
    for submission in stranded {
        match orchestrator.process_existing(submission.guid).await {
            Ok(summary) => {
                processed += 1;
                tracing::info!(
                    submission = %submission.guid,
                    outcome = summary.outcome.as_str(),
                    "Stranded submission re-decided"
                );
            }
            Err(e) => {
                tracing::warn!(
                    submission = %submission.guid,
                    error = %e,
                    "Stranded submission re-run failed; will retry next sweep"
                );
            }
        }
    }
    Ok(processed)
}
