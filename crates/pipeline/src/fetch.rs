//! Concurrent download of listed frames that are not cached yet.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use animmuf_common::error::{FetchError, StoreError};
use animmuf_fetcher::{retry_transient, FrameProvider, RetryPolicy};
use animmuf_frame_model::FrameRef;
use animmuf_frame_store::{FrameStore, PutOutcome};
use chrono::{DateTime, Utc};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::state::FetchSummary;

/// What stopped the fetch stage early.
#[derive(Debug)]
pub(crate) enum FetchAbort {
    Cancelled,
    Conflict(StoreError),
}

enum Outcome {
    Put(PutOutcome),
    Gone(DateTime<Utc>, FetchError),
    Failed(DateTime<Utc>, String),
    Conflict(StoreError),
    Skipped,
}

/// Download and store `refs` with at most `workers` requests in flight.
///
/// Store writes run on the blocking pool. Frames the provider reports gone
/// get a marker in the store so later runs skip them.
///
/// Every spawned download is joined before this returns, so nothing it
/// started can still be writing when the next stage reads the store.
pub(crate) async fn fetch_missing(
    provider: &Arc<dyn FrameProvider>,
    store: &Arc<FrameStore>,
    policy: RetryPolicy,
    workers: usize,
    refs: Vec<FrameRef>,
    cancel: &Arc<AtomicBool>,
    summary: &mut FetchSummary,
) -> Result<(), FetchAbort> {
    let semaphore = Arc::new(Semaphore::new(workers.max(1)));
    // Set on the first conflict so queued workers stop early.
    let halt = Arc::new(AtomicBool::new(false));
    let mut tasks = JoinSet::new();

    for frame_ref in refs {
        if cancel.load(Ordering::SeqCst) || halt.load(Ordering::SeqCst) {
            break;
        }
        let Ok(permit) = semaphore.clone().acquire_owned().await else {
            break;
        };

        let provider = Arc::clone(provider);
        let store = Arc::clone(store);
        let cancel = Arc::clone(cancel);
        let halt = Arc::clone(&halt);
        tasks.spawn(async move {
            let _permit = permit;
            if cancel.load(Ordering::SeqCst) || halt.load(Ordering::SeqCst) {
                return Outcome::Skipped;
            }
            let outcome = fetch_one(provider.as_ref(), &store, &policy, &frame_ref).await;
            if matches!(outcome, Outcome::Conflict(_)) {
                halt.store(true, Ordering::SeqCst);
            }
            outcome
        });
    }

    let mut conflict = None;
    while let Some(joined) = tasks.join_next().await {
        let outcome = match joined {
            Ok(outcome) => outcome,
            Err(err) => {
                tracing::error!(error = %err, "Fetch worker panicked");
                continue;
            }
        };
        match outcome {
            Outcome::Put(PutOutcome::Stored) => summary.fetched += 1,
            Outcome::Put(PutOutcome::Unchanged) => summary.unchanged += 1,
            Outcome::Put(PutOutcome::InFlight) | Outcome::Skipped => {}
            Outcome::Gone(timestamp, err) => {
                tracing::warn!(timestamp = %timestamp, error = %err, "Frame gone, recorded as gap");
                summary.gone.push(timestamp);
            }
            Outcome::Failed(timestamp, message) => {
                tracing::warn!(timestamp = %timestamp, error = %message, "Frame fetch failed");
                summary.failed.push(timestamp);
            }
            Outcome::Conflict(err) => {
                tracing::error!(error = %err, "Provider changed a cached frame");
                conflict.get_or_insert(err);
            }
        }
    }
    summary.gone.sort();
    summary.failed.sort();

    if let Some(err) = conflict {
        return Err(FetchAbort::Conflict(err));
    }
    if cancel.load(Ordering::SeqCst) {
        return Err(FetchAbort::Cancelled);
    }
    Ok(())
}

async fn fetch_one(
    provider: &dyn FrameProvider,
    store: &Arc<FrameStore>,
    policy: &RetryPolicy,
    frame_ref: &FrameRef,
) -> Outcome {
    let timestamp = frame_ref.timestamp;
    let frame = match retry_transient(policy, &frame_ref.source_id, || provider.fetch(frame_ref)).await {
        Ok(frame) => frame,
        Err(err) if err.is_transient() => return Outcome::Failed(timestamp, err.to_string()),
        Err(err) => {
            let marker = Arc::clone(store);
            let reason = err.to_string();
            let recorded = tokio::task::spawn_blocking(move || marker.mark_gone(timestamp, &reason))
                .await
                .map_err(|e| e.to_string())
                .and_then(|r| r.map_err(|e| e.to_string()));
            if let Err(e) = recorded {
                tracing::warn!(timestamp = %timestamp, error = %e, "Could not record gone frame");
            }
            return Outcome::Gone(timestamp, err);
        }
    };

    let writer = Arc::clone(store);
    match tokio::task::spawn_blocking(move || writer.put(&frame)).await {
        Ok(Ok(outcome)) => Outcome::Put(outcome),
        Ok(Err(err)) if err.is_conflict() => Outcome::Conflict(err),
        Ok(Err(err)) => Outcome::Failed(timestamp, err.to_string()),
        Err(err) => Outcome::Failed(timestamp, format!("store task failed: {err}")),
    }
}
