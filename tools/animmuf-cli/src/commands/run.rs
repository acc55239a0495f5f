//! Run the pipeline once.

use std::process::ExitCode;
use std::sync::atomic::Ordering;

use animmuf_common::config::AppConfig;
use animmuf_pipeline::{Pipeline, PipelineResult, PipelineStatus};
use anyhow::Context;

pub async fn run(config: &AppConfig, video: bool, json: bool) -> anyhow::Result<ExitCode> {
    let pipeline = Pipeline::from_config(config)
        .context("Failed to set up pipeline")?
        .with_video(video);

    let cancel = pipeline.cancel_flag();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupt received, stopping at the next stage boundary");
            cancel.store(true, Ordering::SeqCst);
        }
    });

    let result = pipeline.run().await;

    if json {
        println!("{}", serde_json::to_string_pretty(&summary(&result))?);
    } else {
        print_summary(&result);
    }

    match &result.status {
        PipelineStatus::Done => Ok(ExitCode::SUCCESS),
        PipelineStatus::Failed {
            stage,
            reason,
            detail,
        } => {
            eprintln!("animmuf: failed while {stage}: {reason}: {detail}");
            Ok(ExitCode::FAILURE)
        }
    }
}

fn print_summary(result: &PipelineResult) {
    let fetch = &result.fetch;
    if fetch.listing_failed {
        println!("Listing:   unavailable, used cached frames");
    } else {
        println!(
            "Listing:   {} frames ({} cached, {} new, {} gone, {} failed)",
            fetch.listed,
            fetch.already_cached,
            fetch.fetched,
            fetch.gone.len() + fetch.known_gone,
            fetch.failed.len()
        );
    }
    if result.frames_considered > 0 {
        println!(
            "Frames:    {} used of {} ({} gaps)",
            result.frames_used,
            result.frames_considered,
            result.gaps_detected.len()
        );
    }
    for gap in &result.gaps_detected {
        println!(
            "  gap {} .. {} ({} min)",
            gap.start.format("%Y-%m-%d %H:%M"),
            gap.end.format("%Y-%m-%d %H:%M"),
            gap.observed().num_minutes()
        );
    }
    for warning in &result.warnings {
        println!("Warning:   {warning}");
    }
    if let Some(path) = &result.output_path {
        println!("Video:     {}", path.display());
    }
}

fn summary(result: &PipelineResult) -> serde_json::Value {
    let status = match &result.status {
        PipelineStatus::Done => serde_json::json!({ "state": "done" }),
        PipelineStatus::Failed {
            stage,
            reason,
            detail,
        } => serde_json::json!({
            "state": "failed",
            "stage": stage.to_string(),
            "reason": reason.to_string(),
            "detail": detail,
        }),
    };
    let gaps: Vec<_> = result
        .gaps_detected
        .iter()
        .map(|gap| {
            serde_json::json!({
                "start": gap.start.to_rfc3339(),
                "end": gap.end.to_rfc3339(),
                "missing_frames": gap.missing_frames(),
            })
        })
        .collect();

    serde_json::json!({
        "status": status,
        "frames_considered": result.frames_considered,
        "frames_used": result.frames_used,
        "gaps_detected": gaps,
        "output_path": result.output_path.as_ref().map(|p| p.display().to_string()),
        "intermediate_path": result.intermediate_path.as_ref().map(|p| p.display().to_string()),
        "fetch": {
            "listed": result.fetch.listed,
            "listing_failed": result.fetch.listing_failed,
            "already_cached": result.fetch.already_cached,
            "fetched": result.fetch.fetched,
            "unchanged": result.fetch.unchanged,
            "gone": result.fetch.gone.len(),
            "known_gone": result.fetch.known_gone,
            "failed": result.fetch.failed.len(),
            "pruned": result.fetch.pruned,
        },
        "warnings": result.warnings,
    })
}
