//! `ocforge-worker` -- runs one character image generation end to end.
//!
//! Loads the character's archive, submits a job in the requested mode,
//! polls it to completion (including the avatar auto-chained by a
//! creation-flow full-body portrait) and applies the result.
//!
//! # Environment variables
//!
//! | Variable             | Required | Default                 | Description                              |
//! |----------------------|----------|-------------------------|------------------------------------------|
//! | `GENERATION_API_URL` | no       | `http://localhost:3000` | Generation backend base URL              |
//! | `CHARACTER_API_URL`  | no       | `GENERATION_API_URL`    | Character persistence base URL           |
//! | `POLL_INTERVAL_MS`   | no       | `3000`                  | Delay between status checks              |
//! | `POLL_MAX_ATTEMPTS`  | no       | `100`                   | Status checks before giving up           |
//! | `POLL_TIMEOUT_SECS`  | no       | `600`                   | Wall-clock limit per job                 |
//! | `ARCHIVE_CAPACITY`   | no       | `10`                    | Maximum archive entries per character    |
//! | `DESIGN_SHEET_MODEL` | no       | `google/nano-banana`    | Model for design sheets and event images |
//! | `DESIGN_SHEET_LABEL` | no       | `Design Sheet`          | Label given to design sheet entries      |
//! | `RESOLVE_SIZE`       | no       | `auto`                  | Size variant for managed image URLs      |

use std::sync::Arc;

use clap::Parser;
use ocforge_backend::api::GenerationApi;
use ocforge_backend::store::CharacterApi;
use ocforge_pipeline::coordinator::GenerationCoordinator;
use ocforge_pipeline::events::{ApplyOutcome, JobUpdate, JobUpdateKind};
use ocforge_pipeline::reconciler::ArchiveReconciler;
use ocforge_worker::cli::Cli;
use ocforge_worker::config::StudioConfig;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "ocforge_worker=info,ocforge_pipeline=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    let config = StudioConfig::from_env().unwrap_or_else(|e| {
        tracing::error!(error = %e, "Invalid configuration");
        std::process::exit(1);
    });

    tracing::info!(
        character_id = %cli.character_id,
        mode = %cli.mode,
        flow = ?cli.flow,
        generation_api_url = %config.generation_api_url,
        character_api_url = %config.character_api_url,
        "Starting ocforge-worker",
    );

    let backend = Arc::new(GenerationApi::new(config.generation_api_url.clone()));
    let store = Arc::new(CharacterApi::new(config.character_api_url.clone()));

    let reconciler = ArchiveReconciler::load(store, cli.character_id, config.archive_capacity)
        .await
        .unwrap_or_else(|e| {
            tracing::error!(character_id = %cli.character_id, error = %e, "Failed to load character archive");
            std::process::exit(1);
        });

    tracing::info!(
        entries = reconciler.archive().len(),
        capacity = reconciler.archive().capacity(),
        primary = ?reconciler.archive().primary().map(|p| p.to_string()),
        "Character archive loaded",
    );

    let mut coordinator =
        GenerationCoordinator::new(backend, reconciler, cli.flow.into(), config.coordinator);

    let job_id = match coordinator.submit(cli.mode, cli.params()).await {
        Ok(job_id) => job_id,
        Err(e) => {
            tracing::error!(mode = %cli.mode, error = %e, "Generation job not submitted");
            std::process::exit(1);
        }
    };
    tracing::info!(job_id = %job_id, "Waiting for generation results");

    let updates = coordinator.run_until_idle().await;
    let mut failed = false;
    for update in &updates {
        failed |= !report(update);
    }

    if failed || updates.is_empty() {
        std::process::exit(1);
    }
}

/// Log a terminal update. Returns `false` if the job did not succeed.
fn report(update: &JobUpdate) -> bool {
    let job_id = &update.job_id;
    let mode = update.mode;
    match &update.kind {
        JobUpdateKind::Completed(completion) => {
            match &completion.outcome {
                ApplyOutcome::AvatarUpdated { reference } => {
                    tracing::info!(job_id = %job_id, reference = %reference, "Avatar updated");
                }
                ApplyOutcome::BackgroundUpdated { reference } => {
                    tracing::info!(job_id = %job_id, reference = %reference, "Background updated");
                }
                ApplyOutcome::ArchiveEntryAdded {
                    entry_id,
                    became_primary,
                    ..
                } => {
                    tracing::info!(
                        job_id = %job_id,
                        mode = %mode,
                        entry_id = %entry_id,
                        became_primary,
                        "Archive entry added",
                    );
                }
                ApplyOutcome::ArchiveLimitReached { capacity, .. } => {
                    tracing::warn!(job_id = %job_id, capacity, "Archive is full; result was not stored");
                }
                ApplyOutcome::EventIllustrated { reference, url } => {
                    tracing::info!(
                        job_id = %job_id,
                        reference = %reference,
                        url = url.as_deref().unwrap_or("-"),
                        "Event illustration ready",
                    );
                }
            }
            if let Some(chained) = &completion.chained_avatar {
                tracing::info!(job_id = %job_id, avatar_job_id = %chained, "Avatar generation chained");
            }
            true
        }
        JobUpdateKind::ApplyFailed { message } => {
            tracing::error!(job_id = %job_id, mode = %mode, error = %message, "Result could not be applied");
            false
        }
        JobUpdateKind::Failed { message } => {
            tracing::error!(job_id = %job_id, mode = %mode, error = %message, "Generation failed");
            false
        }
        JobUpdateKind::Superseded | JobUpdateKind::Cancelled => {
            tracing::info!(job_id = %job_id, mode = %mode, "Generation job stopped");
            true
        }
        JobUpdateKind::Submitted
        | JobUpdateKind::Status { .. }
        | JobUpdateKind::PollingError { .. } => true,
    }
}
