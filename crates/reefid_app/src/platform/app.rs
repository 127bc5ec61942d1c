use std::collections::BTreeSet;
use std::fs;
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::Parser;
use reefid_core::{DialogEvent, DialogView, IdentificationOutcome};
use reefid_engine::{
    AnalysisOutcome, AssetReference, BatchError, BatchOutcome, BatchStage, CapturedImage, DeviceOrientation,
    EngineEvent, EngineHandle, PendingItemStore,
};
use reefid_logging::{reef_info, reef_warn};

use super::cli::{Args, Command};
use super::config::{load_config, save_config, AppConfig};
use super::effects::run_effects;

pub fn run_app() -> Result<()> {
    let args = Args::parse();

    let (mut config, config_problem) = match load_config(&args.config) {
        Ok(config) => (config, None),
        Err(err) => (AppConfig::default(), Some(err)),
    };
    args.apply_overrides(&mut config);
    reefid_logging::initialize(&config.log);
    if let Some(err) = config_problem {
        reef_warn!("Using default configuration: {}", err);
    }

    if args.command == Command::InitConfig {
        let written = save_config(&args.config, &config)?;
        println!("Wrote {}", written.display());
        return Ok(());
    }

    let engine = EngineHandle::new(config.engine_config())
        .context("Failed to start identification engine")?;
    reef_info!(
        "Engine ready: service {}, {} pending items",
        config.client.base_url,
        engine.store().pending_count()
    );

    match args.command {
        Command::Identify { files } => identify_files(&engine, &files),
        Command::Pending { all } => {
            print_pending(engine.store(), all);
            Ok(())
        }
        Command::Retry { asset } => retry(&engine, AssetReference::new(asset)),
        Command::Batch { all, assets } => {
            let selected: BTreeSet<AssetReference> = if all {
                engine
                    .store()
                    .list_unprocessed()
                    .map(|record| record.asset_reference)
                    .collect()
            } else {
                assets.into_iter().map(AssetReference::new).collect()
            };
            if selected.is_empty() {
                bail!("Nothing to identify: pass asset references or --all");
            }
            batch(&engine, selected)
        }
        Command::Delete { assets } => {
            engine.delete_pending(assets.into_iter().map(AssetReference::new).collect());
            let removed = wait_for(&engine, |event| match event {
                EngineEvent::PendingDeleted(result) => Some(result),
                _ => None,
            })??;
            println!("Deleted {} pending items", removed);
            Ok(())
        }
        Command::ClearIdentified => {
            let removed = engine.store().delete_processed()?;
            println!("Removed {} identified items", removed);
            Ok(())
        }
        Command::InitConfig => Ok(()),
    }
}

/// Each file is a separate capture; the next one starts after the previous settles.
fn identify_files(engine: &EngineHandle, files: &[PathBuf]) -> Result<()> {
    for file in files {
        let bytes = fs::read(file).with_context(|| format!("Failed to read {}", file.display()))?;
        println!("{}:", file.display());

        engine.capture(CapturedImage {
            bytes,
            orientation: DeviceOrientation::Portrait,
        });
        let outcome = wait_for(engine, analysis_finished)??;
        report_analysis(engine, &outcome);
        run_effects(engine.dispatch_dialog(DialogEvent::Dismissed), engine.store());
    }
    Ok(())
}

fn retry(engine: &EngineHandle, asset: AssetReference) -> Result<()> {
    if engine.store().get(&asset).is_none() {
        bail!("No pending item {}", asset);
    }
    engine.retry_pending(asset);
    let outcome = wait_for(engine, analysis_finished)??;
    report_analysis(engine, &outcome);
    if matches!(outcome, AnalysisOutcome::Failed { .. }) {
        run_effects(
            engine.dispatch_dialog(DialogEvent::ViewPendingRequested),
            engine.store(),
        );
    }
    Ok(())
}

fn batch(engine: &EngineHandle, selected: BTreeSet<AssetReference>) -> Result<()> {
    let count = selected.len();
    engine.identify_batch(selected);
    println!("Identifying {} items...", count);

    let outcome = loop {
        match engine.recv() {
            Some(EngineEvent::BatchProgress(progress)) => {
                let stage = match progress.stage {
                    BatchStage::Converting => "preparing",
                    BatchStage::AwaitingResponse => "waiting for service",
                    BatchStage::Done => "done",
                };
                eprintln!("  {:>3.0}% {}", progress.fraction * 100.0, stage);
            }
            Some(EngineEvent::BatchFinished(Err(BatchError::Commit { outcome, failed }))) => {
                print_batch(&outcome);
                for (asset, err) in &failed {
                    eprintln!("  {} stays pending: {}", asset, err);
                }
                bail!("{} identified items could not be marked processed", failed.len());
            }
            Some(EngineEvent::BatchFinished(result)) => break result?,
            Some(other) => reef_warn!("Ignoring unexpected engine event: {:?}", other),
            None => bail!("Identification engine stopped unexpectedly"),
        }
    };
    print_batch(&outcome);
    Ok(())
}

fn wait_for<T>(engine: &EngineHandle, mut pick: impl FnMut(EngineEvent) -> Option<T>) -> Result<T> {
    loop {
        let Some(event) = engine.recv() else {
            bail!("Identification engine stopped unexpectedly");
        };
        if let Some(found) = pick(event) {
            return Ok(found);
        }
    }
}

fn analysis_finished(
    event: EngineEvent,
) -> Option<Result<AnalysisOutcome, reefid_engine::AnalysisError>> {
    match event {
        EngineEvent::AnalysisFinished(result) => Some(result),
        _ => None,
    }
}

fn report_analysis(engine: &EngineHandle, outcome: &AnalysisOutcome) {
    let state = engine.dialog().borrow().clone();
    let view = DialogView::from_state(state.as_ref(), false);
    if !view.headline.is_empty() {
        println!("  {}", view.headline);
    }

    match outcome {
        AnalysisOutcome::Identified { .. } => {
            run_effects(
                engine.dispatch_dialog(DialogEvent::ViewDetailsRequested),
                engine.store(),
            );
        }
        AnalysisOutcome::Failed {
            asset: Some(asset), ..
        } => {
            println!("  Queued as {}; retry with `reefid retry {}`", asset, asset);
        }
        AnalysisOutcome::Failed { asset: None, .. } => {
            println!("  The photo could not be stored and was not queued");
        }
        AnalysisOutcome::Cancelled { .. } => println!("  Cancelled"),
        AnalysisOutcome::TimedOut { .. } => {
            println!("  Loading the photo took too long; nothing was changed")
        }
    }
}

fn print_batch(outcome: &BatchOutcome) {
    for item in &outcome.results {
        match &item.outcome {
            IdentificationOutcome::Success(species) => {
                println!("  {:<28} {}", item.asset, species.common_name)
            }
            IdentificationOutcome::Failure(category) => {
                println!("  {:<28} failed: {}", item.asset, category)
            }
        }
    }
    println!(
        "{} processed, {} identified, {} failed",
        outcome.total_processed, outcome.success_count, outcome.failure_count
    );
}

pub(crate) fn print_pending(store: &PendingItemStore, include_processed: bool) {
    let records: Vec<_> = if include_processed {
        store.list().collect()
    } else {
        store.list_unprocessed().collect()
    };
    if records.is_empty() {
        println!("No pending items");
        return;
    }
    println!(
        "{:<28} {:<17} {:<20} {:>7}  {}",
        "ASSET", "CAPTURED", "STATUS", "RETRIES", "LAST ATTEMPT"
    );
    for record in records {
        let status = if record.is_processed {
            "identified".to_string()
        } else {
            record
                .failure_reason
                .clone()
                .unwrap_or_else(|| "pending".to_string())
        };
        let last_attempt = record
            .last_attempt_at
            .map(|at| at.format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{:<28} {:<17} {:<20} {:>7}  {}",
            record.asset_reference,
            record.captured_at.format("%Y-%m-%d %H:%M"),
            status,
            record.retry_count,
            last_attempt
        );
    }
}
