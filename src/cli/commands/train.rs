//! Annotation checks and training commands.

use std::path::Path;

use console::style;

use nerctl::config::Config;
use nerctl::models::{JobStatus, TrainingJobHandle, TrainingStatusReport};
use nerctl::services::{AnnotationTable, DocumentSet, PollOutcome, TrainingData};
use nerctl::Orchestrator;

use crate::cli::progress::PollProgress;

/// Validate an annotation table and print its label histogram.
pub fn cmd_labels(
    config: &Config,
    annotations: &Path,
    documents: Option<&Path>,
) -> anyhow::Result<()> {
    let table = AnnotationTable::from_path(annotations)?;

    if let Some(documents) = documents {
        let text = std::fs::read_to_string(documents)?;
        let name = documents
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or_default();
        table.cross_reference(&DocumentSet::new().with_document(name, &text))?;
        println!(
            "{} All {} spans fit {}",
            style("✓").green(),
            table.len(),
            documents.display()
        );
    }

    let labels = table.label_set()?;
    println!(
        "{} {} annotations, {} labels",
        style("✓").green(),
        table.len(),
        labels.len()
    );

    let min = config.min_mentions_per_label();
    for (label, count) in table.label_counts() {
        if count < min {
            println!("  {:<24} {:>6}  {}", label, count, style("(sparse)").yellow());
        } else {
            println!("  {:<24} {:>6}", label, count);
        }
    }
    Ok(())
}

pub fn print_training_report(report: &TrainingStatusReport) {
    let marker = match report.status {
        JobStatus::Trained => style("✓").green(),
        JobStatus::Failed => style("✗").red(),
        _ => style("…").dim(),
    };
    println!("{} Status: {}", marker, report.remote_status);
    if let Some(ref message) = report.message {
        println!("  {}", message);
    }
    if let (Some(submitted), Some(ended)) = (report.submit_time, report.end_time) {
        println!(
            "  Training took {} minutes",
            (ended - submitted).num_minutes()
        );
    }

    let Some(ref metrics) = report.metrics else {
        return;
    };
    if let (Some(trained), Some(test)) = (metrics.trained_documents, metrics.test_documents) {
        println!("  Documents: {} trained, {} test", trained, test);
    }
    let fmt = |v: Option<f64>| v.map(|v| format!("{:.3}", v)).unwrap_or_else(|| "-".into());
    println!(
        "  {:<24} {:>9} {:>9} {:>9} {:>9}",
        "", "precision", "recall", "f1", "mentions"
    );
    println!(
        "  {:<24} {:>9} {:>9} {:>9}",
        "overall",
        fmt(metrics.overall.precision),
        fmt(metrics.overall.recall),
        fmt(metrics.overall.f1_score)
    );
    for label in &metrics.per_label {
        println!(
            "  {:<24} {:>9} {:>9} {:>9} {:>9}",
            label.label,
            fmt(label.metrics.precision),
            fmt(label.metrics.recall),
            fmt(label.metrics.f1_score),
            label
                .train_mentions
                .map(|m| m.to_string())
                .unwrap_or_else(|| "-".into())
        );
    }
}

async fn wait_and_report(
    orchestrator: Orchestrator,
    progress: PollProgress,
    handle: &TrainingJobHandle,
) -> anyhow::Result<()> {
    let outcome = orchestrator.wait_for_training(handle).await;
    // Closing the event channel clears the spinner
    drop(orchestrator);
    progress.finish().await;

    match outcome? {
        PollOutcome::Succeeded(report) => print_training_report(&report),
        PollOutcome::RemoteJobFailed(report) => {
            print_training_report(&report);
            anyhow::bail!("training job {} failed", handle.job_identifier);
        }
    }
    Ok(())
}

/// Stage data and submit (or resume) a training job.
pub async fn cmd_train(
    config: Config,
    name: &str,
    version: Option<&str>,
    data: &TrainingData,
    wait: bool,
) -> anyhow::Result<()> {
    let orchestrator = Orchestrator::from_config(config)?;
    let mut ledger = orchestrator.open_ledger()?;

    let submission = orchestrator.train(name, version, data, &mut ledger).await?;
    let handle = submission.handle().clone();
    if submission.is_resumed() {
        println!(
            "{} Resuming existing training job {}",
            style("→").cyan(),
            handle.job_identifier
        );
    } else {
        println!(
            "{} Submitted training job {}",
            style("✓").green(),
            handle.job_identifier
        );
    }
    println!("  Model: {}", handle.model_identifier);

    if !wait {
        println!(
            "  {} Run 'nerctl status {} --wait' to follow it",
            style("→").dim(),
            handle.model_identifier
        );
        return Ok(());
    }

    let (tx, progress) = PollProgress::start(&handle.job_identifier);
    wait_and_report(orchestrator.with_events(tx), progress, &handle).await
}

/// Show (or follow) training status.
pub async fn cmd_status(config: Config, model: &str, wait: bool) -> anyhow::Result<()> {
    let orchestrator = Orchestrator::from_config(config)?;
    let handle = TrainingJobHandle::from_model_identifier(model);

    if wait {
        let (tx, progress) = PollProgress::start(&handle.job_identifier);
        return wait_and_report(orchestrator.with_events(tx), progress, &handle).await;
    }

    let report = orchestrator.training_status(&handle).await?;
    print_training_report(&report);
    Ok(())
}

pub async fn cmd_stop(config: Config, model: &str) -> anyhow::Result<()> {
    let orchestrator = Orchestrator::from_config(config)?;
    let handle = TrainingJobHandle::from_model_identifier(model);
    orchestrator.stop_training(&handle).await?;
    println!(
        "{} Stop requested for {}",
        style("✓").green(),
        handle.job_identifier
    );
    Ok(())
}
