//! Endpoint and batch detection commands.

use std::path::Path;

use console::style;

use nerctl::config::Config;
use nerctl::models::{DetectedEntity, DetectionJobHandle, DetectionReport, InputFormat};
use nerctl::services::{results, PollOutcome};
use nerctl::Orchestrator;

use crate::cli::progress::PollProgress;

fn print_entities(entities: &[DetectedEntity]) {
    for entity in entities {
        println!(
            "  [{:>4}, {:>4})  {:<16} {:.3}  {}",
            entity.begin_offset,
            entity.end_offset,
            entity.label_type,
            entity.confidence_score,
            entity.text
        );
    }
}

fn print_report(report: &DetectionReport) {
    for document in &report.documents {
        let source = match (&document.file, document.line) {
            (Some(file), Some(line)) => format!("{}:{}", file, line),
            (Some(file), None) => file.clone(),
            _ => "(document)".to_string(),
        };
        println!("{} ({} entities)", style(source).bold(), document.entities.len());
        print_entities(&document.entities);
    }

    println!(
        "{} {} documents, {} entities",
        style("✓").green(),
        report.documents.len(),
        report.entity_count()
    );
    if report.unparsable_lines > 0 {
        println!(
            "{} Skipped {} unparsable lines",
            style("!").yellow(),
            report.unparsable_lines
        );
    }
}

pub async fn cmd_deploy(
    config: Config,
    model: &str,
    name: &str,
    units: u32,
    wait: bool,
) -> anyhow::Result<()> {
    let orchestrator = Orchestrator::from_config(config)?;
    let handle = orchestrator.deploy(model, name, units).await?;
    println!("{} Creating endpoint {}", style("✓").green(), handle.endpoint_arn);

    if !wait {
        return Ok(());
    }

    let (tx, progress) = PollProgress::start(name);
    let orchestrator = orchestrator.with_events(tx);
    let outcome = orchestrator.wait_for_endpoint(&handle).await;
    drop(orchestrator);
    progress.finish().await;

    match outcome? {
        PollOutcome::Succeeded(report) => {
            println!(
                "{} Endpoint in service ({} inference units)",
                style("✓").green(),
                report.current_inference_units.unwrap_or(handle.inference_units)
            );
            Ok(())
        }
        PollOutcome::RemoteJobFailed(report) => {
            anyhow::bail!(
                "endpoint ended as {}: {}",
                report.remote_status,
                report.message.unwrap_or_default()
            )
        }
    }
}

pub async fn cmd_detect(config: Config, endpoint: &str, text: &str) -> anyhow::Result<()> {
    let orchestrator = Orchestrator::from_config(config)?;
    let entities = orchestrator.detect(endpoint, text).await?;
    println!("{} {} entities", style("✓").green(), entities.len());
    print_entities(&entities);
    Ok(())
}

#[allow(clippy::too_many_arguments)]
pub async fn cmd_batch(
    config: Config,
    model: &str,
    input: &str,
    output: Option<&str>,
    name: Option<&str>,
    format: InputFormat,
    wait: bool,
) -> anyhow::Result<()> {
    let orchestrator = Orchestrator::from_config(config)?;
    let request = orchestrator.detection_request(model, input, output, format, name)?;
    let handle = orchestrator.submit_detection(&request).await?;
    println!(
        "{} Submitted detection job {}",
        style("✓").green(),
        handle.job_identifier
    );
    println!("  Output under {}", request.output_location_prefix);

    if !wait {
        return Ok(());
    }

    let (tx, progress) = PollProgress::start(&handle.job_identifier);
    let orchestrator = orchestrator.with_events(tx);
    let polled = orchestrator.wait_for_detection(&handle).await;
    let store = orchestrator.store().clone();
    drop(orchestrator);
    progress.finish().await;
    let (handle, outcome) = polled?;

    match outcome {
        PollOutcome::Succeeded(_) => {
            let report = results::read_job_output(store.as_ref(), &handle).await?;
            print_report(&report);
            Ok(())
        }
        PollOutcome::RemoteJobFailed(report) => {
            anyhow::bail!(
                "detection job {} ended as {}: {}",
                handle.job_identifier,
                report.remote_status,
                report.message.unwrap_or_default()
            )
        }
    }
}

pub async fn cmd_stop(config: Config, job: &str) -> anyhow::Result<()> {
    let orchestrator = Orchestrator::from_config(config)?;
    let handle = DetectionJobHandle::from_job_identifier(job);
    orchestrator.stop_detection(&handle).await?;
    println!(
        "{} Stop requested for detection job {}",
        style("✓").green(),
        handle.job_identifier
    );
    Ok(())
}

/// Read output from a local file or a stored object.
pub async fn cmd_results(config: Config, location: &str) -> anyhow::Result<()> {
    let report = if location.starts_with("s3://") {
        let orchestrator = Orchestrator::from_config(config)?;
        orchestrator.read_results_at(location).await?
    } else {
        results::read_path(Path::new(location)).await?
    };
    print_report(&report);
    Ok(())
}
