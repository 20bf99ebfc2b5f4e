//! Batch detection job submission.

use std::sync::Arc;

use tracing::info;

use crate::error::{JobError, ValidationError};
use crate::models::{DetectionJobHandle, DetectionJobStatus, DetectionStatusReport};
use crate::recognition::{DetectionJobRequest, RecognitionService};
use crate::services::training::validate_name;
use crate::storage::BlobUri;

pub fn validate_request(request: &DetectionJobRequest) -> Result<(), ValidationError> {
    if let Some(ref name) = request.job_name {
        validate_name(name)?;
    }
    if request.model_identifier.trim().is_empty() {
        return Err(ValidationError::InvalidInput(
            "a model identifier is required".to_string(),
        ));
    }
    match BlobUri::parse(&request.input_location) {
        Ok(uri) if !uri.key().is_empty() => {}
        _ => {
            return Err(ValidationError::InvalidLocation(
                request.input_location.clone(),
            ))
        }
    }
    // The output location may be a bare bucket
    BlobUri::parse(&request.output_location_prefix)
        .map_err(|_| ValidationError::InvalidLocation(request.output_location_prefix.clone()))?;
    if request.data_access_role.trim().is_empty() {
        return Err(ValidationError::InvalidInput(
            "a data access role is required to run detection jobs".to_string(),
        ));
    }
    Ok(())
}

/// Handle with its output location filled in from a completed report.
///
/// The handle is returned unchanged if the job has not completed.
pub fn populate_output(
    handle: &DetectionJobHandle,
    report: &DetectionStatusReport,
) -> DetectionJobHandle {
    match (report.status, report.output_location.as_deref()) {
        (DetectionJobStatus::Completed, Some(location)) => handle.with_output_location(location),
        _ => handle.clone(),
    }
}

/// Submits asynchronous entity detection jobs.
pub struct DetectionJobSubmitter {
    service: Arc<dyn RecognitionService>,
}

impl DetectionJobSubmitter {
    pub fn new(service: Arc<dyn RecognitionService>) -> Self {
        Self { service }
    }

    /// Submit and return immediately; completion is polled separately.
    pub async fn submit(&self, request: &DetectionJobRequest) -> Result<DetectionJobHandle, JobError> {
        validate_request(request)?;
        let handle = self
            .service
            .submit_detection_job(request)
            .await
            .map_err(JobError::from_submission)?;
        info!(
            "Submitted detection job {} over {}",
            handle.job_identifier, request.input_location
        );
        Ok(handle)
    }

    /// Query the job once. The returned handle carries the output location
    /// if the job has completed.
    pub async fn refresh(
        &self,
        handle: &DetectionJobHandle,
    ) -> Result<(DetectionJobHandle, DetectionStatusReport), JobError> {
        let report = self.service.describe_detection_job(handle).await?;
        Ok((populate_output(handle, &report), report))
    }

    pub async fn stop(&self, handle: &DetectionJobHandle) -> Result<(), JobError> {
        self.service.stop_detection_job(handle).await?;
        info!("Stop requested for detection job {}", handle.job_identifier);
        Ok(())
    }
}
