//! Real-time endpoint deployment and synchronous detection.

use std::sync::Arc;

use tracing::info;

use crate::error::{JobError, ValidationError};
use crate::models::{DetectedEntity, EndpointHandle, EndpointStatusReport};
use crate::recognition::{EndpointRequest, RecognitionService};
use crate::services::poller::{PollOutcome, StatusPoller};
use crate::services::training::validate_name;

/// Largest text accepted by synchronous detection, in UTF-8 bytes.
pub const MAX_TEXT_BYTES: usize = 100_000;

pub fn validate_text(text: &str) -> Result<(), ValidationError> {
    if text.trim().is_empty() {
        return Err(ValidationError::InvalidInput(
            "text to analyse must not be empty".to_string(),
        ));
    }
    if text.len() > MAX_TEXT_BYTES {
        return Err(ValidationError::InvalidInput(format!(
            "text is {} bytes; at most {} bytes can be analysed at once",
            text.len(),
            MAX_TEXT_BYTES
        )));
    }
    Ok(())
}

/// Creates endpoints for trained models and queries them.
pub struct EndpointDeployer {
    service: Arc<dyn RecognitionService>,
}

impl EndpointDeployer {
    pub fn new(service: Arc<dyn RecognitionService>) -> Self {
        Self { service }
    }

    /// Start creating an endpoint. It is not usable until it is in service.
    pub async fn deploy(&self, request: &EndpointRequest) -> Result<EndpointHandle, JobError> {
        validate_name(&request.endpoint_name)?;
        if request.inference_units == 0 {
            return Err(ValidationError::InvalidInput(
                "an endpoint needs at least one inference unit".to_string(),
            )
            .into());
        }
        if request.model_identifier.trim().is_empty() {
            return Err(
                ValidationError::InvalidInput("a model identifier is required".to_string()).into(),
            );
        }

        let handle = self
            .service
            .create_endpoint(request)
            .await
            .map_err(JobError::from_submission)?;
        info!(
            "Creating endpoint {} with {} inference units",
            handle.endpoint_arn, handle.inference_units
        );
        Ok(handle)
    }

    /// Poll until the endpoint is in service or has failed.
    pub async fn wait(
        &self,
        handle: &EndpointHandle,
        poller: &StatusPoller,
    ) -> Result<PollOutcome<EndpointStatusReport>, JobError> {
        poller.poll_endpoint(handle).await
    }

    /// Run synchronous detection on a deployed endpoint.
    pub async fn detect(
        &self,
        endpoint_arn: &str,
        text: &str,
    ) -> Result<Vec<DetectedEntity>, JobError> {
        validate_text(text)?;
        Ok(self.service.detect_entities(text, endpoint_arn).await?)
    }
}
