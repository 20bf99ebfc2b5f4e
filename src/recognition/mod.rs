//! Recognition service collaborator.
//!
//! The managed service that trains recognizers, runs detection jobs, and
//! serves real-time endpoints is reached through the `RecognitionService`
//! trait. `HttpRecognitionClient` talks to the real service;
//! `ScriptedRecognitionService` replays canned state sequences.

mod client;
mod config;
mod scripted;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;

use crate::models::{
    DetectedEntity, DetectionJobHandle, DetectionStatusReport, EndpointHandle,
    EndpointStatusReport, InputFormat, LabelSet, LanguageCode, TrainingJobHandle,
    TrainingStatusReport,
};

pub use client::HttpRecognitionClient;
pub use config::ServiceConfig;
pub use scripted::ScriptedRecognitionService;

/// Errors returned by a recognition service.
#[derive(Debug, Error)]
pub enum RecognitionError {
    /// Failed to reach the service
    #[error("Connection error: {0}")]
    Connection(String),
    /// The service understood the request and refused it
    #[error("{kind}: {message}")]
    Rejected { kind: String, message: String },
    /// Non-success response without a structured error body
    #[error("API error: HTTP {status}: {body}")]
    Api { status: u16, body: String },
    /// Response body did not match the expected shape
    #[error("Parse error: {0}")]
    Parse(String),
    /// Job, model or endpoint does not exist
    #[error("Not found: {0}")]
    NotFound(String),
}

/// Where the training documents live.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DocumentLocations {
    pub train: String,
    /// Without a test set the service holds out part of the training data.
    pub test: Option<String>,
    pub format: InputFormat,
}

/// Where the annotation tables live.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AnnotationLocations {
    pub train: String,
    pub test: Option<String>,
}

/// Everything needed to submit a recognizer training job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TrainingJobRequest {
    pub recognizer_name: String,
    pub version_name: Option<String>,
    pub documents: DocumentLocations,
    pub annotations: AnnotationLocations,
    pub labels: LabelSet,
    pub language: LanguageCode,
    /// Role the service assumes to read the staged data.
    pub data_access_role: String,
}

/// Everything needed to submit a batch detection job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DetectionJobRequest {
    pub job_name: Option<String>,
    pub model_identifier: String,
    pub input_location: String,
    pub output_location_prefix: String,
    pub input_format: InputFormat,
    pub language: LanguageCode,
    pub data_access_role: String,
}

/// Everything needed to deploy a real-time endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EndpointRequest {
    pub endpoint_name: String,
    pub model_identifier: String,
    pub inference_units: u32,
    pub data_access_role: Option<String>,
}

/// Operations the orchestrator needs from a recognition service.
///
/// Submissions return as soon as the service has accepted the job; the
/// `describe_*` calls return one snapshot of the remote state.
#[async_trait]
pub trait RecognitionService: Send + Sync {
    async fn submit_training_job(
        &self,
        request: &TrainingJobRequest,
    ) -> Result<TrainingJobHandle, RecognitionError>;

    async fn describe_training_job(
        &self,
        handle: &TrainingJobHandle,
    ) -> Result<TrainingStatusReport, RecognitionError>;

    /// Ask the service to stop a running training job.
    async fn stop_training_job(&self, handle: &TrainingJobHandle) -> Result<(), RecognitionError>;

    async fn submit_detection_job(
        &self,
        request: &DetectionJobRequest,
    ) -> Result<DetectionJobHandle, RecognitionError>;

    async fn describe_detection_job(
        &self,
        handle: &DetectionJobHandle,
    ) -> Result<DetectionStatusReport, RecognitionError>;

    async fn stop_detection_job(&self, handle: &DetectionJobHandle)
        -> Result<(), RecognitionError>;

    async fn create_endpoint(
        &self,
        request: &EndpointRequest,
    ) -> Result<EndpointHandle, RecognitionError>;

    async fn describe_endpoint(
        &self,
        handle: &EndpointHandle,
    ) -> Result<EndpointStatusReport, RecognitionError>;

    /// Synchronous detection against a deployed endpoint.
    async fn detect_entities(
        &self,
        text: &str,
        endpoint_arn: &str,
    ) -> Result<Vec<DetectedEntity>, RecognitionError>;
}
