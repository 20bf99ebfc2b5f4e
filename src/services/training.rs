//! Training job submission.
//!
//! Validates a training request locally, submits it once, and hands back
//! the job handle without waiting. Rejections carry the service's message
//! unchanged and are never retried.

use std::sync::{Arc, LazyLock};

use regex::Regex;
use sha2::{Digest, Sha256};
use tracing::info;

use crate::error::{JobError, ValidationError};
use crate::models::{JobStatus, LabelSet, TrainingJobHandle};
use crate::recognition::{RecognitionError, RecognitionService, TrainingJobRequest};
use crate::services::ledger::JobLedger;
use crate::storage::BlobUri;

/// Longest recognizer or version name the service accepts.
pub const MAX_NAME_LEN: usize = 63;

static NAME_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-zA-Z0-9](-*[a-zA-Z0-9])*$").unwrap());

/// Result of `submit_or_resume`.
#[derive(Debug, Clone, PartialEq)]
pub enum Submission {
    /// A new job was created.
    Submitted(TrainingJobHandle),
    /// A job for the same configuration already exists and was reused.
    Resumed(TrainingJobHandle),
}

impl Submission {
    pub fn handle(&self) -> &TrainingJobHandle {
        match self {
            Self::Submitted(handle) | Self::Resumed(handle) => handle,
        }
    }

    pub fn into_handle(self) -> TrainingJobHandle {
        match self {
            Self::Submitted(handle) | Self::Resumed(handle) => handle,
        }
    }

    pub fn is_resumed(&self) -> bool {
        matches!(self, Self::Resumed(_))
    }
}

/// Check a recognizer or version name against the service's naming rules.
pub fn validate_name(name: &str) -> Result<(), ValidationError> {
    let reason = if name.is_empty() {
        Some("name must not be empty")
    } else if name.len() > MAX_NAME_LEN {
        Some("name must be at most 63 characters")
    } else if !NAME_PATTERN.is_match(name) {
        Some("name may only contain letters, digits and inner hyphens")
    } else {
        None
    };

    match reason {
        Some(reason) => Err(ValidationError::InvalidName {
            name: name.to_string(),
            reason,
        }),
        None => Ok(()),
    }
}

fn validate_location(location: &str) -> Result<(), ValidationError> {
    match BlobUri::parse(location) {
        Ok(uri) if !uri.key().is_empty() => Ok(()),
        _ => Err(ValidationError::InvalidLocation(location.to_string())),
    }
}

/// Everything checked before a training request leaves the process.
pub fn validate_request(request: &TrainingJobRequest) -> Result<(), ValidationError> {
    validate_name(&request.recognizer_name)?;
    if let Some(ref version) = request.version_name {
        validate_name(version)?;
    }

    // Non-empty, and every label within the service's naming rules
    LabelSet::from_labels(request.labels.iter())?;

    validate_location(&request.documents.train)?;
    validate_location(&request.annotations.train)?;
    if let Some(ref test) = request.documents.test {
        validate_location(test)?;
    }
    if let Some(ref test) = request.annotations.test {
        validate_location(test)?;
    }

    if request.data_access_role.trim().is_empty() {
        return Err(ValidationError::InvalidInput(
            "a data access role is required to submit training".to_string(),
        ));
    }
    Ok(())
}

/// SHA-256 of the request's JSON form, hex encoded.
pub fn fingerprint(request: &TrainingJobRequest) -> Result<String, JobError> {
    let json = serde_json::to_vec(request).map_err(|e| JobError::Parse(e.to_string()))?;
    let mut hasher = Sha256::new();
    hasher.update(&json);
    Ok(hex::encode(hasher.finalize()))
}

/// Submits recognizer training jobs.
pub struct TrainingJobSubmitter {
    service: Arc<dyn RecognitionService>,
}

impl TrainingJobSubmitter {
    pub fn new(service: Arc<dyn RecognitionService>) -> Self {
        Self { service }
    }

    /// Validate and submit. Returns as soon as the service accepts the job.
    pub async fn submit(&self, request: &TrainingJobRequest) -> Result<TrainingJobHandle, JobError> {
        validate_request(request)?;

        let handle = self
            .service
            .submit_training_job(request)
            .await
            .map_err(JobError::from_submission)?;

        info!(
            "Submitted training job {} with {} entity types",
            handle.job_identifier,
            request.labels.len()
        );
        Ok(handle)
    }

    /// Submit unless the ledger already holds a live job for the same request.
    ///
    /// A recorded job that has failed, or that the service no longer knows,
    /// is replaced by a fresh submission.
    pub async fn submit_or_resume(
        &self,
        request: &TrainingJobRequest,
        ledger: &mut JobLedger,
    ) -> Result<Submission, JobError> {
        validate_request(request)?;
        let fingerprint = fingerprint(request)?;

        if let Some(existing) = ledger.get(&fingerprint).cloned() {
            match self.service.describe_training_job(&existing).await {
                Ok(report) if report.status != JobStatus::Failed => {
                    info!(
                        "Resuming training job {} ({})",
                        existing.job_identifier, report.remote_status
                    );
                    return Ok(Submission::Resumed(existing));
                }
                Ok(report) => {
                    info!(
                        "Previous job {} ended as {}; submitting again",
                        existing.job_identifier, report.remote_status
                    );
                }
                Err(RecognitionError::NotFound(_)) => {
                    info!(
                        "Previous job {} no longer exists; submitting again",
                        existing.job_identifier
                    );
                }
                Err(e) => return Err(e.into()),
            }
            // A rejected resubmission must not leave the dead job behind
            ledger.remove(&fingerprint)?;
        }

        let handle = self.submit(request).await?;
        ledger.record(&fingerprint, &handle)?;
        Ok(Submission::Submitted(handle))
    }

    /// Ask the service to stop a training job.
    pub async fn stop(&self, handle: &TrainingJobHandle) -> Result<(), JobError> {
        self.service.stop_training_job(handle).await?;
        info!("Stop requested for {}", handle.job_identifier);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{InputFormat, LanguageCode};
    use crate::recognition::{AnnotationLocations, DocumentLocations, ScriptedRecognitionService};

    fn request() -> TrainingJobRequest {
        TrainingJobRequest {
            recognizer_name: "movie-entities".to_string(),
            version_name: None,
            documents: DocumentLocations {
                train: "s3://bucket/movies/documents/train.txt".to_string(),
                test: None,
                format: InputFormat::OneDocumentPerLine,
            },
            annotations: AnnotationLocations {
                train: "s3://bucket/movies/annotations/train.csv".to_string(),
                test: None,
            },
            labels: LabelSet::from_labels(["Actor", "Year"]).unwrap(),
            language: LanguageCode::En,
            data_access_role: "arn:aws:iam::000000000000:role/ner-data".to_string(),
        }
    }

    #[test]
    fn test_name_rules() {
        assert!(validate_name("movies").is_ok());
        assert!(validate_name("movies--v2").is_ok());
        assert!(validate_name("-movies").is_err());
        assert!(validate_name("movies-").is_err());
        assert!(validate_name("movies_v2").is_err());
        assert!(validate_name("").is_err());
        assert!(validate_name(&"a".repeat(63)).is_ok());
        assert!(validate_name(&"a".repeat(64)).is_err());
    }

    #[test]
    fn test_validate_locations_and_role() {
        let mut bad = request();
        bad.documents.train = "/local/train.txt".to_string();
        assert!(matches!(
            validate_request(&bad),
            Err(ValidationError::InvalidLocation(_))
        ));

        let mut bad = request();
        bad.data_access_role = " ".to_string();
        assert!(matches!(
            validate_request(&bad),
            Err(ValidationError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_fingerprint_is_stable_and_sensitive() {
        let a = fingerprint(&request()).unwrap();
        assert_eq!(a, fingerprint(&request()).unwrap());
        assert_eq!(a.len(), 64);

        let mut other = request();
        other.labels = LabelSet::from_labels(["Year", "Actor"]).unwrap();
        assert_ne!(a, fingerprint(&other).unwrap());
    }

    #[tokio::test]
    async fn test_submit_passes_label_set_through() {
        let service = Arc::new(ScriptedRecognitionService::new());
        let submitter = TrainingJobSubmitter::new(service.clone());

        let handle = submitter.submit(&request()).await.unwrap();
        assert_eq!(handle.job_identifier, "movie-entities");
        let sent = service.training_requests();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].labels.as_slice(), &["Actor", "Year"]);
    }

    #[tokio::test]
    async fn test_rejection_is_not_retried() {
        let service = Arc::new(ScriptedRecognitionService::new().rejecting_submissions(
            "ResourceInUseException",
            "Entity recognizer movie-entities already exists",
        ));
        let submitter = TrainingJobSubmitter::new(service.clone());

        let err = submitter.submit(&request()).await.unwrap_err();
        match err {
            JobError::Submission { code, message } => {
                assert_eq!(code, "ResourceInUseException");
                assert_eq!(message, "Entity recognizer movie-entities already exists");
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(service.training_requests().is_empty());
    }

    #[tokio::test]
    async fn test_invalid_name_never_reaches_service() {
        let service = Arc::new(ScriptedRecognitionService::new());
        let submitter = TrainingJobSubmitter::new(service.clone());
        let mut bad = request();
        bad.recognizer_name = "movie entities".to_string();

        assert!(matches!(
            submitter.submit(&bad).await,
            Err(JobError::Validation(ValidationError::InvalidName { .. }))
        ));
        assert!(service.training_requests().is_empty());
    }

    #[tokio::test]
    async fn test_submit_or_resume() {
        let service =
            Arc::new(ScriptedRecognitionService::new().with_training_statuses(["TRAINING"]));
        let submitter = TrainingJobSubmitter::new(service.clone());
        let mut ledger = JobLedger::in_memory();

        let first = submitter
            .submit_or_resume(&request(), &mut ledger)
            .await
            .unwrap();
        assert!(!first.is_resumed());

        let second = submitter
            .submit_or_resume(&request(), &mut ledger)
            .await
            .unwrap();
        assert!(second.is_resumed());
        assert_eq!(second.handle(), first.handle());
        assert_eq!(service.training_requests().len(), 1);
    }

    #[tokio::test]
    async fn test_failed_job_is_resubmitted() {
        let service =
            Arc::new(ScriptedRecognitionService::new().with_training_statuses(["IN_ERROR"]));
        let submitter = TrainingJobSubmitter::new(service.clone());
        let mut ledger = JobLedger::in_memory();

        submitter
            .submit_or_resume(&request(), &mut ledger)
            .await
            .unwrap();
        let again = submitter
            .submit_or_resume(&request(), &mut ledger)
            .await
            .unwrap();
        assert!(!again.is_resumed());
        assert_eq!(service.training_requests().len(), 2);
    }

    #[tokio::test]
    async fn test_dead_job_is_forgotten_when_resubmission_is_rejected() {
        let service = Arc::new(
            ScriptedRecognitionService::new()
                .with_training_statuses(["IN_ERROR"])
                .rejecting_submissions("LimitExceededException", "too many recognizers"),
        );
        let submitter = TrainingJobSubmitter::new(service.clone());
        let mut ledger = JobLedger::in_memory();
        let key = fingerprint(&request()).unwrap();
        ledger
            .record(
                &key,
                &TrainingJobHandle::from_model_identifier("movie-entities"),
            )
            .unwrap();

        let err = submitter
            .submit_or_resume(&request(), &mut ledger)
            .await
            .unwrap_err();
        assert!(matches!(err, JobError::Submission { .. }));
        assert!(ledger.get(&key).is_none());
        assert_eq!(service.status_queries(), 1);
    }
}
