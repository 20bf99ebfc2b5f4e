//! Remote job handles, states, and status snapshots.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Languages the service can train custom recognizers for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LanguageCode {
    #[default]
    En,
    Es,
    Fr,
    It,
    De,
    Pt,
}

impl LanguageCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::En => "en",
            Self::Es => "es",
            Self::Fr => "fr",
            Self::It => "it",
            Self::De => "de",
            Self::Pt => "pt",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "en" => Some(Self::En),
            "es" => Some(Self::Es),
            "fr" => Some(Self::Fr),
            "it" => Some(Self::It),
            "de" => Some(Self::De),
            "pt" => Some(Self::Pt),
            _ => None,
        }
    }
}

/// Layout of an input document set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum InputFormat {
    /// Every line of every file is a separate document.
    #[default]
    #[serde(rename = "ONE_DOC_PER_LINE")]
    OneDocumentPerLine,
    /// Every file is a single document.
    #[serde(rename = "ONE_DOC_PER_FILE")]
    OneDocumentPerFile,
}

impl InputFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OneDocumentPerLine => "ONE_DOC_PER_LINE",
            Self::OneDocumentPerFile => "ONE_DOC_PER_FILE",
        }
    }
}

/// Lifecycle state of a recognizer training job.
///
/// Submitted -> InProgress -> {Trained | Failed}. Trained and Failed are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Submitted,
    InProgress,
    Trained,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Submitted => "submitted",
            Self::InProgress => "in_progress",
            Self::Trained => "trained",
            Self::Failed => "failed",
        }
    }

    /// Map the service's recognizer status string.
    ///
    /// Unknown states are treated as still running so the poller keeps going.
    pub fn from_remote(s: &str) -> Self {
        match s {
            "SUBMITTED" => Self::Submitted,
            "TRAINING" | "STOP_REQUESTED" => Self::InProgress,
            "TRAINED" | "TRAINED_WITH_WARNING" => Self::Trained,
            "IN_ERROR" | "STOPPED" | "DELETING" => Self::Failed,
            _ => Self::InProgress,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Trained | Self::Failed)
    }
}

/// Handle to a submitted training job. Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrainingJobHandle {
    /// Recognizer name (and version, when one was given).
    pub job_identifier: String,
    /// Identifier of the model being trained (recognizer ARN).
    pub model_identifier: String,
    pub submission_time: DateTime<Utc>,
}

impl TrainingJobHandle {
    /// Rebuild a handle for a model known only by its identifier.
    pub fn from_model_identifier(model_identifier: &str) -> Self {
        Self {
            job_identifier: resource_name(model_identifier).to_string(),
            model_identifier: model_identifier.to_string(),
            submission_time: Utc::now(),
        }
    }
}

/// Precision/recall/F1 as reported by the service. Missing values stay `None`.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct EvaluationMetrics {
    pub precision: Option<f64>,
    pub recall: Option<f64>,
    pub f1_score: Option<f64>,
}

/// Per-label evaluation results.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabelMetrics {
    pub label: String,
    pub metrics: EvaluationMetrics,
    pub train_mentions: Option<u64>,
}

/// Evaluation results attached to a trained (or failed) recognizer.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct RecognizerMetrics {
    pub trained_documents: Option<u64>,
    pub test_documents: Option<u64>,
    pub overall: EvaluationMetrics,
    #[serde(default)]
    pub per_label: Vec<LabelMetrics>,
}

/// Snapshot returned by one training status query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingStatusReport {
    pub status: JobStatus,
    /// Status string exactly as the service reported it.
    pub remote_status: String,
    /// Diagnostic message attached by the service, if any.
    pub message: Option<String>,
    pub submit_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub metrics: Option<RecognizerMetrics>,
}

/// Lifecycle state of a batch detection job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectionJobStatus {
    Submitted,
    InProgress,
    Completed,
    Failed,
}

impl DetectionJobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Submitted => "submitted",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn from_remote(s: &str) -> Self {
        match s {
            "SUBMITTED" => Self::Submitted,
            "IN_PROGRESS" | "STOP_REQUESTED" => Self::InProgress,
            "COMPLETED" => Self::Completed,
            "FAILED" | "STOPPED" => Self::Failed,
            _ => Self::InProgress,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

/// Handle to a batch detection job.
///
/// `output_location` is only known once the job has completed; use
/// `with_output_location` to derive the populated handle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DetectionJobHandle {
    pub job_identifier: String,
    pub job_arn: String,
    pub output_location: Option<String>,
}

impl DetectionJobHandle {
    /// Rebuild a handle from a job id or job ARN.
    pub fn from_job_identifier(identifier: &str) -> Self {
        let (job_identifier, job_arn) = if identifier.starts_with("arn:") {
            (resource_name(identifier).to_string(), identifier.to_string())
        } else {
            (identifier.to_string(), String::new())
        };
        Self {
            job_identifier,
            job_arn,
            output_location: None,
        }
    }

    pub fn with_output_location(&self, location: impl Into<String>) -> Self {
        Self {
            job_identifier: self.job_identifier.clone(),
            job_arn: self.job_arn.clone(),
            output_location: Some(location.into()),
        }
    }
}

/// Snapshot returned by one detection job status query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionStatusReport {
    pub status: DetectionJobStatus,
    pub remote_status: String,
    pub message: Option<String>,
    pub output_location: Option<String>,
    pub submit_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
}

/// Trailing resource name of a service identifier.
///
/// `arn:aws:comprehend:us-east-1:1234:entity-recognizer/movies/version/v2`
/// yields `movies/version/v2`; anything without a resource type prefix is
/// returned unchanged.
pub fn resource_name(identifier: &str) -> &str {
    let resource = identifier.rsplit(':').next().unwrap_or(identifier);
    match resource.split_once('/') {
        Some((_, name)) if identifier.starts_with("arn:") => name,
        _ => resource,
    }
}
