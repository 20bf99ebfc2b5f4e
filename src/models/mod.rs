//! Data models for recognizer training and detection jobs.

mod annotation;
mod endpoint;
mod entity;
mod job;

pub use annotation::{AnnotationRecord, LabelSet, MAX_LABEL_LEN};
pub use endpoint::{EndpointHandle, EndpointStatus, EndpointStatusReport};
pub use entity::{DetectedEntity, DetectionReport, DocumentEntities};
pub use job::{
    resource_name, DetectionJobHandle, DetectionJobStatus, DetectionStatusReport,
    EvaluationMetrics, InputFormat, JobStatus, LabelMetrics, LanguageCode, RecognizerMetrics,
    TrainingJobHandle, TrainingStatusReport,
};
