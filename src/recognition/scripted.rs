//! In-process recognition service that replays scripted job states.
//!
//! Each `describe_*` call consumes the next status from the matching script;
//! once a script is down to its last entry that entry repeats. Real-time
//! detection looks up phrases from a small gazetteer.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::Utc;
use tracing::debug;

use super::{
    DetectionJobRequest, EndpointRequest, RecognitionError, RecognitionService,
    TrainingJobRequest,
};
use crate::models::{
    DetectedEntity, DetectionJobHandle, DetectionJobStatus, DetectionStatusReport,
    EndpointHandle, EndpointStatus, EndpointStatusReport, JobStatus, RecognizerMetrics,
    TrainingJobHandle, TrainingStatusReport,
};

const ACCOUNT: &str = "000000000000";
const REGION: &str = "us-east-1";

/// Confidence reported for every gazetteer hit.
const GAZETTEER_SCORE: f64 = 0.99;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Pop the next scripted status, repeating the final one.
fn next_status(script: &Mutex<VecDeque<String>>, fallback: &str) -> String {
    let mut script = lock(script);
    if script.len() > 1 {
        script.pop_front().unwrap_or_else(|| fallback.to_string())
    } else {
        script
            .front()
            .cloned()
            .unwrap_or_else(|| fallback.to_string())
    }
}

/// Scripted stand-in for the managed recognition service.
pub struct ScriptedRecognitionService {
    training_script: Mutex<VecDeque<String>>,
    detection_script: Mutex<VecDeque<String>>,
    endpoint_script: Mutex<VecDeque<String>>,
    metrics: Option<RecognizerMetrics>,
    failure_message: Option<String>,
    gazetteer: Vec<(String, String)>,
    rejection: Option<(String, String)>,
    output_location: Option<String>,
    training_requests: Mutex<Vec<TrainingJobRequest>>,
    detection_requests: Mutex<Vec<DetectionJobRequest>>,
    endpoint_requests: Mutex<Vec<EndpointRequest>>,
    status_queries: AtomicU32,
    stop_calls: AtomicU32,
    job_counter: AtomicU32,
}

impl Default for ScriptedRecognitionService {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedRecognitionService {
    /// A service where every job succeeds on its first status query.
    pub fn new() -> Self {
        Self {
            training_script: Mutex::new(VecDeque::new()),
            detection_script: Mutex::new(VecDeque::new()),
            endpoint_script: Mutex::new(VecDeque::new()),
            metrics: None,
            failure_message: None,
            gazetteer: Vec::new(),
            rejection: None,
            output_location: None,
            training_requests: Mutex::new(Vec::new()),
            detection_requests: Mutex::new(Vec::new()),
            endpoint_requests: Mutex::new(Vec::new()),
            status_queries: AtomicU32::new(0),
            stop_calls: AtomicU32::new(0),
            job_counter: AtomicU32::new(0),
        }
    }

    /// Remote recognizer states, e.g. `["SUBMITTED", "TRAINING", "TRAINED"]`.
    pub fn with_training_statuses<I, S>(self, statuses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        *lock(&self.training_script) = statuses.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_detection_statuses<I, S>(self, statuses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        *lock(&self.detection_script) = statuses.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_endpoint_statuses<I, S>(self, statuses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        *lock(&self.endpoint_script) = statuses.into_iter().map(Into::into).collect();
        self
    }

    /// Metrics attached to terminal training reports.
    pub fn with_metrics(mut self, metrics: RecognizerMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Message attached to failed training, detection and endpoint reports.
    pub fn with_failure_message(mut self, message: &str) -> Self {
        self.failure_message = Some(message.to_string());
        self
    }

    /// Recognise `phrase` as `label` in real-time detection.
    pub fn with_entity(mut self, phrase: &str, label: &str) -> Self {
        self.gazetteer.push((phrase.to_string(), label.to_string()));
        self
    }

    /// Output location reported for completed detection jobs.
    pub fn with_output_location(mut self, location: &str) -> Self {
        self.output_location = Some(location.to_string());
        self
    }

    /// Reject every submission with the given error type and message.
    pub fn rejecting_submissions(mut self, kind: &str, message: &str) -> Self {
        self.rejection = Some((kind.to_string(), message.to_string()));
        self
    }

    /// Number of `describe_*` calls served.
    pub fn status_queries(&self) -> u32 {
        self.status_queries.load(Ordering::SeqCst)
    }

    /// Number of stop requests received.
    pub fn stop_calls(&self) -> u32 {
        self.stop_calls.load(Ordering::SeqCst)
    }

    pub fn training_requests(&self) -> Vec<TrainingJobRequest> {
        lock(&self.training_requests).clone()
    }

    pub fn detection_requests(&self) -> Vec<DetectionJobRequest> {
        lock(&self.detection_requests).clone()
    }

    pub fn endpoint_requests(&self) -> Vec<EndpointRequest> {
        lock(&self.endpoint_requests).clone()
    }

    fn check_rejection(&self) -> Result<(), RecognitionError> {
        match self.rejection {
            Some((ref kind, ref message)) => Err(RecognitionError::Rejected {
                kind: kind.clone(),
                message: message.clone(),
            }),
            None => Ok(()),
        }
    }

    fn arn(&self, resource: &str) -> String {
        format!("arn:aws:comprehend:{}:{}:{}", REGION, ACCOUNT, resource)
    }

    fn failure_message_for(&self, failed: bool) -> Option<String> {
        if failed {
            self.failure_message.clone()
        } else {
            None
        }
    }
}

#[async_trait]
impl RecognitionService for ScriptedRecognitionService {
    async fn submit_training_job(
        &self,
        request: &TrainingJobRequest,
    ) -> Result<TrainingJobHandle, RecognitionError> {
        self.check_rejection()?;
        lock(&self.training_requests).push(request.clone());

        let name = match request.version_name {
            Some(ref version) => format!("{}/version/{}", request.recognizer_name, version),
            None => request.recognizer_name.clone(),
        };
        debug!("Scripted training job accepted: {}", name);

        Ok(TrainingJobHandle {
            model_identifier: self.arn(&format!("entity-recognizer/{}", name)),
            job_identifier: name,
            submission_time: Utc::now(),
        })
    }

    async fn describe_training_job(
        &self,
        _handle: &TrainingJobHandle,
    ) -> Result<TrainingStatusReport, RecognitionError> {
        self.status_queries.fetch_add(1, Ordering::SeqCst);
        let remote_status = next_status(&self.training_script, "TRAINED");
        let status = JobStatus::from_remote(&remote_status);

        Ok(TrainingStatusReport {
            status,
            message: self.failure_message_for(status == JobStatus::Failed),
            submit_time: None,
            end_time: status.is_terminal().then(Utc::now),
            metrics: if status.is_terminal() {
                self.metrics.clone()
            } else {
                None
            },
            remote_status,
        })
    }

    async fn stop_training_job(&self, _handle: &TrainingJobHandle) -> Result<(), RecognitionError> {
        self.stop_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn submit_detection_job(
        &self,
        request: &DetectionJobRequest,
    ) -> Result<DetectionJobHandle, RecognitionError> {
        self.check_rejection()?;
        lock(&self.detection_requests).push(request.clone());

        let n = self.job_counter.fetch_add(1, Ordering::SeqCst) + 1;
        let job_id = format!("job-{:04}", n);
        Ok(DetectionJobHandle {
            job_arn: self.arn(&format!("entities-detection-job/{}", job_id)),
            job_identifier: job_id,
            output_location: None,
        })
    }

    async fn describe_detection_job(
        &self,
        handle: &DetectionJobHandle,
    ) -> Result<DetectionStatusReport, RecognitionError> {
        self.status_queries.fetch_add(1, Ordering::SeqCst);
        let remote_status = next_status(&self.detection_script, "COMPLETED");
        let status = DetectionJobStatus::from_remote(&remote_status);

        let output_location = match status {
            DetectionJobStatus::Completed => Some(match self.output_location {
                Some(ref location) => location.clone(),
                None => {
                    let prefix = lock(&self.detection_requests)
                        .last()
                        .map(|r| r.output_location_prefix.clone())
                        .unwrap_or_default();
                    format!(
                        "{}/{}-NER-{}/output/output.tar.gz",
                        prefix.trim_end_matches('/'),
                        ACCOUNT,
                        handle.job_identifier
                    )
                }
            }),
            _ => None,
        };

        Ok(DetectionStatusReport {
            status,
            message: self.failure_message_for(status == DetectionJobStatus::Failed),
            output_location,
            submit_time: None,
            end_time: status.is_terminal().then(Utc::now),
            remote_status,
        })
    }

    async fn stop_detection_job(
        &self,
        _handle: &DetectionJobHandle,
    ) -> Result<(), RecognitionError> {
        self.stop_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn create_endpoint(
        &self,
        request: &EndpointRequest,
    ) -> Result<EndpointHandle, RecognitionError> {
        self.check_rejection()?;
        lock(&self.endpoint_requests).push(request.clone());

        Ok(EndpointHandle {
            endpoint_arn: self.arn(&format!(
                "entity-recognizer-endpoint/{}",
                request.endpoint_name
            )),
            model_identifier: request.model_identifier.clone(),
            inference_units: request.inference_units,
        })
    }

    async fn describe_endpoint(
        &self,
        handle: &EndpointHandle,
    ) -> Result<EndpointStatusReport, RecognitionError> {
        self.status_queries.fetch_add(1, Ordering::SeqCst);
        let remote_status = next_status(&self.endpoint_script, "IN_SERVICE");
        let status = EndpointStatus::from_remote(&remote_status);

        Ok(EndpointStatusReport {
            status,
            message: self.failure_message_for(status == EndpointStatus::Failed),
            current_inference_units: (status == EndpointStatus::InService)
                .then_some(handle.inference_units),
            last_modified: Some(Utc::now()),
            remote_status,
        })
    }

    async fn detect_entities(
        &self,
        text: &str,
        _endpoint_arn: &str,
    ) -> Result<Vec<DetectedEntity>, RecognitionError> {
        let mut entities = Vec::new();
        for (phrase, label) in &self.gazetteer {
            for (byte_offset, matched) in text.match_indices(phrase.as_str()) {
                // Offsets are reported in characters, not bytes
                let begin = text[..byte_offset].chars().count() as u64;
                let end = begin + matched.chars().count() as u64;
                entities.push(DetectedEntity {
                    text: matched.to_string(),
                    label_type: label.clone(),
                    confidence_score: GAZETTEER_SCORE,
                    begin_offset: begin,
                    end_offset: end,
                });
            }
        }
        entities.sort_by_key(|e| e.begin_offset);
        Ok(entities)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handle() -> TrainingJobHandle {
        TrainingJobHandle::from_model_identifier(
            "arn:aws:comprehend:us-east-1:000000000000:entity-recognizer/movies",
        )
    }

    #[tokio::test]
    async fn test_script_repeats_last_status() {
        let service =
            ScriptedRecognitionService::new().with_training_statuses(["SUBMITTED", "TRAINING"]);
        let h = handle();
        let mut seen = Vec::new();
        for _ in 0..4 {
            seen.push(service.describe_training_job(&h).await.unwrap().remote_status);
        }
        assert_eq!(seen, ["SUBMITTED", "TRAINING", "TRAINING", "TRAINING"]);
        assert_eq!(service.status_queries(), 4);
    }

    #[tokio::test]
    async fn test_metrics_only_on_terminal_report() {
        let service = ScriptedRecognitionService::new()
            .with_training_statuses(["TRAINING", "TRAINED"])
            .with_metrics(RecognizerMetrics {
                trained_documents: Some(10),
                ..Default::default()
            });
        let h = handle();
        assert!(service.describe_training_job(&h).await.unwrap().metrics.is_none());
        let done = service.describe_training_job(&h).await.unwrap();
        assert_eq!(done.status, JobStatus::Trained);
        assert_eq!(done.metrics.unwrap().trained_documents, Some(10));
    }

    #[tokio::test]
    async fn test_gazetteer_offsets_are_characters() {
        let service = ScriptedRecognitionService::new().with_entity("travolta", "Actor");
        let entities = service
            .detect_entities("café travolta", "arn:endpoint")
            .await
            .unwrap();
        assert_eq!(entities.len(), 1);
        assert_eq!(entities[0].begin_offset, 5);
        assert_eq!(entities[0].end_offset, 13);
    }

    #[tokio::test]
    async fn test_rejection() {
        let service = ScriptedRecognitionService::new()
            .rejecting_submissions("LimitExceededException", "too many recognizers");
        let request = EndpointRequest {
            endpoint_name: "movies".to_string(),
            model_identifier: "arn:model".to_string(),
            inference_units: 1,
            data_access_role: None,
        };
        let err = service.create_endpoint(&request).await.unwrap_err();
        assert_eq!(err.to_string(), "LimitExceededException: too many recognizers");
        assert!(service.endpoint_requests().is_empty());
    }
}
