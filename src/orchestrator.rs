//! Job lifecycle orchestration.
//!
//! Wires staging, training submission, status polling, endpoint deployment
//! and batch detection together from one `Config`.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::info;

use crate::config::Config;
use crate::error::{JobError, ValidationError};
use crate::models::{
    DetectedEntity, DetectionJobHandle, DetectionReport, DetectionStatusReport, EndpointHandle,
    EndpointStatusReport, InputFormat, TrainingJobHandle, TrainingStatusReport,
};
use crate::recognition::{
    DetectionJobRequest, EndpointRequest, HttpRecognitionClient, RecognitionService,
    TrainingJobRequest,
};
use crate::services::detection::populate_output;
use crate::services::{
    results, sparse_labels, DetectionJobSubmitter, EndpointDeployer, JobLedger, PollEvent, PollOutcome,
    PollTask, StagedTrainingData, Stager, StatusPoller, Submission, TrainingData,
    TrainingJobSubmitter,
};
use crate::storage::{BlobStore, BlobUri, LocalBlobStore};

/// Drives a recognizer through its lifecycle.
pub struct Orchestrator {
    config: Config,
    service: Arc<dyn RecognitionService>,
    store: Arc<dyn BlobStore>,
    stager: Stager,
    trainer: TrainingJobSubmitter,
    detector: DetectionJobSubmitter,
    deployer: EndpointDeployer,
    events: Option<mpsc::Sender<PollEvent>>,
}

impl Orchestrator {
    pub fn new(
        config: Config,
        service: Arc<dyn RecognitionService>,
        store: Arc<dyn BlobStore>,
    ) -> Self {
        let stager = Stager::new(store.clone(), &config.storage.bucket, &config.storage.prefix);
        Self {
            trainer: TrainingJobSubmitter::new(service.clone()),
            detector: DetectionJobSubmitter::new(service.clone()),
            deployer: EndpointDeployer::new(service.clone()),
            stager,
            config,
            service,
            store,
            events: None,
        }
    }

    /// HTTP client and local object store, both taken from `config`.
    pub fn from_config(config: Config) -> Result<Self, JobError> {
        let service = HttpRecognitionClient::new(config.service.clone())?;
        let store = LocalBlobStore::new(config.storage_root());
        Ok(Self::new(config, Arc::new(service), Arc::new(store)))
    }

    /// Forward poll progress to `tx`.
    pub fn with_events(mut self, tx: mpsc::Sender<PollEvent>) -> Self {
        self.events = Some(tx);
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn BlobStore> {
        &self.store
    }

    /// A poller using the configured policy.
    pub fn poller(&self) -> StatusPoller {
        let poller = StatusPoller::new(self.service.clone(), self.config.poll.to_policy());
        match self.events {
            Some(ref tx) => poller.with_events(tx.clone()),
            None => poller,
        }
    }

    pub fn open_ledger(&self) -> Result<JobLedger, JobError> {
        JobLedger::open(&self.config.ledger_file())
    }

    fn data_access_role(&self) -> Result<String, ValidationError> {
        self.config
            .service
            .data_access_role
            .clone()
            .filter(|role| !role.trim().is_empty())
            .ok_or_else(|| {
                ValidationError::InvalidInput(
                    "service.data_access_role must be configured".to_string(),
                )
            })
    }

    /// Validate and upload training inputs.
    pub async fn stage(&self, data: &TrainingData) -> Result<StagedTrainingData, JobError> {
        let staged = self.stager.stage_training_data(data).await?;
        sparse_labels(&staged.label_counts, self.config.min_mentions_per_label());
        Ok(staged)
    }

    /// Build the training request for staged data.
    pub fn training_request(
        &self,
        recognizer_name: &str,
        version_name: Option<&str>,
        staged: &StagedTrainingData,
    ) -> Result<TrainingJobRequest, JobError> {
        Ok(TrainingJobRequest {
            recognizer_name: recognizer_name.to_string(),
            version_name: version_name.map(str::to_string),
            documents: staged.documents.clone(),
            annotations: staged.annotations.clone(),
            labels: staged.labels.clone(),
            language: self.config.service.language,
            data_access_role: self.data_access_role()?,
        })
    }

    /// Stage, then submit or resume a training job.
    pub async fn train(
        &self,
        recognizer_name: &str,
        version_name: Option<&str>,
        data: &TrainingData,
        ledger: &mut JobLedger,
    ) -> Result<Submission, JobError> {
        // Fail on configuration before uploading anything
        self.data_access_role()?;
        let staged = self.stage(data).await?;
        let request = self.training_request(recognizer_name, version_name, &staged)?;
        self.trainer.submit_or_resume(&request, ledger).await
    }

    pub async fn submit_training(
        &self,
        request: &TrainingJobRequest,
    ) -> Result<TrainingJobHandle, JobError> {
        self.trainer.submit(request).await
    }

    /// One status query.
    pub async fn training_status(
        &self,
        handle: &TrainingJobHandle,
    ) -> Result<TrainingStatusReport, JobError> {
        Ok(self.service.describe_training_job(handle).await?)
    }

    pub async fn wait_for_training(
        &self,
        handle: &TrainingJobHandle,
    ) -> Result<PollOutcome<TrainingStatusReport>, JobError> {
        self.poller().poll_training(handle).await
    }

    /// Poll a training job in the background.
    pub fn spawn_training_poll(&self, handle: TrainingJobHandle) -> PollTask<TrainingStatusReport> {
        self.poller().spawn_training(handle)
    }

    pub async fn stop_training(&self, handle: &TrainingJobHandle) -> Result<(), JobError> {
        self.trainer.stop(handle).await
    }

    pub async fn deploy(
        &self,
        model_identifier: &str,
        endpoint_name: &str,
        inference_units: u32,
    ) -> Result<EndpointHandle, JobError> {
        let request = EndpointRequest {
            endpoint_name: endpoint_name.to_string(),
            model_identifier: model_identifier.to_string(),
            inference_units,
            data_access_role: self.config.service.data_access_role.clone(),
        };
        self.deployer.deploy(&request).await
    }

    pub async fn wait_for_endpoint(
        &self,
        handle: &EndpointHandle,
    ) -> Result<PollOutcome<EndpointStatusReport>, JobError> {
        self.deployer.wait(handle, &self.poller()).await
    }

    pub async fn detect(
        &self,
        endpoint_arn: &str,
        text: &str,
    ) -> Result<Vec<DetectedEntity>, JobError> {
        self.deployer.detect(endpoint_arn, text).await
    }

    /// Build a batch detection request. Without an explicit output prefix
    /// output goes under the configured bucket and prefix.
    pub fn detection_request(
        &self,
        model_identifier: &str,
        input_location: &str,
        output_location_prefix: Option<&str>,
        input_format: InputFormat,
        job_name: Option<&str>,
    ) -> Result<DetectionJobRequest, JobError> {
        let output_location_prefix = match output_location_prefix {
            Some(prefix) => prefix.to_string(),
            None => self
                .stager
                .output_prefix(job_name.unwrap_or("batch"))?
                .to_string(),
        };
        Ok(DetectionJobRequest {
            job_name: job_name.map(str::to_string),
            model_identifier: model_identifier.to_string(),
            input_location: input_location.to_string(),
            output_location_prefix,
            input_format,
            language: self.config.service.language,
            data_access_role: self.data_access_role()?,
        })
    }

    pub async fn submit_detection(
        &self,
        request: &DetectionJobRequest,
    ) -> Result<DetectionJobHandle, JobError> {
        self.detector.submit(request).await
    }

    /// One status query; the handle gains its output location on completion.
    pub async fn refresh_detection(
        &self,
        handle: &DetectionJobHandle,
    ) -> Result<(DetectionJobHandle, DetectionStatusReport), JobError> {
        self.detector.refresh(handle).await
    }

    /// Poll a detection job to a terminal state.
    pub async fn wait_for_detection(
        &self,
        handle: &DetectionJobHandle,
    ) -> Result<(DetectionJobHandle, PollOutcome<DetectionStatusReport>), JobError> {
        let outcome = self.poller().poll_detection(handle).await?;
        let populated = populate_output(handle, outcome.report());
        if let Some(ref location) = populated.output_location {
            info!("Detection output at {}", location);
        }
        Ok((populated, outcome))
    }

    pub async fn stop_detection(&self, handle: &DetectionJobHandle) -> Result<(), JobError> {
        self.detector.stop(handle).await
    }

    /// Parse the output of a completed detection job.
    pub async fn read_results(
        &self,
        handle: &DetectionJobHandle,
    ) -> Result<DetectionReport, JobError> {
        results::read_job_output(self.store.as_ref(), handle).await
    }

    /// Parse output stored at `uri`.
    pub async fn read_results_at(&self, uri: &str) -> Result<DetectionReport, JobError> {
        let uri = BlobUri::parse(uri)?;
        results::read_from_store(self.store.as_ref(), &uri).await
    }
}
