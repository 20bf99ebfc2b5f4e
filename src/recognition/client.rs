//! HTTP client for the managed recognition service.
//!
//! Speaks the service's JSON 1.1 protocol: every call is a `POST` to the
//! endpoint root with the action named in `X-Amz-Target`. Request signing is
//! left to a gateway in front of the endpoint; when a token is configured it
//! is sent as a bearer credential.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::config::ServiceConfig;
use super::{
    DetectionJobRequest, EndpointRequest, RecognitionError, RecognitionService,
    TrainingJobRequest,
};
use crate::models::{
    resource_name, DetectedEntity, DetectionJobHandle, DetectionJobStatus,
    DetectionStatusReport, EndpointHandle, EndpointStatus, EndpointStatusReport,
    EvaluationMetrics, JobStatus, LabelMetrics, RecognizerMetrics, TrainingJobHandle,
    TrainingStatusReport,
};

const TARGET_PREFIX: &str = "Comprehend_20171127";
const CONTENT_TYPE: &str = "application/x-amz-json-1.1";

/// Annotation tables are uploaded in the service's CSV layout.
const ANNOTATION_DATA_FORMAT: &str = "COMPREHEND_CSV";

/// Recognition service client.
pub struct HttpRecognitionClient {
    config: ServiceConfig,
    endpoint: String,
    client: Client,
}

impl HttpRecognitionClient {
    /// Create a new client with the given configuration.
    pub fn new(config: ServiceConfig) -> Result<Self, RecognitionError> {
        let endpoint = config.resolved_endpoint();
        url::Url::parse(&endpoint)
            .map_err(|e| RecognitionError::Connection(format!("bad endpoint {}: {}", endpoint, e)))?;

        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| RecognitionError::Connection(e.to_string()))?;

        Ok(Self {
            config,
            endpoint,
            client,
        })
    }

    /// Get the config.
    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    /// Invoke one service action.
    async fn call<Req, Resp>(&self, action: &str, body: &Req) -> Result<Resp, RecognitionError>
    where
        Req: Serialize + ?Sized,
        Resp: DeserializeOwned,
    {
        let payload =
            serde_json::to_vec(body).map_err(|e| RecognitionError::Parse(e.to_string()))?;

        let mut request = self
            .client
            .post(&self.endpoint)
            .header("Content-Type", CONTENT_TYPE)
            .header("X-Amz-Target", format!("{}.{}", TARGET_PREFIX, action))
            .body(payload);
        if let Some(ref token) = self.config.api_token {
            request = request.bearer_auth(token);
        }

        debug!("Calling {} on {}", action, self.endpoint);
        let resp = request
            .send()
            .await
            .map_err(|e| RecognitionError::Connection(e.to_string()))?;

        let status = resp.status();
        let text = resp
            .text()
            .await
            .map_err(|e| RecognitionError::Connection(e.to_string()))?;

        if !status.is_success() {
            return Err(error_from_response(status.as_u16(), &text));
        }

        let text = if text.trim().is_empty() { "{}" } else { &text };
        serde_json::from_str(text)
            .map_err(|e| RecognitionError::Parse(format!("{} response: {}", action, e)))
    }
}

/// Service error body: `{"__type": "...", "message": "..."}`.
#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(rename = "__type")]
    kind: Option<String>,
    #[serde(alias = "Message")]
    message: Option<String>,
}

/// Turn a non-success response into an error, keeping the service's message.
fn error_from_response(status: u16, body: &str) -> RecognitionError {
    let parsed = serde_json::from_str::<ErrorBody>(body).ok();
    match parsed {
        Some(ErrorBody {
            kind: Some(kind),
            message,
        }) => {
            // Some responses qualify the type: "com.amazonaws.comprehend#ResourceNotFoundException"
            let kind = kind.rsplit('#').next().unwrap_or(&kind).to_string();
            let message = message.unwrap_or_default();
            if kind == "ResourceNotFoundException" {
                RecognitionError::NotFound(message)
            } else {
                RecognitionError::Rejected { kind, message }
            }
        }
        _ if status == 404 => RecognitionError::NotFound(body.to_string()),
        _ => RecognitionError::Api {
            status,
            body: body.to_string(),
        },
    }
}

fn epoch_to_datetime(secs: Option<f64>) -> Option<DateTime<Utc>> {
    secs.and_then(|s| DateTime::from_timestamp_millis((s * 1000.0) as i64))
}

fn client_request_token() -> String {
    uuid::Uuid::new_v4().to_string()
}

// Request and response shapes.

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct CreateRecognizerRequest<'a> {
    recognizer_name: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    version_name: Option<&'a str>,
    data_access_role_arn: &'a str,
    language_code: &'static str,
    client_request_token: String,
    input_data_config: RecognizerInputDataConfig<'a>,
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct RecognizerInputDataConfig<'a> {
    data_format: &'static str,
    entity_types: Vec<EntityTypeItem<'a>>,
    documents: RecognizerDocuments<'a>,
    annotations: RecognizerAnnotations<'a>,
}

#[derive(Serialize)]
struct EntityTypeItem<'a> {
    #[serde(rename = "Type")]
    label: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct RecognizerDocuments<'a> {
    s3_uri: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    test_s3_uri: Option<&'a str>,
    input_format: &'static str,
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct RecognizerAnnotations<'a> {
    s3_uri: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    test_s3_uri: Option<&'a str>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct CreateRecognizerResponse {
    entity_recognizer_arn: String,
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct RecognizerArnRequest<'a> {
    entity_recognizer_arn: &'a str,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct DescribeRecognizerResponse {
    entity_recognizer_properties: RecognizerProperties,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct RecognizerProperties {
    status: String,
    message: Option<String>,
    submit_time: Option<f64>,
    end_time: Option<f64>,
    recognizer_metadata: Option<RecognizerMetadata>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct RecognizerMetadata {
    number_of_trained_documents: Option<u64>,
    number_of_test_documents: Option<u64>,
    evaluation_metrics: Option<MetricsWire>,
    #[serde(default)]
    entity_types: Vec<EntityTypeMetadata>,
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "PascalCase")]
struct MetricsWire {
    precision: Option<f64>,
    recall: Option<f64>,
    f1_score: Option<f64>,
}

impl From<MetricsWire> for EvaluationMetrics {
    fn from(m: MetricsWire) -> Self {
        Self {
            precision: m.precision,
            recall: m.recall,
            f1_score: m.f1_score,
        }
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct EntityTypeMetadata {
    #[serde(rename = "Type")]
    label: String,
    evaluation_metrics: Option<MetricsWire>,
    number_of_train_mentions: Option<u64>,
}

impl From<RecognizerMetadata> for RecognizerMetrics {
    fn from(m: RecognizerMetadata) -> Self {
        Self {
            trained_documents: m.number_of_trained_documents,
            test_documents: m.number_of_test_documents,
            overall: m.evaluation_metrics.unwrap_or_default().into(),
            per_label: m
                .entity_types
                .into_iter()
                .map(|t| LabelMetrics {
                    label: t.label,
                    metrics: t.evaluation_metrics.unwrap_or_default().into(),
                    train_mentions: t.number_of_train_mentions,
                })
                .collect(),
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct StartDetectionJobRequest<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    job_name: Option<&'a str>,
    entity_recognizer_arn: &'a str,
    input_data_config: DetectionInputConfig<'a>,
    output_data_config: DetectionOutputConfig<'a>,
    data_access_role_arn: &'a str,
    language_code: &'static str,
    client_request_token: String,
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct DetectionInputConfig<'a> {
    s3_uri: &'a str,
    input_format: &'static str,
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct DetectionOutputConfig<'a> {
    s3_uri: &'a str,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct StartDetectionJobResponse {
    job_id: String,
    job_arn: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct JobIdRequest<'a> {
    job_id: &'a str,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct DescribeDetectionJobResponse {
    entities_detection_job_properties: DetectionJobProperties,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct DetectionJobProperties {
    job_status: String,
    message: Option<String>,
    submit_time: Option<f64>,
    end_time: Option<f64>,
    output_data_config: Option<OutputDataConfig>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct OutputDataConfig {
    s3_uri: String,
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct CreateEndpointRequest<'a> {
    endpoint_name: &'a str,
    model_arn: &'a str,
    desired_inference_units: u32,
    client_request_token: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    data_access_role_arn: Option<&'a str>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct CreateEndpointResponse {
    endpoint_arn: String,
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct EndpointArnRequest<'a> {
    endpoint_arn: &'a str,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct DescribeEndpointResponse {
    endpoint_properties: EndpointProperties,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct EndpointProperties {
    status: String,
    message: Option<String>,
    current_inference_units: Option<u32>,
    last_modified_time: Option<f64>,
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct DetectEntitiesRequest<'a> {
    text: &'a str,
    endpoint_arn: &'a str,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct DetectEntitiesResponse {
    #[serde(default)]
    entities: Vec<DetectedEntity>,
}

#[derive(Deserialize)]
struct EmptyResponse {}

#[async_trait]
impl RecognitionService for HttpRecognitionClient {
    async fn submit_training_job(
        &self,
        request: &TrainingJobRequest,
    ) -> Result<TrainingJobHandle, RecognitionError> {
        let body = CreateRecognizerRequest {
            recognizer_name: &request.recognizer_name,
            version_name: request.version_name.as_deref(),
            data_access_role_arn: &request.data_access_role,
            language_code: request.language.as_str(),
            client_request_token: client_request_token(),
            input_data_config: RecognizerInputDataConfig {
                data_format: ANNOTATION_DATA_FORMAT,
                entity_types: request
                    .labels
                    .iter()
                    .map(|label| EntityTypeItem { label })
                    .collect(),
                documents: RecognizerDocuments {
                    s3_uri: &request.documents.train,
                    test_s3_uri: request.documents.test.as_deref(),
                    input_format: request.documents.format.as_str(),
                },
                annotations: RecognizerAnnotations {
                    s3_uri: &request.annotations.train,
                    test_s3_uri: request.annotations.test.as_deref(),
                },
            },
        };

        let resp: CreateRecognizerResponse = self.call("CreateEntityRecognizer", &body).await?;
        info!("Submitted recognizer {}", resp.entity_recognizer_arn);

        Ok(TrainingJobHandle {
            job_identifier: resource_name(&resp.entity_recognizer_arn).to_string(),
            model_identifier: resp.entity_recognizer_arn,
            submission_time: Utc::now(),
        })
    }

    async fn describe_training_job(
        &self,
        handle: &TrainingJobHandle,
    ) -> Result<TrainingStatusReport, RecognitionError> {
        let body = RecognizerArnRequest {
            entity_recognizer_arn: &handle.model_identifier,
        };
        let resp: DescribeRecognizerResponse =
            self.call("DescribeEntityRecognizer", &body).await?;
        let props = resp.entity_recognizer_properties;

        Ok(TrainingStatusReport {
            status: JobStatus::from_remote(&props.status),
            remote_status: props.status,
            message: props.message,
            submit_time: epoch_to_datetime(props.submit_time),
            end_time: epoch_to_datetime(props.end_time),
            metrics: props.recognizer_metadata.map(RecognizerMetrics::from),
        })
    }

    async fn stop_training_job(&self, handle: &TrainingJobHandle) -> Result<(), RecognitionError> {
        let body = RecognizerArnRequest {
            entity_recognizer_arn: &handle.model_identifier,
        };
        let _: EmptyResponse = self.call("StopTrainingEntityRecognizer", &body).await?;
        info!("Requested stop of {}", handle.model_identifier);
        Ok(())
    }

    async fn submit_detection_job(
        &self,
        request: &DetectionJobRequest,
    ) -> Result<DetectionJobHandle, RecognitionError> {
        let body = StartDetectionJobRequest {
            job_name: request.job_name.as_deref(),
            entity_recognizer_arn: &request.model_identifier,
            input_data_config: DetectionInputConfig {
                s3_uri: &request.input_location,
                input_format: request.input_format.as_str(),
            },
            output_data_config: DetectionOutputConfig {
                s3_uri: &request.output_location_prefix,
            },
            data_access_role_arn: &request.data_access_role,
            language_code: request.language.as_str(),
            client_request_token: client_request_token(),
        };

        let resp: StartDetectionJobResponse =
            self.call("StartEntitiesDetectionJob", &body).await?;
        info!("Submitted detection job {}", resp.job_id);

        Ok(DetectionJobHandle {
            job_arn: resp.job_arn.unwrap_or_else(|| resp.job_id.clone()),
            job_identifier: resp.job_id,
            output_location: None,
        })
    }

    async fn describe_detection_job(
        &self,
        handle: &DetectionJobHandle,
    ) -> Result<DetectionStatusReport, RecognitionError> {
        let body = JobIdRequest {
            job_id: &handle.job_identifier,
        };
        let resp: DescribeDetectionJobResponse =
            self.call("DescribeEntitiesDetectionJob", &body).await?;
        let props = resp.entities_detection_job_properties;
        let status = DetectionJobStatus::from_remote(&props.job_status);

        // Output only exists once the job has completed
        let output_location = match status {
            DetectionJobStatus::Completed => props.output_data_config.map(|c| c.s3_uri),
            _ => None,
        };

        Ok(DetectionStatusReport {
            status,
            remote_status: props.job_status,
            message: props.message,
            output_location,
            submit_time: epoch_to_datetime(props.submit_time),
            end_time: epoch_to_datetime(props.end_time),
        })
    }

    async fn stop_detection_job(
        &self,
        handle: &DetectionJobHandle,
    ) -> Result<(), RecognitionError> {
        let body = JobIdRequest {
            job_id: &handle.job_identifier,
        };
        let _: EmptyResponse = self.call("StopEntitiesDetectionJob", &body).await?;
        Ok(())
    }

    async fn create_endpoint(
        &self,
        request: &EndpointRequest,
    ) -> Result<EndpointHandle, RecognitionError> {
        let body = CreateEndpointRequest {
            endpoint_name: &request.endpoint_name,
            model_arn: &request.model_identifier,
            desired_inference_units: request.inference_units,
            client_request_token: client_request_token(),
            data_access_role_arn: request.data_access_role.as_deref(),
        };
        let resp: CreateEndpointResponse = self.call("CreateEndpoint", &body).await?;
        info!("Creating endpoint {}", resp.endpoint_arn);

        Ok(EndpointHandle {
            endpoint_arn: resp.endpoint_arn,
            model_identifier: request.model_identifier.clone(),
            inference_units: request.inference_units,
        })
    }

    async fn describe_endpoint(
        &self,
        handle: &EndpointHandle,
    ) -> Result<EndpointStatusReport, RecognitionError> {
        let body = EndpointArnRequest {
            endpoint_arn: &handle.endpoint_arn,
        };
        let resp: DescribeEndpointResponse = self.call("DescribeEndpoint", &body).await?;
        let props = resp.endpoint_properties;

        Ok(EndpointStatusReport {
            status: EndpointStatus::from_remote(&props.status),
            remote_status: props.status,
            message: props.message,
            current_inference_units: props.current_inference_units,
            last_modified: epoch_to_datetime(props.last_modified_time),
        })
    }

    async fn detect_entities(
        &self,
        text: &str,
        endpoint_arn: &str,
    ) -> Result<Vec<DetectedEntity>, RecognitionError> {
        let body = DetectEntitiesRequest { text, endpoint_arn };
        let resp: DetectEntitiesResponse = self.call("DetectEntities", &body).await?;
        Ok(resp.entities)
    }
}
