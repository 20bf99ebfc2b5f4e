//! HTTP client tests against a local stand-in for the recognition API.

use std::sync::{Arc, Mutex};

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::routing::post;
use axum::Router;
use serde_json::{json, Value};

use nerctl::models::{
    InputFormat, JobStatus, LabelSet, LanguageCode, TrainingJobHandle,
};
use nerctl::recognition::{
    AnnotationLocations, DocumentLocations, HttpRecognitionClient, RecognitionError,
    RecognitionService, ServiceConfig, TrainingJobRequest,
};

type Responder = Arc<dyn Fn(&str, &Value) -> (StatusCode, String) + Send + Sync>;

#[derive(Debug, Clone)]
struct Recorded {
    target: String,
    authorization: Option<String>,
    body: Value,
}

#[derive(Clone)]
struct FakeApi {
    responder: Responder,
    calls: Arc<Mutex<Vec<Recorded>>>,
}

async fn handle(State(api): State<FakeApi>, headers: HeaderMap, body: String) -> (StatusCode, String) {
    let target = headers
        .get("x-amz-target")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();
    let authorization = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let body: Value = serde_json::from_str(&body).unwrap_or(Value::Null);

    let response = (api.responder)(&target, &body);
    api.calls.lock().unwrap().push(Recorded {
        target,
        authorization,
        body,
    });
    response
}

/// Start the fake API and return a client pointed at it.
async fn serve<F>(
    token: Option<&str>,
    responder: F,
) -> (HttpRecognitionClient, Arc<Mutex<Vec<Recorded>>>)
where
    F: Fn(&str, &Value) -> (StatusCode, String) + Send + Sync + 'static,
{
    let calls = Arc::new(Mutex::new(Vec::new()));
    let api = FakeApi {
        responder: Arc::new(responder),
        calls: calls.clone(),
    };
    let app = Router::new().route("/", post(handle)).with_state(api);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    let mut config = ServiceConfig::default();
    config.endpoint = Some(format!("http://{}/", addr));
    config.api_token = token.map(str::to_string);
    config.request_timeout_secs = 5;
    (HttpRecognitionClient::new(config).unwrap(), calls)
}

fn training_request() -> TrainingJobRequest {
    TrainingJobRequest {
        recognizer_name: "movie-entities".to_string(),
        version_name: Some("v1".to_string()),
        documents: DocumentLocations {
            train: "s3://training/movies/documents/train.txt".to_string(),
            test: None,
            format: InputFormat::OneDocumentPerLine,
        },
        annotations: AnnotationLocations {
            train: "s3://training/movies/annotations/train.csv".to_string(),
            test: None,
        },
        labels: LabelSet::from_labels(["Actor", "Year"]).unwrap(),
        language: LanguageCode::En,
        data_access_role: "arn:aws:iam::000000000000:role/ner-data".to_string(),
    }
}

const RECOGNIZER_ARN: &str =
    "arn:aws:comprehend:us-east-1:000000000000:entity-recognizer/movie-entities/version/v1";

#[tokio::test]
async fn create_recognizer_sends_entity_types_and_token() {
    let (client, calls) = serve(Some("gateway-secret"), |target, _| match target {
        "Comprehend_20171127.CreateEntityRecognizer" => (
            StatusCode::OK,
            json!({ "EntityRecognizerArn": RECOGNIZER_ARN }).to_string(),
        ),
        _ => (StatusCode::BAD_REQUEST, String::new()),
    })
    .await;

    let handle = client.submit_training_job(&training_request()).await.unwrap();
    assert_eq!(handle.model_identifier, RECOGNIZER_ARN);
    assert_eq!(handle.job_identifier, "movie-entities/version/v1");

    let calls = calls.lock().unwrap();
    assert_eq!(calls.len(), 1);
    let call = &calls[0];
    assert_eq!(call.authorization.as_deref(), Some("Bearer gateway-secret"));

    let input = &call.body["InputDataConfig"];
    assert_eq!(input["DataFormat"], "COMPREHEND_CSV");
    assert_eq!(
        input["EntityTypes"],
        json!([{ "Type": "Actor" }, { "Type": "Year" }])
    );
    assert_eq!(
        input["Documents"]["S3Uri"],
        "s3://training/movies/documents/train.txt"
    );
    assert_eq!(input["Documents"]["InputFormat"], "ONE_DOC_PER_LINE");
    assert!(input["Documents"].get("TestS3Uri").is_none());
    assert_eq!(call.body["RecognizerName"], "movie-entities");
    assert_eq!(call.body["VersionName"], "v1");
    assert_eq!(call.body["LanguageCode"], "en");
    assert!(call.body["ClientRequestToken"].as_str().is_some());
}

#[tokio::test]
async fn describe_recognizer_parses_status_and_metrics() {
    let (client, calls) = serve(None, |_, _| {
        (
            StatusCode::OK,
            json!({
                "EntityRecognizerProperties": {
                    "EntityRecognizerArn": RECOGNIZER_ARN,
                    "Status": "TRAINED",
                    "SubmitTime": 1_700_000_000.0,
                    "EndTime": 1_700_003_600.5,
                    "RecognizerMetadata": {
                        "NumberOfTrainedDocuments": 900,
                        "NumberOfTestDocuments": 100,
                        "EvaluationMetrics": { "Precision": 0.9, "Recall": 0.8, "F1Score": 0.85 },
                        "EntityTypes": [
                            { "Type": "Actor", "NumberOfTrainMentions": 412,
                              "EvaluationMetrics": { "Precision": 0.95, "Recall": 0.9, "F1Score": 0.92 } }
                        ]
                    }
                }
            })
            .to_string(),
        )
    })
    .await;

    let handle = TrainingJobHandle::from_model_identifier(RECOGNIZER_ARN);
    let report = client.describe_training_job(&handle).await.unwrap();

    assert_eq!(report.status, JobStatus::Trained);
    assert_eq!(report.remote_status, "TRAINED");
    let elapsed = report.end_time.unwrap() - report.submit_time.unwrap();
    assert_eq!(elapsed.num_seconds(), 3600);

    let metrics = report.metrics.unwrap();
    assert_eq!(metrics.trained_documents, Some(900));
    assert_eq!(metrics.overall.f1_score, Some(0.85));
    assert_eq!(metrics.per_label[0].label, "Actor");
    assert_eq!(metrics.per_label[0].train_mentions, Some(412));

    let calls = calls.lock().unwrap();
    assert_eq!(
        calls[0].target,
        "Comprehend_20171127.DescribeEntityRecognizer"
    );
    assert_eq!(calls[0].body["EntityRecognizerArn"], RECOGNIZER_ARN);
    assert!(calls[0].authorization.is_none());
}

#[tokio::test]
async fn typed_error_is_a_rejection_with_service_message() {
    let (client, _) = serve(None, |_, _| {
        (
            StatusCode::BAD_REQUEST,
            json!({
                "__type": "com.amazonaws.comprehend#InvalidRequestException",
                "Message": "At least 25 annotations are required per entity type"
            })
            .to_string(),
        )
    })
    .await;

    let err = client
        .submit_training_job(&training_request())
        .await
        .unwrap_err();
    match err {
        RecognitionError::Rejected { kind, message } => {
            assert_eq!(kind, "InvalidRequestException");
            assert_eq!(message, "At least 25 annotations are required per entity type");
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn missing_resource_is_not_found() {
    let (client, _) = serve(None, |_, _| {
        (
            StatusCode::BAD_REQUEST,
            json!({
                "__type": "ResourceNotFoundException",
                "message": "Could not find specified resource"
            })
            .to_string(),
        )
    })
    .await;

    let handle = TrainingJobHandle::from_model_identifier(RECOGNIZER_ARN);
    let err = client.describe_training_job(&handle).await.unwrap_err();
    assert!(matches!(err, RecognitionError::NotFound(_)));
}

#[tokio::test]
async fn untyped_server_error_is_api_error() {
    let (client, _) = serve(None, |_, _| {
        (StatusCode::INTERNAL_SERVER_ERROR, "upstream unavailable".to_string())
    })
    .await;

    let handle = TrainingJobHandle::from_model_identifier(RECOGNIZER_ARN);
    let err = client.describe_training_job(&handle).await.unwrap_err();
    match err {
        RecognitionError::Api { status, body } => {
            assert_eq!(status, 500);
            assert_eq!(body, "upstream unavailable");
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn stop_accepts_empty_body() {
    let (client, calls) = serve(None, |_, _| (StatusCode::OK, String::new())).await;

    let handle = TrainingJobHandle::from_model_identifier(RECOGNIZER_ARN);
    client.stop_training_job(&handle).await.unwrap();
    assert_eq!(
        calls.lock().unwrap()[0].target,
        "Comprehend_20171127.StopTrainingEntityRecognizer"
    );
}

#[tokio::test]
async fn detect_entities_returns_spans() {
    let (client, calls) = serve(None, |_, _| {
        (
            StatusCode::OK,
            json!({
                "Entities": [
                    { "Text": "2008", "Type": "Year", "Score": 0.97, "BeginOffset": 5, "EndOffset": 9 },
                    { "Text": "john travolta", "Type": "Actor", "Score": 0.99, "BeginOffset": 39, "EndOffset": 52 }
                ]
            })
            .to_string(),
        )
    })
    .await;

    let endpoint = "arn:aws:comprehend:us-east-1:000000000000:entity-recognizer-endpoint/movies";
    let entities = client
        .detect_entities("what 2008 disney animated film starred john travolta", endpoint)
        .await
        .unwrap();

    assert_eq!(entities.len(), 2);
    assert_eq!(entities[1].label_type, "Actor");
    assert_eq!((entities[1].begin_offset, entities[1].end_offset), (39, 52));

    let calls = calls.lock().unwrap();
    assert_eq!(calls[0].target, "Comprehend_20171127.DetectEntities");
    assert_eq!(calls[0].body["EndpointArn"], endpoint);
}
