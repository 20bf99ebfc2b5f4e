//! Service layer for the recognizer job lifecycle.
//!
//! Each component takes its collaborators explicitly and holds no global
//! state; the `Orchestrator` wires them together from configuration.

pub mod annotations;
pub mod detection;
pub mod endpoint;
pub mod ledger;
pub mod poller;
pub mod results;
pub mod staging;
pub mod training;

pub use annotations::{sparse_labels, AnnotationTable, DocumentSet};
pub use detection::DetectionJobSubmitter;
pub use endpoint::EndpointDeployer;
pub use ledger::JobLedger;
pub use poller::{JobSnapshot, PollEvent, PollOutcome, PollPolicy, PollTask, StatusPoller};
pub use results::ResultReader;
pub use staging::{StagedTrainingData, Stager, TrainingData};
pub use training::{Submission, TrainingJobSubmitter};
