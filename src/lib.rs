//! nerctl - custom entity recognizer job orchestration.
//!
//! Stages annotated training data, submits recognizer training jobs to a
//! managed recognition service, tracks remote jobs to a terminal state, and
//! reads back batch detection output.

// Model types use `from_str` methods that return Option<Self>,
// not Result<Self, Error> as std::str::FromStr requires.
#![allow(clippy::should_implement_trait)]

pub mod config;
pub mod error;
pub mod models;
pub mod orchestrator;
pub mod recognition;
pub mod services;
pub mod storage;

pub use error::{JobError, ValidationError};
pub use orchestrator::Orchestrator;
