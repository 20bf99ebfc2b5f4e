//! Real-time recognizer endpoints.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Deployment state of an endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndpointStatus {
    Creating,
    Updating,
    InService,
    Failed,
    Deleting,
}

impl EndpointStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Creating => "creating",
            Self::Updating => "updating",
            Self::InService => "in_service",
            Self::Failed => "failed",
            Self::Deleting => "deleting",
        }
    }

    pub fn from_remote(s: &str) -> Self {
        match s {
            "IN_SERVICE" => Self::InService,
            "UPDATING" => Self::Updating,
            "FAILED" => Self::Failed,
            "DELETING" => Self::Deleting,
            _ => Self::Creating,
        }
    }

    /// `Deleting` ends a wait as well.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::InService | Self::Failed | Self::Deleting)
    }
}

/// Handle to a deployed (or deploying) endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointHandle {
    pub endpoint_arn: String,
    pub model_identifier: String,
    pub inference_units: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EndpointStatusReport {
    pub status: EndpointStatus,
    pub remote_status: String,
    pub message: Option<String>,
    pub current_inference_units: Option<u32>,
    pub last_modified: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_status_from_remote() {
        assert_eq!(EndpointStatus::from_remote("CREATING"), EndpointStatus::Creating);
        assert_eq!(
            EndpointStatus::from_remote("IN_SERVICE"),
            EndpointStatus::InService
        );
        assert_eq!(EndpointStatus::from_remote("FAILED"), EndpointStatus::Failed);
        assert!(EndpointStatus::InService.is_terminal());
        assert!(!EndpointStatus::Updating.is_terminal());
    }
}
