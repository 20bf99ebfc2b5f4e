//! Recognition service client configuration.

use serde::{Deserialize, Serialize};

use crate::models::LanguageCode;

/// Configuration for the recognition service client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Service region
    #[serde(default = "default_region")]
    pub region: String,
    /// API endpoint (defaults to the regional service endpoint)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    /// Bearer token sent to the signing gateway in front of the endpoint
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_token: Option<String>,
    /// Request timeout in seconds
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    /// Language of the documents being trained on and analysed
    #[serde(default)]
    pub language: LanguageCode,
    /// Role the service assumes to read staged data and write job output
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_access_role: Option<String>,
}

fn default_region() -> String {
    "us-east-1".to_string()
}

fn default_request_timeout_secs() -> u64 {
    60
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self::base_default().with_env_overrides()
    }
}

impl ServiceConfig {
    /// Base default without env overrides.
    fn base_default() -> Self {
        Self {
            region: default_region(),
            endpoint: None,
            api_token: None,
            request_timeout_secs: default_request_timeout_secs(),
            language: LanguageCode::default(),
            data_access_role: None,
        }
    }

    /// Check if the config equals the default (for skip_serializing_if).
    pub fn is_default(&self) -> bool {
        *self == Self::base_default()
    }

    /// Apply environment variable overrides.
    ///
    /// Supported env vars:
    /// - `NERCTL_REGION` (falls back to `AWS_REGION`)
    /// - `NERCTL_ENDPOINT`: explicit API endpoint
    /// - `NERCTL_API_TOKEN`: bearer token for the signing gateway
    /// - `NERCTL_REQUEST_TIMEOUT`: seconds
    /// - `NERCTL_LANGUAGE`: en, es, fr, it, de or pt
    /// - `NERCTL_DATA_ACCESS_ROLE`: role ARN handed to the service
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(val) = std::env::var("NERCTL_REGION").or_else(|_| std::env::var("AWS_REGION")) {
            self.region = val;
        }
        if let Ok(val) = std::env::var("NERCTL_ENDPOINT") {
            self.endpoint = Some(val);
        }
        if let Ok(val) = std::env::var("NERCTL_API_TOKEN") {
            self.api_token = Some(val);
        }
        if let Ok(val) = std::env::var("NERCTL_REQUEST_TIMEOUT") {
            if let Ok(n) = val.parse() {
                self.request_timeout_secs = n;
            }
        }
        if let Ok(val) = std::env::var("NERCTL_LANGUAGE") {
            if let Some(language) = LanguageCode::from_str(&val) {
                self.language = language;
            }
        }
        if let Ok(val) = std::env::var("NERCTL_DATA_ACCESS_ROLE") {
            self.data_access_role = Some(val);
        }
        self
    }

    pub fn with_endpoint(mut self, endpoint: &str) -> Self {
        self.endpoint = Some(endpoint.to_string());
        self
    }

    /// Endpoint requests are sent to: explicit, or derived from the region.
    pub fn resolved_endpoint(&self) -> String {
        match self.endpoint {
            Some(ref endpoint) => endpoint.clone(),
            None => format!("https://comprehend.{}.amazonaws.com", self.region),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_derived_from_region() {
        let mut config = ServiceConfig::base_default();
        config.region = "eu-west-1".to_string();
        assert_eq!(
            config.resolved_endpoint(),
            "https://comprehend.eu-west-1.amazonaws.com"
        );
    }

    #[test]
    fn test_explicit_endpoint_wins() {
        let config = ServiceConfig::base_default().with_endpoint("http://127.0.0.1:9000");
        assert_eq!(config.resolved_endpoint(), "http://127.0.0.1:9000");
        assert!(!config.is_default());
    }

    #[test]
    fn test_deserialize_partial() {
        let config: ServiceConfig = toml::from_str("language = \"de\"").unwrap();
        assert_eq!(config.language, LanguageCode::De);
        assert_eq!(config.request_timeout_secs, 60);
        assert_eq!(config.region, "us-east-1");
    }
}
