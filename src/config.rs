//! Configuration management for nerctl using the prefer crate.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::recognition::ServiceConfig;
use crate::services::poller::PollPolicy;

/// Default bucket training data is staged into.
pub const DEFAULT_BUCKET: &str = "nerctl";

/// Default key prefix for staged objects.
pub const DEFAULT_PREFIX: &str = "entity-recognizer";

/// Fewest annotations per label before a sparse-label warning is logged.
pub const DEFAULT_MIN_MENTIONS_PER_LABEL: usize = 25;

/// Object storage configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Directory backing the local object store (defaults to the data dir).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub root: Option<String>,
    /// Bucket training data is staged into.
    #[serde(default = "default_bucket")]
    pub bucket: String,
    /// Key prefix under which staged objects are written.
    #[serde(default = "default_prefix")]
    pub prefix: String,
}

fn default_bucket() -> String {
    DEFAULT_BUCKET.to_string()
}

fn default_prefix() -> String {
    DEFAULT_PREFIX.to_string()
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self::base_default().with_env_overrides()
    }
}

impl StorageConfig {
    fn base_default() -> Self {
        Self {
            root: None,
            bucket: default_bucket(),
            prefix: default_prefix(),
        }
    }

    pub fn is_default(&self) -> bool {
        *self == Self::base_default()
    }

    /// Apply environment variable overrides.
    ///
    /// Supported env vars:
    /// - `NERCTL_STORAGE_ROOT`
    /// - `NERCTL_BUCKET`
    /// - `NERCTL_PREFIX`
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(val) = std::env::var("NERCTL_STORAGE_ROOT") {
            self.root = Some(val);
        }
        if let Ok(val) = std::env::var("NERCTL_BUCKET") {
            self.bucket = val;
        }
        if let Ok(val) = std::env::var("NERCTL_PREFIX") {
            self.prefix = val;
        }
        self
    }
}

/// How often job status is queried.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PollConfig {
    /// First delay between status queries, in seconds.
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
    /// Growth factor applied to the delay after each query (1.0 = fixed).
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,
    /// Upper bound on the delay, in seconds.
    #[serde(default = "default_max_interval_secs")]
    pub max_interval_secs: u64,
    /// Give up after this many seconds. `None` waits forever.
    #[serde(default = "default_deadline_secs")]
    pub deadline_secs: Option<u64>,
}

fn default_interval_secs() -> u64 {
    10
}

fn default_multiplier() -> f64 {
    1.5
}

fn default_max_interval_secs() -> u64 {
    60
}

fn default_deadline_secs() -> Option<u64> {
    // Recognizer training routinely takes hours
    Some(6 * 60 * 60)
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_interval_secs(),
            multiplier: default_multiplier(),
            max_interval_secs: default_max_interval_secs(),
            deadline_secs: default_deadline_secs(),
        }
    }
}

impl PollConfig {
    pub fn is_default(&self) -> bool {
        *self == Self::default()
    }

    pub fn to_policy(&self) -> PollPolicy {
        PollPolicy {
            initial_interval: Duration::from_secs(self.interval_secs),
            multiplier: self.multiplier,
            max_interval: Duration::from_secs(self.max_interval_secs),
            deadline: self.deadline_secs.map(Duration::from_secs),
        }
    }
}

/// Top-level configuration file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Recognition service connection.
    #[serde(default, skip_serializing_if = "ServiceConfig::is_default")]
    pub service: ServiceConfig,
    #[serde(default, skip_serializing_if = "StorageConfig::is_default")]
    pub storage: StorageConfig,
    #[serde(default, skip_serializing_if = "PollConfig::is_default")]
    pub poll: PollConfig,
    /// Job ledger file used by submit-or-resume.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ledger_path: Option<String>,
    /// Labels with fewer annotations than this are reported as sparse.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_mentions_per_label: Option<usize>,
    /// File this config was loaded from.
    #[serde(skip)]
    pub source_path: Option<PathBuf>,
}

impl Config {
    /// Load configuration using prefer crate for discovery.
    /// Automatically discovers nerctl config files in standard locations.
    pub async fn load() -> Self {
        match prefer::load("nerctl").await {
            Ok(pref_config) => {
                if let Some(path) = pref_config.source_path() {
                    match Self::load_from_path(path).await {
                        Ok(config) => config,
                        Err(e) => {
                            tracing::warn!("Ignoring config {}: {}", path.display(), e);
                            Self::default()
                        }
                    }
                } else {
                    Self::default()
                }
            }
            // No config file found, use defaults with env overrides
            Err(_) => Self::default(),
        }
    }

    /// Load configuration from a specific file path.
    /// `.toml` files are parsed as TOML, everything else as JSON.
    pub async fn load_from_path(path: &Path) -> Result<Self, String> {
        let contents = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| format!("Failed to read config file: {}", e))?;

        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("json");

        let mut config: Config = match ext {
            "toml" => toml::from_str(&contents)
                .map_err(|e| format!("Failed to parse TOML config: {}", e))?,
            _ => serde_json::from_str(&contents)
                .map_err(|e| format!("Failed to parse JSON config: {}", e))?,
        };

        config.source_path = Some(path.to_path_buf());
        // Environment wins over the file
        config.service = config.service.with_env_overrides();
        config.storage = config.storage.with_env_overrides();
        Ok(config)
    }

    /// Directory relative paths are resolved against: the config file's
    /// directory, or the working directory.
    pub fn base_dir(&self) -> PathBuf {
        self.source_path
            .as_ref()
            .and_then(|p| p.parent().map(|p| p.to_path_buf()))
            .unwrap_or_else(|| PathBuf::from("."))
    }

    /// Resolve a path that may be relative to the config file.
    /// - Absolute paths are returned as-is
    /// - Paths starting with ~ are expanded
    /// - Relative paths are resolved relative to `base_dir`
    pub fn resolve_path(&self, path_str: &str, base_dir: &Path) -> PathBuf {
        let expanded = shellexpand::tilde(path_str);
        let path = Path::new(expanded.as_ref());

        if path.is_absolute() {
            path.to_path_buf()
        } else {
            base_dir.join(path)
        }
    }

    /// Default data directory (`~/.local/share/nerctl` on Linux).
    pub fn data_dir() -> PathBuf {
        dirs::data_dir()
            .or_else(dirs::home_dir)
            .unwrap_or_else(|| PathBuf::from("."))
            .join("nerctl")
    }

    /// Root directory of the local object store.
    pub fn storage_root(&self) -> PathBuf {
        match self.storage.root {
            Some(ref root) => self.resolve_path(root, &self.base_dir()),
            None => Self::data_dir().join("storage"),
        }
    }

    /// Location of the job ledger.
    pub fn ledger_file(&self) -> PathBuf {
        match self.ledger_path {
            Some(ref path) => self.resolve_path(path, &self.base_dir()),
            None => Self::data_dir().join("ledger.json"),
        }
    }

    pub fn min_mentions_per_label(&self) -> usize {
        self.min_mentions_per_label
            .unwrap_or(DEFAULT_MIN_MENTIONS_PER_LABEL)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[tokio::test]
    async fn test_load_toml() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
ledger_path = "state/ledger.json"

[storage]
root = "blobs"
prefix = "movies"

[poll]
interval_secs = 2
multiplier = 1.0
deadline_secs = 30
"#
        )
        .unwrap();

        let config = Config::load_from_path(file.path()).await.unwrap();
        let base = file.path().parent().unwrap();
        assert_eq!(config.ledger_file(), base.join("state/ledger.json"));
        assert_eq!(config.storage_root(), base.join("blobs"));

        let policy = config.poll.to_policy();
        assert_eq!(policy.initial_interval, Duration::from_secs(2));
        assert_eq!(policy.max_interval, Duration::from_secs(60));
        assert_eq!(policy.deadline, Some(Duration::from_secs(30)));
    }

    #[tokio::test]
    async fn test_load_json() {
        let mut file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        write!(file, r#"{{"min_mentions_per_label": 100, "poll": {{"deadline_secs": null}}}}"#)
            .unwrap();

        let config = Config::load_from_path(file.path()).await.unwrap();
        assert_eq!(config.min_mentions_per_label(), 100);
        assert_eq!(config.poll.deadline_secs, None);
        assert_eq!(config.poll.interval_secs, 10);
    }

    #[tokio::test]
    async fn test_load_rejects_garbage() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        write!(file, "poll = 3 = 4").unwrap();
        let err = Config::load_from_path(file.path()).await.unwrap_err();
        assert!(err.contains("TOML"));
    }

    #[test]
    fn test_resolve_path() {
        let config = Config::default();
        let base = Path::new("/srv/nerctl");
        assert_eq!(
            config.resolve_path("/abs/ledger.json", base),
            PathBuf::from("/abs/ledger.json")
        );
        assert_eq!(
            config.resolve_path("ledger.json", base),
            PathBuf::from("/srv/nerctl/ledger.json")
        );
    }

    #[test]
    fn test_default_poll_policy() {
        let policy = PollConfig::default().to_policy();
        assert_eq!(policy.initial_interval, Duration::from_secs(10));
        assert_eq!(policy.multiplier, 1.5);
        assert_eq!(policy.deadline, Some(Duration::from_secs(21600)));
    }
}
