//! Configuration file parser for ~/.config/feedkeep/config.toml.
//!
//! The config file is optional; a missing file yields `Config::default()`.
//! Unknown keys are ignored by serde, though we log a warning when the file
//! contains potential typos.
use reqwest::redirect::Policy;
use secrecy::SecretString;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::backup::{CloudCredentials, CloudProvider};
use crate::content::{AdRules, Extractor, OfflineFetcher, Sanitizer, MIN_EXTRACTED_LEN};
use crate::feed::{default_relays, Ingestor, Normalizer, RelayStrategy, Resolver};

/// Env var that overrides `cloud.client_secret`.
pub const CLOUD_SECRET_ENV: &str = "FEEDKEEP_CLOUD_SECRET";

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid TOML in config file: {0}")]
    Parse(#[from] toml::de::Error),

    /// SEC-014: Config file exceeds maximum allowed size.
    #[error("Config file too large: {0}")]
    TooLarge(String),

    #[error("Failed to build HTTP client: {0}")]
    Http(#[from] reqwest::Error),
}

// ============================================================================
// Configuration Structs
// ============================================================================

/// Top-level application configuration.
///
/// All fields use `#[serde(default)]` so any subset of keys can be specified.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Per-request timeout for feed and page fetches.
    pub request_timeout_secs: u64,

    pub user_agent: String,

    /// Relay chain tried in order after a failed direct fetch.
    /// An empty list disables relays.
    pub relays: Vec<RelayStrategy>,

    /// Ad and tracker rules applied by the sanitizer.
    pub ad_rules: AdRules,

    /// Extracted article text at or below this many characters is rejected.
    pub min_extracted_len: usize,

    /// Retries for offline page fetches after the first attempt.
    pub offline_max_retries: u32,

    pub cloud: CloudConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            request_timeout_secs: 30,
            user_agent: format!("feedkeep/{}", env!("CARGO_PKG_VERSION")),
            relays: default_relays(),
            ad_rules: AdRules::default(),
            min_extracted_len: MIN_EXTRACTED_LEN,
            offline_max_retries: 3,
            cloud: CloudConfig::default(),
        }
    }
}

/// `[cloud]` section: where `backup` and `restore` go.
///
/// SEC-015: Custom Debug impl masks `client_secret` to prevent secret leakage
/// in logs, error messages, and debug output.
#[derive(Clone, Default, Deserialize)]
#[serde(default)]
pub struct CloudConfig {
    pub provider: CloudProvider,
    pub client_id: String,
    /// Env var takes precedence over the config file.
    pub client_secret: Option<String>,
    pub directory: Option<PathBuf>,
}

impl std::fmt::Debug for CloudConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CloudConfig")
            .field("provider", &self.provider)
            .field("client_id", &self.client_id)
            .field(
                "client_secret",
                &self.client_secret.as_ref().map(|_| "[REDACTED]"),
            )
            .field("directory", &self.directory)
            .finish()
    }
}

impl CloudConfig {
    /// Credentials for the configured provider. `env_secret` wins over the
    /// file's `client_secret`.
    pub fn credentials(&self, env_secret: Option<String>) -> CloudCredentials {
        let secret = env_secret
            .filter(|s| !s.trim().is_empty())
            .or_else(|| self.client_secret.clone());
        CloudCredentials {
            provider: self.provider,
            client_id: self.client_id.clone(),
            client_secret: secret.map(SecretString::from),
            directory: self.directory.clone(),
        }
    }
}

// ============================================================================
// Loading
// ============================================================================

impl Config {
    /// SEC-014: Maximum config file size (1 MB).
    const MAX_FILE_SIZE: u64 = 1_048_576;

    const KNOWN_KEYS: [&'static str; 7] = [
        "request_timeout_secs",
        "user_agent",
        "relays",
        "ad_rules",
        "min_extracted_len",
        "offline_max_retries",
        "cloud",
    ];

    /// Load configuration from a TOML file.
    ///
    /// - Missing file → `Ok(Config::default())`
    /// - Empty file → `Ok(Config::default())`
    /// - Invalid TOML → `Err(ConfigError::Parse)` with line number info
    /// - Unknown keys → accepted, logged as warning
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        // SEC-014: Check file size before reading
        match std::fs::metadata(path) {
            Ok(meta) if meta.len() > Self::MAX_FILE_SIZE => {
                return Err(ConfigError::TooLarge(format!(
                    "Config file is {} bytes (max {} bytes)",
                    meta.len(),
                    Self::MAX_FILE_SIZE
                )));
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "No config file found, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
            Ok(_) => {}
        }

        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                // File deleted between metadata and read
                tracing::debug!(path = %path.display(), "Config file disappeared, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
        };

        Self::parse(&content)
    }

    /// Parse configuration from TOML text.
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        if content.trim().is_empty() {
            tracing::debug!("Config file is empty, using defaults");
            return Ok(Self::default());
        }

        if let Ok(raw) = content.parse::<toml::Table>() {
            for key in raw.keys() {
                if !Self::KNOWN_KEYS.contains(&key.as_str()) {
                    tracing::warn!(key = %key, "Unknown key in config file, ignoring");
                }
            }
        }

        let config: Config = toml::from_str(content)?;
        tracing::info!(
            relays = config.relays.len(),
            timeout_secs = config.request_timeout_secs,
            "Loaded configuration"
        );
        Ok(config)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.max(1))
    }

    // ========================================================================
    // Component construction
    // ========================================================================

    /// Shared HTTP client for feed and page fetches.
    pub fn http_client(&self) -> Result<reqwest::Client, ConfigError> {
        let client = reqwest::Client::builder()
            .user_agent(&self.user_agent)
            .redirect(create_redirect_policy())
            .pool_max_idle_per_host(4)
            .pool_idle_timeout(Duration::from_secs(30))
            .tcp_keepalive(Duration::from_secs(60))
            .timeout(self.request_timeout())
            .build()?;
        Ok(client)
    }

    pub fn sanitizer(&self) -> Sanitizer {
        Sanitizer::new(&self.ad_rules)
    }

    pub fn extractor(&self) -> Extractor {
        Extractor::new(self.sanitizer(), self.min_extracted_len)
    }

    pub fn resolver(&self, client: reqwest::Client) -> Resolver {
        Resolver::new(client, self.relays.clone()).with_timeout(self.request_timeout())
    }

    pub fn ingestor(&self, client: reqwest::Client) -> Ingestor {
        Ingestor::new(self.resolver(client), Normalizer::new(self.sanitizer()))
    }

    pub fn offline_fetcher(&self, client: reqwest::Client) -> OfflineFetcher {
        OfflineFetcher::new(client, self.sanitizer(), self.extractor())
            .with_timeout(self.request_timeout())
            .with_max_retries(self.offline_max_retries)
    }

    /// Cloud credentials, with the secret taken from [`CLOUD_SECRET_ENV`]
    /// when set.
    pub fn cloud_credentials(&self) -> CloudCredentials {
        self.cloud.credentials(std::env::var(CLOUD_SECRET_ENV).ok())
    }
}

/// Redirect policy with loop detection and limited hops.
///
/// - Limits redirects to 3 hops maximum
/// - Detects redirect loops (same URL appearing twice in chain)
fn create_redirect_policy() -> Policy {
    Policy::custom(|attempt| {
        if attempt.previous().len() >= 3 {
            return attempt.error("Too many redirects (max 3)");
        }

        let url = attempt.url();
        if attempt.previous().iter().any(|prev| prev.as_str() == url.as_str()) {
            return attempt.error("Redirect loop detected");
        }

        tracing::debug!(
            from = %attempt.previous().last().map(|u| u.as_str()).unwrap_or("initial"),
            to = %url,
            hop = attempt.previous().len() + 1,
            "Following redirect"
        );

        attempt.follow()
    })
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feed::RelayKind;
    use pretty_assertions::assert_eq;
    use secrecy::ExposeSecret;

    fn write_config(content: &str) -> (tempfile::TempDir, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, content).unwrap();
        (dir, path)
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.request_timeout_secs, 30);
        assert_eq!(config.relays, default_relays());
        assert_eq!(config.ad_rules, AdRules::default());
        assert_eq!(config.min_extracted_len, 200);
        assert_eq!(config.cloud.provider, CloudProvider::LocalDirectory);
        assert!(config.user_agent.starts_with("feedkeep/"));
    }

    #[test]
    fn test_missing_file_returns_default() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(config.relays.len(), 3);
    }

    #[test]
    fn test_whitespace_only_file_returns_default() {
        let (_dir, path) = write_config("   \n  \n  ");
        let config = Config::load(&path).unwrap();
        assert_eq!(config.request_timeout_secs, 30);
    }

    #[test]
    fn test_full_config() {
        let (_dir, path) = write_config(
            r#"
request_timeout_secs = 10
user_agent = "custom/1.0"
min_extracted_len = 50
offline_max_retries = 1

[[relays]]
kind = "json_envelope"
base = "https://relay.example/get?url="

[ad_rules]
domains = ["ads.example"]
patterns = ["promo"]

[cloud]
provider = "dropbox"
client_id = "app-id"
client_secret = "file-secret"
"#,
        );

        let config = Config::load(&path).unwrap();
        assert_eq!(config.request_timeout(), Duration::from_secs(10));
        assert_eq!(config.user_agent, "custom/1.0");
        assert_eq!(config.min_extracted_len, 50);
        assert_eq!(config.offline_max_retries, 1);
        assert_eq!(
            config.relays,
            vec![RelayStrategy::new(RelayKind::JsonEnvelope, "https://relay.example/get?url=")]
        );
        assert_eq!(config.ad_rules.domains, vec!["ads.example"]);
        assert_eq!(config.cloud.provider, CloudProvider::Dropbox);
        assert_eq!(config.cloud.client_secret.as_deref(), Some("file-secret"));
    }

    #[test]
    fn test_empty_relay_list_disables_relays() {
        let config = Config::parse("relays = []\n").unwrap();
        assert!(config.relays.is_empty());
        assert!(config.resolver(reqwest::Client::new()).relays().is_empty());
    }

    #[test]
    fn test_invalid_toml_returns_error() {
        let (_dir, path) = write_config("this is not [valid toml");
        let err = Config::load(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
        assert!(err.to_string().contains("Invalid TOML"));
    }

    #[test]
    fn test_unknown_keys_accepted() {
        let (_dir, path) = write_config("request_timeout_secs = 5\ntheme = \"dark\"\n");
        let config = Config::load(&path).unwrap();
        assert_eq!(config.request_timeout_secs, 5);
    }

    #[test]
    fn test_wrong_type_returns_error() {
        let result = Config::parse("request_timeout_secs = \"soon\"\n");
        assert!(matches!(result, Err(ConfigError::Parse(_))));
    }

    // SEC-014: File size limit
    #[test]
    fn test_too_large_file_rejected() {
        let (_dir, path) = write_config(&"a".repeat(1_048_577));
        let err = Config::load(&path).unwrap_err();
        assert!(matches!(err, ConfigError::TooLarge(_)));
        assert!(err.to_string().contains("too large"));
    }

    #[test]
    fn test_zero_timeout_clamped() {
        let config = Config::parse("request_timeout_secs = 0\n").unwrap();
        assert_eq!(config.request_timeout(), Duration::from_secs(1));
    }

    #[test]
    fn test_env_secret_takes_precedence() {
        let cloud = CloudConfig {
            provider: CloudProvider::GoogleDrive,
            client_id: "app".to_string(),
            client_secret: Some("from-file".to_string()),
            directory: None,
        };

        let credentials = cloud.credentials(Some("from-env".to_string()));
        let secret = credentials.client_secret.unwrap();
        assert_eq!(secret.expose_secret(), "from-env");

        let credentials = cloud.credentials(Some("  ".to_string()));
        let secret = credentials.client_secret.unwrap();
        assert_eq!(secret.expose_secret(), "from-file");

        let credentials = CloudConfig::default().credentials(None);
        assert!(credentials.client_secret.is_none());
    }

    // SEC-015: Debug output masks the secret
    #[test]
    fn test_debug_masks_client_secret() {
        let mut config = Config::default();
        config.cloud.client_secret = Some("super-secret-key-12345".to_string());

        let debug_output = format!("{:?}", config);
        assert!(!debug_output.contains("super-secret-key-12345"));
        assert!(debug_output.contains("[REDACTED]"));
    }

    #[test]
    fn test_http_client_builds() {
        assert!(Config::default().http_client().is_ok());
    }
}
