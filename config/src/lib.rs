//! Configuration loading, parsing, and resolution for Learnova.
//!
//! Raw TOML deserialization structs (with `Option` fields) stay private in
//! this crate. [`EngineConfig::load`] resolves them into validated types at
//! the parse boundary -- existence of a resolved value is the proof of its
//! validity.
//!
//! ```toml
//! [course]
//! pass_threshold = 60.0
//!
//! [authority]
//! base_url = "https://credentials.learnova.org"
//! api_key = "${LEARNOVA_AUTHORITY_KEY}"
//! timeout_secs = 30
//! max_retries = 2
//!
//! [store]
//! path = "/var/lib/learnova/enrollments.db"
//!
//! [reconciliation]
//! staleness_secs = 300
//! ```
//!
//! Every section is optional; omitted sections resolve to defaults. The
//! `[authority]` section is required only when issuance is actually wired to
//! a remote authority.

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;
use url::Url;

use learnova_types::{PassThreshold, ScoreError};

const CONFIG_FILE: &str = "learnova.toml";
const DEFAULT_TIMEOUT_SECS: u64 = 30;
const DEFAULT_MAX_RETRIES: u32 = 2;
const DEFAULT_STALENESS_SECS: u64 = 300;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config at {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse config at {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("invalid pass_threshold: {0}")]
    InvalidThreshold(ScoreError),
    #[error("invalid authority base_url {value:?}: {source}")]
    InvalidBaseUrl {
        value: String,
        source: url::ParseError,
    },
    #[error("authority base_url must use http or https, got {0:?}")]
    UnsupportedScheme(String),
    #[error("authority timeout_secs must be greater than zero")]
    ZeroTimeout,
}

// ── Raw TOML shapes (private) ───────────────────────────────────────────

#[derive(Debug, Default, Deserialize)]
struct RawConfig {
    course: Option<RawCourse>,
    authority: Option<RawAuthority>,
    store: Option<RawStore>,
    reconciliation: Option<RawReconciliation>,
}

#[derive(Debug, Default, Deserialize)]
struct RawCourse {
    pass_threshold: Option<f64>,
}

#[derive(Debug, Default, Deserialize)]
struct RawAuthority {
    base_url: Option<String>,
    api_key: Option<String>,
    timeout_secs: Option<u64>,
    max_retries: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
struct RawStore {
    path: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct RawReconciliation {
    staleness_secs: Option<u64>,
}

// ── Resolved configuration (public) ─────────────────────────────────────

/// Validated connection settings for the external credential authority.
#[derive(Clone)]
pub struct AuthorityConfig {
    base_url: Url,
    api_key: Option<String>,
    timeout: Duration,
    max_retries: u32,
}

// Manual Debug impl to prevent leaking the API key in logs.
impl std::fmt::Debug for AuthorityConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthorityConfig")
            .field("base_url", &self.base_url.as_str())
            .field(
                "api_key",
                &if self.api_key.is_some() {
                    "[REDACTED]"
                } else {
                    "None"
                },
            )
            .field("timeout", &self.timeout)
            .field("max_retries", &self.max_retries)
            .finish()
    }
}

impl AuthorityConfig {
    pub fn new(base_url: &str) -> Result<Self, ConfigError> {
        let url = Url::parse(base_url).map_err(|source| ConfigError::InvalidBaseUrl {
            value: base_url.to_string(),
            source,
        })?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(ConfigError::UnsupportedScheme(url.scheme().to_string()));
        }
        Ok(Self {
            base_url: url,
            api_key: None,
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            max_retries: DEFAULT_MAX_RETRIES,
        })
    }

    #[must_use]
    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    #[must_use]
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    #[must_use]
    pub fn api_key(&self) -> Option<&str> {
        self.api_key.as_deref()
    }

    #[must_use]
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    #[must_use]
    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }
}

/// Fully resolved engine configuration.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pass_threshold: PassThreshold,
    authority: Option<AuthorityConfig>,
    store_path: PathBuf,
    staleness_window: Duration,
}

impl EngineConfig {
    /// Load and resolve configuration from the default path.
    ///
    /// A missing file resolves to defaults; a present-but-invalid file is an
    /// error, never silently ignored.
    pub fn load() -> Result<Self, ConfigError> {
        match config_path() {
            Some(path) if path.exists() => Self::load_from(&path),
            _ => Self::resolve(RawConfig::default()),
        }
    }

    /// Load and resolve configuration from an explicit path.
    pub fn load_from(path: &std::path::Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| {
            tracing::warn!(path = %path.display(), %source, "failed to read config");
            ConfigError::Read {
                path: path.to_path_buf(),
                source,
            }
        })?;
        let raw: RawConfig = toml::from_str(&content).map_err(|source| {
            tracing::warn!(path = %path.display(), %source, "failed to parse config");
            ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            }
        })?;
        Self::resolve(raw)
    }

    fn resolve(raw: RawConfig) -> Result<Self, ConfigError> {
        let pass_threshold = match raw.course.unwrap_or_default().pass_threshold {
            Some(value) => PassThreshold::new(value).map_err(ConfigError::InvalidThreshold)?,
            None => PassThreshold::default(),
        };

        let authority = match raw.authority {
            Some(RawAuthority {
                base_url: Some(base_url),
                api_key,
                timeout_secs,
                max_retries,
            }) => {
                let mut config = AuthorityConfig::new(&expand_env_vars(&base_url))?;
                if let Some(key) = api_key {
                    let key = expand_env_vars(&key);
                    if !key.is_empty() {
                        config = config.with_api_key(key);
                    }
                }
                if let Some(secs) = timeout_secs {
                    if secs == 0 {
                        return Err(ConfigError::ZeroTimeout);
                    }
                    config = config.with_timeout(Duration::from_secs(secs));
                }
                if let Some(retries) = max_retries {
                    config = config.with_max_retries(retries);
                }
                Some(config)
            }
            _ => None,
        };

        let store_path = raw
            .store
            .unwrap_or_default()
            .path
            .map(|p| PathBuf::from(expand_env_vars(&p)))
            .unwrap_or_else(default_store_path);

        let staleness_secs = raw
            .reconciliation
            .unwrap_or_default()
            .staleness_secs
            .unwrap_or(DEFAULT_STALENESS_SECS);

        Ok(Self {
            pass_threshold,
            authority,
            store_path,
            staleness_window: Duration::from_secs(staleness_secs),
        })
    }

    #[must_use]
    pub fn pass_threshold(&self) -> PassThreshold {
        self.pass_threshold
    }

    #[must_use]
    pub fn authority(&self) -> Option<&AuthorityConfig> {
        self.authority.as_ref()
    }

    #[must_use]
    pub fn store_path(&self) -> &std::path::Path {
        &self.store_path
    }

    #[must_use]
    pub fn staleness_window(&self) -> Duration {
        self.staleness_window
    }
}

/// Location of `learnova.toml` under the platform data directory.
#[must_use]
pub fn config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("learnova").join(CONFIG_FILE))
}

fn default_store_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(env::temp_dir)
        .join("learnova")
        .join("enrollments.db")
}

/// Expand `${VAR}` references against the process environment.
///
/// Unset variables expand to the empty string.
fn expand_env_vars(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut rest = value;

    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        match after.find('}') {
            Some(end) => {
                let var = &after[..end];
                if !var.is_empty() {
                    out.push_str(&env::var(var).unwrap_or_default());
                }
                rest = &after[end + 1..];
            }
            None => {
                out.push_str(&rest[start..]);
                rest = "";
            }
        }
    }
    out.push_str(rest);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_config(content: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn empty_file_resolves_to_defaults() {
        let file = write_config("");
        let config = EngineConfig::load_from(file.path()).unwrap();
        assert_eq!(config.pass_threshold(), PassThreshold::default());
        assert!(config.authority().is_none());
        assert_eq!(config.staleness_window(), Duration::from_secs(300));
    }

    #[test]
    fn full_config_resolves() {
        let file = write_config(
            r#"
            [course]
            pass_threshold = 60.0

            [authority]
            base_url = "https://credentials.example.org"
            api_key = "secret"
            timeout_secs = 10
            max_retries = 4

            [store]
            path = "/tmp/learnova-test.db"

            [reconciliation]
            staleness_secs = 120
            "#,
        );
        let config = EngineConfig::load_from(file.path()).unwrap();
        assert_eq!(config.pass_threshold().value(), 60.0);
        let authority = config.authority().unwrap();
        assert_eq!(authority.base_url().as_str(), "https://credentials.example.org/");
        assert_eq!(authority.api_key(), Some("secret"));
        assert_eq!(authority.timeout(), Duration::from_secs(10));
        assert_eq!(authority.max_retries(), 4);
        assert_eq!(config.store_path(), std::path::Path::new("/tmp/learnova-test.db"));
        assert_eq!(config.staleness_window(), Duration::from_secs(120));
    }

    #[test]
    fn rejects_out_of_range_threshold() {
        let file = write_config("[course]\npass_threshold = 140.0\n");
        assert!(matches!(
            EngineConfig::load_from(file.path()),
            Err(ConfigError::InvalidThreshold(_))
        ));
    }

    #[test]
    fn rejects_non_http_base_url() {
        let file = write_config("[authority]\nbase_url = \"ftp://example.org\"\n");
        assert!(matches!(
            EngineConfig::load_from(file.path()),
            Err(ConfigError::UnsupportedScheme(_))
        ));
    }

    #[test]
    fn rejects_zero_timeout() {
        let file = write_config(
            "[authority]\nbase_url = \"https://example.org\"\ntimeout_secs = 0\n",
        );
        assert!(matches!(
            EngineConfig::load_from(file.path()),
            Err(ConfigError::ZeroTimeout)
        ));
    }

    #[test]
    fn authority_section_without_base_url_is_ignored() {
        let file = write_config("[authority]\ntimeout_secs = 5\n");
        let config = EngineConfig::load_from(file.path()).unwrap();
        assert!(config.authority().is_none());
    }

    #[test]
    fn malformed_toml_is_an_error() {
        let file = write_config("[course\npass_threshold = 60");
        assert!(matches!(
            EngineConfig::load_from(file.path()),
            Err(ConfigError::Parse { .. })
        ));
    }

    #[test]
    fn expands_env_vars() {
        // SAFETY: test-local variable name, no concurrent reader depends on it.
        unsafe { env::set_var("LEARNOVA_TEST_CFG_VAR", "https://env.example.org") };
        let expanded = expand_env_vars("${LEARNOVA_TEST_CFG_VAR}/api");
        assert_eq!(expanded, "https://env.example.org/api");
        assert_eq!(expand_env_vars("no-vars-here"), "no-vars-here");
        assert_eq!(expand_env_vars("${UNSET_VAR_XYZ}tail"), "tail");
        assert_eq!(expand_env_vars("dangling ${brace"), "dangling ${brace");
    }

    #[test]
    fn debug_redacts_api_key() {
        let authority = AuthorityConfig::new("https://example.org")
            .unwrap()
            .with_api_key("secret");
        let debug = format!("{authority:?}");
        assert!(debug.contains("[REDACTED]"));
        assert!(!debug.contains("secret"));
    }
}
