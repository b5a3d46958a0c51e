//! Process configuration.

use std::{collections::HashMap, fmt, path::PathBuf, time::Duration};

use thiserror::Error;

use crate::Envelope;

/// Messages kept from the end of the history when none is configured.
pub const DEFAULT_MAX_CONTEXT: i64 = 4;

/// Seconds without a progress write before a stream is judged stalled.
pub const DEFAULT_TIMEOUT_SECONDS: u64 = 20;

const CHAT_FILE: &str = "chat.json";
const STREAM_FILE: &str = "stream.txt";
const PID_FILE: &str = "pid.txt";
const WORKER_LOG_FILE: &str = "worker.log";

/// Configuration error.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Workflow data/cache dirs not set")]
    MissingDirectories,
    #[error("Failed to create directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Configuration shared by every invocation mode.
///
/// Built once at process entry and passed down explicitly; nothing below the
/// binary reads the process environment.
#[derive(Clone)]
pub struct Config {
    /// Directory holding the conversation log.
    pub data_dir: PathBuf,
    /// Directory holding the progress channel, worker handle and worker log.
    pub cache_dir: PathBuf,
    pub api_key: Option<String>,
    pub org_id: Option<String>,
    /// Raw chat completions endpoint, normalized by the client.
    pub chat_endpoint: Option<String>,
    pub gpt_model: Option<String>,
    /// Takes precedence over `gpt_model` when set.
    pub model_override: Option<String>,
    pub system_prompt: Option<String>,
    /// History window; zero or negative disables trimming.
    pub max_context: i64,
    /// Staleness threshold applied by the poller.
    pub timeout: Duration,
    /// Passphrase for at-rest encryption; `None` keeps files in plaintext.
    pub storage_secret: Option<String>,
}

impl Config {
    /// Create a configuration with the two directories and defaults elsewhere.
    #[must_use]
    pub fn new(data_dir: impl Into<PathBuf>, cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            cache_dir: cache_dir.into(),
            api_key: None,
            org_id: None,
            chat_endpoint: None,
            gpt_model: None,
            model_override: None,
            system_prompt: None,
            max_context: DEFAULT_MAX_CONTEXT,
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECONDS),
            storage_secret: None,
        }
    }

    /// Build a configuration from key/value pairs such as `std::env::vars()`.
    ///
    /// Empty values count as unset. Integers that fail to parse fall back to
    /// their defaults.
    ///
    /// # Errors
    /// Returns error if either directory is missing.
    pub fn from_vars<I, K, V>(vars: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let vars: HashMap<String, String> = vars
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .filter(|(_, v)| !v.is_empty())
            .collect();
        let get = |key: &str| vars.get(key).cloned();

        let (Some(data_dir), Some(cache_dir)) =
            (get("alfred_workflow_data"), get("alfred_workflow_cache"))
        else {
            return Err(ConfigError::MissingDirectories);
        };

        let max_context = get("max_context")
            .and_then(|v| v.trim().parse::<i64>().ok())
            .unwrap_or(DEFAULT_MAX_CONTEXT);
        // Negative timeouts clamp to zero: every quiet record is stalled.
        let timeout = get("timeout_seconds")
            .and_then(|v| v.trim().parse::<i64>().ok())
            .map_or(DEFAULT_TIMEOUT_SECONDS, |secs| secs.max(0).unsigned_abs());

        Ok(Self {
            api_key: get("openai_api_key"),
            org_id: get("openai_org_id"),
            chat_endpoint: get("chatgpt_api_endpoint"),
            gpt_model: get("gpt_model"),
            model_override: get("chatgpt_model_override"),
            system_prompt: get("system_prompt"),
            max_context,
            timeout: Duration::from_secs(timeout),
            storage_secret: get("storage_secret"),
            ..Self::new(data_dir, cache_dir)
        })
    }

    /// Create both directories if they do not exist yet.
    ///
    /// # Errors
    /// Returns error if a directory cannot be created.
    pub fn ensure_dirs(&self) -> Result<(), ConfigError> {
        for dir in [&self.data_dir, &self.cache_dir] {
            std::fs::create_dir_all(dir).map_err(|source| ConfigError::CreateDir {
                path: dir.clone(),
                source,
            })?;
        }
        Ok(())
    }

    /// Model to request, preferring the override.
    #[must_use]
    pub fn model(&self) -> Option<&str> {
        self.model_override
            .as_deref()
            .or(self.gpt_model.as_deref())
    }

    /// Encryption envelope derived from the storage secret.
    #[must_use]
    pub fn envelope(&self) -> Envelope {
        self.storage_secret
            .as_deref()
            .map_or_else(Envelope::plaintext, Envelope::from_secret)
    }

    #[must_use]
    pub fn chat_file(&self) -> PathBuf {
        self.data_dir.join(CHAT_FILE)
    }

    #[must_use]
    pub fn stream_file(&self) -> PathBuf {
        self.cache_dir.join(STREAM_FILE)
    }

    #[must_use]
    pub fn pid_file(&self) -> PathBuf {
        self.cache_dir.join(PID_FILE)
    }

    #[must_use]
    pub fn worker_log_file(&self) -> PathBuf {
        self.cache_dir.join(WORKER_LOG_FILE)
    }
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("data_dir", &self.data_dir)
            .field("cache_dir", &self.cache_dir)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("org_id", &self.org_id)
            .field("chat_endpoint", &self.chat_endpoint)
            .field("gpt_model", &self.gpt_model)
            .field("model_override", &self.model_override)
            .field("max_context", &self.max_context)
            .field("timeout", &self.timeout)
            .field("encrypted", &self.storage_secret.is_some())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_vars() -> Vec<(&'static str, &'static str)> {
        vec![
            ("alfred_workflow_data", "/tmp/data"),
            ("alfred_workflow_cache", "/tmp/cache"),
        ]
    }

    #[test]
    fn test_defaults_when_unset() {
        let config = Config::from_vars(base_vars()).unwrap();
        assert_eq!(config.max_context, DEFAULT_MAX_CONTEXT);
        assert_eq!(config.timeout, Duration::from_secs(DEFAULT_TIMEOUT_SECONDS));
        assert!(config.api_key.is_none());
        assert!(config.storage_secret.is_none());
        assert_eq!(config.chat_file(), PathBuf::from("/tmp/data/chat.json"));
        assert_eq!(config.stream_file(), PathBuf::from("/tmp/cache/stream.txt"));
        assert_eq!(config.pid_file(), PathBuf::from("/tmp/cache/pid.txt"));
    }

    #[test]
    fn test_missing_directories() {
        let err = Config::from_vars(vec![("alfred_workflow_data", "/tmp/data")]).unwrap_err();
        assert!(matches!(err, ConfigError::MissingDirectories));

        let mut vars = base_vars();
        vars.push(("alfred_workflow_cache", ""));
        vars.remove(1);
        assert!(Config::from_vars(vars).is_err());
    }

    #[test]
    fn test_unparseable_integers_fall_back() {
        let mut vars = base_vars();
        vars.push(("max_context", "lots"));
        vars.push(("timeout_seconds", "soon"));
        let config = Config::from_vars(vars).unwrap();
        assert_eq!(config.max_context, DEFAULT_MAX_CONTEXT);
        assert_eq!(config.timeout, Duration::from_secs(DEFAULT_TIMEOUT_SECONDS));
    }

    #[test]
    fn test_integers_parsed() {
        let mut vars = base_vars();
        vars.push(("max_context", "-1"));
        vars.push(("timeout_seconds", " 45 "));
        let config = Config::from_vars(vars.clone()).unwrap();
        assert_eq!(config.max_context, -1);
        assert_eq!(config.timeout, Duration::from_secs(45));

        vars.push(("timeout_seconds", "-3"));
        let config = Config::from_vars(vars).unwrap();
        assert_eq!(config.timeout, Duration::ZERO);
    }

    #[test]
    fn test_model_override_wins() {
        let mut vars = base_vars();
        vars.push(("gpt_model", "gpt-4o-mini"));
        let config = Config::from_vars(vars.clone()).unwrap();
        assert_eq!(config.model(), Some("gpt-4o-mini"));

        vars.push(("chatgpt_model_override", "gpt-4.1"));
        let config = Config::from_vars(vars).unwrap();
        assert_eq!(config.model(), Some("gpt-4.1"));
    }

    #[test]
    fn test_debug_redacts_credentials() {
        let mut vars = base_vars();
        vars.push(("openai_api_key", "sk-very-secret"));
        vars.push(("storage_secret", "hunter2"));
        let rendered = format!("{:?}", Config::from_vars(vars).unwrap());
        assert!(!rendered.contains("sk-very-secret"));
        assert!(!rendered.contains("hunter2"));
    }
}
