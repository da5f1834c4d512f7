//! Run configuration: API key and tunables.
//!
//! Values come from, in order of precedence: explicit overrides (CLI flags),
//! the process environment, then a `KEY=value` file (`--env-file`, or a `.env`
//! discovered in the current directory or one of its ancestors). File values
//! never override the environment, and the process environment is never
//! modified.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::api::gemini::{DEFAULT_BASE_URL, DEFAULT_MODEL, DEFAULT_REQUEST_TIMEOUT};
use crate::api::{GeminiClient, GeminiClientBuilder};
use crate::error::{MediaSightError, Result};

/// Primary API key variable.
pub const API_KEY_VAR: &str = "GEMINI_API_KEY";
/// Secondary API key variable, shared with other Google tooling.
pub const FALLBACK_API_KEY_VAR: &str = "GOOGLE_API_KEY";

const MODEL_VAR: &str = "GEMINI_MODEL";
const BASE_URL_VAR: &str = "GEMINI_BASE_URL";
const POLL_INTERVAL_VAR: &str = "MEDIASIGHT_POLL_INTERVAL_SECS";
const MAX_WAIT_VAR: &str = "MEDIASIGHT_MAX_WAIT_SECS";
const REQUEST_TIMEOUT_VAR: &str = "MEDIASIGHT_REQUEST_TIMEOUT_SECS";

/// Default delay between processing-state checks.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(10);
/// Default upper bound on waiting for remote processing.
pub const DEFAULT_MAX_WAIT: Duration = Duration::from_secs(600);

/// Values supplied on the command line; `None` defers to the environment.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    /// API key.
    pub api_key: Option<String>,
    /// Explicit env file; replaces `.env` discovery.
    pub env_file: Option<PathBuf>,
    /// Model identifier.
    pub model: Option<String>,
    /// Delay between state checks.
    pub poll_interval: Option<Duration>,
    /// Maximum wait for remote processing.
    pub max_wait: Option<Duration>,
    /// Per-request timeout.
    pub request_timeout: Option<Duration>,
}

/// Resolved configuration for one run.
#[derive(Clone)]
pub struct Config {
    api_key: String,
    /// Model identifier.
    pub model: String,
    /// API root URL.
    pub base_url: String,
    /// Delay between state checks.
    pub poll_interval: Duration,
    /// Maximum wait for remote processing.
    pub max_wait: Duration,
    /// Per-request timeout.
    pub request_timeout: Duration,
}

/// A source of configuration variables, such as the process environment.
pub type VarSource<'a> = dyn Fn(&str) -> Option<String> + 'a;

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("api_key", &"[REDACTED]")
            .field("model", &self.model)
            .field("base_url", &self.base_url)
            .field("poll_interval", &self.poll_interval)
            .field("max_wait", &self.max_wait)
            .field("request_timeout", &self.request_timeout)
            .finish()
    }
}

impl Config {
    /// Loads configuration from overrides, the process environment and an env file.
    pub fn load(overrides: ConfigOverrides) -> Result<Self> {
        let file_vars = match &overrides.env_file {
            Some(path) => read_env_file(path)?,
            None => discover_env_file(),
        };
        let process = |name: &str| std::env::var(name).ok();
        let file = |name: &str| file_vars.get(name).cloned();
        let sources: [&VarSource<'_>; 2] = [&process, &file];
        Self::resolve_layered(overrides, &sources)
    }

    /// Resolves configuration against an arbitrary variable lookup.
    pub fn resolve<F>(overrides: ConfigOverrides, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let source: &VarSource<'_> = &lookup;
        Self::resolve_layered(overrides, &[source])
    }

    /// Resolves configuration against variable sources in priority order.
    ///
    /// All names for a setting are tried in one source before moving to the
    /// next, so a file value never shadows the process environment.
    pub fn resolve_layered(
        overrides: ConfigOverrides,
        sources: &[&VarSource<'_>],
    ) -> Result<Self> {
        let non_empty = |v: Option<String>| v.filter(|v| !v.trim().is_empty());
        let lookup = |name: &str| sources.iter().find_map(|source| non_empty(source(name)));

        let api_key = overrides
            .api_key
            .filter(|k| !k.trim().is_empty())
            .or_else(|| {
                sources.iter().find_map(|source| {
                    non_empty(source(API_KEY_VAR))
                        .or_else(|| non_empty(source(FALLBACK_API_KEY_VAR)))
                })
            })
            .map(|k| k.trim().to_string())
            .ok_or(MediaSightError::MissingApiKey { var: API_KEY_VAR })?;

        let model = overrides
            .model
            .or_else(|| lookup(MODEL_VAR))
            .unwrap_or_else(|| DEFAULT_MODEL.to_string());
        let base_url = lookup(BASE_URL_VAR).unwrap_or_else(|| DEFAULT_BASE_URL.to_string());

        let poll_interval = match overrides.poll_interval {
            Some(d) => d,
            None => seconds_var(&lookup, POLL_INTERVAL_VAR)?.unwrap_or(DEFAULT_POLL_INTERVAL),
        };
        if poll_interval.is_zero() {
            return Err(MediaSightError::InvalidSetting {
                name: "poll interval".into(),
                reason: "must be greater than zero".into(),
            });
        }
        let max_wait = match overrides.max_wait {
            Some(d) => d,
            None => seconds_var(&lookup, MAX_WAIT_VAR)?.unwrap_or(DEFAULT_MAX_WAIT),
        };
        let request_timeout = match overrides.request_timeout {
            Some(d) => d,
            None => {
                seconds_var(&lookup, REQUEST_TIMEOUT_VAR)?.unwrap_or(DEFAULT_REQUEST_TIMEOUT)
            }
        };

        Ok(Self {
            api_key,
            model,
            base_url,
            poll_interval,
            max_wait,
            request_timeout,
        })
    }

    /// The resolved API key.
    pub fn api_key(&self) -> &str {
        &self.api_key
    }

    /// Builds a Gemini client from this configuration.
    pub fn gemini_client(&self) -> Result<GeminiClient> {
        GeminiClientBuilder::new()
            .api_key(self.api_key.clone())
            .model(self.model.clone())
            .base_url(self.base_url.clone())
            .request_timeout(self.request_timeout)
            .build()
    }
}

fn seconds_var<F>(lookup: &F, name: &str) -> Result<Option<Duration>>
where
    F: Fn(&str) -> Option<String>,
{
    let Some(raw) = lookup(name) else {
        return Ok(None);
    };
    raw.trim()
        .parse::<f64>()
        .ok()
        .and_then(|secs| Duration::try_from_secs_f64(secs).ok())
        .map(Some)
        .ok_or_else(|| MediaSightError::InvalidSetting {
            name: name.to_string(),
            reason: format!("expected a number of seconds, got {raw:?}"),
        })
}

fn read_env_file(path: &Path) -> Result<HashMap<String, String>> {
    if !path.is_file() {
        return Err(MediaSightError::FileNotFound(path.to_path_buf()));
    }
    let iter = dotenvy::from_path_iter(path).map_err(|e| env_file_error(path, e))?;
    collect_vars(path, iter)
}

fn discover_env_file() -> HashMap<String, String> {
    let Ok(iter) = dotenvy::dotenv_iter() else {
        return HashMap::new();
    };
    match collect_vars(Path::new(".env"), iter) {
        Ok(vars) => vars,
        Err(err) => {
            tracing::warn!(error = %err, "ignoring unreadable .env file");
            HashMap::new()
        }
    }
}

fn collect_vars<R: std::io::Read>(
    path: &Path,
    iter: dotenvy::Iter<R>,
) -> Result<HashMap<String, String>> {
    let mut vars = HashMap::new();
    for item in iter {
        let (key, value) = item.map_err(|e| env_file_error(path, e))?;
        vars.insert(key, value);
    }
    tracing::debug!(file = %path.display(), count = vars.len(), "loaded env file");
    Ok(vars)
}

fn env_file_error(path: &Path, err: dotenvy::Error) -> MediaSightError {
    MediaSightError::InvalidSetting {
        name: path.display().to_string(),
        reason: err.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use std::io::Write;

    fn vars(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn test_missing_key_is_config_error() {
        let err = Config::resolve(ConfigOverrides::default(), vars(&[])).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Config);
        assert_eq!(err.kind_label(), "ConfigError: MissingAPIKey");
    }

    #[test]
    fn test_empty_key_counts_as_missing() {
        let err = Config::resolve(
            ConfigOverrides {
                api_key: Some("  ".into()),
                ..Default::default()
            },
            vars(&[(API_KEY_VAR, "")]),
        )
        .unwrap_err();
        assert!(matches!(err, MediaSightError::MissingApiKey { .. }));
    }

    #[test]
    fn test_key_precedence() {
        let config = Config::resolve(
            ConfigOverrides::default(),
            vars(&[(API_KEY_VAR, "primary"), (FALLBACK_API_KEY_VAR, "fallback")]),
        )
        .unwrap();
        assert_eq!(config.api_key(), "primary");

        let config = Config::resolve(
            ConfigOverrides::default(),
            vars(&[(FALLBACK_API_KEY_VAR, "fallback")]),
        )
        .unwrap();
        assert_eq!(config.api_key(), "fallback");

        let config = Config::resolve(
            ConfigOverrides {
                api_key: Some("flag".into()),
                ..Default::default()
            },
            vars(&[(API_KEY_VAR, "primary")]),
        )
        .unwrap();
        assert_eq!(config.api_key(), "flag");
    }

    #[test]
    fn test_file_key_never_beats_process_env() {
        let process = vars(&[(FALLBACK_API_KEY_VAR, "from-env")]);
        let file = vars(&[(API_KEY_VAR, "from-file"), (MODEL_VAR, "file-model")]);
        let sources: [&VarSource<'_>; 2] = [&process, &file];
        let config = Config::resolve_layered(ConfigOverrides::default(), &sources).unwrap();
        assert_eq!(config.api_key(), "from-env");
        assert_eq!(config.model, "file-model");

        let empty = vars(&[]);
        let sources: [&VarSource<'_>; 2] = [&empty, &file];
        let config = Config::resolve_layered(ConfigOverrides::default(), &sources).unwrap();
        assert_eq!(config.api_key(), "from-file");
    }

    #[test]
    fn test_defaults() {
        let config = Config::resolve(ConfigOverrides::default(), vars(&[(API_KEY_VAR, "k")]))
            .unwrap();
        assert_eq!(config.model, DEFAULT_MODEL);
        assert_eq!(config.base_url, DEFAULT_BASE_URL);
        assert_eq!(config.poll_interval, DEFAULT_POLL_INTERVAL);
        assert_eq!(config.max_wait, DEFAULT_MAX_WAIT);
        assert_eq!(config.request_timeout, DEFAULT_REQUEST_TIMEOUT);
    }

    #[test]
    fn test_env_settings_and_overrides() {
        let lookup = vars(&[
            (API_KEY_VAR, "k"),
            (MODEL_VAR, "gemini-1.5-pro"),
            (POLL_INTERVAL_VAR, "2.5"),
            (MAX_WAIT_VAR, "30"),
        ]);
        let config = Config::resolve(
            ConfigOverrides {
                max_wait: Some(Duration::from_secs(5)),
                ..Default::default()
            },
            lookup,
        )
        .unwrap();
        assert_eq!(config.model, "gemini-1.5-pro");
        assert_eq!(config.poll_interval, Duration::from_millis(2500));
        assert_eq!(config.max_wait, Duration::from_secs(5));
    }

    #[test]
    fn test_invalid_durations() {
        let err = Config::resolve(
            ConfigOverrides::default(),
            vars(&[(API_KEY_VAR, "k"), (MAX_WAIT_VAR, "soon")]),
        )
        .unwrap_err();
        assert_eq!(err.kind_label(), "ConfigError: InvalidSetting");

        let err = Config::resolve(
            ConfigOverrides {
                poll_interval: Some(Duration::ZERO),
                ..Default::default()
            },
            vars(&[(API_KEY_VAR, "k")]),
        )
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Config);
    }

    #[test]
    fn test_debug_redacts_key() {
        let config = Config::resolve(
            ConfigOverrides::default(),
            vars(&[(API_KEY_VAR, "super-secret")]),
        )
        .unwrap();
        assert!(!format!("{config:?}").contains("super-secret"));
    }

    #[test]
    fn test_read_env_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("secrets.env");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "# local secrets").unwrap();
        writeln!(file, "GEMINI_API_KEY=from-file").unwrap();
        writeln!(file, "MEDIASIGHT_MAX_WAIT_SECS=42").unwrap();
        drop(file);

        let file_vars = read_env_file(&path).unwrap();
        assert_eq!(file_vars.get("GEMINI_API_KEY").unwrap(), "from-file");

        let config = Config::resolve(ConfigOverrides::default(), |name| {
            file_vars.get(name).cloned()
        })
        .unwrap();
        assert_eq!(config.api_key(), "from-file");
        assert_eq!(config.max_wait, Duration::from_secs(42));
    }

    #[test]
    fn test_missing_env_file() {
        let err = read_env_file(Path::new("/definitely/not/here.env")).unwrap_err();
        assert_eq!(err.kind_label(), "IOError: FileNotFound");
    }
}
