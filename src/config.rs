//! Step configuration
//!
//! `CheckoutSettings` is the loose, deserializable form a build configuration
//! hands us. `CheckoutConfig` is what the engine runs with: it can only be
//! obtained through validation against a backend, and it never changes for the
//! lifetime of the step.

use std::collections::HashMap;
use std::fmt;
use std::time::Duration;
use serde::{Deserialize, Serialize};

use crate::error::CheckoutError;
use crate::vcs::VcsBackend;

/// Top-level checkout strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Reuse the existing workspace
    Incremental,
    /// Fresh semantics, refined by a [`Method`]
    Full,
}

impl Mode {
    pub const ALL: [Mode; 2] = [Mode::Incremental, Mode::Full];

    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::Incremental => "incremental",
            Mode::Full => "full",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|m| m.as_str() == s)
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Full-mode sub-strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Method {
    /// Wipe the workdir and clone
    Clobber,
    /// Keep a side clone up to date and copy it over the workdir
    Copy,
    /// Remove untracked files, then update
    Clean,
    /// Remove untracked and ignored files, then update
    Fresh,
}

impl Method {
    pub const ALL: [Method; 4] = [Method::Clobber, Method::Copy, Method::Clean, Method::Fresh];

    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Clobber => "clobber",
            Method::Copy => "copy",
            Method::Clean => "clean",
            Method::Fresh => "fresh",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|m| m.as_str() == s)
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Bounded retry of the initial acquisition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryConfig {
    /// Wait between a failed attempt and the next one
    pub delay: Duration,
    /// Additional attempts after the first failure
    pub attempts: u32,
}

/// Retry settings as written in configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetrySettings {
    pub delay_secs: u64,
    pub attempts: u32,
}

/// Unvalidated step settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CheckoutSettings {
    pub repourl: Option<String>,
    pub branch: Option<String>,
    pub mode: String,
    pub method: Option<String>,
    /// VCS database path, relative to the workdir
    pub database: Option<String>,
    /// Workdir relative to the builder directory
    pub workdir: String,
    pub timeout_secs: u64,
    pub retry: Option<RetrySettings>,
    pub env: HashMap<String, String>,
    pub log_environ: bool,
    /// Ask the VCS for progress output
    pub progress: bool,
    pub codebase: String,
    /// Skip source stamp resolution and always check out the branch head
    pub always_use_latest: bool,
    /// Dry run: report the step as skipped without touching the worker
    pub not_really: bool,
}

impl Default for CheckoutSettings {
    fn default() -> Self {
        Self {
            repourl: None,
            branch: None,
            mode: Mode::Incremental.as_str().to_string(),
            method: None,
            database: None,
            workdir: "build".to_string(),
            timeout_secs: 20 * 60,
            retry: None,
            env: HashMap::new(),
            log_environ: true,
            progress: false,
            codebase: String::new(),
            always_use_latest: false,
            not_really: false,
        }
    }
}

impl CheckoutSettings {
    pub fn new(repourl: impl Into<String>) -> Self {
        Self {
            repourl: Some(repourl.into()),
            ..Self::default()
        }
    }

    pub fn from_json(json: &str) -> Result<Self, CheckoutError> {
        serde_json::from_str(json)
            .map_err(|e| CheckoutError::config(format!("invalid settings: {}", e)))
    }
}

/// Validated, immutable step configuration
#[derive(Debug, Clone)]
pub struct CheckoutConfig {
    mode: Mode,
    method: Option<Method>,
    repourl: String,
    branch: Option<String>,
    database: String,
    workdir: String,
    timeout: Duration,
    retry: Option<RetryConfig>,
    env: HashMap<String, String>,
    log_environ: bool,
    progress: bool,
    codebase: String,
    always_use_latest: bool,
    not_really: bool,
}

impl CheckoutConfig {
    /// Validate settings for `backend`, collecting every problem found
    pub fn from_settings(
        settings: CheckoutSettings,
        backend: &dyn VcsBackend,
    ) -> Result<Self, CheckoutError> {
        let mut errors = Vec::new();

        let mode = Mode::parse(&settings.mode);
        if mode.is_none() {
            errors.push(format!(
                "mode {} is not one of ({}, {})",
                settings.mode,
                Mode::Incremental,
                Mode::Full
            ));
        }

        let mut method = None;
        match (mode, settings.method.as_deref()) {
            (Some(Mode::Incremental), Some(_)) => {
                errors.push("Incremental mode does not require method".to_string());
            }
            (Some(Mode::Full), None) => method = Some(Method::Copy),
            (Some(Mode::Full), Some(name)) => match Method::parse(name) {
                Some(m) if backend.supported_methods().contains(&m) => method = Some(m),
                _ => errors.push(format!("Invalid method {} for mode == full", name)),
            },
            _ => {}
        }

        let repourl = settings.repourl.unwrap_or_default();
        if repourl.is_empty() {
            errors.push("you must provide repourl".to_string());
        }
        if backend.requires_branch() && settings.branch.is_none() {
            errors.push("you must provide branch".to_string());
        }
        if settings.workdir.is_empty() {
            errors.push("workdir must not be empty".to_string());
        }

        if !errors.is_empty() {
            return Err(CheckoutError::Configuration(errors));
        }

        Ok(Self {
            // validated above
            mode: mode.unwrap_or(Mode::Incremental),
            method,
            repourl,
            branch: settings.branch,
            database: settings
                .database
                .unwrap_or_else(|| backend.default_database().to_string()),
            workdir: settings.workdir,
            timeout: Duration::from_secs(settings.timeout_secs),
            retry: settings.retry.map(|r| RetryConfig {
                delay: Duration::from_secs(r.delay_secs),
                attempts: r.attempts,
            }),
            env: settings.env,
            log_environ: settings.log_environ,
            progress: settings.progress,
            codebase: settings.codebase,
            always_use_latest: settings.always_use_latest,
            not_really: settings.not_really,
        })
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    /// Always `Some` in full mode, always `None` in incremental mode
    pub fn method(&self) -> Option<Method> {
        self.method
    }

    pub fn repourl(&self) -> &str {
        &self.repourl
    }

    pub fn branch(&self) -> Option<&str> {
        self.branch.as_deref()
    }

    pub fn database(&self) -> &str {
        &self.database
    }

    pub fn workdir(&self) -> &str {
        &self.workdir
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn retry(&self) -> Option<RetryConfig> {
        self.retry
    }

    pub fn env(&self) -> &HashMap<String, String> {
        &self.env
    }

    pub fn log_environ(&self) -> bool {
        self.log_environ
    }

    pub fn progress(&self) -> bool {
        self.progress
    }

    pub fn codebase(&self) -> &str {
        &self.codebase
    }

    pub fn always_use_latest(&self) -> bool {
        self.always_use_latest
    }

    pub fn not_really(&self) -> bool {
        self.not_really
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vcs::{Darcs, Monotone};

    fn mtn_settings() -> CheckoutSettings {
        CheckoutSettings {
            branch: Some("master".to_string()),
            ..CheckoutSettings::new("mtn://localhost/monotone")
        }
    }

    #[test]
    fn test_defaults() {
        let config = CheckoutConfig::from_settings(mtn_settings(), &Monotone).unwrap();

        assert_eq!(config.mode(), Mode::Incremental);
        assert_eq!(config.method(), None);
        assert_eq!(config.database(), "../db.mtn");
        assert_eq!(config.workdir(), "build");
        assert_eq!(config.timeout(), Duration::from_secs(1200));
        assert!(config.retry().is_none());
        assert!(config.log_environ());
    }

    #[test]
    fn test_full_mode_defaults_to_copy() {
        let settings = CheckoutSettings {
            mode: "full".to_string(),
            ..mtn_settings()
        };
        let config = CheckoutConfig::from_settings(settings, &Monotone).unwrap();
        assert_eq!(config.method(), Some(Method::Copy));
    }

    #[test]
    fn test_incremental_with_method_rejected() {
        let settings = CheckoutSettings {
            method: Some("clobber".to_string()),
            ..mtn_settings()
        };
        let err = CheckoutConfig::from_settings(settings, &Monotone).unwrap_err();
        assert!(err.to_string().contains("Incremental mode does not require method"));
    }

    #[test]
    fn test_unknown_mode_rejected() {
        let settings = CheckoutSettings {
            mode: "export".to_string(),
            ..mtn_settings()
        };
        let err = CheckoutConfig::from_settings(settings, &Monotone).unwrap_err();
        assert!(err.to_string().contains("mode export is not one of"));
    }

    #[test]
    fn test_method_must_be_supported_by_backend() {
        let settings = CheckoutSettings {
            mode: "full".to_string(),
            method: Some("clean".to_string()),
            ..CheckoutSettings::new("http://localhost/darcs")
        };
        let err = CheckoutConfig::from_settings(settings, &Darcs).unwrap_err();
        assert!(err.to_string().contains("Invalid method clean"));
    }

    #[test]
    fn test_all_errors_collected() {
        let err = CheckoutConfig::from_settings(CheckoutSettings::default(), &Monotone).unwrap_err();
        match err {
            CheckoutError::Configuration(errors) => {
                assert_eq!(
                    errors,
                    vec![
                        "you must provide repourl".to_string(),
                        "you must provide branch".to_string(),
                    ]
                );
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_darcs_needs_no_branch() {
        let settings = CheckoutSettings::new("http://localhost/darcs");
        assert!(CheckoutConfig::from_settings(settings, &Darcs).is_ok());
    }

    #[test]
    fn test_settings_from_json() {
        let settings = CheckoutSettings::from_json(
            r#"{
                "repourl": "mtn://localhost/monotone",
                "branch": "master",
                "mode": "full",
                "method": "clobber",
                "retry": {"delay_secs": 5, "attempts": 2}
            }"#,
        )
        .unwrap();
        let config = CheckoutConfig::from_settings(settings, &Monotone).unwrap();

        assert_eq!(config.method(), Some(Method::Clobber));
        assert_eq!(
            config.retry(),
            Some(RetryConfig {
                delay: Duration::from_secs(5),
                attempts: 2
            })
        );
        assert_eq!(config.workdir(), "build");
    }

    #[test]
    fn test_settings_from_bad_json() {
        let err = CheckoutSettings::from_json("{\"mode\": 3}").unwrap_err();
        assert!(matches!(err, CheckoutError::Configuration(_)));
    }
}
