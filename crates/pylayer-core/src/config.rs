use std::collections::HashMap;
use std::env;
use std::time::Duration;

use anyhow::{bail, Result};

pub const DEFAULT_INSTALL_TIMEOUT: Duration = Duration::from_secs(900);
pub const DEFAULT_MAX_CAPTURE_BYTES: usize = 1024 * 1024;

#[derive(Debug, Clone)]
pub struct EnvSnapshot {
    vars: HashMap<String, String>,
}

impl EnvSnapshot {
    #[must_use]
    pub fn capture() -> Self {
        Self {
            vars: env::vars().collect(),
        }
    }

    pub fn var(&self, key: &str) -> Option<&str> {
        self.vars.get(key).map(String::as_str)
    }

    /// Non-empty, trimmed value of `key`.
    pub fn value(&self, key: &str) -> Option<&str> {
        self.var(key).map(str::trim).filter(|value| !value.is_empty())
    }

    #[cfg(test)]
    pub(crate) fn testing(pairs: &[(&str, &str)]) -> Self {
        let vars = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        Self { vars }
    }
}

/// Settings shared by every build in one invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildConfig {
    pub backend: Option<String>,
    pub image: Option<String>,
    pub install_timeout: Duration,
    pub max_capture_bytes: usize,
    pub source_date_epoch: Option<i64>,
    pub log_timings: bool,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            backend: None,
            image: None,
            install_timeout: DEFAULT_INSTALL_TIMEOUT,
            max_capture_bytes: DEFAULT_MAX_CAPTURE_BYTES,
            source_date_epoch: None,
            log_timings: false,
        }
    }
}

impl BuildConfig {
    /// Reads configuration from the current process environment.
    ///
    /// # Errors
    /// Returns an error when a configured value cannot be parsed.
    pub fn from_env() -> Result<Self> {
        Self::from_snapshot(&EnvSnapshot::capture())
    }

    pub(crate) fn from_snapshot(snapshot: &EnvSnapshot) -> Result<Self> {
        let install_timeout = match snapshot.value("PYLAYER_INSTALL_TIMEOUT") {
            Some(raw) => parse_timeout_secs(raw)?,
            None => DEFAULT_INSTALL_TIMEOUT,
        };
        let max_capture_bytes = snapshot
            .value("PYLAYER_MAX_CAPTURE_BYTES")
            .and_then(|raw| raw.parse::<usize>().ok())
            .filter(|value| *value > 0)
            .unwrap_or(DEFAULT_MAX_CAPTURE_BYTES);
        let source_date_epoch = match snapshot.value("SOURCE_DATE_EPOCH") {
            Some(raw) => match raw.parse::<i64>() {
                Ok(epoch) => Some(epoch),
                Err(_) => bail!("SOURCE_DATE_EPOCH must be an integer, got `{raw}`"),
            },
            None => None,
        };
        Ok(Self {
            backend: snapshot.value("PYLAYER_BACKEND").map(ToOwned::to_owned),
            image: snapshot.value("PYLAYER_IMAGE").map(ToOwned::to_owned),
            install_timeout,
            max_capture_bytes,
            source_date_epoch,
            log_timings: snapshot.value("PYLAYER_TIMINGS").is_some_and(is_enabled),
        })
    }
}

fn is_enabled(raw: &str) -> bool {
    !matches!(
        raw.to_ascii_lowercase().as_str(),
        "0" | "false" | "no" | "off"
    )
}

/// Parse a positive whole number of seconds.
///
/// # Errors
/// Returns an error for zero, negative, or non-numeric input.
pub fn parse_timeout_secs(raw: &str) -> Result<Duration> {
    match raw.trim().parse::<u64>() {
        Ok(secs) if secs > 0 => Ok(Duration::from_secs(secs)),
        _ => bail!("install timeout must be a positive number of seconds, got `{raw}`"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn from_env_reads_process_environment() -> Result<()> {
        env::set_var("PYLAYER_INSTALL_TIMEOUT", "45");
        env::set_var("SOURCE_DATE_EPOCH", "1600000000");
        let config = BuildConfig::from_env();
        env::remove_var("PYLAYER_INSTALL_TIMEOUT");
        env::remove_var("SOURCE_DATE_EPOCH");
        let config = config?;
        assert_eq!(config.install_timeout, Duration::from_secs(45));
        assert_eq!(config.source_date_epoch, Some(1_600_000_000));
        Ok(())
    }

    #[test]
    fn defaults_apply_when_unset() -> Result<()> {
        let config = BuildConfig::from_snapshot(&EnvSnapshot::testing(&[]))?;
        assert_eq!(config, BuildConfig::default());
        Ok(())
    }

    #[test]
    fn reads_overrides_from_environment() -> Result<()> {
        let snapshot = EnvSnapshot::testing(&[
            ("PYLAYER_BACKEND", " podman "),
            ("PYLAYER_IMAGE", "registry.local/build-python3.9"),
            ("PYLAYER_INSTALL_TIMEOUT", "30"),
            ("PYLAYER_MAX_CAPTURE_BYTES", "4096"),
            ("SOURCE_DATE_EPOCH", "1700000000"),
        ]);
        let config = BuildConfig::from_snapshot(&snapshot)?;
        assert_eq!(config.backend.as_deref(), Some("podman"));
        assert_eq!(
            config.image.as_deref(),
            Some("registry.local/build-python3.9")
        );
        assert_eq!(config.install_timeout, Duration::from_secs(30));
        assert_eq!(config.max_capture_bytes, 4096);
        assert_eq!(config.source_date_epoch, Some(1_700_000_000));
        Ok(())
    }

    #[test]
    fn rejects_invalid_timeout_and_epoch() {
        let zero = EnvSnapshot::testing(&[("PYLAYER_INSTALL_TIMEOUT", "0")]);
        assert!(BuildConfig::from_snapshot(&zero).is_err());
        let words = EnvSnapshot::testing(&[("PYLAYER_INSTALL_TIMEOUT", "soon")]);
        assert!(BuildConfig::from_snapshot(&words).is_err());
        let epoch = EnvSnapshot::testing(&[("SOURCE_DATE_EPOCH", "yesterday")]);
        assert!(BuildConfig::from_snapshot(&epoch).is_err());
    }

    #[test]
    fn timings_flag_accepts_common_spellings() -> Result<()> {
        for (raw, expected) in [("1", true), ("yes", true), ("OFF", false), ("0", false), (" ", false)] {
            let snapshot = EnvSnapshot::testing(&[("PYLAYER_TIMINGS", raw)]);
            assert_eq!(BuildConfig::from_snapshot(&snapshot)?.log_timings, expected, "{raw:?}");
        }
        Ok(())
    }

    #[test]
    fn blank_values_are_ignored() -> Result<()> {
        let snapshot = EnvSnapshot::testing(&[("PYLAYER_BACKEND", "  "), ("PYLAYER_IMAGE", "")]);
        let config = BuildConfig::from_snapshot(&snapshot)?;
        assert!(config.backend.is_none());
        assert!(config.image.is_none());
        Ok(())
    }
}
