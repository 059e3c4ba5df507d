use pylayer_domain::ManifestError;
use serde::Serialize;
use serde_json::{json, Value};

use crate::outcome::{CommandStatus, ExecutionOutcome};

/// Failure categories surfaced to callers. None are retried.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Serialize, strum::Display, strum::IntoStaticStr,
)]
pub enum BuildErrorKind {
    ManifestInvalid,
    StagingConflict,
    EnvironmentUnavailable,
    InstallFailure,
    ArchiveFailure,
    CleanupFailure,
}

impl BuildErrorKind {
    #[must_use]
    pub fn status(self) -> CommandStatus {
        match self {
            BuildErrorKind::ManifestInvalid | BuildErrorKind::StagingConflict => {
                CommandStatus::UserError
            }
            BuildErrorKind::EnvironmentUnavailable
            | BuildErrorKind::InstallFailure
            | BuildErrorKind::ArchiveFailure
            | BuildErrorKind::CleanupFailure => CommandStatus::Failure,
        }
    }
}

#[derive(thiserror::Error, Debug)]
#[error("{kind}: {message}")]
pub struct BuildError {
    kind: BuildErrorKind,
    message: String,
    details: Value,
}

impl BuildError {
    /// Error of `kind`; `details` gains a `"kind"` entry.
    #[must_use]
    pub fn new(kind: BuildErrorKind, message: impl Into<String>, details: Value) -> Self {
        build_error(kind, &message.into(), details)
    }

    #[must_use]
    pub fn kind(&self) -> BuildErrorKind {
        self.kind
    }

    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    #[must_use]
    pub fn details(&self) -> &Value {
        &self.details
    }

    /// Originating cause, when one was recorded.
    #[must_use]
    pub fn cause(&self) -> Option<&str> {
        self.details.get("error").and_then(Value::as_str)
    }

    pub(crate) fn with_detail(mut self, key: &str, value: Value) -> Self {
        if let Value::Object(map) = &mut self.details {
            map.insert(key.to_string(), value);
        }
        self
    }

    #[must_use]
    pub fn to_outcome(&self) -> ExecutionOutcome {
        ExecutionOutcome {
            status: self.kind.status(),
            message: self.to_string(),
            details: self.details.clone(),
        }
    }
}

pub(crate) fn build_error(kind: BuildErrorKind, message: &str, details: Value) -> BuildError {
    let mut merged = details;
    let label: &'static str = kind.into();
    match merged {
        Value::Object(ref mut map) => {
            map.insert("kind".into(), Value::String(label.to_string()));
        }
        _ => {
            merged = json!({
                "kind": label,
                "details": merged,
            });
        }
    }
    BuildError {
        kind,
        message: message.to_string(),
        details: merged,
    }
}

impl From<ManifestError> for BuildError {
    fn from(err: ManifestError) -> Self {
        let path = match &err {
            ManifestError::Io { path, .. }
            | ManifestError::InvalidRequirement { path, .. }
            | ManifestError::UnsupportedOption { path, .. }
            | ManifestError::Empty { path } => Some(path.display().to_string()),
            ManifestError::Duplicate { .. } => None,
        };
        build_error(
            BuildErrorKind::ManifestInvalid,
            "dependency manifest is invalid",
            json!({
                "error": err.to_string(),
                "path": path,
                "hint": "list one PEP 508 requirement per line; -r includes are allowed",
            }),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn details_carry_kind_and_cause() {
        let err = build_error(
            BuildErrorKind::InstallFailure,
            "dependency install failed",
            json!({ "error": "exit status 1" }),
        );
        assert_eq!(err.kind(), BuildErrorKind::InstallFailure);
        assert_eq!(err.details()["kind"], "InstallFailure");
        assert_eq!(err.cause(), Some("exit status 1"));
        assert_eq!(
            err.to_string(),
            "InstallFailure: dependency install failed"
        );
    }

    #[test]
    fn non_object_details_are_wrapped() {
        let err = build_error(BuildErrorKind::ArchiveFailure, "zip failed", json!("disk full"));
        assert_eq!(err.details()["details"], "disk full");
        assert_eq!(err.details()["kind"], "ArchiveFailure");
    }

    #[test]
    fn outcome_status_follows_kind() {
        let conflict = build_error(BuildErrorKind::StagingConflict, "busy", json!({}));
        assert_eq!(conflict.to_outcome().status, CommandStatus::UserError);
        let cleanup = build_error(BuildErrorKind::CleanupFailure, "stuck", json!({}));
        assert_eq!(cleanup.to_outcome().status, CommandStatus::Failure);
        assert!(cleanup.to_outcome().message.starts_with("CleanupFailure:"));
    }

    #[test]
    fn manifest_errors_become_manifest_invalid() {
        let err: BuildError = ManifestError::Duplicate {
            name: "requests".into(),
        }
        .into();
        assert_eq!(err.kind(), BuildErrorKind::ManifestInvalid);
        assert!(err.cause().unwrap_or_default().contains("requests"));
    }
}
