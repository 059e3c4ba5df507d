use std::path::Path;
use std::time::Duration;

use pylayer_domain::{Architecture, RuntimeId};
use serde::Serialize;

use crate::error::BuildError;

/// Name of the normalized manifest written into the staging directory.
pub const REQUIREMENTS_FILE: &str = "requirements.txt";

/// One dependency install into a staging directory.
///
/// `requirements_file` and `site_packages` are relative to `staging`.
#[derive(Debug, Clone, Copy)]
pub struct InstallJob<'a> {
    pub staging: &'a Path,
    pub requirements_file: &'a str,
    pub site_packages: &'a str,
    pub runtime: RuntimeId,
    pub arch: Architecture,
    pub timeout: Duration,
}

/// What ran the install, for build reports.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InstallReceipt {
    pub backend: String,
    pub image: String,
}

/// Installs a manifest's dependencies in an environment matching the target runtime.
pub trait IsolatedInstaller {
    /// # Errors
    ///
    /// Returns `EnvironmentUnavailable` when no matching environment can be
    /// started and `InstallFailure` when the install itself fails or times out.
    fn install(&self, job: &InstallJob<'_>) -> Result<InstallReceipt, BuildError>;
}

impl<T: IsolatedInstaller + ?Sized> IsolatedInstaller for &T {
    fn install(&self, job: &InstallJob<'_>) -> Result<InstallReceipt, BuildError> {
        (**self).install(job)
    }
}
