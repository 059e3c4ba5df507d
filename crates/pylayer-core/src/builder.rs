use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use pylayer_domain::{Architecture, DependencyManifest, RuntimeId};
use serde::Serialize;
use serde_json::{json, Value};

use crate::archive::{archive_timestamp, write_layer_archive, ArchiveSummary};
use crate::config::BuildConfig;
use crate::error::{build_error, BuildError, BuildErrorKind};
use crate::fs::remove_path;
use crate::installer::{InstallJob, InstallReceipt, IsolatedInstaller, REQUIREMENTS_FILE};
use crate::lock::BuildLock;
use crate::staging::{clear_stale_file, OutputPaths, StagingDir};
use crate::timings::{millis, Phase, PhaseClock, PhaseTimings};

/// Inputs of one layer build.
#[derive(Debug, Clone)]
pub struct BuildRequest {
    pub manifest: DependencyManifest,
    pub runtime: RuntimeId,
    pub arch: Architecture,
    pub output: PathBuf,
}

#[derive(Debug, Clone, Serialize)]
pub struct BuildReport {
    pub output: PathBuf,
    pub runtime: RuntimeId,
    pub arch: Architecture,
    pub fingerprint: String,
    pub dependencies: Vec<String>,
    pub backend: String,
    pub image: String,
    pub archive: ArchiveSummary,
    pub phases: PhaseTimings,
    pub total_ms: u64,
}

struct StagedBuild {
    receipt: InstallReceipt,
    archive: ArchiveSummary,
}

/// Produces one layer archive per `build` call.
///
/// Builds of the same output path are serialized through a lock file next to
/// the output; a build that finds the lock held fails instead of waiting.
#[derive(Debug, Clone)]
pub struct LayerBuilder<I> {
    installer: I,
    install_timeout: Duration,
    source_date_epoch: Option<i64>,
    log_timings: bool,
}

impl<I: IsolatedInstaller> LayerBuilder<I> {
    pub fn new(installer: I, config: &BuildConfig) -> Self {
        Self {
            installer,
            install_timeout: config.install_timeout,
            source_date_epoch: config.source_date_epoch,
            log_timings: config.log_timings,
        }
    }

    /// Install `request.manifest` for the target runtime and zip it to `request.output`.
    ///
    /// # Errors
    ///
    /// Returns `StagingConflict` when the output path is busy or stale artifacts
    /// cannot be removed, `EnvironmentUnavailable`/`InstallFailure` from the
    /// installer, `ArchiveFailure` when zipping fails, and `CleanupFailure` when
    /// the staging directory survives a build. No archive exists after an error.
    pub fn build(&self, request: &BuildRequest) -> Result<BuildReport, BuildError> {
        let started = Instant::now();
        if request.manifest.is_empty() {
            return Err(build_error(
                BuildErrorKind::ManifestInvalid,
                "dependency manifest is empty",
                json!({
                    "path": request.manifest.source.as_ref().map(|path| path.display().to_string()),
                    "reason": "empty_manifest",
                }),
            ));
        }
        let paths = OutputPaths::for_output(&request.output).ok_or_else(|| {
            build_error(
                BuildErrorKind::StagingConflict,
                "output path must name a file",
                json!({
                    "path": request.output.display().to_string(),
                    "reason": "invalid_output_path",
                }),
            )
        })?;
        prepare_output_dir(paths.parent())?;
        let lock = acquire_lock(&paths.lock)?;
        tracing::info!(
            output = %paths.output.display(),
            runtime = request.runtime.as_str(),
            arch = request.arch.as_str(),
            dependencies = request.manifest.len(),
            "building layer"
        );

        let mut clock = PhaseClock::new(self.log_timings);
        let staged = clock.time(Phase::PreClean, || {
            clear_stale_file(&paths.partial, "partial archive")?;
            clear_stale_file(&paths.output, "output archive")?;
            StagingDir::acquire(&paths.staging)
        })?;
        let result = self.build_in(request, &paths, staged.path(), &mut clock);
        let cleanup = clock.time(Phase::PostClean, || staged.release());
        let built = match (result, cleanup) {
            (Ok(built), Ok(())) => built,
            (Ok(_), Err(err)) => {
                discard(&paths.output);
                return Err(err);
            }
            (Err(err), Ok(())) => return Err(err),
            (Err(err), Err(cleanup)) => {
                return Err(err.with_detail("cleanup_error", Value::String(cleanup.to_string())));
            }
        };
        tracing::debug!(lock = %lock.path().display(), "releasing build lock");
        drop(lock);

        let report = BuildReport {
            output: paths.output,
            runtime: request.runtime,
            arch: request.arch,
            fingerprint: request.manifest.fingerprint(request.runtime, request.arch),
            dependencies: request
                .manifest
                .names()
                .into_iter()
                .map(str::to_string)
                .collect(),
            backend: built.receipt.backend,
            image: built.receipt.image,
            archive: built.archive,
            phases: clock.finish(),
            total_ms: millis(started.elapsed()),
        };
        tracing::info!(
            output = %report.output.display(),
            sha256 = %report.archive.sha256,
            entries = report.archive.entries,
            bytes = report.archive.bytes,
            "layer built"
        );
        Ok(report)
    }

    fn build_in(
        &self,
        request: &BuildRequest,
        paths: &OutputPaths,
        staging: &Path,
        clock: &mut PhaseClock,
    ) -> Result<StagedBuild, BuildError> {
        let site_packages = request.runtime.site_packages();
        write_install_inputs(staging, &request.manifest, &site_packages)?;

        let job = InstallJob {
            staging,
            requirements_file: REQUIREMENTS_FILE,
            site_packages: &site_packages,
            runtime: request.runtime,
            arch: request.arch,
            timeout: self.install_timeout,
        };
        let receipt = clock.time(Phase::Install, || self.installer.install(&job))?;
        let archive = clock.time(Phase::Archive, || self.archive(staging, paths))?;
        Ok(StagedBuild { receipt, archive })
    }

    fn archive(&self, staging: &Path, paths: &OutputPaths) -> Result<ArchiveSummary, BuildError> {
        let mtime = archive_timestamp(self.source_date_epoch);
        let summary = match write_layer_archive(staging, &paths.partial, mtime) {
            Ok(summary) => summary,
            Err(err) => {
                discard(&paths.partial);
                return Err(build_error(
                    BuildErrorKind::ArchiveFailure,
                    "failed to write layer archive",
                    json!({
                        "path": paths.partial.display().to_string(),
                        "error": format!("{err:#}"),
                    }),
                ));
            }
        };
        if let Err(err) = fs::rename(&paths.partial, &paths.output) {
            discard(&paths.partial);
            return Err(build_error(
                BuildErrorKind::ArchiveFailure,
                "failed to move layer archive into place",
                json!({
                    "from": paths.partial.display().to_string(),
                    "to": paths.output.display().to_string(),
                    "error": err.to_string(),
                }),
            ));
        }
        Ok(summary)
    }
}

fn prepare_output_dir(dir: &Path) -> Result<(), BuildError> {
    fs::create_dir_all(dir).map_err(|err| {
        build_error(
            BuildErrorKind::StagingConflict,
            "output directory cannot be created",
            json!({
                "path": dir.display().to_string(),
                "error": err.to_string(),
                "reason": "output_dir_not_creatable",
            }),
        )
    })
}

fn acquire_lock(path: &Path) -> Result<BuildLock, BuildError> {
    match BuildLock::try_acquire(path) {
        Ok(Some(lock)) => Ok(lock),
        Ok(None) => Err(build_error(
            BuildErrorKind::StagingConflict,
            "another build is using this output path",
            json!({
                "lock": path.display().to_string(),
                "reason": "build_in_progress",
            }),
        )),
        Err(err) => Err(build_error(
            BuildErrorKind::StagingConflict,
            "failed to lock output path",
            json!({
                "lock": path.display().to_string(),
                "error": format!("{err:#}"),
                "reason": "lock_unavailable",
            }),
        )),
    }
}

fn write_install_inputs(
    staging: &Path,
    manifest: &DependencyManifest,
    site_packages: &str,
) -> Result<(), BuildError> {
    let requirements = staging.join(REQUIREMENTS_FILE);
    fs::write(&requirements, manifest.to_requirements_txt())
        .and_then(|()| fs::create_dir_all(staging.join(site_packages)))
        .map_err(|err| {
            build_error(
                BuildErrorKind::StagingConflict,
                "failed to prepare staging directory",
                json!({
                    "path": staging.display().to_string(),
                    "error": err.to_string(),
                    "reason": "staging_not_writable",
                }),
            )
        })
}

fn discard(path: &Path) {
    if let Err(err) = remove_path(path) {
        tracing::warn!(path = %path.display(), %err, "failed to remove incomplete archive");
    }
}
