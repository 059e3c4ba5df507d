use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use pylayer_domain::{read_manifest, Architecture, RuntimeId};
use serde::Serialize;
use serde_json::{json, Value};

use crate::backend::ContainerInstaller;
use crate::batch::{build_all, plan_layers, LayerResult};
use crate::builder::{BuildRequest, LayerBuilder};
use crate::config::BuildConfig;
use crate::error::BuildError;
use crate::inspect::inspect_archive;
use crate::outcome::{CommandStatus, ExecutionOutcome};

/// Options shared by `build` and `build-all`; `None` keeps the environment's value.
#[derive(Clone, Debug)]
pub struct BuildSettings {
    pub runtime: RuntimeId,
    pub arch: Architecture,
    pub backend: Option<String>,
    pub image: Option<String>,
    pub timeout: Option<Duration>,
}

impl BuildSettings {
    fn apply(&self, mut config: BuildConfig) -> BuildConfig {
        if let Some(backend) = &self.backend {
            config.backend = Some(backend.clone());
        }
        if let Some(image) = &self.image {
            config.image = Some(image.clone());
        }
        if let Some(timeout) = self.timeout {
            config.install_timeout = timeout;
        }
        config
    }
}

#[derive(Clone, Debug)]
pub struct BuildLayerRequest {
    pub requirements: PathBuf,
    pub output: PathBuf,
    pub settings: BuildSettings,
}

#[derive(Clone, Debug)]
pub struct BuildAllRequest {
    pub functions_dir: PathBuf,
    pub layers_dir: PathBuf,
    pub settings: BuildSettings,
}

#[derive(Clone, Debug)]
pub struct InspectRequest {
    pub archive: PathBuf,
    pub runtime: RuntimeId,
}

#[derive(Clone, Debug)]
pub enum LayerCommand {
    Build(BuildLayerRequest),
    BuildAll(BuildAllRequest),
    Inspect(InspectRequest),
    Runtimes,
}

impl LayerCommand {
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            LayerCommand::Build(_) => "build",
            LayerCommand::BuildAll(_) => "build-all",
            LayerCommand::Inspect(_) => "inspect",
            LayerCommand::Runtimes => "runtimes",
        }
    }
}

/// Run one command against the current process environment.
///
/// # Errors
///
/// Returns an error only when a report cannot be serialized; build problems
/// are reported through the outcome's status.
pub fn execute(command: &LayerCommand) -> Result<ExecutionOutcome> {
    match command {
        LayerCommand::Build(request) => build_layer(request),
        LayerCommand::BuildAll(request) => build_layers(request),
        LayerCommand::Inspect(request) => inspect_layer(request),
        LayerCommand::Runtimes => Ok(list_runtimes()),
    }
}

fn resolve_config(settings: &BuildSettings) -> Result<BuildConfig, ExecutionOutcome> {
    BuildConfig::from_env()
        .map(|config| settings.apply(config))
        .map_err(|err| {
            ExecutionOutcome::user_error(
                "invalid pylayer configuration",
                json!({
                    "error": format!("{err:#}"),
                    "hint": "check PYLAYER_INSTALL_TIMEOUT and SOURCE_DATE_EPOCH",
                }),
            )
        })
}

fn container_builder(config: &BuildConfig) -> Result<LayerBuilder<ContainerInstaller>, BuildError> {
    let installer = ContainerInstaller::from_config(config)?;
    Ok(LayerBuilder::new(installer, config))
}

/// # Errors
///
/// Returns an error when the build report cannot be serialized.
pub fn build_layer(request: &BuildLayerRequest) -> Result<ExecutionOutcome> {
    let config = match resolve_config(&request.settings) {
        Ok(config) => config,
        Err(outcome) => return Ok(outcome),
    };
    let manifest = match read_manifest(&request.requirements) {
        Ok(manifest) => manifest,
        Err(err) => return Ok(BuildError::from(err).to_outcome()),
    };
    let builder = match container_builder(&config) {
        Ok(builder) => builder,
        Err(err) => return Ok(err.to_outcome()),
    };
    let report = match builder.build(&BuildRequest {
        manifest,
        runtime: request.settings.runtime,
        arch: request.settings.arch,
        output: request.output.clone(),
    }) {
        Ok(report) => report,
        Err(err) => return Ok(err.to_outcome()),
    };
    let message = format!(
        "built {} ({} entries, sha256 {})",
        report.output.display(),
        report.archive.entries,
        short_digest(&report.archive.sha256)
    );
    Ok(ExecutionOutcome::success(message, to_details(&report)?))
}

/// # Errors
///
/// Returns an error when a build report cannot be serialized.
pub fn build_layers(request: &BuildAllRequest) -> Result<ExecutionOutcome> {
    let config = match resolve_config(&request.settings) {
        Ok(config) => config,
        Err(outcome) => return Ok(outcome),
    };
    let plans = match plan_layers(&request.functions_dir, &request.layers_dir) {
        Ok(plans) => plans,
        Err(err) => return Ok(err.to_outcome()),
    };
    let builder = match container_builder(&config) {
        Ok(builder) => builder,
        Err(err) => return Ok(err.to_outcome()),
    };
    let results = build_all(
        &builder,
        &plans,
        request.settings.runtime,
        request.settings.arch,
    );
    batch_outcome(&results)
}

fn batch_outcome(results: &[LayerResult]) -> Result<ExecutionOutcome> {
    let mut layers = Vec::with_capacity(results.len());
    let mut worst = CommandStatus::Ok;
    for result in results {
        match &result.outcome {
            Ok(report) => layers.push(json!({
                "name": result.plan.name,
                "status": "built",
                "requirements": result.plan.requirements,
                "report": to_details(report)?,
            })),
            Err(err) => {
                let status = err.kind().status();
                if worst != CommandStatus::Failure {
                    worst = status;
                }
                layers.push(json!({
                    "name": result.plan.name,
                    "status": "failed",
                    "requirements": result.plan.requirements,
                    "output": result.plan.output,
                    "error": err.to_string(),
                    "details": err.details(),
                }));
            }
        }
    }
    let built = results
        .iter()
        .filter(|result| result.outcome.is_ok())
        .count();
    let message = format!("built {built} of {} layers", results.len());
    let details = json!({
        "built": built,
        "failed": results.len() - built,
        "layers": layers,
    });
    Ok(ExecutionOutcome {
        status: worst,
        message,
        details,
    })
}

/// # Errors
///
/// Returns an error when the inspection report cannot be serialized.
pub fn inspect_layer(request: &InspectRequest) -> Result<ExecutionOutcome> {
    let inspection = match inspect_archive(&request.archive, request.runtime) {
        Ok(inspection) => inspection,
        Err(err) => return Ok(err.to_outcome()),
    };
    let mut details = to_details(&inspection)?;
    if inspection.is_valid() {
        let message = format!(
            "{}: {} entries, {} packages for {}",
            inspection.path.display(),
            inspection.entries,
            inspection.packages.len(),
            inspection.runtime
        );
        return Ok(ExecutionOutcome::success(message, details));
    }
    let message = if inspection.entries == 0 {
        format!("{} is empty", inspection.path.display())
    } else {
        format!(
            "{} has {} entries outside {}/",
            inspection.path.display(),
            inspection.violations.len(),
            request.runtime.site_packages()
        )
    };
    if let Value::Object(map) = &mut details {
        map.insert(
            "hint".into(),
            Value::String(format!(
                "rebuild the layer with `pylayer build --runtime {}`",
                request.runtime
            )),
        );
    }
    Ok(ExecutionOutcome::user_error(message, details))
}

#[must_use]
pub fn list_runtimes() -> ExecutionOutcome {
    let runtimes = RuntimeId::ALL
        .iter()
        .map(|runtime| {
            json!({
                "id": runtime.as_str(),
                "site_packages": runtime.site_packages(),
                "images": {
                    "x86_64": runtime.default_image(Architecture::X86_64),
                    "arm64": runtime.default_image(Architecture::Arm64),
                },
            })
        })
        .collect::<Vec<_>>();
    let names = RuntimeId::ALL
        .iter()
        .map(|runtime| runtime.as_str())
        .collect::<Vec<_>>();
    ExecutionOutcome::success(
        format!("supported runtimes: {}", names.join(", ")),
        json!({ "runtimes": runtimes }),
    )
}

fn to_details<T: Serialize>(value: &T) -> Result<Value> {
    Ok(serde_json::to_value(value)?)
}

fn short_digest(digest: &str) -> &str {
    digest.get(..12).unwrap_or(digest)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batch::LayerPlan;
    use crate::error::BuildErrorKind;
    use std::fs;
    use tempfile::tempdir;

    fn settings() -> BuildSettings {
        BuildSettings {
            runtime: RuntimeId::Python39,
            arch: Architecture::X86_64,
            backend: Some("/nonexistent/pylayer-engine".into()),
            image: None,
            timeout: Some(Duration::from_secs(5)),
        }
    }

    #[test]
    fn runtimes_lists_every_identifier() {
        let outcome = list_runtimes();
        assert_eq!(outcome.status, CommandStatus::Ok);
        let runtimes = outcome.details["runtimes"].as_array().cloned().unwrap_or_default();
        assert_eq!(runtimes.len(), RuntimeId::ALL.len());
        assert_eq!(runtimes[1]["id"], "python3.9");
        assert_eq!(
            runtimes[1]["images"]["arm64"],
            "public.ecr.aws/sam/build-python3.9:latest-arm64"
        );
    }

    #[test]
    fn settings_override_environment_config() {
        let config = settings().apply(BuildConfig::default());
        assert_eq!(config.backend.as_deref(), Some("/nonexistent/pylayer-engine"));
        assert_eq!(config.install_timeout, Duration::from_secs(5));
        assert!(config.image.is_none());
    }

    #[test]
    fn invalid_manifest_is_user_error() -> Result<()> {
        let dir = tempdir()?;
        let requirements = dir.path().join("requirements.txt");
        fs::write(&requirements, "requests\nrequests==2.0\n")?;
        let outcome = build_layer(&BuildLayerRequest {
            requirements,
            output: dir.path().join("python.zip"),
            settings: settings(),
        })?;
        assert_eq!(outcome.status, CommandStatus::UserError);
        assert_eq!(outcome.details["kind"], "ManifestInvalid");
        Ok(())
    }

    #[test]
    fn missing_backend_is_failure() -> Result<()> {
        let dir = tempdir()?;
        let requirements = dir.path().join("requirements.txt");
        fs::write(&requirements, "requests==2.28.0\n")?;
        let outcome = build_layer(&BuildLayerRequest {
            requirements,
            output: dir.path().join("python.zip"),
            settings: settings(),
        })?;
        assert_eq!(outcome.status, CommandStatus::Failure);
        assert_eq!(outcome.details["kind"], "EnvironmentUnavailable");
        assert!(!dir.path().join("python.zip").exists());
        Ok(())
    }

    #[test]
    fn batch_status_is_the_worst_layer_status() -> Result<()> {
        let plan = |name: &str| LayerPlan {
            name: name.to_string(),
            requirements: PathBuf::from(format!("functions/{name}/requirements.txt")),
            output: PathBuf::from(format!("layers/{name}/python.zip")),
        };
        let results = vec![
            LayerResult {
                plan: plan("a"),
                outcome: Err(BuildError::new(
                    BuildErrorKind::InstallFailure,
                    "dependency install failed",
                    json!({}),
                )),
            },
            LayerResult {
                plan: plan("b"),
                outcome: Err(BuildError::new(
                    BuildErrorKind::ManifestInvalid,
                    "dependency manifest is invalid",
                    json!({}),
                )),
            },
        ];
        let outcome = batch_outcome(&results)?;
        assert_eq!(outcome.status, CommandStatus::Failure);
        assert_eq!(outcome.message, "built 0 of 2 layers");
        assert_eq!(outcome.details["failed"], 2);
        assert_eq!(outcome.details["layers"][1]["status"], "failed");
        Ok(())
    }

    #[test]
    fn inspect_missing_archive_is_failure() -> Result<()> {
        let dir = tempdir()?;
        let outcome = inspect_layer(&InspectRequest {
            archive: dir.path().join("python.zip"),
            runtime: RuntimeId::Python39,
        })?;
        assert_eq!(outcome.status, CommandStatus::Failure);
        assert_eq!(outcome.details["kind"], "ArchiveFailure");
        Ok(())
    }
}
