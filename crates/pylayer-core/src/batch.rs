use std::fs;
use std::path::{Path, PathBuf};

use pylayer_domain::{read_manifest, Architecture, RuntimeId};
use serde::Serialize;
use serde_json::json;

use crate::builder::{BuildReport, BuildRequest, LayerBuilder};
use crate::error::{build_error, BuildError, BuildErrorKind};
use crate::installer::{IsolatedInstaller, REQUIREMENTS_FILE};

/// File name of every planned layer archive.
pub const LAYER_ARCHIVE_NAME: &str = "python.zip";

/// One function directory mapped to its layer archive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LayerPlan {
    pub name: String,
    pub requirements: PathBuf,
    pub output: PathBuf,
}

#[derive(Debug)]
pub struct LayerResult {
    pub plan: LayerPlan,
    pub outcome: Result<BuildReport, BuildError>,
}

/// Plan `<layers_dir>/<name>/python.zip` for each `<functions_dir>/<name>/requirements.txt`.
///
/// # Errors
///
/// Returns `ManifestInvalid` when `functions_dir` cannot be read or holds no
/// function with a requirements file.
pub fn plan_layers(functions_dir: &Path, layers_dir: &Path) -> Result<Vec<LayerPlan>, BuildError> {
    let read_error = |err: std::io::Error| {
        build_error(
            BuildErrorKind::ManifestInvalid,
            "functions directory cannot be read",
            json!({
                "path": functions_dir.display().to_string(),
                "error": err.to_string(),
            }),
        )
    };
    let mut plans = Vec::new();
    for entry in fs::read_dir(functions_dir).map_err(read_error)? {
        let entry = entry.map_err(read_error)?;
        let name = entry.file_name().to_string_lossy().to_string();
        if name.starts_with('.') || !entry.path().is_dir() {
            continue;
        }
        let requirements = entry.path().join(REQUIREMENTS_FILE);
        if !requirements.is_file() {
            tracing::debug!(function = %name, "no requirements file; skipping");
            continue;
        }
        plans.push(LayerPlan {
            output: layers_dir.join(&name).join(LAYER_ARCHIVE_NAME),
            requirements,
            name,
        });
    }
    if plans.is_empty() {
        return Err(build_error(
            BuildErrorKind::ManifestInvalid,
            "no function declares a requirements file",
            json!({
                "path": functions_dir.display().to_string(),
                "hint": format!("add <function>/{REQUIREMENTS_FILE} under the functions directory"),
            }),
        ));
    }
    plans.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(plans)
}

/// Build every plan in order; a failed layer does not stop the rest.
pub fn build_all<I: IsolatedInstaller>(
    builder: &LayerBuilder<I>,
    plans: &[LayerPlan],
    runtime: RuntimeId,
    arch: Architecture,
) -> Vec<LayerResult> {
    plans
        .iter()
        .map(|plan| {
            tracing::info!(layer = %plan.name, "building layer from {}", plan.requirements.display());
            let outcome = read_manifest(&plan.requirements)
                .map_err(BuildError::from)
                .and_then(|manifest| {
                    builder.build(&BuildRequest {
                        manifest,
                        runtime,
                        arch,
                        output: plan.output.clone(),
                    })
                });
            if let Err(err) = &outcome {
                tracing::warn!(layer = %plan.name, kind = %err.kind(), "layer build failed");
            }
            LayerResult {
                plan: plan.clone(),
                outcome,
            }
        })
        .collect()
}
