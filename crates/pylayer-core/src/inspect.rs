use std::collections::BTreeSet;
use std::fs::File;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use pylayer_domain::{canonicalize_package_name, RuntimeId};
use serde::Serialize;
use serde_json::json;

use crate::archive::compute_file_sha256;
use crate::error::{build_error, BuildError, BuildErrorKind};

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub struct DistributionInfo {
    pub name: String,
    pub version: String,
}

/// Contents of a layer archive checked against a runtime's layout.
#[derive(Debug, Clone, Serialize)]
pub struct ArchiveInspection {
    pub path: PathBuf,
    pub runtime: RuntimeId,
    pub sha256: String,
    pub entries: usize,
    pub packages: Vec<String>,
    pub distributions: Vec<DistributionInfo>,
    pub violations: Vec<String>,
}

impl ArchiveInspection {
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.violations.is_empty() && self.entries > 0
    }
}

/// Read a layer archive and report what it installs for `runtime`.
///
/// # Errors
///
/// Returns `ArchiveFailure` when the file is missing or is not a readable zip.
pub fn inspect_archive(path: &Path, runtime: RuntimeId) -> Result<ArchiveInspection, BuildError> {
    read_inspection(path, runtime).map_err(|err| {
        build_error(
            BuildErrorKind::ArchiveFailure,
            "failed to read layer archive",
            json!({
                "path": path.display().to_string(),
                "error": format!("{err:#}"),
            }),
        )
    })
}

fn read_inspection(path: &Path, runtime: RuntimeId) -> Result<ArchiveInspection> {
    let file = File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
    let mut archive =
        zip::ZipArchive::new(file).with_context(|| format!("{} is not a zip", path.display()))?;
    let site_packages = format!("{}/", runtime.site_packages());
    let allowed_parents = parent_dirs(&site_packages);

    let mut packages = BTreeSet::new();
    let mut distributions = BTreeSet::new();
    let mut violations = Vec::new();
    for idx in 0..archive.len() {
        let entry = archive.by_index(idx)?;
        let name = entry.name().to_string();
        if allowed_parents.contains(&name) || name == site_packages {
            continue;
        }
        let Some(rest) = name.strip_prefix(&site_packages) else {
            violations.push(name);
            continue;
        };
        let top = rest.split('/').next().unwrap_or_default();
        if let Some(dist) = distribution_from_dir(top) {
            distributions.insert(dist);
        } else if let Some(package) = package_from_top_level(top, rest.contains('/')) {
            packages.insert(package);
        }
    }

    Ok(ArchiveInspection {
        path: path.to_path_buf(),
        runtime,
        sha256: compute_file_sha256(path)?,
        entries: archive.len(),
        packages: packages.into_iter().collect(),
        distributions: distributions.into_iter().collect(),
        violations,
    })
}

/// `python/`, `python/lib/`, ... for a `python/lib/<rt>/site-packages/` prefix.
fn parent_dirs(prefix: &str) -> Vec<String> {
    let mut parents = Vec::new();
    let mut current = String::new();
    for part in prefix.trim_end_matches('/').split('/') {
        current.push_str(part);
        current.push('/');
        parents.push(current.clone());
    }
    parents.pop();
    parents
}

fn distribution_from_dir(top: &str) -> Option<DistributionInfo> {
    let stem = top
        .strip_suffix(".dist-info")
        .or_else(|| top.strip_suffix(".egg-info"))?;
    let (name, version) = stem.rsplit_once('-')?;
    Some(DistributionInfo {
        name: canonicalize_package_name(name),
        version: version.to_string(),
    })
}

fn package_from_top_level(top: &str, is_dir: bool) -> Option<String> {
    if top.is_empty() || top == "bin" || top == "__pycache__" || top.ends_with(".data") {
        return None;
    }
    if is_dir {
        return Some(top.to_string());
    }
    let module = top
        .strip_suffix(".py")
        .or_else(|| top.split_once(".cpython-").map(|(stem, _)| stem))
        .or_else(|| top.strip_suffix(".so"))?;
    Some(module.to_string())
}
