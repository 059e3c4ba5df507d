use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use pep508_rs::Requirement as PepRequirement;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::runtime::{Architecture, RuntimeId};

mod normalize;
mod requirements;

pub use normalize::canonicalize_package_name;
use normalize::{split_name, strip_wrapping_quotes};

#[derive(Debug, thiserror::Error)]
pub enum ManifestError {
    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("{}:{line}: invalid requirement `{spec}`: {reason}", path.display())]
    InvalidRequirement {
        path: PathBuf,
        line: usize,
        spec: String,
        reason: String,
    },
    #[error("{}:{line}: unsupported option `{option}` (only requirements and -r includes are allowed)", path.display())]
    UnsupportedOption {
        path: PathBuf,
        line: usize,
        option: String,
    },
    #[error("dependency `{name}` is listed more than once")]
    Duplicate { name: String },
    #[error("{} does not list any dependencies", path.display())]
    Empty { path: PathBuf },
}

/// A single `(name, constraint)` entry of a manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dependency {
    pub name: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub extras: Vec<String>,
    pub constraint: String,
}

impl Dependency {
    /// Parse one PEP 508 requirement string.
    ///
    /// # Errors
    ///
    /// Returns the parser's message when the requirement is malformed.
    pub fn parse(spec: &str) -> Result<Self, String> {
        let cleaned = strip_wrapping_quotes(spec.trim());
        let requirement = PepRequirement::from_str(cleaned).map_err(|err| {
            err.to_string()
                .lines()
                .next()
                .unwrap_or("unparseable requirement")
                .to_string()
        })?;
        let mut extras = requirement
            .extras
            .iter()
            .map(|extra| extra.to_string().to_ascii_lowercase())
            .collect::<Vec<_>>();
        extras.sort();
        extras.dedup();
        let (_, rest) = split_name(cleaned);
        Ok(Self {
            name: canonicalize_package_name(&requirement.name.to_string()),
            extras,
            constraint: rest.trim().to_string(),
        })
    }

    /// Requirement line handed to the installer.
    pub fn requirement_line(&self) -> String {
        let mut line = self.name.clone();
        if !self.extras.is_empty() {
            line.push('[');
            line.push_str(&self.extras.join(","));
            line.push(']');
        }
        if !self.constraint.is_empty() {
            if self.constraint.starts_with('@') || self.constraint.starts_with(';') {
                line.push(' ');
            }
            line.push_str(&self.constraint);
        }
        line
    }
}

/// Ordered dependency list for one layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependencyManifest {
    pub source: Option<PathBuf>,
    pub entries: Vec<Dependency>,
}

impl DependencyManifest {
    /// Build a manifest from in-memory requirement strings.
    ///
    /// # Errors
    ///
    /// Returns an error for malformed or duplicate requirements, or an empty list.
    pub fn from_specs<S: AsRef<str>>(specs: &[S]) -> Result<Self, ManifestError> {
        let origin = PathBuf::from("<inline>");
        let mut entries = Vec::with_capacity(specs.len());
        for (idx, spec) in specs.iter().enumerate() {
            let spec = spec.as_ref();
            let dependency =
                Dependency::parse(spec).map_err(|reason| ManifestError::InvalidRequirement {
                    path: origin.clone(),
                    line: idx + 1,
                    spec: spec.to_string(),
                    reason,
                })?;
            entries.push(dependency);
        }
        Self::validated(None, entries, &origin)
    }

    fn validated(
        source: Option<PathBuf>,
        entries: Vec<Dependency>,
        origin: &Path,
    ) -> Result<Self, ManifestError> {
        if entries.is_empty() {
            return Err(ManifestError::Empty {
                path: origin.to_path_buf(),
            });
        }
        let mut seen = HashSet::new();
        for entry in &entries {
            if !seen.insert(entry.name.as_str()) {
                return Err(ManifestError::Duplicate {
                    name: entry.name.clone(),
                });
            }
        }
        Ok(Self { source, entries })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn names(&self) -> Vec<&str> {
        self.entries.iter().map(|dep| dep.name.as_str()).collect()
    }

    /// Normalized requirements file, one requirement per line in manifest order.
    pub fn to_requirements_txt(&self) -> String {
        let mut out = String::new();
        for entry in &self.entries {
            out.push_str(&entry.requirement_line());
            out.push('\n');
        }
        out
    }

    /// Stable identity of the layer inputs.
    pub fn fingerprint(&self, runtime: RuntimeId, arch: Architecture) -> String {
        let mut hasher = Sha256::new();
        hasher.update(b"runtime:");
        hasher.update(runtime.as_str().as_bytes());
        hasher.update(b"\narch:");
        hasher.update(arch.as_str().as_bytes());
        hasher.update(b"\n");
        for entry in &self.entries {
            hasher.update(entry.requirement_line().as_bytes());
            hasher.update(b"\n");
        }
        hex::encode(hasher.finalize())
    }
}

/// Read and validate a requirements file (following `-r` includes).
///
/// # Errors
///
/// Returns an error when the file cannot be read, contains unsupported options
/// or malformed requirements, repeats a dependency, or is empty.
pub fn read_manifest(path: &Path) -> Result<DependencyManifest, ManifestError> {
    let lines = requirements::read_requirement_lines(path)?;
    let mut entries = Vec::with_capacity(lines.len());
    for line in lines {
        let dependency =
            Dependency::parse(&line.spec).map_err(|reason| ManifestError::InvalidRequirement {
                path: line.path.clone(),
                line: line.line,
                spec: line.spec.clone(),
                reason,
            })?;
        entries.push(dependency);
    }
    DependencyManifest::validated(Some(path.to_path_buf()), entries, path)
}
