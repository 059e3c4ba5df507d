use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use super::ManifestError;

/// One requirement line with the file and line number it came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct RequirementLine {
    pub(crate) path: PathBuf,
    pub(crate) line: usize,
    pub(crate) spec: String,
}

pub(crate) fn read_requirement_lines(path: &Path) -> Result<Vec<RequirementLine>, ManifestError> {
    let mut visited = HashSet::new();
    let mut lines = Vec::new();
    read_inner(path, &mut visited, &mut lines)?;
    Ok(lines)
}

fn read_inner(
    path: &Path,
    visited: &mut HashSet<PathBuf>,
    out: &mut Vec<RequirementLine>,
) -> Result<(), ManifestError> {
    let canonical = fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf());
    if !visited.insert(canonical.clone()) {
        return Ok(());
    }
    let contents = fs::read_to_string(&canonical).map_err(|source| ManifestError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let base_dir = canonical.parent().unwrap_or_else(|| Path::new("."));
    for (idx, line) in contents.lines().enumerate() {
        let line_no = idx + 1;
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        let mut spec = trimmed;
        if let Some(idx) = trimmed.find('#') {
            let before = &trimmed[..idx];
            if before.chars().last().is_some_and(char::is_whitespace) {
                spec = before.trim();
            }
        }
        let include = spec
            .strip_prefix("--requirement")
            .or_else(|| spec.strip_prefix("-r"));
        if let Some(rest) = include {
            let target = rest.trim_start_matches([' ', '=']).trim();
            if target.is_empty() {
                return Err(ManifestError::UnsupportedOption {
                    path: path.to_path_buf(),
                    line: line_no,
                    option: spec.to_string(),
                });
            }
            let nested = if Path::new(target).is_absolute() {
                PathBuf::from(target)
            } else {
                base_dir.join(target)
            };
            read_inner(&nested, visited, out)?;
            continue;
        }
        if spec.starts_with('-') {
            return Err(ManifestError::UnsupportedOption {
                path: path.to_path_buf(),
                line: line_no,
                option: spec.to_string(),
            });
        }
        let spec = vcs_egg_to_direct_reference(spec).unwrap_or_else(|| spec.to_string());
        out.push(RequirementLine {
            path: path.to_path_buf(),
            line: line_no,
            spec,
        });
    }
    Ok(())
}

/// `git+https://host/repo#egg=name` -> `name @ git+https://host/repo`.
fn vcs_egg_to_direct_reference(spec: &str) -> Option<String> {
    if !["git+", "hg+", "bzr+", "svn+"]
        .iter()
        .any(|prefix| spec.starts_with(prefix))
    {
        return None;
    }
    let (url, fragment) = spec.split_once("#egg=")?;
    let mut parts = fragment.split('&');
    let egg = parts.next().unwrap_or("").trim();
    if egg.is_empty() {
        return None;
    }
    let rest = parts.collect::<Vec<_>>();
    let mut clean_url = url.to_string();
    if !rest.is_empty() {
        clean_url.push('#');
        clean_url.push_str(&rest.join("&"));
    }
    Some(format!("{egg} @ {clean_url}"))
}
