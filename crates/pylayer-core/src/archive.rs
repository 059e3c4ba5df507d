use std::fs::{self, File};
use std::io::{self, ErrorKind};
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use serde::Serialize;
use sha2::{Digest, Sha256};
use time::OffsetDateTime;
use walkdir::WalkDir;
use zip::{write::FileOptions, CompressionMethod, ZipWriter};

/// Top-level directory of every layer archive.
pub(crate) const ARCHIVE_ROOT: &str = "python";

const MIN_ZIP_TIMESTAMP: i64 = 315_532_800; // 1980-01-01T00:00:00Z
const MAX_ZIP_TIMESTAMP: i64 = 4_354_819_198; // 2107-12-31T23:59:58Z
const ZIP64_THRESHOLD: u64 = 0xFFFF_FFFF;

/// Totals of a written archive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ArchiveSummary {
    pub entries: usize,
    pub bytes: u64,
    pub sha256: String,
}

#[derive(Debug)]
enum EntryKind {
    Dir,
    File { source: PathBuf, executable: bool, len: u64 },
}

#[derive(Debug)]
struct PlannedEntry {
    name: String,
    kind: EntryKind,
}

/// Entry timestamp for `SOURCE_DATE_EPOCH`, clamped to what zip can store.
pub(crate) fn archive_timestamp(epoch: Option<i64>) -> zip::DateTime {
    let clamped = epoch
        .unwrap_or(MIN_ZIP_TIMESTAMP)
        .clamp(MIN_ZIP_TIMESTAMP, MAX_ZIP_TIMESTAMP);
    let Ok(ts) = OffsetDateTime::from_unix_timestamp(clamped) else {
        return zip::DateTime::default();
    };
    let Ok(year) = u16::try_from(ts.year()) else {
        return zip::DateTime::default();
    };
    zip::DateTime::from_date_and_time(
        year,
        u8::from(ts.month()),
        ts.day(),
        ts.hour(),
        ts.minute(),
        ts.second(),
    )
    .unwrap_or_default()
}

fn is_excluded(name: &str) -> bool {
    name == "__pycache__"
        || Path::new(name)
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("pyc"))
}

fn plan_entries(staging: &Path) -> Result<Vec<PlannedEntry>> {
    let root = staging.join(ARCHIVE_ROOT);
    if !root.is_dir() {
        return Err(anyhow!(
            "install produced no {ARCHIVE_ROOT}/ tree in {}",
            staging.display()
        ));
    }
    let mut entries = Vec::new();
    let walker = WalkDir::new(&root)
        .follow_links(false)
        .into_iter()
        .filter_entry(|entry| !is_excluded(&entry.file_name().to_string_lossy()));
    for entry in walker {
        let entry = entry.with_context(|| format!("failed to walk {}", root.display()))?;
        let path = entry.path();
        let rel = path
            .strip_prefix(staging)
            .with_context(|| format!("failed to relativize {}", path.display()))?;
        let name = rel.to_string_lossy().replace('\\', "/");
        let file_type = entry.file_type();
        if file_type.is_dir() {
            entries.push(PlannedEntry {
                name: format!("{name}/"),
                kind: EntryKind::Dir,
            });
            continue;
        }
        let metadata = if file_type.is_symlink() {
            match fs::metadata(path) {
                Ok(meta) if meta.is_file() => meta,
                Ok(_) => {
                    tracing::debug!(path = %path.display(), "skipping symlink to non-file");
                    continue;
                }
                Err(err) if err.kind() == ErrorKind::NotFound => {
                    tracing::debug!(path = %path.display(), "skipping dangling symlink");
                    continue;
                }
                Err(err) => {
                    return Err(err).with_context(|| format!("failed to stat {}", path.display()))
                }
            }
        } else if file_type.is_file() {
            entry
                .metadata()
                .with_context(|| format!("failed to stat {}", path.display()))?
        } else {
            tracing::debug!(path = %path.display(), "skipping special file");
            continue;
        };
        entries.push(PlannedEntry {
            name,
            kind: EntryKind::File {
                source: path.to_path_buf(),
                executable: is_executable(&metadata),
                len: metadata.len(),
            },
        });
    }
    entries.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(entries)
}

#[cfg(unix)]
fn is_executable(metadata: &fs::Metadata) -> bool {
    use std::os::unix::fs::PermissionsExt;

    metadata.permissions().mode() & 0o111 != 0
}

#[cfg(not(unix))]
fn is_executable(_metadata: &fs::Metadata) -> bool {
    false
}

/// Zip `<staging>/python/` into `dest` with sorted entries, a fixed
/// timestamp, and normalized permissions.
pub(crate) fn write_layer_archive(
    staging: &Path,
    dest: &Path,
    mtime: zip::DateTime,
) -> Result<ArchiveSummary> {
    let entries = plan_entries(staging)?;
    let file =
        File::create(dest).with_context(|| format!("failed to create {}", dest.display()))?;
    let mut zip = ZipWriter::new(file);
    let base = FileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .last_modified_time(mtime);
    for entry in &entries {
        match &entry.kind {
            EntryKind::Dir => {
                zip.add_directory(entry.name.as_str(), base.unix_permissions(0o755))?;
            }
            EntryKind::File {
                source,
                executable,
                len,
            } => {
                let mode = if *executable { 0o755 } else { 0o644 };
                let options = base
                    .unix_permissions(mode)
                    .large_file(*len >= ZIP64_THRESHOLD);
                zip.start_file(entry.name.as_str(), options)?;
                let mut reader = File::open(source)
                    .with_context(|| format!("failed to open {}", source.display()))?;
                io::copy(&mut reader, &mut zip)
                    .with_context(|| format!("failed to archive {}", source.display()))?;
            }
        }
    }
    let file = zip.finish()?;
    file.sync_all()
        .with_context(|| format!("failed to flush {}", dest.display()))?;
    drop(file);

    let bytes = fs::metadata(dest)
        .with_context(|| format!("failed to stat {}", dest.display()))?
        .len();
    Ok(ArchiveSummary {
        entries: entries.len(),
        bytes,
        sha256: compute_file_sha256(dest)?,
    })
}

pub(crate) fn compute_file_sha256(path: &Path) -> Result<String> {
    let mut file = File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
    let mut hasher = Sha256::new();
    io::copy(&mut file, &mut hasher)?;
    Ok(format!("{:x}", hasher.finalize()))
}
