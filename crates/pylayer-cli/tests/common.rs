#![allow(dead_code)]

use std::{
    fs,
    io::Read,
    path::{Path, PathBuf},
};

use assert_cmd::assert::Assert;
use serde_json::Value;

/// Stand-in for `docker`/`podman`: parses the mount and install target from the
/// `run` arguments and writes `<site-packages>/<name>/__init__.py` per requirement.
///
/// `FAKE_EXIT` makes the install fail with that status, `FAKE_SLEEP` delays it,
/// and `FAKE_ARGS_LOG` records the arguments of every invocation.
const FAKE_ENGINE: &str = r#"#!/bin/sh
if [ -n "$FAKE_ARGS_LOG" ]; then
  printf '%s\n' "$@" >> "$FAKE_ARGS_LOG"
fi
if [ "$1" = "rm" ]; then
  exit 0
fi
host=""
script=""
while [ $# -gt 0 ]; do
  case "$1" in
    --volume) host="${2%%:*}"; shift 2 ;;
    -c) script="$2"; shift 2 ;;
    *) shift ;;
  esac
done
if [ -n "$FAKE_SLEEP" ]; then
  sleep "$FAKE_SLEEP"
fi
if [ -n "$FAKE_EXIT" ]; then
  echo "ERROR: No matching distribution found" >&2
  exit "$FAKE_EXIT"
fi
site="${script##* -t }"
while IFS= read -r line || [ -n "$line" ]; do
  name=$(printf '%s' "$line" | sed 's/[^A-Za-z0-9_.-].*//' | tr '.-' '__')
  [ -z "$name" ] && continue
  mkdir -p "$host/$site/$name/__pycache__" "$host/$site/$name-0.0.0.dist-info"
  printf '# %s\n' "$line" > "$host/$site/$name/__init__.py"
  printf 'x' > "$host/$site/$name/__pycache__/__init__.cpython-39.pyc"
  printf 'Name: %s\n' "$name" > "$host/$site/$name-0.0.0.dist-info/METADATA"
done < "$host/requirements.txt"
echo "Successfully installed"
"#;

#[cfg(unix)]
pub fn fake_engine(dir: &Path) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;

    let path = dir.join("fake-engine");
    fs::write(&path, FAKE_ENGINE).expect("write fake engine");
    fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).expect("chmod fake engine");
    path
}

pub fn write_requirements(dir: &Path, contents: &str) -> PathBuf {
    fs::create_dir_all(dir).expect("requirements dir");
    let path = dir.join("requirements.txt");
    fs::write(&path, contents).expect("write requirements");
    path
}

pub fn archive_names(path: &Path) -> Vec<String> {
    let file = fs::File::open(path).expect("open archive");
    let mut archive = zip::ZipArchive::new(file).expect("read archive");
    (0..archive.len())
        .map(|idx| archive.by_index(idx).expect("entry").name().to_string())
        .collect()
}

pub fn archive_entry(path: &Path, name: &str) -> String {
    let file = fs::File::open(path).expect("open archive");
    let mut archive = zip::ZipArchive::new(file).expect("read archive");
    let mut contents = String::new();
    archive
        .by_name(name)
        .expect("entry present")
        .read_to_string(&mut contents)
        .expect("utf-8 entry");
    contents
}

pub fn parse_json(assert: &Assert) -> Value {
    serde_json::from_slice(&assert.get_output().stdout).expect("valid json")
}
