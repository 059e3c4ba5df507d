use std::path::{Path, PathBuf};
use std::time::Duration;

use serde_json::json;

use crate::config::{BuildConfig, EnvSnapshot};
use crate::error::{build_error, BuildError, BuildErrorKind};
use crate::installer::{InstallJob, InstallReceipt, IsolatedInstaller};
use crate::process::{run_command, run_command_with_options, tail_lines, RunOptions, RunOutput};

const GUEST_WORKDIR: &str = "/var/task";
const ENGINE_ERROR_CODE: i32 = 125;
const STDERR_TAIL_LINES: usize = 20;
const FORWARDED_ENV: &[&str] = &[
    "HTTP_PROXY",
    "HTTPS_PROXY",
    "NO_PROXY",
    "http_proxy",
    "https_proxy",
    "no_proxy",
    "PIP_INDEX_URL",
    "PIP_EXTRA_INDEX_URL",
    "PIP_TRUSTED_HOST",
];

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BackendKind {
    Docker,
    Podman,
    Custom,
}

impl BackendKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            BackendKind::Docker => "docker",
            BackendKind::Podman => "podman",
            BackendKind::Custom => "custom",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ContainerBackend {
    pub program: PathBuf,
    pub kind: BackendKind,
}

#[derive(Clone, Debug)]
pub(crate) struct Mount {
    pub(crate) host: PathBuf,
    pub(crate) guest: PathBuf,
    pub(crate) read_only: bool,
}

#[derive(Clone, Debug)]
pub(crate) struct ContainerRunArgs {
    pub(crate) name: String,
    pub(crate) platform: String,
    pub(crate) user: Option<String>,
    pub(crate) env: Vec<(String, String)>,
    pub(crate) mounts: Vec<Mount>,
    pub(crate) workdir: PathBuf,
    pub(crate) image: String,
    pub(crate) program: String,
    pub(crate) args: Vec<String>,
}

/// Pick the container engine: `preference` (`docker`, `podman`, or a path to a
/// compatible binary), else the first of docker and podman on `PATH`.
///
/// # Errors
///
/// Returns `EnvironmentUnavailable` when the preferred or any default engine
/// cannot be found.
pub fn detect_container_backend(preference: Option<&str>) -> Result<ContainerBackend, BuildError> {
    if let Some(raw) = preference.map(str::trim).filter(|raw| !raw.is_empty()) {
        if raw.eq_ignore_ascii_case("docker") {
            return Ok(ContainerBackend {
                program: resolve_program("docker", None)?,
                kind: BackendKind::Docker,
            });
        }
        if raw.eq_ignore_ascii_case("podman") {
            return Ok(ContainerBackend {
                program: resolve_program("podman", None)?,
                kind: BackendKind::Podman,
            });
        }
        return Ok(ContainerBackend {
            program: resolve_program(raw, Some(raw))?,
            kind: BackendKind::Custom,
        });
    }

    for (name, kind) in [("docker", BackendKind::Docker), ("podman", BackendKind::Podman)] {
        if let Ok(program) = resolve_program(name, None) {
            return Ok(ContainerBackend { program, kind });
        }
    }

    Err(build_error(
        BuildErrorKind::EnvironmentUnavailable,
        "container backend unavailable",
        json!({
            "reason": "backend_unavailable",
            "candidates": ["docker", "podman"],
            "hint": "install docker or podman, or set PYLAYER_BACKEND to a compatible binary",
        }),
    ))
}

fn resolve_program(name: &str, raw: Option<&str>) -> Result<PathBuf, BuildError> {
    let candidate = if name.contains(std::path::MAIN_SEPARATOR) || name.contains('/') {
        PathBuf::from(name)
    } else {
        which::which(name).unwrap_or_else(|_| PathBuf::from(name))
    };
    if candidate.is_file() {
        return Ok(candidate);
    }
    Err(build_error(
        BuildErrorKind::EnvironmentUnavailable,
        "container backend unavailable",
        json!({
            "reason": "backend_not_found",
            "backend": raw.unwrap_or(name),
        }),
    ))
}

/// Shell command run inside the build container.
pub(crate) fn install_script(requirements_file: &str, site_packages: &str) -> String {
    format!(
        "pip install --no-cache-dir --no-compile --disable-pip-version-check \
         -r {requirements_file} -t {site_packages}"
    )
}

pub(crate) fn build_run_args(opts: &ContainerRunArgs) -> Vec<String> {
    let mut args = vec![
        "run".to_string(),
        "--rm".to_string(),
        "--name".to_string(),
        opts.name.clone(),
        "--platform".to_string(),
        opts.platform.clone(),
        "--workdir".to_string(),
        opts.workdir.display().to_string(),
    ];

    for mount in &opts.mounts {
        let host = canonical_or(&mount.host);
        let mode = if mount.read_only { "ro,Z" } else { "rw,Z" };
        args.push("--volume".to_string());
        args.push(format!("{}:{}:{mode}", host.display(), mount.guest.display()));
    }

    for (key, value) in &opts.env {
        args.push("--env".to_string());
        args.push(format!("{key}={value}"));
    }

    if let Some(user) = &opts.user {
        args.push("--user".to_string());
        args.push(user.clone());
    }

    args.push(opts.image.clone());
    args.push(opts.program.clone());
    args.extend(opts.args.iter().cloned());
    args
}

fn canonical_or(path: &Path) -> PathBuf {
    path.canonicalize().unwrap_or_else(|_| path.to_path_buf())
}

/// Map the engine client's exit to a build outcome.
pub(crate) fn classify_exit(
    output: &RunOutput,
    backend: &ContainerBackend,
    image: &str,
    timeout: Duration,
) -> Result<(), BuildError> {
    if output.timed_out {
        return Err(build_error(
            BuildErrorKind::InstallFailure,
            "dependency install timed out",
            json!({
                "reason": "timeout",
                "timeout_secs": timeout.as_secs(),
                "backend": backend.kind.as_str(),
                "image": image,
                "stderr": tail_lines(&output.stderr, STDERR_TAIL_LINES),
            }),
        ));
    }
    match output.code {
        0 => Ok(()),
        ENGINE_ERROR_CODE => Err(build_error(
            BuildErrorKind::EnvironmentUnavailable,
            "build environment could not be started",
            json!({
                "reason": "engine_error",
                "code": output.code,
                "backend": backend.kind.as_str(),
                "image": image,
                "error": tail_lines(&output.stderr, STDERR_TAIL_LINES),
                "hint": "check that the container engine is running and the image can be pulled",
            }),
        )),
        code => Err(build_error(
            BuildErrorKind::InstallFailure,
            "dependency install failed",
            json!({
                "reason": "install_failed",
                "code": code,
                "backend": backend.kind.as_str(),
                "image": image,
                "error": format!("installer exited with status {code}"),
                "stderr": tail_lines(&output.stderr, STDERR_TAIL_LINES),
            }),
        )),
    }
}

/// Runs `pip install` inside a throwaway container of the runtime's build image.
#[derive(Clone, Debug)]
pub struct ContainerInstaller {
    backend: ContainerBackend,
    image: Option<String>,
    max_capture_bytes: usize,
    forwarded_env: Vec<(String, String)>,
}

impl ContainerInstaller {
    #[must_use]
    pub fn new(backend: ContainerBackend, image: Option<String>, max_capture_bytes: usize) -> Self {
        Self {
            backend,
            image,
            max_capture_bytes,
            forwarded_env: Vec::new(),
        }
    }

    /// Detect the backend named in `config` and forward proxy and index
    /// settings from the current environment.
    ///
    /// # Errors
    ///
    /// Returns `EnvironmentUnavailable` when no backend can be found.
    pub fn from_config(config: &BuildConfig) -> Result<Self, BuildError> {
        let backend = detect_container_backend(config.backend.as_deref())?;
        tracing::debug!(
            backend = backend.kind.as_str(),
            program = %backend.program.display(),
            "selected container backend"
        );
        let mut installer = Self::new(backend, config.image.clone(), config.max_capture_bytes);
        installer.forwarded_env = forwarded_env(&EnvSnapshot::capture());
        Ok(installer)
    }

    #[must_use]
    pub fn backend(&self) -> &ContainerBackend {
        &self.backend
    }

    fn image_for(&self, job: &InstallJob<'_>) -> String {
        self.image
            .clone()
            .unwrap_or_else(|| job.runtime.default_image(job.arch))
    }

    fn run_args(&self, job: &InstallJob<'_>, name: &str, image: &str) -> ContainerRunArgs {
        let mut env = vec![("HOME".to_string(), "/tmp".to_string())];
        env.extend(self.forwarded_env.iter().cloned());
        ContainerRunArgs {
            name: name.to_string(),
            platform: job.arch.platform().to_string(),
            user: self.user_for(job.staging),
            env,
            mounts: vec![Mount {
                host: job.staging.to_path_buf(),
                guest: PathBuf::from(GUEST_WORKDIR),
                read_only: false,
            }],
            workdir: PathBuf::from(GUEST_WORKDIR),
            image: image.to_string(),
            program: "/bin/sh".to_string(),
            args: vec![
                "-c".to_string(),
                install_script(job.requirements_file, job.site_packages),
            ],
        }
    }

    #[cfg(unix)]
    fn user_for(&self, staging: &Path) -> Option<String> {
        use std::os::unix::fs::MetadataExt;

        if self.backend.kind != BackendKind::Docker {
            return None;
        }
        let meta = std::fs::metadata(staging).ok()?;
        Some(format!("{}:{}", meta.uid(), meta.gid()))
    }

    #[cfg(not(unix))]
    fn user_for(&self, _staging: &Path) -> Option<String> {
        None
    }

    fn force_remove(&self, name: &str, cwd: &Path) {
        let program = self.backend.program.to_string_lossy().to_string();
        let args = vec!["rm".to_string(), "-f".to_string(), name.to_string()];
        match run_command(&program, &args, &[], cwd) {
            Ok(output) if output.success() => {
                tracing::debug!(container = name, "removed timed out container");
            }
            Ok(output) => {
                tracing::warn!(container = name, code = output.code, "failed to remove container");
            }
            Err(err) => tracing::warn!(container = name, %err, "failed to remove container"),
        }
    }
}

impl IsolatedInstaller for ContainerInstaller {
    fn install(&self, job: &InstallJob<'_>) -> Result<InstallReceipt, BuildError> {
        let image = self.image_for(job);
        let name = format!("pylayer-{:016x}", rand::random::<u64>());
        let args = build_run_args(&self.run_args(job, &name, &image));
        let program = self.backend.program.to_string_lossy().to_string();
        tracing::info!(
            backend = self.backend.kind.as_str(),
            image = %image,
            container = %name,
            runtime = job.runtime.as_str(),
            arch = job.arch.as_str(),
            "installing dependencies"
        );
        let output = run_command_with_options(
            &program,
            &args,
            &[],
            job.staging,
            RunOptions {
                timeout: Some(job.timeout),
                max_capture_bytes: self.max_capture_bytes,
            },
        )
        .map_err(|err| {
            build_error(
                BuildErrorKind::EnvironmentUnavailable,
                "failed to start container backend",
                json!({
                    "backend": self.backend.kind.as_str(),
                    "program": program,
                    "error": format!("{err:#}"),
                }),
            )
        })?;
        if output.timed_out {
            self.force_remove(&name, job.staging);
        }
        if !output.stdout.trim().is_empty() {
            tracing::debug!(stdout = %tail_lines(&output.stdout, STDERR_TAIL_LINES), "install output");
        }
        classify_exit(&output, &self.backend, &image, job.timeout)?;
        Ok(InstallReceipt {
            backend: self.backend.kind.as_str().to_string(),
            image,
        })
    }
}

fn forwarded_env(snapshot: &EnvSnapshot) -> Vec<(String, String)> {
    FORWARDED_ENV
        .iter()
        .filter_map(|key| {
            snapshot
                .value(key)
                .map(|value| ((*key).to_string(), value.to_string()))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use pylayer_domain::{Architecture, RuntimeId};
    use tempfile::tempdir;

    fn backend(kind: BackendKind) -> ContainerBackend {
        ContainerBackend {
            program: PathBuf::from("/usr/bin/docker"),
            kind,
        }
    }

    fn output(code: i32, stderr: &str, timed_out: bool) -> RunOutput {
        RunOutput {
            code,
            stdout: String::new(),
            stderr: stderr.to_string(),
            timed_out,
        }
    }

    #[test]
    fn run_args_pin_platform_mount_and_image() -> Result<()> {
        let dir = tempdir()?;
        let staging = dir.path().canonicalize()?;
        let installer = ContainerInstaller::new(backend(BackendKind::Podman), None, 1024);
        let site_packages = RuntimeId::Python39.site_packages();
        let job = InstallJob {
            staging: &staging,
            requirements_file: "requirements.txt",
            site_packages: &site_packages,
            runtime: RuntimeId::Python39,
            arch: Architecture::Arm64,
            timeout: Duration::from_secs(60),
        };
        let image = installer.image_for(&job);
        assert_eq!(image, "public.ecr.aws/sam/build-python3.9:latest-arm64");
        let args = build_run_args(&installer.run_args(&job, "pylayer-test", &image));
        let expected_volume = format!("{}:/var/task:rw,Z", staging.display());
        assert_eq!(&args[..8], &[
            "run",
            "--rm",
            "--name",
            "pylayer-test",
            "--platform",
            "linux/arm64",
            "--workdir",
            "/var/task",
        ]);
        assert!(args.windows(2).any(|pair| pair[0] == "--volume" && pair[1] == expected_volume));
        assert!(args.windows(2).any(|pair| pair[0] == "--env" && pair[1] == "HOME=/tmp"));
        assert!(!args.iter().any(|arg| arg == "--user"));
        let image_idx = args
            .iter()
            .position(|arg| arg == &image)
            .expect("image argument");
        assert_eq!(args[image_idx + 1], "/bin/sh");
        assert_eq!(args[image_idx + 2], "-c");
        assert_eq!(
            args[image_idx + 3],
            "pip install --no-cache-dir --no-compile --disable-pip-version-check \
             -r requirements.txt -t python/lib/python3.9/site-packages"
        );
        Ok(())
    }

    #[cfg(unix)]
    #[test]
    fn docker_runs_as_staging_owner() -> Result<()> {
        use std::os::unix::fs::MetadataExt;

        let dir = tempdir()?;
        let meta = std::fs::metadata(dir.path())?;
        let installer = ContainerInstaller::new(backend(BackendKind::Docker), None, 1024);
        assert_eq!(
            installer.user_for(dir.path()),
            Some(format!("{}:{}", meta.uid(), meta.gid()))
        );
        Ok(())
    }

    #[test]
    fn image_override_wins() {
        let installer = ContainerInstaller::new(
            backend(BackendKind::Docker),
            Some("registry.local/py39:1".into()),
            1024,
        );
        let staging = PathBuf::from("/tmp/unused");
        let site_packages = RuntimeId::Python39.site_packages();
        let job = InstallJob {
            staging: &staging,
            requirements_file: "requirements.txt",
            site_packages: &site_packages,
            runtime: RuntimeId::Python39,
            arch: Architecture::X86_64,
            timeout: Duration::from_secs(60),
        };
        assert_eq!(installer.image_for(&job), "registry.local/py39:1");
    }

    #[test]
    fn forwards_only_known_non_empty_variables() {
        let snapshot = EnvSnapshot::testing(&[
            ("HTTPS_PROXY", "http://proxy:3128"),
            ("PIP_INDEX_URL", " "),
            ("AWS_SECRET_ACCESS_KEY", "nope"),
        ]);
        assert_eq!(
            forwarded_env(&snapshot),
            vec![("HTTPS_PROXY".to_string(), "http://proxy:3128".to_string())]
        );
    }

    #[test]
    fn engine_error_is_environment_unavailable() {
        let err = classify_exit(
            &output(125, "Unable to find image\npull access denied", false),
            &backend(BackendKind::Docker),
            "img",
            Duration::from_secs(1),
        )
        .unwrap_err();
        assert_eq!(err.kind(), BuildErrorKind::EnvironmentUnavailable);
        assert_eq!(err.details()["code"], 125);
    }

    #[test]
    fn install_error_keeps_stderr_tail() {
        let stderr = (1..=30)
            .map(|idx| format!("line {idx}"))
            .collect::<Vec<_>>()
            .join("\n");
        let err = classify_exit(
            &output(1, &stderr, false),
            &backend(BackendKind::Docker),
            "img",
            Duration::from_secs(1),
        )
        .unwrap_err();
        assert_eq!(err.kind(), BuildErrorKind::InstallFailure);
        let tail = err.details()["stderr"].as_str().unwrap_or_default();
        assert!(tail.starts_with("line 11"));
        assert!(tail.ends_with("line 30"));
    }

    #[test]
    fn timeout_is_install_failure() {
        let err = classify_exit(
            &output(-1, "", true),
            &backend(BackendKind::Podman),
            "img",
            Duration::from_secs(5),
        )
        .unwrap_err();
        assert_eq!(err.kind(), BuildErrorKind::InstallFailure);
        assert_eq!(err.details()["reason"], "timeout");
        assert_eq!(err.details()["timeout_secs"], 5);
    }

    #[test]
    fn success_classifies_ok() {
        assert!(classify_exit(
            &output(0, "", false),
            &backend(BackendKind::Docker),
            "img",
            Duration::from_secs(1)
        )
        .is_ok());
    }

    #[test]
    fn missing_custom_backend_is_unavailable() {
        let err = detect_container_backend(Some("/nonexistent/pylayer-engine")).unwrap_err();
        assert_eq!(err.kind(), BuildErrorKind::EnvironmentUnavailable);
        assert_eq!(err.details()["reason"], "backend_not_found");
    }

    #[cfg(unix)]
    #[test]
    fn custom_backend_path_is_accepted() -> Result<()> {
        let dir = tempdir()?;
        let engine = dir.path().join("engine");
        std::fs::write(&engine, "#!/bin/sh\n")?;
        let backend = detect_container_backend(Some(&engine.display().to_string()))?;
        assert_eq!(backend.kind, BackendKind::Custom);
        assert_eq!(backend.program, engine);
        Ok(())
    }
}
