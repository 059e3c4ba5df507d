#![allow(
    clippy::missing_errors_doc,
    clippy::module_name_repetitions,
    clippy::must_use_candidate
)]

mod archive;
mod backend;
mod batch;
mod builder;
mod commands;
mod config;
mod error;
mod fs;
mod inspect;
mod installer;
mod lock;
mod outcome;
mod process;
mod staging;
mod timings;

pub use archive::ArchiveSummary;
pub use backend::{detect_container_backend, BackendKind, ContainerBackend, ContainerInstaller};
pub use batch::{build_all, plan_layers, LayerPlan, LayerResult, LAYER_ARCHIVE_NAME};
pub use builder::{BuildReport, BuildRequest, LayerBuilder};
pub use commands::{
    build_layer, build_layers, execute, inspect_layer, list_runtimes, BuildAllRequest,
    BuildLayerRequest, BuildSettings, InspectRequest, LayerCommand,
};
pub use config::{
    parse_timeout_secs, BuildConfig, EnvSnapshot, DEFAULT_INSTALL_TIMEOUT,
    DEFAULT_MAX_CAPTURE_BYTES,
};
pub use error::{BuildError, BuildErrorKind};
pub use inspect::{inspect_archive, ArchiveInspection, DistributionInfo};
pub use installer::{InstallJob, InstallReceipt, IsolatedInstaller, REQUIREMENTS_FILE};
pub use outcome::{to_json_response, CommandStatus, ExecutionOutcome};
pub use process::{run_command, run_command_with_options, tail_lines, RunOptions, RunOutput};
pub use timings::PhaseTimings;

pub use pylayer_domain::{Architecture, DependencyManifest, RuntimeId};
