#![allow(
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::must_use_candidate
)]

pub mod manifest;
pub mod runtime;

pub use manifest::{
    canonicalize_package_name, read_manifest, Dependency, DependencyManifest, ManifestError,
};
pub use runtime::{Architecture, RuntimeId, RuntimeParseError};
