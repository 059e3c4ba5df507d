use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

const DEFAULT_IMAGE_REGISTRY: &str = "public.ecr.aws/sam";

/// Python runtimes a layer can target.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum RuntimeId {
    Python38,
    Python39,
    Python310,
    Python311,
    Python312,
    Python313,
}

impl RuntimeId {
    pub const ALL: [RuntimeId; 6] = [
        RuntimeId::Python38,
        RuntimeId::Python39,
        RuntimeId::Python310,
        RuntimeId::Python311,
        RuntimeId::Python312,
        RuntimeId::Python313,
    ];

    pub const fn as_str(self) -> &'static str {
        match self {
            RuntimeId::Python38 => "python3.8",
            RuntimeId::Python39 => "python3.9",
            RuntimeId::Python310 => "python3.10",
            RuntimeId::Python311 => "python3.11",
            RuntimeId::Python312 => "python3.12",
            RuntimeId::Python313 => "python3.13",
        }
    }

    /// Directory (relative to the archive root) the runtime adds to `sys.path`.
    pub fn site_packages(self) -> String {
        format!("python/lib/{}/site-packages", self.as_str())
    }

    /// Build image whose OS/ABI matches the deployed runtime.
    pub fn default_image(self, arch: Architecture) -> String {
        format!(
            "{DEFAULT_IMAGE_REGISTRY}/build-{}:latest-{}",
            self.as_str(),
            arch.as_str()
        )
    }
}

impl fmt::Display for RuntimeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unsupported value `{value}` (expected one of: {expected})")]
pub struct RuntimeParseError {
    pub value: String,
    pub expected: String,
}

impl FromStr for RuntimeId {
    type Err = RuntimeParseError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let lowered = raw.trim().to_ascii_lowercase();
        RuntimeId::ALL
            .into_iter()
            .find(|runtime| runtime.as_str() == lowered)
            .ok_or_else(|| RuntimeParseError {
                value: raw.trim().to_string(),
                expected: RuntimeId::ALL
                    .iter()
                    .map(|runtime| runtime.as_str())
                    .collect::<Vec<_>>()
                    .join(", "),
            })
    }
}

impl TryFrom<String> for RuntimeId {
    type Error = RuntimeParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<RuntimeId> for String {
    fn from(value: RuntimeId) -> Self {
        value.as_str().to_string()
    }
}

/// CPU architecture of the deployment target.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Architecture {
    #[default]
    X86_64,
    Arm64,
}

impl Architecture {
    pub const fn as_str(self) -> &'static str {
        match self {
            Architecture::X86_64 => "x86_64",
            Architecture::Arm64 => "arm64",
        }
    }

    /// Container platform string understood by docker and podman.
    pub const fn platform(self) -> &'static str {
        match self {
            Architecture::X86_64 => "linux/amd64",
            Architecture::Arm64 => "linux/arm64",
        }
    }
}

impl fmt::Display for Architecture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Architecture {
    type Err = RuntimeParseError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "x86_64" | "amd64" => Ok(Architecture::X86_64),
            "arm64" | "aarch64" => Ok(Architecture::Arm64),
            _ => Err(RuntimeParseError {
                value: raw.trim().to_string(),
                expected: "x86_64, arm64".to_string(),
            }),
        }
    }
}
