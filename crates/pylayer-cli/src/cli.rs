use std::path::PathBuf;
use std::time::Duration;

use clap::{ArgAction, Args, Parser, Subcommand};
use pylayer_core::{parse_timeout_secs, Architecture, RuntimeId};

pub const PYLAYER_BEFORE_HELP: &str = concat!(
    "pylayer ",
    env!("CARGO_PKG_VERSION"),
    " – Reproducible Python dependency layers\n\n",
    "\x1b[1;36mCommands\x1b[0m\n",
    "  build            Install a requirements file for a runtime and zip it as a layer.\n",
    "  build-all        Build one layer per function directory that has requirements.txt.\n",
    "  inspect          Check an existing layer archive against a runtime's layout.\n",
    "  runtimes         List supported runtime identifiers and their build images.\n",
);

#[derive(Parser, Debug)]
#[command(
    name = "pylayer",
    author,
    version,
    disable_help_subcommand = true,
    before_help = PYLAYER_BEFORE_HELP
)]
#[allow(clippy::struct_excessive_bools)]
pub struct LayerCli {
    #[arg(
        short,
        long,
        help = "Suppress human output (errors still print to stderr)",
        global = true
    )]
    pub quiet: bool,
    #[arg(
        short,
        long,
        action = ArgAction::Count,
        help = "Increase logging (-vv reaches trace)",
        global = true
    )]
    pub verbose: u8,
    #[arg(long, help = "Force trace logging regardless of -v/-q", global = true)]
    pub trace: bool,
    #[arg(
        long,
        help = "Emit {status,message,details} JSON envelopes",
        global = true
    )]
    pub json: bool,
    #[arg(long, help = "Disable colored human output", global = true)]
    pub no_color: bool,
    #[command(subcommand)]
    pub command: CommandCli,
}

#[derive(Subcommand, Debug)]
pub enum CommandCli {
    #[command(about = "Build one layer archive from a requirements file")]
    Build(BuildArgs),
    #[command(
        name = "build-all",
        about = "Build <layers-dir>/<name>/python.zip for every <functions-dir>/<name>/requirements.txt"
    )]
    BuildAll(BuildAllArgs),
    #[command(about = "Report the packages in a layer archive and check its layout")]
    Inspect(InspectArgs),
    #[command(about = "List supported runtimes")]
    Runtimes,
}

#[derive(Args, Debug, Clone)]
pub struct TargetArgs {
    #[arg(long, help = "Target runtime (python3.8 ... python3.13)")]
    pub runtime: RuntimeId,
    #[arg(long, default_value = "x86_64", help = "Target architecture (x86_64 or arm64)")]
    pub arch: Architecture,
    #[arg(
        long,
        value_name = "BACKEND",
        help = "Container engine: docker, podman, or a path (overrides PYLAYER_BACKEND)"
    )]
    pub backend: Option<String>,
    #[arg(
        long,
        value_name = "IMAGE",
        help = "Build image (overrides PYLAYER_IMAGE and the runtime default)"
    )]
    pub image: Option<String>,
    #[arg(
        long,
        value_name = "SECS",
        value_parser = parse_timeout_secs,
        help = "Install timeout in seconds (overrides PYLAYER_INSTALL_TIMEOUT)"
    )]
    pub timeout: Option<Duration>,
}

#[derive(Args, Debug)]
pub struct BuildArgs {
    #[arg(long, value_name = "FILE", help = "Requirements file listing the layer's dependencies")]
    pub requirements: PathBuf,
    #[arg(long, value_name = "PATH", help = "Archive to write (e.g. layers/fn/python.zip)")]
    pub output: PathBuf,
    #[command(flatten)]
    pub target: TargetArgs,
}

#[derive(Args, Debug)]
pub struct BuildAllArgs {
    #[arg(long, value_name = "DIR", help = "Directory holding one subdirectory per function")]
    pub functions_dir: PathBuf,
    #[arg(long, value_name = "DIR", help = "Directory receiving <name>/python.zip per function")]
    pub layers_dir: PathBuf,
    #[command(flatten)]
    pub target: TargetArgs,
}

#[derive(Args, Debug)]
pub struct InspectArgs {
    #[arg(value_name = "ARCHIVE")]
    pub archive: PathBuf,
    #[arg(long, help = "Runtime whose site-packages layout the archive must follow")]
    pub runtime: RuntimeId,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        LayerCli::command().debug_assert();
    }

    #[test]
    fn parses_build_with_overrides() {
        let cli = LayerCli::try_parse_from([
            "pylayer",
            "--json",
            "build",
            "--requirements",
            "requirements.txt",
            "--runtime",
            "Python3.9",
            "--output",
            "layers/fn/python.zip",
            "--arch",
            "aarch64",
            "--timeout",
            "60",
        ])
        .expect("valid command line");
        assert!(cli.json);
        let CommandCli::Build(args) = cli.command else {
            panic!("expected build");
        };
        assert_eq!(args.target.runtime, RuntimeId::Python39);
        assert_eq!(args.target.arch, Architecture::Arm64);
        assert_eq!(args.target.timeout, Some(Duration::from_secs(60)));
    }

    #[test]
    fn rejects_unknown_runtime_and_zero_timeout() {
        let base = [
            "pylayer",
            "build",
            "--requirements",
            "r.txt",
            "--output",
            "python.zip",
        ];
        let unknown = base.iter().copied().chain(["--runtime", "python2.7"]);
        assert!(LayerCli::try_parse_from(unknown).is_err());
        let zero = base
            .iter()
            .copied()
            .chain(["--runtime", "python3.9", "--timeout", "0"]);
        assert!(LayerCli::try_parse_from(zero).is_err());
    }
}
