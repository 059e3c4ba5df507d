use atty::Stream;
use clap::Parser;
use color_eyre::{eyre::eyre, Result};
use pylayer_core::{
    BuildAllRequest, BuildLayerRequest, BuildSettings, CommandStatus, ExecutionOutcome,
    InspectRequest, LayerCommand,
};
use serde_json::Value;

mod cli;
mod style;

use cli::{CommandCli, LayerCli, TargetArgs};
use style::Style;

fn main() -> Result<()> {
    color_eyre::install()?;

    let cli = LayerCli::parse();
    init_tracing(cli.trace, cli.verbose, cli.quiet);

    let command = build_command(&cli.command);
    tracing::debug!(command = command.name(), "dispatching");
    let outcome = pylayer_core::execute(&command).map_err(|err| eyre!("{err:?}"))?;
    let code = emit_output(&cli, &command, &outcome)?;

    if code == 0 {
        Ok(())
    } else {
        std::process::exit(code);
    }
}

fn init_tracing(trace: bool, verbose: u8, quiet: bool) {
    let level = if trace {
        "trace"
    } else if quiet {
        "warn"
    } else {
        match verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };

    let filter = format!("pylayer={level},pylayer_cli={level},pylayer_core={level}");
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_level(true)
        .finish();

    let _ = tracing::subscriber::set_global_default(subscriber);
}

fn settings(target: &TargetArgs) -> BuildSettings {
    BuildSettings {
        runtime: target.runtime,
        arch: target.arch,
        backend: target.backend.clone(),
        image: target.image.clone(),
        timeout: target.timeout,
    }
}

fn build_command(command: &CommandCli) -> LayerCommand {
    match command {
        CommandCli::Build(args) => LayerCommand::Build(BuildLayerRequest {
            requirements: args.requirements.clone(),
            output: args.output.clone(),
            settings: settings(&args.target),
        }),
        CommandCli::BuildAll(args) => LayerCommand::BuildAll(BuildAllRequest {
            functions_dir: args.functions_dir.clone(),
            layers_dir: args.layers_dir.clone(),
            settings: settings(&args.target),
        }),
        CommandCli::Inspect(args) => LayerCommand::Inspect(InspectRequest {
            archive: args.archive.clone(),
            runtime: args.runtime,
        }),
        CommandCli::Runtimes => LayerCommand::Runtimes,
    }
}

fn emit_output(cli: &LayerCli, command: &LayerCommand, outcome: &ExecutionOutcome) -> Result<i32> {
    let code = outcome.exit_code();
    let style = Style::new(cli.no_color, atty::is(Stream::Stdout));

    if cli.json {
        let payload = pylayer_core::to_json_response(command.name(), outcome);
        println!("{}", serde_json::to_string_pretty(&payload)?);
        return Ok(code);
    }

    if cli.quiet {
        if outcome.status != CommandStatus::Ok {
            eprintln!("{}", outcome.message);
        }
        return Ok(code);
    }

    println!("{}", style.status(outcome.status, &outcome.message));
    for line in detail_lines(command, &outcome.details) {
        println!("  {}", style.dimmed(&line));
    }
    if let Some(stderr) = detail_str(&outcome.details, "stderr") {
        for line in stderr.lines() {
            println!("  {}", style.dimmed(line));
        }
    }
    if let Some(hint) = detail_str(&outcome.details, "hint") {
        println!("{}", style.info(&format!("Hint: {hint}")));
    }
    Ok(code)
}

fn detail_str<'a>(details: &'a Value, key: &str) -> Option<&'a str> {
    details
        .as_object()
        .and_then(|map| map.get(key))
        .and_then(Value::as_str)
        .filter(|value| !value.trim().is_empty())
}

fn detail_lines(command: &LayerCommand, details: &Value) -> Vec<String> {
    let mut lines = Vec::new();
    match command {
        LayerCommand::BuildAll(_) => {
            for layer in details["layers"].as_array().into_iter().flatten() {
                let name = layer["name"].as_str().unwrap_or("?");
                match layer["status"].as_str() {
                    Some("built") => lines.push(format!(
                        "{name}: {}",
                        layer["report"]["output"].as_str().unwrap_or_default()
                    )),
                    _ => lines.push(format!(
                        "{name}: {}",
                        layer["error"].as_str().unwrap_or("failed")
                    )),
                }
            }
        }
        LayerCommand::Inspect(_) => {
            let packages = details["packages"]
                .as_array()
                .into_iter()
                .flatten()
                .filter_map(Value::as_str)
                .collect::<Vec<_>>();
            if !packages.is_empty() {
                lines.push(format!("packages: {}", packages.join(", ")));
            }
            for violation in details["violations"].as_array().into_iter().flatten() {
                if let Some(name) = violation.as_str() {
                    lines.push(format!("outside layout: {name}"));
                }
            }
        }
        LayerCommand::Runtimes => {
            for runtime in details["runtimes"].as_array().into_iter().flatten() {
                lines.push(format!(
                    "{}  {}",
                    runtime["id"].as_str().unwrap_or_default(),
                    runtime["site_packages"].as_str().unwrap_or_default()
                ));
            }
        }
        LayerCommand::Build(_) => {
            if let Some(image) = detail_str(details, "image") {
                lines.push(format!("image: {image}"));
            }
            if let Some(error) = detail_str(details, "error") {
                lines.push(format!("cause: {error}"));
            }
        }
    }
    lines
}
