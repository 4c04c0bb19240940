//! Export the CLI structure as JSON for the generated command reference

use clap::{Arg, Command};
use serde::Serialize;

/// A flag or option
#[derive(Debug, Serialize)]
pub struct CliOption {
    pub long: String,
    pub short: Option<char>,
    pub value_name: Option<String>,
    pub default: Option<String>,
    /// Environment variable the value may be read from
    pub env: Option<String>,
    pub help: String,
    pub possible_values: Vec<String>,
    pub required: bool,
    pub global: bool,
}

/// A command and its visible subcommands
#[derive(Debug, Serialize)]
pub struct CliCommand {
    pub name: String,
    pub about: Option<String>,
    pub options: Vec<CliOption>,
    pub subcommands: Vec<CliCommand>,
}

fn option_to_json(arg: &Arg) -> CliOption {
    let id = arg.get_id().as_str();
    CliOption {
        long: arg.get_long().unwrap_or(id).to_string(),
        short: arg.get_short(),
        value_name: arg
            .get_value_names()
            .and_then(|names| names.first())
            .map(|n| n.to_string()),
        default: arg
            .get_default_values()
            .first()
            .and_then(|v| v.to_str())
            .map(ToOwned::to_owned),
        env: arg
            .get_env()
            .and_then(|e| e.to_str())
            .map(ToOwned::to_owned),
        help: arg.get_help().map(|h| h.to_string()).unwrap_or_default(),
        possible_values: arg
            .get_possible_values()
            .iter()
            .map(|v| v.get_name().to_string())
            .collect(),
        required: arg.is_required_set(),
        global: arg.is_global_set(),
    }
}

/// Convert a clap Command, skipping hidden arguments and subcommands
pub fn command_to_json(cmd: &Command) -> CliCommand {
    let options = cmd
        .get_arguments()
        .filter(|arg| !arg.is_hide_set() && !arg.is_positional())
        .filter(|arg| !matches!(arg.get_id().as_str(), "help" | "version"))
        .map(option_to_json)
        .collect();

    CliCommand {
        name: cmd.get_name().to_string(),
        about: cmd.get_about().map(|s| s.to_string()),
        options,
        subcommands: cmd
            .get_subcommands()
            .filter(|c| !c.is_hide_set())
            .map(command_to_json)
            .collect(),
    }
}

/// Dump the complete CLI structure as JSON
pub fn dump_cli_json() -> color_eyre::Result<String> {
    use clap::CommandFactory;

    let cmd = crate::Cli::command();
    Ok(serde_json::to_string_pretty(&command_to_json(&cmd))?)
}
