//! Generated CLI documentation
//!
//! The CLI definition is the source of truth: `pvsimg internals
//! dump-cli-json` exports it, and we render that into a Markdown reference.
//! Man pages are produced directly by the binary via clap_mangen.

use camino::Utf8Path;
use color_eyre::eyre::Context;
use color_eyre::Result;
use serde::Deserialize;
use xshell::{cmd, Shell};

const CLI_REFERENCE: &str = "docs/cli-reference.md";
const MAN_DIR: &str = "target/man";

/// An option as exported by the CLI JSON dump
#[derive(Debug, Deserialize)]
struct CliOption {
    long: String,
    short: Option<char>,
    value_name: Option<String>,
    default: Option<String>,
    env: Option<String>,
    help: String,
    possible_values: Vec<String>,
    required: bool,
}

/// A command as exported by the CLI JSON dump
#[derive(Debug, Deserialize)]
struct CliCommand {
    name: String,
    about: Option<String>,
    options: Vec<CliOption>,
    subcommands: Vec<CliCommand>,
}

fn extract_cli_json(sh: &Shell) -> Result<CliCommand> {
    let json_output = cmd!(
        sh,
        "cargo run -q -p pvsimg --features docgen -- internals dump-cli-json"
    )
    .read()
    .context("Running CLI JSON dump command")?;
    serde_json::from_str(&json_output).context("Parsing CLI JSON output")
}

fn render_option(out: &mut String, opt: &CliOption) {
    let mut flag = String::new();
    if let Some(short) = opt.short {
        flag.push_str(&format!("`-{short}`, "));
    }
    flag.push_str(&format!("`--{}", opt.long));
    if let Some(value) = &opt.value_name {
        flag.push_str(&format!("={value}"));
    }
    flag.push('`');
    out.push_str(&format!("- {flag}: {}\n", opt.help));

    if opt.required {
        out.push_str("  Required.\n");
    }
    if let Some(default) = &opt.default {
        out.push_str(&format!("  Default: `{default}`.\n"));
    }
    if let Some(env) = &opt.env {
        out.push_str(&format!("  Environment: `{env}`.\n"));
    }
    if !opt.possible_values.is_empty() {
        out.push_str(&format!(
            "  Values: {}.\n",
            opt.possible_values.join(", ")
        ));
    }
}

fn render_command(out: &mut String, cmd: &CliCommand, path: &[&str]) {
    let mut path = path.to_vec();
    path.push(&cmd.name);

    let depth = path.len().min(4);
    out.push_str(&format!("{} {}\n\n", "#".repeat(depth), path.join(" ")));
    if let Some(about) = &cmd.about {
        out.push_str(&format!("{about}\n\n"));
    }
    if !cmd.options.is_empty() {
        for opt in &cmd.options {
            render_option(out, opt);
        }
        out.push('\n');
    }
    for sub in &cmd.subcommands {
        render_command(out, sub, &path);
    }
}

fn render_reference(cli: &CliCommand) -> String {
    let mut out = String::from("<!-- Generated by `cargo xtask cli-docs`; do not edit. -->\n\n");
    render_command(&mut out, cli, &[]);
    out
}

/// Regenerate the Markdown CLI reference
pub(crate) fn update_cli_reference(sh: &Shell) -> Result<()> {
    let cli = extract_cli_json(sh)?;
    let target = Utf8Path::new(CLI_REFERENCE);
    if let Some(parent) = target.parent() {
        sh.create_dir(parent)?;
    }
    sh.write_file(target, render_reference(&cli))?;
    println!("Updated {target}");
    Ok(())
}

/// Render man pages into target/man
pub(crate) fn generate_man_pages(sh: &Shell) -> Result<()> {
    let dir = Utf8Path::new(MAN_DIR);
    cmd!(
        sh,
        "cargo run -q -p pvsimg --features docgen -- internals man {dir}"
    )
    .run()
    .context("Generating man pages")?;
    println!("Man pages written to {dir}");
    Ok(())
}
