//! End-to-end checks of the pvsimg binary.
//!
//! These run without network access: every case fails (or exits) before
//! the first request to IBM Cloud would be made.

use std::path::Path;
use std::process::Output;

use color_eyre::eyre::{eyre, Context};
use color_eyre::Result;
use libtest_mimic::{Arguments, Trial};
use xshell::{cmd, Shell};

/// Arguments that satisfy every required import flag
const IMPORT_ARGS: &[&str] = &[
    "image",
    "import",
    "--workspace-name",
    "ws-integration",
    "-b",
    "bucket",
    "-r",
    "us-south",
    "-o",
    "rhel.ova.gz",
    "--pvs-image-name",
    "rhel-test",
];

/// Get the path to the pvsimg binary, checking PVSIMG_PATH env var first,
/// then falling back to "pvsimg"
pub(crate) fn get_pvsimg_command() -> Result<String> {
    if let Ok(path) = std::env::var("PVSIMG_PATH") {
        return Ok(path);
    }
    // Force the user to set this if we're running from the project dir
    if let Some(path) = ["target/debug/pvsimg", "target/release/pvsimg"]
        .into_iter()
        .find(|p| Path::new(p).exists())
    {
        return Err(eyre!(
            "Detected {path} - set PVSIMG_PATH={path} to run using this binary"
        ));
    }
    Ok("pvsimg".to_owned())
}

/// Run pvsimg with `args` and no API key in the environment
fn run_pvsimg(args: &[&str]) -> Result<Output> {
    let sh = Shell::new()?;
    let pvsimg = get_pvsimg_command()?;
    let output = cmd!(sh, "{pvsimg} {args...}")
        .env_remove("IBMCLOUD_API_KEY")
        .ignore_status()
        .output()
        .with_context(|| format!("Running {pvsimg}"))?;
    Ok(output)
}

/// Expect a failing exit whose stderr mentions `needle`
fn assert_fails_with(args: &[&str], needle: &str) -> Result<()> {
    let output = run_pvsimg(args)?;
    let stderr = String::from_utf8_lossy(&output.stderr);
    if output.status.success() {
        return Err(eyre!("pvsimg {} unexpectedly succeeded", args.join(" ")));
    }
    if !stderr.contains(needle) {
        return Err(eyre!("Expected {needle:?} in stderr, got:\n{stderr}"));
    }
    Ok(())
}

fn import_args_with<'a>(extra: &[&'a str]) -> Vec<&'a str> {
    IMPORT_ARGS.iter().copied().chain(extra.iter().copied()).collect()
}

fn test_import_help() -> Result<()> {
    let output = run_pvsimg(&["image", "import", "--help"])?;
    if !output.status.success() {
        return Err(eyre!("--help exited with {}", output.status));
    }
    let stdout = String::from_utf8(output.stdout)?;
    for flag in [
        "--workspace-name",
        "--bucket",
        "--pvs-storagetype",
        "--watch-timeout",
        "--cos-service-cred",
    ] {
        if !stdout.contains(flag) {
            return Err(eyre!("{flag} missing from help output:\n{stdout}"));
        }
    }
    if stdout.contains("--pvs-instance-name") {
        return Err(eyre!("deprecated flag shown in help output"));
    }
    Ok(())
}

fn test_internals_hidden() -> Result<()> {
    let output = run_pvsimg(&["--help"])?;
    let stdout = String::from_utf8(output.stdout)?;
    if stdout.contains("internals") {
        return Err(eyre!("internals listed in top-level help:\n{stdout}"));
    }
    Ok(())
}

fn test_accesskey_requires_secretkey() -> Result<()> {
    assert_fails_with(
        &import_args_with(&["--accesskey", "AKID"]),
        "required both --accesskey and --secretkey values",
    )
}

fn test_workspace_required() -> Result<()> {
    let args: Vec<&str> = IMPORT_ARGS
        .iter()
        .copied()
        .filter(|a| *a != "--workspace-name" && *a != "ws-integration")
        .collect();
    assert_fails_with(&args, "--workspace-id or --workspace-name required")
}

fn test_invalid_storage_type() -> Result<()> {
    assert_fails_with(
        &import_args_with(&["--pvs-storagetype", "tier2"]),
        "Allowable values are [tier0, tier1, tier3, tier5k]",
    )
}

fn test_invalid_watch_timeout() -> Result<()> {
    assert_fails_with(&import_args_with(&["--watch-timeout", "soon"]), "soon")
}

fn test_missing_api_key() -> Result<()> {
    assert_fails_with(IMPORT_ARGS, "IBMCLOUD_API_KEY")
}

fn test_deprecated_workspace_flag() -> Result<()> {
    let args: Vec<&str> = IMPORT_ARGS
        .iter()
        .map(|a| if *a == "--workspace-name" { "-n" } else { *a })
        .collect();
    // Accepted, so the run proceeds to authentication
    assert_fails_with(&args, "IBMCLOUD_API_KEY")
}

fn main() {
    let args = Arguments::from_args();

    let tests = vec![
        Trial::test("import_help", || Ok(test_import_help()?)),
        Trial::test("internals_hidden", || Ok(test_internals_hidden()?)),
        Trial::test("accesskey_requires_secretkey", || {
            Ok(test_accesskey_requires_secretkey()?)
        }),
        Trial::test("workspace_required", || Ok(test_workspace_required()?)),
        Trial::test("invalid_storage_type", || Ok(test_invalid_storage_type()?)),
        Trial::test("invalid_watch_timeout", || {
            Ok(test_invalid_watch_timeout()?)
        }),
        Trial::test("missing_api_key", || Ok(test_missing_api_key()?)),
        Trial::test("deprecated_workspace_flag", || {
            Ok(test_deprecated_workspace_flag()?)
        }),
    ];

    libtest_mimic::run(&args, tests).exit();
}
