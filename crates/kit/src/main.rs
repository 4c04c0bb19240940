use clap::{Parser, Subcommand};
use color_eyre::{Report, Result};

#[cfg(feature = "docgen")]
mod cli_json;
mod cloud;
mod image;
mod poll;
mod utils;

/// Manage PowerVS workspaces on IBM Cloud.
///
/// pvsimg imports disk images stored in Cloud Object Storage into Power
/// Systems Virtual Server workspaces, provisioning storage credentials on
/// demand and following the server-side job until the image is usable.
#[derive(Parser)]
#[command(version)]
struct Cli {
    #[command(flatten)]
    cloud: cloud::CloudOpts,

    /// Enable debug logging (overridden by RUST_LOG)
    #[clap(long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Internal diagnostic and tooling commands for development
#[derive(Parser)]
struct InternalsOpts {
    #[command(subcommand)]
    command: InternalsCmds,
}

#[derive(Subcommand)]
enum InternalsCmds {
    /// Dump CLI structure as JSON for documentation generation
    #[cfg(feature = "docgen")]
    DumpCliJson,
    /// Render man pages into a directory
    #[cfg(feature = "docgen")]
    Man {
        /// Output directory
        directory: std::path::PathBuf,
    },
}

/// Available pvsimg commands.
#[derive(Subcommand)]
enum Commands {
    /// Manage PowerVS images
    #[clap(subcommand)]
    Image(image::ImageCommands),

    /// Internal diagnostic and tooling commands for development
    #[clap(hide = true)]
    Internals(InternalsOpts),
}

/// Install and configure the tracing/logging system.
///
/// Logs are filtered by the RUST_LOG environment variable, defaulting to
/// `info`, or `debug` when requested on the command line.
fn install_tracing(debug: bool) {
    use tracing_error::ErrorLayer;
    use tracing_subscriber::fmt;
    use tracing_subscriber::prelude::*;
    use tracing_subscriber::EnvFilter;

    let default_level = if debug { "debug" } else { "info" };
    let fmt_layer = fmt::layer().with_target(false).with_writer(std::io::stderr);
    let filter_layer = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_level))
        .unwrap();

    tracing_subscriber::registry()
        .with(filter_layer)
        .with(fmt_layer)
        .with(ErrorLayer::default())
        .init();
}

fn main() -> Result<(), Report> {
    let cli = Cli::parse();
    install_tracing(cli.debug);
    color_eyre::install()?;

    match cli.command {
        Commands::Image(cmd) => cmd.run(&cli.cloud)?,
        Commands::Internals(opts) => match opts.command {
            #[cfg(feature = "docgen")]
            InternalsCmds::DumpCliJson => {
                let json = cli_json::dump_cli_json()?;
                println!("{}", json);
            }
            #[cfg(feature = "docgen")]
            InternalsCmds::Man { directory } => {
                use clap::CommandFactory;
                std::fs::create_dir_all(&directory)?;
                clap_mangen::generate_to(Cli::command(), &directory)?;
            }
        },
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_global_options_after_subcommand() {
        let cli = Cli::try_parse_from([
            "pvsimg",
            "image",
            "import",
            "--workspace-name",
            "ws",
            "-b",
            "b",
            "-r",
            "us-south",
            "-o",
            "disk.ova.gz",
            "--pvs-image-name",
            "img",
            "--env",
            "test",
            "--api-key",
            "k",
            "--debug",
        ])
        .unwrap();
        assert!(cli.debug);
        assert_eq!(cli.cloud.environment, cloud::CloudEnvironment::Test);
        assert_eq!(cli.cloud.api_key.as_deref(), Some("k"));
        assert!(matches!(
            cli.command,
            Commands::Image(image::ImageCommands::Import(_))
        ));
    }
}
