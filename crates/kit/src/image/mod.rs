//! PowerVS image management
//!
//! - `import`: import an image from Cloud Object Storage into a workspace

use clap::Subcommand;
use color_eyre::Result;

use crate::cloud::CloudOpts;

pub(crate) mod credentials;
pub(crate) mod import;

/// Image subcommands
#[derive(Debug, Subcommand)]
pub(crate) enum ImageCommands {
    /// Import an image from Cloud Object Storage into a PowerVS workspace
    ///
    /// Starts a server-side import job and waits for it to finish. For
    /// private buckets without an explicit key pair, HMAC credentials are
    /// discovered or created in the COS instance holding the bucket.
    Import(import::ImportOpts),
}

impl ImageCommands {
    pub(crate) fn run(self, cloud: &CloudOpts) -> Result<()> {
        match self {
            ImageCommands::Import(opts) => import::run(cloud, opts),
        }
    }
}
