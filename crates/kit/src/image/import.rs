//! Import a disk image from Cloud Object Storage into a PowerVS workspace
//!
//! The import runs server-side as a job. We wait for the job to finish,
//! look the new image up by name and, with `--watch`, wait for it to become
//! active.

use std::time::Duration;

use clap::Parser;
use color_eyre::eyre::{eyre, Context};
use color_eyre::{Report, Result};
use indoc::indoc;
use strum::VariantNames;
use tracing::{debug, info, warn};

use super::credentials::{obtain_hmac_keys, CloudCredentials, CredentialService, HmacKeys};
use crate::cloud::powervs::{
    self, BucketAccess, Image, ImageState, ImportImageRequest, Job, JobReference, JobState,
    PowerVs, StorageTierInfo,
};
use crate::cloud::resource_controller::ResourceController;
use crate::cloud::CloudOpts;
use crate::poll::{poll_until_with_clock, Clock, PollError, SystemClock};
use crate::utils::{format_duration, parse_duration};

/// Interval between import job status queries.
pub(crate) const JOB_POLL_INTERVAL: Duration = Duration::from_secs(120);
/// Interval between image state queries while watching.
pub(crate) const IMAGE_POLL_INTERVAL: Duration = Duration::from_secs(10);

const EXAMPLES: &str = indoc! {r#"
    The API key is read from IBMCLOUD_API_KEY or --api-key.

    To import across two IBM Cloud accounts use --accesskey and --secretkey.
    To import from a public bucket use --public-bucket.

    Examples:

    # Import using the default storage type (a service credential is auto-generated)
    pvsimg image import --workspace-name upstream-core-lon04 -b <BUCKET> \
        --object rhel-83-10032020.ova.gz --pvs-image-name test-image -r <REGION>

    # Import with an explicit HMAC key pair
    pvsimg image import --workspace-name upstream-core-lon04 -b <BUCKET> \
        --accesskey <ACCESSKEY> --secretkey <SECRETKEY> \
        --object rhel-83-10032020.ova.gz --pvs-image-name test-image -r <REGION>

    # Import with a specific storage type
    pvsimg image import --workspace-name upstream-core-lon04 -b <BUCKET> \
        --pvs-storagetype tier1 --object rhel-83-10032020.ova.gz \
        --pvs-image-name test-image -r <REGION>

    # Import from a public bucket and wait for the image to become active
    pvsimg image import --workspace-name upstream-core-lon04 -b <BUCKET> \
        --object rhel-83-10032020.ova.gz --pvs-image-name test-image -r <REGION> \
        --public-bucket --watch
"#};

/// PowerVS storage tiers an image may be imported into.
///
/// Tier 0: 25 IOPS/GB; Tier 1: 10 IOPS/GB; Tier 3: 3 IOPS/GB;
/// Tier 5k: 5000 IOPS regardless of size (limited to volumes of 200 GB or less).
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, strum::Display, strum::EnumString, strum::VariantNames,
)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub(crate) enum StorageType {
    Tier0,
    Tier1,
    Tier3,
    Tier5k,
}

fn parse_storage_type(s: &str) -> std::result::Result<StorageType, String> {
    s.parse().map_err(|_| {
        format!(
            "provide valid StorageType. Allowable values are [{}]",
            StorageType::VARIANTS.join(", ")
        )
    })
}

fn parse_watch_timeout(s: &str) -> std::result::Result<Duration, String> {
    parse_duration(s).map_err(|e| format!("{e:#}"))
}

/// Options for importing an image into a PowerVS workspace
#[derive(Debug, Parser)]
#[command(after_long_help = EXAMPLES)]
pub(crate) struct ImportOpts {
    /// PowerVS workspace name
    #[clap(long)]
    pub workspace_name: Option<String>,

    /// PowerVS workspace ID
    #[clap(long)]
    pub workspace_id: Option<String>,

    /// Deprecated, use --workspace-name
    #[clap(long, short = 'n', hide = true)]
    pub pvs_instance_name: Option<String>,

    /// Deprecated, use --workspace-id
    #[clap(long, short = 'i', hide = true)]
    pub pvs_instance_id: Option<String>,

    /// Cloud Object Storage bucket name
    #[clap(long, short = 'b')]
    pub bucket: String,

    /// Cloud Object Storage instance name (deprecated, ignored)
    #[clap(long, short = 's', hide = true)]
    pub cos_instance_name: Option<String>,

    /// Cloud Object Storage bucket location
    #[clap(long, short = 'r')]
    pub bucket_region: String,

    /// Cloud Object Storage object name
    #[clap(long, short = 'o')]
    pub object: String,

    /// Cloud Object Storage HMAC access key
    #[clap(long)]
    pub accesskey: Option<String>,

    /// Cloud Object Storage HMAC secret key
    #[clap(long)]
    pub secretkey: Option<String>,

    /// Name of the imported PowerVS image
    #[clap(long = "pvs-image-name")]
    pub image_name: String,

    /// The Cloud Object Storage bucket is public
    #[clap(long, short = 'p')]
    pub public_bucket: bool,

    /// After the import, watch for the image to be published and ready to use
    #[clap(long, short = 'w')]
    pub watch: bool,

    /// How long to wait for the import job, and for the image when watching
    #[clap(long, default_value = "1h", value_parser = parse_watch_timeout)]
    pub watch_timeout: Duration,

    /// PowerVS storage type: tier0, tier1, tier3 or tier5k
    #[clap(long = "pvs-storagetype", default_value = "tier3", value_parser = parse_storage_type)]
    pub storage_type: StorageType,

    /// Name of the COS service credential to auto-generate
    /// (default "pvsimg-service-cred-<COS instance name>")
    #[clap(long = "cos-service-cred")]
    pub service_credential_name: Option<String>,
}

/// Validated import settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ImportConfig {
    pub(crate) workspace_id: Option<String>,
    pub(crate) workspace_name: Option<String>,
    pub(crate) bucket: String,
    pub(crate) bucket_region: String,
    pub(crate) object: String,
    pub(crate) image_name: String,
    /// Explicit key pair; discovered on demand for private buckets when unset
    pub(crate) credentials: Option<HmacKeys>,
    pub(crate) public_bucket: bool,
    pub(crate) watch: bool,
    pub(crate) watch_timeout: Duration,
    pub(crate) storage_type: StorageType,
    pub(crate) service_credential_name: Option<String>,
    pub(crate) job_poll_interval: Duration,
    pub(crate) image_poll_interval: Duration,
}

fn non_empty(s: Option<String>) -> Option<String> {
    s.filter(|s| !s.is_empty())
}

impl TryFrom<ImportOpts> for ImportConfig {
    type Error = Report;

    fn try_from(opts: ImportOpts) -> Result<Self> {
        if opts.pvs_instance_name.is_some() {
            warn!("--pvs-instance-name is deprecated, --workspace-name should be used");
        }
        if opts.pvs_instance_id.is_some() {
            warn!("--pvs-instance-id is deprecated, --workspace-id should be used");
        }
        if opts.cos_instance_name.is_some() {
            warn!("--cos-instance-name is deprecated and ignored");
        }

        let credentials = match (non_empty(opts.accesskey), non_empty(opts.secretkey)) {
            (Some(access_key_id), Some(secret_access_key)) => Some(HmacKeys {
                access_key_id,
                secret_access_key,
            }),
            (None, None) => None,
            _ => return Err(eyre!("required both --accesskey and --secretkey values")),
        };

        let workspace_id = non_empty(opts.workspace_id).or(non_empty(opts.pvs_instance_id));
        let workspace_name =
            non_empty(opts.workspace_name).or(non_empty(opts.pvs_instance_name));
        if workspace_id.is_none() && workspace_name.is_none() {
            return Err(eyre!(
                "--workspace-id or --workspace-name required and cannot be empty"
            ));
        }

        Ok(Self {
            workspace_id,
            workspace_name,
            bucket: opts.bucket,
            bucket_region: opts.bucket_region,
            object: opts.object,
            image_name: opts.image_name,
            credentials,
            public_bucket: opts.public_bucket,
            watch: opts.watch,
            watch_timeout: opts.watch_timeout,
            storage_type: opts.storage_type,
            service_credential_name: non_empty(opts.service_credential_name),
            job_poll_interval: JOB_POLL_INTERVAL,
            image_poll_interval: IMAGE_POLL_INTERVAL,
        })
    }
}

/// The workspace operations the import needs.
pub(crate) trait ImageService {
    /// ID of the target workspace, for user-facing hints.
    fn workspace_id(&self) -> &str;
    fn storage_tiers(&self) -> Result<Vec<StorageTierInfo>>;
    fn import_image(&self, req: &ImportImageRequest) -> Result<JobReference>;
    fn get_job(&self, id: &str) -> Result<Job>;
    fn get_image(&self, id: &str) -> Result<Image>;
    fn get_image_by_name(&self, name: &str) -> Result<Image>;
}

impl ImageService for PowerVs {
    fn workspace_id(&self) -> &str {
        &self.workspace().id
    }

    fn storage_tiers(&self) -> Result<Vec<StorageTierInfo>> {
        PowerVs::storage_tiers(self)
    }

    fn import_image(&self, req: &ImportImageRequest) -> Result<JobReference> {
        PowerVs::import_image(self, req)
    }

    fn get_job(&self, id: &str) -> Result<Job> {
        PowerVs::get_job(self, id)
    }

    fn get_image(&self, id: &str) -> Result<Image> {
        PowerVs::get_image(self, id)
    }

    fn get_image_by_name(&self, name: &str) -> Result<Image> {
        PowerVs::get_image_by_name(self, name)
    }
}

/// Confirm that the workspace offers `storage_type`.
fn check_storage_tier<S: ImageService + ?Sized>(svc: &S, storage_type: StorageType) -> Result<()> {
    let tiers = svc
        .storage_tiers()
        .wrap_err("an error occurred while retrieving the storage tier availability")?;
    let wanted = storage_type.to_string();
    if tiers.iter().any(|t| t.name == wanted && t.is_inactive()) {
        return Err(eyre!(
            "the requested storage tier {wanted} is not available in the provided cloud instance. Please retry with a different tier"
        ));
    }
    Ok(())
}

/// Add a hint to check progress out-of-band when `err` is a poll timeout.
fn advise_on_timeout(err: Report, what: &str) -> Report {
    if matches!(err.downcast_ref::<PollError>(), Some(PollError::Timeout(_))) {
        err.wrap_err(format!(
            "{what} did not finish in time; check its progress in the IBM Cloud console"
        ))
    } else {
        err
    }
}

/// Run the import workflow, returning the imported image as last observed.
pub(crate) fn import_image<S, C, K>(
    config: &ImportConfig,
    images: &S,
    credentials: &C,
    clock: &K,
) -> Result<Image>
where
    S: ImageService + ?Sized,
    C: CredentialService + ?Sized,
    K: Clock + ?Sized,
{
    check_storage_tier(images, config.storage_type)?;

    // Explicit keys are forwarded even for public buckets.
    let keys = match (&config.credentials, config.public_bucket) {
        (Some(keys), _) => Some(keys.clone()),
        (None, true) => None,
        (None, false) => Some(obtain_hmac_keys(
            credentials,
            &config.bucket,
            &config.bucket_region,
            config.service_credential_name.as_deref(),
        )?),
    };

    let bucket_access = if config.public_bucket {
        BucketAccess::Public
    } else {
        BucketAccess::Private
    };
    let (access_key, secret_key) = match keys {
        Some(k) => (Some(k.access_key_id), Some(k.secret_access_key)),
        None => (None, None),
    };
    let request = ImportImageRequest {
        image_name: config.image_name.clone(),
        image_filename: config.object.clone(),
        region: config.bucket_region.clone(),
        bucket_name: config.bucket.clone(),
        bucket_access,
        access_key,
        secret_key,
        storage_type: config.storage_type.to_string(),
    };

    info!("Importing image {}. Please wait...", config.image_name);
    let job_ref = images.import_image(&request)?;
    debug!("Import job {} started", job_ref.id);
    let start = clock.now();

    poll_until_with_clock(
        clock,
        config.job_poll_interval,
        config.watch_timeout,
        || {
            let job = images
                .get_job(&job_ref.id)
                .wrap_err("image import job failed to complete")?;
            match job.state() {
                JobState::Completed => {
                    debug!(
                        "Image uploaded successfully, took {}",
                        format_duration(&(clock.now() - start))
                    );
                    Ok(true)
                }
                JobState::Failed => Err(eyre!(
                    "image import job failed to complete: {}",
                    job.status.message
                )),
                JobState::Other(state) => {
                    info!("Image import is in-progress, current state: {state}");
                    Ok(false)
                }
            }
        },
    )
    .map_err(|e| advise_on_timeout(e, "The image import job"))?;

    info!("Retrieving image details");
    let image = images.get_image_by_name(&config.image_name)?;

    if !config.watch {
        info!(
            "Image import for {} is currently in {} state, please check the progress in the IBM Cloud UI",
            image.name,
            image.state()
        );
        return Ok(image);
    }

    info!(
        "Waiting for image {} to be active. Please wait...",
        config.image_name
    );
    let mut latest = image.clone();
    poll_until_with_clock(
        clock,
        config.image_poll_interval,
        config.watch_timeout,
        || {
            let img = images.get_image(&image.id).wrap_err_with(|| {
                format!(
                    "failed to import the image; inspect the events of workspace {} for more information about the failure",
                    images.workspace_id()
                )
            })?;
            let state = img.state();
            latest = img;
            match state {
                ImageState::Active => {
                    info!(
                        "Successfully imported the image: {} with ID: {} Total time taken: {}",
                        image.name,
                        image.id,
                        format_duration(&(clock.now() - start))
                    );
                    Ok(true)
                }
                ImageState::Other(state) => {
                    info!("Waiting for image to be active. Current state: {state}");
                    Ok(false)
                }
            }
        },
    )
    .map_err(|e| advise_on_timeout(e, "The image activation"))?;

    Ok(latest)
}

/// Execute `image import` against IBM Cloud.
pub(crate) fn run(cloud: &CloudOpts, opts: ImportOpts) -> Result<()> {
    let config = ImportConfig::try_from(opts)?;
    let session = cloud.login()?;

    let workspace = powervs::resolve_workspace(
        &ResourceController::new(session.clone()),
        config.workspace_id.as_deref(),
        config.workspace_name.as_deref(),
    )?;
    debug!("Resolved workspace {} ({})", workspace.name, workspace.id);

    let images = PowerVs::new(session.clone(), workspace);
    let credentials = CloudCredentials::new(session);
    import_image(&config, &images, &credentials, &SystemClock)?;
    Ok(())
}
