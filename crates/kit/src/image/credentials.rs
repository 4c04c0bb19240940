//! Discovery and creation of COS HMAC credentials for a bucket
//!
//! When no key pair is supplied for a private bucket, we locate the COS
//! instance owning the bucket and reuse the first service credential that
//! carries HMAC keys, creating a new one if none does.

use std::fmt;

use color_eyre::eyre::{eyre, Context};
use color_eyre::Result;
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::cloud::cos;
use crate::cloud::resource_controller::{
    ResourceController, ResourceInstance, ResourceKey, COS_RESOURCE_ID,
};
use crate::cloud::Session;

/// Prefix of auto-generated service credential names.
pub(crate) const SERVICE_CRED_PREFIX: &str = "pvsimg-service-cred";
const COS_HMAC_KEYS: &str = "cos_hmac_keys";

/// An HMAC key pair for a COS bucket.
#[derive(Clone, PartialEq, Eq, Deserialize)]
pub(crate) struct HmacKeys {
    pub(crate) access_key_id: String,
    pub(crate) secret_access_key: String,
}

impl fmt::Debug for HmacKeys {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HmacKeys")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"<redacted>")
            .finish()
    }
}

impl HmacKeys {
    /// Extract the HMAC keys from a fetched resource key.
    pub(crate) fn from_resource_key(key: &ResourceKey) -> Result<Self> {
        let value = key
            .credentials
            .get(COS_HMAC_KEYS)
            .ok_or_else(|| eyre!("unable to retrieve COS HMAC keys"))?;
        serde_json::from_value(value.clone())
            .with_context(|| format!("Malformed HMAC keys in credential {:?}", key.name))
    }
}

fn has_hmac_keys(key: &ResourceKey) -> bool {
    key.credentials
        .get(COS_HMAC_KEYS)
        .is_some_and(|v| !v.is_null())
}

/// The resource controller and COS operations needed to provision credentials.
pub(crate) trait CredentialService {
    fn list_cos_instances(&self) -> Result<Vec<ResourceInstance>>;
    fn list_buckets(&self, instance: &ResourceInstance, region: &str) -> Result<Vec<String>>;
    fn list_keys(&self, instance: &ResourceInstance) -> Result<Vec<ResourceKey>>;
    fn get_key(&self, id: &str) -> Result<ResourceKey>;
    fn create_hmac_key(&self, name: &str, instance: &ResourceInstance) -> Result<ResourceKey>;
}

/// [`CredentialService`] backed by the real cloud APIs.
#[derive(Debug, Clone)]
pub(crate) struct CloudCredentials {
    session: Session,
    rc: ResourceController,
}

impl CloudCredentials {
    pub(crate) fn new(session: Session) -> Self {
        let rc = ResourceController::new(session.clone());
        Self { session, rc }
    }
}

impl CredentialService for CloudCredentials {
    fn list_cos_instances(&self) -> Result<Vec<ResourceInstance>> {
        self.rc.list_instances(COS_RESOURCE_ID)
    }

    fn list_buckets(&self, instance: &ResourceInstance, region: &str) -> Result<Vec<String>> {
        cos::list_buckets(&self.session, &instance.guid, region)
    }

    fn list_keys(&self, instance: &ResourceInstance) -> Result<Vec<ResourceKey>> {
        self.rc.list_keys_for_instance(&instance.guid)
    }

    fn get_key(&self, id: &str) -> Result<ResourceKey> {
        self.rc.get_key(id)
    }

    fn create_hmac_key(&self, name: &str, instance: &ResourceInstance) -> Result<ResourceKey> {
        self.rc.create_hmac_key(name, &instance.crn)
    }
}

/// Find the COS instance holding `bucket`. Instances whose buckets cannot
/// be listed are skipped.
fn find_bucket_instance<S: CredentialService + ?Sized>(
    svc: &S,
    instances: Vec<ResourceInstance>,
    bucket: &str,
    region: &str,
) -> Option<ResourceInstance> {
    instances.into_iter().find(|instance| {
        match svc.list_buckets(instance, region) {
            Ok(buckets) => buckets.iter().any(|b| b == bucket),
            Err(e) => {
                warn!(
                    "cannot list buckets in the resource instance {}: {e:#}",
                    instance.name
                );
                false
            }
        }
    })
}

fn create_credential<S: CredentialService + ?Sized>(
    svc: &S,
    name: &str,
    instance: &ResourceInstance,
) -> Result<ResourceKey> {
    debug!("Auto generating COS service credentials to import image: {name}");
    svc.create_hmac_key(name, instance)
        .wrap_err("error while creating HMAC credentials")
}

/// Obtain HMAC keys able to read `bucket`, creating a service credential
/// named `credential_name` (or a default derived from the COS instance)
/// if no existing credential has them.
pub(crate) fn obtain_hmac_keys<S: CredentialService + ?Sized>(
    svc: &S,
    bucket: &str,
    region: &str,
    credential_name: Option<&str>,
) -> Result<HmacKeys> {
    let instances = svc
        .list_cos_instances()
        .wrap_err("failed to list the resource instances")?;
    if instances.is_empty() {
        return Err(eyre!("no service instances were found"));
    }

    let instance = find_bucket_instance(svc, instances, bucket, region)
        .ok_or_else(|| eyre!("failed to find the COS instance for the bucket mentioned: {bucket}"))?;
    info!(
        "Identified bucket {bucket:?} in service instance: {}",
        instance.name
    );

    let keys = svc
        .list_keys(&instance)
        .wrap_err("cannot list the resource keys for instance")?;

    let name = credential_name
        .map(ToOwned::to_owned)
        .unwrap_or_else(|| format!("{SERVICE_CRED_PREFIX}-{}", instance.name));

    let mut reusable = None;
    if !keys.is_empty() {
        debug!("Reading the existing service credentials");
        for candidate in &keys {
            let key = svc
                .get_key(&candidate.id)
                .wrap_err("an error occurred while retrieving the resource key")?;
            if has_hmac_keys(&key) {
                info!(
                    "HMAC keys are available from the credential {:?}, re-using the same for image upload",
                    key.name
                );
                reusable = Some(key);
                break;
            }
            info!("No HMAC credentials found in the key {:?}", key.name);
        }
    }

    let key = match reusable {
        Some(key) => key,
        None => create_credential(svc, &name, &instance)?,
    };
    HmacKeys::from_resource_key(&key)
}
