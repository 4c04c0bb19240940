//! PowerVS workspace API: storage tiers, image import, jobs and images
//!
//! A workspace is a resource-controller instance of the PowerVS service.
//! All calls are scoped to one workspace and carry its CRN.

use std::fmt::Display;

use color_eyre::eyre::eyre;
use color_eyre::Result;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::resource_controller::{ResourceController, ResourceInstance, POWERVS_RESOURCE_ID};
use super::{send_json, Session};

/// A resolved PowerVS workspace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Workspace {
    /// Cloud instance id (the resource instance GUID)
    pub(crate) id: String,
    pub(crate) name: String,
    pub(crate) crn: String,
    /// Zone, e.g. `lon04`
    pub(crate) zone: String,
}

impl Workspace {
    /// API region serving this workspace's zone, e.g. `lon04` -> `lon`.
    pub(crate) fn region(&self) -> &str {
        region_for_zone(&self.zone)
    }
}

impl From<ResourceInstance> for Workspace {
    fn from(r: ResourceInstance) -> Self {
        Self {
            id: r.guid,
            name: r.name,
            crn: r.crn,
            zone: r.region_id,
        }
    }
}

fn region_for_zone(zone: &str) -> &str {
    zone.trim_end_matches(|c: char| c.is_ascii_digit())
        .trim_end_matches('-')
}

/// Find the workspace matching `id` (preferred) or `name`.
pub(crate) fn resolve_workspace(
    rc: &ResourceController,
    id: Option<&str>,
    name: Option<&str>,
) -> Result<Workspace> {
    let instances = rc.list_instances(POWERVS_RESOURCE_ID)?;
    select_workspace(instances, id, name)
}

fn select_workspace(
    instances: Vec<ResourceInstance>,
    id: Option<&str>,
    name: Option<&str>,
) -> Result<Workspace> {
    if let Some(id) = id {
        return instances
            .into_iter()
            .find(|i| i.guid == id)
            .map(Workspace::from)
            .ok_or_else(|| eyre!("No PowerVS workspace found with ID {id}"));
    }
    let Some(name) = name else {
        return Err(eyre!("Either a workspace ID or a workspace name is required"));
    };
    let mut matches: Vec<_> = instances.into_iter().filter(|i| i.name == name).collect();
    match matches.len() {
        0 => Err(eyre!("No PowerVS workspace found with name {name}")),
        1 => Ok(matches.remove(0).into()),
        n => Err(eyre!(
            "Found {n} PowerVS workspaces named {name}; use --workspace-id instead"
        )),
    }
}

/// Availability of a storage tier in a workspace.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub(crate) struct StorageTierInfo {
    pub(crate) name: String,
    #[serde(default)]
    pub(crate) state: String,
}

impl StorageTierInfo {
    pub(crate) fn is_inactive(&self) -> bool {
        self.state == "inactive"
    }
}

/// Body of a COS image import request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ImportImageRequest {
    pub(crate) image_name: String,
    pub(crate) image_filename: String,
    pub(crate) region: String,
    pub(crate) bucket_name: String,
    pub(crate) bucket_access: BucketAccess,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) access_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) secret_key: Option<String>,
    pub(crate) storage_type: String,
}

/// Whether the source bucket requires credentials.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub(crate) enum BucketAccess {
    Public,
    Private,
}

/// Handle to an asynchronous server-side operation.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub(crate) struct JobReference {
    pub(crate) id: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum JobState {
    Completed,
    Failed,
    Other(String),
}

impl From<&str> for JobState {
    fn from(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "completed" => JobState::Completed,
            "failed" => JobState::Failed,
            other => JobState::Other(other.to_string()),
        }
    }
}

impl Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobState::Completed => write!(f, "completed"),
            JobState::Failed => write!(f, "failed"),
            JobState::Other(s) => write!(f, "{}", s),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub(crate) struct JobStatus {
    pub(crate) state: String,
    #[serde(default)]
    pub(crate) message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub(crate) struct Job {
    pub(crate) status: JobStatus,
}

impl Job {
    pub(crate) fn state(&self) -> JobState {
        JobState::from(self.status.state.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum ImageState {
    Active,
    Other(String),
}

impl From<&str> for ImageState {
    fn from(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "active" => ImageState::Active,
            other => ImageState::Other(other.to_string()),
        }
    }
}

impl Display for ImageState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ImageState::Active => write!(f, "active"),
            ImageState::Other(s) => write!(f, "{}", s),
        }
    }
}

/// An image in a workspace's catalog.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub(crate) struct Image {
    #[serde(rename = "imageID")]
    pub(crate) id: String,
    pub(crate) name: String,
    #[serde(default)]
    pub(crate) state: String,
}

impl Image {
    pub(crate) fn state(&self) -> ImageState {
        ImageState::from(self.state.as_str())
    }
}

#[derive(Debug, Deserialize)]
struct ImageList {
    #[serde(default)]
    images: Vec<Image>,
}

/// Client for one PowerVS workspace.
#[derive(Debug, Clone)]
pub(crate) struct PowerVs {
    session: Session,
    base: String,
    workspace: Workspace,
}

impl PowerVs {
    pub(crate) fn new(session: Session, workspace: Workspace) -> Self {
        let base = session.endpoints().powervs_for(workspace.region());
        debug!("Using PowerVS endpoint {base} for workspace {}", workspace.name);
        Self {
            session,
            base,
            workspace,
        }
    }

    pub(crate) fn workspace(&self) -> &Workspace {
        &self.workspace
    }

    fn url(&self, version: &str, path: &str) -> String {
        format!(
            "{}/pcloud/{version}/cloud-instances/{}{path}",
            self.base, self.workspace.id
        )
    }

    fn get<T: serde::de::DeserializeOwned>(&self, path: &str) -> Result<T> {
        send_json(
            self.session
                .get(&self.url("v1", path))
                .header("CRN", &self.workspace.crn),
        )
    }

    pub(crate) fn storage_tiers(&self) -> Result<Vec<StorageTierInfo>> {
        self.get("/storage-tiers")
    }

    /// Start importing an image from a COS bucket.
    pub(crate) fn import_image(&self, req: &ImportImageRequest) -> Result<JobReference> {
        send_json(
            self.session
                .post(&self.url("v2", "/images"))
                .header("CRN", &self.workspace.crn)
                .json(req),
        )
    }

    pub(crate) fn get_job(&self, id: &str) -> Result<Job> {
        self.get(&format!("/jobs/{id}"))
    }

    pub(crate) fn get_image(&self, id: &str) -> Result<Image> {
        self.get(&format!("/images/{id}"))
    }

    /// Look up an image by its name.
    pub(crate) fn get_image_by_name(&self, name: &str) -> Result<Image> {
        let list: ImageList = self.get("/images")?;
        list.images
            .into_iter()
            .find(|i| i.name == name)
            .ok_or_else(|| {
                eyre!(
                    "Image {name} not found in workspace {}",
                    self.workspace.name
                )
            })
    }
}
