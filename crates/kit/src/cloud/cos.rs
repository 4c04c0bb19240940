//! Cloud Object Storage bucket listing

use std::sync::OnceLock;

use color_eyre::eyre::Context;
use color_eyre::Result;
use regex::Regex;

use super::{send, Session};

/// List the names of the buckets owned by a COS instance, as seen from the
/// regional endpoint `region`.
pub(crate) fn list_buckets(session: &Session, instance_guid: &str, region: &str) -> Result<Vec<String>> {
    let url = format!("{}/", session.endpoints().cos_for(region));
    let body = send(
        session
            .get(&url)
            .header("ibm-service-instance-id", instance_guid),
    )?
    .text()
    .with_context(|| format!("Reading bucket list from {url}"))?;
    Ok(parse_bucket_names(&body))
}

/// Extract bucket names from an S3 `ListAllMyBucketsResult` document.
fn parse_bucket_names(xml: &str) -> Vec<String> {
    static BUCKET_NAME: OnceLock<Regex> = OnceLock::new();
    let re = BUCKET_NAME
        .get_or_init(|| Regex::new(r"<Bucket>\s*<Name>([^<]*)</Name>").expect("valid regex"));
    re.captures_iter(xml)
        .map(|c| c[1].to_string())
        .collect()
}
