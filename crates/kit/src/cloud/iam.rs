//! IAM API key exchange

use color_eyre::eyre::{eyre, Context};
use color_eyre::Result;
use reqwest::blocking::Client;
use serde::Deserialize;
use tracing::debug;

const APIKEY_GRANT_TYPE: &str = "urn:ibm:params:oauth:grant-type:apikey";

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<u64>,
}

/// Exchange an API key for an IAM bearer token.
pub(crate) fn request_token(http: &Client, iam_url: &str, api_key: &str) -> Result<String> {
    if api_key.is_empty() {
        return Err(eyre!("An IBM Cloud API key is required"));
    }
    let url = format!("{iam_url}/identity/token");
    let req = http
        .post(&url)
        .header(reqwest::header::ACCEPT, "application/json")
        .form(&[("grant_type", APIKEY_GRANT_TYPE), ("apikey", api_key)]);
    let resp: TokenResponse =
        super::send_json(req).context("Failed to authenticate with IBM Cloud IAM")?;
    debug!(
        "Obtained IAM token (expires in {}s)",
        resp.expires_in.unwrap_or_default()
    );
    Ok(resp.access_token)
}
