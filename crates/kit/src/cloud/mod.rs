//! Blocking HTTP clients for the IBM Cloud services used by image import
//!
//! Only the handful of endpoints the import workflow needs are covered:
//! - `iam`: exchange an API key for a bearer token
//! - `resource_controller`: service instances and their resource keys
//! - `cos`: bucket listing for a Cloud Object Storage instance
//! - `powervs`: storage tiers, image import, jobs and images of a workspace

use std::fmt;

use color_eyre::eyre::{eyre, Context};
use color_eyre::Result;
use reqwest::blocking::{Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use tracing::debug;

pub(crate) mod cos;
pub(crate) mod iam;
pub(crate) mod powervs;
pub(crate) mod resource_controller;

/// Which IBM Cloud deployment to talk to
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
#[clap(rename_all = "kebab-case")]
pub enum CloudEnvironment {
    /// Production IBM Cloud
    #[default]
    Prod,
    /// IBM Cloud staging
    Test,
}

impl CloudEnvironment {
    pub(crate) fn endpoints(self) -> Endpoints {
        match self {
            CloudEnvironment::Prod => Endpoints {
                iam: "https://iam.cloud.ibm.com".into(),
                resource_controller: "https://resource-controller.cloud.ibm.com".into(),
                powervs: "https://{region}.power-iaas.cloud.ibm.com".into(),
                cos: "https://s3.{region}.cloud-object-storage.appdomain.cloud".into(),
            },
            CloudEnvironment::Test => Endpoints {
                iam: "https://iam.test.cloud.ibm.com".into(),
                resource_controller: "https://resource-controller.test.cloud.ibm.com".into(),
                powervs: "https://{region}.power-iaas.test.cloud.ibm.com".into(),
                cos: "https://s3.{region}.cloud-object-storage.appdomain.cloud".into(),
            },
        }
    }
}

/// Options shared by every command that talks to IBM Cloud
#[derive(clap::Args)]
pub(crate) struct CloudOpts {
    /// IBM Cloud API key
    #[clap(long, global = true, env = "IBMCLOUD_API_KEY", hide_env_values = true)]
    pub api_key: Option<String>,

    /// IBM Cloud environment to target
    #[clap(long = "env", global = true, value_enum, default_value_t)]
    pub environment: CloudEnvironment,
}

impl fmt::Debug for CloudOpts {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CloudOpts")
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("environment", &self.environment)
            .finish()
    }
}

impl CloudOpts {
    /// Authenticate and return a session for the selected environment.
    pub(crate) fn login(&self) -> Result<Session> {
        let api_key = self
            .api_key
            .as_deref()
            .filter(|k| !k.is_empty())
            .ok_or_else(|| {
                eyre!("An IBM Cloud API key is required; set IBMCLOUD_API_KEY or pass --api-key")
            })?;
        Session::login(api_key, self.environment.endpoints())
    }
}

/// Base URLs for each service. `{region}` is substituted where present.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Endpoints {
    pub(crate) iam: String,
    pub(crate) resource_controller: String,
    pub(crate) powervs: String,
    pub(crate) cos: String,
}

impl Endpoints {
    pub(crate) fn powervs_for(&self, region: &str) -> String {
        self.powervs.replace("{region}", region)
    }

    pub(crate) fn cos_for(&self, region: &str) -> String {
        self.cos.replace("{region}", region)
    }
}

/// A non-success HTTP response from one of the cloud APIs.
#[derive(Debug, thiserror::Error)]
#[error("{url} returned {status}: {body}")]
pub(crate) struct ApiError {
    pub(crate) url: String,
    pub(crate) status: reqwest::StatusCode,
    pub(crate) body: String,
}

/// An authenticated connection shared by all service clients.
#[derive(Clone)]
pub(crate) struct Session {
    http: Client,
    token: String,
    endpoints: Endpoints,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("endpoints", &self.endpoints)
            .finish_non_exhaustive()
    }
}

impl Session {
    /// Authenticate with `api_key` against the IAM endpoint.
    pub(crate) fn login(api_key: &str, endpoints: Endpoints) -> Result<Self> {
        let http = Client::builder()
            .user_agent(concat!("pvsimg/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("Building HTTP client")?;
        let token = iam::request_token(&http, &endpoints.iam, api_key)?;
        Ok(Self {
            http,
            token,
            endpoints,
        })
    }

    #[cfg(test)]
    pub(crate) fn with_token(token: &str, endpoints: Endpoints) -> Self {
        Self {
            http: Client::new(),
            token: token.to_owned(),
            endpoints,
        }
    }

    pub(crate) fn endpoints(&self) -> &Endpoints {
        &self.endpoints
    }

    pub(crate) fn get(&self, url: &str) -> RequestBuilder {
        debug!("GET {url}");
        self.http.get(url).bearer_auth(&self.token)
    }

    pub(crate) fn post(&self, url: &str) -> RequestBuilder {
        debug!("POST {url}");
        self.http.post(url).bearer_auth(&self.token)
    }
}

/// Send a request, turning non-2xx statuses into an [`ApiError`].
pub(crate) fn send(req: RequestBuilder) -> Result<Response> {
    let resp = req.send()?;
    let status = resp.status();
    if !status.is_success() {
        let url = resp.url().to_string();
        let body = resp.text().unwrap_or_default();
        return Err(ApiError { url, status, body }.into());
    }
    Ok(resp)
}

/// Send a request and decode a JSON response body.
pub(crate) fn send_json<T: DeserializeOwned>(req: RequestBuilder) -> Result<T> {
    let resp = send(req)?;
    let url = resp.url().to_string();
    resp.json()
        .with_context(|| format!("Parsing JSON response from {url}"))
}

#[cfg(test)]
pub(crate) mod testutil {
    //! Helpers for exercising the blocking clients against a mock server.

    use wiremock::MockServer;

    use super::{Endpoints, Session};

    pub(crate) const TOKEN: &str = "test-token";

    /// All endpoints pointed at `server`.
    pub(crate) fn endpoints(server: &MockServer) -> Endpoints {
        Endpoints {
            iam: server.uri(),
            resource_controller: server.uri(),
            powervs: server.uri(),
            cos: server.uri(),
        }
    }

    /// Run `f` with a session against `server`, off the async runtime.
    ///
    /// The blocking client must be created and dropped on a thread where
    /// blocking is allowed.
    pub(crate) async fn with_session<T, F>(server: &MockServer, f: F) -> T
    where
        F: FnOnce(&Session) -> T + Send + 'static,
        T: Send + 'static,
    {
        let endpoints = endpoints(server);
        tokio::task::spawn_blocking(move || f(&Session::with_token(TOKEN, endpoints)))
            .await
            .unwrap()
    }
}

#[cfg(test)]
mod tests {
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::testutil::with_session;
    use super::*;

    #[test]
    fn test_login_requires_api_key() {
        let opts = CloudOpts {
            api_key: Some(String::new()),
            environment: CloudEnvironment::Test,
        };
        let err = opts.login().unwrap_err();
        assert!(err.to_string().contains("IBMCLOUD_API_KEY"));

        let opts = CloudOpts {
            api_key: Some("sekrit".into()),
            environment: CloudEnvironment::Prod,
        };
        assert!(!format!("{opts:?}").contains("sekrit"));
    }

    #[test]
    fn test_endpoint_substitution() {
        let endpoints = CloudEnvironment::Prod.endpoints();
        assert_eq!(
            endpoints.powervs_for("lon"),
            "https://lon.power-iaas.cloud.ibm.com"
        );
        assert_eq!(
            endpoints.cos_for("us-south"),
            "https://s3.us-south.cloud-object-storage.appdomain.cloud"
        );
        let test = CloudEnvironment::Test.endpoints();
        assert_eq!(
            test.powervs_for("dal"),
            "https://dal.power-iaas.test.cloud.ibm.com"
        );
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_error_status_becomes_api_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/missing"))
            .and(header("authorization", "Bearer test-token"))
            .respond_with(ResponseTemplate::new(404).set_body_string("no such thing"))
            .expect(1)
            .mount(&server)
            .await;

        let url = format!("{}/missing", server.uri());
        let err = with_session(&server, move |s| send(s.get(&url)).unwrap_err()).await;

        let api = err.downcast_ref::<ApiError>().expect("an ApiError");
        assert_eq!(api.status, reqwest::StatusCode::NOT_FOUND);
        assert!(api.url.ends_with("/missing"));
        assert_eq!(api.body, "no such thing");
    }
}
