//! Resource controller: service instances and resource keys (service credentials)

use color_eyre::Result;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::{send_json, Session};

/// Catalog id of IBM Cloud Object Storage.
pub(crate) const COS_RESOURCE_ID: &str = "dff97f5c-bc5e-4455-b470-411c3edbe49c";
/// Catalog id of Power Systems Virtual Server.
pub(crate) const POWERVS_RESOURCE_ID: &str = "abd259f0-9990-11e8-acc8-b9f54a8f1661";
/// IAM role granted to auto-generated service credentials.
pub(crate) const WRITER_ROLE_CRN: &str = "crn:v1:bluemix:public:iam::::serviceRole:Writer";

/// A provisioned service instance.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub(crate) struct ResourceInstance {
    pub(crate) guid: String,
    pub(crate) name: String,
    pub(crate) crn: String,
    /// Zone or region the instance lives in, e.g. `lon04` or `global`
    #[serde(default)]
    pub(crate) region_id: String,
}

/// A service credential attached to an instance.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub(crate) struct ResourceKey {
    pub(crate) id: String,
    pub(crate) name: String,
    /// Only populated when the key is fetched individually
    #[serde(default)]
    pub(crate) credentials: Map<String, Value>,
}

#[derive(Debug, Deserialize)]
struct ListResponse<T> {
    #[serde(default = "Vec::new")]
    resources: Vec<T>,
    #[serde(default)]
    next_url: Option<String>,
}

#[derive(Debug, Serialize)]
struct CreateKeyRequest<'a> {
    name: &'a str,
    source: &'a str,
    role: &'a str,
    parameters: CreateKeyParameters,
}

#[derive(Debug, Serialize)]
struct CreateKeyParameters {
    #[serde(rename = "HMAC")]
    hmac: bool,
}

/// Client for the resource controller v2 API.
#[derive(Debug, Clone)]
pub(crate) struct ResourceController {
    session: Session,
}

impl ResourceController {
    pub(crate) fn new(session: Session) -> Self {
        Self { session }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.session.endpoints().resource_controller, path)
    }

    /// Fetch every page of a list endpoint.
    fn list_all<T: serde::de::DeserializeOwned>(&self, first: String) -> Result<Vec<T>> {
        let mut out = Vec::new();
        let mut next = Some(first);
        while let Some(url) = next.take() {
            let page: ListResponse<T> = send_json(self.session.get(&url))?;
            out.extend(page.resources);
            next = page.next_url.filter(|u| !u.is_empty()).map(|u| self.url(&u));
        }
        Ok(out)
    }

    /// All instances of the catalog service `resource_id`.
    pub(crate) fn list_instances(&self, resource_id: &str) -> Result<Vec<ResourceInstance>> {
        self.list_all(self.url(&format!(
            "/v2/resource_instances?resource_id={resource_id}"
        )))
    }

    /// Keys attached to the instance with the given GUID, without credentials.
    pub(crate) fn list_keys_for_instance(&self, guid: &str) -> Result<Vec<ResourceKey>> {
        self.list_all(self.url(&format!("/v2/resource_instances/{guid}/resource_keys")))
    }

    /// A single key, including its credentials.
    pub(crate) fn get_key(&self, id: &str) -> Result<ResourceKey> {
        send_json(self.session.get(&self.url(&format!("/v2/resource_keys/{id}"))))
    }

    /// Create a Writer key with HMAC credentials for the instance `source_crn`.
    pub(crate) fn create_hmac_key(&self, name: &str, source_crn: &str) -> Result<ResourceKey> {
        let body = CreateKeyRequest {
            name,
            source: source_crn,
            role: WRITER_ROLE_CRN,
            parameters: CreateKeyParameters { hmac: true },
        };
        send_json(
            self.session
                .post(&self.url("/v2/resource_keys"))
                .json(&body),
        )
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use wiremock::matchers::{body_json, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::super::testutil::with_session;
    use super::*;

    #[tokio::test(flavor = "multi_thread")]
    async fn test_list_instances_follows_pages() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v2/resource_instances"))
            .and(query_param("resource_id", COS_RESOURCE_ID))
            .and(query_param("start", "2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "resources": [
                    {"guid": "g2", "name": "cos-2", "crn": "crn:2", "region_id": "global"}
                ],
                "next_url": null
            })))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v2/resource_instances"))
            .and(query_param("resource_id", COS_RESOURCE_ID))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "resources": [
                    {"guid": "g1", "name": "cos-1", "crn": "crn:1", "region_id": "global"}
                ],
                "next_url": format!("/v2/resource_instances?resource_id={COS_RESOURCE_ID}&start=2")
            })))
            .expect(1)
            .mount(&server)
            .await;

        let instances = with_session(&server, |s| {
            ResourceController::new(s.clone())
                .list_instances(COS_RESOURCE_ID)
                .unwrap()
        })
        .await;
        let names: Vec<_> = instances.iter().map(|i| i.name.as_str()).collect();
        assert_eq!(names, ["cos-1", "cos-2"]);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_create_hmac_key() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v2/resource_keys"))
            .and(body_json(json!({
                "name": "my-cred",
                "source": "crn:cos",
                "role": WRITER_ROLE_CRN,
                "parameters": {"HMAC": true}
            })))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({
                "id": "key-1",
                "name": "my-cred",
                "credentials": {
                    "cos_hmac_keys": {"access_key_id": "ak", "secret_access_key": "sk"}
                }
            })))
            .expect(1)
            .mount(&server)
            .await;

        let key = with_session(&server, |s| {
            ResourceController::new(s.clone())
                .create_hmac_key("my-cred", "crn:cos")
                .unwrap()
        })
        .await;
        assert_eq!(key.id, "key-1");
        assert!(key.credentials.contains_key("cos_hmac_keys"));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_list_keys_without_credentials() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v2/resource_instances/g1/resource_keys"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "resources": [{"id": "k1", "name": "reader"}]
            })))
            .mount(&server)
            .await;

        let keys = with_session(&server, |s| {
            ResourceController::new(s.clone())
                .list_keys_for_instance("g1")
                .unwrap()
        })
        .await;
        assert_eq!(keys.len(), 1);
        assert!(keys[0].credentials.is_empty());
    }
}
