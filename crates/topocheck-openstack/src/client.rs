//! Compute client for server group and server queries
//!
//! Provides a trait-based abstraction over the Nova API so the verification
//! pipeline can be exercised with mocks while production code talks HTTP.

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use tracing::debug;

#[cfg(any(test, feature = "test-utils"))]
use mockall::automock;

use crate::auth::{authenticate, http_client, Session, AUTH_TOKEN_HEADER};
use crate::config::CloudConfig;
use crate::types::{Server, ServerEnvelope, ServerGroup, ServerGroupEnvelope, ServerGroupList};
use topocheck_common::{Error, Result};

const COLLABORATOR: &str = "openstack";

/// Read-only compute queries consumed by topology verification
#[cfg_attr(any(test, feature = "test-utils"), automock)]
#[async_trait]
pub trait ComputeClient: Send + Sync {
    /// List all server groups visible to the project
    async fn list_server_groups(&self) -> Result<Vec<ServerGroup>>;

    /// Get one server group by ID
    async fn get_server_group(&self, id: &str) -> Result<ServerGroup>;

    /// Get one server by ID
    async fn get_server(&self, id: &str) -> Result<Server>;
}

/// Nova-backed [`ComputeClient`]
#[derive(Clone, Debug)]
pub struct NovaClient {
    http: reqwest::Client,
    endpoint: String,
    token: String,
}

impl NovaClient {
    /// Create a client for an already-authenticated session
    pub fn new(http: reqwest::Client, session: Session) -> Self {
        Self {
            http,
            endpoint: session.compute_endpoint.trim_end_matches('/').to_string(),
            token: session.token,
        }
    }

    /// Authenticate against the cloud's Keystone and build a client
    pub async fn connect(cloud: &CloudConfig) -> Result<Self> {
        let http = http_client(cloud)?;
        let session = authenticate(&http, cloud).await?;
        Ok(Self::new(http, session))
    }

    /// Compute endpoint this client talks to
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str, resource: &str) -> Result<T> {
        let url = format!("{}{}", self.endpoint, path);
        debug!(url = %url, "Nova request");

        let response = self
            .http
            .get(&url)
            .header(AUTH_TOKEN_HEADER, &self.token)
            .header(reqwest::header::ACCEPT, "application/json")
            .send()
            .await
            .map_err(|e| Error::collaborator(COLLABORATOR, format!("GET {}: {}", path, e)))?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(Error::collaborator(
                COLLABORATOR,
                format!("{} not found (GET {})", resource, path),
            ));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::collaborator(
                COLLABORATOR,
                format!("GET {} returned {}: {}", path, status, body.trim()),
            ));
        }

        response.json::<T>().await.map_err(|e| {
            Error::collaborator(
                COLLABORATOR,
                format!("invalid {} response from GET {}: {}", resource, path, e),
            )
        })
    }
}

#[async_trait]
impl ComputeClient for NovaClient {
    async fn list_server_groups(&self) -> Result<Vec<ServerGroup>> {
        let list: ServerGroupList = self.get_json("/os-server-groups", "server groups").await?;
        Ok(list.server_groups)
    }

    async fn get_server_group(&self, id: &str) -> Result<ServerGroup> {
        let envelope: ServerGroupEnvelope = self
            .get_json(
                &format!("/os-server-groups/{}", id),
                &format!("server group {}", id),
            )
            .await?;
        Ok(envelope.server_group)
    }

    async fn get_server(&self, id: &str) -> Result<Server> {
        let envelope: ServerEnvelope = self
            .get_json(&format!("/servers/{}", id), &format!("server {}", id))
            .await?;
        Ok(envelope.server)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AuthConfig;
    use axum::extract::Path;
    use axum::http::{HeaderMap, StatusCode as AxumStatus};
    use axum::response::IntoResponse;
    use axum::routing::{get, post};
    use axum::{Json, Router};
    use serde_json::{json, Value};

    const TOKEN: &str = "gAAAAA-test-token";

    fn authorized(headers: &HeaderMap) -> bool {
        headers.get(AUTH_TOKEN_HEADER).and_then(|v| v.to_str().ok()) == Some(TOKEN)
    }

    async fn list_groups(headers: HeaderMap) -> impl IntoResponse {
        if !authorized(&headers) {
            return (AxumStatus::UNAUTHORIZED, Json(json!({}))).into_response();
        }
        Json(json!({
            "server_groups": [
                { "id": "sg-1", "name": "masters-sg", "policies": ["anti-affinity"], "members": ["a", "b", "c"] },
                { "id": "sg-2", "name": "workers-sg", "policy": "soft-anti-affinity", "members": [] }
            ]
        }))
        .into_response()
    }

    async fn get_group(Path(id): Path<String>) -> impl IntoResponse {
        if id != "sg-1" {
            return (AxumStatus::NOT_FOUND, Json(json!({ "itemNotFound": {} }))).into_response();
        }
        Json(json!({
            "server_group": { "id": "sg-1", "name": "masters-sg", "policies": ["anti-affinity"], "members": ["a", "b", "c"] }
        }))
        .into_response()
    }

    async fn get_server_handler(Path(id): Path<String>) -> impl IntoResponse {
        if id == "broken" {
            return (AxumStatus::SERVICE_UNAVAILABLE, "nova is down").into_response();
        }
        Json(json!({ "server": { "id": id, "name": format!("master-{}", id), "hostId": format!("host-of-{}", id) } }))
            .into_response()
    }

    async fn tokens(Json(body): Json<Value>) -> impl IntoResponse {
        let methods = body["auth"]["identity"]["methods"].clone();
        if methods != json!(["password"]) {
            return (AxumStatus::BAD_REQUEST, Json(json!({}))).into_response();
        }
        let catalog = json!({
            "token": {
                "catalog": [{
                    "type": "compute",
                    "endpoints": [{ "interface": "public", "region": "RegionOne", "url": "COMPUTE_URL" }]
                }]
            }
        });
        let mut headers = HeaderMap::new();
        headers.insert("X-Subject-Token", TOKEN.parse().unwrap());
        (AxumStatus::CREATED, headers, Json(catalog)).into_response()
    }

    async fn spawn_nova() -> String {
        let app = Router::new()
            .route("/compute/os-server-groups", get(list_groups))
            .route("/compute/os-server-groups/:id", get(get_group))
            .route("/compute/servers/:id", get(get_server_handler))
            .route("/identity/v3/auth/tokens", post(tokens));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}", addr)
    }

    fn client(base: &str, token: &str) -> NovaClient {
        NovaClient::new(
            reqwest::Client::new(),
            Session {
                token: token.to_string(),
                compute_endpoint: format!("{}/compute/", base),
            },
        )
    }

    #[tokio::test]
    async fn lists_server_groups_in_both_policy_shapes() {
        let base = spawn_nova().await;
        let groups = client(&base, TOKEN).list_server_groups().await.unwrap();
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].primary_policy(), Some("anti-affinity"));
        assert_eq!(groups[1].primary_policy(), Some("soft-anti-affinity"));
    }

    #[tokio::test]
    async fn gets_server_group_and_server() {
        let base = spawn_nova().await;
        let nova = client(&base, TOKEN);
        let group = nova.get_server_group("sg-1").await.unwrap();
        assert_eq!(group.members, vec!["a", "b", "c"]);

        let server = nova.get_server("b").await.unwrap();
        assert_eq!(server.host_id, "host-of-b");
        assert_eq!(server.name, "master-b");
    }

    #[tokio::test]
    async fn not_found_names_the_resource() {
        let base = spawn_nova().await;
        let err = client(&base, TOKEN)
            .get_server_group("sg-9")
            .await
            .unwrap_err();
        assert!(err.to_string().contains("server group sg-9 not found"));
        assert!(!err.is_verdict());
    }

    #[tokio::test]
    async fn server_errors_surface_status() {
        let base = spawn_nova().await;
        let err = client(&base, TOKEN).get_server("broken").await.unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("503"));
        assert!(msg.contains("nova is down"));
    }

    #[tokio::test]
    async fn unauthorized_is_collaborator_failure() {
        let base = spawn_nova().await;
        let err = client(&base, "wrong").list_server_groups().await.unwrap_err();
        assert_eq!(err.kind(), topocheck_common::ErrorKind::CollaboratorUnavailable);
        assert!(err.to_string().contains("401"));
    }

    #[tokio::test]
    async fn authenticate_reads_token_and_catalog() {
        let base = spawn_nova().await;
        let cloud = CloudConfig {
            auth: AuthConfig {
                auth_url: Some(format!("{}/identity", base)),
                username: Some("admin".to_string()),
                password: Some("pw".to_string()),
                project_name: Some("shiftstack".to_string()),
                ..Default::default()
            },
            region_name: Some("RegionOne".to_string()),
            ..Default::default()
        };
        let session = authenticate(&reqwest::Client::new(), &cloud).await.unwrap();
        assert_eq!(session.token, TOKEN);
        assert_eq!(session.compute_endpoint, "COMPUTE_URL");
    }

    #[tokio::test]
    async fn authenticate_rejects_missing_region() {
        let base = spawn_nova().await;
        let cloud = CloudConfig {
            auth: AuthConfig {
                auth_url: Some(format!("{}/identity", base)),
                username: Some("admin".to_string()),
                password: Some("pw".to_string()),
                project_name: Some("shiftstack".to_string()),
                ..Default::default()
            },
            region_name: Some("RegionNine".to_string()),
            ..Default::default()
        };
        let err = authenticate(&reqwest::Client::new(), &cloud)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("for region RegionNine"));
    }
}
