//! Keystone v3 authentication and service catalog lookup

use std::time::Duration;

use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, info};

use crate::config::CloudConfig;
use topocheck_common::{Error, Result};

/// Header carrying the issued token in Keystone responses and Nova requests
pub const AUTH_TOKEN_HEADER: &str = "X-Auth-Token";

const SUBJECT_TOKEN_HEADER: &str = "X-Subject-Token";
const COMPUTE_SERVICE_TYPE: &str = "compute";
const DEFAULT_DOMAIN: &str = "Default";
const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// An authenticated session against one cloud
#[derive(Clone, Debug, PartialEq)]
pub struct Session {
    /// Keystone token
    pub token: String,
    /// Compute (Nova) endpoint from the service catalog
    pub compute_endpoint: String,
}

/// A service in the Keystone catalog
#[derive(Clone, Debug, Deserialize)]
pub struct CatalogEntry {
    /// Service type (e.g. "compute")
    #[serde(rename = "type")]
    pub service_type: String,
    /// Endpoints for the service
    #[serde(default)]
    pub endpoints: Vec<Endpoint>,
}

/// One endpoint of a catalog service
#[derive(Clone, Debug, Deserialize)]
pub struct Endpoint {
    /// public, internal or admin
    pub interface: String,
    /// Region name
    #[serde(default)]
    pub region: Option<String>,
    /// Region ID
    #[serde(default)]
    pub region_id: Option<String>,
    /// Endpoint URL
    pub url: String,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    token: TokenBody,
}

#[derive(Debug, Deserialize)]
struct TokenBody {
    #[serde(default)]
    catalog: Vec<CatalogEntry>,
}

/// Build the HTTP client honoring the cloud's TLS settings
pub fn http_client(cloud: &CloudConfig) -> Result<reqwest::Client> {
    let mut builder = reqwest::Client::builder().timeout(HTTP_TIMEOUT);

    if cloud.verify == Some(false) {
        builder = builder.danger_accept_invalid_certs(true);
    }
    if let Some(ref path) = cloud.cacert {
        let pem = std::fs::read(path).map_err(|e| {
            Error::config_field("cacert", format!("failed to read {}: {}", path.display(), e))
        })?;
        let cert = reqwest::Certificate::from_pem(&pem)
            .map_err(|e| Error::config_field("cacert", format!("invalid CA bundle: {}", e)))?;
        builder = builder.add_root_certificate(cert);
    }

    builder
        .build()
        .map_err(|e| Error::config(format!("failed to build HTTP client: {}", e)))
}

/// Keystone token endpoint for an auth_url, with or without `/v3`
pub fn tokens_url(auth_url: &str) -> String {
    let base = auth_url.trim_end_matches('/');
    if base.ends_with("/v3") {
        format!("{}/auth/tokens", base)
    } else {
        format!("{}/v3/auth/tokens", base)
    }
}

fn domain_ref(id: Option<&String>, name: Option<&String>, fallback: Option<&String>) -> Value {
    match (id, name.or(fallback)) {
        (Some(id), _) => json!({ "id": id }),
        (None, Some(name)) => json!({ "name": name }),
        (None, None) => json!({ "name": DEFAULT_DOMAIN }),
    }
}

/// Keystone v3 token request body for the configured auth method
pub fn auth_request_body(cloud: &CloudConfig) -> Value {
    let auth = &cloud.auth;

    if cloud.uses_application_credential() {
        return json!({
            "auth": {
                "identity": {
                    "methods": ["application_credential"],
                    "application_credential": {
                        "id": auth.application_credential_id,
                        "secret": auth.application_credential_secret,
                    }
                }
            }
        });
    }

    let user = match auth.user_id {
        Some(ref id) => json!({ "id": id, "password": auth.password }),
        None => json!({
            "name": auth.username,
            "domain": domain_ref(
                auth.user_domain_id.as_ref(),
                auth.user_domain_name.as_ref(),
                auth.domain_name.as_ref(),
            ),
            "password": auth.password,
        }),
    };

    let project = match auth.project_id {
        Some(ref id) => json!({ "id": id }),
        None => json!({
            "name": auth.project_name,
            "domain": domain_ref(
                auth.project_domain_id.as_ref(),
                auth.project_domain_name.as_ref(),
                auth.domain_name.as_ref(),
            ),
        }),
    };

    json!({
        "auth": {
            "identity": {
                "methods": ["password"],
                "password": { "user": user }
            },
            "scope": { "project": project }
        }
    })
}

/// Find an endpoint URL in the catalog
///
/// When `region` is set the endpoint must match it by name or ID.
pub fn find_endpoint(
    catalog: &[CatalogEntry],
    service_type: &str,
    interface: &str,
    region: Option<&str>,
) -> Option<String> {
    catalog
        .iter()
        .filter(|entry| entry.service_type == service_type)
        .flat_map(|entry| entry.endpoints.iter())
        .find(|ep| {
            ep.interface == interface
                && region.map_or(true, |r| {
                    ep.region.as_deref() == Some(r) || ep.region_id.as_deref() == Some(r)
                })
        })
        .map(|ep| ep.url.trim_end_matches('/').to_string())
}

/// Authenticate against Keystone and resolve the compute endpoint
pub async fn authenticate(http: &reqwest::Client, cloud: &CloudConfig) -> Result<Session> {
    let auth_url = cloud
        .auth
        .auth_url
        .as_deref()
        .ok_or_else(|| Error::config_field("auth.auth_url", "auth_url is required"))?;
    let url = tokens_url(auth_url);
    debug!(url = %url, "Requesting Keystone token");

    let response = http
        .post(&url)
        .json(&auth_request_body(cloud))
        .send()
        .await
        .map_err(|e| Error::collaborator("keystone", format!("POST {}: {}", url, e)))?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(Error::collaborator(
            "keystone",
            format!("POST {} returned {}: {}", url, status, body.trim()),
        ));
    }

    let token = response
        .headers()
        .get(SUBJECT_TOKEN_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .ok_or_else(|| {
            Error::collaborator("keystone", "token response has no X-Subject-Token header")
        })?;

    let body: TokenResponse = response
        .json()
        .await
        .map_err(|e| Error::collaborator("keystone", format!("invalid token response: {}", e)))?;

    let interface = cloud.endpoint_interface();
    let compute_endpoint = find_endpoint(
        &body.token.catalog,
        COMPUTE_SERVICE_TYPE,
        &interface,
        cloud.region_name.as_deref(),
    )
    .ok_or_else(|| {
        Error::collaborator(
            "keystone",
            format!(
                "no {} compute endpoint in the service catalog{}",
                interface,
                cloud
                    .region_name
                    .as_deref()
                    .map(|r| format!(" for region {}", r))
                    .unwrap_or_default()
            ),
        )
    })?;

    info!(endpoint = %compute_endpoint, "Authenticated against Keystone");
    Ok(Session {
        token,
        compute_endpoint,
    })
}
