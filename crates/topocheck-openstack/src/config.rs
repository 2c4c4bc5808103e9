//! OpenStack cloud configuration
//!
//! Credentials come from a `clouds.yaml` entry, located the same way the
//! OpenStack client tools locate it:
//! 1. Explicit path (`--clouds-file`)
//! 2. `OS_CLIENT_CONFIG_FILE`
//! 3. `./clouds.yaml`
//! 4. `~/.config/openstack/clouds.yaml`
//! 5. `/etc/openstack/clouds.yaml`
//!
//! When no file exists, the classic `OS_*` environment variables are used.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::debug;

use topocheck_common::{Error, Result};

/// Default cloud entry name (matches `OS_CLOUD` unset)
pub const DEFAULT_CLOUD_NAME: &str = "openstack";

/// Environment variable pointing at an explicit clouds.yaml
pub const CLIENT_CONFIG_FILE_ENV: &str = "OS_CLIENT_CONFIG_FILE";

const CLOUDS_FILE_NAME: &str = "clouds.yaml";

/// Top-level structure of clouds.yaml
#[derive(Clone, Debug, Default, Deserialize)]
pub struct CloudsFile {
    /// Cloud entries by name
    #[serde(default)]
    pub clouds: BTreeMap<String, CloudConfig>,
}

/// One cloud entry
#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
pub struct CloudConfig {
    /// Authentication parameters
    #[serde(default)]
    pub auth: AuthConfig,
    /// `password` (default) or `v3applicationcredential`
    #[serde(default)]
    pub auth_type: Option<String>,
    /// Region used to pick the compute endpoint
    #[serde(default)]
    pub region_name: Option<String>,
    /// Endpoint interface (`public`, `internal`, `admin`)
    #[serde(default)]
    pub interface: Option<String>,
    /// Verify TLS certificates (default true)
    #[serde(default)]
    pub verify: Option<bool>,
    /// Path to a PEM CA bundle
    #[serde(default)]
    pub cacert: Option<PathBuf>,
}

/// Keystone authentication parameters
#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
pub struct AuthConfig {
    /// Keystone URL, with or without the `/v3` suffix
    #[serde(default)]
    pub auth_url: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub project_name: Option<String>,
    #[serde(default)]
    pub project_id: Option<String>,
    #[serde(default)]
    pub user_domain_name: Option<String>,
    #[serde(default)]
    pub user_domain_id: Option<String>,
    #[serde(default)]
    pub project_domain_name: Option<String>,
    #[serde(default)]
    pub project_domain_id: Option<String>,
    /// Fallback domain for both user and project
    #[serde(default)]
    pub domain_name: Option<String>,
    #[serde(default)]
    pub application_credential_id: Option<String>,
    #[serde(default)]
    pub application_credential_secret: Option<String>,
}

impl CloudConfig {
    /// Endpoint interface normalized to Keystone catalog naming
    ///
    /// clouds.yaml accepts the v2-era `publicURL` spelling.
    pub fn endpoint_interface(&self) -> String {
        let raw = self.interface.as_deref().unwrap_or("public");
        raw.trim_end_matches("URL").to_lowercase()
    }

    /// Whether application credentials should be used
    pub fn uses_application_credential(&self) -> bool {
        matches!(
            self.auth_type.as_deref(),
            Some("v3applicationcredential") | Some("applicationcredential")
        ) || self.auth.application_credential_id.is_some()
    }

    /// Check that enough is set to authenticate
    pub fn validate(&self) -> Result<()> {
        if self.auth.auth_url.as_deref().unwrap_or("").is_empty() {
            return Err(Error::config_field("auth.auth_url", "auth_url is required"));
        }
        if self.uses_application_credential() {
            if self.auth.application_credential_id.is_none() {
                return Err(Error::config_field(
                    "auth.application_credential_id",
                    "application credential id is required",
                ));
            }
            if self.auth.application_credential_secret.is_none() {
                return Err(Error::config_field(
                    "auth.application_credential_secret",
                    "application credential secret is required",
                ));
            }
            return Ok(());
        }
        if self.auth.username.is_none() && self.auth.user_id.is_none() {
            return Err(Error::config_field(
                "auth.username",
                "username or user_id is required for password auth",
            ));
        }
        if self.auth.password.is_none() {
            return Err(Error::config_field(
                "auth.password",
                "password is required for password auth",
            ));
        }
        if self.auth.project_name.is_none() && self.auth.project_id.is_none() {
            return Err(Error::config_field(
                "auth.project_name",
                "project_name or project_id is required",
            ));
        }
        Ok(())
    }

    /// Build a cloud entry from `OS_*` environment variables
    ///
    /// Returns `None` when `OS_AUTH_URL` is not set.
    pub fn from_env_vars(get: impl Fn(&str) -> Option<String>) -> Option<Self> {
        let auth_url = get("OS_AUTH_URL")?;
        Some(Self {
            auth: AuthConfig {
                auth_url: Some(auth_url),
                username: get("OS_USERNAME"),
                user_id: get("OS_USER_ID"),
                password: get("OS_PASSWORD"),
                project_name: get("OS_PROJECT_NAME").or_else(|| get("OS_TENANT_NAME")),
                project_id: get("OS_PROJECT_ID").or_else(|| get("OS_TENANT_ID")),
                user_domain_name: get("OS_USER_DOMAIN_NAME"),
                user_domain_id: get("OS_USER_DOMAIN_ID"),
                project_domain_name: get("OS_PROJECT_DOMAIN_NAME"),
                project_domain_id: get("OS_PROJECT_DOMAIN_ID"),
                domain_name: get("OS_DOMAIN_NAME"),
                application_credential_id: get("OS_APPLICATION_CREDENTIAL_ID"),
                application_credential_secret: get("OS_APPLICATION_CREDENTIAL_SECRET"),
            },
            auth_type: get("OS_AUTH_TYPE"),
            region_name: get("OS_REGION_NAME"),
            interface: get("OS_INTERFACE"),
            verify: get("OS_INSECURE").map(|v| !matches!(v.as_str(), "1" | "true" | "True")),
            cacert: get("OS_CACERT").map(PathBuf::from),
        })
    }
}

/// Candidate clouds.yaml locations, highest priority first
pub fn candidate_paths(
    explicit: Option<&Path>,
    env_file: Option<PathBuf>,
    home: Option<PathBuf>,
) -> Vec<PathBuf> {
    let mut paths = Vec::new();
    if let Some(path) = explicit {
        paths.push(path.to_path_buf());
    }
    if let Some(path) = env_file {
        paths.push(path);
    }
    paths.push(PathBuf::from(CLOUDS_FILE_NAME));
    if let Some(home) = home {
        paths.push(home.join(".config").join("openstack").join(CLOUDS_FILE_NAME));
    }
    paths.push(PathBuf::from("/etc/openstack").join(CLOUDS_FILE_NAME));
    paths
}

/// Parse clouds.yaml content and select one cloud
pub fn parse_cloud(content: &str, cloud: &str) -> Result<CloudConfig> {
    let file: CloudsFile = serde_yaml::from_str(content)
        .map_err(|e| Error::config(format!("invalid clouds.yaml: {}", e)))?;
    file.clouds.get(cloud).cloned().ok_or_else(|| {
        Error::config_field(
            "cloud",
            format!(
                "cloud {:?} not found in clouds.yaml (available: {})",
                cloud,
                file.clouds.keys().cloned().collect::<Vec<_>>().join(", ")
            ),
        )
    })
}

/// Load the named cloud from the first existing clouds.yaml, or from `OS_*` variables
///
/// An explicit path that does not exist is an error rather than a fallthrough.
pub fn load_cloud(explicit: Option<&Path>, cloud: &str) -> Result<CloudConfig> {
    if let Some(path) = explicit {
        if !path.exists() {
            return Err(Error::config_field(
                "clouds-file",
                format!("{} does not exist", path.display()),
            ));
        }
    }

    let env_file = std::env::var_os(CLIENT_CONFIG_FILE_ENV).map(PathBuf::from);
    for path in candidate_paths(explicit, env_file, dirs::home_dir()) {
        if !path.exists() {
            continue;
        }
        debug!(path = %path.display(), cloud = %cloud, "Loading clouds.yaml");
        let content = std::fs::read_to_string(&path).map_err(|e| {
            Error::config(format!("failed to read {}: {}", path.display(), e))
        })?;
        let config = parse_cloud(&content, cloud)?;
        config.validate()?;
        return Ok(config);
    }

    let config = CloudConfig::from_env_vars(|key| std::env::var(key).ok()).ok_or_else(|| {
        Error::config("no clouds.yaml found and OS_AUTH_URL is not set")
    })?;
    debug!("Using OS_* environment variables for OpenStack credentials");
    config.validate()?;
    Ok(config)
}
