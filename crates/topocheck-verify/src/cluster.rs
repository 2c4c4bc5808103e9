//! Kubernetes-side queries consumed by verification
//!
//! Provides a trait-based abstraction over the cluster API, allowing tests to
//! mock Kubernetes interactions while production code uses real API calls.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{ConfigMap, Node};
use kube::api::{Api, DynamicObject, ListParams};
use kube::Client;
use serde::Deserialize;
use tracing::{debug, warn};

#[cfg(any(test, feature = "test-utils"))]
use mockall::automock;

use topocheck_common::kube_utils::{build_api_resource, is_not_found};
use topocheck_common::{
    Error, Result, INSTALL_CONFIG_KEY, INSTALL_CONFIG_NAME, INSTALL_CONFIG_NAMESPACE,
    MACHINE_API_VERSION, MACHINE_KIND,
};

/// Read-only cluster queries consumed by topology verification
#[cfg_attr(any(test, feature = "test-utils"), automock)]
#[async_trait]
pub trait ClusterClient: Send + Sync {
    /// List nodes matching a label selector, in API order
    async fn list_control_plane_nodes(&self, selector: &str) -> Result<Vec<Node>>;

    /// Fetch a Machine as a loosely-typed JSON document
    async fn get_machine(&self, namespace: &str, name: &str) -> Result<serde_json::Value>;

    /// Fetch the installer's cluster configuration
    ///
    /// Returns `None` when the cluster has no install-config ConfigMap.
    async fn get_install_config(&self) -> Result<Option<InstallConfig>>;
}

/// The parts of the installer's `install-config` that verification reads
#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct InstallConfig {
    /// Control plane machine pool
    #[serde(default)]
    pub control_plane: Option<MachinePool>,
}

/// An install-config machine pool
#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
pub struct MachinePool {
    /// Platform-specific pool settings
    #[serde(default)]
    pub platform: Option<MachinePoolPlatform>,
}

/// Platform section of a machine pool
#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
pub struct MachinePoolPlatform {
    /// OpenStack settings
    #[serde(default)]
    pub openstack: Option<OpenStackMachinePool>,
}

/// OpenStack settings of a machine pool
#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct OpenStackMachinePool {
    /// Declared Nova server group policy
    #[serde(default)]
    pub server_group_policy: Option<String>,
}

impl InstallConfig {
    /// Parse the serialized install-config
    pub fn from_yaml(content: &str) -> Result<Self> {
        serde_yaml::from_str(content).map_err(|e| {
            Error::malformed_field(
                format!("configmap {}/{}", INSTALL_CONFIG_NAMESPACE, INSTALL_CONFIG_NAME),
                format!("data[{}]", INSTALL_CONFIG_KEY),
                format!("install-config is not valid YAML: {}", e),
            )
        })
    }

    /// Declared control plane server group policy, if set and non-empty
    pub fn server_group_policy(&self) -> Option<&str> {
        self.control_plane
            .as_ref()
            .and_then(|cp| cp.platform.as_ref())
            .and_then(|p| p.openstack.as_ref())
            .and_then(|os| os.server_group_policy.as_deref())
            .filter(|policy| !policy.is_empty())
    }
}

/// kube-rs backed [`ClusterClient`]
pub struct KubeClusterClient {
    client: Client,
}

impl KubeClusterClient {
    /// Create a new KubeClusterClient wrapping the given kube Client
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ClusterClient for KubeClusterClient {
    async fn list_control_plane_nodes(&self, selector: &str) -> Result<Vec<Node>> {
        let api: Api<Node> = Api::all(self.client.clone());
        let nodes = api.list(&ListParams::default().labels(selector)).await?;
        debug!(selector = %selector, count = nodes.items.len(), "Listed control plane nodes");
        Ok(nodes.items)
    }

    async fn get_machine(&self, namespace: &str, name: &str) -> Result<serde_json::Value> {
        let ar = build_api_resource(MACHINE_API_VERSION, MACHINE_KIND);
        let api: Api<DynamicObject> = Api::namespaced_with(self.client.clone(), namespace, &ar);
        let machine = api.get(name).await?;
        serde_json::to_value(&machine).map_err(|e| {
            Error::malformed_input(
                format!("machine {}/{}", namespace, name),
                format!("failed to serialize machine: {}", e),
            )
        })
    }

    async fn get_install_config(&self) -> Result<Option<InstallConfig>> {
        let api: Api<ConfigMap> = Api::namespaced(self.client.clone(), INSTALL_CONFIG_NAMESPACE);
        install_config_from_lookup(api.get(INSTALL_CONFIG_NAME).await)
    }
}

/// Interpret the result of fetching the install-config ConfigMap
///
/// A missing ConfigMap means the cluster was not created by the installer and
/// yields `None`; a ConfigMap without the `install-config` key is malformed.
pub fn install_config_from_lookup(
    lookup: std::result::Result<ConfigMap, kube::Error>,
) -> Result<Option<InstallConfig>> {
    let cm = match lookup {
        Ok(cm) => cm,
        Err(e) if is_not_found(&e) => {
            warn!(
                namespace = INSTALL_CONFIG_NAMESPACE,
                name = INSTALL_CONFIG_NAME,
                "Install config ConfigMap not found"
            );
            return Ok(None);
        }
        Err(e) => return Err(e.into()),
    };

    let content = cm
        .data
        .as_ref()
        .and_then(|d| d.get(INSTALL_CONFIG_KEY))
        .ok_or_else(|| {
            Error::malformed_field(
                format!("configmap {}/{}", INSTALL_CONFIG_NAMESPACE, INSTALL_CONFIG_NAME),
                format!("data[{}]", INSTALL_CONFIG_KEY),
                "install-config key is missing",
            )
        })?;

    InstallConfig::from_yaml(content).map(Some)
}
