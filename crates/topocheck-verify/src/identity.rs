//! Identity resolution for control plane nodes
//!
//! Maps a Kubernetes `Node` to the OpenStack server backing it and to the
//! Machine that declared it. Pure: operates on already-fetched records.

use std::fmt;

use k8s_openapi::api::core::v1::Node;
use serde::Serialize;

use topocheck_common::{Error, Result, MACHINE_ANNOTATION, OPENSTACK_PROVIDER_ID_PREFIX};

/// Namespace and name of the Machine owning a node
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MachineRef {
    /// Machine namespace
    pub namespace: String,
    /// Machine name
    pub name: String,
}

impl fmt::Display for MachineRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// A control plane node with its provider and machine identities resolved
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedNode {
    /// Kubernetes node name
    pub node_name: String,
    /// OpenStack server ID; may be empty, which the aggregator rejects
    pub instance_id: String,
    /// Owning Machine
    pub machine: MachineRef,
}

/// Strip the OpenStack provider prefix from a `spec.providerID`
///
/// A value without the prefix is returned unchanged.
pub fn instance_id_from_provider_id(provider_id: &str) -> &str {
    provider_id
        .strip_prefix(OPENSTACK_PROVIDER_ID_PREFIX)
        .unwrap_or(provider_id)
}

/// Parse a `<namespace>/<name>` machine annotation
///
/// Splits on the first `/`; both parts must be non-empty.
pub fn parse_machine_ref(node_name: &str, annotation: &str) -> Result<MachineRef> {
    match annotation.split_once('/') {
        Some((namespace, name)) if !namespace.is_empty() && !name.is_empty() => Ok(MachineRef {
            namespace: namespace.to_string(),
            name: name.to_string(),
        }),
        _ => Err(Error::malformed_field(
            format!("node {}", node_name),
            format!("metadata.annotations[{}]", MACHINE_ANNOTATION),
            format!(
                "machine annotation {:?} is not of the form <namespace>/<name>",
                annotation
            ),
        )),
    }
}

/// Resolve a node's server ID and owning Machine
pub fn resolve_node(node: &Node) -> Result<ResolvedNode> {
    let node_name = node
        .metadata
        .name
        .clone()
        .ok_or_else(|| Error::malformed_input("node", "node has no name"))?;

    let provider_id = node
        .spec
        .as_ref()
        .and_then(|spec| spec.provider_id.as_deref())
        .unwrap_or_default();

    let annotation = node
        .metadata
        .annotations
        .as_ref()
        .and_then(|a| a.get(MACHINE_ANNOTATION))
        .ok_or_else(|| {
            Error::malformed_field(
                format!("node {}", node_name),
                format!("metadata.annotations[{}]", MACHINE_ANNOTATION),
                "node has no machine annotation",
            )
        })?;

    let machine = parse_machine_ref(&node_name, annotation)?;

    Ok(ResolvedNode {
        instance_id: instance_id_from_provider_id(provider_id).to_string(),
        node_name,
        machine,
    })
}
