//! Common types for topocheck: errors, well-known names, and utilities

#![deny(missing_docs)]

pub mod error;
pub mod kube_utils;
pub mod telemetry;
pub mod unstructured;

pub use error::{Error, ErrorKind};

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Prefix the OpenStack cloud provider puts in front of `Node.spec.providerID`
pub const OPENSTACK_PROVIDER_ID_PREFIX: &str = "openstack:///";

/// Label selecting control plane nodes
pub const CONTROL_PLANE_NODE_SELECTOR: &str = "node-role.kubernetes.io/master";

/// Node annotation holding the owning Machine as `<namespace>/<name>`
pub const MACHINE_ANNOTATION: &str = "machine.openshift.io/machine";

/// API version of the Machine resource
pub const MACHINE_API_VERSION: &str = "machine.openshift.io/v1beta1";

/// Kind of the Machine resource
pub const MACHINE_KIND: &str = "Machine";

/// Path of the server group name inside a Machine document
pub const SERVER_GROUP_NAME_PATH: &[&str] = &["spec", "providerSpec", "value", "serverGroupName"];

/// Namespace of the installer's cluster configuration ConfigMap
pub const INSTALL_CONFIG_NAMESPACE: &str = "kube-system";

/// Name of the installer's cluster configuration ConfigMap
pub const INSTALL_CONFIG_NAME: &str = "cluster-config-v1";

/// ConfigMap key holding the serialized install-config YAML
pub const INSTALL_CONFIG_KEY: &str = "install-config";

/// Server group policy requiring members on distinct hypervisors
pub const POLICY_ANTI_AFFINITY: &str = "anti-affinity";
