//! Control plane placement verification
//!
//! Checks that an OpenShift-on-OpenStack control plane is placed the way the
//! cluster declares:
//! - every control plane Machine names the same Nova server group
//! - every control plane server is a member of that group
//! - under anti-affinity, no two control plane servers share a host
//!
//! [`Verifier`] runs the stages against a [`ClusterClient`] and a
//! [`topocheck_openstack::ComputeClient`].

#![deny(missing_docs)]

pub mod cluster;
pub mod identity;
pub mod membership;
pub mod physical;
pub mod pipeline;
pub mod report;
pub mod topology;

pub use cluster::{ClusterClient, InstallConfig, KubeClusterClient};
pub use identity::{MachineRef, ResolvedNode};
pub use physical::PhysicalOutcome;
pub use pipeline::{DeclaredPolicy, Stage, StageFailure, Verifier, VerifierConfig};
pub use report::VerificationReport;
pub use topology::ExpectedTopology;

#[cfg(any(test, feature = "test-utils"))]
pub use cluster::MockClusterClient;
