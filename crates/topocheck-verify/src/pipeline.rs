//! Verification pipeline
//!
//! Runs the stages in order, once, stopping at the first failing stage:
//!
//! ```text
//! ResolveIdentities -> AggregateExpectedTopology -> ValidateProviderMembership
//!     -> CrossCheckPolicy -> ValidatePhysicalDistribution -> Pass | Fail
//! ```
//!
//! Collaborators are injected as trait objects so the same pipeline runs
//! against kube/Nova in production and against mocks in tests.

use std::fmt;
use std::sync::Arc;

use thiserror::Error as ThisError;
use tracing::{info, instrument};

use topocheck_common::{Error, Result, CONTROL_PLANE_NODE_SELECTOR};
use topocheck_openstack::ComputeClient;

use crate::cluster::ClusterClient;
use crate::identity::{resolve_node, ResolvedNode};
use crate::membership::{check_membership, resolve_group};
use crate::physical::{check_declared_policy, validate_distribution};
use crate::report::VerificationReport;
use crate::topology::aggregate;

/// Pipeline stage, used to attribute failures
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Stage {
    /// Map nodes to server IDs and Machines
    ResolveIdentities,
    /// Fold Machine declarations into the expected topology
    AggregateExpectedTopology,
    /// Resolve the provider group and check membership
    ValidateProviderMembership,
    /// Compare the declared policy with the provider's
    CrossCheckPolicy,
    /// Check host placement under the group's policy
    ValidatePhysicalDistribution,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::ResolveIdentities => "ResolveIdentities",
            Stage::AggregateExpectedTopology => "AggregateExpectedTopology",
            Stage::ValidateProviderMembership => "ValidateProviderMembership",
            Stage::CrossCheckPolicy => "CrossCheckPolicy",
            Stage::ValidatePhysicalDistribution => "ValidatePhysicalDistribution",
        };
        f.write_str(name)
    }
}

/// A pipeline run that stopped at a stage
#[derive(Debug, ThisError)]
#[error("{stage}: {source}")]
pub struct StageFailure {
    /// Stage that failed
    pub stage: Stage,
    /// What went wrong
    #[source]
    pub source: Error,
}

impl StageFailure {
    fn at(stage: Stage) -> impl FnOnce(Error) -> Self {
        move |source| Self { stage, source }
    }

    /// Whether the failure is an invariant violation rather than an error
    pub fn is_verdict(&self) -> bool {
        self.source.is_verdict()
    }
}

/// Where the cluster's declared server group policy comes from
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum DeclaredPolicy {
    /// Read it from the installer's install-config
    #[default]
    FromInstallConfig,
    /// Use this value
    Explicit(String),
    /// Do not cross-check
    Skip,
}

/// Pipeline settings
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VerifierConfig {
    /// Label selector for control plane nodes
    pub node_selector: String,
    /// Source of the declared policy
    pub declared_policy: DeclaredPolicy,
}

impl Default for VerifierConfig {
    fn default() -> Self {
        Self {
            node_selector: CONTROL_PLANE_NODE_SELECTOR.to_string(),
            declared_policy: DeclaredPolicy::default(),
        }
    }
}

/// Control plane placement verifier
pub struct Verifier {
    cluster: Arc<dyn ClusterClient>,
    compute: Arc<dyn ComputeClient>,
    config: VerifierConfig,
}

impl Verifier {
    /// Create a verifier over the given collaborators
    pub fn new(
        cluster: Arc<dyn ClusterClient>,
        compute: Arc<dyn ComputeClient>,
        config: VerifierConfig,
    ) -> Self {
        Self {
            cluster,
            compute,
            config,
        }
    }

    /// Run every stage once and report the verdict
    #[instrument(skip(self), fields(selector = %self.config.node_selector))]
    pub async fn run(&self) -> std::result::Result<VerificationReport, StageFailure> {
        let nodes = self
            .resolve_identities()
            .await
            .map_err(StageFailure::at(Stage::ResolveIdentities))?;
        info!(nodes = nodes.len(), "Resolved control plane identities");

        let topology = aggregate(self.cluster.as_ref(), &nodes)
            .await
            .map_err(StageFailure::at(Stage::AggregateExpectedTopology))?;
        info!(
            group = %topology.group_name,
            instances = topology.instance_ids.len(),
            "Aggregated expected topology"
        );

        let group = resolve_group(self.compute.as_ref(), &topology.group_name)
            .await
            .map_err(StageFailure::at(Stage::ValidateProviderMembership))?;
        let extra_members = check_membership(&topology, &group)
            .map_err(StageFailure::at(Stage::ValidateProviderMembership))?;
        info!(
            group = %group.name,
            group_id = %group.id,
            members = group.members.len(),
            "Control plane instances are server group members"
        );

        let declared_policy = self
            .declared_policy()
            .await
            .map_err(StageFailure::at(Stage::CrossCheckPolicy))?;
        check_declared_policy(&group, declared_policy.as_deref())
            .map_err(StageFailure::at(Stage::CrossCheckPolicy))?;

        let physical = validate_distribution(self.compute.as_ref(), &topology, &group)
            .await
            .map_err(StageFailure::at(Stage::ValidatePhysicalDistribution))?;
        info!(group = %group.name, outcome = ?physical, "Physical distribution validated");

        Ok(VerificationReport {
            nodes,
            policy: group.primary_policy().map(str::to_string),
            group_name: group.name,
            group_id: group.id,
            declared_policy,
            expected_instance_ids: topology.instance_ids,
            extra_members,
            physical,
        })
    }

    #[instrument(skip_all)]
    async fn resolve_identities(&self) -> Result<Vec<ResolvedNode>> {
        let selector = &self.config.node_selector;
        let nodes = self.cluster.list_control_plane_nodes(selector).await?;
        if nodes.is_empty() {
            return Err(Error::malformed_input(
                "control plane",
                format!("no control plane nodes matched selector {}", selector),
            ));
        }
        nodes.iter().map(resolve_node).collect()
    }

    #[instrument(skip_all)]
    async fn declared_policy(&self) -> Result<Option<String>> {
        match &self.config.declared_policy {
            DeclaredPolicy::Skip => Ok(None),
            DeclaredPolicy::Explicit(policy) => Ok(Some(policy.clone())),
            DeclaredPolicy::FromInstallConfig => {
                let policy = self
                    .cluster
                    .get_install_config()
                    .await?
                    .and_then(|ic| ic.server_group_policy().map(str::to_string));
                if policy.is_none() {
                    info!("Install config declares no control plane server group policy");
                }
                Ok(policy)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::{InstallConfig, MockClusterClient};
    use crate::identity::tests::node;
    use crate::physical::PhysicalOutcome;
    use serde_json::json;
    use topocheck_common::ErrorKind;
    use topocheck_openstack::{MockComputeClient, Server, ServerGroup};

    fn machine_doc(group: &str) -> serde_json::Value {
        json!({ "spec": { "providerSpec": { "value": { "serverGroupName": group } } } })
    }

    fn cluster_with_nodes() -> MockClusterClient {
        let mut cluster = MockClusterClient::new();
        cluster.expect_list_control_plane_nodes().returning(|_| {
            Ok(vec![
                node("master-0", Some("openstack:///a"), Some("ns/m0")),
                node("master-1", Some("openstack:///b"), Some("ns/m1")),
            ])
        });
        cluster
            .expect_get_machine()
            .returning(|_, _| Ok(machine_doc("masters-sg")));
        cluster
    }

    fn compute(policy: &str) -> MockComputeClient {
        let group = ServerGroup {
            id: "sg-1".to_string(),
            name: "masters-sg".to_string(),
            policy: Some(policy.to_string()),
            members: vec!["a".to_string(), "b".to_string()],
            ..Default::default()
        };
        let listed = group.clone();
        let mut compute = MockComputeClient::new();
        compute
            .expect_list_server_groups()
            .returning(move || Ok(vec![listed.clone()]));
        compute
            .expect_get_server_group()
            .returning(move |_| Ok(group.clone()));
        compute.expect_get_server().returning(|id| {
            Ok(Server {
                id: id.to_string(),
                name: id.to_string(),
                host_id: format!("host-{id}"),
            })
        });
        compute
    }

    fn verifier(
        cluster: MockClusterClient,
        compute: MockComputeClient,
        declared_policy: DeclaredPolicy,
    ) -> Verifier {
        Verifier::new(
            Arc::new(cluster),
            Arc::new(compute),
            VerifierConfig {
                declared_policy,
                ..Default::default()
            },
        )
    }

    #[tokio::test]
    async fn passing_run_reports_everything() {
        let mut cluster = cluster_with_nodes();
        cluster.expect_get_install_config().returning(|| {
            Ok(Some(
                InstallConfig::from_yaml(
                    "controlPlane:\n  platform:\n    openstack:\n      serverGroupPolicy: anti-affinity\n",
                )
                .unwrap(),
            ))
        });

        let report = verifier(cluster, compute("anti-affinity"), DeclaredPolicy::FromInstallConfig)
            .run()
            .await
            .unwrap();
        assert_eq!(report.node_count(), 2);
        assert_eq!(report.group_id, "sg-1");
        assert_eq!(report.declared_policy.as_deref(), Some("anti-affinity"));
        assert!(matches!(report.physical, PhysicalOutcome::Passed { .. }));
    }

    #[tokio::test]
    async fn zero_nodes_fails_first_stage() {
        let mut cluster = MockClusterClient::new();
        cluster
            .expect_list_control_plane_nodes()
            .withf(|selector| selector == CONTROL_PLANE_NODE_SELECTOR)
            .returning(|_| Ok(vec![]));
        cluster.expect_get_machine().never();

        let failure = verifier(cluster, MockComputeClient::new(), DeclaredPolicy::Skip)
            .run()
            .await
            .unwrap_err();
        assert_eq!(failure.stage, Stage::ResolveIdentities);
        assert_eq!(failure.source.kind(), ErrorKind::MalformedInput);
        assert!(failure.to_string().starts_with("ResolveIdentities: "));
    }

    #[tokio::test]
    async fn declared_policy_mismatch_stops_before_physical_check() {
        let cluster = cluster_with_nodes();
        let mut compute = MockComputeClient::new();
        compute.expect_list_server_groups().returning(|| {
            Ok(vec![ServerGroup {
                id: "sg-1".to_string(),
                name: "masters-sg".to_string(),
                ..Default::default()
            }])
        });
        compute.expect_get_server_group().returning(|_| {
            Ok(ServerGroup {
                id: "sg-1".to_string(),
                name: "masters-sg".to_string(),
                policy: Some("soft-anti-affinity".to_string()),
                members: vec!["a".to_string(), "b".to_string()],
                ..Default::default()
            })
        });
        compute.expect_get_server().never();

        let failure = verifier(
            cluster,
            compute,
            DeclaredPolicy::Explicit("anti-affinity".to_string()),
        )
        .run()
        .await
        .unwrap_err();
        assert_eq!(failure.stage, Stage::CrossCheckPolicy);
        assert_eq!(failure.source.kind(), ErrorKind::PolicyMismatch);
        assert!(failure.is_verdict());
    }

    #[tokio::test]
    async fn missing_install_config_skips_cross_check() {
        let mut cluster = cluster_with_nodes();
        cluster.expect_get_install_config().returning(|| Ok(None));

        let report = verifier(cluster, compute("affinity"), DeclaredPolicy::FromInstallConfig)
            .run()
            .await
            .unwrap();
        assert_eq!(report.declared_policy, None);
        assert!(matches!(report.physical, PhysicalOutcome::Skipped { .. }));
    }

    #[tokio::test]
    async fn install_config_failure_is_not_a_verdict() {
        let mut cluster = cluster_with_nodes();
        cluster
            .expect_get_install_config()
            .returning(|| Err(Error::collaborator("kubernetes", "forbidden")));

        let failure = verifier(cluster, compute("anti-affinity"), DeclaredPolicy::FromInstallConfig)
            .run()
            .await
            .unwrap_err();
        assert_eq!(failure.stage, Stage::CrossCheckPolicy);
        assert!(!failure.is_verdict());
    }
}
