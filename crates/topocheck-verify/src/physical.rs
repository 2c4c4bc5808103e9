//! Policy cross-check and physical host distribution validation

use std::collections::BTreeMap;

use futures::future::try_join_all;
use serde::Serialize;
use tracing::{debug, info};

use topocheck_common::{Error, Result, POLICY_ANTI_AFFINITY};
use topocheck_openstack::{ComputeClient, ServerGroup};

use crate::topology::ExpectedTopology;

/// Result of the physical distribution stage when it does not fail
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "result", rename_all = "kebab-case")]
pub enum PhysicalOutcome {
    /// Every instance runs on its own host
    Passed {
        /// Instance ID -> host ID
        hosts: BTreeMap<String, String>,
    },
    /// The group's policy does not constrain hosts, so nothing was checked
    Skipped {
        /// Why the check did not run
        reason: String,
    },
}

/// Cross-check the cluster's declared policy against the provider's
///
/// `None` or an empty declaration skips the check.
pub fn check_declared_policy(group: &ServerGroup, declared: Option<&str>) -> Result<()> {
    let Some(declared) = declared.filter(|d| !d.is_empty()) else {
        debug!(group = %group.name, "No declared server group policy to cross-check");
        return Ok(());
    };
    let actual = group.primary_policy().unwrap_or_default();
    if declared != actual {
        return Err(Error::PolicyMismatch {
            group: group.name.clone(),
            declared: declared.to_string(),
            actual: actual.to_string(),
        });
    }
    Ok(())
}

/// Group instances by host, keeping only hosts that run more than one
pub fn find_collisions(hosts: &BTreeMap<String, String>) -> BTreeMap<String, Vec<String>> {
    let mut by_host: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for (instance, host) in hosts {
        by_host
            .entry(host.clone())
            .or_default()
            .push(instance.clone());
    }
    by_host.retain(|_, instances| instances.len() > 1);
    by_host
}

/// Fetch the host of every expected instance
async fn fetch_hosts(
    compute: &dyn ComputeClient,
    topology: &ExpectedTopology,
) -> Result<BTreeMap<String, String>> {
    let fetches = topology.instance_ids.iter().map(|id| async move {
        let server = compute.get_server(id).await?;
        if server.host_id.is_empty() {
            return Err(Error::malformed_field(
                format!("server {}", id),
                "hostId",
                "server has no host assigned",
            ));
        }
        debug!(instance = %id, host = %server.host_id, "Read server host");
        Ok::<_, Error>((id.clone(), server.host_id))
    });
    Ok(try_join_all(fetches).await?.into_iter().collect())
}

/// Validate physical placement under the group's primary policy
///
/// Only anti-affinity constrains hosts; any other policy skips the check.
pub async fn validate_distribution(
    compute: &dyn ComputeClient,
    topology: &ExpectedTopology,
    group: &ServerGroup,
) -> Result<PhysicalOutcome> {
    let policy = match group.primary_policy() {
        Some(POLICY_ANTI_AFFINITY) => POLICY_ANTI_AFFINITY,
        Some(other) => {
            info!(group = %group.name, policy = %other, "Skipping physical distribution check");
            return Ok(PhysicalOutcome::Skipped {
                reason: format!("server group policy is {}, not {}", other, POLICY_ANTI_AFFINITY),
            });
        }
        None => {
            info!(group = %group.name, "Server group has no policy, skipping physical distribution check");
            return Ok(PhysicalOutcome::Skipped {
                reason: "server group has no policy".to_string(),
            });
        }
    };

    let hosts = fetch_hosts(compute, topology).await?;
    let collisions = find_collisions(&hosts);
    if !collisions.is_empty() {
        return Err(Error::PhysicalPolicyViolation {
            group: group.name.clone(),
            policy: policy.to_string(),
            collisions,
        });
    }
    Ok(PhysicalOutcome::Passed { hosts })
}
