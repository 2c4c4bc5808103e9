//! Verdict report of a passing run

use std::collections::BTreeSet;

use serde::Serialize;

use crate::identity::ResolvedNode;
use crate::physical::PhysicalOutcome;

/// Everything a passing verification run established
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VerificationReport {
    /// Control plane nodes that were checked
    pub nodes: Vec<ResolvedNode>,
    /// Server group declared by every control plane machine
    pub group_name: String,
    /// Provider ID of that server group
    pub group_id: String,
    /// Primary policy reported by the provider
    #[serde(skip_serializing_if = "Option::is_none")]
    pub policy: Option<String>,
    /// Policy the cluster declares, when one was available
    #[serde(skip_serializing_if = "Option::is_none")]
    pub declared_policy: Option<String>,
    /// Server IDs that had to be group members
    pub expected_instance_ids: BTreeSet<String>,
    /// Group members that are not control plane nodes
    pub extra_members: Vec<String>,
    /// Outcome of the physical distribution check
    pub physical: PhysicalOutcome,
}

impl VerificationReport {
    /// Number of control plane nodes checked
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }
}
