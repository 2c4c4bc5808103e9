//! Provider-side server group resolution and membership validation

use std::collections::BTreeSet;

use tracing::{debug, warn};

use topocheck_common::{Error, Result};
use topocheck_openstack::{ComputeClient, ServerGroup};

use crate::topology::ExpectedTopology;

/// Resolve a server group by exact name and fetch its full record
///
/// Nova allows several groups to share a name; anything other than exactly
/// one match is a resolution failure.
pub async fn resolve_group(compute: &dyn ComputeClient, name: &str) -> Result<ServerGroup> {
    let groups = compute.list_server_groups().await?;
    let matching: Vec<&ServerGroup> = groups.iter().filter(|g| g.name == name).collect();
    debug!(
        group = %name,
        listed = groups.len(),
        matches = matching.len(),
        "Filtered server groups by name"
    );

    match matching.as_slice() {
        [group] => compute.get_server_group(&group.id).await,
        _ => Err(Error::group_resolution(name, matching.len())),
    }
}

/// Check that every expected instance is a member of the group
///
/// Returns the group's members that no control plane node accounts for.
/// Those are tolerated; only missing instances fail.
pub fn check_membership(expected: &ExpectedTopology, group: &ServerGroup) -> Result<Vec<String>> {
    let members: BTreeSet<String> = group.members.iter().map(|m| m.to_lowercase()).collect();
    let wanted: BTreeSet<String> = expected
        .instance_ids
        .iter()
        .map(|id| id.to_lowercase())
        .collect();

    let missing: Vec<String> = expected
        .instance_ids
        .iter()
        .filter(|id| !members.contains(&id.to_lowercase()))
        .cloned()
        .collect();
    if !missing.is_empty() {
        return Err(Error::MembershipMismatch {
            group: group.name.clone(),
            group_id: group.id.clone(),
            missing,
        });
    }

    let extra: Vec<String> = group
        .members
        .iter()
        .filter(|m| !wanted.contains(&m.to_lowercase()))
        .cloned()
        .collect();
    if !extra.is_empty() {
        warn!(
            group = %group.name,
            extra = ?extra,
            "Server group has members that are not control plane nodes"
        );
    }
    Ok(extra)
}
