//! Nova compute resource types
//!
//! Only the fields topology verification consumes are modeled.

use serde::{Deserialize, Serialize};

/// A Nova server group
///
/// Nova reports policies as `policies: [..]` before microversion 2.64 and as
/// `policy: ".."` from 2.64 on. Both shapes deserialize into this type.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
pub struct ServerGroup {
    /// Server group UUID
    pub id: String,
    /// Server group name (not unique in Nova)
    #[serde(default)]
    pub name: String,
    /// Policy list (pre-2.64)
    #[serde(default)]
    pub policies: Vec<String>,
    /// Single policy (2.64+)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub policy: Option<String>,
    /// Member server UUIDs
    #[serde(default)]
    pub members: Vec<String>,
}

impl ServerGroup {
    /// The policy that governs placement
    ///
    /// Only the first entry of a policy list is meaningful; Nova never
    /// accepted more than one.
    pub fn primary_policy(&self) -> Option<&str> {
        self.policy
            .as_deref()
            .or_else(|| self.policies.first().map(String::as_str))
    }
}

/// A Nova server, reduced to its placement-relevant fields
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
pub struct Server {
    /// Server UUID
    pub id: String,
    /// Server name
    #[serde(default)]
    pub name: String,
    /// Opaque per-project hash of the hypervisor host; empty when unscheduled
    #[serde(default, rename = "hostId")]
    pub host_id: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ServerGroupList {
    #[serde(default)]
    pub server_groups: Vec<ServerGroup>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ServerGroupEnvelope {
    pub server_group: ServerGroup,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ServerEnvelope {
    pub server: Server,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn legacy_policy_list_is_primary() {
        let group: ServerGroup = serde_json::from_value(json!({
            "id": "sg-1",
            "name": "masters-sg",
            "policies": ["anti-affinity"],
            "members": ["a", "b"],
            "metadata": {}
        }))
        .unwrap();
        assert_eq!(group.primary_policy(), Some("anti-affinity"));
        assert_eq!(group.members, vec!["a", "b"]);
    }

    #[test]
    fn microversion_policy_field_wins() {
        let group: ServerGroup = serde_json::from_value(json!({
            "id": "sg-1",
            "name": "masters-sg",
            "policy": "soft-anti-affinity",
            "rules": {},
            "members": []
        }))
        .unwrap();
        assert_eq!(group.primary_policy(), Some("soft-anti-affinity"));
    }

    #[test]
    fn group_without_policy() {
        let group = ServerGroup {
            id: "sg-1".to_string(),
            ..Default::default()
        };
        assert_eq!(group.primary_policy(), None);
    }

    #[test]
    fn server_host_id_uses_nova_casing() {
        let server: ServerEnvelope = serde_json::from_value(json!({
            "server": {
                "id": "a",
                "name": "master-0",
                "hostId": "h1",
                "status": "ACTIVE"
            }
        }))
        .unwrap();
        assert_eq!(server.server.host_id, "h1");
    }

    #[test]
    fn unscheduled_server_has_empty_host() {
        let server: Server = serde_json::from_value(json!({ "id": "a" })).unwrap();
        assert!(server.host_id.is_empty());
    }
}
