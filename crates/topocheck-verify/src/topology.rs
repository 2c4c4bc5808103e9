//! Expected topology aggregation
//!
//! Reads every control plane Machine's declared server group and folds the
//! declarations into a single group name plus the set of server IDs that must
//! belong to it.

use std::collections::{BTreeMap, BTreeSet};

use futures::future::try_join_all;
use tracing::debug;

use topocheck_common::unstructured::lookup_str;
use topocheck_common::{Error, Result, SERVER_GROUP_NAME_PATH};

use crate::cluster::ClusterClient;
use crate::identity::{MachineRef, ResolvedNode};

/// What the orchestration layer says the placement should be
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExpectedTopology {
    /// Server group name shared by all control plane machines
    pub group_name: String,
    /// Server IDs of all control plane nodes, lower-cased
    pub instance_ids: BTreeSet<String>,
}

/// Read the declared server group name out of a Machine document
///
/// The field is mandatory for control plane machines: a missing, mistyped or
/// empty value is malformed input.
pub fn declared_group_name(machine: &MachineRef, doc: &serde_json::Value) -> Result<String> {
    let entity = format!("machine {}", machine);
    let name = lookup_str(doc, SERVER_GROUP_NAME_PATH).require(&entity)?;
    if name.is_empty() {
        return Err(Error::malformed_field(
            entity,
            SERVER_GROUP_NAME_PATH.join("."),
            "server group name is empty",
        ));
    }
    Ok(name.to_string())
}

/// Fold per-node declarations into the expected topology
///
/// The first declaration is the baseline; any later one that differs fails
/// with both instances named. Server IDs are lower-cased; an empty ID, or two
/// nodes whose IDs are equal ignoring case, is malformed.
pub fn fold_declarations(declarations: &[(ResolvedNode, String)]) -> Result<ExpectedTopology> {
    let mut baseline: Option<(&str, &str)> = None;
    let mut owners: BTreeMap<String, &str> = BTreeMap::new();

    for (node, group_name) in declarations {
        if node.instance_id.is_empty() {
            return Err(Error::malformed_field(
                format!("node {}", node.node_name),
                "spec.providerID",
                "node has no OpenStack server ID",
            ));
        }
        let instance_id = node.instance_id.to_lowercase();
        if let Some(other) = owners.insert(instance_id, node.node_name.as_str()) {
            return Err(Error::malformed_input(
                format!("node {}", node.node_name),
                format!(
                    "server {} is also claimed by node {}",
                    node.instance_id, other
                ),
            ));
        }

        match baseline {
            None => baseline = Some((node.instance_id.as_str(), group_name.as_str())),
            Some((first_instance, first_group)) if first_group != group_name.as_str() => {
                return Err(Error::InconsistentDeclaration {
                    first_instance: first_instance.to_string(),
                    first_group: first_group.to_string(),
                    other_instance: node.instance_id.clone(),
                    other_group: group_name.clone(),
                });
            }
            Some(_) => {}
        }
    }

    let (_, group_name) = baseline.ok_or_else(|| {
        Error::malformed_input("control plane", "no control plane nodes to aggregate")
    })?;

    Ok(ExpectedTopology {
        group_name: group_name.to_string(),
        instance_ids: owners.into_keys().collect(),
    })
}

/// Fetch every node's Machine and aggregate the expected topology
///
/// Machine fetches run concurrently; declarations are folded in node order
/// once all have arrived.
pub async fn aggregate(
    cluster: &dyn ClusterClient,
    nodes: &[ResolvedNode],
) -> Result<ExpectedTopology> {
    let fetches = nodes.iter().map(|node| async move {
        let doc = cluster
            .get_machine(&node.machine.namespace, &node.machine.name)
            .await?;
        let group = declared_group_name(&node.machine, &doc)?;
        debug!(
            node = %node.node_name,
            machine = %node.machine,
            group = %group,
            "Read declared server group"
        );
        Ok::<_, Error>((node.clone(), group))
    });
    let declarations = try_join_all(fetches).await?;
    fold_declarations(&declarations)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::MockClusterClient;
    use serde_json::json;

    fn resolved(node: &str, instance: &str) -> ResolvedNode {
        ResolvedNode {
            node_name: node.to_string(),
            instance_id: instance.to_string(),
            machine: MachineRef {
                namespace: "openshift-machine-api".to_string(),
                name: format!("machine-{}", node),
            },
        }
    }

    fn machine_doc(group: &str) -> serde_json::Value {
        json!({
            "apiVersion": "machine.openshift.io/v1beta1",
            "kind": "Machine",
            "spec": { "providerSpec": { "value": { "serverGroupName": group } } }
        })
    }

    #[test]
    fn equal_declarations_fold_into_one_group() {
        let decls = vec![
            (resolved("m0", "a"), "masters-sg".to_string()),
            (resolved("m1", "b"), "masters-sg".to_string()),
            (resolved("m2", "c"), "masters-sg".to_string()),
        ];
        let topology = fold_declarations(&decls).unwrap();
        assert_eq!(topology.group_name, "masters-sg");
        assert_eq!(topology.instance_ids.len(), decls.len());
        assert!(topology.instance_ids.contains("b"));
    }

    #[test]
    fn divergent_declaration_names_both_instances() {
        let decls = vec![
            (resolved("m0", "a"), "masters-sg".to_string()),
            (resolved("m1", "b"), "masters-sg".to_string()),
            (resolved("m2", "c"), "masters-sg-2".to_string()),
        ];
        match fold_declarations(&decls).unwrap_err() {
            Error::InconsistentDeclaration {
                first_instance,
                first_group,
                other_instance,
                other_group,
            } => {
                assert_eq!(first_instance, "a");
                assert_eq!(first_group, "masters-sg");
                assert_eq!(other_instance, "c");
                assert_eq!(other_group, "masters-sg-2");
            }
            other => panic!("Expected InconsistentDeclaration, got {other:?}"),
        }
    }

    #[test]
    fn empty_instance_id_is_malformed() {
        let decls = vec![(resolved("m0", ""), "masters-sg".to_string())];
        let err = fold_declarations(&decls).unwrap_err();
        assert!(err.to_string().contains("node m0"));
        assert!(err.to_string().contains("no OpenStack server ID"));
    }

    #[test]
    fn duplicate_instance_id_is_malformed() {
        let decls = vec![
            (resolved("m0", "a"), "masters-sg".to_string()),
            (resolved("m1", "a"), "masters-sg".to_string()),
        ];
        let err = fold_declarations(&decls).unwrap_err();
        assert!(err.to_string().contains("also claimed by node m0"));
    }

    #[test]
    fn ids_differing_only_by_case_are_duplicates() {
        let decls = vec![
            (resolved("m0", "ABC"), "masters-sg".to_string()),
            (resolved("m1", "abc"), "masters-sg".to_string()),
        ];
        let err = fold_declarations(&decls).unwrap_err();
        assert_eq!(err.kind(), topocheck_common::ErrorKind::MalformedInput);
        assert!(err.to_string().contains("server abc is also claimed by node m0"));
    }

    #[test]
    fn instance_ids_are_lower_cased() {
        let decls = vec![(resolved("m0", "0D2F7C4E-AAAA"), "masters-sg".to_string())];
        let topology = fold_declarations(&decls).unwrap();
        assert!(topology.instance_ids.contains("0d2f7c4e-aaaa"));
    }

    #[test]
    fn no_declarations_is_malformed() {
        let err = fold_declarations(&[]).unwrap_err();
        assert_eq!(err.kind(), topocheck_common::ErrorKind::MalformedInput);
    }

    #[test]
    fn declared_group_name_rejects_empty_and_missing() {
        let machine = MachineRef {
            namespace: "ns".to_string(),
            name: "m0".to_string(),
        };
        assert_eq!(
            declared_group_name(&machine, &machine_doc("masters-sg")).unwrap(),
            "masters-sg"
        );

        let err = declared_group_name(&machine, &machine_doc("")).unwrap_err();
        assert!(err.to_string().contains("empty"));

        let err = declared_group_name(&machine, &json!({ "spec": {} })).unwrap_err();
        match err {
            Error::MalformedInput { field, entity, .. } => {
                assert_eq!(entity, "machine ns/m0");
                assert_eq!(field.as_deref(), Some("spec.providerSpec"));
            }
            other => panic!("Expected MalformedInput, got {other:?}"),
        }

        let err = declared_group_name(
            &machine,
            &json!({ "spec": { "providerSpec": { "value": { "serverGroupName": 7 } } } }),
        )
        .unwrap_err();
        assert!(err.to_string().contains("should be string but is number"));
    }

    #[tokio::test]
    async fn aggregate_fetches_every_machine() {
        let mut mock = MockClusterClient::new();
        mock.expect_get_machine()
            .times(3)
            .returning(|_, _| Ok(machine_doc("masters-sg")));

        let nodes = vec![resolved("m0", "a"), resolved("m1", "b"), resolved("m2", "c")];
        let topology = aggregate(&mock, &nodes).await.unwrap();
        assert_eq!(topology.group_name, "masters-sg");
        assert_eq!(
            topology.instance_ids,
            ["a", "b", "c"]
                .iter()
                .map(|s| s.to_string())
                .collect::<BTreeSet<_>>()
        );
    }

    #[tokio::test]
    async fn aggregate_propagates_fetch_failures() {
        let mut mock = MockClusterClient::new();
        mock.expect_get_machine()
            .returning(|_, name| {
                if name == "machine-m1" {
                    Err(Error::collaborator("kubernetes", "machine fetch timed out"))
                } else {
                    Ok(machine_doc("masters-sg"))
                }
            });

        let nodes = vec![resolved("m0", "a"), resolved("m1", "b")];
        let err = aggregate(&mock, &nodes).await.unwrap_err();
        assert!(!err.is_verdict());
        assert!(err.to_string().contains("timed out"));
    }
}
