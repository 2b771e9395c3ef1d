//! Small shared utilities (component J): a depth-first child-node walk used by
//! discovery-adjacent browsing code, and a thin convenience wrapper over
//! [`SecurityPolicyRegistry::by_uri`].

use std::sync::Arc;

use opcua_core::ServerError;

use crate::collaborators::{ChildRef, NodeId, NodeStore, SecurityPolicy, SecurityPolicyRegistry};

/// Invokes `visit` once for every direct local child of `node`, short-circuiting at
/// the first child for which `visit` returns `Err`. Only `node`'s immediate children
/// are browsed; walking further into the address space is the caller's job to repeat
/// per child, the same one-node-at-a-time shape `forEachChildNodeCall` performs
/// (everything else about the information model belongs to the embedder's
/// [`NodeStore`]).
pub fn for_each_child_node_call(
    node_store: &Arc<dyn NodeStore>,
    node: &NodeId,
    visit: &mut dyn FnMut(&ChildRef) -> Result<(), ServerError>,
) -> Result<(), ServerError> {
    for child in node_store.children(node) {
        visit(&child)?;
    }
    Ok(())
}

/// Looks up a security policy by URI, translating "not found" into
/// [`ServerError::invalid_argument`] so callers (certificate rotation, endpoint setup)
/// get a uniform error shape regardless of which lookup failed.
pub fn security_policy_by_uri(
    registry: &Arc<dyn SecurityPolicyRegistry>,
    uri: &str,
) -> Result<Arc<dyn SecurityPolicy>, ServerError> {
    registry.by_uri(uri).ok_or_else(|| ServerError::invalid_argument(format!("unknown security policy `{uri}`")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::ServerComponent;
    use std::collections::HashMap;

    struct TreeNodeStore {
        children: HashMap<NodeId, Vec<ChildRef>>,
    }
    impl ServerComponent for TreeNodeStore {
        fn init(&self) -> Result<(), ServerError> {
            Ok(())
        }
        fn clear(&self) {}
    }
    impl NodeStore for TreeNodeStore {
        fn children(&self, node: &NodeId) -> Vec<ChildRef> {
            self.children.get(node).cloned().unwrap_or_default()
        }
    }

    fn ref_type() -> NodeId {
        NodeId::new(0, "HasComponent")
    }

    #[test]
    fn visits_only_direct_children() {
        let root = NodeId::new(1, "root");
        let a = NodeId::new(1, "a");
        let b = NodeId::new(1, "b");
        let grandchild = NodeId::new(1, "grandchild");
        let mut children = HashMap::new();
        children.insert(
            root.clone(),
            vec![
                ChildRef { child_id: a.clone(), is_inverse: false, reference_type_id: ref_type() },
                ChildRef { child_id: b.clone(), is_inverse: false, reference_type_id: ref_type() },
            ],
        );
        children.insert(
            a.clone(),
            vec![ChildRef { child_id: grandchild, is_inverse: false, reference_type_id: ref_type() }],
        );
        let node_store: Arc<dyn NodeStore> = Arc::new(TreeNodeStore { children });

        let mut visited = Vec::new();
        for_each_child_node_call(&node_store, &root, &mut |child| {
            visited.push(child.child_id.clone());
            Ok(())
        })
        .unwrap();

        assert_eq!(visited, vec![a, b]);
    }

    #[test]
    fn short_circuits_on_first_error() {
        let root = NodeId::new(1, "root");
        let a = NodeId::new(1, "a");
        let b = NodeId::new(1, "b");
        let mut children = HashMap::new();
        children.insert(
            root.clone(),
            vec![
                ChildRef { child_id: a.clone(), is_inverse: false, reference_type_id: ref_type() },
                ChildRef { child_id: b.clone(), is_inverse: false, reference_type_id: ref_type() },
            ],
        );
        let node_store: Arc<dyn NodeStore> = Arc::new(TreeNodeStore { children });

        let mut visited = Vec::new();
        let result = for_each_child_node_call(&node_store, &root, &mut |child| {
            visited.push(child.child_id.clone());
            Err(ServerError::internal("stop"))
        });

        assert!(result.is_err());
        assert_eq!(visited, vec![a]);
    }

    struct StubPolicy;
    impl SecurityPolicy for StubPolicy {
        fn uri(&self) -> &str {
            "urn:test:policy"
        }
        fn certificate(&self) -> Vec<u8> {
            Vec::new()
        }
        fn update_certificate_and_key(&self, _certificate: &[u8], _private_key: &[u8]) -> Result<(), ServerError> {
            Ok(())
        }
    }

    struct StubRegistry;
    impl SecurityPolicyRegistry for StubRegistry {
        fn by_uri(&self, uri: &str) -> Option<Arc<dyn SecurityPolicy>> {
            (uri == "urn:test:policy").then(|| Arc::new(StubPolicy) as Arc<dyn SecurityPolicy>)
        }
        fn all(&self) -> Vec<Arc<dyn SecurityPolicy>> {
            vec![Arc::new(StubPolicy)]
        }
    }

    #[test]
    fn security_policy_by_uri_reports_not_found() {
        let registry: Arc<dyn SecurityPolicyRegistry> = Arc::new(StubRegistry);
        let err = security_policy_by_uri(&registry, "urn:missing").unwrap_err();
        assert_eq!(err.kind(), opcua_core::ErrorKind::InvalidArgument);
    }

    #[test]
    fn security_policy_by_uri_finds_a_known_policy() {
        let registry: Arc<dyn SecurityPolicyRegistry> = Arc::new(StubRegistry);
        let policy = security_policy_by_uri(&registry, "urn:test:policy").unwrap();
        assert_eq!(policy.uri(), "urn:test:policy");
    }
}
