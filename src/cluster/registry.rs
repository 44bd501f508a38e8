use crate::cluster::types::NodeId;
use crate::error::{ObserverError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Network address of one cluster member
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NodeEndpoint {
    pub id: NodeId,
    /// `host:port`, optionally prefixed with `http://` or `https://`
    pub address: String,
}

impl NodeEndpoint {
    pub fn new(id: NodeId, address: impl Into<String>) -> Self {
        Self {
            id,
            address: address.into(),
        }
    }
}

/// Static node id to address mapping, fixed at construction
///
/// This is the only place addresses are resolved; everything else refers to
/// nodes by id.
#[derive(Debug, Clone)]
pub struct EndpointRegistry {
    endpoints: BTreeMap<NodeId, String>,
}

impl EndpointRegistry {
    /// Build a registry, rejecting empty membership and duplicate ids
    pub fn new(endpoints: impl IntoIterator<Item = NodeEndpoint>) -> Result<Self> {
        let mut map = BTreeMap::new();
        for endpoint in endpoints {
            if map.insert(endpoint.id, endpoint.address).is_some() {
                return Err(ObserverError::Config(config::ConfigError::Message(
                    format!("Duplicate node id {} in cluster membership", endpoint.id),
                )));
            }
        }

        if map.is_empty() {
            return Err(ObserverError::Config(config::ConfigError::Message(
                "Cluster membership cannot be empty".to_string(),
            )));
        }

        Ok(Self { endpoints: map })
    }

    /// Address of `node_id` exactly as configured
    pub fn resolve(&self, node_id: NodeId) -> Result<&str> {
        self.endpoints
            .get(&node_id)
            .map(String::as_str)
            .ok_or(ObserverError::UnknownNode(node_id))
    }

    /// HTTP base URL for `node_id`
    pub fn base_url(&self, node_id: NodeId) -> Result<String> {
        let address = self.resolve(node_id)?;
        if address.starts_with("http://") || address.starts_with("https://") {
            Ok(address.trim_end_matches('/').to_string())
        } else {
            Ok(format!("http://{}", address))
        }
    }

    /// Push channel URL for `node_id`
    pub fn ws_url(&self, node_id: NodeId) -> Result<String> {
        let address = self.resolve(node_id)?;
        let url = if let Some(host) = address.strip_prefix("https://") {
            format!("wss://{}", host.trim_end_matches('/'))
        } else if let Some(host) = address.strip_prefix("http://") {
            format!("ws://{}", host.trim_end_matches('/'))
        } else {
            format!("ws://{}", address)
        };
        Ok(format!("{}/ws/raft", url))
    }

    pub fn contains(&self, node_id: NodeId) -> bool {
        self.endpoints.contains_key(&node_id)
    }

    /// Member ids in ascending order
    pub fn node_ids(&self) -> Vec<NodeId> {
        self.endpoints.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.endpoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn three_nodes() -> EndpointRegistry {
        EndpointRegistry::new(vec![
            NodeEndpoint::new(1, "127.0.0.1:8001"),
            NodeEndpoint::new(2, "127.0.0.1:8002"),
            NodeEndpoint::new(3, "https://node3.internal:8443/"),
        ])
        .unwrap()
    }

    #[test]
    fn test_resolve_known_and_unknown() {
        let registry = three_nodes();
        assert_eq!(registry.resolve(1).unwrap(), "127.0.0.1:8001");
        assert_eq!(registry.len(), 3);

        match registry.resolve(4) {
            Err(ObserverError::UnknownNode(4)) => {}
            other => panic!("Expected UnknownNode, got {:?}", other),
        }
        assert!(matches!(
            registry.resolve(0),
            Err(ObserverError::UnknownNode(0))
        ));
    }

    #[test]
    fn test_urls() {
        let registry = three_nodes();
        assert_eq!(registry.base_url(2).unwrap(), "http://127.0.0.1:8002");
        assert_eq!(registry.base_url(3).unwrap(), "https://node3.internal:8443");
        assert_eq!(registry.ws_url(1).unwrap(), "ws://127.0.0.1:8001/ws/raft");
        assert_eq!(
            registry.ws_url(3).unwrap(),
            "wss://node3.internal:8443/ws/raft"
        );
    }

    #[test]
    fn test_rejects_duplicates_and_empty() {
        let duplicate = EndpointRegistry::new(vec![
            NodeEndpoint::new(1, "a:1"),
            NodeEndpoint::new(1, "b:2"),
        ]);
        assert!(matches!(duplicate, Err(ObserverError::Config(_))));

        let empty = EndpointRegistry::new(Vec::new());
        assert!(matches!(empty, Err(ObserverError::Config(_))));
    }

    #[test]
    fn test_node_ids_sorted() {
        let registry = EndpointRegistry::new(vec![
            NodeEndpoint::new(3, "c:3"),
            NodeEndpoint::new(1, "a:1"),
            NodeEndpoint::new(2, "b:2"),
        ])
        .unwrap();
        assert_eq!(registry.node_ids(), vec![1, 2, 3]);
        assert!(registry.contains(2));
        assert!(!registry.contains(7));
    }
}
