//! In-memory node inventory
//!
//! A cache of the nodes in the cluster state store, keyed by name. It is only
//! ever replaced wholesale by [`NodeInventory::refresh`]; removal through
//! [`NodeInventory::forget`] is the single local mutation.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::Node;
use tracing::debug;

use simcloud_common::{Error, LABEL_INSTANCE_TYPE_STABLE, LABEL_TOPOLOGY_REGION};

use crate::client::ClusterStateClient;
use crate::node::node_label;

/// Snapshot of the store's nodes as of the last refresh
#[derive(Clone, Debug, Default, PartialEq)]
pub struct NodeInventory {
    nodes: BTreeMap<String, Node>,
}

impl NodeInventory {
    /// Create an empty inventory
    pub fn new() -> Self {
        Self::default()
    }

    /// Build an inventory from a node list; later duplicates replace earlier ones
    pub fn from_nodes(nodes: impl IntoIterator<Item = Node>) -> Self {
        let nodes = nodes
            .into_iter()
            .filter_map(|n| n.metadata.name.clone().map(|name| (name, n)))
            .collect();
        Self { nodes }
    }

    /// Replace the cache with a full listing from the store
    ///
    /// On error the previous snapshot is kept untouched.
    pub async fn refresh(&mut self, client: &dyn ClusterStateClient) -> Result<(), Error> {
        let nodes = client.list_nodes().await?;
        *self = Self::from_nodes(nodes);
        debug!(nodes = self.nodes.len(), "Node inventory refreshed");
        Ok(())
    }

    /// Number of cached nodes labelled with the given region and instance type
    pub fn count_by_region_and_type(&self, region: &str, machine_type: &str) -> usize {
        self.nodes
            .values()
            .filter(|n| {
                node_label(n, LABEL_TOPOLOGY_REGION) == Some(region)
                    && node_label(n, LABEL_INSTANCE_TYPE_STABLE) == Some(machine_type)
            })
            .count()
    }

    /// Look up a node by name
    pub fn get(&self, name: &str) -> Option<&Node> {
        self.nodes.get(name)
    }

    /// Drop a node from the cache, returning it if it was present
    pub fn forget(&mut self, name: &str) -> Option<Node> {
        self.nodes.remove(name)
    }

    /// Map of provider ID to node name for nodes that have a provider ID
    pub fn provider_ids(&self) -> BTreeMap<String, String> {
        self.nodes
            .iter()
            .filter_map(|(name, node)| {
                node.spec
                    .as_ref()
                    .and_then(|s| s.provider_id.clone())
                    .filter(|id| !id.is_empty())
                    .map(|id| (id, name.clone()))
            })
            .collect()
    }

    /// Number of cached nodes
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Whether the cache is empty
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}
