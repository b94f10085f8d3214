//! Cluster state client
//!
//! The narrow CRUD contract the driver needs from the backing cluster-state
//! store. A trait keeps the driver testable without an API server; production
//! uses [`KubeClusterState`] over a kube `Client`.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Node, Pod};
use kube::api::{Api, DeleteParams, DynamicObject, ListParams, Patch, PatchParams, PostParams};
use kube::Client;
use tracing::debug;

#[cfg(test)]
use mockall::automock;

use simcloud_common::kube_utils::build_api_resource;
use simcloud_common::machine::{MACHINE_API_VERSION, MACHINE_CLASS_KIND};
use simcloud_common::{Error, MachineClass, FIELD_MANAGER};

/// Trait abstracting the cluster state store
///
/// This trait allows mocking the store in tests while using the real
/// Kubernetes client in production.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ClusterStateClient: Send + Sync {
    /// List every node in the cluster
    async fn list_nodes(&self) -> Result<Vec<Node>, Error>;

    /// Create a node, returning the stored object
    async fn create_node(&self, node: &Node) -> Result<Node, Error>;

    /// Get a node by name, `None` if it does not exist
    async fn get_node(&self, name: &str) -> Result<Option<Node>, Error>;

    /// Replace a node's metadata and spec
    async fn update_node(&self, node: &Node) -> Result<Node, Error>;

    /// Write a node's status subresource
    async fn update_node_status(&self, node: &Node) -> Result<Node, Error>;

    /// Delete a node by name; a node that is already gone is not an error
    async fn delete_node(&self, name: &str) -> Result<(), Error>;

    /// List pods across all namespaces
    async fn list_pods(&self) -> Result<Vec<Pod>, Error>;

    /// Write a pod's status subresource
    async fn update_pod_status(&self, pod: &Pod) -> Result<Pod, Error>;

    /// List the machine classes in a namespace
    async fn list_machine_classes(&self, namespace: &str) -> Result<Vec<MachineClass>, Error>;
}

/// Real cluster state client backed by the Kubernetes API
pub struct KubeClusterState {
    client: Client,
}

impl KubeClusterState {
    /// Create a new KubeClusterState wrapping the given kube Client
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn nodes(&self) -> Api<Node> {
        Api::all(self.client.clone())
    }
}

#[async_trait]
impl ClusterStateClient for KubeClusterState {
    async fn list_nodes(&self) -> Result<Vec<Node>, Error> {
        let nodes = self.nodes().list(&ListParams::default()).await?;
        Ok(nodes.items)
    }

    async fn create_node(&self, node: &Node) -> Result<Node, Error> {
        let pp = PostParams {
            field_manager: Some(FIELD_MANAGER.to_string()),
            ..Default::default()
        };
        Ok(self.nodes().create(&pp, node).await?)
    }

    async fn get_node(&self, name: &str) -> Result<Option<Node>, Error> {
        Ok(self.nodes().get_opt(name).await?)
    }

    async fn update_node(&self, node: &Node) -> Result<Node, Error> {
        let name = node_name(node)?;
        Ok(self
            .nodes()
            .replace(name, &PostParams::default(), node)
            .await?)
    }

    async fn update_node_status(&self, node: &Node) -> Result<Node, Error> {
        let name = node_name(node)?;
        let patch = serde_json::json!({ "status": node.status });
        Ok(self
            .nodes()
            .patch_status(name, &PatchParams::default(), &Patch::Merge(&patch))
            .await?)
    }

    async fn delete_node(&self, name: &str) -> Result<(), Error> {
        match self.nodes().delete(name, &DeleteParams::default()).await {
            Ok(_) => Ok(()),
            Err(e) => {
                let err = Error::from(e);
                if err.is_kube_not_found() {
                    debug!(node = %name, "node already deleted");
                    Ok(())
                } else {
                    Err(err)
                }
            }
        }
    }

    async fn list_pods(&self) -> Result<Vec<Pod>, Error> {
        let api: Api<Pod> = Api::all(self.client.clone());
        let pods = api.list(&ListParams::default()).await?;
        Ok(pods.items)
    }

    async fn update_pod_status(&self, pod: &Pod) -> Result<Pod, Error> {
        let name = pod
            .metadata
            .name
            .as_deref()
            .ok_or_else(|| Error::internal_with_context("update_pod_status", "pod has no name"))?;
        let namespace = pod.metadata.namespace.as_deref().unwrap_or("default");

        let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let patch = serde_json::json!({ "status": pod.status });
        Ok(api
            .patch_status(name, &PatchParams::default(), &Patch::Merge(&patch))
            .await?)
    }

    async fn list_machine_classes(&self, namespace: &str) -> Result<Vec<MachineClass>, Error> {
        let ar = build_api_resource(MACHINE_API_VERSION, MACHINE_CLASS_KIND);
        let api: Api<DynamicObject> = Api::namespaced_with(self.client.clone(), namespace, &ar);
        let list = api.list(&ListParams::default()).await?;

        list.items
            .into_iter()
            .map(|obj| {
                let value = serde_json::to_value(&obj).map_err(|e| {
                    Error::internal_with_context("list_machine_classes", e.to_string())
                })?;
                serde_json::from_value(value).map_err(|e| {
                    Error::internal_with_context(
                        "list_machine_classes",
                        format!("failed to decode MachineClass: {}", e),
                    )
                })
            })
            .collect()
    }
}

fn node_name(node: &Node) -> Result<&str, Error> {
    node.metadata
        .name
        .as_deref()
        .ok_or_else(|| Error::internal_with_context("update_node", "node has no name"))
}
