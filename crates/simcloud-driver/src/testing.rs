//! In-memory cluster state for tests

use std::collections::BTreeMap;
use std::sync::Mutex;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Node, NodeSpec, Pod, Taint};

use simcloud_common::{Error, MachineClass, TAINT_NOT_READY};

use crate::client::ClusterStateClient;

/// Stateful store that behaves like a tiny API server
///
/// Newly created nodes get the not-ready taint, the way the node lifecycle
/// controller marks a node that has not reported in yet.
#[derive(Default)]
pub(crate) struct FakeClusterState {
    nodes: Mutex<BTreeMap<String, Node>>,
    pods: Mutex<Vec<Pod>>,
    classes: Vec<MachineClass>,
}

impl FakeClusterState {
    pub fn with_classes(classes: Vec<MachineClass>) -> Self {
        Self {
            classes,
            ..Default::default()
        }
    }

    pub fn add_pod(&self, pod: Pod) {
        self.pods.lock().unwrap().push(pod);
    }

    pub fn node(&self, name: &str) -> Option<Node> {
        self.nodes.lock().unwrap().get(name).cloned()
    }

    pub fn pods(&self) -> Vec<Pod> {
        self.pods.lock().unwrap().clone()
    }
}

fn name_of(node: &Node) -> Result<String, Error> {
    node.metadata
        .name
        .clone()
        .ok_or_else(|| Error::internal("node has no name"))
}

#[async_trait]
impl ClusterStateClient for FakeClusterState {
    async fn list_nodes(&self) -> Result<Vec<Node>, Error> {
        Ok(self.nodes.lock().unwrap().values().cloned().collect())
    }

    async fn create_node(&self, node: &Node) -> Result<Node, Error> {
        let name = name_of(node)?;
        let mut nodes = self.nodes.lock().unwrap();
        if nodes.contains_key(&name) {
            return Err(Error::internal(format!("nodes {:?} already exists", name)));
        }

        let mut stored = node.clone();
        stored
            .spec
            .get_or_insert_with(NodeSpec::default)
            .taints
            .get_or_insert_with(Vec::new)
            .push(Taint {
                key: TAINT_NOT_READY.to_string(),
                effect: "NoSchedule".to_string(),
                ..Default::default()
            });
        nodes.insert(name, stored.clone());
        Ok(stored)
    }

    async fn get_node(&self, name: &str) -> Result<Option<Node>, Error> {
        Ok(self.node(name))
    }

    async fn update_node(&self, node: &Node) -> Result<Node, Error> {
        let name = name_of(node)?;
        let mut nodes = self.nodes.lock().unwrap();
        let stored = nodes
            .get_mut(&name)
            .ok_or_else(|| Error::internal(format!("nodes {:?} not found", name)))?;
        stored.metadata = node.metadata.clone();
        stored.spec = node.spec.clone();
        Ok(stored.clone())
    }

    async fn update_node_status(&self, node: &Node) -> Result<Node, Error> {
        let name = name_of(node)?;
        let mut nodes = self.nodes.lock().unwrap();
        let stored = nodes
            .get_mut(&name)
            .ok_or_else(|| Error::internal(format!("nodes {:?} not found", name)))?;
        stored.status = node.status.clone();
        Ok(stored.clone())
    }

    async fn delete_node(&self, name: &str) -> Result<(), Error> {
        self.nodes.lock().unwrap().remove(name);
        Ok(())
    }

    async fn list_pods(&self) -> Result<Vec<Pod>, Error> {
        Ok(self.pods())
    }

    async fn update_pod_status(&self, pod: &Pod) -> Result<Pod, Error> {
        let mut pods = self.pods.lock().unwrap();
        let stored = pods
            .iter_mut()
            .find(|p| p.metadata.name == pod.metadata.name && p.metadata.namespace == pod.metadata.namespace)
            .ok_or_else(|| Error::internal("pod not found"))?;
        stored.status = pod.status.clone();
        Ok(stored.clone())
    }

    async fn list_machine_classes(&self, _namespace: &str) -> Result<Vec<MachineClass>, Error> {
        Ok(self.classes.clone())
    }
}
