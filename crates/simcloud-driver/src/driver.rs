//! Lifecycle driver
//!
//! [`VirtualDriver`] is the entry point for machine lifecycle calls. It owns
//! the node inventory and the live policy behind one lock and starts the
//! policy watcher and pod reconciler as background tasks.
//!
//! Creation holds the lock across admission and every store write, so two
//! creates in the same quota bucket are strictly ordered and the second one
//! counts the node the first one made.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use k8s_openapi::api::core::v1::{NodeSpec, NodeStatus};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use simcloud_common::{Error, Machine, MachineClass, PROVIDER_AWS};

use crate::admission;
use crate::client::ClusterStateClient;
use crate::inventory::NodeInventory;
use crate::node::{
    build_node, clear_not_ready_taint, encode_provider_id, generate_instance_id,
    NODE_PHASE_RUNNING,
};
use crate::policy::{PolicyStore, PolicyWatcher};
use crate::reconciler::{run_reconciler, ReconcileTrigger};
use crate::settings::{DeletePolicy, DriverSettings};
use crate::state::{DriverState, SharedState};

/// Request to create a machine
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CreateMachineRequest {
    /// Machine to create
    pub machine: Machine,
    /// Class describing the machine's shape
    pub machine_class: MachineClass,
}

/// Result of a successful create
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CreateMachineResponse {
    /// `aws:///<region>/<instanceID>`
    #[serde(rename = "providerID")]
    pub provider_id: String,
    /// Name of the node backing the machine
    pub node_name: String,
    /// Human-readable state description
    pub last_known_state: String,
}

/// Request to delete a machine
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DeleteMachineRequest {
    /// Machine to delete
    pub machine: Machine,
    /// Class of the machine
    #[serde(default)]
    pub machine_class: MachineClass,
}

/// Result of a delete
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DeleteMachineResponse {
    /// Human-readable state description
    pub last_known_state: String,
}

/// Request for a machine's status
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GetMachineStatusRequest {
    /// Machine to look up
    pub machine: Machine,
    /// Class of the machine
    #[serde(default)]
    pub machine_class: MachineClass,
}

/// Status of a known machine
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct GetMachineStatusResponse {
    /// Provider ID stored on the node
    #[serde(rename = "providerID")]
    pub provider_id: String,
    /// Name of the node backing the machine
    pub node_name: String,
}

/// Request to list machines
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ListMachinesRequest {
    /// Class whose machines are listed
    #[serde(default)]
    pub machine_class: MachineClass,
}

/// Known machines
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ListMachinesResponse {
    /// Provider ID to node name
    pub machine_list: BTreeMap<String, String>,
}

/// Request for the volume IDs behind persistent volume specs
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GetVolumeIdsRequest {
    /// Persistent volume specs
    #[serde(default)]
    pub pv_specs: Vec<serde_json::Value>,
}

/// Volume IDs; always empty in the simulator
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct GetVolumeIdsResponse {
    /// Volume IDs
    #[serde(rename = "volumeIDs")]
    pub volume_ids: Vec<String>,
}

/// Request to run post-create initialization on a machine
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct InitializeMachineRequest {
    /// Machine to initialize
    pub machine: Machine,
    /// Class of the machine
    #[serde(default)]
    pub machine_class: MachineClass,
}

/// Result of initialization
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct InitializeMachineResponse {
    /// Provider ID of the initialized machine
    #[serde(rename = "providerID")]
    pub provider_id: String,
    /// Name of the node backing the machine
    pub node_name: String,
}

/// Machine lifecycle operations offered to a controller-manager host
#[async_trait]
pub trait Driver: Send + Sync {
    /// Admit, build and store a node for the machine
    async fn create_machine(&self, req: CreateMachineRequest) -> Result<CreateMachineResponse, Error>;

    /// Remove the machine from the driver's view
    async fn delete_machine(&self, req: DeleteMachineRequest) -> Result<DeleteMachineResponse, Error>;

    /// Look up a machine, `NotFound` if unknown
    async fn get_machine_status(
        &self,
        req: GetMachineStatusRequest,
    ) -> Result<GetMachineStatusResponse, Error>;

    /// List every known machine
    async fn list_machines(&self, req: ListMachinesRequest) -> Result<ListMachinesResponse, Error>;

    /// Resolve volume IDs
    async fn get_volume_ids(&self, req: GetVolumeIdsRequest) -> Result<GetVolumeIdsResponse, Error>;

    /// Post-create initialization
    async fn initialize_machine(
        &self,
        req: InitializeMachineRequest,
    ) -> Result<InitializeMachineResponse, Error>;
}

/// Driver that fabricates nodes in the cluster state store
pub struct VirtualDriver {
    client: Arc<dyn ClusterStateClient>,
    state: SharedState,
    reconcile: ReconcileTrigger,
    delete_policy: DeletePolicy,
}

impl VirtualDriver {
    /// Load the inventory and policy, then start the background tasks
    ///
    /// The policy watcher and reconciler run until `cancel` fires.
    pub async fn start(
        client: Arc<dyn ClusterStateClient>,
        settings: DriverSettings,
        cancel: CancellationToken,
    ) -> Result<Self, Error> {
        let mut inventory = NodeInventory::new();
        inventory.refresh(client.as_ref()).await?;

        let store = PolicyStore::new(&settings.policy_path);
        let (policy, loaded_at) = store
            .initialize(client.as_ref(), &settings.namespace, settings.default_quota)
            .await?;

        info!(
            nodes = inventory.len(),
            quotas = policy.quotas.len(),
            policy_path = %settings.policy_path.display(),
            delete_policy = %settings.delete_policy,
            "Driver state loaded"
        );

        let state: SharedState = Arc::new(Mutex::new(DriverState {
            inventory,
            policy,
            policy_loaded_at: Some(loaded_at),
        }));

        let watcher = PolicyWatcher::new(store, state.clone(), settings.poll_interval);
        tokio::spawn(watcher.run(cancel.clone()));

        let (reconcile, rx) = ReconcileTrigger::channel();
        tokio::spawn(run_reconciler(rx, client.clone(), cancel));

        Ok(Self {
            client,
            state,
            reconcile,
            delete_policy: settings.delete_policy,
        })
    }

    /// Store writes for a freshly admitted machine; the caller holds the lock
    async fn provision(
        &self,
        machine: &Machine,
        machine_class: &MachineClass,
        state: &mut DriverState,
    ) -> Result<CreateMachineResponse, Error> {
        let name = machine.name();
        let region = machine_class.region();

        let mut node = build_node(machine, machine_class)?;
        let instance_id = generate_instance_id();
        let provider_id = encode_provider_id(region, &instance_id);
        node.spec.get_or_insert_with(NodeSpec::default).provider_id = Some(provider_id.clone());

        self.client
            .create_node(&node)
            .await
            .map_err(|e| store_error(format!("failed to create node {:?}", name), e))?;
        info!(machine = %name, provider_id = %provider_id, "Node created");

        // Simulate the instance finishing boot: drop the not-ready taint,
        // then report the node as Running.
        let mut node = self
            .client
            .get_node(name)
            .await
            .map_err(|e| store_error(format!("failed to get node {:?}", name), e))?
            .ok_or_else(|| {
                Error::internal_with_context(
                    "create_machine",
                    format!("node {:?} disappeared after create", name),
                )
            })?;
        if clear_not_ready_taint(&mut node) {
            debug!(machine = %name, "Cleared not-ready taint");
        }
        let mut node = self
            .client
            .update_node(&node)
            .await
            .map_err(|e| store_error(format!("failed to update node {:?}", name), e))?;

        node.status.get_or_insert_with(NodeStatus::default).phase =
            Some(NODE_PHASE_RUNNING.to_string());
        self.client
            .update_node_status(&node)
            .await
            .map_err(|e| store_error(format!("failed to update status of node {:?}", name), e))?;

        state
            .inventory
            .refresh(self.client.as_ref())
            .await
            .map_err(|e| store_error("failed to refresh node inventory".to_string(), e))?;

        Ok(CreateMachineResponse {
            provider_id,
            node_name: name.to_string(),
            last_known_state: format!(
                "Instance {:?} created at {:?}",
                name,
                Utc::now().to_rfc3339()
            ),
        })
    }
}

fn store_error(message: String, source: Error) -> Error {
    Error::internal_with_context("create_machine", format!("{}: {}", message, source))
}

#[async_trait]
impl Driver for VirtualDriver {
    async fn create_machine(&self, req: CreateMachineRequest) -> Result<CreateMachineResponse, Error> {
        let CreateMachineRequest {
            machine,
            machine_class,
        } = req;

        if machine_class.provider != PROVIDER_AWS {
            return Err(Error::invalid_argument(format!(
                "requested for provider {:?}, only {:?} is supported",
                machine_class.provider, PROVIDER_AWS
            )));
        }

        let region = machine_class.region();
        let machine_type = machine_class.instance_type();
        info!(
            machine = %machine.name(),
            machine_class = %machine_class.name(),
            region = %region,
            machine_type = %machine_type,
            "Create machine requested"
        );

        let response = {
            let mut state = self.state.lock().await;
            admission::admit(&state.policy, &state.inventory, region, machine_type)?;
            self.provision(&machine, &machine_class, &mut state).await?
        };

        self.reconcile.trigger();
        Ok(response)
    }

    async fn delete_machine(&self, req: DeleteMachineRequest) -> Result<DeleteMachineResponse, Error> {
        let name = req.machine.name();
        let mut state = self.state.lock().await;

        if self.delete_policy == DeletePolicy::RemoveFromStore {
            self.client.delete_node(name).await.map_err(|e| {
                Error::internal_with_context(
                    "delete_machine",
                    format!("failed to delete node {:?}: {}", name, e),
                )
            })?;
        }

        match state.inventory.forget(name) {
            Some(_) => info!(machine = %name, delete_policy = %self.delete_policy, "Machine deleted"),
            None => debug!(machine = %name, "Machine not in inventory, nothing to delete"),
        }

        Ok(DeleteMachineResponse {
            last_known_state: format!("Instance {:?} deleted", name),
        })
    }

    async fn get_machine_status(
        &self,
        req: GetMachineStatusRequest,
    ) -> Result<GetMachineStatusResponse, Error> {
        let name = req.machine.name();
        let found = {
            let state = self.state.lock().await;
            state.inventory.get(name).map(|node| GetMachineStatusResponse {
                provider_id: node
                    .spec
                    .as_ref()
                    .and_then(|s| s.provider_id.clone())
                    .unwrap_or_default(),
                node_name: name.to_string(),
            })
        };

        let found = found.ok_or_else(|| Error::not_found(name))?;
        self.reconcile.trigger();
        Ok(found)
    }

    async fn list_machines(&self, _req: ListMachinesRequest) -> Result<ListMachinesResponse, Error> {
        let machine_list = self.state.lock().await.inventory.provider_ids();
        self.reconcile.trigger();
        Ok(ListMachinesResponse { machine_list })
    }

    async fn get_volume_ids(&self, req: GetVolumeIdsRequest) -> Result<GetVolumeIdsResponse, Error> {
        debug!(pv_specs = req.pv_specs.len(), "Volume IDs requested");
        Ok(GetVolumeIdsResponse::default())
    }

    async fn initialize_machine(
        &self,
        req: InitializeMachineRequest,
    ) -> Result<InitializeMachineResponse, Error> {
        warn!(machine = %req.machine.name(), "InitializeMachine is not supported");
        Err(Error::unimplemented("InitializeMachine"))
    }
}
