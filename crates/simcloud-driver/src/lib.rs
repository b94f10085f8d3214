//! Simulated machine-lifecycle driver
//!
//! Instead of provisioning VMs this driver fabricates Node objects in the
//! cluster state store, guarded by a hot-reloadable quota policy:
//!
//! - [`client`]: the CRUD contract against the store and its kube-backed impl
//! - [`inventory`]: cached view of the store's nodes
//! - [`node`]: synthetic node construction
//! - [`admission`]: quota checks
//! - [`policy`]: policy file storage and the reload watcher
//! - [`reconciler`]: promotes bound Pending pods to Running
//! - [`driver`]: the lifecycle operations tying it together

#![deny(missing_docs)]

pub mod admission;
pub mod client;
pub mod driver;
pub mod inventory;
pub mod node;
pub mod policy;
pub mod reconciler;
pub mod settings;
mod state;

#[cfg(test)]
mod testing;

pub use client::{ClusterStateClient, KubeClusterState};
pub use driver::{
    CreateMachineRequest, CreateMachineResponse, DeleteMachineRequest, DeleteMachineResponse,
    Driver, GetMachineStatusRequest, GetMachineStatusResponse, GetVolumeIdsRequest,
    GetVolumeIdsResponse, InitializeMachineRequest, InitializeMachineResponse,
    ListMachinesRequest, ListMachinesResponse, VirtualDriver,
};
pub use inventory::NodeInventory;
pub use policy::{PolicyConfig, PolicyStore, Quota};
pub use settings::{DeletePolicy, DriverSettings};
