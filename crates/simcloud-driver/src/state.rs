//! State guarded by the driver lock

use std::sync::Arc;
use std::time::SystemTime;

use tokio::sync::Mutex;

use crate::inventory::NodeInventory;
use crate::policy::PolicyConfig;

/// Everything admission decisions read, behind one lock
#[derive(Debug, Default)]
pub(crate) struct DriverState {
    /// Cached nodes
    pub inventory: NodeInventory,
    /// Live quota table
    pub policy: PolicyConfig,
    /// Modification time of the policy file when it was last loaded
    pub policy_loaded_at: Option<SystemTime>,
}

/// Handle shared between the driver and its background tasks
pub(crate) type SharedState = Arc<Mutex<DriverState>>;
