//! Driver settings

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::policy::{DEFAULT_POLICY_PATH, DEFAULT_POLL_INTERVAL, DEFAULT_QUOTA_AMOUNT};

/// What DeleteMachine does with the node object in the store
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum DeletePolicy {
    /// Drop the node from the inventory only; the store keeps it
    #[default]
    Forget,
    /// Also delete the node object from the store
    RemoveFromStore,
}

impl DeletePolicy {
    /// Flag value for this policy
    pub fn as_str(&self) -> &'static str {
        match self {
            DeletePolicy::Forget => "forget",
            DeletePolicy::RemoveFromStore => "remove-from-store",
        }
    }
}

impl fmt::Display for DeletePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DeletePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "forget" => Ok(DeletePolicy::Forget),
            "remove-from-store" | "remove" => Ok(DeletePolicy::RemoveFromStore),
            other => Err(format!(
                "unknown delete policy {:?}, expected \"forget\" or \"remove-from-store\"",
                other
            )),
        }
    }
}

/// Settings the driver is started with
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DriverSettings {
    /// Namespace the MachineClasses live in
    pub namespace: String,
    /// Location of the quota policy file
    pub policy_path: PathBuf,
    /// Interval between policy file checks
    pub poll_interval: Duration,
    /// Amount for quotas derived from MachineClasses
    pub default_quota: u32,
    /// DeleteMachine behaviour
    pub delete_policy: DeletePolicy,
}

impl DriverSettings {
    /// Settings with defaults for everything but the namespace
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            policy_path: PathBuf::from(DEFAULT_POLICY_PATH),
            poll_interval: DEFAULT_POLL_INTERVAL,
            default_quota: DEFAULT_QUOTA_AMOUNT,
            delete_policy: DeletePolicy::default(),
        }
    }
}
