//! Common types for simcloud: errors, machine descriptors, quantities and utilities

#![deny(missing_docs)]

pub mod error;
pub mod kube_utils;
pub mod machine;
pub mod quantity;
pub mod telemetry;

pub use error::{Error, ErrorCode};
pub use machine::{Machine, MachineClass, MachineSpec, NodeTemplate, NodeTemplateSpec};

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

/// The only provider tag the simulator accepts on a MachineClass
pub const PROVIDER_AWS: &str = "AWS";

/// Scheme prefix of provider IDs handed out by the simulator
pub const PROVIDER_ID_SCHEME: &str = "aws";

/// Field manager recorded on objects the simulator writes
pub const FIELD_MANAGER: &str = "simcloud-provider";

// =============================================================================
// Well-known node labels, annotations and taints
// =============================================================================

/// Label carrying the node's region
pub const LABEL_TOPOLOGY_REGION: &str = "topology.kubernetes.io/region";

/// Label carrying the node's availability zone
pub const LABEL_TOPOLOGY_ZONE: &str = "topology.kubernetes.io/zone";

/// Stable instance-type label
pub const LABEL_INSTANCE_TYPE_STABLE: &str = "node.kubernetes.io/instance-type";

/// Deprecated instance-type label, still read by older autoscalers
pub const LABEL_INSTANCE_TYPE_BETA: &str = "beta.kubernetes.io/instance-type";

/// Node architecture label
pub const LABEL_ARCH: &str = "kubernetes.io/arch";

/// Node operating system label
pub const LABEL_OS: &str = "kubernetes.io/os";

/// Node hostname label
pub const LABEL_HOSTNAME: &str = "kubernetes.io/hostname";

/// Label linking a node back to the machine that created it
pub const LABEL_MACHINE_NAME: &str = "node.gardener.cloud/machine-name";

/// Label enabling node-local DNS on the node
pub const LABEL_NODE_LOCAL_DNS: &str = "networking.gardener.cloud/node-local-dns-enabled";

/// Annotation telling the attach/detach controller it owns volume attachment
pub const ANNOTATION_CONTROLLER_MANAGED_ATTACH: &str =
    "volumes.kubernetes.io/controller-managed-attach-detach";

/// Taint placed on nodes that have not reported ready yet
pub const TAINT_NOT_READY: &str = "node.kubernetes.io/not-ready";
