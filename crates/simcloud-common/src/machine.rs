//! Machine and MachineClass descriptors
//!
//! These follow the `machine.sapcloud.io/v1alpha1` shapes used by the
//! machine-controller-manager. Unlike most kube resources a MachineClass keeps
//! its fields at the top level instead of under `spec`, so both types are
//! plain serde structs decoded from dynamic objects rather than derived CRDs.
//!
//! Example MachineClass:
//! ```yaml
//! apiVersion: machine.sapcloud.io/v1alpha1
//! kind: MachineClass
//! metadata:
//!   name: shoot-worker-a
//! provider: AWS
//! nodeTemplate:
//!   instanceType: m5.large
//!   region: eu-west-1
//!   zone: eu-west-1a
//!   architecture: amd64
//!   capacity:
//!     cpu: "2"
//!     memory: 8Gi
//! ```

use std::collections::BTreeMap;

use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use serde::{Deserialize, Serialize};

/// API version of machine resources
pub const MACHINE_API_VERSION: &str = "machine.sapcloud.io/v1alpha1";

/// Kind name of machine classes
pub const MACHINE_CLASS_KIND: &str = "MachineClass";

/// A request for one simulated instance
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Machine {
    /// Standard object metadata; the name becomes the node name
    #[serde(default)]
    pub metadata: ObjectMeta,

    /// Desired machine state
    #[serde(default)]
    pub spec: MachineSpec,
}

/// Desired state of a [`Machine`]
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MachineSpec {
    /// Provider ID once the machine has been created
    #[serde(default, rename = "providerID", skip_serializing_if = "Option::is_none")]
    pub provider_id: Option<String>,

    /// Template whose metadata is copied onto the node
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_template: Option<NodeTemplateSpec>,
}

/// Node metadata requested by the machine
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
pub struct NodeTemplateSpec {
    /// Labels and annotations for the node
    #[serde(default)]
    pub metadata: ObjectMeta,
}

/// Class of machines sharing provider, region, type and capacity
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MachineClass {
    /// Standard object metadata
    #[serde(default)]
    pub metadata: ObjectMeta,

    /// Provider tag, e.g. `AWS`
    #[serde(default)]
    pub provider: String,

    /// Opaque provider-specific configuration
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider_spec: Option<serde_json::Value>,

    /// Shape of nodes created from this class
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_template: Option<NodeTemplate>,
}

/// Capacity and placement of nodes created from a [`MachineClass`]
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NodeTemplate {
    /// Resource capacity (cpu, memory, gpu, ...)
    #[serde(default)]
    pub capacity: BTreeMap<String, Quantity>,

    /// Instance type, e.g. `m5.large`
    #[serde(default)]
    pub instance_type: String,

    /// Region, e.g. `eu-west-1`
    #[serde(default)]
    pub region: String,

    /// Availability zone, e.g. `eu-west-1a`
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub zone: String,

    /// CPU architecture, e.g. `amd64`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub architecture: Option<String>,
}

impl Machine {
    /// Machine name, empty if unset
    pub fn name(&self) -> &str {
        self.metadata.name.as_deref().unwrap_or_default()
    }

    /// Labels the caller wants copied onto the node
    pub fn node_labels(&self) -> Option<&BTreeMap<String, String>> {
        self.spec
            .node_template
            .as_ref()
            .and_then(|t| t.metadata.labels.as_ref())
    }
}

impl MachineClass {
    /// Class name, empty if unset
    pub fn name(&self) -> &str {
        self.metadata.name.as_deref().unwrap_or_default()
    }

    /// Region of the node template, empty if there is no template
    pub fn region(&self) -> &str {
        self.node_template
            .as_ref()
            .map(|t| t.region.as_str())
            .unwrap_or_default()
    }

    /// Instance type of the node template, empty if there is no template
    pub fn instance_type(&self) -> &str {
        self.node_template
            .as_ref()
            .map(|t| t.instance_type.as_str())
            .unwrap_or_default()
    }
}
