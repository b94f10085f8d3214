//! Synthetic node construction
//!
//! Builds the Node object that stands in for a freshly booted instance. The
//! result is deterministic apart from the condition timestamps: capacity comes
//! from the MachineClass node template, a handful of kubelet-reported values
//! are fixed, and allocatable memory is capacity minus a kube-reserved
//! overhead.

use std::collections::BTreeMap;

use chrono::Utc;
use k8s_openapi::api::core::v1::{Node, NodeCondition, NodeSpec, NodeStatus};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, Time};
use rand::RngCore;

use simcloud_common::quantity;
use simcloud_common::{
    Error, Machine, MachineClass, ANNOTATION_CONTROLLER_MANAGED_ATTACH, LABEL_ARCH,
    LABEL_HOSTNAME, LABEL_INSTANCE_TYPE_BETA, LABEL_INSTANCE_TYPE_STABLE, LABEL_MACHINE_NAME,
    LABEL_NODE_LOCAL_DNS, LABEL_OS, LABEL_TOPOLOGY_REGION, LABEL_TOPOLOGY_ZONE,
    PROVIDER_ID_SCHEME, TAINT_NOT_READY,
};

/// Pod capacity reported by every simulated node
pub const POD_CAPACITY: &str = "110";

/// Ephemeral storage capacity reported by every simulated node
pub const EPHEMERAL_STORAGE_CAPACITY: &str = "50225972Ki";

/// Ephemeral storage left allocatable after system reservations
pub const EPHEMERAL_STORAGE_ALLOCATABLE: &str = "48859825524";

/// Memory withheld from allocatable (includes 1Gi kube-reserved)
pub const MEMORY_RESERVATION: &str = "1.65Gi";

/// Accelerator resource the template's `gpu` capacity is surfaced as
pub const GPU_RESOURCE: &str = "nvidia.com/gpu";

/// Architecture assumed when the template does not name one
pub const DEFAULT_ARCHITECTURE: &str = "amd64";

const TEMPLATE_GPU_KEY: &str = "gpu";
const INSTANCE_ID_PREFIX: &str = "i-";
const INSTANCE_ID_HEX_LEN: usize = 17;

/// Node phase written once the simulated instance is up
pub const NODE_PHASE_RUNNING: &str = "Running";

/// Build the node for `machine` from its class's node template
///
/// The node name is the machine name. Standard labels are stamped first and
/// the machine's own node-template labels last, so caller labels win on key
/// collisions. The provider ID is left empty for the caller to assign.
pub fn build_node(machine: &Machine, machine_class: &MachineClass) -> Result<Node, Error> {
    let node_name = machine.name();
    if node_name.is_empty() {
        return Err(Error::internal_with_context("build_node", "machine has no name"));
    }
    let template = machine_class.node_template.as_ref().ok_or_else(|| {
        Error::internal_with_context(
            "build_node",
            format!("machine class {:?} has no node template", machine_class.name()),
        )
    })?;

    let mut capacity = template.capacity.clone();
    capacity.insert("pods".to_string(), Quantity(POD_CAPACITY.to_string()));
    if let Some(gpu) = template.capacity.get(TEMPLATE_GPU_KEY) {
        capacity.insert(GPU_RESOURCE.to_string(), gpu.clone());
    }
    capacity.insert(
        "ephemeral-storage".to_string(),
        Quantity(EPHEMERAL_STORAGE_CAPACITY.to_string()),
    );
    capacity.insert("hugepages-1Gi".to_string(), Quantity("0".to_string()));
    capacity.insert("hugepages-2Mi".to_string(), Quantity("0".to_string()));

    let mut allocatable = capacity.clone();
    allocatable.insert(
        "ephemeral-storage".to_string(),
        Quantity(EPHEMERAL_STORAGE_ALLOCATABLE.to_string()),
    );
    let memory = capacity.get("memory").ok_or_else(|| {
        Error::internal_with_context(
            "build_node",
            format!(
                "machine class {:?} node template has no memory capacity",
                machine_class.name()
            ),
        )
    })?;
    allocatable.insert(
        "memory".to_string(),
        quantity::subtract(memory, MEMORY_RESERVATION)?,
    );

    let mut labels = BTreeMap::from([
        (
            LABEL_ARCH.to_string(),
            template
                .architecture
                .clone()
                .unwrap_or_else(|| DEFAULT_ARCHITECTURE.to_string()),
        ),
        (LABEL_HOSTNAME.to_string(), node_name.to_string()),
        (LABEL_OS.to_string(), "linux".to_string()),
        (
            LABEL_INSTANCE_TYPE_BETA.to_string(),
            template.instance_type.clone(),
        ),
        (
            LABEL_INSTANCE_TYPE_STABLE.to_string(),
            template.instance_type.clone(),
        ),
        (LABEL_MACHINE_NAME.to_string(), node_name.to_string()),
        (LABEL_NODE_LOCAL_DNS.to_string(), "true".to_string()),
        (LABEL_TOPOLOGY_REGION.to_string(), template.region.clone()),
    ]);
    if !template.zone.is_empty() {
        labels.insert(LABEL_TOPOLOGY_ZONE.to_string(), template.zone.clone());
    }
    if let Some(extra) = machine.node_labels() {
        labels.extend(extra.iter().map(|(k, v)| (k.clone(), v.clone())));
    }

    Ok(Node {
        metadata: ObjectMeta {
            name: Some(node_name.to_string()),
            labels: Some(labels),
            annotations: Some(BTreeMap::from([(
                ANNOTATION_CONTROLLER_MANAGED_ATTACH.to_string(),
                "true".to_string(),
            )])),
            ..Default::default()
        },
        spec: Some(NodeSpec::default()),
        status: Some(NodeStatus {
            capacity: Some(capacity),
            allocatable: Some(allocatable),
            conditions: Some(ready_conditions()),
            ..Default::default()
        }),
    })
}

/// Conditions of a healthy node, transitioned one minute ago
pub fn ready_conditions() -> Vec<NodeCondition> {
    let last_transition = Time(Utc::now() - chrono::Duration::minutes(1));
    [
        ("Ready", "True"),
        ("NetworkUnavailable", "False"),
        ("DiskPressure", "False"),
        ("MemoryPressure", "False"),
    ]
    .into_iter()
    .map(|(type_, status)| NodeCondition {
        type_: type_.to_string(),
        status: status.to_string(),
        last_transition_time: Some(last_transition.clone()),
        ..Default::default()
    })
    .collect()
}

/// Generate an EC2-style instance ID: `i-` followed by 17 hex characters
pub fn generate_instance_id() -> String {
    let mut bytes = [0u8; INSTANCE_ID_HEX_LEN / 2 + 1];
    rand::thread_rng().fill_bytes(&mut bytes);

    let hex: String = bytes.iter().map(|b| format!("{:02x}", b)).collect();
    format!("{}{}", INSTANCE_ID_PREFIX, &hex[..INSTANCE_ID_HEX_LEN])
}

/// Encode the provider ID for an instance: `aws:///<region>/<instanceID>`
pub fn encode_provider_id(region: &str, instance_id: &str) -> String {
    format!("{}:///{}/{}", PROVIDER_ID_SCHEME, region, instance_id)
}

/// Remove the not-ready taint; returns whether anything was removed
pub fn clear_not_ready_taint(node: &mut Node) -> bool {
    let Some(taints) = node.spec.as_mut().and_then(|s| s.taints.as_mut()) else {
        return false;
    };
    let before = taints.len();
    taints.retain(|t| t.key != TAINT_NOT_READY);
    taints.len() != before
}

/// Value of a label on a node, if present
pub fn node_label<'a>(node: &'a Node, key: &str) -> Option<&'a str> {
    node.metadata
        .labels
        .as_ref()
        .and_then(|l| l.get(key))
        .map(String::as_str)
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::Taint;
    use simcloud_common::quantity::parse_quantity;
    use simcloud_common::{MachineSpec, NodeTemplate, NodeTemplateSpec};

    fn sample_class(capacity: &[(&str, &str)]) -> MachineClass {
        MachineClass {
            metadata: ObjectMeta {
                name: Some("worker-a".to_string()),
                ..Default::default()
            },
            provider: "AWS".to_string(),
            provider_spec: None,
            node_template: Some(NodeTemplate {
                capacity: capacity
                    .iter()
                    .map(|(k, v)| (k.to_string(), Quantity(v.to_string())))
                    .collect(),
                instance_type: "m5.large".to_string(),
                region: "eu-west-1".to_string(),
                zone: "eu-west-1a".to_string(),
                architecture: Some("arm64".to_string()),
            }),
        }
    }

    fn sample_machine(name: &str, labels: &[(&str, &str)]) -> Machine {
        Machine {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                ..Default::default()
            },
            spec: MachineSpec {
                provider_id: None,
                node_template: Some(NodeTemplateSpec {
                    metadata: ObjectMeta {
                        labels: Some(
                            labels
                                .iter()
                                .map(|(k, v)| (k.to_string(), v.to_string()))
                                .collect(),
                        ),
                        ..Default::default()
                    },
                }),
            },
        }
    }

    #[test]
    fn node_mirrors_template_capacity_with_fixed_kubelet_values() {
        let class = sample_class(&[("cpu", "2"), ("memory", "8Gi")]);
        let node = build_node(&sample_machine("machine-a", &[]), &class).unwrap();

        assert_eq!(node.metadata.name.as_deref(), Some("machine-a"));
        let status = node.status.unwrap();
        let capacity = status.capacity.unwrap();
        assert_eq!(capacity["cpu"].0, "2");
        assert_eq!(capacity["memory"].0, "8Gi");
        assert_eq!(capacity["pods"].0, POD_CAPACITY);
        assert_eq!(capacity["ephemeral-storage"].0, EPHEMERAL_STORAGE_CAPACITY);
        assert_eq!(capacity["hugepages-1Gi"].0, "0");
        assert_eq!(capacity["hugepages-2Mi"].0, "0");
        assert!(!capacity.contains_key(GPU_RESOURCE));

        let allocatable = status.allocatable.unwrap();
        assert_eq!(allocatable["cpu"].0, "2");
        assert_eq!(
            allocatable["ephemeral-storage"].0,
            EPHEMERAL_STORAGE_ALLOCATABLE
        );
        assert_eq!(
            parse_quantity(&allocatable["memory"].0).unwrap(),
            parse_quantity("8Gi").unwrap() - parse_quantity(MEMORY_RESERVATION).unwrap()
        );
    }

    #[test]
    fn gpu_capacity_is_surfaced_as_accelerator() {
        let class = sample_class(&[("cpu", "8"), ("memory", "32Gi"), ("gpu", "1")]);
        let node = build_node(&sample_machine("gpu-a", &[]), &class).unwrap();

        let capacity = node.status.unwrap().capacity.unwrap();
        assert_eq!(capacity[GPU_RESOURCE].0, "1");
    }

    #[test]
    fn node_carries_topology_and_identity_labels() {
        let class = sample_class(&[("memory", "4Gi")]);
        let node = build_node(&sample_machine("machine-a", &[]), &class).unwrap();

        assert_eq!(node_label(&node, LABEL_TOPOLOGY_REGION), Some("eu-west-1"));
        assert_eq!(node_label(&node, LABEL_TOPOLOGY_ZONE), Some("eu-west-1a"));
        assert_eq!(node_label(&node, LABEL_INSTANCE_TYPE_STABLE), Some("m5.large"));
        assert_eq!(node_label(&node, LABEL_INSTANCE_TYPE_BETA), Some("m5.large"));
        assert_eq!(node_label(&node, LABEL_ARCH), Some("arm64"));
        assert_eq!(node_label(&node, LABEL_HOSTNAME), Some("machine-a"));
        assert_eq!(node_label(&node, LABEL_MACHINE_NAME), Some("machine-a"));
        assert_eq!(node_label(&node, LABEL_OS), Some("linux"));
        assert_eq!(
            node.metadata.annotations.unwrap()[ANNOTATION_CONTROLLER_MANAGED_ATTACH],
            "true"
        );
    }

    #[test]
    fn caller_labels_win_on_collision() {
        let class = sample_class(&[("memory", "4Gi")]);
        let machine = sample_machine("machine-a", &[("pool", "blue"), (LABEL_OS, "windows")]);
        let node = build_node(&machine, &class).unwrap();

        assert_eq!(node_label(&node, "pool"), Some("blue"));
        assert_eq!(node_label(&node, LABEL_OS), Some("windows"));
    }

    #[test]
    fn architecture_defaults_when_template_omits_it() {
        let mut class = sample_class(&[("memory", "4Gi")]);
        class.node_template.as_mut().unwrap().architecture = None;
        let node = build_node(&sample_machine("machine-a", &[]), &class).unwrap();
        assert_eq!(node_label(&node, LABEL_ARCH), Some(DEFAULT_ARCHITECTURE));
    }

    #[test]
    fn unparsable_or_missing_memory_is_internal() {
        let class = sample_class(&[("memory", "lots")]);
        let err = build_node(&sample_machine("m", &[]), &class).unwrap_err();
        assert_eq!(err.code(), simcloud_common::ErrorCode::Internal);

        let class = sample_class(&[("cpu", "2")]);
        let err = build_node(&sample_machine("m", &[]), &class).unwrap_err();
        assert!(err.to_string().contains("no memory capacity"));

        let class = sample_class(&[("memory", "1Gi")]);
        assert!(build_node(&sample_machine("m", &[]), &class).is_err());
    }

    #[test]
    fn ready_conditions_are_healthy_and_in_the_past() {
        let conditions = ready_conditions();
        let by_type: BTreeMap<_, _> = conditions
            .iter()
            .map(|c| (c.type_.as_str(), c.status.as_str()))
            .collect();

        assert_eq!(by_type["Ready"], "True");
        assert_eq!(by_type["NetworkUnavailable"], "False");
        assert_eq!(by_type["DiskPressure"], "False");
        assert_eq!(by_type["MemoryPressure"], "False");
        for c in &conditions {
            assert!(c.last_transition_time.as_ref().unwrap().0 < Utc::now());
        }
    }

    #[test]
    fn instance_ids_look_like_ec2() {
        let id = generate_instance_id();
        assert!(id.starts_with("i-"));
        assert_eq!(id.len(), 2 + INSTANCE_ID_HEX_LEN);
        assert!(id[2..].chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(id, generate_instance_id());
    }

    #[test]
    fn provider_id_encodes_region_and_instance() {
        assert_eq!(
            encode_provider_id("eu-west-1", "i-0123456789abcdef0"),
            "aws:///eu-west-1/i-0123456789abcdef0"
        );
    }

    #[test]
    fn clearing_not_ready_taint_keeps_others() {
        let mut node = Node {
            spec: Some(NodeSpec {
                taints: Some(vec![
                    Taint {
                        key: TAINT_NOT_READY.to_string(),
                        effect: "NoSchedule".to_string(),
                        ..Default::default()
                    },
                    Taint {
                        key: "dedicated".to_string(),
                        effect: "NoSchedule".to_string(),
                        ..Default::default()
                    },
                ]),
                ..Default::default()
            }),
            ..Default::default()
        };

        assert!(clear_not_ready_taint(&mut node));
        let taints = node.spec.as_ref().unwrap().taints.as_ref().unwrap();
        assert_eq!(taints.len(), 1);
        assert_eq!(taints[0].key, "dedicated");
        assert!(!clear_not_ready_taint(&mut node));
        assert!(!clear_not_ready_taint(&mut Node::default()));
    }
}
