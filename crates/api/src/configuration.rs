//! Configuration CRD
//!
//! The singleton object describing the desired state of the network fabric.
//! The controllers read `spec.masterNodesLabel` and `spec.version`; the
//! remaining spec fields are opaque inputs to the render collaborator.

use chrono::{DateTime, Utc};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Name of the singleton Configuration object.
pub const DEFAULT_CONFIGURATION_NAME: &str = "fabric";
/// Finalizer placed on the Configuration while managed objects exist.
pub const CONFIGURATION_FINALIZER: &str = "fabric.io/configuration";
/// Finalizer placed on Nodes so database membership can be cleaned up on removal.
pub const NODE_FINALIZER: &str = "fabric.io/node";
/// Placeholder namespace anchoring garbage collection of cluster-scoped objects.
pub const OWNER_NAMESPACE: &str = "fabric-owner-namespace";
/// Field manager used for server-side apply.
pub const FIELD_MANAGER: &str = "fabric-operator";

/// Label selecting the current northbound database leader pod.
pub const NB_LEADER_LABEL: &str = "fabric-nb-leader=true";
/// Label selecting the current southbound database leader pod.
pub const SB_LEADER_LABEL: &str = "fabric-sb-leader=true";
/// Container running the database cluster inside a leader pod.
pub const CENTRAL_CONTAINER_NAME: &str = "fabric-central";

/// Condition set while no nodes match `spec.masterNodesLabel`.
pub const WAITING_FOR_MATCHING_NODES_CONDITION: &str = "waitingForMatchingNodes";
/// Condition recording whether a northbound leader pod was located.
pub const NB_LEADER_FOUND_CONDITION: &str = "nbLeaderFound";
/// Condition recording whether a southbound leader pod was located.
pub const SB_LEADER_FOUND_CONDITION: &str = "sbLeaderFound";
/// Condition carrying the latest northbound database probe result.
pub const NB_DB_HEALTH_CONDITION: &str = "nbDBHealth";
/// Condition carrying the latest southbound database probe result.
pub const SB_DB_HEALTH_CONDITION: &str = "sbDBHealth";

/// Condition reason: matching nodes were discovered.
pub const REASON_NODES_FOUND: &str = "NodesFound";
/// Condition reason: no nodes matched the master label.
pub const REASON_NODES_NOT_FOUND: &str = "NodesNotFound";
/// Condition reason: condition has not been evaluated yet.
pub const REASON_UNKNOWN: &str = "ConditionUnknown";
/// Condition reason: a leader pod was found.
pub const REASON_LEADER_FOUND: &str = "LeaderFound";
/// Condition reason: no leader pod matched the leader label.
pub const REASON_LEADER_NOT_FOUND: &str = "LeaderNotFound";
/// Condition reason: database probe executed, see message for output.
pub const REASON_DB_HEALTH: &str = "DBHealth";

/// Desired state of the network fabric.
#[derive(CustomResource, Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "fabric.io",
    version = "v1",
    kind = "Configuration",
    namespaced,
    status = "ConfigurationStatus",
    shortname = "fabcfg"
)]
#[serde(rename_all = "camelCase")]
pub struct ConfigurationSpec {
    /// Label selector identifying nodes eligible to run database masters
    #[serde(default = "default_master_nodes_label")]
    pub master_nodes_label: String,

    /// Fabric component version / image tag; a change triggers re-rendering
    #[serde(default)]
    pub version: String,

    /// Image registry settings, opaque to the controllers
    #[serde(default)]
    pub registry: RegistrySpec,

    /// Networking parameters, opaque to the controllers
    #[serde(default)]
    pub networking: NetworkingSpec,
}

fn default_master_nodes_label() -> String {
    "fabric.io/role=master".to_string()
}

/// Image registry settings consumed by the render collaborator.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RegistrySpec {
    /// Registry address prefix for fabric images
    #[serde(default)]
    pub address: String,

    /// Pull secrets referenced by rendered workloads
    #[serde(default)]
    pub image_pull_secrets: Vec<String>,
}

/// Networking parameters consumed by the render collaborator.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct NetworkingSpec {
    /// Tunnel encapsulation used between nodes (e.g. "geneve", "vxlan")
    #[serde(default)]
    pub tunnel_type: String,

    /// Pod network CIDR
    #[serde(default)]
    pub pod_cidr: String,

    /// Service network CIDR
    #[serde(default)]
    pub service_cidr: String,
}

/// Observed state of the Configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ConfigurationStatus {
    /// Internal addresses of nodes currently matching `spec.masterNodesLabel`.
    /// Content is compared order-insensitively. Serialized even when empty so
    /// a merge patch can clear the server-side list.
    #[serde(default)]
    pub matching_node_addresses: Vec<String>,

    /// Conditions, at most one per type
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,

    /// Deployment phase of the managed object set
    #[serde(default)]
    pub status: ConfigurationState,

    /// Audit list of objects applied on behalf of this Configuration.
    /// Serialized even when empty so a merge patch can clear it.
    #[serde(default)]
    pub managed_objects: Vec<crate::reference::ObjectReference>,
}

/// Deployment phase of the managed object set.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub enum ConfigurationState {
    /// No apply has completed yet
    #[default]
    #[serde(rename = "")]
    Pending,
    /// An apply is in flight; re-entrancy guard, best effort only
    Deploying,
    /// All managed object kinds applied successfully
    Deployed,
}

/// Truth value of a condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub enum ConditionStatus {
    /// The condition holds
    True,
    /// The condition does not hold
    False,
    /// The condition has not been evaluated
    Unknown,
}

/// A single entry of the status condition set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    /// Condition type; unique within the set
    #[serde(rename = "type")]
    pub type_: String,
    /// Truth value
    pub status: ConditionStatus,
    /// Machine-readable reason for the latest update
    pub reason: String,
    /// Human-readable detail, may carry probe output
    pub message: String,
    /// Time of the latest update to this condition
    pub last_transition_time: DateTime<Utc>,
    /// Generation of the object observed when the condition was set
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
}

impl Configuration {
    /// Updates the condition of the given type in place, or appends it if
    /// absent. The set never holds more than one condition per type.
    pub fn set_condition(
        &mut self,
        condition_type: &str,
        status: ConditionStatus,
        message: impl Into<String>,
        reason: &str,
    ) {
        let generation = self.metadata.generation;
        let conditions = &mut self.status.get_or_insert_with(Default::default).conditions;
        if let Some(existing) = conditions.iter_mut().find(|c| c.type_ == condition_type) {
            existing.status = status;
            existing.message = message.into();
            existing.reason = reason.to_string();
            existing.last_transition_time = Utc::now();
            existing.observed_generation = generation;
            return;
        }
        conditions.push(Condition {
            type_: condition_type.to_string(),
            status,
            reason: reason.to_string(),
            message: message.into(),
            last_transition_time: Utc::now(),
            observed_generation: generation,
        });
    }

    /// Looks up a condition by type.
    pub fn lookup_condition(&self, condition_type: &str) -> Option<&Condition> {
        self.status
            .as_ref()
            .map(|s| s.conditions.as_slice())
            .unwrap_or_default()
            .iter()
            .find(|c| c.type_ == condition_type)
    }

    /// Returns true if the condition exists, whatever its status.
    pub fn condition_exists(&self, condition_type: &str) -> bool {
        self.lookup_condition(condition_type).is_some()
    }

    /// Returns true if the condition exists and is `True`.
    pub fn condition_true(&self, condition_type: &str) -> bool {
        self.lookup_condition(condition_type)
            .is_some_and(|c| c.status == ConditionStatus::True)
    }

    /// Internal addresses of the currently matching master nodes.
    pub fn matching_node_addresses(&self) -> &[String] {
        self.status
            .as_ref()
            .map(|s| s.matching_node_addresses.as_slice())
            .unwrap_or_default()
    }

    /// Deployment phase, `Pending` when status has never been written.
    pub fn state(&self) -> ConfigurationState {
        self.status.as_ref().map(|s| s.status).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn configuration() -> Configuration {
        Configuration::new(DEFAULT_CONFIGURATION_NAME, ConfigurationSpec::default())
    }

    #[test]
    fn set_condition_replaces_instead_of_appending() {
        let mut config = configuration();
        config.set_condition(
            NB_DB_HEALTH_CONDITION,
            ConditionStatus::True,
            "healthy",
            REASON_DB_HEALTH,
        );
        config.set_condition(
            NB_DB_HEALTH_CONDITION,
            ConditionStatus::False,
            "probe failed",
            REASON_DB_HEALTH,
        );

        let status = config.status.as_ref().unwrap();
        assert_eq!(status.conditions.len(), 1);
        assert_eq!(status.conditions[0].status, ConditionStatus::False);
        assert_eq!(status.conditions[0].message, "probe failed");
    }

    #[test]
    fn conditions_of_different_types_coexist() {
        let mut config = configuration();
        config.set_condition(
            NB_LEADER_FOUND_CONDITION,
            ConditionStatus::True,
            "found",
            REASON_LEADER_FOUND,
        );
        config.set_condition(
            SB_LEADER_FOUND_CONDITION,
            ConditionStatus::False,
            "missing",
            REASON_LEADER_NOT_FOUND,
        );

        assert_eq!(config.status.as_ref().unwrap().conditions.len(), 2);
        assert!(config.condition_true(NB_LEADER_FOUND_CONDITION));
        assert!(!config.condition_true(SB_LEADER_FOUND_CONDITION));
    }

    #[test]
    fn condition_lookup_on_empty_status() {
        let config = configuration();
        assert!(config.lookup_condition(NB_DB_HEALTH_CONDITION).is_none());
        assert!(!config.condition_exists(NB_DB_HEALTH_CONDITION));
        assert!(!config.condition_true(NB_DB_HEALTH_CONDITION));
    }

    #[test]
    fn state_defaults_to_pending_and_serializes_empty() {
        let config = configuration();
        assert_eq!(config.state(), ConfigurationState::Pending);

        let json = serde_json::to_string(&ConfigurationState::Pending).unwrap();
        assert_eq!(json, "\"\"");
        let json = serde_json::to_string(&ConfigurationState::Deployed).unwrap();
        assert_eq!(json, "\"Deployed\"");
    }

    #[test]
    fn empty_status_lists_serialize_explicitly() {
        let status = ConfigurationStatus::default();
        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json["matchingNodeAddresses"], serde_json::json!([]));
        assert_eq!(json["managedObjects"], serde_json::json!([]));
    }

    #[test]
    fn spec_defaults_include_master_label() {
        let spec: ConfigurationSpec = serde_json::from_str("{}").unwrap();
        assert_eq!(spec.master_nodes_label, "fabric.io/role=master");
    }
}
