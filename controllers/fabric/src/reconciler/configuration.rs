//! Configuration lifecycle reconciliation.
//!
//! The happy path runs a fixed pipeline: attach the finalizer, initialize
//! conditions, ensure the owner namespace, discover master nodes, then apply
//! the managed object set kind by kind in the fixed order. Deletion drains
//! custom resource instances before their definitions go away, deletes the
//! owner namespace, removes finalizers and hands the rest to the garbage
//! collector.

use k8s_openapi::api::core::v1::{Namespace, Node};
use kube::api::{DeleteParams, DynamicObject, ListParams, Patch, PatchParams};
use kube::core::{ApiResource, GroupVersionKind};
use kube::{Api, Resource as _, ResourceExt};
use tracing::{debug, info};

use super::{
    Context, addresses_equal, controller_owner_reference, finalizers_patch_body,
    node_internal_address, status_patch_body,
};
use crate::error::ControllerError;
use fabric_api::{
    CONFIGURATION_FINALIZER, ConditionStatus, Configuration, ConfigurationState, FIELD_MANAGER,
    NB_DB_HEALTH_CONDITION, NB_LEADER_FOUND_CONDITION, NODE_FINALIZER, OWNER_NAMESPACE,
    REASON_NODES_FOUND, REASON_NODES_NOT_FOUND, REASON_UNKNOWN, SB_DB_HEALTH_CONDITION,
    SB_LEADER_FOUND_CONDITION, WAITING_FOR_MATCHING_NODES_CONDITION,
};
use fabric_render::{ObjectKind, RenderError};

impl Context {
    /// Reconciles one Configuration to its desired state.
    pub async fn reconcile_configuration(
        &self,
        original: &Configuration,
    ) -> Result<(), ControllerError> {
        let name = original.name_any();
        let api = self.configurations();

        if original.meta().deletion_timestamp.is_some() {
            return self.delete_configuration(original).await;
        }

        // attach the finalizer first; the resulting event re-runs the pipeline
        if !original
            .finalizers()
            .iter()
            .any(|f| f == CONFIGURATION_FINALIZER)
        {
            let mut finalizers = original.finalizers().to_vec();
            finalizers.push(CONFIGURATION_FINALIZER.to_string());
            let patch =
                finalizers_patch_body(original.resource_version().as_deref(), &finalizers);
            api.patch(&name, &PatchParams::default(), &Patch::Merge(&patch))
                .await?;
            return Ok(());
        }

        let mut config = original.clone();
        initialize_conditions(&mut config);
        self.ensure_owner_namespace().await?;
        if self.find_master_nodes(&mut config).await? {
            self.apply_objects(&mut config).await?;
        }

        if original.status != config.status {
            let patch =
                status_patch_body(original.resource_version().as_deref(), status_of(&config))?;
            api.patch_status(&name, &PatchParams::default(), &Patch::Merge(&patch))
                .await?;
        }
        Ok(())
    }

    /// Creates the placeholder namespace that anchors garbage collection of
    /// cluster-scoped managed objects.
    async fn ensure_owner_namespace(&self) -> Result<(), ControllerError> {
        let namespaces: Api<Namespace> = Api::all(self.client.clone());
        if namespaces.get_opt(OWNER_NAMESPACE).await?.is_none() {
            let ns = Namespace {
                metadata: kube::api::ObjectMeta {
                    name: Some(OWNER_NAMESPACE.to_string()),
                    ..Default::default()
                },
                ..Default::default()
            };
            namespaces
                .create(&kube::api::PostParams::default(), &ns)
                .await?;
        }
        Ok(())
    }

    /// Discovers nodes matching `spec.masterNodesLabel` and records their
    /// internal addresses. Returns false when nothing matched, which stops
    /// the pipeline until the label lands on at least one node.
    async fn find_master_nodes(
        &self,
        config: &mut Configuration,
    ) -> Result<bool, ControllerError> {
        let nodes: Api<Node> = Api::all(self.client.clone());
        let list = nodes
            .list(&ListParams::default().labels(&config.spec.master_nodes_label))
            .await?;
        let addresses: Vec<String> = list
            .items
            .iter()
            .filter_map(node_internal_address)
            .collect();

        if addresses.is_empty() {
            info!(
                label = %config.spec.master_nodes_label,
                "no nodes match the master node label, pausing reconcile"
            );
            if mark_waiting_for_nodes(config) {
                self.emit_warning_event(
                    config,
                    "ReconcilePaused",
                    "no nodes matching master node labels found",
                )
                .await;
            }
            return Ok(false);
        }

        if !addresses_equal(config.matching_node_addresses(), &addresses) {
            config.set_condition(
                WAITING_FOR_MATCHING_NODES_CONDITION,
                ConditionStatus::False,
                format!("found nodes {}", addresses.join(",")),
                REASON_NODES_FOUND,
            );
            if let Some(status) = config.status.as_mut() {
                status.matching_node_addresses = addresses;
            }
        }
        Ok(true)
    }

    /// Applies every managed object kind in order, recording the applied set
    /// in the status audit list.
    async fn apply_objects(&self, config: &mut Configuration) -> Result<(), ControllerError> {
        // best-effort re-entrancy guard; an apply that died mid-flight never
        // persists Deploying, so this cannot wedge the pipeline
        if config.state() == ConfigurationState::Deploying {
            info!("objects are already deploying, skipping apply");
            return Ok(());
        }
        config.status.get_or_insert_with(Default::default).status =
            ConfigurationState::Deploying;

        let namespaces: Api<Namespace> = Api::all(self.client.clone());
        let owner_namespace = namespaces.get(OWNER_NAMESPACE).await?;
        let config_owner = controller_owner_reference(config)?;
        let namespace_owner = controller_owner_reference(&owner_namespace)?;

        let mut applied = Vec::new();
        for kind in ObjectKind::ORDERED {
            debug!(object_kind = %kind, "processing object kind");
            let objects = self.renderer.generate_objects(config, kind)?;
            for mut object in objects {
                let owner = if kind.namespaced() {
                    &config_owner
                } else {
                    &namespace_owner
                };
                let metadata = object
                    .body
                    .get_mut("metadata")
                    .and_then(|m| m.as_object_mut())
                    .ok_or(RenderError::MissingField("metadata"))?;
                metadata.insert(
                    "ownerReferences".to_string(),
                    serde_json::Value::Array(vec![owner.clone()]),
                );

                let resource = kind.api_resource();
                let api: Api<DynamicObject> = if kind.namespaced() {
                    let namespace = object.namespace().unwrap_or(&self.namespace).to_string();
                    Api::namespaced_with(self.client.clone(), &namespace, &resource)
                } else {
                    Api::all_with(self.client.clone(), &resource)
                };
                api.patch(
                    &object.name,
                    &PatchParams::apply(FIELD_MANAGER).force(),
                    &Patch::Apply(&object.body),
                )
                .await?;

                let gvk = kind.gvk();
                applied.push(fabric_api::ObjectReference {
                    gvk: fabric_api::GroupVersionKind {
                        group: gvk.group,
                        version: gvk.version,
                        kind: gvk.kind,
                    },
                    name: object.name.clone(),
                });
            }
        }

        let status = config.status.get_or_insert_with(Default::default);
        status.status = ConfigurationState::Deployed;
        status.managed_objects = applied;
        Ok(())
    }

    /// Tears down the managed world when the Configuration is deleted.
    async fn delete_configuration(
        &self,
        original: &Configuration,
    ) -> Result<(), ControllerError> {
        let name = original.name_any();
        info!(configuration = %name, "cleaning up managed objects");

        // custom resource instances must be gone before their definitions
        // are garbage collected, their controllers may still need to run
        // finalizers
        self.drain_custom_resources(original).await?;

        let namespaces: Api<Namespace> = Api::all(self.client.clone());
        if let Some(ns) = namespaces.get_opt(OWNER_NAMESPACE).await? {
            if ns.meta().deletion_timestamp.is_none() {
                namespaces
                    .delete(OWNER_NAMESPACE, &DeleteParams::default())
                    .await?;
            }
        } else {
            info!(namespace = OWNER_NAMESPACE, "owner namespace already gone");
        }

        self.remove_node_finalizers().await?;

        if original
            .finalizers()
            .iter()
            .any(|f| f == CONFIGURATION_FINALIZER)
        {
            let finalizers: Vec<String> = original
                .finalizers()
                .iter()
                .filter(|f| *f != CONFIGURATION_FINALIZER)
                .cloned()
                .collect();
            let patch =
                finalizers_patch_body(original.resource_version().as_deref(), &finalizers);
            self.configurations()
                .patch(&name, &PatchParams::default(), &Patch::Merge(&patch))
                .await?;
        }
        Ok(())
    }

    /// Deletes every instance of the custom resource definitions this
    /// Configuration installed, across all declared versions. Returns
    /// [`ControllerError::DrainPending`] while instances remain so the
    /// reconcile requeues until controllers have finished their cleanup.
    async fn drain_custom_resources(
        &self,
        config: &Configuration,
    ) -> Result<(), ControllerError> {
        let definitions = self
            .renderer
            .generate_objects(config, ObjectKind::CustomResourceDefinition)?;

        let mut remaining = 0;
        for definition in definitions {
            let coordinates = definition_coordinates(&definition.body)?;
            for version_name in &coordinates.versions {
                let gvk =
                    GroupVersionKind::gvk(&coordinates.group, version_name, &coordinates.kind);
                let resource = ApiResource::from_gvk_with_plural(&gvk, &coordinates.plural);
                debug!(group = %gvk.group, version = %gvk.version, plural = %coordinates.plural, "draining instances");

                // lists across all namespaces for namespaced kinds too
                let api: Api<DynamicObject> = Api::all_with(self.client.clone(), &resource);
                let instances = api.list(&ListParams::default()).await?;
                remaining += instances.items.len();
                for instance in instances.items {
                    if instance.meta().deletion_timestamp.is_some() {
                        continue;
                    }
                    let instance_api: Api<DynamicObject> = match instance.namespace() {
                        Some(ns) => Api::namespaced_with(self.client.clone(), &ns, &resource),
                        None => Api::all_with(self.client.clone(), &resource),
                    };
                    instance_api
                        .delete(&instance.name_any(), &DeleteParams::default())
                        .await?;
                }
            }
        }

        if remaining > 0 {
            return Err(ControllerError::DrainPending { remaining });
        }
        Ok(())
    }

    /// Strips the node finalizer from every node so nodes stay manageable
    /// after the fabric is gone.
    async fn remove_node_finalizers(&self) -> Result<(), ControllerError> {
        let nodes: Api<Node> = Api::all(self.client.clone());
        for node in nodes.list(&ListParams::default()).await? {
            if !node.finalizers().iter().any(|f| f == NODE_FINALIZER) {
                continue;
            }
            let finalizers: Vec<String> = node
                .finalizers()
                .iter()
                .filter(|f| *f != NODE_FINALIZER)
                .cloned()
                .collect();
            let patch = finalizers_patch_body(node.resource_version().as_deref(), &finalizers);
            nodes
                .patch(
                    &node.name_any(),
                    &PatchParams::default(),
                    &Patch::Merge(&patch),
                )
                .await?;
        }
        Ok(())
    }
}

/// Records the zero-match outcome on the status. The waiting condition is
/// set only on the transition into the state so repeat passes over an
/// unchanged cluster leave the status untouched; previously recorded
/// addresses are cleared either way. Returns true on the transition, when a
/// warning event is warranted.
pub(crate) fn mark_waiting_for_nodes(config: &mut Configuration) -> bool {
    let transition = !config.condition_true(WAITING_FOR_MATCHING_NODES_CONDITION);
    if transition {
        config.set_condition(
            WAITING_FOR_MATCHING_NODES_CONDITION,
            ConditionStatus::True,
            "Waiting for matching nodes",
            REASON_NODES_NOT_FOUND,
        );
    }
    if let Some(status) = config.status.as_mut() {
        status.matching_node_addresses.clear();
    }
    transition
}

/// Coordinates of one custom resource definition, read from its manifest.
#[derive(Debug, PartialEq, Eq)]
pub(crate) struct DefinitionCoordinates {
    pub(crate) group: String,
    pub(crate) plural: String,
    pub(crate) kind: String,
    pub(crate) versions: Vec<String>,
}

/// Extracts the group, plural, kind and declared version names from a
/// CustomResourceDefinition body.
pub(crate) fn definition_coordinates(
    body: &serde_json::Value,
) -> Result<DefinitionCoordinates, ControllerError> {
    let text = |pointer: &str, name: &'static str| {
        body.pointer(pointer)
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .ok_or(RenderError::MissingField(name))
    };
    let versions = body
        .pointer("/spec/versions")
        .and_then(|v| v.as_array())
        .ok_or(RenderError::MissingField("spec.versions"))?
        .iter()
        .filter_map(|v| v.get("name").and_then(|n| n.as_str()))
        .map(str::to_string)
        .collect();
    Ok(DefinitionCoordinates {
        group: text("/spec/group", "spec.group")?,
        plural: text("/spec/names/plural", "spec.names.plural")?,
        kind: text("/spec/names/kind", "spec.names.kind")?,
        versions,
    })
}

/// Seeds the five well-known conditions as Unknown so consumers always see
/// the full set.
pub(crate) fn initialize_conditions(config: &mut Configuration) {
    for condition in [
        WAITING_FOR_MATCHING_NODES_CONDITION,
        NB_LEADER_FOUND_CONDITION,
        SB_LEADER_FOUND_CONDITION,
        NB_DB_HEALTH_CONDITION,
        SB_DB_HEALTH_CONDITION,
    ] {
        if !config.condition_exists(condition) {
            config.set_condition(condition, ConditionStatus::Unknown, "Unknown", REASON_UNKNOWN);
        }
    }
}

fn status_of(config: &Configuration) -> &fabric_api::ConfigurationStatus {
    static EMPTY: std::sync::OnceLock<fabric_api::ConfigurationStatus> = std::sync::OnceLock::new();
    config
        .status
        .as_ref()
        .unwrap_or_else(|| EMPTY.get_or_init(Default::default))
}
