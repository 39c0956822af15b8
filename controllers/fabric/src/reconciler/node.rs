//! Node lifecycle reconciliation.
//!
//! Live nodes get the node finalizer so deletion cannot complete before the
//! databases forget about them. On deletion the node is evicted from the
//! northbound and southbound raft clusters (when it was a database master),
//! its address is dropped from the Configuration status, and its southbound
//! chassis record is removed. The finalizer comes off only once all of that
//! succeeded.

use k8s_openapi::api::core::v1::Node;
use kube::api::{Patch, PatchParams};
use kube::{Api, Resource as _, ResourceExt};
use tracing::{info, warn};

use super::{Context, finalizers_patch_body, node_internal_address, remove_address, status_patch_body};
use crate::error::ControllerError;
use fabric_api::{NB_LEADER_LABEL, NODE_FINALIZER, SB_LEADER_LABEL};
use fabric_render::{chassis_cleanup_script, northbound_eviction_script, southbound_eviction_script};

impl Context {
    /// Reconciles one Node against the fabric's database membership.
    pub async fn reconcile_node(&self, node: &Node) -> Result<(), ControllerError> {
        let Some(config) = self.fetch_configuration().await? else {
            info!("waiting for configuration to be created, nothing to do");
            return Ok(());
        };
        if config.meta().deletion_timestamp.is_some() {
            // teardown sweeps node finalizers itself
            return Ok(());
        }

        let nodes: Api<Node> = Api::all(self.client.clone());
        if node.meta().deletion_timestamp.is_none() {
            if !node.finalizers().iter().any(|f| f == NODE_FINALIZER) {
                let mut finalizers = node.finalizers().to_vec();
                finalizers.push(NODE_FINALIZER.to_string());
                let patch =
                    finalizers_patch_body(node.resource_version().as_deref(), &finalizers);
                nodes
                    .patch(
                        &node.name_any(),
                        &PatchParams::default(),
                        &Patch::Merge(&patch),
                    )
                    .await?;
            }
            return Ok(());
        }

        info!(node = %node.name_any(), "reconciling deletion of node");
        self.reconcile_node_deletion(&config, node).await
    }

    /// Runs the offboarding sequence for a deleting node.
    async fn reconcile_node_deletion(
        &self,
        config: &fabric_api::Configuration,
        node: &Node,
    ) -> Result<(), ControllerError> {
        let node_name = node.name_any();
        let Some(address) = node_internal_address(node) else {
            // persistent until the platform reports an address; the
            // finalizer stays on so the databases are never left with a
            // stale member
            warn!(node = %node_name, "node has no internal address, retaining finalizer");
            self.emit_warning_event(
                node,
                "MissingInternalAddress",
                "node has no internal address, database cleanup cannot proceed",
            )
            .await;
            return Err(ControllerError::NodeAddressMissing(node_name));
        };

        if config
            .matching_node_addresses()
            .iter()
            .any(|a| a == &address)
        {
            info!(node = %node_name, address = %address, "evicting node from database clusters");
            self.execute_on_leader(NB_LEADER_LABEL, &northbound_eviction_script(&address))
                .await?;
            self.execute_on_leader(SB_LEADER_LABEL, &southbound_eviction_script(&address))
                .await?;

            // read-modify-patch against a fresh snapshot so the address
            // removal composes with concurrent configuration updates
            if let Some(fresh) = self.fetch_configuration().await? {
                let mut status = fresh.status.clone().unwrap_or_default();
                status.matching_node_addresses =
                    remove_address(&status.matching_node_addresses, &address);
                let patch = status_patch_body(fresh.resource_version().as_deref(), &status)?;
                self.configurations()
                    .patch_status(&fresh.name_any(), &PatchParams::default(), &Patch::Merge(&patch))
                    .await?;
            }
        }

        // chassis records exist for every node that ran the agent, keyed by
        // hostname so address reuse cannot remove the wrong record
        info!(node = %node_name, "removing node chassis entry");
        self.execute_on_leader(SB_LEADER_LABEL, &chassis_cleanup_script(&node_name))
            .await?;

        if node.finalizers().iter().any(|f| f == NODE_FINALIZER) {
            let finalizers: Vec<String> = node
                .finalizers()
                .iter()
                .filter(|f| *f != NODE_FINALIZER)
                .cloned()
                .collect();
            let patch = finalizers_patch_body(node.resource_version().as_deref(), &finalizers);
            let nodes: Api<Node> = Api::all(self.client.clone());
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
