//! Reconciliation logic for the fabric controllers.
//!
//! Organized by watched resource:
//! - `configuration`: Configuration lifecycle (ordered apply, delete/drain)
//! - `node`: node onboarding/offboarding and database membership cleanup
//! - `healthcheck`: periodic database cluster probing
//!
//! All three loops share the [`Context`], which carries the Kubernetes
//! client, the render collaborator, the remote command executor and the
//! per-object requeue backoff state.

pub mod configuration;
pub mod healthcheck;
pub mod node;

#[cfg(test)]
mod helpers_test;

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use k8s_openapi::api::core::v1::{Event, Node, Pod};
use kube::api::{ListParams, ObjectMeta, PostParams};
use kube::{Api, Client, Resource, ResourceExt};
use tracing::warn;

use crate::backoff::RequeueBackoff;
use crate::error::ControllerError;
use crate::executor::RemoteCommandExecutor;
use fabric_api::{Configuration, DEFAULT_CONFIGURATION_NAME};
use fabric_render::Renderer;

/// Shared state handed to every reconcile invocation.
pub struct Context {
    /// Kubernetes client
    pub client: Client,
    /// Namespace the operator and the database pods run in
    pub namespace: String,
    /// Render collaborator producing managed object bodies
    pub renderer: Arc<dyn Renderer>,
    /// Executor for commands inside database pods
    pub executor: RemoteCommandExecutor,
    /// Minimum time between database health probes
    pub healthcheck_interval: Duration,
    backoff_states: Mutex<HashMap<String, RequeueBackoff>>,
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("namespace", &self.namespace)
            .field("healthcheck_interval", &self.healthcheck_interval)
            .finish_non_exhaustive()
    }
}

impl Context {
    /// Creates the shared reconcile context.
    pub fn new(
        client: Client,
        namespace: impl Into<String>,
        renderer: Arc<dyn Renderer>,
        healthcheck_interval: Duration,
    ) -> Self {
        let namespace = namespace.into();
        let executor = RemoteCommandExecutor::new(client.clone(), &namespace);
        Self {
            client,
            namespace,
            renderer,
            executor,
            healthcheck_interval,
            backoff_states: Mutex::new(HashMap::new()),
        }
    }

    /// API handle for the Configuration singleton's namespace.
    pub fn configurations(&self) -> Api<Configuration> {
        Api::namespaced(self.client.clone(), &self.namespace)
    }

    /// Fetches the singleton Configuration, `None` when it does not exist.
    pub async fn fetch_configuration(&self) -> Result<Option<Configuration>, ControllerError> {
        Ok(self
            .configurations()
            .get_opt(DEFAULT_CONFIGURATION_NAME)
            .await?)
    }

    /// Finds the single pod carrying the given leader label.
    ///
    /// Anything other than exactly one match is an error so scripts never
    /// run against a stale or ambiguous leader.
    pub async fn leader_pod(&self, label: &str) -> Result<Pod, ControllerError> {
        let pods: Api<Pod> = Api::namespaced(self.client.clone(), &self.namespace);
        let list = pods.list(&ListParams::default().labels(label)).await?;
        let found = list.items.len();
        let mut items = list.items;
        match items.pop() {
            Some(pod) if found == 1 => Ok(pod),
            _ => Err(ControllerError::LeaderLookup {
                label: label.to_string(),
                found,
            }),
        }
    }

    /// Runs a shell command inside the central container of the pod carrying
    /// the given leader label, returning captured stdout.
    pub async fn execute_on_leader(
        &self,
        label: &str,
        command: &str,
    ) -> Result<String, ControllerError> {
        let pod = self.leader_pod(label).await?;
        let pod_name = pod
            .metadata
            .name
            .as_deref()
            .ok_or_else(|| ControllerError::Exec("leader pod has no name".to_string()))?;
        self.executor.run(pod_name, command).await
    }

    /// Emits a warning Event attached to the given object. Failures are
    /// logged and swallowed, events are advisory.
    pub async fn emit_warning_event<K>(&self, object: &K, reason: &str, message: &str)
    where
        K: Resource<DynamicType = ()>,
    {
        let namespace = object
            .namespace()
            .unwrap_or_else(|| self.namespace.clone());
        let events: Api<Event> = Api::namespaced(self.client.clone(), &namespace);
        let now = k8s_openapi::apimachinery::pkg::apis::meta::v1::Time(chrono::Utc::now());
        let event = Event {
            metadata: ObjectMeta {
                generate_name: Some(format!("{}-event-", object.name_any())),
                ..Default::default()
            },
            type_: Some("Warning".to_string()),
            reason: Some(reason.to_string()),
            message: Some(message.to_string()),
            involved_object: object.object_ref(&()),
            first_timestamp: Some(now.clone()),
            last_timestamp: Some(now),
            count: Some(1),
            ..Default::default()
        };
        if let Err(e) = events.create(&PostParams::default(), &event).await {
            warn!(reason, error = %e, "failed to emit event");
        }
    }

    /// Next requeue delay for a failing object, advancing its backoff.
    pub fn next_requeue(&self, key: &str) -> Duration {
        match self.backoff_states.lock() {
            Ok(mut states) => states
                .entry(key.to_string())
                .or_insert_with(|| RequeueBackoff::new(15, 600))
                .next_backoff(),
            Err(e) => {
                warn!(error = %e, "backoff state lock poisoned, using default requeue");
                Duration::from_secs(60)
            }
        }
    }

    /// Resets an object's backoff after a successful reconcile.
    pub fn reset_backoff(&self, key: &str) {
        if let Ok(mut states) = self.backoff_states.lock()
            && let Some(state) = states.get_mut(key)
        {
            state.reset();
        }
    }
}

/// First InternalIP address reported by the node, if any.
pub fn node_internal_address(node: &Node) -> Option<String> {
    node.status
        .as_ref()
        .and_then(|s| s.addresses.as_ref())
        .and_then(|addresses| {
            addresses
                .iter()
                .find(|a| a.type_ == "InternalIP")
                .map(|a| a.address.clone())
        })
}

/// Order-insensitive equality of two address sets.
pub fn addresses_equal(existing: &[String], discovered: &[String]) -> bool {
    let mut existing: Vec<_> = existing.to_vec();
    let mut discovered: Vec<_> = discovered.to_vec();
    existing.sort();
    discovered.sort();
    existing == discovered
}

/// Removes the first occurrence of `address` from the set.
pub fn remove_address(addresses: &[String], address: &str) -> Vec<String> {
    let mut result = addresses.to_vec();
    if let Some(index) = result.iter().position(|a| a == address) {
        result.remove(index);
    }
    result
}

/// Merge-patch body updating only `status`, carrying `resourceVersion` so a
/// concurrent writer surfaces as a conflict instead of a lost update.
pub fn status_patch_body(
    resource_version: Option<&str>,
    status: &fabric_api::ConfigurationStatus,
) -> Result<serde_json::Value, ControllerError> {
    Ok(serde_json::json!({
        "metadata": { "resourceVersion": resource_version },
        "status": serde_json::to_value(status)?,
    }))
}

/// Merge-patch body replacing the finalizer list, preconditioned on
/// `resourceVersion`.
pub fn finalizers_patch_body(
    resource_version: Option<&str>,
    finalizers: &[String],
) -> serde_json::Value {
    serde_json::json!({
        "metadata": {
            "resourceVersion": resource_version,
            "finalizers": finalizers,
        }
    })
}

/// Owner reference pointing at a controlling object.
pub fn controller_owner_reference<K>(owner: &K) -> Result<serde_json::Value, ControllerError>
where
    K: Resource<DynamicType = ()>,
{
    let uid = owner.meta().uid.as_deref().ok_or_else(|| {
        ControllerError::InvalidConfig(format!("owner {} has no uid", owner.name_any()))
    })?;
    Ok(serde_json::json!({
        "apiVersion": K::api_version(&()),
        "kind": K::kind(&()),
        "name": owner.name_any(),
        "uid": uid,
        "controller": true,
        "blockOwnerDeletion": true,
    }))
}
