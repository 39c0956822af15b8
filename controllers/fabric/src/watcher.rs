//! Kubernetes resource watchers.
//!
//! Each control loop runs its own `kube_runtime::Controller`: the
//! configuration watcher (which also owns the namespaced managed kinds so
//! changes to them requeue the Configuration), the node watcher and the
//! health-check watcher. A shared `watch_resource` helper carries the
//! reconcile wiring; failed objects requeue with per-object Fibonacci
//! backoff, reset on the next success.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use k8s_openapi::api::apps::v1::{DaemonSet, Deployment};
use k8s_openapi::api::core::v1::{ConfigMap, Node, Secret, Service, ServiceAccount};
use k8s_openapi::api::rbac::v1::RoleBinding;
use kube::{Api, ResourceExt};
use kube_runtime::controller::{Action, Config as ControllerConfig};
use kube_runtime::{Controller, watcher};
use tracing::{debug, error, info};

use crate::error::ControllerError;
use crate::reconciler::Context;
use fabric_api::Configuration;

fn controller_config() -> ControllerConfig {
    // batch bursty status updates, one object in flight per loop
    ControllerConfig::default()
        .debounce(Duration::from_secs(5))
        .concurrency(1)
}

/// Drives a configured controller stream to completion, logging per-object
/// failures.
async fn run_controller<K>(
    controller: Controller<K>,
    context: Arc<Context>,
    reconcile_fn: ReconcileFn<K>,
    resource_name: &'static str,
) -> Result<(), ControllerError>
where
    K: kube::Resource<DynamicType = ()>
        + Clone
        + Send
        + Sync
        + 'static
        + std::fmt::Debug
        + serde::de::DeserializeOwned,
{
    info!("starting {} watcher", resource_name);

    let error_policy = |obj: Arc<K>, err: &ControllerError, ctx: Arc<Context>| {
        let key = format!("{resource_name}/{}", obj.name_any());
        // persistent errors cannot be cleared by retrying faster, so they
        // get a flat long requeue instead of escalating backoff
        let delay = if err.is_retryable() {
            ctx.next_requeue(&key)
        } else {
            Duration::from_secs(600)
        };
        error!(
            resource = resource_name,
            name = %obj.name_any(),
            error = %err,
            requeue_after = ?delay,
            "reconciliation error"
        );
        Action::requeue(delay)
    };

    let reconcile = move |obj: Arc<K>, ctx: Arc<Context>| async move {
        let key = format!("{resource_name}/{}", obj.name_any());
        debug!(resource = resource_name, name = %obj.name_any(), "reconciling");
        match reconcile_fn(Arc::clone(&ctx), obj).await {
            Ok(action) => {
                ctx.reset_backoff(&key);
                Ok(action)
            }
            Err(e) => Err(e),
        }
    };

    controller
        .run(reconcile, error_policy, context)
        .for_each(|result| async move {
            if let Err(e) = result {
                error!(resource = resource_name, error = %e, "controller error");
            }
        })
        .await;

    Ok(())
}

type ReconcileFn<K> = fn(
    Arc<Context>,
    Arc<K>,
) -> std::pin::Pin<
    Box<dyn std::future::Future<Output = Result<Action, ControllerError>> + Send>,
>;

/// Watches Kubernetes resources for the three control loops.
pub struct Watcher {
    context: Arc<Context>,
    configuration_api: Api<Configuration>,
    node_api: Api<Node>,
}

impl Watcher {
    /// Creates a watcher bound to the shared reconcile context.
    pub fn new(
        context: Arc<Context>,
        configuration_api: Api<Configuration>,
        node_api: Api<Node>,
    ) -> Self {
        Self {
            context,
            configuration_api,
            node_api,
        }
    }

    /// Starts the configuration watcher. Ownership clauses make changes to
    /// the namespaced managed kinds requeue the owning Configuration.
    pub async fn watch_configurations(&self) -> Result<(), ControllerError> {
        let controller = Controller::new(self.configuration_api.clone(), watcher::Config::default())
            .with_config(controller_config())
            .owns::<Secret>(
                Api::namespaced(self.context.client.clone(), &self.context.namespace),
                watcher::Config::default(),
            )
            .owns::<ServiceAccount>(
                Api::namespaced(self.context.client.clone(), &self.context.namespace),
                watcher::Config::default(),
            )
            .owns::<RoleBinding>(
                Api::namespaced(self.context.client.clone(), &self.context.namespace),
                watcher::Config::default(),
            )
            .owns::<ConfigMap>(
                Api::namespaced(self.context.client.clone(), &self.context.namespace),
                watcher::Config::default(),
            )
            .owns::<Deployment>(
                Api::namespaced(self.context.client.clone(), &self.context.namespace),
                watcher::Config::default(),
            )
            .owns::<DaemonSet>(
                Api::namespaced(self.context.client.clone(), &self.context.namespace),
                watcher::Config::default(),
            )
            .owns::<Service>(
                Api::namespaced(self.context.client.clone(), &self.context.namespace),
                watcher::Config::default(),
            );

        run_controller(
            controller,
            Arc::clone(&self.context),
            |ctx, config: Arc<Configuration>| {
                Box::pin(async move {
                    ctx.reconcile_configuration(&config).await?;
                    Ok(Action::await_change())
                })
            },
            "Configuration",
        )
        .await
    }

    /// Starts the node watcher.
    pub async fn watch_nodes(&self) -> Result<(), ControllerError> {
        let controller = Controller::new(self.node_api.clone(), watcher::Config::default())
            .with_config(controller_config());

        run_controller(
            controller,
            Arc::clone(&self.context),
            |ctx, node: Arc<Node>| {
                Box::pin(async move {
                    ctx.reconcile_node(&node).await?;
                    Ok(Action::await_change())
                })
            },
            "Node",
        )
        .await
    }

    /// Starts the health-check watcher, a second loop over Configuration
    /// that requeues itself at the probe interval.
    pub async fn watch_healthchecks(&self) -> Result<(), ControllerError> {
        let controller = Controller::new(self.configuration_api.clone(), watcher::Config::default())
            .with_config(controller_config());

        run_controller(
            controller,
            Arc::clone(&self.context),
            |ctx, config: Arc<Configuration>| {
                Box::pin(async move { ctx.reconcile_healthcheck(&config).await })
            },
            "HealthCheck",
        )
        .await
    }
}
