//! Main controller implementation.
//!
//! Wires the shared reconcile context, runs the bootstrap path, then starts
//! the three watchers (configuration, node, health check) as background
//! tasks and waits for the first one to exit.

use std::sync::Arc;
use std::time::Duration;

use k8s_openapi::api::core::v1::Node;
use kube::{Api, Client};
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::bootstrap::ConfigurationBootstrapper;
use crate::error::ControllerError;
use crate::reconciler::Context;
use crate::watcher::Watcher;
use fabric_api::Configuration;
use fabric_render::DirRenderer;

/// Runtime settings read from the environment.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Namespace the operator and database pods run in
    pub namespace: String,
    /// Directory holding the rendered manifest bundle
    pub manifest_dir: String,
    /// Directory holding the default configuration document
    pub config_mount_path: String,
    /// Minimum seconds between database health probes
    pub healthcheck_interval_seconds: u64,
}

/// Fabric operator: owns the three watcher tasks.
pub struct FabricController {
    configuration_watcher: JoinHandle<Result<(), ControllerError>>,
    node_watcher: JoinHandle<Result<(), ControllerError>>,
    healthcheck_watcher: JoinHandle<Result<(), ControllerError>>,
}

impl FabricController {
    /// Creates the controller: connects to the cluster, bootstraps the
    /// default Configuration, and starts the watchers.
    pub async fn new(settings: Settings) -> Result<Self, ControllerError> {
        info!("initializing fabric controller");

        let client = Client::try_default().await?;

        let configuration_api: Api<Configuration> =
            Api::namespaced(client.clone(), &settings.namespace);
        let node_api: Api<Node> = Api::all(client.clone());

        // bootstrap failure must not stop the controllers; the singleton can
        // still be created by hand
        let bootstrapper = ConfigurationBootstrapper::new(
            configuration_api.clone(),
            settings.config_mount_path.clone(),
        );
        if let Err(e) = bootstrapper.bootstrap().await {
            error!(error = %e, "configuration bootstrap failed, continuing");
        }

        let context = Arc::new(Context::new(
            client,
            settings.namespace.clone(),
            Arc::new(DirRenderer::new(settings.manifest_dir.clone())),
            Duration::from_secs(settings.healthcheck_interval_seconds),
        ));
        let watcher = Arc::new(Watcher::new(context, configuration_api, node_api));

        let configuration_watcher = {
            let watcher = Arc::clone(&watcher);
            tokio::spawn(async move { watcher.watch_configurations().await })
        };
        let node_watcher = {
            let watcher = Arc::clone(&watcher);
            tokio::spawn(async move { watcher.watch_nodes().await })
        };
        let healthcheck_watcher = {
            tokio::spawn(async move { watcher.watch_healthchecks().await })
        };

        Ok(Self {
            configuration_watcher,
            node_watcher,
            healthcheck_watcher,
        })
    }

    /// Runs until the first watcher exits.
    pub async fn run(mut self) -> Result<(), ControllerError> {
        info!("fabric controller running");

        tokio::select! {
            result = &mut self.configuration_watcher => {
                result.map_err(|e| ControllerError::Watch(format!("Configuration watcher panicked: {e}")))??;
            }
            result = &mut self.node_watcher => {
                result.map_err(|e| ControllerError::Watch(format!("Node watcher panicked: {e}")))??;
            }
            result = &mut self.healthcheck_watcher => {
                result.map_err(|e| ControllerError::Watch(format!("HealthCheck watcher panicked: {e}")))??;
            }
        }

        Ok(())
    }
}
