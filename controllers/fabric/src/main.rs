//! Fabric Controller
//!
//! Operator for a clustered network-fabric control plane. Three cooperating
//! control loops reconcile the singleton Configuration object:
//! - Configuration: renders and applies the managed object set in order
//! - Node: onboards/offboards nodes and cleans up database membership
//! - HealthCheck: periodically probes the northbound/southbound databases
//!
//! A bootstrap step creates the default Configuration from a mounted
//! document when the cluster does not have one yet.

mod backoff;
mod bootstrap;
mod controller;
mod error;
mod executor;
mod reconciler;
mod watcher;

use std::env;

use controller::{FabricController, Settings};
use error::ControllerError;
use tracing::{info, warn};

const DEFAULT_NAMESPACE: &str = "kube-system";
const DEFAULT_MANIFEST_DIR: &str = "/etc/fabric-operator/manifests";
const DEFAULT_CONFIG_MOUNT_PATH: &str = "/etc/fabric-operator/default-config";
const DEFAULT_HEALTHCHECK_INTERVAL_SECONDS: u64 = 300;

#[tokio::main]
async fn main() -> Result<(), ControllerError> {
    tracing_subscriber::fmt::init();

    if rustls::crypto::ring::default_provider()
        .install_default()
        .is_err()
    {
        warn!("rustls crypto provider was already installed");
    }

    info!("starting fabric controller");

    let namespace =
        env::var("OPERATOR_NAMESPACE").unwrap_or_else(|_| DEFAULT_NAMESPACE.to_string());
    let manifest_dir =
        env::var("MANIFEST_DIR").unwrap_or_else(|_| DEFAULT_MANIFEST_DIR.to_string());
    let config_mount_path =
        env::var("CONFIG_MOUNT_PATH").unwrap_or_else(|_| DEFAULT_CONFIG_MOUNT_PATH.to_string());
    let healthcheck_interval_seconds = match env::var("HEALTHCHECK_INTERVAL_SECONDS") {
        Ok(raw) => raw.parse().map_err(|_| {
            ControllerError::InvalidConfig(format!(
                "HEALTHCHECK_INTERVAL_SECONDS must be a number of seconds, got {raw}"
            ))
        })?,
        Err(_) => DEFAULT_HEALTHCHECK_INTERVAL_SECONDS,
    };

    info!("configuration:");
    info!("  namespace: {}", namespace);
    info!("  manifest dir: {}", manifest_dir);
    info!("  config mount path: {}", config_mount_path);
    info!("  healthcheck interval: {}s", healthcheck_interval_seconds);

    let controller = FabricController::new(Settings {
        namespace,
        manifest_dir,
        config_mount_path,
        healthcheck_interval_seconds,
    })
    .await?;
    controller.run().await?;

    Ok(())
}
