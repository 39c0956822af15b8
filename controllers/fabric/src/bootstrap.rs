//! Default Configuration bootstrap.
//!
//! On startup the operator loads a `ConfigurationSpec` document from a
//! mounted ConfigMap and creates the singleton Configuration if the cluster
//! does not have one yet. Creation retries with bounded exponential backoff
//! because the admission path may not be ready immediately after deployment.
//! An existing Configuration is never overwritten; bootstrap failure is
//! logged and does not stop the controllers.

use std::path::PathBuf;
use std::time::Duration;

use kube::Api;
use kube::api::PostParams;
use tracing::{info, warn};

use crate::backoff::ExponentialBackoff;
use crate::error::ControllerError;
use fabric_api::{Configuration, ConfigurationSpec, DEFAULT_CONFIGURATION_NAME};

/// File inside the mount carrying the default `ConfigurationSpec`.
pub const CONFIGURATION_FILE_NAME: &str = "configuration.yaml";

fn creation_backoff() -> ExponentialBackoff {
    // 6 attempts: 1s base, doubling, 10% jitter
    ExponentialBackoff::new(6, Duration::from_secs(1), 2.0, 0.1)
}

/// Creates the singleton Configuration from a mounted spec document.
#[derive(Clone)]
pub struct ConfigurationBootstrapper {
    api: Api<Configuration>,
    mount_path: PathBuf,
}

impl ConfigurationBootstrapper {
    /// Creates a bootstrapper reading from `mount_path` and creating into
    /// the operator namespace.
    pub fn new(api: Api<Configuration>, mount_path: impl Into<PathBuf>) -> Self {
        Self {
            api,
            mount_path: mount_path.into(),
        }
    }

    /// Loads the default spec and creates the singleton if absent.
    pub async fn bootstrap(&self) -> Result<(), ControllerError> {
        if self.api.get_opt(DEFAULT_CONFIGURATION_NAME).await?.is_some() {
            info!(
                configuration = DEFAULT_CONFIGURATION_NAME,
                "configuration already exists, skipping bootstrap"
            );
            return Ok(());
        }

        let path = self.mount_path.join(CONFIGURATION_FILE_NAME);
        let raw = match std::fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "no default configuration document, skipping bootstrap");
                return Ok(());
            }
        };
        let spec: ConfigurationSpec = serde_yaml::from_str(&raw).map_err(|e| {
            ControllerError::InvalidConfig(format!(
                "parsing {}: {e}",
                path.display()
            ))
        })?;

        let config = Configuration::new(DEFAULT_CONFIGURATION_NAME, spec);
        info!(
            configuration = DEFAULT_CONFIGURATION_NAME,
            path = %path.display(),
            "creating default configuration"
        );

        let api = self.api.clone();
        create_with_backoff(creation_backoff(), || {
            let api = api.clone();
            let config = config.clone();
            async move {
                api.create(&PostParams::default(), &config).await?;
                Ok(())
            }
        })
        .await?;

        info!(
            configuration = DEFAULT_CONFIGURATION_NAME,
            "default configuration created"
        );
        Ok(())
    }
}

/// Drives `attempt` until it succeeds, the object turns out to already
/// exist, or the backoff's attempt budget is exhausted. The final error is
/// returned on exhaustion.
pub async fn create_with_backoff<F, Fut>(
    mut backoff: ExponentialBackoff,
    mut attempt: F,
) -> Result<(), kube::Error>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<(), kube::Error>>,
{
    loop {
        let error = match attempt().await {
            Ok(()) => return Ok(()),
            Err(kube::Error::Api(response)) if response.code == 409 => {
                info!("configuration already exists");
                return Ok(());
            }
            Err(e) => e,
        };
        match backoff.next_backoff() {
            Some(delay) => {
                warn!(error = %error, delay = ?delay, "retrying configuration creation");
                tokio::time::sleep(delay).await;
            }
            None => return Err(error),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube::core::ErrorResponse;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn server_error() -> kube::Error {
        kube::Error::Api(ErrorResponse {
            status: "Failure".to_string(),
            message: "webhook unavailable".to_string(),
            reason: "InternalError".to_string(),
            code: 500,
        })
    }

    fn conflict_error() -> kube::Error {
        kube::Error::Api(ErrorResponse {
            status: "Failure".to_string(),
            message: "configurations \"fabric\" already exists".to_string(),
            reason: "AlreadyExists".to_string(),
            code: 409,
        })
    }

    fn fast_backoff() -> ExponentialBackoff {
        ExponentialBackoff::new(6, Duration::from_millis(1), 2.0, 0.0)
    }

    #[tokio::test]
    async fn succeeds_after_transient_failures() {
        let attempts = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&attempts);

        let result = create_with_backoff(fast_backoff(), move || {
            let counter = Arc::clone(&counter);
            async move {
                if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(server_error())
                } else {
                    Ok(())
                }
            }
        })
        .await;

        assert!(result.is_ok());
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn reports_error_after_attempt_budget() {
        let attempts = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&attempts);

        let result = create_with_backoff(fast_backoff(), move || {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(server_error())
            }
        })
        .await;

        assert!(result.is_err());
        // 6 total attempts, 5 sleeps between them
        assert_eq!(attempts.load(Ordering::SeqCst), 6);
    }

    #[tokio::test]
    async fn already_exists_is_success() {
        let attempts = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&attempts);

        let result = create_with_backoff(fast_backoff(), move || {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(conflict_error())
            }
        })
        .await;

        assert!(result.is_ok());
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn spec_document_parses() {
        let doc = r"
masterNodesLabel: fabric.io/role=master
version: v1.12.0
registry:
  address: registry.example.com/fabric
networking:
  tunnelType: geneve
  podCidr: 10.42.0.0/16
";
        let spec: ConfigurationSpec = serde_yaml::from_str(doc).unwrap();
        assert_eq!(spec.version, "v1.12.0");
        assert_eq!(spec.networking.tunnel_type, "geneve");
    }
}
