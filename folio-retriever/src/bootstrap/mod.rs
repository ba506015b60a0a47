//! Staged acquisition of the vector store: explicit target, then an
//! auto-provisioned instance, then degraded keyword-only operation.

pub mod runtime;

pub use runtime::{DockerRuntime, InstanceInfo, InstanceSpec, ProvisioningRuntime};

use crate::config::VectorConfig;
use crate::error::{ProvisioningError, RetrieverError};
use crate::vector_store::{StoreConnector, VectorStore};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::OnceCell;
use tokio::time::timeout;
use tracing::{debug, info, warn};

const PORT_PROBE_TIMEOUT: Duration = Duration::from_secs(2);

/// How the process ended up talking to the vector store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionMode {
    /// Bootstrap has not run yet.
    Unconfigured,
    Explicit,
    AutoProvisioned,
    Degraded,
}

impl std::fmt::Display for ConnectionMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Unconfigured => "unconfigured",
            Self::Explicit => "explicit",
            Self::AutoProvisioned => "auto_provisioned",
            Self::Degraded => "degraded",
        };
        f.write_str(name)
    }
}

/// Result of the bootstrap. Failures are reported here, never raised.
#[derive(Debug, Clone, Serialize)]
pub struct BootstrapOutcome {
    pub success: bool,
    pub mode: ConnectionMode,
    /// Connection target in use when `success`.
    pub url: Option<String>,
    /// Actionable summary when degraded.
    pub error: Option<String>,
    #[serde(skip)]
    pub provisioning_error: Option<ProvisioningError>,
    /// Why the explicit target was rejected, if one was configured.
    pub explicit_error: Option<String>,
}

impl BootstrapOutcome {
    fn connected(mode: ConnectionMode, url: String, explicit_error: Option<String>) -> Self {
        Self {
            success: true,
            mode,
            url: Some(url),
            error: None,
            provisioning_error: None,
            explicit_error,
        }
    }

    fn degraded(
        error: String,
        provisioning_error: Option<ProvisioningError>,
        explicit_error: Option<String>,
    ) -> Self {
        Self {
            success: false,
            mode: ConnectionMode::Degraded,
            url: None,
            error: Some(error),
            provisioning_error,
            explicit_error,
        }
    }

    /// Reason to show when semantic search is requested while degraded.
    pub fn unavailable_reason(&self) -> String {
        self.error
            .clone()
            .unwrap_or_else(|| format!("vector store mode is {}", self.mode))
    }
}

type BootstrapState = (BootstrapOutcome, Option<Arc<dyn VectorStore>>);

/// Evaluates the vector store state machine once per instance.
///
/// Concurrent callers of [`initialize`](Self::initialize) share one
/// evaluation; later calls return the cached outcome.
pub struct VectorStoreBootstrap {
    config: VectorConfig,
    connector: Arc<dyn StoreConnector>,
    runtime: Arc<dyn ProvisioningRuntime>,
    state: OnceCell<BootstrapState>,
}

impl VectorStoreBootstrap {
    pub fn new(
        config: VectorConfig,
        connector: Arc<dyn StoreConnector>,
        runtime: Arc<dyn ProvisioningRuntime>,
    ) -> Self {
        Self {
            config,
            connector,
            runtime,
            state: OnceCell::new(),
        }
    }

    pub async fn initialize(&self) -> BootstrapOutcome {
        let (outcome, _) = self.state.get_or_init(|| self.evaluate()).await;
        outcome.clone()
    }

    /// Connected store, once bootstrap succeeded.
    pub fn store(&self) -> Option<Arc<dyn VectorStore>> {
        self.state.get().and_then(|(_, store)| store.clone())
    }

    pub fn mode(&self) -> ConnectionMode {
        self.state
            .get()
            .map(|(outcome, _)| outcome.mode)
            .unwrap_or(ConnectionMode::Unconfigured)
    }

    async fn evaluate(&self) -> BootstrapState {
        let mut explicit_error = None;

        if let Some(url) = self.config.url.as_deref() {
            match self.try_explicit(url).await {
                Ok(store) => {
                    info!("Using vector store at {}", url);
                    let outcome =
                        BootstrapOutcome::connected(ConnectionMode::Explicit, url.to_string(), None);
                    return (outcome, Some(store));
                }
                Err(e) => {
                    warn!("Configured vector store {} is not reachable: {}", url, e);
                    explicit_error = Some(e.to_string());
                }
            }
        }

        if !self.config.auto_provision {
            let error = match &explicit_error {
                Some(e) => format!("configured vector store is not reachable ({e})"),
                None => "no vector store configured and auto-provisioning is disabled".to_string(),
            };
            warn!("Semantic search disabled: {}", error);
            return (BootstrapOutcome::degraded(error, None, explicit_error), None);
        }

        match self.provision().await {
            Ok((url, store)) => {
                info!("Using auto-provisioned vector store at {}", url);
                let outcome =
                    BootstrapOutcome::connected(ConnectionMode::AutoProvisioned, url, explicit_error);
                (outcome, Some(store))
            }
            Err(e) => {
                warn!("Auto-provisioning failed, semantic search disabled: {}", e);
                let provisioning_error = match &e {
                    RetrieverError::Provisioning(p) => Some(p.clone()),
                    _ => None,
                };
                (
                    BootstrapOutcome::degraded(e.to_string(), provisioning_error, explicit_error),
                    None,
                )
            }
        }
    }

    async fn try_explicit(&self, url: &str) -> crate::error::Result<Arc<dyn VectorStore>> {
        let store = self.connector.open(url)?;
        store.connect().await?;
        store.disconnect().await?;
        Ok(store)
    }

    async fn provision(&self) -> crate::error::Result<(String, Arc<dyn VectorStore>)> {
        let spec = InstanceSpec {
            name: self.config.container_name.clone(),
            image: self.config.image.clone(),
            port: self.config.port,
            data_dir: self.config.data_dir.clone(),
        };

        if port_in_use(spec.port).await {
            let info = self.runtime.instance_info(&spec).await?;
            match info {
                Some(info) if info.running && info.port == Some(spec.port) => {
                    debug!("Port {} is held by managed instance {}", spec.port, info.name);
                }
                _ => return Err(ProvisioningError::PortConflict { port: spec.port }.into()),
            }
        } else {
            self.runtime.check_permission().await?;
            self.runtime.ensure_managed_instance(&spec).await?;
        }

        let url = self.config.provisioned_url();
        let wait = self.config.health_timeout();
        let interval = self.config.health_poll_interval();
        timeout(
            wait + interval,
            self.runtime.wait_for_health(&url, wait, interval),
        )
        .await
        .map_err(|_| ProvisioningError::HealthTimeout {
            url: url.clone(),
            timeout: wait,
        })??;

        let store = self.connector.open(&url)?;
        store.connect().await?;
        Ok((url, store))
    }
}

/// Whether something already listens on the loopback port.
async fn port_in_use(port: u16) -> bool {
    match timeout(PORT_PROBE_TIMEOUT, TcpListener::bind(("127.0.0.1", port))).await {
        Ok(Ok(_listener)) => false,
        Ok(Err(e)) => {
            debug!("Port {} probe: {}", port, e);
            true
        }
        Err(_) => true,
    }
}
