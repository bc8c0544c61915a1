//! ---
//! opcsim_section: "06-server-runtime"
//! opcsim_subsection: "module"
//! opcsim_type: "source"
//! opcsim_scope: "code"
//! opcsim_description: "Server instance lifecycle and registry runtime."
//! opcsim_version: "v0.0.0-prealpha"
//! opcsim_owner: "tbd"
//! ---
use std::collections::HashMap;
use std::sync::Arc;

use opcsim_common::SimulationConfig;
use opcsim_space::InMemoryAddressSpace;
use opcsim_store::{NodeStore, StoreError};
use thiserror::Error;
use tracing::{info, warn};

use crate::instance::{CoreError, LifecycleState, ServerInstance};

/// Errors surfaced by the registry surface.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// No catalog entry exists for the requested server id.
    #[error("server '{0}' is not configured")]
    NotFound(String),
    /// A lifecycle operation on the instance failed.
    #[error(transparent)]
    Core(#[from] CoreError),
    /// Catalog access failed.
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Per-server outcome of a batch lifecycle operation. Failures never abort
/// the batch; each server is reported individually.
#[derive(Debug, Default)]
pub struct BatchOutcome {
    /// Servers the operation succeeded for.
    pub succeeded: Vec<String>,
    /// Servers the operation failed for, with the reason.
    pub failed: Vec<(String, RegistryError)>,
}

impl BatchOutcome {
    /// Whether every server in the batch succeeded.
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Maps catalog server ids onto live [`ServerInstance`]s.
///
/// Instances are created lazily on first use, each over a fresh address
/// space, and survive stop/start cycles so handles held by callers stay
/// valid across restarts.
pub struct InstanceRegistry {
    store: Arc<dyn NodeStore>,
    instances: tokio::sync::Mutex<HashMap<String, Arc<ServerInstance>>>,
    settings: SimulationConfig,
}

impl InstanceRegistry {
    /// Build a registry over a catalog store.
    pub fn new(store: Arc<dyn NodeStore>, settings: SimulationConfig) -> Self {
        Self {
            store,
            instances: tokio::sync::Mutex::new(HashMap::new()),
            settings,
        }
    }

    /// Instance for a configured server, creating it on first use.
    pub async fn instance(&self, server_id: &str) -> Result<Arc<ServerInstance>, RegistryError> {
        let mut instances = self.instances.lock().await;
        if let Some(instance) = instances.get(server_id) {
            return Ok(instance.clone());
        }
        // Creation is gated on the catalog so a typo'd id fails loudly
        // instead of producing an empty phantom server.
        match self.store.server(server_id) {
            Ok(_) => {}
            Err(StoreError::ServerNotFound(id)) => return Err(RegistryError::NotFound(id)),
            Err(err) => return Err(err.into()),
        }
        let instance = Arc::new(ServerInstance::new(
            server_id,
            self.store.clone(),
            Arc::new(InMemoryAddressSpace::new()),
            self.settings.clone(),
        ));
        instances.insert(server_id.to_owned(), instance.clone());
        Ok(instance)
    }

    /// Start one server.
    pub async fn start(&self, server_id: &str) -> Result<(), RegistryError> {
        let instance = self.instance(server_id).await?;
        instance.start().await?;
        Ok(())
    }

    /// Stop one server. Unknown-but-configured servers are a no-op stop.
    pub async fn stop(&self, server_id: &str) -> Result<(), RegistryError> {
        let instance = self.instance(server_id).await?;
        instance.stop().await?;
        Ok(())
    }

    /// Restart one server.
    pub async fn restart(&self, server_id: &str) -> Result<(), RegistryError> {
        let instance = self.instance(server_id).await?;
        instance.restart().await?;
        Ok(())
    }

    /// Stop a server and forget its instance. The catalog entry survives;
    /// a later start builds a fresh instance from it.
    pub async fn remove(&self, server_id: &str) -> Result<(), RegistryError> {
        let instance = {
            let mut instances = self.instances.lock().await;
            instances.remove(server_id)
        };
        if let Some(instance) = instance {
            instance.stop().await?;
        }
        Ok(())
    }

    /// Start every listed server, reporting per-server outcomes.
    pub async fn start_many(&self, server_ids: &[String]) -> BatchOutcome {
        let mut outcome = BatchOutcome::default();
        for server_id in server_ids {
            match self.start(server_id).await {
                Ok(()) => outcome.succeeded.push(server_id.clone()),
                Err(err) => {
                    warn!(server = %server_id, error = %err, "batch start failed for server");
                    outcome.failed.push((server_id.clone(), err));
                }
            }
        }
        outcome
    }

    /// Stop every listed server, reporting per-server outcomes.
    pub async fn stop_many(&self, server_ids: &[String]) -> BatchOutcome {
        let mut outcome = BatchOutcome::default();
        for server_id in server_ids {
            match self.stop(server_id).await {
                Ok(()) => outcome.succeeded.push(server_id.clone()),
                Err(err) => {
                    warn!(server = %server_id, error = %err, "batch stop failed for server");
                    outcome.failed.push((server_id.clone(), err));
                }
            }
        }
        outcome
    }

    /// Start every catalog server whose persisted running flag is set.
    /// Used at daemon boot to restore the pre-restart topology.
    pub async fn start_flagged(&self) -> Result<BatchOutcome, RegistryError> {
        let flagged: Vec<String> = self
            .store
            .servers()?
            .into_iter()
            .filter(|config| config.running)
            .map(|config| config.id)
            .collect();
        if !flagged.is_empty() {
            info!(count = flagged.len(), "restoring previously running servers");
        }
        Ok(self.start_many(&flagged).await)
    }

    /// Lifecycle state of every instantiated server.
    pub async fn states(&self) -> Vec<(String, LifecycleState)> {
        let instances = self.instances.lock().await;
        instances
            .iter()
            .map(|(id, instance)| (id.clone(), instance.state()))
            .collect()
    }

    /// Stop every instantiated server; used on daemon shutdown.
    pub async fn shutdown_all(&self) {
        let instances: Vec<Arc<ServerInstance>> = {
            let instances = self.instances.lock().await;
            instances.values().cloned().collect()
        };
        for instance in instances {
            if let Err(err) = instance.stop().await {
                warn!(server = %instance.server_id(), error = %err, "shutdown stop failed");
            }
        }
    }
}

impl std::fmt::Debug for InstanceRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InstanceRegistry").finish_non_exhaustive()
    }
}
