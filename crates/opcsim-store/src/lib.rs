//! ---
//! opcsim_section: "05-node-store"
//! opcsim_subsection: "module"
//! opcsim_type: "source"
//! opcsim_scope: "code"
//! opcsim_description: "Catalog store trait and shared document model."
//! opcsim_version: "v0.0.0-prealpha"
//! opcsim_owner: "tbd"
//! ---
//! Persistence collaborator for the OPC-Sim runtime.
//!
//! The runtime never touches storage directly; it goes through [`NodeStore`],
//! which promises record-level atomicity for single-node updates. Two
//! backends ship here: an in-memory store for tests and embedding, and a
//! JSON-document store matching the operator-editable catalog file.

pub mod json;
pub mod memory;

pub use json::JsonNodeStore;
pub use memory::MemoryNodeStore;

use chrono::{DateTime, Utc};
use opcsim_model::{ModelError, NodeId, NodeRecord, ServerConfig};
use serde::{Deserialize, Serialize};

/// Result alias used throughout the store crate.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Error type for the catalog store.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Wrapper for IO errors while reading/writing the catalog document.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// Wrapper for JSON document issues.
    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
    /// Referenced server configuration does not exist.
    #[error("server '{0}' not found")]
    ServerNotFound(String),
    /// Referenced node does not exist on the server.
    #[error("node {node_id} not found on server '{server_id}'")]
    NodeNotFound {
        /// Owning server.
        server_id: String,
        /// Missing node identifier.
        node_id: NodeId,
    },
    /// A record failed model validation at the store boundary.
    #[error(transparent)]
    Model(#[from] ModelError),
}

/// Catalog access used by the registry, the server instances, and the
/// update loop. Single-node updates are atomic at the record level and do
/// not touch unrelated fields.
pub trait NodeStore: Send + Sync {
    /// All server configurations.
    fn servers(&self) -> Result<Vec<ServerConfig>>;

    /// One server configuration by id.
    fn server(&self, server_id: &str) -> Result<ServerConfig>;

    /// All node records belonging to a server.
    fn nodes(&self, server_id: &str) -> Result<Vec<NodeRecord>>;

    /// Insert or replace a node record, validating it first.
    fn upsert_node(&self, server_id: &str, node: NodeRecord) -> Result<()>;

    /// Remove a node record; returns whether a record was removed.
    fn remove_node(&self, server_id: &str, node_id: &NodeId) -> Result<bool>;

    /// Persist a new canonical value, and the direction flag when the
    /// waveform flipped it, without touching unrelated fields.
    fn update_value(
        &self,
        server_id: &str,
        node_id: &NodeId,
        value: &str,
        direction: Option<i8>,
    ) -> Result<()>;

    /// Persist a whole tick's worth of value updates. Backends that pay per
    /// write should override this to commit the batch in one pass; the
    /// default applies the updates one by one.
    fn update_values(&self, server_id: &str, updates: &[ValueUpdate]) -> Result<()> {
        for update in updates {
            self.update_value(server_id, &update.node_id, &update.value, update.direction)?;
        }
        Ok(())
    }

    /// Record the running flag and last-start timestamp for a server.
    fn set_running(
        &self,
        server_id: &str,
        running: bool,
        started_at: Option<DateTime<Utc>>,
    ) -> Result<()>;
}

/// One value mutation inside a batched tick commit.
#[derive(Debug, Clone)]
pub struct ValueUpdate {
    /// Node whose value advanced this tick.
    pub node_id: NodeId,
    /// New canonical value string.
    pub value: String,
    /// Direction flag to persist when the waveform flipped it.
    pub direction: Option<i8>,
}

/// Current catalog document version.
pub const CATALOG_VERSION: u16 = 1;

fn default_catalog_version() -> u16 {
    CATALOG_VERSION
}

/// One server and its nodes inside the catalog document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerDocument {
    /// Server endpoint configuration.
    #[serde(flatten)]
    pub config: ServerConfig,
    /// Node records hosted by this server.
    #[serde(default)]
    pub nodes: Vec<NodeRecord>,
}

/// The operator-editable catalog document shared by both backends.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CatalogDocument {
    /// Document version for forward-compatible migrations.
    #[serde(default = "default_catalog_version")]
    pub version: u16,
    /// All configured servers.
    #[serde(default)]
    pub servers: Vec<ServerDocument>,
}

impl CatalogDocument {
    fn server(&self, server_id: &str) -> Result<&ServerDocument> {
        self.servers
            .iter()
            .find(|entry| entry.config.id == server_id)
            .ok_or_else(|| StoreError::ServerNotFound(server_id.to_owned()))
    }

    fn server_mut(&mut self, server_id: &str) -> Result<&mut ServerDocument> {
        self.servers
            .iter_mut()
            .find(|entry| entry.config.id == server_id)
            .ok_or_else(|| StoreError::ServerNotFound(server_id.to_owned()))
    }

    fn upsert_node(&mut self, server_id: &str, node: NodeRecord) -> Result<()> {
        node.validate()?;
        let server = self.server_mut(server_id)?;
        match server
            .nodes
            .iter_mut()
            .find(|existing| existing.node_id == node.node_id)
        {
            Some(existing) => *existing = node,
            None => server.nodes.push(node),
        }
        Ok(())
    }

    fn remove_node(&mut self, server_id: &str, node_id: &NodeId) -> Result<bool> {
        let server = self.server_mut(server_id)?;
        let before = server.nodes.len();
        server.nodes.retain(|node| node.node_id != *node_id);
        Ok(server.nodes.len() < before)
    }

    fn update_value(
        &mut self,
        server_id: &str,
        node_id: &NodeId,
        value: &str,
        direction: Option<i8>,
    ) -> Result<()> {
        let server = self.server_mut(server_id)?;
        let node = server
            .nodes
            .iter_mut()
            .find(|node| node.node_id == *node_id)
            .ok_or_else(|| StoreError::NodeNotFound {
                server_id: server_id.to_owned(),
                node_id: node_id.clone(),
            })?;
        node.value = Some(value.to_owned());
        if let Some(direction) = direction {
            node.variation.direction = direction;
        }
        Ok(())
    }

    fn update_values(&mut self, server_id: &str, updates: &[ValueUpdate]) -> Result<()> {
        for update in updates {
            self.update_value(server_id, &update.node_id, &update.value, update.direction)?;
        }
        Ok(())
    }

    fn set_running(
        &mut self,
        server_id: &str,
        running: bool,
        started_at: Option<DateTime<Utc>>,
    ) -> Result<()> {
        let server = self.server_mut(server_id)?;
        server.config.running = running;
        if started_at.is_some() {
            server.config.last_started_at = started_at;
        }
        Ok(())
    }
}
