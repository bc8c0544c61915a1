//! ---
//! opcsim_section: "05-node-store"
//! opcsim_subsection: "module"
//! opcsim_type: "source"
//! opcsim_scope: "code"
//! opcsim_description: "JSON-document catalog store backend."
//! opcsim_version: "v0.0.0-prealpha"
//! opcsim_owner: "tbd"
//! ---
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use opcsim_model::{validate_unique_endpoints, NodeId, NodeRecord, ServerConfig};
use parking_lot::Mutex;
use tracing::{debug, info};

use crate::{CatalogDocument, NodeStore, Result, ValueUpdate};

/// Catalog store backed by a single operator-editable JSON document.
///
/// Every mutation rewrites the document through a sibling temp file and an
/// atomic rename, so a crash mid-write never leaves a torn catalog behind.
#[derive(Debug)]
pub struct JsonNodeStore {
    path: PathBuf,
    document: Mutex<CatalogDocument>,
}

impl JsonNodeStore {
    /// Open the catalog at `path`, creating an empty document when the file
    /// does not exist yet. Endpoint uniqueness is validated on load.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let document = if path.exists() {
            let contents = fs::read_to_string(&path)?;
            let document: CatalogDocument = serde_json::from_str(&contents)?;
            let configs: Vec<ServerConfig> = document
                .servers
                .iter()
                .map(|entry| entry.config.clone())
                .collect();
            validate_unique_endpoints(&configs)?;
            info!(catalog = %path.display(), servers = document.servers.len(), "catalog loaded");
            document
        } else {
            info!(catalog = %path.display(), "catalog missing; starting empty");
            let document = CatalogDocument::default();
            write_document(&path, &document)?;
            document
        };
        Ok(Self {
            path,
            document: Mutex::new(document),
        })
    }

    /// Filesystem location of the catalog document.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn mutate<T>(&self, apply: impl FnOnce(&mut CatalogDocument) -> Result<T>) -> Result<T> {
        let mut document = self.document.lock();
        let outcome = apply(&mut document)?;
        write_document(&self.path, &document)?;
        Ok(outcome)
    }
}

fn write_document(path: &Path, document: &CatalogDocument) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    let staged = path.with_extension("json.tmp");
    fs::write(&staged, serde_json::to_vec_pretty(document)?)?;
    fs::rename(&staged, path)?;
    debug!(catalog = %path.display(), "catalog written");
    Ok(())
}

impl NodeStore for JsonNodeStore {
    fn servers(&self) -> Result<Vec<ServerConfig>> {
        Ok(self
            .document
            .lock()
            .servers
            .iter()
            .map(|entry| entry.config.clone())
            .collect())
    }

    fn server(&self, server_id: &str) -> Result<ServerConfig> {
        Ok(self.document.lock().server(server_id)?.config.clone())
    }

    fn nodes(&self, server_id: &str) -> Result<Vec<NodeRecord>> {
        Ok(self.document.lock().server(server_id)?.nodes.clone())
    }

    fn upsert_node(&self, server_id: &str, node: NodeRecord) -> Result<()> {
        self.mutate(|document| document.upsert_node(server_id, node))
    }

    fn remove_node(&self, server_id: &str, node_id: &NodeId) -> Result<bool> {
        self.mutate(|document| document.remove_node(server_id, node_id))
    }

    fn update_value(
        &self,
        server_id: &str,
        node_id: &NodeId,
        value: &str,
        direction: Option<i8>,
    ) -> Result<()> {
        self.mutate(|document| document.update_value(server_id, node_id, value, direction))
    }

    // A whole tick is committed through one lock/rewrite pass instead of one
    // document rewrite per node.
    fn update_values(&self, server_id: &str, updates: &[ValueUpdate]) -> Result<()> {
        if updates.is_empty() {
            return Ok(());
        }
        self.mutate(|document| document.update_values(server_id, updates))
    }

    fn set_running(
        &self,
        server_id: &str,
        running: bool,
        started_at: Option<DateTime<Utc>>,
    ) -> Result<()> {
        self.mutate(|document| document.set_running(server_id, running, started_at))
    }
}
