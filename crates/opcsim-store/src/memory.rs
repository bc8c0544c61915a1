//! ---
//! opcsim_section: "05-node-store"
//! opcsim_subsection: "module"
//! opcsim_type: "source"
//! opcsim_scope: "code"
//! opcsim_description: "In-memory catalog store backend."
//! opcsim_version: "v0.0.0-prealpha"
//! opcsim_owner: "tbd"
//! ---
use chrono::{DateTime, Utc};
use opcsim_model::{NodeId, NodeRecord, ServerConfig};
use parking_lot::RwLock;

use crate::{CatalogDocument, NodeStore, Result, ServerDocument, ValueUpdate};

/// Catalog store held entirely in memory; used by tests and embedders that
/// manage persistence themselves.
#[derive(Debug, Default)]
pub struct MemoryNodeStore {
    document: RwLock<CatalogDocument>,
}

impl MemoryNodeStore {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Store seeded with one server and its nodes.
    pub fn with_server(config: ServerConfig, nodes: Vec<NodeRecord>) -> Self {
        let store = Self::new();
        store.add_server(config, nodes);
        store
    }

    /// Add another server document to the catalog.
    pub fn add_server(&self, config: ServerConfig, nodes: Vec<NodeRecord>) {
        self.document
            .write()
            .servers
            .push(ServerDocument { config, nodes });
    }
}

impl NodeStore for MemoryNodeStore {
    fn servers(&self) -> Result<Vec<ServerConfig>> {
        Ok(self
            .document
            .read()
            .servers
            .iter()
            .map(|entry| entry.config.clone())
            .collect())
    }

    fn server(&self, server_id: &str) -> Result<ServerConfig> {
        Ok(self.document.read().server(server_id)?.config.clone())
    }

    fn nodes(&self, server_id: &str) -> Result<Vec<NodeRecord>> {
        Ok(self.document.read().server(server_id)?.nodes.clone())
    }

    fn upsert_node(&self, server_id: &str, node: NodeRecord) -> Result<()> {
        self.document.write().upsert_node(server_id, node)
    }

    fn remove_node(&self, server_id: &str, node_id: &NodeId) -> Result<bool> {
        self.document.write().remove_node(server_id, node_id)
    }

    fn update_value(
        &self,
        server_id: &str,
        node_id: &NodeId,
        value: &str,
        direction: Option<i8>,
    ) -> Result<()> {
        self.document
            .write()
            .update_value(server_id, node_id, value, direction)
    }

    fn update_values(&self, server_id: &str, updates: &[ValueUpdate]) -> Result<()> {
        self.document.write().update_values(server_id, updates)
    }

    fn set_running(
        &self,
        server_id: &str,
        running: bool,
        started_at: Option<DateTime<Utc>>,
    ) -> Result<()> {
        self.document
            .write()
            .set_running(server_id, running, started_at)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::StoreError;
    use opcsim_model::{DataType, NodeKind, VariationConfig, VariationKind};

    fn server(id: &str) -> ServerConfig {
        ServerConfig {
            id: id.to_owned(),
            name: id.to_owned(),
            host: "127.0.0.1".to_owned(),
            port: 4840,
            application_uri: format!("urn:opcsim:{id}"),
            allow_anonymous: true,
            username: None,
            password: None,
            min_sampling_interval_ms: 100,
            running: false,
            last_started_at: None,
        }
    }

    fn node(local: u64) -> NodeRecord {
        NodeRecord {
            node_id: NodeId::numeric(2, local),
            name: format!("node-{local}"),
            kind: NodeKind::Variable,
            data_type: DataType::Double,
            value: Some("1".to_owned()),
            description: None,
            variation: VariationConfig::default(),
        }
    }

    #[test]
    fn value_updates_do_not_touch_unrelated_fields() {
        let store = MemoryNodeStore::with_server(server("plant-a"), vec![node(1)]);
        store
            .update_value("plant-a", &NodeId::numeric(2, 1), "7.5", Some(-1))
            .unwrap();

        let nodes = store.nodes("plant-a").unwrap();
        assert_eq!(nodes[0].value.as_deref(), Some("7.5"));
        assert_eq!(nodes[0].variation.direction, -1);
        assert_eq!(nodes[0].name, "node-1");
    }

    #[test]
    fn batched_updates_apply_to_every_node() {
        let store = MemoryNodeStore::with_server(server("plant-a"), vec![node(1), node(2)]);
        store
            .update_values(
                "plant-a",
                &[
                    ValueUpdate {
                        node_id: NodeId::numeric(2, 1),
                        value: "2.5".to_owned(),
                        direction: Some(1),
                    },
                    ValueUpdate {
                        node_id: NodeId::numeric(2, 2),
                        value: "4.0".to_owned(),
                        direction: None,
                    },
                ],
            )
            .unwrap();

        let nodes = store.nodes("plant-a").unwrap();
        assert_eq!(nodes[0].value.as_deref(), Some("2.5"));
        assert_eq!(nodes[0].variation.direction, 1);
        assert_eq!(nodes[1].value.as_deref(), Some("4.0"));
    }

    #[test]
    fn upsert_replaces_by_identifier() {
        let store = MemoryNodeStore::with_server(server("plant-a"), vec![node(1)]);
        let mut replacement = node(1);
        replacement.name = "renamed".to_owned();
        store.upsert_node("plant-a", replacement).unwrap();

        let nodes = store.nodes("plant-a").unwrap();
        assert_eq!(nodes.len(), 1);
        assert_eq!(nodes[0].name, "renamed");
    }

    #[test]
    fn upsert_rejects_invalid_records() {
        let store = MemoryNodeStore::with_server(server("plant-a"), vec![]);
        let mut invalid = node(1);
        invalid.variation.kind = VariationKind::Linear;
        assert!(matches!(
            store.upsert_node("plant-a", invalid).unwrap_err(),
            StoreError::Model(_)
        ));
    }

    #[test]
    fn missing_server_is_reported() {
        let store = MemoryNodeStore::new();
        assert!(matches!(
            store.nodes("ghost").unwrap_err(),
            StoreError::ServerNotFound(_)
        ));
    }

    #[test]
    fn running_flag_and_timestamp_are_persisted() {
        let store = MemoryNodeStore::with_server(server("plant-a"), vec![]);
        let started = Utc::now();
        store.set_running("plant-a", true, Some(started)).unwrap();

        let config = store.server("plant-a").unwrap();
        assert!(config.running);
        assert_eq!(config.last_started_at, Some(started));

        // Stopping keeps the historical timestamp.
        store.set_running("plant-a", false, None).unwrap();
        let config = store.server("plant-a").unwrap();
        assert!(!config.running);
        assert_eq!(config.last_started_at, Some(started));
    }

    #[test]
    fn remove_reports_whether_a_record_existed() {
        let store = MemoryNodeStore::with_server(server("plant-a"), vec![node(1)]);
        assert!(store
            .remove_node("plant-a", &NodeId::numeric(2, 1))
            .unwrap());
        assert!(!store
            .remove_node("plant-a", &NodeId::numeric(2, 1))
            .unwrap());
    }
}
