//! ---
//! opcsim_section: "04-address-space"
//! opcsim_subsection: "module"
//! opcsim_type: "source"
//! opcsim_scope: "code"
//! opcsim_description: "In-memory address-space backend."
//! opcsim_version: "v0.0.0-prealpha"
//! opcsim_owner: "tbd"
//! ---
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use opcsim_model::{DataType, NodeId, TypedValue};
use parking_lot::RwLock;

use crate::{AddressSpace, EntryHandle, Result, SpaceError};

#[derive(Debug, Clone)]
enum EntryPayload {
    Variable {
        data_type: DataType,
        value: TypedValue,
    },
    Object,
}

#[derive(Debug, Clone)]
struct Entry {
    generation: u64,
    #[allow(dead_code)]
    name: String,
    payload: EntryPayload,
}

/// Always-consistent in-memory address space.
///
/// One instance backs one running server; the registry creates a fresh one
/// per server instance and the instance clears it on stop.
#[derive(Debug, Default)]
pub struct InMemoryAddressSpace {
    entries: RwLock<HashMap<NodeId, Entry>>,
    next_generation: AtomicU64,
}

impl InMemoryAddressSpace {
    /// Create an empty address space.
    pub fn new() -> Self {
        Self::default()
    }

    fn insert(&self, id: &NodeId, name: &str, payload: EntryPayload) -> Result<EntryHandle> {
        let mut entries = self.entries.write();
        if entries.contains_key(id) {
            return Err(SpaceError::Duplicate(id.clone()));
        }
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        entries.insert(
            id.clone(),
            Entry {
                generation,
                name: name.to_owned(),
                payload,
            },
        );
        Ok(EntryHandle::new(id.clone(), generation))
    }
}

impl AddressSpace for InMemoryAddressSpace {
    fn create_variable(
        &self,
        id: &NodeId,
        name: &str,
        initial: TypedValue,
        data_type: DataType,
    ) -> Result<EntryHandle> {
        if initial.data_type() != data_type {
            return Err(SpaceError::TypeMismatch {
                id: id.clone(),
                declared: data_type,
                actual: initial.data_type(),
            });
        }
        self.insert(
            id,
            name,
            EntryPayload::Variable {
                data_type,
                value: initial,
            },
        )
    }

    fn create_object(&self, id: &NodeId, name: &str) -> Result<EntryHandle> {
        self.insert(id, name, EntryPayload::Object)
    }

    fn remove(&self, handle: &EntryHandle) -> Result<()> {
        let mut entries = self.entries.write();
        match entries.get(handle.node_id()) {
            Some(entry) if entry.generation == handle.generation() => {
                entries.remove(handle.node_id());
                Ok(())
            }
            Some(_) => Err(SpaceError::StaleHandle(handle.node_id().clone())),
            None => Err(SpaceError::NotFound(handle.node_id().clone())),
        }
    }

    fn read(&self, handle: &EntryHandle) -> Result<TypedValue> {
        let entries = self.entries.read();
        let entry = match entries.get(handle.node_id()) {
            Some(entry) if entry.generation == handle.generation() => entry,
            Some(_) => return Err(SpaceError::StaleHandle(handle.node_id().clone())),
            None => return Err(SpaceError::NotFound(handle.node_id().clone())),
        };
        match &entry.payload {
            EntryPayload::Variable { value, .. } => Ok(value.clone()),
            EntryPayload::Object => Err(SpaceError::NotAVariable(handle.node_id().clone())),
        }
    }

    fn write(&self, handle: &EntryHandle, value: TypedValue) -> Result<()> {
        let mut entries = self.entries.write();
        let entry = match entries.get_mut(handle.node_id()) {
            Some(entry) if entry.generation == handle.generation() => entry,
            Some(_) => return Err(SpaceError::StaleHandle(handle.node_id().clone())),
            None => return Err(SpaceError::NotFound(handle.node_id().clone())),
        };
        match &mut entry.payload {
            EntryPayload::Variable {
                data_type,
                value: stored,
            } => {
                if value.data_type() != *data_type {
                    return Err(SpaceError::TypeMismatch {
                        id: handle.node_id().clone(),
                        declared: *data_type,
                        actual: value.data_type(),
                    });
                }
                *stored = value;
                Ok(())
            }
            EntryPayload::Object => Err(SpaceError::NotAVariable(handle.node_id().clone())),
        }
    }

    fn lookup(&self, id: &NodeId) -> Option<EntryHandle> {
        self.entries
            .read()
            .get(id)
            .map(|entry| EntryHandle::new(id.clone(), entry.generation))
    }

    fn len(&self) -> usize {
        self.entries.read().len()
    }

    fn clear(&self) {
        self.entries.write().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn space() -> InMemoryAddressSpace {
        InMemoryAddressSpace::new()
    }

    #[test]
    fn create_read_write_round_trip() {
        let space = space();
        let id = NodeId::numeric(2, 7);
        let handle = space
            .create_variable(&id, "pressure", TypedValue::Double(1.5), DataType::Double)
            .unwrap();

        assert_eq!(space.read(&handle).unwrap(), TypedValue::Double(1.5));
        space.write(&handle, TypedValue::Double(2.5)).unwrap();
        assert_eq!(space.read(&handle).unwrap(), TypedValue::Double(2.5));
    }

    #[test]
    fn duplicate_identifiers_are_rejected() {
        let space = space();
        let id = NodeId::text(1, "Line1.Speed");
        space
            .create_variable(&id, "speed", TypedValue::Int32(0), DataType::Int32)
            .unwrap();
        assert!(matches!(
            space.create_object(&id, "speed"),
            Err(SpaceError::Duplicate(_))
        ));
    }

    #[test]
    fn writes_enforce_the_declared_type() {
        let space = space();
        let id = NodeId::numeric(2, 9);
        let handle = space
            .create_variable(&id, "count", TypedValue::UInt32(1), DataType::UInt32)
            .unwrap();
        assert!(matches!(
            space.write(&handle, TypedValue::Bool(true)),
            Err(SpaceError::TypeMismatch { .. })
        ));
    }

    #[test]
    fn object_entries_reject_value_operations() {
        let space = space();
        let id = NodeId::text(1, "Plant");
        let handle = space.create_object(&id, "Plant").unwrap();
        assert!(matches!(
            space.read(&handle),
            Err(SpaceError::NotAVariable(_))
        ));
        assert!(matches!(
            space.write(&handle, TypedValue::Bool(true)),
            Err(SpaceError::NotAVariable(_))
        ));
    }

    #[test]
    fn stale_handles_are_detected_after_recreate() {
        let space = space();
        let id = NodeId::numeric(2, 11);
        let first = space
            .create_variable(&id, "level", TypedValue::Double(0.0), DataType::Double)
            .unwrap();
        space.remove(&first).unwrap();
        let _second = space
            .create_variable(&id, "level", TypedValue::Double(1.0), DataType::Double)
            .unwrap();

        assert!(matches!(
            space.write(&first, TypedValue::Double(9.0)),
            Err(SpaceError::StaleHandle(_))
        ));
    }

    #[test]
    fn lookup_and_clear_cover_rebuilds() {
        let space = space();
        let id = NodeId::numeric(2, 13);
        let handle = space
            .create_variable(&id, "flow", TypedValue::Float(0.0), DataType::Float)
            .unwrap();
        assert_eq!(space.lookup(&id), Some(handle));
        assert_eq!(space.len(), 1);

        space.clear();
        assert!(space.is_empty());
        assert_eq!(space.lookup(&id), None);
    }
}
