//! ---
//! opcsim_section: "04-address-space"
//! opcsim_subsection: "module"
//! opcsim_type: "source"
//! opcsim_scope: "code"
//! opcsim_description: "Address-space capability trait and entry handles."
//! opcsim_version: "v0.0.0-prealpha"
//! opcsim_owner: "tbd"
//! ---
//! Thin capability interface over the protocol library's address space.
//!
//! The server instance only ever talks to this trait; everything
//! protocol-specific (encoding, browse semantics, subscriptions) stays on
//! the other side of it. The in-memory backend in [`memory`] is the
//! implementation used by the simulation runtime and by tests.

pub mod memory;

pub use memory::InMemoryAddressSpace;

use opcsim_model::{DataType, NodeId, TypedValue};

/// Result alias used throughout the address-space crate.
pub type Result<T> = std::result::Result<T, SpaceError>;

/// Adapter-level failures. Never swallowed silently; callers decide
/// between surfacing and skip-and-continue.
#[derive(Debug, thiserror::Error)]
pub enum SpaceError {
    /// An entry with the same identifier already exists.
    #[error("address-space entry {0} already exists")]
    Duplicate(NodeId),
    /// No entry exists for the identifier.
    #[error("address-space entry {0} not found")]
    NotFound(NodeId),
    /// The handle refers to an entry generation that has been deleted.
    #[error("stale handle for address-space entry {0}")]
    StaleHandle(NodeId),
    /// A write supplied a value of the wrong type.
    #[error("cannot write {actual} value to entry {id} declared as {declared}")]
    TypeMismatch {
        /// Target entry.
        id: NodeId,
        /// Declared entry type.
        declared: DataType,
        /// Type of the rejected value.
        actual: DataType,
    },
    /// Value operations are only valid on variable entries.
    #[error("address-space entry {0} is not a variable")]
    NotAVariable(NodeId),
}

/// Reference to a created address-space item.
///
/// Handles carry a generation so that a handle left over from a deleted
/// entry is detected as stale instead of silently touching a re-created
/// entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EntryHandle {
    node_id: NodeId,
    generation: u64,
}

impl EntryHandle {
    pub(crate) fn new(node_id: NodeId, generation: u64) -> Self {
        Self {
            node_id,
            generation,
        }
    }

    /// Identifier of the entry this handle points at.
    pub fn node_id(&self) -> &NodeId {
        &self.node_id
    }

    pub(crate) fn generation(&self) -> u64 {
        self.generation
    }
}

/// Capability interface over one server's address space.
pub trait AddressSpace: Send + Sync {
    /// Create a variable entry holding `initial`.
    fn create_variable(
        &self,
        id: &NodeId,
        name: &str,
        initial: TypedValue,
        data_type: DataType,
    ) -> Result<EntryHandle>;

    /// Create an object entry.
    fn create_object(&self, id: &NodeId, name: &str) -> Result<EntryHandle>;

    /// Delete the entry behind `handle`.
    fn remove(&self, handle: &EntryHandle) -> Result<()>;

    /// Read the current value of a variable entry.
    fn read(&self, handle: &EntryHandle) -> Result<TypedValue>;

    /// Write a value into a variable entry; the value type must match the
    /// declared entry type.
    fn write(&self, handle: &EntryHandle, value: TypedValue) -> Result<()>;

    /// Handle for an existing entry, if present. Used by the idempotent
    /// start-time rebuild to skip entries left over from a partial attempt.
    fn lookup(&self, id: &NodeId) -> Option<EntryHandle>;

    /// Number of live entries.
    fn len(&self) -> usize;

    /// Whether the space holds no entries.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every entry; used on stop and on failed-start rollback.
    fn clear(&self);
}
