//! The coordination store seam.
//!
//! [`CoordinationStore`] is the small slice of a ZooKeeper-style client that
//! registration needs. It is not meant to be used by applications directly;
//! [`RegistrationClient`] wraps it and keeps track of the node it owns.
//!
//! [`RegistrationClient`]: crate::RegistrationClient

use async_trait::async_trait;

use crate::error::RegistryResult;

/// How a node is created.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CreateMode {
    /// Survives the session that created it.
    Persistent,
    /// Removed by the store when the creating session ends.
    Ephemeral,
    /// Persistent, with a store-assigned counter appended to the name.
    PersistentSequential,
    /// Ephemeral, with a store-assigned counter appended to the name.
    EphemeralSequential,
}

impl CreateMode {
    /// Whether the node is bound to the creating session.
    pub fn is_ephemeral(self) -> bool {
        matches!(self, CreateMode::Ephemeral | CreateMode::EphemeralSequential)
    }

    /// Whether the store appends a counter to the requested name.
    pub fn is_sequential(self) -> bool {
        matches!(
            self,
            CreateMode::PersistentSequential | CreateMode::EphemeralSequential
        )
    }
}

/// Node metadata returned by [`CoordinationStore::exists`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct NodeStat {
    /// Data version, bumped on every write of the payload.
    pub version: i32,
    /// Session id of the owner for ephemeral nodes, `0` otherwise.
    pub ephemeral_owner: i64,
    /// Payload length in bytes.
    pub data_length: i32,
    /// Number of direct children.
    pub num_children: i32,
}

impl NodeStat {
    /// Whether the node is bound to a session.
    pub fn is_ephemeral(&self) -> bool {
        self.ephemeral_owner != 0
    }
}

/// Operations consumed from the coordination service.
///
/// All access control is open; deletes never check versions.
#[async_trait]
pub trait CoordinationStore: Send + Sync + 'static {
    /// Metadata of the node at `path`, `None` if there is no such node.
    async fn exists(&self, path: &str) -> RegistryResult<Option<NodeStat>>;

    /// Create a node and return the path actually assigned, which differs
    /// from `path` for sequential modes.
    async fn create(&self, path: &str, data: &[u8], mode: CreateMode) -> RegistryResult<String>;

    /// Delete the node at `path` regardless of its version.
    async fn delete(&self, path: &str) -> RegistryResult<()>;

    /// Names (not paths) of the direct children of `path`.
    async fn children(&self, path: &str) -> RegistryResult<Vec<String>>;

    /// Payload of the node at `path`.
    async fn get_data(&self, path: &str) -> RegistryResult<Vec<u8>>;

    /// End the session. Ephemeral nodes it owns are removed by the store.
    async fn close(&self) -> RegistryResult<()>;
}
