//! In-process coordination store.
//!
//! Keeps a hierarchical namespace in memory with the same node semantics the
//! registration client relies on from ZooKeeper: persistent and ephemeral
//! nodes, per-parent sequence counters, and session-scoped cleanup. Handles
//! created with [`MemoryStore::session`] share the namespace but own separate
//! sessions, so several "servers" can be simulated in one process.

use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tracing::debug;

use crate::error::{RegistryError, RegistryResult};
use crate::path;
use crate::store::{CoordinationStore, CreateMode, NodeStat};

/// Counts of store calls, for asserting how much work an operation did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreStats {
    pub exists: u64,
    pub creates: u64,
    pub deletes: u64,
}

#[derive(Debug)]
struct Namespace {
    nodes: BTreeMap<String, MemoryNode>,
    next_session: i64,
    closed: HashSet<i64>,
    stats: StoreStats,
}

#[derive(Debug, Clone, Default)]
struct MemoryNode {
    data: Vec<u8>,
    version: i32,
    ephemeral_owner: i64,
    next_sequence: u64,
}

impl Namespace {
    fn new() -> Self {
        let mut nodes = BTreeMap::new();
        nodes.insert("/".to_owned(), MemoryNode::default());
        Self {
            nodes,
            next_session: 1,
            closed: HashSet::new(),
            stats: StoreStats::default(),
        }
    }

    fn open_session(&mut self) -> i64 {
        let id = self.next_session;
        self.next_session += 1;
        id
    }

    fn child_names(&self, parent: &str) -> Vec<String> {
        let prefix = if parent == "/" {
            "/".to_owned()
        } else {
            format!("{parent}/")
        };
        self.nodes
            .range(prefix.clone()..)
            .take_while(|(key, _)| key.starts_with(&prefix))
            .filter_map(|(key, _)| {
                let rest = &key[prefix.len()..];
                (!rest.is_empty() && !rest.contains('/')).then(|| rest.to_owned())
            })
            .collect()
    }

    fn drop_ephemerals(&mut self, session: i64) -> usize {
        let before = self.nodes.len();
        self.nodes
            .retain(|_, node| node.ephemeral_owner != session);
        before - self.nodes.len()
    }

    fn stat(&self, path: &str, node: &MemoryNode) -> NodeStat {
        NodeStat {
            version: node.version,
            ephemeral_owner: node.ephemeral_owner,
            data_length: stat_count(node.data.len()),
            num_children: stat_count(self.child_names(path).len()),
        }
    }
}

/// Counts in a [`NodeStat`] are `i32`, as on the ZooKeeper wire; larger
/// values saturate.
fn stat_count(n: usize) -> i32 {
    i32::try_from(n).unwrap_or(i32::MAX)
}

/// A coordination store living entirely in memory.
///
/// Clones share both the namespace and the session.
#[derive(Debug, Clone)]
pub struct MemoryStore {
    inner: Arc<Mutex<Namespace>>,
    session: Arc<AtomicI64>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    /// Fresh namespace containing only `/`, with one open session.
    pub fn new() -> Self {
        let mut ns = Namespace::new();
        let session = ns.open_session();
        Self {
            inner: Arc::new(Mutex::new(ns)),
            session: Arc::new(AtomicI64::new(session)),
        }
    }

    /// New handle on the same namespace with its own session.
    pub fn session(&self) -> Self {
        let session = self
            .inner
            .lock()
            .expect("memory store lock poisoned")
            .open_session();
        Self {
            inner: Arc::clone(&self.inner),
            session: Arc::new(AtomicI64::new(session)),
        }
    }

    /// Current session id of this handle.
    pub fn session_id(&self) -> i64 {
        self.session.load(Ordering::SeqCst)
    }

    /// Simulate the store expiring this handle's session: every ephemeral
    /// node it owns is removed, and the handle carries on under a new
    /// session as a reconnecting client would.
    pub fn expire_session(&self) {
        let mut ns = self.inner.lock().expect("memory store lock poisoned");
        let old = self.session.load(Ordering::SeqCst);
        let removed = ns.drop_ephemerals(old);
        ns.closed.insert(old);
        let new = ns.open_session();
        self.session.store(new, Ordering::SeqCst);
        debug!(old, new, removed, "memory session expired");
    }

    /// Snapshot of call counters across every session on this namespace.
    pub fn stats(&self) -> StoreStats {
        self.inner.lock().expect("memory store lock poisoned").stats
    }

    fn live_session(&self, ns: &Namespace) -> RegistryResult<i64> {
        let session = self.session.load(Ordering::SeqCst);
        if ns.closed.contains(&session) {
            return Err(RegistryError::SessionExpired(format!(
                "memory session {session:#x} is closed"
            )));
        }
        Ok(session)
    }
}

#[async_trait]
impl CoordinationStore for MemoryStore {
    async fn exists(&self, path: &str) -> RegistryResult<Option<NodeStat>> {
        path::validate(path)?;
        let mut ns = self.inner.lock().expect("memory store lock poisoned");
        self.live_session(&ns)?;
        ns.stats.exists += 1;
        Ok(ns.nodes.get(path).map(|node| ns.stat(path, node)))
    }

    async fn create(&self, path: &str, data: &[u8], mode: CreateMode) -> RegistryResult<String> {
        let mut ns = self.inner.lock().expect("memory store lock poisoned");
        let session = self.live_session(&ns)?;
        ns.stats.creates += 1;

        // sequential names may end with '/', the counter completes them
        if mode.is_sequential() {
            path::validate(&format!("{path}0"))?;
        } else {
            path::validate(path)?;
        }
        let parent_path = path::parent(path).to_owned();
        let parent = ns
            .nodes
            .get_mut(&parent_path)
            .ok_or_else(|| RegistryError::NoNode {
                path: parent_path.clone(),
            })?;
        if parent.ephemeral_owner != 0 {
            return Err(RegistryError::Protocol(format!(
                "ephemeral node '{parent_path}' cannot have children"
            )));
        }

        let assigned = if mode.is_sequential() {
            parent.next_sequence += 1;
            path::sequential_name(path, parent.next_sequence)
        } else {
            path.to_owned()
        };
        if ns.nodes.contains_key(&assigned) {
            return Err(RegistryError::NodeExists { path: assigned });
        }

        ns.nodes.insert(
            assigned.clone(),
            MemoryNode {
                data: data.to_vec(),
                version: 0,
                ephemeral_owner: if mode.is_ephemeral() { session } else { 0 },
                next_sequence: 0,
            },
        );
        Ok(assigned)
    }

    async fn delete(&self, path: &str) -> RegistryResult<()> {
        path::validate(path)?;
        let mut ns = self.inner.lock().expect("memory store lock poisoned");
        self.live_session(&ns)?;
        ns.stats.deletes += 1;

        if path == "/" {
            return Err(RegistryError::Protocol("cannot delete '/'".into()));
        }
        if !ns.nodes.contains_key(path) {
            return Err(RegistryError::NoNode {
                path: path.to_owned(),
            });
        }
        if !ns.child_names(path).is_empty() {
            return Err(RegistryError::Protocol(format!(
                "node '{path}' has children"
            )));
        }
        ns.nodes.remove(path);
        Ok(())
    }

    async fn children(&self, path: &str) -> RegistryResult<Vec<String>> {
        path::validate(path)?;
        let ns = self.inner.lock().expect("memory store lock poisoned");
        self.live_session(&ns)?;
        if !ns.nodes.contains_key(path) {
            return Err(RegistryError::NoNode {
                path: path.to_owned(),
            });
        }
        Ok(ns.child_names(path))
    }

    async fn get_data(&self, path: &str) -> RegistryResult<Vec<u8>> {
        path::validate(path)?;
        let ns = self.inner.lock().expect("memory store lock poisoned");
        self.live_session(&ns)?;
        ns.nodes
            .get(path)
            .map(|node| node.data.clone())
            .ok_or_else(|| RegistryError::NoNode {
                path: path.to_owned(),
            })
    }

    async fn close(&self) -> RegistryResult<()> {
        let mut ns = self.inner.lock().expect("memory store lock poisoned");
        let session = self.session.load(Ordering::SeqCst);
        if ns.closed.insert(session) {
            let removed = ns.drop_ephemerals(session);
            debug!(session, removed, "memory session closed");
        }
        Ok(())
    }
}
