//! Server registration client.
//!
//! A [`RegistrationClient`] advertises one server under a root node by
//! creating an ephemeral, sequential child holding the caller's payload. The
//! store removes the child if the session ends, so the children of the root
//! are the servers currently up.

use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::config::{DEFAULT_NODE_PREFIX, RegistryConfig};
use crate::error::{RegistryError, RegistryResult};
use crate::path;
use crate::store::{CoordinationStore, CreateMode};
use crate::zookeeper::ZkStore;

/// Outcome of [`RegistrationClient::register`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegisterOutcome {
    /// A new entry was created at the contained path.
    Registered(String),
    /// The entry created earlier still exists; nothing was created.
    AlreadyRegistered(String),
}

impl RegisterOutcome {
    /// Path of the live entry.
    pub fn path(&self) -> &str {
        match self {
            RegisterOutcome::Registered(path) | RegisterOutcome::AlreadyRegistered(path) => path,
        }
    }

    /// Consume the outcome, returning the path of the live entry.
    pub fn into_path(self) -> String {
        match self {
            RegisterOutcome::Registered(path) | RegisterOutcome::AlreadyRegistered(path) => path,
        }
    }
}

/// Outcome of [`RegistrationClient::delete`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeleteOutcome {
    /// The entry at the contained path was removed.
    Deleted(String),
    /// There was no live entry to remove.
    AlreadyOffline,
}

/// A registered server as seen by [`RegistrationClient::servers`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerEntry {
    /// Full node path.
    pub path: String,
    /// Node name, prefix plus sequence.
    pub name: String,
    /// Sequence number assigned by the store.
    pub sequence: u64,
    /// Payload published by the server.
    pub info: Vec<u8>,
}

/// Registers this server under a root node and removes it again.
///
/// At most one entry is live per client. All operations serialize on an
/// internal lock, so the client can be shared between tasks.
#[derive(Debug)]
pub struct RegistrationClient<S> {
    store: S,
    root: String,
    prefix: String,
    current: Mutex<Option<String>>,
}

impl RegistrationClient<ZkStore> {
    /// Open a ZooKeeper session from `config` and build a client on it.
    ///
    /// Waits for the session to be established, at most the configured
    /// session timeout.
    pub async fn connect(config: &RegistryConfig) -> RegistryResult<Self> {
        config.validate()?;
        let store = ZkStore::connect(config).await?;
        Self::with_prefix(&config.root_path, &config.node_prefix, store)
    }
}

impl<S> RegistrationClient<S>
where
    S: CoordinationStore,
{
    /// Build a client on an established store handle, with the default
    /// `server_` entry prefix.
    pub fn new(root: impl Into<String>, store: S) -> RegistryResult<Self> {
        Self::with_prefix(root, DEFAULT_NODE_PREFIX, store)
    }

    /// Build a client with a custom entry name prefix.
    pub fn with_prefix(
        root: impl Into<String>,
        prefix: impl Into<String>,
        store: S,
    ) -> RegistryResult<Self> {
        let root = root.into();
        let prefix = prefix.into();
        path::validate(&root)?;
        if prefix.is_empty() || prefix.contains('/') {
            return Err(RegistryError::InvalidPath(format!(
                "entry prefix '{prefix}' must be a non-empty name without '/'"
            )));
        }
        Ok(Self {
            store,
            root,
            prefix,
            current: Mutex::new(None),
        })
    }

    /// Root node the entries live under.
    pub fn root(&self) -> &str {
        &self.root
    }

    /// Name prefix of the entries.
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// The store handle.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Path of the entry this client created last, if it hasn't been deleted.
    pub async fn current_path(&self) -> Option<String> {
        self.current.lock().await.clone()
    }

    /// Whether this client's entry currently exists in the store.
    pub async fn is_registered(&self) -> RegistryResult<bool> {
        let current = self.current.lock().await;
        match current.as_deref() {
            Some(path) => Ok(self.store.exists(path).await?.is_some()),
            None => Ok(false),
        }
    }

    /// Publish `server_info` as a new entry under the root.
    ///
    /// Creates the root (and its ancestors) as persistent nodes if missing.
    /// If this client's previous entry still exists nothing is created.
    pub async fn register(&self, server_info: &[u8]) -> RegistryResult<RegisterOutcome> {
        let mut current = self.current.lock().await;
        self.register_locked(&mut current, server_info).await
    }

    /// Remove this client's entry.
    ///
    /// Succeeds without a deletion if the entry is already gone, for instance
    /// because the session expired.
    pub async fn delete(&self) -> RegistryResult<DeleteOutcome> {
        let mut current = self.current.lock().await;
        self.delete_locked(&mut current).await
    }

    /// Delete the entry, then register `server_info` again, returning the
    /// new entry path.
    ///
    /// Meant for callers reacting to a change of the root's children. Other
    /// calls on this client can't interleave, but the server is absent from
    /// the listing between the two steps.
    pub async fn update(&self, server_info: &[u8]) -> RegistryResult<String> {
        let mut current = self.current.lock().await;
        self.delete_locked(&mut current).await?;
        self.register_locked(&mut current, server_info)
            .await
            .map(RegisterOutcome::into_path)
    }

    /// Every entry under the root, ordered by sequence number.
    ///
    /// Children not named like entries are skipped, as are entries removed
    /// while the listing is read. A missing root yields an empty list.
    pub async fn servers(&self) -> RegistryResult<Vec<ServerEntry>> {
        let names = match self.store.children(&self.root).await {
            Ok(names) => names,
            Err(err) if err.is_no_node() => return Ok(Vec::new()),
            Err(err) => return Err(err),
        };

        let mut entries = Vec::with_capacity(names.len());
        for name in names {
            let Some(sequence) = path::sequence(&name, &self.prefix) else {
                debug!(root = %self.root, %name, "skipping foreign child");
                continue;
            };
            let path = path::join(&self.root, &name);
            match self.store.get_data(&path).await {
                Ok(info) => entries.push(ServerEntry {
                    path,
                    name,
                    sequence,
                    info,
                }),
                Err(err) if err.is_no_node() => {
                    debug!(%path, "entry vanished while listing");
                }
                Err(err) => return Err(err),
            }
        }
        entries.sort_by_key(|entry| entry.sequence);
        Ok(entries)
    }

    /// Remove the entry, if any, and end the store session.
    ///
    /// The session is closed even if the delete fails; the first error is
    /// returned.
    pub async fn close(&self) -> RegistryResult<()> {
        let deleted = self.delete().await;
        let closed = self.close_session().await;
        deleted?;
        closed
    }

    /// End the store session without deleting the entry first. The store
    /// still removes the entry along with the session.
    pub async fn close_session(&self) -> RegistryResult<()> {
        self.store.close().await
    }

    async fn register_locked(
        &self,
        current: &mut Option<String>,
        server_info: &[u8],
    ) -> RegistryResult<RegisterOutcome> {
        self.ensure_root().await?;

        if let Some(path) = current.as_deref()
            && self.store.exists(path).await?.is_some()
        {
            info!(%path, "server is already online");
            return Ok(RegisterOutcome::AlreadyRegistered(path.to_owned()));
        }

        let base = path::join(&self.root, &self.prefix);
        let path = self
            .store
            .create(&base, server_info, CreateMode::EphemeralSequential)
            .await?;
        info!(%path, "server is online now");
        *current = Some(path.clone());
        Ok(RegisterOutcome::Registered(path))
    }

    async fn delete_locked(
        &self,
        current: &mut Option<String>,
    ) -> RegistryResult<DeleteOutcome> {
        let Some(path) = current.clone() else {
            info!(root = %self.root, "server is already offline");
            return Ok(DeleteOutcome::AlreadyOffline);
        };

        if self.store.exists(&path).await?.is_none() {
            info!(%path, "server is already offline");
            *current = None;
            return Ok(DeleteOutcome::AlreadyOffline);
        }

        match self.store.delete(&path).await {
            Ok(()) => {
                info!(%path, "server is offline now");
                *current = None;
                Ok(DeleteOutcome::Deleted(path))
            }
            Err(err) if err.is_no_node() => {
                warn!(%path, "entry vanished before delete, server is already offline");
                *current = None;
                Ok(DeleteOutcome::AlreadyOffline)
            }
            Err(err) => Err(err),
        }
    }

    /// Create the root and any missing ancestors as empty persistent nodes.
    async fn ensure_root(&self) -> RegistryResult<()> {
        if self.store.exists(&self.root).await?.is_some() {
            return Ok(());
        }
        for node in path::ancestors(&self.root) {
            if self.store.exists(node).await?.is_some() {
                continue;
            }
            match self.store.create(node, &[], CreateMode::Persistent).await {
                Ok(_) => info!(path = %node, "created registry node"),
                // another server created it first
                Err(err) if err.is_node_exists() => {}
                Err(err) => return Err(err),
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use tracing_test::traced_test;

    use super::*;
    use crate::memory::{MemoryStore, StoreStats};
    use crate::store::NodeStat;

    /// Memory store whose deletes always fail.
    struct BrokenDelete(MemoryStore);

    #[async_trait]
    impl CoordinationStore for BrokenDelete {
        async fn exists(&self, path: &str) -> RegistryResult<Option<NodeStat>> {
            self.0.exists(path).await
        }

        async fn create(
            &self,
            path: &str,
            data: &[u8],
            mode: CreateMode,
        ) -> RegistryResult<String> {
            self.0.create(path, data, mode).await
        }

        async fn delete(&self, _path: &str) -> RegistryResult<()> {
            Err(RegistryError::Transport("connection reset".into()))
        }

        async fn children(&self, path: &str) -> RegistryResult<Vec<String>> {
            self.0.children(path).await
        }

        async fn get_data(&self, path: &str) -> RegistryResult<Vec<u8>> {
            self.0.get_data(path).await
        }

        async fn close(&self) -> RegistryResult<()> {
            self.0.close().await
        }
    }

    fn client(store: &MemoryStore) -> RegistrationClient<MemoryStore> {
        RegistrationClient::new("/servers", store.clone()).expect("valid root")
    }

    #[test]
    fn test_rejects_invalid_root_and_prefix() {
        let store = MemoryStore::new();
        assert!(matches!(
            RegistrationClient::new("servers", store.clone()).unwrap_err(),
            RegistryError::InvalidPath(_)
        ));
        assert!(matches!(
            RegistrationClient::with_prefix("/servers", "a/b", store).unwrap_err(),
            RegistryError::InvalidPath(_)
        ));
    }

    #[tokio::test]
    async fn test_register_creates_root_first() {
        let store = MemoryStore::new();
        let client = client(&store);
        assert_eq!(store.exists("/servers").await.unwrap(), None);

        let outcome = client.register(b"host:9090").await.unwrap();
        assert_eq!(
            outcome,
            RegisterOutcome::Registered("/servers/server_0000000001".into())
        );

        let root = store.exists("/servers").await.unwrap().expect("root created");
        assert!(!root.is_ephemeral());
        assert_eq!(root.data_length, 0);
        let entry = store
            .exists(outcome.path())
            .await
            .unwrap()
            .expect("entry created");
        assert!(entry.is_ephemeral());
        // root + entry
        assert_eq!(store.stats().creates, 2);
    }

    #[tokio::test]
    async fn test_register_creates_missing_ancestors() {
        let store = MemoryStore::new();
        let client = RegistrationClient::new("/cluster/east/servers", store.clone()).unwrap();
        let path = client.register(b"x").await.unwrap().into_path();
        assert_eq!(path, "/cluster/east/servers/server_0000000001");
        assert!(store.exists("/cluster").await.unwrap().is_some());
        assert!(store.exists("/cluster/east").await.unwrap().is_some());
    }

    #[tokio::test]
    #[traced_test]
    async fn test_register_is_idempotent() {
        let store = MemoryStore::new();
        let client = client(&store);

        let first = client.register(b"host:9090").await.unwrap();
        let creates = store.stats().creates;
        let second = client.register(b"something else").await.unwrap();

        assert_eq!(
            second,
            RegisterOutcome::AlreadyRegistered(first.path().to_owned())
        );
        assert_eq!(store.stats().creates, creates);
        assert_eq!(store.children("/servers").await.unwrap().len(), 1);
        assert_eq!(store.get_data(first.path()).await.unwrap(), b"host:9090");
        assert!(logs_contain("already online"));
    }

    #[tokio::test]
    async fn test_delete_is_idempotent() {
        let store = MemoryStore::new();
        let client = client(&store);
        let path = client.register(b"host:9090").await.unwrap().into_path();

        assert_eq!(
            client.delete().await.unwrap(),
            DeleteOutcome::Deleted(path)
        );
        let deletes = store.stats().deletes;
        assert_eq!(client.delete().await.unwrap(), DeleteOutcome::AlreadyOffline);
        assert_eq!(store.stats().deletes, deletes);
        assert!(store.children("/servers").await.unwrap().is_empty());
        assert_eq!(client.current_path().await, None);
    }

    #[tokio::test]
    #[traced_test]
    async fn test_delete_before_register_is_noop() {
        let store = MemoryStore::new();
        let client = client(&store);
        assert_eq!(client.delete().await.unwrap(), DeleteOutcome::AlreadyOffline);
        assert_eq!(store.stats(), StoreStats::default());
        assert!(logs_contain("already offline"));
    }

    #[tokio::test]
    #[traced_test]
    async fn test_delete_after_session_expiry() {
        let store = MemoryStore::new();
        let client = client(&store);
        client.register(b"host:9090").await.unwrap();

        store.expire_session();

        let deletes = store.stats().deletes;
        assert_eq!(client.delete().await.unwrap(), DeleteOutcome::AlreadyOffline);
        assert_eq!(store.stats().deletes, deletes);
        assert!(logs_contain("already offline"));
        assert_eq!(client.current_path().await, None);
    }

    #[tokio::test]
    async fn test_register_after_session_expiry_creates_new_entry() {
        let store = MemoryStore::new();
        let client = client(&store);
        let first = client.register(b"a").await.unwrap().into_path();
        assert!(client.is_registered().await.unwrap());

        store.expire_session();
        assert!(!client.is_registered().await.unwrap());

        let second = client.register(b"a").await.unwrap();
        assert!(matches!(second, RegisterOutcome::Registered(ref p) if *p != first));
        assert!(client.is_registered().await.unwrap());
    }

    #[tokio::test]
    async fn test_update_replaces_entry() {
        let store = MemoryStore::new();
        let client = client(&store);
        let before = client.register(b"v1").await.unwrap().into_path();

        let after = client.update(b"v2").await.unwrap();

        let servers = client.servers().await.unwrap();
        assert_eq!(servers.len(), 1);
        assert_eq!(servers[0].path, after);
        assert_eq!(servers[0].info, b"v2");
        let before_seq = path::sequence(path::name(&before), "server_").unwrap();
        assert!(servers[0].sequence > before_seq);
        assert_eq!(client.current_path().await, Some(after));
    }

    #[tokio::test]
    async fn test_update_when_unregistered_registers() {
        let store = MemoryStore::new();
        let client = client(&store);
        let path = client.update(b"fresh").await.unwrap();
        assert_eq!(path, "/servers/server_0000000001");
        assert_eq!(store.get_data(&path).await.unwrap(), b"fresh");
    }

    #[tokio::test]
    async fn test_servers_lists_all_sessions_in_order() {
        let store = MemoryStore::new();
        let a = client(&store);
        let b = RegistrationClient::new("/servers", store.session()).unwrap();

        b.register(b"b:1").await.unwrap();
        a.register(b"a:1").await.unwrap();
        // not an entry
        store
            .create("/servers/config", b"{}", CreateMode::Persistent)
            .await
            .unwrap();

        let infos: Vec<_> = a
            .servers()
            .await
            .unwrap()
            .into_iter()
            .map(|entry| (entry.name, entry.info))
            .collect();
        assert_eq!(
            infos,
            vec![
                ("server_0000000001".to_owned(), b"b:1".to_vec()),
                ("server_0000000002".to_owned(), b"a:1".to_vec()),
            ]
        );
    }

    #[tokio::test]
    async fn test_servers_without_root_is_empty() {
        let store = MemoryStore::new();
        assert!(client(&store).servers().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_concurrent_register_creates_one_entry() {
        let store = MemoryStore::new();
        let client = std::sync::Arc::new(client(&store));

        let tasks: Vec<_> = (0..8)
            .map(|i| {
                let client = client.clone();
                tokio::spawn(async move { client.register(format!("host:{i}").as_bytes()).await })
            })
            .collect();
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        assert_eq!(store.children("/servers").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_custom_prefix() {
        let store = MemoryStore::new();
        let client = RegistrationClient::with_prefix("/workers", "worker-", store.clone()).unwrap();
        let path = client.register(b"w").await.unwrap().into_path();
        assert_eq!(path, "/workers/worker-0000000001");
        assert_eq!(client.servers().await.unwrap()[0].sequence, 1);
    }

    #[tokio::test]
    async fn test_close_removes_entry_and_session() {
        let store = MemoryStore::new();
        let observer = store.session();
        let client = client(&store);
        client.register(b"x").await.unwrap();

        client.close().await.unwrap();

        assert!(observer.children("/servers").await.unwrap().is_empty());
        assert!(matches!(
            client.register(b"x").await.unwrap_err(),
            RegistryError::SessionExpired(_)
        ));
    }

    #[tokio::test]
    async fn test_store_errors_are_returned() {
        let store = MemoryStore::new();
        let client = client(&store);
        store.close().await.unwrap();
        assert!(matches!(
            client.register(b"x").await.unwrap_err(),
            RegistryError::SessionExpired(_)
        ));
    }

    #[tokio::test]
    async fn test_close_ends_session_when_delete_fails() {
        let store = MemoryStore::new();
        let observer = store.session();
        let client = RegistrationClient::new("/servers", BrokenDelete(store.clone())).unwrap();
        client.register(b"x").await.unwrap();

        assert!(matches!(
            client.close().await.unwrap_err(),
            RegistryError::Transport(_)
        ));
        // the session is gone and took the entry with it
        assert!(observer.children("/servers").await.unwrap().is_empty());
        assert!(matches!(
            store.exists("/servers").await.unwrap_err(),
            RegistryError::SessionExpired(_)
        ));
    }

    #[tokio::test]
    async fn test_close_session_keeps_entry_until_session_ends() {
        let store = MemoryStore::new();
        let observer = store.session();
        let client = client(&store);
        client.register(b"x").await.unwrap();

        client.close_session().await.unwrap();

        assert_eq!(
            client.current_path().await.as_deref(),
            Some("/servers/server_0000000001")
        );
        assert!(observer.children("/servers").await.unwrap().is_empty());
    }
}
