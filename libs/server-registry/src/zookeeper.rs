//! ZooKeeper-backed coordination store.
//!
//! Wraps the synchronous `zookeeper` client. Calls run on tokio's blocking
//! pool; session events arrive on the client's own I/O thread and are bridged
//! into async code through a oneshot gate (first `SyncConnected` only) and a
//! `watch` channel carrying the latest session state.

use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{oneshot, watch};
use tracing::{debug, error, info, warn};
use zookeeper::{Acl, KeeperState, WatchedEvent, Watcher, ZkError, ZooKeeper};

use crate::config::RegistryConfig;
use crate::error::{RegistryError, RegistryResult};
use crate::store::{CoordinationStore, CreateMode, NodeStat};

/// Session state as last reported by the ZooKeeper client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Session requested, no event received yet.
    Connecting,
    /// Connected with a live session.
    Connected,
    /// Connected to a read-only server.
    ConnectedReadOnly,
    /// Connection lost; the client is trying to reconnect.
    Disconnected,
    /// The session expired and its ephemeral nodes are gone.
    Expired,
    /// Authentication failed.
    AuthFailed,
}

impl From<KeeperState> for SessionState {
    fn from(state: KeeperState) -> Self {
        match state {
            KeeperState::SyncConnected | KeeperState::SaslAuthenticated => SessionState::Connected,
            KeeperState::ConnectedReadOnly => SessionState::ConnectedReadOnly,
            KeeperState::Disconnected => SessionState::Disconnected,
            KeeperState::Expired => SessionState::Expired,
            KeeperState::AuthFailed => SessionState::AuthFailed,
        }
    }
}

/// Receives every session event from the client's I/O thread.
struct SessionWatcher {
    /// Opened by the first connected event, `None` afterwards.
    gate: Mutex<Option<oneshot::Sender<()>>>,
    state: watch::Sender<SessionState>,
}

impl Watcher for SessionWatcher {
    fn handle(&self, event: WatchedEvent) {
        let state = SessionState::from(event.keeper_state);
        debug!(?state, event_type = ?event.event_type, path = ?event.path, "zookeeper event");
        let previous = self.state.send_replace(state);
        if previous != state && state == SessionState::Expired {
            warn!("zookeeper session expired");
        }

        if state == SessionState::Connected {
            let gate = self
                .gate
                .lock()
                .map(|mut gate| gate.take())
                .unwrap_or_default();
            if let Some(gate) = gate {
                // receiver may have timed out already
                let _ = gate.send(());
            }
        }
    }
}

/// Coordination store talking to a ZooKeeper ensemble.
#[derive(Clone)]
pub struct ZkStore {
    zk: Arc<ZooKeeper>,
    state: Option<watch::Receiver<SessionState>>,
}

impl ZkStore {
    /// Wrap an already connected client.
    ///
    /// Session state is not observable for clients built elsewhere, so
    /// [`session_state`](Self::session_state) returns `None`.
    pub fn from_client(zk: Arc<ZooKeeper>) -> Self {
        Self { zk, state: None }
    }

    /// Open a session and wait for it to be established.
    ///
    /// The wait is bounded by the configured session timeout. On timeout the
    /// half-open client is closed and [`RegistryError::Timeout`] is returned.
    pub async fn connect(config: &RegistryConfig) -> RegistryResult<Self> {
        Self::connect_to(&config.connect_string, config.session_timeout).await
    }

    /// Open a session against `connect_string` and wait up to `timeout` for it.
    pub async fn connect_to(connect_string: &str, timeout: Duration) -> RegistryResult<Self> {
        let (gate_tx, gate_rx) = oneshot::channel();
        let (state_tx, state_rx) = watch::channel(SessionState::Connecting);
        let watcher = SessionWatcher {
            gate: Mutex::new(Some(gate_tx)),
            state: state_tx,
        };

        info!(connect_string, ?timeout, "connecting to zookeeper");
        let addr = connect_string.to_owned();
        let zk = tokio::task::spawn_blocking(move || ZooKeeper::connect(&addr, timeout, watcher))
            .await
            .map_err(|e| RegistryError::Transport(format!("zookeeper connect task failed: {e}")))?
            .map_err(|e| {
                error!(connect_string, error = ?e, "zookeeper connection failed");
                RegistryError::Transport(format!(
                    "failed to connect to zookeeper at '{connect_string}': {e:?}"
                ))
            })?;
        let store = Self {
            zk: Arc::new(zk),
            state: Some(state_rx),
        };

        match tokio::time::timeout(timeout, gate_rx).await {
            Ok(Ok(())) => {
                info!(connect_string, "zookeeper session established");
                Ok(store)
            }
            Ok(Err(_)) => {
                store.abandon();
                Err(RegistryError::Transport(
                    "zookeeper client stopped before the session was established".into(),
                ))
            }
            Err(_) => {
                error!(connect_string, ?timeout, "timed out waiting for zookeeper session");
                store.abandon();
                Err(RegistryError::Timeout(format!(
                    "no zookeeper session with '{connect_string}' after {timeout:?}"
                )))
            }
        }
    }

    /// Latest session state, if this store opened the session itself.
    pub fn session_state(&self) -> Option<SessionState> {
        self.state.as_ref().map(|rx| *rx.borrow())
    }

    /// The underlying client, e.g. for setting watches.
    pub fn client(&self) -> &Arc<ZooKeeper> {
        &self.zk
    }

    /// Close a client whose session never came up without waiting on it;
    /// closing may block until the ensemble becomes reachable.
    fn abandon(self) {
        let zk = self.zk;
        tokio::task::spawn_blocking(move || {
            if let Err(err) = zk.close() {
                debug!(?err, "error closing abandoned zookeeper client");
            }
        });
    }

    async fn blocking<T, F>(&self, f: F) -> RegistryResult<T>
    where
        F: FnOnce(&ZooKeeper) -> RegistryResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let zk = Arc::clone(&self.zk);
        tokio::task::spawn_blocking(move || f(&zk))
            .await
            .map_err(|e| RegistryError::Transport(format!("zookeeper task failed: {e}")))?
    }
}

impl fmt::Debug for ZkStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ZkStore")
            .field("session_state", &self.session_state())
            .finish_non_exhaustive()
    }
}

fn zk_mode(mode: CreateMode) -> zookeeper::CreateMode {
    match mode {
        CreateMode::Persistent => zookeeper::CreateMode::Persistent,
        CreateMode::Ephemeral => zookeeper::CreateMode::Ephemeral,
        CreateMode::PersistentSequential => zookeeper::CreateMode::PersistentSequential,
        CreateMode::EphemeralSequential => zookeeper::CreateMode::EphemeralSequential,
    }
}

fn map_zk_error(err: ZkError, path: &str) -> RegistryError {
    match err {
        ZkError::NoNode => RegistryError::NoNode {
            path: path.to_owned(),
        },
        ZkError::NodeExists => RegistryError::NodeExists {
            path: path.to_owned(),
        },
        ZkError::ConnectionLoss => {
            RegistryError::Transport(format!("connection lost during call on '{path}'"))
        }
        ZkError::OperationTimeout => {
            RegistryError::Timeout(format!("operation on '{path}' timed out"))
        }
        ZkError::SessionExpired => {
            RegistryError::SessionExpired(format!("session expired during call on '{path}'"))
        }
        other => RegistryError::Protocol(format!("{other:?} on '{path}'")),
    }
}

#[async_trait]
impl CoordinationStore for ZkStore {
    async fn exists(&self, path: &str) -> RegistryResult<Option<NodeStat>> {
        let path = path.to_owned();
        self.blocking(move |zk| {
            zk.exists(&path, false)
                .map(|stat| {
                    stat.map(|stat| NodeStat {
                        version: stat.version,
                        ephemeral_owner: stat.ephemeral_owner,
                        data_length: stat.data_length,
                        num_children: stat.num_children,
                    })
                })
                .map_err(|e| map_zk_error(e, &path))
        })
        .await
    }

    async fn create(&self, path: &str, data: &[u8], mode: CreateMode) -> RegistryResult<String> {
        let path = path.to_owned();
        let data = data.to_vec();
        self.blocking(move |zk| {
            zk.create(&path, data, Acl::open_unsafe().clone(), zk_mode(mode))
                .map_err(|e| map_zk_error(e, &path))
        })
        .await
    }

    async fn delete(&self, path: &str) -> RegistryResult<()> {
        let path = path.to_owned();
        self.blocking(move |zk| zk.delete(&path, None).map_err(|e| map_zk_error(e, &path)))
            .await
    }

    async fn children(&self, path: &str) -> RegistryResult<Vec<String>> {
        let path = path.to_owned();
        self.blocking(move |zk| {
            zk.get_children(&path, false)
                .map_err(|e| map_zk_error(e, &path))
        })
        .await
    }

    async fn get_data(&self, path: &str) -> RegistryResult<Vec<u8>> {
        let path = path.to_owned();
        self.blocking(move |zk| {
            zk.get_data(&path, false)
                .map(|(data, _stat)| data)
                .map_err(|e| map_zk_error(e, &path))
        })
        .await
    }

    async fn close(&self) -> RegistryResult<()> {
        self.blocking(|zk| zk.close().map_err(|e| map_zk_error(e, "/")))
            .await?;
        info!("zookeeper session closed");
        Ok(())
    }
}
