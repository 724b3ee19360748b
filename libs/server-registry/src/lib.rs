//! # server-registry
//!
//! Announces a server as "up" by creating an ephemeral, sequential node under
//! a shared root in a ZooKeeper-style coordination store, and removes it on
//! shutdown or request. Other components discover live servers by listing the
//! root's children; liveness itself comes from the store's session mechanism.
//!
//! This library provides:
//! - **Registration client** with register/delete/update and a listing of
//!   the servers currently registered.
//! - **Store seam** ([`CoordinationStore`]) covering the handful of node
//!   operations registration needs.
//! - **ZooKeeper backend** that waits, bounded by the session timeout, for the
//!   session to come up before handing out a client.
//! - **In-memory backend** with sessions and expiry simulation, for tests and
//!   single-process setups.
//! - **Config** loadable from YAML or JSON.
//!
//! ```no_run
//! # async fn run() -> server_registry::RegistryResult<()> {
//! use server_registry::{RegistrationClient, RegistryConfig};
//!
//! let client = RegistrationClient::connect(&RegistryConfig::default()).await?;
//! client.register(b"10.0.0.7:9090").await?;
//! // ... serve ...
//! client.close().await?;
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod config;
pub mod error;
pub mod memory;
pub mod path;
pub mod store;
pub mod zookeeper;

// Re-export key types for convenient access
pub use client::{DeleteOutcome, RegisterOutcome, RegistrationClient, ServerEntry};
pub use config::RegistryConfig;
pub use error::{RegistryError, RegistryResult};
pub use memory::{MemoryStore, StoreStats};
pub use store::{CoordinationStore, CreateMode, NodeStat};
pub use zookeeper::{SessionState, ZkStore};
