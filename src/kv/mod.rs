//! Typed wrapper contract over a hierarchical watchable key/value store.
//!
//! [`KvStore`] is the only place raw store errors are mapped into
//! [`RegistryError`](crate::error::RegistryError). Everything above this
//! layer (the route/router-group stores, the validator, the HTTP surface)
//! speaks only in terms of this contract, so the same store logic runs
//! unmodified against [`memory::MemoryKv`] (the default embedded backend,
//! also used for deterministic tests) or [`etcd::EtcdKv`].

pub mod etcd;
pub mod memory;

use async_trait::async_trait;
use futures_util::stream::BoxStream;

use crate::error::RegistryError;

/// A key or directory in the store. `nodes` is populated for directories
/// when the request asked for a recursive listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Node {
    pub key: String,
    pub value: Option<String>,
    pub modified_index: u64,
    pub created_index: u64,
    pub ttl: Option<i64>,
    pub dir: bool,
    pub nodes: Vec<Node>,
}

/// The kind of change a watch event represents, mirroring the backing
/// store's action vocabulary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Create,
    Set,
    Update,
    CompareAndSwap,
    Delete,
    CompareAndDelete,
    Expire,
}

/// One entry from a watch stream: the action taken, the resulting node, and
/// (for updates/deletes) the node's previous state.
#[derive(Debug, Clone)]
pub struct WatchEvent {
    pub action: Action,
    pub node: Node,
    pub prev_node: Option<Node>,
}

pub type WatchStream = BoxStream<'static, Result<WatchEvent, RegistryError>>;

/// Minimal contract over any hierarchical watchable KV store.
///
/// Implementations map store-native errors onto [`RegistryError::KeyNotFound`],
/// [`RegistryError::KeyExists`], [`RegistryError::TestFailed`], and
/// [`RegistryError::IndexCleared`] — the vocabulary every caller above this
/// layer is written against. Any other failure is surfaced as
/// [`RegistryError::DbCommunication`].
#[async_trait]
pub trait KvStore: Send + Sync + 'static {
    /// Fetches a single key, or (when `recursive`) a directory and its
    /// children. Fails with `KeyNotFound` if the key is absent.
    async fn get(&self, key: &str, recursive: bool) -> Result<Node, RegistryError>;

    /// Creates `key` with `value` and a TTL in seconds (`None` = no TTL).
    /// Fails with `KeyExists` if the key is already present.
    async fn set_create(
        &self,
        key: &str,
        value: &str,
        ttl: Option<i64>,
    ) -> Result<Node, RegistryError>;

    /// Updates `key` only if its current `modified_index` equals
    /// `prev_index`. Fails with `TestFailed` on mismatch, `KeyNotFound` if
    /// absent.
    async fn set_cas(
        &self,
        key: &str,
        value: &str,
        ttl: Option<i64>,
        prev_index: u64,
    ) -> Result<Node, RegistryError>;

    /// Unconditionally (re)writes `key`, creating it if absent. Used for
    /// router groups, which carry neither TTL nor CAS semantics.
    async fn set(&self, key: &str, value: &str, ttl: Option<i64>) -> Result<Node, RegistryError>;

    /// Deletes `key`. Fails with `KeyNotFound` if absent.
    async fn delete(&self, key: &str) -> Result<Node, RegistryError>;

    /// Watches `prefix` for changes after `after_index` (or from the
    /// current index if `None`). The returned stream yields `IndexCleared`
    /// exactly once when the store's event history has a gap under the
    /// watched prefix; callers must reopen the watch from the current
    /// index rather than attempt to replay lost events.
    fn watch(&self, prefix: &str, after_index: Option<u64>) -> WatchStream;

    /// The store's current global index, used to restart a watcher after
    /// an `IndexCleared` gap without replaying history.
    async fn current_index(&self) -> u64;
}
