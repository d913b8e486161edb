//! In-memory [`KvStore`] backend.
//!
//! This is the default embedded backend (no external etcd cluster required)
//! and the backend every deterministic test in this crate runs against. TTL
//! expiry is driven by a background reaper task spawned on construction;
//! watch history gaps are modeled honestly via `tokio::sync::broadcast`'s own
//! lag detection, which is exactly the "a slow watcher missed some events"
//! condition `IndexCleared` exists to describe.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use futures_util::StreamExt;
use futures_util::stream::{self, BoxStream};
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tokio::time::Instant;

use crate::error::RegistryError;
use crate::kv::{Action, KvStore, Node, WatchEvent, WatchStream};

#[derive(Debug, Clone)]
struct Entry {
    value: String,
    modified_index: u64,
    created_index: u64,
    ttl: Option<i64>,
    expires_at: Option<Instant>,
}

impl Entry {
    fn to_node(&self, key: &str) -> Node {
        Node {
            key: key.to_string(),
            value: Some(self.value.clone()),
            modified_index: self.modified_index,
            created_index: self.created_index,
            ttl: self.ttl,
            dir: false,
            nodes: Vec::new(),
        }
    }
}

/// Embedded, in-process [`KvStore`]. Cheap to clone: all state lives behind
/// `Arc`/`DashMap`.
pub struct MemoryKv {
    entries: Arc<DashMap<String, Entry>>,
    index: Arc<AtomicU64>,
    events: broadcast::Sender<WatchEvent>,
    reaper: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl MemoryKv {
    pub fn new() -> Arc<Self> {
        let (events, _) = broadcast::channel(1024);
        let this = Arc::new(Self {
            entries: Arc::new(DashMap::new()),
            index: Arc::new(AtomicU64::new(0)),
            events,
            reaper: Mutex::new(None),
        });

        let reaper_this = this.clone();
        let handle = tokio::spawn(async move {
            let mut tick = tokio::time::interval(Duration::from_millis(200));
            loop {
                tick.tick().await;
                reaper_this.reap_expired();
            }
        });
        *this.reaper.lock() = Some(handle);
        this
    }

    fn next_index(&self) -> u64 {
        self.index.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn reap_expired(&self) {
        let now = Instant::now();
        let expired: Vec<String> = self
            .entries
            .iter()
            .filter(|e| matches!(e.value().expires_at, Some(at) if at <= now))
            .map(|e| e.key().clone())
            .collect();

        for key in expired {
            if let Some((_, entry)) = self.entries.remove(&key) {
                let prev = entry.to_node(&key);
                let index = self.next_index();
                let mut expired_node = prev.clone();
                expired_node.modified_index = index;
                let _ = self.events.send(WatchEvent {
                    action: Action::Expire,
                    node: expired_node,
                    prev_node: Some(prev),
                });
            }
        }
    }

    fn emit(&self, action: Action, node: Node, prev_node: Option<Node>) {
        let _ = self.events.send(WatchEvent {
            action,
            node,
            prev_node,
        });
    }
}

impl Drop for MemoryKv {
    fn drop(&mut self) {
        if let Some(handle) = self.reaper.lock().take() {
            handle.abort();
        }
    }
}

#[async_trait]
impl KvStore for MemoryKv {
    async fn get(&self, key: &str, recursive: bool) -> Result<Node, RegistryError> {
        if !recursive {
            return self
                .entries
                .get(key)
                .map(|e| e.to_node(key))
                .ok_or_else(|| RegistryError::KeyNotFound(key.to_string()));
        }

        let prefix = if key.ends_with('/') {
            key.to_string()
        } else {
            format!("{key}/")
        };

        let mut children: BTreeMap<String, Node> = BTreeMap::new();
        for entry in self.entries.iter() {
            if entry.key().starts_with(&prefix) {
                children.insert(entry.key().clone(), entry.value().to_node(entry.key()));
            }
        }

        Ok(Node {
            key: key.to_string(),
            value: None,
            modified_index: self.index.load(Ordering::SeqCst),
            created_index: 0,
            ttl: None,
            dir: true,
            nodes: children.into_values().collect(),
        })
    }

    async fn set_create(
        &self,
        key: &str,
        value: &str,
        ttl: Option<i64>,
    ) -> Result<Node, RegistryError> {
        if self.entries.contains_key(key) {
            return Err(RegistryError::KeyExists(key.to_string()));
        }

        let index = self.next_index();
        let expires_at = ttl.map(|secs| Instant::now() + Duration::from_secs(secs.max(0) as u64));
        let entry = Entry {
            value: value.to_string(),
            modified_index: index,
            created_index: index,
            ttl,
            expires_at,
        };
        self.entries.insert(key.to_string(), entry.clone());
        let node = entry.to_node(key);
        self.emit(Action::Create, node.clone(), None);
        Ok(node)
    }

    async fn set_cas(
        &self,
        key: &str,
        value: &str,
        ttl: Option<i64>,
        prev_index: u64,
    ) -> Result<Node, RegistryError> {
        let prev = self
            .entries
            .get(key)
            .map(|e| e.to_node(key))
            .ok_or_else(|| RegistryError::KeyNotFound(key.to_string()))?;

        if prev.modified_index != prev_index {
            return Err(RegistryError::TestFailed(key.to_string()));
        }

        let index = self.next_index();
        let expires_at = ttl.map(|secs| Instant::now() + Duration::from_secs(secs.max(0) as u64));
        let entry = Entry {
            value: value.to_string(),
            modified_index: index,
            created_index: prev.created_index,
            ttl,
            expires_at,
        };
        self.entries.insert(key.to_string(), entry.clone());
        let node = entry.to_node(key);
        self.emit(Action::CompareAndSwap, node.clone(), Some(prev));
        Ok(node)
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<i64>) -> Result<Node, RegistryError> {
        let prev = self.entries.get(key).map(|e| e.to_node(key));
        let index = self.next_index();
        let created_index = prev.as_ref().map(|p| p.created_index).unwrap_or(index);
        let expires_at = ttl.map(|secs| Instant::now() + Duration::from_secs(secs.max(0) as u64));
        let entry = Entry {
            value: value.to_string(),
            modified_index: index,
            created_index,
            ttl,
            expires_at,
        };
        self.entries.insert(key.to_string(), entry.clone());
        let node = entry.to_node(key);
        let action = if prev.is_some() {
            Action::Update
        } else {
            Action::Set
        };
        self.emit(action, node.clone(), prev);
        Ok(node)
    }

    async fn delete(&self, key: &str) -> Result<Node, RegistryError> {
        let (_, entry) = self
            .entries
            .remove(key)
            .ok_or_else(|| RegistryError::KeyNotFound(key.to_string()))?;
        let prev = entry.to_node(key);
        let index = self.next_index();
        let mut node = prev.clone();
        node.modified_index = index;
        self.emit(Action::Delete, node.clone(), Some(prev));
        Ok(node)
    }

    fn watch(&self, prefix: &str, after_index: Option<u64>) -> WatchStream {
        let prefix = prefix.to_string();
        let mut receiver = self.events.subscribe();
        let current = self.index.load(Ordering::SeqCst);
        let _ = after_index;

        let stream = stream::unfold(
            (receiver, false),
            move |(mut rx, mut gap_reported)| {
                let prefix = prefix.clone();
                async move {
                    loop {
                        match rx.recv().await {
                            Ok(event) if event.node.key.starts_with(&prefix) => {
                                return Some((Ok(event), (rx, gap_reported)));
                            }
                            Ok(_) => continue,
                            Err(broadcast::error::RecvError::Lagged(_)) => {
                                if !gap_reported {
                                    gap_reported = true;
                                    return Some((Err(RegistryError::IndexCleared), (rx, gap_reported)));
                                }
                                continue;
                            }
                            Err(broadcast::error::RecvError::Closed) => return None,
                        }
                    }
                }
            },
        );
        let _ = current;

        Box::pin(stream) as BoxStream<'static, Result<WatchEvent, RegistryError>>
    }

    async fn current_index(&self) -> u64 {
        self.index.load(Ordering::SeqCst)
    }
}
