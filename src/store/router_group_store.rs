//! Router-group store (C3): CRUD with uniqueness-by-name and name immutability.

use std::sync::Arc;

use crate::error::RegistryError;
use crate::kv::KvStore;
use crate::model::RouterGroup;
use crate::store::ROUTER_GROUPS_PREFIX;

fn router_group_key(guid: &str) -> String {
    format!("{ROUTER_GROUPS_PREFIX}/{guid}")
}

fn decode(json: &str) -> Result<RouterGroup, RegistryError> {
    serde_json::from_str(json).map_err(|e| RegistryError::DbCommunication(e.to_string()))
}

fn encode(rg: &RouterGroup) -> Result<String, RegistryError> {
    serde_json::to_string(rg).map_err(|e| RegistryError::DbCommunication(e.to_string()))
}

pub struct RouterGroupStore<K: KvStore + ?Sized> {
    kv: Arc<K>,
}

impl<K: KvStore + ?Sized> RouterGroupStore<K> {
    pub fn new(kv: Arc<K>) -> Self {
        Self { kv }
    }

    /// 1. Reject empty guid. 2. Fail `UniqueField` if another group already
    /// owns `name`. 3. Fail `NonUpdatableField` if the existing group (by
    /// guid) has a different name. 4. Write unconditionally: no TTL, no CAS.
    pub async fn save_router_group(&self, rg: RouterGroup) -> Result<RouterGroup, RegistryError> {
        if rg.guid.trim().is_empty() {
            return Err(RegistryError::RouterGroupInvalid("guid must not be empty".into()));
        }

        let existing = self.read_router_groups().await?;
        if existing.iter().any(|g| g.guid != rg.guid && g.name == rg.name) {
            return Err(RegistryError::UniqueField {
                field: "name".into(),
                message: format!("router group name {:?} is already in use", rg.name),
            });
        }

        if let Some(current) = existing.iter().find(|g| g.guid == rg.guid) {
            if current.name != rg.name {
                return Err(RegistryError::NonUpdatableField {
                    field: "name".into(),
                    message: format!(
                        "router group {} name is immutable (was {:?}, got {:?})",
                        rg.guid, current.name, rg.name
                    ),
                });
            }
        }

        let key = router_group_key(&rg.guid);
        let payload = encode(&rg)?;
        self.kv.set(&key, &payload, None).await?;
        Ok(rg)
    }

    pub async fn read_router_groups(&self) -> Result<Vec<RouterGroup>, RegistryError> {
        match self.kv.get(ROUTER_GROUPS_PREFIX, true).await {
            Ok(node) => node
                .nodes
                .iter()
                .filter_map(|n| n.value.as_deref())
                .map(decode)
                .collect(),
            Err(RegistryError::KeyNotFound(_)) => Ok(Vec::new()),
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::memory::MemoryKv;
    use crate::model::RouterGroupType;

    fn rg(guid: &str, name: &str) -> RouterGroup {
        RouterGroup {
            guid: guid.into(),
            name: name.into(),
            kind: RouterGroupType::Tcp,
            reservable_ports: "1024-65535".into(),
        }
    }

    #[tokio::test(flavor = "current_thread")]
    async fn rejects_duplicate_name() {
        let kv = MemoryKv::new();
        let store = RouterGroupStore::new(kv);
        store.save_router_group(rg("G1", "default-tcp")).await.unwrap();
        let err = store
            .save_router_group(rg("G2", "default-tcp"))
            .await
            .unwrap_err();
        assert!(matches!(err, RegistryError::UniqueField { .. }));
    }

    #[tokio::test(flavor = "current_thread")]
    async fn rejects_name_change() {
        let kv = MemoryKv::new();
        let store = RouterGroupStore::new(kv);
        store.save_router_group(rg("G1", "default-tcp")).await.unwrap();
        let err = store
            .save_router_group(rg("G1", "renamed-tcp"))
            .await
            .unwrap_err();
        assert!(matches!(err, RegistryError::NonUpdatableField { .. }));
    }

    #[tokio::test(flavor = "current_thread")]
    async fn allows_refresh_with_same_name() {
        let kv = MemoryKv::new();
        let store = RouterGroupStore::new(kv);
        store.save_router_group(rg("G1", "default-tcp")).await.unwrap();
        store.save_router_group(rg("G1", "default-tcp")).await.unwrap();
        assert_eq!(store.read_router_groups().await.unwrap().len(), 1);
    }
}
