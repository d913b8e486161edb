//! CAS-based stores layered over [`crate::kv`], encoding/decoding the
//! domain model to/from the KV layout:
//!
//! ```text
//! /routes/<urlencoded-route>,<ip>:<port>
//! /v1/tcp_routes/router_groups/<guid>/<port>/<ip>:<bport>
//! /v1/router_groups/<guid>
//! ```

pub mod route_store;
pub mod router_group_store;

use crate::error::RegistryError;
use crate::kv::{Action, KvStore, WatchEvent};
use crate::model::{ChangeKind, ModificationTag};

pub const ROUTES_PREFIX: &str = "/routes";
pub const TCP_ROUTES_PREFIX: &str = "/v1/tcp_routes/router_groups";
pub const ROUTER_GROUPS_PREFIX: &str = "/v1/router_groups";

/// Which family of route this store call concerns; used to pick the watch
/// prefix and to tag events delivered to the event hub.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Family {
    Http,
    Tcp,
}

impl Family {
    pub fn prefix(self) -> &'static str {
        match self {
            Family::Http => ROUTES_PREFIX,
            Family::Tcp => TCP_ROUTES_PREFIX,
        }
    }
}

/// Classifies a raw KV watch event per the store-action → change-kind table.
pub fn classify(event: &WatchEvent) -> ChangeKind {
    match event.action {
        Action::Create => ChangeKind::Create,
        Action::Set | Action::Update | Action::CompareAndSwap => {
            if event.prev_node.is_some() {
                ChangeKind::Update
            } else {
                ChangeKind::Create
            }
        }
        Action::Delete | Action::CompareAndDelete => ChangeKind::Delete,
        Action::Expire => ChangeKind::Expire,
    }
}

/// Maximum CAS retry attempts for an upsert, per the upsert algorithm.
pub const MAX_CAS_RETRIES: u32 = 3;

/// Runs the generic upsert algorithm shared by routes and TCP route
/// mappings: Get → branch on present/absent → SetCAS/SetCreate → retry on
/// `TestFailed`/`KeyExists` up to [`MAX_CAS_RETRIES`] times.
///
/// `decode`/`encode` convert between the stored JSON and the typed value;
/// `tag_of`/`set_tag` get and set the value's `modification_tag`. A
/// concurrent delete observed after the value was previously seen present
/// fails with `Conflict` rather than resurrecting the route.
pub(crate) async fn upsert_with_cas<K, T>(
    kv: &K,
    key: &str,
    ttl: Option<i64>,
    mut value: T,
    decode: impl Fn(&str) -> Result<T, RegistryError>,
    encode: impl Fn(&T) -> Result<String, RegistryError>,
    tag_of: impl Fn(&T) -> &ModificationTag,
    set_tag: impl Fn(&mut T, ModificationTag),
) -> Result<T, RegistryError>
where
    K: KvStore + ?Sized,
    T: Clone,
{
    let mut saw_present = false;

    for _ in 0..MAX_CAS_RETRIES {
        match kv.get(key, false).await {
            Ok(node) => {
                saw_present = true;
                let existing = decode(node.value.as_deref().unwrap_or(""))?;
                let next_tag = tag_of(&existing).bump();
                set_tag(&mut value, next_tag);
                let payload = encode(&value)?;

                match kv.set_cas(key, &payload, ttl, node.modified_index).await {
                    Ok(_) => return Ok(value),
                    Err(RegistryError::TestFailed(_)) => continue,
                    Err(e) => return Err(e),
                }
            }
            Err(RegistryError::KeyNotFound(_)) => {
                if saw_present {
                    return Err(RegistryError::Conflict(format!(
                        "{key}: route was deleted concurrently during upsert"
                    )));
                }

                set_tag(&mut value, ModificationTag::fresh());
                let payload = encode(&value)?;
                match kv.set_create(key, &payload, ttl).await {
                    Ok(_) => return Ok(value),
                    Err(RegistryError::KeyExists(_)) => continue,
                    Err(e) => return Err(e),
                }
            }
            Err(e) => return Err(e),
        }
    }

    Err(RegistryError::Conflict(format!(
        "{key}: exceeded {MAX_CAS_RETRIES} CAS retries"
    )))
}
