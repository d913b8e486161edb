//! Route store (C2): upsert/delete/read/watch for HTTP routes and TCP route
//! mappings, sharing the CAS algorithm in [`crate::store::upsert_with_cas`].

use std::sync::Arc;

use futures_util::StreamExt;
use futures_util::stream::BoxStream;

use crate::error::RegistryError;
use crate::kv::KvStore;
use crate::model::{ChangeEvent, ModificationTag, Route, TcpRouteMapping};
use crate::store::{ROUTES_PREFIX, TCP_ROUTES_PREFIX, classify, upsert_with_cas};

fn route_key(route: &str, ip: &str, port: u16) -> String {
    format!("{ROUTES_PREFIX}/{},{ip}:{port}", urlencoding::encode(route))
}

fn tcp_key(group_guid: &str, external_port: u16, backend_ip: &str, backend_port: u16) -> String {
    format!("{TCP_ROUTES_PREFIX}/{group_guid}/{external_port}/{backend_ip}:{backend_port}")
}

fn decode_route(json: &str) -> Result<Route, RegistryError> {
    serde_json::from_str(json).map_err(|e| RegistryError::DbCommunication(e.to_string()))
}

fn encode_route(route: &Route) -> Result<String, RegistryError> {
    serde_json::to_string(route).map_err(|e| RegistryError::DbCommunication(e.to_string()))
}

fn decode_tcp(json: &str) -> Result<TcpRouteMapping, RegistryError> {
    serde_json::from_str(json).map_err(|e| RegistryError::DbCommunication(e.to_string()))
}

fn encode_tcp(mapping: &TcpRouteMapping) -> Result<String, RegistryError> {
    serde_json::to_string(mapping).map_err(|e| RegistryError::DbCommunication(e.to_string()))
}

/// Swallows `IndexCleared` transparently (the watch reopens at the KV layer
/// already; here we simply stop surfacing the gap marker) and terminates
/// the stream after the first other error, matching the watch contract in
/// §4.2: "on any other error, emit it on errors and terminate."
fn filter_watch_errors<T: Send + 'static>(
    raw: BoxStream<'static, Result<crate::kv::WatchEvent, RegistryError>>,
    decode: impl Fn(&str) -> Result<T, RegistryError> + Send + Sync + 'static,
) -> BoxStream<'static, Result<ChangeEvent<T>, RegistryError>> {
    let stream = raw.scan(false, move |done, item| {
        if *done {
            return futures_util::future::ready(None);
        }
        let out = match item {
            Ok(event) => {
                let kind = classify(&event);
                // etcd's delete/expire responses carry no value on `node`; the
                // last value lives on `prev_node`. Fall back to it so a
                // delete/expire doesn't starve decode() and kill the stream.
                let raw_value = event
                    .node
                    .value
                    .as_deref()
                    .or_else(|| event.prev_node.as_ref().and_then(|p| p.value.as_deref()))
                    .unwrap_or("");
                match decode(raw_value) {
                    Ok(payload) => Some(Some(Ok(ChangeEvent {
                        kind,
                        index: event.node.modified_index,
                        payload,
                    }))),
                    Err(e) => {
                        *done = true;
                        Some(Some(Err(e)))
                    }
                }
            }
            Err(RegistryError::IndexCleared) => Some(None),
            Err(e) => {
                *done = true;
                Some(Some(Err(e)))
            }
        };
        futures_util::future::ready(out)
    });
    Box::pin(stream.filter_map(futures_util::future::ready))
}

pub struct RouteStore<K: KvStore + ?Sized> {
    kv: Arc<K>,
}

impl<K: KvStore + ?Sized> RouteStore<K> {
    pub fn new(kv: Arc<K>) -> Self {
        Self { kv }
    }

    pub async fn save_route(&self, mut route: Route) -> Result<Route, RegistryError> {
        let key = route_key(&route.route, &route.ip, route.port);
        route.modification_tag = ModificationTag::fresh();
        upsert_with_cas(
            &*self.kv,
            &key,
            Some(route.ttl),
            route,
            decode_route,
            encode_route,
            |r| &r.modification_tag,
            |r, tag| r.modification_tag = tag,
        )
        .await
    }

    pub async fn delete_route(&self, route: &Route) -> Result<(), RegistryError> {
        let key = route_key(&route.route, &route.ip, route.port);
        self.kv.delete(&key).await.map(|_| ()).map_err(|e| match e {
            RegistryError::KeyNotFound(_) => RegistryError::KeyNotFound(format!(
                "The specified route ({},{}:{}) could not be found.",
                route.route, route.ip, route.port
            )),
            other => other,
        })
    }

    pub async fn read_routes(&self) -> Result<Vec<Route>, RegistryError> {
        match self.kv.get(ROUTES_PREFIX, true).await {
            Ok(node) => node
                .nodes
                .iter()
                .filter_map(|n| n.value.as_deref())
                .map(decode_route)
                .collect(),
            Err(RegistryError::KeyNotFound(_)) => Ok(Vec::new()),
            Err(e) => Err(e),
        }
    }

    pub fn watch_route_changes(&self) -> BoxStream<'static, Result<ChangeEvent<Route>, RegistryError>> {
        let raw = self.kv.watch(ROUTES_PREFIX, None);
        filter_watch_errors(raw, decode_route)
    }

    pub async fn save_tcp_route_mapping(
        &self,
        mut mapping: TcpRouteMapping,
    ) -> Result<TcpRouteMapping, RegistryError> {
        let key = tcp_key(
            &mapping.router_group_guid,
            mapping.external_port,
            &mapping.backend_ip,
            mapping.backend_port,
        );
        mapping.modification_tag = ModificationTag::fresh();
        upsert_with_cas(
            &*self.kv,
            &key,
            Some(mapping.ttl),
            mapping,
            decode_tcp,
            encode_tcp,
            |m| &m.modification_tag,
            |m, tag| m.modification_tag = tag,
        )
        .await
    }

    pub async fn delete_tcp_route_mapping(
        &self,
        mapping: &TcpRouteMapping,
    ) -> Result<(), RegistryError> {
        let key = tcp_key(
            &mapping.router_group_guid,
            mapping.external_port,
            &mapping.backend_ip,
            mapping.backend_port,
        );
        self.kv.delete(&key).await.map(|_| ()).map_err(|e| match e {
            RegistryError::KeyNotFound(_) => RegistryError::KeyNotFound(format!(
                "The specified tcp route mapping ({}) could not be found.",
                mapping.identity_key()
            )),
            other => other,
        })
    }

    pub async fn read_tcp_route_mappings(&self) -> Result<Vec<TcpRouteMapping>, RegistryError> {
        match self.kv.get(TCP_ROUTES_PREFIX, true).await {
            Ok(node) => node
                .nodes
                .iter()
                .filter_map(|n| n.value.as_deref())
                .map(decode_tcp)
                .collect(),
            Err(RegistryError::KeyNotFound(_)) => Ok(Vec::new()),
            Err(e) => Err(e),
        }
    }

    pub fn watch_tcp_route_changes(
        &self,
    ) -> BoxStream<'static, Result<ChangeEvent<TcpRouteMapping>, RegistryError>> {
        let raw = self.kv.watch(TCP_ROUTES_PREFIX, None);
        filter_watch_errors(raw, decode_tcp)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::memory::MemoryKv;
    use crate::kv::{Action, Node, WatchEvent};
    use futures_util::stream;

    fn node(key: &str, value: Option<&str>, modified_index: u64) -> Node {
        Node {
            key: key.to_string(),
            value: value.map(str::to_string),
            modified_index,
            created_index: modified_index,
            ttl: None,
            dir: false,
            nodes: Vec::new(),
        }
    }

    fn sample_route() -> Route {
        Route {
            route: "a.b.c".into(),
            port: 33,
            ip: "1.1.1.1".into(),
            ttl: 55,
            log_guid: "x".into(),
            route_service_url: None,
            modification_tag: ModificationTag::fresh(),
        }
    }

    #[tokio::test(flavor = "current_thread")]
    async fn upsert_then_read_assigns_monotone_index() {
        let kv = MemoryKv::new();
        let store = RouteStore::new(kv);

        let saved = store.save_route(sample_route()).await.unwrap();
        assert_eq!(saved.modification_tag.index, 0);

        let routes = store.read_routes().await.unwrap();
        assert_eq!(routes.len(), 1);
        assert_eq!(routes[0].modification_tag.index, 0);

        let saved_again = store.save_route(sample_route()).await.unwrap();
        assert_eq!(saved_again.modification_tag.index, 1);
        assert_eq!(saved_again.modification_tag.guid, saved.modification_tag.guid);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn delete_missing_route_reports_key_not_found() {
        let kv = MemoryKv::new();
        let store = RouteStore::new(kv);
        let err = store.delete_route(&sample_route()).await.unwrap_err();
        assert!(matches!(err, RegistryError::KeyNotFound(_)));
    }

    #[tokio::test(flavor = "current_thread")]
    async fn delete_then_read_is_empty() {
        let kv = MemoryKv::new();
        let store = RouteStore::new(kv);
        store.save_route(sample_route()).await.unwrap();
        store.delete_route(&sample_route()).await.unwrap();
        assert!(store.read_routes().await.unwrap().is_empty());
    }

    /// Reproduces etcd v2's delete/expire wire shape, where `node.value` is
    /// absent and the last value lives only on `prev_node`. A decoder that
    /// reads `node.value` alone fails here and tears down the whole stream;
    /// the fallback to `prev_node` must keep it alive.
    #[tokio::test(flavor = "current_thread")]
    async fn delete_event_with_value_only_on_prev_node_does_not_end_the_stream() {
        let route = sample_route();
        let payload = encode_route(&route).unwrap();

        let delete_event = WatchEvent {
            action: Action::Delete,
            node: node(&route.route, None, 2),
            prev_node: Some(node(&route.route, Some(&payload), 1)),
        };
        let next_route = Route {
            port: 34,
            ..sample_route()
        };
        let next_payload = encode_route(&next_route).unwrap();
        let create_event = WatchEvent {
            action: Action::Create,
            node: node(&next_route.route, Some(&next_payload), 3),
            prev_node: None,
        };

        let raw = Box::pin(stream::iter(vec![Ok(delete_event), Ok(create_event)]));
        let mut events = filter_watch_errors(raw, decode_route);

        let first = events.next().await.unwrap().unwrap();
        assert_eq!(first.kind, crate::model::ChangeKind::Delete);
        assert_eq!(first.payload.port, route.port);

        let second = events.next().await.unwrap().unwrap();
        assert_eq!(second.kind, crate::model::ChangeKind::Create);
        assert_eq!(second.payload.port, next_route.port);

        assert!(events.next().await.is_none());
    }
}
