//! The `/routing/v1` HTTP surface (C6): route/TCP-route/router-group CRUD
//! and SSE change feeds, built directly on [`crate::router`]'s
//! `Router`/`Route`/extractor/[`Responder`](crate::responder::Responder)
//! machinery.
//!
//! Every handler follows the request lifecycle from the component design:
//! scope check (attached as route middleware, see [`crate::auth`]) → JSON
//! decode → validate every element → dispatch to the matching store. The
//! HTTP table in the external interfaces section is reproduced here
//! one-for-one; there is deliberately no write endpoint for router groups —
//! the external interface table only ever exposes `GET /router_groups`,
//! administration goes through [`crate::store::router_group_store`] directly.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use serde::{Deserialize, Serialize};
use tokio_stream::{Stream, StreamExt, wrappers::ReceiverStream};

use crate::auth::{TokenValidator, scopes};
use crate::bytes::TakoBytes;
use crate::error::RegistryError;
use crate::extractors::json::Json;
use crate::extractors::state::State;
use crate::hub::EventHub;
use crate::kv::KvStore;
use crate::model::{ChangeEvent, ModificationTag, Route, RouterGroup, TcpRouteMapping};
use crate::router::Router;
use crate::sse::{Sse, SseEvent};
use crate::store::route_store::RouteStore;
use crate::store::router_group_store::RouterGroupStore;
use crate::validate;

/// Shared application state behind every `/routing/v1` handler. Built once
/// at startup (see `main.rs`) and installed into the router's own state,
/// scoped to that `Router` instance so multiple registries can run in one
/// process without sharing a store.
pub struct AppState {
    pub route_store: Arc<RouteStore<dyn KvStore>>,
    pub router_group_store: Arc<RouterGroupStore<dyn KvStore>>,
    pub http_hub: Arc<EventHub<Route>>,
    pub tcp_hub: Arc<EventHub<TcpRouteMapping>>,
    pub max_ttl: i64,
}

/// Registers the `/routing/v1` surface on `router`, gating each endpoint
/// with the scope named in spec.md §6's endpoint table.
pub fn install<V: TokenValidator>(router: &mut Router, state: AppState, validator: Arc<V>) {
    router.state(state);

    router
        .route(hyper::Method::POST, "/routing/v1/routes", post_routes)
        .middleware(crate::auth::require_scope(validator.clone(), scopes::ROUTES_WRITE).into_middleware());
    router
        .route(hyper::Method::DELETE, "/routing/v1/routes", delete_routes)
        .middleware(crate::auth::require_scope(validator.clone(), scopes::ROUTES_WRITE).into_middleware());
    router
        .route(hyper::Method::GET, "/routing/v1/routes", get_routes)
        .middleware(crate::auth::require_scope(validator.clone(), scopes::ROUTES_READ).into_middleware());
    router
        .route(hyper::Method::GET, "/routing/v1/events", get_route_events)
        .middleware(crate::auth::require_scope(validator.clone(), scopes::ROUTES_READ).into_middleware());

    router
        .route(hyper::Method::POST, "/routing/v1/tcp_routes/create", post_tcp_routes)
        .middleware(crate::auth::require_scope(validator.clone(), scopes::ROUTES_WRITE).into_middleware());
    router
        .route(hyper::Method::POST, "/routing/v1/tcp_routes/delete", delete_tcp_routes)
        .middleware(crate::auth::require_scope(validator.clone(), scopes::ROUTES_WRITE).into_middleware());
    router
        .route(hyper::Method::GET, "/routing/v1/tcp_routes", get_tcp_routes)
        .middleware(crate::auth::require_scope(validator.clone(), scopes::ROUTES_READ).into_middleware());
    router
        .route(hyper::Method::GET, "/routing/v1/tcp_routes/events", get_tcp_route_events)
        .middleware(crate::auth::require_scope(validator.clone(), scopes::ROUTES_READ).into_middleware());

    router
        .route(hyper::Method::GET, "/routing/v1/router_groups", get_router_groups)
        .middleware(crate::auth::require_scope(validator, scopes::ROUTER_GROUPS_READ).into_middleware());
}

async fn post_routes(
    State(state): State<AppState>,
    Json(routes): Json<Vec<Route>>,
) -> Result<(), RegistryError> {
    for route in &routes {
        validate::validate_route(route, state.max_ttl)?;
    }
    for route in routes {
        state.route_store.save_route(route).await?;
    }
    Ok(())
}

/// Minimal wire shape for a route deletion: only the identity fields are
/// required (see spec.md §8 scenario 3's delete body, which omits
/// `log_guid` and `modification_tag` entirely — deletion matches by
/// identity key only, per the resolved Open Question in `DESIGN.md`).
#[derive(Debug, Deserialize)]
struct RouteIdentity {
    route: String,
    port: u16,
    ip: String,
}

async fn delete_routes(
    State(state): State<AppState>,
    Json(targets): Json<Vec<RouteIdentity>>,
) -> Result<(), RegistryError> {
    for target in targets {
        let route = Route {
            route: target.route,
            port: target.port,
            ip: target.ip,
            ttl: 0,
            log_guid: String::new(),
            route_service_url: None,
            modification_tag: ModificationTag::fresh(),
        };
        state.route_store.delete_route(&route).await?;
    }
    Ok(())
}

async fn get_routes(State(state): State<AppState>) -> Result<Json<Vec<Route>>, RegistryError> {
    Ok(Json(state.route_store.read_routes().await?))
}

async fn get_route_events(State(state): State<AppState>) -> Sse<impl Stream<Item = SseEvent>> {
    Sse::new(subscribe(state.http_hub.clone()))
}

#[derive(Debug, Deserialize)]
struct TcpRouteIdentity {
    router_group_guid: String,
    #[serde(rename = "port")]
    external_port: u16,
    backend_ip: String,
    backend_port: u16,
}

async fn find_router_group(state: &AppState, guid: &str) -> Result<RouterGroup, RegistryError> {
    state
        .router_group_store
        .read_router_groups()
        .await?
        .into_iter()
        .find(|rg| rg.guid == guid)
        .ok_or_else(|| {
            RegistryError::TcpRouteMappingInvalid(format!("router group {guid:?} does not exist"))
        })
}

async fn post_tcp_routes(
    State(state): State<AppState>,
    Json(mappings): Json<Vec<TcpRouteMapping>>,
) -> Result<(), RegistryError> {
    for mapping in &mappings {
        let router_group = find_router_group(&state, &mapping.router_group_guid).await?;
        validate::validate_tcp_route_mapping(mapping, &router_group, state.max_ttl)?;
    }
    for mapping in mappings {
        state.route_store.save_tcp_route_mapping(mapping).await?;
    }
    Ok(())
}

async fn delete_tcp_routes(
    State(state): State<AppState>,
    Json(targets): Json<Vec<TcpRouteIdentity>>,
) -> Result<(), RegistryError> {
    for target in targets {
        let mapping = TcpRouteMapping {
            router_group_guid: target.router_group_guid,
            external_port: target.external_port,
            backend_ip: target.backend_ip,
            backend_port: target.backend_port,
            ttl: 0,
            modification_tag: ModificationTag::fresh(),
        };
        state.route_store.delete_tcp_route_mapping(&mapping).await?;
    }
    Ok(())
}

async fn get_tcp_routes(
    State(state): State<AppState>,
) -> Result<Json<Vec<TcpRouteMapping>>, RegistryError> {
    Ok(Json(state.route_store.read_tcp_route_mappings().await?))
}

async fn get_tcp_route_events(State(state): State<AppState>) -> Sse<impl Stream<Item = SseEvent>> {
    Sse::new(subscribe(state.tcp_hub.clone()))
}

async fn get_router_groups(
    State(state): State<AppState>,
) -> Result<Json<Vec<RouterGroup>>, RegistryError> {
    Ok(Json(state.router_group_store.read_router_groups().await?))
}

/// Subscribes to `hub` and returns a stream of already-encoded SSE frames.
/// Unsubscribes as soon as the stream is dropped (client disconnect, or the
/// handler's connection task being cancelled), per spec.md §5's
/// "HTTP request handlers propagate client disconnects to their SSE
/// subscription, which unsubscribes from the hub."
fn subscribe<T>(hub: Arc<EventHub<T>>) -> impl Stream<Item = SseEvent>
where
    T: Serialize + Send + Sync + 'static,
{
    let (id, rx) = hub.subscribe();
    let stream = SubscriberStream {
        hub,
        id,
        inner: ReceiverStream::new(rx),
    };
    stream.map(|event| encode_change_event(&event))
}

fn encode_change_event<T: Serialize>(event: &ChangeEvent<T>) -> SseEvent {
    let payload = serde_json::to_vec(&event.payload).unwrap_or_default();
    SseEvent::new(
        event.index.to_string(),
        event.kind.wire_name(),
        TakoBytes::from(bytes::Bytes::from(payload)),
    )
}

/// A hub subscription that unsubscribes on drop rather than relying solely
/// on the hub's lazy drop-on-send-failure cleanup.
struct SubscriberStream<T> {
    hub: Arc<EventHub<T>>,
    id: u64,
    inner: ReceiverStream<Arc<ChangeEvent<T>>>,
}

impl<T: Send + Sync + 'static> Stream for SubscriberStream<T> {
    type Item = Arc<ChangeEvent<T>>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        Pin::new(&mut this.inner).poll_next(cx)
    }
}

impl<T> Drop for SubscriberStream<T> {
    fn drop(&mut self) {
        self.hub.unsubscribe(self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::memory::MemoryKv;
    use futures_util::StreamExt as _;

    #[tokio::test(flavor = "current_thread")]
    async fn subscriber_stream_unsubscribes_on_drop() {
        let hub = EventHub::<Route>::new();
        let stream = subscribe(hub.clone());
        tokio::pin!(stream);
        // Poll once to register interest, then drop.
        let _ = futures_util::poll!(stream.next());
        drop(stream);
        // After drop, dispatch should find no subscribers to notify.
        hub.close();
    }

    #[tokio::test(flavor = "current_thread")]
    async fn find_router_group_reports_missing() {
        let kv = MemoryKv::new();
        let state = AppState {
            route_store: Arc::new(RouteStore::new(kv.clone())),
            router_group_store: Arc::new(RouterGroupStore::new(kv)),
            http_hub: EventHub::new(),
            tcp_hub: EventHub::new(),
            max_ttl: 120,
        };
        let err = find_router_group(&state, "missing").await.unwrap_err();
        assert!(matches!(err, RegistryError::TcpRouteMappingInvalid(_)));
    }
}
