//! End-to-end scenarios driven over a real bound socket with `reqwest`,
//! covering spec.md §8's seven concrete scenarios against the in-memory
//! `KvStore` backend.

use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use serde_json::json;
use tokio::net::TcpListener;
use tokio::sync::oneshot;

use routing_registry::api;
use routing_registry::auth::{AllowAllValidator, SharedSecretValidator};
use routing_registry::hub::EventHub;
use routing_registry::kv::memory::MemoryKv;
use routing_registry::model::{Route, TcpRouteMapping};
use routing_registry::router::Router;
use routing_registry::store::route_store::RouteStore;
use routing_registry::store::router_group_store::RouterGroupStore;
use routing_registry::serve_with_shutdown;

struct TestServer {
    base_url: String,
    shutdown: Option<oneshot::Sender<()>>,
    handle: tokio::task::JoinHandle<()>,
}

impl TestServer {
    async fn start(require_auth: bool) -> Self {
        let kv = MemoryKv::new();
        let route_store = Arc::new(RouteStore::new(kv.clone()));
        let router_group_store = Arc::new(RouterGroupStore::new(kv));

        let http_hub = EventHub::<Route>::new();
        http_hub.spawn_driver(route_store.watch_route_changes());
        let tcp_hub = EventHub::<TcpRouteMapping>::new();
        tcp_hub.spawn_driver(route_store.watch_tcp_route_changes());

        let state = api::AppState {
            route_store,
            router_group_store,
            http_hub,
            tcp_hub,
            max_ttl: 120,
        };

        let mut router = Router::new();
        if require_auth {
            api::install(&mut router, state, Arc::new(SharedSecretValidator::new("s3cr3t")));
        } else {
            api::install(&mut router, state, Arc::new(AllowAllValidator));
        }

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let (tx, rx) = oneshot::channel::<()>();
        let handle = tokio::spawn(async move {
            serve_with_shutdown(listener, router, async {
                let _ = rx.await;
            })
            .await;
        });

        // Give the accept loop a moment to start.
        tokio::time::sleep(Duration::from_millis(20)).await;

        Self {
            base_url: format!("http://{addr}"),
            shutdown: Some(tx),
            handle,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        self.handle.abort();
    }
}

fn client() -> reqwest::Client {
    // No overall request timeout: the `/events` SSE requests in these tests
    // are deliberately long-lived; per-read waits use `tokio::time::timeout`
    // instead.
    reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(5))
        .build()
        .unwrap()
}

#[tokio::test(flavor = "current_thread")]
async fn scenario_1_upsert_then_read() {
    let server = TestServer::start(false).await;
    let client = client();

    let body = json!([{"route":"a.b.c","port":33,"ip":"1.1.1.1","ttl":55,"log_guid":"x"}]);
    let resp = client.post(server.url("/routing/v1/routes")).json(&body).send().await.unwrap();
    assert_eq!(resp.status(), 200);

    let routes: Vec<Route> = client.get(server.url("/routing/v1/routes")).send().await.unwrap().json().await.unwrap();
    assert_eq!(routes.len(), 1);
    assert_eq!(routes[0].route, "a.b.c");
    assert_eq!(routes[0].modification_tag.index, 0);

    let resp = client.post(server.url("/routing/v1/routes")).json(&body).send().await.unwrap();
    assert_eq!(resp.status(), 200);

    let routes: Vec<Route> = client.get(server.url("/routing/v1/routes")).send().await.unwrap().json().await.unwrap();
    assert_eq!(routes.len(), 1);
    assert_eq!(routes[0].modification_tag.index, 1);
}

#[tokio::test(flavor = "current_thread")]
async fn scenario_3_explicit_delete_observed_on_events() {
    let server = TestServer::start(false).await;
    let client = client();

    let events_resp = client.get(server.url("/routing/v1/events")).send().await.unwrap();
    let mut stream = events_resp.bytes_stream();

    let body = json!([{"route":"a.b.c","port":33,"ip":"1.1.1.1","ttl":45,"log_guid":"x"}]);
    client.post(server.url("/routing/v1/routes")).json(&body).send().await.unwrap();

    let frame = tokio::time::timeout(Duration::from_secs(2), stream.next()).await.unwrap().unwrap().unwrap();
    assert!(String::from_utf8_lossy(&frame).contains("event: Upsert"));

    let delete_body = json!([{"route":"a.b.c","port":33,"ip":"1.1.1.1"}]);
    let resp = client.delete(server.url("/routing/v1/routes")).json(&delete_body).send().await.unwrap();
    assert_eq!(resp.status(), 200);

    let frame = tokio::time::timeout(Duration::from_secs(2), stream.next()).await.unwrap().unwrap().unwrap();
    assert!(String::from_utf8_lossy(&frame).contains("event: Delete"));

    let routes: Vec<Route> = client.get(server.url("/routing/v1/routes")).send().await.unwrap().json().await.unwrap();
    assert!(routes.is_empty());
}

#[tokio::test(flavor = "current_thread")]
async fn scenario_4_router_group_uniqueness() {
    // Router-group administration has no HTTP write endpoint (see api.rs);
    // it goes through the store directly.
    let kv = MemoryKv::new();
    let store = RouterGroupStore::new(kv);
    use routing_registry::model::{RouterGroup, RouterGroupType};

    let rg1 = RouterGroup {
        guid: "G1".into(),
        name: "default-tcp".into(),
        kind: RouterGroupType::Tcp,
        reservable_ports: "1024-65535".into(),
    };
    store.save_router_group(rg1.clone()).await.unwrap();

    let rg2 = RouterGroup {
        guid: "G2".into(),
        name: "default-tcp".into(),
        kind: RouterGroupType::Tcp,
        reservable_ports: "1000-2000".into(),
    };
    let err = store.save_router_group(rg2).await.unwrap_err();
    assert!(matches!(err, routing_registry::error::RegistryError::UniqueField { .. }));
}

#[tokio::test(flavor = "current_thread")]
async fn scenario_5_router_group_name_immutable() {
    let kv = MemoryKv::new();
    let store = RouterGroupStore::new(kv);
    use routing_registry::model::{RouterGroup, RouterGroupType};

    let rg1 = RouterGroup {
        guid: "G1".into(),
        name: "default-tcp".into(),
        kind: RouterGroupType::Tcp,
        reservable_ports: "1024-65535".into(),
    };
    store.save_router_group(rg1).await.unwrap();

    let renamed = RouterGroup {
        guid: "G1".into(),
        name: "renamed-tcp".into(),
        kind: RouterGroupType::Tcp,
        reservable_ports: "1024-65535".into(),
    };
    let err = store.save_router_group(renamed).await.unwrap_err();
    assert!(matches!(
        err,
        routing_registry::error::RegistryError::NonUpdatableField { .. }
    ));
}

#[tokio::test(flavor = "current_thread")]
async fn scenario_6_authz_failure() {
    let server = TestServer::start(true).await;
    let client = client();

    let body = json!([{"route":"a.b.c","port":33,"ip":"1.1.1.1","ttl":55,"log_guid":"x"}]);

    let resp = client.post(server.url("/routing/v1/routes")).json(&body).send().await.unwrap();
    assert_eq!(resp.status(), 401);

    let resp = client
        .post(server.url("/routing/v1/routes"))
        .bearer_auth("wrong-token")
        .json(&body)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 401);

    let resp = client
        .post(server.url("/routing/v1/routes"))
        .bearer_auth("s3cr3t")
        .json(&body)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
}

#[tokio::test(flavor = "current_thread")]
async fn scenario_2_ttl_expiry_produces_delete_event() {
    let server = TestServer::start(false).await;
    let client = client();

    let events_resp = client.get(server.url("/routing/v1/events")).send().await.unwrap();
    let mut stream = events_resp.bytes_stream();

    let body = json!([{"route":"z.a.k","port":63,"ip":"42.42.42.42","ttl":1,"log_guid":"t"}]);
    client.post(server.url("/routing/v1/routes")).json(&body).send().await.unwrap();

    // First frame is the Upsert from the write itself.
    let frame = tokio::time::timeout(Duration::from_secs(2), stream.next()).await.unwrap().unwrap().unwrap();
    assert!(String::from_utf8_lossy(&frame).contains("event: Upsert"));

    // The reaper sweeps on a 200ms tick; a 1s TTL should expire well within 2s.
    let frame = tokio::time::timeout(Duration::from_secs(2), stream.next()).await.unwrap().unwrap().unwrap();
    let text = String::from_utf8_lossy(&frame);
    assert!(text.contains("event: Delete"));
    assert!(text.contains("z.a.k"));
}
