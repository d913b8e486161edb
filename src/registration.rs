//! Self-registration (C6, spec.md §4.6): on startup the service advertises
//! its own HTTP API route so that other instances of itself (and anything
//! else consuming the registry) can find it through the same mechanism as
//! every other route. The route is refreshed on a heartbeat well inside its
//! TTL and removed on graceful shutdown.

use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use crate::kv::KvStore;
use crate::model::{ModificationTag, Route};
use crate::store::route_store::RouteStore;

/// The heartbeat fires at `ttl / HEARTBEAT_DIVISOR`, comfortably inside the
/// "at least every TTL/3" bound spec.md §4.6 requires.
const HEARTBEAT_DIVISOR: i64 = 3;

pub struct SelfRegistration<K: KvStore + ?Sized> {
    store: Arc<RouteStore<K>>,
    route: Route,
}

impl<K: KvStore + ?Sized> SelfRegistration<K> {
    pub fn new(
        store: Arc<RouteStore<K>>,
        system_domain: &str,
        advertised_ip: IpAddr,
        bind_port: u16,
        ttl: i64,
    ) -> Self {
        let route = Route {
            route: format!("api.{system_domain}/routing"),
            port: bind_port,
            ip: advertised_ip.to_string(),
            ttl,
            log_guid: uuid::Uuid::new_v4().to_string(),
            route_service_url: None,
            modification_tag: ModificationTag::fresh(),
        };
        Self { store, route }
    }

    /// Writes the initial registration, then refreshes it on a heartbeat
    /// until `shutdown` resolves, at which point it deletes the route. A
    /// hard process exit (no graceful shutdown) instead relies on the TTL
    /// to expire it, per spec.md §4.6.
    pub async fn run(&self, shutdown: impl std::future::Future<Output = ()>) {
        if let Err(err) = self.store.save_route(self.route.clone()).await {
            tracing::error!(%err, route = %self.route.route, "failed to self-register the service's own route");
            return;
        }
        tracing::info!(route = %self.route.route, ttl = self.route.ttl, "self-registered");

        let heartbeat = Duration::from_secs((self.route.ttl / HEARTBEAT_DIVISOR).max(1) as u64);
        let mut ticker = tokio::time::interval(heartbeat);
        ticker.tick().await; // first tick fires immediately; the write above already registered.

        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(err) = self.store.save_route(self.route.clone()).await {
                        tracing::warn!(%err, route = %self.route.route, "failed to refresh self-registration heartbeat");
                    }
                }
                _ = &mut shutdown => {
                    if let Err(err) = self.store.delete_route(&self.route).await {
                        tracing::warn!(%err, route = %self.route.route, "failed to delete self-registration route on shutdown");
                    }
                    return;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::memory::MemoryKv;

    #[tokio::test(flavor = "current_thread")]
    async fn run_registers_immediately_and_deletes_on_shutdown() {
        let kv = MemoryKv::new();
        let store = Arc::new(RouteStore::new(kv));
        let registration = SelfRegistration::new(
            store.clone(),
            "example.internal",
            "10.0.0.5".parse().unwrap(),
            8080,
            90,
        );

        let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();
        let run = tokio::spawn(async move {
            registration
                .run(async {
                    let _ = shutdown_rx.await;
                })
                .await;
        });

        // Give the initial registration write a chance to land.
        tokio::task::yield_now().await;
        tokio::task::yield_now().await;

        let routes = store.read_routes().await.unwrap();
        assert_eq!(routes.len(), 1);
        assert_eq!(routes[0].route, "api.example.internal/routing");

        shutdown_tx.send(()).unwrap();
        run.await.unwrap();

        assert!(store.read_routes().await.unwrap().is_empty());
    }
}
