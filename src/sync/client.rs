//! The sync client proper (C7): ties a [`Transport`] to a [`Registry`],
//! running `SubscribeAndReconcile` and the periodic snapshot ticker
//! concurrently, per spec.md §4.7.

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use tokio::sync::Mutex;

use crate::model::Route;
use crate::sync::transport::{EventKind, SyncEvent, TokenFetcher, Transport, TransportError};
use crate::sync::trie::{Endpoint, Registry};

/// Fixed reconnect delay between `SubscribeAndReconcile` attempts (spec.md
/// §5: "fixed `SubscriptionRetryInterval` (default 1s)" — the resolved Open
/// Question decision against jittered backoff).
const DEFAULT_SUBSCRIPTION_RETRY_INTERVAL: Duration = Duration::from_secs(1);

pub struct SyncClient<F: TokenFetcher> {
    transport: Arc<Transport<F>>,
    registry: Arc<Registry>,
    fetch_routes_interval: Duration,
    subscription_retry_interval: Duration,
    /// Last-known `(uri -> endpoints)` view, used to unregister routes that
    /// drop out of a snapshot or a stream event.
    known: Mutex<HashMap<String, HashSet<Endpoint>>>,
}

impl<F: TokenFetcher> SyncClient<F> {
    pub fn new(transport: Arc<Transport<F>>, registry: Arc<Registry>, fetch_routes_interval: Duration) -> Self {
        Self {
            transport,
            registry,
            fetch_routes_interval,
            subscription_retry_interval: DEFAULT_SUBSCRIPTION_RETRY_INTERVAL,
            known: Mutex::new(HashMap::new()),
        }
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Runs the subscription loop and the periodic ticker concurrently until
    /// `shutdown` resolves.
    pub async fn run(self: Arc<Self>, shutdown: impl Future<Output = ()>) {
        let subscribe = self.clone().subscribe_and_reconcile_loop();
        let ticker = self.clone().periodic_sync_loop();
        tokio::pin!(subscribe, ticker, shutdown);
        tokio::select! {
            _ = &mut subscribe => {},
            _ = &mut ticker => {},
            _ = &mut shutdown => {
                tracing::info!("sync client shutting down");
            },
        }
    }

    async fn subscribe_and_reconcile_loop(self: Arc<Self>) {
        loop {
            if let Err(err) = self.snapshot_then_stream().await {
                tracing::warn!(%err, "sync client lost its subscription, will resync");
            }
            tokio::time::sleep(self.subscription_retry_interval).await;
        }
    }

    async fn periodic_sync_loop(self: Arc<Self>) {
        let mut ticker = tokio::time::interval(self.fetch_routes_interval);
        loop {
            ticker.tick().await;
            if let Err(err) = self.full_reconcile().await {
                tracing::warn!(%err, "periodic route sync failed");
            }
        }
    }

    /// On (re)connect: full snapshot applied as the new truth, then a
    /// continuous apply of streamed events until the stream itself errors
    /// (network failure, token expiry, or an `IndexCleared` gap on the
    /// server that tears down the SSE connection).
    async fn snapshot_then_stream(&self) -> Result<(), TransportError> {
        self.full_reconcile().await?;

        let stream = self
            .transport
            .subscribe_events::<Route>("/routing/v1/events")
            .await?;
        tokio::pin!(stream);
        while let Some(event) = stream.next().await {
            self.apply_event(event?).await;
        }
        Ok(())
    }

    /// Fetches the current full route list and reconciles it against the
    /// registry: registers everything present, unregisters anything
    /// previously known but now absent from the snapshot.
    async fn full_reconcile(&self) -> Result<(), TransportError> {
        let routes = self.transport.fetch_routes().await?;

        let mut fresh: HashMap<String, HashSet<Endpoint>> = HashMap::new();
        for route in &routes {
            let endpoint = Endpoint::new(route.ip.clone(), route.port);
            self.registry.register(&route.route, endpoint.clone());
            fresh.entry(route.route.clone()).or_default().insert(endpoint);
        }

        let mut known = self.known.lock().await;
        for (uri, endpoints) in known.iter() {
            let still_present = fresh.get(uri);
            for endpoint in endpoints {
                let keep = still_present.is_some_and(|fresh_eps| fresh_eps.contains(endpoint));
                if !keep {
                    self.registry.unregister(uri, endpoint);
                }
            }
        }
        *known = fresh;
        Ok(())
    }

    /// Applying a snapshot and then a streamed event for the same route is
    /// idempotent by construction (register/unregister are insert-or-replace
    /// by identity), matching spec.md §5's ordering guarantee.
    async fn apply_event(&self, event: SyncEvent<Route>) {
        let route = event.payload;
        let endpoint = Endpoint::new(route.ip.clone(), route.port);
        let mut known = self.known.lock().await;
        match event.kind {
            EventKind::Upsert => {
                self.registry.register(&route.route, endpoint.clone());
                known.entry(route.route.clone()).or_default().insert(endpoint);
            }
            EventKind::Delete => {
                self.registry.unregister(&route.route, &endpoint);
                if let Some(set) = known.get_mut(&route.route) {
                    set.remove(&endpoint);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct StubFetcher(AtomicUsize);

    #[async_trait]
    impl TokenFetcher for StubFetcher {
        async fn fetch_token(&self, _force_refresh: bool) -> anyhow::Result<String> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok("test-token".to_string())
        }
    }

    #[tokio::test(flavor = "current_thread")]
    async fn apply_event_registers_and_unregisters_by_identity() {
        let transport = Arc::new(Transport::new(
            "http://example.invalid",
            Arc::new(StubFetcher(AtomicUsize::new(0))),
        ));
        let registry = Arc::new(Registry::new());
        let client = SyncClient::new(transport, registry.clone(), Duration::from_secs(30));

        let route = Route {
            route: "a.b.c".to_string(),
            port: 80,
            ip: "1.1.1.1".to_string(),
            ttl: 60,
            log_guid: "g".to_string(),
            route_service_url: None,
            modification_tag: crate::model::ModificationTag::fresh(),
        };

        client
            .apply_event(SyncEvent {
                index: 1,
                kind: EventKind::Upsert,
                payload: route.clone(),
            })
            .await;
        assert!(registry.lookup("a.b.c").is_some());

        client
            .apply_event(SyncEvent {
                index: 2,
                kind: EventKind::Delete,
                payload: route,
            })
            .await;
        assert!(registry.lookup("a.b.c").is_none());
    }
}
