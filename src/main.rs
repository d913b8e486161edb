//! Binary entry point: parses configuration, wires up the KV-backed stores
//! and event hubs, installs the `/routing/v1` HTTP surface, self-registers,
//! and serves until a shutdown signal arrives.

use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tokio::net::TcpListener;

use routing_registry::auth::{AllowAllValidator, SharedSecretValidator};
use routing_registry::config::{Cli, Config};
use routing_registry::hub::EventHub;
use routing_registry::kv::KvStore;
use routing_registry::kv::etcd::EtcdKv;
use routing_registry::kv::memory::MemoryKv;
use routing_registry::model::{Route, TcpRouteMapping};
use routing_registry::registration::SelfRegistration;
use routing_registry::router::Router;
use routing_registry::store::route_store::RouteStore;
use routing_registry::store::router_group_store::RouterGroupStore;
use routing_registry::{api, serve_with_shutdown, tracing_setup};

/// Sentinel `--kv-endpoints` value selecting the embedded [`MemoryKv`]
/// backend instead of a real etcd cluster, for dev-mode and single-box runs.
const MEMORY_KV_SENTINEL: &str = "memory";

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let config = match Config::load(cli) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("configuration error: {err}");
            return ExitCode::FAILURE;
        }
    };

    tracing_setup::init_tracing(&config.log_level);

    match run(config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            tracing::error!(%err, "startup failed");
            ExitCode::FAILURE
        }
    }
}

async fn run(config: Config) -> anyhow::Result<()> {
    let kv = open_kv(&config.kv_endpoints)?;

    let route_store = Arc::new(RouteStore::new(kv.clone()));
    let router_group_store = Arc::new(RouterGroupStore::new(kv));

    let http_hub = EventHub::<Route>::new();
    http_hub.spawn_driver(route_store.watch_route_changes());

    let tcp_hub = EventHub::<TcpRouteMapping>::new();
    tcp_hub.spawn_driver(route_store.watch_tcp_route_changes());

    let state = api::AppState {
        route_store: route_store.clone(),
        router_group_store,
        http_hub,
        tcp_hub,
        max_ttl: config.max_ttl,
    };

    let mut router = Router::new();
    if config.dev_mode {
        tracing::warn!("dev-mode: bearer-token auth disabled, accepting any token");
        api::install(&mut router, state, Arc::new(AllowAllValidator));
    } else {
        let secret = config
            .auth_secret
            .clone()
            .expect("non-dev-mode config always carries an auth secret");
        api::install(&mut router, state, Arc::new(SharedSecretValidator::new(secret)));
    }

    let listener = TcpListener::bind(("0.0.0.0", config.bind_port)).await?;

    let registration = SelfRegistration::new(
        route_store,
        &config.system_domain,
        config.advertised_ip,
        config.bind_port,
        config.max_ttl,
    );

    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();
    let registration_task = tokio::spawn(async move {
        registration
            .run(async {
                let _ = shutdown_rx.await;
            })
            .await;
    });

    serve_with_shutdown(listener, router, async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::warn!(%err, "failed to install ctrl-c handler, shutting down anyway");
        }
        tracing::info!("shutdown requested");
    })
    .await;

    let _ = shutdown_tx.send(());
    let _ = registration_task.await;

    Ok(())
}

/// Selects the KV backend named by `--kv-endpoints`: the literal value
/// `memory` embeds [`MemoryKv`]; anything else is taken as the URL of a
/// single etcd v2 endpoint (the first entry if more than one is given —
/// this adapter does not itself fail over across a cluster list).
fn open_kv(kv_endpoints: &[String]) -> anyhow::Result<Arc<dyn KvStore>> {
    if kv_endpoints.iter().any(|e| e == MEMORY_KV_SENTINEL) {
        return Ok(MemoryKv::new());
    }

    let endpoint = kv_endpoints
        .first()
        .ok_or_else(|| anyhow::anyhow!("kv_endpoints must name at least one endpoint"))?;
    if kv_endpoints.len() > 1 {
        tracing::warn!(
            endpoint = %endpoint,
            ignored = kv_endpoints.len() - 1,
            "multiple kv_endpoints given; using the first and ignoring the rest"
        );
    }
    Ok(Arc::new(EtcdKv::new(endpoint.clone())))
}
