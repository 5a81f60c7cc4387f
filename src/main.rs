// Copyright (c) 2025 The nodenet authors
// SPDX-License-Identifier: MIT

use anyhow::Result;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use clap::Parser;
use futures::{StreamExt, TryStreamExt};
use k8s_openapi::api::core::v1::Pod;
use kube::runtime::watcher;
use kube::{Api, Client};
use nodenet::config::Config;
use nodenet::constants::{NODE_PORT_MAX_DEFAULT, NODE_PORT_MIN_DEFAULT};
use nodenet::context::Context;
use nodenet::endpoint::EndpointRegistry;
use nodenet::ipcache::IpCache;
use nodenet::metrics::gather_metrics;
use nodenet::node::StaticNodeAddressing;
use nodenet::pod::PodSnapshot;
use nodenet::reconcilers::mirror::{KubeMirrorClient, LabelMirror};
use nodenet::reconcilers::pod::{PodEvent, PodReconciler, PodStore};
use nodenet::reconcilers::policy::{LoggingPolicyRecomputer, PolicyTrigger};
use nodenet::redirect::NoopRedirectPolicy;
use nodenet::service::ServiceTable;
use std::net::IpAddr;
use std::sync::Arc;
use tokio::sync::{mpsc, watch as watch_channel};
use tracing::{debug, error, info};

/// Node-local network identity cache and host-port service reconciler.
#[derive(Parser, Debug)]
#[command(name = "nodenet", version, about)]
struct Cli {
    /// Name of the node this agent manages
    #[arg(long)]
    node_name: String,

    /// Node addresses eligible for NodePort-style exposure
    #[arg(long = "node-address", value_delimiter = ',')]
    node_addresses: Vec<IpAddr>,

    /// Index of the key used for transparent encryption to this node
    #[arg(long)]
    encrypt_key_index: Option<u8>,

    /// Disable host-port service derivation
    #[arg(long)]
    disable_host_port: bool,

    /// Handle host-networking pods for local redirect policies
    #[arg(long)]
    enable_local_redirect_policy: bool,

    /// Keep handling host-networking pod updates for socket-LB tracing
    #[arg(long)]
    enable_socket_lb_tracing: bool,

    /// Disable mirroring pod labels onto NetEndpoint objects
    #[arg(long)]
    disable_endpoint_mirror: bool,

    /// Disable IPv4 frontends
    #[arg(long)]
    disable_ipv4: bool,

    /// Disable IPv6 frontends
    #[arg(long)]
    disable_ipv6: bool,

    /// Lower bound of the reserved NodePort range (inclusive)
    #[arg(long, default_value_t = NODE_PORT_MIN_DEFAULT)]
    node_port_min: u16,

    /// Upper bound of the reserved NodePort range (inclusive)
    #[arg(long, default_value_t = NODE_PORT_MAX_DEFAULT)]
    node_port_max: u16,

    /// Listen address for the metrics and health endpoints
    #[arg(long, default_value = "0.0.0.0:9965")]
    status_listen: String,
}

fn main() -> Result<()> {
    // Build Tokio runtime with custom thread names
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(4)
        .thread_name("nodenet-agent")
        .enable_all()
        .build()?;

    runtime.block_on(async_main())
}

async fn async_main() -> Result<()> {
    // Initialize logging with custom format
    //
    // Respects RUST_LOG environment variable if set, otherwise defaults to
    // INFO level. Respects RUST_LOG_FORMAT for the output format
    // (text or json).
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    let log_format = std::env::var("RUST_LOG_FORMAT").unwrap_or_else(|_| "text".to_string());

    match log_format.to_lowercase().as_str() {
        "json" => {
            tracing_subscriber::fmt()
                .with_env_filter(env_filter)
                .with_file(true)
                .with_line_number(true)
                .with_thread_names(true)
                .with_target(false)
                .json()
                .init();
        }
        _ => {
            tracing_subscriber::fmt()
                .with_env_filter(env_filter)
                .with_file(true)
                .with_line_number(true)
                .with_thread_names(true)
                .with_target(false)
                .with_ansi(true)
                .compact()
                .init();
        }
    }

    let cli = Cli::parse();

    info!(node = %cli.node_name, "Starting nodenet agent");

    debug!("Initializing Kubernetes client");
    let client = Client::try_default().await?;

    let config = Config {
        enable_host_port: !cli.disable_host_port,
        enable_local_redirect_policy: cli.enable_local_redirect_policy,
        enable_socket_lb_tracing: cli.enable_socket_lb_tracing,
        enable_endpoint_mirror: !cli.disable_endpoint_mirror,
        enable_ipv4: !cli.disable_ipv4,
        enable_ipv6: !cli.disable_ipv6,
        node_port_min: cli.node_port_min,
        node_port_max: cli.node_port_max,
    };

    let (policy_trigger, policy_task) =
        PolicyTrigger::new(Arc::new(LoggingPolicyRecomputer));

    let ctx = Arc::new(Context {
        config,
        ipcache: Arc::new(IpCache::new()),
        services: Arc::new(ServiceTable::new()),
        endpoints: Arc::new(EndpointRegistry::new()),
        node: Arc::new(StaticNodeAddressing::new(
            cli.node_addresses,
            cli.node_name,
            cli.encrypt_key_index,
        )),
        redirect_policy: Arc::new(NoopRedirectPolicy),
        policy_trigger,
        mirror: Arc::new(LabelMirror::new(Arc::new(KubeMirrorClient::new(
            client.clone(),
        )))),
    });

    let reconciler = PodReconciler::new(ctx);
    let store = reconciler.store();

    let (event_tx, event_rx) = mpsc::channel::<PodEvent>(1024);
    let (shutdown_tx, shutdown_rx) = watch_channel::channel(false);

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received shutdown signal");
            let _ = shutdown_tx.send(true);
        }
    });

    // The loop, the watch stream, and the status server should all run
    // until shutdown; any other exit is fatal to the agent.
    let result = tokio::select! {
        () = reconciler.run(event_rx, shutdown_rx) => {
            info!("Pod reconciler exited");
            Ok(())
        }
        result = watch_pods(client, event_tx) => {
            error!("CRITICAL: pod watch stream exited unexpectedly: {result:?}");
            result.and(Err(anyhow::anyhow!("pod watch stream exited unexpectedly")))
        }
        result = serve_status(cli.status_listen, store) => {
            error!("CRITICAL: status server exited unexpectedly: {result:?}");
            result.and(Err(anyhow::anyhow!("status server exited unexpectedly")))
        }
    };

    policy_task.abort();
    result
}

/// Fold the Kubernetes pod watch into the reconciler's ordered event feed.
///
/// Every event carries the full object. The watcher re-lists on restart and
/// replays the world as `InitApply` events followed by `InitDone`, which
/// maps onto the initial-sync watermark.
async fn watch_pods(client: Client, events: mpsc::Sender<PodEvent>) -> Result<()> {
    let api: Api<Pod> = Api::all(client);
    let mut stream = watcher(api, watcher::Config::default()).boxed();

    while let Some(event) = stream.try_next().await? {
        let forwarded = match event {
            watcher::Event::Init => continue,
            watcher::Event::InitApply(pod) | watcher::Event::Apply(pod) => {
                PodEvent::Applied(PodSnapshot::from_pod(&pod))
            }
            watcher::Event::Delete(pod) => PodEvent::Deleted(PodSnapshot::from_pod(&pod)),
            watcher::Event::InitDone => PodEvent::InitialSyncDone,
        };
        if events.send(forwarded).await.is_err() {
            // Reconciler is shutting down.
            return Ok(());
        }
    }

    Ok(())
}

/// Serve `/metrics`, `/healthz`, and the blocking pod read accessor.
async fn serve_status(listen: String, store: PodStore) -> Result<()> {
    let app = Router::new()
        .route("/metrics", get(metrics_handler))
        .route("/healthz", get(healthz_handler))
        .route("/v1/pods/{namespace}/{name}", get(pod_handler))
        .with_state(store);

    info!(listen = %listen, "Serving status endpoints");
    let listener = tokio::net::TcpListener::bind(&listen).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

async fn metrics_handler() -> Response {
    match gather_metrics() {
        Ok(body) => (StatusCode::OK, body).into_response(),
        Err(err) => (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()).into_response(),
    }
}

async fn healthz_handler(State(store): State<PodStore>) -> Response {
    if store.is_synced() {
        (StatusCode::OK, "ok").into_response()
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "syncing").into_response()
    }
}

/// Blocking pod read: waits for the initial sync watermark, then answers
/// from the reconciler's shadow state.
async fn pod_handler(
    State(store): State<PodStore>,
    Path((namespace, name)): Path<(String, String)>,
) -> Response {
    match store.get_cached_pod(&namespace, &name).await {
        Ok(pod) => Json(pod).into_response(),
        Err(err) => (StatusCode::NOT_FOUND, err.to_string()).into_response(),
    }
}
