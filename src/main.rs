/*
* Copyright (C) 2025 Pedro Henrique / phkaiser13
*
* File: src/main.rs
*
* This file is the main entry point for the keycloak-operator. It sets up and
* runs the reconciliation loops for the Keycloak resources the operator
* converges.
*
* Architecture:
* 1.  **Configuration**: `OperatorConfig` is loaded from defaults, an optional
*     YAML file and `KEYCLOAK_OPERATOR_*` environment variables.
* 2.  **Logging**: `tracing` is initialized with an `EnvFilter` and JSON or
*     human-readable output.
* 3.  **Controllers**: one `Controller` per reconciled kind
*     (`KeycloakRealmComponent`, `KeycloakClient`). Each one is fed by a watch
*     stream that only passes generation changes, so the operator's own status
*     writes never wake it up again. Starting deletion bumps the generation.
*     Retries after a failure are driven by the requeue the reconciler returns.
* 4.  **Concurrent Execution**: the controllers and the metrics server run
*     together under `tokio::join!` until a termination signal arrives.
*
* SPDX-License-Identifier: Apache-2.0
*/

use config::OperatorConfig;
use controllers::helper::Context;
use crds::{KeycloakClient, KeycloakRealmComponent};
use futures::stream::StreamExt;
use kube::{
    runtime::{predicates, reflector, watcher, WatchStreamExt},
    Api, Client,
};
use kube_runtime::Controller;
use prometheus::{Encoder, Registry, TextEncoder};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use warp::Filter;

mod config;
mod crds;
mod error;
mod keycloak;
mod metrics;
mod controllers {
    pub mod backoff;
    pub mod chain;
    pub mod client_controller;
    pub mod helper;
    pub mod ownership;
    pub mod realm_component_controller;
}

/// Initializes structured logging. `RUST_LOG` overrides the default `info` level.
fn init_tracing(log_format: &str) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);

    if log_format == "pretty" {
        registry.with(tracing_subscriber::fmt::layer().pretty()).try_init()?;
    } else {
        registry.with(tracing_subscriber::fmt::layer().json()).try_init()?;
    }
    Ok(())
}

/// Renders the metrics into the Prometheus text format.
async fn metrics_handler(registry: Arc<Registry>) -> Result<impl warp::Reply, warp::Rejection> {
    let encoder = TextEncoder::new();
    let mut buffer = vec![];
    if let Err(e) = encoder.encode(&registry.gather(), &mut buffer) {
        tracing::error!("Failed to encode metrics: {}", e);
    }

    let response = String::from_utf8(buffer).unwrap_or_default();
    Ok(warp::reply::with_header(
        response,
        "Content-Type",
        encoder.format_type().to_string(),
    ))
}

/// Runs the HTTP server to expose the /metrics endpoint.
async fn run_metrics_server(registry: Arc<Registry>, addr: SocketAddr) {
    let metrics_route = warp::path("metrics")
        .and(warp::get())
        .and(warp::any().map(move || Arc::clone(&registry)))
        .and_then(metrics_handler);

    info!("Starting metrics server on {}", addr);
    warp::serve(metrics_route).run(addr).await;
}

/// The main entry point of the operator.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 1. Load configuration and initialize logging
    let config = OperatorConfig::load()?;
    init_tracing(&config.log_format)?;
    info!(?config, "Configuration loaded");

    // 2. Initialize Kubernetes Client
    let client = Client::try_default().await?;

    // 3. Create the shared context
    let context = Arc::new(Context {
        client: client.clone(),
        backoff: config.failure_backoff(),
        success_requeue: config.success_requeue(),
        http_timeout: config.http_timeout(),
    });

    // 4. Initialize metrics registry
    let registry = Arc::new(metrics::create_and_register_metrics()?);
    let metrics_addr = config.metrics_socket_addr()?;
    info!("Custom metrics registered.");

    // 5. Build the filtered watch streams
    let (components_reader, components_writer) = reflector::store();
    let components = watcher(
        Api::<KeycloakRealmComponent>::all(client.clone()),
        watcher::Config::default(),
    )
    .default_backoff()
    .reflect(components_writer)
    .applied_objects()
    .predicate_filter(predicates::generation);

    let (clients_reader, clients_writer) = reflector::store();
    let clients = watcher(
        Api::<KeycloakClient>::all(client.clone()),
        watcher::Config::default(),
    )
    .default_backoff()
    .reflect(clients_writer)
    .applied_objects()
    .predicate_filter(predicates::generation);

    info!("keycloak-operator starting...");

    // 6. Run the controllers and metrics server concurrently
    tokio::select! {
        _ = run_metrics_server(registry.clone(), metrics_addr) => {},
        _ = async {
            tokio::join!(
                // --- KeycloakRealmComponent Controller ---
                Controller::for_stream(components, components_reader)
                    .shutdown_on_signal()
                    .run(
                        controllers::realm_component_controller::reconcile,
                        controllers::realm_component_controller::on_error,
                        context.clone(),
                    )
                    .for_each(|res| async move {
                        match res {
                            Ok(o) => info!("Reconciled KeycloakRealmComponent: {:?}", o),
                            Err(e) => tracing::warn!("KeycloakRealmComponent reconcile error: {}", e),
                        }
                    }),

                // --- KeycloakClient Controller ---
                Controller::for_stream(clients, clients_reader)
                    .shutdown_on_signal()
                    .run(
                        controllers::client_controller::reconcile,
                        controllers::client_controller::on_error,
                        context.clone(),
                    )
                    .for_each(|res| async move {
                        match res {
                            Ok(o) => info!("Reconciled KeycloakClient: {:?}", o),
                            Err(e) => tracing::warn!("KeycloakClient reconcile error: {}", e),
                        }
                    })
            )
        } => {},
    }

    info!("keycloak-operator shutting down.");
    Ok(())
}
