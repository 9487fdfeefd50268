/*
 * AI Analysis Controller - Kubernetes Operator for AI-Assisted Security Review
 * Copyright (C) 2025 AI Analysis Operator authors
 *
 * This program is free software: you can redistribute it and/or modify
 * it under the terms of the GNU Affero General Public License as published
 * by the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * This program is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
 * GNU Affero General Public License for more details.
 *
 * You should have received a copy of the GNU Affero General Public License
 * along with this program. If not, see <https://www.gnu.org/licenses/>.
 */

use analysis_controller::analyzers::{Backends, Summarizer};
use analysis_controller::reporting::summarize_open_anomalies;
use analysis_controller::tasks::{run_analysis_controllers, Context};
use analysis_controller::telemetry::otel::init_tracing;
use analysis_controller::telemetry::TracingTelemetry;
use analysis_controller::{AnalyzerRegistry, ControllerConfig, Engine};
use anyhow::Context as _;
use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::Json,
    routing::get,
    Router,
};
use serde::Deserialize;
use serde_json::{json, Value};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tower::ServiceBuilder;
use tower_http::{
    timeout::TimeoutLayer,
    trace::{DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer},
};
use tracing::{error, info, warn, Level};

const DEFAULT_CONFIG_PATH: &str = "/config/config.yaml";

#[derive(Clone)]
struct AppState {
    client: kube::Client,
    telemetry: Arc<TracingTelemetry>,
    summarizer: Arc<dyn Summarizer>,
}

/// Configuration plus where it came from, reported once logging is up
struct LoadedConfig {
    config: ControllerConfig,
    path: String,
    fallback_reason: Option<anyhow::Error>,
}

fn load_controller_config() -> LoadedConfig {
    let override_path = std::env::var("CONTROLLER_CONFIG_PATH").ok();
    let config_path = override_path
        .as_deref()
        .filter(|path| Path::new(path).exists())
        .unwrap_or(DEFAULT_CONFIG_PATH)
        .to_string();

    let loaded = ControllerConfig::from_mounted_file(&config_path)
        .and_then(|cfg| cfg.validate().map(|()| cfg));
    match loaded {
        Ok(config) => LoadedConfig {
            config,
            path: config_path,
            fallback_reason: None,
        },
        Err(err) => LoadedConfig {
            config: ControllerConfig::default(),
            path: config_path,
            fallback_reason: Some(err),
        },
    }
}

/// Read the controller's `ConfigMap` through the API when the mounted file is unusable
async fn configmap_fallback(client: &kube::Client, defaults: ControllerConfig) -> ControllerConfig {
    let Ok(name) = std::env::var("CONTROLLER_CONFIGMAP") else {
        return defaults;
    };
    let namespace = std::env::var("POD_NAMESPACE").unwrap_or_else(|_| "default".to_string());

    let loaded = ControllerConfig::from_configmap(client, &namespace, &name)
        .await
        .and_then(|cfg| cfg.validate().map(|()| cfg));
    match loaded {
        Ok(config) => {
            info!(
                "Loaded controller configuration from ConfigMap {}/{}",
                namespace, name
            );
            config
        }
        Err(err) => {
            warn!(
                "Failed to load ConfigMap {}/{}: {:#}. Using defaults.",
                namespace, name, err
            );
            defaults
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let LoadedConfig {
        config,
        path,
        fallback_reason,
    } = load_controller_config();

    let telemetry_guard = init_tracing(&config.logging, &config.telemetry)?;

    info!(
        "Starting AI analysis controller v{}",
        env!("CARGO_PKG_VERSION")
    );
    let file_loaded = fallback_reason.is_none();
    match fallback_reason {
        None => info!("Loaded controller configuration from {}", path),
        Some(err) => warn!(
            "Failed to load configuration from {}: {:#}. Using defaults.",
            path, err
        ),
    }

    let client = kube::Client::try_default()
        .await
        .context("Failed to create Kubernetes client")?;
    info!("Connected to Kubernetes cluster");

    let config = if file_loaded {
        config
    } else {
        configmap_fallback(&client, config).await
    };
    config
        .validate()
        .context("Default controller configuration is invalid")?;
    let config = Arc::new(config);

    let telemetry = Arc::new(TracingTelemetry::new());
    let backends = Backends::from_config(&config, Some(client.clone()))?;
    let registry = AnalyzerRegistry::from_config(&config, &backends)?;
    let engine = Arc::new(Engine::new(
        registry,
        telemetry.clone(),
        config.analysis.engine_settings(),
    ));

    let context = Arc::new(Context {
        client: client.clone(),
        engine,
        config: config.clone(),
    });

    let controller_handle = tokio::spawn(async move {
        if let Err(e) = run_analysis_controllers(context).await {
            error!("Controller error: {}", e);
        }
    });

    let state = AppState {
        client,
        telemetry,
        summarizer: backends.summarizer(),
    };

    let app = Router::new()
        .route("/health", get(health_check))
        .route("/ready", get(readiness_check))
        .route("/metrics", get(metrics))
        .route("/api/v1/anomalies/summary", get(anomaly_summary))
        .layer(
            ServiceBuilder::new()
                .layer(
                    TraceLayer::new_for_http()
                        .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                        .on_request(DefaultOnRequest::new().level(Level::INFO))
                        .on_response(DefaultOnResponse::new().level(Level::INFO)),
                )
                .layer(TimeoutLayer::new(Duration::from_secs(
                    config.analysis.timeout_seconds + 30,
                ))),
        )
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(&config.server.bind_address)
        .await
        .with_context(|| format!("Failed to bind {}", config.server.bind_address))?;
    info!(
        "Controller HTTP server listening on {}",
        config.server.bind_address
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    controller_handle.abort();
    info!("Controller shut down");
    telemetry_guard.shutdown();

    Ok(())
}

async fn health_check() -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "service": "analysis-controller",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

async fn readiness_check(State(state): State<AppState>) -> Result<Json<Value>, StatusCode> {
    match state.client.apiserver_version().await {
        Ok(version) => Ok(Json(json!({
            "status": "ready",
            "service": "analysis-controller",
            "kubernetes": version.git_version
        }))),
        Err(e) => {
            warn!("Readiness check failed: {}", e);
            Err(StatusCode::SERVICE_UNAVAILABLE)
        }
    }
}

async fn metrics(State(state): State<AppState>) -> Json<Value> {
    Json(json!({ "events": state.telemetry.snapshot() }))
}

#[derive(Debug, Deserialize)]
struct SummaryQuery {
    namespace: Option<String>,
}

async fn anomaly_summary(
    State(state): State<AppState>,
    Query(query): Query<SummaryQuery>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    let namespace = query.namespace.filter(|ns| !ns.is_empty());
    match summarize_open_anomalies(state.client.clone(), namespace, state.summarizer.clone()).await
    {
        Ok(report) => Ok(Json(json!(report))),
        Err(e) => {
            error!("Failed to summarize anomalies: {}", e);
            Err((
                StatusCode::BAD_GATEWAY,
                Json(json!({ "error": e.to_string() })),
            ))
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            info!("Received Ctrl+C, shutting down gracefully");
        },
        () = terminate => {
            info!("Received SIGTERM, shutting down gracefully");
        },
    }
}
