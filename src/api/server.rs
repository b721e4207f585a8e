// Websocket webserver
//
// Serves the three stream endpoints with their example.json companions and,
// when enabled on the same interface, the metrics endpoint. A separate
// metrics-only server is started when the metrics interface differs.

use crate::broadcast::Dispatcher;
use crate::config::Config;
use crate::ct_logs::LogCounts;
use crate::error::CertstreamError;
use crate::metrics::Metrics;
use crate::Result;
use axum::extract::State;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::info;

use super::example::{json_response, ExampleStore};
use super::ws;

/// State shared by every handler.
pub struct AppState {
    pub dispatcher: Dispatcher,
    pub example: ExampleStore,
    pub metrics: Metrics,
    pub counts: Arc<LogCounts>,
    pub ws_queue_capacity: usize,
}

pub struct WebServer {
    config: Config,
    state: Arc<AppState>,
}

impl WebServer {
    pub fn new(
        config: Config,
        dispatcher: Dispatcher,
        example: ExampleStore,
        counts: Arc<LogCounts>,
    ) -> Self {
        let state = Arc::new(AppState {
            dispatcher,
            example,
            metrics: Metrics::new(),
            counts,
            ws_queue_capacity: config.general.buffer_sizes.websocket,
        });

        Self { config, state }
    }

    fn build_router(&self) -> Router {
        let web = &self.config.webserver;

        let mut router = Router::new()
            .route(&web.full_url, get(ws::full_stream))
            .route(&example_path(&web.full_url), get(example_full))
            .route(&web.lite_url, get(ws::lite_stream))
            .route(&example_path(&web.lite_url), get(example_lite))
            .route(&web.domains_only_url, get(ws::domains_stream))
            .route(&example_path(&web.domains_only_url), get(example_domains));

        if self.config.prometheus.enabled && self.config.metrics_on_webserver() {
            info!("Serving metrics on the websocket interface");
            router = router.route(&self.config.prometheus.metrics_url, get(metrics_handler));
        }

        router.with_state(self.state.clone())
    }

    fn build_metrics_router(&self) -> Router {
        Router::new()
            .route(&self.config.prometheus.metrics_url, get(metrics_handler))
            .with_state(self.state.clone())
    }

    /// Bind and serve until the process exits. A dedicated metrics server is
    /// spawned when configured on its own interface.
    pub async fn run(self) -> Result<()> {
        if self.config.prometheus.enabled && !self.config.metrics_on_webserver() {
            let addr = format!(
                "{}:{}",
                self.config.prometheus.listen_addr, self.config.prometheus.listen_port
            );
            let router = self.build_metrics_router();
            let listener = tokio::net::TcpListener::bind(&addr).await.map_err(|e| {
                CertstreamError::Config {
                    message: format!("could not bind metrics server on {}: {}", addr, e),
                }
            })?;
            info!("Starting metrics server on {}", addr);
            tokio::spawn(async move {
                let _ = axum::serve(
                    listener,
                    router.into_make_service_with_connect_info::<SocketAddr>(),
                )
                .await;
            });
        }

        let addr = format!(
            "{}:{}",
            self.config.webserver.listen_addr, self.config.webserver.listen_port
        );
        let listener =
            tokio::net::TcpListener::bind(&addr)
                .await
                .map_err(|e| CertstreamError::Config {
                    message: format!("could not bind webserver on {}: {}", addr, e),
                })?;
        info!("Starting webserver on {}", addr);

        let router = self.build_router();
        axum::serve(
            listener,
            router.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await
        .map_err(CertstreamError::Io)?;

        Ok(())
    }
}

/// "/full-stream" -> "/full-stream/example.json"; "/" -> "/example.json"
fn example_path(base: &str) -> String {
    format!("{}/example.json", base.trim_end_matches('/'))
}

async fn example_full(State(state): State<Arc<AppState>>) -> Response {
    json_response(state.example.full_json())
}

async fn example_lite(State(state): State<Arc<AppState>>) -> Response {
    json_response(state.example.lite_json())
}

async fn example_domains(State(state): State<Arc<AppState>>) -> Response {
    json_response(state.example.domains_json())
}

async fn metrics_handler(State(state): State<Arc<AppState>>) -> Response {
    state
        .metrics
        .render(&state.dispatcher, &state.counts)
        .into_response()
}
