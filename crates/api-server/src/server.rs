//! API server: the REST router and the Prometheus exporter.

use std::net::SocketAddr;

use axum::routing::{get, post};
use axum::Router;
use drip_core::config::AppConfig;
use tower_http::compression::CompressionLayer;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::rest::{self, AppState};
use crate::{cron_rest, enrollment_rest, webhook_rest};

/// Build the full REST router over `state`.
pub fn router(state: AppState) -> Router {
    Router::new()
        // Enrollments
        .route("/v1/enrollments", post(enrollment_rest::create_enrollment))
        .route("/v1/enrollments/bulk", post(enrollment_rest::bulk_enroll))
        .route("/v1/enrollments/:id", get(enrollment_rest::get_enrollment))
        .route(
            "/v1/enrollments/:id/pause",
            post(enrollment_rest::pause_enrollment),
        )
        .route(
            "/v1/enrollments/:id/resume",
            post(enrollment_rest::resume_enrollment),
        )
        .route(
            "/v1/enrollments/:id/cancel",
            post(enrollment_rest::cancel_enrollment),
        )
        .route(
            "/v1/tenants/:tenant_id/enrollments",
            get(enrollment_rest::list_tenant_enrollments),
        )
        // Folder watches
        .route(
            "/v1/folder-watches",
            post(enrollment_rest::create_folder_watch),
        )
        .route(
            "/v1/folder-watches/:id",
            get(enrollment_rest::get_folder_watch),
        )
        // Cron triggers
        .route("/v1/cron/drip-dispatch", post(cron_rest::drip_dispatch))
        .route("/v1/cron/folder-watch", post(cron_rest::folder_watch))
        // Transport callbacks
        .route("/v1/webhooks/sms-status", post(webhook_rest::sms_status))
        // Operational endpoints
        .route("/health", get(rest::health_check))
        .route("/ready", get(rest::readiness))
        .route("/live", get(rest::liveness))
        // Middleware
        .layer(CompressionLayer::new())
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub struct ApiServer {
    config: AppConfig,
    state: AppState,
}

impl ApiServer {
    pub fn new(config: AppConfig, state: AppState) -> Self {
        Self { config, state }
    }

    /// Serve the REST API until the listener fails.
    pub async fn start_http(&self) -> anyhow::Result<()> {
        let app = router(self.state.clone());
        let addr = SocketAddr::new(self.config.api.host.parse()?, self.config.api.http_port);

        info!(addr = %addr, "Starting HTTP server");

        let listener = tokio::net::TcpListener::bind(addr).await?;
        axum::serve(listener, app).await?;
        Ok(())
    }

    /// Start the Prometheus exporter on its own port.
    pub fn start_metrics(&self) -> anyhow::Result<()> {
        metrics_exporter_prometheus::PrometheusBuilder::new()
            .with_http_listener(SocketAddr::new(
                self.config.api.host.parse()?,
                self.config.metrics.port,
            ))
            .install()?;

        info!(port = self.config.metrics.port, "Metrics exporter started");
        Ok(())
    }
}
