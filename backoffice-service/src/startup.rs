//! Application startup and HTTP server wiring.

use crate::config::BackofficeConfig;
use crate::handlers;
use crate::middleware::auth::{self, SessionKeys};
use crate::middleware::metrics::track_metrics_middleware;
use crate::services::database::Database;
use crate::services::email::{DisabledEmailProvider, EmailProvider, SmtpProvider};
use crate::services::lifecycle::{Lifecycle, LifecycleSettings};
use crate::services::payments::PaymentClient;
use crate::services::tokens::{AcceptanceTokens, RedisTokenStore};
use axum::http::{HeaderValue, Method};
use axum::middleware::{from_fn, from_fn_with_state};
use axum::routing::{get, post};
use axum::Router;
use secrecy::ExposeSecret;
use service_core::error::AppError;
use service_core::middleware::rate_limit::{
    create_ip_rate_limiter, create_unkeyed_rate_limiter, ip_rate_limit_middleware,
    rate_limit_middleware,
};
use service_core::middleware::security_headers::security_headers_middleware;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<Database>,
    pub email: Arc<dyn EmailProvider>,
    pub lifecycle: Lifecycle,
    pub sessions: SessionKeys,
    pub config: Arc<BackofficeConfig>,
}

/// Application container for managing server lifecycle.
pub struct Application {
    port: u16,
    listener: TcpListener,
    state: AppState,
}

impl Application {
    /// Build the application with the given configuration.
    pub async fn build(config: BackofficeConfig) -> Result<Self, AppError> {
        let db = Arc::new(
            Database::new(
                &config.database.url,
                config.database.max_connections,
                config.database.min_connections,
            )
            .await?,
        );
        db.run_migrations().await?;

        let tokens: Arc<dyn AcceptanceTokens> =
            Arc::new(RedisTokenStore::new(&config.redis.url).await?);

        let email: Arc<dyn EmailProvider> = if config.smtp.enabled {
            Arc::new(SmtpProvider::new(
                &config.smtp.host,
                config.smtp.port,
                &config.smtp.user,
                &config.smtp.password,
                &config.smtp.from_email,
                &config.smtp.from_name,
            )?)
        } else {
            tracing::warn!("SMTP disabled, notification emails will be logged and dropped");
            Arc::new(DisabledEmailProvider)
        };

        let payments = PaymentClient::new(config.payments.clone());
        if payments.is_configured() {
            tracing::info!("Payment processor client initialized");
        } else {
            tracing::warn!("Payment processor not configured - checkout and reconciliation disabled");
        }

        let lifecycle = Lifecycle::new(
            Arc::clone(&db),
            tokens,
            payments,
            LifecycleSettings {
                base_url: config.app.base_url.clone(),
                owner_email: config.app.owner_email.clone(),
                quote_validity_days: config.app.quote_validity_days,
                acceptance_token_ttl_days: config.app.acceptance_token_ttl_days,
            },
        );

        let sessions = SessionKeys::new(config.app.session_secret.expose_secret());

        let state = AppState {
            db,
            email,
            lifecycle,
            sessions,
            config: Arc::new(config.clone()),
        };

        let addr = SocketAddr::from(([0, 0, 0, 0], config.common.port));
        let listener = TcpListener::bind(addr).await.map_err(|e| {
            tracing::error!("Failed to bind listener to {}: {}", addr, e);
            AppError::from(e)
        })?;
        let port = listener.local_addr()?.port();

        tracing::info!("Backoffice service listening on port {}", port);

        Ok(Self {
            port,
            listener,
            state,
        })
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn state(&self) -> AppState {
        self.state.clone()
    }

    /// Run the application until stopped.
    pub async fn run_until_stopped(self) -> std::io::Result<()> {
        let router = build_router(self.state);

        axum::serve(
            self.listener,
            router.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(shutdown_signal())
        .await
    }
}

/// Assemble the full route tree with auth and rate-limit layers.
pub fn build_router(state: AppState) -> Router {
    let config = &state.config;

    let intake_limiter = create_ip_rate_limiter(
        config.rate_limit.quote_intake_attempts,
        config.rate_limit.quote_intake_window_seconds,
    );
    let acceptance_limiter = create_unkeyed_rate_limiter(
        config.rate_limit.acceptance_attempts,
        config.rate_limit.acceptance_window_seconds,
    );
    let global_limiter = create_ip_rate_limiter(
        config.rate_limit.global_ip_limit,
        config.rate_limit.global_ip_window_seconds,
    );

    let cors = build_cors(&config.security.allowed_origins);

    // Public surface: intake and the token-gated acceptance page.
    let public_routes = Router::new()
        .route("/api/quotes", post(handlers::quotes::submit_quote))
        .route_layer(from_fn_with_state(intake_limiter, ip_rate_limit_middleware))
        .merge(
            Router::new()
                .route(
                    "/accept/:token",
                    get(handlers::accept::preview).post(handlers::accept::accept),
                )
                .route_layer(from_fn_with_state(
                    acceptance_limiter,
                    rate_limit_middleware,
                )),
        );

    // Admin surface: sessions plus the admin role.
    let admin_routes = Router::new()
        .route("/api/admin/quotes", get(handlers::quotes::list_quotes))
        .route("/api/admin/quotes/:id", get(handlers::quotes::get_quote))
        .route("/api/admin/quotes/:id/send", post(handlers::quotes::send_quote))
        .route("/api/admin/projects", post(handlers::projects::create_project))
        .route("/api/admin/projects/:id", get(handlers::projects::get_project))
        .route(
            "/api/admin/projects/:id/status",
            post(handlers::projects::transition_project),
        )
        .route_layer(from_fn(auth::require_admin_middleware))
        .route_layer(from_fn_with_state(state.clone(), auth::auth_middleware));

    // Customer portal: any valid session, ownership checked per handler.
    let portal_routes = Router::new()
        .route("/api/portal/projects", get(handlers::portal::list_projects))
        .route("/api/portal/projects/:id", get(handlers::portal::get_project))
        .route(
            "/api/portal/invoices/:id/checkout",
            post(handlers::portal::create_checkout),
        )
        .route_layer(from_fn_with_state(state.clone(), auth::auth_middleware));

    Router::new()
        .route("/health", get(handlers::health))
        .route("/ready", get(handlers::ready))
        .route("/metrics", get(handlers::metrics_handler))
        .route("/api/webhooks/payments", post(handlers::webhooks::payment_webhook))
        .merge(public_routes)
        .merge(admin_routes)
        .merge(portal_routes)
        .layer(from_fn(track_metrics_middleware))
        .layer(from_fn_with_state(global_limiter, ip_rate_limit_middleware))
        .layer(from_fn(security_headers_middleware))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn build_cors(allowed_origins: &[String]) -> CorsLayer {
    let origins: Vec<HeaderValue> = allowed_origins
        .iter()
        .filter_map(|origin| origin.parse().ok())
        .collect();

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([
            axum::http::header::AUTHORIZATION,
            axum::http::header::CONTENT_TYPE,
        ])
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => tracing::error!("Failed to install SIGTERM handler: {}", e),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received, draining connections");
}
