use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use axum::{
    Router,
    extract::DefaultBodyLimit,
    http::{HeaderValue, Method, header},
    middleware,
    routing::get,
};
use eduhub_auth::SessionService;
use eduhub_auth::http::{SessionState, auth_router};
use tokio::task::JoinHandle;
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    trace::TraceLayer,
};

use crate::{
    bootstrap,
    config::AppConfig,
    handlers,
    middleware as app_middleware,
    store::{PermissionInvalidationListener, create_shared_store},
};

pub struct EduhubServer {
    addr: SocketAddr,
    app: Router,
    listener: Option<JoinHandle<()>>,
}

/// Everything `build_app` wires together, for callers that need more than
/// the router.
pub struct AppParts {
    pub router: Router,
    pub service: SessionState,
    pub directory: bootstrap::Directory,
    pub listener: Option<JoinHandle<()>>,
}

/// Builds the application: shared store, seeded directory, session service
/// and router. Fails if Redis is enabled but unreachable.
pub async fn build_app(cfg: &AppConfig) -> anyhow::Result<Router> {
    Ok(build_parts(cfg).await?.router)
}

pub async fn build_parts(cfg: &AppConfig) -> anyhow::Result<AppParts> {
    let backend = create_shared_store(&cfg.redis).await?;
    let directory = bootstrap::seed(&cfg.bootstrap).await?;

    let service = Arc::new(
        SessionService::new(&cfg.auth, directory.collaborators(), backend.shared())
            .context("failed to initialize session service")?,
    );

    let listener = backend.redis_url().map(|url| {
        PermissionInvalidationListener {
            redis_url: url.to_string(),
            cache: service.permissions().clone(),
        }
        .start()
    });

    tracing::info!(
        store = backend.mode(),
        api_path = %cfg.auth.api_path,
        accounts = cfg.bootstrap.accounts.len(),
        "Session service initialized"
    );

    Ok(AppParts {
        router: router(cfg, service.clone())?,
        service,
        directory,
        listener,
    })
}

/// Assembles routes and middleware around an existing session service.
pub fn router(cfg: &AppConfig, service: SessionState) -> anyhow::Result<Router> {
    let health = Router::new()
        .route("/healthz", get(handlers::healthz))
        .route("/readyz", get(handlers::readyz))
        .with_state(service.clone());

    let mut app = Router::new()
        .merge(health)
        .nest(&cfg.auth.api_path, auth_router(service))
        .layer(DefaultBodyLimit::max(cfg.server.body_limit_bytes));

    if let Some(cors) = cors_layer(&cfg.server.cors_allowed_origins)? {
        app = app.layer(cors);
    }

    // Middleware order (outermost first): request id -> trace -> cors -> body limit
    Ok(app
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(|req: &axum::http::Request<_>| {
                    use tracing::field::Empty;
                    let req_id = req
                        .extensions()
                        .get::<HeaderValue>()
                        .and_then(|v| v.to_str().ok())
                        .unwrap_or("")
                        .to_string();
                    tracing::info_span!(
                        "http.request",
                        http.method = %req.method(),
                        http.target = %req.uri().path(),
                        http.status_code = Empty,
                        request_id = %req_id
                    )
                })
                .on_response(
                    |res: &axum::http::Response<_>,
                     latency: std::time::Duration,
                     span: &tracing::Span| {
                        span.record(
                            "http.status_code",
                            tracing::field::display(res.status().as_u16()),
                        );
                        tracing::info!(
                            http.status = %res.status().as_u16(),
                            elapsed_ms = %latency.as_millis(),
                            "request handled"
                        );
                    },
                ),
        )
        .layer(middleware::from_fn(app_middleware::request_id)))
}

// Cookies only travel cross-origin with credentials, which rules out a
// wildcard origin.
fn cors_layer(origins: &[String]) -> anyhow::Result<Option<CorsLayer>> {
    if origins.is_empty() {
        return Ok(None);
    }
    let origins = origins
        .iter()
        .map(|o| HeaderValue::from_str(o).with_context(|| format!("invalid CORS origin '{o}'")))
        .collect::<anyhow::Result<Vec<_>>>()?;

    Ok(Some(
        CorsLayer::new()
            .allow_origin(AllowOrigin::list(origins))
            .allow_credentials(true)
            .allow_methods([Method::GET, Method::POST])
            .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION]),
    ))
}

pub struct ServerBuilder {
    addr: SocketAddr,
    config: AppConfig,
}

impl Default for ServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ServerBuilder {
    pub fn new() -> Self {
        let cfg = AppConfig::default();
        Self {
            addr: cfg.addr(),
            config: cfg,
        }
    }

    pub fn with_addr(mut self, addr: SocketAddr) -> Self {
        self.addr = addr;
        self
    }

    pub fn with_config(mut self, cfg: AppConfig) -> Self {
        self.addr = cfg.addr();
        self.config = cfg;
        self
    }

    pub async fn build(self) -> anyhow::Result<EduhubServer> {
        let parts = build_parts(&self.config).await?;

        Ok(EduhubServer {
            addr: self.addr,
            app: parts.router,
            listener: parts.listener,
        })
    }
}

impl EduhubServer {
    pub async fn run(self) -> anyhow::Result<()> {
        let listener = tokio::net::TcpListener::bind(self.addr).await?;
        tracing::info!("listening on {}", self.addr);
        // The login rate limiter keys on the peer address.
        axum::serve(
            listener,
            self.app
                .into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(shutdown_signal())
        .await?;

        if let Some(handle) = self.listener {
            handle.abort();
        }
        Ok(())
    }
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    tracing::info!("shutdown signal received");
}
