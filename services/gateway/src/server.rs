//! API Gateway server implementation

use anyhow::Result;
use axum::{
    Router,
    extract::DefaultBodyLimit,
    http::StatusCode,
    middleware,
    routing::{any, get, post},
};
use metrics_exporter_prometheus::PrometheusHandle;
use std::{net::SocketAddr, sync::Arc, time::Duration};
use tower_http::{
    catch_panic::CatchPanicLayer, compression::CompressionLayer, timeout::TimeoutLayer,
    trace::TraceLayer,
};
use tracing::{error, info, warn};

use crate::{
    cache::ResponseCache,
    config::GatewayConfig,
    error::GatewayError,
    forwarder::{Forwarder, Upstream},
    handlers::{admin, ai, auth, clinical, health, insurance, passthrough, patients},
    metrics::{init_metrics, prometheus_handle, start_metrics_updater},
    middleware::{
        AuthState, RateLimitState, auth_middleware, create_cors_layer, handle_panic,
        logging_middleware, matched_route_middleware, rate_limit_middleware,
        request_id_middleware, require_admin,
    },
    rate_limiter::RateLimiter,
    store::{self, SharedStore},
    token::TokenService,
};

/// How often local fallback buckets are trimmed
const BUCKET_CLEANUP_INTERVAL: Duration = Duration::from_secs(60);

/// Shared application state, cloned into every handler
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<GatewayConfig>,
    pub tokens: Arc<TokenService>,
    pub limiter: Arc<RateLimiter>,
    pub cache: Arc<ResponseCache>,
    pub forwarder: Forwarder,
    pub store: Arc<dyn SharedStore>,
    pub backend: Upstream,
    pub ai: Upstream,
    pub prometheus: Option<PrometheusHandle>,
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("store", &self.store.backend())
            .field("backend", &self.backend)
            .field("ai", &self.ai)
            .finish_non_exhaustive()
    }
}

impl AppState {
    /// Wire every component around an already opened store
    pub fn new(config: GatewayConfig, store: Arc<dyn SharedStore>) -> Result<Self> {
        init_metrics();

        let tokens = Arc::new(TokenService::new(&config.auth));
        let limiter = Arc::new(RateLimiter::new(
            config.rate_limiting.clone(),
            Arc::clone(&store),
        ));
        let cache = Arc::new(ResponseCache::new(Arc::clone(&store), config.cache.enabled));
        let forwarder = Forwarder::new(&config.upstream)?;
        let backend = Upstream::new("backend", &config.services.backend_url);
        let ai = Upstream::new("ai-service", &config.services.ai_service_url);

        Ok(Self {
            config: Arc::new(config),
            tokens,
            limiter,
            cache,
            forwarder,
            store,
            backend,
            ai,
            prometheus: prometheus_handle(),
        })
    }
}

/// API Gateway server
pub struct GatewayServer {
    state: AppState,
}

impl GatewayServer {
    /// Open the shared store and build the application state
    pub async fn new(config: GatewayConfig) -> Result<Self> {
        info!("Initializing API Gateway server");

        let store = match store::connect(&config.store).await {
            Ok(store) => store,
            Err(e) => {
                error!("Invalid shared store configuration: {}", e);
                return Err(e);
            }
        };

        let state = AppState::new(config, store)?;
        info!("API Gateway server initialized successfully");
        Ok(Self { state })
    }

    #[must_use]
    pub fn state(&self) -> &AppState {
        &self.state
    }

    /// Start the server and run until SIGINT/SIGTERM
    pub async fn start(self) -> Result<()> {
        let config = Arc::clone(&self.state.config);
        let addr: SocketAddr = match config.server_address().parse() {
            Ok(addr) => addr,
            Err(e) => {
                error!("Invalid server address '{}': {}", config.server_address(), e);
                return Err(anyhow::anyhow!("Invalid server address: {}", e));
            }
        };

        let updater = start_metrics_updater();
        let cleanup = spawn_bucket_cleanup(Arc::clone(&self.state.limiter));
        let app = router(self.state);

        let listener = match tokio::net::TcpListener::bind(addr).await {
            Ok(listener) => {
                info!("API Gateway listening on {}", addr);
                listener
            }
            Err(e) => {
                error!("Failed to bind TCP listener to {}: {}", addr, e);
                return Err(anyhow::anyhow!("Failed to bind to address {}: {}", addr, e));
            }
        };

        let served = axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(shutdown_signal())
        .await;

        updater.abort();
        cleanup.abort();

        if let Err(e) = served {
            error!("Server encountered a fatal error: {}", e);
            return Err(anyhow::anyhow!("Server error: {}", e));
        }

        info!("Server exited gracefully");
        Ok(())
    }
}

fn spawn_bucket_cleanup(limiter: Arc<RateLimiter>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(BUCKET_CLEANUP_INTERVAL);
        loop {
            interval.tick().await;
            limiter.cleanup_local_buckets();
        }
    })
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
    warn!("Shutdown signal received, draining connections");
}

async fn not_found() -> GatewayError {
    GatewayError::NotFound
}

/// Build the router with all routes and middleware
pub fn router(state: AppState) -> Router {
    let config = Arc::clone(&state.config);
    let auth_state = AuthState {
        tokens: Arc::clone(&state.tokens),
    };
    let rate_limit_state = RateLimitState {
        limiter: Arc::clone(&state.limiter),
    };

    // Health and monitoring (no auth, no rate limit)
    let mut monitoring = Router::new()
        .route("/api/health", get(health::health_check))
        .route("/api/health/ready", get(health::readiness_check));
    if config.monitoring.metrics_enabled {
        monitoring = monitoring.route(&config.monitoring.metrics_path, get(health::metrics));
    }

    // Authentication routes (no auth, IP rate limited)
    let public_auth = Router::new()
        .route("/api/auth/login", post(auth::login))
        .route("/api/auth/register", post(auth::register))
        .route("/api/auth/refresh", post(auth::refresh))
        .route_layer(middleware::from_fn_with_state(
            rate_limit_state.clone(),
            rate_limit_middleware,
        ));

    let admin_routes = Router::new()
        .route("/api/v1/admin/users", get(admin::list_users))
        .route("/api/v1/admin/system/stats", get(admin::system_stats))
        .route("/api/v1/admin/system/cache/clear", post(admin::clear_cache))
        .route_layer(middleware::from_fn(require_admin));

    // Protected routes: auth runs first, then rate limiting, then role checks
    let protected = Router::new()
        .route(
            "/api/v1/patients",
            get(patients::list_patients).post(patients::create_patient),
        )
        .route("/api/v1/patients/search", get(patients::search_patients))
        .route(
            "/api/v1/patients/:id",
            get(patients::get_patient)
                .put(patients::update_patient)
                .delete(patients::delete_patient),
        )
        .route("/api/v1/patients/:id/records", get(patients::get_patient_records))
        .route("/api/v1/clinical/notes", post(clinical::create_note))
        .route("/api/v1/clinical/notes/:id", get(clinical::get_note))
        .route("/api/v1/ai/analyze/text", post(ai::analyze_text))
        .route("/api/v1/ai/analyze/clinical", post(ai::analyze_clinical))
        .route("/api/v1/ai/explain/term", post(ai::explain_term))
        .route("/api/v1/ai/summarize/note", post(ai::summarize_note))
        .route("/api/v1/insurance/coverage", get(insurance::get_coverage))
        .route("/api/v1/insurance/estimate", post(insurance::estimate_cost))
        .route("/api/v1/insurance/documents/upload", post(insurance::upload_document))
        .merge(admin_routes)
        .route("/backend/*path", any(passthrough::proxy_backend))
        .route("/ai/*path", any(passthrough::proxy_ai))
        .route_layer(middleware::from_fn_with_state(
            rate_limit_state,
            rate_limit_middleware,
        ))
        .route_layer(middleware::from_fn_with_state(auth_state, auth_middleware));

    let app = Router::new()
        .merge(monitoring)
        .merge(public_auth)
        .merge(protected)
        .route_layer(middleware::from_fn(matched_route_middleware))
        .fallback(not_found)
        .with_state(state);

    with_gateway_layers(app, &config)
}

/// Wrap routes in the gateway's outer stack
///
/// From the outside in: request id, logging, panic recovery, tracing,
/// timeout, then the optional CORS and compression layers and the body limit.
pub fn with_gateway_layers(app: Router, config: &GatewayConfig) -> Router {
    let mut app = app.layer(DefaultBodyLimit::max(config.server.max_body_size));

    if config.server.compression {
        app = app.layer(CompressionLayer::new());
    }
    if config.cors.enabled {
        app = app.layer(create_cors_layer(config));
    }

    let timeout = Duration::from_secs(config.server.timeout_seconds);
    app.layer(TimeoutLayer::with_status_code(StatusCode::REQUEST_TIMEOUT, timeout))
        .layer(TraceLayer::new_for_http())
        .layer(CatchPanicLayer::custom(handle_panic))
        .layer(middleware::from_fn(logging_middleware))
        .layer(middleware::from_fn_with_state(
            config.trusted_proxies(),
            request_id_middleware,
        ))
}

/// API route documentation
pub fn print_routes() {
    println!("Clinical API Gateway Routes:");
    println!("============================");
    println!();
    println!("Health & Monitoring:");
    println!("  GET  /api/health                          - Liveness");
    println!("  GET  /api/health/ready                    - Readiness (store + upstreams)");
    println!("  GET  /metrics                             - Prometheus metrics");
    println!();
    println!("Authentication:");
    println!("  POST /api/auth/login                      - Login, returns token pair");
    println!("  POST /api/auth/register                   - Register (forwarded to backend)");
    println!("  POST /api/auth/refresh                    - Exchange refresh token");
    println!();
    println!("Patients (cached reads):");
    println!("  GET    /api/v1/patients                   - List patients");
    println!("  GET    /api/v1/patients/search?q=         - Search patients");
    println!("  GET    /api/v1/patients/:id               - Patient detail");
    println!("  GET    /api/v1/patients/:id/records       - Patient records");
    println!("  POST   /api/v1/patients                   - Create patient");
    println!("  PUT    /api/v1/patients/:id               - Update patient");
    println!("  DELETE /api/v1/patients/:id               - Delete patient");
    println!();
    println!("Clinical notes:");
    println!("  POST /api/v1/clinical/notes               - Create note");
    println!("  GET  /api/v1/clinical/notes/:id           - Get note");
    println!();
    println!("AI services:");
    println!("  POST /api/v1/ai/analyze/text              - Text generation");
    println!("  POST /api/v1/ai/analyze/clinical          - Clinical analysis");
    println!("  POST /api/v1/ai/explain/term              - Explain medical term");
    println!("  POST /api/v1/ai/summarize/note            - Summarize note");
    println!();
    println!("Insurance:");
    println!("  GET  /api/v1/insurance/coverage           - Coverage lookup");
    println!("  POST /api/v1/insurance/estimate           - Cost estimate");
    println!("  POST /api/v1/insurance/documents/upload   - Document analysis");
    println!();
    println!("Admin (admin role):");
    println!("  GET  /api/v1/admin/users                  - List users");
    println!("  GET  /api/v1/admin/system/stats           - Gateway and backend stats");
    println!("  POST /api/v1/admin/system/cache/clear     - Clear response cache");
    println!();
    println!("Passthrough (authenticated):");
    println!("  ANY  /backend/*path                       - Reverse proxy to backend");
    println!("  ANY  /ai/*path                            - Reverse proxy to AI service");
    println!();
    println!("All endpoints support:");
    println!("- X-Request-ID correlation");
    println!("- JSON error envelopes");
    println!("- CORS");
    println!("- Compression");
    println!("- Request tracing");
}
