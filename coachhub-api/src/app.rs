/// Application state and router builder
///
/// # Example
///
/// ```no_run
/// use coachhub_api::{app::AppState, config::Config};
/// use sqlx::PgPool;
///
/// # async fn example() -> anyhow::Result<()> {
/// let config = Config::from_env()?;
/// let pool = PgPool::connect(&config.database.url).await?;
/// let state = AppState::new(pool, config)?;
/// let app = coachhub_api::app::build_router(state);
/// # Ok(())
/// # }
/// ```

use crate::{
    config::Config,
    error::ApiError,
    middleware::{
        rate_limit::{self, RateLimit, RateLimiter},
        security::SecurityHeadersLayer,
    },
    services::email::{EmailError, EmailService},
};
use axum::{
    extract::{DefaultBodyLimit, Request, State},
    http::{header, HeaderValue, Method},
    middleware::{from_fn_with_state, Next},
    response::Response,
    routing::{get, patch, post},
    Router,
};
use chrono::Duration;
use coachhub_shared::auth::jwt::TokenTtl;
use coachhub_shared::auth::middleware::{authenticate, extract_bearer_token};
use sqlx::PgPool;
use std::sync::Arc;
use tower_http::{
    compression::CompressionLayer,
    cors::CorsLayer,
    trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer},
};
use tracing::Level;

/// Uploads are capped at 5 MB; the body limit leaves room for multipart framing.
const UPLOAD_BODY_LIMIT: usize = 6 * 1024 * 1024;

/// Shared application state
///
/// Cloned for each request handler via Axum's `State` extractor.
#[derive(Clone)]
pub struct AppState {
    pub db: PgPool,
    pub config: Arc<Config>,
    pub email: Arc<EmailService>,
    pub auth_limiter: Arc<RateLimiter>,
    pub registration_limiter: Arc<RateLimiter>,
}

impl AppState {
    /// Creates new application state
    ///
    /// # Errors
    ///
    /// Fails when the email transport cannot be set up.
    pub fn new(db: PgPool, config: Config) -> Result<Self, EmailError> {
        let email = EmailService::new(&config.email)?;
        let limits = config.rate_limit;

        Ok(Self {
            db,
            email: Arc::new(email),
            auth_limiter: Arc::new(RateLimiter::new(
                "auth",
                RateLimit::per_minute(limits.auth_per_minute),
            )),
            registration_limiter: Arc::new(RateLimiter::new(
                "registration",
                RateLimit::per_hour(limits.registration_per_hour),
            )),
            config: Arc::new(config),
        })
    }

    /// Gets JWT secret for token operations
    pub fn jwt_secret(&self) -> &str {
        &self.config.jwt.secret
    }

    pub fn token_ttl(&self) -> TokenTtl {
        TokenTtl {
            access: Duration::minutes(self.config.jwt.access_ttl_minutes),
            refresh: Duration::days(self.config.jwt.refresh_ttl_days),
        }
    }
}

/// Builds the complete Axum router with all routes and middleware
///
/// # Architecture
///
/// ```text
/// /
/// ├── /health                          # public
/// └── /api/v1/
///     ├── /auth/                       # register, login, refresh, reset (rate limited)
///     │   ├── POST /logout             # authenticated
///     │   └── GET  /me                 # authenticated
///     ├── /organization/               # own organization + /admin/* for admins
///     ├── /users/
///     ├── /sessions/
///     ├── /goals/
///     ├── /payments/
///     ├── /admin/activity/
///     ├── /dashboard/
///     └── /exports/
/// ```
///
/// Everything except `/health` and the public auth endpoints requires a
/// Bearer access token.
///
/// # Middleware Stack
///
/// Applied in order (outermost last):
/// 1. Authentication and rate limiting (per route group)
/// 2. Logging (tower-http TraceLayer)
/// 3. CORS (tower-http CorsLayer)
/// 4. Security headers
pub fn build_router(state: AppState) -> Router {
    use crate::routes;

    let require_auth = || from_fn_with_state(state.clone(), jwt_auth_layer);

    let health_routes = Router::new().route("/health", get(routes::health::health_check));

    let credential_routes = Router::new()
        .route("/login", post(routes::auth::login))
        .route("/refresh", post(routes::auth::refresh))
        .route("/forgot-password", post(routes::auth::forgot_password))
        .route("/verify-reset-token", post(routes::auth::verify_reset_token))
        .route("/reset-password", post(routes::auth::reset_password))
        .layer(from_fn_with_state(state.clone(), rate_limit::auth_rate_limit));

    let registration_routes = Router::new()
        .route("/register", post(routes::auth::register))
        .layer(from_fn_with_state(
            state.clone(),
            rate_limit::registration_rate_limit,
        ));

    let session_auth_routes = Router::new()
        .route("/logout", post(routes::auth::logout))
        .route("/me", get(routes::auth::me))
        .layer(require_auth());

    let auth_routes = Router::new()
        .merge(credential_routes)
        .merge(registration_routes)
        .merge(session_auth_routes);

    let organization_routes = Router::new()
        .route(
            "/",
            get(routes::organizations::get_own).patch(routes::organizations::update_own),
        )
        .route("/stats", get(routes::organizations::stats))
        .route(
            "/settings/manager",
            patch(routes::organizations::update_manager_settings),
        )
        .route(
            "/logo",
            post(routes::organizations::upload_logo).layer(DefaultBodyLimit::max(UPLOAD_BODY_LIMIT)),
        )
        .route("/admin/list", get(routes::organizations::admin_list))
        .route("/admin/create", post(routes::organizations::admin_create))
        .route(
            "/admin/:organization_id",
            get(routes::organizations::admin_get)
                .patch(routes::organizations::admin_update)
                .delete(routes::organizations::admin_deactivate),
        )
        .route(
            "/admin/:organization_id/quota",
            get(routes::organizations::admin_quota),
        )
        .layer(require_auth());

    let user_routes = Router::new()
        .route(
            "/",
            get(routes::users::list_users).post(routes::users::create_user),
        )
        .route("/me", patch(routes::users::update_me))
        .route(
            "/:user_id",
            get(routes::users::get_user)
                .patch(routes::users::update_user)
                .delete(routes::users::deactivate_user),
        )
        .layer(require_auth());

    let session_routes = Router::new()
        .route(
            "/",
            get(routes::sessions::list_sessions).post(routes::sessions::create_session),
        )
        .route("/check-conflict", post(routes::sessions::check_conflict))
        .route("/calendar", get(routes::sessions::calendar))
        .route(
            "/:session_id",
            get(routes::sessions::get_session)
                .patch(routes::sessions::update_session)
                .delete(routes::sessions::delete_session),
        )
        .route("/:session_id/rate", post(routes::sessions::rate_session))
        .layer(require_auth());

    let goal_routes = Router::new()
        .route(
            "/",
            get(routes::goals::list_goals).post(routes::goals::create_goal),
        )
        .route(
            "/:goal_id",
            get(routes::goals::get_goal)
                .patch(routes::goals::update_goal)
                .delete(routes::goals::delete_goal),
        )
        .route("/:goal_id/progress", patch(routes::goals::update_progress))
        .route(
            "/:goal_id/milestones/:milestone_id",
            patch(routes::goals::update_milestone),
        )
        .route("/:goal_id/comments", post(routes::goals::add_comment))
        .route(
            "/:goal_id/collaborators",
            post(routes::goals::add_collaborator),
        )
        .route(
            "/:goal_id/sessions/:session_id",
            post(routes::goals::link_session),
        )
        .layer(require_auth());

    let payment_routes = Router::new()
        .route(
            "/",
            get(routes::payments::list_payments).post(routes::payments::create_payment),
        )
        .route("/generate", post(routes::payments::generate_payment))
        .route("/stats", get(routes::payments::payment_stats))
        .route(
            "/:payment_id",
            get(routes::payments::get_payment).patch(routes::payments::update_payment),
        )
        .route("/:payment_id/invoice", get(routes::payments::download_invoice))
        .route(
            "/:payment_id/send-invoice",
            post(routes::payments::send_invoice),
        )
        .layer(require_auth());

    let activity_routes = Router::new()
        .route("/", get(routes::activity::list_activity))
        .route("/stats", get(routes::activity::activity_stats))
        .layer(require_auth());

    let dashboard_routes = Router::new()
        .route("/stats", get(routes::dashboard::stats))
        .route("/sessions", get(routes::dashboard::sessions))
        .route("/goals-category", get(routes::dashboard::goals_by_category))
        .route("/revenue", get(routes::dashboard::revenue))
        .layer(require_auth());

    let export_routes = Router::new()
        .route("/dashboard", get(routes::exports::export_dashboard))
        .layer(require_auth());

    let v1_routes = Router::new()
        .nest("/auth", auth_routes)
        .nest("/organization", organization_routes)
        .nest("/users", user_routes)
        .nest("/sessions", session_routes)
        .nest("/goals", goal_routes)
        .nest("/payments", payment_routes)
        .nest("/admin/activity", activity_routes)
        .nest("/dashboard", dashboard_routes)
        .nest("/exports", export_routes);

    let cors = if state.config.api.cors_origins.iter().any(|o| o == "*") {
        CorsLayer::permissive()
    } else {
        let origins: Vec<HeaderValue> = state
            .config
            .api
            .cors_origins
            .iter()
            .filter_map(|origin| origin.parse().ok())
            .collect();

        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods([
                Method::GET,
                Method::POST,
                Method::PATCH,
                Method::PUT,
                Method::DELETE,
                Method::OPTIONS,
            ])
            .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE])
            .allow_credentials(true)
            .max_age(std::time::Duration::from_secs(3600))
    };

    Router::new()
        .merge(health_routes)
        .nest("/api/v1", v1_routes)
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        .layer(CompressionLayer::new())
        .layer(cors)
        .layer(SecurityHeadersLayer::new(state.config.api.production))
        .with_state(state)
}

/// JWT authentication middleware layer
///
/// Validates the Bearer token against the live user row and injects the
/// resulting `AuthContext` into request extensions.
async fn jwt_auth_layer(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let header = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok());

    let token = extract_bearer_token(header)?;

    let auth = authenticate(&state.db, state.jwt_secret(), token)
        .await
        .map_err(|e| {
            tracing::debug!(error = %e, "Rejected bearer token");
            ApiError::from(e)
        })?;

    req.extensions_mut().insert(auth);

    Ok(next.run(req).await)
}
