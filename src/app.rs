use axum::{
    Json, Router,
    body::Body,
    extract::{FromRequest, FromRequestParts, Path, State, rejection::JsonRejection},
    http::{HeaderValue, Method, Request, StatusCode, header, request::Parts},
    response::{Html, IntoResponse, Response},
    routing::{get, post},
};
use axum_extra::{
    TypedHeader,
    headers::{Authorization, authorization::Bearer},
};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::Span;
use uuid::Uuid;

use crate::calculation::Calculation;
use crate::config::ServerConfig;
use crate::error::CalcError;
use crate::login::{self, AccountError, SessionRegistry, UserDirectory};
use crate::service::{CalculationCreate, CalculationService, CalculationUpdate};
use crate::store::CalculationStore;

pub struct AppState {
    pub calculations: CalculationService,
    pub users: UserDirectory,
    pub sessions: SessionRegistry,
}

pub type SharedState = Arc<AppState>;

impl AppState {
    /// Open the file-backed stores under the configured data directory.
    pub fn open(config: &ServerConfig) -> Result<Self, Box<dyn std::error::Error + Send + Sync>> {
        let users = UserDirectory::open(&config.data_dir)?;
        let store = CalculationStore::open(config.calculations_path())?;
        log::info!(
            "opened data directory {} ({} user(s), {} calculation(s))",
            config.data_dir.display(),
            users.len(),
            store.len()
        );

        Ok(AppState {
            calculations: CalculationService::new(store),
            users,
            sessions: SessionRegistry::new(config.session_ttl()),
        })
    }

    /// State with nothing written to disk.
    pub fn in_memory(session_ttl: std::time::Duration) -> Self {
        AppState {
            calculations: CalculationService::new(CalculationStore::in_memory()),
            users: UserDirectory::in_memory(),
            sessions: SessionRegistry::new(session_ttl),
        }
    }
}

/// HTTP-facing error; the body is always `{"detail": "..."}`.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    Unauthorized(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Internal(String),

    /// The request body could not be read as JSON; keeps the extractor's status.
    #[error("{detail}")]
    Body { status: StatusCode, detail: String },
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match &self {
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::Body { status, .. } => *status,
        };
        let body = Json(serde_json::json!({ "detail": self.to_string() }));

        if status == StatusCode::UNAUTHORIZED {
            (
                status,
                [(header::WWW_AUTHENTICATE, HeaderValue::from_static("Bearer"))],
                body,
            )
                .into_response()
        } else {
            (status, body).into_response()
        }
    }
}

impl From<CalcError> for AppError {
    fn from(err: CalcError) -> Self {
        match err {
            CalcError::Validation(msg) => AppError::BadRequest(msg),
            CalcError::NotFound => AppError::NotFound(err.to_string()),
            CalcError::Storage { .. } => {
                log::error!("{}", err);
                AppError::Internal("Internal server error".to_string())
            }
        }
    }
}

impl From<AccountError> for AppError {
    fn from(err: AccountError) -> Self {
        match err {
            AccountError::InvalidCredentials => AppError::Unauthorized(err.to_string()),
            AccountError::Storage(_) => {
                log::error!("{}", err);
                AppError::Internal("Internal server error".to_string())
            }
            AccountError::Invalid(_) | AccountError::UsernameTaken | AccountError::EmailTaken => {
                AppError::BadRequest(err.to_string())
            }
        }
    }
}

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        log::debug!("rejected request body: {}", rejection.body_text());
        AppError::Body {
            status: rejection.status(),
            detail: rejection.body_text(),
        }
    }
}

/// `Json` extractor whose rejections are rendered as `{"detail": ...}`.
#[derive(FromRequest)]
#[from_request(via(axum::Json), rejection(AppError))]
pub struct JsonBody<T>(pub T);

/// The authenticated caller, resolved from `Authorization: Bearer <token>`.
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub user_id: Uuid,
    pub token: String,
}

#[axum::async_trait]
impl FromRequestParts<SharedState> for AuthUser {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &SharedState,
    ) -> Result<Self, Self::Rejection> {
        let TypedHeader(Authorization(bearer)) =
            TypedHeader::<Authorization<Bearer>>::from_request_parts(parts, state)
                .await
                .map_err(|_| AppError::Unauthorized("Not authenticated".to_string()))?;

        let token = bearer.token().to_string();
        match state.sessions.validate(&token) {
            Some(user_id) => Ok(AuthUser { user_id, token }),
            None => Err(AppError::Unauthorized(
                "Could not validate credentials".to_string(),
            )),
        }
    }
}

pub fn router(state: SharedState, config: &ServerConfig) -> Router {
    Router::new()
        .route("/", get(serve_landing))
        .route("/login", get(serve_login_page))
        .route("/register", get(serve_register_page))
        .route("/dashboard", get(serve_dashboard))
        .route("/dashboard/view/:id", get(serve_view_page))
        .route("/dashboard/edit/:id", get(serve_edit_page))
        .route("/health", get(health))
        .route("/auth/register", post(login::handle_register))
        .route("/auth/login", post(login::handle_login))
        .route("/auth/logout", post(login::handle_logout))
        .route(
            "/calculations",
            get(list_calculations).post(create_calculation),
        )
        .route(
            "/calculations/:id",
            get(get_calculation)
                .put(update_calculation)
                .delete(delete_calculation),
        )
        .nest_service("/static", ServeDir::new(&config.static_dir))
        .layer(
            ServiceBuilder::new()
                .layer(request_logging())
                .layer(cors_layer(&config.cors_origins)),
        )
        .with_state(state)
}

pub async fn run(config: ServerConfig) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let state = Arc::new(AppState::open(&config)?);
    let app = router(state, &config);

    let listener = TcpListener::bind(&config.bind).await?;
    log::info!("Listening on http://{}", listener.local_addr()?);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    log::info!("server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        log::error!("failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    log::info!("shutdown requested");
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    if origins.is_empty() || origins.iter().any(|origin| origin == "*") {
        return CorsLayer::permissive();
    }

    let allowed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match origin.parse() {
            Ok(value) => Some(value),
            Err(_) => {
                log::warn!("ignoring invalid CORS origin {:?}", origin);
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(allowed))
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE])
}

/// Request log lines through `log`, one when a request arrives and one when
/// its response is ready.
fn request_logging() -> TraceLayer<
    tower_http::classify::SharedClassifier<tower_http::classify::ServerErrorsAsFailures>,
    fn(&Request<Body>) -> Span,
    fn(&Request<Body>, &Span),
    fn(&Response<Body>, Duration, &Span),
> {
    fn make_span(_request: &Request<Body>) -> Span {
        Span::none()
    }

    fn on_request(request: &Request<Body>, _span: &Span) {
        log::info!("{} {}", request.method(), request.uri().path());
    }

    fn on_response(response: &Response<Body>, latency: Duration, _span: &Span) {
        log::info!("-> {} ({:?})", response.status().as_u16(), latency);
    }

    TraceLayer::new_for_http()
        .make_span_with(make_span as fn(&Request<Body>) -> Span)
        .on_request(on_request as fn(&Request<Body>, &Span))
        .on_response(on_response as fn(&Response<Body>, Duration, &Span))
}

/// Ids that are not UUIDs cannot exist, so they are reported as not found.
fn parse_id(raw: &str) -> Result<Uuid, AppError> {
    raw.parse()
        .map_err(|_| AppError::from(CalcError::NotFound))
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

async fn list_calculations(
    State(state): State<SharedState>,
    auth: AuthUser,
) -> Json<Vec<Calculation>> {
    Json(state.calculations.list(auth.user_id))
}

async fn create_calculation(
    State(state): State<SharedState>,
    auth: AuthUser,
    JsonBody(payload): JsonBody<CalculationCreate>,
) -> Result<(StatusCode, Json<Calculation>), AppError> {
    let calc = state.calculations.create(auth.user_id, payload)?;
    Ok((StatusCode::CREATED, Json(calc)))
}

async fn get_calculation(
    State(state): State<SharedState>,
    auth: AuthUser,
    Path(id): Path<String>,
) -> Result<Json<Calculation>, AppError> {
    let id = parse_id(&id)?;
    Ok(Json(state.calculations.get(auth.user_id, id)?))
}

async fn update_calculation(
    State(state): State<SharedState>,
    auth: AuthUser,
    Path(id): Path<String>,
    JsonBody(changes): JsonBody<CalculationUpdate>,
) -> Result<Json<Calculation>, AppError> {
    let id = parse_id(&id)?;
    Ok(Json(state.calculations.update(auth.user_id, id, changes)?))
}

async fn delete_calculation(
    State(state): State<SharedState>,
    auth: AuthUser,
    Path(id): Path<String>,
) -> Result<StatusCode, AppError> {
    let id = parse_id(&id)?;
    state.calculations.delete(auth.user_id, id)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn serve_landing() -> Html<&'static str> {
    Html(include_str!("./static/landing.html"))
}

async fn serve_login_page() -> Html<&'static str> {
    Html(include_str!("./static/login.html"))
}

async fn serve_register_page() -> Html<&'static str> {
    Html(include_str!("./static/register.html"))
}

async fn serve_dashboard() -> Html<&'static str> {
    Html(include_str!("./static/dashboard.html"))
}

async fn serve_view_page(Path(_id): Path<String>) -> Html<&'static str> {
    Html(include_str!("./static/view.html"))
}

async fn serve_edit_page(Path(_id): Path<String>) -> Html<&'static str> {
    Html(include_str!("./static/edit.html"))
}
