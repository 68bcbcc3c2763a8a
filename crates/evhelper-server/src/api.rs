//! REST API for the charging-request service.
//!
//! Every mutating route delegates to the [`LifecycleEngine`]; handlers only
//! authenticate, parse, and shape responses.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, Method, StatusCode},
    middleware,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use evhelper_shared::types::{RequestId, RequestStatus};
use evhelper_store::{ChargingRequest, Page, RequestFilter, TokenEntry, User};

use crate::auth::{self, RegisterRequest};
use crate::config::ServerConfig;
use crate::engine::{CreateRequest, LifecycleEngine};
use crate::error::ApiError;
use crate::rate_limit::{rate_limit_middleware, RateLimiter};
use crate::ws;

#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<LifecycleEngine>,
    pub config: Arc<ServerConfig>,
    pub rate_limiter: RateLimiter,
}

pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_check))
        .route("/info", get(server_info))
        .route("/api/auth/register", post(register))
        .route("/api/users/me", get(me))
        .route("/api/users/me/tokens", get(my_token_history))
        .route("/api/charging/requests", post(create_request))
        .route("/api/charging/requests", get(my_requests))
        .route("/api/charging/requests/city/:city", get(city_requests))
        .route("/api/charging/requests/:id/accept", post(accept_request))
        .route("/api/charging/requests/:id/complete", post(complete_request))
        .route("/api/charging/requests/:id/cancel", post(cancel_request))
        .route("/ws", get(ws::ws_upgrade))
        .layer(middleware::from_fn_with_state(
            state.rate_limiter.clone(),
            rate_limit_middleware,
        ))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Run the HTTP server until it fails or the process is stopped.
pub async fn serve(state: AppState, addr: SocketAddr) -> anyhow::Result<()> {
    let router = build_router(state);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(addr = %addr, "HTTP API listening");
    axum::serve(
        listener,
        router.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Response shapes
// ---------------------------------------------------------------------------

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

#[derive(Serialize)]
struct ServerInfoResponse {
    name: String,
    version: &'static str,
    registration_open: bool,
}

/// Public view of a user; the email stays private to the owner.
#[derive(Serialize)]
struct ProfileResponse {
    id: String,
    name: String,
    email: String,
    city: String,
    token_balance: i64,
}

impl From<User> for ProfileResponse {
    fn from(user: User) -> Self {
        Self {
            id: user.id.to_string(),
            name: user.name,
            email: user.email,
            city: user.city,
            token_balance: user.token_balance,
        }
    }
}

#[derive(Serialize)]
struct RegisterResponse {
    user: ProfileResponse,
    token: String,
}

#[derive(Serialize)]
struct CreateResponse {
    request: ChargingRequest,
    remaining_tokens: i64,
}

#[derive(Serialize)]
struct TokenHistoryResponse {
    balance: i64,
    history: Vec<TokenEntry>,
}

#[derive(Serialize)]
struct PageResponse {
    requests: Vec<ChargingRequest>,
    total: u64,
    page: u32,
    limit: u32,
}

impl From<Page<ChargingRequest>> for PageResponse {
    fn from(page: Page<ChargingRequest>) -> Self {
        Self {
            requests: page.items,
            total: page.total,
            page: page.page,
            limit: page.limit,
        }
    }
}

#[derive(Deserialize)]
struct ListQuery {
    status: Option<String>,
    page: Option<u32>,
    limit: Option<u32>,
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

async fn server_info(State(state): State<AppState>) -> Json<ServerInfoResponse> {
    Json(ServerInfoResponse {
        name: state.config.instance_name.clone(),
        version: env!("CARGO_PKG_VERSION"),
        registration_open: state.config.registration_open,
    })
}

async fn register(
    State(state): State<AppState>,
    Json(payload): Json<RegisterRequest>,
) -> Result<(StatusCode, Json<RegisterResponse>), ApiError> {
    if !state.config.registration_open {
        return Err(ApiError::RegistrationClosed);
    }

    let (user, token) = auth::register(state.engine.db(), payload).await?;
    Ok((
        StatusCode::CREATED,
        Json(RegisterResponse {
            user: user.into(),
            token,
        }),
    ))
}

async fn me(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<ProfileResponse>, ApiError> {
    let user = require_user(&state, &headers).await?;
    Ok(Json(user.into()))
}

async fn my_token_history(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<TokenHistoryResponse>, ApiError> {
    let user = require_user(&state, &headers).await?;
    let history = state.engine.db().lock().await.token_history(user.id)?;
    Ok(Json(TokenHistoryResponse {
        balance: user.token_balance,
        history,
    }))
}

async fn create_request(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<CreateRequest>,
) -> Result<(StatusCode, Json<CreateResponse>), ApiError> {
    let user = require_user(&state, &headers).await?;
    let created = state.engine.create_request(user.id, payload).await?;
    Ok((
        StatusCode::CREATED,
        Json(CreateResponse {
            request: created.request,
            remaining_tokens: created.remaining_tokens,
        }),
    ))
}

async fn my_requests(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<ListQuery>,
) -> Result<Json<PageResponse>, ApiError> {
    let user = require_user(&state, &headers).await?;

    let status = query
        .status
        .as_deref()
        .map(|s| {
            s.parse::<RequestStatus>()
                .map_err(|_| ApiError::BadRequest(format!("Unknown status: {s}")))
        })
        .transpose()?;

    let mut filter = RequestFilter {
        status,
        ..Default::default()
    };
    if let Some(page) = query.page {
        filter.page = page;
    }
    if let Some(limit) = query.limit {
        filter.limit = limit;
    }

    let page = state.engine.list_mine(user.id, filter).await?;
    Ok(Json(page.into()))
}

async fn city_requests(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(city): Path<String>,
    Query(query): Query<ListQuery>,
) -> Result<Json<PageResponse>, ApiError> {
    require_user(&state, &headers).await?;

    let default = RequestFilter::default();
    let page = state
        .engine
        .list_open_in_city(
            &city,
            query.page.unwrap_or(default.page),
            query.limit.unwrap_or(default.limit),
        )
        .await?;
    Ok(Json(page.into()))
}

async fn accept_request(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<RequestId>,
) -> Result<Json<ChargingRequest>, ApiError> {
    let user = require_user(&state, &headers).await?;
    let request = state.engine.accept_request(id, user.id).await?;
    Ok(Json(request))
}

async fn complete_request(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<RequestId>,
) -> Result<Json<ChargingRequest>, ApiError> {
    let user = require_user(&state, &headers).await?;
    let request = state.engine.complete_request(id, user.id).await?;
    Ok(Json(request))
}

async fn cancel_request(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<RequestId>,
) -> Result<Json<ChargingRequest>, ApiError> {
    let user = require_user(&state, &headers).await?;
    let request = state.engine.cancel_request(id, user.id).await?;
    Ok(Json(request))
}

/// Authenticate the request from its Authorization header.
async fn require_user(state: &AppState, headers: &HeaderMap) -> Result<User, ApiError> {
    let token = auth::bearer_token(headers).ok_or(ApiError::Unauthorized)?;
    auth::authenticate(state.engine.db(), &token).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rooms::CityRouter;
    use axum::body::Body;
    use axum::http::Request;
    use evhelper_store::Database;
    use tokio::sync::Mutex;
    use tower::ServiceExt;

    fn test_state() -> AppState {
        let db = Arc::new(Mutex::new(Database::open_in_memory().unwrap()));
        AppState {
            engine: Arc::new(LifecycleEngine::new(db, CityRouter::new())),
            config: Arc::new(ServerConfig::default()),
            rate_limiter: RateLimiter::new(1000.0, 1000.0),
        }
    }

    async fn json_body(response: axum::response::Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    async fn register_via_http(router: &Router, email: &str, city: &str) -> (String, String) {
        let response = router
            .clone()
            .oneshot(
                Request::post("/api/auth/register")
                    .header("content-type", "application/json")
                    .body(Body::from(
                        serde_json::json!({
                            "name": "Test User",
                            "email": email,
                            "city": city,
                        })
                        .to_string(),
                    ))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);

        let body = json_body(response).await;
        (
            body["user"]["id"].as_str().unwrap().to_string(),
            body["token"].as_str().unwrap().to_string(),
        )
    }

    async fn post_json(router: &Router, token: &str, path: &str, body: serde_json::Value) -> axum::response::Response {
        router
            .clone()
            .oneshot(
                Request::post(path)
                    .header("content-type", "application/json")
                    .header("authorization", format!("Bearer {token}"))
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn health_is_public() {
        let router = build_router(test_state());
        let response = router
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn protected_routes_require_a_token() {
        let router = build_router(test_state());
        let response = router
            .oneshot(Request::get("/api/users/me").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn closed_registration_is_forbidden() {
        let mut state = test_state();
        state.config = Arc::new(ServerConfig {
            registration_open: false,
            ..ServerConfig::default()
        });
        let router = build_router(state);

        let response = router
            .oneshot(
                Request::post("/api/auth/register")
                    .header("content-type", "application/json")
                    .body(Body::from(
                        serde_json::json!({
                            "name": "Late Comer",
                            "email": "late@example.com",
                            "city": "Austin",
                        })
                        .to_string(),
                    ))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn register_then_read_profile() {
        let router = build_router(test_state());
        let (user_id, token) = register_via_http(&router, "me@example.com", "Austin").await;

        let response = router
            .clone()
            .oneshot(
                Request::get("/api/users/me")
                    .header("authorization", format!("Bearer {token}"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = json_body(response).await;
        assert_eq!(body["id"], user_id.as_str());
        assert_eq!(body["token_balance"], 10);
    }

    #[tokio::test]
    async fn request_lifecycle_over_http() {
        let router = build_router(test_state());
        let (_, requester) = register_via_http(&router, "req@example.com", "Austin").await;
        let (_, helper) = register_via_http(&router, "help@example.com", "Austin").await;

        // Create.
        let response = post_json(
            &router,
            &requester,
            "/api/charging/requests",
            serde_json::json!({
                "location": "123 Main St",
                "urgency": "high",
                "estimated_time": 30,
            }),
        )
        .await;
        assert_eq!(response.status(), StatusCode::CREATED);
        let body = json_body(response).await;
        assert_eq!(body["remaining_tokens"], 5);
        let id = body["request"]["id"].as_str().unwrap().to_string();

        // Listed as open in the city (spelling-insensitive).
        let response = router
            .clone()
            .oneshot(
                Request::get("/api/charging/requests/city/AUSTIN")
                    .header("authorization", format!("Bearer {helper}"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        let body = json_body(response).await;
        assert_eq!(body["total"], 1);

        // Accept; a second accept conflicts.
        let response = post_json(
            &router,
            &helper,
            &format!("/api/charging/requests/{id}/accept"),
            serde_json::json!({}),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);

        let response = post_json(
            &router,
            &helper,
            &format!("/api/charging/requests/{id}/accept"),
            serde_json::json!({}),
        )
        .await;
        assert_eq!(response.status(), StatusCode::CONFLICT);

        // Complete, then the helper's balance reflects the reward.
        let response = post_json(
            &router,
            &requester,
            &format!("/api/charging/requests/{id}/complete"),
            serde_json::json!({}),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["status"], "COMPLETED");

        let response = router
            .clone()
            .oneshot(
                Request::get("/api/users/me/tokens")
                    .header("authorization", format!("Bearer {helper}"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        let body = json_body(response).await;
        assert_eq!(body["balance"], 15);
        assert_eq!(body["history"][0]["kind"], "reward");
    }

    #[tokio::test]
    async fn insufficient_funds_is_a_bad_request() {
        let router = build_router(test_state());
        let (_, token) = register_via_http(&router, "spender@example.com", "Austin").await;

        // 10 tokens afford exactly two requests.
        for _ in 0..2 {
            let response = post_json(
                &router,
                &token,
                "/api/charging/requests",
                serde_json::json!({"location": "123 Main St", "urgency": "low"}),
            )
            .await;
            assert_eq!(response.status(), StatusCode::CREATED);
        }

        let response = post_json(
            &router,
            &token,
            "/api/charging/requests",
            serde_json::json!({"location": "123 Main St", "urgency": "low"}),
        )
        .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = json_body(response).await;
        assert!(body["error"].as_str().unwrap().contains("Insufficient"));
    }

    #[tokio::test]
    async fn status_filter_rejects_garbage() {
        let router = build_router(test_state());
        let (_, token) = register_via_http(&router, "filter@example.com", "Austin").await;

        let response = router
            .clone()
            .oneshot(
                Request::get("/api/charging/requests?status=BOGUS")
                    .header("authorization", format!("Bearer {token}"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
