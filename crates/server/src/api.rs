//! HTTP API: authentication, compute routes, sample queries, health and
//! Prometheus metrics
//!
//! Compute responses are the decimal value as plain text; rejected inputs
//! and domain errors return the message string as the body.

use std::collections::HashMap;
use std::sync::Arc;

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use compute_lib::{
    health::{ComponentStatus, HealthRegistry},
    models::{Operation, Parameters},
    observability::ServiceMetrics,
    store::ResultStore,
    ComputeError, Dispatcher,
};
use prometheus::{Encoder, TextEncoder};
use serde::{Deserialize, Serialize};
use tracing::{error, info};

use crate::auth::{AuthKeys, AuthUser};

/// Shared application state
pub struct AppState {
    pub dispatcher: Dispatcher,
    pub store: Arc<dyn ResultStore>,
    pub health_registry: HealthRegistry,
    pub metrics: ServiceMetrics,
    pub auth: AuthKeys,
}

impl AppState {
    pub fn new(
        dispatcher: Dispatcher,
        store: Arc<dyn ResultStore>,
        health_registry: HealthRegistry,
        metrics: ServiceMetrics,
        auth: AuthKeys,
    ) -> Self {
        Self {
            dispatcher,
            store,
            health_registry,
            metrics,
            auth,
        }
    }
}

#[derive(Debug, Deserialize)]
struct LoginRequest {
    #[serde(default)]
    email: String,
    #[serde(default)]
    password: String,
}

#[derive(Debug, Serialize)]
struct TokenResponse {
    access_token: String,
}

async fn login(
    State(state): State<Arc<AppState>>,
    Json(body): Json<LoginRequest>,
) -> Response {
    if body.email.is_empty() || body.password.is_empty() {
        return (StatusCode::BAD_REQUEST, "Email and password are required").into_response();
    }

    match state.store.find_user(&body.email, &body.password).await {
        Ok(Some(user)) => match state.auth.issue(&user.email) {
            Ok(access_token) => Json(TokenResponse { access_token }).into_response(),
            Err(e) => {
                error!(error = %e, "Failed to sign access token");
                (StatusCode::INTERNAL_SERVER_ERROR, "Failed to issue token").into_response()
            }
        },
        Ok(None) => (StatusCode::UNAUTHORIZED, "Invalid email or password").into_response(),
        Err(e) => {
            error!(error = %e, "User lookup failed");
            (StatusCode::SERVICE_UNAVAILABLE, "Result store unavailable").into_response()
        }
    }
}

/// Build the operation's parameter map from query values. Missing values
/// default to 1, matching the original route behavior.
fn parse_parameters(
    operation: Operation,
    query: &HashMap<String, String>,
) -> Result<Parameters, String> {
    let mut params = Parameters::new();
    for &name in operation.required_parameters() {
        let raw = query.get(name).map(String::as_str).unwrap_or("1");
        let value: i64 = raw.parse().map_err(|_| {
            format!("Invalid request, {name} parameter must be a positive integer")
        })?;
        params.insert(name, value);
    }
    Ok(params)
}

fn compute_error_response(err: ComputeError) -> Response {
    match err {
        ComputeError::Domain(msg) | ComputeError::InvalidParameters(msg) => {
            (StatusCode::BAD_REQUEST, msg).into_response()
        }
        ComputeError::WorkerFailure(msg) => {
            (StatusCode::INTERNAL_SERVER_ERROR, msg).into_response()
        }
        ComputeError::Store(e) => {
            error!(error = %e, "Result store unavailable");
            (StatusCode::SERVICE_UNAVAILABLE, "Result store unavailable").into_response()
        }
    }
}

async fn compute(
    state: Arc<AppState>,
    operation: Operation,
    query: HashMap<String, String>,
    user: String,
) -> Response {
    let params = match parse_parameters(operation, &query) {
        Ok(params) => params,
        Err(msg) => return (StatusCode::BAD_REQUEST, msg).into_response(),
    };

    match state.dispatcher.dispatch(operation, params, &user).await {
        Ok(value) => (StatusCode::OK, value).into_response(),
        Err(e) => compute_error_response(e),
    }
}

async fn prime(
    State(state): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
    Query(query): Query<HashMap<String, String>>,
) -> Response {
    compute(state, Operation::Prime, query, user).await
}

async fn fibonacci(
    State(state): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
    Query(query): Query<HashMap<String, String>>,
) -> Response {
    compute(state, Operation::Fibonacci, query, user).await
}

async fn factorial(
    State(state): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
    Query(query): Query<HashMap<String, String>>,
) -> Response {
    compute(state, Operation::Factorial, query, user).await
}

async fn power(
    State(state): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
    Query(query): Query<HashMap<String, String>>,
) -> Response {
    compute(state, Operation::Power, query, user).await
}

async fn sum_of_naturals(
    State(state): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
    Query(query): Query<HashMap<String, String>>,
) -> Response {
    compute(state, Operation::SumOfNaturals, query, user).await
}

#[derive(Debug, Deserialize)]
struct SampleRangeQuery {
    start: Option<DateTime<Utc>>,
    end: Option<DateTime<Utc>>,
}

async fn resource_samples(
    State(state): State<Arc<AppState>>,
    AuthUser(_user): AuthUser,
    Query(range): Query<SampleRangeQuery>,
) -> Response {
    match state.store.samples_in_range(range.start, range.end).await {
        Ok(samples) => Json(samples).into_response(),
        Err(e) => {
            error!(error = %e, "Sample query failed");
            (StatusCode::SERVICE_UNAVAILABLE, "Result store unavailable").into_response()
        }
    }
}

/// Health check - 200 if healthy or degraded, 503 if unhealthy
async fn healthz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let health = state.health_registry.health().await;

    let status_code = match health.status {
        ComponentStatus::Healthy | ComponentStatus::Degraded => StatusCode::OK,
        ComponentStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };

    (status_code, Json(health))
}

/// Readiness check - 200 if ready, 503 if not
async fn readyz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let readiness = state.health_registry.readiness().await;

    let status_code = if readiness.ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (status_code, Json(readiness))
}

/// Prometheus metrics endpoint
async fn metrics() -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();

    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        error!(error = %e, "Failed to encode metrics");
        return (StatusCode::INTERNAL_SERVER_ERROR, Vec::new()).into_response();
    }

    (
        StatusCode::OK,
        [("content-type", "text/plain; charset=utf-8")],
        buffer,
    )
        .into_response()
}

/// Create the API router
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/login", post(login))
        .route("/prime", get(prime))
        .route("/fibonacci", get(fibonacci))
        .route("/factorial", get(factorial))
        .route("/power", get(power))
        .route("/sum_of_naturals", get(sum_of_naturals))
        .route("/metrics/resources", get(resource_samples))
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/metrics", get(metrics))
        .with_state(state)
}

/// Start the API server
pub async fn serve(port: u16, state: Arc<AppState>) -> anyhow::Result<()> {
    let app = create_router(state);

    let addr = format!("0.0.0.0:{}", port);
    info!(addr = %addr, "Starting API server");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
