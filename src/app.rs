// app.rs - shared state and the route table
//
// public    /, /health, /ws/telemetry, device ingestion
// protected /api/v1/*        jwt_auth -> validate_organization -> validate_user -> rate limit
// elevated  /api/v1/admin/*  protected stack + require_admin

use std::sync::Arc;

use axum::{
    extract::{DefaultBodyLimit, FromRef},
    http::HeaderValue,
    middleware::{from_fn, from_fn_with_state},
    routing::{get, post, put},
    Router,
};
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    trace::TraceLayer,
};

use crate::config::config;
use crate::handlers::{elevated, protected, public};
use crate::middleware::{
    jwt_auth_middleware, rate_limit_middleware, require_admin_middleware, validate_organization_middleware,
    validate_user_middleware, RateLimiter,
};
use crate::realtime::{telemetry_ws, TelemetryHub};

#[derive(Clone)]
pub struct AppState {
    pub hub: Arc<TelemetryHub>,
    pub general_limiter: Arc<RateLimiter>,
    pub strict_limiter: Arc<RateLimiter>,
}

impl AppState {
    /// State with limiters sized from config
    pub fn new(hub: Arc<TelemetryHub>) -> Self {
        Self {
            hub,
            general_limiter: Arc::new(RateLimiter::general_from_config()),
            strict_limiter: Arc::new(RateLimiter::strict_from_config()),
        }
    }

    pub fn limiters(&self) -> Vec<Arc<RateLimiter>> {
        vec![self.general_limiter.clone(), self.strict_limiter.clone()]
    }
}

impl FromRef<AppState> for Arc<TelemetryHub> {
    fn from_ref(state: &AppState) -> Self {
        state.hub.clone()
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(public::root))
        .route("/health", get(public::health))
        .route("/ws/telemetry", get(telemetry_ws))
        .route("/api/v1/ingest/:device_id", post(public::api_key_ingest))
        .route("/api/v1/data/ingest/:device_id", post(public::device_ingest))
        .merge(protected_routes(&state))
        .layer(DefaultBodyLimit::max(config().api.max_request_size_bytes))
        .layer(cors_layer())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn protected_routes(state: &AppState) -> Router<AppState> {
    Router::new()
        .merge(data_routes())
        .merge(device_routes())
        .merge(variable_routes(state))
        .merge(synthetic_variable_routes())
        .merge(rule_routes())
        .merge(global_rule_routes(state))
        .merge(event_routes())
        .merge(admin_routes(state))
        .route_layer(from_fn_with_state(state.general_limiter.clone(), rate_limit_middleware))
        .route_layer(from_fn(validate_user_middleware))
        .route_layer(from_fn(validate_organization_middleware))
        .route_layer(from_fn(jwt_auth_middleware))
}

fn data_routes() -> Router<AppState> {
    use protected::data;

    Router::new()
        .route("/api/v1/data/ingest/bulk", post(data::bulk_ingest))
        .route("/api/v1/data/query", get(data::query))
        .route("/api/v1/data/latest", get(data::latest))
        .route("/api/v1/data/latest/:device_id", get(data::latest_for_device))
}

fn device_routes() -> Router<AppState> {
    use protected::devices;

    Router::new()
        .route("/api/v1/devices", get(devices::list).post(devices::create))
        .route(
            "/api/v1/devices/:device_id",
            get(devices::get).put(devices::update).delete(devices::delete),
        )
        .route("/api/v1/devices/:device_id/rotate-token", post(devices::rotate_token))
        .route(
            "/api/v1/devices/:device_id/token",
            get(devices::token_info).delete(devices::revoke_token),
        )
        .route("/api/v1/devices/:device_id/tags", get(devices::tags).put(devices::set_tags))
        .route("/api/v1/devices/:device_id/health", get(devices::health))
        .route("/api/v1/devices/:device_id/variables", get(devices::variables))
        .route("/api/v1/devices/:device_id/variables/latest", get(devices::latest_values))
}

fn variable_routes(state: &AppState) -> Router<AppState> {
    use protected::variables;

    let analytics = Router::new()
        .route("/api/v1/variables/:id/history", get(variables::history))
        .route("/api/v1/variables/:id/statistics", get(variables::statistics))
        .route_layer(from_fn_with_state(state.strict_limiter.clone(), rate_limit_middleware));

    Router::new()
        .route("/api/v1/variables", get(variables::list).post(variables::create))
        .route("/api/v1/variables/templates", get(variables::templates))
        .route(
            "/api/v1/variables/:id",
            get(variables::get).put(variables::update).delete(variables::delete),
        )
        .merge(analytics)
}

fn synthetic_variable_routes() -> Router<AppState> {
    use protected::synthetic_variables as synthetic;

    Router::new()
        .route("/api/v1/synthetic-variables", get(synthetic::list).post(synthetic::create))
        .route(
            "/api/v1/synthetic-variables/:id",
            get(synthetic::get).put(synthetic::update).delete(synthetic::delete),
        )
        .route("/api/v1/synthetic-variables/:id/values", get(synthetic::values))
}

fn rule_routes() -> Router<AppState> {
    use protected::rules;

    Router::new()
        .route("/api/v1/rules", get(rules::list).post(rules::create))
        .route("/api/v1/rules/:id", get(rules::get).put(rules::update).delete(rules::delete))
        .route("/api/v1/alerts", get(rules::alerts))
        .route("/api/v1/alerts/unacknowledged", get(rules::unacknowledged_alerts))
        .route("/api/v1/alerts/:id/acknowledge", post(rules::acknowledge_alert))
}

fn global_rule_routes(state: &AppState) -> Router<AppState> {
    use protected::global_rules;

    let evaluate = Router::new()
        .route("/api/v1/global-rules/:id/evaluate", post(global_rules::evaluate))
        .route_layer(from_fn_with_state(state.strict_limiter.clone(), rate_limit_middleware));

    Router::new()
        .route("/api/v1/global-rules", get(global_rules::list).post(global_rules::create))
        .route(
            "/api/v1/global-rules/:id",
            get(global_rules::get)
                .put(global_rules::update)
                .delete(global_rules::delete),
        )
        .route("/api/v1/global-rules/:id/toggle", post(global_rules::toggle))
        .route("/api/v1/global-alerts", get(global_rules::alerts))
        .route("/api/v1/global-alerts/:id/acknowledge", post(global_rules::acknowledge_alert))
        .merge(evaluate)
}

fn event_routes() -> Router<AppState> {
    use protected::{events, expression_functions};

    Router::new()
        .route("/api/v1/events", get(events::list))
        .route("/api/v1/events/recent", get(events::recent))
        .route("/api/v1/events/statistics/types", get(events::statistics_by_type))
        .route("/api/v1/events/statistics/severities", get(events::statistics_by_severity))
        .route("/api/v1/expression-functions", get(expression_functions::list))
        .route("/api/v1/expression-functions/flat", get(expression_functions::flat))
}

fn admin_routes(state: &AppState) -> Router<AppState> {
    use elevated::{organizations, retention, trash, users};

    let run_retention = Router::new()
        .route("/api/v1/admin/retention/run", post(retention::run))
        .route_layer(from_fn_with_state(state.strict_limiter.clone(), rate_limit_middleware));

    Router::new()
        .route("/api/v1/admin/users", get(users::list))
        .route(
            "/api/v1/admin/users/:id",
            get(users::get).put(users::update).delete(users::delete),
        )
        .route("/api/v1/admin/users/:id/enable", put(users::enable))
        .route("/api/v1/admin/users/:id/disable", put(users::disable))
        .route("/api/v1/admin/users/:id/roles", put(users::replace_roles))
        .route(
            "/api/v1/admin/users/:id/roles/:role",
            post(users::add_role).delete(users::remove_role),
        )
        .route("/api/v1/admin/roles", get(users::roles))
        .route("/api/v1/admin/trash", get(trash::list))
        .route("/api/v1/admin/trash/stats", get(trash::stats))
        .route("/api/v1/admin/trash/:id", axum::routing::delete(trash::purge))
        .route("/api/v1/admin/trash/:id/restore", post(trash::restore))
        .route(
            "/api/v1/admin/organizations",
            get(organizations::list).post(organizations::create),
        )
        .route(
            "/api/v1/admin/organizations/:id",
            get(organizations::get).delete(organizations::delete),
        )
        .route(
            "/api/v1/admin/retention/policy",
            get(retention::get_policy).put(retention::put_policy),
        )
        .route("/api/v1/admin/retention/executions", get(retention::executions))
        .merge(run_retention)
        .route_layer(from_fn(require_admin_middleware))
}

/// Permissive when `*` (or nothing) is configured, else the listed origins only
fn cors_layer() -> CorsLayer {
    let security = &config().security;
    if !security.enable_cors {
        return CorsLayer::new();
    }

    let origins: Vec<HeaderValue> = security
        .cors_origins
        .iter()
        .filter(|origin| origin.as_str() != "*")
        .filter_map(|origin| HeaderValue::from_str(origin).ok())
        .collect();

    if origins.is_empty() || security.cors_origins.iter().any(|o| o == "*") {
        CorsLayer::permissive()
    } else {
        CorsLayer::permissive().allow_origin(AllowOrigin::list(origins))
    }
}
