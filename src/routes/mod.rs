use axum::{
    middleware,
    routing::{delete, get, post, put},
    Json, Router,
};
use serde_json::{json, Value};

use crate::handlers::{admin, parent, payment};
use crate::middleware::auth::{
    auth_middleware, require_admin, require_parent, require_webhook_secret,
};
use crate::middleware::rate_limit::create_public_governor;
use crate::middleware::role_rate_limit::{create_role_governor, RateLimitedRole};
use crate::AppState;

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

pub fn create_router(state: AppState) -> Router {
    let parent_governor = create_role_governor(RateLimitedRole::Parent);
    // IP-based governor for anonymous route browsing
    let public_governor = create_public_governor();

    let public_routes = Router::new()
        .route("/routes", get(parent::list_routes))
        .route("/routes/{id}", get(parent::get_route))
        .route("/routes/{id}/quote", get(parent::quote_route))
        .layer(public_governor);

    // Admin routes (requires auth + admin role), bounded by the global limiter only
    let admin_routes = Router::new()
        // Fleet and routes
        .route("/vehicles", get(admin::list_vehicles).post(admin::create_vehicle))
        .route("/routes", get(admin::list_routes).post(admin::create_route))
        .route("/routes/{id}", put(admin::update_route))
        .route("/routes/{id}/assign-vehicle", post(admin::assign_vehicle))
        // Pricing
        .route(
            "/pricing-rules",
            get(admin::list_pricing_rules).post(admin::create_pricing_rule),
        )
        .route("/pricing-rules/{id}", delete(admin::deactivate_pricing_rule))
        // Operational calendar
        .route("/closures", get(admin::list_closures).post(admin::create_closure))
        .route("/closures/{date}", delete(admin::delete_closure))
        // Booking management
        .route("/bookings", get(admin::list_all_bookings))
        .route("/bookings/{id}", delete(admin::delete_booking))
        .route("/bookings/{id}/require-approval", post(admin::require_approval))
        .route("/bookings/{id}/activate", post(admin::activate_booking))
        .route("/bookings/{id}/cancel", post(admin::cancel_booking))
        .route("/sweeps", post(admin::run_sweep))
        .layer(middleware::from_fn(require_admin))
        .layer(middleware::from_fn_with_state(state.clone(), auth_middleware));

    // Parent routes (requires auth + parent role)
    // Rate limit: 100 requests per minute per account
    let parent_routes = Router::new()
        .route("/", post(parent::create_booking).get(parent::my_bookings))
        .route("/{id}", delete(parent::cancel_booking))
        .layer(parent_governor)
        .layer(middleware::from_fn(require_parent))
        .layer(middleware::from_fn_with_state(state.clone(), auth_middleware));

    let payment_routes = Router::new()
        .route("/webhook", post(payment::payment_webhook))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            require_webhook_secret,
        ));

    Router::new()
        .route("/health", get(health))
        .nest("/api", public_routes)
        .nest("/api/admin", admin_routes)
        .nest("/api/bookings", parent_routes)
        .nest("/api/payments", payment_routes)
        .with_state(state)
}
