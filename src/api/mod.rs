pub mod handlers;
pub mod middleware;
pub mod state;

use std::sync::Arc;

use axum::{
    routing::{delete, get, post},
    Router,
};
use tower_http::{compression::CompressionLayer, cors::CorsLayer, trace::TraceLayer};

use crate::{config::Settings, service::ServiceContext};
use state::AppState;

pub fn create_app(service_context: Arc<ServiceContext>, settings: Arc<Settings>) -> Router {
    let app_state = AppState::new(service_context, settings);

    Router::new()
        // Root and health endpoints
        .route("/", get(handlers::root::root))
        .route("/health", get(handlers::root::health_check))
        // Gateway settlement callback (signature-authenticated, no session)
        .route(
            "/payments/gateway/return",
            get(handlers::payments::gateway_return),
        )
        // API routes
        .nest("/api", api_routes(app_state.clone()))
        // Admin routes
        .nest("/admin", admin_routes(app_state.clone()))
        // Add state to the router
        .with_state(app_state)
        // Middleware
        .layer(CompressionLayer::new())
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

fn api_routes(state: AppState) -> Router<AppState> {
    Router::new()
        // Public catalog reads
        .route("/courses", get(handlers::courses::list))
        .route("/courses/:slug", get(handlers::courses::get_by_slug))
        // Purchase endpoints - require an authenticated identity
        .merge(
            Router::new()
                .route("/checkout", post(handlers::checkout::purchase))
                .route("/checkout/preview", post(handlers::checkout::preview))
                .route("/enrollments", get(handlers::enrollments::list_mine))
                .route_layer(axum::middleware::from_fn_with_state(
                    state.clone(),
                    middleware::auth::require_auth,
                )),
        )
}

fn admin_routes(state: AppState) -> Router<AppState> {
    Router::new()
        .route("/coupons", get(handlers::coupons::list))
        .route("/coupons", post(handlers::coupons::create))
        .route(
            "/coupons/:coupon_id/courses/:course_id",
            post(handlers::coupons::link_course),
        )
        .route(
            "/coupons/:coupon_id/courses/:course_id",
            delete(handlers::coupons::unlink_course),
        )
        .layer(axum::middleware::from_fn_with_state(
            state,
            middleware::auth::require_admin,
        ))
}
