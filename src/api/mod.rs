pub mod auth;
mod drivers;
pub mod error;
mod organizations;
pub mod rate_limit;
mod rides;
mod users;
pub mod validation;

use axum::{
    middleware,
    routing::{get, post, put},
    Router,
};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::AppState;

pub fn create_router(state: Arc<AppState>) -> Router {
    // Identity verification and session refresh
    let auth_routes = Router::new()
        .route("/google", post(auth::google_login))
        .route("/me", get(auth::me))
        .route("/refresh", post(auth::refresh))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            rate_limit::rate_limit_auth,
        ));

    // Every handler below takes the bearer-authenticated `User`
    let api_routes = Router::new()
        // Users
        .route("/users/me", put(users::update_me))
        .route("/users/:id", get(users::get_user))
        .route("/users/:id/rides", get(users::user_rides))
        // Drivers
        .route("/drivers", post(drivers::apply))
        .route("/drivers/me", get(drivers::my_profile))
        .route("/drivers/pending", get(drivers::list_pending))
        .route("/drivers/:id", get(drivers::get_driver))
        .route("/drivers/:id/approve", post(drivers::approve))
        .route("/drivers/:id/reviews", get(drivers::driver_reviews))
        // Rides
        .route("/rides", post(rides::create_ride))
        .route("/rides/rider-requests", get(rides::rider_requests))
        .route("/rides/driver-posts", get(rides::driver_posts))
        .route("/rides/search", get(rides::search_rides))
        .route("/rides/:id", get(rides::get_ride).put(rides::update_ride))
        .route("/rides/:id/join", post(rides::join_ride))
        .route("/rides/:id/leave", post(rides::leave_ride))
        .route("/rides/:id/join_driver", post(rides::accept_ride))
        .route("/rides/:id/complete", post(rides::complete_ride))
        .route("/rides/:id/cancel", post(rides::cancel_ride))
        .route("/rides/:id/riders", get(rides::list_riders))
        .route("/rides/:id/reviews", post(rides::create_review))
        // Organizations
        .route(
            "/organizations",
            get(organizations::list_organizations).post(organizations::create_organization),
        )
        .route("/organizations/join", post(organizations::join_organization))
        .route(
            "/organizations/:id",
            get(organizations::get_organization)
                .put(organizations::update_organization)
                .delete(organizations::delete_organization),
        )
        .route(
            "/organizations/:id/members",
            get(organizations::list_members).post(organizations::add_member),
        )
        .route("/organizations/:id/drivers", get(organizations::list_drivers))
        .route("/organizations/:id/leave", post(organizations::leave_organization))
        .route("/organizations/:id/rides", get(organizations::organization_rides))
        .route(
            "/organizations/:id/members/:user_id/role",
            put(organizations::update_member_role),
        )
        .route(
            "/organizations/:id/members/:user_id",
            axum::routing::delete(organizations::remove_member),
        )
        .layer(middleware::from_fn_with_state(
            state.clone(),
            rate_limit::rate_limit_api,
        ));

    Router::new()
        .route("/health", get(health_check))
        .nest("/api/auth", auth_routes)
        .nest("/api", api_routes)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn health_check() -> &'static str {
    "OK"
}
