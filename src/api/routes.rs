use axum::{
    routing::{get, post},
    Router,
};

use crate::api::handlers::{self, AppState};
use crate::store::traits::Store;

pub fn create_router<S: Store + 'static>() -> Router<AppState<S>> {
    Router::new()
        // Health check
        .route("/health", get(handlers::health_check))
        // Changesets
        .route(
            "/api/v1/changesets",
            get(handlers::list_changesets::<S>).post(handlers::create_changeset::<S>),
        )
        .route(
            "/api/v1/changesets/:id",
            get(handlers::get_changeset::<S>).put(handlers::update_changeset::<S>),
        )
        .route(
            "/api/v1/changesets/:id/append",
            post(handlers::append_payload::<S>),
        )
        .route(
            "/api/v1/changesets/:id/check",
            post(handlers::check_changeset::<S>),
        )
        .route(
            "/api/v1/changesets/:id/apply",
            post(handlers::apply_changeset::<S>),
        )
        .route(
            "/api/v1/changesets/:id/revert",
            post(handlers::revert_changeset::<S>),
        )
        // Entity lookup
        .route(
            "/api/v1/onestop_id/:onestop_id",
            get(handlers::get_by_onestop_id::<S>),
        )
}
