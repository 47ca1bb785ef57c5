use crate::AppState;
use axum::{
    Router,
    routing::{get, post},
};

pub fn create_router() -> Router<AppState> {
    Router::new()
        .route(
            "/orchestrations",
            post(crate::api::handlers::orchestrations::submit)
                .get(crate::api::handlers::orchestrations::list),
        )
        .route(
            "/orchestrations/{id}",
            get(crate::api::handlers::orchestrations::get),
        )
        .route(
            "/orchestrations/{id}/cancel",
            post(crate::api::handlers::orchestrations::cancel),
        )
        .route(
            "/agents",
            post(crate::api::handlers::agents::register).get(crate::api::handlers::agents::list),
        )
        .route("/agents/{id}", get(crate::api::handlers::agents::get))
        .route(
            "/agents/{id}/deactivate",
            post(crate::api::handlers::agents::deactivate),
        )
        .route(
            "/agents/{id}/reactivate",
            post(crate::api::handlers::agents::reactivate),
        )
        .route(
            "/workflows",
            get(crate::api::handlers::workflows::list_workflows),
        )
        .route("/health", get(crate::api::handlers::health::health))
}
