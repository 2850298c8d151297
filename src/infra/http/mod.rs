mod middleware;
mod products;

pub use middleware::{REQUEST_ID_HEADER, RequestContext};
pub use products::{BypassDirective, CACHE_STATUS_HEADER, EVICTION_STATUS_HEADER};

use axum::{
    Router,
    extract::State,
    http::StatusCode,
    middleware as axum_middleware,
    response::{IntoResponse, Response},
    routing::{get, post, put},
};
use sqlx::Error as SqlxError;

use crate::application::catalog::CatalogService;
use crate::application::error::ErrorReport;
use crate::infra::db::PostgresRepositories;

use self::middleware::{log_responses, set_request_context};

#[derive(Clone)]
pub struct HttpState {
    pub catalog: CatalogService,
    pub bypass: BypassDirective,
    /// Absent when serving from the in-memory catalogue.
    pub db: Option<PostgresRepositories>,
}

pub fn build_router(state: HttpState) -> Router {
    Router::new()
        .route("/products/clear-cache", post(products::clear_cache))
        .route("/products/update/{id}", put(products::update_product))
        .route("/products/{strategy}", get(products::list_products))
        .route("/_health/db", get(db_health))
        .layer(axum_middleware::from_fn(log_responses))
        .layer(axum_middleware::from_fn(set_request_context))
        .with_state(state)
}

async fn db_health(State(state): State<HttpState>) -> Response {
    match state.db {
        Some(db) => db_health_response(db.health_check().await),
        None => StatusCode::NO_CONTENT.into_response(),
    }
}

fn db_health_response(result: Result<(), SqlxError>) -> Response {
    match result {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(err) => {
            let mut response = StatusCode::SERVICE_UNAVAILABLE.into_response();
            ErrorReport::from_error(
                "infra::http::db_health",
                StatusCode::SERVICE_UNAVAILABLE,
                &err,
            )
            .attach(&mut response);
            response
        }
    }
}
