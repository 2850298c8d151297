//! Product query, update and cache-control endpoints.

use axum::{
    Json,
    extract::{Path, Query, State},
    http::{
        HeaderMap, HeaderName, HeaderValue, StatusCode,
        header::{CACHE_CONTROL, ETAG, IF_NONE_MATCH, VARY},
    },
    response::{IntoResponse, Response},
};
use serde::Deserialize;
use tokio_util::sync::CancellationToken;

use crate::application::error::HttpError;
use crate::cache::{
    CacheRequest, IfNoneMatch, MAX_RESULTS, QueryOutcome, ResponseDirectives, Strategy,
};
use crate::domain::products::ProductUpdateInput;

use super::HttpState;

pub const CACHE_STATUS_HEADER: HeaderName = HeaderName::from_static("x-cache");
pub const EVICTION_STATUS_HEADER: HeaderName = HeaderName::from_static("x-cache-eviction");
const EVICTION_PARTIAL_FAILURE: &str = "partial-failure";

const SOURCE: &str = "infra::http::products";

#[derive(Debug, Deserialize)]
pub(super) struct ProductQuery {
    category: Option<String>,
    limit: Option<u32>,
}

/// Request-header override that skips server-side caching for one request.
#[derive(Debug, Clone)]
pub struct BypassDirective {
    header: HeaderName,
    value: String,
}

impl BypassDirective {
    /// Falls back to `Cache-Control: no-cache` when `header` is not a valid name.
    pub fn new(header: &str, value: &str) -> Self {
        let header = HeaderName::from_bytes(header.trim().as_bytes()).unwrap_or(CACHE_CONTROL);
        Self {
            header,
            value: value.trim().to_ascii_lowercase(),
        }
    }

    pub fn requested(&self, headers: &HeaderMap) -> bool {
        !self.value.is_empty()
            && headers
                .get_all(&self.header)
                .iter()
                .filter_map(|value| value.to_str().ok())
                .any(|value| value.to_ascii_lowercase().contains(&self.value))
    }
}

pub(super) async fn list_products(
    State(state): State<HttpState>,
    Path(segment): Path<String>,
    Query(query): Query<ProductQuery>,
    headers: HeaderMap,
) -> Response {
    let Some(strategy) = Strategy::from_path_segment(&segment) else {
        return HttpError::new(
            SOURCE,
            StatusCode::NOT_FOUND,
            "Unknown caching strategy",
            format!("no strategy matches path segment `{segment}`"),
        )
        .into_response();
    };

    let request = CacheRequest {
        if_none_match: headers
            .get(IF_NONE_MATCH)
            .and_then(|value| value.to_str().ok())
            .and_then(IfNoneMatch::parse),
        bypass: state.bypass.requested(&headers),
    };

    // Dropping the handler future (client gone) cancels the backend query.
    let cancel = CancellationToken::new();
    let _cancel_on_drop = cancel.clone().drop_guard();

    let category = query.category.unwrap_or_default();
    let limit = query.limit.unwrap_or(MAX_RESULTS);
    match state
        .catalog
        .products(strategy, &category, limit, &request, &cancel)
        .await
    {
        Ok(QueryOutcome::Payload {
            products,
            source,
            directives,
        }) => {
            let mut response = Json(products.to_vec()).into_response();
            apply_directives(response.headers_mut(), &directives);
            response
                .headers_mut()
                .insert(CACHE_STATUS_HEADER, HeaderValue::from_static(source.as_str()));
            response
        }
        Ok(QueryOutcome::NotModified { etag }) => {
            let mut response = StatusCode::NOT_MODIFIED.into_response();
            if let Ok(value) = HeaderValue::from_str(&etag.to_string()) {
                response.headers_mut().insert(ETAG, value);
            }
            response
        }
        Err(err) => HttpError::from(err).into_response(),
    }
}

fn apply_directives(headers: &mut HeaderMap, directives: &ResponseDirectives) {
    if let Some(value) = directives
        .cache_control
        .as_deref()
        .and_then(|value| HeaderValue::from_str(value).ok())
    {
        headers.insert(CACHE_CONTROL, value);
    }
    if let Some(vary) = directives.vary {
        headers.insert(VARY, HeaderValue::from_static(vary));
    }
    if let Some(value) = directives
        .etag
        .as_ref()
        .and_then(|etag| HeaderValue::from_str(&etag.to_string()).ok())
    {
        headers.insert(ETAG, value);
    }
}

pub(super) async fn update_product(
    State(state): State<HttpState>,
    Path(id): Path<i64>,
    Json(input): Json<ProductUpdateInput>,
) -> Response {
    match state.catalog.update_product(id, input).await {
        Ok(outcome) => {
            let mut response = Json(outcome.product).into_response();
            if outcome.eviction.is_err() {
                response.headers_mut().insert(
                    EVICTION_STATUS_HEADER,
                    HeaderValue::from_static(EVICTION_PARTIAL_FAILURE),
                );
            }
            response
        }
        Err(err) => HttpError::from(err).into_response(),
    }
}

pub(super) async fn clear_cache(State(state): State<HttpState>) -> Response {
    match state.catalog.clear_cache().await {
        Ok(report) => (
            StatusCode::OK,
            format!(
                "Cache cleared: {} entries evicted across {} stores",
                report.evicted, report.stores
            ),
        )
            .into_response(),
        Err(err) => HttpError::from(err).into_response(),
    }
}
