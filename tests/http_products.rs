use std::sync::Arc;

use axum::{
    Router,
    body::{Body, Bytes},
    http::{
        HeaderMap, Method, Request, StatusCode,
        header::{CACHE_CONTROL, CONTENT_TYPE, ETAG, IF_NONE_MATCH, VARY},
    },
};
use http_body_util::BodyExt;
use rust_decimal::Decimal;
use stratacache::application::catalog::CatalogService;
use stratacache::application::repos::{ProductsRepo, ProductsWriteRepo};
use stratacache::cache::{CacheConfig, CacheOrchestrator, MemoryTier};
use stratacache::domain::products::Product;
use stratacache::infra::http::{
    BypassDirective, CACHE_STATUS_HEADER, EVICTION_STATUS_HEADER, HttpState, REQUEST_ID_HEADER,
    build_router,
};
use stratacache::infra::memory::InMemoryProducts;
use tower::ServiceExt;

fn product(id: i64, name: &str, price: Decimal, category: &str) -> Product {
    Product {
        id,
        name: name.to_string(),
        description: None,
        price,
        category: category.to_string(),
    }
}

fn app(products: Vec<Product>) -> (Router, Arc<InMemoryProducts>) {
    let repo = Arc::new(InMemoryProducts::new(products));
    let config = CacheConfig::default();
    let bypass = BypassDirective::new(&config.bypass_header, &config.bypass_value);
    let orchestrator = Arc::new(CacheOrchestrator::with_default_stores(
        Arc::clone(&repo) as Arc<dyn ProductsRepo>,
        config,
        Arc::new(MemoryTier::new()),
    ));
    let writer: Arc<dyn ProductsWriteRepo> = repo.clone();
    let state = HttpState {
        catalog: CatalogService::new(orchestrator, writer),
        bypass,
        db: None,
    };
    (build_router(state), repo)
}

async fn send(router: &Router, request: Request<Body>) -> (StatusCode, HeaderMap, Bytes) {
    let response = router
        .clone()
        .oneshot(request)
        .await
        .expect("router is infallible");
    let status = response.status();
    let headers = response.headers().clone();
    let body = response
        .into_body()
        .collect()
        .await
        .expect("body collects")
        .to_bytes();
    (status, headers, body)
}

fn get(uri: &str) -> Request<Body> {
    Request::builder()
        .uri(uri)
        .body(Body::empty())
        .expect("valid request")
}

fn products_of(body: &Bytes) -> Vec<Product> {
    serde_json::from_slice(body).expect("product array")
}

fn update_request(id: i64, price: &str) -> Request<Body> {
    let payload = serde_json::json!({
        "name": "Widget",
        "price": price,
        "category": "Tools",
    });
    Request::builder()
        .method(Method::PUT)
        .uri(format!("/products/update/{id}"))
        .header(CONTENT_TYPE, "application/json")
        .body(Body::from(payload.to_string()))
        .expect("valid request")
}

#[tokio::test]
async fn widget_price_update_is_visible_after_cached_read() {
    let (router, _) = app(vec![
        product(7, "Widget", Decimal::new(999, 2), "Tools"),
        product(8, "Novel", Decimal::new(1500, 2), "Books"),
    ]);

    let (status, headers, body) = send(&router, get("/products/serverside?category=Tools")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(headers[&CACHE_STATUS_HEADER], "miss");
    let products = products_of(&body);
    assert_eq!(products.len(), 1);
    assert_eq!(products[0].id, 7);
    assert_eq!(products[0].price, Decimal::new(999, 2));

    let (_, headers, _) = send(&router, get("/products/serverside?category=Tools")).await;
    assert_eq!(headers[&CACHE_STATUS_HEADER], "hit");

    let (status, headers, body) = send(&router, update_request(7, "12.50")).await;
    assert_eq!(status, StatusCode::OK);
    assert!(headers.get(&EVICTION_STATUS_HEADER).is_none());
    let updated: Product = serde_json::from_slice(&body).expect("product");
    assert_eq!(updated.price, Decimal::new(1250, 2));

    let (status, headers, body) = send(&router, get("/products/serverside?category=Tools")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(headers[&CACHE_STATUS_HEADER], "miss");
    assert_eq!(products_of(&body)[0].price, Decimal::new(1250, 2));
}

#[tokio::test]
async fn update_reaches_every_strategy() {
    let (router, _) = app(vec![product(7, "Widget", Decimal::new(999, 2), "Tools")]);
    let segments = ["none", "clientdirected", "serverside", "layered", "conditional"];

    for segment in segments {
        let (status, _, _) = send(&router, get(&format!("/products/{segment}?category=Tools"))).await;
        assert_eq!(status, StatusCode::OK, "{segment}");
    }

    let (status, _, _) = send(&router, update_request(7, "12.50")).await;
    assert_eq!(status, StatusCode::OK);

    for segment in segments {
        let (_, _, body) = send(&router, get(&format!("/products/{segment}?category=Tools"))).await;
        assert_eq!(products_of(&body)[0].price, Decimal::new(1250, 2), "{segment}");
    }
}

#[tokio::test]
async fn blank_or_missing_category_is_rejected() {
    let (router, _) = app(vec![product(7, "Widget", Decimal::ONE, "Tools")]);

    for uri in [
        "/products/none?category=",
        "/products/serverside?category=%20%20",
        "/products/layered",
    ] {
        let (status, _, body) = send(&router, get(uri)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "{uri}");
        assert_eq!(&body[..], b"Category parameter is required", "{uri}");
    }
}

#[tokio::test]
async fn results_are_capped_at_one_hundred() {
    let rows = (1..=500)
        .map(|id| product(id, &format!("Product {id}"), Decimal::ONE, "Tools"))
        .collect();
    let (router, _) = app(rows);

    let (_, _, body) = send(&router, get("/products/none?category=Tools")).await;
    assert_eq!(products_of(&body).len(), 100);

    let (_, _, body) = send(&router, get("/products/layered?category=Tools&limit=1000")).await;
    let products = products_of(&body);
    assert_eq!(products.len(), 100);
    assert!(products.windows(2).all(|pair| pair[0].id < pair[1].id));

    let (_, _, body) = send(&router, get("/products/serverside?category=Tools&limit=5")).await;
    assert_eq!(products_of(&body).len(), 5);
}

#[tokio::test]
async fn conditional_requests_answer_not_modified() {
    let (router, _) = app(vec![product(7, "Widget", Decimal::new(999, 2), "Tools")]);

    let (status, headers, _) = send(&router, get("/products/conditional?category=Tools")).await;
    assert_eq!(status, StatusCode::OK);
    let etag = headers[&ETAG].to_str().expect("ascii etag").to_string();
    assert!(etag.starts_with('"') && etag.ends_with('"'));

    for presented in [etag.clone(), format!("W/{etag}"), format!("\"other\", {etag}")] {
        let request = Request::builder()
            .uri("/products/etag?category=Tools")
            .header(IF_NONE_MATCH, presented.as_str())
            .body(Body::empty())
            .expect("valid request");
        let (status, headers, body) = send(&router, request).await;
        assert_eq!(status, StatusCode::NOT_MODIFIED, "{presented}");
        assert!(body.is_empty());
        assert_eq!(headers[&ETAG], etag.as_str());
    }

    let stale = Request::builder()
        .uri("/products/conditional?category=Tools")
        .header(IF_NONE_MATCH, "\"0000000000000000\"")
        .body(Body::empty())
        .expect("valid request");
    let (status, headers, body) = send(&router, stale).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(headers[&ETAG], etag.as_str());
    assert_eq!(products_of(&body).len(), 1);
}

#[tokio::test]
async fn validator_changes_after_update() {
    let (router, _) = app(vec![product(7, "Widget", Decimal::new(999, 2), "Tools")]);

    let (_, headers, _) = send(&router, get("/products/conditional?category=Tools")).await;
    let before = headers[&ETAG].to_str().expect("ascii etag").to_string();

    send(&router, update_request(7, "12.50")).await;

    let request = Request::builder()
        .uri("/products/conditional?category=Tools")
        .header(IF_NONE_MATCH, before.as_str())
        .body(Body::empty())
        .expect("valid request");
    let (status, headers, body) = send(&router, request).await;
    assert_eq!(status, StatusCode::OK);
    assert_ne!(headers[&ETAG], before.as_str());
    assert_eq!(products_of(&body)[0].price, Decimal::new(1250, 2));
}

#[tokio::test]
async fn client_directed_sets_caching_headers() {
    let (router, _) = app(vec![product(7, "Widget", Decimal::ONE, "Tools")]);

    for segment in ["clientdirected", "client"] {
        let (status, headers, _) =
            send(&router, get(&format!("/products/{segment}?category=Tools"))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(headers[&CACHE_CONTROL], "public, max-age=60");
        assert_eq!(headers[&VARY], "Accept-Encoding");
        assert!(headers.get(&ETAG).is_none());
    }

    let (_, headers, _) = send(&router, get("/products/none?category=Tools")).await;
    assert!(headers.get(&CACHE_CONTROL).is_none());
}

#[tokio::test]
async fn no_cache_header_bypasses_server_side_store() {
    let (router, repo) = app(vec![product(7, "Widget", Decimal::new(999, 2), "Tools")]);

    send(&router, get("/products/serverside?category=Tools")).await;
    repo.replace(product(7, "Widget", Decimal::new(100, 2), "Tools"));

    let bypass = Request::builder()
        .uri("/products/serverside?category=Tools")
        .header(CACHE_CONTROL, "no-cache")
        .body(Body::empty())
        .expect("valid request");
    let (_, headers, body) = send(&router, bypass).await;
    assert_eq!(headers[&CACHE_STATUS_HEADER], "miss");
    assert_eq!(products_of(&body)[0].price, Decimal::new(100, 2));

    // The existing entry was neither evicted nor replaced.
    let (_, headers, body) = send(&router, get("/products/serverside?category=Tools")).await;
    assert_eq!(headers[&CACHE_STATUS_HEADER], "hit");
    assert_eq!(products_of(&body)[0].price, Decimal::new(999, 2));
}

#[tokio::test]
async fn clear_cache_evicts_everything() {
    let (router, repo) = app(vec![product(7, "Widget", Decimal::new(999, 2), "Tools")]);

    send(&router, get("/products/layered?category=Tools")).await;
    repo.replace(product(7, "Widget", Decimal::new(100, 2), "Tools"));

    let clear = Request::builder()
        .method(Method::POST)
        .uri("/products/clear-cache")
        .body(Body::empty())
        .expect("valid request");
    let (status, _, body) = send(&router, clear).await;
    assert_eq!(status, StatusCode::OK);
    assert!(String::from_utf8_lossy(&body).starts_with("Cache cleared"));

    let (_, headers, body) = send(&router, get("/products/layered?category=Tools")).await;
    assert_eq!(headers[&CACHE_STATUS_HEADER], "miss");
    assert_eq!(products_of(&body)[0].price, Decimal::new(100, 2));
}

#[tokio::test]
async fn unknown_strategy_is_not_found() {
    let (router, _) = app(vec![product(7, "Widget", Decimal::ONE, "Tools")]);

    let (status, _, _) = send(&router, get("/products/memcached?category=Tools")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn updates_validate_and_report_missing_products() {
    let (router, _) = app(vec![product(7, "Widget", Decimal::ONE, "Tools")]);

    let (status, _, _) = send(&router, update_request(404, "1.00")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _, body) = send(&router, update_request(7, "-1.00")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(String::from_utf8_lossy(&body).contains("price"));
}

#[tokio::test]
async fn responses_carry_a_request_id() {
    let (router, _) = app(vec![product(7, "Widget", Decimal::ONE, "Tools")]);

    let (_, headers, _) = send(&router, get("/products/none?category=Tools")).await;
    let id = headers[&REQUEST_ID_HEADER].to_str().expect("ascii id");
    assert!(uuid::Uuid::parse_str(id).is_ok());
}

#[tokio::test]
async fn health_without_database_is_no_content() {
    let (router, _) = app(Vec::new());

    let (status, _, _) = send(&router, get("/_health/db")).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
}
