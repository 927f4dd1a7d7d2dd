use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use dog_media::{MediaAdapter, MediaConfig, MemoryMetadataStore};
use dog_media_axum::{media_router, MediaState};
use http_body_util::BodyExt;
use serde_json::Value;
use tower::ServiceExt;

fn router(root: &std::path::Path) -> Router {
    let media = MediaAdapter::new(MediaConfig::new(root), MemoryMetadataStore::new());
    media_router(MediaState::new(media))
}

async fn send(router: &Router, request: Request<Body>) -> axum::response::Response {
    router.clone().oneshot(request).await.unwrap()
}

async fn body_bytes(res: axum::response::Response) -> Vec<u8> {
    res.into_body().collect().await.unwrap().to_bytes().to_vec()
}

async fn json_body(res: axum::response::Response) -> Value {
    serde_json::from_slice(&body_bytes(res).await).unwrap()
}

fn put_chunk(session: &str, query: &str, data: &'static [u8]) -> Request<Body> {
    Request::builder()
        .method("PUT")
        .uri(format!("/uploads/proj/anna/{}?{}", session, query))
        .body(Body::from(data))
        .unwrap()
}

/// Upload `0123456789` as `digits.txt` in two out-of-order chunks; returns the item id
async fn upload_digits(router: &Router) -> u64 {
    let res = send(router, put_chunk("s1", "offset=5&total_size=10&filename=digits.txt", b"56789")).await;
    assert_eq!(res.status(), StatusCode::ACCEPTED);
    let body = json_body(res).await;
    assert_eq!(body["status"], "pending");
    assert_eq!(body["receivedBytes"], 5);

    let res = send(router, put_chunk("s1", "offset=0", b"01234")).await;
    assert_eq!(res.status(), StatusCode::CREATED);
    let body = json_body(res).await;
    assert_eq!(body["status"], "stored");
    body["item"]["item_id"].as_u64().unwrap()
}

#[tokio::test]
async fn chunked_upload_then_ranged_get() {
    let dir = tempfile::tempdir().unwrap();
    let router = router(dir.path());
    let id = upload_digits(&router).await;

    let res = send(
        &router,
        Request::builder()
            .uri(format!("/items/{}", id))
            .header("range", "bytes=2-5")
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(res.status(), StatusCode::PARTIAL_CONTENT);
    assert_eq!(res.headers()["content-range"], "bytes 2-5/10");
    assert_eq!(res.headers()["content-length"], "4");
    assert_eq!(res.headers()["accept-ranges"], "bytes");
    assert!(res.headers().get("x-request-id").is_some());
    assert_eq!(body_bytes(res).await, b"2345");

    let res = send(
        &router,
        Request::builder()
            .uri(format!("/items/{}", id))
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(res.headers()["content-type"], "text/plain; charset=utf-8");
    assert_eq!(body_bytes(res).await, b"0123456789");
}

#[tokio::test]
async fn unsatisfiable_range_is_416_with_empty_body() {
    let dir = tempfile::tempdir().unwrap();
    let router = router(dir.path());
    let id = upload_digits(&router).await;

    let res = send(
        &router,
        Request::builder()
            .uri(format!("/items/{}", id))
            .header("range", "bytes=5-20")
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(res.status(), StatusCode::RANGE_NOT_SATISFIABLE);
    assert_eq!(res.headers()["content-range"], "bytes */10");
    assert!(body_bytes(res).await.is_empty());
}

#[tokio::test]
async fn head_and_download_headers() {
    let dir = tempfile::tempdir().unwrap();
    let router = router(dir.path());
    let id = upload_digits(&router).await;

    let res = send(
        &router,
        Request::builder()
            .method("HEAD")
            .uri(format!("/items/{}/download", id))
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(res.headers()["content-length"], "10");
    assert_eq!(
        res.headers()["content-disposition"],
        "attachment; filename=\"digits.txt\""
    );
    assert!(body_bytes(res).await.is_empty());
}

#[tokio::test]
async fn preview_falls_back_to_full_item() {
    let dir = tempfile::tempdir().unwrap();
    let router = router(dir.path());
    let id = upload_digits(&router).await;

    let res = send(
        &router,
        Request::builder()
            .uri(format!("/items/{}/preview", id))
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(res.headers()["content-disposition"], "inline");
    assert_eq!(body_bytes(res).await, b"0123456789");
}

#[tokio::test]
async fn probe_and_abort() {
    let dir = tempfile::tempdir().unwrap();
    let router = router(dir.path());

    let res = send(&router, put_chunk("s2", "offset=0&total_size=8&filename=a.bin", b"abcd")).await;
    assert_eq!(res.status(), StatusCode::ACCEPTED);

    let probe = |offset: u64| {
        Request::builder()
            .uri(format!("/uploads/proj/anna/s2?offset={}", offset))
            .body(Body::empty())
            .unwrap()
    };
    assert_eq!(send(&router, probe(0)).await.status(), StatusCode::OK);
    assert_eq!(send(&router, probe(4)).await.status(), StatusCode::NOT_FOUND);

    let res = send(
        &router,
        Request::builder()
            .method("DELETE")
            .uri("/uploads/proj/anna/s2")
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(res.status(), StatusCode::NO_CONTENT);

    let res = send(&router, probe(0)).await;
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
    let body = json_body(res).await;
    assert_eq!(body["name"], "NotFound");
    assert_eq!(body["code"], 404);
}

#[tokio::test]
async fn client_errors_use_the_json_error_shape() {
    let dir = tempfile::tempdir().unwrap();
    let router = router(dir.path());

    let res = send(&router, put_chunk("s3", "offset=0", b"x")).await;
    assert_eq!(res.status(), StatusCode::NOT_FOUND);

    let res = send(&router, put_chunk("s3", "total_size=1", b"x")).await;
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    let body = json_body(res).await;
    assert_eq!(body["name"], "BadRequest");
    assert_eq!(body["className"], "bad-request");

    let res = send(&router, put_chunk("s3", "offset=0&total_size=1&filename=a.bin&attributes=%7Bnope", b"x")).await;
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);

    let res = send(
        &router,
        Request::builder()
            .uri("/items/99/thumbnail")
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);

    let res = send(
        &router,
        Request::builder()
            .method("DELETE")
            .uri("/items/99")
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
}
