use axum::{
    body::{Body, Bytes},
    extract::rejection::{PathRejection, QueryRejection},
    extract::{DefaultBodyLimit, Path, Query, State},
    http::{header, HeaderMap, Method, StatusCode},
    response::{IntoResponse, Response},
    routing, Json, Router,
};
use chrono::{DateTime, Utc};
use dog_media::{
    parse_range_header, ChunkUpload, FetchKind, ItemId, MediaAdapter, MediaCtx, MediaError, MediaResult,
    OpenedMedia, RequestedRange, SessionId, UploadOutcome,
};
use serde::Deserialize;
use serde_json::json;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::TraceLayer;
use tracing::debug;

const X_REQUEST_ID: &str = "x-request-id";

use crate::{MediaHttpError, MediaState};

/// Query of a chunk `PUT`. The first chunk of a session must carry
/// `total_size` and `filename`.
#[derive(Debug, Deserialize)]
pub struct ChunkQuery {
    pub offset: u64,
    pub total_size: Option<u64>,
    pub filename: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
    /// JSON object carried along to the stored item
    pub attributes: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ProbeQuery {
    pub offset: u64,
}

fn bad_query(rejection: QueryRejection) -> MediaHttpError {
    MediaError::invalid(rejection.body_text()).into()
}

fn bad_path(rejection: PathRejection) -> MediaHttpError {
    MediaError::invalid(rejection.body_text()).into()
}

/// Routes for uploads and delivery:
///
/// - `PUT    /uploads/{project}/{owner}/{session_id}?offset=..` accept a chunk
/// - `GET    /uploads/{project}/{owner}/{session_id}?offset=..` probe a chunk
/// - `DELETE /uploads/{project}/{owner}/{session_id}` abandon an upload
/// - `GET`/`HEAD /items/{item_id}[/{full|preview|download}]` ranged delivery
/// - `DELETE /items/{item_id}` remove an item and its files
pub fn media_router(state: MediaState) -> Router {
    let chunk_limit = state.media.config().chunk_rules.chunk_size_limit;
    let body_limit = usize::try_from(chunk_limit).unwrap_or(usize::MAX);

    Router::new()
        .route(
            "/uploads/{project}/{owner}/{session_id}",
            routing::put(put_chunk)
                .get(probe_chunk)
                .delete(abort_upload)
                .layer(DefaultBodyLimit::max(body_limit)),
        )
        .route("/items/{item_id}", routing::get(fetch_default).delete(remove_item))
        .route("/items/{item_id}/{kind}", routing::get(fetch_kind))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
}

/// Context for a request, tagged with the id set by the request-id layer
fn media_ctx(project: String, owner: String, headers: &HeaderMap) -> MediaCtx {
    let ctx = MediaCtx::new(project, owner);
    match headers.get(X_REQUEST_ID).and_then(|v| v.to_str().ok()) {
        Some(request_id) => ctx.with_request_id(request_id.to_string()),
        None => ctx,
    }
}

async fn put_chunk(
    State(state): State<MediaState>,
    headers: HeaderMap,
    path: Result<Path<(String, String, String)>, PathRejection>,
    query: Result<Query<ChunkQuery>, QueryRejection>,
    body: Bytes,
) -> Result<Response, MediaHttpError> {
    let Path((project, owner, session_id)) = path.map_err(bad_path)?;
    let Query(query) = query.map_err(bad_query)?;

    let mut chunk = ChunkUpload::new(SessionId::from_string(session_id), query.offset, body);
    if let Some(total_size) = query.total_size {
        chunk = chunk.with_total_size(total_size);
    }
    if let Some(filename) = query.filename {
        chunk = chunk.with_filename(filename);
    }
    if let Some(created_at) = query.created_at {
        chunk = chunk.with_created_at(created_at);
    }
    if let Some(raw) = query.attributes {
        let attributes: serde_json::Value = serde_json::from_str(&raw)
            .map_err(|e| MediaError::invalid(format!("attributes are not valid JSON: {}", e)))?;
        chunk = chunk.with_attributes(attributes);
    }

    let ctx = media_ctx(project, owner, &headers);
    let response = match state.media.upload_chunk(&ctx, chunk).await? {
        UploadOutcome::Pending {
            received_bytes,
            total_size,
        } => (
            StatusCode::ACCEPTED,
            Json(json!({
                "status": "pending",
                "receivedBytes": received_bytes,
                "totalSize": total_size,
            })),
        )
            .into_response(),
        UploadOutcome::Stored(item) => (
            StatusCode::CREATED,
            Json(json!({ "status": "stored", "item": item })),
        )
            .into_response(),
        UploadOutcome::Settled => (StatusCode::OK, Json(json!({ "status": "settled" }))).into_response(),
    };
    Ok(response)
}

async fn probe_chunk(
    State(state): State<MediaState>,
    path: Result<Path<(String, String, String)>, PathRejection>,
    query: Result<Query<ProbeQuery>, QueryRejection>,
) -> Result<StatusCode, MediaHttpError> {
    let Path((_, _, session_id)) = path.map_err(bad_path)?;
    let Query(query) = query.map_err(bad_query)?;

    let received = state
        .media
        .probe(&SessionId::from_string(session_id), query.offset)
        .await?;
    Ok(if received {
        StatusCode::OK
    } else {
        StatusCode::NOT_FOUND
    })
}

async fn abort_upload(
    State(state): State<MediaState>,
    path: Result<Path<(String, String, String)>, PathRejection>,
) -> Result<StatusCode, MediaHttpError> {
    let Path((_, _, session_id)) = path.map_err(bad_path)?;
    state.media.abort_upload(&SessionId::from_string(session_id)).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn fetch_default(
    State(state): State<MediaState>,
    method: Method,
    headers: HeaderMap,
    path: Result<Path<u64>, PathRejection>,
) -> Result<Response, MediaHttpError> {
    let Path(item_id) = path.map_err(bad_path)?;
    fetch(&state.media, ItemId(item_id), FetchKind::Full, &method, &headers).await
}

async fn fetch_kind(
    State(state): State<MediaState>,
    method: Method,
    headers: HeaderMap,
    path: Result<Path<(u64, String)>, PathRejection>,
) -> Result<Response, MediaHttpError> {
    let Path((item_id, kind)) = path.map_err(bad_path)?;
    let fetch_kind = FetchKind::parse(&kind)
        .ok_or_else(|| MediaError::invalid(format!("unknown fetch kind: {}", kind)))?;
    fetch(&state.media, ItemId(item_id), fetch_kind, &method, &headers).await
}

async fn fetch(
    media: &MediaAdapter,
    item_id: ItemId,
    fetch_kind: FetchKind,
    method: &Method,
    headers: &HeaderMap,
) -> Result<Response, MediaHttpError> {
    let range = headers
        .get(header::RANGE)
        .and_then(|v| v.to_str().ok())
        .and_then(parse_range_header);
    let head_only = *method == Method::HEAD;

    let opened = match deliver(media, item_id, fetch_kind, range, head_only).await {
        Err(MediaError::NoPreviewAvailable { .. }) => {
            debug!(item_id = %item_id, "No preview yet, serving the full item");
            deliver(media, item_id, FetchKind::Full, range, head_only).await?
        }
        other => other?,
    };
    Ok(into_response(opened))
}

async fn deliver(
    media: &MediaAdapter,
    item_id: ItemId,
    fetch_kind: FetchKind,
    range: Option<RequestedRange>,
    head_only: bool,
) -> MediaResult<OpenedMedia> {
    if head_only {
        media.head(item_id, fetch_kind, range).await
    } else {
        media.open(item_id, fetch_kind, range).await
    }
}

fn into_response(opened: OpenedMedia) -> Response {
    let status = StatusCode::from_u16(opened.status()).unwrap_or(StatusCode::OK);
    let mut builder = Response::builder().status(status);
    for (name, value) in opened.headers.pairs() {
        builder = builder.header(name, value);
    }
    let body = match opened.body {
        Some(stream) => Body::from_stream(stream),
        None => Body::empty(),
    };
    builder
        .body(body)
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}

async fn remove_item(
    State(state): State<MediaState>,
    path: Result<Path<u64>, PathRejection>,
) -> Result<StatusCode, MediaHttpError> {
    let Path(item_id) = path.map_err(bad_path)?;
    state.media.remove(ItemId(item_id)).await?;
    Ok(StatusCode::NO_CONTENT)
}
