//! Delivery entry points
//!
//! Three routes, one per delivery path:
//! - `GET|HEAD /files/{token}/{filename}` for whole files and byte ranges
//! - `GET /blks/{token}/{block_id}` for raw blocks
//! - `GET /zip/{token}` for pre-built archives
//!
//! Each resolves the grant, runs its checks in a fixed order, composes the
//! headers and then hands the connection to a [`StreamingSession`]. Every
//! failure before that point is an [`AccessError`] status response.

use crate::archive::{ArchiveSource, ArchiveTarget};
use crate::composer;
use crate::connection::{slot_for, ClientConnection};
use crate::cursor::BlockCursor;
use crate::error::{AccessError, AccessResult};
use crate::metrics;
use crate::session::{StreamingSession, TransferKind, TransferSource};
use crate::state::AppState;
use crate::usage::UsageEvent;
use axum::{
    body::Body,
    extract::{ConnectInfo, Path, State},
    http::{header, HeaderMap, Method, StatusCode},
    response::Response,
    routing::get,
    Router,
};
use blockserve_core::block::{BlockId, FileManifest};
use blockserve_core::catalog::{Grant, Operation, RepoInfo};
use blockserve_core::crypto::CipherKey;
use blockserve_core::range::{parse_range, ByteRange};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, error, instrument, warn};

/// Create the delivery routes
pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/files/:token/:filename", get(access_file))
        .route("/blks/:token/:block_id", get(access_block))
        .route("/zip/:token", get(access_zip))
}

#[derive(Debug, Deserialize)]
pub struct FileParams {
    pub token: String,
    pub filename: String,
}

#[derive(Debug, Deserialize)]
pub struct BlockParams {
    pub token: String,
    pub block_id: String,
}

/// What the request itself tells us
struct RequestMeta<'a> {
    user_agent: Option<&'a str>,
    cached: bool,
    range: Option<&'a str>,
}

impl<'a> RequestMeta<'a> {
    fn from_headers(headers: &'a HeaderMap) -> Self {
        Self {
            user_agent: headers
                .get(header::USER_AGENT)
                .and_then(|v| v.to_str().ok()),
            cached: composer::has_cached_copy(headers),
            // A range header that is not text can only be malformed
            range: headers
                .get(header::RANGE)
                .map(|v| v.to_str().unwrap_or("")),
        }
    }
}

async fn resolve_grant(state: &AppState, token: &str) -> AccessResult<Grant> {
    state
        .catalog
        .resolve_grant(token)
        .await?
        .ok_or_else(AccessError::token_not_found)
}

async fn load_repo(state: &AppState, repo_id: &str) -> AccessResult<RepoInfo> {
    state
        .catalog
        .get_repo(repo_id)
        .await?
        .ok_or_else(AccessError::bad_repo)
}

async fn load_manifest(
    state: &AppState,
    repo: &RepoInfo,
    object_id: &str,
) -> AccessResult<FileManifest> {
    match state.catalog.get_manifest(&repo.store_ref(), object_id).await? {
        Some(manifest) => Ok(manifest),
        None => {
            error!(object_id, "File vanished between existence check and load");
            Err(AccessError::internal())
        }
    }
}

fn with_headers(status: StatusCode, headers: HeaderMap, body: Body) -> Response {
    let mut response = Response::new(body);
    *response.status_mut() = status;
    *response.headers_mut() = headers;
    response
}

/// Take the connection over and return a response whose body is the
/// session
#[allow(clippy::too_many_arguments)]
async fn start_session(
    state: &AppState,
    conn: Option<&ConnectInfo<ClientConnection>>,
    kind: TransferKind,
    source: Box<dyn TransferSource>,
    content_length: u64,
    usage: Option<UsageEvent>,
    status: StatusCode,
    headers: HeaderMap,
) -> Response {
    let session_id = state.next_session_id();
    let takeover = slot_for(conn).take_over(session_id).await;
    let session = StreamingSession::new(kind, source, takeover, content_length)
        .with_usage(Arc::clone(&state.usage), usage);

    with_headers(status, headers, session.into_body())
}

/// Whole-file and byte-range delivery
#[instrument(skip_all, fields(filename = %params.filename))]
pub async fn access_file(
    State(state): State<Arc<AppState>>,
    Path(params): Path<FileParams>,
    method: Method,
    conn: Option<ConnectInfo<ClientConnection>>,
    headers: HeaderMap,
) -> AccessResult<Response> {
    let meta = RequestMeta::from_headers(&headers);
    let grant = resolve_grant(&state, &params.token).await?;

    if !grant.operation.is_file_access() {
        return Err(AccessError::operation_mismatch());
    }

    if meta.cached {
        metrics::record_not_modified(TransferKind::File.as_str());
        return Ok(composer::not_modified());
    }

    let repo = load_repo(&state, &grant.repo_id).await?;

    let key = if repo.encrypted {
        let material = state
            .catalog
            .get_decrypt_key(&repo.repo_id, &grant.username)
            .await?
            .ok_or_else(AccessError::missing_key)?;
        Some(material.to_cipher_key(repo.enc_version)?)
    } else {
        None
    };

    if !state
        .catalog
        .object_exists(&repo.store_ref(), &grant.object_id)
        .await?
    {
        return Err(AccessError::invalid_file());
    }

    let manifest = load_manifest(&state, &repo, &grant.object_id).await?;
    let head_only = method == Method::HEAD;

    match (key, meta.range) {
        (None, Some(range)) => {
            deliver_range(
                &state,
                conn.as_ref(),
                &params.filename,
                &grant,
                &repo,
                manifest,
                range,
                meta.user_agent,
                head_only,
            )
            .await
        }
        (key, _) => {
            deliver_file(
                &state,
                conn.as_ref(),
                &params.filename,
                &grant,
                &repo,
                manifest,
                key,
                meta.user_agent,
                head_only,
            )
            .await
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn deliver_file(
    state: &AppState,
    conn: Option<&ConnectInfo<ClientConnection>>,
    filename: &str,
    grant: &Grant,
    repo: &RepoInfo,
    manifest: FileManifest,
    key: Option<CipherKey>,
    user_agent: Option<&str>,
    head_only: bool,
) -> AccessResult<Response> {
    let size = manifest.file_size;
    let headers = state
        .composer
        .file_headers(filename, grant.operation, size, user_agent);

    if head_only || manifest.is_empty() {
        debug!(size, head_only, "Replying without a session");
        return Ok(with_headers(StatusCode::OK, headers, Body::empty()));
    }

    let usage = UsageEvent::for_transfer(grant.operation, &repo.store_id, &grant.username, size);
    let cursor = BlockCursor::whole_file(
        Arc::clone(&state.blocks),
        repo.store_ref(),
        manifest,
        key,
        state.buffer_size(),
    );

    Ok(start_session(
        state,
        conn,
        TransferKind::File,
        Box::new(cursor),
        size,
        usage,
        StatusCode::OK,
        headers,
    )
    .await)
}

#[allow(clippy::too_many_arguments)]
async fn deliver_range(
    state: &AppState,
    conn: Option<&ConnectInfo<ClientConnection>>,
    filename: &str,
    grant: &Grant,
    repo: &RepoInfo,
    manifest: FileManifest,
    range_header: &str,
    user_agent: Option<&str>,
    head_only: bool,
) -> AccessResult<Response> {
    let size = manifest.file_size;

    // Nothing to cut a range from
    if manifest.is_empty() {
        return Ok(with_headers(StatusCode::OK, HeaderMap::new(), Body::empty()));
    }

    let range: ByteRange = parse_range(range_header, size).map_err(|e| {
        debug!(error = %e, "Rejecting range");
        AccessError::RangeNotSatisfiable { size }
    })?;

    let headers = state
        .composer
        .range_headers(filename, grant.operation, range, size, user_agent);
    if head_only {
        return Ok(with_headers(StatusCode::PARTIAL_CONTENT, headers, Body::empty()));
    }

    // Range transfers are accounted at the full file size
    let usage = UsageEvent::for_transfer(grant.operation, &repo.store_id, &grant.username, size);
    let cursor = BlockCursor::range(
        Arc::clone(&state.blocks),
        repo.store_ref(),
        manifest,
        range,
        state.buffer_size(),
    );

    Ok(start_session(
        state,
        conn,
        TransferKind::Range,
        Box::new(cursor),
        range.len(),
        usage,
        StatusCode::PARTIAL_CONTENT,
        headers,
    )
    .await)
}

/// Raw block delivery. Blocks go out exactly as stored.
#[instrument(skip_all, fields(block_id = %params.block_id))]
pub async fn access_block(
    State(state): State<Arc<AppState>>,
    Path(params): Path<BlockParams>,
    conn: Option<ConnectInfo<ClientConnection>>,
    headers: HeaderMap,
) -> AccessResult<Response> {
    let meta = RequestMeta::from_headers(&headers);
    let grant = resolve_grant(&state, &params.token).await?;

    if meta.cached {
        metrics::record_not_modified(TransferKind::Block.as_str());
        return Ok(composer::not_modified());
    }

    let repo = load_repo(&state, &grant.repo_id).await?;
    let store = repo.store_ref();

    if !state.catalog.object_exists(&store, &grant.object_id).await? {
        return Err(AccessError::invalid_file());
    }

    if grant.operation != Operation::DownloadBlocks {
        return Err(AccessError::operation_mismatch());
    }

    let manifest = load_manifest(&state, &repo, &grant.object_id).await?;
    let block_id = BlockId::parse(&params.block_id).map_err(|_| AccessError::BlockUnavailable)?;
    if !manifest.contains_block(&block_id) {
        debug!(object_id = %grant.object_id, "Block is not part of the file");
        return Err(AccessError::BlockUnavailable);
    }

    let size = match state.blocks.stat_block(&store, &block_id) {
        Ok(stat) => stat.size,
        Err(e) => {
            warn!(store = %store, error = %e, "Failed to stat block");
            return Err(AccessError::BlockUnavailable);
        }
    };

    let response_headers = state
        .composer
        .block_headers(block_id.as_str(), size, meta.user_agent);
    let usage = UsageEvent::for_transfer(grant.operation, &repo.store_id, &grant.username, size);
    let cursor = BlockCursor::single_block(
        Arc::clone(&state.blocks),
        store,
        block_id,
        size,
        state.buffer_size(),
    );

    Ok(start_session(
        &state,
        conn.as_ref(),
        TransferKind::Block,
        Box::new(cursor),
        size,
        usage,
        StatusCode::OK,
        response_headers,
    )
    .await)
}

/// Archive delivery through the zip relay
#[instrument(skip_all)]
pub async fn access_zip(
    State(state): State<Arc<AppState>>,
    Path(token): Path<String>,
    conn: Option<ConnectInfo<ClientConnection>>,
    headers: HeaderMap,
) -> AccessResult<Response> {
    let meta = RequestMeta::from_headers(&headers);
    let grant = resolve_grant(&state, &token).await?;

    let target = ArchiveTarget::parse(&grant.object_id).map_err(|e| {
        warn!(error = %e, "Invalid archive description");
        AccessError::internal()
    })?;
    let name = target.archive_name(chrono::Local::now().date_naive());

    let Some(path) = state.archives.archive_path(&token) else {
        warn!(archive = %name, "No archive recorded for token");
        return Err(AccessError::internal());
    };

    if meta.cached {
        metrics::record_not_modified(TransferKind::Archive.as_str());
        state.archives.discard_progress(&token);
        return Ok(composer::not_modified());
    }

    let source = ArchiveSource::open(
        &path,
        token.as_str(),
        Arc::clone(&state.archives),
        state.buffer_size(),
    )
    .map_err(|e| {
        warn!(path = ?path, error = %e, "Failed to open archive");
        AccessError::internal()
    })?;

    let size = source.size();
    let response_headers = state.composer.archive_headers(&name, size);
    let usage = UsageEvent::for_transfer(grant.operation, &grant.repo_id, &grant.username, size);

    Ok(start_session(
        &state,
        conn.as_ref(),
        TransferKind::Archive,
        Box::new(source),
        size,
        usage,
        StatusCode::OK,
        response_headers,
    )
    .await)
}
