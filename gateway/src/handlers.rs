//! [MODULE G] Request engine — axum handlers for the block/manifest HTTP
//! surface, generalized from `server/src/handlers.rs`'s CRUD routes to the
//! URL grammar in spec §6:
//! `/<fs_path>.<file_version>/<block_id>.<block_version>` for a block,
//! `/<fs_path>.manifest.<sec>.<nsec>` for a manifest.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use prost::Message;
use sha2::{Digest, Sha256};
use tower_http::trace::TraceLayer;

use crate::backend::{Backend, BlockReadCtx};
use crate::engine::Engine;
use crate::error::BackendError;
use crate::proto;
use crate::types::{BlockDescriptor, Manifest};

pub fn router(engine: Arc<Engine>) -> Router {
    Router::new().route("/*rest", get(serve_request)).layer(TraceLayer::new_for_http()).with_state(engine)
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum RequestKind {
    Manifest { fs_path: String, sec: i64, nsec: i32 },
    Block { fs_path: String, file_version: u64, block_id: u64, block_version: u64 },
}

/// Parses the raw request path per the grammar in spec §6. `manifest_ts.sec
/// > 0` in the original design is equivalent here to the presence of the
/// `.manifest.` marker, since a request with no such marker carries no
/// manifest timestamp at all.
fn parse_request(raw_path: &str) -> Option<RequestKind> {
    if let Some(idx) = raw_path.find(".manifest.") {
        let fs_path = raw_path[..idx].to_string();
        let rest = &raw_path[idx + ".manifest.".len()..];
        let (sec_str, nsec_str) = rest.split_once('.')?;
        let sec: i64 = sec_str.parse().ok()?;
        let nsec: i32 = nsec_str.parse().ok()?;
        if fs_path.is_empty() {
            return None;
        }
        return Some(RequestKind::Manifest { fs_path, sec, nsec });
    }

    let (head, tail) = raw_path.rsplit_once('/')?;
    let (block_id_str, block_version_str) = tail.split_once('.')?;
    let block_id: u64 = block_id_str.parse().ok()?;
    let block_version: u64 = block_version_str.parse().ok()?;
    let (fs_path, file_version_str) = head.rsplit_once('.')?;
    let file_version: u64 = file_version_str.parse().ok()?;
    if fs_path.is_empty() {
        return None;
    }
    Some(RequestKind::Block { fs_path: fs_path.to_string(), file_version, block_id, block_version })
}

async fn serve_request(State(engine): State<Arc<Engine>>, Path(rest): Path<String>) -> Response {
    let raw_path = format!("/{rest}");
    match parse_request(&raw_path) {
        Some(RequestKind::Manifest { fs_path, sec, nsec }) => serve_manifest(engine, fs_path, sec, nsec).await,
        Some(RequestKind::Block { fs_path, file_version, block_id, block_version }) => {
            serve_block(engine, fs_path, file_version, block_id, block_version).await
        }
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

async fn serve_manifest(engine: Arc<Engine>, fs_path: String, _sec: i64, _nsec: i32) -> Response {
    let Some(meta) = engine.lookup(&fs_path) else {
        return StatusCode::NOT_FOUND.into_response();
    };
    let Some(backend) = engine.backend_for(&fs_path) else {
        return StatusCode::NOT_FOUND.into_response();
    };

    let size = match backend.size() {
        Ok(size) => size,
        Err(err) => return sentinel_response(&err),
    };

    let blocksize = engine.config.blocksize;
    let block_count = Manifest::block_count(size, blocksize);
    // One `read_full` call instead of one `read_block` call per block: for
    // the process/SQL backends, `read_block` redoes the whole re-exec/
    // re-query on every call, so hashing a file's blocks one at a time would
    // multiply that cost by the block count.
    let content = backend.read_full(&fs_path, blocksize, &engine.block_index).unwrap_or_default();
    let mut blocks = Vec::with_capacity(block_count as usize);
    for block_id in 0..block_count {
        blocks.push(BlockDescriptor { block_id, block_version: 0, hash: hash_block(&content, block_id, blocksize) });
    }

    let manifest = Manifest {
        volume: meta.volume,
        gateway: engine.config.gateway_id,
        file_id: meta.file_id,
        version: meta.version,
        size,
        mtime: meta.mtime,
        file_url: format!("{}{}", engine.config.content_url, fs_path),
        blocks,
    };

    let wire = proto::ManifestMsg::from(&manifest);
    let mut body = Vec::new();
    if wire.encode(&mut body).is_err() {
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    }
    (StatusCode::OK, [("size", size.to_string())], body).into_response()
}

async fn serve_block(engine: Arc<Engine>, fs_path: String, _file_version: u64, block_id: u64, _block_version: u64) -> Response {
    if engine.lookup(&fs_path).is_none() {
        return StatusCode::NOT_FOUND.into_response();
    }
    let Some(backend) = engine.backend_for(&fs_path) else {
        return StatusCode::NOT_FOUND.into_response();
    };

    let ctx = BlockReadCtx { fs_path: &fs_path, block_id, blocksize: engine.config.blocksize, block_index: &engine.block_index };
    match backend.read_block(&ctx) {
        Ok(bytes) => (StatusCode::OK, [("size", bytes.len().to_string())], bytes).into_response(),
        Err(err) => sentinel_response(&err),
    }
}

/// Hashes a block's bytes with SHA-256 for the manifest's `hash[32]` field
/// (spec §3; the algorithm itself is an Open-Question resolution, see
/// DESIGN.md), slicing from the whole-file buffer `read_full` already
/// fetched. A block past the end of that buffer (or a backend that failed
/// to read at all) degrades to an all-zero hash rather than failing the
/// whole manifest: the block itself will still 404 when a client actually
/// requests it.
fn hash_block(content: &[u8], block_id: u64, blocksize: u64) -> [u8; 32] {
    let start = (block_id as usize).saturating_mul(blocksize as usize);
    if start >= content.len() {
        return [0u8; 32];
    }
    let end = (start + blocksize as usize).min(content.len());
    Sha256::digest(&content[start..end]).into()
}

/// Read-side error conditions map to payload-free sentinel responses:
/// `EAGAIN`, `EIO`, `EUNKNOWN`, HTTP 404 for all, per spec §4.G.
fn sentinel_response(err: &BackendError) -> Response {
    tracing::warn!(sentinel = err.sentinel(), "backend error serving request");
    (StatusCode::NOT_FOUND, [("X-AG-Error", err.sentinel())]).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_block_request() {
        let parsed = parse_request("/foo/bar.1/0.0").unwrap();
        assert_eq!(parsed, RequestKind::Block { fs_path: "/foo/bar".to_string(), file_version: 1, block_id: 0, block_version: 0 });
    }

    #[test]
    fn parses_manifest_request() {
        let parsed = parse_request("/foo/bar.manifest.1690000000.0").unwrap();
        assert_eq!(parsed, RequestKind::Manifest { fs_path: "/foo/bar".to_string(), sec: 1_690_000_000, nsec: 0 });
    }

    #[test]
    fn malformed_path_is_rejected() {
        assert_eq!(parse_request("/foo/bar"), None);
        assert_eq!(parse_request("/foo/bar.nope/0.0"), None);
    }
}
