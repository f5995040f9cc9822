//! Source streaming handler.

use std::io;
use std::net::SocketAddr;
use std::path::PathBuf;

use axum::{
    body::Body,
    extract::{ConnectInfo, Request, State},
    http::{
        header::{ALLOW, CONTENT_LENGTH, CONTENT_TYPE},
        HeaderValue, Method, StatusCode,
    },
    response::{IntoResponse, Response},
};
use bytes::{Bytes, BytesMut};
use futures_util::stream::{unfold, Stream};
use percent_encoding::percent_decode_str;
use tokio::{fs::File, io::AsyncReadExt};
use tracing::{error, info, warn};

use crate::state::AppState;

/// Bytes read from the source per body chunk.
const CHUNK_SIZE: usize = 64 * 1024;

/// Serve the source bound to the request path.
///
/// The source is re-opened for every request and the handle is dropped as
/// soon as the body finishes or the client goes away.
pub(super) async fn serve_source(State(state): State<AppState>, request: Request) -> Response {
    let (parts, _) = request.into_parts();

    // Routes are registered unencoded, so match on the decoded path.
    let Ok(route) = percent_decode_str(parts.uri.path()).decode_utf8() else {
        return (StatusCode::NOT_FOUND, "not found").into_response();
    };

    let Some(source) = state.registry().get(&route) else {
        return (StatusCode::NOT_FOUND, "not found").into_response();
    };

    if parts.method != Method::GET && parts.method != Method::HEAD {
        return (
            StatusCode::METHOD_NOT_ALLOWED,
            [(ALLOW, "GET, HEAD")],
            "method not allowed",
        )
            .into_response();
    }

    let remote_addr = parts
        .extensions
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.to_string())
        .unwrap_or_else(|| "unknown".to_string());

    let file = match File::open(&source.path).await {
        Ok(file) => file,
        Err(e) => {
            error!(
                remote_addr = %remote_addr,
                path = %source.path.display(),
                route = %route,
                error = %e,
                "Failed to open source"
            );
            return (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response();
        }
    };

    info!(
        remote_addr = %remote_addr,
        path = %source.path.display(),
        route = %route,
        length = source.length,
        "Handling request"
    );

    let body = if parts.method == Method::HEAD {
        Body::empty()
    } else {
        Body::from_stream(byte_range(file, source.length, source.path.clone()))
    };

    let mut response = Response::new(body);
    let headers = response.headers_mut();
    headers.insert(CONTENT_LENGTH, HeaderValue::from(source.length));
    headers.insert(
        CONTENT_TYPE,
        HeaderValue::from_static("application/octet-stream"),
    );
    response
}

struct RangeReader {
    file: File,
    remaining: u64,
    path: PathBuf,
}

/// Stream exactly `length` bytes from the start of `file`.
///
/// A source that ends early yields `UnexpectedEof` so the response is
/// aborted instead of silently falling short of its Content-Length.
fn byte_range(
    file: File,
    length: u64,
    path: PathBuf,
) -> impl Stream<Item = io::Result<Bytes>> + Send + 'static {
    let reader = RangeReader {
        file,
        remaining: length,
        path,
    };

    unfold(Some(reader), |reader| async move {
        let mut reader = reader?;
        if reader.remaining == 0 {
            return None;
        }

        let want = reader.remaining.min(CHUNK_SIZE as u64) as usize;
        let mut buf = BytesMut::zeroed(want);

        match reader.file.read(&mut buf).await {
            Ok(0) => {
                warn!(
                    path = %reader.path.display(),
                    missing = reader.remaining,
                    "Source ended before its registered length"
                );
                let err = io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    format!("{} is shorter than expected", reader.path.display()),
                );
                Some((Err(err), None))
            }
            Ok(n) => {
                buf.truncate(n);
                reader.remaining -= n as u64;
                Some((Ok(buf.freeze()), Some(reader)))
            }
            Err(e) => {
                warn!(path = %reader.path.display(), error = %e, "Failed to read source");
                Some((Err(e), None))
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::create_router;
    use crate::inspect::{Inspector, SourceDescriptor, SourceKind};
    use crate::registry::Registry;
    use futures_util::StreamExt;
    use imgsrv_testing::{SourceDir, SquashfsImage};
    use tower::ServiceExt;

    async fn body_bytes(response: Response) -> Vec<u8> {
        axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap()
            .to_vec()
    }

    fn get(uri: &str) -> Request {
        axum::http::Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn test_serves_canonical_range() {
        let dir = SourceDir::new().unwrap();
        let image = SquashfsImage::new(5000).padded().with_trailing(vec![0xEE; 100]);
        let path = dir.write_squashfs("a.sqfs", &image).unwrap();

        let registry = Registry::build(&[&path], "/img", &Inspector::new()).unwrap();
        let (route, _) = registry.iter().next().unwrap();
        let route = route.to_string();
        let app = create_router(AppState::new(registry));

        let response = app.oneshot(get(&route)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[CONTENT_LENGTH], "8192");
        assert_eq!(
            response.headers()[CONTENT_TYPE],
            "application/octet-stream"
        );

        let body = body_bytes(response).await;
        assert_eq!(body, &image.to_bytes()[..8192]);
    }

    #[tokio::test]
    async fn test_unknown_route_is_not_found() {
        let dir = SourceDir::new().unwrap();
        let path = dir.write("a.img", b"0123456789").unwrap();
        let registry = Registry::build(&[&path], "", &Inspector::new()).unwrap();
        let app = create_router(AppState::new(registry));

        let response = app.oneshot(get("/deadbeef")).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_prefix_needing_escapes_is_reachable() {
        let dir = SourceDir::new().unwrap();
        let path = dir.write("a.img", b"0123456789").unwrap();
        let registry = Registry::build(&[&path], "/my img", &Inspector::new()).unwrap();
        let (route, source) = registry.iter().next().unwrap();
        assert_eq!(route, format!("/my img/{}", source.digest));
        let encoded = format!("/my%20img/{}", source.digest);
        let app = create_router(AppState::new(registry));

        let response = app.oneshot(get(&encoded)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_bytes(response).await, b"0123456789");
    }

    #[tokio::test]
    async fn test_path_with_invalid_utf8_is_not_found() {
        let dir = SourceDir::new().unwrap();
        let path = dir.write("a.img", b"0123456789").unwrap();
        let registry = Registry::build(&[&path], "", &Inspector::new()).unwrap();
        let app = create_router(AppState::new(registry));

        let response = app.oneshot(get("/%FF%FE")).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_reads_current_content() {
        let dir = SourceDir::new().unwrap();
        let path = dir.write("a.img", b"0123456789").unwrap();
        let registry = Registry::build(&[&path], "", &Inspector::new()).unwrap();
        let (route, _) = registry.iter().next().unwrap();
        let route = route.to_string();
        let app = create_router(AppState::new(registry));

        // No bytes are cached: the handler sees the file as it is now.
        std::fs::write(&path, b"abcdefghijKLMNOP").unwrap();

        let response = app.oneshot(get(&route)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_bytes(response).await, b"abcdefghij");
    }

    #[tokio::test]
    async fn test_open_failure_is_internal_error() {
        let dir = SourceDir::new().unwrap();
        let path = dir.write("a.img", b"0123456789").unwrap();
        let registry = Registry::build(&[&path], "", &Inspector::new()).unwrap();
        let (route, _) = registry.iter().next().unwrap();
        let route = route.to_string();
        let app = create_router(AppState::new(registry));

        std::fs::remove_file(&path).unwrap();

        let response = app.clone().oneshot(get(&route)).await.unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(!body_bytes(response).await.is_empty());

        // The failure is per request; the route stays bound.
        std::fs::write(&path, b"0123456789").unwrap();
        let response = app.oneshot(get(&route)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_head_has_length_without_body() {
        let dir = SourceDir::new().unwrap();
        let path = dir.write("a.img", b"0123456789").unwrap();
        let registry = Registry::build(&[&path], "", &Inspector::new()).unwrap();
        let (route, _) = registry.iter().next().unwrap();
        let route = route.to_string();
        let app = create_router(AppState::new(registry));

        let request = axum::http::Request::builder()
            .method(Method::HEAD)
            .uri(&route)
            .body(Body::empty())
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[CONTENT_LENGTH], "10");
        assert!(body_bytes(response).await.is_empty());
    }

    #[tokio::test]
    async fn test_other_methods_not_allowed() {
        let mut registry = Registry::new();
        registry.register(
            SourceDescriptor {
                path: PathBuf::from("/nonexistent"),
                kind: SourceKind::Plain,
                length: 0,
                digest: "abc".to_string(),
            },
            "",
        );
        let app = create_router(AppState::new(registry));

        let request = axum::http::Request::builder()
            .method(Method::POST)
            .uri("/abc")
            .body(Body::empty())
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
        assert_eq!(response.headers()[ALLOW], "GET, HEAD");
    }

    #[tokio::test]
    async fn test_byte_range_stops_at_length() {
        let dir = SourceDir::new().unwrap();
        let data: Vec<u8> = imgsrv_testing::filler(CHUNK_SIZE * 2 + 17).collect();
        let path = dir.write("big.img", &data).unwrap();
        let file = File::open(&path).await.unwrap();

        let length = (CHUNK_SIZE + 5) as u64;
        let chunks: Vec<Bytes> = byte_range(file, length, path)
            .map(|chunk| chunk.unwrap())
            .collect()
            .await;

        let total: Vec<u8> = chunks.iter().flat_map(|c| c.iter().copied()).collect();
        assert_eq!(total, &data[..CHUNK_SIZE + 5]);
    }

    #[tokio::test]
    async fn test_byte_range_short_source_errors() {
        let dir = SourceDir::new().unwrap();
        let path = dir.write("short.img", b"0123").unwrap();
        let file = File::open(&path).await.unwrap();

        let results: Vec<io::Result<Bytes>> = byte_range(file, 10, path).collect().await;
        assert_eq!(results.len(), 2);
        assert_eq!(&results[0].as_ref().unwrap()[..], b"0123");
        assert_eq!(
            results[1].as_ref().unwrap_err().kind(),
            io::ErrorKind::UnexpectedEof
        );
    }
}
