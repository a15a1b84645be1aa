//! HTTP handlers and the error-to-response mapping.
//!
//! `GET /img/url/{url}` runs: validate → fetch → gate → (copy through) or
//! (pipeline → export). Every failure is turned into one plain-text status +
//! message by [`AppError`]; nothing is written before the outcome is known.

use crate::fetch::{BoundedFetcher, FetchError};
use crate::gate::{self, Admission, GateError};
use crate::imaging::{
    self, ExportResult, PipelineError, RustBackend, SourceType, pipeline, resolve_format,
};
use crate::request::{RequestError, TransformRequest, parse_query};
use axum::extract::{Path, RawQuery, State};
use axum::http::header::{self, HeaderMap, HeaderValue, InvalidHeaderValue};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tracing::{error, info, warn};

/// Shared, immutable per-process state.
#[derive(Clone)]
pub struct AppState {
    pub fetcher: BoundedFetcher,
    pub backend: Arc<RustBackend>,
    pub cache_control: HeaderValue,
}

impl AppState {
    pub fn new(
        fetcher: BoundedFetcher,
        backend: RustBackend,
        cache_control: &str,
    ) -> Result<Self, InvalidHeaderValue> {
        Ok(Self {
            fetcher,
            backend: Arc::new(backend),
            cache_control: HeaderValue::from_str(cache_control)?,
        })
    }
}

pub async fn health() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

pub async fn transform(
    State(state): State<AppState>,
    Path(raw_url): Path<String>,
    RawQuery(raw_query): RawQuery,
    headers: HeaderMap,
) -> Result<Response, AppError> {
    let query = raw_query.as_deref().map(parse_query).unwrap_or_default();
    let request = TransformRequest::from_query(&raw_url, &query)?;

    info!(url = %request.url, "fetching source image");
    let fetched = state.fetcher.fetch(&request.url).await?;
    let admission = gate::admit(fetched.content_type.as_deref(), &request)?;
    // Drained in full before any response byte is written.
    let body = fetched.body.collect_bytes().await?;

    let source = match admission {
        Admission::PassThrough => {
            info!(url = %request.url, bytes = body.len(), "passing source through");
            let content_type = fetched.content_type.unwrap_or_default();
            return Ok((StatusCode::OK, [(header::CONTENT_TYPE, content_type)], body).into_response());
        }
        Admission::Transform(source) => source,
    };

    let accept = headers
        .get(header::ACCEPT)
        .and_then(|v| v.to_str().ok())
        .map(str::to_owned);
    let url = request.url.clone();
    let backend = Arc::clone(&state.backend);
    let output = tokio::task::spawn_blocking(move || {
        render(&backend, &body, source, &request, accept.as_deref())
    })
    .await
    .map_err(|e| AppError::Internal(format!("transform task failed: {e}")))??;

    let etag = etag_for(&output.bytes)?;
    info!(
        %url,
        format = %output.format,
        bytes = output.bytes.len(),
        "image transformed"
    );

    let if_none_match = headers
        .get(header::IF_NONE_MATCH)
        .and_then(|v| v.to_str().ok());
    if if_none_match.is_some_and(|value| etag_matches(value, &etag)) {
        return Ok((
            StatusCode::NOT_MODIFIED,
            [
                (header::ETAG, etag),
                (header::CACHE_CONTROL, state.cache_control.clone()),
            ],
        )
            .into_response());
    }

    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, HeaderValue::from_static(output.mime_type())),
            (header::CACHE_CONTROL, state.cache_control.clone()),
            (header::ETAG, etag),
        ],
        output.bytes,
    )
        .into_response())
}

/// Decode, transform and encode. Runs on the blocking pool.
fn render(
    backend: &RustBackend,
    bytes: &Bytes,
    source: SourceType,
    request: &TransformRequest,
    accept: Option<&str>,
) -> Result<ExportResult, PipelineError> {
    let image = pipeline::run(backend, bytes, source, &request.transforms())?;
    let format = resolve_format(request.webp, accept, request.format, source);
    imaging::export(backend, image, format, request.quality).map_err(PipelineError::Encode)
}

/// Strong validator: first 16 bytes of the SHA-256 of the body, quoted.
fn etag_for(bytes: &[u8]) -> Result<HeaderValue, AppError> {
    let digest = Sha256::digest(bytes);
    let hex: String = digest[..16].iter().map(|b| format!("{b:02x}")).collect();
    HeaderValue::from_str(&format!("\"{hex}\""))
        .map_err(|e| AppError::Internal(format!("invalid etag: {e}")))
}

fn etag_matches(if_none_match: &str, etag: &HeaderValue) -> bool {
    let Ok(etag) = etag.to_str() else {
        return false;
    };
    if_none_match.split(',').any(|candidate| {
        let candidate = candidate.trim();
        candidate == "*" || candidate.trim_start_matches("W/") == etag
    })
}

#[derive(Debug)]
pub enum AppError {
    BadRequest(String),
    Upstream { status: StatusCode, message: String },
    BadGateway(String),
    GatewayTimeout(String),
    Internal(String),
}

impl From<RequestError> for AppError {
    fn from(err: RequestError) -> Self {
        warn!(error = %err, "invalid request");
        AppError::BadRequest(err.to_string())
    }
}

impl From<FetchError> for AppError {
    fn from(err: FetchError) -> Self {
        match err {
            FetchError::Status { status, .. } => {
                warn!(status = %status, "upstream returned an error status");
                AppError::Upstream {
                    status,
                    message: err.to_string(),
                }
            }
            FetchError::SizeLimit { limit } => {
                warn!(limit, "source image exceeds size limit");
                AppError::BadRequest(format!("failed to decode image: {err}"))
            }
            FetchError::Timeout => {
                error!("upstream fetch timed out");
                AppError::GatewayTimeout(err.to_string())
            }
            FetchError::Network(ref msg) => {
                error!(error = %msg, "upstream fetch failed");
                AppError::BadGateway(err.to_string())
            }
        }
    }
}

impl From<GateError> for AppError {
    fn from(err: GateError) -> Self {
        warn!(error = %err, "rejected source content type");
        AppError::BadRequest(err.to_string())
    }
}

impl From<PipelineError> for AppError {
    fn from(err: PipelineError) -> Self {
        match err {
            PipelineError::Decode(ref source) => {
                warn!(error = %source, "source image failed to decode");
                AppError::BadRequest("failed to decode image".to_string())
            }
            PipelineError::Transform { .. } | PipelineError::Encode(_) => {
                error!(error = %err, "image processing failed");
                AppError::Internal(err.to_string())
            }
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            AppError::Upstream { status, message } => (status, message),
            AppError::BadGateway(msg) => (StatusCode::BAD_GATEWAY, msg),
            AppError::GatewayTimeout(msg) => (StatusCode::GATEWAY_TIMEOUT, msg),
            AppError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };
        (status, message).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::imaging::BackendError;

    fn status_of(err: AppError) -> StatusCode {
        err.into_response().status()
    }

    #[test]
    fn etag_is_quoted_hex_prefix() {
        let etag = etag_for(b"hello").unwrap();
        let value = etag.to_str().unwrap();
        assert_eq!(value.len(), 34);
        assert!(value.starts_with('"') && value.ends_with('"'));
        // sha256("hello") = 2cf24dba5fb0a30e26e83b2ac5b9e29e...
        assert_eq!(value, "\"2cf24dba5fb0a30e26e83b2ac5b9e29e\"");
    }

    #[test]
    fn etag_is_never_empty() {
        for body in [&b""[..], &b"\xff\x00\""[..], &b"hello"[..]] {
            let etag = etag_for(body).unwrap();
            assert_ne!(etag, "\"\"");
            assert_eq!(etag.len(), 34);
        }
        assert_ne!(etag_for(b"a").unwrap(), etag_for(b"b").unwrap());
    }

    #[test]
    fn etag_matching() {
        let etag = etag_for(b"hello").unwrap();
        let raw = etag.to_str().unwrap().to_string();
        assert!(etag_matches(&raw, &etag));
        assert!(etag_matches(&format!("W/{raw}"), &etag));
        assert!(etag_matches(&format!("\"other\", {raw}"), &etag));
        assert!(etag_matches("*", &etag));
        assert!(!etag_matches("\"other\"", &etag));
    }

    #[test]
    fn fetch_errors_map_to_statuses() {
        let not_found = FetchError::Status {
            status: StatusCode::NOT_FOUND,
            message: "Not Found".into(),
        };
        assert_eq!(status_of(not_found.into()), StatusCode::NOT_FOUND);
        assert_eq!(
            status_of(FetchError::Network("refused".into()).into()),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            status_of(FetchError::Timeout.into()),
            StatusCode::GATEWAY_TIMEOUT
        );
        assert_eq!(
            status_of(FetchError::SizeLimit { limit: 5 }.into()),
            StatusCode::BAD_REQUEST
        );
    }

    #[test]
    fn size_limit_reads_as_decode_failure() {
        let AppError::BadRequest(msg) = AppError::from(FetchError::SizeLimit { limit: 5 }) else {
            panic!("expected bad request");
        };
        assert_eq!(msg, "failed to decode image: image exceeds 5 bytes");
    }

    #[test]
    fn pipeline_errors_split_client_and_server_faults() {
        let decode = PipelineError::Decode(BackendError::Decode("bad".into()));
        assert_eq!(status_of(decode.into()), StatusCode::BAD_REQUEST);

        let transform = PipelineError::Transform {
            step: "blur",
            source: BackendError::ProcessingFailed("oom".into()),
        };
        let AppError::Internal(msg) = AppError::from(transform) else {
            panic!("expected internal error");
        };
        assert_eq!(msg, "blur failed: Processing failed: oom");

        let encode = PipelineError::Encode(BackendError::Unsupported("heif".into()));
        assert_eq!(status_of(encode.into()), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn gate_errors_are_client_faults() {
        let err = GateError::Unsupported("text/html".into());
        assert_eq!(status_of(err.into()), StatusCode::BAD_REQUEST);
    }
}
