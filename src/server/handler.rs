//! Request handling
//!
//! Decodes the upload form, runs the orchestrator and maps the outcome to an
//! HTTP response.
//!
//! # Supported Endpoints
//!
//! * `GET /health` - Health check endpoint (returns "ok")
//! * `GET /metrics` - Prometheus metrics
//! * `POST /` or `PUT /` (any path) - Upload a local file; fields come from a
//!   urlencoded or `multipart/form-data` body
//! * Anything else returns 405 Method Not Allowed

use crate::metrics;
use crate::upload::{StorageErrorKind, UploadError, UploadOrchestrator, UploadRequest};
use http_body_util::{BodyExt, Limited};
use hyper::body::{Body, Bytes};
use hyper::header::{HeaderValue, ALLOW, CONTENT_TYPE};
use hyper::{Method, Request, Response, StatusCode};
use std::sync::Arc;
use tracing::Instrument;

/// Largest accepted form body
pub const MAX_FORM_BYTES: usize = 64 * 1024;

/// Header naming the form field that was missing
pub const MISSING_FIELD_HEADER: &str = "x-missing-field";

/// Header carrying the request id
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Handle one HTTP request
///
/// # Arguments
///
/// * `req` - The incoming HTTP request
/// * `orchestrator` - Shared upload pipeline
///
/// # Returns
///
/// An HTTP response; failures are reported through the status code, never as
/// a service error.
pub async fn handle_request<B>(
    req: Request<B>,
    orchestrator: Arc<UploadOrchestrator>,
) -> Result<Response<String>, hyper::Error>
where
    B: Body,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    let request_id = uuid::Uuid::new_v4().to_string();
    let span = tracing::info_span!(
        "http.request",
        request_id = %request_id,
        http.method = %req.method(),
        http.path = %req.uri().path(),
        http.status_code = tracing::field::Empty
    );

    async move {
        let mut response = route(req, &orchestrator).await;

        tracing::Span::current().record("http.status_code", response.status().as_u16());
        if let Ok(value) = HeaderValue::from_str(&request_id) {
            response.headers_mut().insert(REQUEST_ID_HEADER, value);
        }
        Ok(response)
    }
    .instrument(span)
    .await
}

async fn route<B>(req: Request<B>, orchestrator: &UploadOrchestrator) -> Response<String>
where
    B: Body,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    match (req.method(), req.uri().path()) {
        (&Method::GET, "/health") => text_response(StatusCode::OK, "ok".to_string()),
        (&Method::GET, "/metrics") => metrics_response(),
        (&Method::POST, _) | (&Method::PUT, _) => upload(req, orchestrator).await,
        _ => {
            let mut response = text_response(
                StatusCode::METHOD_NOT_ALLOWED,
                "method not allowed".to_string(),
            );
            response
                .headers_mut()
                .insert(ALLOW, HeaderValue::from_static("GET, POST, PUT"));
            response
        }
    }
}

async fn upload<B>(req: Request<B>, orchestrator: &UploadOrchestrator) -> Response<String>
where
    B: Body,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    let content_type = req
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .map(str::to_owned);

    let body = match Limited::new(req.into_body(), MAX_FORM_BYTES).collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(e) => {
            if e.downcast_ref::<http_body_util::LengthLimitError>().is_some() {
                return text_response(
                    StatusCode::PAYLOAD_TOO_LARGE,
                    format!("form body exceeds {} bytes", MAX_FORM_BYTES),
                );
            }
            tracing::warn!(error = %e, "Failed to read request body");
            return text_response(
                StatusCode::BAD_REQUEST,
                format!("failed to read body: {}", e),
            );
        }
    };

    let request = match decode_form(content_type.as_deref(), body).await {
        Ok(request) => request,
        Err(e) => {
            tracing::debug!(error = %e, "Malformed multipart body");
            return text_response(
                StatusCode::BAD_REQUEST,
                format!("unable to parse multipart form, {}", e),
            );
        }
    };
    tracing::debug!(file = %request.file, uri = %request.uri, "Upload requested");

    match orchestrator.orchestrate(&request).await {
        Ok(receipt) => text_response(
            StatusCode::OK,
            format!("successful put {:?}", receipt.uri),
        ),
        Err(e) => error_response(&e),
    }
}

/// Decode the upload fields; anything not declared multipart is urlencoded
async fn decode_form(
    content_type: Option<&str>,
    body: Bytes,
) -> Result<UploadRequest, multer::Error> {
    match content_type {
        Some(content_type) if is_multipart(content_type) => {
            let boundary = multer::parse_boundary(content_type)?;
            UploadRequest::from_multipart(body, boundary).await
        }
        _ => Ok(UploadRequest::from_form(&body)),
    }
}

fn is_multipart(content_type: &str) -> bool {
    content_type
        .trim_start()
        .get(..19)
        .is_some_and(|essence| essence.eq_ignore_ascii_case("multipart/form-data"))
}

/// Status code for a failed upload
pub fn status_for(err: &UploadError) -> StatusCode {
    match err {
        UploadError::Validation(_) => StatusCode::BAD_REQUEST,
        UploadError::Admission(_) => StatusCode::SERVICE_UNAVAILABLE,
        UploadError::UploadTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
        UploadError::Storage { kind, .. } => match kind {
            StorageErrorKind::Open | StorageErrorKind::NoSuchBucket | StorageErrorKind::TooLarge => {
                StatusCode::BAD_REQUEST
            }
            StorageErrorKind::Other => StatusCode::BAD_GATEWAY,
        },
    }
}

/// Build the response for a failed upload
pub fn error_response(err: &UploadError) -> Response<String> {
    let mut response = text_response(status_for(err), err.to_string());

    if let UploadError::Validation(validation) = err {
        if let Some(field) = validation.missing_field() {
            response
                .headers_mut()
                .insert(MISSING_FIELD_HEADER, HeaderValue::from_static(field));
        }
    }

    response
}

fn metrics_response() -> Response<String> {
    match metrics::render() {
        Ok(text) => {
            let mut response = text_response(StatusCode::OK, text);
            response
                .headers_mut()
                .insert(CONTENT_TYPE, HeaderValue::from_static(prometheus::TEXT_FORMAT));
            response
        }
        Err(e) => {
            tracing::error!(error = %e, "Failed to render metrics");
            text_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "failed to render metrics".to_string(),
            )
        }
    }
}

fn text_response(status: StatusCode, body: String) -> Response<String> {
    let mut response = Response::new(body);
    *response.status_mut() = status;
    response.headers_mut().insert(
        CONTENT_TYPE,
        HeaderValue::from_static("text/plain; charset=utf-8"),
    );
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::admission::AdmissionError;
    use crate::config::TransferConfig;
    use crate::upload::{StorageClient, StorageError, ValidationError};
    use http_body_util::Full;
    use std::time::Duration;

    struct NoopStorage;

    #[async_trait::async_trait]
    impl StorageClient for NoopStorage {
        async fn put_object(
            &self,
            _bucket: &str,
            _key: &str,
            _body: tokio::fs::File,
        ) -> Result<(), StorageError> {
            Ok(())
        }
    }

    fn orchestrator() -> Arc<UploadOrchestrator> {
        Arc::new(UploadOrchestrator::new(
            Arc::new(NoopStorage),
            &TransferConfig::default(),
        ))
    }

    fn request(method: Method, path: &str, body: &str) -> Request<Full<Bytes>> {
        Request::builder()
            .method(method)
            .uri(path)
            .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(Full::new(Bytes::from(body.to_string())))
            .unwrap()
    }

    #[test]
    fn test_status_mapping() {
        let cases = [
            (
                UploadError::from(ValidationError::MissingFile),
                StatusCode::BAD_REQUEST,
            ),
            (
                UploadError::from(AdmissionError::Timeout(Duration::from_secs(1))),
                StatusCode::SERVICE_UNAVAILABLE,
            ),
            (
                UploadError::UploadTimeout(Duration::from_secs(1)),
                StatusCode::GATEWAY_TIMEOUT,
            ),
            (
                UploadError::storage(StorageError::NoSuchBucket("b".into())),
                StatusCode::BAD_REQUEST,
            ),
            (
                UploadError::storage(StorageError::EntityTooLarge("x".into())),
                StatusCode::BAD_REQUEST,
            ),
            (
                UploadError::storage(StorageError::Other("x".into())),
                StatusCode::BAD_GATEWAY,
            ),
        ];

        for (err, status) in cases {
            assert_eq!(status_for(&err), status, "{err:?}");
        }
    }

    #[tokio::test]
    async fn test_health() {
        let response = handle_request(request(Method::GET, "/health", ""), orchestrator())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.body(), "ok");
        assert!(response.headers().contains_key(REQUEST_ID_HEADER));
    }

    #[tokio::test]
    async fn test_method_not_allowed() {
        let response = handle_request(request(Method::DELETE, "/", ""), orchestrator())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
    }

    #[tokio::test]
    async fn test_missing_field_header() {
        let response = handle_request(
            request(Method::POST, "/", "uri=s3%3A%2F%2Fbucket%2Fkey"),
            orchestrator(),
        )
        .await
        .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(response.headers()[MISSING_FIELD_HEADER], "file");
        assert_eq!(response.body(), "missing field \"file\"");
    }

    #[tokio::test]
    async fn test_multipart_form_is_decoded() {
        let body = concat!(
            "--b0\r\n",
            "Content-Disposition: form-data; name=\"uri\"\r\n\r\n",
            "s3://bucket/key\r\n",
            "--b0--\r\n",
        );
        let req = Request::builder()
            .method(Method::POST)
            .uri("/")
            .header(CONTENT_TYPE, "multipart/form-data; boundary=b0")
            .body(Full::new(Bytes::from_static(body.as_bytes())))
            .unwrap();

        let response = handle_request(req, orchestrator()).await.unwrap();

        // uri was read from the multipart body, so only file is missing
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(response.headers()[MISSING_FIELD_HEADER], "file");
    }

    #[tokio::test]
    async fn test_multipart_without_boundary() {
        let req = Request::builder()
            .method(Method::POST)
            .uri("/")
            .header(CONTENT_TYPE, "multipart/form-data")
            .body(Full::new(Bytes::from_static(b"file=%2Ftmp%2Fx")))
            .unwrap();

        let response = handle_request(req, orchestrator()).await.unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(response.body().starts_with("unable to parse multipart form"));
        assert!(!response.headers().contains_key(MISSING_FIELD_HEADER));
    }

    #[test]
    fn test_is_multipart() {
        assert!(is_multipart("multipart/form-data; boundary=x"));
        assert!(is_multipart("Multipart/Form-Data;boundary=x"));
        assert!(!is_multipart("application/x-www-form-urlencoded"));
        assert!(!is_multipart("multipart"));
    }

    #[tokio::test]
    async fn test_form_body_limit() {
        let body = format!("file={}", "a".repeat(MAX_FORM_BYTES + 1));
        let response = handle_request(request(Method::POST, "/", &body), orchestrator())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    }

    #[tokio::test]
    async fn test_metrics_endpoint() {
        crate::metrics::record_upload_bytes(1);
        let response = handle_request(request(Method::GET, "/metrics", ""), orchestrator())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.body().contains("s3nd_upload_bytes_total"));
    }
}
