use crate::metrics_provider::METRICS_PROVIDER;
use crate::registry::repository::ContentKind;
use crate::registry::server::request_ext::{HeaderExt, RemoteAddress};
use crate::registry::server::route::Route;
use crate::registry::server::{router, ServerContext};
use crate::registry::{Error, ResponseBody};
use hyper::body::Incoming;
use hyper::header::{CONTENT_TYPE, WWW_AUTHENTICATE};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use opentelemetry::trace::TraceContextExt;
use serde::Serialize;
use serde_json::json;
use std::convert::Infallible;
use std::fmt::Debug;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::pin;
use tracing::{debug, error, info, instrument, warn, Span};
use tracing_opentelemetry::OpenTelemetrySpanExt;

pub async fn serve_request<S>(
    stream: TokioIo<S>,
    remote_address: SocketAddr,
    context: Arc<ServerContext>,
    timeouts: Arc<[Duration; 2]>,
) where
    S: Unpin + AsyncWrite + AsyncRead + Send + Debug + 'static,
{
    let conn = http1::Builder::new().serve_connection(
        stream,
        service_fn(move |mut request: Request<Incoming>| {
            request
                .extensions_mut()
                .insert(RemoteAddress(remote_address));
            handle_request(Arc::clone(&context), request)
        }),
    );
    pin!(conn);

    METRICS_PROVIDER.connections_in_flight.inc();

    for (iter, sleep_duration) in timeouts.iter().enumerate() {
        debug!("iter = {iter} sleep_duration = {sleep_duration:?}");
        tokio::select! {
            res = conn.as_mut() => {
                match res {
                    Ok(()) => debug!("after polling conn, no error"),
                    Err(error) =>  debug!("error serving connection: {error}"),
                }
                break;
            }
            () = tokio::time::sleep(*sleep_duration) => {
                debug!("iter = {iter} got timeout_interval, calling conn.graceful_shutdown");
                conn.as_mut().graceful_shutdown();
            }
        }
    }

    METRICS_PROVIDER.connections_in_flight.dec();
}

#[instrument(skip(context, request))]
pub async fn handle_request<B>(
    context: Arc<ServerContext>,
    request: Request<B>,
) -> Result<Response<ResponseBody>, Infallible> {
    let start_time = Instant::now();
    let method = request.method().to_owned();
    let path = request.uri().path().to_owned();

    let trace_id = {
        let context = Span::current().context();
        let span = context.span();
        let span_context = span.span_context();
        if span_context.is_valid() {
            Some(span_context.trace_id().to_string())
        } else {
            None
        }
    };

    let (parts, _body) = request.into_parts();
    let route = router::parse(&parts.method, &parts.uri, context.token_path());

    let response = match dispatch(&context, &route, &parts).await {
        Ok(response) => response,
        Err(error) => {
            let details = trace_id
                .as_ref()
                .map(|trace_id| json!({"trace_id": trace_id}))
                .unwrap_or(json!({}));
            let challenge = match error {
                Error::Unauthorized(_) => context.challenge(&route),
                _ => None,
            };
            registry_error_to_response(&error, details, challenge, route_kind(&route))
        }
    };

    #[allow(clippy::cast_precision_loss)]
    let elapsed = start_time.elapsed().as_millis() as f64;
    let status = response.status();

    let route_label = route.label();
    METRICS_PROVIDER
        .http_requests
        .with_label_values(&[route_label, status_class(status)])
        .inc();
    METRICS_PROVIDER
        .http_request_duration
        .with_label_values(&[route_label])
        .observe(elapsed);

    let log = if let Some(trace_id) = trace_id {
        format!("{trace_id} {elapsed:?} - {status} {method} {path}")
    } else {
        format!("{elapsed:?} - {status} {method} {path}")
    };

    if status.is_server_error() {
        error!("{log}");
    } else {
        info!("{log}");
    }

    Ok(response)
}

fn status_class(status: StatusCode) -> &'static str {
    match status.as_u16() {
        100..=199 => "1xx",
        200..=299 => "2xx",
        300..=399 => "3xx",
        400..=499 => "4xx",
        _ => "5xx",
    }
}

fn route_kind(route: &Route) -> ContentKind {
    match route {
        Route::GetBlob { .. } | Route::HeadBlob { .. } => ContentKind::Blob,
        _ => ContentKind::Manifest,
    }
}

#[instrument(skip(context, parts))]
async fn dispatch(
    context: &ServerContext,
    route: &Route<'_>,
    parts: &hyper::http::request::Parts,
) -> Result<Response<ResponseBody>, Error> {
    context.authorize_request(route, parts)?;
    let registry = &context.registry;

    match route {
        Route::Unknown => Err(Error::NotFound),
        Route::Malformed { error, .. } => Err(error.clone()),
        Route::ApiVersion => registry.handle_get_api_version(),
        Route::Token { query } => context.handle_token(parts, *query),
        Route::GetBlob { namespace, digest } => {
            let range = parts.byte_range()?;
            registry.handle_get_blob(namespace, digest, range).await
        }
        Route::HeadBlob { namespace, digest } => {
            registry.handle_head_blob(namespace, digest).await
        }
        Route::GetManifest {
            namespace,
            reference,
        } => {
            let accepted = parts.accept_values();
            registry
                .handle_get_manifest(namespace, reference, &accepted)
                .await
        }
        Route::HeadManifest {
            namespace,
            reference,
        } => {
            let accepted = parts.accept_values();
            registry
                .handle_head_manifest(namespace, reference, &accepted)
                .await
        }
        Route::ListTags { namespace, n, last } => {
            registry
                .handle_list_tags(namespace, *n, last.clone())
                .await
        }
        Route::Healthz => Ok(Response::builder()
            .status(StatusCode::OK)
            .header(CONTENT_TYPE, "application/json")
            .body(ResponseBody::json(&json!({"status": "ok"})))?),
        Route::Metrics => {
            let (content_type, metrics) = METRICS_PROVIDER.gather()?;
            Ok(Response::builder()
                .status(StatusCode::OK)
                .header(CONTENT_TYPE, content_type)
                .body(ResponseBody::fixed(metrics))?)
        }
    }
}

fn status_and_code(error: &Error, kind: ContentKind) -> (StatusCode, &'static str) {
    match error {
        Error::BlobUnknown => (StatusCode::NOT_FOUND, "BLOB_UNKNOWN"),
        Error::DigestInvalid => (StatusCode::BAD_REQUEST, "DIGEST_INVALID"),
        Error::TagInvalid => (StatusCode::BAD_REQUEST, "TAG_INVALID"),
        Error::ManifestInvalid(_) => (StatusCode::BAD_REQUEST, "MANIFEST_INVALID"),
        Error::ManifestUnknown => (StatusCode::NOT_FOUND, "MANIFEST_UNKNOWN"),
        Error::NameInvalid => (StatusCode::BAD_REQUEST, "NAME_INVALID"),
        Error::NameUnknown => (StatusCode::NOT_FOUND, "NAME_UNKNOWN"),
        Error::Unauthorized(_) => (StatusCode::UNAUTHORIZED, "UNAUTHORIZED"),
        Error::Denied(_) => (StatusCode::FORBIDDEN, "DENIED"),
        Error::Unsupported => (StatusCode::BAD_REQUEST, "UNSUPPORTED"),
        Error::UnsupportedMediaType(_) => (StatusCode::NOT_ACCEPTABLE, "MANIFEST_UNACCEPTABLE"),
        Error::ContentUnavailable(ContentKind::Blob, _) => (StatusCode::NOT_FOUND, "BLOB_UNKNOWN"),
        Error::ContentUnavailable(ContentKind::Manifest, _) => {
            (StatusCode::NOT_FOUND, "MANIFEST_UNKNOWN")
        }
        Error::DigestMismatch(_) => (StatusCode::BAD_GATEWAY, "DIGEST_INVALID"),
        Error::RangeNotSatisfiable => (StatusCode::RANGE_NOT_SATISFIABLE, "SIZE_INVALID"),
        Error::NotFound if kind == ContentKind::Blob => (StatusCode::NOT_FOUND, "BLOB_UNKNOWN"),
        Error::NotFound => (StatusCode::NOT_FOUND, "NOT_FOUND"),
        Error::Internal(_) | Error::Initialization(_) => {
            (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_SERVER_ERROR")
        }
    }
}

pub fn registry_error_to_response<T>(
    error: &Error,
    details: T,
    challenge: Option<String>,
    kind: ContentKind,
) -> Response<ResponseBody>
where
    T: Serialize,
{
    let (status, code) = status_and_code(error, kind);

    if let Error::ContentUnavailable(..) = error {
        warn!("{error}");
    }

    let body = json!({
        "errors": [{
            "code": code,
            "message": error.to_string(),
            "detail": details
        }]
    });

    let mut builder = Response::builder()
        .status(status)
        .header(CONTENT_TYPE, "application/json");
    if let Some(challenge) = challenge {
        builder = builder.header(WWW_AUTHENTICATE, challenge);
    }

    builder
        .body(ResponseBody::json(&body))
        .unwrap_or_else(|e| {
            error!("Unable to build error response: {e}");
            let mut response = Response::new(ResponseBody::empty());
            *response.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
            response
        })
}
