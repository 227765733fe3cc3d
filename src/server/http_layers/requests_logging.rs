//! Request logging middleware

use super::super::state::ServerState;
use crate::server::metrics::record_http_request;
use axum::extract::State;
use axum::{
    body::Body,
    http::{
        header::{HeaderMap, CONTENT_LENGTH},
        Request, StatusCode,
    },
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::time::Instant;
use tracing::{error, info};

#[derive(PartialEq, PartialOrd, Clone, Debug, Default, clap::ValueEnum)]
pub enum RequestsLoggingLevel {
    None,
    #[default]
    Path,
    Headers,
    Body,
}

impl std::fmt::Display for RequestsLoggingLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

const MAX_LOGGABLE_BODY_LENGTH: usize = 1024;

/// Why a body was not logged.
#[derive(Debug, PartialEq)]
enum SkipReason {
    NoContentLength,
    UnreadableContentLength,
    TooBig(usize),
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SkipReason::NoContentLength => write!(f, "Content-length not set."),
            SkipReason::UnreadableContentLength => {
                write!(f, "Could not parse Content-length value.")
            }
            SkipReason::TooBig(size) => {
                write!(f, "Too big to log ({:#})", byte_unit::Byte::from(*size))
            }
        }
    }
}

fn loggable_body_size(headers: &HeaderMap) -> Result<usize, SkipReason> {
    let size = headers
        .get(CONTENT_LENGTH)
        .ok_or(SkipReason::NoContentLength)?
        .to_str()
        .ok()
        .and_then(|value| value.parse::<usize>().ok())
        .ok_or(SkipReason::UnreadableContentLength)?;
    if size < MAX_LOGGABLE_BODY_LENGTH {
        Ok(size)
    } else {
        Err(SkipReason::TooBig(size))
    }
}

fn log_headers(label: &str, headers: &HeaderMap) {
    info!("  {} Headers:", label);
    for (name, value) in headers.iter() {
        info!("    {:?}: {:?}", name, value);
    }
}

/// Log a small body and hand back an equivalent one. `None` when the body
/// could not be read.
async fn log_body(label: &str, headers: &HeaderMap, body: Body) -> Option<Body> {
    let size = match loggable_body_size(headers) {
        Ok(size) => size,
        Err(reason) => {
            info!("  {} Body: {}", label, reason);
            return Some(body);
        }
    };
    match axum::body::to_bytes(body, size).await {
        Ok(bytes) => {
            info!("  {} Body:\n{}", label, String::from_utf8_lossy(&bytes));
            Some(Body::from(bytes))
        }
        Err(err) => {
            error!("Failed to read {} body: {:?}", label.to_lowercase(), err);
            None
        }
    }
}

/// Path label for HTTP metrics. Job ids are collapsed so the label set
/// stays bounded.
pub(crate) fn metrics_path(path: &str) -> String {
    match path.rsplit_once("/job/") {
        Some((prefix, id)) if !id.is_empty() && !id.contains('/') => {
            format!("{}/job/{{id}}", prefix)
        }
        _ => path.to_string(),
    }
}

fn internal_error() -> Response {
    (StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error").into_response()
}

pub async fn log_requests(
    State(state): State<ServerState>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let level = state.config.requests_logging_level.clone();
    let start = Instant::now();

    let method = request.method().to_string();
    let path = request.uri().path().to_string();

    if level > RequestsLoggingLevel::None {
        info!(">>> {} {}", method, request.uri());
    }

    let (parts, body) = request.into_parts();
    if level >= RequestsLoggingLevel::Headers {
        log_headers("Req", &parts.headers);
    }
    let body = if level >= RequestsLoggingLevel::Body {
        match log_body("Req", &parts.headers, body).await {
            Some(body) => body,
            None => return internal_error(),
        }
    } else {
        body
    };

    let response = next.run(Request::from_parts(parts, body)).await;

    let (parts, body) = response.into_parts();
    if level >= RequestsLoggingLevel::Headers {
        log_headers("Resp", &parts.headers);
    }
    let body = if level >= RequestsLoggingLevel::Body {
        match log_body("Resp", &parts.headers, body).await {
            Some(body) => body,
            None => return internal_error(),
        }
    } else {
        body
    };

    let status = parts.status.as_u16();
    let duration = start.elapsed();
    if level > RequestsLoggingLevel::None {
        info!("<<< {} ({}ms)", status, duration.as_millis());
    }
    record_http_request(&method, &metrics_path(&path), status, duration);

    Response::from_parts(parts, body)
}
