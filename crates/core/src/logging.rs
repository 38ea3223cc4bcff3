use axum::body::Body;
use axum::http::{HeaderMap, Request};
use axum::response::Response;
use std::time::Duration;
use tracing::Level;
use tracing::span::Span;
use tracing_subscriber::{filter, prelude::*};

// NOTE: There are two moving parts to request logging:
//
//  * In `server/mod.rs` we install `tower_http::trace::TraceLayer` with the hooks below. They
//    define *what* gets put into a request span and which events are emitted.
//  * Independently, `init_http_logging` installs a tracing subscriber deciding *where* these
//    events go, here a fmt layer writing to stderr.

const LEVEL: Level = Level::INFO;
const NAME: &str = "http_span";
pub const TARGET: &str = "http_reply";

fn get_header<'a>(headers: &'a HeaderMap, header_name: &'static str) -> Option<&'a str> {
  return headers
    .get(header_name)
    .and_then(|header| header.to_str().ok());
}

pub(crate) fn make_span(request: &Request<Body>) -> Span {
  let headers = request.headers();

  // NOTE: "%" means print using fmt::Display, and "?" means fmt::Debug.
  return tracing::span!(
      LEVEL,
      NAME,
      method = %request.method(),
      uri = %request.uri(),
      version = ?request.version(),
      host = get_header(headers, "host"),
      user_agent = get_header(headers, "user-agent"),
      // Reserve placeholders that may be recorded later.
      latency_ms = tracing::field::Empty,
      status = tracing::field::Empty,
      length = tracing::field::Empty,
  );
}

pub(crate) fn on_request(_req: &Request<Body>, _span: &Span) {
  // Nothing to record, the request was already unpacked during span creation.
}

pub(crate) fn on_response(response: &Response<Body>, latency: Duration, span: &Span) {
  span.record("latency_ms", latency.as_secs_f64() * 1000.0);
  span.record("status", response.status().as_u16());

  let length = get_header(response.headers(), "content-length");
  span.record("length", length.and_then(|l| l.parse::<i64>().ok()));

  // Log an event that can actually be seen, e.g. when a tracing->fmt/stderr layer is installed.
  tracing::event!(
    target: TARGET,
    parent: span,
    LEVEL,
    status = response.status().as_u16(),
    latency_ms = latency.as_secs_f64() * 1000.0,
  );
}

/// Installs a fmt layer printing one line per HTTP response.
///
/// NOTE: it's ok to fail. Just means someone else already initialized the tracing sub-system.
pub fn init_http_logging() {
  let _ = tracing_subscriber::registry()
    .with(
      tracing_subscriber::fmt::layer()
        .compact()
        .with_writer(std::io::stderr)
        .with_filter(
          filter::Targets::new()
            .with_target(TARGET, filter::LevelFilter::INFO)
            .with_default(filter::LevelFilter::OFF),
        ),
    )
    .try_init();
}
