mod init;

use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use log::*;
use std::path::PathBuf;
use std::time::Duration;
use tokio::signal;
use tower_http::{cors, limit::RequestBodyLimitLayer, trace::TraceLayer};

use crate::admin;
use crate::app_state::AppState;
use crate::constants::{
  API_PATH, DEFAULT_ACQUIRE_TIMEOUT, DEFAULT_ADDRESS, DEFAULT_TRANSACTION_TIMEOUT,
  REQUEST_BODY_LIMIT,
};
use crate::logging;

pub use init::{InitError, init_app_state, init_main_db};

/// A set of options to configure serving behaviors. Changing any of these options
/// requires a server restart, which makes them a natural fit for being exposed as command line
/// arguments.
#[derive(Debug, Clone)]
pub struct ServerOptions {
  /// Address the HTTP server binds to (Default: localhost:5000).
  pub address: String,

  /// Path to the SQLite database file. An in-memory database is used if absent.
  pub db_path: Option<PathBuf>,

  /// Max time a batch waits for the writer before failing as unavailable. Also used as SQLite's
  /// busy timeout for locks held by other processes, thus a batch may wait up to twice as long
  /// in total: once in the writer's queue and once for the database lock.
  pub acquire_timeout: Duration,

  /// Max time a batch transaction may take before it is interrupted and rolled back.
  pub transaction_timeout: Duration,

  /// Number of additional read-only connections. Only applies to on-disk databases.
  pub read_threads: usize,

  /// Permissive CORS, useful for developing a UI against a different origin.
  pub dev: bool,

  /// Limit the set of allowed origins the HTTP server will answer to.
  pub cors_allowed_origins: Vec<String>,
}

impl Default for ServerOptions {
  fn default() -> Self {
    return Self {
      address: DEFAULT_ADDRESS.to_string(),
      db_path: None,
      acquire_timeout: DEFAULT_ACQUIRE_TIMEOUT,
      transaction_timeout: DEFAULT_TRANSACTION_TIMEOUT,
      read_threads: 0,
      dev: false,
      cors_allowed_origins: vec!["*".to_string()],
    };
  }
}

pub struct Server {
  state: AppState,
  address: String,
  router: Router<()>,
}

impl Server {
  /// Initializes the server. Will create a new database on first start.
  pub async fn init(opts: ServerOptions) -> Result<Self, InitError> {
    let state = init::init_app_state(&opts).await?;
    let router = Self::build_router(&state, &opts);

    return Ok(Self {
      state,
      address: opts.address,
      router,
    });
  }

  pub fn state(&self) -> &AppState {
    return &self.state;
  }

  pub fn router(&self) -> &Router<()> {
    return &self.router;
  }

  /// Serves until a shutdown signal is received, then closes the database.
  pub async fn serve(self) -> std::io::Result<()> {
    logging::init_http_logging();

    let listener = tokio::net::TcpListener::bind(&self.address)
      .await
      .map_err(|err| {
        error!("Failed to listen on: {}: {err}", self.address);
        err
      })?;

    info!("listening on http://{} 🚀", self.address);

    axum::serve(listener, self.router)
      .with_graceful_shutdown(shutdown_signal())
      .await?;

    // Outstanding batches hold clones of the connection, let them finish before closing.
    if let Err(err) = self.state.conn().clone().close().await {
      warn!("Failed to close database: {err}");
    }

    return Ok(());
  }

  fn build_router(state: &AppState, opts: &ServerOptions) -> Router<()> {
    let api = admin::router().route("/healthcheck", get(healthcheck_handler));

    return Router::new()
      .nest(&format!("/{API_PATH}"), api)
      .layer(build_cors(opts))
      .layer(
        // This declares: **what information** is logged at what level in to events and spans.
        TraceLayer::new_for_http()
          .make_span_with(logging::make_span)
          .on_request(logging::on_request)
          .on_response(logging::on_response),
      )
      .layer(DefaultBodyLimit::disable())
      .layer(RequestBodyLimitLayer::new(REQUEST_BODY_LIMIT))
      .with_state(state.clone());
  }
}

async fn healthcheck_handler() -> Response {
  return (StatusCode::OK, "Ok").into_response();
}

fn build_cors(opts: &ServerOptions) -> cors::CorsLayer {
  if opts.dev {
    return cors::CorsLayer::very_permissive();
  }

  let origin_strs = &opts.cors_allowed_origins;
  let wildcard = origin_strs.iter().any(|s| s == "*");

  let origins = if wildcard {
    info!("CORS: allow any origin");
    cors::AllowOrigin::mirror_request()
  } else {
    cors::AllowOrigin::list(origin_strs.iter().filter_map(|o| {
      match HeaderValue::from_str(o.as_str()) {
        Ok(value) => Some(value),
        Err(err) => {
          error!("Invalid CORS origin {o}: {err}");
          None
        }
      }
    }))
  };

  return cors::CorsLayer::new()
    .allow_methods(cors::Any)
    .allow_headers(cors::Any)
    .allow_origin(origins);
}

async fn shutdown_signal() {
  let ctrl_c = async {
    if let Err(err) = signal::ctrl_c().await {
      error!("Failed to install Ctrl+C handler: {err}");
      std::future::pending::<()>().await;
    }
  };

  #[cfg(unix)]
  let terminate = async {
    match signal::unix::signal(signal::unix::SignalKind::terminate()) {
      Ok(mut signal) => {
        signal.recv().await;
      }
      Err(err) => {
        error!("Failed to install signal handler: {err}");
        std::future::pending::<()>().await;
      }
    }
  };

  #[cfg(not(unix))]
  let terminate = std::future::pending::<()>();

  tokio::select! {
      _ = ctrl_c => {
      info!("Received Ctrl+C. Shutting down gracefully.");
    },
      _ = terminate => {
      info!("Received termination. Shutting down gracefully.");
    },
  }
}

#[cfg(test)]
mod tests {
  use axum::body::Body;
  use axum::http::{Request, header};
  use tower::ServiceExt;

  use super::*;

  #[tokio::test]
  async fn test_request_body_limit() {
    let server = Server::init(ServerOptions::default()).await.unwrap();

    let response = server
      .router()
      .clone()
      .oneshot(
        Request::put("/api/table/person/rows")
          .header(header::CONTENT_TYPE, "application/json")
          .header(header::CONTENT_LENGTH, REQUEST_BODY_LIMIT + 1)
          .body(Body::from(vec![b' '; REQUEST_BODY_LIMIT + 1]))
          .unwrap(),
      )
      .await
      .unwrap();
    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
  }

  #[tokio::test]
  async fn test_cors_allowed_origins() {
    let server = Server::init(ServerOptions {
      cors_allowed_origins: vec!["https://allowed.org".to_string()],
      ..Default::default()
    })
    .await
    .unwrap();

    let allow_origin = |origin: &'static str| {
      let router = server.router().clone();
      async move {
        let response = router
          .oneshot(
            Request::get("/api/healthcheck")
              .header(header::ORIGIN, origin)
              .body(Body::empty())
              .unwrap(),
          )
          .await
          .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        response
          .headers()
          .get(header::ACCESS_CONTROL_ALLOW_ORIGIN)
          .cloned()
      }
    };

    assert_eq!(
      allow_origin("https://allowed.org").await,
      Some(HeaderValue::from_static("https://allowed.org"))
    );
    assert_eq!(allow_origin("https://other.org").await, None);
  }
}
