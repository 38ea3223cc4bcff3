use clap::{Args, Parser, Subcommand};

use tablegate::constants::{DEFAULT_ADDRESS, DEFAULT_DB_PATH};

/// Command line arguments for the tablegate CLI.
///
/// NOTE: everything here requires a restart to take effect.
#[derive(Parser, Debug, Clone, Default)]
#[command(version, about, long_about = None)]
pub struct DefaultCommandLineArgs {
  /// Path to the SQLite database. Parent directories are created if they don't exist.
  #[arg(long, env, default_value = DEFAULT_DB_PATH)]
  pub db_path: std::path::PathBuf,

  #[command(subcommand)]
  pub cmd: Option<SubCommands>,
}

#[derive(Subcommand, Debug, Clone)]
pub enum SubCommands {
  /// Starts the HTTP server.
  Run(ServerArgs),
  /// Lists the tables exposed by the server.
  Tables,
}

#[derive(Args, Clone, Debug)]
pub struct ServerArgs {
  /// Authority (<host>:<port>) the HTTP server binds to (Default: localhost:5000).
  #[arg(short, long, env, default_value = DEFAULT_ADDRESS)]
  pub address: String,

  /// Max time in milliseconds a batch waits for the database writer.
  #[arg(long, env, default_value_t = 5000)]
  pub acquire_timeout_ms: u64,

  /// Max time in milliseconds a batch transaction may run before it's rolled back.
  #[arg(long, env, default_value_t = 30000)]
  pub transaction_timeout_ms: u64,

  /// Number of additional read-only database connections.
  #[arg(long, env, default_value_t = 0)]
  pub read_threads: usize,

  /// Use permissive CORS to allow for cross-origin requests when developing a UI.
  #[arg(long)]
  pub dev: bool,

  /// Limit the set of allowed origins the HTTP server will answer to.
  #[arg(long, default_value = "*")]
  pub cors_allowed_origins: Vec<String>,
}
