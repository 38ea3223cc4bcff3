#![allow(clippy::needless_return)]

use clap::{CommandFactory, Parser};
use std::time::Duration;
use tablegate::api::{SchemaMetadataCache, init_main_db};
use tablegate::{Server, ServerOptions};

use tablegate_cli::{DefaultCommandLineArgs, SubCommands};

type BoxError = Box<dyn std::error::Error + Send + Sync>;

fn init_logger(dev: bool) {
  const DEFAULT: &str = "info,tower_http=warn,tracing::span=warn";

  env_logger::Builder::from_env(if dev {
    env_logger::Env::new().default_filter_or(format!("{DEFAULT},tablegate=debug"))
  } else {
    env_logger::Env::new().default_filter_or(DEFAULT)
  })
  .format_timestamp_micros()
  .init();
}

async fn async_main() -> Result<(), BoxError> {
  let args = DefaultCommandLineArgs::parse();

  match args.cmd {
    Some(SubCommands::Run(cmd)) => {
      init_logger(cmd.dev);
      log::info!("Using database: {:?}", args.db_path);

      let app = Server::init(ServerOptions {
        address: cmd.address,
        db_path: Some(args.db_path),
        acquire_timeout: Duration::from_millis(cmd.acquire_timeout_ms),
        transaction_timeout: Duration::from_millis(cmd.transaction_timeout_ms),
        read_threads: cmd.read_threads,
        dev: cmd.dev,
        cors_allowed_origins: cmd.cors_allowed_origins,
      })
      .await?;

      app.serve().await?;
    }
    Some(SubCommands::Tables) => {
      init_logger(false);

      let conn = init_main_db(
        Some(args.db_path.clone()),
        tablegate_sqlite::Options::default(),
      )
      .await?;
      let schema_metadata = SchemaMetadataCache::new(conn.clone()).await?;
      let table_names = schema_metadata.table_names();
      if table_names.is_empty() {
        log::warn!("No tables found in {:?}", args.db_path);
      }
      for name in table_names {
        println!("{name}");
      }
      conn.close().await?;
    }
    None => {
      let _ = DefaultCommandLineArgs::command().print_help();
    }
  }

  return Ok(());
}

fn main() -> Result<(), BoxError> {
  let runtime = tokio::runtime::Builder::new_multi_thread()
    .enable_all()
    .build()?;
  return runtime.block_on(async_main());
}
