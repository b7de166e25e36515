use clap::{Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use std::path::PathBuf;
use std::sync::Arc;

use pdv_cache::config::Config;
use pdv_cache::pdv;
use pdv_cache::remote::{RemoteCall, RestBackend};
use pdv_cache::{logging, QueryClient};

#[derive(Parser, Debug)]
#[command(name = "pdv-cache")]
#[command(about = "Run PDV backend reads and writes through the client cache")]
#[command(version)]
struct Args {
  /// Path to config file (default: ./pdv.yaml or $XDG_CONFIG_HOME/pdv-cache/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  /// Debug logging for this crate
  #[arg(short, long)]
  verbose: bool,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Run a named read: dashboard-stats, sales-over-time, top-products, cash-register, product-stock
  Query {
    name: String,
    /// Days, limit or product id, depending on the query
    #[arg(long)]
    param: Option<i64>,
    /// Issue the read several times to exercise the cache
    #[arg(long, default_value_t = 1)]
    repeat: u32,
  },
  /// Run a named write and report the key patterns it invalidates
  Mutate {
    name: String,
    /// JSON payload
    #[arg(long, default_value = "{}")]
    payload: String,
  },
  /// List mutation → invalidated key patterns
  Routes,
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();

  if let Command::Routes = args.command {
    // Built-in routes are still useful without a config file
    let router = match Config::load(args.config.as_deref()) {
      Ok(config) => config.router(),
      Err(_) => pdv::routes::default_router(),
    };
    for (mutation, patterns) in router.routes() {
      let patterns: Vec<String> = patterns.iter().map(|p| p.to_string()).collect();
      println!("{:<24} {}", mutation, patterns.join(", "));
    }
    return Ok(());
  }

  let config = Config::load(args.config.as_deref())?;
  let _guard = logging::init(&config.log, args.verbose)?;

  let backend: Arc<dyn RemoteCall> = Arc::new(RestBackend::new(&config)?);
  let client = QueryClient::from_config(&config);

  let result = match args.command {
    Command::Query {
      name,
      param,
      repeat,
    } => {
      let query = pdv::queries::by_name(&name, param)
        .ok_or_else(|| eyre!("Unknown query '{}' (or missing/invalid --param)", name))?;

      let mut last = None;
      for _ in 0..repeat.max(1) {
        let value = client
          .fetch_remote(Arc::clone(&backend), &query)
          .await
          .map_err(|e| eyre!("{} failed: {}", query.procedure, e))?;
        last = Some(value);
      }
      if let Some(entry) = client.get(&query.key) {
        tracing::info!(key = %entry.key, status = ?entry.status, fetched_at = ?entry.fetched_at, "query done");
      }
      last
    }
    Command::Mutate { name, payload } => {
      let payload: serde_json::Value = serde_json::from_str(&payload)
        .map_err(|e| eyre!("Invalid --payload JSON: {}", e))?;
      let write = pdv::queries::write_by_name(&name, payload)
        .ok_or_else(|| eyre!("Unknown mutation '{}'", name))?;

      let patterns: Vec<String> = client
        .router()
        .resolve(&name)
        .iter()
        .map(|p| p.to_string())
        .collect();
      let value = client
        .mutate_remote(Arc::clone(&backend), write)
        .await
        .map_err(|e| eyre!("{} failed: {}", name, e))?;
      eprintln!("invalidates: {}", patterns.join(", "));
      Some(value)
    }
    Command::Routes => None,
  };

  if let Some(value) = result {
    println!("{}", serde_json::to_string_pretty(&value)?);
  }

  client.shutdown();
  Ok(())
}
