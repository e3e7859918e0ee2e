//! `hahub` command-line entry point.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use hahub_core::{default_mappings, CommandResolver, ShutdownHandle};
use hahub_server::commands::register_builtin_commands;
use hahub_server::fallback::HttpFallbackResolver;
use hahub_server::service::{ConfigStore, ServiceManager};
use hahub_server::{logging, Dispatcher};
use serde_json::Value;
use tracing::info;

#[derive(Parser)]
#[command(name = "hahub")]
#[command(about = "Route chat and console commands to Home Assistant", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Config file path [default: $HOME/HomeAssistantHub/service_manager.json]
    #[arg(long, global = true, env = "HAHUB_CONFIG")]
    config: Option<PathBuf>,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    log_json: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Load services and run the hub until `exit` or Ctrl+C (default)
    Run,
    /// Print the effective config document
    ShowConfig,
    /// Set one service setting and save the config
    Set {
        /// Service name, e.g. `telegram`
        service: String,
        /// Setting key, e.g. `api_key`
        key: String,
        /// New value, stored as a string unless `--json` is given
        value: String,
        /// Parse VALUE as JSON
        #[arg(long)]
        json: bool,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    logging::init(cli.log_json)?;

    let path = match cli.config {
        Some(path) => path,
        None => ConfigStore::default_path()?,
    };
    let store = ConfigStore::new(path);

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => run(store),
        Commands::ShowConfig => show_config(&store),
        Commands::Set {
            service,
            key,
            value,
            json,
        } => set(store, &service, &key, &value, json),
    }
}

fn run(store: ConfigStore) -> anyhow::Result<()> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to build tokio runtime")?;
    let result = runtime.block_on(serve(store));
    // A pending console read occupies a blocking thread that cannot be cancelled.
    runtime.shutdown_timeout(Duration::from_millis(500));
    result
}

async fn serve(store: ConfigStore) -> anyhow::Result<()> {
    let manager = Arc::new(ServiceManager::new(store));
    manager.load_config()?;
    manager.load_services();
    manager.ensure_transport();

    let config = manager.config();
    let mut resolver = CommandResolver::new(default_mappings());
    if let Some(fallback) = &config.fallback {
        resolver = resolver.with_fallback(Arc::new(HttpFallbackResolver::new(fallback)?));
        info!(url = %fallback.url, model = %fallback.model, "fallback resolver enabled");
    }
    let resolver = Arc::new(resolver);
    register_builtin_commands(&resolver);

    let shutdown = ShutdownHandle::new();
    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("interrupt received");
                shutdown.request();
            }
        }
    });

    manager.start_all().await;
    Dispatcher::new(resolver, shutdown).run(manager).await
}

fn show_config(store: &ConfigStore) -> anyhow::Result<()> {
    let config = store.load_or_default()?;
    println!("{}", serde_json::to_string_pretty(&config)?);
    Ok(())
}

fn set(store: ConfigStore, service: &str, key: &str, value: &str, json: bool) -> anyhow::Result<()> {
    let value = if json {
        serde_json::from_str(value).with_context(|| format!("VALUE is not valid JSON: {value}"))?
    } else {
        Value::String(value.to_string())
    };

    let manager = ServiceManager::new(store);
    manager.load_config()?;
    manager.set_service_setting(service, key, value);
    manager.save_config()?;
    info!(service, key, "setting saved");
    Ok(())
}
