use anyhow::{anyhow, Result};
use clap::arg;
use clap::command;
use clap::Parser;
use token_hub::config::apps::RegisteredApps;
use token_hub::coordination::coordinator::{CoordinatorSettings, TokenCoordinator};
use token_hub::server;
use token_hub::sources::fetch::AuthoritySource;
use token_hub::store::StoreKind;
use token_hub::utils::config_loader;
use token_hub::utils::logging;
use token_hub::utils::logging::LogLevel;
use tracing::{error, info};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[arg(short, long, env = "CONFIG", default_value = "token-hub.yaml")]
    config: String,
    #[arg(long, env = "LOG_LEVEL", value_enum)]
    log_level: Option<LogLevel>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // -------------------------------
    // 1. Load YAML config
    // -------------------------------

    let service_config = config_loader::run(&args.config).await?;
    logging::run(&service_config, args.log_level.to_owned()).await?;

    // -------------------------------
    // 2. Connect the shared store
    // -------------------------------

    let store = StoreKind::connect(&service_config.store)
        .await
        .map_err(|e| anyhow!("cannot connect store: {}", e))?;
    info!("shared store: {}", store.name());

    // -------------------------------
    // 3. Build registry and remote fetcher
    // -------------------------------

    let registry = RegisteredApps::new(service_config.apps.iter().cloned());
    let source = AuthoritySource::new(&service_config.authority)?;

    // -------------------------------
    // 4. Start coordinator (opens notification subscriptions)
    // -------------------------------

    let settings =
        CoordinatorSettings::from_config(&service_config.coordinator, &service_config.authority);
    let coordinator = TokenCoordinator::start(settings, registry, store, source)
        .await
        .map_err(|e| anyhow!("cannot start coordinator: {}", e))?;

    // -------------------------------
    // 5. Serve HTTP until Ctrl-C
    // -------------------------------

    info!("Service starting...");
    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("cannot listen for shutdown signal: {}", e);
        }
        info!("shutdown signal received");
    };
    let served = server::server::start(&service_config.settings, coordinator.clone(), shutdown).await;

    // -------------------------------
    // 6. Release waiters and timers
    // -------------------------------

    coordinator.shutdown();
    served
}
