use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use contract_events_notifier::abi::ContractAbi;
use contract_events_notifier::config::Config;
use contract_events_notifier::notifier::{DeliveryQueue, TelegramNotifier};
use contract_events_notifier::server;
use contract_events_notifier::subscriptions::EventSource;

#[tokio::main(flavor = "current_thread")]
async fn main() {
    // logging
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).compact().init();

    if let Err(e) = run().await {
        error!("{:#}", e);
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let config = Config::load().context("Failed to load configuration")?;
    info!("Configuration loaded: {:?}", config);

    let contract = ContractAbi::load(config.contract_address()?, &config.contract_abi_path)
        .context("Error loading contract ABI")?;
    info!(
        "Loaded ABI for {} with events: {:?}",
        config.contract_address,
        contract.event_names()
    );

    let listen_addr = config.listen_addr();
    let server_handle = tokio::spawn(async move {
        if let Err(e) = server::serve(listen_addr).await {
            error!("Liveness server failed on {}: {}", listen_addr, e);
        }
    });

    let notifier = Arc::new(TelegramNotifier::from_config(&config)?);
    let (queue, delivery_handle) =
        DeliveryQueue::spawn(notifier, config.retry_policy(), config.delivery_queue_capacity);

    let source = EventSource::new(config.ws_rpc_url(), &contract, queue, config.reconnect_backoff());

    // All three run indefinitely
    tokio::select! {
        result = source.run() => {
            error!("Event source ended: {:?}", result);
        }
        result = server_handle => {
            error!("Liveness server task ended: {:?}", result);
        }
        result = delivery_handle => {
            error!("Delivery task ended: {:?}", result);
        }
    }

    Ok(())
}
