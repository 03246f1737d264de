//! Alert Proxy - Main Entry Point

use anyhow::Context;
use api::{create_router, init_logging, run_server, AppConfig, AppState};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{info, warn};

use alerting::{CooldownCache, DiscordNotifier, Notifier};
use inventory::{EntityVerifier, InventoryClient, PortainerClient, ScopeMap};
use reconciler::InventoryMonitor;
use suppression::SuppressionStore;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::load().context("loading configuration")?;
    init_logging(config.debug_mode);

    info!("=== Alert Proxy v{} ===", env!("CARGO_PKG_VERSION"));

    let metrics = PrometheusBuilder::new()
        .install_recorder()
        .context("installing prometheus recorder")?;

    let portainer = config.portainer_config();
    let call_timeout = portainer.timeout();

    let notifier: Arc<dyn Notifier> = Arc::new(
        DiscordNotifier::new(config.discord_webhook_url.clone(), call_timeout * 3)
            .context("building notifier")?,
    );
    if config.discord_webhook_url.is_none() {
        warn!("discord_webhook_url is not set; alerts will not be delivered");
    }

    let cooldown = Arc::new(CooldownCache::from_config(&config.cooldown_config()));
    let suppression = Arc::new(SuppressionStore::new(config.suppression_config()));
    let scope_map = Arc::new(match &portainer.endpoint_map_file {
        Some(path) => ScopeMap::load(path.clone()),
        None => ScopeMap::empty(),
    });

    let inventory: Option<Arc<dyn InventoryClient>> = if config.inventory_enabled() {
        Some(Arc::new(
            PortainerClient::new(&portainer).context("building inventory client")?,
        ))
    } else {
        info!("Inventory verification disabled");
        None
    };

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut monitor_handle = None;
    if let (true, Some(client)) = (config.monitor_enabled(), &inventory) {
        let monitor = InventoryMonitor::new(
            config.monitor_config()?,
            client.clone(),
            notifier.clone(),
            suppression.clone(),
            cooldown.clone(),
            scope_map.clone(),
        );
        monitor_handle = Some(tokio::spawn(monitor.run(shutdown_rx)));
    }

    let mut state = AppState::new(cooldown, suppression, notifier);
    state.cooldown_enabled = config.alert_dedup_enabled;
    state.fail_policy = config.fail_policy();
    state.monitor_only_source = monitor_handle.is_some() && config.portainer_monitor_only_source;
    state.call_timeout = call_timeout * 3;
    state.metrics = Some(metrics);
    state.verifier = inventory.map(|client| {
        Arc::new(EntityVerifier::new(
            client,
            scope_map,
            config.portainer_strict_name_match,
            call_timeout,
        ))
    });

    let app = create_router(Arc::new(state));
    let addr = format!("0.0.0.0:{}", config.app_port);
    let shutdown = async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for ctrl-c: {}", e);
        }
        info!("Shutdown requested");
        let _ = shutdown_tx.send(true);
    };

    run_server(&addr, app, shutdown).await?;

    if let Some(handle) = monitor_handle {
        handle.await.context("joining inventory monitor")?;
    }

    Ok(())
}
