use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use medsched::clock::SystemClock;
use medsched::config::Config;
use medsched::engine::Scheduler;
use medsched::seed;
use medsched::store::WalStore;

const COMPACT_CHECK_INTERVAL: Duration = Duration::from_secs(60);

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let config = Config::from_env()?;
    medsched::observability::init(config.metrics_port);

    // Ensure data directory exists
    std::fs::create_dir_all(&config.data_dir)?;

    let store = Arc::new(WalStore::open(&config.wal_path())?);
    let scheduler = Scheduler::from_config(store.clone(), Arc::new(SystemClock), &config);

    info!("medsched started");
    info!("  data_dir: {}", config.data_dir.display());
    info!("  max_suggestions: {}", config.max_suggestions);
    info!(
        "  metrics: {}",
        config
            .metrics_port
            .map_or("disabled".to_string(), |p| format!("http://0.0.0.0:{p}/metrics"))
    );

    if let Some(path) = &config.seed_file {
        let records = seed::load_seed_file(path)?;
        info!("loaded {} seed records from {}", records.len(), path.display());
        seed::import(&scheduler, records).await?;
    }

    let mut per_resource: BTreeMap<String, usize> = BTreeMap::new();
    for booking in scheduler.list_bookings().await? {
        *per_resource.entry(booking.resource.to_string()).or_default() += 1;
    }
    for (resource, count) in &per_resource {
        info!("  {resource}: {count} bookings");
    }

    // Run until SIGTERM/ctrl-c, compacting the log as it grows
    let shutdown = async {
        let ctrl_c = tokio::signal::ctrl_c();
        #[cfg(unix)]
        {
            let mut sigterm =
                tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                    .expect("failed to register SIGTERM handler");
            tokio::select! {
                _ = ctrl_c => {}
                _ = sigterm.recv() => {}
            }
        }
        #[cfg(not(unix))]
        {
            ctrl_c.await.ok();
        }
    };
    tokio::pin!(shutdown);

    let mut ticker = tokio::time::interval(COMPACT_CHECK_INTERVAL);
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if let Err(e) = store.compact_if_needed(config.compact_threshold).await {
                    tracing::error!("compaction failed: {e}");
                }
            }
            _ = &mut shutdown => {
                info!("shutdown signal received");
                break;
            }
        }
    }

    info!("medsched stopped");
    Ok(())
}
