use anyhow::Result;
use raftview::cluster::StateStore;
use raftview::config::AppConfig;
use raftview::ClusterObserver;
use tokio::task::JoinHandle;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    let config = AppConfig::load()?;

    // Initialize tracing
    init_tracing(&config)?;

    info!(
        "Starting raftview for {} nodes, default leader {}",
        config.cluster.nodes.len(),
        config.cluster.default_leader
    );

    let observer = ClusterObserver::new(config)?;
    let watcher = watch_leadership(observer.store());
    let running = observer.start()?;

    tokio::signal::ctrl_c().await?;
    info!("Shutting down raftview");

    running.shutdown().await;
    watcher.abort();
    info!("Final sync metrics: {:?}", observer.metrics().snapshot());

    Ok(())
}

fn init_tracing(config: &AppConfig) -> Result<()> {
    let json = config.observability.json_logs;
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                format!("raftview={}", config.observability.log_level).into()
            }),
        )
        .with(json.then(|| tracing_subscriber::fmt::layer().json()))
        .with((!json).then(tracing_subscriber::fmt::layer))
        .try_init()?;

    Ok(())
}

/// Log every change of believed leader or term
fn watch_leadership(store: &StateStore) -> JoinHandle<()> {
    let mut rx = store.subscribe();
    tokio::spawn(async move {
        let mut last = (None, 0);
        while rx.changed().await.is_ok() {
            let current = {
                let state = rx.borrow_and_update();
                (state.leader_id(), state.current_term())
            };
            if current != last {
                info!(leader = ?current.0, term = current.1, "Cluster leadership changed");
                last = current;
            }
        }
    })
}
