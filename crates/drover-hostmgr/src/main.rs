//! Drover host manager binary.
//!
//! Runs the offer pool, its background sweeps, the master event loop and
//! the diagnostics API.

use figment::providers::{Env, Format, Toml};
use figment::Figment;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use drover_hostmgr::{
    api, master, ranking, sweeper::BackgroundSweeps, watch, EventPublisher, FrameworkInfo,
    HostMgrConfig, OfferPool, TcpMasterClient,
};
use drover_proto::FrameworkId;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env().add_directive("drover_hostmgr=info".parse()?),
        )
        .init();

    info!("Drover host manager starting");

    let config: HostMgrConfig = Figment::new()
        .merge(Toml::file("hostmgr.toml"))
        .merge(Env::prefixed("HOSTMGR_").split("_"))
        .extract()?;
    info!(listen_addr = %config.api.listen_addr, master = %config.master.endpoint, "Configuration loaded");

    let prometheus = metrics_exporter_prometheus::PrometheusBuilder::new().install_recorder()?;

    let ranker = match ranking::ranker_by_name(&config.bin_packing.ranker) {
        Some(ranker) => ranker,
        None => {
            warn!(name = %config.bin_packing.ranker, "unknown ranker, falling back to DeFrag");
            ranking::ranker_by_name(ranking::DE_FRAG).expect("DeFrag ranker is registered")
        }
    };
    info!(ranker = ranker.name(), "Bin-packing ranker configured");

    for scarce in &config.offer_pool.scarce_resource_types {
        if !scarce.eq_ignore_ascii_case("gpus") {
            warn!(%scarce, "scarce resource type has no exclusivity support, ignoring");
        }
    }

    let framework = Arc::new(FrameworkInfo::new(FrameworkId(
        config.master.framework_id.clone(),
    )));
    let master_client = Arc::new(TcpMasterClient::new(config.master.endpoint.clone()));
    let events = Arc::new(EventPublisher::new(config.watch.subscriber_buffer_size));
    let pool = Arc::new(OfferPool::new(
        &config.offer_pool,
        master_client.clone(),
        framework.clone(),
        ranker,
        events.clone(),
    ));
    info!("Offer pool initialised");

    let sweeps = BackgroundSweeps::start(pool.clone(), &config);

    // Master event stream with reconnect.
    let (event_tx, event_rx) = mpsc::channel(1024);
    let endpoint = config.master.endpoint.clone();
    tokio::spawn(async move {
        let mut backoff = Duration::from_secs(1);
        loop {
            match TcpStream::connect(&endpoint).await {
                Ok(stream) => {
                    info!(%endpoint, "subscribed to master event stream");
                    backoff = Duration::from_secs(1);
                    master::read_events(stream, event_tx.clone()).await;
                }
                Err(err) => {
                    warn!(%endpoint, error = %err, "master connection failed, retrying");
                }
            }
            tokio::time::sleep(backoff).await;
            backoff = (backoff * 2).min(Duration::from_secs(60));
        }
    });
    tokio::spawn(watch::run_event_loop(pool.clone(), event_rx));

    let state = Arc::new(api::AppState {
        pool: pool.clone(),
        prometheus,
    });
    let app = api::router(state);
    let listener = TcpListener::bind(&config.api.listen_addr).await?;
    info!(addr = %config.api.listen_addr, "Diagnostics API listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;

    // Leadership lost or shutdown requested: stop sweeps and drop state.
    sweeps.stop().await;
    pool.clear();
    Ok(())
}
