use anyhow::Result;
use axum::Router;
use stormwater_network::{api, config, service, telemetry};
use config::Config;
use telemetry::init_tracing;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    let cfg = Config::load()?;
    let app_state = service::AppState::new(cfg.clone())?;

    #[allow(unused_mut)]
    let mut app: Router = api::router(app_state.clone(), &cfg);

    #[cfg(feature = "metrics")]
    {
        app = api::with_metrics(app);
    }

    let addr = cfg.server.socket_addr()?;

    if cfg.server.host == "0.0.0.0" {
        warn!("server binding to 0.0.0.0; the API has no authentication, keep it behind a gateway");
    }

    info!(
        %addr,
        sampler = %cfg.sampler.base_url,
        snap_tolerance_m = cfg.network.snap_tolerance_m,
        "starting stormwater network service"
    );

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(telemetry::shutdown_signal(app_state.shutdown.clone()))
        .await?;

    warn!("shutdown complete");
    Ok(())
}
