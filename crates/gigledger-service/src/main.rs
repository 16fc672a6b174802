//! GigLedger node: loads configuration, installs tracing and keeps the
//! in-memory marketplace alive until Ctrl-C.

use std::path::PathBuf;
use std::time::Duration;

use gigledger_auth::NoProvider;
use gigledger_service::{Marketplace, config, telemetry};

/// Seeds the first admin when set together with `GIGLEDGER_ADMIN_PASSWORD`.
const ADMIN_EMAIL_ENV: &str = "GIGLEDGER_ADMIN_EMAIL";
const ADMIN_PASSWORD_ENV: &str = "GIGLEDGER_ADMIN_PASSWORD";

const SESSION_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

#[tokio::main]
async fn main() -> gigledger_types::Result<()> {
    let path = std::env::args().nth(1).map(PathBuf::from);
    let config = config::load(path.as_deref())?;
    telemetry::init_tracing(&config)?;

    let market = Marketplace::new(&config, NoProvider)?;

    if let (Ok(email), Ok(password)) = (
        std::env::var(ADMIN_EMAIL_ENV),
        std::env::var(ADMIN_PASSWORD_ENV),
    ) {
        let admin = market.bootstrap_admin(&email, "Administrator", &password).await?;
        tracing::info!(user = %admin.id, "Admin bootstrapped");
    }

    // Registered once and polled across every sweep tick.
    let shutdown = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %err, "Ctrl-C handler failed");
        }
    };
    market
        .sweep_sessions_until(SESSION_SWEEP_INTERVAL, shutdown)
        .await;
    tracing::info!("Shutting down");
    Ok(())
}
