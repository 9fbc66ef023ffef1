use std::sync::Arc;

use snapbot_core::{config::Config, ports::ProposalSource};
use snapbot_snapshot::SnapshotClient;
use tracing::info;

#[tokio::main]
async fn main() -> Result<(), snapbot_core::Error> {
    snapbot_core::logging::init("snapbot")?;

    let cfg = Arc::new(Config::load()?);
    info!(
        store = %cfg.subscriptions_file.display(),
        daily = %cfg.daily_time,
        "config loaded"
    );

    let client = SnapshotClient::new(
        cfg.snapshot_graphql_url.clone(),
        cfg.proposal_limit,
        cfg.fetch_timeout,
    )?;
    info!(hub = %client.endpoint(), limit = cfg.proposal_limit, "snapshot client ready");
    let source: Arc<dyn ProposalSource> = Arc::new(client);

    snapbot_telegram::router::run_polling(cfg, source)
        .await
        .map_err(|e| snapbot_core::Error::External(format!("telegram bot failed: {e}")))?;

    Ok(())
}
