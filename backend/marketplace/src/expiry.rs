//! Long-running background task that expires subscriptions past their end
//! date.

use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::db;
use crate::service::Marketplace;

/// Sweep every `interval` until `shutdown` is cancelled.
pub async fn run(market: Marketplace, interval: Duration, shutdown: CancellationToken) {
    info!(interval_secs = interval.as_secs(), "Subscription sweeper starting");

    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                info!("Subscription sweeper stopping");
                return;
            }
            _ = ticker.tick() => {
                match market.expire_subscriptions(db::now()).await {
                    Ok(0) => {}
                    Ok(expired) => info!(expired, "Expired subscriptions"),
                    Err(e) => error!("Subscription sweep error: {e}"),
                }
            }
        }
    }
}
