use crate::backend::BookingBackend;
use chrono::Utc;
use std::time::Duration;
use tokio::{
    sync::watch,
    task::JoinHandle,
    time::{interval, MissedTickBehavior},
};
use tracing::{error, info};

pub const DEFAULT_CLEANUP_INTERVAL: Duration = Duration::from_secs(5 * 60);

/// Periodic sweep removing expired temporary holds.
pub struct CleanupService {
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl CleanupService {
    pub fn start<T: BookingBackend>(backend: T, period: Duration) -> Self {
        let (shutdown, mut shutdown_receiver) = watch::channel(false);

        let handle = tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            info!(?period, "Cleanup service started");

            loop {
                tokio::select! {
                    _ = ticker.tick() => match backend.remove_expired_blocks(Utc::now()) {
                        Ok(0) => {}
                        Ok(removed) => info!(removed, "Expired temporary holds removed"),
                        Err(err) => error!(?err, "Cleanup failed, retrying on next tick"),
                    },
                    _ = shutdown_receiver.changed() => break,
                }
            }
            info!("Cleanup service stopped");
        });

        Self { shutdown, handle }
    }

    pub async fn stop(self) {
        let _ = self.shutdown.send(true);
        if let Err(err) = self.handle.await {
            error!(?err, "Cleanup task ended abnormally");
        }
    }
}
