//! Payment session state machine and status reconciliation.
//!
//! A session moves `pending -> successful | failed` once. The watcher listens
//! to the backend's update stream and polls as a fallback; the first terminal
//! status ends both. A hard timeout ends the watch without a signal.

use crate::{
    backend::BookingBackend,
    error::BookingError,
    types::{PaymentSession, PaymentStatus},
};
use chrono::Utc;
use futures::StreamExt;
use std::time::Duration;
use tokio::time::{interval, sleep, MissedTickBehavior};
use tracing::{debug, info, warn};
use uuid::Uuid;

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(10);
pub const DEFAULT_WATCH_TIMEOUT: Duration = Duration::from_secs(180);

impl PaymentSession {
    /// Returns whether the status changed. Re-applying the current status is a no-op.
    pub fn transition(&mut self, status: PaymentStatus) -> Result<bool, BookingError> {
        if self.status == status {
            return Ok(false);
        }
        if self.status.is_terminal() || status == PaymentStatus::Pending {
            return Err(BookingError::InvalidTransition {
                from: self.status,
                to: status,
            });
        }
        self.status = status;
        self.updated_at = Utc::now();
        Ok(true)
    }

    pub fn mark_matched(&mut self) -> Result<(), BookingError> {
        if self.status != PaymentStatus::Successful {
            return Err(BookingError::Conflict(format!(
                "Payment session {} is {}, not successful",
                self.id, self.status
            )));
        }
        if self.interview_matched {
            return Err(BookingError::Conflict(format!(
                "Payment session {} was already matched",
                self.id
            )));
        }
        self.interview_matched = true;
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Returns whether a claim was given back.
    pub fn release_match(&mut self) -> bool {
        if !self.interview_matched {
            return false;
        }
        self.interview_matched = false;
        self.updated_at = Utc::now();
        true
    }
}

/// Maps gateway status strings onto the session status. `None` for unknown values.
pub fn normalize_gateway_status(raw: &str) -> Option<PaymentStatus> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "paid" | "success" | "successful" | "completed" | "captured" => {
            Some(PaymentStatus::Successful)
        }
        "failed" | "failure" | "cancelled" | "canceled" | "expired" | "declined"
        | "user_dropped" => Some(PaymentStatus::Failed),
        "pending" | "created" | "active" => Some(PaymentStatus::Pending),
        _ => None,
    }
}

#[derive(Debug, Clone, Copy)]
pub struct WatchSettings {
    pub poll_interval: Duration,
    pub timeout: Duration,
}

impl Default for WatchSettings {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            timeout: DEFAULT_WATCH_TIMEOUT,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum WatchOutcome {
    Settled(PaymentSession),
    TimedOut,
}

/// Waits for the session to reach a terminal status.
///
/// `on_update` sees every terminal observation exactly once: after it fires
/// the interval and the subscription are dropped. An unknown session fails the
/// first poll; later poll errors are logged and retried on the next tick.
pub async fn watch_payment_status<T, F>(
    backend: &T,
    session_id: Uuid,
    settings: WatchSettings,
    mut on_update: F,
) -> Result<WatchOutcome, BookingError>
where
    T: BookingBackend,
    F: FnMut(&PaymentSession),
{
    let mut updates = backend.payment_updates();
    let mut ticker = interval(settings.poll_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let deadline = sleep(settings.timeout);
    tokio::pin!(deadline);
    let mut subscribed = true;
    let mut first_poll = true;

    let settled = loop {
        tokio::select! {
            _ = &mut deadline => {
                warn!(%session_id, "Payment status watch timed out");
                return Ok(WatchOutcome::TimedOut);
            }
            update = updates.next(), if subscribed => match update {
                Some(Ok(session)) if session.id == session_id && session.status.is_terminal() => {
                    debug!(%session_id, "Terminal status received from subscription");
                    break session;
                }
                Some(Ok(_)) => {}
                Some(Err(err)) => {
                    warn!(?err, "Payment update subscription lagged, relying on polling");
                }
                None => {
                    warn!("Payment update subscription closed, relying on polling");
                    subscribed = false;
                }
            },
            _ = ticker.tick() => {
                match backend.payment_session(session_id) {
                    Ok(session) if session.status.is_terminal() => {
                        debug!(%session_id, "Terminal status received from polling");
                        break session;
                    }
                    Ok(_) => {}
                    Err(err @ BookingError::NotFound(_)) if first_poll => return Err(err),
                    Err(err) => warn!(?err, %session_id, "Payment status poll failed, retrying"),
                }
                first_poll = false;
            }
        }
    };

    drop(updates);
    info!(%session_id, status = %settled.status, "Payment status settled");
    on_update(&settled);
    Ok(WatchOutcome::Settled(settled))
}
