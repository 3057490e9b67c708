use crate::notifier::NotifierSettings;
use std::{path::PathBuf, time::Duration};

pub trait Configuration: Clone + Send + Sync + 'static {
    fn port(&self) -> String;
    fn database_url(&self) -> Option<String>;
    fn seed_file(&self) -> Option<PathBuf>;
    fn admin_password(&self) -> String;
    fn notifier_settings(&self) -> NotifierSettings;
    fn cleanup_interval(&self) -> Duration;
    fn hold_duration(&self) -> chrono::Duration;
    fn availability_window_days(&self) -> u32;
    fn payment_poll_interval(&self) -> Duration;
    fn payment_watch_timeout(&self) -> Duration;
}
