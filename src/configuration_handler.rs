use crate::{
    availability::DEFAULT_WINDOW_DAYS,
    cleanup::DEFAULT_CLEANUP_INTERVAL,
    configuration::Configuration,
    notifier::NotifierSettings,
    payment::{DEFAULT_POLL_INTERVAL, DEFAULT_WATCH_TIMEOUT},
};
use clap::Parser;
use std::{path::PathBuf, time::Duration};

fn non_blank(value: &str) -> Result<String, String> {
    if value.trim().is_empty() {
        return Err("must not be blank".into());
    }
    Ok(value.to_string())
}

#[derive(Parser, Debug, Clone)]
#[command(version, about = "Mock interview booking service")]
pub struct ConfigurationHandler {
    #[arg(long, env = "PORT", default_value = "3000")]
    port: String,

    /// Persist in PostgreSQL instead of memory
    #[arg(long, env = "DATABASE_URL")]
    database_url: Option<String>,

    /// JSON file with interviewers, coupons and resume reviews for the in-memory backend
    #[arg(long, env = "SEED_FILE")]
    seed_file: Option<PathBuf>,

    /// Value of the `x-admin-password` header for admin routes. Must not be blank
    #[arg(long, env = "ADMIN_PASSWORD", hide_env_values = true, value_parser = non_blank)]
    admin_password: String,

    #[arg(long, env = "EMAIL_API_URL")]
    email_api_url: Option<String>,

    #[arg(long, env = "EMAIL_API_KEY", hide_env_values = true)]
    email_api_key: Option<String>,

    #[arg(long, env = "EMAIL_SENDER", default_value = "no-reply@localhost")]
    email_sender: String,

    #[arg(long, env = "AUTOMATION_WEBHOOK_URL")]
    automation_webhook_url: Option<String>,

    #[arg(long, env = "SHEETS_WEBHOOK_URL")]
    sheets_webhook_url: Option<String>,

    #[arg(long, env = "CLEANUP_INTERVAL_SECS", default_value_t = DEFAULT_CLEANUP_INTERVAL.as_secs())]
    cleanup_interval_secs: u64,

    #[arg(long, env = "HOLD_MINUTES", default_value_t = 10)]
    hold_minutes: i64,

    #[arg(long, env = "AVAILABILITY_WINDOW_DAYS", default_value_t = DEFAULT_WINDOW_DAYS)]
    availability_window_days: u32,

    #[arg(long, env = "PAYMENT_POLL_SECS", default_value_t = DEFAULT_POLL_INTERVAL.as_secs())]
    payment_poll_secs: u64,

    #[arg(long, env = "PAYMENT_TIMEOUT_SECS", default_value_t = DEFAULT_WATCH_TIMEOUT.as_secs())]
    payment_timeout_secs: u64,
}

impl ConfigurationHandler {
    pub fn parse_arguments() -> Self {
        dotenvy::dotenv().ok();
        Self::parse()
    }
}

impl Configuration for ConfigurationHandler {
    fn port(&self) -> String {
        self.port.clone()
    }

    fn database_url(&self) -> Option<String> {
        self.database_url.clone()
    }

    fn seed_file(&self) -> Option<PathBuf> {
        self.seed_file.clone()
    }

    fn admin_password(&self) -> String {
        self.admin_password.clone()
    }

    fn notifier_settings(&self) -> NotifierSettings {
        NotifierSettings {
            email_api_url: self.email_api_url.clone(),
            email_api_key: self.email_api_key.clone(),
            email_sender: self.email_sender.clone(),
            automation_webhook_url: self.automation_webhook_url.clone(),
            sheets_webhook_url: self.sheets_webhook_url.clone(),
        }
    }

    fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_secs.max(1))
    }

    fn hold_duration(&self) -> chrono::Duration {
        chrono::Duration::minutes(self.hold_minutes.max(1))
    }

    fn availability_window_days(&self) -> u32 {
        self.availability_window_days
    }

    fn payment_poll_interval(&self) -> Duration {
        Duration::from_secs(self.payment_poll_secs.max(1))
    }

    fn payment_watch_timeout(&self) -> Duration {
        Duration::from_secs(self.payment_timeout_secs)
    }
}
