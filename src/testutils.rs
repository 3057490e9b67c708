use std::{path::PathBuf, sync::Arc, time::Duration};

use chrono::{NaiveDate, NaiveTime};
use tokio::task::JoinHandle;
use tokio_stream::{wrappers::BroadcastStream, StreamExt};
use uuid::Uuid;

use crate::{
    configuration::Configuration,
    http::create_app,
    local_backend::LocalBackend,
    notifier::{Notifier, NotifierSettings},
    types::{
        CandidateRequest, Coupon, DiscountType, InterviewerProfile, PaymentSession, ResumeReview,
        ReviewStatus, WeeklyAvailability,
    },
};

pub const ADMIN_PASSWORD: &str = "123";

pub fn time(hour: u32, minute: u32) -> NaiveTime {
    NaiveTime::from_hms_opt(hour, minute, 0).unwrap()
}

pub fn date(year: i32, month: u32, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(year, month, day).unwrap()
}

pub fn interviewer(
    name: &str,
    skills: &[&str],
    availability: WeeklyAvailability,
) -> InterviewerProfile {
    InterviewerProfile {
        id: Uuid::new_v4(),
        name: name.into(),
        email: format!("{}@example.com", name.to_lowercase()),
        skills: skills.iter().map(|skill| skill.to_string()).collect(),
        technologies: Vec::new(),
        availability,
        is_active: true,
    }
}

pub fn coupon(code: &str, plan: &str, discount_type: DiscountType, value: f64) -> Coupon {
    Coupon {
        id: Uuid::new_v4(),
        code: code.into(),
        applicable_plan: plan.into(),
        discount_type,
        discount_value: value,
        is_active: true,
        expires_at: None,
    }
}

pub fn payment_session() -> PaymentSession {
    PaymentSession::new(
        Uuid::new_v4(),
        CandidateRequest {
            target_role: "Backend Developer".into(),
            experience: "4".into(),
            preferred_time: "2030-01-07T10:00:00Z".into(),
            resume_url: None,
        },
        "pro".into(),
        99.0,
        None,
    )
}

pub fn resume_review() -> ResumeReview {
    ResumeReview {
        id: Uuid::new_v4(),
        user_id: Uuid::new_v4(),
        name: "Lin".into(),
        email: "lin@example.com".into(),
        target_role: "Data Scientist".into(),
        resume_url: "https://files.example.com/lin.pdf".into(),
        status: ReviewStatus::Pending,
        report_url: None,
        completed_at: None,
    }
}

pub async fn read_from_payment_stream(
    stream: &mut BroadcastStream<PaymentSession>,
) -> PaymentSession {
    tokio::time::timeout(Duration::from_secs(1), stream.next())
        .await
        .expect("No payment update received")
        .expect("Payment stream closed")
        .expect("Payment stream lagged")
}

#[derive(Clone, Default)]
pub struct TestConfiguration;

impl Configuration for TestConfiguration {
    fn port(&self) -> String {
        "0".into()
    }

    fn database_url(&self) -> Option<String> {
        None
    }

    fn seed_file(&self) -> Option<PathBuf> {
        None
    }

    fn admin_password(&self) -> String {
        ADMIN_PASSWORD.into()
    }

    fn notifier_settings(&self) -> NotifierSettings {
        NotifierSettings::default()
    }

    fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(1)
    }

    fn hold_duration(&self) -> chrono::Duration {
        chrono::Duration::minutes(10)
    }

    fn availability_window_days(&self) -> u32 {
        14
    }

    fn payment_poll_interval(&self) -> Duration {
        Duration::from_secs(1)
    }

    fn payment_watch_timeout(&self) -> Duration {
        Duration::from_secs(5)
    }
}

/// Serves the app on an ephemeral port and returns its base url.
pub async fn spawn_app<N: Notifier>(
    backend: LocalBackend,
    notifier: N,
) -> (JoinHandle<()>, String) {
    let notifier: Arc<dyn Notifier> = Arc::new(notifier);
    let app = create_app(backend, notifier, TestConfiguration);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap();
    let server = tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });
    (server, format!("http://{address}"))
}
