use crate::{
    backend::{BookingBackend, PAYMENT_UPDATE_CAPACITY},
    error::BookingError,
    types::{
        BlockReason, Coupon, Interview, InterviewerProfile, PaymentSession, PaymentStatus,
        ResumeReview, ReviewStatus, TimeBlock,
    },
};
use chrono::{DateTime, NaiveDate, Utc};
use serde::Deserialize;
use std::{
    collections::HashMap,
    path::Path,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};
use tokio::sync::broadcast::{self, Sender};
use tokio_stream::wrappers::BroadcastStream;
use tracing::{error, info};
use uuid::Uuid;

#[derive(Debug, Default)]
struct LocalState {
    interviewers: HashMap<Uuid, InterviewerProfile>,
    time_blocks: HashMap<Uuid, TimeBlock>,
    coupons: Vec<Coupon>,
    payment_sessions: HashMap<Uuid, PaymentSession>,
    interviews: HashMap<Uuid, Interview>,
    resume_reviews: HashMap<Uuid, ResumeReview>,
}

/// Records loaded into a fresh in-memory backend.
#[derive(Debug, Default, Deserialize)]
pub struct SeedData {
    #[serde(default)]
    pub interviewers: Vec<InterviewerProfile>,
    #[serde(default)]
    pub coupons: Vec<Coupon>,
    #[serde(default)]
    pub resume_reviews: Vec<ResumeReview>,
}

/// In-memory backend. Contents are lost on restart.
#[derive(Debug, Clone)]
pub struct LocalBackend {
    state: Arc<Mutex<LocalState>>,
    sender: Sender<PaymentSession>,
}

impl Default for LocalBackend {
    fn default() -> Self {
        let (sender, _) = broadcast::channel(PAYMENT_UPDATE_CAPACITY);
        Self {
            state: Arc::new(Mutex::default()),
            sender,
        }
    }
}

impl LocalBackend {
    pub fn from_seed_file(path: &Path) -> Result<Self, BookingError> {
        let contents = std::fs::read_to_string(path).map_err(|err| {
            BookingError::Validation(format!("Can't read seed file {}: {err}", path.display()))
        })?;
        let seed: SeedData = serde_json::from_str(&contents).map_err(|err| {
            BookingError::Validation(format!("Invalid seed file {}: {err}", path.display()))
        })?;

        let backend = Self::default();
        info!(
            interviewers = seed.interviewers.len(),
            coupons = seed.coupons.len(),
            resume_reviews = seed.resume_reviews.len(),
            "Seeding local backend"
        );
        for interviewer in seed.interviewers {
            backend.insert_interviewer(interviewer);
        }
        for coupon in seed.coupons {
            backend.insert_coupon(coupon);
        }
        for review in seed.resume_reviews {
            backend.insert_resume_review(review);
        }
        Ok(backend)
    }

    pub fn insert_interviewer(&self, interviewer: InterviewerProfile) {
        self.state().interviewers.insert(interviewer.id, interviewer);
    }

    pub fn insert_coupon(&self, coupon: Coupon) {
        self.state().coupons.push(coupon);
    }

    pub fn insert_resume_review(&self, review: ResumeReview) {
        self.state().resume_reviews.insert(review.id, review);
    }

    fn state(&self) -> MutexGuard<'_, LocalState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn send_payment_update(&self, session: &PaymentSession) {
        // No receivers is not an error, nobody is watching right now
        let _ = self.sender.send(session.clone());
    }

    fn update_payment_session<F>(&self, id: Uuid, update: F) -> Result<PaymentSession, BookingError>
    where
        F: FnOnce(&mut PaymentSession) -> Result<bool, BookingError>,
    {
        let (session, changed) = {
            let mut state = self.state();
            let Some(session) = state.payment_sessions.get_mut(&id) else {
                let err = format!("Payment session {id} does not exist");
                error!(err);
                return Err(BookingError::NotFound(err));
            };
            let changed = update(session)?;
            (session.clone(), changed)
        };
        if changed {
            self.send_payment_update(&session);
        }
        Ok(session)
    }
}

impl BookingBackend for LocalBackend {
    fn interviewers(&self) -> Result<Vec<InterviewerProfile>, BookingError> {
        let mut interviewers: Vec<InterviewerProfile> =
            self.state().interviewers.values().cloned().collect();
        interviewers.sort_unstable_by(|a, b| a.name.cmp(&b.name));
        Ok(interviewers)
    }

    fn interviewer(&self, id: Uuid) -> Result<InterviewerProfile, BookingError> {
        self.state()
            .interviewers
            .get(&id)
            .cloned()
            .ok_or_else(|| BookingError::NotFound(format!("Interviewer {id} does not exist")))
    }

    fn time_blocks(
        &self,
        interviewer_id: Uuid,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<TimeBlock>, BookingError> {
        let mut blocks: Vec<TimeBlock> = self
            .state()
            .time_blocks
            .values()
            .filter(|block| {
                block.interviewer_id == interviewer_id
                    && block.blocked_date >= from
                    && block.blocked_date <= to
            })
            .cloned()
            .collect();
        blocks.sort_unstable_by_key(|block| (block.blocked_date, block.start_time));
        Ok(blocks)
    }

    fn add_time_block(&self, block: TimeBlock) -> Result<TimeBlock, BookingError> {
        block.validate()?;
        self.state().time_blocks.insert(block.id, block.clone());
        Ok(block)
    }

    fn convert_temporary_block(
        &self,
        reservation_id: Uuid,
        interview_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<TimeBlock, BookingError> {
        let mut state = self.state();
        match state.time_blocks.get_mut(&reservation_id) {
            Some(block) if block.reason == BlockReason::TemporaryHold && !block.is_expired(now) => {
                block.reason = BlockReason::InterviewScheduled;
                block.expires_at = None;
                block.interview_id = Some(interview_id);
                Ok(block.clone())
            }
            _ => {
                let err = format!("No temporary reservation {reservation_id} to convert");
                error!(err);
                Err(BookingError::NotFound(err))
            }
        }
    }

    fn remove_expired_blocks(&self, now: DateTime<Utc>) -> Result<usize, BookingError> {
        let mut state = self.state();
        let before = state.time_blocks.len();
        state.time_blocks.retain(|_, block| !block.is_expired(now));
        Ok(before - state.time_blocks.len())
    }

    fn coupons(&self) -> Result<Vec<Coupon>, BookingError> {
        Ok(self.state().coupons.clone())
    }

    fn create_payment_session(
        &self,
        session: PaymentSession,
    ) -> Result<PaymentSession, BookingError> {
        {
            let mut state = self.state();
            if state.payment_sessions.contains_key(&session.id) {
                return Err(BookingError::Conflict(format!(
                    "Payment session {} already exists",
                    session.id
                )));
            }
            state.payment_sessions.insert(session.id, session.clone());
        }
        self.send_payment_update(&session);
        Ok(session)
    }

    fn payment_session(&self, id: Uuid) -> Result<PaymentSession, BookingError> {
        self.state()
            .payment_sessions
            .get(&id)
            .cloned()
            .ok_or_else(|| BookingError::NotFound(format!("Payment session {id} does not exist")))
    }

    fn update_payment_status(
        &self,
        id: Uuid,
        status: PaymentStatus,
    ) -> Result<PaymentSession, BookingError> {
        self.update_payment_session(id, |session| session.transition(status))
    }

    fn mark_interview_matched(&self, id: Uuid) -> Result<PaymentSession, BookingError> {
        self.update_payment_session(id, |session| session.mark_matched().map(|()| true))
    }

    fn release_interview_match(&self, id: Uuid) -> Result<PaymentSession, BookingError> {
        self.update_payment_session(id, |session| Ok(session.release_match()))
    }

    fn payment_updates(&self) -> BroadcastStream<PaymentSession> {
        BroadcastStream::new(self.sender.subscribe())
    }

    fn create_interview(&self, interview: Interview) -> Result<Interview, BookingError> {
        self.state().interviews.insert(interview.id, interview.clone());
        Ok(interview)
    }

    fn interview(&self, id: Uuid) -> Result<Interview, BookingError> {
        self.state()
            .interviews
            .get(&id)
            .cloned()
            .ok_or_else(|| BookingError::NotFound(format!("Interview {id} does not exist")))
    }

    fn resume_review(&self, id: Uuid) -> Result<ResumeReview, BookingError> {
        self.state()
            .resume_reviews
            .get(&id)
            .cloned()
            .ok_or_else(|| BookingError::NotFound(format!("Resume review {id} does not exist")))
    }

    fn complete_resume_review(
        &self,
        id: Uuid,
        report_url: String,
        completed_at: DateTime<Utc>,
    ) -> Result<ResumeReview, BookingError> {
        let mut state = self.state();
        let Some(review) = state.resume_reviews.get_mut(&id) else {
            return Err(BookingError::NotFound(format!(
                "Resume review {id} does not exist"
            )));
        };
        if review.status == ReviewStatus::Completed {
            return Err(BookingError::Conflict(format!(
                "Resume review {id} was already completed"
            )));
        }
        review.status = ReviewStatus::Completed;
        review.report_url = Some(report_url);
        review.completed_at = Some(completed_at);
        Ok(review.clone())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::testutils::{
        coupon, date, interviewer, payment_session, read_from_payment_stream, resume_review,
        time,
    };
    use crate::types::{DiscountType, TimeRange, WeeklyAvailability, ALL_PLANS};
    use chrono::Duration;
    use std::io::Write;

    fn hold(interviewer_id: Uuid, expires_at: DateTime<Utc>) -> TimeBlock {
        TimeBlock::new(
            interviewer_id,
            date(2030, 1, 7),
            TimeRange::new(time(9, 0), time(10, 0)),
            BlockReason::TemporaryHold,
            Some(expires_at),
        )
    }

    #[test]
    fn test_add_convert_remove_blocks() {
        let backend = LocalBackend::default();
        let interviewer_id = Uuid::new_v4();
        let now = Utc::now();

        let live = backend
            .add_time_block(hold(interviewer_id, now + Duration::minutes(10)))
            .unwrap();
        backend
            .add_time_block(hold(interviewer_id, now - Duration::minutes(10)))
            .unwrap();
        assert_eq!(
            backend
                .time_blocks(interviewer_id, date(2030, 1, 1), date(2030, 1, 31))
                .unwrap()
                .len(),
            2
        );

        assert_eq!(backend.remove_expired_blocks(now).unwrap(), 1);
        assert_eq!(backend.remove_expired_blocks(now).unwrap(), 0);

        let interview_id = Uuid::new_v4();
        let converted = backend
            .convert_temporary_block(live.id, interview_id, now)
            .unwrap();
        assert_eq!(converted.reason, BlockReason::InterviewScheduled);
        assert_eq!(converted.expires_at, None);
        assert_eq!(converted.interview_id, Some(interview_id));

        // Permanent blocks survive any cleanup and can't be converted twice
        assert_eq!(
            backend
                .remove_expired_blocks(now + Duration::days(365))
                .unwrap(),
            0
        );
        let result = backend.convert_temporary_block(live.id, interview_id, now);
        assert!(matches!(result, Err(BookingError::NotFound(_))));
        let result = backend.convert_temporary_block(Uuid::new_v4(), interview_id, now);
        assert!(matches!(result, Err(BookingError::NotFound(_))));
    }

    #[test]
    fn test_expired_hold_is_not_converted() {
        let backend = LocalBackend::default();
        let now = Utc::now();
        let expired = backend
            .add_time_block(hold(Uuid::new_v4(), now - Duration::seconds(1)))
            .unwrap();

        let result = backend.convert_temporary_block(expired.id, Uuid::new_v4(), now);
        assert!(matches!(result, Err(BookingError::NotFound(_))));

        // Still a hold, so the next cleanup removes it
        assert_eq!(backend.remove_expired_blocks(now).unwrap(), 1);
    }

    #[test]
    fn test_time_blocks_window_is_inclusive() {
        let backend = LocalBackend::default();
        let interviewer_id = Uuid::new_v4();
        let range = TimeRange::new(time(9, 0), time(10, 0));
        for day in [6, 7, 8] {
            backend
                .add_time_block(TimeBlock::new(
                    interviewer_id,
                    date(2030, 1, day),
                    range,
                    BlockReason::Manual,
                    None,
                ))
                .unwrap();
        }

        let blocks = backend
            .time_blocks(interviewer_id, date(2030, 1, 7), date(2030, 1, 8))
            .unwrap();
        assert_eq!(blocks.len(), 2);
        assert_eq!(blocks[0].blocked_date, date(2030, 1, 7));
        assert!(backend
            .time_blocks(Uuid::new_v4(), date(2030, 1, 1), date(2030, 1, 31))
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_temporary_block_without_expiry_is_rejected() {
        let backend = LocalBackend::default();
        let block = TimeBlock::new(
            Uuid::new_v4(),
            date(2030, 1, 7),
            TimeRange::new(time(9, 0), time(10, 0)),
            BlockReason::TemporaryHold,
            None,
        );
        let result = backend.add_time_block(block);
        assert!(matches!(result, Err(BookingError::Validation(_))));
    }

    #[tokio::test]
    async fn test_payment_session_updates_are_broadcast() {
        let backend = LocalBackend::default();
        let mut updates = backend.payment_updates();

        let session = backend.create_payment_session(payment_session()).unwrap();
        let created = read_from_payment_stream(&mut updates).await;
        assert_eq!(created.status, PaymentStatus::Pending);

        backend
            .update_payment_status(session.id, PaymentStatus::Successful)
            .unwrap();
        let updated = read_from_payment_stream(&mut updates).await;
        assert_eq!(updated.status, PaymentStatus::Successful);

        // Repeated webhook delivery changes nothing
        backend
            .update_payment_status(session.id, PaymentStatus::Successful)
            .unwrap();
        backend
            .update_payment_status(session.id, PaymentStatus::Failed)
            .unwrap_err();

        backend.mark_interview_matched(session.id).unwrap();
        let matched = read_from_payment_stream(&mut updates).await;
        assert!(matched.interview_matched);
        backend.mark_interview_matched(session.id).unwrap_err();

        let released = backend.release_interview_match(session.id).unwrap();
        assert!(!released.interview_matched);
        assert!(!read_from_payment_stream(&mut updates).await.interview_matched);
        backend.mark_interview_matched(session.id).unwrap();

        let result = backend.update_payment_status(Uuid::new_v4(), PaymentStatus::Failed);
        assert!(matches!(result, Err(BookingError::NotFound(_))));
    }

    #[test]
    fn test_complete_resume_review_once() {
        let backend = LocalBackend::default();
        let review = resume_review();
        backend.insert_resume_review(review.clone());

        let completed = backend
            .complete_resume_review(review.id, "https://reports.test/1".into(), Utc::now())
            .unwrap();
        assert_eq!(completed.status, ReviewStatus::Completed);
        assert_eq!(completed.report_url.as_deref(), Some("https://reports.test/1"));

        let result =
            backend.complete_resume_review(review.id, "https://reports.test/2".into(), Utc::now());
        assert!(matches!(result, Err(BookingError::Conflict(_))));
        let result =
            backend.complete_resume_review(Uuid::new_v4(), "https://reports.test/3".into(), Utc::now());
        assert!(matches!(result, Err(BookingError::NotFound(_))));
    }

    #[test]
    fn test_from_seed_file() {
        let profile = interviewer("Grace", &["backend"], WeeklyAvailability::default());
        let seed = serde_json::json!({
            "interviewers": [profile],
            "coupons": [coupon("WELCOME", ALL_PLANS, DiscountType::Fixed, 10.0)],
        });
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(seed.to_string().as_bytes()).unwrap();

        let backend = LocalBackend::from_seed_file(file.path()).unwrap();
        assert_eq!(backend.interviewers().unwrap(), vec![profile]);
        assert_eq!(backend.coupons().unwrap().len(), 1);
    }

    #[test]
    fn test_invalid_seed_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"{ not json").unwrap();
        LocalBackend::from_seed_file(file.path()).unwrap_err();

        let missing = file.path().with_extension("missing");
        LocalBackend::from_seed_file(&missing).unwrap_err();
    }
}
