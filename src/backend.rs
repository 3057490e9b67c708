use crate::{
    error::BookingError,
    types::{
        Coupon, Interview, InterviewerProfile, PaymentSession, PaymentStatus, ResumeReview,
        TimeBlock,
    },
};
use chrono::{DateTime, NaiveDate, Utc};
use tokio_stream::wrappers::BroadcastStream;
use uuid::Uuid;

/// Capacity of the payment update channel. Slow subscribers fall back to polling.
pub const PAYMENT_UPDATE_CAPACITY: usize = 64;

/// Data store behind the booking service. Writes are serialized by the implementation.
pub trait BookingBackend: Clone + Send + Sync + 'static {
    fn interviewers(&self) -> Result<Vec<InterviewerProfile>, BookingError>;
    fn interviewer(&self, id: Uuid) -> Result<InterviewerProfile, BookingError>;

    /// Blocks of one interviewer with `from <= blocked_date <= to`.
    fn time_blocks(
        &self,
        interviewer_id: Uuid,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<TimeBlock>, BookingError>;
    fn add_time_block(&self, block: TimeBlock) -> Result<TimeBlock, BookingError>;
    /// Turns a temporary hold that is still live at `now` into a permanent
    /// `interview_scheduled` block.
    fn convert_temporary_block(
        &self,
        reservation_id: Uuid,
        interview_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<TimeBlock, BookingError>;
    /// Deletes temporary holds expired at `now` and returns how many were removed.
    fn remove_expired_blocks(&self, now: DateTime<Utc>) -> Result<usize, BookingError>;

    fn coupons(&self) -> Result<Vec<Coupon>, BookingError>;

    fn create_payment_session(
        &self,
        session: PaymentSession,
    ) -> Result<PaymentSession, BookingError>;
    fn payment_session(&self, id: Uuid) -> Result<PaymentSession, BookingError>;
    fn update_payment_status(
        &self,
        id: Uuid,
        status: PaymentStatus,
    ) -> Result<PaymentSession, BookingError>;
    /// Claims the session for a booking. Fails unless it is paid and unclaimed.
    fn mark_interview_matched(&self, id: Uuid) -> Result<PaymentSession, BookingError>;
    /// Gives a claim back when the booking did not go through.
    fn release_interview_match(&self, id: Uuid) -> Result<PaymentSession, BookingError>;
    /// Every payment session row written through this backend.
    fn payment_updates(&self) -> BroadcastStream<PaymentSession>;

    fn create_interview(&self, interview: Interview) -> Result<Interview, BookingError>;
    fn interview(&self, id: Uuid) -> Result<Interview, BookingError>;

    fn resume_review(&self, id: Uuid) -> Result<ResumeReview, BookingError>;
    fn complete_resume_review(
        &self,
        id: Uuid,
        report_url: String,
        completed_at: DateTime<Utc>,
    ) -> Result<ResumeReview, BookingError>;
}
