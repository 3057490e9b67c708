use crate::{
    backend::{BookingBackend, PAYMENT_UPDATE_CAPACITY},
    error::BookingError,
    schema::{
        coupons, interviewer_profiles, interviewer_time_blocks, interviews, payment_sessions,
        resume_reviews,
    },
    types::{
        BlockReason, Coupon, Interview, InterviewerProfile, PaymentSession, PaymentStatus,
        ResumeReview, ReviewStatus, TimeBlock, WeeklyAvailability,
    },
};
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use diesel::{prelude::*, ConnectionError, PgConnection};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::broadcast::{self, Sender};
use tokio_stream::wrappers::BroadcastStream;
use tracing::{error, info};
use uuid::Uuid;

fn corrupt_row(table: &str, err: impl std::fmt::Display) -> BookingError {
    error!(table, %err, "Row can't be decoded");
    BookingError::Database(format!("Malformed row in {table}: {err}"))
}

#[derive(Queryable, Selectable)]
#[diesel(table_name = interviewer_profiles)]
#[diesel(check_for_backend(diesel::pg::Pg))]
struct InterviewerRow {
    id: Uuid,
    name: String,
    email: String,
    skills: Vec<String>,
    technologies: Vec<String>,
    availability: serde_json::Value,
    is_active: bool,
}

impl TryFrom<InterviewerRow> for InterviewerProfile {
    type Error = BookingError;

    fn try_from(row: InterviewerRow) -> Result<Self, Self::Error> {
        let availability: WeeklyAvailability = serde_json::from_value(row.availability)
            .map_err(|err| corrupt_row("interviewer_profiles", err))?;
        Ok(Self {
            id: row.id,
            name: row.name,
            email: row.email,
            skills: row.skills,
            technologies: row.technologies,
            availability,
            is_active: row.is_active,
        })
    }
}

#[derive(Queryable, Selectable, Insertable)]
#[diesel(table_name = interviewer_time_blocks)]
#[diesel(check_for_backend(diesel::pg::Pg))]
struct TimeBlockRow {
    id: Uuid,
    interviewer_id: Uuid,
    blocked_date: NaiveDate,
    start_time: NaiveTime,
    end_time: NaiveTime,
    reason: String,
    expires_at: Option<DateTime<Utc>>,
    interview_id: Option<Uuid>,
    created_at: DateTime<Utc>,
}

impl TryFrom<TimeBlockRow> for TimeBlock {
    type Error = BookingError;

    fn try_from(row: TimeBlockRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.id,
            interviewer_id: row.interviewer_id,
            blocked_date: row.blocked_date,
            start_time: row.start_time,
            end_time: row.end_time,
            reason: row
                .reason
                .parse()
                .map_err(|err| corrupt_row("interviewer_time_blocks", err))?,
            expires_at: row.expires_at,
            interview_id: row.interview_id,
            created_at: row.created_at,
        })
    }
}

impl From<&TimeBlock> for TimeBlockRow {
    fn from(block: &TimeBlock) -> Self {
        Self {
            id: block.id,
            interviewer_id: block.interviewer_id,
            blocked_date: block.blocked_date,
            start_time: block.start_time,
            end_time: block.end_time,
            reason: block.reason.as_str().to_string(),
            expires_at: block.expires_at,
            interview_id: block.interview_id,
            created_at: block.created_at,
        }
    }
}

#[derive(Queryable, Selectable)]
#[diesel(table_name = coupons)]
#[diesel(check_for_backend(diesel::pg::Pg))]
struct CouponRow {
    id: Uuid,
    code: String,
    applicable_plan: String,
    discount_type: String,
    discount_value: f64,
    is_active: bool,
    expires_at: Option<DateTime<Utc>>,
}

impl TryFrom<CouponRow> for Coupon {
    type Error = BookingError;

    fn try_from(row: CouponRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.id,
            code: row.code,
            applicable_plan: row.applicable_plan,
            discount_type: row
                .discount_type
                .parse()
                .map_err(|err| corrupt_row("coupons", err))?,
            discount_value: row.discount_value,
            is_active: row.is_active,
            expires_at: row.expires_at,
        })
    }
}

#[derive(Queryable, Selectable, Insertable)]
#[diesel(table_name = payment_sessions)]
#[diesel(check_for_backend(diesel::pg::Pg))]
struct PaymentSessionRow {
    id: Uuid,
    user_id: Uuid,
    candidate_data: serde_json::Value,
    plan_id: String,
    amount: f64,
    coupon_code: Option<String>,
    status: String,
    interview_matched: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<PaymentSessionRow> for PaymentSession {
    type Error = BookingError;

    fn try_from(row: PaymentSessionRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.id,
            user_id: row.user_id,
            candidate: serde_json::from_value(row.candidate_data)
                .map_err(|err| corrupt_row("payment_sessions", err))?,
            plan_id: row.plan_id,
            amount: row.amount,
            coupon_code: row.coupon_code,
            status: row
                .status
                .parse()
                .map_err(|err| corrupt_row("payment_sessions", err))?,
            interview_matched: row.interview_matched,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

impl TryFrom<&PaymentSession> for PaymentSessionRow {
    type Error = BookingError;

    fn try_from(session: &PaymentSession) -> Result<Self, Self::Error> {
        Ok(Self {
            id: session.id,
            user_id: session.user_id,
            candidate_data: serde_json::to_value(&session.candidate)
                .map_err(|err| BookingError::Database(err.to_string()))?,
            plan_id: session.plan_id.clone(),
            amount: session.amount,
            coupon_code: session.coupon_code.clone(),
            status: session.status.as_str().to_string(),
            interview_matched: session.interview_matched,
            created_at: session.created_at,
            updated_at: session.updated_at,
        })
    }
}

#[derive(Queryable, Selectable, Insertable)]
#[diesel(table_name = interviews)]
#[diesel(check_for_backend(diesel::pg::Pg))]
struct InterviewRow {
    id: Uuid,
    interviewer_id: Uuid,
    candidate_id: Uuid,
    payment_session_id: Uuid,
    interview_date: NaiveDate,
    start_time: NaiveTime,
    end_time: NaiveTime,
    status: String,
    created_at: DateTime<Utc>,
}

impl TryFrom<InterviewRow> for Interview {
    type Error = BookingError;

    fn try_from(row: InterviewRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.id,
            interviewer_id: row.interviewer_id,
            candidate_id: row.candidate_id,
            payment_session_id: row.payment_session_id,
            interview_date: row.interview_date,
            start_time: row.start_time,
            end_time: row.end_time,
            status: row
                .status
                .parse()
                .map_err(|err| corrupt_row("interviews", err))?,
            created_at: row.created_at,
        })
    }
}

impl From<&Interview> for InterviewRow {
    fn from(interview: &Interview) -> Self {
        Self {
            id: interview.id,
            interviewer_id: interview.interviewer_id,
            candidate_id: interview.candidate_id,
            payment_session_id: interview.payment_session_id,
            interview_date: interview.interview_date,
            start_time: interview.start_time,
            end_time: interview.end_time,
            status: interview.status.as_str().to_string(),
            created_at: interview.created_at,
        }
    }
}

#[derive(Queryable, Selectable)]
#[diesel(table_name = resume_reviews)]
#[diesel(check_for_backend(diesel::pg::Pg))]
struct ResumeReviewRow {
    id: Uuid,
    user_id: Uuid,
    name: String,
    email: String,
    target_role: String,
    resume_url: String,
    status: String,
    report_url: Option<String>,
    completed_at: Option<DateTime<Utc>>,
}

impl TryFrom<ResumeReviewRow> for ResumeReview {
    type Error = BookingError;

    fn try_from(row: ResumeReviewRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.id,
            user_id: row.user_id,
            name: row.name,
            email: row.email,
            target_role: row.target_role,
            resume_url: row.resume_url,
            status: row
                .status
                .parse()
                .map_err(|err| corrupt_row("resume_reviews", err))?,
            report_url: row.report_url,
            completed_at: row.completed_at,
        })
    }
}

/// PostgreSQL backend. Payment updates written through this process are
/// broadcast; changes made elsewhere are only seen by polling.
#[derive(Clone)]
pub struct DatabaseInterface {
    connection: Arc<Mutex<PgConnection>>,
    sender: Sender<PaymentSession>,
}

impl DatabaseInterface {
    pub fn new(database_url: &str) -> Result<Self, ConnectionError> {
        let connection = Self::establish_connection(database_url)?;
        let (sender, _) = broadcast::channel(PAYMENT_UPDATE_CAPACITY);
        Ok(Self {
            connection: Arc::new(Mutex::new(connection)),
            sender,
        })
    }

    fn establish_connection(database_url: &str) -> Result<PgConnection, ConnectionError> {
        PgConnection::establish(database_url)
    }

    fn connection(&self) -> MutexGuard<'_, PgConnection> {
        self.connection
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn send_payment_update(&self, session: &PaymentSession) {
        let _ = self.sender.send(session.clone());
    }

    fn update_payment_session<F>(&self, id: Uuid, update: F) -> Result<PaymentSession, BookingError>
    where
        F: FnOnce(&mut PaymentSession) -> Result<bool, BookingError>,
    {
        let mut connection = self.connection();
        let (session, changed) = connection.transaction::<_, BookingError, _>(|connection| {
            let row = payment_sessions::table
                .find(id)
                .select(PaymentSessionRow::as_select())
                .for_update()
                .get_result(connection)
                .optional()?
                .ok_or_else(|| {
                    BookingError::NotFound(format!("Payment session {id} does not exist"))
                })?;
            let mut session = PaymentSession::try_from(row)?;
            let changed = update(&mut session)?;
            if changed {
                diesel::update(payment_sessions::table.find(id))
                    .set((
                        payment_sessions::status.eq(session.status.as_str()),
                        payment_sessions::interview_matched.eq(session.interview_matched),
                        payment_sessions::updated_at.eq(session.updated_at),
                    ))
                    .execute(connection)?;
            }
            Ok((session, changed))
        })?;
        drop(connection);

        if changed {
            self.send_payment_update(&session);
        }
        Ok(session)
    }
}

impl BookingBackend for DatabaseInterface {
    fn interviewers(&self) -> Result<Vec<InterviewerProfile>, BookingError> {
        let rows = interviewer_profiles::table
            .select(InterviewerRow::as_select())
            .order(interviewer_profiles::name.asc())
            .load(&mut *self.connection())?;
        rows.into_iter().map(InterviewerProfile::try_from).collect()
    }

    fn interviewer(&self, id: Uuid) -> Result<InterviewerProfile, BookingError> {
        interviewer_profiles::table
            .find(id)
            .select(InterviewerRow::as_select())
            .first(&mut *self.connection())
            .optional()?
            .ok_or_else(|| BookingError::NotFound(format!("Interviewer {id} does not exist")))?
            .try_into()
    }

    fn time_blocks(
        &self,
        interviewer_id: Uuid,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<TimeBlock>, BookingError> {
        let rows = interviewer_time_blocks::table
            .filter(interviewer_time_blocks::interviewer_id.eq(interviewer_id))
            .filter(interviewer_time_blocks::blocked_date.between(from, to))
            .order((
                interviewer_time_blocks::blocked_date.asc(),
                interviewer_time_blocks::start_time.asc(),
            ))
            .select(TimeBlockRow::as_select())
            .load(&mut *self.connection())?;
        rows.into_iter().map(TimeBlock::try_from).collect()
    }

    fn add_time_block(&self, block: TimeBlock) -> Result<TimeBlock, BookingError> {
        block.validate()?;
        diesel::insert_into(interviewer_time_blocks::table)
            .values(TimeBlockRow::from(&block))
            .execute(&mut *self.connection())?;
        Ok(block)
    }

    fn convert_temporary_block(
        &self,
        reservation_id: Uuid,
        interview_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<TimeBlock, BookingError> {
        let row = diesel::update(
            interviewer_time_blocks::table
                .filter(interviewer_time_blocks::id.eq(reservation_id))
                .filter(interviewer_time_blocks::reason.eq(BlockReason::TemporaryHold.as_str()))
                .filter(interviewer_time_blocks::expires_at.gt(now)),
        )
        .set((
            interviewer_time_blocks::reason.eq(BlockReason::InterviewScheduled.as_str()),
            interviewer_time_blocks::expires_at.eq(None::<DateTime<Utc>>),
            interviewer_time_blocks::interview_id.eq(Some(interview_id)),
        ))
        .returning(TimeBlockRow::as_returning())
        .get_result(&mut *self.connection())
        .optional()?;

        match row {
            Some(row) => row.try_into(),
            None => {
                let err = format!("No temporary reservation {reservation_id} to convert");
                error!(err);
                Err(BookingError::NotFound(err))
            }
        }
    }

    fn remove_expired_blocks(&self, now: DateTime<Utc>) -> Result<usize, BookingError> {
        let removed = diesel::delete(
            interviewer_time_blocks::table
                .filter(interviewer_time_blocks::reason.eq(BlockReason::TemporaryHold.as_str()))
                .filter(interviewer_time_blocks::expires_at.le(now)),
        )
        .execute(&mut *self.connection())?;
        Ok(removed)
    }

    fn coupons(&self) -> Result<Vec<Coupon>, BookingError> {
        let rows = coupons::table
            .select(CouponRow::as_select())
            .load(&mut *self.connection())?;
        rows.into_iter().map(Coupon::try_from).collect()
    }

    fn create_payment_session(
        &self,
        session: PaymentSession,
    ) -> Result<PaymentSession, BookingError> {
        diesel::insert_into(payment_sessions::table)
            .values(PaymentSessionRow::try_from(&session)?)
            .execute(&mut *self.connection())?;
        info!(session_id = %session.id, "Payment session created");
        self.send_payment_update(&session);
        Ok(session)
    }

    fn payment_session(&self, id: Uuid) -> Result<PaymentSession, BookingError> {
        payment_sessions::table
            .find(id)
            .select(PaymentSessionRow::as_select())
            .first(&mut *self.connection())
            .optional()?
            .ok_or_else(|| BookingError::NotFound(format!("Payment session {id} does not exist")))?
            .try_into()
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
        diesel::insert_into(interviews::table)
            .values(InterviewRow::from(&interview))
            .execute(&mut *self.connection())?;
        Ok(interview)
    }

    fn interview(&self, id: Uuid) -> Result<Interview, BookingError> {
        interviews::table
            .find(id)
            .select(InterviewRow::as_select())
            .first(&mut *self.connection())
            .optional()?
            .ok_or_else(|| BookingError::NotFound(format!("Interview {id} does not exist")))?
            .try_into()
    }

    fn resume_review(&self, id: Uuid) -> Result<ResumeReview, BookingError> {
        resume_reviews::table
            .find(id)
            .select(ResumeReviewRow::as_select())
            .first(&mut *self.connection())
            .optional()?
            .ok_or_else(|| BookingError::NotFound(format!("Resume review {id} does not exist")))?
            .try_into()
    }

    fn complete_resume_review(
        &self,
        id: Uuid,
        report_url: String,
        completed_at: DateTime<Utc>,
    ) -> Result<ResumeReview, BookingError> {
        let row = diesel::update(
            resume_reviews::table
                .filter(resume_reviews::id.eq(id))
                .filter(resume_reviews::status.ne(ReviewStatus::Completed.as_str())),
        )
        .set((
            resume_reviews::status.eq(ReviewStatus::Completed.as_str()),
            resume_reviews::report_url.eq(Some(report_url)),
            resume_reviews::completed_at.eq(Some(completed_at)),
        ))
        .returning(ResumeReviewRow::as_returning())
        .get_result(&mut *self.connection())
        .optional()?;

        match row {
            Some(row) => row.try_into(),
            None => {
                // Distinguish a missing review from an already completed one
                self.resume_review(id)?;
                Err(BookingError::Conflict(format!(
                    "Resume review {id} was already completed"
                )))
            }
        }
    }
}
