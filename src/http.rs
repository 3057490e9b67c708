use crate::{
    availability::{available_slots, ensure_range_free, AvailableSlot},
    backend::BookingBackend,
    configuration::Configuration,
    coupon::{applicable_coupons, quote_price, AddOn, PriceQuote},
    error::BookingError,
    matching::{
        alternative_slots, match_interviewer, parse_preferred_time, MatchOutcome, MatchQuality,
        ProposedSlot,
    },
    notifier::{EmailMessage, ForwardTarget, Notifier, ReviewReadyEmail},
    payment::{normalize_gateway_status, watch_payment_status, WatchOutcome, WatchSettings},
    types::{
        hhmm, BlockReason, CandidateRequest, Coupon, Interview, InterviewStatus,
        InterviewerProfile, PaymentSession, PaymentStatus, TimeBlock, TimeRange,
    },
};
use axum::{
    extract::{Path, Query, Request, State},
    http::StatusCode,
    middleware::{self, Next},
    response::Response,
    routing::{get, post},
    Json, Router,
};
use askama::Template;
use axum_valid::Valid;
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::sync::Arc;
use subtle::ConstantTimeEq;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::{error, info, warn};
use uuid::Uuid;
use validator::{Validate, ValidationError};

pub const ADMIN_PASSWORD_HEADER: &str = "x-admin-password";
const DEFAULT_REVIEW_SUBJECT: &str = "Your resume review is ready";

lazy_static! {
    static ref PLAN_ID: Regex = Regex::new(r"^[A-Za-z0-9_-]{1,64}$").unwrap();
}

#[derive(Clone)]
pub struct AppState<T: BookingBackend, C: Configuration> {
    pub backend: T,
    pub notifier: Arc<dyn Notifier>,
    pub configuration: C,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
struct ConvertReservationRequest {
    #[serde(alias = "reservationId")]
    reservation_id: Uuid,
    #[serde(alias = "interviewId")]
    interview_id: Uuid,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
struct CompleteReviewRequest {
    #[serde(alias = "reviewId")]
    review_id: Uuid,
    #[serde(alias = "reportUrl")]
    #[validate(url)]
    report_url: String,
    #[serde(default, alias = "emailSubject")]
    #[validate(length(min = 1, max = 200))]
    email_subject: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
struct ChangeEvent {
    #[serde(rename = "type")]
    #[validate(length(min = 1))]
    event_type: String,
    #[validate(length(min = 1))]
    table: String,
    #[serde(default)]
    record: Option<Map<String, Value>>,
    #[serde(default)]
    old_record: Option<Map<String, Value>>,
}

impl ChangeEvent {
    /// `{event_type, table, ...record}`, falling back to the old record for deletes.
    fn flatten(self) -> Value {
        let mut payload = self.record.or(self.old_record).unwrap_or_default();
        payload.insert("event_type".into(), Value::String(self.event_type));
        payload.insert("table".into(), Value::String(self.table));
        Value::Object(payload)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
struct PaymentWebhookRequest {
    #[serde(alias = "orderId")]
    #[validate(length(min = 1))]
    order_id: String,
    #[validate(length(min = 1))]
    status: String,
}

#[derive(Debug, Clone, Deserialize)]
struct AvailabilityQuery {
    preferred_date: Option<NaiveDate>,
}

#[derive(Debug, Clone, Deserialize)]
struct CouponQuery {
    plan_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
struct QuoteRequest {
    #[validate(range(min = 0.0))]
    base_price: f64,
    #[validate(regex(path = *PLAN_ID))]
    plan_id: String,
    #[serde(default)]
    coupon_code: Option<String>,
    #[serde(default)]
    #[validate(nested)]
    add_ons: Vec<AddOn>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
struct CreatePaymentSessionRequest {
    user_id: Uuid,
    #[validate(nested)]
    candidate: CandidateRequest,
    #[validate(nested)]
    #[serde(flatten)]
    quote: QuoteRequest,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct CreatePaymentSessionResponse {
    session: PaymentSession,
    quote: PriceQuote,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct PaymentStatusResponse {
    status: String,
    session: Option<PaymentSession>,
}

fn validate_block_range(request: &BlockRequest) -> Result<(), ValidationError> {
    if request.start_time >= request.end_time {
        return Err(ValidationError::new("end_before_start"));
    }
    Ok(())
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[validate(schema(function = "validate_block_range"))]
struct BlockRequest {
    interviewer_id: Uuid,
    date: NaiveDate,
    #[serde(with = "hhmm")]
    start_time: NaiveTime,
    #[serde(with = "hhmm")]
    end_time: NaiveTime,
}

impl BlockRequest {
    fn range(&self) -> TimeRange {
        TimeRange::new(self.start_time, self.end_time)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
struct BookingRequest {
    payment_session_id: Uuid,
    #[serde(default)]
    reservation_id: Option<Uuid>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
struct MatchRequest {
    #[serde(flatten)]
    #[validate(nested)]
    candidate: CandidateRequest,
    /// Score from an external resume analysis, reported back as a quality label.
    #[serde(default)]
    match_score: Option<f64>,
}

#[derive(Debug, Clone, Serialize)]
struct MatchResponse {
    #[serde(flatten)]
    outcome: MatchOutcome,
    open_slots: Vec<AvailableSlot>,
    quality: MatchQuality,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
enum BookingResponse {
    Booked {
        interview: Interview,
        block: TimeBlock,
    },
    Alternatives {
        interviewer: InterviewerProfile,
        suggested: Vec<ProposedSlot>,
        open_slots: Vec<AvailableSlot>,
    },
    NoMatch,
}

pub fn create_app<T: BookingBackend, C: Configuration>(
    backend: T,
    notifier: Arc<dyn Notifier>,
    configuration: C,
) -> Router {
    let state = AppState {
        backend,
        notifier,
        configuration,
    };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let public = Router::new()
        .route("/match", post(match_candidate::<T, C>))
        .route(
            "/interviewers/:id/availability",
            get(get_availability::<T, C>),
        )
        .route("/coupons", get(get_coupons::<T, C>))
        .route("/pricing/quote", post(get_quote::<T, C>))
        .route("/payment-sessions", post(create_payment_session::<T, C>))
        .route("/payment-sessions/:id", get(get_payment_session::<T, C>))
        .route(
            "/payment-sessions/:id/status",
            get(wait_for_payment_status::<T, C>),
        )
        .route("/reservations", post(reserve_slot::<T, C>))
        .route("/reservations/convert", post(convert_reservation::<T, C>))
        .route("/bookings", post(book_interview::<T, C>))
        .route("/interviews/:id", get(get_interview::<T, C>))
        .route("/webhooks/payment", post(payment_webhook::<T, C>))
        .route(
            "/webhooks/resume-review",
            post(resume_review_webhook::<T, C>),
        )
        .route("/webhooks/sync-to-sheets", post(sync_to_sheets::<T, C>));

    let admin = Router::new()
        .route("/resume-reviews/complete", post(complete_resume_review::<T, C>))
        .route("/admin/blocks", post(add_manual_block::<T, C>))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            admin_auth::<T, C>,
        ));

    Router::new()
        .merge(public)
        .merge(admin)
        .with_state(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}

async fn admin_auth<T: BookingBackend, C: Configuration>(
    State(state): State<AppState<T, C>>,
    request: Request,
    next: Next,
) -> Result<Response, BookingError> {
    let Some(password) = request.headers().get(ADMIN_PASSWORD_HEADER) else {
        return Err(BookingError::Unauthorized("Missing credentials".into()));
    };
    let expected = state.configuration.admin_password();
    let matches: bool = password.as_bytes().ct_eq(expected.as_bytes()).into();
    if expected.is_empty() || !matches {
        warn!(uri = %request.uri(), "Rejected admin request with wrong password");
        return Err(BookingError::Forbidden("Invalid credentials".into()));
    }
    Ok(next.run(request).await)
}

async fn match_candidate<T: BookingBackend, C: Configuration>(
    State(state): State<AppState<T, C>>,
    Valid(Json(request)): Valid<Json<MatchRequest>>,
) -> Result<Json<MatchResponse>, BookingError> {
    let candidate = request.candidate;
    let now = Utc::now();
    let interviewers = state.backend.interviewers()?;
    let outcome = match match_interviewer(&candidate, &interviewers) {
        MatchOutcome::Exact {
            interviewer,
            date,
            slot,
        } if !exact_slot_open(&state.backend, interviewer.id, date, &slot, now)? => {
            MatchOutcome::Alternatives {
                suggested: alternative_slots(&interviewer.availability),
                interviewer,
            }
        }
        outcome => outcome,
    };

    let open_slots = match &outcome {
        MatchOutcome::Alternatives { interviewer, .. } => {
            candidate_open_slots(&state, &candidate, interviewer.id, now)?
        }
        _ => Vec::new(),
    };
    Ok(Json(MatchResponse {
        outcome,
        open_slots,
        quality: MatchQuality::from_score(request.match_score),
    }))
}

async fn get_availability<T: BookingBackend, C: Configuration>(
    State(state): State<AppState<T, C>>,
    Path(interviewer_id): Path<Uuid>,
    Query(query): Query<AvailabilityQuery>,
) -> Result<Json<Vec<AvailableSlot>>, BookingError> {
    let slots = available_slots(
        &state.backend,
        interviewer_id,
        query.preferred_date,
        state.configuration.availability_window_days(),
        Utc::now(),
    )?;
    Ok(Json(slots))
}

async fn get_coupons<T: BookingBackend, C: Configuration>(
    State(state): State<AppState<T, C>>,
    Query(query): Query<CouponQuery>,
) -> Result<Json<Vec<Coupon>>, BookingError> {
    let coupons = state.backend.coupons()?;
    let applicable = applicable_coupons(&coupons, &query.plan_id, Utc::now())
        .into_iter()
        .cloned()
        .collect();
    Ok(Json(applicable))
}

fn quote<T: BookingBackend>(backend: &T, request: &QuoteRequest) -> Result<PriceQuote, BookingError> {
    let coupons = backend.coupons()?;
    Ok(quote_price(
        request.base_price,
        &request.plan_id,
        request.coupon_code.as_deref(),
        &request.add_ons,
        &coupons,
        Utc::now(),
    ))
}

async fn get_quote<T: BookingBackend, C: Configuration>(
    State(state): State<AppState<T, C>>,
    Valid(Json(request)): Valid<Json<QuoteRequest>>,
) -> Result<Json<PriceQuote>, BookingError> {
    Ok(Json(quote(&state.backend, &request)?))
}

async fn create_payment_session<T: BookingBackend, C: Configuration>(
    State(state): State<AppState<T, C>>,
    Valid(Json(request)): Valid<Json<CreatePaymentSessionRequest>>,
) -> Result<(StatusCode, Json<CreatePaymentSessionResponse>), BookingError> {
    let quote = quote(&state.backend, &request.quote)?;
    let session = state.backend.create_payment_session(PaymentSession::new(
        request.user_id,
        request.candidate,
        request.quote.plan_id,
        quote.final_price,
        quote.coupon.as_ref().map(|coupon| coupon.code.clone()),
    ))?;
    info!(session_id = %session.id, amount = session.amount, "Checkout started");
    Ok((
        StatusCode::CREATED,
        Json(CreatePaymentSessionResponse { session, quote }),
    ))
}

async fn get_payment_session<T: BookingBackend, C: Configuration>(
    State(state): State<AppState<T, C>>,
    Path(session_id): Path<Uuid>,
) -> Result<Json<PaymentSession>, BookingError> {
    Ok(Json(state.backend.payment_session(session_id)?))
}

async fn wait_for_payment_status<T: BookingBackend, C: Configuration>(
    State(state): State<AppState<T, C>>,
    Path(session_id): Path<Uuid>,
) -> Result<Json<PaymentStatusResponse>, BookingError> {
    let settings = WatchSettings {
        poll_interval: state.configuration.payment_poll_interval(),
        timeout: state.configuration.payment_watch_timeout(),
    };
    let outcome = watch_payment_status(&state.backend, session_id, settings, |session| {
        info!(session_id = %session.id, status = %session.status, "Reporting payment status");
    })
    .await?;

    Ok(Json(match outcome {
        WatchOutcome::Settled(session) => PaymentStatusResponse {
            status: session.status.to_string(),
            session: Some(session),
        },
        WatchOutcome::TimedOut => PaymentStatusResponse {
            status: "timed_out".into(),
            session: None,
        },
    }))
}

async fn payment_webhook<T: BookingBackend, C: Configuration>(
    State(state): State<AppState<T, C>>,
    Valid(Json(request)): Valid<Json<PaymentWebhookRequest>>,
) -> Result<Json<PaymentSession>, BookingError> {
    let session_id: Uuid = request
        .order_id
        .trim()
        .parse()
        .map_err(|_| BookingError::Validation(format!("Unknown order id '{}'", request.order_id)))?;
    let Some(status) = normalize_gateway_status(&request.status) else {
        return Err(BookingError::Validation(format!(
            "Unknown payment status '{}'",
            request.status
        )));
    };

    if status == PaymentStatus::Pending {
        return Ok(Json(state.backend.payment_session(session_id)?));
    }
    let session = state.backend.update_payment_status(session_id, status)?;
    info!(%session_id, %status, "Payment webhook processed");
    Ok(Json(session))
}

async fn reserve_slot<T: BookingBackend, C: Configuration>(
    State(state): State<AppState<T, C>>,
    Valid(Json(request)): Valid<Json<BlockRequest>>,
) -> Result<(StatusCode, Json<TimeBlock>), BookingError> {
    let now = Utc::now();
    state.backend.interviewer(request.interviewer_id)?;
    if request.date.and_time(request.start_time) <= now.naive_utc() {
        return Err(BookingError::Validation(format!(
            "Cannot reserve {} at {}, it is in the past",
            request.date,
            request.start_time.format("%H:%M")
        )));
    }
    ensure_range_free(
        &state.backend,
        request.interviewer_id,
        request.date,
        &request.range(),
        now,
    )?;

    let hold = TimeBlock::new(
        request.interviewer_id,
        request.date,
        request.range(),
        BlockReason::TemporaryHold,
        Some(now + state.configuration.hold_duration()),
    );
    let hold = state.backend.add_time_block(hold)?;
    info!(reservation_id = %hold.id, "Temporary hold created");
    Ok((StatusCode::CREATED, Json(hold)))
}

async fn add_manual_block<T: BookingBackend, C: Configuration>(
    State(state): State<AppState<T, C>>,
    Valid(Json(request)): Valid<Json<BlockRequest>>,
) -> Result<(StatusCode, Json<TimeBlock>), BookingError> {
    state.backend.interviewer(request.interviewer_id)?;
    let block = TimeBlock::new(
        request.interviewer_id,
        request.date,
        request.range(),
        BlockReason::Manual,
        None,
    );
    Ok((StatusCode::CREATED, Json(state.backend.add_time_block(block)?)))
}

async fn convert_reservation<T: BookingBackend, C: Configuration>(
    State(state): State<AppState<T, C>>,
    Valid(Json(request)): Valid<Json<ConvertReservationRequest>>,
) -> Result<Json<TimeBlock>, BookingError> {
    let block = state.backend.convert_temporary_block(
        request.reservation_id,
        request.interview_id,
        Utc::now(),
    )?;
    info!(reservation_id = %block.id, interview_id = %request.interview_id, "Reservation converted");
    Ok(Json(block))
}

async fn book_interview<T: BookingBackend, C: Configuration>(
    State(state): State<AppState<T, C>>,
    Valid(Json(request)): Valid<Json<BookingRequest>>,
) -> Result<Json<BookingResponse>, BookingError> {
    let backend = &state.backend;
    // The claim is taken before any block is written and given back unless booked
    let session = backend.mark_interview_matched(request.payment_session_id)?;

    match book_claimed_session(&state, &session, request.reservation_id, Utc::now()) {
        Ok(response @ BookingResponse::Booked { .. }) => Ok(Json(response)),
        outcome => {
            if let Err(err) = backend.release_interview_match(session.id) {
                error!(?err, session_id = %session.id, "Failed to release payment session claim");
            }
            outcome.map(Json)
        }
    }
}

fn book_claimed_session<T: BookingBackend, C: Configuration>(
    state: &AppState<T, C>,
    session: &PaymentSession,
    reservation_id: Option<Uuid>,
    now: DateTime<Utc>,
) -> Result<BookingResponse, BookingError> {
    let backend = &state.backend;
    let interview_id = Uuid::new_v4();

    let block = if let Some(reservation_id) = reservation_id {
        backend.convert_temporary_block(reservation_id, interview_id, now)?
    } else {
        let interviewers = backend.interviewers()?;
        match match_interviewer(&session.candidate, &interviewers) {
            MatchOutcome::Exact {
                interviewer,
                date,
                slot,
            } if exact_slot_open(backend, interviewer.id, date, &slot, now)? => {
                let mut block = TimeBlock::new(
                    interviewer.id,
                    date,
                    slot,
                    BlockReason::InterviewScheduled,
                    None,
                );
                block.interview_id = Some(interview_id);
                backend.add_time_block(block)?
            }
            MatchOutcome::Exact { interviewer, .. } => {
                let suggested = alternative_slots(&interviewer.availability);
                return alternatives(state, &session.candidate, interviewer, suggested, now);
            }
            MatchOutcome::Alternatives {
                interviewer,
                suggested,
            } => return alternatives(state, &session.candidate, interviewer, suggested, now),
            MatchOutcome::NoMatch => {
                info!(session_id = %session.id, "No interviewer matches the candidate");
                return Ok(BookingResponse::NoMatch);
            }
        }
    };

    let interview = backend.create_interview(Interview {
        id: interview_id,
        interviewer_id: block.interviewer_id,
        candidate_id: session.user_id,
        payment_session_id: session.id,
        interview_date: block.blocked_date,
        start_time: block.start_time,
        end_time: block.end_time,
        status: InterviewStatus::Scheduled,
        created_at: now,
    })?;
    info!(interview_id = %interview.id, interviewer_id = %interview.interviewer_id, "Interview booked");

    Ok(BookingResponse::Booked { interview, block })
}

/// Whether an exactly matched slot can still be booked: it starts after `now`
/// and no live block overlaps it.
fn exact_slot_open<T: BookingBackend>(
    backend: &T,
    interviewer_id: Uuid,
    date: NaiveDate,
    slot: &TimeRange,
    now: DateTime<Utc>,
) -> Result<bool, BookingError> {
    if date.and_time(slot.start) <= now.naive_utc() {
        info!(%date, start = %slot.start, "Matched slot is in the past, offering alternatives");
        return Ok(false);
    }
    match ensure_range_free(backend, interviewer_id, date, slot, now) {
        Ok(()) => Ok(true),
        Err(BookingError::Conflict(reason)) => {
            info!(reason, "Matched slot is blocked, offering alternatives");
            Ok(false)
        }
        Err(err) => Err(err),
    }
}

fn alternatives<T: BookingBackend, C: Configuration>(
    state: &AppState<T, C>,
    candidate: &CandidateRequest,
    interviewer: InterviewerProfile,
    suggested: Vec<ProposedSlot>,
    now: DateTime<Utc>,
) -> Result<BookingResponse, BookingError> {
    let open_slots = candidate_open_slots(state, candidate, interviewer.id, now)?;
    Ok(BookingResponse::Alternatives {
        interviewer,
        suggested,
        open_slots,
    })
}

fn candidate_open_slots<T: BookingBackend, C: Configuration>(
    state: &AppState<T, C>,
    candidate: &CandidateRequest,
    interviewer_id: Uuid,
    now: DateTime<Utc>,
) -> Result<Vec<AvailableSlot>, BookingError> {
    available_slots(
        &state.backend,
        interviewer_id,
        parse_preferred_time(&candidate.preferred_time).map(|preferred| preferred.date()),
        state.configuration.availability_window_days(),
        now,
    )
}

async fn get_interview<T: BookingBackend, C: Configuration>(
    State(state): State<AppState<T, C>>,
    Path(interview_id): Path<Uuid>,
) -> Result<Json<Interview>, BookingError> {
    Ok(Json(state.backend.interview(interview_id)?))
}

async fn complete_resume_review<T: BookingBackend, C: Configuration>(
    State(state): State<AppState<T, C>>,
    Valid(Json(request)): Valid<Json<CompleteReviewRequest>>,
) -> Result<Json<Value>, BookingError> {
    let review = state.backend.complete_resume_review(
        request.review_id,
        request.report_url.clone(),
        Utc::now(),
    )?;

    let html = ReviewReadyEmail {
        name: &review.name,
        target_role: &review.target_role,
        report_url: &request.report_url,
    }
    .render();
    let email_sent = match html {
        Ok(html) => {
            let message = EmailMessage {
                to: review.email.clone(),
                subject: request
                    .email_subject
                    .unwrap_or_else(|| DEFAULT_REVIEW_SUBJECT.to_string()),
                html,
            };
            match state.notifier.send_email(message).await {
                Ok(()) => true,
                Err(err) => {
                    error!(?err, review_id = %review.id, "Review completed but notification email failed");
                    false
                }
            }
        }
        Err(err) => {
            error!(?err, review_id = %review.id, "Failed to render review email");
            false
        }
    };

    Ok(Json(json!({ "review": review, "email_sent": email_sent })))
}

async fn forward_change<T: BookingBackend, C: Configuration>(
    state: &AppState<T, C>,
    target: ForwardTarget,
    event: ChangeEvent,
) -> Result<Json<Value>, BookingError> {
    let forwarded = state.notifier.forward(target, event.flatten()).await?;
    Ok(Json(json!({ "forwarded": forwarded })))
}

async fn resume_review_webhook<T: BookingBackend, C: Configuration>(
    State(state): State<AppState<T, C>>,
    Valid(Json(event)): Valid<Json<ChangeEvent>>,
) -> Result<Json<Value>, BookingError> {
    forward_change(&state, ForwardTarget::Automation, event).await
}

async fn sync_to_sheets<T: BookingBackend, C: Configuration>(
    State(state): State<AppState<T, C>>,
    Valid(Json(event)): Valid<Json<ChangeEvent>>,
) -> Result<Json<Value>, BookingError> {
    forward_change(&state, ForwardTarget::Spreadsheet, event).await
}
