// Table definitions of the managed database. The schema itself is maintained outside this service.

diesel::table! {
    interviewer_profiles (id) {
        id -> Uuid,
        name -> Text,
        email -> Text,
        skills -> Array<Text>,
        technologies -> Array<Text>,
        availability -> Jsonb,
        is_active -> Bool,
    }
}

diesel::table! {
    interviewer_time_blocks (id) {
        id -> Uuid,
        interviewer_id -> Uuid,
        blocked_date -> Date,
        start_time -> Time,
        end_time -> Time,
        reason -> Text,
        expires_at -> Nullable<Timestamptz>,
        interview_id -> Nullable<Uuid>,
        created_at -> Timestamptz,
    }
}

diesel::table! {
    coupons (id) {
        id -> Uuid,
        code -> Text,
        applicable_plan -> Text,
        discount_type -> Text,
        discount_value -> Float8,
        is_active -> Bool,
        expires_at -> Nullable<Timestamptz>,
    }
}

diesel::table! {
    payment_sessions (id) {
        id -> Uuid,
        user_id -> Uuid,
        candidate_data -> Jsonb,
        plan_id -> Text,
        amount -> Float8,
        coupon_code -> Nullable<Text>,
        status -> Text,
        interview_matched -> Bool,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
    }
}

diesel::table! {
    interviews (id) {
        id -> Uuid,
        interviewer_id -> Uuid,
        candidate_id -> Uuid,
        payment_session_id -> Uuid,
        interview_date -> Date,
        start_time -> Time,
        end_time -> Time,
        status -> Text,
        created_at -> Timestamptz,
    }
}

diesel::table! {
    resume_reviews (id) {
        id -> Uuid,
        user_id -> Uuid,
        name -> Text,
        email -> Text,
        target_role -> Text,
        resume_url -> Text,
        status -> Text,
        report_url -> Nullable<Text>,
        completed_at -> Nullable<Timestamptz>,
    }
}
