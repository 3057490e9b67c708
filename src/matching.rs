//! Candidate to interviewer matching.
//!
//! Skill matching compares role keywords against the interviewer's skill
//! categories and technologies. Time matching looks for a declared weekly
//! slot starting within one hour of the candidate's preferred time.

use crate::types::{
    CandidateRequest, DayOfWeek, InterviewerProfile, TimeRange, WeeklyAvailability,
};
use chrono::{DateTime, Datelike, NaiveDate, NaiveDateTime, Timelike};
use lazy_static::lazy_static;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{debug, warn};

/// Maximum number of alternative slots suggested to a candidate.
pub const MAX_ALTERNATIVES: usize = 3;

/// Allowed distance in hours between the requested hour and a slot start.
const HOUR_TOLERANCE: i64 = 1;

lazy_static! {
    static ref ROLE_KEYWORDS: HashMap<&'static str, Vec<&'static str>> = {
        let mut keywords = HashMap::new();
        keywords.insert(
            "software engineer",
            vec!["software", "engineering", "programming", "development", "coding"],
        );
        keywords.insert(
            "frontend developer",
            vec!["frontend", "front-end", "react", "vue", "angular", "javascript", "typescript", "css"],
        );
        keywords.insert(
            "backend developer",
            vec!["backend", "back-end", "api", "node", "java", "python", "go", "databases"],
        );
        keywords.insert(
            "full stack developer",
            vec!["full stack", "fullstack", "frontend", "backend", "react", "node"],
        );
        keywords.insert(
            "data scientist",
            vec!["data science", "machine learning", "statistics", "python", "analytics"],
        );
        keywords.insert(
            "data analyst",
            vec!["data analysis", "analytics", "sql", "excel", "tableau", "power bi"],
        );
        keywords.insert(
            "machine learning engineer",
            vec!["machine learning", "ml", "deep learning", "pytorch", "tensorflow"],
        );
        keywords.insert(
            "devops engineer",
            vec!["devops", "cloud", "aws", "kubernetes", "docker", "ci/cd", "infrastructure"],
        );
        keywords.insert(
            "mobile developer",
            vec!["mobile", "ios", "android", "swift", "kotlin", "flutter", "react native"],
        );
        keywords.insert(
            "product manager",
            vec!["product management", "product", "roadmap", "strategy", "agile"],
        );
        keywords.insert(
            "ui/ux designer",
            vec!["design", "ui", "ux", "figma", "user research", "prototyping"],
        );
        keywords.insert(
            "qa engineer",
            vec!["qa", "testing", "quality assurance", "automation", "selenium"],
        );
        keywords
    };
}

/// Keywords describing a role, or the raw role itself when unmapped.
pub fn keywords_for_role(role: &str) -> Vec<String> {
    let role = role.trim().to_lowercase();
    match ROLE_KEYWORDS.get(role.as_str()) {
        Some(keywords) => keywords.iter().map(|keyword| keyword.to_string()).collect(),
        None => vec![role],
    }
}

pub fn skills_match(role: &str, skills: &[String], technologies: &[String]) -> bool {
    if role.trim().is_empty() {
        return false;
    }

    let expertise: Vec<String> = skills
        .iter()
        .chain(technologies)
        .map(|entry| entry.trim().to_lowercase())
        .filter(|entry| !entry.is_empty())
        .collect();

    keywords_for_role(role).iter().any(|keyword| {
        expertise.iter().any(|entry| {
            entry == keyword || entry.contains(keyword.as_str()) || keyword.contains(entry.as_str())
        })
    })
}

/// Accepts RFC 3339 and naive ISO datetimes. The wall clock as written is used.
pub fn parse_preferred_time(raw: &str) -> Option<NaiveDateTime> {
    let raw = raw.trim();
    if let Ok(datetime) = DateTime::parse_from_rfc3339(raw) {
        return Some(datetime.naive_local());
    }
    [
        "%Y-%m-%dT%H:%M:%S%.f",
        "%Y-%m-%dT%H:%M",
        "%Y-%m-%d %H:%M:%S",
        "%Y-%m-%d %H:%M",
    ]
    .iter()
    .find_map(|format| NaiveDateTime::parse_from_str(raw, format).ok())
}

pub fn time_slot_match(preferred_time: &str, availability: &WeeklyAvailability) -> Option<TimeRange> {
    let Some(preferred) = parse_preferred_time(preferred_time) else {
        warn!(preferred_time, "Unparseable preferred time, treating as no slot");
        return None;
    };

    let day = DayOfWeek::from(preferred.weekday());
    let hour = i64::from(preferred.hour());
    availability
        .slots_on(day)
        .iter()
        .find(|slot| (i64::from(slot.start.hour()) - hour).abs() <= HOUR_TOLERANCE)
        .copied()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProposedSlot {
    pub day: DayOfWeek,
    #[serde(flatten)]
    pub range: TimeRange,
}

pub fn alternative_slots(availability: &WeeklyAvailability) -> Vec<ProposedSlot> {
    availability
        .iter()
        .take(MAX_ALTERNATIVES)
        .map(|(day, range)| ProposedSlot { day, range: *range })
        .collect()
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum MatchOutcome {
    Exact {
        interviewer: InterviewerProfile,
        date: NaiveDate,
        slot: TimeRange,
    },
    Alternatives {
        interviewer: InterviewerProfile,
        suggested: Vec<ProposedSlot>,
    },
    NoMatch,
}

pub fn match_interviewer(
    candidate: &CandidateRequest,
    interviewers: &[InterviewerProfile],
) -> MatchOutcome {
    let qualified: Vec<&InterviewerProfile> = interviewers
        .iter()
        .filter(|interviewer| interviewer.is_active)
        .filter(|interviewer| {
            skills_match(
                &candidate.target_role,
                &interviewer.skills,
                &interviewer.technologies,
            )
        })
        .collect();
    debug!(
        role = %candidate.target_role,
        qualified = qualified.len(),
        "Skill matching finished"
    );

    let preferred_date = parse_preferred_time(&candidate.preferred_time).map(|dt| dt.date());
    for interviewer in &qualified {
        if let (Some(date), Some(slot)) = (
            preferred_date,
            time_slot_match(&candidate.preferred_time, &interviewer.availability),
        ) {
            return MatchOutcome::Exact {
                interviewer: (*interviewer).clone(),
                date,
                slot,
            };
        }
    }

    match qualified.first() {
        Some(interviewer) => MatchOutcome::Alternatives {
            interviewer: (*interviewer).clone(),
            suggested: alternative_slots(&interviewer.availability),
        },
        None => MatchOutcome::NoMatch,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchQuality {
    Excellent,
    Good,
    Poor,
    None,
}

impl MatchQuality {
    pub fn from_score(score: Option<f64>) -> Self {
        match score {
            Some(score) if score >= 80.0 => MatchQuality::Excellent,
            Some(score) if score >= 50.0 => MatchQuality::Good,
            Some(score) if score > 0.0 => MatchQuality::Poor,
            _ => MatchQuality::None,
        }
    }
}
