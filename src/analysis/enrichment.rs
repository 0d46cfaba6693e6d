//! # Profile Enrichment
//!
//! After a successful analysis, facts the candidate stated about themselves
//! are copied onto their profile. Only the candidate's own lines are read,
//! and only empty profile fields are filled; nothing a recruiter entered is
//! ever overwritten.
//!
//! ## Extracted Fields:
//! - **email**, **phone**
//! - **years_experience** ("I have 7 years of experience")
//! - **current_role** ("I currently work as a platform engineer")
//! - **skills** from a fixed vocabulary

use crate::analysis::store::SessionStore;
use anyhow::{Context, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

static EMAIL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}").expect("Invalid regex")
});

static PHONE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\+?\d[\d\s().-]{7,18}\d").expect("Invalid regex")
});

static YEARS_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(\d{1,2})\+?\s*(?:years?|yrs)\b").expect("Invalid regex")
});

static ROLE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\b(?:i work as|i'm working as|i am working as|currently work as|my current role is|my current title is|my title is)\s+(?:an?\s+|the\s+)?([a-z][a-z /&-]{2,48}?)\s*(?:\bat\b|\bfor\b|\bin\b|[.,;!]|$)",
    )
    .expect("Invalid regex")
});

/// Vocabulary of skills recognised in answers: (pattern, canonical name).
const KNOWN_SKILLS: &[(&str, &str)] = &[
    ("rust", "Rust"),
    ("python", "Python"),
    ("java", "Java"),
    ("javascript", "JavaScript"),
    ("typescript", "TypeScript"),
    ("golang", "Go"),
    ("c\\+\\+", "C++"),
    ("sql", "SQL"),
    ("postgres(?:ql)?", "PostgreSQL"),
    ("kubernetes", "Kubernetes"),
    ("docker", "Docker"),
    ("terraform", "Terraform"),
    ("aws", "AWS"),
    ("gcp", "GCP"),
    ("azure", "Azure"),
    ("kafka", "Kafka"),
    ("react", "React"),
    ("node\\.js", "Node.js"),
    ("graphql", "GraphQL"),
];

static SKILL_RES: Lazy<Vec<(Regex, &'static str)>> = Lazy::new(|| {
    KNOWN_SKILLS
        .iter()
        .map(|(pattern, name)| {
            let regex = Regex::new(&format!(r"(?i)(?:^|[^A-Za-z0-9]){}(?:$|[^A-Za-z0-9+#])", pattern))
                .expect("Invalid regex");
            (regex, *name)
        })
        .collect()
});

/// Facts found in the candidate's lines.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExtractedProfile {
    pub email: Option<String>,
    pub phone: Option<String>,
    pub years_experience: Option<u32>,
    pub current_role: Option<String>,
    pub skills: Vec<String>,
}

pub struct ProfileEnricher {
    store: Arc<dyn SessionStore>,
    candidate_labels: Vec<String>,
}

impl ProfileEnricher {
    pub fn new(store: Arc<dyn SessionStore>, candidate_labels: Vec<String>) -> Self {
        Self {
            store,
            candidate_labels: candidate_labels.into_iter().map(|label| label.to_lowercase()).collect(),
        }
    }

    /// Fill empty fields of the linked candidate.
    ///
    /// ## Returns:
    /// Names of the fields that were written (empty when no candidate is linked).
    pub async fn enrich(&self, candidate_id: Option<Uuid>, transcript: &str) -> Result<Vec<&'static str>> {
        let Some(candidate_id) = candidate_id else {
            return Ok(Vec::new());
        };

        let mut candidate = self
            .store
            .get_candidate(candidate_id)
            .await
            .context("loading candidate for enrichment")?;
        let found = extract_profile(&candidate_lines(transcript, &self.candidate_labels));

        let mut updated = Vec::new();
        if is_blank(&candidate.email) {
            if let Some(email) = found.email {
                candidate.email = Some(email);
                updated.push("email");
            }
        }
        if is_blank(&candidate.phone) {
            if let Some(phone) = found.phone {
                candidate.phone = Some(phone);
                updated.push("phone");
            }
        }
        if candidate.years_experience.is_none() {
            if let Some(years) = found.years_experience {
                candidate.years_experience = Some(years);
                updated.push("years_experience");
            }
        }
        if is_blank(&candidate.current_role) {
            if let Some(role) = found.current_role {
                candidate.current_role = Some(role);
                updated.push("current_role");
            }
        }
        if candidate.skills.is_empty() && !found.skills.is_empty() {
            candidate.skills = found.skills;
            updated.push("skills");
        }

        if !updated.is_empty() {
            self.store
                .update_candidate(candidate)
                .await
                .context("saving enriched candidate")?;
        }
        debug!(candidate_id = %candidate_id, fields = ?updated, "Candidate profile enriched");
        Ok(updated)
    }
}

fn is_blank(value: &Option<String>) -> bool {
    value.as_deref().map_or(true, |v| v.trim().is_empty())
}

/// The candidate's lines with their speaker label removed.
fn candidate_lines(transcript: &str, labels: &[String]) -> Vec<String> {
    transcript
        .lines()
        .filter_map(|line| {
            let trimmed = line.trim_start();
            let lower = trimmed.to_lowercase();
            labels
                .iter()
                .find(|label| lower.starts_with(label.as_str()))
                .and_then(|label| trimmed.get(label.len()..))
                .map(|rest| rest.trim().to_string())
        })
        .collect()
}

/// Pull profile facts out of the candidate's own statements.
pub fn extract_profile(lines: &[String]) -> ExtractedProfile {
    let mut profile = ExtractedProfile::default();

    for line in lines {
        if profile.email.is_none() {
            profile.email = EMAIL_RE.find(line).map(|m| m.as_str().to_lowercase());
        }
        if profile.phone.is_none() {
            profile.phone = PHONE_RE
                .find_iter(line)
                .map(|m| m.as_str().trim().to_string())
                .find(|candidate| {
                    let digits = candidate.chars().filter(char::is_ascii_digit).count();
                    (10..=15).contains(&digits)
                });
        }
        if profile.years_experience.is_none() && line.to_lowercase().contains("experience") {
            profile.years_experience = YEARS_RE
                .captures(line)
                .and_then(|caps| caps.get(1))
                .and_then(|m| m.as_str().parse().ok());
        }
        if profile.current_role.is_none() {
            profile.current_role = ROLE_RE
                .captures(line)
                .and_then(|caps| caps.get(1))
                .map(|m| m.as_str().trim().to_string())
                .filter(|role| !role.is_empty());
        }
        for (regex, name) in SKILL_RES.iter() {
            if regex.is_match(line) && !profile.skills.iter().any(|s| s == name) {
                profile.skills.push(name.to_string());
            }
        }
    }

    profile
}
