//! Poll definitions and ballots.

use std::fmt;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use super::slug::truncated_slug;

/// Maximum length of the question slug embedded in a poll id.
pub const POLL_SLUG_MAX_LEN: usize = 32;

/// Deterministic poll identifier derived from content and position.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PollId(String);

impl PollId {
    /// Derive the id for a poll found on `line` (1-based) with the given question.
    ///
    /// The same question on the same line always yields the same id, so votes
    /// survive re-parsing unchanged text.
    pub fn derive(question: &str, line: usize) -> Self {
        let slug = truncated_slug(question, POLL_SLUG_MAX_LEN).unwrap_or_else(|| "poll".into());
        Self(format!("poll-{slug}-{line}"))
    }

    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PollId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Locally generated, unauthenticated voter pseudo-identity.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VoterId(String);

impl VoterId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for VoterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Poll embedded in a document via `[POLL:Question|A|B]`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollDefinition {
    pub id: PollId,
    pub question: String,
    pub options: Vec<String>,
}

impl PollDefinition {
    pub fn has_option(&self, option: &str) -> bool {
        self.options.iter().any(|candidate| candidate == option)
    }
}

/// One immutable vote.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ballot {
    pub poll_id: PollId,
    pub voter_id: VoterId,
    pub option: String,
    #[serde(with = "time::serde::rfc3339")]
    pub cast_at: OffsetDateTime,
}

impl Ballot {
    pub fn new(poll_id: PollId, voter_id: VoterId, option: impl Into<String>) -> Self {
        Self {
            poll_id,
            voter_id,
            option: option.into(),
            cast_at: OffsetDateTime::now_utc(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_voters_are_distinct() {
        let first = VoterId::generate();
        let second = VoterId::generate();
        assert_ne!(first, second);
        assert_eq!(first.as_str().len(), 36);
    }

    #[test]
    fn poll_id_is_stable_for_same_question_and_line() {
        let first = PollId::derive("What is your favourite colour?", 12);
        let second = PollId::derive("What is your favourite colour?", 12);
        assert_eq!(first, second);
        assert_eq!(first.as_str(), "poll-what-is-your-favourite-colour-12");
    }

    #[test]
    fn poll_id_changes_with_position() {
        assert_ne!(PollId::derive("Tea?", 3), PollId::derive("Tea?", 4));
    }

    #[test]
    fn poll_id_falls_back_for_symbol_only_questions() {
        assert_eq!(PollId::derive("???", 1).as_str(), "poll-poll-1");
    }

    #[test]
    fn long_questions_are_truncated() {
        let id = PollId::derive(
            "Which of the following extremely long options would you pick today",
            7,
        );
        let slug = id
            .as_str()
            .strip_prefix("poll-")
            .and_then(|rest| rest.strip_suffix("-7"))
            .expect("shape");
        assert!(slug.len() <= POLL_SLUG_MAX_LEN, "{slug}");
        assert!(!slug.ends_with('-'));
    }
}
