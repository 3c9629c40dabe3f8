//! Poll ballots and tallies.
//!
//! The engine is the in-memory ledger: one immutable ballot per
//! `(poll, voter)` plus a running count per option. [`PollService`] wraps it
//! with durable storage and undoes a ballot whose write failed.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock};

use metrics::counter;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::application::repos::{PollsRepo, RepoError};
use crate::domain::polls::{Ballot, PollDefinition, PollId, VoterId};
use crate::util::lock::{read_guard, write_guard};

pub(crate) const METRIC_VOTES: &str = "blotter_poll_votes_total";

const OWNER: &str = "application::polls::PollEngine";

#[derive(Debug, Error)]
pub enum PollError {
    #[error("voter `{voter}` already voted in poll `{poll}`")]
    AlreadyVoted { poll: PollId, voter: VoterId },
    #[error("unknown poll `{0}`")]
    UnknownPoll(PollId),
    #[error("poll `{poll}` has no option `{option}`")]
    UnknownOption { poll: PollId, option: String },
    #[error("failed to persist ballot: {0}")]
    Storage(#[from] RepoError),
}

impl PollError {
    /// Expected steady-state rejections, as opposed to failures.
    pub fn is_rejection(&self) -> bool {
        !matches!(self, PollError::Storage(_))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OptionCount {
    pub option: String,
    pub count: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PollTally {
    pub poll_id: PollId,
    /// Defined options in order, then any counted option no longer defined.
    pub counts: Vec<OptionCount>,
    pub total: u64,
}

impl PollTally {
    pub fn count_for(&self, option: &str) -> u64 {
        self.counts
            .iter()
            .find(|entry| entry.option == option)
            .map(|entry| entry.count)
            .unwrap_or(0)
    }
}

/// What a voter is shown. Counts are deliberately absent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PollView {
    pub definition: PollDefinition,
    pub has_voted: bool,
    pub selected: Option<String>,
}

#[derive(Debug, Default)]
struct Ledger {
    definitions: HashMap<PollId, PollDefinition>,
    ballots: BTreeMap<(PollId, VoterId), Ballot>,
    counts: HashMap<PollId, BTreeMap<String, u64>>,
}

impl Ledger {
    fn apply(&mut self, ballot: Ballot) {
        *self
            .counts
            .entry(ballot.poll_id.clone())
            .or_default()
            .entry(ballot.option.clone())
            .or_insert(0) += 1;
        self.ballots
            .insert((ballot.poll_id.clone(), ballot.voter_id.clone()), ballot);
    }
}

#[derive(Debug, Default)]
pub struct PollEngine {
    ledger: RwLock<Ledger>,
}

impl PollEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register or refresh a poll parsed from document text.
    pub fn register(&self, definition: PollDefinition) {
        write_guard(&self.ledger, OWNER, "register")
            .definitions
            .insert(definition.id.clone(), definition);
    }

    pub fn definition(&self, poll: &PollId) -> Option<PollDefinition> {
        read_guard(&self.ledger, OWNER, "definition")
            .definitions
            .get(poll)
            .cloned()
    }

    /// Replay ballots loaded from storage. Duplicates are skipped.
    pub fn restore(&self, ballots: impl IntoIterator<Item = Ballot>) -> usize {
        let mut ledger = write_guard(&self.ledger, OWNER, "restore");
        let mut restored = 0;
        for ballot in ballots {
            let key = (ballot.poll_id.clone(), ballot.voter_id.clone());
            if ledger.ballots.contains_key(&key) {
                warn!(
                    target = "application::polls",
                    poll = %ballot.poll_id,
                    voter = %ballot.voter_id,
                    "Skipping duplicate stored ballot"
                );
                continue;
            }
            ledger.apply(ballot);
            restored += 1;
        }
        restored
    }

    pub fn vote(&self, poll: &PollId, voter: &VoterId, option: &str) -> Result<Ballot, PollError> {
        let mut ledger = write_guard(&self.ledger, OWNER, "vote");

        let definition = ledger
            .definitions
            .get(poll)
            .ok_or_else(|| PollError::UnknownPoll(poll.clone()))?;
        if !definition.has_option(option) {
            return Err(PollError::UnknownOption {
                poll: poll.clone(),
                option: option.to_string(),
            });
        }
        if ledger.ballots.contains_key(&(poll.clone(), voter.clone())) {
            return Err(PollError::AlreadyVoted {
                poll: poll.clone(),
                voter: voter.clone(),
            });
        }

        let ballot = Ballot::new(poll.clone(), voter.clone(), option);
        ledger.apply(ballot.clone());
        counter!(METRIC_VOTES).increment(1);
        debug!(target = "application::polls", poll = %poll, "Recorded ballot");
        Ok(ballot)
    }

    /// Undo a ballot that could not be persisted.
    pub(crate) fn retract(&self, ballot: &Ballot) {
        let mut ledger = write_guard(&self.ledger, OWNER, "retract");
        let key = (ballot.poll_id.clone(), ballot.voter_id.clone());
        if ledger.ballots.remove(&key).is_none() {
            return;
        }
        if let Some(count) = ledger
            .counts
            .get_mut(&ballot.poll_id)
            .and_then(|counts| counts.get_mut(&ballot.option))
        {
            *count = count.saturating_sub(1);
        }
    }

    pub fn has_voted(&self, poll: &PollId, voter: &VoterId) -> bool {
        read_guard(&self.ledger, OWNER, "has_voted")
            .ballots
            .contains_key(&(poll.clone(), voter.clone()))
    }

    pub fn tally(&self, poll: &PollId) -> Result<PollTally, PollError> {
        let ledger = read_guard(&self.ledger, OWNER, "tally");
        let definition = ledger.definitions.get(poll);
        let counted = ledger.counts.get(poll);
        if definition.is_none() && counted.is_none() {
            return Err(PollError::UnknownPoll(poll.clone()));
        }

        let mut counts: Vec<OptionCount> = definition
            .map(|definition| {
                definition
                    .options
                    .iter()
                    .map(|option| OptionCount {
                        option: option.clone(),
                        count: counted
                            .and_then(|counts| counts.get(option))
                            .copied()
                            .unwrap_or(0),
                    })
                    .collect()
            })
            .unwrap_or_default();

        if let Some(counted) = counted {
            for (option, count) in counted {
                if *count > 0 && !counts.iter().any(|entry| &entry.option == option) {
                    counts.push(OptionCount {
                        option: option.clone(),
                        count: *count,
                    });
                }
            }
        }

        let total = counts.iter().map(|entry| entry.count).sum();
        Ok(PollTally {
            poll_id: poll.clone(),
            counts,
            total,
        })
    }

    pub fn view(&self, poll: &PollId, voter: Option<&VoterId>) -> Option<PollView> {
        let ledger = read_guard(&self.ledger, OWNER, "view");
        let definition = ledger.definitions.get(poll)?.clone();
        let selected = voter.and_then(|voter| {
            ledger
                .ballots
                .get(&(poll.clone(), voter.clone()))
                .map(|ballot| ballot.option.clone())
        });
        Some(PollView {
            definition,
            has_voted: selected.is_some(),
            selected,
        })
    }
}

/// Poll engine backed by durable ballot storage.
pub struct PollService {
    engine: Arc<PollEngine>,
    repo: Arc<dyn PollsRepo>,
}

impl PollService {
    pub fn new(engine: Arc<PollEngine>, repo: Arc<dyn PollsRepo>) -> Self {
        Self { engine, repo }
    }

    pub fn engine(&self) -> &Arc<PollEngine> {
        &self.engine
    }

    pub async fn hydrate(&self) -> Result<usize, PollError> {
        let ballots = self.repo.load_ballots().await?;
        let restored = self.engine.restore(ballots);
        info!(target = "application::polls", restored, "Restored ballots");
        Ok(restored)
    }

    /// Cast a ballot and persist it; a failed write leaves no trace in the
    /// ledger so the vote can be retried.
    pub async fn vote(
        &self,
        poll: &PollId,
        voter: &VoterId,
        option: &str,
    ) -> Result<Ballot, PollError> {
        let ballot = self.engine.vote(poll, voter, option)?;
        if let Err(err) = self.repo.record_ballot(&ballot).await {
            self.engine.retract(&ballot);
            warn!(
                target = "application::polls",
                poll = %poll,
                error = %err,
                "Ballot could not be persisted; rolled back"
            );
            return Err(PollError::Storage(err));
        }
        Ok(ballot)
    }

    pub fn tally(&self, poll: &PollId) -> Result<PollTally, PollError> {
        self.engine.tally(poll)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn colours() -> PollDefinition {
        PollDefinition {
            id: PollId::new("poll-colour-1"),
            question: "Colour?".into(),
            options: vec!["Red".into(), "Blue".into()],
        }
    }

    #[test]
    fn second_vote_is_rejected_and_leaves_tally_unchanged() {
        let engine = PollEngine::new();
        engine.register(colours());
        let poll = colours().id;
        let voter = VoterId::new("v1");

        engine.vote(&poll, &voter, "Red").expect("first vote");
        let before = engine.tally(&poll).expect("tally");
        let second = engine.vote(&poll, &voter, "Blue");

        assert!(matches!(second, Err(PollError::AlreadyVoted { .. })));
        assert_eq!(engine.tally(&poll).expect("tally"), before);
        assert_eq!(before.count_for("Red"), 1);
        assert_eq!(before.count_for("Blue"), 0);
        assert!(engine.has_voted(&poll, &voter));
    }

    #[test]
    fn unknown_polls_and_options_are_rejected() {
        let engine = PollEngine::new();
        engine.register(colours());
        let voter = VoterId::new("v1");

        assert!(matches!(
            engine.vote(&PollId::new("nope"), &voter, "Red"),
            Err(PollError::UnknownPoll(_))
        ));
        assert!(matches!(
            engine.vote(&colours().id, &voter, "Green"),
            Err(PollError::UnknownOption { .. })
        ));
        assert!(!engine.has_voted(&colours().id, &voter));
    }

    #[test]
    fn tally_lists_every_option_in_order() {
        let engine = PollEngine::new();
        engine.register(colours());
        engine
            .vote(&colours().id, &VoterId::new("a"), "Blue")
            .expect("vote");
        engine
            .vote(&colours().id, &VoterId::new("b"), "Blue")
            .expect("vote");

        let tally = engine.tally(&colours().id).expect("tally");
        let options: Vec<_> = tally.counts.iter().map(|c| c.option.as_str()).collect();
        assert_eq!(options, ["Red", "Blue"]);
        assert_eq!(tally.total, 2);
    }

    #[test]
    fn restored_ballots_count_and_block_revotes() {
        let engine = PollEngine::new();
        engine.register(colours());
        let stored = Ballot::new(colours().id, VoterId::new("old"), "Red");
        assert_eq!(engine.restore([stored.clone(), stored]), 1);

        assert!(matches!(
            engine.vote(&colours().id, &VoterId::new("old"), "Blue"),
            Err(PollError::AlreadyVoted { .. })
        ));
        assert_eq!(engine.tally(&colours().id).expect("tally").count_for("Red"), 1);
    }

    #[test]
    fn view_hides_counts_but_reports_selection() {
        let engine = PollEngine::new();
        engine.register(colours());
        let voter = VoterId::new("v");
        engine.vote(&colours().id, &voter, "Red").expect("vote");

        let view = engine.view(&colours().id, Some(&voter)).expect("view");
        assert!(view.has_voted);
        assert_eq!(view.selected.as_deref(), Some("Red"));

        let anonymous = engine.view(&colours().id, None).expect("view");
        assert!(!anonymous.has_voted);
    }

    #[test]
    fn retract_restores_previous_state() {
        let engine = PollEngine::new();
        engine.register(colours());
        let voter = VoterId::new("v");
        let ballot = engine.vote(&colours().id, &voter, "Red").expect("vote");

        engine.retract(&ballot);
        assert!(!engine.has_voted(&colours().id, &voter));
        assert_eq!(engine.tally(&colours().id).expect("tally").total, 0);
    }
}
