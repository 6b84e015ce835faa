//! Structural validation of submitted choices, per voting type.
//!
//! Everything here is pure and runs before a transaction is opened, so a
//! rejected ballot never touches the store.

use std::collections::{HashMap, HashSet};

use crate::error::{Error, Result};
use crate::model::{
    common::election::{AnswerId, VotingType},
    db::Election,
};

/// A ballot as submitted, in one of the shapes the engine understands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BallotRequest {
    SingleChoice {
        answer_id: AnswerId,
    },
    MultiChoice {
        answer_ids: Vec<AnswerId>,
    },
    RankedChoice {
        ranked_answers: Vec<AnswerId>,
    },
    Nomination {
        ranked_answers: Vec<AnswerId>,
        /// Justification text by candidate ID.
        justifications: HashMap<AnswerId, String>,
        voter_name: Option<String>,
    },
}

impl BallotRequest {
    pub fn voting_type(&self) -> VotingType {
        match self {
            Self::SingleChoice { .. } => VotingType::SingleChoice,
            Self::MultiChoice { .. } => VotingType::MultiChoice,
            Self::RankedChoice { .. } => VotingType::RankedChoice,
            Self::Nomination { .. } => VotingType::NominationCommittee,
        }
    }

    /// Number of candidates selected or ranked.
    pub fn selection_count(&self) -> usize {
        match self {
            Self::SingleChoice { .. } => 1,
            Self::MultiChoice { answer_ids } => answer_ids.len(),
            Self::RankedChoice { ranked_answers } | Self::Nomination { ranked_answers, .. } => {
                ranked_answers.len()
            }
        }
    }
}

fn ensure_known(election: &Election, answer_id: &str) -> Result<()> {
    match election.answer(answer_id) {
        Some(_) => Ok(()),
        None => Err(Error::Validation(format!(
            "`{answer_id}` is not a candidate in this election"
        ))),
    }
}

/// Reject a list naming any answer twice. Needs no election, so it can run
/// before the store is touched.
pub fn ensure_unique(answer_ids: &[AnswerId]) -> Result<()> {
    let mut seen = HashSet::with_capacity(answer_ids.len());
    for answer_id in answer_ids {
        if !seen.insert(answer_id.as_str()) {
            return Err(Error::Validation(format!(
                "`{answer_id}` appears more than once"
            )));
        }
    }
    Ok(())
}

pub fn validate_single_choice(election: &Election, answer_id: &str) -> Result<()> {
    ensure_known(election, answer_id)
}

pub fn validate_multi_choice(election: &Election, answer_ids: &[AnswerId]) -> Result<()> {
    let max = election
        .max_selections
        .map_or(election.answers.len(), |max| max as usize);
    if answer_ids.is_empty() || answer_ids.len() > max {
        return Err(Error::Validation(format!(
            "Select between 1 and {max} answers"
        )));
    }
    ensure_unique(answer_ids)?;
    answer_ids
        .iter()
        .try_for_each(|answer_id| ensure_known(election, answer_id))
}

pub fn validate_ranked(election: &Election, ranked_answers: &[AnswerId]) -> Result<()> {
    let max = election.answers.len();
    if ranked_answers.is_empty() || ranked_answers.len() > max {
        return Err(Error::Validation(format!(
            "Rank between 1 and {max} candidates"
        )));
    }
    ensure_unique(ranked_answers)?;
    ranked_answers
        .iter()
        .try_for_each(|answer_id| ensure_known(election, answer_id))
}

/// Check that the ballot has the shape the election's voting type expects.
///
/// Nomination justifications are checked separately, by
/// [`super::nomination::validate_justifications`].
pub fn validate_ballot(election: &Election, request: &BallotRequest) -> Result<()> {
    if request.voting_type() != election.voting_type {
        return Err(Error::Validation(format!(
            "This is a {} election",
            election.voting_type
        )));
    }
    match request {
        BallotRequest::SingleChoice { answer_id } => validate_single_choice(election, answer_id),
        BallotRequest::MultiChoice { answer_ids } => validate_multi_choice(election, answer_ids),
        BallotRequest::RankedChoice { ranked_answers }
        | BallotRequest::Nomination { ranked_answers, .. } => {
            validate_ranked(election, ranked_answers)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(ids: &[&str]) -> Vec<AnswerId> {
        ids.iter().map(|id| id.to_string()).collect()
    }

    #[test]
    fn single_choice_must_name_a_candidate() {
        let election = Election::single_choice_example(1);
        assert!(validate_single_choice(&election, "A").is_ok());
        assert!(matches!(
            validate_single_choice(&election, "Z"),
            Err(Error::Validation(_))
        ));
    }

    #[test]
    fn multi_choice_respects_cap_and_uniqueness() {
        let election = Election::multi_choice_example(1);
        assert!(validate_multi_choice(&election, &ids(&["A", "C"])).is_ok());
        assert!(validate_multi_choice(&election, &ids(&[])).is_err());
        assert!(validate_multi_choice(&election, &ids(&["A", "B", "C"])).is_err());
        assert!(validate_multi_choice(&election, &ids(&["A", "A"])).is_err());
        assert!(validate_multi_choice(&election, &ids(&["A", "Z"])).is_err());
    }

    #[test]
    fn multi_choice_without_cap_allows_every_answer() {
        let mut election = Election::multi_choice_example(1);
        election.max_selections = None;
        assert!(validate_multi_choice(&election, &ids(&["A", "B", "C", "D"])).is_ok());
    }

    #[test]
    fn ranked_rejects_duplicates_anywhere() {
        let election = Election::ranked_example(1);
        assert!(validate_ranked(&election, &ids(&["C", "A"])).is_ok());
        assert!(validate_ranked(&election, &ids(&["A", "B", "A"])).is_err());
        assert!(validate_ranked(&election, &ids(&["A", "B", "C", "D"])).is_err());
        assert!(validate_ranked(&election, &ids(&[])).is_err());
    }

    #[test]
    fn ballot_shape_must_match_election() {
        let election = Election::ranked_example(1);
        let request = BallotRequest::MultiChoice {
            answer_ids: ids(&["A"]),
        };
        assert!(matches!(
            validate_ballot(&election, &request),
            Err(Error::Validation(_))
        ));

        let request = BallotRequest::RankedChoice {
            ranked_answers: ids(&["B", "A"]),
        };
        assert!(validate_ballot(&election, &request).is_ok());
        assert_eq!(request.selection_count(), 2);
    }
}
