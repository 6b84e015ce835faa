use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::engine::answers::{ensure_unique, BallotRequest};
use crate::error::{Error, Result};
use crate::model::common::election::{AnswerId, VotingType};

/// Body of a member's vote.
///
/// Exactly one of the fields is expected, matching the election's voting type.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct VoteRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub answer_ids: Option<Vec<AnswerId>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ranked_answers: Option<Vec<AnswerId>>,
}

impl VoteRequest {
    /// Structural checks that need no election.
    pub fn ensure_distinct(&self) -> Result<()> {
        for answer_ids in [&self.answer_ids, &self.ranked_answers].into_iter().flatten() {
            ensure_unique(answer_ids)?;
        }
        Ok(())
    }

    /// Interpret the body as the ballot variant for the given voting type.
    pub fn into_ballot(self, voting_type: VotingType) -> Result<BallotRequest> {
        match (voting_type, self.answer_ids, self.ranked_answers) {
            (VotingType::SingleChoice, Some(mut answer_ids), None) => {
                if answer_ids.len() != 1 {
                    return Err(Error::Validation(
                        "Single-choice ballots select exactly one answer".to_string(),
                    ));
                }
                Ok(BallotRequest::SingleChoice {
                    answer_id: answer_ids.remove(0),
                })
            }
            (VotingType::MultiChoice, Some(answer_ids), None) => {
                Ok(BallotRequest::MultiChoice { answer_ids })
            }
            (VotingType::RankedChoice, None, Some(ranked_answers)) => {
                Ok(BallotRequest::RankedChoice { ranked_answers })
            }
            (VotingType::NominationCommittee, _, _) => Err(Error::Validation(
                "Nomination ballots are cast through the nomination surface".to_string(),
            )),
            (VotingType::RankedChoice, _, _) => Err(Error::Validation(
                "Ranked-choice ballots must provide `ranked_answers` only".to_string(),
            )),
            (_, _, _) => Err(Error::Validation(
                "Choice ballots must provide `answer_ids` only".to_string(),
            )),
        }
    }
}

/// Body of a nomination committee member's vote.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NominationVoteRequest {
    pub ranked_answers: Vec<AnswerId>,
    /// Justification text by candidate ID.
    #[serde(default)]
    pub justifications: HashMap<AnswerId, String>,
    /// Name to record instead of the identity claim's.
    #[serde(default)]
    pub voter_name: Option<String>,
}

impl NominationVoteRequest {
    /// Structural checks that need no election.
    pub fn ensure_distinct(&self) -> Result<()> {
        ensure_unique(&self.ranked_answers)
    }
}

impl From<NominationVoteRequest> for BallotRequest {
    fn from(request: NominationVoteRequest) -> Self {
        BallotRequest::Nomination {
            ranked_answers: request.ranked_answers,
            justifications: request.justifications,
            voter_name: request.voter_name,
        }
    }
}

/// Body of an anonymous vote cast with a voting token.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TokenVoteRequest {
    pub token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub answer_ids: Option<Vec<AnswerId>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ranked_answers: Option<Vec<AnswerId>>,
}

impl TokenVoteRequest {
    /// Split into the token and the vote proper.
    pub fn into_parts(self) -> (String, VoteRequest) {
        (
            self.token,
            VoteRequest {
                answer_ids: self.answer_ids,
                ranked_answers: self.ranked_answers,
            },
        )
    }
}

/// Returned after a successful vote.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteReceipt {
    pub ballot_ids: Vec<String>,
}

/// Returned once when a member requests a voting token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssuedToken {
    pub token: String,
}
