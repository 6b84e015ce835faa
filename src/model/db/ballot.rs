use chrono::{DateTime, DurationRound, Utc};
use mongodb::bson::serde_helpers::chrono_datetime_as_bson_datetime;
use serde::{Deserialize, Serialize};

use crate::model::{
    common::election::{AnswerId, ElectionId, MemberUid},
    mongodb::Id,
};

/// A recorded ballot row, as stored in the database.
///
/// Single- and multi-choice ballots store one row per selected answer
/// (`answer_id`/`answer` set); ranked ballots store a single row carrying the
/// whole preference list in `ranked_answers`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ballot {
    #[serde(rename = "_id")]
    pub id: Id,
    pub election_id: ElectionId,
    /// The voter, or their pseudonym after anonymization.
    /// Absent for ballots cast with a voting token.
    pub member_uid: Option<MemberUid>,
    /// Hash of the voting token this ballot was cast with, if any.
    pub token_hash: Option<String>,
    pub answer_id: Option<AnswerId>,
    /// Snapshot of the answer text at submission time.
    pub answer: Option<String>,
    pub ranked_answers: Option<Vec<AnswerId>>,
    /// Nomination ballots keep the voter's identity forever.
    pub preserve_voter_identity: bool,
    /// Display name captured at submission, for identity-preserving ballots.
    pub voter_name: Option<String>,
    #[serde(with = "chrono_datetime_as_bson_datetime")]
    pub submitted_at: DateTime<Utc>,
}

/// Who cast a ballot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Voter {
    Member(MemberUid),
    Token(String),
}

impl Ballot {
    fn new(election_id: ElectionId, voter: &Voter, submitted_at: DateTime<Utc>) -> Self {
        let (member_uid, token_hash) = match voter {
            Voter::Member(uid) => (Some(uid.clone()), None),
            Voter::Token(hash) => (None, Some(hash.clone())),
        };
        Self {
            id: Id::new(),
            election_id,
            member_uid,
            token_hash,
            answer_id: None,
            answer: None,
            ranked_answers: None,
            preserve_voter_identity: false,
            voter_name: None,
            submitted_at: truncate_to_minute(submitted_at),
        }
    }

    /// A row for one selected answer of a single- or multi-choice ballot.
    pub fn choice(
        election_id: ElectionId,
        voter: &Voter,
        answer_id: AnswerId,
        answer_text: String,
        submitted_at: DateTime<Utc>,
    ) -> Self {
        Self {
            answer_id: Some(answer_id),
            answer: Some(answer_text),
            ..Self::new(election_id, voter, submitted_at)
        }
    }

    /// The single row of a ranked ballot.
    pub fn ranked(
        election_id: ElectionId,
        voter: &Voter,
        ranked_answers: Vec<AnswerId>,
        submitted_at: DateTime<Utc>,
    ) -> Self {
        Self {
            ranked_answers: Some(ranked_answers),
            ..Self::new(election_id, voter, submitted_at)
        }
    }

    /// Mark this ballot as permanently identified with its voter.
    pub fn preserving_identity(mut self, voter_name: String) -> Self {
        self.preserve_voter_identity = true;
        self.voter_name = Some(voter_name);
        self
    }
}

/// Drop seconds and below, so submission times cannot be used to correlate
/// ballots with request logs.
pub fn truncate_to_minute(at: DateTime<Utc>) -> DateTime<Utc> {
    at.duration_trunc(chrono::Duration::minutes(1)).unwrap_or(at)
}
