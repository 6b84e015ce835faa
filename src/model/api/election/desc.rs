use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::{
    common::election::{
        Answer, ElectionId, ElectionStatus, Eligibility, MemberUid, QuotaType, RankedMethod,
        VotingType,
    },
    db::Election,
};

/// A summary of an election as listed to a member.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ElectionSummary {
    pub id: ElectionId,
    pub title: String,
    pub question: String,
    pub voting_type: VotingType,
    pub status: ElectionStatus,
    pub scheduled_start: Option<DateTime<Utc>>,
    pub scheduled_end: Option<DateTime<Utc>>,
    pub round_number: u32,
    /// Whether the caller has already voted in this election.
    pub has_voted: bool,
}

impl ElectionSummary {
    pub fn new(election: Election, has_voted: bool) -> Self {
        Self {
            id: election.id,
            title: election.title,
            question: election.question,
            voting_type: election.voting_type,
            status: election.status,
            scheduled_start: election.scheduled_start,
            scheduled_end: election.scheduled_end,
            round_number: election.round_number,
            has_voted,
        }
    }
}

/// The full member-facing description of an election.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ElectionDescription {
    pub id: ElectionId,
    pub title: String,
    pub question: String,
    pub answers: Vec<Answer>,
    pub voting_type: VotingType,
    pub status: ElectionStatus,
    pub scheduled_start: Option<DateTime<Utc>>,
    pub scheduled_end: Option<DateTime<Utc>>,
    pub max_selections: Option<u32>,
    pub seats_to_fill: u32,
    pub ranked_method: RankedMethod,
    pub quota_type: QuotaType,
    pub committee_member_uids: Vec<MemberUid>,
    pub requires_justification: bool,
    pub justification_required_for_top_n: u32,
    pub round_number: u32,
    pub parent_election_id: Option<ElectionId>,
    pub has_voted: bool,
}

impl ElectionDescription {
    pub fn new(election: Election, has_voted: bool) -> Self {
        Self {
            id: election.id,
            title: election.title,
            question: election.question,
            answers: election.answers,
            voting_type: election.voting_type,
            status: election.status,
            scheduled_start: election.scheduled_start,
            scheduled_end: election.scheduled_end,
            max_selections: election.max_selections,
            seats_to_fill: election.seats_to_fill,
            ranked_method: election.ranked_method,
            quota_type: election.quota_type,
            committee_member_uids: election.committee_member_uids,
            requires_justification: election.requires_justification,
            justification_required_for_top_n: election.justification_required_for_top_n,
            round_number: election.round_number,
            parent_election_id: election.parent_election_id,
            has_voted,
        }
    }
}

/// Everything an election manager sees about an election.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AdminElectionDescription {
    #[serde(flatten)]
    pub description: ElectionDescription,
    pub eligibility: Eligibility,
    pub hidden: bool,
    pub closed_at: Option<DateTime<Utc>>,
    pub anonymized_at: Option<DateTime<Utc>>,
    pub created_by: MemberUid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<Election> for AdminElectionDescription {
    fn from(election: Election) -> Self {
        let eligibility = election.eligibility.clone();
        let hidden = election.hidden;
        let closed_at = election.closed_at;
        let anonymized_at = election.anonymized_at;
        let created_by = election.created_by.clone();
        let created_at = election.created_at;
        let updated_at = election.updated_at;
        Self {
            description: ElectionDescription::new(election, false),
            eligibility,
            hidden,
            closed_at,
            anonymized_at,
            created_by,
            created_at,
            updated_at,
        }
    }
}
