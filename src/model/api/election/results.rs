use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::engine::stv::TallyOutcome;
use crate::model::common::election::{
    Answer, AnswerId, ElectionId, ElectionStatus, MemberUid, VotingType,
};

/// Results of an election, once they may be served.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ElectionResults {
    pub election_id: ElectionId,
    pub title: String,
    pub voting_type: VotingType,
    pub status: ElectionStatus,
    #[serde(flatten)]
    pub detail: ResultsDetail,
}

/// The voting-type specific part of the results.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ResultsDetail {
    Choice(ChoiceResults),
    Ranked(RankedResults),
    Nomination(NominationResults),
}

/// Vote count for one answer.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnswerTally {
    pub answer_id: AnswerId,
    pub text: String,
    pub votes: u64,
    /// Share of all recorded selections, rounded to one decimal place.
    pub percentage: f64,
}

/// Single- and multi-choice results.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChoiceResults {
    /// Distinct voters (members or tokens) who cast a ballot.
    pub total_voters: u64,
    /// Selections recorded across all ballots.
    pub total_votes: u64,
    /// Every answer, most votes first.
    pub answers: Vec<AnswerTally>,
    /// The unique most-voted answer; `None` on a tie or with no votes.
    pub winner: Option<AnswerId>,
}

/// Ranked-choice results.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RankedResults {
    pub seats_to_fill: u32,
    pub candidates: Vec<Answer>,
    pub total_ballots: u64,
    #[serde(flatten)]
    pub tally: TallyOutcome,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JustificationView {
    pub candidate_id: AnswerId,
    pub rank_position: u32,
    pub text: String,
}

/// One committee member's ballot, with identity.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NominationBallotView {
    pub ballot_id: String,
    pub member_uid: Option<MemberUid>,
    pub voter_name: Option<String>,
    pub ranked_answers: Vec<AnswerId>,
    pub submitted_at: DateTime<Utc>,
    pub justifications: Vec<JustificationView>,
}

/// How a candidate fared across committee ballots.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CandidateRankStats {
    pub candidate_id: AnswerId,
    pub text: String,
    /// Mean 1-indexed position over the ballots that ranked the candidate.
    pub average_rank: Option<f64>,
    pub first_place_votes: u64,
    pub times_ranked: u64,
}

/// Nomination committee results.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NominationResults {
    pub round_number: u32,
    pub parent_election_id: Option<ElectionId>,
    pub committee_size: u64,
    pub votes_cast: u64,
    pub seats_to_fill: u32,
    pub ballots: Vec<NominationBallotView>,
    /// Best average rank first; unranked candidates last.
    pub candidate_stats: Vec<CandidateRankStats>,
    /// Present when the round fills seats.
    pub stv: Option<TallyOutcome>,
}
