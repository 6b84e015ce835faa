use chrono::{DateTime, Utc};
use mongodb::bson::serde_helpers::chrono_datetime_as_bson_datetime;
use serde::{Deserialize, Serialize};

use crate::model::common::election::{
    Answer, AnswerId, ElectionId, ElectionStatus, Eligibility, MemberUid, QuotaType,
    RankedMethod, VotingType,
};

/// Election data, as stored in the database.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Election {
    /// Unique ID.
    #[serde(rename = "_id")]
    pub id: ElectionId,
    pub title: String,
    pub question: String,
    /// Candidates / possible answers, in display order.
    pub answers: Vec<Answer>,
    pub voting_type: VotingType,
    pub status: ElectionStatus,
    pub scheduled_start: Option<DateTime<Utc>>,
    pub scheduled_end: Option<DateTime<Utc>>,
    /// When the election was explicitly closed, if it was.
    pub closed_at: Option<DateTime<Utc>>,
    /// Multi-choice selection cap.
    pub max_selections: Option<u32>,
    /// Ranked-choice and nomination seat count.
    pub seats_to_fill: u32,
    pub ranked_method: RankedMethod,
    pub quota_type: QuotaType,
    pub eligibility: Eligibility,
    pub hidden: bool,
    /// Nomination committee members; empty for other voting types.
    pub committee_member_uids: Vec<MemberUid>,
    pub requires_justification: bool,
    pub justification_required_for_top_n: u32,
    pub round_number: u32,
    /// The first round of a chain of nomination rounds.
    pub parent_election_id: Option<ElectionId>,
    /// Set once, when ballot identities are irreversibly pseudonymised.
    pub anonymized_at: Option<DateTime<Utc>>,
    pub created_by: MemberUid,
    #[serde(with = "chrono_datetime_as_bson_datetime")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "chrono_datetime_as_bson_datetime")]
    pub updated_at: DateTime<Utc>,
}

impl Election {
    pub fn answer(&self, id: &str) -> Option<&Answer> {
        self.answers.iter().find(|answer| answer.id == id)
    }

    pub fn candidate_ids(&self) -> Vec<AnswerId> {
        self.answers.iter().map(|answer| answer.id.clone()).collect()
    }

    pub fn is_nomination(&self) -> bool {
        self.voting_type == VotingType::NominationCommittee
    }

    pub fn is_committee_member(&self, uid: &str) -> bool {
        self.committee_member_uids.iter().any(|member| member == uid)
    }

    /// Number of members expected to vote in a nomination round.
    pub fn committee_size(&self) -> usize {
        self.committee_member_uids.len()
    }

    /// Voting has finished, whether or not the stored status says so yet:
    /// explicitly closed/archived, past the scheduled end, or past an
    /// explicit close time.
    pub fn is_dynamically_closed(&self, now: DateTime<Utc>) -> bool {
        self.status.is_final()
            || self.scheduled_end.map_or(false, |end| now > end)
            || self.closed_at.map_or(false, |closed| now > closed)
    }
}

/// Example test data.
#[cfg(test)]
pub mod examples {
    use chrono::{Duration, TimeZone};

    use super::*;

    /// A fixed "now" shared by the examples and the test clock.
    pub fn example_now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
    }

    pub fn answers(ids: &[&str]) -> Vec<Answer> {
        ids.iter()
            .map(|id| Answer {
                id: id.to_string(),
                text: format!("Candidate {id}"),
            })
            .collect()
    }

    impl Election {
        /// A published single-choice election open for another week.
        pub fn single_choice_example(id: ElectionId) -> Self {
            let now = example_now();
            Self {
                id,
                title: "Chair of the board".to_string(),
                question: "Who should chair the board?".to_string(),
                answers: answers(&["A", "B"]),
                voting_type: VotingType::SingleChoice,
                status: ElectionStatus::Published,
                scheduled_start: Some(now - Duration::days(1)),
                scheduled_end: Some(now + Duration::days(7)),
                closed_at: None,
                max_selections: None,
                seats_to_fill: 1,
                ranked_method: RankedMethod::Stv,
                quota_type: QuotaType::Droop,
                eligibility: Eligibility::OpenToAll,
                hidden: false,
                committee_member_uids: Vec::new(),
                requires_justification: false,
                justification_required_for_top_n: 0,
                round_number: 1,
                parent_election_id: None,
                anonymized_at: None,
                created_by: "manager".to_string(),
                created_at: now - Duration::days(2),
                updated_at: now - Duration::days(2),
            }
        }

        pub fn multi_choice_example(id: ElectionId) -> Self {
            Self {
                title: "Policy priorities".to_string(),
                answers: answers(&["A", "B", "C", "D"]),
                voting_type: VotingType::MultiChoice,
                max_selections: Some(2),
                ..Self::single_choice_example(id)
            }
        }

        pub fn ranked_example(id: ElectionId) -> Self {
            Self {
                title: "Council seat".to_string(),
                answers: answers(&["A", "B", "C"]),
                voting_type: VotingType::RankedChoice,
                ..Self::single_choice_example(id)
            }
        }

        pub fn nomination_example(id: ElectionId) -> Self {
            Self {
                title: "Nominations for the list".to_string(),
                answers: answers(&["A", "B", "C", "D"]),
                voting_type: VotingType::NominationCommittee,
                seats_to_fill: 2,
                committee_member_uids: vec!["c1".into(), "c2".into(), "c3".into()],
                requires_justification: true,
                justification_required_for_top_n: 2,
                ..Self::single_choice_example(id)
            }
        }

        pub fn with_status(mut self, status: ElectionStatus) -> Self {
            self.status = status;
            self
        }
    }
}
