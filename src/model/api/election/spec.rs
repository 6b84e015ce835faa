use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::model::{
    common::election::{
        Answer, ElectionId, ElectionStatus, Eligibility, MemberUid, QuotaType, RankedMethod,
        VotingType,
    },
    db::Election,
};

fn one() -> u32 {
    1
}

fn yes() -> bool {
    true
}

/// An election definition, as submitted by an election manager.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ElectionSpec {
    pub title: String,
    pub question: String,
    pub answers: Vec<Answer>,
    pub voting_type: VotingType,
    #[serde(default)]
    pub scheduled_start: Option<DateTime<Utc>>,
    #[serde(default)]
    pub scheduled_end: Option<DateTime<Utc>>,
    /// Multi-choice cap; defaults to the number of answers.
    #[serde(default)]
    pub max_selections: Option<u32>,
    #[serde(default = "one")]
    pub seats_to_fill: u32,
    #[serde(default)]
    pub ranked_method: RankedMethod,
    #[serde(default)]
    pub quota_type: QuotaType,
    #[serde(default)]
    pub eligibility: Eligibility,
    #[serde(default)]
    pub hidden: bool,
    #[serde(default)]
    pub committee_member_uids: Vec<MemberUid>,
    #[serde(default)]
    pub requires_justification: bool,
    #[serde(default)]
    pub justification_required_for_top_n: u32,
}

impl ElectionSpec {
    /// Check the definition is internally consistent.
    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: &str| Err(Error::Validation(msg.to_string()));

        if self.title.trim().is_empty() {
            return invalid("Title must not be empty");
        }
        if self.question.trim().is_empty() {
            return invalid("Question must not be empty");
        }
        if self.answers.is_empty() {
            return invalid("An election needs at least one answer");
        }
        let mut ids = HashSet::new();
        for answer in &self.answers {
            if answer.id.trim().is_empty() {
                return invalid("Answer IDs must not be empty");
            }
            if !ids.insert(answer.id.as_str()) {
                return Err(Error::Validation(format!(
                    "Duplicate answer ID {}",
                    answer.id
                )));
            }
        }
        if let (Some(start), Some(end)) = (self.scheduled_start, self.scheduled_end) {
            if start >= end {
                return invalid("Scheduled start must be before scheduled end");
            }
        }

        let answer_count = self.answers.len() as u32;
        match self.voting_type {
            VotingType::SingleChoice => {}
            VotingType::MultiChoice => {
                if let Some(max) = self.max_selections {
                    if max == 0 || max > answer_count {
                        return invalid("max_selections must be between 1 and the number of answers");
                    }
                }
            }
            VotingType::RankedChoice => {
                if self.seats_to_fill == 0 || self.seats_to_fill > answer_count {
                    return invalid("seats_to_fill must be between 1 and the number of candidates");
                }
            }
            VotingType::NominationCommittee => {
                if self.seats_to_fill > answer_count {
                    return invalid("seats_to_fill must not exceed the number of candidates");
                }
                if self.committee_member_uids.is_empty() {
                    return invalid("A nomination committee needs at least one member");
                }
                let members: HashSet<_> = self.committee_member_uids.iter().collect();
                if members.len() != self.committee_member_uids.len() {
                    return invalid("Committee members must be unique");
                }
                if self.justification_required_for_top_n > answer_count {
                    return invalid(
                        "justification_required_for_top_n must not exceed the number of candidates",
                    );
                }
            }
        }
        if self.voting_type != VotingType::NominationCommittee
            && !self.committee_member_uids.is_empty()
        {
            return invalid("Only nomination elections have a committee");
        }

        Ok(())
    }

    /// Convert this spec into a new draft election with the given ID.
    pub fn into_election(
        self,
        id: ElectionId,
        created_by: MemberUid,
        now: DateTime<Utc>,
    ) -> Election {
        let mut election = Election {
            id,
            title: String::new(),
            question: String::new(),
            answers: Vec::new(),
            voting_type: self.voting_type,
            status: ElectionStatus::Draft,
            scheduled_start: None,
            scheduled_end: None,
            closed_at: None,
            max_selections: None,
            seats_to_fill: 1,
            ranked_method: RankedMethod::default(),
            quota_type: QuotaType::default(),
            eligibility: Eligibility::default(),
            hidden: false,
            committee_member_uids: Vec::new(),
            requires_justification: false,
            justification_required_for_top_n: 0,
            round_number: 1,
            parent_election_id: None,
            anonymized_at: None,
            created_by,
            created_at: now,
            updated_at: now,
        };
        self.apply_to(&mut election, now);
        election
    }

    /// Overwrite the definition of an existing (draft) election.
    pub fn apply_to(self, election: &mut Election, now: DateTime<Utc>) {
        let is_nomination = self.voting_type == VotingType::NominationCommittee;
        election.max_selections = match self.voting_type {
            VotingType::MultiChoice => Some(
                self.max_selections
                    .unwrap_or(self.answers.len() as u32),
            ),
            _ => None,
        };
        election.seats_to_fill = match self.voting_type {
            VotingType::SingleChoice | VotingType::MultiChoice => 1,
            _ => self.seats_to_fill,
        };
        election.title = self.title.trim().to_string();
        election.question = self.question.trim().to_string();
        election.answers = self.answers;
        election.voting_type = self.voting_type;
        election.scheduled_start = self.scheduled_start;
        election.scheduled_end = self.scheduled_end;
        election.ranked_method = self.ranked_method;
        election.quota_type = self.quota_type;
        election.eligibility = self.eligibility;
        election.hidden = self.hidden;
        election.committee_member_uids = self.committee_member_uids;
        election.requires_justification = is_nomination && self.requires_justification;
        election.justification_required_for_top_n = if election.requires_justification {
            self.justification_required_for_top_n
        } else {
            0
        };
        election.updated_at = now;
    }
}

/// A nomination round definition, submitted through the nomination surface.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NominationSpec {
    pub title: String,
    pub question: String,
    pub answers: Vec<Answer>,
    pub committee_member_uids: Vec<MemberUid>,
    #[serde(default)]
    pub scheduled_start: Option<DateTime<Utc>>,
    #[serde(default)]
    pub scheduled_end: Option<DateTime<Utc>>,
    #[serde(default = "one")]
    pub seats_to_fill: u32,
    #[serde(default)]
    pub ranked_method: RankedMethod,
    #[serde(default)]
    pub quota_type: QuotaType,
    #[serde(default = "yes")]
    pub requires_justification: bool,
    #[serde(default)]
    pub justification_required_for_top_n: u32,
    #[serde(default)]
    pub hidden: bool,
}

impl From<NominationSpec> for ElectionSpec {
    fn from(spec: NominationSpec) -> Self {
        Self {
            title: spec.title,
            question: spec.question,
            answers: spec.answers,
            voting_type: VotingType::NominationCommittee,
            scheduled_start: spec.scheduled_start,
            scheduled_end: spec.scheduled_end,
            max_selections: None,
            seats_to_fill: spec.seats_to_fill,
            ranked_method: spec.ranked_method,
            quota_type: spec.quota_type,
            eligibility: Eligibility::OpenToAll,
            hidden: spec.hidden,
            committee_member_uids: spec.committee_member_uids,
            requires_justification: spec.requires_justification,
            justification_required_for_top_n: spec.justification_required_for_top_n,
        }
    }
}

/// Example data for tests.
#[cfg(test)]
mod examples {
    use chrono::Duration;

    use super::*;
    use crate::model::db::election::examples::{answers, example_now};

    impl ElectionSpec {
        pub fn single_choice_example() -> Self {
            let now = example_now();
            Self {
                title: "Chair of the board".to_string(),
                question: "Who should chair the board?".to_string(),
                answers: answers(&["A", "B"]),
                voting_type: VotingType::SingleChoice,
                scheduled_start: Some(now - Duration::hours(1)),
                scheduled_end: Some(now + Duration::days(7)),
                max_selections: None,
                seats_to_fill: 1,
                ranked_method: RankedMethod::Stv,
                quota_type: QuotaType::Droop,
                eligibility: Eligibility::OpenToAll,
                hidden: false,
                committee_member_uids: Vec::new(),
                requires_justification: false,
                justification_required_for_top_n: 0,
            }
        }

        pub fn ranked_example() -> Self {
            Self {
                title: "Council seat".to_string(),
                answers: answers(&["A", "B", "C"]),
                voting_type: VotingType::RankedChoice,
                ..Self::single_choice_example()
            }
        }
    }

    impl NominationSpec {
        pub fn example() -> Self {
            let now = example_now();
            Self {
                title: "Nominations for the list".to_string(),
                question: "Rank the candidates".to_string(),
                answers: answers(&["A", "B", "C", "D"]),
                committee_member_uids: vec!["c1".into(), "c2".into(), "c3".into()],
                scheduled_start: Some(now - Duration::hours(1)),
                scheduled_end: Some(now + Duration::days(7)),
                seats_to_fill: 2,
                ranked_method: RankedMethod::Stv,
                quota_type: QuotaType::Droop,
                requires_justification: true,
                justification_required_for_top_n: 2,
                hidden: false,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::db::election::examples::{answers, example_now};

    #[test]
    fn rejects_duplicate_answer_ids() {
        let mut spec = ElectionSpec::single_choice_example();
        spec.answers = answers(&["A", "A"]);
        assert!(matches!(spec.validate(), Err(Error::Validation(_))));
    }

    #[test]
    fn rejects_inverted_window() {
        let mut spec = ElectionSpec::single_choice_example();
        std::mem::swap(&mut spec.scheduled_start, &mut spec.scheduled_end);
        assert!(spec.validate().is_err());
    }

    #[test]
    fn ranked_seats_must_fit_candidates() {
        let mut spec = ElectionSpec::ranked_example();
        spec.seats_to_fill = 4;
        assert!(spec.validate().is_err());
        spec.seats_to_fill = 0;
        assert!(spec.validate().is_err());
        spec.seats_to_fill = 3;
        assert!(spec.validate().is_ok());
    }

    #[test]
    fn committee_only_for_nominations() {
        let mut spec = ElectionSpec::single_choice_example();
        spec.committee_member_uids = vec!["c1".into()];
        assert!(spec.validate().is_err());

        let nomination = ElectionSpec::from(NominationSpec::example());
        assert!(nomination.validate().is_ok());
    }

    #[test]
    fn new_elections_start_as_first_round_drafts() {
        let now = example_now();
        let election =
            ElectionSpec::from(NominationSpec::example()).into_election(7, "manager".into(), now);
        assert_eq!(election.id, 7);
        assert_eq!(election.status, ElectionStatus::Draft);
        assert_eq!(election.round_number, 1);
        assert_eq!(election.parent_election_id, None);
        assert!(election.requires_justification);
        assert_eq!(election.justification_required_for_top_n, 2);
    }

    #[test]
    fn multi_choice_cap_defaults_to_answer_count() {
        let mut spec = ElectionSpec::single_choice_example();
        spec.voting_type = VotingType::MultiChoice;
        spec.answers = answers(&["A", "B", "C"]);
        let election = spec.into_election(1, "manager".into(), example_now());
        assert_eq!(election.max_selections, Some(3));
    }

    #[test]
    fn rejects_unknown_fields() {
        let body = r#"{"title": "t", "question": "q", "answers": [], "voting_type": "single-choice", "bogus": 1}"#;
        assert!(rocket::serde::json::serde_json::from_str::<ElectionSpec>(body).is_err());
    }
}
