use std::collections::HashSet;

use crate::error::{Error, Result};
use crate::model::{
    api::election::{
        AnswerTally, ChoiceResults, ElectionResults, RankedResults, ResultsDetail,
    },
    common::{
        election::{ElectionId, VotingType},
        principal::Principal,
    },
    db::{Ballot, Election},
};

use super::eligibility::Surface;
use super::nomination::{ensure_committee_complete, nomination_results};
use super::stv::{self, percentage, TallyInput};
use super::Engine;

/// Who cast a row: the member, or the token for anonymous ballots.
fn voter_key(ballot: &Ballot) -> Option<&str> {
    ballot
        .member_uid
        .as_deref()
        .or(ballot.token_hash.as_deref())
}

/// Per-answer counts of a single- or multi-choice election.
pub fn choice_results(election: &Election, ballots: &[Ballot]) -> ChoiceResults {
    let counted: Vec<&Ballot> = ballots
        .iter()
        .filter(|ballot| {
            ballot
                .answer_id
                .as_deref()
                .map_or(false, |answer_id| election.answer(answer_id).is_some())
        })
        .collect();
    let total_votes = counted.len() as u64;
    let total_voters = counted
        .iter()
        .filter_map(|ballot| voter_key(ballot))
        .collect::<HashSet<_>>()
        .len() as u64;

    let mut answers: Vec<AnswerTally> = election
        .answers
        .iter()
        .map(|answer| {
            let votes = counted
                .iter()
                .filter(|ballot| ballot.answer_id.as_deref() == Some(answer.id.as_str()))
                .count() as u64;
            AnswerTally {
                answer_id: answer.id.clone(),
                text: answer.text.clone(),
                votes,
                percentage: percentage(votes, total_votes),
            }
        })
        .collect();
    answers.sort_by(|a, b| b.votes.cmp(&a.votes));

    // A winner needs a strictly larger count than everyone else.
    let winner = match answers.as_slice() {
        [first, second, ..] if first.votes == second.votes => None,
        [first, ..] if first.votes > 0 => Some(first.answer_id.clone()),
        _ => None,
    };

    ChoiceResults {
        total_voters,
        total_votes,
        answers,
        winner,
    }
}

/// STV (or plurality) count of a ranked-choice election.
pub fn ranked_results(election: &Election, ballots: &[Ballot]) -> RankedResults {
    let preferences: Vec<_> = ballots
        .iter()
        .filter_map(|ballot| ballot.ranked_answers.clone())
        .collect();
    let candidates = election.candidate_ids();
    let tally = stv::tally(&TallyInput {
        candidates: &candidates,
        seats_to_fill: election.seats_to_fill,
        method: election.ranked_method,
        quota_type: election.quota_type,
        ballots: &preferences,
    });
    RankedResults {
        seats_to_fill: election.seats_to_fill,
        candidates: election.answers.clone(),
        total_ballots: preferences.len() as u64,
        tally,
    }
}

impl Engine {
    /// Results of an election, served only once voting has finished.
    pub async fn results(
        &self,
        id: ElectionId,
        principal: &Principal,
        surface: Surface,
    ) -> Result<ElectionResults> {
        let election = self.visible_election(id, principal, surface).await?;
        if !election.is_dynamically_closed(self.clock.now()) {
            return Err(Error::ResultsUnavailable(
                "Results are published once voting has closed".to_string(),
            ));
        }

        let ballots = self.store.ballots(id).await?;
        let detail = match election.voting_type {
            VotingType::SingleChoice | VotingType::MultiChoice => {
                ResultsDetail::Choice(choice_results(&election, &ballots))
            }
            VotingType::RankedChoice => ResultsDetail::Ranked(ranked_results(&election, &ballots)),
            VotingType::NominationCommittee => {
                ensure_committee_complete(&election, &ballots)?;
                let justifications = self.store.justifications(id).await?;
                ResultsDetail::Nomination(nomination_results(&election, ballots, justifications))
            }
        };
        debug!("Served results of election {id}");

        Ok(ElectionResults {
            election_id: election.id,
            title: election.title,
            voting_type: election.voting_type,
            status: election.status,
            detail,
        })
    }
}
