//! Nomination committee rounds: justified, permanently identified ballots,
//! results withheld until the whole committee has voted, and chaining of
//! rounds.

use std::collections::{HashMap, HashSet};
use std::time::Instant;

use crate::audit_details;
use crate::error::{Error, Result};
use crate::model::{
    api::election::{
        AdminElectionDescription, CandidateRankStats, JustificationView, NominationBallotView,
        NominationResults,
    },
    common::{
        election::{AnswerId, ElectionId, ElectionStatus},
        principal::Principal,
    },
    db::{Ballot, BallotJustification, Election},
    mongodb::Id,
};
use crate::store::Transaction;

use super::lifecycle::ensure_manager;
use super::stv::{self, round_to, TallyInput};
use super::{finish, Engine};

/// Positions (1-indexed, from the top) that must carry a justification.
pub fn required_positions(election: &Election, ranked_len: usize) -> usize {
    if election.requires_justification {
        (election.justification_required_for_top_n as usize).min(ranked_len)
    } else {
        0
    }
}

/// Check the justifications of a nomination ballot before anything is
/// written.
pub fn validate_justifications(
    election: &Election,
    ranked_answers: &[AnswerId],
    justifications: &HashMap<AnswerId, String>,
    min_length: usize,
) -> Result<()> {
    if let Some(unranked) = justifications
        .keys()
        .find(|candidate| !ranked_answers.contains(candidate))
    {
        return Err(Error::Validation(format!(
            "Justification given for `{unranked}`, who is not ranked"
        )));
    }

    for (position, candidate) in ranked_answers.iter().enumerate() {
        let text = justifications.get(candidate).map(|text| text.trim());
        let required = position < required_positions(election, ranked_answers.len());
        match text {
            None if required => {
                return Err(Error::Validation(format!(
                    "A justification is required for `{candidate}` (rank {})",
                    position + 1
                )))
            }
            Some(text) if text.chars().count() < min_length => {
                return Err(Error::Validation(format!(
                    "The justification for `{candidate}` must be at least {min_length} characters"
                )))
            }
            _ => {}
        }
    }
    Ok(())
}

/// Justification rows for a stored nomination ballot.
pub fn justification_rows(
    election: &Election,
    ballot: &Ballot,
    justifications: &HashMap<AnswerId, String>,
    member_uid: &str,
    voter_name: &str,
) -> Vec<BallotJustification> {
    ballot
        .ranked_answers
        .iter()
        .flatten()
        .enumerate()
        .filter_map(|(position, candidate)| {
            let text = justifications.get(candidate)?;
            Some(BallotJustification {
                id: Id::new(),
                ballot_id: ballot.id,
                election_id: election.id,
                candidate_id: candidate.clone(),
                rank_position: position as u32 + 1,
                justification_text: text.trim().to_string(),
                member_uid: member_uid.to_string(),
                voter_name: voter_name.to_string(),
                submitted_at: ballot.submitted_at,
            })
        })
        .collect()
}

/// Committee members who have cast a ballot.
fn voters(election: &Election, ballots: &[Ballot]) -> HashSet<String> {
    ballots
        .iter()
        .filter_map(|ballot| ballot.member_uid.clone())
        .filter(|uid| election.is_committee_member(uid))
        .collect()
}

/// Refuse while any committee member has yet to vote.
pub fn ensure_committee_complete(election: &Election, ballots: &[Ballot]) -> Result<()> {
    let remaining = election
        .committee_size()
        .saturating_sub(voters(election, ballots).len());
    match remaining {
        0 => Ok(()),
        1 => Err(Error::ResultsUnavailable("1 member remaining".to_string())),
        n => Err(Error::ResultsUnavailable(format!("{n} members remaining"))),
    }
}

fn rank_stats(election: &Election, ranked: &[&Vec<AnswerId>]) -> Vec<CandidateRankStats> {
    let mut stats: Vec<CandidateRankStats> = election
        .answers
        .iter()
        .map(|answer| {
            let positions: Vec<usize> = ranked
                .iter()
                .filter_map(|ballot| ballot.iter().position(|id| *id == answer.id))
                .collect();
            let times_ranked = positions.len() as u64;
            let average_rank = (times_ranked > 0).then(|| {
                let total: usize = positions.iter().map(|position| position + 1).sum();
                round_to(total as f64 / times_ranked as f64, 2)
            });
            CandidateRankStats {
                candidate_id: answer.id.clone(),
                text: answer.text.clone(),
                average_rank,
                first_place_votes: positions.iter().filter(|&&position| position == 0).count()
                    as u64,
                times_ranked,
            }
        })
        .collect();
    stats.sort_by(|a, b| match (a.average_rank, b.average_rank) {
        (Some(a), Some(b)) => a.total_cmp(&b),
        (Some(_), None) => std::cmp::Ordering::Less,
        (None, Some(_)) => std::cmp::Ordering::Greater,
        (None, None) => std::cmp::Ordering::Equal,
    });
    stats
}

/// Full, non-anonymous results of a completed nomination round.
pub fn nomination_results(
    election: &Election,
    ballots: Vec<Ballot>,
    justifications: Vec<BallotJustification>,
) -> NominationResults {
    let votes_cast = voters(election, &ballots).len() as u64;
    let ranked: Vec<&Vec<AnswerId>> = ballots
        .iter()
        .filter_map(|ballot| ballot.ranked_answers.as_ref())
        .collect();
    let candidate_stats = rank_stats(election, &ranked);

    let stv = (election.seats_to_fill > 0).then(|| {
        let candidates = election.candidate_ids();
        let preferences: Vec<Vec<AnswerId>> = ranked.iter().map(|&ballot| ballot.clone()).collect();
        stv::tally(&TallyInput {
            candidates: &candidates,
            seats_to_fill: election.seats_to_fill,
            method: election.ranked_method,
            quota_type: election.quota_type,
            ballots: &preferences,
        })
    });

    let mut by_ballot: HashMap<Id, Vec<JustificationView>> = HashMap::new();
    for justification in justifications {
        by_ballot
            .entry(justification.ballot_id)
            .or_default()
            .push(JustificationView {
                candidate_id: justification.candidate_id,
                rank_position: justification.rank_position,
                text: justification.justification_text,
            });
    }

    let mut views: Vec<NominationBallotView> = ballots
        .into_iter()
        .map(|ballot| {
            let mut justifications = by_ballot.remove(&ballot.id).unwrap_or_default();
            justifications.sort_by_key(|justification| justification.rank_position);
            NominationBallotView {
                ballot_id: ballot.id.to_string(),
                member_uid: ballot.member_uid,
                voter_name: ballot.voter_name,
                ranked_answers: ballot.ranked_answers.unwrap_or_default(),
                submitted_at: ballot.submitted_at,
                justifications,
            }
        })
        .collect();
    views.sort_by(|a, b| a.submitted_at.cmp(&b.submitted_at));

    NominationResults {
        round_number: election.round_number,
        parent_election_id: election.parent_election_id,
        committee_size: election.committee_size() as u64,
        votes_cast,
        seats_to_fill: election.seats_to_fill,
        ballots: views,
        candidate_stats,
        stv,
    }
}

/// The draft that follows a closed round: same candidates, committee, seats
/// and justification rules, linked to the first round of the chain.
pub fn follow_up_round(
    previous: &Election,
    id: ElectionId,
    created_by: &str,
    now: chrono::DateTime<chrono::Utc>,
) -> Election {
    Election {
        id,
        status: ElectionStatus::Draft,
        scheduled_start: None,
        scheduled_end: None,
        closed_at: None,
        round_number: previous.round_number + 1,
        parent_election_id: Some(previous.parent_election_id.unwrap_or(previous.id)),
        anonymized_at: None,
        created_by: created_by.to_string(),
        created_at: now,
        updated_at: now,
        ..previous.clone()
    }
}

impl Engine {
    /// Open a new draft round after a closed one.
    pub async fn next_round(
        &self,
        id: ElectionId,
        principal: &Principal,
    ) -> Result<AdminElectionDescription> {
        let started = Instant::now();
        let mut details = audit_details! {
            "uid" => principal.uid,
            "election_id" => id,
        };
        let result = match ensure_manager(principal) {
            Ok(()) => {
                self.retry_on_contention(move || self.attempt_next_round(id, principal))
                    .await
            }
            Err(err) => Err(err),
        };
        if let Ok(next) = &result {
            details.insert("new_election_id".to_string(), next.id.into());
            details.insert("round_number".to_string(), next.round_number.into());
        }
        self.audit("next_round", started, details, &result);
        result.map(AdminElectionDescription::from)
    }

    async fn attempt_next_round(&self, id: ElectionId, principal: &Principal) -> Result<Election> {
        let mut tx = self.store.begin().await?;
        let result = self.open_next_round(tx.as_mut(), id, principal).await;
        finish(tx, result).await
    }

    async fn open_next_round(
        &self,
        tx: &mut dyn Transaction,
        id: ElectionId,
        principal: &Principal,
    ) -> Result<Election> {
        let previous = tx
            .lock_election(id)
            .await?
            .filter(Election::is_nomination)
            .ok_or_else(|| Error::not_found(format!("Nomination round {id}")))?;
        if previous.status != ElectionStatus::Closed {
            return Err(Error::Conflict(format!(
                "A new round can only follow a closed round; this one is {}",
                previous.status
            )));
        }
        let next_id = tx.next_election_id().await?;
        let next = follow_up_round(&previous, next_id, &principal.uid, self.clock.now());
        tx.insert_election(&next).await?;
        Ok(next)
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;
    use crate::engine::{eligibility::Surface, lifecycle::Transition, testing::Harness};
    use crate::model::{
        api::{election::ResultsDetail, vote::NominationVoteRequest},
        common::election::VotingType,
    };

    fn texts(ids: &[&str]) -> HashMap<AnswerId, String> {
        ids.iter()
            .map(|id| (id.to_string(), format!("{id} is an outstanding organiser")))
            .collect()
    }

    fn ranked(ids: &[&str]) -> Vec<AnswerId> {
        ids.iter().map(|id| id.to_string()).collect()
    }

    #[test]
    fn top_positions_need_long_enough_justifications() {
        let election = Election::nomination_example(1);
        let ballot = ranked(&["A", "B", "C"]);
        assert!(validate_justifications(&election, &ballot, &texts(&["A", "B"]), 10).is_ok());
        assert!(validate_justifications(&election, &ballot, &texts(&["A"]), 10).is_err());

        let mut short = texts(&["A"]);
        short.insert("B".to_string(), "   ok   ".to_string());
        assert!(validate_justifications(&election, &ballot, &short, 10).is_err());
    }

    #[test]
    fn justification_for_unranked_candidate_is_rejected() {
        let election = Election::nomination_example(1);
        let result =
            validate_justifications(&election, &ranked(&["A", "B"]), &texts(&["A", "B", "D"]), 10);
        assert!(matches!(result, Err(Error::Validation(_))));
    }

    #[test]
    fn short_ballot_only_justifies_what_it_ranks() {
        let election = Election::nomination_example(1);
        assert_eq!(required_positions(&election, 1), 1);
        assert!(validate_justifications(&election, &ranked(&["C"]), &texts(&["C"]), 10).is_ok());
    }

    #[test]
    fn follow_up_round_links_to_the_first_round() {
        let mut first = Election::nomination_example(1).with_status(ElectionStatus::Closed);
        first.closed_at = Some(first.created_at);
        let second = follow_up_round(&first, 2, "manager", first.created_at);
        assert_eq!(second.status, ElectionStatus::Draft);
        assert_eq!(second.round_number, 2);
        assert_eq!(second.parent_election_id, Some(1));
        assert_eq!(second.committee_member_uids, first.committee_member_uids);
        assert_eq!(second.closed_at, None);

        let third = follow_up_round(&second, 3, "manager", first.created_at);
        assert_eq!(third.round_number, 3);
        assert_eq!(third.parent_election_id, Some(1));
    }

    async fn vote(harness: &Harness, uid: &str, order: &[&str]) {
        let request = NominationVoteRequest {
            ranked_answers: ranked(order),
            justifications: texts(&order[..2.min(order.len())]),
            voter_name: Some(format!("Voter {uid}")),
        };
        harness
            .engine
            .submit_nomination_vote(1, &Principal::member(uid), request)
            .await
            .unwrap();
    }

    #[rocket::async_test]
    async fn results_wait_for_the_whole_committee() {
        let harness = Harness::new();
        harness.insert(Election::nomination_example(1)).await;
        vote(&harness, "c1", &["A", "B", "C"]).await;
        vote(&harness, "c2", &["B", "A"]).await;

        harness.clock.advance(Duration::days(8));
        let pending = harness
            .engine
            .results(1, &Principal::member("c1"), Surface::Nomination)
            .await;
        match pending {
            Err(Error::ResultsUnavailable(message)) => assert_eq!(message, "1 member remaining"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[rocket::async_test]
    async fn complete_round_reveals_identities_and_statistics() {
        let harness = Harness::new();
        harness.insert(Election::nomination_example(1)).await;
        vote(&harness, "c1", &["A", "B", "C"]).await;
        vote(&harness, "c2", &["B", "A"]).await;
        vote(&harness, "c3", &["A", "C", "B"]).await;

        let open = harness
            .engine
            .results(1, &Principal::member("c3"), Surface::Nomination)
            .await;
        assert!(matches!(open, Err(Error::ResultsUnavailable(_))));

        harness
            .engine
            .transition(1, &Principal::manager(), Transition::Close)
            .await
            .unwrap();
        let results = harness
            .engine
            .results(1, &Principal::member("c3"), Surface::Nomination)
            .await
            .unwrap();
        assert_eq!(results.voting_type, VotingType::NominationCommittee);
        let ResultsDetail::Nomination(detail) = results.detail else {
            panic!("expected nomination results");
        };
        assert_eq!(detail.votes_cast, 3);
        assert_eq!(detail.ballots.len(), 3);
        assert!(detail
            .ballots
            .iter()
            .any(|ballot| ballot.voter_name.as_deref() == Some("Voter c2")));
        assert_eq!(detail.ballots[0].justifications.len(), 2);

        let a = &detail.candidate_stats[0];
        assert_eq!(a.candidate_id, "A");
        assert_eq!(a.average_rank, Some(1.33));
        assert_eq!(a.first_place_votes, 2);
        let d = detail.candidate_stats.last().unwrap();
        assert_eq!(d.candidate_id, "D");
        assert_eq!(d.average_rank, None);

        let stv = detail.stv.unwrap();
        assert_eq!(stv.winners.len(), 2);
        assert_eq!(stv.winners[0], "A");
    }

    #[rocket::async_test]
    async fn next_round_requires_a_closed_round() {
        let harness = Harness::new();
        harness.insert(Election::nomination_example(1)).await;
        let manager = Principal::manager();

        let early = harness.engine.next_round(1, &manager).await;
        assert!(matches!(early, Err(Error::Conflict(_))));

        harness
            .engine
            .transition(1, &manager, Transition::Close)
            .await
            .unwrap();
        let next = harness.engine.next_round(1, &manager).await.unwrap();
        assert_eq!(next.description.round_number, 2);
        assert_eq!(next.description.parent_election_id, Some(1));
        assert_eq!(next.description.status, ElectionStatus::Draft);

        let refused = harness.engine.next_round(1, &Principal::member("c1")).await;
        assert!(matches!(refused, Err(Error::Eligibility(_))));
        assert_eq!(harness.audit.events_for("next_round").len(), 3);
    }
}
