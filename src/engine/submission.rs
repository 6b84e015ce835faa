//! Exactly-once ballot submission.
//!
//! Member ballots serialize on the election lock, so the duplicate check and
//! the insert see the same state. Token ballots lock only the token, without
//! waiting.

use std::time::Instant;

use chrono::{DateTime, Utc};
use data_encoding::HEXLOWER;
use sha2::{Digest, Sha256};

use crate::audit::AuditDetails;
use crate::audit_details;
use crate::error::{Error, Result};
use crate::model::{
    api::vote::{IssuedToken, NominationVoteRequest, TokenVoteRequest, VoteReceipt, VoteRequest},
    common::{
        election::{ElectionId, VotingType},
        principal::Principal,
    },
    db::{Ballot, Election, TokenRegistration, Voter, VotingToken},
};
use crate::store::Transaction;

use super::answers::{validate_ballot, BallotRequest};
use super::eligibility::{ensure_eligible, ensure_visible, validate_voting_window, Surface};
use super::{finish, nomination, Engine};

/// Hex SHA-256 of a voting token. Only this is ever stored.
pub fn token_hash(token: &str) -> String {
    HEXLOWER.encode(&Sha256::digest(token.as_bytes()))
}

fn new_token() -> String {
    HEXLOWER.encode(&rand::random::<[u8; 32]>())
}

fn answer_text(election: &Election, answer_id: &str) -> String {
    election
        .answer(answer_id)
        .map(|answer| answer.text.clone())
        .unwrap_or_default()
}

/// The rows recording a validated ballot: one per selected answer for choice
/// ballots, a single row for ranked ones.
fn ballot_rows(
    election: &Election,
    voter: &Voter,
    request: &BallotRequest,
    now: DateTime<Utc>,
) -> Vec<Ballot> {
    let choice = |answer_id: &String| {
        Ballot::choice(
            election.id,
            voter,
            answer_id.clone(),
            answer_text(election, answer_id),
            now,
        )
    };
    match request {
        BallotRequest::SingleChoice { answer_id } => vec![choice(answer_id)],
        BallotRequest::MultiChoice { answer_ids } => answer_ids.iter().map(choice).collect(),
        BallotRequest::RankedChoice { ranked_answers }
        | BallotRequest::Nomination { ranked_answers, .. } => {
            vec![Ballot::ranked(election.id, voter, ranked_answers.clone(), now)]
        }
    }
}

fn receipt(ballots: &[Ballot]) -> VoteReceipt {
    VoteReceipt {
        ballot_ids: ballots.iter().map(|ballot| ballot.id.to_string()).collect(),
    }
}

impl Engine {
    /// Cast a member's single-, multi- or ranked-choice ballot.
    pub async fn submit_vote(
        &self,
        id: ElectionId,
        principal: &Principal,
        request: VoteRequest,
    ) -> Result<VoteReceipt> {
        let distinct = request.ensure_distinct();
        self.cast_audited(
            "vote",
            id,
            principal,
            Surface::Member,
            distinct,
            move |voting_type| request.into_ballot(voting_type),
        )
        .await
    }

    /// Cast a committee member's ranked, justified and permanently
    /// identified nomination ballot.
    pub async fn submit_nomination_vote(
        &self,
        id: ElectionId,
        principal: &Principal,
        request: NominationVoteRequest,
    ) -> Result<VoteReceipt> {
        let distinct = request.ensure_distinct();
        self.cast_audited(
            "nomination_vote",
            id,
            principal,
            Surface::Nomination,
            distinct,
            move |_| Ok(request.into()),
        )
        .await
    }

    /// Audit a submission whose body could not be read, and hand back the
    /// error to answer with. `action` names the submission as the engine's
    /// own audit events do.
    pub fn reject_submission(
        &self,
        action: &str,
        id: ElectionId,
        principal: Option<&Principal>,
        err: Error,
    ) -> Error {
        let mut details = audit_details! { "election_id" => id };
        if let Some(principal) = principal {
            details.insert("uid".to_string(), principal.uid.clone().into());
        }
        self.audit_outcome(action, Instant::now(), details, Some(&err));
        err
    }

    async fn cast_audited<F>(
        &self,
        action: &str,
        id: ElectionId,
        principal: &Principal,
        surface: Surface,
        distinct: Result<()>,
        into_ballot: F,
    ) -> Result<VoteReceipt>
    where
        F: FnOnce(VotingType) -> Result<BallotRequest> + Send,
    {
        let started = Instant::now();
        let mut details = audit_details! {
            "uid" => principal.uid,
            "election_id" => id,
        };
        let result = match distinct {
            Ok(()) => {
                self.cast(id, principal, surface, into_ballot, &mut details)
                    .await
            }
            Err(err) => Err(err),
        };
        self.audit(action, started, details, &result);
        result
    }

    async fn cast<F>(
        &self,
        id: ElectionId,
        principal: &Principal,
        surface: Surface,
        into_ballot: F,
        details: &mut AuditDetails,
    ) -> Result<VoteReceipt>
    where
        F: FnOnce(VotingType) -> Result<BallotRequest> + Send,
    {
        // Everything that can be rejected without the store is rejected here,
        // before a transaction exists. Repeated answers were already caught
        // before the election was read.
        let election = self.visible_election(id, principal, surface).await?;
        details.insert("voting_type".to_string(), election.voting_type.as_str().into());
        validate_voting_window(&election, self.clock.now()).into_result()?;
        let ballot = into_ballot(election.voting_type)?;
        details.insert("selections".to_string(), ballot.selection_count().into());
        self.validate_request(&election, &ballot)?;

        let ballot = &ballot;
        let receipt = self
            .retry_on_contention(move || self.attempt_member_vote(id, principal, ballot, surface))
            .await?;
        details.insert("ballots".to_string(), receipt.ballot_ids.len().into());
        Ok(receipt)
    }

    fn validate_request(&self, election: &Election, ballot: &BallotRequest) -> Result<()> {
        validate_ballot(election, ballot)?;
        if let BallotRequest::Nomination {
            ranked_answers,
            justifications,
            ..
        } = ballot
        {
            nomination::validate_justifications(
                election,
                ranked_answers,
                justifications,
                self.settings.min_justification_length,
            )?;
        }
        Ok(())
    }

    async fn attempt_member_vote(
        &self,
        id: ElectionId,
        principal: &Principal,
        ballot: &BallotRequest,
        surface: Surface,
    ) -> Result<VoteReceipt> {
        let mut tx = self.store.begin().await?;
        let result = self
            .record_member_ballot(tx.as_mut(), id, principal, ballot, surface)
            .await;
        finish(tx, result).await
    }

    async fn record_member_ballot(
        &self,
        tx: &mut dyn Transaction,
        id: ElectionId,
        principal: &Principal,
        ballot: &BallotRequest,
        surface: Surface,
    ) -> Result<VoteReceipt> {
        // The election may have changed since the checks above.
        let election = ensure_visible(tx.lock_election(id).await?, id, surface)?;
        ensure_eligible(&election, principal)?;
        let now = self.clock.now();
        validate_voting_window(&election, now).into_result()?;
        self.validate_request(&election, ballot)?;

        if tx.has_ballot(id, &principal.uid).await? {
            return Err(Error::Conflict(
                "You have already voted in this election".to_string(),
            ));
        }
        if tx.has_token_registration(id, &principal.uid).await? {
            return Err(Error::Conflict(
                "You were issued a voting token for this election; vote with the token".to_string(),
            ));
        }

        let voter = Voter::Member(principal.uid.clone());
        let mut rows = ballot_rows(&election, &voter, ballot, now);
        let mut justifications = Vec::new();
        if let BallotRequest::Nomination {
            justifications: texts,
            voter_name,
            ..
        } = ballot
        {
            let name = principal.display_name(voter_name.as_deref());
            rows = rows
                .into_iter()
                .map(|row| row.preserving_identity(name.clone()))
                .collect();
            for row in &rows {
                justifications.extend(nomination::justification_rows(
                    &election,
                    row,
                    texts,
                    &principal.uid,
                    &name,
                ));
            }
        }

        let receipt = receipt(&rows);
        tx.insert_ballots(rows).await?;
        if !justifications.is_empty() {
            tx.insert_justifications(justifications).await?;
        }
        Ok(receipt)
    }

    /// Issue a single-use voting token. A member gets at most one per
    /// election, and none once they have voted directly.
    pub async fn issue_token(&self, id: ElectionId, principal: &Principal) -> Result<IssuedToken> {
        let started = Instant::now();
        let details = audit_details! {
            "uid" => principal.uid,
            "election_id" => id,
        };
        let result = self.issue_token_inner(id, principal).await;
        self.audit("issue_token", started, details, &result);
        result
    }

    async fn issue_token_inner(&self, id: ElectionId, principal: &Principal) -> Result<IssuedToken> {
        let election = self.visible_election(id, principal, Surface::Member).await?;
        validate_voting_window(&election, self.clock.now()).into_result()?;
        self.retry_on_contention(move || self.attempt_issue_token(id, principal))
            .await
    }

    async fn attempt_issue_token(&self, id: ElectionId, principal: &Principal) -> Result<IssuedToken> {
        let mut tx = self.store.begin().await?;
        let result = self.register_token(tx.as_mut(), id, principal).await;
        finish(tx, result).await
    }

    async fn register_token(
        &self,
        tx: &mut dyn Transaction,
        id: ElectionId,
        principal: &Principal,
    ) -> Result<IssuedToken> {
        let election = ensure_visible(tx.lock_election(id).await?, id, Surface::Member)?;
        ensure_eligible(&election, principal)?;
        let now = self.clock.now();
        validate_voting_window(&election, now).into_result()?;

        if tx.has_ballot(id, &principal.uid).await? {
            return Err(Error::Conflict(
                "You have already voted in this election".to_string(),
            ));
        }
        if tx.has_token_registration(id, &principal.uid).await? {
            return Err(Error::Conflict(
                "A voting token was already issued to you for this election".to_string(),
            ));
        }

        let token = new_token();
        tx.register_token(
            TokenRegistration::new(id, principal.uid.clone(), now),
            VotingToken::new(token_hash(&token), id, now),
        )
        .await?;
        Ok(IssuedToken { token })
    }

    /// Cast an anonymous ballot with a voting token. The token row is locked
    /// without waiting: a concurrent use of the same token fails immediately
    /// and is not retried.
    pub async fn submit_token_vote(
        &self,
        id: ElectionId,
        request: TokenVoteRequest,
    ) -> Result<VoteReceipt> {
        let started = Instant::now();
        let mut details = audit_details! { "election_id" => id };
        let result = self.submit_token_vote_inner(id, request, &mut details).await;
        self.audit("token_vote", started, details, &result);
        result
    }

    async fn submit_token_vote_inner(
        &self,
        id: ElectionId,
        request: TokenVoteRequest,
        details: &mut AuditDetails,
    ) -> Result<VoteReceipt> {
        let (token, vote) = request.into_parts();
        vote.ensure_distinct()?;
        let hash = token_hash(&token);

        let election = ensure_visible(self.store.election(id).await?, id, Surface::Member)?;
        details.insert("voting_type".to_string(), election.voting_type.as_str().into());
        validate_voting_window(&election, self.clock.now()).into_result()?;
        let ballot = vote.into_ballot(election.voting_type)?;
        details.insert("selections".to_string(), ballot.selection_count().into());
        validate_ballot(&election, &ballot)?;

        let mut tx = self.store.begin().await?;
        let result = self.record_token_ballot(tx.as_mut(), id, &hash, &ballot).await;
        let receipt = finish(tx, result).await?;
        details.insert("ballots".to_string(), receipt.ballot_ids.len().into());
        Ok(receipt)
    }

    async fn record_token_ballot(
        &self,
        tx: &mut dyn Transaction,
        id: ElectionId,
        hash: &str,
        ballot: &BallotRequest,
    ) -> Result<VoteReceipt> {
        let election = ensure_visible(tx.election(id).await?, id, Surface::Member)?;
        let now = self.clock.now();
        validate_voting_window(&election, now).into_result()?;
        validate_ballot(&election, ballot)?;

        match tx.lock_token(hash).await? {
            Some(token) if token.election_id != id => {
                return Err(Error::Eligibility(
                    "This voting token is not valid for this election".to_string(),
                ))
            }
            Some(token) if token.used => {
                return Err(Error::Conflict(
                    "This voting token has already been used".to_string(),
                ))
            }
            Some(_) => {}
            None => return Err(Error::Eligibility("Unknown voting token".to_string())),
        }

        let rows = ballot_rows(&election, &Voter::Token(hash.to_string()), ballot, now);
        let receipt = receipt(&rows);
        tx.insert_ballots(rows).await?;
        tx.mark_token_used(hash, now).await?;
        Ok(receipt)
    }
}
