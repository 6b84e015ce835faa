//! Persistence for elections, ballots, justifications and voting tokens.
//!
//! All writes go through a [`Transaction`]: either every write in it becomes
//! visible at [`Transaction::commit`], or none does. Dropping a transaction
//! without committing discards it.

mod memory;
mod mongo;

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use mongodb::bson::{doc, Document};

use crate::error::Result;
use crate::model::{
    common::election::{ElectionId, ElectionStatus, MemberUid, VotingType},
    db::{Ballot, BallotJustification, Election, TokenRegistration, VotingToken},
};

pub use memory::MemoryStore;
pub use mongo::MongoStore;

/// Which elections to list.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ElectionFilter {
    /// Only these statuses; all statuses if `None`.
    pub statuses: Option<Vec<ElectionStatus>>,
    /// `Some(true)` for nomination rounds only, `Some(false)` to exclude them.
    pub nomination: Option<bool>,
    pub include_hidden: bool,
    /// Only elections whose committee includes this member.
    pub committee_member: Option<MemberUid>,
}

impl ElectionFilter {
    /// Elections a member may see in listings.
    pub fn member_visible() -> Self {
        Self {
            statuses: Some(ElectionStatus::MEMBER_VISIBLE.to_vec()),
            ..Self::default()
        }
    }

    pub fn with_status(mut self, status: Option<ElectionStatus>) -> Self {
        if let Some(status) = status {
            let allowed = self.statuses.map_or(true, |statuses| statuses.contains(&status));
            self.statuses = Some(if allowed { vec![status] } else { Vec::new() });
        }
        self
    }

    pub fn matches(&self, election: &Election) -> bool {
        self.statuses
            .as_ref()
            .map_or(true, |statuses| statuses.contains(&election.status))
            && self
                .nomination
                .map_or(true, |nomination| election.is_nomination() == nomination)
            && (self.include_hidden || !election.hidden)
            && self
                .committee_member
                .as_ref()
                .map_or(true, |uid| election.is_committee_member(uid))
    }

    /// The equivalent MongoDB query.
    pub fn to_document(&self) -> Document {
        let mut filter = Document::new();
        if let Some(statuses) = &self.statuses {
            let statuses: Vec<_> = statuses.iter().map(|status| status.as_str()).collect();
            filter.insert("status", doc! { "$in": statuses });
        }
        match self.nomination {
            Some(true) => {
                filter.insert("voting_type", VotingType::NominationCommittee);
            }
            Some(false) => {
                filter.insert("voting_type", doc! { "$ne": VotingType::NominationCommittee });
            }
            None => {}
        }
        if !self.include_hidden {
            filter.insert("hidden", false);
        }
        if let Some(uid) = &self.committee_member {
            filter.insert("committee_member_uids", uid.as_str());
        }
        filter
    }
}

/// Read access to the store, and the entry point for transactions.
#[rocket::async_trait]
pub trait Store: Send + Sync {
    /// Start a new transaction.
    async fn begin(&self) -> Result<Box<dyn Transaction>>;

    async fn election(&self, id: ElectionId) -> Result<Option<Election>>;

    /// Matching elections, in ID order.
    async fn elections(&self, filter: &ElectionFilter) -> Result<Vec<Election>>;

    /// The subset of `ids` in which the member has a ballot.
    async fn voted_elections(
        &self,
        member_uid: &str,
        ids: &[ElectionId],
    ) -> Result<HashSet<ElectionId>>;

    /// Every ballot row of an election.
    async fn ballots(&self, election_id: ElectionId) -> Result<Vec<Ballot>>;

    async fn justifications(&self, election_id: ElectionId) -> Result<Vec<BallotJustification>>;

    async fn token(&self, token_hash: &str) -> Result<Option<VotingToken>>;

    /// Every member issued a voting token for an election.
    async fn token_registrations(&self, election_id: ElectionId) -> Result<Vec<TokenRegistration>>;
}

/// A unit of work against the store.
///
/// Locks taken by a transaction are held until it commits, rolls back, or is
/// dropped.
#[rocket::async_trait]
pub trait Transaction: Send {
    /// Allocate a fresh election ID. IDs are never reused, even if the
    /// transaction rolls back.
    async fn next_election_id(&mut self) -> Result<ElectionId>;

    async fn insert_election(&mut self, election: &Election) -> Result<()>;

    /// Lock the election for the rest of the transaction and return it.
    ///
    /// Waits for other holders where the backend can queue; otherwise fails
    /// with `Error::Contention`, which callers may retry.
    async fn lock_election(&mut self, id: ElectionId) -> Result<Option<Election>>;

    /// Read an election without locking it.
    async fn election(&mut self, id: ElectionId) -> Result<Option<Election>>;

    /// Overwrite a previously locked election.
    async fn save_election(&mut self, election: &Election) -> Result<()>;

    async fn has_ballot(&mut self, election_id: ElectionId, member_uid: &str) -> Result<bool>;

    /// Whether the member was issued a voting token for the election.
    async fn has_token_registration(
        &mut self,
        election_id: ElectionId,
        member_uid: &str,
    ) -> Result<bool>;

    async fn insert_ballots(&mut self, ballots: Vec<Ballot>) -> Result<()>;

    async fn insert_justifications(
        &mut self,
        justifications: Vec<BallotJustification>,
    ) -> Result<()>;

    /// Record a new token and its registration. Fails with `Error::Conflict`
    /// if the member already holds a token for the election.
    async fn register_token(
        &mut self,
        registration: TokenRegistration,
        token: VotingToken,
    ) -> Result<()>;

    /// Lock a token without waiting: a token held by another transaction is
    /// `Error::Contention`.
    async fn lock_token(&mut self, token_hash: &str) -> Result<Option<VotingToken>>;

    async fn mark_token_used(&mut self, token_hash: &str, at: DateTime<Utc>) -> Result<()>;

    /// Replace member IDs on an election's ballots according to the map.
    /// Returns the number of ballot rows rewritten.
    async fn pseudonymise_ballots(
        &mut self,
        election_id: ElectionId,
        pseudonyms: &HashMap<MemberUid, MemberUid>,
    ) -> Result<u64>;

    /// Replace member IDs on an election's token registrations according to
    /// the map. Returns the number of registrations rewritten.
    async fn pseudonymise_registrations(
        &mut self,
        election_id: ElectionId,
        pseudonyms: &HashMap<MemberUid, MemberUid>,
    ) -> Result<u64>;

    async fn commit(&mut self) -> Result<()>;

    async fn rollback(&mut self) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn member_filter_hides_drafts_and_hidden() {
        let filter = ElectionFilter::member_visible();
        let published = Election::single_choice_example(1);
        assert!(filter.matches(&published));

        let draft = published.clone().with_status(ElectionStatus::Draft);
        assert!(!filter.matches(&draft));

        let mut hidden = published;
        hidden.hidden = true;
        assert!(!filter.matches(&hidden));
    }

    #[test]
    fn status_query_cannot_widen_visibility() {
        let filter = ElectionFilter::member_visible().with_status(Some(ElectionStatus::Draft));
        assert_eq!(filter.statuses, Some(Vec::new()));

        let closed = ElectionFilter::member_visible().with_status(Some(ElectionStatus::Closed));
        assert_eq!(closed.statuses, Some(vec![ElectionStatus::Closed]));
    }

    #[test]
    fn filter_document_excludes_nominations() {
        let filter = ElectionFilter {
            nomination: Some(false),
            ..ElectionFilter::member_visible()
        };
        let query = filter.to_document();
        assert_eq!(
            query.get_document("voting_type").unwrap(),
            &doc! { "$ne": "nomination-committee" }
        );
        assert_eq!(query.get_bool("hidden").unwrap(), false);
    }
}
