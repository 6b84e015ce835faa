use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use mongodb::{
    bson::{doc, to_document, Bson},
    error::Error as DbError,
    options::{
        Acknowledgment, FindOneAndUpdateOptions, FindOptions, ReadConcern, ReturnDocument,
        TransactionOptions, WriteConcern,
    },
    Client, ClientSession, Database,
};
use rocket::futures::TryStreamExt;

use crate::error::{Error, Result};
use crate::model::{
    common::election::{ElectionId, MemberUid},
    db::{Ballot, BallotJustification, Election, TokenRegistration, VotingToken},
    mongodb::{
        is_duplicate_key_error, is_write_conflict, u32_id_filter, Coll, Counter,
        ELECTION_ID_COUNTER_ID,
    },
};

use super::{ElectionFilter, Store, Transaction};

/// Handles on every collection the store touches.
#[derive(Clone)]
struct Collections {
    elections: Coll<Election>,
    ballots: Coll<Ballot>,
    justifications: Coll<BallotJustification>,
    tokens: Coll<VotingToken>,
    registrations: Coll<TokenRegistration>,
    counters: Coll<Counter>,
}

impl Collections {
    fn from_db(db: &Database) -> Self {
        Self {
            elections: Coll::from_db(db),
            ballots: Coll::from_db(db),
            justifications: Coll::from_db(db),
            tokens: Coll::from_db(db),
            registrations: Coll::from_db(db),
            counters: Coll::from_db(db),
        }
    }
}

/// The production store, backed by MongoDB multi-document transactions.
///
/// Requires a replica set (or sharded cluster): standalone servers do not
/// support transactions.
#[derive(Clone)]
pub struct MongoStore {
    client: Client,
    collections: Collections,
}

impl MongoStore {
    pub fn new(client: Client, db: &Database) -> Self {
        Self {
            client,
            collections: Collections::from_db(db),
        }
    }
}

/// A write conflict means another transaction holds the document.
fn lock_error(err: DbError, what: &str) -> Error {
    if is_write_conflict(&err) {
        Error::Contention(format!("{what} is locked by another request"))
    } else {
        Error::Db(err)
    }
}

/// Election IDs come back from `distinct` as whichever integer width the
/// server stored them with.
fn bson_to_election_id(value: &Bson) -> Option<ElectionId> {
    match value {
        Bson::Int32(id) => ElectionId::try_from(*id).ok(),
        Bson::Int64(id) => ElectionId::try_from(*id).ok(),
        _ => None,
    }
}

#[rocket::async_trait]
impl Store for MongoStore {
    async fn begin(&self) -> Result<Box<dyn Transaction>> {
        let mut session = self.client.start_session(None).await?;
        let options = TransactionOptions::builder()
            .read_concern(ReadConcern::snapshot())
            .write_concern(WriteConcern::builder().w(Acknowledgment::Majority).build())
            .build();
        session.start_transaction(options).await?;
        Ok(Box::new(MongoTransaction {
            session,
            collections: self.collections.clone(),
        }))
    }

    async fn election(&self, id: ElectionId) -> Result<Option<Election>> {
        Ok(self
            .collections
            .elections
            .find_one(u32_id_filter(id), None)
            .await?)
    }

    async fn elections(&self, filter: &ElectionFilter) -> Result<Vec<Election>> {
        let options = FindOptions::builder().sort(doc! {"_id": 1}).build();
        let elections = self
            .collections
            .elections
            .find(filter.to_document(), options)
            .await?
            .try_collect()
            .await?;
        Ok(elections)
    }

    async fn voted_elections(
        &self,
        member_uid: &str,
        ids: &[ElectionId],
    ) -> Result<HashSet<ElectionId>> {
        let filter = doc! {
            "member_uid": member_uid,
            "election_id": { "$in": ids.to_vec() },
        };
        let voted = self
            .collections
            .ballots
            .distinct("election_id", filter, None)
            .await?;
        Ok(voted.iter().filter_map(bson_to_election_id).collect())
    }

    async fn ballots(&self, election_id: ElectionId) -> Result<Vec<Ballot>> {
        let options = FindOptions::builder()
            .sort(doc! {"submitted_at": 1, "_id": 1})
            .build();
        let ballots = self
            .collections
            .ballots
            .find(doc! {"election_id": election_id}, options)
            .await?
            .try_collect()
            .await?;
        Ok(ballots)
    }

    async fn justifications(&self, election_id: ElectionId) -> Result<Vec<BallotJustification>> {
        let options = FindOptions::builder()
            .sort(doc! {"ballot_id": 1, "rank_position": 1})
            .build();
        let justifications = self
            .collections
            .justifications
            .find(doc! {"election_id": election_id}, options)
            .await?
            .try_collect()
            .await?;
        Ok(justifications)
    }

    async fn token(&self, token_hash: &str) -> Result<Option<VotingToken>> {
        Ok(self
            .collections
            .tokens
            .find_one(doc! {"_id": token_hash}, None)
            .await?)
    }

    async fn token_registrations(&self, election_id: ElectionId) -> Result<Vec<TokenRegistration>> {
        let registrations = self
            .collections
            .registrations
            .find(doc! {"election_id": election_id}, None)
            .await?
            .try_collect()
            .await?;
        Ok(registrations)
    }
}

pub struct MongoTransaction {
    session: ClientSession,
    collections: Collections,
}

impl MongoTransaction {
    /// Take a document's write lock by bumping its `lock_seq`, returning the
    /// document as of the lock.
    async fn lock<T>(&mut self, coll: &Coll<T>, filter: mongodb::bson::Document, what: &str) -> Result<Option<T>>
    where
        T: serde::de::DeserializeOwned + Send + Sync + Unpin,
    {
        let options = FindOneAndUpdateOptions::builder()
            .return_document(ReturnDocument::After)
            .build();
        coll.find_one_and_update_with_session(
            filter,
            doc! { "$inc": { "lock_seq": 1 } },
            options,
            &mut self.session,
        )
        .await
        .map_err(|err| lock_error(err, what))
    }
}

#[rocket::async_trait]
impl Transaction for MongoTransaction {
    async fn next_election_id(&mut self) -> Result<ElectionId> {
        // Taken outside the transaction so concurrent creations never conflict on the counter.
        let mut counter_session = self.session.client().start_session(None).await?;
        Counter::next(
            &self.collections.counters,
            ELECTION_ID_COUNTER_ID,
            &mut counter_session,
        )
        .await
    }

    async fn insert_election(&mut self, election: &Election) -> Result<()> {
        self.collections
            .elections
            .insert_one_with_session(election, None, &mut self.session)
            .await
            .map_err(|err| {
                if is_duplicate_key_error(&err) {
                    Error::Conflict(format!("Election {} already exists", election.id))
                } else {
                    Error::Db(err)
                }
            })?;
        Ok(())
    }

    async fn lock_election(&mut self, id: ElectionId) -> Result<Option<Election>> {
        let elections = self.collections.elections.clone();
        self.lock(&elections, u32_id_filter(id), &format!("Election {id}"))
            .await
    }

    async fn election(&mut self, id: ElectionId) -> Result<Option<Election>> {
        Ok(self
            .collections
            .elections
            .find_one_with_session(u32_id_filter(id), None, &mut self.session)
            .await?)
    }

    async fn save_election(&mut self, election: &Election) -> Result<()> {
        let mut update = to_document(election)
            .map_err(|err| Error::Internal(format!("Failed to serialise election: {err}")))?;
        update.remove("_id");
        self.collections
            .elections
            .update_one_with_session(
                u32_id_filter(election.id),
                doc! { "$set": update },
                None,
                &mut self.session,
            )
            .await
            .map_err(|err| lock_error(err, "Election"))?;
        Ok(())
    }

    async fn has_ballot(&mut self, election_id: ElectionId, member_uid: &str) -> Result<bool> {
        let count = self
            .collections
            .ballots
            .count_documents_with_session(
                doc! { "election_id": election_id, "member_uid": member_uid },
                None,
                &mut self.session,
            )
            .await?;
        Ok(count > 0)
    }

    async fn has_token_registration(
        &mut self,
        election_id: ElectionId,
        member_uid: &str,
    ) -> Result<bool> {
        let count = self
            .collections
            .registrations
            .count_documents_with_session(
                doc! { "election_id": election_id, "member_uid": member_uid },
                None,
                &mut self.session,
            )
            .await?;
        Ok(count > 0)
    }

    async fn insert_ballots(&mut self, ballots: Vec<Ballot>) -> Result<()> {
        if ballots.is_empty() {
            return Ok(());
        }
        self.collections
            .ballots
            .insert_many_with_session(ballots, None, &mut self.session)
            .await
            .map_err(|err| {
                if is_duplicate_key_error(&err) {
                    Error::Conflict("Member has already voted in this election".to_string())
                } else {
                    Error::Db(err)
                }
            })?;
        Ok(())
    }

    async fn insert_justifications(
        &mut self,
        justifications: Vec<BallotJustification>,
    ) -> Result<()> {
        if justifications.is_empty() {
            return Ok(());
        }
        self.collections
            .justifications
            .insert_many_with_session(justifications, None, &mut self.session)
            .await?;
        Ok(())
    }

    async fn register_token(
        &mut self,
        registration: TokenRegistration,
        token: VotingToken,
    ) -> Result<()> {
        let election_id = registration.election_id;
        let conflict = |err: DbError| {
            if is_duplicate_key_error(&err) {
                Error::Conflict(format!(
                    "A voting token was already issued for election {election_id}"
                ))
            } else {
                lock_error(err, "Token registration")
            }
        };
        self.collections
            .registrations
            .insert_one_with_session(registration, None, &mut self.session)
            .await
            .map_err(conflict)?;
        self.collections
            .tokens
            .insert_one_with_session(token, None, &mut self.session)
            .await
            .map_err(conflict)?;
        Ok(())
    }

    async fn lock_token(&mut self, token_hash: &str) -> Result<Option<VotingToken>> {
        let tokens = self.collections.tokens.clone();
        self.lock(&tokens, doc! { "_id": token_hash }, "Voting token")
            .await
    }

    async fn mark_token_used(&mut self, token_hash: &str, at: DateTime<Utc>) -> Result<()> {
        self.collections
            .tokens
            .update_one_with_session(
                doc! { "_id": token_hash, "used": false },
                doc! { "$set": { "used": true, "used_at": at.to_rfc3339() } },
                None,
                &mut self.session,
            )
            .await
            .map_err(|err| lock_error(err, "Voting token"))?;
        Ok(())
    }

    async fn pseudonymise_ballots(
        &mut self,
        election_id: ElectionId,
        pseudonyms: &HashMap<MemberUid, MemberUid>,
    ) -> Result<u64> {
        let mut rewritten = 0;
        for (uid, pseudonym) in pseudonyms {
            let result = self
                .collections
                .ballots
                .update_many_with_session(
                    doc! { "election_id": election_id, "member_uid": uid },
                    doc! { "$set": { "member_uid": pseudonym } },
                    None,
                    &mut self.session,
                )
                .await?;
            rewritten += result.modified_count;
        }
        Ok(rewritten)
    }

    async fn pseudonymise_registrations(
        &mut self,
        election_id: ElectionId,
        pseudonyms: &HashMap<MemberUid, MemberUid>,
    ) -> Result<u64> {
        let mut rewritten = 0;
        for (uid, pseudonym) in pseudonyms {
            let result = self
                .collections
                .registrations
                .update_many_with_session(
                    doc! { "election_id": election_id, "member_uid": uid },
                    doc! { "$set": { "member_uid": pseudonym } },
                    None,
                    &mut self.session,
                )
                .await?;
            rewritten += result.modified_count;
        }
        Ok(rewritten)
    }

    async fn commit(&mut self) -> Result<()> {
        self.session
            .commit_transaction()
            .await
            .map_err(|err| lock_error(err, "Transaction"))
    }

    async fn rollback(&mut self) -> Result<()> {
        Ok(self.session.abort_transaction().await?)
    }
}
