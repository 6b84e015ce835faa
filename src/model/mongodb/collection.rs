use std::ops::Deref;

use mongodb::{
    bson::doc, error::Error as DbError, options::IndexOptions, Collection, Database, IndexModel,
};

use crate::model::db::{Ballot, BallotJustification, Election, TokenRegistration, VotingToken};

use super::counter::Counter;

/// A type that can be directly inserted/read to/from the database.
pub trait MongoCollection {
    /// The name of the collection.
    const NAME: &'static str;
}

/// A database collection of the given type.
pub struct Coll<T>(Collection<T>);

impl<T> Coll<T>
where
    T: MongoCollection,
{
    /// Get a handle on this collection in the given database.
    pub fn from_db(db: &Database) -> Self {
        Self(db.collection(T::NAME))
    }
}

// `Derive(Clone)` would only derive if `T: Clone`, but we don't need that bound.
impl<T> Clone for Coll<T> {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}

impl<T> Deref for Coll<T> {
    type Target = Collection<T>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl MongoCollection for Election {
    const NAME: &'static str = "elections";
}

impl MongoCollection for Ballot {
    const NAME: &'static str = "ballots";
}

impl MongoCollection for BallotJustification {
    const NAME: &'static str = "ballot_justifications";
}

impl MongoCollection for VotingToken {
    const NAME: &'static str = "voting_tokens";
}

impl MongoCollection for TokenRegistration {
    const NAME: &'static str = "token_registrations";
}

impl MongoCollection for Counter {
    const NAME: &'static str = "counters";
}

/// Ensure that all the required indexes exist on the given database.
///
/// This operation is idempotent.
pub async fn ensure_indexes_exist(db: &Database) -> Result<(), DbError> {
    debug!("Ensuring collection indexes exist");

    let unique = IndexOptions::builder().unique(true).build();

    // Ballot collection: one row per (member, answer), restricted to rows that
    // still carry a member id so token ballots don't collide on null.
    let member_ballot_index = IndexModel::builder()
        .keys(doc! {"election_id": 1, "member_uid": 1, "answer_id": 1})
        .options(
            IndexOptions::builder()
                .unique(true)
                .partial_filter_expression(doc! {"member_uid": {"$type": "string"}})
                .build(),
        )
        .build();
    let election_ballot_index = IndexModel::builder()
        .keys(doc! {"election_id": 1})
        .build();
    Coll::<Ballot>::from_db(db)
        .create_indexes([member_ballot_index, election_ballot_index], None)
        .await?;

    // Justification collection.
    let justification_index = IndexModel::builder()
        .keys(doc! {"ballot_id": 1, "candidate_id": 1})
        .options(unique.clone())
        .build();
    Coll::<BallotJustification>::from_db(db)
        .create_index(justification_index, None)
        .await?;

    // Token registration collection.
    let registration_index = IndexModel::builder()
        .keys(doc! {"election_id": 1, "member_uid": 1})
        .options(unique)
        .build();
    Coll::<TokenRegistration>::from_db(db)
        .create_index(registration_index, None)
        .await?;

    Ok(())
}
