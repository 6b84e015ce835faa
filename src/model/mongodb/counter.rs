use mongodb::{
    bson::doc,
    options::{FindOneAndUpdateOptions, ReturnDocument},
    ClientSession,
};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::model::mongodb::Coll;

/// The counter that hands out election IDs.
pub const ELECTION_ID_COUNTER_ID: &str = "election_id";

/// A counter object used to implement auto-increment fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Counter {
    #[serde(rename = "_id")]
    pub id: String,
    /// The most recently issued value.
    pub current: u32,
}

impl Counter {
    /// Atomically retrieve the next value of the counter with the given ID.
    ///
    /// Missing counters are created on first use, so the first value issued is 1.
    pub async fn next(
        counters: &Coll<Counter>,
        id: &str,
        session: &mut ClientSession,
    ) -> Result<u32> {
        let update = doc! {
            "$inc": { "current": 1 }
        };
        let options = FindOneAndUpdateOptions::builder()
            .upsert(true)
            .return_document(ReturnDocument::After)
            .build();
        let counter = counters
            .find_one_and_update_with_session(doc! { "_id": id }, update, options, session)
            .await?
            .ok_or_else(|| Error::Internal(format!("Counter {id} vanished during upsert")))?;
        Ok(counter.current)
    }
}
