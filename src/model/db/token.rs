use chrono::{DateTime, Utc};
use mongodb::bson::serde_helpers::chrono_datetime_as_bson_datetime;
use serde::{Deserialize, Serialize};

use crate::model::{
    common::election::{ElectionId, MemberUid},
    mongodb::Id,
};

/// A single-use voting token for the legacy anonymous path.
///
/// Only the hash of the token is stored; the token itself is handed to the
/// member once and never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VotingToken {
    /// Hex SHA-256 of the token.
    #[serde(rename = "_id")]
    pub token_hash: String,
    pub election_id: ElectionId,
    pub used: bool,
    pub used_at: Option<DateTime<Utc>>,
    #[serde(with = "chrono_datetime_as_bson_datetime")]
    pub registered_at: DateTime<Utc>,
}

impl VotingToken {
    pub fn new(token_hash: String, election_id: ElectionId, registered_at: DateTime<Utc>) -> Self {
        Self {
            token_hash,
            election_id,
            used: false,
            used_at: None,
            registered_at,
        }
    }
}

/// Records that a member has been issued a token for an election, without
/// saying which one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenRegistration {
    #[serde(rename = "_id")]
    pub id: Id,
    pub election_id: ElectionId,
    pub member_uid: MemberUid,
    #[serde(with = "chrono_datetime_as_bson_datetime")]
    pub registered_at: DateTime<Utc>,
}

impl TokenRegistration {
    pub fn new(election_id: ElectionId, member_uid: MemberUid, registered_at: DateTime<Utc>) -> Self {
        Self {
            id: Id::new(),
            election_id,
            member_uid,
            registered_at,
        }
    }
}
