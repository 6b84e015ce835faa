use chrono::{DateTime, Utc};
use mongodb::bson::serde_helpers::chrono_datetime_as_bson_datetime;
use serde::{Deserialize, Serialize};

use crate::model::{
    common::election::{AnswerId, ElectionId, MemberUid},
    mongodb::Id,
};

/// A committee member's written reason for ranking a candidate highly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BallotJustification {
    #[serde(rename = "_id")]
    pub id: Id,
    pub ballot_id: Id,
    pub election_id: ElectionId,
    pub candidate_id: AnswerId,
    /// 1-indexed position of the candidate on the ballot.
    pub rank_position: u32,
    pub justification_text: String,
    pub member_uid: MemberUid,
    pub voter_name: String,
    #[serde(with = "chrono_datetime_as_bson_datetime")]
    pub submitted_at: DateTime<Utc>,
}
