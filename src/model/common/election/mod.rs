mod eligibility;
mod state;

use std::fmt::{Display, Formatter};

use mongodb::bson::{to_bson, Bson};
use serde::{Deserialize, Serialize};

pub use eligibility::Eligibility;
pub use state::ElectionStatus;

/// Our election IDs are integers.
pub type ElectionId = u32;
/// Our candidate/answer IDs are strings chosen by the election manager.
pub type AnswerId = String;
/// Member identities are opaque strings issued by the identity provider.
pub type MemberUid = String;

/// One candidate or answer on the ballot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Answer {
    pub id: AnswerId,
    pub text: String,
}

/// The voting modes an election may use.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum VotingType {
    SingleChoice,
    MultiChoice,
    RankedChoice,
    NominationCommittee,
}

impl VotingType {
    /// Whether ballots of this type carry an ordered preference list.
    pub fn is_ranked(self) -> bool {
        matches!(self, VotingType::RankedChoice | VotingType::NominationCommittee)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            VotingType::SingleChoice => "single-choice",
            VotingType::MultiChoice => "multi-choice",
            VotingType::RankedChoice => "ranked-choice",
            VotingType::NominationCommittee => "nomination-committee",
        }
    }
}

impl Display for VotingType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<VotingType> for Bson {
    fn from(voting_type: VotingType) -> Self {
        to_bson(&voting_type).expect("Serialisation is infallible")
    }
}

/// How ranked ballots are counted.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RankedMethod {
    /// Single Transferable Vote with quota, surplus transfer and elimination.
    #[default]
    Stv,
    /// Plain ranking by first preferences.
    Simple,
}

/// The quota a candidate must reach to be elected under STV.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuotaType {
    #[default]
    Droop,
    Hare,
    /// No quota: plurality of first preferences.
    None,
}
