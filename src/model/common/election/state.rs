use std::fmt::{Display, Formatter};

use mongodb::bson::{to_bson, Bson};
use rocket::form::FromFormField;
use serde::{Deserialize, Serialize};

/// States in the Election lifecycle.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, FromFormField)]
#[serde(rename_all = "snake_case")]
pub enum ElectionStatus {
    /// Under construction, only visible to election managers.
    Draft,
    /// Visible to members and accepting ballots inside its voting window.
    Published,
    /// Temporarily not accepting ballots.
    Paused,
    /// Voting has finished; results may be served.
    Closed,
    /// Completed and retired from the default listings.
    Archived,
}

impl ElectionStatus {
    /// Statuses in which an election is visible to members at all.
    pub const MEMBER_VISIBLE: [ElectionStatus; 4] = [
        ElectionStatus::Published,
        ElectionStatus::Paused,
        ElectionStatus::Closed,
        ElectionStatus::Archived,
    ];

    /// Whether the status alone marks voting as finished.
    pub fn is_final(self) -> bool {
        matches!(self, ElectionStatus::Closed | ElectionStatus::Archived)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ElectionStatus::Draft => "draft",
            ElectionStatus::Published => "published",
            ElectionStatus::Paused => "paused",
            ElectionStatus::Closed => "closed",
            ElectionStatus::Archived => "archived",
        }
    }
}

impl Display for ElectionStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<ElectionStatus> for Bson {
    fn from(status: ElectionStatus) -> Self {
        to_bson(&status).expect("Serialisation is infallible")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serialises_as_snake_case() {
        assert_eq!(Bson::from(ElectionStatus::Published), Bson::String("published".into()));
        assert_eq!(ElectionStatus::Archived.to_string(), "archived");
    }

    #[test]
    fn only_closed_and_archived_are_final() {
        assert!(ElectionStatus::Closed.is_final());
        assert!(ElectionStatus::Archived.is_final());
        assert!(!ElectionStatus::Paused.is_final());
        assert!(!ElectionStatus::Published.is_final());
        assert!(!ElectionStatus::Draft.is_final());
    }
}
