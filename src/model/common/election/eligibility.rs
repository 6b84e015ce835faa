use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::model::common::principal::Principal;

use super::MemberUid;

/// Who may see and vote in an election.
///
/// This is a closed set: new policies are added here as variants, never as
/// free-form strings interpreted elsewhere.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "policy", rename_all = "snake_case")]
pub enum Eligibility {
    /// Every authenticated member.
    #[default]
    OpenToAll,
    /// Only the listed member IDs.
    UidAllowlist { uids: HashSet<MemberUid> },
    /// Members whose `attribute` claim takes one of `allowed_values`.
    AttributeFilter {
        attribute: String,
        allowed_values: HashSet<String>,
    },
}

impl Eligibility {
    /// Does this policy admit the given principal?
    pub fn admits(&self, principal: &Principal) -> bool {
        match self {
            Eligibility::OpenToAll => true,
            Eligibility::UidAllowlist { uids } => uids.contains(&principal.uid),
            Eligibility::AttributeFilter {
                attribute,
                allowed_values,
            } => principal
                .attributes
                .get(attribute)
                .map_or(false, |value| allowed_values.contains(value)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_to_all_admits_everyone() {
        assert!(Eligibility::OpenToAll.admits(&Principal::member("anyone")));
    }

    #[test]
    fn allowlist_admits_only_listed() {
        let policy = Eligibility::UidAllowlist {
            uids: HashSet::from(["a".to_string(), "b".to_string()]),
        };
        assert!(policy.admits(&Principal::member("a")));
        assert!(!policy.admits(&Principal::member("c")));
    }

    #[test]
    fn attribute_filter_matches_claim_values() {
        let policy = Eligibility::AttributeFilter {
            attribute: "region".to_string(),
            allowed_values: HashSet::from(["north".to_string(), "east".to_string()]),
        };
        assert!(policy.admits(&Principal::member("a").with_attribute("region", "north")));
        assert!(!policy.admits(&Principal::member("b").with_attribute("region", "south")));
        assert!(!policy.admits(&Principal::member("c")));
    }

    #[test]
    fn deserialises_tagged_policy() {
        let policy: Eligibility = rocket::serde::json::serde_json::from_str(
            r#"{"policy": "attribute_filter", "attribute": "region", "allowed_values": ["north"]}"#,
        )
        .unwrap();
        assert!(matches!(policy, Eligibility::AttributeFilter { .. }));
    }
}
