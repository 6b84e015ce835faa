use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use super::election::MemberUid;

/// Administrative rights a principal may hold on top of plain membership.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// May create elections and drive their lifecycle.
    ElectionManager,
    /// May additionally perform irreversible actions such as anonymization.
    Superadmin,
}

/// An already-verified caller, as handed to us by the identity collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    pub uid: MemberUid,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub roles: Vec<Role>,
    /// Membership attributes (e.g. region, chapter) used by attribute-filter eligibility.
    #[serde(default)]
    pub attributes: HashMap<String, String>,
}

impl Principal {
    pub fn new(uid: impl Into<MemberUid>) -> Self {
        Self {
            uid: uid.into(),
            name: None,
            email: None,
            roles: Vec::new(),
            attributes: HashMap::new(),
        }
    }

    pub fn is_superadmin(&self) -> bool {
        self.roles.contains(&Role::Superadmin)
    }

    /// Superadmins are implicitly election managers.
    pub fn is_election_manager(&self) -> bool {
        self.is_superadmin() || self.roles.contains(&Role::ElectionManager)
    }

    /// The name to record for this principal when identity is preserved:
    /// the explicit name, else the claim name, else the email, else "Unknown".
    pub fn display_name(&self, explicit: Option<&str>) -> String {
        [explicit, self.name.as_deref(), self.email.as_deref()]
            .into_iter()
            .flatten()
            .map(str::trim)
            .find(|candidate| !candidate.is_empty())
            .unwrap_or("Unknown")
            .to_string()
    }
}
