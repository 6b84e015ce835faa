use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::model::common::{
    election::MemberUid,
    principal::{Principal, Role},
};

/// Claims carried by the identity collaborator's bearer tokens.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// The member's unique ID.
    pub sub: MemberUid,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub roles: Vec<Role>,
    #[serde(default)]
    pub attributes: HashMap<String, String>,
    /// Expiry, as a UNIX timestamp.
    pub exp: i64,
}

impl From<Claims> for Principal {
    fn from(claims: Claims) -> Self {
        Self {
            uid: claims.sub,
            name: claims.name,
            email: claims.email,
            roles: claims.roles,
            attributes: claims.attributes,
        }
    }
}

#[cfg(test)]
mod examples {
    use chrono::{Duration, Utc};

    use super::*;

    impl Claims {
        /// Claims for the given principal, valid for another hour.
        pub fn for_principal(principal: &Principal) -> Self {
            Self {
                sub: principal.uid.clone(),
                name: principal.name.clone(),
                email: principal.email.clone(),
                roles: principal.roles.clone(),
                attributes: principal.attributes.clone(),
                exp: (Utc::now() + Duration::hours(1)).timestamp(),
            }
        }
    }
}
