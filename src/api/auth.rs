use jsonwebtoken::{Algorithm, DecodingKey, Validation};
use rocket::{
    http::Status,
    request::{self, FromRequest},
    Request,
};

use crate::error::{Error, Result};
use crate::model::{api::auth::Claims, common::principal::Principal};
use crate::Config;

/// Verify an `Authorization` header value and turn its claims into a principal.
pub fn principal_from_header(header: &str, config: &Config) -> Result<Principal> {
    let token = header
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .ok_or_else(|| Error::Unauthorized("Expected a bearer token".to_string()))?;

    let claims = jsonwebtoken::decode::<Claims>(
        token,
        &DecodingKey::from_secret(config.jwt_secret()),
        &Validation::new(Algorithm::HS256),
    )?
    .claims;
    if claims.sub.trim().is_empty() {
        return Err(Error::Unauthorized("Token has no subject".to_string()));
    }
    Ok(claims.into())
}

#[rocket::async_trait]
impl<'r> FromRequest<'r> for Principal {
    type Error = Error;

    /// The identity provider has already authenticated the member; we only
    /// check its signature on the bearer token.
    async fn from_request(req: &'r Request<'_>) -> request::Outcome<Self, Self::Error> {
        let config = match req.rocket().state::<Config>() {
            Some(config) => config,
            None => {
                let err = Error::Internal("Config is not managed".to_string());
                return request::Outcome::Error((err.status(), err));
            }
        };
        let result = match req.headers().get_one("Authorization") {
            Some(header) => principal_from_header(header, config),
            None => Err(Error::Unauthorized("Missing bearer token".to_string())),
        };
        match result {
            Ok(principal) => request::Outcome::Success(principal),
            Err(err) => {
                debug!("Rejected credentials: {err}");
                request::Outcome::Error((Status::Unauthorized, err))
            }
        }
    }
}

/// Helpers for authenticating test requests.
#[cfg(test)]
pub mod testing {
    use jsonwebtoken::{EncodingKey, Header as JwtHeader};
    use rocket::http::Header;

    use super::*;

    pub fn token_for(principal: &Principal) -> String {
        jsonwebtoken::encode(
            &JwtHeader::new(Algorithm::HS256),
            &Claims::for_principal(principal),
            &EncodingKey::from_secret(Config::example().jwt_secret()),
        )
        .unwrap()
    }

    /// An `Authorization` header carrying a valid token for `principal`.
    pub fn bearer(principal: &Principal) -> Header<'static> {
        Header::new("Authorization", format!("Bearer {}", token_for(principal)))
    }
}
