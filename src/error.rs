use jsonwebtoken::errors::{Error as JwtError, ErrorKind as JwtErrorKind};
use mongodb::error::Error as DbError;
use rocket::{
    http::Status,
    response::{self, Responder},
    serde::json::{json, Error as JsonError, Json},
    Request,
};
use thiserror::Error;

use crate::engine::{eligibility::WindowError, Engine};

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// Malformed body or invalid answers.
    #[error("Invalid request: {0}")]
    Validation(String),
    #[error("Unauthorized: {0}")]
    Unauthorized(String),
    /// The caller may not take part in this election, or lacks the role.
    #[error("Forbidden: {0}")]
    Eligibility(String),
    #[error(transparent)]
    Window(#[from] WindowError),
    #[error("Results unavailable: {0}")]
    ResultsUnavailable(String),
    /// Duplicate vote, reused token, or a transition from the wrong state.
    #[error("Conflict: {0}")]
    Conflict(String),
    /// A lock could not be taken. Clients should retry the whole request.
    #[error("Busy: {0}")]
    Contention(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error(transparent)]
    Db(#[from] DbError),
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    pub fn status(&self) -> Status {
        match self {
            Self::Validation(_) => Status::BadRequest,
            Self::Unauthorized(_) => Status::Unauthorized,
            Self::Eligibility(_) | Self::Window(_) | Self::ResultsUnavailable(_) => {
                Status::Forbidden
            }
            Self::Conflict(_) => Status::Conflict,
            Self::Contention(_) => Status::ServiceUnavailable,
            Self::NotFound(_) => Status::NotFound,
            Self::Db(_) | Self::Internal(_) => Status::InternalServerError,
        }
    }

    /// Short machine-readable name of the error, used in response bodies and audit details.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation",
            Self::Unauthorized(_) => "unauthorized",
            Self::Eligibility(_) => "eligibility",
            Self::Window(_) => "window",
            Self::ResultsUnavailable(_) => "results_unavailable",
            Self::Conflict(_) => "conflict",
            Self::Contention(_) => "contention",
            Self::NotFound(_) => "not_found",
            Self::Db(_) | Self::Internal(_) => "internal",
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Contention(_))
    }
}

impl From<JwtError> for Error {
    fn from(err: JwtError) -> Self {
        match err.into_kind() {
            JwtErrorKind::ExpiredSignature | JwtErrorKind::ImmatureSignature => {
                Self::Unauthorized("Token is not currently valid".to_string())
            }
            _ => Self::Unauthorized("Invalid bearer token".to_string()),
        }
    }
}

impl From<JsonError<'_>> for Error {
    fn from(err: JsonError<'_>) -> Self {
        match err {
            JsonError::Io(err) => Self::Validation(format!("Could not read request body: {err}")),
            JsonError::Parse(_, err) => Self::Validation(format!("Malformed request body: {err}")),
        }
    }
}

impl<'r, 'o: 'r> Responder<'r, 'o> for Error {
    fn respond_to(self, req: &'r Request<'_>) -> response::Result<'o> {
        let status = self.status();
        let message = if status.code >= 500 {
            error!("{self:?}");
            let expose = req
                .rocket()
                .state::<Engine>()
                .map_or(false, |engine| engine.settings().expose_internal_errors);
            if expose || self.is_retryable() {
                self.to_string()
            } else {
                "An internal error occurred".to_string()
            }
        } else {
            debug!("{self}");
            self.to_string()
        };

        let body = Json(json!({
            "error": self.kind(),
            "message": message,
        }));
        (status, body).respond_to(req)
    }
}
