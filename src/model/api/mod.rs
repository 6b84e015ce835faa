//! API-compatible types.
//!
//! The types in this module are serialised in an API-friendly way, e.g.:
//!
//! - Ballot IDs are serialised as hex strings.
//! - Datetimes are serialised as RFC 3339 strings.
//! - Request bodies reject unknown fields.

pub mod auth;
pub mod election;
pub mod pagination;
pub mod vote;
