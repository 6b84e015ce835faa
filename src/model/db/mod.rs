//! DB-compatible (e.g. de/serialisable) types.
//!
//! The types in this module are serialised in an DB-friendly way, e.g.:
//!
//! - IDs and timestamps are serialised in MongoDB's own format.

mod ballot;
pub use ballot::{truncate_to_minute, Ballot, Voter};

pub mod election;
pub use election::Election;

mod justification;
pub use justification::BallotJustification;

mod token;
pub use token::{TokenRegistration, VotingToken};
