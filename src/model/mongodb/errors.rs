//! For some reason, the mongodb crate doesn't provide error code constants.
//! This module fills in the gaps.

use mongodb::error::{Error as DbError, ErrorKind, WriteFailure, TRANSIENT_TRANSACTION_ERROR};

pub const DUPLICATE_KEY: i32 = 11000;
pub const WRITE_CONFLICT: i32 = 112;

fn write_error_code(err: &DbError) -> Option<i32> {
    match *err.kind {
        ErrorKind::Write(WriteFailure::WriteError(ref e)) => Some(e.code),
        ErrorKind::Command(ref e) => Some(e.code),
        _ => None,
    }
}

/// Return true if the given error is a duplicate key write error.
pub fn is_duplicate_key_error(err: &DbError) -> bool {
    write_error_code(err) == Some(DUPLICATE_KEY)
}

/// Return true if the given error means another transaction holds a document
/// we tried to write, i.e. a row lock we could not take.
pub fn is_write_conflict(err: &DbError) -> bool {
    write_error_code(err) == Some(WRITE_CONFLICT) || err.contains_label(TRANSIENT_TRANSACTION_ERROR)
}
