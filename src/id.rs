//! Identifier allocation for experiments and runs
//!
//! Identifiers are 128-bit random values rendered as 32 lowercase hex digits.
//! They need uniqueness, not ordering, so allocation takes no lock; an
//! accidental collision is caught by the writer (target already exists) and
//! answered by drawing a fresh identifier a bounded number of times.

use tracing::warn;
use uuid::Uuid;

use crate::{Error, Result};

/// Width of a rendered identifier.
pub const ID_LEN: usize = 32;

/// Draw a fresh identifier.
#[must_use]
pub fn new_id() -> String {
    Uuid::new_v4().simple().to_string()
}

/// Whether `s` has the shape of an identifier produced by [`new_id`].
#[must_use]
pub fn is_valid_id(s: &str) -> bool {
    s.len() == ID_LEN && s.bytes().all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
}

/// Run `create` with freshly drawn identifiers until it stops reporting
/// `AlreadyExists`, giving up after `retries` extra draws.
///
/// Any other error is returned immediately.
///
/// # Errors
///
/// Returns the last `AlreadyExists` once the retry bound is spent, or the
/// first error of any other kind.
pub fn with_fresh_id<T>(retries: u32, mut create: impl FnMut(&str) -> Result<T>) -> Result<T> {
    let mut attempt = 0;
    loop {
        let id = new_id();
        match create(&id) {
            Err(err @ Error::AlreadyExists { .. }) if attempt < retries => {
                attempt += 1;
                warn!(%id, attempt, error = %err, "identifier collision, drawing a fresh id");
            }
            other => return other,
        }
    }
}
