//! Shared infrastructure: errors, id generation, index setup

pub mod error;
pub mod indexes;
pub mod tsid;

pub use error::{IdentityError, Result};
pub use tsid::TsidGenerator;

use chrono::{DateTime, SubsecRound, Utc};

/// Current time at millisecond precision, the resolution BSON dates keep.
/// Entities built from it compare equal after a storage or cache round trip.
pub fn now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(3)
}
