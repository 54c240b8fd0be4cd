//! Conversion between wire timestamps and `chrono` instants.
//!
//! A missing, out-of-range or zero wire timestamp is a data-quality event,
//! never a reason to stop a stream: [`resolve_timestamp`] reports it and
//! [`resolve_or_now`] substitutes the local clock.

use chrono::{DateTime, Datelike, Utc};
use thiserror::Error;
use tracing::debug;

use crate::feed::proto::WireTimestamp;

/// 0001-01-01T00:00:00Z.
const MIN_SECONDS: i64 = -62_135_596_800;
/// 9999-12-31T23:59:59Z.
const MAX_SECONDS: i64 = 253_402_300_799;
const MAX_NANOS: i32 = 999_999_999;

/// Timestamp resolution failures.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TimestampError {
    #[error("timestamp is missing")]
    Missing,

    #[error("timestamp {{seconds: {seconds}, nanos: {nanos}}} is out of range")]
    Invalid { seconds: i64, nanos: i32 },

    #[error("timestamp {0} is zero")]
    Zero(DateTime<Utc>),
}

/// Decodes a wire timestamp.
///
/// Only 0001-01-01T00:00:00Z counts as zero; the Unix epoch is a valid
/// instant.
pub fn resolve_timestamp(ts: Option<&WireTimestamp>) -> Result<DateTime<Utc>, TimestampError> {
    let ts = ts.ok_or(TimestampError::Missing)?;
    let invalid = TimestampError::Invalid {
        seconds: ts.seconds,
        nanos: ts.nanos,
    };

    if !(MIN_SECONDS..=MAX_SECONDS).contains(&ts.seconds) || !(0..=MAX_NANOS).contains(&ts.nanos)
    {
        return Err(invalid);
    }
    let resolved = DateTime::from_timestamp(ts.seconds, ts.nanos as u32).ok_or(invalid)?;

    if ts.nanos == 0 && ts.seconds == MIN_SECONDS {
        return Err(TimestampError::Zero(resolved));
    }
    Ok(resolved)
}

/// Resolves `ts`, falling back to the local clock when it is unusable.
///
/// `what` names the timestamp in the debug log.
pub fn resolve_or_now(ts: Option<&WireTimestamp>, what: &'static str) -> DateTime<Utc> {
    match resolve_timestamp(ts) {
        Ok(resolved) => resolved,
        Err(err) => {
            debug!(event = "timestamp_fallback", timestamp = what, error = %err);
            Utc::now()
        }
    }
}

/// Encodes an instant for the wire.
///
/// Fails for instants outside years 0001 through 9999.
pub fn to_wire_timestamp(at: DateTime<Utc>) -> Result<WireTimestamp, TimestampError> {
    let seconds = at.timestamp();
    let nanos = at.timestamp_subsec_nanos() as i32;
    if !(1..=9999).contains(&at.year()) || !(0..=MAX_NANOS).contains(&nanos) {
        return Err(TimestampError::Invalid { seconds, nanos });
    }
    Ok(WireTimestamp { seconds, nanos })
}
