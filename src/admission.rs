//! Request admission gate.
//!
//! A token bucket shared by every outbound request of a session. Callers
//! block in [`AdmissionGate::admit`] until a token is available or their
//! cancellation token fires.

use std::fmt;
use std::num::NonZeroU32;
use std::time::Duration;

use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Token-bucket limiter guarding request issuance.
pub struct AdmissionGate {
    limiter: DefaultDirectRateLimiter,
    per_second: f64,
    burst: u32,
}

impl AdmissionGate {
    /// Creates a gate refilling `per_second` tokens per second with room for
    /// `burst` tokens.
    pub fn new(per_second: f64, burst: u32) -> Result<Self, AdmissionError> {
        if !per_second.is_finite() || per_second <= 0.0 {
            return Err(AdmissionError::InvalidQuota { per_second, burst });
        }
        let burst_nz =
            NonZeroU32::new(burst).ok_or(AdmissionError::InvalidQuota { per_second, burst })?;
        let quota = Duration::try_from_secs_f64(1.0 / per_second)
            .ok()
            .and_then(Quota::with_period)
            .ok_or(AdmissionError::InvalidQuota { per_second, burst })?
            .allow_burst(burst_nz);

        Ok(Self {
            limiter: RateLimiter::direct(quota),
            per_second,
            burst,
        })
    }

    /// Waits for one token.
    ///
    /// Fails with [`AdmissionError::Cancelled`] if `cancel` fires first,
    /// including when it is already cancelled on entry.
    pub async fn admit(&self, cancel: &CancellationToken) -> Result<(), AdmissionError> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!(event = "admission_cancelled", per_second = self.per_second, burst = self.burst);
                Err(AdmissionError::Cancelled)
            }
            _ = self.limiter.until_ready() => Ok(()),
        }
    }
}

impl fmt::Debug for AdmissionGate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AdmissionGate")
            .field("per_second", &self.per_second)
            .field("burst", &self.burst)
            .finish_non_exhaustive()
    }
}

/// Admission gate failures.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum AdmissionError {
    /// The caller's cancellation token fired while waiting for a token.
    #[error("request admission cancelled")]
    Cancelled,

    /// Rate or burst cannot form a token bucket.
    #[error("invalid admission quota: rate {per_second}/s, burst {burst}")]
    InvalidQuota { per_second: f64, burst: u32 },
}
