//! Voting-power weight curve.
//!
//! Voting power = amount * multiplier(remaining lock duration)
//!
//! The multiplier rises from `min_bps` at zero remaining time to `max_bps`
//! at `max_duration`, following the concave quadratic
//! `min + (max - min) * (2rD - r^2) / D^2`. All math is integer basis points.

use lockgov_types::{Amount, Timestamp, YEAR};
use serde::{Deserialize, Serialize};

use crate::error::StakingError;

/// Basis-point scale of a multiplier (10_000 = 1x).
pub const BPS: u32 = 10_000;

/// Longest `max_duration` a curve accepts. Keeps `D^2` well inside u128.
pub const MAX_CURVE_DURATION: Timestamp = 100 * YEAR;

/// Duration-weighted multiplier curve.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WeightCurve {
    /// Multiplier at zero remaining duration (basis points)
    pub min_bps: u32,
    /// Multiplier at or beyond `max_duration` (basis points)
    pub max_bps: u32,
    /// Longest lock the curve distinguishes, also the longest permitted lock
    pub max_duration: Timestamp,
}

impl Default for WeightCurve {
    fn default() -> Self {
        Self {
            min_bps: BPS,         // 1x
            max_bps: 3 * BPS,     // 3x
            max_duration: 3 * YEAR,
        }
    }
}

impl WeightCurve {
    /// Create a validated curve.
    pub fn new(min_bps: u32, max_bps: u32, max_duration: Timestamp) -> Result<Self, StakingError> {
        let curve = Self {
            min_bps,
            max_bps,
            max_duration,
        };
        curve.validate()?;
        Ok(curve)
    }

    /// Check the curve parameters.
    pub fn validate(&self) -> Result<(), StakingError> {
        if self.min_bps == 0 || self.min_bps > self.max_bps {
            return Err(StakingError::InvalidParameter(format!(
                "curve bounds must satisfy 0 < min ({}) <= max ({})",
                self.min_bps, self.max_bps
            )));
        }
        if self.max_duration == 0 || self.max_duration > MAX_CURVE_DURATION {
            return Err(StakingError::InvalidParameter(format!(
                "curve max duration {} out of range",
                self.max_duration
            )));
        }
        Ok(())
    }

    /// Multiplier for a remaining lock duration, in basis points.
    pub fn multiplier_bps(&self, remaining: Timestamp) -> u32 {
        let d = self.max_duration as u128;
        let r = remaining.min(self.max_duration) as u128;
        let span = (self.max_bps - self.min_bps) as u128;

        // 2rD - r^2 is increasing on [0, D] and reaches D^2 at r = D
        let shaped = span * (2 * r * d - r * r) / (d * d);
        self.min_bps + shaped as u32
    }

    /// Weighted power of `amount` locked for `remaining` more seconds.
    /// Expired locks (`remaining == 0`) weigh nothing.
    pub fn weight(&self, amount: Amount, remaining: Timestamp) -> u128 {
        if remaining == 0 {
            return 0;
        }
        amount.mul_bps(self.multiplier_bps(remaining))
    }
}
