use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::Sub;

/// A log timestamp with nanosecond resolution.
///
/// `nsec` is always normalized into `[0, 1e9)`. Ordering compares seconds
/// first, then nanoseconds.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
pub struct Time {
    pub sec: i64,
    pub nsec: u32,
}

const NANOS_PER_SEC: u64 = 1_000_000_000;

impl Time {
    pub const ZERO: Time = Time { sec: 0, nsec: 0 };
    pub const MAX: Time = Time { sec: i64::MAX, nsec: (NANOS_PER_SEC - 1) as u32 };

    pub fn new(sec: i64, nsec: u32) -> Self {
        let carry = nsec as u64 / NANOS_PER_SEC;
        Self {
            sec: sec.saturating_add(carry as i64),
            nsec: (nsec as u64 % NANOS_PER_SEC) as u32,
        }
    }

    pub fn from_secs(sec: i64) -> Self {
        Self { sec, nsec: 0 }
    }

    /// Convert fractional seconds. Negative and non-finite inputs clamp to
    /// zero, matching how log formats treat pre-epoch timestamps.
    pub fn from_secs_f64(secs: f64) -> Self {
        if !secs.is_finite() || secs <= 0.0 {
            return Self::ZERO;
        }
        let sec = secs.trunc() as i64;
        let nsec = (secs.fract() * NANOS_PER_SEC as f64).round() as u32;
        Self::new(sec, nsec)
    }

    pub fn from_nanos(nanos: u64) -> Self {
        Self {
            sec: (nanos / NANOS_PER_SEC) as i64,
            nsec: (nanos % NANOS_PER_SEC) as u32,
        }
    }

    /// Total nanoseconds since time zero, saturating at `u64::MAX`.
    pub fn to_nanos(self) -> u64 {
        if self.sec < 0 {
            return 0;
        }
        (self.sec as u64)
            .saturating_mul(NANOS_PER_SEC)
            .saturating_add(self.nsec as u64)
    }

    pub fn add_nanos(self, nanos: u64) -> Self {
        Self::from_nanos(self.to_nanos().saturating_add(nanos))
    }

    pub fn sub_nanos(self, nanos: u64) -> Self {
        Self::from_nanos(self.to_nanos().saturating_sub(nanos))
    }

    pub fn clamp_to(self, start: Time, end: Time) -> Self {
        self.max(start).min(end)
    }
}

/// Distance between two times in nanoseconds, saturating at zero when
/// `rhs` is later.
impl Sub for Time {
    type Output = u64;

    fn sub(self, rhs: Time) -> u64 {
        self.to_nanos().saturating_sub(rhs.to_nanos())
    }
}

impl fmt::Display for Time {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:09}", self.sec, self.nsec)
    }
}
