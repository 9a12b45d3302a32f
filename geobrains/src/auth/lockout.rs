//! Progressive account lockout.
//!
//! After `threshold` consecutive failures each further failure locks the
//! account for the next tier's duration. Overflow past the last tier stays on
//! the last tier. Only a successful login clears the counter.

use super::errors::{AuthError, AuthResult};
use super::models::Account;
use chrono::{DateTime, Duration, Utc};

/// Default failures tolerated before the first lock
pub const DEFAULT_LOCKOUT_THRESHOLD: u32 = 5;

/// Longest lock a custom duration table may impose
pub const MAX_LOCKOUT_DURATION: Duration = Duration::days(365);

/// Built-in escalation tiers
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum LockoutTier {
    FiveMinutes,
    FifteenMinutes,
    ThirtyMinutes,
    OneHour,
    OneDay,
}

impl LockoutTier {
    pub const ALL: [LockoutTier; 5] = [
        LockoutTier::FiveMinutes,
        LockoutTier::FifteenMinutes,
        LockoutTier::ThirtyMinutes,
        LockoutTier::OneHour,
        LockoutTier::OneDay,
    ];

    /// Tier for the n-th failure past the threshold (0-based)
    pub fn for_overflow(overflow: u32) -> Self {
        match overflow {
            0 => LockoutTier::FiveMinutes,
            1 => LockoutTier::FifteenMinutes,
            2 => LockoutTier::ThirtyMinutes,
            3 => LockoutTier::OneHour,
            _ => LockoutTier::OneDay,
        }
    }

    pub fn duration(&self) -> Duration {
        match self {
            LockoutTier::FiveMinutes => Duration::minutes(5),
            LockoutTier::FifteenMinutes => Duration::minutes(15),
            LockoutTier::ThirtyMinutes => Duration::minutes(30),
            LockoutTier::OneHour => Duration::hours(1),
            LockoutTier::OneDay => Duration::hours(24),
        }
    }
}

/// Lock state of an account at a point in time
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockoutState {
    Unlocked,
    Locked { until: DateTime<Utc> },
}

impl LockoutState {
    pub fn of(account: &Account, now: DateTime<Utc>) -> Self {
        match account.active_lock(now) {
            Some(until) => LockoutState::Locked { until },
            None => LockoutState::Unlocked,
        }
    }

    pub fn is_locked(&self) -> bool {
        matches!(self, LockoutState::Locked { .. })
    }

    /// Whole seconds until the lock expires, rounded up
    pub fn retry_after_secs(&self, now: DateTime<Utc>) -> Option<u64> {
        match self {
            LockoutState::Locked { until } => {
                let millis = (*until - now).num_milliseconds().max(0) as u64;
                Some(millis.div_ceil(1000))
            }
            LockoutState::Unlocked => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Schedule {
    Tiers,
    Custom(Vec<Duration>),
}

/// Threshold and escalation schedule
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockoutPolicy {
    threshold: u32,
    schedule: Schedule,
}

impl Default for LockoutPolicy {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_LOCKOUT_THRESHOLD,
            schedule: Schedule::Tiers,
        }
    }
}

impl LockoutPolicy {
    /// Policy with a custom duration table.
    ///
    /// # Errors
    ///
    /// * `AuthError::InvalidConfig` - Zero threshold, empty table, a
    ///   non-positive duration, a duration above [`MAX_LOCKOUT_DURATION`], or
    ///   a duration shorter than the one before it
    pub fn new(threshold: u32, durations: Vec<Duration>) -> AuthResult<Self> {
        if threshold == 0 {
            return Err(AuthError::InvalidConfig(
                "lockout threshold must be at least 1".to_string(),
            ));
        }
        if durations.is_empty() {
            return Err(AuthError::InvalidConfig(
                "lockout duration table is empty".to_string(),
            ));
        }
        if durations.iter().any(|d| *d <= Duration::zero()) {
            return Err(AuthError::InvalidConfig(
                "lockout durations must be positive".to_string(),
            ));
        }
        if durations.iter().any(|d| *d > MAX_LOCKOUT_DURATION) {
            return Err(AuthError::InvalidConfig(format!(
                "lockout durations must not exceed {} days",
                MAX_LOCKOUT_DURATION.num_days()
            )));
        }
        if durations.windows(2).any(|pair| pair[1] < pair[0]) {
            return Err(AuthError::InvalidConfig(
                "lockout durations must never decrease".to_string(),
            ));
        }

        Ok(Self {
            threshold,
            schedule: Schedule::Custom(durations),
        })
    }

    /// Built-in tiers with a custom threshold
    pub fn with_threshold(threshold: u32) -> AuthResult<Self> {
        if threshold == 0 {
            return Err(AuthError::InvalidConfig(
                "lockout threshold must be at least 1".to_string(),
            ));
        }
        Ok(Self {
            threshold,
            schedule: Schedule::Tiers,
        })
    }

    /// Load from `LOCKOUT_THRESHOLD` and `LOCKOUT_DURATIONS_SECS`
    /// (comma-separated seconds). Unset variables keep the defaults.
    pub fn from_env() -> AuthResult<Self> {
        let threshold = match std::env::var("LOCKOUT_THRESHOLD") {
            Ok(value) => value.trim().parse().map_err(|_| {
                AuthError::InvalidConfig(format!("LOCKOUT_THRESHOLD is not a number: {}", value))
            })?,
            Err(_) => DEFAULT_LOCKOUT_THRESHOLD,
        };

        match std::env::var("LOCKOUT_DURATIONS_SECS") {
            Ok(value) => Self::new(threshold, parse_durations(&value)?),
            Err(_) => Self::with_threshold(threshold),
        }
    }

    pub fn threshold(&self) -> u32 {
        self.threshold
    }

    /// Lock duration after `failed_attempt_count` consecutive failures, if any
    pub fn lock_duration(&self, failed_attempt_count: u32) -> Option<Duration> {
        if failed_attempt_count < self.threshold {
            return None;
        }
        let overflow = failed_attempt_count - self.threshold;

        match &self.schedule {
            Schedule::Tiers => Some(LockoutTier::for_overflow(overflow).duration()),
            Schedule::Custom(durations) => {
                let index = (overflow as usize).min(durations.len() - 1);
                Some(durations[index])
            }
        }
    }

    /// Outcome of a failure that brought the counter to `failed_attempt_count`.
    ///
    /// A lock that would run past the end of representable time saturates
    /// at [`DateTime::<Utc>::MAX_UTC`].
    pub fn register_failure(&self, failed_attempt_count: u32, now: DateTime<Utc>) -> FailureOutcome {
        FailureOutcome {
            failed_attempt_count,
            locked_until: self
                .lock_duration(failed_attempt_count)
                .map(|d| now.checked_add_signed(d).unwrap_or(DateTime::<Utc>::MAX_UTC)),
        }
    }
}

/// Result of registering one failed attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FailureOutcome {
    pub failed_attempt_count: u32,
    /// New lock expiry, when the failure crossed the threshold
    pub locked_until: Option<DateTime<Utc>>,
}

fn parse_durations(value: &str) -> AuthResult<Vec<Duration>> {
    value
        .split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(|part| {
            let secs = part.parse::<i64>().map_err(|_| {
                AuthError::InvalidConfig(format!(
                    "LOCKOUT_DURATIONS_SECS entry is not a number: {}",
                    part
                ))
            })?;
            Duration::try_seconds(secs).ok_or_else(|| {
                AuthError::InvalidConfig(format!(
                    "LOCKOUT_DURATIONS_SECS entry is out of range: {}",
                    part
                ))
            })
        })
        .collect()
}
