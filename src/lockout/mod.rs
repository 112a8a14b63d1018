//! Failed-login throttling with a timed block.
//!
//! After `max_attempts` consecutive failures (default 5) the guard blocks
//! further login attempts for a fixed window (default 15 minutes). State is
//! persisted through the state store so a block survives a restart, and a
//! lapsed block is reset lazily on the next read, with no background timer. A UI
//! countdown may poll [`LockoutGuard::state`] every second for display, but
//! the checks inside [`LockoutGuard::is_blocked`] and
//! [`LockoutGuard::record_failure`] are the authoritative transition
//! triggers.
//!
//! This client-side guard is a UX convenience, not a security boundary: the
//! credential backend enforces its own rate limits.

use crate::config::LockoutConfig;
use crate::store::{StateStore, KEY_LOCKOUT_ATTEMPTS, KEY_LOCKOUT_UNTIL};
use anyhow::Result;
use chrono::{DateTime, Utc};
use std::sync::Arc;

/// Snapshot of the guard's persisted state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockoutState {
    /// Consecutive failed attempts since the last success or reset.
    pub failed_attempts: u32,
    /// Deadline of the active block, if any.
    pub blocked_until: Option<DateTime<Utc>>,
}

impl LockoutState {
    /// The open (unblocked, zero-failure) state.
    pub fn open() -> Self {
        Self {
            failed_attempts: 0,
            blocked_until: None,
        }
    }

    /// Whether this snapshot carries an active block as of `now`.
    pub fn is_blocked_at(&self, now: DateTime<Utc>) -> bool {
        self.blocked_until.map(|until| now < until).unwrap_or(false)
    }
}

/// Tracks consecutive failed login attempts and enforces a timed block.
pub struct LockoutGuard {
    store: Arc<dyn StateStore>,
    config: LockoutConfig,
}

impl LockoutGuard {
    pub fn new(store: Arc<dyn StateStore>, config: LockoutConfig) -> Self {
        Self { store, config }
    }

    /// Record one failed attempt and return the updated state (so the caller
    /// can render a countdown). Reaching the configured threshold sets the
    /// block deadline. A failure recorded while a block is active changes
    /// nothing; attempts cannot compound past the block.
    pub fn record_failure(&self) -> Result<LockoutState> {
        let mut state = self.read_state()?;
        if state.is_blocked_at(Utc::now()) {
            return Ok(state);
        }

        state.failed_attempts += 1;
        if state.failed_attempts >= self.config.max_attempts {
            let until = Utc::now() + self.config.block_duration();
            state.blocked_until = Some(until);
            tracing::warn!(
                failed_attempts = state.failed_attempts,
                blocked_until = %until.to_rfc3339(),
                "Login blocked after repeated failures"
            );
        }

        self.persist(&state)?;
        Ok(state)
    }

    /// Whether a block is currently active. A lapsed block is reset, and the
    /// reset persisted, as a side effect of this check.
    pub fn is_blocked(&self) -> bool {
        match self.read_state() {
            Ok(state) => state.is_blocked_at(Utc::now()),
            Err(e) => {
                tracing::warn!("Lockout state unreadable, treating as open: {e:#}");
                false
            }
        }
    }

    /// Clear the failure count and any block. Called after a successful
    /// login.
    pub fn reset(&self) -> Result<()> {
        self.store.remove(KEY_LOCKOUT_ATTEMPTS)?;
        self.store.remove(KEY_LOCKOUT_UNTIL)?;
        Ok(())
    }

    /// Seconds until the active block lapses, rounded up. 0 when open.
    pub fn remaining_seconds(&self) -> u64 {
        let state = match self.read_state() {
            Ok(state) => state,
            Err(_) => return 0,
        };
        match state.blocked_until {
            Some(until) => {
                let millis = (until - Utc::now()).num_milliseconds();
                if millis <= 0 {
                    0
                } else {
                    (millis as u64).div_ceil(1000)
                }
            }
            None => 0,
        }
    }

    /// Current state after the lazy-expiry check.
    pub fn state(&self) -> Result<LockoutState> {
        self.read_state()
    }

    /// Read persisted state, resetting it first if the block has lapsed.
    fn read_state(&self) -> Result<LockoutState> {
        let failed_attempts = self
            .store
            .get(KEY_LOCKOUT_ATTEMPTS)?
            .and_then(|raw| raw.parse::<u32>().ok())
            .unwrap_or(0);
        let blocked_until = self
            .store
            .get(KEY_LOCKOUT_UNTIL)?
            .and_then(|raw| DateTime::parse_from_rfc3339(&raw).ok())
            .map(|dt| dt.with_timezone(&Utc));

        if let Some(until) = blocked_until {
            if Utc::now() >= until {
                self.reset()?;
                tracing::info!("Lockout block lapsed, failure count reset");
                return Ok(LockoutState::open());
            }
        }

        Ok(LockoutState {
            failed_attempts,
            blocked_until,
        })
    }

    fn persist(&self, state: &LockoutState) -> Result<()> {
        self.store
            .set(KEY_LOCKOUT_ATTEMPTS, &state.failed_attempts.to_string())?;
        match state.blocked_until {
            Some(until) => self.store.set(KEY_LOCKOUT_UNTIL, &until.to_rfc3339())?,
            None => self.store.remove(KEY_LOCKOUT_UNTIL)?,
        }
        Ok(())
    }
}
