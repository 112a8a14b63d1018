//! Session lifecycle orchestration.
//!
//! One [`SessionManager`] owns the in-memory [`Session`] value and funnels
//! every mutation through its methods: login (guarded by the lockout state),
//! logout, startup rehydration, and refresh. UI code never touches session
//! state directly.
//!
//! ## Expiry
//! A successful login schedules a single cancellable auto-logout task at the
//! session's expiry. Every transition that moves `expires_at` (login,
//! refresh) or ends the session (logout) aborts the previous task before
//! scheduling a replacement, so at most one pending auto-logout exists. The
//! task re-checks the active token when it fires; a logout that already
//! happened always wins the race.
//!
//! ## Persistence ordering
//! The store offers no multi-key atomicity, so writes are ordered to keep
//! partial state safe: the expiry key is written last on login and removed
//! first on logout. Rehydration requires all three session keys and treats
//! anything less as "no session", which makes its expiry check double as a
//! corruption guard.

use crate::access::PermissionEvaluator;
use crate::activity::{ActivityAction, ActivityDetails, ActivityLog};
use crate::config::Config;
use crate::lockout::LockoutGuard;
use crate::store::{StateStore, KEY_SESSION_EXPIRES, KEY_SESSION_TOKEN, KEY_SESSION_USER};
use crate::verifier::{CredentialVerifier, VerifierError};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::task::JoinHandle;

/// Shown when the credential backend cannot be reached at all.
const GENERIC_NETWORK_MESSAGE: &str =
    "Could not reach the login service. Check your connection and try again.";

// ── Data model ───────────────────────────────────────────────────

/// An authenticated operator, as the backend described them at login.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdminUser {
    pub id: String,
    pub email: String,
    pub role: String,
    #[serde(default)]
    pub permissions: Vec<String>,
    /// When this user's current session began.
    pub login_time: DateTime<Utc>,
}

/// The active session. Immutable once created: a refresh produces a new
/// value rather than moving `expires_at` in place.
#[derive(Debug, Clone)]
pub struct Session {
    /// Opaque token issued by the backend.
    pub token: String,
    pub user: AdminUser,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// Login form input.
#[derive(Debug, Clone)]
pub struct Credentials {
    pub identifier: String,
    pub secret: String,
}

impl Credentials {
    pub fn new(identifier: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            secret: secret.into(),
        }
    }
}

/// Result of a session operation, returned as a value so the UI can render
/// it synchronously. Expected failures (validation, lockout, rejected
/// credentials, expired sessions) never surface as `Err`.
#[derive(Debug, Clone)]
pub struct AuthOutcome {
    pub success: bool,
    pub user: Option<AdminUser>,
    pub message: Option<String>,
}

impl AuthOutcome {
    pub fn granted(user: AdminUser) -> Self {
        Self {
            success: true,
            user: Some(user),
            message: None,
        }
    }

    pub fn refused(message: impl Into<String>) -> Self {
        Self {
            success: false,
            user: None,
            message: Some(message.into()),
        }
    }
}

// ── Manager ──────────────────────────────────────────────────────

struct SessionState {
    session: Option<Session>,
    expiry_task: Option<JoinHandle<()>>,
}

struct Inner {
    store: Arc<dyn StateStore>,
    verifier: Arc<dyn CredentialVerifier>,
    lockout: LockoutGuard,
    activity: ActivityLog,
    evaluator: PermissionEvaluator,
    config: Config,
    // Never hold this lock across an await point.
    state: Mutex<SessionState>,
}

/// Orchestrates login, logout, rehydration, refresh, and expiry.
///
/// Cheap to clone; all clones share the same state. Must live on a tokio
/// runtime so the expiry task can be scheduled.
#[derive(Clone)]
pub struct SessionManager {
    inner: Arc<Inner>,
}

impl SessionManager {
    pub fn new(
        store: Arc<dyn StateStore>,
        verifier: Arc<dyn CredentialVerifier>,
        config: Config,
    ) -> Self {
        let lockout = LockoutGuard::new(store.clone(), config.lockout.clone());
        let activity = ActivityLog::new(store.clone());
        Self {
            inner: Arc::new(Inner {
                store,
                verifier,
                lockout,
                activity,
                evaluator: PermissionEvaluator::new(),
                config,
                state: Mutex::new(SessionState {
                    session: None,
                    expiry_task: None,
                }),
            }),
        }
    }

    // ── Operations ───────────────────────────────────────────

    /// Attempt to log in. Empty credentials and an active lockout are
    /// refused before any network call; a verifier rejection or transport
    /// failure records a failed attempt. Only store I/O errors propagate as
    /// `Err`.
    pub async fn login(&self, credentials: &Credentials) -> Result<AuthOutcome> {
        if credentials.identifier.trim().is_empty() || credentials.secret.is_empty() {
            return Ok(AuthOutcome::refused("Email and password are required"));
        }

        if self.inner.lockout.is_blocked() {
            let remaining = self.inner.lockout.remaining_seconds();
            return Ok(AuthOutcome::refused(format!(
                "Too many failed attempts. Try again in {}.",
                format_countdown(remaining)
            )));
        }

        let verified = self
            .inner
            .verifier
            .verify(credentials.identifier.trim(), &credentials.secret)
            .await;

        match verified {
            Ok(verification) => {
                let now = Utc::now();
                let user = AdminUser {
                    id: verification.user.id,
                    email: verification.user.email,
                    role: verification.user.role,
                    permissions: verification.user.permissions,
                    login_time: now,
                };
                let session = Session {
                    token: verification.token,
                    user: user.clone(),
                    issued_at: now,
                    expires_at: now + self.inner.config.session.ttl(),
                };

                self.install_session(session)?;
                self.inner.lockout.reset()?;
                self.inner
                    .activity
                    .record(ActivityAction::Login, ActivityDetails::user(&user.email, &user.role))?;
                tracing::info!(user = %user.email, role = %user.role, "Operator logged in");

                Ok(AuthOutcome::granted(user))
            }
            Err(err) => {
                // We only reach the verifier while the guard is open, so a
                // deadline on the returned state means this failure tripped
                // the block.
                let state = self.inner.lockout.record_failure()?;
                let base = match &err {
                    VerifierError::Rejected { message } => message.clone(),
                    VerifierError::Transport(_) => GENERIC_NETWORK_MESSAGE.to_string(),
                };

                self.inner.activity.record(
                    ActivityAction::LoginFailed,
                    ActivityDetails {
                        username: Some(credentials.identifier.trim().to_string()),
                        role: None,
                        message: Some(base.clone()),
                    },
                )?;

                let message = if state.blocked_until.is_some() {
                    self.inner.activity.record(
                        ActivityAction::LockoutTriggered,
                        ActivityDetails {
                            username: Some(credentials.identifier.trim().to_string()),
                            role: None,
                            message: None,
                        },
                    )?;
                    format!(
                        "{base} Too many failed attempts. Login locked for {} minutes.",
                        self.inner.config.lockout.block_secs / 60
                    )
                } else {
                    base
                };

                tracing::warn!(
                    error = %err,
                    failed_attempts = state.failed_attempts,
                    "Login attempt failed"
                );
                Ok(AuthOutcome::refused(message))
            }
        }
    }

    /// End the session: cancel the pending expiry task, clear the in-memory
    /// session, and remove the persisted keys. Idempotent: a logout with no
    /// active session is a no-op.
    pub fn logout(&self) -> Result<()> {
        let previous = {
            let mut state = self.inner.state.lock();
            if let Some(task) = state.expiry_task.take() {
                task.abort();
            }
            state.session.take()
        };

        self.clear_session_keys()?;

        if let Some(session) = previous {
            self.inner.activity.record(
                ActivityAction::Logout,
                ActivityDetails::user(&session.user.email, &session.user.role),
            )?;
            tracing::info!(user = %session.user.email, "Operator logged out");
        }
        Ok(())
    }

    /// Restore a persisted session at startup. Anything less than a full,
    /// unexpired session in the store (missing keys, corrupt values, a
    /// lapsed expiry) sweeps the leftovers and comes back refused.
    pub fn rehydrate(&self) -> Result<AuthOutcome> {
        let token = self.inner.store.get(KEY_SESSION_TOKEN)?;
        let user_raw = self.inner.store.get(KEY_SESSION_USER)?;
        let expires_raw = self.inner.store.get(KEY_SESSION_EXPIRES)?;

        let (token, user_raw, expires_raw) = match (token, user_raw, expires_raw) {
            (Some(t), Some(u), Some(e)) => (t, u, e),
            _ => {
                self.clear_session_keys()?;
                return Ok(AuthOutcome::refused("No stored session"));
            }
        };

        let expires_at = DateTime::parse_from_rfc3339(&expires_raw)
            .map(|dt| dt.with_timezone(&Utc))
            .ok();
        let user: Option<AdminUser> = serde_json::from_str(&user_raw).ok();

        let (expires_at, user) = match (expires_at, user) {
            (Some(expires_at), Some(user)) => (expires_at, user),
            _ => {
                tracing::warn!("Stored session is corrupt, discarding");
                self.clear_session_keys()?;
                return Ok(AuthOutcome::refused("No stored session"));
            }
        };

        if Utc::now() >= expires_at {
            self.clear_session_keys()?;
            self.inner.activity.record(
                ActivityAction::SessionExpired,
                ActivityDetails::user(&user.email, &user.role),
            )?;
            tracing::info!(user = %user.email, "Stored session had expired");
            return Ok(AuthOutcome::refused("Session expired"));
        }

        let session = Session {
            token,
            user: user.clone(),
            issued_at: user.login_time,
            expires_at,
        };
        self.install_session(session)?;
        tracing::info!(
            user = %user.email,
            expires_at = %expires_at.to_rfc3339(),
            "Session restored"
        );
        Ok(AuthOutcome::granted(user))
    }

    /// Extend the active session by a full TTL from now. The prior expiry
    /// task is cancelled and replaced. Refused when no session is active.
    pub fn refresh_session(&self) -> Result<AuthOutcome> {
        let current = self.inner.state.lock().session.clone();
        let current = match current {
            Some(session) => session,
            None => return Ok(AuthOutcome::refused("No active session to refresh")),
        };

        let refreshed = Session {
            token: current.token,
            user: current.user.clone(),
            issued_at: current.issued_at,
            expires_at: Utc::now() + self.inner.config.session.ttl(),
        };
        let expires_at = refreshed.expires_at;

        self.install_session(refreshed)?;
        self.inner.activity.record(
            ActivityAction::SessionRefreshed,
            ActivityDetails::user(&current.user.email, &current.user.role),
        )?;
        tracing::debug!(
            user = %current.user.email,
            expires_at = %expires_at.to_rfc3339(),
            "Session refreshed"
        );
        Ok(AuthOutcome::granted(current.user))
    }

    // ── Queries ──────────────────────────────────────────────

    pub fn current_session(&self) -> Option<Session> {
        self.inner.state.lock().session.clone()
    }

    pub fn current_user(&self) -> Option<AdminUser> {
        self.inner.state.lock().session.as_ref().map(|s| s.user.clone())
    }

    pub fn is_authenticated(&self) -> bool {
        self.inner.state.lock().session.is_some()
    }

    /// Seconds until the active session expires, rounded up. 0 when logged
    /// out.
    pub fn remaining_seconds(&self) -> u64 {
        match self.inner.state.lock().session {
            Some(ref session) => {
                let millis = (session.expires_at - Utc::now()).num_milliseconds();
                if millis <= 0 {
                    0
                } else {
                    (millis as u64).div_ceil(1000)
                }
            }
            None => 0,
        }
    }

    /// Whether the current operator holds `permission`. `false` whenever no
    /// session is active.
    pub fn has_permission(&self, permission: &str) -> bool {
        match self.current_user() {
            Some(user) => self.inner.evaluator.has_permission(&user, permission),
            None => false,
        }
    }

    /// The lockout guard, for UI countdown rendering.
    pub fn lockout(&self) -> &LockoutGuard {
        &self.inner.lockout
    }

    /// The activity log.
    pub fn activity(&self) -> &ActivityLog {
        &self.inner.activity
    }

    // ── Internals ────────────────────────────────────────────

    /// Persist the session, make it current, and (re)schedule the auto
    /// logout. The previous expiry task, if any, is aborted first.
    fn install_session(&self, session: Session) -> Result<()> {
        let user_json =
            serde_json::to_string(&session.user).context("Failed to encode session user")?;

        // Expiry key last: a write cut short before it lands rehydrates as
        // logged out instead of as a half-written session.
        self.inner.store.set(KEY_SESSION_TOKEN, &session.token)?;
        self.inner.store.set(KEY_SESSION_USER, &user_json)?;
        self.inner
            .store
            .set(KEY_SESSION_EXPIRES, &session.expires_at.to_rfc3339())?;

        let mut state = self.inner.state.lock();
        if let Some(task) = state.expiry_task.take() {
            task.abort();
        }
        state.expiry_task = Some(self.spawn_expiry_task(&session));
        state.session = Some(session);
        Ok(())
    }

    /// One-shot task that logs the session out at `expires_at`. It
    /// re-checks the active token and deadline when it fires, so a logout
    /// or refresh that slipped in ahead of it is never undone.
    fn spawn_expiry_task(&self, session: &Session) -> JoinHandle<()> {
        let inner = Arc::clone(&self.inner);
        let token = session.token.clone();
        let expires_at = session.expires_at;

        tokio::spawn(async move {
            let wait = (expires_at - Utc::now()).to_std().unwrap_or_default();
            tokio::time::sleep(wait).await;

            let expired = {
                let mut state = inner.state.lock();
                match state.session {
                    Some(ref s) if s.token == token && Utc::now() >= s.expires_at => {
                        state.expiry_task = None;
                        state.session.take()
                    }
                    _ => None,
                }
            };

            if let Some(session) = expired {
                for key in [KEY_SESSION_EXPIRES, KEY_SESSION_TOKEN, KEY_SESSION_USER] {
                    if let Err(e) = inner.store.remove(key) {
                        tracing::warn!("Failed to clear expired session key {key}: {e:#}");
                    }
                }
                if let Err(e) = inner.activity.record(
                    ActivityAction::SessionExpired,
                    ActivityDetails::user(&session.user.email, &session.user.role),
                ) {
                    tracing::warn!("Failed to record session expiry: {e:#}");
                }
                tracing::info!(user = %session.user.email, "Session expired, logged out");
            }
        })
    }

    /// Remove the persisted session. Expiry key first: once it is gone the
    /// store reads as logged out even if the later removals never run.
    fn clear_session_keys(&self) -> Result<()> {
        self.inner.store.remove(KEY_SESSION_EXPIRES)?;
        self.inner.store.remove(KEY_SESSION_TOKEN)?;
        self.inner.store.remove(KEY_SESSION_USER)?;
        Ok(())
    }
}

/// "14m 59s" / "45s" countdown formatting for lockout messages.
fn format_countdown(secs: u64) -> String {
    if secs >= 60 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{secs}s")
    }
}
