//! Session and access-control core for the ops admin console.
//!
//! Everything else in the console is plumbing (fetch, render, toast). The
//! decisions with real state live here:
//!
//! - whether an operator may act right now ([`SessionManager`],
//!   [`access::PermissionEvaluator`])
//! - for how long ([`Session`] expiry, refresh, and the auto-logout task)
//! - how failed logins are throttled ([`lockout::LockoutGuard`])
//! - how those decisions survive a restart ([`store::StateStore`])
//!
//! The REST backend that actually checks passwords is an external
//! collaborator behind the [`verifier::CredentialVerifier`] trait; the CRUD
//! screens consume this crate's answers and hold no auth state of their own.

pub mod access;
pub mod activity;
pub mod config;
pub mod lockout;
pub mod session;
pub mod store;
pub mod verifier;

pub use access::PermissionEvaluator;
pub use activity::{ActivityAction, ActivityDetails, ActivityEntry, ActivityFilter, ActivityLog};
pub use config::Config;
pub use lockout::{LockoutGuard, LockoutState};
pub use session::{AdminUser, AuthOutcome, Credentials, Session, SessionManager};
pub use store::{MemoryStateStore, SqliteStateStore, StateStore};
pub use verifier::{CredentialVerifier, HttpCredentialVerifier, VerifierError};

/// Initialize the global tracing subscriber (fmt output, `RUST_LOG` env
/// filter, `info` default). Call once from the host application's startup
/// path; repeated calls are ignored.
pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}
