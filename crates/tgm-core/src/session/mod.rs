//! Client sessions.
//!
//! Every session wraps one protocol client instance bound to one working
//! directory, delivers its updates to per-kind hooks and fans notifications
//! out to its subscriber connections.
//!
//! ```text
//! SessionCore ──┬── AccountSession     (paired account, shared by subscribers)
//!               └── OnboardingSession  (QR pairing, owned by one connection)
//! ```
//!
//! Disposal is idempotent: the first caller cancels outstanding work, stops
//! update delivery and closes the client; later callers return immediately.

mod account;
mod base;
mod connections;
mod gate;
mod handler;
mod onboarding;

pub use account::AccountSession;
pub use base::SessionCore;
pub use connections::ConnectionSet;
pub use gate::{CompletionGate, ReadinessGate};
pub use handler::{dispatch, UpdateHandler};
pub use onboarding::OnboardingSession;
