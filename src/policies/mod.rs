//! Timing policies for instance supervision.
//!
//! - [`JitterPolicy`] spreads monitor re-arm delays to avoid lockstep health checks
//! - [`BackoffPolicy`] spaces out kill re-dispatches after FAILSTART
//!
//! Both live in the runtime [`Config`](crate::Config) and reach instances through
//! [`Env`](crate::service::Env).

mod backoff;
mod jitter;

pub use backoff::BackoffPolicy;
pub use jitter::JitterPolicy;
