//! faasgate-probe — upstream readiness checks.
//!
//! The scaler proves a replica is *running*; the prober guards the gap
//! between "running" and "accepting traffic" by issuing a cheap HTTP
//! check against the function before the proxy forwards. Outcomes are
//! cached for a short TTL in both directions so failing functions are
//! not hammered.

mod prober;

pub use prober::{FunctionProber, ProbeCache};
