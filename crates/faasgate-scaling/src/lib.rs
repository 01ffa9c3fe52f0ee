//! faasgate-scaling — scale-from-zero admission control.
//!
//! Guarantees that by the time the proxy forwards an invocation, the
//! target function has at least one available replica, while bounding
//! latency and avoiding thundering herds.
//!
//! # Shape
//!
//! ```text
//! FunctionScaler
//!   ├── ReplicaCache    freshness-bounded replica snapshots (hot path)
//!   ├── SingleFlight    dedupes concurrent wake-ups per function (cold path)
//!   └── ProviderQuery   typed client of the provider's metadata/scale API
//! ```
//!
//! The cache hides provider latency on the hot path, single-flight
//! protects the provider on the cold path, and a bounded poll turns the
//! asynchronous readiness event into a synchronous call.

pub mod cache;
pub mod query;
pub mod scaler;
pub mod singleflight;

pub use cache::ReplicaCache;
pub use query::{CachedQuery, HttpProviderQuery, ProviderQuery, QueryError};
pub use scaler::{FunctionScaler, ScaleError, ScalerConfig};
pub use singleflight::SingleFlight;
