//! faasgate-queue — the asynchronous invocation path.
//!
//! Accepted async invocations are serialized into a self-contained
//! message (method, path, headers, body, callback URL, call ID) and
//! published to a durable message bus. A queue worker replays them
//! against the function and posts the result to the callback URL.
//!
//! The gateway's contract ends at the publish: once the broker has the
//! message, the client gets its `202 Accepted` and the request body is
//! not retained.

mod nats;
mod request;

pub use nats::{NatsQueue, Queue, QueueError};
pub use request::QueuedInvocation;
