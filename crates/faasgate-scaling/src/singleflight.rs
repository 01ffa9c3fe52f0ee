//! Deduplication of concurrent identical operations.
//!
//! The first caller for a key installs an in-progress flight; callers
//! that arrive while it is running attach to the same future and
//! observe its result. The last caller to observe completion removes
//! the entry, so a later caller starts a new flight.
//!
//! Flights are shared futures: if the installing caller is cancelled
//! mid-run (client disconnect), any attached caller keeps driving the
//! flight to completion, and a flight nobody is awaiting simply parks
//! until the next caller attaches.

use std::collections::HashMap;
use std::sync::Mutex;

use futures_util::future::{BoxFuture, FutureExt, Shared};

type Flight<V> = Shared<BoxFuture<'static, V>>;

/// Keyed single-flight group.
pub struct SingleFlight<V: Clone> {
    inflight: Mutex<HashMap<String, Flight<V>>>,
}

impl<V> SingleFlight<V>
where
    V: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self {
            inflight: Mutex::new(HashMap::new()),
        }
    }

    /// Run `make()` for `key`, or attach to the flight already running
    /// for it. Every caller receives the same result.
    pub async fn run<F>(&self, key: &str, make: F) -> V
    where
        F: FnOnce() -> BoxFuture<'static, V>,
    {
        let flight = {
            let mut inflight = self.inflight.lock().expect("single-flight lock");
            match inflight.get(key) {
                Some(flight) => flight.clone(),
                None => {
                    let flight = make().shared();
                    inflight.insert(key.to_string(), flight.clone());
                    flight
                }
            }
        };

        let value = flight.clone().await;

        // Completion observed: drop the entry unless a newer flight for
        // the same key has already replaced it.
        let mut inflight = self.inflight.lock().expect("single-flight lock");
        if let Some(current) = inflight.get(key) {
            if Shared::ptr_eq(current, &flight) {
                inflight.remove(key);
            }
        }

        value
    }

    /// Number of flights currently in progress.
    pub fn len(&self) -> usize {
        self.inflight.lock().expect("single-flight lock").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<V> Default for SingleFlight<V>
where
    V: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}
