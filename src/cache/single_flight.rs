use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::watch;
use tracing::debug;

use crate::error::{CostDrillError, Result};

type Outcome<V> = Option<Result<V>>;
type InFlight<V> = Arc<Mutex<HashMap<String, watch::Receiver<Outcome<V>>>>>;

/// Collapses concurrent fetches for the same key into one
///
/// The fetch runs on its own task, so a caller that gives up waiting does not
/// cancel the work other callers are waiting on. Results are shared by clone;
/// failures are handed to every waiter but never remembered.
pub struct SingleFlight<V> {
    in_flight: InFlight<V>,
}

impl<V> Default for SingleFlight<V> {
    fn default() -> Self {
        Self {
            in_flight: Arc::new(Mutex::new(HashMap::new())),
        }
    }
}

impl<V> SingleFlight<V>
where
    V: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the cached value, join the running fetch, or start a new one
    ///
    /// `cached` is consulted again while the flight table is locked. A fetch
    /// that stores its result before completing is therefore never followed
    /// by a redundant second fetch for the same key.
    pub async fn get_or_fetch<C, M, Fut>(&self, key: &str, cached: C, make_fetch: M) -> Result<V>
    where
        C: FnOnce() -> Option<V>,
        M: FnOnce() -> Fut,
        Fut: Future<Output = Result<V>> + Send + 'static,
    {
        let mut receiver = {
            let mut in_flight = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);

            if let Some(value) = cached() {
                return Ok(value);
            }

            match in_flight.get(key) {
                Some(receiver) => {
                    debug!(key, "joining in-flight fetch");
                    receiver.clone()
                }
                None => {
                    debug!(key, "starting fetch");
                    let (sender, receiver) = watch::channel(None);
                    in_flight.insert(key.to_string(), receiver.clone());

                    let guard = FlightGuard {
                        in_flight: self.in_flight.clone(),
                        key: key.to_string(),
                    };
                    let fetch = make_fetch();
                    tokio::spawn(async move {
                        let outcome = fetch.await;
                        // Deregister first so late callers start fresh instead of reusing a failure
                        drop(guard);
                        // Waiters may all be gone; the value is still cached by `fetch`.
                        let _ = sender.send(Some(outcome));
                    });
                    receiver
                }
            }
        };

        let outcome = receiver
            .wait_for(Option::is_some)
            .await
            .map_err(|_| CostDrillError::FetchInterrupted(key.to_string()))?;

        match outcome.as_ref() {
            Some(result) => result.clone(),
            None => Err(CostDrillError::FetchInterrupted(key.to_string())),
        }
    }

    /// Number of keys with a fetch currently running
    pub fn in_flight(&self) -> usize {
        self.in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

/// Deregisters a flight when its task ends, panics included
struct FlightGuard<V> {
    in_flight: InFlight<V>,
    key: String,
}

impl<V> Drop for FlightGuard<V> {
    fn drop(&mut self) {
        self.in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.key);
    }
}
