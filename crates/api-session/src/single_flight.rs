//! Single-flight deduplication of concurrent async work
//!
//! The first caller of `run` becomes the leader: its work is spawned on the
//! runtime and every caller (leader included) waits on a oneshot channel for
//! a clone of the result. Callers arriving while the work is in flight just
//! register another waiter. Spawning means the work runs to completion even
//! when the leader stops waiting, because other waiters depend on it.

use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::oneshot;

/// The in-flight work ended (panicked or was aborted) without a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("in-flight operation ended without producing a result")]
pub struct Abandoned;

/// Waiters registered for the current flight. `None` means idle.
type Waiters<T> = Option<Vec<oneshot::Sender<T>>>;

/// Deduplicates concurrent executions of the same operation.
///
/// State machine: idle (`None`) → in flight (`Some(waiters)`) → idle.
pub struct SingleFlight<T> {
    waiters: Mutex<Waiters<T>>,
}

impl<T> Default for SingleFlight<T> {
    fn default() -> Self {
        Self {
            waiters: Mutex::new(None),
        }
    }
}

impl<T: Clone + Send + 'static> SingleFlight<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether an operation is currently in flight.
    pub fn is_in_flight(&self) -> bool {
        self.lock().is_some()
    }

    /// Run `work` unless an identical operation is already in flight, and
    /// wait for the shared result.
    ///
    /// `work` is only invoked by the leader. All callers registered before
    /// the work completes receive the same value; notification order is
    /// unspecified.
    pub async fn run<F, Fut>(self: &Arc<Self>, work: F) -> Result<T, Abandoned>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T> + Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let leader = {
            let mut waiters = self.lock();
            match waiters.as_mut() {
                Some(pending) => {
                    pending.push(tx);
                    false
                }
                None => {
                    *waiters = Some(vec![tx]);
                    true
                }
            }
        };

        if leader {
            let flight = FlightGuard {
                owner: Some(Arc::clone(self)),
            };
            let fut = work();
            tokio::spawn(async move {
                let output = fut.await;
                flight.complete(output);
            });
        }

        rx.await.map_err(|_| Abandoned)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Waiters<T>> {
        self.waiters.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Returns the flight to idle when the spawned work finishes or unwinds.
/// On unwind the waiters' senders are dropped and they observe `Abandoned`.
struct FlightGuard<T: Clone + Send + 'static> {
    owner: Option<Arc<SingleFlight<T>>>,
}

impl<T: Clone + Send + 'static> FlightGuard<T> {
    fn complete(mut self, output: T) {
        let Some(owner) = self.owner.take() else {
            return;
        };
        let waiters = owner.lock().take().unwrap_or_default();
        for waiter in waiters {
            // Receiver gone means that caller stopped waiting
            let _ = waiter.send(output.clone());
        }
    }
}

impl<T: Clone + Send + 'static> Drop for FlightGuard<T> {
    fn drop(&mut self) {
        // Only reached with an owner if the work unwound; a completed
        // flight must not reset a newer one.
        if let Some(owner) = self.owner.take() {
            owner.lock().take();
        }
    }
}
