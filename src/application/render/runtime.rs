use std::future::Future;
use std::sync::Arc;

use dashmap::DashMap;
use futures::future::{BoxFuture, FutureExt, Shared};

use crate::domain::fingerprint::Fingerprint;

use super::types::{RenderError, RenderOutcome};

type SharedRender = Shared<BoxFuture<'static, RenderOutcome>>;

/// Tracks fingerprints that currently have a render in progress.
///
/// The first caller to miss the cache starts the render as its own task and
/// registers a shared completion handle; callers that miss while it is running
/// await that handle instead of rendering again. The registration is removed
/// when the task ends, whether it succeeded, failed or panicked.
#[derive(Default, Clone)]
pub struct InFlightRenders {
    flights: Arc<DashMap<Fingerprint, SharedRender>>,
}

/// A caller's stake in an in-progress render.
pub enum Flight {
    /// This caller started the render.
    Started(SharedRender),
    /// This caller joined a render started by someone else.
    Joined(SharedRender),
}

impl Flight {
    pub fn is_leader(&self) -> bool {
        matches!(self, Flight::Started(_))
    }

    pub async fn wait(self) -> RenderOutcome {
        match self {
            Flight::Started(render) | Flight::Joined(render) => render.await,
        }
    }
}

impl InFlightRenders {
    pub fn new() -> Self {
        Self {
            flights: Arc::new(DashMap::new()),
        }
    }

    /// Join the render registered for `fingerprint`, or start one with `start`.
    ///
    /// `start` is only invoked when no render is in flight. Must be called from
    /// within a tokio runtime.
    pub fn join_or_start<F, Fut>(&self, fingerprint: Fingerprint, start: F) -> Flight
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = RenderOutcome> + Send + 'static,
    {
        use dashmap::mapref::entry::Entry;

        match self.flights.entry(fingerprint) {
            Entry::Occupied(occupied) => Flight::Joined(occupied.get().clone()),
            Entry::Vacant(vacant) => {
                let guard = FlightGuard {
                    fingerprint,
                    flights: Arc::clone(&self.flights),
                };
                let work = start();
                let task = tokio::spawn(async move {
                    let _guard = guard;
                    work.await
                });
                let render = task
                    .map(|joined| {
                        joined.unwrap_or_else(|err| {
                            RenderOutcome::RenderFailed(RenderError::aborted(err.to_string()))
                        })
                    })
                    .boxed()
                    .shared();
                vacant.insert(render.clone());
                Flight::Started(render)
            }
        }
    }

    pub fn contains(&self, fingerprint: &Fingerprint) -> bool {
        self.flights.contains_key(fingerprint)
    }

    pub fn len(&self) -> usize {
        self.flights.len()
    }

    pub fn is_empty(&self) -> bool {
        self.flights.is_empty()
    }
}

struct FlightGuard {
    fingerprint: Fingerprint,
    flights: Arc<DashMap<Fingerprint, SharedRender>>,
}

impl Drop for FlightGuard {
    fn drop(&mut self) {
        self.flights.remove(&self.fingerprint);
    }
}
