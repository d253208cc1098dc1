//! Observable result of a request and the projector that publishes it.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::watch;

use crate::error::ApiError;

/// Result object exposed to callers.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RequestState<T> {
  pub data: Option<T>,
  pub error: Option<ApiError>,
  pub is_loading: bool,
  /// A network call for the current request is in flight
  pub is_fetching: bool,
  pub is_error: bool,
  pub is_retrying: bool,
  /// Diagnostic marker that `data` was served from the cache.
  /// Only populated in debug builds.
  #[serde(skip_serializing_if = "Option::is_none")]
  pub cached: Option<bool>,
}

impl<T> RequestState<T> {
  /// Shape a request starts in (and returns to when it is re-keyed).
  /// Only an enabled request shows as loading.
  pub fn initial(enabled: bool) -> Self {
    Self {
      data: None,
      error: None,
      is_loading: enabled,
      is_fetching: false,
      is_error: false,
      is_retrying: false,
      cached: None,
    }
  }

  pub fn is_success(&self) -> bool {
    self.data.is_some() && !self.is_loading && !self.is_error
  }

  /// Cached value served while revalidation is pending.
  pub(crate) fn apply_cached(&mut self, data: T) {
    self.data = Some(data);
    self.error = None;
    self.is_error = false;
    self.is_loading = false;
    self.is_fetching = true;
    self.is_retrying = false;
    self.cached = cfg!(debug_assertions).then_some(true);
  }

  /// Attempt started.
  pub(crate) fn apply_loading(&mut self) {
    self.error = None;
    self.is_error = false;
    self.is_loading = true;
    self.is_fetching = true;
  }

  pub(crate) fn apply_success(&mut self, data: T) {
    self.data = Some(data);
    self.error = None;
    self.is_error = false;
    self.is_loading = false;
    self.is_fetching = false;
    self.is_retrying = false;
    self.cached = None;
  }

  /// Previous attempt failed and another one is about to run.
  pub(crate) fn apply_retrying(&mut self) {
    self.data = None;
    self.error = None;
    self.is_error = false;
    self.is_loading = true;
    self.is_fetching = true;
    self.is_retrying = true;
    self.cached = None;
  }

  /// Retry budget exhausted.
  pub(crate) fn apply_failure(&mut self, error: ApiError) {
    self.data = None;
    self.error = Some(error);
    self.is_error = true;
    self.is_loading = false;
    self.is_fetching = false;
    self.is_retrying = false;
    self.cached = None;
  }
}

/// Owns the observable [`RequestState`] and notifies subscribers when the
/// orchestrator emits a new one.
///
/// Every emission wakes subscribers (the re-render trigger). Silent updates
/// change the stored state without waking anyone.
///
/// The projector also owns the request generation. Advancing it and every
/// `*_if_current` change run under the channel's write lock, so a change
/// guarded by an outdated generation can never land after the advance.
#[derive(Debug)]
pub struct StateProjector<T> {
  tx: watch::Sender<RequestState<T>>,
  emissions: AtomicU64,
  generation: AtomicU64,
}

impl<T> StateProjector<T> {
  /// Start a new generation and return it. Changes guarded by older
  /// generations are refused from now on.
  pub fn advance(&self) -> u64 {
    let mut generation = 0;
    self.tx.send_if_modified(|_| {
      generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
      false
    });
    generation
  }

  pub fn generation(&self) -> u64 {
    self.generation.load(Ordering::SeqCst)
  }
}

impl<T: Clone> StateProjector<T> {
  pub fn new(initial: RequestState<T>) -> Self {
    let (tx, _rx) = watch::channel(initial);
    Self {
      tx,
      emissions: AtomicU64::new(0),
      generation: AtomicU64::new(0),
    }
  }

  /// Apply `change` and notify subscribers, unless `generation` is outdated.
  /// Returns whether the change was applied.
  pub fn emit_if_current(
    &self,
    generation: u64,
    change: impl FnOnce(&mut RequestState<T>),
  ) -> bool {
    let applied = self.tx.send_if_modified(|state| {
      if self.generation.load(Ordering::SeqCst) != generation {
        return false;
      }
      change(state);
      true
    });
    if applied {
      self.emissions.fetch_add(1, Ordering::SeqCst);
    }
    applied
  }

  /// Apply `change` without notifying subscribers, unless `generation` is
  /// outdated. Returns whether the change was applied.
  pub fn update_silently_if_current(
    &self,
    generation: u64,
    change: impl FnOnce(&mut RequestState<T>),
  ) -> bool {
    let mut applied = false;
    self.tx.send_if_modified(|state| {
      if self.generation.load(Ordering::SeqCst) == generation {
        change(state);
        applied = true;
      }
      false
    });
    applied
  }

  /// Apply `change` and notify subscribers.
  pub fn emit(&self, change: impl FnOnce(&mut RequestState<T>)) {
    self.tx.send_modify(change);
    self.emissions.fetch_add(1, Ordering::SeqCst);
  }

  /// Apply `change` without notifying subscribers.
  pub fn update_silently(&self, change: impl FnOnce(&mut RequestState<T>)) {
    self.tx.send_if_modified(|state| {
      change(state);
      false
    });
  }

  pub fn snapshot(&self) -> RequestState<T> {
    self.tx.borrow().clone()
  }

  pub fn subscribe(&self) -> watch::Receiver<RequestState<T>> {
    self.tx.subscribe()
  }

  /// Number of notifying emissions so far.
  pub fn emissions(&self) -> u64 {
    self.emissions.load(Ordering::SeqCst)
  }
}
