//! Stale-while-revalidate fetch orchestration.
//!
//! A [`FetchOrchestrator`] owns one observable [`RequestState`] and keeps it in
//! sync with a [`RequestDescriptor`]: cached data is served immediately, the
//! network is always consulted, and the state (and cache) only change when the
//! fresh payload differs from what was cached.
//!
//! # Example
//!
//! ```ignore
//! let transport = Arc::new(ReqwestTransport::new()?);
//! let mut users = FetchOrchestrator::<Vec<User>>::new(
//!     ApiContext::scoped().with_base_url("https://api.example.com"),
//!     transport,
//!     FetchOptions::new().on_error(|e| eprintln!("{}", e)),
//! );
//!
//! users.start(RequestDescriptor::get("/users").with_retry(3));
//!
//! let mut rx = users.subscribe();
//! while rx.changed().await.is_ok() {
//!     render(&rx.borrow_and_update());
//! }
//! ```

use serde::de::DeserializeOwned;
use serde_json::Value;
use std::ops::ControlFlow;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::cache::is_truthy;
use crate::context::ApiContext;
use crate::error::{normalize, ApiError, FetchError};
use crate::key::{self, RequestKey};
use crate::request::RequestDescriptor;
use crate::retry::{run_with_retry, Backoff, RetryBudget};
use crate::state::{RequestState, StateProjector};
use crate::transport::{self, Transport, TransportRequest};

pub type SuccessCallback<T> = Arc<dyn Fn(&T) + Send + Sync>;
pub type ErrorCallback = Arc<dyn Fn(&ApiError) + Send + Sync>;

/// Caller hooks and retry pacing shared by the fetch and mutation orchestrators.
pub struct FetchOptions<T> {
  on_success: Option<SuccessCallback<T>>,
  on_error: Option<ErrorCallback>,
  backoff: Backoff,
}

impl<T> FetchOptions<T> {
  pub fn new() -> Self {
    Self {
      on_success: None,
      on_error: None,
      backoff: Backoff::None,
    }
  }

  /// Called with every fresh payload, including ones equal to the cached value.
  pub fn on_success(mut self, callback: impl Fn(&T) + Send + Sync + 'static) -> Self {
    self.on_success = Some(Arc::new(callback));
    self
  }

  /// Called once per terminal failure, after the retry budget is spent.
  pub fn on_error(mut self, callback: impl Fn(&ApiError) + Send + Sync + 'static) -> Self {
    self.on_error = Some(Arc::new(callback));
    self
  }

  pub fn with_backoff(mut self, backoff: Backoff) -> Self {
    self.backoff = backoff;
    self
  }

  pub fn backoff(&self) -> Backoff {
    self.backoff
  }

  pub(crate) fn notify_success(&self, data: &T) {
    if let Some(callback) = &self.on_success {
      callback(data);
    }
  }

  pub(crate) fn notify_error(&self, error: &ApiError) {
    if let Some(callback) = &self.on_error {
      callback(error);
    }
  }
}

impl<T> Default for FetchOptions<T> {
  fn default() -> Self {
    Self::new()
  }
}

impl<T> Clone for FetchOptions<T> {
  fn clone(&self) -> Self {
    Self {
      on_success: self.on_success.clone(),
      on_error: self.on_error.clone(),
      backoff: self.backoff,
    }
  }
}

/// Descriptor snapshot with its resolved key and URL.
struct Prepared {
  descriptor: RequestDescriptor,
  key: RequestKey,
  url: String,
}

/// State shared between the orchestrator handle and its spawned tasks.
struct Shared<T> {
  context: ApiContext,
  transport: Arc<dyn Transport>,
  options: FetchOptions<T>,
  descriptor: Mutex<Option<RequestDescriptor>>,
  projector: StateProjector<T>,
  stopped: AtomicBool,
}

impl<T> Shared<T> {
  /// Bumped by every trigger, re-key and stop; results of older generations are dropped.
  fn next_generation(&self) -> u64 {
    self.projector.advance()
  }
}

impl<T> Shared<T>
where
  T: DeserializeOwned + Clone + Send + Sync + 'static,
{
  fn descriptor(&self) -> Option<RequestDescriptor> {
    self
      .descriptor
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
      .clone()
  }

  fn replace_descriptor(&self, descriptor: RequestDescriptor) -> Option<RequestDescriptor> {
    self
      .descriptor
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
      .replace(descriptor)
  }

  /// Snapshot the descriptor and resolve its key. Automatic triggers skip
  /// disabled descriptors; manual ones don't.
  fn prepare(&self, manual: bool) -> Option<Prepared> {
    let descriptor = self.descriptor()?;
    if !descriptor.enabled && !manual {
      return None;
    }

    let base_api_url = self.context.base_api_url();
    Some(Prepared {
      key: key::resolve(&descriptor, base_api_url),
      url: key::final_url(base_api_url, &descriptor.url),
      descriptor,
    })
  }

  fn resolve_key(&self, descriptor: &RequestDescriptor) -> RequestKey {
    key::resolve(descriptor, self.context.base_api_url())
  }

  /// Early-out check. Effects themselves go through the projector's
  /// `*_if_current` methods, which re-check under the state lock.
  fn is_current(&self, generation: u64) -> bool {
    !self.stopped.load(Ordering::SeqCst) && self.projector.generation() == generation
  }

  /// Reset to the initial shape of a freshly (re)started request.
  fn reset(&self, generation: u64, enabled: bool) {
    self
      .projector
      .emit_if_current(generation, |state| *state = RequestState::initial(enabled));
  }

  /// Emit the cached value, if any, and return it for the staleness check.
  fn read_cache(&self, generation: u64, key: &RequestKey) -> Option<Value> {
    let cached = self.context.get_cache(key).filter(is_truthy)?;

    match serde_json::from_value::<T>(cached.clone()) {
      Ok(data) => {
        if self
          .projector
          .emit_if_current(generation, |state| state.apply_cached(data))
        {
          debug!(key = %key.fingerprint(), "served cached value");
        }
        Some(cached)
      }
      Err(e) => {
        warn!(key = %key.fingerprint(), "ignoring cached value that does not decode: {}", e);
        None
      }
    }
  }

  /// One network round trip followed by reconciliation against `cached`.
  async fn attempt(
    &self,
    generation: u64,
    prepared: &Prepared,
    cached: Option<Value>,
  ) -> Result<(), FetchError> {
    self
      .projector
      .update_silently_if_current(generation, |state| state.is_fetching = true);

    let descriptor = &prepared.descriptor;
    let request = TransportRequest::new(
      prepared.url.clone(),
      descriptor.method,
      descriptor.body.clone(),
      &descriptor.headers,
    );
    let fresh = transport::execute(self.transport.as_ref(), request).await?;
    let data: T =
      serde_json::from_value(fresh.clone()).map_err(|e| FetchError::Decode(e.to_string()))?;

    if !self.is_current(generation) {
      debug!(key = %prepared.key.fingerprint(), "discarding response of superseded request");
      return Ok(());
    }

    self.options.notify_success(&data);

    let outdated = cached.as_ref().map_or(true, |cached| *cached != fresh);
    if outdated {
      // The cache write shares the emit's generation check
      let stored = self.projector.emit_if_current(generation, |state| {
        self
          .context
          .set_cache(&prepared.key, fresh, descriptor.cache_expiry);
        state.apply_success(data);
      });
      if stored {
        debug!(key = %prepared.key.fingerprint(), "cache outdated, stored fresh value");
      } else {
        debug!(key = %prepared.key.fingerprint(), "discarding response of superseded request");
      }
    } else {
      debug!(key = %prepared.key.fingerprint(), "cached value is up to date");
      self
        .projector
        .update_silently_if_current(generation, |state| state.is_fetching = false);
    }

    Ok(())
  }

  /// Attempt, retry within budget, and surface the terminal failure.
  ///
  /// `primed` is the cache read already done for the first attempt.
  async fn run(&self, generation: u64, prepared: Prepared, primed: Option<Value>) {
    let budget = RetryBudget::new(prepared.descriptor.retry);
    let prepared = &prepared;
    let mut primed = Some(primed);

    let result = run_with_retry(
      budget,
      self.options.backoff(),
      move |_| {
        let cached = match primed.take() {
          Some(cached) => cached,
          None => self.read_cache(generation, &prepared.key),
        };
        self.attempt(generation, prepared, cached)
      },
      move |_, retry| {
        if self.stopped.load(Ordering::SeqCst)
          || !self
            .projector
            .emit_if_current(generation, |state| state.apply_retrying())
        {
          return ControlFlow::Break(());
        }
        debug!(key = %prepared.key.fingerprint(), retry, "retrying request");
        ControlFlow::Continue(())
      },
    )
    .await;

    let Err(error) = result else {
      return;
    };
    if !self.is_current(generation) {
      debug!(key = %prepared.key.fingerprint(), "discarding failure of superseded request");
      return;
    }

    let error = normalize(&error);
    warn!(key = %prepared.key.fingerprint(), "request failed: {}", error);
    self.options.notify_error(&error);
    self
      .projector
      .emit_if_current(generation, |state| state.apply_failure(error));
  }

  /// Automatic trigger: cache-first emit now, network in the background.
  fn trigger(self: &Arc<Self>) {
    let Some(prepared) = self.prepare(false) else {
      debug!("request disabled, not triggering");
      return;
    };

    let generation = self.next_generation();
    let cached = self.read_cache(generation, &prepared.key);

    let shared = Arc::clone(self);
    tokio::spawn(async move {
      shared.run(generation, prepared, cached).await;
    });
  }
}

/// Drives one logical request through cache, network, retry and polling.
///
/// Lifecycle: [`start`](Self::start) with a descriptor, [`update`](Self::update)
/// when the descriptor changes, [`stop`](Self::stop) (or drop) to tear down.
/// Must be used inside a tokio runtime.
pub struct FetchOrchestrator<T> {
  shared: Arc<Shared<T>>,
  poller: Option<JoinHandle<()>>,
}

impl<T> FetchOrchestrator<T>
where
  T: DeserializeOwned + Clone + Send + Sync + 'static,
{
  pub fn new(
    context: ApiContext,
    transport: Arc<dyn Transport>,
    options: FetchOptions<T>,
  ) -> Self {
    Self {
      shared: Arc::new(Shared {
        context,
        transport,
        options,
        descriptor: Mutex::new(None),
        projector: StateProjector::new(RequestState::initial(false)),
        stopped: AtomicBool::new(false),
      }),
      poller: None,
    }
  }

  /// Begin serving `descriptor`: reset state, trigger if enabled, start polling.
  ///
  /// A cached value is emitted before this returns; the network call runs
  /// on a spawned task.
  pub fn start(&mut self, descriptor: RequestDescriptor) {
    let enabled = descriptor.enabled;
    info!(
      key = %self.shared.resolve_key(&descriptor).fingerprint(),
      url = %descriptor.url,
      enabled,
      "starting request"
    );

    self.shared.stopped.store(false, Ordering::SeqCst);
    self.shared.replace_descriptor(descriptor);
    let generation = self.shared.next_generation();
    self.shared.reset(generation, enabled);
    self.shared.trigger();
    self.restart_polling();
  }

  /// Switch to a new descriptor.
  ///
  /// A changed key or `enabled` flag resets the state and triggers again.
  /// Polling restarts whenever the key, `enabled` or the interval changes.
  /// Other changes (headers, retry, TTL) apply from the next trigger on.
  pub fn update(&mut self, descriptor: RequestDescriptor) {
    if self.shared.stopped.load(Ordering::SeqCst) {
      return self.start(descriptor);
    }
    let Some(previous) = self.shared.replace_descriptor(descriptor.clone()) else {
      return self.start(descriptor);
    };

    let key = self.shared.resolve_key(&descriptor);
    let rekeyed =
      self.shared.resolve_key(&previous) != key || previous.enabled != descriptor.enabled;

    if rekeyed {
      info!(key = %key.fingerprint(), enabled = descriptor.enabled, "request re-keyed");
      let generation = self.shared.next_generation();
      self.shared.reset(generation, descriptor.enabled);
      self.shared.trigger();
    }

    if rekeyed || previous.poll_interval != descriptor.poll_interval {
      self.restart_polling();
    }
  }

  /// Tear down: cancel polling and drop the results of in-flight calls.
  pub fn stop(&mut self) {
    debug!("stopping request");
    self.shared.stopped.store(true, Ordering::SeqCst);
    self.shared.next_generation();
    if let Some(poller) = self.poller.take() {
      poller.abort();
    }
  }

  /// Manually re-run the request and wait until it settles.
  ///
  /// Works for disabled (manual-trigger) descriptors too. No-op before
  /// [`start`](Self::start) and after [`stop`](Self::stop).
  pub async fn trigger_api(&self) {
    if self.shared.stopped.load(Ordering::SeqCst) {
      return;
    }
    let Some(prepared) = self.shared.prepare(true) else {
      return;
    };

    let generation = self.shared.next_generation();
    let cached = self.shared.read_cache(generation, &prepared.key);
    self.shared.run(generation, prepared, cached).await;
  }

  pub fn state(&self) -> RequestState<T> {
    self.shared.projector.snapshot()
  }

  pub fn subscribe(&self) -> watch::Receiver<RequestState<T>> {
    self.shared.projector.subscribe()
  }

  /// Number of state emissions (re-render notifications) so far.
  pub fn emissions(&self) -> u64 {
    self.shared.projector.emissions()
  }

  /// Key of the current descriptor.
  pub fn key(&self) -> Option<RequestKey> {
    self
      .shared
      .descriptor()
      .map(|descriptor| self.shared.resolve_key(&descriptor))
  }

  fn restart_polling(&mut self) {
    if let Some(poller) = self.poller.take() {
      poller.abort();
    }

    let Some(interval) = self
      .shared
      .descriptor()
      .and_then(|descriptor| descriptor.active_poll_interval())
    else {
      return;
    };

    debug!("polling every {:?}", interval);
    let shared = Arc::downgrade(&self.shared);
    self.poller = Some(tokio::spawn(async move {
      let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
      ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
      loop {
        ticker.tick().await;
        let Some(shared) = shared.upgrade() else {
          break;
        };
        debug!("poll tick");
        shared.trigger();
      }
    }));
  }
}

impl<T> Drop for FetchOrchestrator<T> {
  fn drop(&mut self) {
    self.shared.stopped.store(true, Ordering::SeqCst);
    self.shared.next_generation();
    if let Some(poller) = self.poller.take() {
      poller.abort();
    }
  }
}

impl<T> std::fmt::Debug for FetchOrchestrator<T> {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("FetchOrchestrator")
      .field("context", &self.shared.context)
      .field("generation", &self.shared.projector.generation())
      .field("polling", &self.poller.is_some())
      .finish_non_exhaustive()
  }
}
