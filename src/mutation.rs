//! Write-path requests: create, update and delete commands.

use serde::de::DeserializeOwned;
use std::ops::ControlFlow;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::context::ApiContext;
use crate::error::{normalize, FetchError};
use crate::key;
use crate::query::FetchOptions;
use crate::request::{RequestBody, RequestDescriptor};
use crate::retry::{run_with_retry, RetryBudget};
use crate::state::{RequestState, StateProjector};
use crate::transport::{self, Transport, TransportRequest};

/// Sends commands described by a [`RequestDescriptor`].
///
/// Mutations never read or write the cache and never poll. They share the
/// retry and error-normalization path of [`FetchOrchestrator`](crate::FetchOrchestrator).
/// The descriptor's own body is ignored: the payload is passed to each
/// [`mutate`](Self::mutate) call.
pub struct MutationOrchestrator<T> {
  context: ApiContext,
  transport: Arc<dyn Transport>,
  options: FetchOptions<T>,
  descriptor: RequestDescriptor,
  projector: StateProjector<T>,
}

impl<T> MutationOrchestrator<T>
where
  T: DeserializeOwned + Clone + Send + Sync + 'static,
{
  pub fn new(
    context: ApiContext,
    transport: Arc<dyn Transport>,
    descriptor: RequestDescriptor,
    options: FetchOptions<T>,
  ) -> Self {
    Self {
      context,
      transport,
      options,
      descriptor,
      projector: StateProjector::new(RequestState::initial(false)),
    }
  }

  /// Send `data` and wait for the outcome.
  ///
  /// Binary and form payloads are sent as-is; JSON payloads are serialized
  /// and get the JSON content type. If another `mutate` starts before this
  /// one settles, this one's outcome is dropped.
  pub async fn mutate(&self, data: Option<RequestBody>) -> RequestState<T> {
    let generation = self.projector.advance();
    let is_current = || self.projector.generation() == generation;

    self
      .projector
      .emit_if_current(generation, |state| state.apply_loading());

    let url = key::final_url(self.context.base_api_url(), &self.descriptor.url);
    debug!(method = %self.descriptor.method, url = %url, "sending mutation");

    let result = run_with_retry(
      RetryBudget::new(self.descriptor.retry),
      self.options.backoff(),
      |_| {
        let request = TransportRequest::new(
          url.clone(),
          self.descriptor.method,
          data.clone(),
          &self.descriptor.headers,
        );
        async move {
          let value = transport::execute(self.transport.as_ref(), request).await?;
          serde_json::from_value::<T>(value).map_err(|e| FetchError::Decode(e.to_string()))
        }
      },
      |_, retry| {
        if !self
          .projector
          .emit_if_current(generation, |state| state.apply_retrying())
        {
          return ControlFlow::Break(());
        }
        debug!(retry, "retrying mutation");
        ControlFlow::Continue(())
      },
    )
    .await;

    if !is_current() {
      debug!("discarding outcome of superseded mutation");
      return self.state();
    }

    match result {
      Ok(response) => {
        self.options.notify_success(&response);
        self
          .projector
          .emit_if_current(generation, |state| state.apply_success(response));
      }
      Err(error) => {
        let error = normalize(&error);
        warn!(url = %url, "mutation failed: {}", error);
        self.options.notify_error(&error);
        self
          .projector
          .emit_if_current(generation, |state| state.apply_failure(error));
      }
    }

    self.state()
  }

  pub fn descriptor(&self) -> &RequestDescriptor {
    &self.descriptor
  }

  pub fn state(&self) -> RequestState<T> {
    self.projector.snapshot()
  }

  pub fn subscribe(&self) -> watch::Receiver<RequestState<T>> {
    self.projector.subscribe()
  }

  pub fn emissions(&self) -> u64 {
    self.projector.emissions()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::request::Method;
  use crate::testing::{MockTransport, RecordingCache};
  use serde_json::{json, Value};
  use std::sync::atomic::{AtomicUsize, Ordering};
  use std::time::Duration;

  fn mutation(
    cache: &Arc<RecordingCache>,
    transport: &Arc<MockTransport>,
    descriptor: RequestDescriptor,
    options: FetchOptions<Value>,
  ) -> MutationOrchestrator<Value> {
    MutationOrchestrator::new(
      ApiContext::with_cache(cache.clone()),
      transport.clone(),
      descriptor,
      options,
    )
  }

  #[tokio::test]
  async fn test_mutation_success_skips_cache() {
    let cache = Arc::new(RecordingCache::new());
    let transport = Arc::new(MockTransport::new().respond(201, json!({"id": 7})));
    let successes = Arc::new(AtomicUsize::new(0));
    let seen = successes.clone();
    let options = FetchOptions::new().on_success(move |_: &Value| {
      seen.fetch_add(1, Ordering::SeqCst);
    });
    let mutation = mutation(
      &cache,
      &transport,
      RequestDescriptor::new(Method::Post, "/users"),
      options,
    );

    assert!(!mutation.state().is_loading);
    let state = mutation
      .mutate(Some(RequestBody::Json(json!({"firstName": "Test"}))))
      .await;

    assert_eq!(state.data, Some(json!({"id": 7})));
    assert!(!state.is_loading);
    assert!(!state.is_error);
    assert_eq!(successes.load(Ordering::SeqCst), 1);
    // loading + success
    assert_eq!(mutation.emissions(), 2);
    assert!(cache.gets().is_empty());
    assert!(cache.sets().is_empty());

    let requests = transport.requests();
    assert_eq!(requests[0].method, Method::Post);
    assert_eq!(requests[0].headers["content-type"], "application/json");
  }

  #[tokio::test]
  async fn test_mutation_emits_loading_first() {
    let cache = Arc::new(RecordingCache::new());
    let transport = Arc::new(MockTransport::new().respond_after(
      Duration::from_millis(50),
      200,
      json!({}),
    ));
    let mutation = Arc::new(mutation(
      &cache,
      &transport,
      RequestDescriptor::new(Method::Delete, "/users/7"),
      FetchOptions::new(),
    ));

    let mut rx = mutation.subscribe();
    let pending = tokio::spawn({
      let mutation = mutation.clone();
      async move { mutation.mutate(None).await }
    });

    rx.changed().await.unwrap();
    assert!(rx.borrow_and_update().is_loading);

    let state = pending.await.unwrap();
    assert_eq!(state.data, Some(json!({})));
    assert!(!state.is_loading);
  }

  #[tokio::test(start_paused = true)]
  async fn test_superseded_mutation_is_discarded() {
    let cache = Arc::new(RecordingCache::new());
    let transport = Arc::new(
      MockTransport::new()
        .respond_after(Duration::from_millis(100), 200, json!({"n": 1}))
        .respond(200, json!({"n": 2})),
    );
    let successes = Arc::new(AtomicUsize::new(0));
    let seen = successes.clone();
    let options = FetchOptions::new().on_success(move |_: &Value| {
      seen.fetch_add(1, Ordering::SeqCst);
    });
    let mutation = Arc::new(mutation(
      &cache,
      &transport,
      RequestDescriptor::new(Method::Post, "/counter"),
      options,
    ));

    let first = tokio::spawn({
      let mutation = mutation.clone();
      async move { mutation.mutate(Some(json!({"n": 1}).into())).await }
    });
    // let the first call take the slow response
    tokio::time::sleep(Duration::from_millis(10)).await;

    let second = mutation.mutate(Some(json!({"n": 2}).into())).await;
    assert_eq!(second.data, Some(json!({"n": 2})));

    first.await.unwrap();
    assert_eq!(mutation.state().data, Some(json!({"n": 2})));
    assert_eq!(successes.load(Ordering::SeqCst), 1);
    assert_eq!(transport.calls(), 2);
  }

  #[tokio::test]
  async fn test_binary_payload_is_sent_as_is() {
    let cache = Arc::new(RecordingCache::new());
    let transport = Arc::new(MockTransport::new().respond(200, json!({"stored": true})));
    let mutation = mutation(
      &cache,
      &transport,
      RequestDescriptor::new(Method::Put, "/files/logo.png"),
      FetchOptions::new(),
    );

    mutation
      .mutate(Some(RequestBody::Binary(vec![0x89, 0x50, 0x4e, 0x47])))
      .await;

    let requests = transport.requests();
    assert_eq!(
      requests[0].body,
      Some(RequestBody::Binary(vec![0x89, 0x50, 0x4e, 0x47]))
    );
    assert!(!requests[0].headers.contains_key("content-type"));
  }

  #[tokio::test]
  async fn test_mutation_retries_then_fails() {
    let cache = Arc::new(RecordingCache::new());
    let transport = Arc::new(MockTransport::new().always(500, json!({"message": "boom"})));
    let errors = Arc::new(AtomicUsize::new(0));
    let seen = errors.clone();
    let options = FetchOptions::new().on_error(move |_| {
      seen.fetch_add(1, Ordering::SeqCst);
    });
    let mutation = mutation(
      &cache,
      &transport,
      RequestDescriptor::new(Method::Patch, "/users/7").with_retry(2),
      options,
    );

    let state = mutation.mutate(Some(json!({"name": "x"}).into())).await;

    assert_eq!(transport.calls(), 3);
    assert_eq!(errors.load(Ordering::SeqCst), 1);
    assert!(state.is_error);
    assert!(!state.is_loading);
    assert!(!state.is_retrying);
    let error = state.error.unwrap();
    assert_eq!(error.status, Some(500));
    assert_eq!(error.message(), Some("boom"));
  }

  #[tokio::test]
  async fn test_mutation_uses_base_url() {
    let transport = Arc::new(MockTransport::new().respond(200, json!({})));
    let mutation = MutationOrchestrator::<Value>::new(
      ApiContext::scoped().with_base_url("https://api.test"),
      transport.clone(),
      RequestDescriptor::new(Method::Post, "/events"),
      FetchOptions::new(),
    );

    mutation.mutate(None).await;
    assert_eq!(transport.requests()[0].url, "https://api.test/events");
  }
}
