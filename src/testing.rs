//! Scripted collaborators shared by the orchestrator tests.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use crate::cache::{CacheBackend, MemoryCache};
use crate::error::FetchError;
use crate::transport::{Transport, TransportRequest, TransportResponse};

type Scripted = (Duration, Result<TransportResponse, FetchError>);

/// Transport that replays queued responses, then a fallback.
#[derive(Default)]
pub struct MockTransport {
  queue: Mutex<VecDeque<Scripted>>,
  fallback: Mutex<Option<Scripted>>,
  requests: Mutex<Vec<TransportRequest>>,
  calls: AtomicUsize,
}

impl MockTransport {
  pub fn new() -> Self {
    Self::default()
  }

  /// Queue a JSON response.
  pub fn respond(self, status: u16, body: Value) -> Self {
    self.respond_after(Duration::ZERO, status, body)
  }

  /// Queue a JSON response delivered after `delay`.
  pub fn respond_after(self, delay: Duration, status: u16, body: Value) -> Self {
    self.push(delay, Ok(TransportResponse::new(status, body.to_string())))
  }

  /// Queue a transport failure.
  pub fn fail(self, message: &str) -> Self {
    self.push(Duration::ZERO, Err(FetchError::Transport(message.into())))
  }

  /// Response used once the queue is empty.
  pub fn always(self, status: u16, body: Value) -> Self {
    *self.fallback.lock().unwrap() = Some((
      Duration::ZERO,
      Ok(TransportResponse::new(status, body.to_string())),
    ));
    self
  }

  /// Failure used once the queue is empty.
  pub fn always_fail(self, message: &str) -> Self {
    *self.fallback.lock().unwrap() =
      Some((Duration::ZERO, Err(FetchError::Transport(message.into()))));
    self
  }

  fn push(self, delay: Duration, result: Result<TransportResponse, FetchError>) -> Self {
    self.queue.lock().unwrap().push_back((delay, result));
    self
  }

  pub fn calls(&self) -> usize {
    self.calls.load(Ordering::SeqCst)
  }

  pub fn requests(&self) -> Vec<TransportRequest> {
    self.requests.lock().unwrap().clone()
  }
}

#[async_trait]
impl Transport for MockTransport {
  async fn send(&self, request: TransportRequest) -> Result<TransportResponse, FetchError> {
    self.calls.fetch_add(1, Ordering::SeqCst);
    self.requests.lock().unwrap().push(request);

    let next = self.queue.lock().unwrap().pop_front();
    let (delay, result) = match next {
      Some(scripted) => scripted,
      None => self
        .fallback
        .lock()
        .unwrap()
        .clone()
        .unwrap_or((Duration::ZERO, Err(FetchError::Transport("no scripted response".into())))),
    };

    if !delay.is_zero() {
      tokio::time::sleep(delay).await;
    }
    result
  }
}

/// Memory cache that records every lookup and write.
#[derive(Default)]
pub struct RecordingCache {
  pub inner: MemoryCache,
  gets: Mutex<Vec<String>>,
  sets: Mutex<Vec<(String, Value, Option<Duration>)>>,
}

impl RecordingCache {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn gets(&self) -> Vec<String> {
    self.gets.lock().unwrap().clone()
  }

  pub fn sets(&self) -> Vec<(String, Value, Option<Duration>)> {
    self.sets.lock().unwrap().clone()
  }
}

impl CacheBackend for RecordingCache {
  fn get(&self, key: &str) -> Option<Value> {
    self.gets.lock().unwrap().push(key.to_string());
    self.inner.get(key)
  }

  fn set(&self, key: &str, value: Value, ttl: Option<Duration>) -> Value {
    self
      .sets
      .lock()
      .unwrap()
      .push((key.to_string(), value.clone(), ttl));
    self.inner.set(key, value, ttl)
  }
}
