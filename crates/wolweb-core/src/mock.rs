//! Mock transport implementation for testing.
//!
//! This module provides a scripted [`Transport`] that can be used for unit
//! testing without a running wolweb service.
//!
//! # Features
//!
//! - **Sticky responses**: answer every call to a path the same way
//! - **Queued replies**: one-shot replies consumed in order before the sticky one
//! - **Failure injection**: make a path fail at the transport level
//! - **Latency simulation**: delay every reply, or a single queued one
//! - **Call log**: inspect what was requested and when
//!
//! Latency uses `tokio::time`, so tests running with a paused clock control
//! it exactly.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;

use crate::error::{Error, Result};
use crate::transport::{Request, Response, Transport};

/// What the mock does for one call.
#[derive(Debug, Clone)]
pub enum MockReply {
    /// Return this response.
    Respond(Response),
    /// Fail at the transport level with this message.
    Fail(String),
}

#[derive(Debug, Clone)]
struct Step {
    reply: MockReply,
    delay: Option<Duration>,
}

/// A request the mock received.
#[derive(Debug, Clone)]
pub struct RecordedCall {
    /// The request as issued.
    pub request: Request,
    /// When it was issued.
    pub at: Instant,
}

/// A scripted [`Transport`] for tests.
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use wolweb_core::mock::MockTransport;
/// use wolweb_core::{Outcome, Request, Response, ResultChannel};
///
/// #[tokio::main]
/// async fn main() {
///     let mock = Arc::new(MockTransport::new());
///     mock.respond("/api/macs", Response::new(200, r#"{"macs": null}"#));
///
///     let channel = ResultChannel::new(mock.clone());
///     let outcome = channel.invoke(&Request::list_devices()).await;
///     assert!(matches!(outcome, Outcome::Ok(_)));
///     assert_eq!(mock.call_count(), 1);
/// }
/// ```
#[derive(Debug, Default)]
pub struct MockTransport {
    sticky: Mutex<HashMap<String, MockReply>>,
    queued: Mutex<HashMap<String, VecDeque<Step>>>,
    calls: Mutex<Vec<RecordedCall>>,
    /// Latency added to every reply, in milliseconds.
    latency_ms: AtomicU64,
}

impl MockTransport {
    /// Create a mock that answers 404 to everything.
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer every call to `path` with `response`.
    pub fn respond(&self, path: &str, response: Response) {
        self.sticky
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(path.to_string(), MockReply::Respond(response));
    }

    /// Fail every call to `path` at the transport level.
    pub fn fail(&self, path: &str, message: &str) {
        self.sticky
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(path.to_string(), MockReply::Fail(message.to_string()));
    }

    /// Queue a one-shot reply for `path`, used before the sticky reply.
    pub fn enqueue(&self, path: &str, reply: MockReply) {
        self.push_step(path, Step { reply, delay: None });
    }

    /// Queue a one-shot reply that arrives after `delay`.
    ///
    /// The delay replaces the global latency for this call.
    pub fn enqueue_after(&self, path: &str, delay: Duration, reply: MockReply) {
        self.push_step(
            path,
            Step {
                reply,
                delay: Some(delay),
            },
        );
    }

    fn push_step(&self, path: &str, step: Step) {
        self.queued
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(path.to_string())
            .or_default()
            .push_back(step);
    }

    /// Delay every reply by `latency`.
    pub fn set_latency(&self, latency: Duration) {
        self.latency_ms
            .store(latency.as_millis() as u64, Ordering::Relaxed);
    }

    /// Number of calls received.
    pub fn call_count(&self) -> usize {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Number of calls received for a path.
    pub fn calls_to(&self, path: &str) -> usize {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|call| call.request.path == path)
            .count()
    }

    /// Every call received, in order.
    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn next_step(&self, path: &str) -> Step {
        let queued = self
            .queued
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get_mut(path)
            .and_then(VecDeque::pop_front);
        if let Some(step) = queued {
            return step;
        }

        let reply = self
            .sticky
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(path)
            .cloned()
            .unwrap_or_else(|| {
                MockReply::Respond(Response::new(404, r#"{"error":"not found"}"#))
            });
        Step { reply, delay: None }
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn execute(&self, request: &Request) -> Result<Response> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(RecordedCall {
                request: request.clone(),
                at: Instant::now(),
            });

        let step = self.next_step(&request.path);
        let delay = step
            .delay
            .unwrap_or_else(|| Duration::from_millis(self.latency_ms.load(Ordering::Relaxed)));
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        match step.reply {
            MockReply::Respond(response) => Ok(response),
            MockReply::Fail(message) => Err(Error::transport(request.path.clone(), message)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_unknown_path_is_404() {
        let mock = MockTransport::new();
        let resp = mock.execute(&Request::get("/nope")).await.unwrap();
        assert_eq!(resp.status, 404);
        assert_eq!(mock.call_count(), 1);
    }

    #[tokio::test]
    async fn test_queue_before_sticky() {
        let mock = MockTransport::new();
        mock.respond("/a", Response::new(200, "sticky"));
        mock.enqueue("/a", MockReply::Respond(Response::new(500, "first")));

        let first = mock.execute(&Request::get("/a")).await.unwrap();
        assert_eq!(first.status, 500);
        let second = mock.execute(&Request::get("/a")).await.unwrap();
        assert_eq!(second.body, "sticky");
        assert_eq!(mock.calls_to("/a"), 2);
    }

    #[tokio::test]
    async fn test_fail_is_transport_error() {
        let mock = MockTransport::new();
        mock.fail("/a", "connection reset");
        let err = mock.execute(&Request::get("/a")).await.unwrap_err();
        assert!(matches!(err, Error::Transport { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_latency_uses_tokio_clock() {
        let mock = MockTransport::new();
        mock.respond("/a", Response::new(200, ""));
        mock.set_latency(Duration::from_secs(2));

        let start = Instant::now();
        mock.execute(&Request::get("/a")).await.unwrap();
        assert!(start.elapsed() >= Duration::from_secs(2));
    }
}
