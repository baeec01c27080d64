//! Cancelable request wrapper.
//!
//! [`ResultChannel::invoke`] issues exactly one call through the
//! transport and classifies what came back. [`ResultChannel::cancel`]
//! resolves every call in flight on this channel as
//! [`Outcome::Cancelled`], including calls whose response arrives after
//! the cancel was issued.
//!
//! Clones share cancellation. Give each (device, action) pair its own
//! channel with [`ResultChannel::fork`] so cancelling one pair never
//! touches another.

use std::sync::{Arc, Mutex, PoisonError};

use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::Error;
use crate::transport::{Payload, Request, Transport};

/// What a call resolved to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome<T = Payload> {
    /// 2xx response.
    Ok(T),
    /// Non-2xx response, with the server's `error` message if it sent one.
    HttpError {
        /// HTTP status code.
        status: u16,
        /// Message from the response body.
        message: Option<String>,
    },
    /// The request never completed at the transport level.
    NetworkError(String),
    /// The call was cancelled before its outcome could be applied.
    Cancelled,
}

impl<T> Outcome<T> {
    /// Whether this outcome is [`Outcome::Cancelled`].
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Outcome::Cancelled)
    }

    /// Map the success value.
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Outcome<U> {
        match self {
            Outcome::Ok(value) => Outcome::Ok(f(value)),
            Outcome::HttpError { status, message } => Outcome::HttpError { status, message },
            Outcome::NetworkError(cause) => Outcome::NetworkError(cause),
            Outcome::Cancelled => Outcome::Cancelled,
        }
    }

    /// Convert into the error taxonomy. `request` names the failed call.
    pub fn into_result(self, request: &Request) -> crate::Result<T> {
        match self {
            Outcome::Ok(value) => Ok(value),
            Outcome::HttpError { status, message } => Err(Error::server(status, message)),
            Outcome::NetworkError(cause) => Err(Error::transport(request.to_string(), cause)),
            Outcome::Cancelled => Err(Error::Cancelled),
        }
    }
}

/// Cancelable wrapper around a [`Transport`].
#[derive(Clone)]
pub struct ResultChannel {
    transport: Arc<dyn Transport>,
    root: Arc<Mutex<CancellationToken>>,
}

impl std::fmt::Debug for ResultChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResultChannel").finish_non_exhaustive()
    }
}

impl ResultChannel {
    /// Create a channel over a transport.
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            root: Arc::new(Mutex::new(CancellationToken::new())),
        }
    }

    /// A new channel over the same transport with independent cancellation.
    pub fn fork(&self) -> Self {
        Self::new(Arc::clone(&self.transport))
    }

    /// Token for the next call. Cancelled by the next [`cancel`](Self::cancel).
    pub fn call_token(&self) -> CancellationToken {
        self.root
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .child_token()
    }

    /// Issue one call and wait for its outcome.
    pub async fn invoke(&self, request: &Request) -> Outcome {
        let token = self.call_token();
        self.invoke_with(request, &token).await
    }

    /// Issue one call under an explicit token.
    ///
    /// The outcome is `Cancelled` if the token fires before the transport
    /// returns, or if it fired while the response was being read.
    pub async fn invoke_with(&self, request: &Request, token: &CancellationToken) -> Outcome {
        if token.is_cancelled() {
            return Outcome::Cancelled;
        }

        let result = tokio::select! {
            biased;
            _ = token.cancelled() => {
                debug!("{} cancelled in flight", request);
                return Outcome::Cancelled;
            }
            result = self.transport.execute(request) => result,
        };

        // A late response must not be applied once cancel was issued.
        if token.is_cancelled() {
            debug!("{} completed after cancel, discarding", request);
            return Outcome::Cancelled;
        }

        match result {
            Ok(response) if response.is_success() => Outcome::Ok(Payload::new(response.body)),
            Ok(response) => Outcome::HttpError {
                status: response.status,
                message: response.error_message(),
            },
            Err(Error::Cancelled) => Outcome::Cancelled,
            Err(Error::Transport { message, .. }) => Outcome::NetworkError(message),
            Err(e) => Outcome::NetworkError(e.to_string()),
        }
    }

    /// Cancel every call in flight on this channel.
    ///
    /// Calls issued afterwards are unaffected.
    pub fn cancel(&self) {
        let mut root = self.root.lock().unwrap_or_else(PoisonError::into_inner);
        root.cancel();
        *root = CancellationToken::new();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockTransport;
    use crate::transport::Response;
    use std::time::Duration;

    #[tokio::test]
    async fn test_ok_outcome() {
        let mock = Arc::new(MockTransport::new());
        mock.respond("/api/ping/AA", Response::new(200, r#"{"status":"ok"}"#));
        let channel = ResultChannel::new(mock.clone());

        let outcome = channel.invoke(&Request::get("/api/ping/AA")).await;
        match outcome {
            Outcome::Ok(payload) => {
                let body: serde_json::Value = payload.json().unwrap();
                assert_eq!(body["status"], "ok");
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
        assert_eq!(mock.call_count(), 1);
    }

    #[tokio::test]
    async fn test_http_error_carries_server_message() {
        let mock = Arc::new(MockTransport::new());
        mock.respond(
            "/api/wol",
            Response::new(400, r#"{"error":"invalid MAC address"}"#),
        );
        let channel = ResultChannel::new(mock);

        let outcome = channel
            .invoke(&Request::post("/api/wol", serde_json::json!({})))
            .await;
        assert_eq!(
            outcome,
            Outcome::HttpError {
                status: 400,
                message: Some("invalid MAC address".to_string()),
            }
        );
    }

    #[tokio::test]
    async fn test_network_error() {
        let mock = Arc::new(MockTransport::new());
        mock.fail("/api/macs", "connection refused");
        let channel = ResultChannel::new(mock);

        let outcome = channel.invoke(&Request::list_devices()).await;
        assert_eq!(
            outcome,
            Outcome::NetworkError("connection refused".to_string())
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_resolves_in_flight_call() {
        let mock = Arc::new(MockTransport::new());
        mock.respond("/api/macs", Response::new(200, r#"{"macs":[]}"#));
        mock.set_latency(Duration::from_secs(30));
        let channel = ResultChannel::new(mock.clone());

        let task = {
            let channel = channel.clone();
            tokio::spawn(async move { channel.invoke(&Request::list_devices()).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        channel.cancel();

        let outcome = task.await.unwrap();
        assert!(outcome.is_cancelled());
        assert_eq!(mock.call_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_does_not_affect_later_calls() {
        let mock = Arc::new(MockTransport::new());
        mock.respond("/api/macs", Response::new(200, "{}"));
        let channel = ResultChannel::new(mock);

        channel.cancel();
        let outcome = channel.invoke(&Request::list_devices()).await;
        assert!(matches!(outcome, Outcome::Ok(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_forked_channels_cancel_independently() {
        let mock = Arc::new(MockTransport::new());
        mock.respond("/api/macs", Response::new(200, "{}"));
        mock.set_latency(Duration::from_secs(1));
        let a = ResultChannel::new(mock.clone());
        let b = a.fork();

        let task = {
            let b = b.clone();
            tokio::spawn(async move { b.invoke(&Request::list_devices()).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        a.cancel();

        assert!(matches!(task.await.unwrap(), Outcome::Ok(_)));
    }

    #[test]
    fn test_outcome_into_result() {
        let request = Request::list_devices();
        let err = Outcome::<()>::HttpError {
            status: 404,
            message: Some("configuration not found".to_string()),
        }
        .into_result(&request)
        .unwrap_err();
        assert!(matches!(err, Error::Server { status: 404, .. }));

        let err = Outcome::<()>::NetworkError("refused".to_string())
            .into_result(&request)
            .unwrap_err();
        assert!(err.to_string().contains("GET /api/macs"));

        let err = Outcome::<()>::Cancelled.into_result(&request).unwrap_err();
        assert!(err.is_cancelled());

        let value = Outcome::Ok(3).map(|v| v * 2).into_result(&request).unwrap();
        assert_eq!(value, 6);
    }
}
