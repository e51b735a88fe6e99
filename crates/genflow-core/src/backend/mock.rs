//! Scripted backend for tests and offline runs.
//!
//! Each call gets a [`Scripted`] outcome, either from a fixed sequence (by
//! call number) or from a responder closure. Requests are captured so tests
//! can assert on what the executor sent.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use super::{BackendClient, BackendError, BackendRequest, BackendResponse};

/// Outcome of one scripted call.
#[derive(Debug, Clone)]
pub enum Scripted {
    Text(String),
    Json(Value),
    Media(String),
    Empty,
    Fail(BackendError),
    /// Wait before producing the inner outcome
    Delayed(Duration, Box<Scripted>),
}

impl Scripted {
    pub fn text(text: impl Into<String>) -> Self {
        Scripted::Text(text.into())
    }

    pub fn media(url: impl Into<String>) -> Self {
        Scripted::Media(url.into())
    }

    pub fn transport(message: impl Into<String>) -> Self {
        Scripted::Fail(BackendError::Transport(message.into()))
    }

    pub fn after(self, delay: Duration) -> Self {
        Scripted::Delayed(delay, Box::new(self))
    }
}

type Responder = Box<dyn Fn(usize, &BackendRequest) -> Scripted + Send + Sync>;

/// Backend double driven by a script.
pub struct ScriptedBackend {
    responder: Responder,
    calls: AtomicUsize,
    requests: Mutex<Vec<BackendRequest>>,
}

impl ScriptedBackend {
    /// Answer call `i` with `script[i]`; calls past the end repeat the last entry.
    pub fn sequence(script: Vec<Scripted>) -> Self {
        Self::from_fn(move |call, _| {
            script
                .get(call)
                .or_else(|| script.last())
                .cloned()
                .unwrap_or(Scripted::Empty)
        })
    }

    /// Answer every call the same way.
    pub fn always(outcome: Scripted) -> Self {
        Self::from_fn(move |_, _| outcome.clone())
    }

    /// Answer with a closure of (zero-based call number, request).
    pub fn from_fn<F>(responder: F) -> Self
    where
        F: Fn(usize, &BackendRequest) -> Scripted + Send + Sync + 'static,
    {
        Self {
            responder: Box::new(responder),
            calls: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Requests received so far, in arrival order.
    pub fn requests(&self) -> Vec<BackendRequest> {
        self.requests
            .lock()
            .map(|guard| guard.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl BackendClient for ScriptedBackend {
    async fn invoke(
        &self,
        request: &BackendRequest,
        timeout: Duration,
    ) -> Result<BackendResponse, BackendError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut guard) = self.requests.lock() {
            guard.push(request.clone());
        }

        let mut outcome = (self.responder)(call, request);
        let mut waited = Duration::ZERO;
        while let Scripted::Delayed(delay, inner) = outcome {
            waited += delay;
            if waited > timeout {
                tokio::time::sleep(timeout.saturating_sub(waited - delay)).await;
                return Err(BackendError::Timeout(timeout));
            }
            tokio::time::sleep(delay).await;
            outcome = *inner;
        }

        match outcome {
            Scripted::Text(text) => Ok(BackendResponse::text(text)),
            Scripted::Json(value) => Ok(BackendResponse::text(value.to_string())),
            Scripted::Media(url) => Ok(BackendResponse::media(url)),
            Scripted::Empty => Ok(BackendResponse::default()),
            Scripted::Fail(error) => Err(error),
            Scripted::Delayed(..) => Ok(BackendResponse::default()),
        }
    }

    fn name(&self) -> &str {
        "scripted"
    }
}
