//! Fallback execution across candidate models.
//!
//! One request walks `[request.model, ...fallbacks]` until a candidate
//! produces content. Each attempt is recorded on the circuit breaker. The
//! caller sees one event stream that either ends like a normal backend
//! stream or ends with exactly one `Error` event.

use std::sync::Arc;

use futures_util::StreamExt;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, info, warn};

use super::ModelRegistry;
use super::router::Route;
use crate::providers::{Provider, ProviderEvent, StreamRequest};
use crate::{BackendId, Error, FailureKind};

/// Capacity of the channel between the executor task and the caller.
const EVENT_BUFFER: usize = 64;

/// How one candidate went.
enum Attempt {
    /// At least one content-bearing event was delivered.
    Success,
    /// The stream ended cleanly without content.
    Empty,
    Failed(Error),
    /// Failed after content had already been forwarded.
    Interrupted(Error),
    Cancelled,
    /// The caller dropped the event stream.
    ReceiverGone,
}

impl ModelRegistry {
    /// Stream `request`, falling back through `fallbacks` in order.
    ///
    /// `preferred` only applies to the primary model. Events that precede
    /// the first content-bearing event are held back, so an empty candidate
    /// leaks nothing to the caller. A candidate that fails after forwarding
    /// content ends the stream with that failure; the chain does not move
    /// on, so output from two candidates is never interleaved.
    ///
    /// Cancelling `request.cancellation` ends the stream with a single
    /// "request cancelled" error and does not count against any backend.
    pub fn execute_with_retry(
        self: &Arc<Self>,
        request: StreamRequest,
        preferred: Option<BackendId>,
        fallbacks: Vec<String>,
    ) -> ReceiverStream<ProviderEvent> {
        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        let registry = Arc::clone(self);
        tokio::spawn(async move {
            registry.run_candidates(request, preferred, fallbacks, tx).await;
        });
        ReceiverStream::new(rx)
    }

    async fn run_candidates(
        &self,
        request: StreamRequest,
        preferred: Option<BackendId>,
        fallbacks: Vec<String>,
        tx: mpsc::Sender<ProviderEvent>,
    ) {
        let candidates: Vec<String> = std::iter::once(request.model.clone())
            .chain(fallbacks)
            .collect();
        let mut last_error = String::new();

        for (i, model) in candidates.iter().enumerate() {
            if tx.is_closed() {
                debug!("caller went away");
                return;
            }
            if request.cancellation.is_cancelled() {
                let _ = tx.send(ProviderEvent::error(Error::Cancelled.to_string())).await;
                return;
            }

            let preferred = if i == 0 { preferred } else { None };
            let provider = match self.route(model, preferred) {
                Route::Found(provider) => provider,
                Route::CircuitOpen(backend) => {
                    debug!(model = %model, provider = %backend, "circuit open, skipping candidate");
                    last_error = Error::CircuitOpen(backend.to_string()).to_string();
                    continue;
                }
                Route::NotFound => {
                    debug!(model = %model, "no provider for candidate");
                    last_error = format!("no available provider for model {model}");
                    continue;
                }
            };

            let backend = provider.backend();
            debug!(model = %model, provider = %backend, attempt = i + 1, "trying candidate");
            match attempt(provider.as_ref(), request.for_model(model), &tx).await {
                Attempt::Success => {
                    self.breaker().record_success(backend);
                    if i > 0 {
                        info!(model = %model, provider = %backend, "served by fallback");
                    }
                    return;
                }
                Attempt::Empty => {
                    warn!(model = %model, provider = %backend, "empty response, trying next candidate");
                    self.breaker().record_failure(backend);
                    last_error = Error::EmptyResponse(backend.to_string()).to_string();
                }
                Attempt::Failed(e) => {
                    if matches!(e.classify(), FailureKind::Quota) {
                        warn!(model = %model, provider = %backend, error = %e, "provider out of quota");
                    } else {
                        warn!(model = %model, provider = %backend, error = %e, "candidate failed");
                    }
                    self.breaker().record_failure(backend);
                    last_error = e.to_string();
                }
                Attempt::Interrupted(e) => {
                    warn!(model = %model, provider = %backend, error = %e, "stream failed after content");
                    self.breaker().record_failure(backend);
                    let _ = tx.send(ProviderEvent::error(e.to_string())).await;
                    return;
                }
                Attempt::Cancelled => {
                    debug!(model = %model, provider = %backend, "request cancelled");
                    let _ = tx.send(ProviderEvent::error(Error::Cancelled.to_string())).await;
                    return;
                }
                Attempt::ReceiverGone => {
                    debug!(model = %model, provider = %backend, "caller went away");
                    return;
                }
            }
        }

        warn!(candidates = candidates.len(), error = %last_error, "all candidates failed");
        let _ = tx.send(ProviderEvent::error(last_error)).await;
    }
}

/// Stream one candidate into `tx`.
async fn attempt(
    provider: &dyn Provider,
    request: StreamRequest,
    tx: &mpsc::Sender<ProviderEvent>,
) -> Attempt {
    let cancel = request.cancellation.clone();
    let mut stream = tokio::select! {
        biased;
        _ = cancel.cancelled() => return Attempt::Cancelled,
        result = provider.stream_response(request) => match result {
            Ok(stream) => stream,
            Err(e) => return Attempt::Failed(e),
        },
    };

    let mut held = Vec::new();
    let mut has_content = false;
    loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Attempt::Cancelled,
            next = stream.next() => next,
        };
        let failure = match next {
            None => break,
            Some(Err(e)) => e,
            Some(Ok(ProviderEvent::Error { message })) => Error::Stream(message),
            Some(Ok(event)) => {
                if let Some(gone) = forward(event, &mut held, &mut has_content, tx).await {
                    return gone;
                }
                continue;
            }
        };
        return if has_content {
            Attempt::Interrupted(failure)
        } else {
            Attempt::Failed(failure)
        };
    }

    if has_content {
        Attempt::Success
    } else {
        Attempt::Empty
    }
}

/// Hold `event` until the first content-bearing event, then flush and pass
/// everything through. Returns `Some` when the caller has gone away.
async fn forward(
    event: ProviderEvent,
    held: &mut Vec<ProviderEvent>,
    has_content: &mut bool,
    tx: &mpsc::Sender<ProviderEvent>,
) -> Option<Attempt> {
    if !*has_content {
        if !event.is_content_bearing() {
            held.push(event);
            return None;
        }
        *has_content = true;
        for event in held.drain(..) {
            if tx.send(event).await.is_err() {
                return Some(Attempt::ReceiverGone);
            }
        }
    }
    if tx.send(event).await.is_err() {
        return Some(Attempt::ReceiverGone);
    }
    None
}

