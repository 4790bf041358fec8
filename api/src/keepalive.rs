//! Keeping a long-running invocation's HTTP response alive.
//!
//! A worker can run for many minutes, longer than the idle timeout of most
//! proxies and HTTP clients. When the outcome is not ready within one
//! keep-alive interval the handler commits a `200` streaming response and
//! writes a single space every interval until the terminal JSON body is
//! ready. Leading whitespace is legal before a JSON value, so clients parse
//! the body unchanged.
//!
//! All writes go through [`ResponseWriter`], which refuses anything after
//! the terminal body has been written.

use std::convert::Infallible;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use std::time::Duration;

use axum::Json;
use axum::body::{Body, Bytes};
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_stream::Stream;
use tokio_util::sync::{CancellationToken, DropGuard};

const FILLER: &[u8] = b" ";
const FALLBACK_BODY: &str = r#"{"status":"failed","error":"internal_error","message":"failed to encode invocation result"}"#;

/// A terminal value that can be sent either as a plain response or as the
/// final frame of a kept-alive one.
pub trait TerminalResponse: Serialize + Send + 'static {
    /// Status used when the value is ready before streaming starts.
    fn status(&self) -> StatusCode;

    /// Value reported when the producer went away without sending one.
    fn abandoned() -> Self;
}

struct WriterState {
    sink: Option<mpsc::UnboundedSender<Bytes>>,
    finalized: bool,
    frames: u64,
}

/// Single writer for one streamed response body.
pub struct ResponseWriter {
    state: Mutex<WriterState>,
    disconnected: CancellationToken,
}

/// Body side of a [`ResponseWriter`]. Dropping it (the caller hung up, or
/// hyper finished the response) marks the writer disconnected.
pub struct BodyStream {
    frames: mpsc::UnboundedReceiver<Bytes>,
    _guard: DropGuard,
}

impl Stream for BodyStream {
    type Item = Result<Bytes, Infallible>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.frames.poll_recv(cx).map(|frame| frame.map(Ok))
    }
}

impl ResponseWriter {
    pub fn channel() -> (Arc<Self>, BodyStream) {
        let (tx, rx) = mpsc::unbounded_channel();
        let disconnected = CancellationToken::new();
        let writer = Arc::new(Self {
            state: Mutex::new(WriterState {
                sink: Some(tx),
                finalized: false,
                frames: 0,
            }),
            disconnected: disconnected.clone(),
        });
        let body = BodyStream {
            frames: rx,
            _guard: disconnected.drop_guard(),
        };
        (writer, body)
    }

    /// Write one filler byte. Returns `false` once finalized or disconnected;
    /// nothing is written in that case.
    pub fn write_filler(&self) -> bool {
        self.write(Bytes::from_static(FILLER), false)
    }

    /// Write the terminal body and close the stream. Only the first call writes.
    pub fn finalize(&self, body: Bytes) -> bool {
        self.write(body, true)
    }

    /// Frames handed to the transport so far.
    pub fn frames_written(&self) -> u64 {
        self.lock().frames
    }

    /// Resolves once the body has been dropped.
    pub async fn disconnected(&self) {
        self.disconnected.cancelled().await
    }

    fn write(&self, frame: Bytes, terminal: bool) -> bool {
        let mut state = self.lock();
        if state.finalized {
            return false;
        }
        if terminal {
            state.finalized = true;
        }
        let sent = match &state.sink {
            Some(sink) => sink.send(frame).is_ok(),
            None => false,
        };
        if sent {
            state.frames += 1;
        }
        if terminal || !sent {
            // Dropping the sender ends the body stream.
            state.sink = None;
        }
        sent
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, WriterState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Running filler task. [`KeepAliveHandle::stop`] consumes the handle, so a
/// streamer is cancelled at most once.
pub struct KeepAliveHandle {
    cancel: CancellationToken,
    task: JoinHandle<u64>,
}

impl KeepAliveHandle {
    /// Cancel the streamer and return how many fillers it wrote.
    pub async fn stop(self) -> u64 {
        self.cancel.cancel();
        self.task.await.unwrap_or_default()
    }
}

pub struct KeepAlive;

impl KeepAlive {
    /// Write a filler every `interval` until stopped, finalized or disconnected.
    pub fn start(writer: Arc<ResponseWriter>, interval: Duration) -> KeepAliveHandle {
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let task = tokio::spawn(async move {
            let mut ticker =
                tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            let mut written = 0u64;
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = writer.disconnected() => break,
                    _ = ticker.tick() => {
                        if !writer.write_filler() {
                            break;
                        }
                        written += 1;
                    }
                }
            }
            written
        });
        KeepAliveHandle { cancel, task }
    }
}

/// Turn a pending terminal value into a response.
///
/// A value that arrives within `interval` is sent as an ordinary response
/// with its own status. Otherwise a `200` is committed and the value is sent
/// as the final frame of a kept-alive body. A caller that disconnects stops
/// the streamer; the producer behind `outcome` keeps running.
pub async fn respond<T: TerminalResponse>(
    mut outcome: oneshot::Receiver<T>,
    interval: Duration,
) -> Response {
    match tokio::time::timeout(interval, &mut outcome).await {
        Ok(Ok(value)) => return (value.status(), Json(value)).into_response(),
        Ok(Err(_)) => {
            let value = T::abandoned();
            return (value.status(), Json(value)).into_response();
        }
        Err(_) => {}
    }

    let (writer, body) = ResponseWriter::channel();
    writer.write_filler();
    let keepalive = KeepAlive::start(writer.clone(), interval);

    tokio::spawn(async move {
        let value = tokio::select! {
            value = &mut outcome => Some(value.unwrap_or_else(|_| T::abandoned())),
            _ = writer.disconnected() => None,
        };
        let fillers = keepalive.stop().await;
        match value {
            Some(value) => {
                let frame = serde_json::to_vec(&value).map(Bytes::from).unwrap_or_else(|err| {
                    tracing::error!(error = %err, "failed to encode terminal response");
                    Bytes::from_static(FALLBACK_BODY.as_bytes())
                });
                if writer.finalize(frame) {
                    tracing::debug!(fillers, frames = writer.frames_written(), "kept-alive response finalized");
                } else {
                    tracing::info!("caller disconnected before the terminal body was written");
                }
            }
            None => tracing::info!("caller disconnected before the invocation finished"),
        }
    });

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "application/json")
        .header(header::CACHE_CONTROL, "no-store")
        .body(Body::from_stream(body))
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}
