//! Event stream writer.
//!
//! Each session owns one writer. The writer frames outbound messages as
//! event-stream records and queues them on a bounded channel; the receiving
//! half is the body of the long-lived HTTP response.
//!
//! State machine: `Detached → Open → Closed`, or `Detached → Closed`.
//! `Closed` is terminal, and entering it fires the teardown callback once.

use std::convert::Infallible;
use std::pin::Pin;
use std::sync::{Arc, Weak};
use std::task::{Context, Poll};
use std::time::Duration;

use axum::body::Body;
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::Response;
use bytes::{BufMut, Bytes, BytesMut};
use futures::Stream;
use parking_lot::Mutex;
use pin_project_lite::pin_project;
use switchyard_core::ids::SessionId;
use switchyard_core::jsonrpc::JsonRpcMessage;
use tokio::sync::mpsc;
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tokio_stream::wrappers::ReceiverStream;

use crate::negotiate::SESSION_ID_HEADER;

pub const EVENT_STREAM_CONTENT_TYPE: &str = "text/event-stream";

/// Comment line sent on idle streams so intermediaries keep them open and
/// dead connections surface as write errors.
pub const KEEP_ALIVE_FRAME: &[u8] = b": keep-alive\n\n";

#[derive(Debug, thiserror::Error)]
pub enum WriterError {
    #[error("writer is closed")]
    Closed,
    #[error("writer has no open stream")]
    NotOpen,
    #[error("writer already has an open stream")]
    AlreadyOpen,
    #[error("send queue full")]
    Backpressure,
    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// One framed event-stream record.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StreamRecord {
    pub event: String,
    pub data: String,
}

impl StreamRecord {
    pub fn new(event: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            event: event.into(),
            data: data.into(),
        }
    }

    /// The record telling a legacy client where to submit messages.
    pub fn endpoint(url: impl Into<String>) -> Self {
        Self::new("endpoint", url)
    }

    pub fn message(message: &JsonRpcMessage) -> Result<Self, serde_json::Error> {
        Ok(Self::new("message", serde_json::to_string(message)?))
    }

    /// `event: <name>\ndata: <line>\n...\n`. Multi-line data is split across
    /// several `data:` fields.
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.event.len() + self.data.len() + 16);
        buf.put_slice(b"event: ");
        buf.put_slice(self.event.as_bytes());
        buf.put_u8(b'\n');
        for line in self.data.split('\n') {
            buf.put_slice(b"data: ");
            buf.put_slice(line.trim_end_matches('\r').as_bytes());
            buf.put_u8(b'\n');
        }
        buf.put_u8(b'\n');
        buf.freeze()
    }
}

enum WriterState {
    Detached,
    Open(mpsc::Sender<Bytes>),
    Closed,
}

/// Coarse writer state, for callers that only need to branch on it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WriterStatus {
    Detached,
    Open,
    Closed,
}

type TeardownFn = Box<dyn FnOnce() + Send>;

pub struct EventStreamWriter {
    session_id: SessionId,
    state: Mutex<WriterState>,
    on_close: Mutex<Option<TeardownFn>>,
    max_send_queue: usize,
}

impl EventStreamWriter {
    pub fn new(session_id: SessionId, max_send_queue: usize) -> Self {
        Self {
            session_id,
            state: Mutex::new(WriterState::Detached),
            on_close: Mutex::new(None),
            max_send_queue: max_send_queue.max(1),
        }
    }

    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    pub fn status(&self) -> WriterStatus {
        match *self.state.lock() {
            WriterState::Detached => WriterStatus::Detached,
            WriterState::Open(_) => WriterStatus::Open,
            WriterState::Closed => WriterStatus::Closed,
        }
    }

    pub fn is_open(&self) -> bool {
        self.status() == WriterStatus::Open
    }

    pub fn is_closed(&self) -> bool {
        self.status() == WriterStatus::Closed
    }

    /// Register the teardown callback, replacing any earlier one. If the
    /// writer is already closed the callback runs immediately.
    pub fn on_close(&self, callback: impl FnOnce() + Send + 'static) {
        let mut slot = self.on_close.lock();
        if self.is_closed() {
            drop(slot);
            callback();
            return;
        }
        *slot = Some(Box::new(callback));
    }

    /// Attach the outbound stream. The optional announcement record is queued
    /// ahead of anything written later.
    pub fn open(
        self: &Arc<Self>,
        announcement: Option<StreamRecord>,
        keep_alive: Option<Duration>,
    ) -> Result<SessionStream, WriterError> {
        let mut state = self.state.lock();
        match *state {
            WriterState::Detached => {}
            WriterState::Open(_) => return Err(WriterError::AlreadyOpen),
            WriterState::Closed => return Err(WriterError::Closed),
        }

        let (tx, rx) = mpsc::channel(self.max_send_queue);
        if let Some(record) = announcement {
            // Fresh channel with capacity >= 1: cannot be full.
            let _ = tx.try_send(record.encode());
        }
        *state = WriterState::Open(tx);

        let keep_alive = keep_alive.map(|period| {
            let mut interval = tokio::time::interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            interval
        });

        Ok(SessionStream {
            records: ReceiverStream::new(rx),
            keep_alive,
            guard: CloseOnDrop {
                writer: Arc::downgrade(self),
            },
        })
    }

    /// Frame and queue one message. Never suspends.
    pub fn write(&self, message: &JsonRpcMessage) -> Result<(), WriterError> {
        let frame = StreamRecord::message(message)?.encode();
        let state = self.state.lock();
        let tx = match &*state {
            WriterState::Open(tx) => tx,
            WriterState::Detached => return Err(WriterError::NotOpen),
            WriterState::Closed => return Err(WriterError::Closed),
        };
        match tx.try_send(frame) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(frame)) => {
                tracing::warn!(
                    session_id = %self.session_id,
                    frame_len = frame.len(),
                    "Send queue full, dropping record"
                );
                Err(WriterError::Backpressure)
            }
            // Body already dropped; the close guard is about to run.
            Err(mpsc::error::TrySendError::Closed(_)) => Err(WriterError::Closed),
        }
    }

    /// Close the writer. Idempotent; the teardown callback fires on the first
    /// call only. Dropping the sender ends the response body once queued
    /// records have drained.
    pub fn close(&self) {
        {
            let mut state = self.state.lock();
            if matches!(*state, WriterState::Closed) {
                return;
            }
            *state = WriterState::Closed;
        }
        tracing::debug!(session_id = %self.session_id, "Writer closed");

        let callback = self.on_close.lock().take();
        if let Some(callback) = callback {
            callback();
        }
    }
}

struct CloseOnDrop {
    writer: Weak<EventStreamWriter>,
}

impl Drop for CloseOnDrop {
    fn drop(&mut self) {
        if let Some(writer) = self.writer.upgrade() {
            if !writer.is_closed() {
                tracing::info!(session_id = %writer.session_id, "Client disconnected");
            }
            writer.close();
        }
    }
}

pin_project! {
    /// Response body of an open stream. Dropping it (client went away)
    /// closes the writer.
    pub struct SessionStream {
        #[pin]
        records: ReceiverStream<Bytes>,
        keep_alive: Option<Interval>,
        guard: CloseOnDrop,
    }
}

impl Stream for SessionStream {
    type Item = Result<Bytes, Infallible>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.project();
        match this.records.poll_next(cx) {
            Poll::Ready(Some(frame)) => {
                if let Some(interval) = this.keep_alive.as_mut() {
                    interval.reset();
                }
                return Poll::Ready(Some(Ok(frame)));
            }
            Poll::Ready(None) => return Poll::Ready(None),
            Poll::Pending => {}
        }
        if let Some(interval) = this.keep_alive.as_mut() {
            if interval.poll_tick(cx).is_ready() {
                return Poll::Ready(Some(Ok(Bytes::from_static(KEEP_ALIVE_FRAME))));
            }
        }
        Poll::Pending
    }
}

/// Build the 200 streaming response around an open stream.
pub fn stream_response(stream: SessionStream, session_id: Option<&SessionId>) -> Response {
    let mut response = Response::new(Body::from_stream(stream));
    *response.status_mut() = StatusCode::OK;
    let headers = response.headers_mut();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static(EVENT_STREAM_CONTENT_TYPE),
    );
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    headers.insert(header::CONNECTION, HeaderValue::from_static("keep-alive"));
    if let Some(id) = session_id {
        if let Ok(value) = HeaderValue::from_str(id.as_str()) {
            headers.insert(SESSION_ID_HEADER, value);
        }
    }
    response
}
