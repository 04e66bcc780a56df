//! Streaming session state machine
//!
//! A session owns one in-flight response body on a connection:
//!
//! ```text
//! HeaderSent -> Streaming -> Completed
//!                         \-> Aborted
//! ```
//!
//! The session is the response body stream. Every poll from the transport is
//! one step: at most one buffer of source bytes is read (and decrypted) and
//! handed back, so reads never run ahead of what the connection accepts.
//! Completion is detected as soon as the last byte is produced, because the
//! transport stops polling a length-delimited body once it has everything.
//!
//! Resources held by the source, and the connection slot, are released
//! exactly once: on completion, on abort, or when the body is dropped early
//! because the client went away.

use crate::connection::Takeover;
use crate::metrics;
use crate::usage::{UsageEvent, UsageSink};
use axum::body::Body;
use blockserve_core::error::BlockServeError;
use bytes::Bytes;
use futures::Stream;
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use thiserror::Error;
use tracing::{debug, error, info};

/// Mid-stream failure. Headers are already committed, so these are never
/// turned into a status code; the connection is torn down instead.
#[derive(Error, Debug)]
pub enum SessionError {
    #[error(transparent)]
    Block(#[from] BlockServeError),

    #[error("Archive read failed: {0}")]
    Archive(#[source] io::Error),

    #[error("Source ended {missing} bytes before the advertised length")]
    Truncated { missing: u64 },

    #[error("Source produced more than the advertised {expected} bytes")]
    Overrun { expected: u64 },

    #[error("Range start {offset} lies beyond the file's blocks")]
    RangeOutsideBlocks { offset: u64 },
}

/// One step's worth of output from a source
#[derive(Debug)]
pub struct Chunk {
    pub data: Bytes,

    /// No further bytes will follow
    pub done: bool,
}

impl Chunk {
    pub fn more(data: Bytes) -> Self {
        Self { data, done: false }
    }

    pub fn last(data: Bytes) -> Self {
        Self { data, done: true }
    }
}

/// Where a session's bytes come from
pub trait TransferSource: Send {
    /// Prepare the first read. Runs on the first step, after the headers
    /// have gone out.
    fn start(&mut self) -> Result<(), SessionError> {
        Ok(())
    }

    /// Produce the next bounded piece of output
    fn next_chunk(&mut self) -> Result<Chunk, SessionError>;

    /// Close every handle the source holds. Called exactly once.
    fn release(&mut self);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    HeaderSent,
    Streaming,
    Completed,
    Aborted,
}

/// What a session delivers, for logs and metrics
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferKind {
    File,
    Range,
    Block,
    Archive,
}

impl TransferKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransferKind::File => "file",
            TransferKind::Range => "range",
            TransferKind::Block => "block",
            TransferKind::Archive => "archive",
        }
    }
}

pub struct StreamingSession {
    id: u64,
    kind: TransferKind,
    state: SessionState,
    source: Box<dyn TransferSource>,
    takeover: Option<Takeover>,
    content_length: u64,
    sent: u64,
    usage: Option<UsageEvent>,
    sink: Option<Arc<dyn UsageSink>>,
}

impl StreamingSession {
    /// Install a session on a connection whose slot has been taken over.
    /// Headers for `content_length` bytes are about to be sent.
    pub fn new(
        kind: TransferKind,
        source: Box<dyn TransferSource>,
        takeover: Takeover,
        content_length: u64,
    ) -> Self {
        let id = takeover.session_id();
        metrics::record_transfer_started(kind.as_str());
        debug!(session_id = id, kind = kind.as_str(), content_length, "Session installed");

        Self {
            id,
            kind,
            state: SessionState::HeaderSent,
            source,
            takeover: Some(takeover),
            content_length,
            sent: 0,
            usage: None,
            sink: None,
        }
    }

    /// Event to emit once every byte has been delivered
    pub fn with_usage(mut self, sink: Arc<dyn UsageSink>, event: Option<UsageEvent>) -> Self {
        self.usage = event;
        self.sink = Some(sink);
        self
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn bytes_sent(&self) -> u64 {
        self.sent
    }

    /// Turn the session into a response body.
    ///
    /// The server never polls a body advertised as zero bytes, so a
    /// zero-length transfer is run to completion here and answered with an
    /// empty body.
    pub fn into_body(mut self) -> Body {
        if self.content_length == 0 {
            while self.step().is_some() {}
            return Body::empty();
        }
        Body::from_stream(self)
    }

    /// Run one read-and-write cycle.
    ///
    /// `None` means the body is finished (or was already torn down).
    pub fn step(&mut self) -> Option<Result<Bytes, SessionError>> {
        match self.state {
            SessionState::Completed | SessionState::Aborted => return None,
            SessionState::HeaderSent => {
                if let Err(e) = self.source.start() {
                    return Some(Err(self.abort(e)));
                }
                self.state = SessionState::Streaming;
            }
            SessionState::Streaming => {}
        }

        let chunk = match self.source.next_chunk() {
            Ok(chunk) => chunk,
            Err(e) => return Some(Err(self.abort(e))),
        };

        self.sent += chunk.data.len() as u64;
        if self.sent > self.content_length {
            let e = SessionError::Overrun {
                expected: self.content_length,
            };
            return Some(Err(self.abort(e)));
        }

        if chunk.done {
            if self.sent < self.content_length {
                let e = SessionError::Truncated {
                    missing: self.content_length - self.sent,
                };
                return Some(Err(self.abort(e)));
            }
            self.complete();
            if chunk.data.is_empty() {
                return None;
            }
        }

        Some(Ok(chunk.data))
    }

    fn complete(&mut self) {
        self.state = SessionState::Completed;
        self.source.release();
        if let Some(takeover) = self.takeover.take() {
            takeover.restore();
        }

        metrics::record_transfer_completed(self.kind.as_str(), self.sent);
        info!(
            session_id = self.id,
            kind = self.kind.as_str(),
            bytes = self.sent,
            "Transfer complete"
        );

        if let (Some(event), Some(sink)) = (self.usage.take(), self.sink.as_ref()) {
            sink.emit(event);
        }
    }

    fn abort(&mut self, err: SessionError) -> SessionError {
        self.state = SessionState::Aborted;
        self.source.release();
        drop(self.takeover.take());

        metrics::record_transfer_aborted(self.kind.as_str(), "error");
        error!(
            session_id = self.id,
            kind = self.kind.as_str(),
            bytes = self.sent,
            error = %err,
            "Transfer aborted, closing connection"
        );
        err
    }
}

impl Stream for StreamingSession {
    type Item = Result<Bytes, io::Error>;

    fn poll_next(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        Poll::Ready(this.step().map(|r| r.map_err(io::Error::other)))
    }
}

impl Drop for StreamingSession {
    fn drop(&mut self) {
        if matches!(self.state, SessionState::HeaderSent | SessionState::Streaming) {
            // Client disconnect or transport failure; not a server fault
            self.state = SessionState::Aborted;
            self.source.release();
            drop(self.takeover.take());

            metrics::record_transfer_aborted(self.kind.as_str(), "disconnect");
            debug!(
                session_id = self.id,
                kind = self.kind.as_str(),
                bytes = self.sent,
                "Body dropped before transfer finished"
            );
        }
    }
}
