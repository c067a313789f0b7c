//! A protocol endpoint over one duplex byte stream.
//!
//! The peer owns the write half of the stream and any number of tasks may
//! send requests and responses through cloned handles. Writes are
//! serialized so two frames never interleave on the wire. The read half is
//! driven by [`Peer::listen`], which runs the demultiplexing loop:
//!
//! - `REQUEST` frames are decoded and handed to the handler, whose
//!   response is written back.
//! - `RESPONSE` frames are matched to the waiting caller by identifier.
//!   Identifier 0 is a notification and goes to subscribers.
//! - `EXIT` closes the stream and ends the loop.
//!
//! ```text
//!            request()                                 listen()
//!   caller ──► pending[id] = slot ──► write REQUEST     read marker ─┬─ REQUEST  ─► handler ─► respond()
//!   caller ◄── slot ◄───────────────────────────────────────────────┼─ RESPONSE ─► pending[id]
//!                                                                   └─ EXIT     ─► close
//! ```
//!
//! The write lock covers only the write of one frame; a caller waiting
//! for its response holds no lock. Waiting has no built-in deadline, use
//! [`Peer::request_timeout`] for a bounded wait.

use bytes::{Bytes, BytesMut};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, BufReader, ReadHalf};
use tokio::sync::{broadcast, oneshot};
use tracing::{debug, info, trace, warn};
use url::Url;

use crate::codec::{read_line, Limits, MessageType};
use crate::error::{Error, Result};
use crate::mux::Handler;
use crate::request::Request;
use crate::response::Response;
use crate::status::STATUS_BAD_REQUEST;

type BoxWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Capacity of the notification channel per subscriber.
const NOTIFICATION_BUFFER: usize = 64;

/// Delivery slot for one outstanding request.
struct Slot {
    url: Url,
    tx: oneshot::Sender<Response>,
}

#[derive(Default)]
struct Counters {
    requests_sent: AtomicU64,
    requests_served: AtomicU64,
    responses_delivered: AtomicU64,
    responses_dropped: AtomicU64,
    notifications_received: AtomicU64,
    framing_errors: AtomicU64,
}

/// Snapshot of a peer's counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PeerStats {
    pub requests_sent: u64,
    pub requests_served: u64,
    pub responses_delivered: u64,
    /// Responses that arrived with no matching waiter.
    pub responses_dropped: u64,
    pub notifications_received: u64,
    pub framing_errors: u64,
}

struct Inner {
    writer: tokio::sync::Mutex<BoxWriter>,
    pending: Mutex<HashMap<u64, Slot>>,
    notifications: broadcast::Sender<Response>,
    closed: AtomicBool,
    limits: Limits,
    counters: Counters,
}

/// Cloneable handle to a protocol endpoint.
#[derive(Clone)]
pub struct Peer {
    inner: Arc<Inner>,
}

impl Peer {
    /// Create a peer writing to `writer` with default limits.
    pub fn new<W>(writer: W) -> Self
    where
        W: AsyncWrite + Send + Unpin + 'static,
    {
        Self::with_limits(writer, Limits::default())
    }

    pub fn with_limits<W>(writer: W, limits: Limits) -> Self
    where
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let (notifications, _) = broadcast::channel(NOTIFICATION_BUFFER);
        Self {
            inner: Arc::new(Inner {
                writer: tokio::sync::Mutex::new(Box::new(writer)),
                pending: Mutex::new(HashMap::new()),
                notifications,
                closed: AtomicBool::new(false),
                limits,
                counters: Counters::default(),
            }),
        }
    }

    /// Split a duplex stream; the returned read half is meant for
    /// [`Peer::listen`].
    pub fn split<S>(stream: S, limits: Limits) -> (Self, ReadHalf<S>)
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (reader, writer) = tokio::io::split(stream);
        (Self::with_limits(writer, limits), reader)
    }

    /// Peer over this process's stdout, with stdin as the read half.
    pub fn stdio(limits: Limits) -> (Self, tokio::io::Stdin) {
        (
            Self::with_limits(tokio::io::stdout(), limits),
            tokio::io::stdin(),
        )
    }

    /// Send `request` and wait for the response carrying its identifier.
    ///
    /// Fails if the write fails or the peer closes before the response
    /// arrives.
    pub async fn request(&self, request: Request) -> Result<Response> {
        let rx = self.send_request(request).await?;
        rx.await.map_err(|_| Error::Closed)
    }

    /// [`Peer::request`] bounded by `timeout`. On expiry the delivery slot
    /// is discarded, so a late response is dropped.
    pub async fn request_timeout(&self, request: Request, timeout: Duration) -> Result<Response> {
        let identifier = request.identifier;
        let rx = self.send_request(request).await?;
        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(_)) => Err(Error::Closed),
            Err(_) => {
                self.pending().remove(&identifier);
                debug!(identifier, "Request timed out");
                Err(Error::Timeout)
            }
        }
    }

    /// Register the delivery slot, then write the frame. The slot exists
    /// before the request is on the wire so a fast response always finds it.
    async fn send_request(&self, request: Request) -> Result<oneshot::Receiver<Response>> {
        let identifier = request.identifier;
        let payload = request.encode()?;

        let (tx, rx) = oneshot::channel();
        let previous = self.pending().insert(
            identifier,
            Slot {
                url: request.url.clone(),
                tx,
            },
        );
        if previous.is_some() {
            warn!(identifier, "Replaced an outstanding request with the same identifier");
        }

        if let Err(e) = self.write_frame(MessageType::Request, &payload).await {
            self.pending().remove(&identifier);
            return Err(e);
        }

        self.inner.counters.requests_sent.fetch_add(1, Ordering::Relaxed);
        trace!(identifier, path = request.path(), "Request sent");
        Ok(rx)
    }

    /// Write a response frame.
    pub async fn respond(&self, response: &Response) -> Result<()> {
        let payload = response.encode()?;
        self.write_frame(MessageType::Response, &payload).await?;
        trace!(
            identifier = response.identifier,
            status = response.status_code,
            "Response sent"
        );
        Ok(())
    }

    /// Push an unsolicited 105 NOTIFICATION with identifier 0.
    pub async fn notify(&self, body: impl Into<Bytes>) -> Result<()> {
        self.respond(&Response::notification(body)).await
    }

    /// Tell the remote side to stop, then close the write half. Pending
    /// requests fail with [`Error::Closed`].
    pub async fn exit(&self) -> Result<()> {
        let result = self.write_frame(MessageType::Exit, &[]).await;
        self.close().await;
        result
    }

    /// Receive notifications (responses with identifier 0).
    pub fn subscribe(&self) -> broadcast::Receiver<Response> {
        self.inner.notifications.subscribe()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    /// Number of requests still waiting for a response.
    pub fn pending_requests(&self) -> usize {
        self.pending().len()
    }

    pub fn stats(&self) -> PeerStats {
        let c = &self.inner.counters;
        PeerStats {
            requests_sent: c.requests_sent.load(Ordering::Relaxed),
            requests_served: c.requests_served.load(Ordering::Relaxed),
            responses_delivered: c.responses_delivered.load(Ordering::Relaxed),
            responses_dropped: c.responses_dropped.load(Ordering::Relaxed),
            notifications_received: c.notifications_received.load(Ordering::Relaxed),
            framing_errors: c.framing_errors.load(Ordering::Relaxed),
        }
    }

    /// Run the read loop until `EXIT`, end of stream or a read failure.
    ///
    /// Frames are handled one at a time in wire order; `handler` runs
    /// inline, so a slow handler delays every later frame on this peer,
    /// including responses to this peer's own outstanding requests.
    pub async fn listen<R, H>(&self, reader: R, handler: &H)
    where
        R: AsyncRead + Unpin,
        H: Handler + ?Sized,
    {
        let mut reader = BufReader::new(reader);

        loop {
            let marker = match read_line(&mut reader, self.inner.limits.max_line_length).await {
                Ok(Some(line)) => line,
                Ok(None) => {
                    debug!("Stream closed by remote");
                    break;
                }
                Err(e) if e.is_framing() => {
                    self.reject(e.status_code(), 0, &e).await;
                    continue;
                }
                Err(e) => {
                    warn!(error = %e, "Failed to read message type");
                    break;
                }
            };

            match MessageType::from_marker(&marker) {
                Some(MessageType::Request) => {
                    match Request::read_from(&mut reader, &self.inner.limits).await {
                        Ok(request) => {
                            self.inner.counters.requests_served.fetch_add(1, Ordering::Relaxed);
                            debug!(
                                identifier = request.identifier,
                                path = request.path(),
                                "Dispatching request"
                            );
                            if let Some(response) = handler.serve(request) {
                                if let Err(e) = self.respond(&response).await {
                                    warn!(error = %e, identifier = response.identifier, "Failed to send response");
                                }
                            }
                        }
                        Err(e) if e.is_framing() => {
                            let identifier = e.identifier().unwrap_or(0);
                            self.reject(e.status_code(), identifier, &e).await;
                        }
                        Err(e) => {
                            warn!(error = %e, "Failed to read request");
                            break;
                        }
                    }
                }
                Some(MessageType::Response) => {
                    match Response::read_from(&mut reader, &self.inner.limits).await {
                        Ok(response) => self.deliver(response),
                        Err(e) if e.is_framing() => {
                            if let Some(identifier) = e.identifier() {
                                self.fail_pending(identifier, &e);
                            }
                            self.reject(e.status_code(), 0, &e).await;
                        }
                        Err(e) => {
                            warn!(error = %e, "Failed to read response");
                            break;
                        }
                    }
                }
                Some(MessageType::Exit) => {
                    info!("Received EXIT");
                    break;
                }
                None => {
                    debug!(marker = %marker, "Unknown message type");
                    let response = Response::error(None, STATUS_BAD_REQUEST, "unknown message type");
                    if let Err(e) = self.respond(&response).await {
                        warn!(error = %e, "Failed to send error response");
                    }
                }
            }

            if self.is_closed() {
                break;
            }
        }

        self.close().await;
    }

    /// Route a decoded response to its waiter, or to notification
    /// subscribers when the identifier is 0.
    fn deliver(&self, mut response: Response) {
        let counters = &self.inner.counters;

        if response.is_notification() {
            counters.notifications_received.fetch_add(1, Ordering::Relaxed);
            if self.inner.notifications.send(response).is_err() {
                counters.responses_dropped.fetch_add(1, Ordering::Relaxed);
                trace!("Notification dropped, no subscribers");
            }
            return;
        }

        let identifier = response.identifier;
        let slot = self.pending().remove(&identifier);
        match slot {
            Some(slot) => {
                response.url = slot.url;
                if slot.tx.send(response).is_err() {
                    // the caller gave up waiting
                    counters.responses_dropped.fetch_add(1, Ordering::Relaxed);
                    debug!(identifier, "Waiter gone, response dropped");
                } else {
                    counters.responses_delivered.fetch_add(1, Ordering::Relaxed);
                    trace!(identifier, "Response delivered");
                }
            }
            None => {
                counters.responses_dropped.fetch_add(1, Ordering::Relaxed);
                debug!(identifier, "No waiter for response, dropped");
            }
        }
    }

    /// Resolve the waiter for a response frame that arrived but could not
    /// be decoded, so it sees the decode error instead of waiting forever.
    fn fail_pending(&self, identifier: u64, error: &Error) {
        let slot = match self.pending().remove(&identifier) {
            Some(slot) => slot,
            None => return,
        };

        let mut response = Response::error(None, error.status_code(), error);
        response.identifier = identifier;
        response.url = slot.url;
        if slot.tx.send(response).is_err() {
            debug!(identifier, "Waiter gone, decode error dropped");
        }
    }

    /// Answer a frame that could not be decoded.
    async fn reject(&self, status_code: u16, identifier: u64, error: &Error) {
        self.inner.counters.framing_errors.fetch_add(1, Ordering::Relaxed);
        warn!(error = %error, identifier, "Malformed frame");

        let mut response = Response::error(None, status_code, error);
        response.identifier = identifier;
        if let Err(e) = self.respond(&response).await {
            warn!(error = %e, "Failed to send error response");
        }
    }

    /// Write the marker line and payload as one frame under the write lock.
    async fn write_frame(&self, kind: MessageType, payload: &[u8]) -> Result<()> {
        let marker = kind.marker();
        let mut frame = BytesMut::with_capacity(marker.len() + payload.len());
        frame.extend_from_slice(marker.as_bytes());
        frame.extend_from_slice(payload);

        let mut writer = self.inner.writer.lock().await;
        if self.is_closed() {
            return Err(Error::Closed);
        }
        writer.write_all(&frame).await?;
        writer.flush().await?;
        Ok(())
    }

    /// Enter the terminal state: shut the write half down and release
    /// every pending waiter.
    async fn close(&self) {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        {
            let mut writer = self.inner.writer.lock().await;
            if let Err(e) = writer.shutdown().await {
                debug!(error = %e, "Error shutting down stream");
            }
        }

        let abandoned = {
            let mut pending = self.pending();
            let n = pending.len();
            pending.clear();
            n
        };
        if abandoned > 0 {
            debug!(abandoned, "Released pending requests");
        }
        info!("Peer closed");
    }

    fn pending(&self) -> MutexGuard<'_, HashMap<u64, Slot>> {
        self.inner
            .pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}
