/*
 *
 * Copyright 2025 wirecall authors.
 *
 * Licensed under the Apache License, Version 2.0 (the "License");
 * you may not use this file except in compliance with the License.
 * You may obtain a copy of the License at
 *
 *     http://www.apache.org/licenses/LICENSE-2.0
 *
 * Unless required by applicable law or agreed to in writing, software
 * distributed under the License is distributed on an "AS IS" BASIS,
 * WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 * See the License for the specific language governing permissions and
 * limitations under the License.
 *
 */

//! The transport surface consumed by the channel.
//!
//! The object that owns the network socket, multiplexed stream identifiers,
//! flow control, header/trailer encoding, and keepalive pings lives behind
//! these traits.  This crate never implements a wire protocol; subchannels
//! dial through a [`Connector`] and streams speak to a [`TransportStream`].

use std::error::Error;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::oneshot;

use crate::context::Context;
use crate::credentials::{CallCredentials, Peer, TransportCredentials};
use crate::keepalive::ClientParameters;
use crate::metadata::Metadata;
use crate::status::Status;

/// An error produced by the transport layer.
///
/// `temporary` marks failures worth retrying at the connection level:
/// end-of-stream during a handshake, deadline expiry, or conditions the
/// transport knows to be transient.
#[derive(Debug, Clone)]
pub struct TransportError {
    status: Status,
    temporary: bool,
}

impl TransportError {
    /// Creates a transport error wrapping `status`.
    pub fn new(status: Status, temporary: bool) -> Self {
        TransportError { status, temporary }
    }

    /// The status describing the failure.
    pub fn status(&self) -> &Status {
        &self.status
    }

    /// Reports whether reconnecting may resolve the failure.
    pub fn is_temporary(&self) -> bool {
        self.temporary
    }
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "transport error: {}", self.status)
    }
}

impl Error for TransportError {}

impl From<TransportError> for Status {
    fn from(err: TransportError) -> Status {
        err.status
    }
}

/// Per-connection options handed to a [`Connector`].
#[derive(Clone, Default)]
pub struct ConnectOptions {
    /// Transport security for the connection, if any.
    pub credentials: Option<Arc<dyn TransportCredentials>>,
    /// The authority the connection asserts (and verifies, when secured).
    pub authority: String,
    /// Keepalive behaviour for the connection.
    pub keepalive: ClientParameters,
    /// Absolute deadline for establishing the connection.
    pub connect_deadline: Option<Instant>,
}

/// A successfully established connection.
pub struct Connected {
    /// The transport to open protocol streams on.
    pub transport: Arc<dyn ClientTransport>,
    /// Resolves when the connection terminates.  The subchannel watches
    /// this to drive its state machine.
    pub disconnected: oneshot::Receiver<Result<(), TransportError>>,
}

/// Dials one address and produces a connected transport.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Establishes a connection to `address`.  Does not retry; backoff and
    /// address iteration are the subchannel's concern.
    async fn connect(
        &self,
        address: &str,
        options: &ConnectOptions,
    ) -> Result<Connected, TransportError>;
}

/// The header opening a protocol stream for one call.
#[derive(Clone, Default)]
pub struct CallHeader {
    /// The virtual-host identity asserted on the wire.
    pub authority: String,
    /// Full method path, `/service/method`.
    pub method: String,
    /// If set, the transport flushes the header frame immediately rather
    /// than coalescing it with the first message.  Set only for
    /// client-streaming calls, where the first message may be arbitrarily
    /// far away.
    pub flush_header: bool,
    /// Content subtype naming the codec in use.
    pub content_subtype: String,
    /// Outbound content-coding, when send compression is in effect.
    pub send_compress: Option<String>,
    /// Per-call credentials overriding the channel's, if any.
    pub credentials: Option<Arc<dyn CallCredentials>>,
}

/// An established multiplexed connection on which protocol streams open.
#[async_trait]
pub trait ClientTransport: Send + Sync {
    /// Opens a protocol stream for one call.  Failures here happened before
    /// any request byte reached the wire, so callers may safely re-dispatch.
    async fn new_stream(
        &self,
        ctx: &Context,
        call: &CallHeader,
    ) -> Result<Box<dyn TransportStream>, TransportError>;

    /// Begins a graceful shutdown: existing streams run to completion, new
    /// `new_stream` calls fail.
    fn graceful_close(&self);
}

/// One protocol stream of a multiplexed transport.
///
/// Writes and reads on the same stream may run concurrently from one
/// writer task and one reader task; neither side may be shared further.
#[async_trait]
pub trait TransportStream: Send + Sync {
    /// Writes one framed message (header bytes then payload bytes).  `last`
    /// marks the end of the send direction.
    async fn write(&self, hdr: Bytes, payload: Bytes, last: bool) -> Result<(), TransportError>;

    /// Reads up to `buf.len()` bytes of the inbound message byte stream,
    /// returning the count.  `Ok(0)` signals a clean end of stream; the
    /// final status is then available from [`TransportStream::status`].
    async fn read(&self, buf: &mut [u8]) -> Result<usize, TransportError>;

    /// Closes the stream, conveying `status` when the protocol carries it.
    /// Idempotent.
    fn close(&self, status: &Status);

    /// The final status of the stream.  Meaningful after `read` returned
    /// `Ok(0)` or an error.
    fn status(&self) -> Status;

    /// The header metadata received from the server.  Blocks until the
    /// header frame arrives.
    async fn header(&self) -> Result<Metadata, TransportError>;

    /// The trailer metadata.  Meaningful only after the stream finished.
    fn trailer(&self) -> Metadata;

    /// The inbound content-coding announced by the peer, resolved once the
    /// header frame arrives.  `None` or `"identity"` means uncompressed.
    async fn recv_compress(&self) -> Option<String>;

    /// Reports whether any data for this stream has arrived from the peer.
    fn bytes_received(&self) -> bool;

    /// Reports whether the stream failed before any of its bytes reached
    /// the remote side.  The basis for safe transparent retry.
    fn unprocessed(&self) -> bool;

    /// The remote endpoint of this stream.
    fn peer(&self) -> Peer;
}
