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

//! Credential interfaces: per-call credentials that attach security
//! metadata to every RPC, and transport credentials that secure the
//! underlying connection.

use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::client::transport::TransportError;
use crate::context::Context;
use crate::status::Status;

#[cfg(feature = "tls")]
pub mod tls;

/// Application-level protocols negotiated for this wire protocol.
pub static ALPN_PROTOCOLS: &[&str] = &["h2"];

/// Credentials that attach security information (e.g. tokens) to every RPC.
#[async_trait]
pub trait CallCredentials: Send + Sync {
    /// Returns the current request metadata, refreshing tokens if required.
    /// Called by the transport layer once per request; the returned map is
    /// populated into the request headers.  `uris` identify the entry
    /// points of the request.
    async fn get_request_metadata(
        &self,
        ctx: &Context,
        uris: &[String],
    ) -> Result<HashMap<String, String>, Status>;

    /// Reports whether these credentials require the transport to be
    /// secured before they may be sent.
    fn require_transport_security(&self) -> bool;
}

/// Information about the wire protocol and security protocol in use on a
/// connection.
#[derive(Clone, Debug, Default)]
pub struct ProtocolInfo {
    /// The wire protocol version.
    pub protocol_version: String,
    /// The security protocol in use, e.g. `"tls"`.
    pub security_protocol: String,
    /// The security protocol version.
    pub security_version: String,
    /// The user-configured server name, if overridden.
    pub server_name: String,
}

/// Authentication state of an established connection, surfaced to callers
/// through the peer.
pub trait AuthInfo: Send + Sync + Debug {
    /// The type of this authentication, e.g. `"tls"`.
    fn auth_type(&self) -> &str;
}

/// A raw bidirectional byte stream handed to a handshake.
pub trait Io: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin> Io for T {}

/// An owned, type-erased [`Io`].
pub type BoxedIo = Box<dyn Io>;

/// Secures connections for a wire protocol (e.g. TLS).
///
/// Handshake errors that are temporary (end-of-stream, deadline expiry,
/// or errors an implementation marks temporary) cause the subchannel to
/// reconnect rather than fail; see [`TransportError::is_temporary`].
#[async_trait]
pub trait TransportCredentials: Send + Sync {
    /// Performs the client-side authentication handshake on `io`.
    /// `authority` is the name the server's identity is verified against.
    /// The secured connection owns the provided raw connection: closing it
    /// closes both.
    async fn client_handshake(
        &self,
        ctx: &Context,
        authority: &str,
        io: BoxedIo,
    ) -> Result<(BoxedIo, Arc<dyn AuthInfo>), TransportError>;

    /// Performs the server-side authentication handshake on `io`.
    async fn server_handshake(
        &self,
        io: BoxedIo,
    ) -> Result<(BoxedIo, Arc<dyn AuthInfo>), TransportError>;

    /// Describes the protocols these credentials speak.
    fn info(&self) -> ProtocolInfo;

    /// Returns a copy of these credentials that verifies the server against
    /// `name` instead of the connection authority.  Must be called before
    /// dialing.
    fn with_server_name_override(
        &self,
        name: &str,
    ) -> Result<Arc<dyn TransportCredentials>, Status>;
}

/// The identity of the remote end of a call.
#[derive(Clone, Debug, Default)]
pub struct Peer {
    /// The network address of the peer.
    pub address: String,
    /// Authentication state of the connection, when secured.
    pub auth_info: Option<Arc<dyn AuthInfo>>,
}
