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

//! Rustls-backed client transport credentials.
//!
//! The TLS profile is fixed: ALPN advertises `h2` only, and the minimum
//! protocol version is TLS 1.2.

use std::sync::Arc;

use async_trait::async_trait;
use rustls::{ClientConfig, RootCertStore};
use rustls_pki_types::ServerName;
use tokio_rustls::TlsConnector;

use super::{AuthInfo, BoxedIo, ProtocolInfo, TransportCredentials};
use crate::client::transport::TransportError;
use crate::context::Context;
use crate::status::Status;

/// Authentication state of a TLS-secured connection.
#[derive(Debug)]
pub struct TlsInfo {
    /// Negotiated protocol version, when known.
    pub version: Option<String>,
}

impl AuthInfo for TlsInfo {
    fn auth_type(&self) -> &str {
        "tls"
    }
}

/// Client [`TransportCredentials`] backed by rustls.
pub struct TlsCredentials {
    config: Arc<ClientConfig>,
    server_name_override: Option<String>,
}

impl TlsCredentials {
    /// Builds TLS credentials that verify servers against the given root
    /// store.
    pub fn new(roots: RootCertStore) -> Self {
        let mut config = ClientConfig::builder_with_protocol_versions(&[
            &rustls::version::TLS13,
            &rustls::version::TLS12,
        ])
        .with_root_certificates(roots)
        .with_no_client_auth();
        config.alpn_protocols = super::ALPN_PROTOCOLS
            .iter()
            .map(|p| p.as_bytes().to_vec())
            .collect();
        TlsCredentials {
            config: Arc::new(config),
            server_name_override: None,
        }
    }

    fn verify_name(&self, authority: &str) -> Result<ServerName<'static>, TransportError> {
        let mut name = self.server_name_override.as_deref().unwrap_or(authority);
        // The authority may carry a port; certificate verification is
        // against the host alone.
        if let Some((host, port)) = name.rsplit_once(':') {
            if !port.is_empty() && port.chars().all(|c| c.is_ascii_digit()) {
                name = host;
            }
        }
        ServerName::try_from(name.to_string()).map_err(|err| {
            TransportError::new(
                Status::internal(format!("invalid server name for TLS handshake: {err}")),
                false,
            )
        })
    }
}

#[async_trait]
impl TransportCredentials for TlsCredentials {
    async fn client_handshake(
        &self,
        ctx: &Context,
        authority: &str,
        io: BoxedIo,
    ) -> Result<(BoxedIo, Arc<dyn AuthInfo>), TransportError> {
        let connector = TlsConnector::from(self.config.clone());
        let name = self.verify_name(authority)?;
        let handshake = connector.connect(name, io);
        let stream = tokio::select! {
            result = handshake => result.map_err(|err| {
                TransportError::new(
                    Status::unavailable(format!("TLS handshake failed: {err}")),
                    // An interrupted handshake is worth retrying.
                    err.kind() == std::io::ErrorKind::UnexpectedEof,
                )
            })?,
            _ = ctx.done() => {
                return Err(TransportError::new(
                    ctx.error().unwrap_or_else(|| Status::cancelled("handshake cancelled")),
                    true,
                ));
            }
        };
        let version = stream
            .get_ref()
            .1
            .protocol_version()
            .map(|v| format!("{v:?}"));
        let info: Arc<dyn AuthInfo> = Arc::new(TlsInfo { version });
        Ok((Box::new(stream), info))
    }

    async fn server_handshake(
        &self,
        _io: BoxedIo,
    ) -> Result<(BoxedIo, Arc<dyn AuthInfo>), TransportError> {
        Err(TransportError::new(
            Status::internal("client TLS credentials cannot accept connections"),
            false,
        ))
    }

    fn info(&self) -> ProtocolInfo {
        ProtocolInfo {
            protocol_version: String::new(),
            security_protocol: "tls".to_string(),
            security_version: "1.2".to_string(),
            server_name: self.server_name_override.clone().unwrap_or_default(),
        }
    }

    fn with_server_name_override(
        &self,
        name: &str,
    ) -> Result<Arc<dyn TransportCredentials>, Status> {
        Ok(Arc::new(TlsCredentials {
            config: self.config.clone(),
            server_name_override: Some(name.to_string()),
        }))
    }
}
