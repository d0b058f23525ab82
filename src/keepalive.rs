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

//! Configurable parameters for point-to-point health checking, consumed by
//! the transport.  `Duration::MAX` stands for "infinite".

use std::time::Duration;

/// Client-side keepalive parameters.  These configure how the client probes
/// to notice a broken connection and pings so intermediaries observe the
/// connection's liveness.  Set them in coordination with the server's
/// [`EnforcementPolicy`]; incompatible settings can cause the server to
/// close the connection.
#[derive(Clone, Copy, Debug)]
pub struct ClientParameters {
    /// After this much inactivity the client pings the server to check the
    /// transport is still alive.
    pub time: Duration,
    /// After pinging, the client waits this long for activity before
    /// closing the connection.
    pub timeout: Duration,
    /// If true, keepalive checks run even with no active RPCs.
    pub permit_without_stream: bool,
}

impl Default for ClientParameters {
    fn default() -> Self {
        ClientParameters {
            time: Duration::MAX,
            timeout: Duration::from_secs(20),
            permit_without_stream: false,
        }
    }
}

/// Server-side keepalive and connection-age parameters.
#[derive(Clone, Copy, Debug)]
pub struct ServerParameters {
    /// Idle connections are closed (with a go-away) after this duration.
    /// Idleness starts when the number of outstanding RPCs reaches zero.
    pub max_connection_idle: Duration,
    /// Maximum lifetime of any connection before a graceful close begins.
    pub max_connection_age: Duration,
    /// Additional grace period after `max_connection_age` before the
    /// connection is forcibly closed.
    pub max_connection_age_grace: Duration,
    /// After this much inactivity the server pings the client.
    pub time: Duration,
    /// After pinging, the server waits this long for activity before
    /// closing the connection.
    pub timeout: Duration,
}

impl Default for ServerParameters {
    fn default() -> Self {
        ServerParameters {
            max_connection_idle: Duration::MAX,
            max_connection_age: Duration::MAX,
            max_connection_age_grace: Duration::MAX,
            time: Duration::from_secs(2 * 60 * 60),
            timeout: Duration::from_secs(20),
        }
    }
}

/// Server-side keepalive enforcement policy.  The server closes connections
/// with clients that violate it.
#[derive(Clone, Copy, Debug)]
pub struct EnforcementPolicy {
    /// Minimum time a client must wait between keepalive pings.
    pub min_time: Duration,
    /// If true, the server accepts keepalive pings even when there are no
    /// active streams.
    pub permit_without_stream: bool,
}

impl Default for EnforcementPolicy {
    fn default() -> Self {
        EnforcementPolicy {
            min_time: Duration::from_secs(5 * 60),
            permit_without_stream: false,
        }
    }
}
