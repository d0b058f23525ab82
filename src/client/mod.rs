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

//! The client-side runtime: channels, streams, name resolution, load
//! balancing, and per-call configuration.

use std::fmt::Display;

pub mod channel;
pub mod interceptor;
pub mod load_balancing;
pub mod name_resolution;
pub mod service_config;
pub mod transport;

pub(crate) mod frame;

mod call;
mod options;
mod stream;
mod subchannel;

pub use channel::{Channel, ChannelOptions, DialError};
pub use options::{
    call_content_subtype, header, max_recv_msg_size, max_send_msg_size, peer,
    per_call_credentials, trailer, use_compressor, wait_for_ready, with_stats_handler, CallInfo,
    CallOption, CallOptions, MetadataSink, PeerSink,
};
pub use stream::{ClientStream, StreamDesc, TypedStream};
pub use subchannel::Subchannel;

/// The state of a channel or of one of its subchannels.
///
/// A channel begins `Idle`.  When an RPC is attempted it transitions to
/// `Connecting`; if a connection to a backend becomes available the state
/// becomes `Ready`, otherwise `TransientFailure` while reconnection is
/// attempted.  `Shutdown` is terminal.
#[derive(Copy, Clone, PartialEq, Eq, Debug, Hash)]
pub enum ConnectivityState {
    Idle,
    Connecting,
    Ready,
    TransientFailure,
    Shutdown,
}

impl Display for ConnectivityState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectivityState::Idle => write!(f, "Idle"),
            ConnectivityState::Connecting => write!(f, "Connecting"),
            ConnectivityState::Ready => write!(f, "Ready"),
            ConnectivityState::TransientFailure => write!(f, "TransientFailure"),
            ConnectivityState::Shutdown => write!(f, "Shutdown"),
        }
    }
}
