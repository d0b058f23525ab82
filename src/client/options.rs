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

//! Per-call options and the call record they assemble.
//!
//! A [`CallInfo`] composes dial-time defaults, service-config defaults,
//! and per-call options, in that order.

use std::sync::{Arc, Mutex};

use crate::credentials::{CallCredentials, Peer};
use crate::metadata::Metadata;
use crate::stats::StatsHandler;
use crate::status::Status;

/// A slot a call fills with header or trailer metadata once available.
pub type MetadataSink = Arc<Mutex<Option<Metadata>>>;

/// A slot a call fills with the peer of the transport it ran on.
pub type PeerSink = Arc<Mutex<Option<Peer>>>;

/// The per-call record assembled before dispatch.
#[derive(Clone, Default)]
pub struct CallInfo {
    /// When set, no subchannel being ready fails the call immediately
    /// instead of waiting.  The default.
    pub fail_fast: bool,
    /// Content subtype selecting the codec; empty means the channel
    /// default.
    pub content_subtype: String,
    /// Send-compression coding requested for this call, if any.
    pub compressor_type: Option<String>,
    /// Per-call credentials overriding the channel's.
    pub credentials: Option<Arc<dyn CallCredentials>>,
    /// Caller-requested maximum send size; merged with the method config.
    pub max_send_message_size: Option<usize>,
    /// Caller-requested maximum receive size; merged with the method
    /// config.
    pub max_receive_message_size: Option<usize>,
    /// Stats handler observing this call, if any.
    pub stats_handler: Option<Arc<dyn StatsHandler>>,
    pub(crate) header_sinks: Vec<MetadataSink>,
    pub(crate) trailer_sinks: Vec<MetadataSink>,
    pub(crate) peer_sinks: Vec<PeerSink>,
}

impl CallInfo {
    pub(crate) fn default_call_info() -> CallInfo {
        CallInfo {
            fail_fast: true,
            ..Default::default()
        }
    }
}

/// One per-call option.  `before` runs while the call record is assembled;
/// `after` runs when the call has finished.
pub trait CallOption: Send + Sync {
    fn before(&self, _info: &mut CallInfo) -> Result<(), Status> {
        Ok(())
    }

    fn after(&self, _info: &CallInfo) {}
}

/// An ordered collection of call options.
#[derive(Clone, Default)]
pub struct CallOptions {
    opts: Vec<Arc<dyn CallOption>>,
}

impl CallOptions {
    pub fn new() -> Self {
        CallOptions::default()
    }

    /// Appends an option; later options run later and therefore win.
    pub fn with(mut self, option: impl CallOption + 'static) -> Self {
        self.opts.push(Arc::new(option));
        self
    }

    /// Dial-default options followed by per-call options, so the
    /// interceptor (and the hooks) see all applicable options and the
    /// per-call ones take precedence.
    pub(crate) fn combine(defaults: &CallOptions, per_call: &CallOptions) -> CallOptions {
        if defaults.opts.is_empty() {
            return per_call.clone();
        }
        if per_call.opts.is_empty() {
            return defaults.clone();
        }
        let mut opts = Vec::with_capacity(defaults.opts.len() + per_call.opts.len());
        opts.extend(defaults.opts.iter().cloned());
        opts.extend(per_call.opts.iter().cloned());
        CallOptions { opts }
    }

    pub(crate) fn apply_before(&self, info: &mut CallInfo) -> Result<(), Status> {
        for opt in &self.opts {
            opt.before(info)?;
        }
        Ok(())
    }

    pub(crate) fn apply_after(&self, info: &CallInfo) {
        for opt in &self.opts {
            opt.after(info);
        }
    }
}

struct WaitForReady(bool);

impl CallOption for WaitForReady {
    fn before(&self, info: &mut CallInfo) -> Result<(), Status> {
        info.fail_fast = !self.0;
        Ok(())
    }
}

/// Configures the call to block until the channel is ready rather than
/// failing fast on transient failure.
pub fn wait_for_ready(wait: bool) -> impl CallOption {
    WaitForReady(wait)
}

struct UseCompressor(String);

impl CallOption for UseCompressor {
    fn before(&self, info: &mut CallInfo) -> Result<(), Status> {
        info.compressor_type = Some(self.0.clone());
        Ok(())
    }
}

/// Selects the named compressor for sending on this call.  The compressor
/// must be registered; a missing one fails the call with an internal
/// status.
pub fn use_compressor(name: impl Into<String>) -> impl CallOption {
    UseCompressor(name.into())
}

struct ContentSubtype(String);

impl CallOption for ContentSubtype {
    fn before(&self, info: &mut CallInfo) -> Result<(), Status> {
        info.content_subtype = self.0.to_lowercase();
        Ok(())
    }
}

/// Selects the codec for this call by content subtype.
pub fn call_content_subtype(subtype: impl Into<String>) -> impl CallOption {
    ContentSubtype(subtype.into())
}

struct MaxRecvMsgSize(usize);

impl CallOption for MaxRecvMsgSize {
    fn before(&self, info: &mut CallInfo) -> Result<(), Status> {
        info.max_receive_message_size = Some(self.0);
        Ok(())
    }
}

/// Caps the size of messages this call can receive.
pub fn max_recv_msg_size(bytes: usize) -> impl CallOption {
    MaxRecvMsgSize(bytes)
}

struct MaxSendMsgSize(usize);

impl CallOption for MaxSendMsgSize {
    fn before(&self, info: &mut CallInfo) -> Result<(), Status> {
        info.max_send_message_size = Some(self.0);
        Ok(())
    }
}

/// Caps the size of messages this call can send.
pub fn max_send_msg_size(bytes: usize) -> impl CallOption {
    MaxSendMsgSize(bytes)
}

struct PerCallCredentials(Arc<dyn CallCredentials>);

impl CallOption for PerCallCredentials {
    fn before(&self, info: &mut CallInfo) -> Result<(), Status> {
        info.credentials = Some(self.0.clone());
        Ok(())
    }
}

/// Attaches credentials to this call, overriding the channel's.
pub fn per_call_credentials(creds: Arc<dyn CallCredentials>) -> impl CallOption {
    PerCallCredentials(creds)
}

struct HeaderSinkOption(MetadataSink);

impl CallOption for HeaderSinkOption {
    fn before(&self, info: &mut CallInfo) -> Result<(), Status> {
        info.header_sinks.push(self.0.clone());
        Ok(())
    }
}

/// Fills `sink` with the header metadata once it arrives.
pub fn header(sink: MetadataSink) -> impl CallOption {
    HeaderSinkOption(sink)
}

struct TrailerSinkOption(MetadataSink);

impl CallOption for TrailerSinkOption {
    fn before(&self, info: &mut CallInfo) -> Result<(), Status> {
        info.trailer_sinks.push(self.0.clone());
        Ok(())
    }
}

/// Fills `sink` with the trailer metadata when the call finishes.
pub fn trailer(sink: MetadataSink) -> impl CallOption {
    TrailerSinkOption(sink)
}

struct PeerSinkOption(PeerSink);

impl CallOption for PeerSinkOption {
    fn before(&self, info: &mut CallInfo) -> Result<(), Status> {
        info.peer_sinks.push(self.0.clone());
        Ok(())
    }
}

/// Fills `sink` with the peer the call ran against.
pub fn peer(sink: PeerSink) -> impl CallOption {
    PeerSinkOption(sink)
}

struct WithStatsHandler(Arc<dyn StatsHandler>);

impl CallOption for WithStatsHandler {
    fn before(&self, info: &mut CallInfo) -> Result<(), Status> {
        info.stats_handler = Some(self.0.clone());
        Ok(())
    }
}

/// Attaches a stats handler observing this call.
pub fn with_stats_handler(handler: Arc<dyn StatsHandler>) -> impl CallOption {
    WithStatsHandler(handler)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_fail_fast() {
        let info = CallInfo::default_call_info();
        assert!(info.fail_fast);
    }

    #[test]
    fn wait_for_ready_flips_fail_fast() {
        let mut info = CallInfo::default_call_info();
        CallOptions::new()
            .with(wait_for_ready(true))
            .apply_before(&mut info)
            .unwrap();
        assert!(!info.fail_fast);
    }

    #[test]
    fn per_call_options_override_dial_defaults() {
        let defaults = CallOptions::new().with(max_recv_msg_size(10));
        let per_call = CallOptions::new().with(max_recv_msg_size(20));
        let combined = CallOptions::combine(&defaults, &per_call);
        let mut info = CallInfo::default_call_info();
        combined.apply_before(&mut info).unwrap();
        assert_eq!(info.max_receive_message_size, Some(20));
    }

    #[test]
    fn content_subtype_is_lowercased() {
        let mut info = CallInfo::default_call_info();
        CallOptions::new()
            .with(call_content_subtype("JSON"))
            .apply_before(&mut info)
            .unwrap();
        assert_eq!(info.content_subtype, "json");
    }
}
