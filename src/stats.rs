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

//! Hooks for observing the lifecycle of RPCs.

use std::time::Instant;

use crate::status::Status;

/// An event in the lifecycle of a single RPC.
#[derive(Debug)]
pub enum RpcStats {
    /// The call has begun.
    Begin {
        method: String,
        fail_fast: bool,
        begin_time: Instant,
    },
    /// A message left for the wire.  `wire_length` is the framed payload
    /// size after compression; `length` is the uncompressed encoding.
    OutPayload {
        length: usize,
        wire_length: usize,
        sent_time: Instant,
    },
    /// A message arrived from the wire.
    InPayload {
        length: usize,
        wire_length: usize,
        recv_time: Instant,
    },
    /// The call has finished.  `error` is `None` on success.
    End {
        begin_time: Instant,
        end_time: Instant,
        error: Option<Status>,
    },
}

/// Receives [`RpcStats`] events for calls it was attached to, either
/// channel-wide via dial options or per call via
/// [`crate::client::with_stats_handler`].
pub trait StatsHandler: Send + Sync {
    /// Handles one event.  Must not block.
    fn handle(&self, stats: &RpcStats);
}
