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

//! A client-side RPC runtime over a multiplexed binary transport.
//!
//! `wirecall` lets application code issue typed request/response calls
//! and bidirectional message streams against backends identified by a
//! URI, with pluggable name resolution, load balancing across
//! subchannels, per-call configuration, codec and compression selection,
//! credential-based transport security, and transparent retry of
//! provably-unprocessed attempts.
//!
//! The transport itself, the object owning the socket, stream
//! multiplexing, flow control, and header encoding, is consumed through
//! the traits in [`client::transport`], never implemented here.
//!
//! # Example
//!
//! ```ignore
//! let options = ChannelOptions::new(my_connector);
//! let channel = Channel::dial("passthrough:///backend:4000", options)?;
//! let ctx = Context::background();
//! channel
//!     .invoke(&ctx, "/echo.Echo/Ping", &request, &mut reply, CallOptions::new())
//!     .await?;
//! ```

pub mod client;
pub mod codec;
pub mod compression;
pub mod credentials;
pub mod keepalive;
pub mod metadata;
pub mod stats;

mod context;
mod status;

pub use context::{Cancel, Context};
pub use status::{Code, Status};
