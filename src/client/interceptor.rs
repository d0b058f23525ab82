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

//! Client-side interceptors.
//!
//! An interceptor wraps call dispatch: it observes (and may rewrite) the
//! context, method, and outcome, and decides when (or whether) to run
//! the call by consuming its continuation object.

use async_trait::async_trait;

use super::call::invoke_inner;
use super::channel::Channel;
use super::options::CallOptions;
use super::stream::{new_client_stream, ClientStream, StreamDesc};
use crate::codec::Message;
use crate::context::Context;
use crate::status::Status;

/// The continuation of an intercepted unary call.
pub struct UnaryInvoker {
    channel: Channel,
    options: CallOptions,
}

impl UnaryInvoker {
    pub(crate) fn new(channel: Channel, options: CallOptions) -> Self {
        UnaryInvoker { channel, options }
    }

    /// Runs the underlying call.
    pub async fn invoke(
        self,
        ctx: &Context,
        method: &str,
        request: &dyn Message,
        reply: &mut dyn Message,
    ) -> Result<(), Status> {
        invoke_inner(&self.channel, ctx, method, request, reply, self.options).await
    }
}

/// Intercepts unary calls on a channel.
#[async_trait]
pub trait UnaryInterceptor: Send + Sync {
    /// Handles one unary call.  Implementations typically perform work
    /// around `next.invoke(..)`.
    async fn intercept_unary(
        &self,
        ctx: &Context,
        method: &str,
        request: &dyn Message,
        reply: &mut dyn Message,
        next: UnaryInvoker,
    ) -> Result<(), Status>;
}

/// The continuation of an intercepted stream creation.
pub struct StreamInvoker {
    channel: Channel,
    options: CallOptions,
}

impl StreamInvoker {
    pub(crate) fn new(channel: Channel, options: CallOptions) -> Self {
        StreamInvoker { channel, options }
    }

    /// Creates the underlying stream.
    pub async fn invoke(
        self,
        ctx: Context,
        desc: StreamDesc,
        method: &str,
    ) -> Result<ClientStream, Status> {
        new_client_stream(self.channel, ctx, desc, method, self.options).await
    }
}

/// Intercepts stream creation on a channel.
#[async_trait]
pub trait StreamInterceptor: Send + Sync {
    /// Handles one stream creation.
    async fn intercept_stream(
        &self,
        ctx: Context,
        desc: StreamDesc,
        method: String,
        next: StreamInvoker,
    ) -> Result<ClientStream, Status>;
}
