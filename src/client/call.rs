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

//! The unary call path.

use super::channel::Channel;
use super::interceptor::UnaryInvoker;
use super::options::CallOptions;
use super::stream::{new_client_stream, StreamDesc};
use crate::codec::Message;
use crate::context::Context;
use crate::status::Status;

impl Channel {
    /// Sends a unary RPC and waits for the response, decoded into `reply`.
    ///
    /// A first attempt whose stream provably never reached the server (see
    /// `unprocessed` on the transport stream) is transparently retried
    /// once, provided the call is not fail-fast.
    pub async fn invoke(
        &self,
        ctx: &Context,
        method: &str,
        request: &dyn Message,
        reply: &mut dyn Message,
        options: CallOptions,
    ) -> Result<(), Status> {
        // The interceptor sees all applicable options: the dial defaults
        // as well as the per-call ones.
        let options = CallOptions::combine(&self.inner.options.default_call_options, &options);
        if let Some(interceptor) = self.inner.options.unary_interceptor.clone() {
            let next = UnaryInvoker::new(self.clone(), options);
            return interceptor
                .intercept_unary(ctx, method, request, reply, next)
                .await;
        }
        invoke_inner(self, ctx, method, request, reply, options).await
    }
}

pub(crate) async fn invoke_inner(
    channel: &Channel,
    ctx: &Context,
    method: &str,
    request: &dyn Message,
    reply: &mut dyn Message,
    options: CallOptions,
) -> Result<(), Status> {
    let mut first_attempt = true;
    loop {
        let stream = new_client_stream(
            channel.clone(),
            ctx.clone(),
            StreamDesc::UNARY,
            method,
            options.clone(),
        )
        .await?;

        if let Err(err) = stream.send_msg(request).await {
            if !stream.fail_fast() && stream.unprocessed() && first_attempt {
                first_attempt = false;
                continue;
            }
            return Err(err);
        }
        match stream.recv_msg(reply).await {
            Err(err) => {
                if !stream.fail_fast() && stream.unprocessed() && first_attempt {
                    first_attempt = false;
                    continue;
                }
                return Err(err);
            }
            Ok(()) => return Ok(()),
        }
    }
}
