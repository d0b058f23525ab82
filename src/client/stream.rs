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

//! The client stream: the state machine of a single call, from creation
//! through the send/recv protocol to termination and resource release.

use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use bytes::Bytes;
use tracing::trace;

use super::channel::Channel;
use super::frame::{msg_header, recv_frame};
use super::load_balancing::{DoneInfo, PickDone, PickInfo};
use super::options::{CallInfo, CallOptions};
use super::service_config::{
    get_max_size, DEFAULT_MAX_RECV_MESSAGE_SIZE, DEFAULT_MAX_SEND_MESSAGE_SIZE,
};
use super::transport::{CallHeader, TransportStream};
use crate::codec::{get_codec, Codec, Message};
use crate::compression::{get_compressor, Compressor, IDENTITY};
use crate::context::{Cancel, Context};
use crate::metadata::Metadata;
use crate::stats::RpcStats;
use crate::status::{Code, Status};

/// The shape of a streaming method.  Unary calls are both-false.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StreamDesc {
    /// The server may send more than one message.
    pub server_streams: bool,
    /// The client may send more than one message.
    pub client_streams: bool,
}

impl StreamDesc {
    /// The descriptor of a unary request/response call.
    pub const UNARY: StreamDesc = StreamDesc {
        server_streams: false,
        client_streams: false,
    };

    fn is_unary(&self) -> bool {
        !self.server_streams && !self.client_streams
    }
}

impl Channel {
    /// Creates a stream for `method`.
    ///
    /// To avoid leaking the stream's resources, callers must eventually
    /// either close the channel, cancel the provided context, drain
    /// [`ClientStream::recv_msg`] to an error, observe an error from
    /// [`ClientStream::header`] or [`ClientStream::send_msg`], or drop the
    /// stream.  Each of these paths triggers exactly one finish.
    pub async fn new_stream(
        &self,
        ctx: &Context,
        desc: StreamDesc,
        method: &str,
        options: CallOptions,
    ) -> Result<ClientStream, Status> {
        // The interceptor sees all applicable options: the dial defaults
        // as well as the per-call ones.
        let options = CallOptions::combine(&self.inner.options.default_call_options, &options);
        if let Some(interceptor) = self.inner.options.stream_interceptor.clone() {
            let next = super::interceptor::StreamInvoker::new(self.clone(), options);
            return interceptor
                .intercept_stream(ctx.clone(), desc, method.to_string(), next)
                .await;
        }
        new_client_stream(self.clone(), ctx.clone(), desc, method, options).await
    }
}

pub(crate) async fn new_client_stream(
    channel: Channel,
    ctx: Context,
    desc: StreamDesc,
    method: &str,
    options: CallOptions,
) -> Result<ClientStream, Status> {
    let mut info = CallInfo::default_call_info();
    let mc = channel.inner.get_method_config(method);
    if let Some(wait) = mc.wait_for_ready {
        info.fail_fast = !wait;
    }

    // The stream context: cancellation always, plus the method-config
    // timeout when one is set (the effective deadline is the minimum of
    // it and the caller's).
    let (ctx, cancel) = match mc.timeout {
        Some(timeout) => ctx.with_timeout(timeout),
        None => ctx.with_cancel(),
    };

    if let Err(status) = options.apply_before(&mut info) {
        cancel.cancel();
        return Err(status);
    }

    let max_send = get_max_size(
        mc.max_request_message_bytes,
        info.max_send_message_size,
        DEFAULT_MAX_SEND_MESSAGE_SIZE,
    );
    let max_recv = get_max_size(
        mc.max_response_message_bytes,
        info.max_receive_message_size,
        DEFAULT_MAX_RECV_MESSAGE_SIZE,
    );

    let codec: Arc<dyn Codec> = if info.content_subtype.is_empty() {
        channel.inner.options.default_codec.clone()
    } else {
        match get_codec(&info.content_subtype) {
            Some(codec) => codec,
            None => {
                cancel.cancel();
                return Err(Status::internal(format!(
                    "no codec registered for content-subtype {:?}",
                    info.content_subtype
                )));
            }
        }
    };

    // Send compression: the per-call selection wins and must be present in
    // the registry; otherwise the channel-level default applies.
    let mut compressor: Option<Arc<dyn Compressor>> = None;
    let mut send_compress: Option<String> = None;
    if let Some(coding) = info.compressor_type.clone() {
        send_compress = Some(coding.clone());
        if coding != IDENTITY {
            match get_compressor(&coding) {
                Some(found) => compressor = Some(found),
                None => {
                    cancel.cancel();
                    return Err(Status::internal(format!(
                        "compressor is not installed for requested encoding {coding:?}"
                    )));
                }
            }
        }
    } else if let Some(default) = channel.inner.options.default_compressor.clone() {
        send_compress = Some(default.name().to_string());
        compressor = Some(default);
    }

    let call_header = CallHeader {
        authority: channel.inner.authority.clone(),
        method: method.to_string(),
        // A non-client-streaming call already has its request at hand, so
        // the header rides with the first message.  A client-streaming
        // caller may not send for a while, so the header goes out now.
        flush_header: desc.client_streams,
        content_subtype: codec.name().to_string(),
        send_compress,
        credentials: info.credentials.clone(),
    };

    let begin_time = Instant::now();
    if let Some(handler) = &info.stats_handler {
        handler.handle(&RpcStats::Begin {
            method: method.to_string(),
            fail_fast: info.fail_fast,
            begin_time,
        });
    }

    let pick_info = PickInfo {
        method: method.to_string(),
        fail_fast: info.fail_fast,
    };
    let attempt = loop {
        // Checked at the top of every iteration so that an error loop for
        // wait-for-ready calls that never reach the wire cannot spin past
        // the deadline.
        if let Some(status) = ctx.error() {
            emit_end(&info, begin_time, Some(&status));
            cancel.cancel();
            return Err(status);
        }

        let (_subchannel, transport, done) =
            match channel.inner.pick_transport(&ctx, &pick_info).await {
                Ok(picked) => picked,
                Err(status) => {
                    emit_end(&info, begin_time, Some(&status));
                    cancel.cancel();
                    return Err(status);
                }
            };

        match transport.new_stream(&ctx, &call_header).await {
            Ok(stream) => {
                break Attempt {
                    stream: Arc::from(stream),
                    done: Mutex::new(done),
                    decomp: Mutex::new(DecompState::default()),
                };
            }
            Err(err) => {
                if let Some(done) = done {
                    done(DoneInfo {
                        error: Some(err.status().clone()),
                        bytes_sent: false,
                        bytes_received: false,
                    });
                }
                // Nothing reached the wire, so non-fail-fast calls may
                // re-pick indefinitely (bounded by the context check
                // above).
                if !info.fail_fast {
                    continue;
                }
                let status = err.status().clone();
                emit_end(&info, begin_time, Some(&status));
                cancel.cancel();
                return Err(status);
            }
        }
    };

    let peer = attempt.stream.peer();
    for sink in &info.peer_sinks {
        *sink.lock().unwrap() = Some(peer.clone());
    }

    let inner = Arc::new(StreamInner {
        desc,
        info,
        options,
        codec,
        compressor,
        configured_decompressor: channel.inner.options.default_compressor.clone(),
        ctx,
        cancel,
        max_send,
        max_recv,
        begin_time,
        sent_last: AtomicBool::new(false),
        finished: Mutex::new(false),
        attempt,
    });

    if !desc.is_unary() {
        // Watch the channel shutdown signal and the stream context so the
        // stream finishes when the user closes the channel or cancels.
        // Unary streams skip this: the transport injects the error into
        // the receive path, which surfaces it and finishes the stream.
        let weak = Arc::downgrade(&inner);
        let closed = channel.inner.closed.clone();
        let watch_ctx = inner.ctx.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = closed.cancelled() => {
                    if let Some(stream) = weak.upgrade() {
                        stream.finish(Status::cancelled("the channel is closing"));
                    }
                }
                _ = watch_ctx.done() => {
                    if let Some(stream) = weak.upgrade() {
                        let status = watch_ctx
                            .error()
                            .unwrap_or_else(|| Status::cancelled("context cancelled"));
                        stream.finish(status);
                    }
                }
            }
        });
    }

    Ok(ClientStream { inner })
}

fn emit_end(info: &CallInfo, begin_time: Instant, error: Option<&Status>) {
    if let Some(handler) = &info.stats_handler {
        handler.handle(&RpcStats::End {
            begin_time,
            end_time: Instant::now(),
            error: error.cloned(),
        });
    }
}

/// A live call.
///
/// One task may send while another receives; two concurrent sends or two
/// concurrent receives on the same stream are not supported.
pub struct ClientStream {
    inner: Arc<StreamInner>,
}

struct Attempt {
    stream: Arc<dyn TransportStream>,
    done: Mutex<Option<PickDone>>,
    decomp: Mutex<DecompState>,
}

#[derive(Default)]
struct DecompState {
    initialized: bool,
    decompressor: Option<Arc<dyn Compressor>>,
}

struct StreamInner {
    desc: StreamDesc,
    info: CallInfo,
    options: CallOptions,
    codec: Arc<dyn Codec>,
    compressor: Option<Arc<dyn Compressor>>,
    configured_decompressor: Option<Arc<dyn Compressor>>,
    ctx: Context,
    cancel: Cancel,
    max_send: usize,
    max_recv: usize,
    begin_time: Instant,
    sent_last: AtomicBool,
    finished: Mutex<bool>,
    attempt: Attempt,
}

enum SendFailure {
    /// A problem created by this client; surfaced directly and finishes
    /// the stream.
    Local(Status),
    /// A transport-level write error; the real error arrives through the
    /// receive path.
    Transport,
}

impl ClientStream {
    /// The stream's context (derived from the caller's, possibly with the
    /// method-config timeout applied).
    pub fn context(&self) -> &Context {
        &self.inner.ctx
    }

    /// The header metadata received from the server.  Blocks until the
    /// header is readable.  A failure finishes the stream.
    pub async fn header(&self) -> Result<Metadata, Status> {
        let inner = &self.inner;
        let result = tokio::select! {
            header = inner.attempt.stream.header() => {
                header.map_err(|err| err.status().clone())
            }
            _ = inner.ctx.done() => Err(inner.ctx_status()),
        };
        match result {
            Ok(metadata) => {
                for sink in &inner.info.header_sinks {
                    *sink.lock().unwrap() = Some(metadata.clone());
                }
                Ok(metadata)
            }
            Err(status) => {
                inner.finish(status.clone());
                Err(status)
            }
        }
    }

    /// The trailer metadata.  Only meaningful after the stream finished:
    /// after `recv_msg` returned an error (including end-of-stream).
    pub fn trailer(&self) -> Metadata {
        self.inner.attempt.stream.trailer()
    }

    /// Sends one message.
    ///
    /// Transport-level failures are not surfaced here: the send reports
    /// success (unary) or the end-of-stream marker (client-streaming), and
    /// the caller learns the real error from `recv_msg`.  Errors created
    /// locally (encoding failures, a message over the size limit, context
    /// expiry) finish the stream and are returned directly.
    pub async fn send_msg(&self, msg: &dyn Message) -> Result<(), Status> {
        let inner = &self.inner;
        match inner.do_send(msg).await {
            Ok(()) => Ok(()),
            Err(SendFailure::Local(status)) => {
                inner.finish(status.clone());
                Err(status)
            }
            Err(SendFailure::Transport) => {
                if inner.desc.client_streams {
                    Err(Status::eof())
                } else {
                    // The paired recv retrieves the real error; reporting
                    // success here keeps the send/recv convention of
                    // generated unary code.
                    Ok(())
                }
            }
        }
    }

    /// Receives one message into `msg`.
    ///
    /// A clean end of stream is reported as an error with [`Code::Ok`]
    /// (see [`Status::is_eof`]); a non-OK final status is returned as
    /// itself.  For non-server-streaming calls a successful receive also
    /// verifies the stream ends afterwards.
    pub async fn recv_msg(&self, msg: &mut dyn Message) -> Result<(), Status> {
        let inner = &self.inner;
        let result = tokio::select! {
            result = inner.do_recv(msg) => result,
            _ = inner.ctx.done() => Err(inner.ctx_status()),
        };
        // An error of any kind, or any receive on a non-server-streaming
        // call, means the stream is over.
        match &result {
            Ok(()) if inner.desc.server_streams => {}
            Ok(()) => inner.finish(Status::eof()),
            Err(status) => inner.finish(status.clone()),
        }
        result
    }

    /// Closes the send direction of the stream.
    pub async fn close_send(&self) {
        let inner = &self.inner;
        if inner.sent_last.swap(true, Ordering::SeqCst) {
            return;
        }
        // Errors are ignored: any error here is also surfaced by the next
        // recv_msg, which the caller is expected to drain.
        let _ = inner
            .attempt
            .stream
            .write(Bytes::new(), Bytes::new(), true)
            .await;
    }

    pub(crate) fn fail_fast(&self) -> bool {
        self.inner.info.fail_fast
    }

    /// Whether the attempt's stream failed before reaching the server.
    pub(crate) fn unprocessed(&self) -> bool {
        self.inner.attempt.stream.unprocessed()
    }
}

impl Drop for ClientStream {
    fn drop(&mut self) {
        // Guarantees release of the stream context and exactly one finish
        // on every path, including abandonment.
        self.inner.finish(Status::cancelled("stream dropped"));
    }
}

impl StreamInner {
    fn ctx_status(&self) -> Status {
        self.ctx
            .error()
            .unwrap_or_else(|| Status::cancelled("context cancelled"))
    }

    async fn do_send(&self, msg: &dyn Message) -> Result<(), SendFailure> {
        let data = self.codec.marshal(msg).map_err(SendFailure::Local)?;
        let compressed = match &self.compressor {
            Some(compressor) => Some(
                compressor
                    .compress(&data)
                    .map_err(SendFailure::Local)?,
            ),
            None => None,
        };
        let (payload, is_compressed) = match compressed {
            Some(bytes) => (Bytes::from(bytes), true),
            None => (data.clone(), false),
        };
        if payload.len() > self.max_send {
            return Err(SendFailure::Local(Status::resource_exhausted(format!(
                "trying to send message larger than max ({} vs. {})",
                payload.len(),
                self.max_send
            ))));
        }
        let hdr = msg_header(payload.len(), is_compressed);
        let last = !self.desc.client_streams;
        if last {
            self.sent_last.store(true, Ordering::SeqCst);
        }
        let wire_length = payload.len();
        let write = self.attempt.stream.write(hdr, payload, last);
        let result = tokio::select! {
            result = write => result,
            _ = self.ctx.done() => return Err(SendFailure::Local(self.ctx_status())),
        };
        match result {
            Ok(()) => {
                trace!(bytes = wire_length, last, "sent message");
                if let Some(handler) = &self.info.stats_handler {
                    handler.handle(&RpcStats::OutPayload {
                        length: data.len(),
                        wire_length,
                        sent_time: Instant::now(),
                    });
                }
                Ok(())
            }
            Err(_) => Err(SendFailure::Transport),
        }
    }

    async fn do_recv(&self, msg: &mut dyn Message) -> Result<(), Status> {
        self.init_decompression().await;

        let data = match self.recv_and_decompress().await? {
            Some(data) => data,
            None => {
                // Clean end of stream: a non-OK status is the call's
                // outcome, OK is the end-of-stream marker.
                let status = self.attempt.stream.status();
                return if status.code() == Code::Ok {
                    Err(Status::eof())
                } else {
                    Err(status)
                };
            }
        };
        let wire_length = data.len();
        self.codec.unmarshal(&data, msg)?;
        trace!(bytes = wire_length, "received message");
        if let Some(handler) = &self.info.stats_handler {
            handler.handle(&RpcStats::InPayload {
                length: data.len(),
                wire_length,
                recv_time: Instant::now(),
            });
        }
        if self.desc.server_streams {
            // Subsequent messages arrive through subsequent recv calls.
            return Ok(());
        }

        // A non-server-streaming call carries exactly one message; anything
        // beyond it is a protocol violation.
        match self.recv_and_decompress().await? {
            Some(_) => Err(Status::internal(
                "protocol violation: received a second message on a unary stream",
            )),
            None => {
                let status = self.attempt.stream.status();
                if status.code() == Code::Ok {
                    Ok(())
                } else {
                    Err(status)
                }
            }
        }
    }

    /// Chooses the receive-side decompressor from the inbound
    /// content-coding, once per stream: the configured decompressor when
    /// its name matches, else the registry.
    async fn init_decompression(&self) {
        if self.attempt.decomp.lock().unwrap().initialized {
            return;
        }
        // Blocks until headers carrying the message encoding arrive.
        let coding = self.attempt.stream.recv_compress().await;
        let mut state = self.attempt.decomp.lock().unwrap();
        if state.initialized {
            return;
        }
        state.decompressor = match coding.as_deref() {
            None | Some(IDENTITY) | Some("") => None,
            Some(coding) => match &self.configured_decompressor {
                Some(configured) if configured.name() == coding => Some(configured.clone()),
                _ => get_compressor(coding),
            },
        };
        state.initialized = true;
    }

    /// Reads one frame and undoes its compression.  `None` is a clean end
    /// of stream.
    async fn recv_and_decompress(&self) -> Result<Option<Bytes>, Status> {
        let Some(frame) = recv_frame(self.attempt.stream.as_ref(), self.max_recv).await? else {
            return Ok(None);
        };
        if !frame.compressed {
            return Ok(Some(frame.payload));
        }
        let decompressor = self
            .attempt
            .decomp
            .lock()
            .unwrap()
            .decompressor
            .clone()
            .ok_or_else(|| {
                Status::internal(
                    "message is compressed but no matching decompressor is installed",
                )
            })?;
        let data = decompressor.decompress(&frame.payload)?;
        if data.len() > self.max_recv {
            return Err(Status::resource_exhausted(format!(
                "received message larger than max ({} vs. {})",
                data.len(),
                self.max_recv
            )));
        }
        Ok(Some(Bytes::from(data)))
    }

    /// Terminates the stream: closes the protocol stream with the final
    /// error, fires the pick's `done` callback, publishes trailers, emits
    /// the stats end event, runs `after` hooks, and cancels the stream
    /// context.  Runs exactly once; the end-of-stream marker counts as
    /// success.
    fn finish(&self, status: Status) {
        {
            let mut finished = self.finished.lock().unwrap();
            if *finished {
                return;
            }
            *finished = true;
        }
        let outcome = if status.is_eof() { None } else { Some(status) };

        let stream = &self.attempt.stream;
        stream.close(outcome.as_ref().unwrap_or(&Status::ok()));

        if let Some(done) = self.attempt.done.lock().unwrap().take() {
            done(DoneInfo {
                error: outcome.clone(),
                bytes_sent: true,
                bytes_received: stream.bytes_received(),
            });
        }

        let trailer = stream.trailer();
        for sink in &self.info.trailer_sinks {
            *sink.lock().unwrap() = Some(trailer.clone());
        }

        emit_end(&self.info, self.begin_time, outcome.as_ref());
        self.options.apply_after(&self.info);
        self.cancel.cancel();
    }
}

/// A typed facade over [`ClientStream`]: the stream is parameterised by
/// its message types while the codec boundary stays type-erased.
pub struct TypedStream<Req, Resp> {
    stream: ClientStream,
    _marker: PhantomData<fn(Req) -> Resp>,
}

impl<Req, Resp> TypedStream<Req, Resp>
where
    Req: Message,
    Resp: Message + Default,
{
    /// Wraps a stream carrying `Req`/`Resp` messages.
    pub fn new(stream: ClientStream) -> Self {
        TypedStream {
            stream,
            _marker: PhantomData,
        }
    }

    /// Sends one request message.
    pub async fn send(&self, msg: &Req) -> Result<(), Status> {
        self.stream.send_msg(msg).await
    }

    /// Receives the next response message, or `None` at the end of the
    /// stream.
    pub async fn recv(&self) -> Result<Option<Resp>, Status> {
        let mut msg = Resp::default();
        match self.stream.recv_msg(&mut msg).await {
            Ok(()) => Ok(Some(msg)),
            Err(status) if status.is_eof() => Ok(None),
            Err(status) => Err(status),
        }
    }

    /// Closes the send direction.
    pub async fn close_send(&self) {
        self.stream.close_send().await;
    }

    /// The underlying dynamic stream.
    pub fn inner(&self) -> &ClientStream {
        &self.stream
    }
}
