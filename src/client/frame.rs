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

//! Message framing: each message crosses the transport as a five-byte
//! prefix (one compression flag byte, four length bytes big-endian)
//! followed by the payload.

use bytes::{BufMut, Bytes, BytesMut};

use super::transport::TransportStream;
use crate::status::Status;

pub(crate) const FRAME_HEADER_LEN: usize = 5;

/// Builds the framing header for a payload of `len` bytes.
pub(crate) fn msg_header(len: usize, compressed: bool) -> Bytes {
    let mut hdr = BytesMut::with_capacity(FRAME_HEADER_LEN);
    hdr.put_u8(u8::from(compressed));
    hdr.put_u32(len as u32);
    hdr.freeze()
}

/// One received message frame.
#[derive(Debug)]
pub(crate) struct Frame {
    pub(crate) compressed: bool,
    pub(crate) payload: Bytes,
}

/// Reads exactly `buf.len()` bytes.  Returns `Ok(false)` when the stream
/// ended cleanly before the first byte, `Ok(true)` on a full read, and an
/// error when the stream ended mid-buffer.
async fn read_full(stream: &dyn TransportStream, buf: &mut [u8]) -> Result<bool, Status> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = stream
            .read(&mut buf[filled..])
            .await
            .map_err(|err| err.status().clone())?;
        if n == 0 {
            if filled == 0 {
                return Ok(false);
            }
            return Err(Status::internal("unexpected end of stream inside a frame"));
        }
        filled += n;
    }
    Ok(true)
}

/// Reads one framed message from the stream.  Returns `None` on a clean
/// end of stream; the caller then consults the stream status.  A frame
/// whose announced length exceeds `max_receive_message_size` fails with
/// `ResourceExhausted` without reading the payload.
pub(crate) async fn recv_frame(
    stream: &dyn TransportStream,
    max_receive_message_size: usize,
) -> Result<Option<Frame>, Status> {
    let mut header = [0u8; FRAME_HEADER_LEN];
    if !read_full(stream, &mut header).await? {
        return Ok(None);
    }
    let compressed = match header[0] {
        0 => false,
        1 => true,
        flag => {
            return Err(Status::internal(format!(
                "received frame with invalid compression flag {flag}"
            )))
        }
    };
    let length = u32::from_be_bytes([header[1], header[2], header[3], header[4]]) as usize;
    if length > max_receive_message_size {
        return Err(Status::resource_exhausted(format!(
            "received message larger than max ({length} vs. {max_receive_message_size})"
        )));
    }
    let mut payload = vec![0u8; length];
    if !read_full(stream, &mut payload).await? && length > 0 {
        return Err(Status::internal("unexpected end of stream inside a frame"));
    }
    Ok(Some(Frame {
        compressed,
        payload: Bytes::from(payload),
    }))
}
