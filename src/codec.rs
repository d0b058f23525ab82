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

//! Message and codec interfaces, and the process-wide codec registry.
//!
//! Codecs are stored and looked up by the content subtype they handle
//! (lower-cased).  Registration must complete before any call begins; the
//! registry is not synchronised against concurrent registration.

use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::{Arc, LazyLock, Mutex};

use bytes::{Bytes, BytesMut};

use crate::status::Status;

/// A message that can cross the codec boundary.
///
/// Streams are type-erased at this boundary: the runtime moves
/// `&dyn Message` values, and a codec turns them into bytes and back.
pub trait Message: Send + Sync + Debug {
    /// Encodes the message into the provided buffer.
    fn encode(&self, buf: &mut BytesMut) -> Result<(), Status>;

    /// Decodes the message from the provided buffer, replacing any previous
    /// contents of `self`.
    fn decode(&mut self, buf: &Bytes) -> Result<(), Status>;

    /// Provides a hint for the expected size of the encoded message.
    ///
    /// Encoders may use this to pre-allocate buffer space.  It is a
    /// best-effort hint; `None` means no cheap estimate exists.
    fn encoded_size_hint(&self) -> Option<usize> {
        None
    }
}

/// Converts between [`Message`] values and their wire format.
///
/// Implementations must be thread safe; a codec's methods may be called
/// from concurrent tasks.
pub trait Codec: Send + Sync {
    /// Returns the wire format of `msg`.
    fn marshal(&self, msg: &dyn Message) -> Result<Bytes, Status>;

    /// Parses the wire format in `data` into `msg`.
    fn unmarshal(&self, data: &Bytes, msg: &mut dyn Message) -> Result<(), Status>;

    /// The name of the codec, used as the content subtype in transmission.
    /// Must be static across calls.
    fn name(&self) -> &str;
}

/// The default codec: messages carry their own binary wire format through
/// their [`Message`] impls, and the codec only manages buffers.
#[derive(Debug, Default)]
pub struct BinCodec;

/// Content subtype handled by [`BinCodec`].
pub const BIN_CODEC_NAME: &str = "bin";

impl Codec for BinCodec {
    fn marshal(&self, msg: &dyn Message) -> Result<Bytes, Status> {
        let mut buf = match msg.encoded_size_hint() {
            Some(hint) => BytesMut::with_capacity(hint),
            None => BytesMut::new(),
        };
        msg.encode(&mut buf)?;
        Ok(buf.freeze())
    }

    fn unmarshal(&self, data: &Bytes, msg: &mut dyn Message) -> Result<(), Status> {
        msg.decode(data)
    }

    fn name(&self) -> &str {
        BIN_CODEC_NAME
    }
}

static CODECS: LazyLock<Mutex<HashMap<String, Arc<dyn Codec>>>> = LazyLock::new(|| {
    let mut m: HashMap<String, Arc<dyn Codec>> = HashMap::new();
    m.insert(BIN_CODEC_NAME.to_string(), Arc::new(BinCodec));
    Mutex::new(m)
});

/// Registers a codec for use by all channels, keyed by the lower-cased
/// result of its `name` method.  If multiple codecs are registered with the
/// same name, the one registered last takes effect.
///
/// Must only be called during initialization, before any call begins.
///
/// # Panics
///
/// Panics if the codec reports an empty name.
pub fn register_codec(codec: Arc<dyn Codec>) {
    let name = codec.name().to_lowercase();
    if name.is_empty() {
        panic!("cannot register a codec with an empty name");
    }
    CODECS.lock().unwrap().insert(name, codec);
}

/// Returns the codec registered for the given content subtype, if any.
/// The subtype is matched case-insensitively.
pub fn get_codec(content_subtype: &str) -> Option<Arc<dyn Codec>> {
    CODECS
        .lock()
        .unwrap()
        .get(&content_subtype.to_lowercase())
        .cloned()
}
