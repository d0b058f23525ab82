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

//! Message compression and the process-wide compressor registry.
//!
//! Compressors are selected per call by name via
//! [`crate::client::use_compressor`], and on the receive side from the
//! inbound content-coding reported by the transport.  Registration must
//! complete before any call begins.

use std::collections::HashMap;
use std::io::{Read, Write};
use std::sync::{Arc, LazyLock, Mutex};

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;

use crate::status::Status;

/// The reserved coding name for uncompressed payloads.
pub const IDENTITY: &str = "identity";

/// Compresses and decompresses message payloads.
pub trait Compressor: Send + Sync {
    /// Returns the compressed form of `data`.
    fn compress(&self, data: &[u8]) -> Result<Vec<u8>, Status>;

    /// Returns the decompressed form of `data`.
    fn decompress(&self, data: &[u8]) -> Result<Vec<u8>, Status>;

    /// The name of the compression codec, used to set the content-coding
    /// header.  Must be static across calls.
    fn name(&self) -> &str;
}

/// A gzip [`Compressor`] backed by flate2.
#[derive(Debug, Default)]
pub struct Gzip;

/// Coding name of the built-in gzip compressor.
pub const GZIP: &str = "gzip";

impl Compressor for Gzip {
    fn compress(&self, data: &[u8]) -> Result<Vec<u8>, Status> {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder
            .write_all(data)
            .and_then(|_| encoder.finish())
            .map_err(|err| Status::internal(format!("gzip compress: {err}")))
    }

    fn decompress(&self, data: &[u8]) -> Result<Vec<u8>, Status> {
        let mut decoder = GzDecoder::new(data);
        let mut out = Vec::new();
        decoder
            .read_to_end(&mut out)
            .map_err(|err| Status::internal(format!("gzip decompress: {err}")))?;
        Ok(out)
    }

    fn name(&self) -> &str {
        GZIP
    }
}

static COMPRESSORS: LazyLock<Mutex<HashMap<String, Arc<dyn Compressor>>>> = LazyLock::new(|| {
    let mut m: HashMap<String, Arc<dyn Compressor>> = HashMap::new();
    m.insert(GZIP.to_string(), Arc::new(Gzip));
    Mutex::new(m)
});

/// Registers a compressor by its name.  It can be activated on a call with
/// [`crate::client::use_compressor`], and is consulted automatically on
/// receive based on the inbound content-coding.
///
/// Must only be called during initialization, before any call begins.  If
/// multiple compressors are registered with the same name, the one
/// registered last takes effect.
pub fn register_compressor(compressor: Arc<dyn Compressor>) {
    COMPRESSORS
        .lock()
        .unwrap()
        .insert(compressor.name().to_string(), compressor);
}

/// Returns the compressor registered under `name`, if any.
pub fn get_compressor(name: &str) -> Option<Arc<dyn Compressor>> {
    COMPRESSORS.lock().unwrap().get(name).cloned()
}
