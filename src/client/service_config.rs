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

//! The service config: a JSON document delivered by the name resolver that
//! carries an optional load-balancing policy and per-method call policies.
//!
//! The document is treated as immutable and replaced wholesale on each
//! resolver update; callers read the snapshot current at call start.

use std::collections::HashMap;
use std::time::Duration;

use serde::Deserialize;
use tracing::warn;

use crate::status::Status;

/// Built-in default for the maximum receive message size (bytes).
pub const DEFAULT_MAX_RECV_MESSAGE_SIZE: usize = 4 * 1024 * 1024;
/// Built-in default for the maximum send message size (bytes).
pub const DEFAULT_MAX_SEND_MESSAGE_SIZE: usize = i32::MAX as usize;

const MAX_INT: i64 = isize::MAX as i64;

/// Per-method policy recommended by the service provider.  All fields are
/// tri-valued: absent means "no recommendation".
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MethodConfig {
    /// Whether RPCs to this method should wait for the channel to become
    /// ready rather than failing fast.  Per-call options override it.
    pub wait_for_ready: Option<bool>,
    /// Default timeout for RPCs to this method.  The effective deadline is
    /// the minimum of this and the caller's deadline.
    pub timeout: Option<Duration>,
    /// Maximum allowed request payload size in bytes, measured after
    /// per-message compression.
    pub max_request_message_bytes: Option<usize>,
    /// Maximum allowed response payload size in bytes.
    pub max_response_message_bytes: Option<usize>,
}

/// Parameters for how clients of a service should behave, keyed by method
/// path.
#[derive(Clone, Debug, Default)]
pub struct ServiceConfig {
    /// The load balancer the service recommends, if any.
    pub load_balancing_policy: Option<String>,
    /// Method path (`/service/method`, or `/service/` for the service-wide
    /// default) to configuration.
    pub methods: HashMap<String, MethodConfig>,
}

impl ServiceConfig {
    /// Looks up the configuration for a method path, preferring an exact
    /// `/service/method` entry over the `/service/` default, and returning
    /// an empty config when neither exists.
    pub fn method_config(&self, method: &str) -> MethodConfig {
        if let Some(mc) = self.methods.get(method) {
            return mc.clone();
        }
        if let Some(slash) = method.rfind('/') {
            if let Some(mc) = self.methods.get(&method[..slash + 1]) {
                return mc.clone();
            }
        }
        MethodConfig::default()
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct JsonServiceConfig {
    load_balancing_policy: Option<String>,
    method_config: Option<Vec<JsonMethodConfig>>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct JsonMethodConfig {
    name: Option<Vec<JsonName>>,
    wait_for_ready: Option<bool>,
    timeout: Option<String>,
    max_request_message_bytes: Option<i64>,
    max_response_message_bytes: Option<i64>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct JsonName {
    service: Option<String>,
    method: Option<String>,
}

impl JsonName {
    /// `/service/` when method is absent, `/service/method` otherwise;
    /// `None` discards the entry when service is missing.
    fn generate_path(&self) -> Option<String> {
        let service = self.service.as_ref()?;
        let mut path = format!("/{service}/");
        if let Some(method) = &self.method {
            path.push_str(method);
        }
        Some(path)
    }
}

/// Parses a duration of the form `123s`, `1.5s`, `.5s`: a decimal count of
/// seconds with at most nine fractional digits and a mandatory trailing
/// `s`.  At least one of the integer and fractional parts must be present.
fn parse_duration(s: &str) -> Result<Duration, Status> {
    let malformed = || Status::internal(format!("malformed duration {s:?}"));
    let body = s.strip_suffix('s').ok_or_else(malformed)?;
    let parts: Vec<&str> = body.splitn(3, '.').collect();
    if parts.len() > 2 {
        return Err(malformed());
    }
    let mut has_digits = false;
    let mut seconds: u64 = 0;
    let mut nanos: u32 = 0;
    if !parts[0].is_empty() {
        seconds = parts[0].parse::<u64>().map_err(|_| malformed())?;
        has_digits = true;
    }
    if parts.len() == 2 && !parts[1].is_empty() {
        let frac = parts[1];
        if frac.len() > 9 {
            return Err(malformed());
        }
        let mut value = frac.parse::<u32>().map_err(|_| malformed())?;
        // Right-pad to nine digits to obtain nanoseconds.
        for _ in frac.len()..9 {
            value *= 10;
        }
        nanos = value;
        has_digits = true;
    }
    if !has_digits {
        return Err(malformed());
    }
    Ok(Duration::new(seconds, nanos))
}

/// Int64 size fields exceeding the platform-maximum signed int clamp to
/// that maximum.
fn clamp_size(value: i64) -> usize {
    if value > MAX_INT {
        MAX_INT as usize
    } else if value < 0 {
        0
    } else {
        value as usize
    }
}

/// Parses a service config JSON document into its structured form.
pub fn parse_service_config(js: &str) -> Result<ServiceConfig, Status> {
    let raw: JsonServiceConfig = serde_json::from_str(js).map_err(|err| {
        warn!(error = %err, "failed to unmarshal service config");
        Status::internal(format!("service config unmarshal: {err}"))
    })?;
    let mut sc = ServiceConfig {
        load_balancing_policy: raw.load_balancing_policy,
        methods: HashMap::new(),
    };
    let Some(method_configs) = raw.method_config else {
        return Ok(sc);
    };
    for raw_mc in method_configs {
        let Some(names) = raw_mc.name else {
            continue;
        };
        let timeout = match raw_mc.timeout.as_deref() {
            Some(t) => Some(parse_duration(t).inspect_err(|err| {
                warn!(error = %err, "failed to parse service config");
            })?),
            None => None,
        };
        let mc = MethodConfig {
            wait_for_ready: raw_mc.wait_for_ready,
            timeout,
            max_request_message_bytes: raw_mc.max_request_message_bytes.map(clamp_size),
            max_response_message_bytes: raw_mc.max_response_message_bytes.map(clamp_size),
        };
        for name in &names {
            if let Some(path) = name.generate_path() {
                sc.methods.insert(path, mc.clone());
            }
        }
    }
    Ok(sc)
}

/// The effective maximum message size: `min` of the service config value
/// and the caller's, whichever of them exist, with `default_value` only
/// when both are absent.
pub(crate) fn get_max_size(
    mc_max: Option<usize>,
    opt_max: Option<usize>,
    default_value: usize,
) -> usize {
    match (mc_max, opt_max) {
        (Some(a), Some(b)) => a.min(b),
        (Some(a), None) => a,
        (None, Some(b)) => b,
        (None, None) => default_value,
    }
}
