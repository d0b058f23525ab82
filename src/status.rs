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

use std::error::Error;
use std::fmt;

/// A status describing the result of an RPC.
///
/// Every error surfaced by this crate's call paths is a `Status`.  A status
/// with [`Code::Ok`] is also used internally as the end-of-stream marker on
/// receive paths; stream termination normalises it to success.
#[derive(Clone, Debug)]
pub struct Status {
    code: Code,
    message: String,
}

/// Status codes used by [`Status`].
///
/// This is a closed set; the wire representation is the numeric value.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Code {
    Ok = 0,
    Cancelled = 1,
    Unknown = 2,
    InvalidArgument = 3,
    DeadlineExceeded = 4,
    NotFound = 5,
    AlreadyExists = 6,
    PermissionDenied = 7,
    ResourceExhausted = 8,
    FailedPrecondition = 9,
    Aborted = 10,
    OutOfRange = 11,
    Unimplemented = 12,
    Internal = 13,
    Unavailable = 14,
    DataLoss = 15,
    Unauthenticated = 16,
}

impl Code {
    /// Returns the code for the given numeric value, or `Code::Unknown` if
    /// the value is outside the closed set.
    pub fn from_i32(value: i32) -> Code {
        match value {
            0 => Code::Ok,
            1 => Code::Cancelled,
            2 => Code::Unknown,
            3 => Code::InvalidArgument,
            4 => Code::DeadlineExceeded,
            5 => Code::NotFound,
            6 => Code::AlreadyExists,
            7 => Code::PermissionDenied,
            8 => Code::ResourceExhausted,
            9 => Code::FailedPrecondition,
            10 => Code::Aborted,
            11 => Code::OutOfRange,
            12 => Code::Unimplemented,
            13 => Code::Internal,
            14 => Code::Unavailable,
            15 => Code::DataLoss,
            16 => Code::Unauthenticated,
            _ => Code::Unknown,
        }
    }
}

impl fmt::Display for Code {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

impl Status {
    /// Create a new `Status` with the given code and message.
    pub fn new(code: Code, message: impl Into<String>) -> Self {
        Status {
            code,
            message: message.into(),
        }
    }

    /// The RPC completed successfully.
    pub fn ok() -> Status {
        Status::new(Code::Ok, "")
    }

    /// The operation was cancelled, typically by the caller.
    pub fn cancelled(message: impl Into<String>) -> Status {
        Status::new(Code::Cancelled, message)
    }

    /// The deadline expired before the operation could complete.
    pub fn deadline_exceeded(message: impl Into<String>) -> Status {
        Status::new(Code::DeadlineExceeded, message)
    }

    /// The service is currently unavailable.
    pub fn unavailable(message: impl Into<String>) -> Status {
        Status::new(Code::Unavailable, message)
    }

    /// A resource (e.g. a configured message size) has been exhausted.
    pub fn resource_exhausted(message: impl Into<String>) -> Status {
        Status::new(Code::ResourceExhausted, message)
    }

    /// An invariant expected by the underlying system has been broken.
    pub fn internal(message: impl Into<String>) -> Status {
        Status::new(Code::Internal, message)
    }

    /// An unknown error, e.g. one propagated from a non-status source.
    pub fn unknown(message: impl Into<String>) -> Status {
        Status::new(Code::Unknown, message)
    }

    /// The end-of-stream marker: the receive side of a stream completed
    /// cleanly.  Plays the role other runtimes give to a sentinel EOF error.
    pub(crate) fn eof() -> Status {
        Status::new(Code::Ok, "end of stream")
    }

    /// Reports whether this status is the end-of-stream marker (or any
    /// other OK status, which terminating paths treat identically).
    pub fn is_eof(&self) -> bool {
        self.code == Code::Ok
    }

    /// Converts an arbitrary error into a `Status`, preserving an embedded
    /// `Status` when one is found in the source chain.
    pub fn from_error(err: &(dyn Error + 'static)) -> Status {
        let mut cause = Some(err);
        while let Some(err) = cause {
            if let Some(status) = err.downcast_ref::<Status>() {
                return status.clone();
            }
            cause = err.source();
        }
        Status::unknown(err.to_string())
    }

    /// Get the `Code` of this `Status`.
    pub fn code(&self) -> Code {
        self.code
    }

    /// Get the message of this `Status`.
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "status: {}, message: {:?}", self.code, self.message)
    }
}

impl Error for Status {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_new() {
        let status = Status::new(Code::Unavailable, "backend down");
        assert_eq!(status.code(), Code::Unavailable);
        assert_eq!(status.message(), "backend down");
    }

    #[test]
    fn code_from_i32_round_trips() {
        for value in 0..=16 {
            assert_eq!(Code::from_i32(value) as i32, value);
        }
        assert_eq!(Code::from_i32(42), Code::Unknown);
        assert_eq!(Code::from_i32(-1), Code::Unknown);
    }

    #[test]
    fn eof_is_ok() {
        assert!(Status::eof().is_eof());
        assert!(!Status::unavailable("nope").is_eof());
    }

    #[test]
    fn from_error_recovers_embedded_status() {
        let err: Box<dyn Error> = Box::new(Status::internal("bad framing"));
        let status = Status::from_error(err.as_ref());
        assert_eq!(status.code(), Code::Internal);

        let err: Box<dyn Error> = "plain error".to_string().into();
        let status = Status::from_error(err.as_ref());
        assert_eq!(status.code(), Code::Unknown);
    }
}
