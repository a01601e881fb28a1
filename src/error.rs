//! The errors surfaced while decoding, encoding and serving messages.

use alloc::string::{String, ToString};
use core::fmt;
#[cfg(feature = "std")]
use std::error;

use crate::header::ResponseType;

/// The errors that can occur when decoding or encoding a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageError {
    /// Input shorter than four bytes, unknown protocol version, token
    /// length above eight, or a truncated token.
    MalformedHeader,
    /// Missing delta/length extension bytes, truncated value bytes, or a
    /// value outside the registry contract for its option number.
    MalformedOption,
    /// A payload marker with nothing after it.
    MalformedPayload,
    /// A critical (odd-numbered) option outside the registry.
    BadOption(u16),
}

impl fmt::Display for MessageError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            MessageError::MalformedHeader => {
                write!(f, "CoAP error: malformed header")
            }
            MessageError::MalformedOption => {
                write!(f, "CoAP error: malformed option")
            }
            MessageError::MalformedPayload => {
                write!(f, "CoAP error: payload marker without payload")
            }
            MessageError::BadOption(number) => {
                write!(f, "CoAP error: unknown critical option {}", number)
            }
        }
    }
}

#[cfg(feature = "std")]
impl error::Error for MessageError {}

/// The errors that can occur when presenting a payload in typed form.
#[derive(Debug, Clone, PartialEq)]
pub enum PayloadError {
    /// Content-Format number outside the media type registry.
    UnsupportedFormat(u64),
    /// The payload does not parse per its declared media type.
    Malformed(String),
}

impl fmt::Display for PayloadError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            PayloadError::UnsupportedFormat(number) => {
                write!(f, "unsupported content-format {}", number)
            }
            PayloadError::Malformed(message) => {
                write!(f, "payload does not match content-format: {}", message)
            }
        }
    }
}

#[cfg(feature = "std")]
impl error::Error for PayloadError {}

/// A failure signaled by an application handler, carrying the response code
/// the dispatcher should put on the reply.
#[derive(Debug, Clone)]
pub struct HandlingError {
    pub code: ResponseType,
    pub message: String,
}

impl HandlingError {
    pub fn with_code<T: ToString>(code: ResponseType, e: T) -> Self {
        Self {
            code,
            message: e.to_string(),
        }
    }

    pub fn internal<T: ToString>(e: T) -> Self {
        Self::with_code(ResponseType::InternalServerError, e)
    }

    pub fn not_found() -> Self {
        Self::with_code(ResponseType::NotFound, "Not found")
    }

    pub fn bad_request<T: ToString>(e: T) -> Self {
        Self::with_code(ResponseType::BadRequest, e)
    }
}

impl fmt::Display for HandlingError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "handling error {:?}: {}", self.code, self.message)
    }
}

#[cfg(feature = "std")]
impl error::Error for HandlingError {}
