//! In-memory representation of a CoAP message and the codec to and from
//! its wire form.

use alloc::{
    string::{String, ToString},
    vec::Vec,
};

use crate::{
    error::{MessageError, PayloadError},
    header::{Header, MessageClass},
    option::{CoapOption, OptionKind, OptionValue},
};

/// The media types of the Content-Format registry subset understood here.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaType {
    TextPlain,
    LinkFormat,
    Xml,
    OctetStream,
    Exi,
    Json,
}

impl MediaType {
    pub fn from_number(number: u64) -> Option<MediaType> {
        match number {
            0 => Some(MediaType::TextPlain),
            40 => Some(MediaType::LinkFormat),
            41 => Some(MediaType::Xml),
            42 => Some(MediaType::OctetStream),
            47 => Some(MediaType::Exi),
            50 => Some(MediaType::Json),
            _ => None,
        }
    }

    pub fn number(self) -> u16 {
        match self {
            MediaType::TextPlain => 0,
            MediaType::LinkFormat => 40,
            MediaType::Xml => 41,
            MediaType::OctetStream => 42,
            MediaType::Exi => 47,
            MediaType::Json => 50,
        }
    }
}

/// A payload presented per the message's Content-Format.
///
/// Without a Content-Format option the payload stays raw `Bytes`; formats
/// with no richer in-memory form keep their bytes behind a tag.
#[derive(Debug, Clone, PartialEq)]
pub enum PayloadValue {
    Text(String),
    Bytes(Vec<u8>),
    Json(serde_json::Value),
    LinkFormat(Vec<u8>),
    Xml(Vec<u8>),
    Exi(Vec<u8>),
}

impl PayloadValue {
    /// The media type matching the variant; raw bytes have none.
    pub fn media_type(&self) -> Option<MediaType> {
        match self {
            PayloadValue::Text(_) => Some(MediaType::TextPlain),
            PayloadValue::Bytes(_) => None,
            PayloadValue::Json(_) => Some(MediaType::Json),
            PayloadValue::LinkFormat(_) => Some(MediaType::LinkFormat),
            PayloadValue::Xml(_) => Some(MediaType::Xml),
            PayloadValue::Exi(_) => Some(MediaType::Exi),
        }
    }

    /// The wire form of the value.
    pub fn to_bytes(&self) -> Vec<u8> {
        match self {
            PayloadValue::Text(s) => s.as_bytes().to_vec(),
            PayloadValue::Bytes(bytes)
            | PayloadValue::LinkFormat(bytes)
            | PayloadValue::Xml(bytes)
            | PayloadValue::Exi(bytes) => bytes.clone(),
            // Serializing a `Value` cannot fail.
            PayloadValue::Json(value) => {
                serde_json::to_vec(value).unwrap_or_default()
            }
        }
    }
}

/// The CoAP message.
///
/// Options are kept sorted by ascending option number, stable by insertion
/// order within the same number.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Message {
    pub header: Header,
    token: Vec<u8>,
    options: Vec<CoapOption>,
    pub payload: Vec<u8>,
}

impl Message {
    /// Creates a new message.
    pub fn new() -> Message {
        Default::default()
    }

    /// Sets the token; at most eight bytes.
    pub fn set_token(&mut self, token: Vec<u8>) {
        assert!(token.len() <= 8);
        self.token = token;
    }

    /// Returns the token.
    pub fn token(&self) -> &[u8] {
        &self.token
    }

    /// Returns the options in wire order.
    pub fn options(&self) -> &[CoapOption] {
        &self.options
    }

    /// Inserts an option at the first position whose number is strictly
    /// greater, preserving the sort invariant.
    pub fn add_option(&mut self, option: CoapOption) {
        let number = option.kind.number();
        let at = self
            .options
            .iter()
            .position(|o| o.kind.number() > number)
            .unwrap_or(self.options.len());
        self.options.insert(at, option);
    }

    /// Returns the values of every option of `kind`, in order.
    pub fn options_for(
        &self,
        kind: OptionKind,
    ) -> impl Iterator<Item = &OptionValue> {
        self.options
            .iter()
            .filter(move |o| o.kind == kind)
            .map(|o| &o.value)
    }

    /// Returns the first value of `kind` as a convenience when only one is
    /// expected.
    pub fn first_option(&self, kind: OptionKind) -> Option<&OptionValue> {
        self.options_for(kind).next()
    }

    /// Removes every option of `kind`.
    pub fn clear_option(&mut self, kind: OptionKind) {
        self.options.retain(|o| o.kind != kind);
    }

    /// Replaces the Uri-Path options with the segments of `path`.
    pub fn set_path(&mut self, path: &str) {
        self.clear_option(OptionKind::UriPath);

        for (i, segment) in path.split('/').enumerate() {
            if i == 0 && segment.is_empty() {
                continue;
            }
            self.add_option(CoapOption::string(OptionKind::UriPath, segment));
        }
    }

    /// The Uri-Path options joined with `/` and prefixed by `/`, or `None`
    /// when the message carries no path.
    pub fn absolute_path(&self) -> Option<String> {
        let mut path = String::new();
        for value in self.options_for(OptionKind::UriPath) {
            path.push('/');
            path.push_str(value.as_str().unwrap_or_default());
        }
        if path.is_empty() {
            None
        } else {
            Some(path)
        }
    }

    /// The Uri-Query options joined with `&`, or `None` when absent.
    pub fn uri_query(&self) -> Option<String> {
        let parts: Vec<&str> = self
            .options_for(OptionKind::UriQuery)
            .filter_map(|value| value.as_str())
            .collect();
        if parts.is_empty() {
            None
        } else {
            Some(parts.join("&"))
        }
    }

    /// Sets the Content-Format option.
    pub fn set_content_format(&mut self, format: MediaType) {
        self.clear_option(OptionKind::ContentFormat);
        self.add_option(CoapOption::uint(
            OptionKind::ContentFormat,
            u64::from(format.number()),
        ));
    }

    /// The Content-Format, when present and registered.
    pub fn content_format(&self) -> Option<MediaType> {
        self.first_option(OptionKind::ContentFormat)
            .and_then(|value| value.as_uint())
            .and_then(MediaType::from_number)
    }

    /// Sets the Observe option.
    pub fn set_observe(&mut self, value: u64) {
        self.clear_option(OptionKind::Observe);
        self.add_option(CoapOption::uint(OptionKind::Observe, value));
    }

    /// The Observe option value, when present.
    pub fn observe(&self) -> Option<u64> {
        self.first_option(OptionKind::Observe)
            .and_then(|value| value.as_uint())
    }

    /// The payload as UTF-8 text, when it is.
    pub fn payload_str(&self) -> Option<&str> {
        core::str::from_utf8(&self.payload).ok()
    }

    /// Presents the payload per the Content-Format option: text for
    /// text/plain, a parsed value for JSON, raw bytes otherwise. Without a
    /// Content-Format the raw bytes are returned.
    pub fn typed_payload(&self) -> Result<PayloadValue, PayloadError> {
        let format = match self.first_option(OptionKind::ContentFormat) {
            Some(value) => {
                let number = value.as_uint().ok_or_else(|| {
                    PayloadError::Malformed(
                        "content-format is not a uint".into(),
                    )
                })?;
                Some(
                    MediaType::from_number(number)
                        .ok_or(PayloadError::UnsupportedFormat(number))?,
                )
            }
            None => None,
        };

        match format {
            None | Some(MediaType::OctetStream) => {
                Ok(PayloadValue::Bytes(self.payload.clone()))
            }
            Some(MediaType::TextPlain) => {
                String::from_utf8(self.payload.clone())
                    .map(PayloadValue::Text)
                    .map_err(|e| PayloadError::Malformed(e.to_string()))
            }
            Some(MediaType::Json) => serde_json::from_slice(&self.payload)
                .map(PayloadValue::Json)
                .map_err(|e| PayloadError::Malformed(e.to_string())),
            Some(MediaType::LinkFormat) => {
                Ok(PayloadValue::LinkFormat(self.payload.clone()))
            }
            Some(MediaType::Xml) => Ok(PayloadValue::Xml(self.payload.clone())),
            Some(MediaType::Exi) => Ok(PayloadValue::Exi(self.payload.clone())),
        }
    }

    /// Decodes a datagram and constructs the equivalent message.
    pub fn from_bytes(buf: &[u8]) -> Result<Message, MessageError> {
        let (header, token_length) = Header::decode(buf)?;

        let mut idx = 4 + token_length as usize;
        if idx > buf.len() {
            return Err(MessageError::MalformedHeader);
        }
        let token = buf[4..idx].to_vec();

        let mut options: Vec<CoapOption> = Vec::new();
        let mut number: u32 = 0;
        let mut payload = Vec::new();

        while idx < buf.len() {
            let byte = buf[idx];
            idx += 1;

            if byte == 0xFF {
                if idx >= buf.len() {
                    return Err(MessageError::MalformedPayload);
                }
                payload = buf[idx..].to_vec();
                break;
            }

            let delta = decode_extended(byte >> 4, buf, &mut idx)?;
            let length =
                decode_extended(byte & 0x0F, buf, &mut idx)? as usize;

            number += delta;
            if number > u32::from(u16::MAX) {
                return Err(MessageError::MalformedOption);
            }

            let end = idx + length;
            if end > buf.len() {
                return Err(MessageError::MalformedOption);
            }
            let raw = &buf[idx..end];
            idx = end;

            match OptionKind::from_number(number as u16) {
                Some(kind) => options.push(CoapOption::new(
                    kind,
                    CoapOption::decode_value(kind, raw)?,
                )),
                None if number % 2 == 1 => {
                    return Err(MessageError::BadOption(number as u16));
                }
                None => {
                    coap_debug!("skipping elective option {}", number);
                }
            }
        }

        Ok(Message {
            header,
            token,
            options,
            payload,
        })
    }

    /// Returns the wire form of the message.
    pub fn to_bytes(&self) -> Result<Vec<u8>, MessageError> {
        let mut buf = Vec::with_capacity(
            4 + self.token.len() + self.payload.len() + 8 * self.options.len(),
        );
        self.header.encode_into(self.token.len() as u8, &mut buf);
        buf.extend_from_slice(&self.token);

        let mut last_number: u16 = 0;
        for option in &self.options {
            option.check_encodable()?;
            let value = option.value.to_bytes();
            let delta = option.kind.number() - last_number;
            push_option_header(u32::from(delta), value.len() as u32, &mut buf);
            buf.extend_from_slice(&value);
            last_number = option.kind.number();
        }

        if !self.payload.is_empty() && self.header.code != MessageClass::Empty
        {
            buf.push(0xFF);
            buf.extend_from_slice(&self.payload);
        }

        Ok(buf)
    }

    /// Recovers as much of the header and token as possible from an
    /// undecodable datagram, for an error reply.
    pub(crate) fn peek_header(buf: &[u8]) -> (Option<Header>, Vec<u8>) {
        match Header::decode(buf) {
            Ok((header, token_length)) => {
                let end = 4 + token_length as usize;
                if end <= buf.len() {
                    (Some(header), buf[4..end].to_vec())
                } else {
                    (None, Vec::new())
                }
            }
            Err(_) => (None, Vec::new()),
        }
    }
}

fn decode_extended(
    nibble: u8,
    buf: &[u8],
    idx: &mut usize,
) -> Result<u32, MessageError> {
    match nibble {
        13 => {
            let byte =
                *buf.get(*idx).ok_or(MessageError::MalformedOption)?;
            *idx += 1;
            Ok(u32::from(byte) + 13)
        }
        14 => {
            if *idx + 2 > buf.len() {
                return Err(MessageError::MalformedOption);
            }
            let value = u16::from_be_bytes([buf[*idx], buf[*idx + 1]]);
            *idx += 2;
            Ok(u32::from(value) + 269)
        }
        15 => Err(MessageError::MalformedOption),
        n => Ok(u32::from(n)),
    }
}

enum Extension {
    None,
    One(u8),
    Two([u8; 2]),
}

fn extension_parts(value: u32) -> (u8, Extension) {
    if value <= 12 {
        (value as u8, Extension::None)
    } else if value < 269 {
        (13, Extension::One((value - 13) as u8))
    } else {
        (14, Extension::Two(((value - 269) as u16).to_be_bytes()))
    }
}

fn push_option_header(delta: u32, length: u32, buf: &mut Vec<u8>) {
    let (delta_nibble, delta_ext) = extension_parts(delta);
    let (length_nibble, length_ext) = extension_parts(length);
    buf.push(delta_nibble << 4 | length_nibble);
    for ext in [delta_ext, length_ext] {
        match ext {
            Extension::None => {}
            Extension::One(byte) => buf.push(byte),
            Extension::Two(bytes) => buf.extend_from_slice(&bytes),
        }
    }
}

/// Sequential source of message IDs: started at a random point as RFC 7252
/// §4.4 recommends, incremented mod 2^16 and never yielding zero.
#[derive(Debug, Clone)]
pub struct MessageIdGenerator {
    next: u16,
}

impl MessageIdGenerator {
    #[cfg(feature = "std")]
    pub fn new() -> MessageIdGenerator {
        Self::seeded(rand::random())
    }

    /// Starts the sequence at a fixed point.
    pub fn seeded(start: u16) -> MessageIdGenerator {
        MessageIdGenerator { next: start }
    }

    /// Returns the next message ID and advances the sequence.
    pub fn next_id(&mut self) -> u16 {
        if self.next == 0 {
            self.next = 1;
        }
        let id = self.next;
        self.next = self.next.wrapping_add(1);
        id
    }
}

#[cfg(feature = "std")]
impl Default for MessageIdGenerator {
    fn default() -> MessageIdGenerator {
        MessageIdGenerator::new()
    }
}
