//! The option registry and typed option values.

use alloc::{string::String, vec::Vec};
use core::ops::RangeInclusive;

use crate::error::MessageError;

/// The value formats the registry assigns to options.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueFormat {
    Empty,
    Opaque,
    String,
    Uint,
}

/// The registered options, a closed enumeration keyed by option number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum OptionKind {
    IfMatch,
    UriHost,
    ETag,
    IfNoneMatch,
    Observe,
    UriPort,
    LocationPath,
    UriPath,
    ContentFormat,
    MaxAge,
    UriQuery,
    Accept,
    LocationQuery,
    ProxyUri,
    ProxyScheme,
    Size1,
}

impl OptionKind {
    /// Looks an option number up in the registry.
    pub fn from_number(number: u16) -> Option<OptionKind> {
        match number {
            1 => Some(OptionKind::IfMatch),
            3 => Some(OptionKind::UriHost),
            4 => Some(OptionKind::ETag),
            5 => Some(OptionKind::IfNoneMatch),
            6 => Some(OptionKind::Observe),
            7 => Some(OptionKind::UriPort),
            8 => Some(OptionKind::LocationPath),
            11 => Some(OptionKind::UriPath),
            12 => Some(OptionKind::ContentFormat),
            14 => Some(OptionKind::MaxAge),
            15 => Some(OptionKind::UriQuery),
            17 => Some(OptionKind::Accept),
            20 => Some(OptionKind::LocationQuery),
            35 => Some(OptionKind::ProxyUri),
            39 => Some(OptionKind::ProxyScheme),
            60 => Some(OptionKind::Size1),
            _ => None,
        }
    }

    /// The option number.
    pub fn number(self) -> u16 {
        match self {
            OptionKind::IfMatch => 1,
            OptionKind::UriHost => 3,
            OptionKind::ETag => 4,
            OptionKind::IfNoneMatch => 5,
            OptionKind::Observe => 6,
            OptionKind::UriPort => 7,
            OptionKind::LocationPath => 8,
            OptionKind::UriPath => 11,
            OptionKind::ContentFormat => 12,
            OptionKind::MaxAge => 14,
            OptionKind::UriQuery => 15,
            OptionKind::Accept => 17,
            OptionKind::LocationQuery => 20,
            OptionKind::ProxyUri => 35,
            OptionKind::ProxyScheme => 39,
            OptionKind::Size1 => 60,
        }
    }

    /// The value format the registry prescribes.
    pub fn value_format(self) -> ValueFormat {
        match self {
            OptionKind::IfMatch | OptionKind::ETag => ValueFormat::Opaque,
            OptionKind::IfNoneMatch => ValueFormat::Empty,
            OptionKind::Observe
            | OptionKind::UriPort
            | OptionKind::ContentFormat
            | OptionKind::MaxAge
            | OptionKind::Accept
            | OptionKind::Size1 => ValueFormat::Uint,
            OptionKind::UriHost
            | OptionKind::LocationPath
            | OptionKind::UriPath
            | OptionKind::UriQuery
            | OptionKind::LocationQuery
            | OptionKind::ProxyUri
            | OptionKind::ProxyScheme => ValueFormat::String,
        }
    }

    /// Whether the option may occur more than once in one message.
    pub fn is_repeatable(self) -> bool {
        matches!(
            self,
            OptionKind::IfMatch
                | OptionKind::ETag
                | OptionKind::LocationPath
                | OptionKind::UriPath
                | OptionKind::UriQuery
                | OptionKind::LocationQuery
        )
    }

    /// The legal encoded value length in bytes.
    pub fn length_range(self) -> RangeInclusive<usize> {
        match self {
            OptionKind::IfMatch => 0..=8,
            OptionKind::UriHost => 1..=255,
            OptionKind::ETag => 1..=8,
            OptionKind::IfNoneMatch => 0..=0,
            OptionKind::Observe => 0..=3,
            OptionKind::UriPort => 0..=2,
            OptionKind::LocationPath => 0..=255,
            OptionKind::UriPath => 0..=255,
            OptionKind::ContentFormat => 0..=2,
            OptionKind::MaxAge => 0..=4,
            OptionKind::UriQuery => 0..=255,
            OptionKind::Accept => 0..=2,
            OptionKind::LocationQuery => 0..=255,
            OptionKind::ProxyUri => 1..=1034,
            OptionKind::ProxyScheme => 1..=255,
            OptionKind::Size1 => 0..=4,
        }
    }

    /// The default value assumed when the option is absent, if the
    /// registry defines one.
    pub fn default_uint(self) -> Option<u64> {
        match self {
            OptionKind::MaxAge => Some(60),
            _ => None,
        }
    }
}

/// A single typed option value; the registry dictates the legal variant
/// per option number.
#[derive(Debug, Clone, PartialEq)]
pub enum OptionValue {
    Empty,
    Opaque(Vec<u8>),
    String(String),
    Uint(u64),
}

impl OptionValue {
    /// The encoded length in bytes; uints take the minimum number of
    /// bytes that hold the value, zero bytes for value 0.
    pub fn len(&self) -> usize {
        match self {
            OptionValue::Empty => 0,
            OptionValue::Opaque(bytes) => bytes.len(),
            OptionValue::String(s) => s.len(),
            OptionValue::Uint(v) => uint_len(*v),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            OptionValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_uint(&self) -> Option<u64> {
        match self {
            OptionValue::Uint(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            OptionValue::Opaque(bytes) => Some(bytes),
            _ => None,
        }
    }

    /// The wire form of the value.
    pub(crate) fn to_bytes(&self) -> Vec<u8> {
        match self {
            OptionValue::Empty => Vec::new(),
            OptionValue::Opaque(bytes) => bytes.clone(),
            OptionValue::String(s) => s.as_bytes().to_vec(),
            OptionValue::Uint(v) => uint_to_bytes(*v),
        }
    }
}

fn uint_len(value: u64) -> usize {
    ((64 - value.leading_zeros() as usize) + 7) / 8
}

fn uint_to_bytes(value: u64) -> Vec<u8> {
    let mut out = Vec::with_capacity(uint_len(value));
    for i in (0..uint_len(value)).rev() {
        out.push((value >> (8 * i)) as u8);
    }
    out
}

fn uint_from_bytes(raw: &[u8]) -> u64 {
    raw.iter().fold(0, |acc, &b| acc << 8 | u64::from(b))
}

/// One option of a message: a registry entry plus its value.
#[derive(Debug, Clone, PartialEq)]
pub struct CoapOption {
    pub kind: OptionKind,
    pub value: OptionValue,
}

impl CoapOption {
    pub fn new(kind: OptionKind, value: OptionValue) -> CoapOption {
        CoapOption { kind, value }
    }

    /// A string-valued option, for the path/query/host family.
    pub fn string(kind: OptionKind, value: &str) -> CoapOption {
        CoapOption::new(kind, OptionValue::String(value.into()))
    }

    /// A uint-valued option.
    pub fn uint(kind: OptionKind, value: u64) -> CoapOption {
        CoapOption::new(kind, OptionValue::Uint(value))
    }

    /// An opaque option.
    pub fn opaque(kind: OptionKind, value: Vec<u8>) -> CoapOption {
        CoapOption::new(kind, OptionValue::Opaque(value))
    }

    /// Decodes raw value bytes against the registry entry for `kind`.
    pub(crate) fn decode_value(
        kind: OptionKind,
        raw: &[u8],
    ) -> Result<OptionValue, MessageError> {
        if !kind.length_range().contains(&raw.len()) {
            return Err(MessageError::MalformedOption);
        }

        match kind.value_format() {
            ValueFormat::Empty => Ok(OptionValue::Empty),
            ValueFormat::Opaque => Ok(OptionValue::Opaque(raw.to_vec())),
            ValueFormat::String => core::str::from_utf8(raw)
                .map(|s| OptionValue::String(s.into()))
                .map_err(|_| MessageError::MalformedOption),
            ValueFormat::Uint => Ok(OptionValue::Uint(uint_from_bytes(raw))),
        }
    }

    /// Checks the value against the registry contract before encoding.
    pub(crate) fn check_encodable(&self) -> Result<(), MessageError> {
        let format_matches = matches!(
            (self.kind.value_format(), &self.value),
            (ValueFormat::Empty, OptionValue::Empty)
                | (ValueFormat::Opaque, OptionValue::Opaque(_))
                | (ValueFormat::String, OptionValue::String(_))
                | (ValueFormat::Uint, OptionValue::Uint(_))
        );
        if !format_matches
            || !self.kind.length_range().contains(&self.value.len())
        {
            return Err(MessageError::MalformedOption);
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn registry_numbers_round_trip() {
        for number in 0..512 {
            if let Some(kind) = OptionKind::from_number(number) {
                assert_eq!(number, kind.number());
            }
        }
    }

    #[test]
    fn registry_metadata() {
        assert_eq!(ValueFormat::Uint, OptionKind::Observe.value_format());
        assert_eq!(ValueFormat::Empty, OptionKind::IfNoneMatch.value_format());
        assert!(OptionKind::UriPath.is_repeatable());
        assert!(!OptionKind::ContentFormat.is_repeatable());
        assert_eq!(Some(60), OptionKind::MaxAge.default_uint());
        assert_eq!(None, OptionKind::UriPath.default_uint());
        assert_eq!(1..=1034, OptionKind::ProxyUri.length_range());
    }

    #[test]
    fn uint_minimal_encoding() {
        assert_eq!(0, OptionValue::Uint(0).len());
        assert_eq!(1, OptionValue::Uint(1).len());
        assert_eq!(1, OptionValue::Uint(255).len());
        assert_eq!(2, OptionValue::Uint(256).len());
        assert_eq!(2, OptionValue::Uint(65535).len());
        assert_eq!(3, OptionValue::Uint(65536).len());

        assert_eq!(Vec::<u8>::new(), OptionValue::Uint(0).to_bytes());
        assert_eq!(vec![0x32], OptionValue::Uint(50).to_bytes());
        assert_eq!(vec![0x01, 0x00], OptionValue::Uint(256).to_bytes());
    }

    #[test]
    fn uint_decode() {
        assert_eq!(
            Ok(OptionValue::Uint(0)),
            CoapOption::decode_value(OptionKind::Observe, &[])
        );
        assert_eq!(
            Ok(OptionValue::Uint(0x0102)),
            CoapOption::decode_value(OptionKind::Observe, &[0x01, 0x02])
        );
    }

    #[test]
    fn decode_rejects_out_of_range_length() {
        // Observe takes at most three bytes.
        assert_eq!(
            Err(MessageError::MalformedOption),
            CoapOption::decode_value(OptionKind::Observe, &[0, 0, 0, 0])
        );
        // Uri-Host takes at least one.
        assert_eq!(
            Err(MessageError::MalformedOption),
            CoapOption::decode_value(OptionKind::UriHost, &[])
        );
    }

    #[test]
    fn decode_rejects_invalid_utf8() {
        assert_eq!(
            Err(MessageError::MalformedOption),
            CoapOption::decode_value(OptionKind::UriPath, &[0xFE, 0xFF])
        );
    }

    #[test]
    fn encode_checks_format_and_length() {
        let wrong_format = CoapOption::uint(OptionKind::UriPath, 1);
        assert_eq!(
            Err(MessageError::MalformedOption),
            wrong_format.check_encodable()
        );

        let too_long =
            CoapOption::opaque(OptionKind::ETag, vec![0; 9]);
        assert_eq!(
            Err(MessageError::MalformedOption),
            too_long.check_encodable()
        );

        let ok = CoapOption::string(OptionKind::UriPath, "ver");
        assert_eq!(Ok(()), ok.check_encodable());
    }
}
