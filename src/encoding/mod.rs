//! BACnet Encoding/Decoding Module
//!
//! Tag-length-value encoding of ASHRAE 135 clause 20.
//!
//! # Overview
//!
//! - tag headers: application and context tags, extended tag numbers,
//!   extended lengths, opening/closing tags
//! - [`Reader`]: a restorable cursor that refuses to read past a tag's
//!   declared length
//! - [`Encodable`] / [`Decodable`]: values that can be written and read
//!   either application tagged or under a context tag
//! - primitive types ([`CharacterString`], [`BitString`], [`Date`], [`Time`],
//!   [`Enumerated`], ...) and the [`ApplicationValue`] / [`Element`] unions
//!   used for property values
//!
//! # Example
//!
//! ```rust
//! use bacnet_stack::encoding::{Decodable, Encodable, Reader};
//!
//! let mut buffer = Vec::new();
//! 42u32.encode_context(1, &mut buffer).unwrap();
//! assert_eq!(buffer, [0x19, 0x2A]);
//!
//! let mut reader = Reader::new(&buffer);
//! assert_eq!(u32::decode_context(1, &mut reader).unwrap(), 42);
//! assert!(reader.is_empty());
//! ```

use alloc::{string::String, vec::Vec};
use core::fmt;

mod primitives;
mod reader;
mod value;

pub use primitives::{BitString, CharacterSet, CharacterString, Date, Enumerated, Null, Time};
pub use reader::Reader;
pub use value::{
    encode_context_sequence_of, encode_sequence_of, ApplicationValue, Element, PropertyValue,
};

/// Result type for encoding operations
pub type Result<T> = core::result::Result<T, EncodingError>;

/// Errors that can occur during encoding/decoding operations
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EncodingError {
    #[error("unexpected end of data: needed {needed} bytes, {remaining} remaining")]
    UnexpectedEndOfData { needed: usize, remaining: usize },
    #[error("tag declares {length} content bytes but only {remaining} remain")]
    LengthExceedsBuffer { length: usize, remaining: usize },
    #[error("expected application tag {expected:?}, found {found}")]
    ExpectedApplicationTag { expected: ApplicationTag, found: Tag },
    #[error("expected context tag {expected}, found {}", DisplayTag(.found))]
    ExpectedContextTag { expected: u8, found: Option<Tag> },
    #[error("expected opening tag {expected}, found {}", DisplayTag(.found))]
    ExpectedOpeningTag { expected: u8, found: Option<Tag> },
    #[error("expected closing tag {expected}, found {}", DisplayTag(.found))]
    ExpectedClosingTag { expected: u8, found: Option<Tag> },
    #[error("invalid length {length} for {what}")]
    InvalidLength { what: &'static str, length: usize },
    #[error("value out of range for {0}")]
    ValueOutOfRange(&'static str),
    #[error("invalid format: {0}")]
    InvalidFormat(String),
    #[error("{remaining} bytes left after the last member")]
    TrailingData { remaining: usize },
}

struct DisplayTag<'a>(&'a Option<Tag>);

impl fmt::Display for DisplayTag<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            Some(tag) => write!(f, "{}", tag),
            None => write!(f, "end of data"),
        }
    }
}

/// BACnet application tag numbers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ApplicationTag {
    Null = 0,
    Boolean = 1,
    UnsignedInt = 2,
    SignedInt = 3,
    Real = 4,
    Double = 5,
    OctetString = 6,
    CharacterString = 7,
    BitString = 8,
    Enumerated = 9,
    Date = 10,
    Time = 11,
    ObjectIdentifier = 12,
    Reserved13 = 13,
    Reserved14 = 14,
    Reserved15 = 15,
}

impl TryFrom<u8> for ApplicationTag {
    type Error = EncodingError;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0 => Ok(ApplicationTag::Null),
            1 => Ok(ApplicationTag::Boolean),
            2 => Ok(ApplicationTag::UnsignedInt),
            3 => Ok(ApplicationTag::SignedInt),
            4 => Ok(ApplicationTag::Real),
            5 => Ok(ApplicationTag::Double),
            6 => Ok(ApplicationTag::OctetString),
            7 => Ok(ApplicationTag::CharacterString),
            8 => Ok(ApplicationTag::BitString),
            9 => Ok(ApplicationTag::Enumerated),
            10 => Ok(ApplicationTag::Date),
            11 => Ok(ApplicationTag::Time),
            12 => Ok(ApplicationTag::ObjectIdentifier),
            13 => Ok(ApplicationTag::Reserved13),
            14 => Ok(ApplicationTag::Reserved14),
            15 => Ok(ApplicationTag::Reserved15),
            _ => Err(EncodingError::ValueOutOfRange("application tag")),
        }
    }
}

/// Class bit of the initial tag octet.
pub const CONTEXT_CLASS: u8 = 0x08;
/// LVT value announcing an extended length octet.
pub const EXTENDED_LENGTH: u8 = 5;
/// LVT value of an opening tag.
pub const OPENING_LVT: u8 = 6;
/// LVT value of a closing tag.
pub const CLOSING_LVT: u8 = 7;
/// Tag number field value announcing an extended tag number octet.
pub const EXTENDED_TAG_NUMBER: u8 = 0x0F;

/// A decoded tag header.
///
/// For an application tagged boolean `length` carries the value (0 or 1) and
/// no content octets follow; see [`Tag::content_length`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Tag {
    Application { number: u8, length: usize },
    Context { number: u8, length: usize },
    Opening(u8),
    Closing(u8),
}

impl Tag {
    /// Number of content octets that follow the header.
    pub fn content_length(&self) -> usize {
        match *self {
            Tag::Application { number, .. } if number == ApplicationTag::Boolean as u8 => 0,
            Tag::Application { length, .. } | Tag::Context { length, .. } => length,
            Tag::Opening(_) | Tag::Closing(_) => 0,
        }
    }

    pub fn number(&self) -> u8 {
        match *self {
            Tag::Application { number, .. }
            | Tag::Context { number, .. }
            | Tag::Opening(number)
            | Tag::Closing(number) => number,
        }
    }

    pub fn is_context(&self, tag_number: u8) -> bool {
        matches!(*self, Tag::Context { number, .. } if number == tag_number)
    }

    pub fn is_opening(&self, tag_number: u8) -> bool {
        *self == Tag::Opening(tag_number)
    }

    pub fn is_closing(&self, tag_number: u8) -> bool {
        *self == Tag::Closing(tag_number)
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Tag::Application { number, length } => {
                write!(f, "application tag {} (length {})", number, length)
            }
            Tag::Context { number, length } => {
                write!(f, "context tag {} (length {})", number, length)
            }
            Tag::Opening(number) => write!(f, "opening tag {}", number),
            Tag::Closing(number) => write!(f, "closing tag {}", number),
        }
    }
}

fn push_tag_octets(buffer: &mut Vec<u8>, number: u8, class: u8, lvt: u8) {
    if number < EXTENDED_TAG_NUMBER {
        buffer.push((number << 4) | class | lvt);
    } else {
        buffer.push((EXTENDED_TAG_NUMBER << 4) | class | lvt);
        buffer.push(number);
    }
}

fn encode_tag(buffer: &mut Vec<u8>, number: u8, class: u8, length: usize) -> Result<()> {
    if length < EXTENDED_LENGTH as usize {
        push_tag_octets(buffer, number, class, length as u8);
        return Ok(());
    }

    push_tag_octets(buffer, number, class, EXTENDED_LENGTH);
    if length <= 253 {
        buffer.push(length as u8);
    } else if length <= u16::MAX as usize {
        buffer.push(254);
        buffer.extend_from_slice(&(length as u16).to_be_bytes());
    } else {
        let length =
            u32::try_from(length).map_err(|_| EncodingError::ValueOutOfRange("tag length"))?;
        buffer.push(255);
        buffer.extend_from_slice(&length.to_be_bytes());
    }
    Ok(())
}

/// Encode an application tag header for `length` content octets.
pub fn encode_application_tag(
    buffer: &mut Vec<u8>,
    tag: ApplicationTag,
    length: usize,
) -> Result<()> {
    encode_tag(buffer, tag as u8, 0, length)
}

/// Encode a context tag header for `length` content octets.
pub fn encode_context_tag(buffer: &mut Vec<u8>, tag_number: u8, length: usize) -> Result<()> {
    encode_tag(buffer, tag_number, CONTEXT_CLASS, length)
}

pub fn encode_opening_tag(buffer: &mut Vec<u8>, tag_number: u8) {
    push_tag_octets(buffer, tag_number, CONTEXT_CLASS, OPENING_LVT);
}

pub fn encode_closing_tag(buffer: &mut Vec<u8>, tag_number: u8) {
    push_tag_octets(buffer, tag_number, CONTEXT_CLASS, CLOSING_LVT);
}

/// Decode a tag header, returning the tag and the number of header octets.
///
/// The declared content length is not checked against `data`; [`Reader`]
/// does that before handing out content.
pub fn decode_tag(data: &[u8]) -> Result<(Tag, usize)> {
    let need = |needed: usize| EncodingError::UnexpectedEndOfData {
        needed,
        remaining: data.len(),
    };

    let first = *data.first().ok_or_else(|| need(1))?;
    let mut consumed = 1;

    let mut number = first >> 4;
    if number == EXTENDED_TAG_NUMBER {
        number = *data.get(1).ok_or_else(|| need(2))?;
        consumed += 1;
    }

    let context = first & CONTEXT_CLASS != 0;
    let lvt = first & 0x07;

    if context {
        match lvt {
            OPENING_LVT => return Ok((Tag::Opening(number), consumed)),
            CLOSING_LVT => return Ok((Tag::Closing(number), consumed)),
            _ => {}
        }
    } else if number == ApplicationTag::Boolean as u8 {
        if lvt > 1 {
            return Err(EncodingError::InvalidLength {
                what: "application boolean",
                length: lvt as usize,
            });
        }
        return Ok((
            Tag::Application {
                number,
                length: lvt as usize,
            },
            consumed,
        ));
    }

    let length = match lvt {
        0..=4 => lvt as usize,
        EXTENDED_LENGTH => {
            let ext = *data.get(consumed).ok_or_else(|| need(consumed + 1))?;
            consumed += 1;
            match ext {
                0..=253 => ext as usize,
                254 => {
                    let bytes = data.get(consumed..consumed + 2).ok_or_else(|| need(consumed + 2))?;
                    consumed += 2;
                    u16::from_be_bytes([bytes[0], bytes[1]]) as usize
                }
                255 => {
                    let bytes = data.get(consumed..consumed + 4).ok_or_else(|| need(consumed + 4))?;
                    consumed += 4;
                    u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as usize
                }
            }
        }
        _ => {
            return Err(EncodingError::InvalidFormat(alloc::format!(
                "application tag {} with LVT {}",
                number, lvt
            )))
        }
    };

    let tag = if context {
        Tag::Context { number, length }
    } else {
        Tag::Application { number, length }
    };
    Ok((tag, consumed))
}

/// Append `value` in the minimal number of big-endian octets (at least one).
pub fn encode_unsigned_content(buffer: &mut Vec<u8>, value: u64) {
    let bytes = value.to_be_bytes();
    let skip = (value.leading_zeros() as usize / 8).min(7);
    buffer.extend_from_slice(&bytes[skip..]);
}

/// Decode an unsigned integer of 1 to `max_width` octets.
pub fn decode_unsigned_content(content: &[u8], max_width: usize) -> Result<u64> {
    if content.is_empty() || content.len() > max_width {
        return Err(EncodingError::InvalidLength {
            what: "unsigned",
            length: content.len(),
        });
    }
    Ok(content.iter().fold(0u64, |acc, &b| (acc << 8) | b as u64))
}

/// Append `value` in the minimal number of two's complement octets.
pub fn encode_signed_content(buffer: &mut Vec<u8>, value: i64) {
    let bytes = value.to_be_bytes();
    let mut skip = 0;
    while skip < 7 {
        let redundant = (bytes[skip] == 0x00 && bytes[skip + 1] & 0x80 == 0)
            || (bytes[skip] == 0xFF && bytes[skip + 1] & 0x80 != 0);
        if !redundant {
            break;
        }
        skip += 1;
    }
    buffer.extend_from_slice(&bytes[skip..]);
}

/// Decode a sign-extended integer of 1 to `max_width` octets.
pub fn decode_signed_content(content: &[u8], max_width: usize) -> Result<i64> {
    if content.is_empty() || content.len() > max_width {
        return Err(EncodingError::InvalidLength {
            what: "signed",
            length: content.len(),
        });
    }
    let init: i64 = if content[0] & 0x80 != 0 { -1 } else { 0 };
    Ok(content.iter().fold(init, |acc, &b| (acc << 8) | b as i64))
}

/// A primitive value with a fixed application tag.
///
/// Implementors describe only their content octets; [`impl_codec!`] derives
/// the tagged [`Encodable`] / [`Decodable`] forms.
pub trait Primitive: Sized {
    const TAG: ApplicationTag;

    fn encode_content(&self, buffer: &mut Vec<u8>) -> Result<()>;

    fn decode_content(content: &[u8]) -> Result<Self>;
}

/// A value that can write itself as tagged octets.
pub trait Encodable {
    /// Encode with application tags (primitives) or as the bare member list
    /// (constructed values).
    fn encode(&self, buffer: &mut Vec<u8>) -> Result<()>;

    /// Encode under context tag `tag_number`. Constructed values are wrapped
    /// in opening/closing tags.
    fn encode_context(&self, tag_number: u8, buffer: &mut Vec<u8>) -> Result<()> {
        encode_opening_tag(buffer, tag_number);
        self.encode(buffer)?;
        encode_closing_tag(buffer, tag_number);
        Ok(())
    }
}

/// A value that can rebuild itself from tagged octets.
pub trait Decodable: Sized {
    fn decode(reader: &mut Reader<'_>) -> Result<Self>;

    fn decode_context(tag_number: u8, reader: &mut Reader<'_>) -> Result<Self> {
        reader.expect_opening(tag_number)?;
        let value = Self::decode(reader)?;
        reader.expect_closing(tag_number)?;
        Ok(value)
    }
}

/// Decode a complete buffer as one `T`. Leftover octets are an error.
pub fn decode_all<T: Decodable>(data: &[u8]) -> Result<T> {
    let mut reader = Reader::new(data);
    let value = T::decode(&mut reader)?;
    reader.finish()?;
    Ok(value)
}

/// Derive [`Encodable`] and [`Decodable`] for [`Primitive`] types.
macro_rules! impl_codec {
    ($($ty:ty),+ $(,)?) => {$(
        impl $crate::encoding::Encodable for $ty {
            fn encode(&self, buffer: &mut alloc::vec::Vec<u8>) -> $crate::encoding::Result<()> {
                let mut content = alloc::vec::Vec::new();
                $crate::encoding::Primitive::encode_content(self, &mut content)?;
                $crate::encoding::encode_application_tag(
                    buffer,
                    <$ty as $crate::encoding::Primitive>::TAG,
                    content.len(),
                )?;
                buffer.extend_from_slice(&content);
                Ok(())
            }

            fn encode_context(
                &self,
                tag_number: u8,
                buffer: &mut alloc::vec::Vec<u8>,
            ) -> $crate::encoding::Result<()> {
                let mut content = alloc::vec::Vec::new();
                $crate::encoding::Primitive::encode_content(self, &mut content)?;
                $crate::encoding::encode_context_tag(buffer, tag_number, content.len())?;
                buffer.extend_from_slice(&content);
                Ok(())
            }
        }

        impl $crate::encoding::Decodable for $ty {
            fn decode(reader: &mut $crate::encoding::Reader<'_>) -> $crate::encoding::Result<Self> {
                let content = reader.read_application(<$ty as $crate::encoding::Primitive>::TAG)?;
                <$ty as $crate::encoding::Primitive>::decode_content(content)
            }

            fn decode_context(
                tag_number: u8,
                reader: &mut $crate::encoding::Reader<'_>,
            ) -> $crate::encoding::Result<Self> {
                let content = reader.read_context(tag_number)?;
                <$ty as $crate::encoding::Primitive>::decode_content(content)
            }
        }
    )+};
}
pub(crate) use impl_codec;

/// Make a [`generate_custom_enum!`](crate::generate_custom_enum) type an
/// enumerated primitive. Unknown integers decode to its `Custom`/`Reserved`
/// variants instead of failing; integers wider than the unit saturate.
macro_rules! impl_enumerated {
    ($($ty:ty => $unit:ty),+ $(,)?) => {$(
        impl $crate::encoding::Primitive for $ty {
            const TAG: $crate::encoding::ApplicationTag =
                $crate::encoding::ApplicationTag::Enumerated;

            fn encode_content(
                &self,
                buffer: &mut alloc::vec::Vec<u8>,
            ) -> $crate::encoding::Result<()> {
                $crate::encoding::encode_unsigned_content(buffer, u64::from(<$unit>::from(*self)));
                Ok(())
            }

            fn decode_content(content: &[u8]) -> $crate::encoding::Result<Self> {
                let raw = $crate::encoding::decode_unsigned_content(content, 4)?;
                Ok(<$ty>::from(<$unit>::try_from(raw).unwrap_or(<$unit>::MAX)))
            }
        }

        $crate::encoding::impl_codec!($ty);
    )+};
}
pub(crate) use impl_enumerated;
