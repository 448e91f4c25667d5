//! Primitive application data types (clause 20.2).

use alloc::{borrow::Cow, string::String, vec::Vec};
use core::fmt;

use chrono::{Datelike, NaiveDate, NaiveTime, Timelike};

use super::{
    decode_signed_content, decode_unsigned_content, encode_application_tag, encode_context_tag,
    encode_signed_content, encode_unsigned_content, impl_codec, ApplicationTag,
    Decodable, Encodable, EncodingError, Primitive, Reader, Result, Tag,
};
use crate::generate_custom_enum;
use crate::object::ObjectIdentifier;

/// The NULL value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Null;

impl Primitive for Null {
    const TAG: ApplicationTag = ApplicationTag::Null;

    fn encode_content(&self, _buffer: &mut Vec<u8>) -> Result<()> {
        Ok(())
    }

    fn decode_content(content: &[u8]) -> Result<Self> {
        if !content.is_empty() {
            return Err(EncodingError::InvalidLength {
                what: "null",
                length: content.len(),
            });
        }
        Ok(Null)
    }
}

// Application booleans live in the LVT field, context booleans use one octet.
impl Encodable for bool {
    fn encode(&self, buffer: &mut Vec<u8>) -> Result<()> {
        encode_application_tag(buffer, ApplicationTag::Boolean, *self as usize)
    }

    fn encode_context(&self, tag_number: u8, buffer: &mut Vec<u8>) -> Result<()> {
        encode_context_tag(buffer, tag_number, 1)?;
        buffer.push(*self as u8);
        Ok(())
    }
}

impl Decodable for bool {
    fn decode(reader: &mut Reader<'_>) -> Result<Self> {
        let start = reader.position();
        match reader.read_tag()? {
            Tag::Application { number, length } if number == ApplicationTag::Boolean as u8 => {
                Ok(length == 1)
            }
            found => {
                reader.restore(start);
                Err(EncodingError::ExpectedApplicationTag {
                    expected: ApplicationTag::Boolean,
                    found,
                })
            }
        }
    }

    fn decode_context(tag_number: u8, reader: &mut Reader<'_>) -> Result<Self> {
        match reader.read_context(tag_number)? {
            [value] => Ok(*value != 0),
            content => Err(EncodingError::InvalidLength {
                what: "boolean",
                length: content.len(),
            }),
        }
    }
}

macro_rules! impl_unsigned {
    ($($ty:ty => $width:expr),+) => {$(
        impl Primitive for $ty {
            const TAG: ApplicationTag = ApplicationTag::UnsignedInt;

            fn encode_content(&self, buffer: &mut Vec<u8>) -> Result<()> {
                encode_unsigned_content(buffer, *self as u64);
                Ok(())
            }

            fn decode_content(content: &[u8]) -> Result<Self> {
                let value = decode_unsigned_content(content, $width)?;
                <$ty>::try_from(value).map_err(|_| EncodingError::ValueOutOfRange(stringify!($ty)))
            }
        }
    )+};
}

macro_rules! impl_signed {
    ($($ty:ty => $width:expr),+) => {$(
        impl Primitive for $ty {
            const TAG: ApplicationTag = ApplicationTag::SignedInt;

            fn encode_content(&self, buffer: &mut Vec<u8>) -> Result<()> {
                encode_signed_content(buffer, *self as i64);
                Ok(())
            }

            fn decode_content(content: &[u8]) -> Result<Self> {
                let value = decode_signed_content(content, $width)?;
                <$ty>::try_from(value).map_err(|_| EncodingError::ValueOutOfRange(stringify!($ty)))
            }
        }
    )+};
}

impl_unsigned!(u8 => 4, u16 => 4, u32 => 4, u64 => 8);
impl_signed!(i32 => 4, i64 => 8);

fn fixed<const N: usize>(content: &[u8], what: &'static str) -> Result<[u8; N]> {
    content.try_into().map_err(|_| EncodingError::InvalidLength {
        what,
        length: content.len(),
    })
}

impl Primitive for f32 {
    const TAG: ApplicationTag = ApplicationTag::Real;

    fn encode_content(&self, buffer: &mut Vec<u8>) -> Result<()> {
        buffer.extend_from_slice(&self.to_be_bytes());
        Ok(())
    }

    fn decode_content(content: &[u8]) -> Result<Self> {
        Ok(f32::from_be_bytes(fixed(content, "real")?))
    }
}

impl Primitive for f64 {
    const TAG: ApplicationTag = ApplicationTag::Double;

    fn encode_content(&self, buffer: &mut Vec<u8>) -> Result<()> {
        buffer.extend_from_slice(&self.to_be_bytes());
        Ok(())
    }

    fn decode_content(content: &[u8]) -> Result<Self> {
        Ok(f64::from_be_bytes(fixed(content, "double")?))
    }
}

/// Octet strings are plain byte vectors.
impl Primitive for Vec<u8> {
    const TAG: ApplicationTag = ApplicationTag::OctetString;

    fn encode_content(&self, buffer: &mut Vec<u8>) -> Result<()> {
        buffer.extend_from_slice(self);
        Ok(())
    }

    fn decode_content(content: &[u8]) -> Result<Self> {
        Ok(content.to_vec())
    }
}

generate_custom_enum!(
    /// Character set marker, the first content octet of a character string.
    CharacterSet {
        Utf8 = 0,
        IbmDbcs = 1,
        JisX0208 = 2,
        Ucs4 = 3,
        Ucs2 = 4,
        Iso88591 = 5,
    },
    u8,
    0..0
);

/// A character string together with its character set.
///
/// The octets are kept as received so that strings in sets this crate
/// cannot transcode still round-trip unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CharacterString {
    pub charset: CharacterSet,
    /// Code page following the marker of an IBM/Microsoft DBCS string.
    pub code_page: Option<u16>,
    pub bytes: Vec<u8>,
}

impl CharacterString {
    /// A UTF-8 string.
    pub fn new(text: &str) -> Self {
        Self {
            charset: CharacterSet::Utf8,
            code_page: None,
            bytes: text.as_bytes().to_vec(),
        }
    }

    /// Transcode `text` into `charset`.
    ///
    /// JIS X 0208 strings are produced in their Shift_JIS form. DBCS and
    /// unknown sets cannot be produced from text.
    pub fn with_charset(charset: CharacterSet, text: &str) -> Result<Self> {
        let bytes = match charset {
            CharacterSet::Utf8 => text.as_bytes().to_vec(),
            CharacterSet::Ucs2 => {
                let mut bytes = Vec::with_capacity(text.len() * 2);
                for c in text.chars() {
                    let unit = u16::try_from(c as u32)
                        .map_err(|_| EncodingError::ValueOutOfRange("UCS-2 character"))?;
                    bytes.extend_from_slice(&unit.to_be_bytes());
                }
                bytes
            }
            CharacterSet::Ucs4 => text
                .chars()
                .flat_map(|c| (c as u32).to_be_bytes())
                .collect(),
            CharacterSet::Iso88591 => text
                .chars()
                .map(|c| u8::try_from(c as u32))
                .collect::<core::result::Result<Vec<u8>, _>>()
                .map_err(|_| EncodingError::ValueOutOfRange("ISO 8859-1 character"))?,
            CharacterSet::JisX0208 => {
                let (bytes, _, had_errors) = encoding_rs::SHIFT_JIS.encode(text);
                if had_errors {
                    return Err(EncodingError::ValueOutOfRange("JIS X 0208 character"));
                }
                bytes.into_owned()
            }
            other => {
                return Err(EncodingError::InvalidFormat(alloc::format!(
                    "cannot encode text as {}",
                    other
                )))
            }
        };
        Ok(Self {
            charset,
            code_page: None,
            bytes,
        })
    }

    /// The text when the string is UTF-8.
    pub fn as_str(&self) -> Option<&str> {
        match self.charset {
            CharacterSet::Utf8 => core::str::from_utf8(&self.bytes).ok(),
            _ => None,
        }
    }

    /// Transcode to Rust text.
    pub fn decode_text(&self) -> Result<Cow<'_, str>> {
        let invalid = || {
            EncodingError::InvalidFormat(alloc::format!("malformed {} string", self.charset))
        };
        match self.charset {
            CharacterSet::Utf8 => core::str::from_utf8(&self.bytes)
                .map(Cow::Borrowed)
                .map_err(|_| invalid()),
            CharacterSet::Ucs2 => encoding_rs::UTF_16BE
                .decode_without_bom_handling_and_without_replacement(&self.bytes)
                .ok_or_else(invalid),
            CharacterSet::JisX0208 => encoding_rs::SHIFT_JIS
                .decode_without_bom_handling_and_without_replacement(&self.bytes)
                .ok_or_else(invalid),
            CharacterSet::Ucs4 => {
                if self.bytes.len() % 4 != 0 {
                    return Err(invalid());
                }
                self.bytes
                    .chunks_exact(4)
                    .map(|c| char::from_u32(u32::from_be_bytes([c[0], c[1], c[2], c[3]])))
                    .collect::<Option<String>>()
                    .map(Cow::Owned)
                    .ok_or_else(invalid)
            }
            CharacterSet::Iso88591 => Ok(Cow::Owned(
                self.bytes.iter().map(|&b| b as char).collect(),
            )),
            _ => Err(invalid()),
        }
    }
}

impl From<&str> for CharacterString {
    fn from(text: &str) -> Self {
        Self::new(text)
    }
}

impl fmt::Display for CharacterString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.decode_text() {
            Ok(text) => f.write_str(&text),
            Err(_) => write!(f, "<{} {}>", self.charset, hex::encode(&self.bytes)),
        }
    }
}

impl Primitive for CharacterString {
    const TAG: ApplicationTag = ApplicationTag::CharacterString;

    fn encode_content(&self, buffer: &mut Vec<u8>) -> Result<()> {
        buffer.push(self.charset.into());
        if let Some(code_page) = self.code_page {
            buffer.extend_from_slice(&code_page.to_be_bytes());
        }
        buffer.extend_from_slice(&self.bytes);
        Ok(())
    }

    fn decode_content(content: &[u8]) -> Result<Self> {
        let (&marker, rest) = content.split_first().ok_or(EncodingError::InvalidLength {
            what: "character string",
            length: 0,
        })?;
        let charset = CharacterSet::from(marker);
        let (code_page, bytes) = match (charset, rest) {
            (CharacterSet::IbmDbcs, [hi, lo, text @ ..]) => {
                (Some(u16::from_be_bytes([*hi, *lo])), text)
            }
            _ => (None, rest),
        };
        Ok(Self {
            charset,
            code_page,
            bytes: bytes.to_vec(),
        })
    }
}

/// A bit string, bit 0 first.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct BitString {
    bits: Vec<bool>,
}

impl BitString {
    pub fn new(bits: Vec<bool>) -> Self {
        Self { bits }
    }

    pub fn with_len(len: usize) -> Self {
        Self {
            bits: alloc::vec![false; len],
        }
    }

    pub fn len(&self) -> usize {
        self.bits.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bits.is_empty()
    }

    /// Bits beyond the end read as clear.
    pub fn get(&self, index: usize) -> bool {
        self.bits.get(index).copied().unwrap_or(false)
    }

    /// Setting a bit beyond the end grows the string.
    pub fn set(&mut self, index: usize, value: bool) {
        if index >= self.bits.len() {
            self.bits.resize(index + 1, false);
        }
        self.bits[index] = value;
    }

    pub fn bits(&self) -> &[bool] {
        &self.bits
    }
}

impl Primitive for BitString {
    const TAG: ApplicationTag = ApplicationTag::BitString;

    fn encode_content(&self, buffer: &mut Vec<u8>) -> Result<()> {
        let unused = (8 - self.bits.len() % 8) % 8;
        buffer.push(unused as u8);
        for chunk in self.bits.chunks(8) {
            let byte = chunk
                .iter()
                .enumerate()
                .fold(0u8, |acc, (i, &bit)| acc | ((bit as u8) << (7 - i)));
            buffer.push(byte);
        }
        Ok(())
    }

    fn decode_content(content: &[u8]) -> Result<Self> {
        let (&unused, octets) = content.split_first().ok_or(EncodingError::InvalidLength {
            what: "bit string",
            length: 0,
        })?;
        if unused > 7 || (octets.is_empty() && unused != 0) {
            return Err(EncodingError::InvalidFormat(alloc::format!(
                "bit string with {} unused bits over {} octets",
                unused,
                octets.len()
            )));
        }
        let len = octets.len() * 8 - unused as usize;
        let bits = (0..len)
            .map(|i| octets[i / 8] & (0x80 >> (i % 8)) != 0)
            .collect();
        Ok(Self { bits })
    }
}

/// A raw enumerated value for enumerations without a dedicated type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Enumerated(pub u32);

impl Primitive for Enumerated {
    const TAG: ApplicationTag = ApplicationTag::Enumerated;

    fn encode_content(&self, buffer: &mut Vec<u8>) -> Result<()> {
        encode_unsigned_content(buffer, self.0 as u64);
        Ok(())
    }

    fn decode_content(content: &[u8]) -> Result<Self> {
        Ok(Enumerated(decode_unsigned_content(content, 4)? as u32))
    }
}

/// Wildcard octet for any date or time field.
pub const UNSPECIFIED: u8 = 0xFF;

/// A BACnet date. `year` is the calendar year (1900..=2154) or
/// [`Date::UNSPECIFIED_YEAR`]; the other fields use [`UNSPECIFIED`] as
/// wildcard. Weekday runs 1 (Monday) to 7 (Sunday).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Date {
    pub year: u16,
    pub month: u8,
    pub day: u8,
    pub weekday: u8,
}

impl Date {
    pub const UNSPECIFIED_YEAR: u16 = 0xFF;

    pub fn new(year: u16, month: u8, day: u8, weekday: u8) -> Self {
        Self {
            year,
            month,
            day,
            weekday,
        }
    }

    /// Current local date.
    #[cfg(feature = "std")]
    pub fn today() -> Result<Self> {
        chrono::Local::now().date_naive().try_into()
    }
}

/// Only years 1900 through 2154 fit the one-octet year offset.
impl TryFrom<NaiveDate> for Date {
    type Error = EncodingError;

    fn try_from(date: NaiveDate) -> Result<Self> {
        let year = u16::try_from(date.year())
            .ok()
            .filter(|year| (1900..=2154).contains(year))
            .ok_or(EncodingError::ValueOutOfRange("date year"))?;
        Ok(Self {
            year,
            month: date.month() as u8,
            day: date.day() as u8,
            weekday: date.weekday().number_from_monday() as u8,
        })
    }
}

impl TryFrom<Date> for NaiveDate {
    type Error = EncodingError;

    fn try_from(date: Date) -> Result<Self> {
        NaiveDate::from_ymd_opt(date.year as i32, date.month as u32, date.day as u32)
            .filter(|_| date.year != Date::UNSPECIFIED_YEAR)
            .ok_or(EncodingError::ValueOutOfRange("calendar date"))
    }
}

impl Primitive for Date {
    const TAG: ApplicationTag = ApplicationTag::Date;

    fn encode_content(&self, buffer: &mut Vec<u8>) -> Result<()> {
        let year = if self.year == Self::UNSPECIFIED_YEAR {
            UNSPECIFIED
        } else {
            match self.year.checked_sub(1900) {
                Some(offset) if offset < UNSPECIFIED as u16 => offset as u8,
                _ => return Err(EncodingError::ValueOutOfRange("date year")),
            }
        };
        buffer.extend_from_slice(&[year, self.month, self.day, self.weekday]);
        Ok(())
    }

    fn decode_content(content: &[u8]) -> Result<Self> {
        let [year, month, day, weekday] = fixed::<4>(content, "date")?;
        let year = if year == UNSPECIFIED {
            Self::UNSPECIFIED_YEAR
        } else {
            1900 + year as u16
        };
        Ok(Self::new(year, month, day, weekday))
    }
}

/// A BACnet time of day; any field may be [`UNSPECIFIED`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Time {
    pub hour: u8,
    pub minute: u8,
    pub second: u8,
    pub hundredths: u8,
}

impl Time {
    pub fn new(hour: u8, minute: u8, second: u8, hundredths: u8) -> Self {
        Self {
            hour,
            minute,
            second,
            hundredths,
        }
    }

    /// Current local time.
    #[cfg(feature = "std")]
    pub fn now() -> Self {
        chrono::Local::now().time().into()
    }
}

impl From<NaiveTime> for Time {
    fn from(time: NaiveTime) -> Self {
        Self {
            hour: time.hour() as u8,
            minute: time.minute() as u8,
            second: time.second() as u8,
            hundredths: ((time.nanosecond() % 1_000_000_000) / 10_000_000) as u8,
        }
    }
}

impl TryFrom<Time> for NaiveTime {
    type Error = EncodingError;

    fn try_from(time: Time) -> Result<Self> {
        NaiveTime::from_hms_milli_opt(
            time.hour as u32,
            time.minute as u32,
            time.second as u32,
            time.hundredths as u32 * 10,
        )
        .ok_or(EncodingError::ValueOutOfRange("time of day"))
    }
}

impl Primitive for Time {
    const TAG: ApplicationTag = ApplicationTag::Time;

    fn encode_content(&self, buffer: &mut Vec<u8>) -> Result<()> {
        buffer.extend_from_slice(&[self.hour, self.minute, self.second, self.hundredths]);
        Ok(())
    }

    fn decode_content(content: &[u8]) -> Result<Self> {
        let [hour, minute, second, hundredths] = fixed::<4>(content, "time")?;
        Ok(Self::new(hour, minute, second, hundredths))
    }
}

impl Primitive for ObjectIdentifier {
    const TAG: ApplicationTag = ApplicationTag::ObjectIdentifier;

    fn encode_content(&self, buffer: &mut Vec<u8>) -> Result<()> {
        let raw = u32::try_from(*self)?;
        buffer.extend_from_slice(&raw.to_be_bytes());
        Ok(())
    }

    fn decode_content(content: &[u8]) -> Result<Self> {
        Ok(ObjectIdentifier::from(u32::from_be_bytes(fixed(
            content,
            "object identifier",
        )?)))
    }
}

impl_codec!(
    Null,
    u8,
    u16,
    u32,
    u64,
    i32,
    i64,
    f32,
    f64,
    Vec<u8>,
    CharacterString,
    BitString,
    Enumerated,
    Date,
    Time,
    ObjectIdentifier,
);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::ObjectType;
    use alloc::vec;

    fn round_trip<T: Encodable + Decodable + PartialEq + fmt::Debug>(value: T) -> Vec<u8> {
        let mut buffer = Vec::new();
        value.encode(&mut buffer).unwrap();
        let mut reader = Reader::new(&buffer);
        assert_eq!(T::decode(&mut reader).unwrap(), value);
        assert!(reader.is_empty());

        let mut context = Vec::new();
        value.encode_context(4, &mut context).unwrap();
        let mut reader = Reader::new(&context);
        assert_eq!(T::decode_context(4, &mut reader).unwrap(), value);
        assert!(reader.is_empty());
        buffer
    }

    #[test]
    fn test_encode_decode_boolean() {
        assert_eq!(round_trip(true), vec![0x11]);
        assert_eq!(round_trip(false), vec![0x10]);

        let mut buffer = Vec::new();
        true.encode_context(0, &mut buffer).unwrap();
        assert_eq!(buffer, vec![0x09, 0x01]);
    }

    #[test]
    fn test_encode_decode_unsigned_boundaries() {
        assert_eq!(round_trip(0u32), vec![0x21, 0x00]);
        assert_eq!(round_trip(u32::MAX), vec![0x24, 0xFF, 0xFF, 0xFF, 0xFF]);
        round_trip(u8::MAX);
        round_trip(u16::MAX);
        assert_eq!(
            round_trip(u64::MAX),
            vec![0x25, 0x08, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF]
        );
    }

    #[test]
    fn test_unsigned_width_limits() {
        // five content octets do not fit a 32 bit unsigned
        let data = [0x25, 0x05, 0x01, 0x00, 0x00, 0x00, 0x00];
        assert!(u32::decode(&mut Reader::new(&data)).is_err());
        assert_eq!(
            u64::decode(&mut Reader::new(&data)).unwrap(),
            0x01_0000_0000
        );
        // non-minimal width is accepted
        assert_eq!(u32::decode(&mut Reader::new(&[0x22, 0x00, 0x05])).unwrap(), 5);
    }

    #[test]
    fn test_encode_decode_signed_boundaries() {
        for value in [0i32, -1, 127, -128, 32767, -32768, i32::MAX, i32::MIN] {
            round_trip(value);
        }
        for value in [i64::MAX, i64::MIN] {
            round_trip(value);
        }
        assert_eq!(round_trip(-1i32), vec![0x31, 0xFF]);
    }

    #[test]
    fn test_encode_decode_real_and_double() {
        assert_eq!(round_trip(72.5f32), vec![0x44, 0x42, 0x91, 0x00, 0x00]);
        round_trip(f32::MIN);
        round_trip(-273.15f64);
        round_trip(f64::MAX);
    }

    #[test]
    fn test_encode_decode_octet_string() {
        assert_eq!(round_trip(Vec::<u8>::new()), vec![0x60]);
        round_trip(vec![0x01, 0x02, 0x03, 0xFF, 0x00]);
        round_trip(vec![0xA5; 300]);
    }

    #[test]
    fn test_encode_decode_character_string() {
        assert_eq!(
            round_trip(CharacterString::new("MDL")),
            vec![0x74, 0x00, b'M', b'D', b'L']
        );
        round_trip(CharacterString::new(""));
    }

    #[test]
    fn test_character_sets() {
        let ucs2 = CharacterString::with_charset(CharacterSet::Ucs2, "Zone A").unwrap();
        assert_eq!(&ucs2.bytes[..4], &[0x00, b'Z', 0x00, b'o']);
        assert_eq!(ucs2.decode_text().unwrap(), "Zone A");

        let latin = CharacterString::with_charset(CharacterSet::Iso88591, "Gr\u{fc}n").unwrap();
        assert_eq!(latin.bytes, vec![b'G', b'r', 0xFC, b'n']);
        assert_eq!(latin.decode_text().unwrap(), "Gr\u{fc}n");

        let ucs4 = CharacterString::with_charset(CharacterSet::Ucs4, "\u{1F321}").unwrap();
        assert_eq!(ucs4.bytes, vec![0x00, 0x01, 0xF3, 0x21]);
        assert_eq!(ucs4.decode_text().unwrap(), "\u{1F321}");

        let jis =
            CharacterString::with_charset(CharacterSet::JisX0208, "\u{6e29}\u{5ea6}").unwrap();
        assert_eq!(jis.decode_text().unwrap(), "\u{6e29}\u{5ea6}");

        assert!(CharacterString::with_charset(CharacterSet::Iso88591, "\u{6e29}").is_err());
        assert!(CharacterString::with_charset(CharacterSet::Ucs2, "\u{1F321}").is_err());
    }

    #[test]
    fn test_dbcs_code_page_preserved() {
        let content = [0x01, 0x03, 0xA4, 0x81, 0x40];
        let value = CharacterString::decode_content(&content).unwrap();
        assert_eq!(value.charset, CharacterSet::IbmDbcs);
        assert_eq!(value.code_page, Some(932));
        assert_eq!(value.bytes, vec![0x81, 0x40]);

        let mut buffer = Vec::new();
        value.encode_content(&mut buffer).unwrap();
        assert_eq!(buffer, content);
    }

    #[test]
    fn test_unknown_charset_survives() {
        let value = CharacterString::decode_content(&[0x09, b'x']).unwrap();
        assert!(!value.charset.is_standard());
        assert!(value.decode_text().is_err());
        let mut buffer = Vec::new();
        value.encode_content(&mut buffer).unwrap();
        assert_eq!(buffer, vec![0x09, b'x']);
    }

    #[test]
    fn test_bit_string_encoding() {
        let bits = BitString::new(vec![true, false, true, true, false, false, true, false, true]);
        assert_eq!(round_trip(bits), vec![0x83, 0x07, 0xB2, 0x80]);
        assert_eq!(round_trip(BitString::default()), vec![0x81, 0x00]);

        let mut flags = BitString::with_len(4);
        flags.set(1, true);
        assert!(flags.get(1));
        assert!(!flags.get(10));
        assert_eq!(round_trip(flags), vec![0x82, 0x04, 0x40]);
    }

    #[test]
    fn test_bit_string_rejects_bad_unused_count() {
        assert!(BitString::decode_content(&[0x08, 0xFF]).is_err());
        assert!(BitString::decode_content(&[0x03]).is_err());
        assert!(BitString::decode_content(&[]).is_err());
    }

    #[test]
    fn test_encode_decode_date_and_time() {
        assert_eq!(
            round_trip(Date::new(1992, 6, 21, UNSPECIFIED)),
            vec![0xA4, 0x5C, 0x06, 0x15, 0xFF]
        );
        assert_eq!(
            round_trip(Time::new(13, 3, 41, 9)),
            vec![0xB4, 0x0D, 0x03, 0x29, 0x09]
        );
        round_trip(Date::new(Date::UNSPECIFIED_YEAR, UNSPECIFIED, UNSPECIFIED, UNSPECIFIED));

        let mut buffer = Vec::new();
        assert!(Date::new(1850, 1, 1, 1).encode(&mut buffer).is_err());
    }

    #[test]
    fn test_chrono_conversions() {
        let naive = NaiveDate::from_ymd_opt(2024, 3, 15).unwrap();
        let date = Date::try_from(naive).unwrap();
        assert_eq!(date, Date::new(2024, 3, 15, 5));
        assert_eq!(NaiveDate::try_from(date).unwrap(), naive);
        assert!(NaiveDate::try_from(Date::new(2024, 13, 1, 1)).is_err());

        let naive = NaiveTime::from_hms_milli_opt(14, 30, 45, 500).unwrap();
        let time = Time::from(naive);
        assert_eq!(time, Time::new(14, 30, 45, 50));
        assert_eq!(NaiveTime::try_from(time).unwrap(), naive);
    }

    #[test]
    fn test_chrono_date_year_range() {
        for year in [1899, 2155, -44, 65_791] {
            let naive = NaiveDate::from_ymd_opt(year, 1, 1).unwrap();
            assert!(
                matches!(Date::try_from(naive), Err(EncodingError::ValueOutOfRange(_))),
                "year {year}"
            );
        }
        for year in [1900, 2154] {
            let date = Date::try_from(NaiveDate::from_ymd_opt(year, 6, 1).unwrap()).unwrap();
            assert_eq!(date.year, year as u16);
            let mut buffer = Vec::new();
            date.encode(&mut buffer).unwrap();
        }
    }

    #[test]
    fn test_encode_decode_object_identifier() {
        let id = ObjectIdentifier::new(ObjectType::AnalogInput, 2);
        assert_eq!(round_trip(id), vec![0xC4, 0x00, 0x00, 0x00, 0x02]);
        round_trip(ObjectIdentifier::new(ObjectType::Device, 0x3F_FFFF));

        let mut buffer = Vec::new();
        assert!(ObjectIdentifier::new(ObjectType::Device, 0x40_0000)
            .encode(&mut buffer)
            .is_err());
    }

    #[test]
    fn test_null_and_enumerated() {
        assert_eq!(round_trip(Null), vec![0x00]);
        assert_eq!(round_trip(Enumerated(3)), vec![0x91, 0x03]);
    }

    #[test]
    fn test_wrong_application_tag_leaves_cursor() {
        let mut buffer = Vec::new();
        5u32.encode(&mut buffer).unwrap();
        let mut reader = Reader::new(&buffer);
        assert!(matches!(
            f32::decode(&mut reader),
            Err(EncodingError::ExpectedApplicationTag { .. })
        ));
        assert_eq!(reader.position(), 0);
        assert_eq!(u32::decode(&mut reader).unwrap(), 5);
    }
}
