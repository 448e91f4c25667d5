//! Tagged unions over the primitive types and the open-ended element lists
//! used for property values.

use alloc::vec::Vec;

use super::{
    encode_closing_tag, encode_opening_tag, ApplicationTag, BitString, CharacterString, Date,
    Decodable, Encodable, EncodingError, Null, Reader, Result, Tag, Time,
};
use crate::object::ObjectIdentifier;

/// Any application-tagged primitive.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ApplicationValue {
    Null,
    Boolean(bool),
    Unsigned(u64),
    Signed(i64),
    Real(f32),
    Double(f64),
    OctetString(Vec<u8>),
    CharacterString(CharacterString),
    BitString(BitString),
    Enumerated(u32),
    Date(Date),
    Time(Time),
    ObjectIdentifier(ObjectIdentifier),
    /// Application tags 13 to 15, kept verbatim.
    Reserved { tag_number: u8, data: Vec<u8> },
}

impl ApplicationValue {
    pub fn tag(&self) -> ApplicationTag {
        match self {
            ApplicationValue::Null => ApplicationTag::Null,
            ApplicationValue::Boolean(_) => ApplicationTag::Boolean,
            ApplicationValue::Unsigned(_) => ApplicationTag::UnsignedInt,
            ApplicationValue::Signed(_) => ApplicationTag::SignedInt,
            ApplicationValue::Real(_) => ApplicationTag::Real,
            ApplicationValue::Double(_) => ApplicationTag::Double,
            ApplicationValue::OctetString(_) => ApplicationTag::OctetString,
            ApplicationValue::CharacterString(_) => ApplicationTag::CharacterString,
            ApplicationValue::BitString(_) => ApplicationTag::BitString,
            ApplicationValue::Enumerated(_) => ApplicationTag::Enumerated,
            ApplicationValue::Date(_) => ApplicationTag::Date,
            ApplicationValue::Time(_) => ApplicationTag::Time,
            ApplicationValue::ObjectIdentifier(_) => ApplicationTag::ObjectIdentifier,
            ApplicationValue::Reserved { tag_number, .. } => {
                ApplicationTag::try_from(*tag_number).unwrap_or(ApplicationTag::Reserved15)
            }
        }
    }
}

impl Encodable for ApplicationValue {
    fn encode(&self, buffer: &mut Vec<u8>) -> Result<()> {
        match self {
            ApplicationValue::Null => Null.encode(buffer),
            ApplicationValue::Boolean(v) => v.encode(buffer),
            ApplicationValue::Unsigned(v) => v.encode(buffer),
            ApplicationValue::Signed(v) => v.encode(buffer),
            ApplicationValue::Real(v) => v.encode(buffer),
            ApplicationValue::Double(v) => v.encode(buffer),
            ApplicationValue::OctetString(v) => v.encode(buffer),
            ApplicationValue::CharacterString(v) => v.encode(buffer),
            ApplicationValue::BitString(v) => v.encode(buffer),
            ApplicationValue::Enumerated(v) => super::Enumerated(*v).encode(buffer),
            ApplicationValue::Date(v) => v.encode(buffer),
            ApplicationValue::Time(v) => v.encode(buffer),
            ApplicationValue::ObjectIdentifier(v) => v.encode(buffer),
            ApplicationValue::Reserved { tag_number, data } => {
                let tag = ApplicationTag::try_from(*tag_number)?;
                super::encode_application_tag(buffer, tag, data.len())?;
                buffer.extend_from_slice(data);
                Ok(())
            }
        }
    }

    /// Context tagging drops the type information, so only the content is
    /// written under the context tag.
    fn encode_context(&self, tag_number: u8, buffer: &mut Vec<u8>) -> Result<()> {
        match self {
            ApplicationValue::Null => Null.encode_context(tag_number, buffer),
            ApplicationValue::Boolean(v) => v.encode_context(tag_number, buffer),
            ApplicationValue::Unsigned(v) => v.encode_context(tag_number, buffer),
            ApplicationValue::Signed(v) => v.encode_context(tag_number, buffer),
            ApplicationValue::Real(v) => v.encode_context(tag_number, buffer),
            ApplicationValue::Double(v) => v.encode_context(tag_number, buffer),
            ApplicationValue::OctetString(v) => v.encode_context(tag_number, buffer),
            ApplicationValue::CharacterString(v) => v.encode_context(tag_number, buffer),
            ApplicationValue::BitString(v) => v.encode_context(tag_number, buffer),
            ApplicationValue::Enumerated(v) => {
                super::Enumerated(*v).encode_context(tag_number, buffer)
            }
            ApplicationValue::Date(v) => v.encode_context(tag_number, buffer),
            ApplicationValue::Time(v) => v.encode_context(tag_number, buffer),
            ApplicationValue::ObjectIdentifier(v) => v.encode_context(tag_number, buffer),
            ApplicationValue::Reserved { data, .. } => {
                super::encode_context_tag(buffer, tag_number, data.len())?;
                buffer.extend_from_slice(data);
                Ok(())
            }
        }
    }
}

impl Decodable for ApplicationValue {
    fn decode(reader: &mut Reader<'_>) -> Result<Self> {
        let number = match reader.peek_tag()? {
            Some(Tag::Application { number, .. }) => number,
            Some(found) => {
                return Err(EncodingError::InvalidFormat(alloc::format!(
                    "expected an application tagged value, found {}",
                    found
                )))
            }
            None => {
                return Err(EncodingError::UnexpectedEndOfData {
                    needed: 1,
                    remaining: 0,
                })
            }
        };

        let value = match ApplicationTag::try_from(number)? {
            ApplicationTag::Null => {
                Null::decode(reader)?;
                ApplicationValue::Null
            }
            ApplicationTag::Boolean => ApplicationValue::Boolean(bool::decode(reader)?),
            ApplicationTag::UnsignedInt => ApplicationValue::Unsigned(u64::decode(reader)?),
            ApplicationTag::SignedInt => ApplicationValue::Signed(i64::decode(reader)?),
            ApplicationTag::Real => ApplicationValue::Real(f32::decode(reader)?),
            ApplicationTag::Double => ApplicationValue::Double(f64::decode(reader)?),
            ApplicationTag::OctetString => {
                ApplicationValue::OctetString(Vec::<u8>::decode(reader)?)
            }
            ApplicationTag::CharacterString => {
                ApplicationValue::CharacterString(CharacterString::decode(reader)?)
            }
            ApplicationTag::BitString => ApplicationValue::BitString(BitString::decode(reader)?),
            ApplicationTag::Enumerated => {
                ApplicationValue::Enumerated(super::Enumerated::decode(reader)?.0)
            }
            ApplicationTag::Date => ApplicationValue::Date(Date::decode(reader)?),
            ApplicationTag::Time => ApplicationValue::Time(Time::decode(reader)?),
            ApplicationTag::ObjectIdentifier => {
                ApplicationValue::ObjectIdentifier(ObjectIdentifier::decode(reader)?)
            }
            reserved @ (ApplicationTag::Reserved13
            | ApplicationTag::Reserved14
            | ApplicationTag::Reserved15) => ApplicationValue::Reserved {
                tag_number: reserved as u8,
                data: reader.read_application(reserved)?.to_vec(),
            },
        };
        Ok(value)
    }
}

macro_rules! impl_from_primitive {
    ($($ty:ty => $variant:ident),+ $(,)?) => {$(
        impl From<$ty> for ApplicationValue {
            fn from(value: $ty) -> Self {
                ApplicationValue::$variant(value.into())
            }
        }
    )+};
}

impl_from_primitive!(
    bool => Boolean,
    u32 => Unsigned,
    u64 => Unsigned,
    i32 => Signed,
    i64 => Signed,
    f32 => Real,
    f64 => Double,
    CharacterString => CharacterString,
    BitString => BitString,
    Date => Date,
    Time => Time,
    ObjectIdentifier => ObjectIdentifier,
);

impl From<&str> for ApplicationValue {
    fn from(value: &str) -> Self {
        ApplicationValue::CharacterString(CharacterString::new(value))
    }
}

/// One element of an open-typed value (`ABSTRACT-SYNTAX.&Type`).
///
/// Context-tagged primitives cannot be interpreted without the schema of
/// the enclosing type, so their content is carried raw.
#[derive(Debug, Clone, PartialEq)]
pub enum Element {
    Application(ApplicationValue),
    Context { tag_number: u8, data: Vec<u8> },
    Constructed { tag_number: u8, elements: Vec<Element> },
}

impl Encodable for Element {
    fn encode(&self, buffer: &mut Vec<u8>) -> Result<()> {
        match self {
            Element::Application(value) => value.encode(buffer),
            Element::Context { tag_number, data } => {
                super::encode_context_tag(buffer, *tag_number, data.len())?;
                buffer.extend_from_slice(data);
                Ok(())
            }
            Element::Constructed {
                tag_number,
                elements,
            } => encode_context_sequence_of(buffer, *tag_number, elements),
        }
    }
}

impl Decodable for Element {
    fn decode(reader: &mut Reader<'_>) -> Result<Self> {
        match reader.peek_tag()? {
            Some(Tag::Application { .. }) => {
                ApplicationValue::decode(reader).map(Element::Application)
            }
            Some(Tag::Context { number, .. }) => Ok(Element::Context {
                tag_number: number,
                data: reader.read_context(number)?.to_vec(),
            }),
            Some(Tag::Opening(number)) => Ok(Element::Constructed {
                tag_number: number,
                elements: reader.read_context_sequence_of(number)?,
            }),
            Some(Tag::Closing(number)) => Err(EncodingError::InvalidFormat(alloc::format!(
                "unexpected closing tag {}",
                number
            ))),
            None => Err(EncodingError::UnexpectedEndOfData {
                needed: 1,
                remaining: 0,
            }),
        }
    }
}

/// A property value: the element list between a property's opening and
/// closing tags. Arrays and lists are simply several elements.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PropertyValue(pub Vec<Element>);

impl PropertyValue {
    pub fn single(value: impl Into<ApplicationValue>) -> Self {
        PropertyValue(alloc::vec![Element::Application(value.into())])
    }

    /// The value when it consists of exactly one application-tagged element.
    pub fn as_single(&self) -> Option<&ApplicationValue> {
        match self.0.as_slice() {
            [Element::Application(value)] => Some(value),
            _ => None,
        }
    }

    /// Decode the elements as a homogeneous list of `T`.
    pub fn decode_as<T: Decodable>(&self) -> Result<Vec<T>> {
        let mut buffer = Vec::new();
        self.encode(&mut buffer)?;
        Reader::new(&buffer).read_sequence_of(None)
    }
}

impl From<ApplicationValue> for PropertyValue {
    fn from(value: ApplicationValue) -> Self {
        PropertyValue(alloc::vec![Element::Application(value)])
    }
}

impl Encodable for PropertyValue {
    fn encode(&self, buffer: &mut Vec<u8>) -> Result<()> {
        encode_sequence_of(buffer, &self.0)
    }
}

impl Decodable for PropertyValue {
    /// Reads to the end of the buffer.
    fn decode(reader: &mut Reader<'_>) -> Result<Self> {
        reader.read_sequence_of(None).map(PropertyValue)
    }

    fn decode_context(tag_number: u8, reader: &mut Reader<'_>) -> Result<Self> {
        reader.read_context_sequence_of(tag_number).map(PropertyValue)
    }
}

/// `SEQUENCE OF T` without an enclosing tag.
pub fn encode_sequence_of<T: Encodable>(buffer: &mut Vec<u8>, items: &[T]) -> Result<()> {
    items.iter().try_for_each(|item| item.encode(buffer))
}

/// `[tag_number] SEQUENCE OF T`.
pub fn encode_context_sequence_of<T: Encodable>(
    buffer: &mut Vec<u8>,
    tag_number: u8,
    items: &[T],
) -> Result<()> {
    encode_opening_tag(buffer, tag_number);
    encode_sequence_of(buffer, items)?;
    encode_closing_tag(buffer, tag_number);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::ObjectType;
    use alloc::{string::String, vec};
    use proptest::prelude::*;

    fn round_trip(value: &PropertyValue) -> Vec<u8> {
        let mut buffer = Vec::new();
        value.encode_context(3, &mut buffer).unwrap();
        let mut reader = Reader::new(&buffer);
        assert_eq!(&PropertyValue::decode_context(3, &mut reader).unwrap(), value);
        assert!(reader.is_empty());
        buffer
    }

    #[test]
    fn test_property_value_single() {
        let value = PropertyValue::single(72.5f32);
        assert_eq!(
            round_trip(&value),
            vec![0x3E, 0x44, 0x42, 0x91, 0x00, 0x00, 0x3F]
        );
        assert_eq!(value.as_single(), Some(&ApplicationValue::Real(72.5)));
    }

    #[test]
    fn test_property_value_empty_and_list() {
        assert_eq!(round_trip(&PropertyValue::default()), vec![0x3E, 0x3F]);

        let list = PropertyValue(vec![
            Element::Application(ObjectIdentifier::new(ObjectType::AnalogInput, 1).into()),
            Element::Application(ObjectIdentifier::new(ObjectType::AnalogInput, 2).into()),
        ]);
        round_trip(&list);
        let ids: Vec<ObjectIdentifier> = list.decode_as().unwrap();
        assert_eq!(ids[1].instance, 2);
        assert!(list.as_single().is_none());
    }

    #[test]
    fn test_constructed_elements() {
        // a BACnetDateTime-like structure nested in a context block
        let value = PropertyValue(vec![
            Element::Context {
                tag_number: 0,
                data: vec![0x01],
            },
            Element::Constructed {
                tag_number: 1,
                elements: vec![
                    Element::Application(Date::new(2024, 1, 2, 2).into()),
                    Element::Application(Time::new(8, 0, 0, 0).into()),
                    Element::Constructed {
                        tag_number: 2,
                        elements: vec![],
                    },
                ],
            },
        ]);
        round_trip(&value);
    }

    #[test]
    fn test_reserved_application_tag_preserved() {
        let data = [0xD2, 0xAB, 0xCD];
        let value = ApplicationValue::decode(&mut Reader::new(&data)).unwrap();
        assert_eq!(
            value,
            ApplicationValue::Reserved {
                tag_number: 13,
                data: vec![0xAB, 0xCD]
            }
        );
        let mut buffer = Vec::new();
        value.encode(&mut buffer).unwrap();
        assert_eq!(buffer, data);
    }

    #[test]
    fn test_stray_closing_tag_is_error() {
        assert!(Element::decode(&mut Reader::new(&[0x3F])).is_err());
        assert!(PropertyValue::decode_context(3, &mut Reader::new(&[0x3E, 0x21, 0x01])).is_err());
    }

    fn application_value() -> impl Strategy<Value = ApplicationValue> {
        prop_oneof![
            Just(ApplicationValue::Null),
            any::<bool>().prop_map(ApplicationValue::Boolean),
            any::<u64>().prop_map(ApplicationValue::Unsigned),
            any::<i64>().prop_map(ApplicationValue::Signed),
            any::<f32>()
                .prop_filter("NaN never compares equal", |v| !v.is_nan())
                .prop_map(ApplicationValue::Real),
            any::<f64>()
                .prop_filter("NaN never compares equal", |v| !v.is_nan())
                .prop_map(ApplicationValue::Double),
            prop::collection::vec(any::<u8>(), 0..300).prop_map(ApplicationValue::OctetString),
            ".{0,40}".prop_map(|s: String| ApplicationValue::from(s.as_str())),
            prop::collection::vec(any::<bool>(), 0..40)
                .prop_map(|bits| ApplicationValue::BitString(BitString::new(bits))),
            any::<u32>().prop_map(ApplicationValue::Enumerated),
            (1900u16..2155, any::<u8>(), any::<u8>(), any::<u8>())
                .prop_map(|(y, m, d, w)| ApplicationValue::Date(Date::new(y, m, d, w))),
            (any::<u8>(), any::<u8>(), any::<u8>(), any::<u8>())
                .prop_map(|(h, m, s, c)| ApplicationValue::Time(Time::new(h, m, s, c))),
            (0u16..1024, 0u32..=0x3F_FFFF).prop_map(|(t, i)| {
                ApplicationValue::ObjectIdentifier(ObjectIdentifier::new(ObjectType::from(t), i))
            }),
        ]
    }

    proptest! {
        #[test]
        fn prop_application_value_round_trip(value in application_value()) {
            let mut buffer = Vec::new();
            value.encode(&mut buffer).unwrap();
            let mut reader = Reader::new(&buffer);
            prop_assert_eq!(ApplicationValue::decode(&mut reader).unwrap(), value);
            prop_assert!(reader.is_empty());
        }

        #[test]
        fn prop_truncated_input_never_panics(value in application_value(), cut in 0usize..16) {
            let mut buffer = Vec::new();
            value.encode(&mut buffer).unwrap();
            let cut = cut.min(buffer.len());
            let truncated = &buffer[..buffer.len() - cut];
            let result = ApplicationValue::decode(&mut Reader::new(truncated));
            if cut > 0 {
                prop_assert!(result.is_err());
            }
        }

        #[test]
        fn prop_sequence_of_unsigned(values in prop::collection::vec(any::<u32>(), 0..20)) {
            let mut buffer = Vec::new();
            encode_context_sequence_of(&mut buffer, 2, &values).unwrap();
            let decoded: Vec<u32> = Reader::new(&buffer).read_context_sequence_of(2).unwrap();
            prop_assert_eq!(decoded, values);
        }
    }
}
