//! Object access services: ReadProperty, ReadPropertyMultiple and
//! WriteProperty.

use alloc::vec::Vec;

use crate::encoding::{
    encode_context_sequence_of, Decodable, Encodable, PropertyValue, Reader, Result,
};
use crate::object::{ObjectIdentifier, PropertyIdentifier};

use super::BacnetError;

/// Array index meaning "the whole array".
pub const ARRAY_ALL: u32 = 0xFFFF_FFFF;

/// ReadProperty-Request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadPropertyRequest {
    pub object_identifier: ObjectIdentifier,
    pub property_identifier: PropertyIdentifier,
    pub property_array_index: Option<u32>,
}

impl ReadPropertyRequest {
    pub fn new(
        object_identifier: ObjectIdentifier,
        property_identifier: PropertyIdentifier,
    ) -> Self {
        Self {
            object_identifier,
            property_identifier,
            property_array_index: None,
        }
    }

    pub fn with_array_index(mut self, array_index: u32) -> Self {
        self.property_array_index = Some(array_index);
        self
    }
}

impl Encodable for ReadPropertyRequest {
    fn encode(&self, buffer: &mut Vec<u8>) -> Result<()> {
        self.object_identifier.encode_context(0, buffer)?;
        self.property_identifier.encode_context(1, buffer)?;
        if let Some(index) = self.property_array_index {
            index.encode_context(2, buffer)?;
        }
        Ok(())
    }
}

impl Decodable for ReadPropertyRequest {
    fn decode(reader: &mut Reader<'_>) -> Result<Self> {
        Ok(Self {
            object_identifier: ObjectIdentifier::decode_context(0, reader)?,
            property_identifier: PropertyIdentifier::decode_context(1, reader)?,
            property_array_index: reader.read_optional(2)?,
        })
    }
}

/// ReadProperty-ACK
#[derive(Debug, Clone, PartialEq)]
pub struct ReadPropertyAck {
    pub object_identifier: ObjectIdentifier,
    pub property_identifier: PropertyIdentifier,
    pub property_array_index: Option<u32>,
    pub property_value: PropertyValue,
}

impl Encodable for ReadPropertyAck {
    fn encode(&self, buffer: &mut Vec<u8>) -> Result<()> {
        self.object_identifier.encode_context(0, buffer)?;
        self.property_identifier.encode_context(1, buffer)?;
        if let Some(index) = self.property_array_index {
            index.encode_context(2, buffer)?;
        }
        self.property_value.encode_context(3, buffer)
    }
}

impl Decodable for ReadPropertyAck {
    fn decode(reader: &mut Reader<'_>) -> Result<Self> {
        Ok(Self {
            object_identifier: ObjectIdentifier::decode_context(0, reader)?,
            property_identifier: PropertyIdentifier::decode_context(1, reader)?,
            property_array_index: reader.read_optional(2)?,
            property_value: PropertyValue::decode_context(3, reader)?,
        })
    }
}

/// WriteProperty-Request
#[derive(Debug, Clone, PartialEq)]
pub struct WritePropertyRequest {
    pub object_identifier: ObjectIdentifier,
    pub property_identifier: PropertyIdentifier,
    pub property_array_index: Option<u32>,
    pub property_value: PropertyValue,
    /// Command priority, 1 (highest) to 16.
    pub priority: Option<u8>,
}

impl WritePropertyRequest {
    pub fn new(
        object_identifier: ObjectIdentifier,
        property_identifier: PropertyIdentifier,
        property_value: PropertyValue,
    ) -> Self {
        Self {
            object_identifier,
            property_identifier,
            property_array_index: None,
            property_value,
            priority: None,
        }
    }

    pub fn with_priority(mut self, priority: u8) -> Self {
        self.priority = Some(priority);
        self
    }
}

impl Encodable for WritePropertyRequest {
    fn encode(&self, buffer: &mut Vec<u8>) -> Result<()> {
        self.object_identifier.encode_context(0, buffer)?;
        self.property_identifier.encode_context(1, buffer)?;
        if let Some(index) = self.property_array_index {
            index.encode_context(2, buffer)?;
        }
        self.property_value.encode_context(3, buffer)?;
        if let Some(priority) = self.priority {
            priority.encode_context(4, buffer)?;
        }
        Ok(())
    }
}

impl Decodable for WritePropertyRequest {
    fn decode(reader: &mut Reader<'_>) -> Result<Self> {
        Ok(Self {
            object_identifier: ObjectIdentifier::decode_context(0, reader)?,
            property_identifier: PropertyIdentifier::decode_context(1, reader)?,
            property_array_index: reader.read_optional(2)?,
            property_value: PropertyValue::decode_context(3, reader)?,
            priority: reader.read_optional(4)?,
        })
    }
}

/// BACnetPropertyReference
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PropertyReference {
    pub property_identifier: PropertyIdentifier,
    pub property_array_index: Option<u32>,
}

impl PropertyReference {
    pub fn new(property_identifier: PropertyIdentifier) -> Self {
        Self {
            property_identifier,
            property_array_index: None,
        }
    }
}

impl Encodable for PropertyReference {
    fn encode(&self, buffer: &mut Vec<u8>) -> Result<()> {
        self.property_identifier.encode_context(0, buffer)?;
        if let Some(index) = self.property_array_index {
            index.encode_context(1, buffer)?;
        }
        Ok(())
    }
}

impl Decodable for PropertyReference {
    fn decode(reader: &mut Reader<'_>) -> Result<Self> {
        Ok(Self {
            property_identifier: PropertyIdentifier::decode_context(0, reader)?,
            property_array_index: reader.read_optional(1)?,
        })
    }
}

/// ReadAccessSpecification
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadAccessSpecification {
    pub object_identifier: ObjectIdentifier,
    pub property_references: Vec<PropertyReference>,
}

impl ReadAccessSpecification {
    pub fn new(
        object_identifier: ObjectIdentifier,
        property_references: Vec<PropertyReference>,
    ) -> Self {
        Self {
            object_identifier,
            property_references,
        }
    }
}

impl Encodable for ReadAccessSpecification {
    fn encode(&self, buffer: &mut Vec<u8>) -> Result<()> {
        self.object_identifier.encode_context(0, buffer)?;
        encode_context_sequence_of(buffer, 1, &self.property_references)
    }
}

impl Decodable for ReadAccessSpecification {
    fn decode(reader: &mut Reader<'_>) -> Result<Self> {
        Ok(Self {
            object_identifier: ObjectIdentifier::decode_context(0, reader)?,
            property_references: reader.read_context_sequence_of(1)?,
        })
    }
}

/// ReadPropertyMultiple-Request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadPropertyMultipleRequest {
    pub specifications: Vec<ReadAccessSpecification>,
}

impl ReadPropertyMultipleRequest {
    pub fn new(specifications: Vec<ReadAccessSpecification>) -> Self {
        Self { specifications }
    }
}

impl Encodable for ReadPropertyMultipleRequest {
    fn encode(&self, buffer: &mut Vec<u8>) -> Result<()> {
        self.specifications
            .iter()
            .try_for_each(|spec| spec.encode(buffer))
    }
}

impl Decodable for ReadPropertyMultipleRequest {
    fn decode(reader: &mut Reader<'_>) -> Result<Self> {
        reader.read_sequence_of(None).map(Self::new)
    }
}

/// The value or the access error of one property in a ReadAccessResult.
#[derive(Debug, Clone, PartialEq)]
pub enum ReadResult {
    Value(PropertyValue),
    Error(BacnetError),
}

/// One element of `listOfResults`.
#[derive(Debug, Clone, PartialEq)]
pub struct ReadResultElement {
    pub property_identifier: PropertyIdentifier,
    pub property_array_index: Option<u32>,
    pub result: ReadResult,
}

impl Encodable for ReadResultElement {
    fn encode(&self, buffer: &mut Vec<u8>) -> Result<()> {
        self.property_identifier.encode_context(2, buffer)?;
        if let Some(index) = self.property_array_index {
            index.encode_context(3, buffer)?;
        }
        match &self.result {
            ReadResult::Value(value) => value.encode_context(4, buffer),
            ReadResult::Error(error) => error.encode_context(5, buffer),
        }
    }
}

impl Decodable for ReadResultElement {
    fn decode(reader: &mut Reader<'_>) -> Result<Self> {
        let property_identifier = PropertyIdentifier::decode_context(2, reader)?;
        let property_array_index = reader.read_optional(3)?;
        let result = match reader.read_optional::<PropertyValue>(4)? {
            Some(value) => ReadResult::Value(value),
            None => ReadResult::Error(BacnetError::decode_context(5, reader)?),
        };
        Ok(Self {
            property_identifier,
            property_array_index,
            result,
        })
    }
}

/// ReadAccessResult
#[derive(Debug, Clone, PartialEq)]
pub struct ReadAccessResult {
    pub object_identifier: ObjectIdentifier,
    pub results: Option<Vec<ReadResultElement>>,
}

impl Encodable for ReadAccessResult {
    fn encode(&self, buffer: &mut Vec<u8>) -> Result<()> {
        self.object_identifier.encode_context(0, buffer)?;
        match &self.results {
            Some(results) => encode_context_sequence_of(buffer, 1, results),
            None => Ok(()),
        }
    }
}

impl Decodable for ReadAccessResult {
    fn decode(reader: &mut Reader<'_>) -> Result<Self> {
        let object_identifier = ObjectIdentifier::decode_context(0, reader)?;
        let results = if reader.next_is_context(1) {
            Some(reader.read_context_sequence_of(1)?)
        } else {
            None
        };
        Ok(Self {
            object_identifier,
            results,
        })
    }
}

/// ReadPropertyMultiple-ACK
#[derive(Debug, Clone, PartialEq)]
pub struct ReadPropertyMultipleAck {
    pub results: Vec<ReadAccessResult>,
}

impl Encodable for ReadPropertyMultipleAck {
    fn encode(&self, buffer: &mut Vec<u8>) -> Result<()> {
        self.results.iter().try_for_each(|result| result.encode(buffer))
    }
}

impl Decodable for ReadPropertyMultipleAck {
    fn decode(reader: &mut Reader<'_>) -> Result<Self> {
        Ok(Self {
            results: reader.read_sequence_of(None)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoding::{decode_all, ApplicationValue, CharacterString, EncodingError};
    use crate::object::ObjectType;
    use crate::service::{ErrorClass, ErrorCode};
    use alloc::vec;

    fn encode<T: Encodable>(value: &T) -> Vec<u8> {
        let mut buffer = Vec::new();
        value.encode(&mut buffer).unwrap();
        buffer
    }

    #[test]
    fn test_read_property_request() {
        // clause F.3.5: ReadProperty of analog-input 5 present-value
        let request = ReadPropertyRequest::new(
            ObjectIdentifier::new(ObjectType::AnalogInput, 5),
            PropertyIdentifier::PresentValue,
        );
        let data = encode(&request);
        assert_eq!(data, vec![0x0C, 0x00, 0x00, 0x00, 0x05, 0x19, 0x55]);
        assert_eq!(decode_all::<ReadPropertyRequest>(&data).unwrap(), request);

        let indexed = request.with_array_index(0);
        assert_eq!(decode_all::<ReadPropertyRequest>(&encode(&indexed)).unwrap(), indexed);
    }

    #[test]
    fn test_read_property_ack() {
        // clause F.3.5: present-value 72.3
        let data = [
            0x0C, 0x00, 0x00, 0x00, 0x05, 0x19, 0x55, 0x3E, 0x44, 0x42, 0x90, 0x99, 0x9A, 0x3F,
        ];
        let ack: ReadPropertyAck = decode_all(&data).unwrap();
        assert_eq!(ack.property_value.as_single(), Some(&ApplicationValue::Real(72.3)));
        assert_eq!(encode(&ack), data);
    }

    #[test]
    fn test_write_property_with_priority() {
        let request = WritePropertyRequest::new(
            ObjectIdentifier::new(ObjectType::AnalogValue, 1),
            PropertyIdentifier::PresentValue,
            PropertyValue::single(180.0f32),
        )
        .with_priority(8);
        let data = encode(&request);
        assert_eq!(
            data,
            vec![
                0x0C, 0x00, 0x80, 0x00, 0x01, 0x19, 0x55, 0x3E, 0x44, 0x43, 0x34, 0x00, 0x00, 0x3F,
                0x49, 0x08
            ],
        );
        assert_eq!(decode_all::<WritePropertyRequest>(&data).unwrap(), request);
    }

    #[test]
    fn test_write_property_missing_value() {
        let data = [0x0C, 0x00, 0x80, 0x00, 0x01, 0x19, 0x55];
        assert!(matches!(
            decode_all::<WritePropertyRequest>(&data),
            Err(EncodingError::ExpectedOpeningTag { expected: 3, .. })
        ));
    }

    #[test]
    fn test_read_property_multiple_round_trip() {
        let request = ReadPropertyMultipleRequest::new(vec![
            ReadAccessSpecification::new(
                ObjectIdentifier::new(ObjectType::AnalogInput, 16),
                vec![
                    PropertyReference::new(PropertyIdentifier::PresentValue),
                    PropertyReference::new(PropertyIdentifier::Reliability),
                ],
            ),
            ReadAccessSpecification::new(ObjectIdentifier::new(ObjectType::Device, 1), vec![]),
        ]);
        let data = encode(&request);
        assert_eq!(
            &data[..12],
            &[0x0C, 0x00, 0x00, 0x00, 0x10, 0x1E, 0x09, 0x55, 0x09, 0x67, 0x1F, 0x0C]
        );
        assert_eq!(decode_all::<ReadPropertyMultipleRequest>(&data).unwrap(), request);
    }

    #[test]
    fn test_read_property_multiple_ack_with_error() {
        let ack = ReadPropertyMultipleAck {
            results: vec![ReadAccessResult {
                object_identifier: ObjectIdentifier::new(ObjectType::Device, 99),
                results: Some(vec![
                    ReadResultElement {
                        property_identifier: PropertyIdentifier::ObjectName,
                        property_array_index: None,
                        result: ReadResult::Value(PropertyValue::single(CharacterString::new(
                            "AHU-1",
                        ))),
                    },
                    ReadResultElement {
                        property_identifier: PropertyIdentifier::from(9999u32),
                        property_array_index: Some(2),
                        result: ReadResult::Error(BacnetError::new(
                            ErrorClass::Property,
                            ErrorCode::UnknownProperty,
                        )),
                    },
                ]),
            }],
        };
        let data = encode(&ack);
        let decoded: ReadPropertyMultipleAck = decode_all(&data).unwrap();
        assert_eq!(decoded, ack);
        assert!(data.ends_with(&[0x5E, 0x91, 0x02, 0x91, 0x20, 0x5F, 0x1F]));
    }
}
