//! Private transfer services and vendor parameter schemas.
//!
//! Service parameters travel as `ABSTRACT-SYNTAX.&Type`, whose layout only
//! the vendor knows. Without a registered [`VendorSchema`] they stay an
//! opaque block of raw octets; with one they decode into named values.

use alloc::{string::String, vec::Vec};

use crate::encoding::{
    encode_closing_tag, encode_opening_tag, ApplicationValue, BitString, CharacterString, Date,
    Decodable, Encodable, EncodingError, Enumerated, PropertyValue, Reader, Result, Time,
};
use crate::object::ObjectIdentifier;

/// Primitive type of one vendor parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum FieldKind {
    Boolean,
    Unsigned,
    Signed,
    Real,
    Double,
    OctetString,
    CharacterString,
    BitString,
    Enumerated,
    Date,
    Time,
    ObjectIdentifier,
}

impl FieldKind {
    fn decode_context(self, tag_number: u8, reader: &mut Reader<'_>) -> Result<ApplicationValue> {
        Ok(match self {
            FieldKind::Boolean => {
                ApplicationValue::Boolean(bool::decode_context(tag_number, reader)?)
            }
            FieldKind::Unsigned => {
                ApplicationValue::Unsigned(u64::decode_context(tag_number, reader)?)
            }
            FieldKind::Signed => ApplicationValue::Signed(i64::decode_context(tag_number, reader)?),
            FieldKind::Real => ApplicationValue::Real(f32::decode_context(tag_number, reader)?),
            FieldKind::Double => ApplicationValue::Double(f64::decode_context(tag_number, reader)?),
            FieldKind::OctetString => {
                ApplicationValue::OctetString(Vec::<u8>::decode_context(tag_number, reader)?)
            }
            FieldKind::CharacterString => {
                ApplicationValue::CharacterString(CharacterString::decode_context(
                    tag_number, reader,
                )?)
            }
            FieldKind::BitString => {
                ApplicationValue::BitString(BitString::decode_context(tag_number, reader)?)
            }
            FieldKind::Enumerated => {
                ApplicationValue::Enumerated(Enumerated::decode_context(tag_number, reader)?.0)
            }
            FieldKind::Date => ApplicationValue::Date(Date::decode_context(tag_number, reader)?),
            FieldKind::Time => ApplicationValue::Time(Time::decode_context(tag_number, reader)?),
            FieldKind::ObjectIdentifier => {
                ApplicationValue::ObjectIdentifier(ObjectIdentifier::decode_context(
                    tag_number, reader,
                )?)
            }
        })
    }
}

/// One context tagged member of a vendor's parameter block.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct VendorField {
    pub name: String,
    pub context_tag: u8,
    pub kind: FieldKind,
    pub optional: bool,
}

impl VendorField {
    pub fn required(name: impl Into<String>, context_tag: u8, kind: FieldKind) -> Self {
        Self {
            name: name.into(),
            context_tag,
            kind,
            optional: false,
        }
    }

    pub fn optional(name: impl Into<String>, context_tag: u8, kind: FieldKind) -> Self {
        Self {
            optional: true,
            ..Self::required(name, context_tag, kind)
        }
    }
}

/// Layout of the parameters of one (vendor, service number) pair. Members
/// are decoded in order.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct VendorSchema {
    pub fields: Vec<VendorField>,
}

impl VendorSchema {
    pub fn new(fields: Vec<VendorField>) -> Self {
        Self { fields }
    }

    /// Decode the raw parameter block (the octets between the enclosing
    /// tags).
    pub fn decode(&self, block: &[u8]) -> Result<Vec<VendorParameter>> {
        let mut reader = Reader::new(block);
        let mut parameters = Vec::new();
        for field in &self.fields {
            if reader.next_is_context(field.context_tag) {
                parameters.push(VendorParameter {
                    name: field.name.clone(),
                    context_tag: field.context_tag,
                    value: field.kind.decode_context(field.context_tag, &mut reader)?,
                });
            } else if !field.optional {
                return Err(EncodingError::ExpectedContextTag {
                    expected: field.context_tag,
                    found: reader.peek_tag()?,
                });
            }
        }
        reader.finish()?;
        Ok(parameters)
    }
}

/// A decoded vendor parameter.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct VendorParameter {
    pub name: String,
    pub context_tag: u8,
    pub value: ApplicationValue,
}

/// Contents of `serviceParameters` / `resultBlock`.
#[derive(Debug, Clone, PartialEq)]
pub enum PrivateParameters {
    /// Raw octets between the enclosing tags.
    Opaque(Vec<u8>),
    /// Decoded through a registered schema.
    Structured(Vec<VendorParameter>),
}

impl PrivateParameters {
    /// Build an opaque block from tagged elements.
    pub fn from_elements(value: &PropertyValue) -> Result<Self> {
        let mut block = Vec::new();
        value.encode(&mut block)?;
        Ok(PrivateParameters::Opaque(block))
    }

    /// Parse the block as generic elements.
    pub fn elements(&self) -> Result<PropertyValue> {
        match self {
            PrivateParameters::Opaque(block) => crate::encoding::decode_all(block),
            PrivateParameters::Structured(parameters) => {
                let mut block = Vec::new();
                encode_parameters(parameters, &mut block)?;
                crate::encoding::decode_all(&block)
            }
        }
    }

    /// Look up a structured parameter by name.
    pub fn get(&self, name: &str) -> Option<&ApplicationValue> {
        match self {
            PrivateParameters::Structured(parameters) => parameters
                .iter()
                .find(|parameter| parameter.name == name)
                .map(|parameter| &parameter.value),
            PrivateParameters::Opaque(_) => None,
        }
    }

    /// Decode an opaque block with `schema`. Structured parameters are kept.
    pub fn resolve(self, schema: &VendorSchema) -> Result<Self> {
        match self {
            PrivateParameters::Opaque(block) => {
                schema.decode(&block).map(PrivateParameters::Structured)
            }
            structured => Ok(structured),
        }
    }

    fn encode_enclosed(&self, tag_number: u8, buffer: &mut Vec<u8>) -> Result<()> {
        encode_opening_tag(buffer, tag_number);
        match self {
            PrivateParameters::Opaque(block) => buffer.extend_from_slice(block),
            PrivateParameters::Structured(parameters) => encode_parameters(parameters, buffer)?,
        }
        encode_closing_tag(buffer, tag_number);
        Ok(())
    }
}

fn encode_parameters(parameters: &[VendorParameter], buffer: &mut Vec<u8>) -> Result<()> {
    parameters
        .iter()
        .try_for_each(|parameter| parameter.value.encode_context(parameter.context_tag, buffer))
}

/// ConfirmedPrivateTransfer-Request and UnconfirmedPrivateTransfer-Request
#[derive(Debug, Clone, PartialEq)]
pub struct PrivateTransferRequest {
    pub vendor_id: u16,
    pub service_number: u32,
    pub parameters: Option<PrivateParameters>,
}

impl PrivateTransferRequest {
    pub fn new(vendor_id: u16, service_number: u32) -> Self {
        Self {
            vendor_id,
            service_number,
            parameters: None,
        }
    }

    pub fn with_parameters(mut self, parameters: PrivateParameters) -> Self {
        self.parameters = Some(parameters);
        self
    }
}

impl Encodable for PrivateTransferRequest {
    fn encode(&self, buffer: &mut Vec<u8>) -> Result<()> {
        self.vendor_id.encode_context(0, buffer)?;
        self.service_number.encode_context(1, buffer)?;
        match &self.parameters {
            Some(parameters) => parameters.encode_enclosed(2, buffer),
            None => Ok(()),
        }
    }
}

impl Decodable for PrivateTransferRequest {
    fn decode(reader: &mut Reader<'_>) -> Result<Self> {
        let vendor_id = u16::decode_context(0, reader)?;
        let service_number = u32::decode_context(1, reader)?;
        let parameters = if reader.next_is_context(2) {
            Some(PrivateParameters::Opaque(reader.read_enclosed(2)?.to_vec()))
        } else {
            None
        };
        Ok(Self {
            vendor_id,
            service_number,
            parameters,
        })
    }
}

/// ConfirmedPrivateTransfer-ACK
#[derive(Debug, Clone, PartialEq)]
pub struct PrivateTransferAck {
    pub vendor_id: u16,
    pub service_number: u32,
    pub result_block: Option<PrivateParameters>,
}

impl Encodable for PrivateTransferAck {
    fn encode(&self, buffer: &mut Vec<u8>) -> Result<()> {
        self.vendor_id.encode_context(0, buffer)?;
        self.service_number.encode_context(1, buffer)?;
        match &self.result_block {
            Some(block) => block.encode_enclosed(2, buffer),
            None => Ok(()),
        }
    }
}

impl Decodable for PrivateTransferAck {
    fn decode(reader: &mut Reader<'_>) -> Result<Self> {
        let request = PrivateTransferRequest::decode(reader)?;
        Ok(Self {
            vendor_id: request.vendor_id,
            service_number: request.service_number,
            result_block: request.parameters,
        })
    }
}
