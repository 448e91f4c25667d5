//! Change of value services.

use alloc::vec::Vec;

use crate::encoding::{
    encode_context_sequence_of, Decodable, Encodable, PropertyValue, Reader, Result,
};
use crate::object::{ObjectIdentifier, PropertyIdentifier};

/// SubscribeCOV-Request. A request without `issue_confirmed_notifications`
/// and `lifetime` cancels the subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SubscribeCovRequest {
    pub subscriber_process_identifier: u32,
    pub monitored_object_identifier: ObjectIdentifier,
    pub issue_confirmed_notifications: Option<bool>,
    /// Seconds; zero means indefinite.
    pub lifetime: Option<u32>,
}

impl SubscribeCovRequest {
    pub fn new(
        subscriber_process_identifier: u32,
        monitored_object_identifier: ObjectIdentifier,
        issue_confirmed_notifications: bool,
        lifetime: u32,
    ) -> Self {
        Self {
            subscriber_process_identifier,
            monitored_object_identifier,
            issue_confirmed_notifications: Some(issue_confirmed_notifications),
            lifetime: Some(lifetime),
        }
    }

    pub fn cancellation(
        subscriber_process_identifier: u32,
        monitored_object_identifier: ObjectIdentifier,
    ) -> Self {
        Self {
            subscriber_process_identifier,
            monitored_object_identifier,
            issue_confirmed_notifications: None,
            lifetime: None,
        }
    }

    pub fn is_cancellation(&self) -> bool {
        self.issue_confirmed_notifications.is_none() && self.lifetime.is_none()
    }
}

impl Encodable for SubscribeCovRequest {
    fn encode(&self, buffer: &mut Vec<u8>) -> Result<()> {
        self.subscriber_process_identifier.encode_context(0, buffer)?;
        self.monitored_object_identifier.encode_context(1, buffer)?;
        if let Some(confirmed) = self.issue_confirmed_notifications {
            confirmed.encode_context(2, buffer)?;
        }
        if let Some(lifetime) = self.lifetime {
            lifetime.encode_context(3, buffer)?;
        }
        Ok(())
    }
}

impl Decodable for SubscribeCovRequest {
    fn decode(reader: &mut Reader<'_>) -> Result<Self> {
        Ok(Self {
            subscriber_process_identifier: u32::decode_context(0, reader)?,
            monitored_object_identifier: ObjectIdentifier::decode_context(1, reader)?,
            issue_confirmed_notifications: reader.read_optional(2)?,
            lifetime: reader.read_optional(3)?,
        })
    }
}

/// BACnetPropertyValue: one entry of a notification's value list.
#[derive(Debug, Clone, PartialEq)]
pub struct PropertyValueEntry {
    pub property_identifier: PropertyIdentifier,
    pub property_array_index: Option<u32>,
    pub value: PropertyValue,
    pub priority: Option<u8>,
}

impl PropertyValueEntry {
    pub fn new(property_identifier: PropertyIdentifier, value: PropertyValue) -> Self {
        Self {
            property_identifier,
            property_array_index: None,
            value,
            priority: None,
        }
    }
}

impl Encodable for PropertyValueEntry {
    fn encode(&self, buffer: &mut Vec<u8>) -> Result<()> {
        self.property_identifier.encode_context(0, buffer)?;
        if let Some(index) = self.property_array_index {
            index.encode_context(1, buffer)?;
        }
        self.value.encode_context(2, buffer)?;
        if let Some(priority) = self.priority {
            priority.encode_context(3, buffer)?;
        }
        Ok(())
    }
}

impl Decodable for PropertyValueEntry {
    fn decode(reader: &mut Reader<'_>) -> Result<Self> {
        Ok(Self {
            property_identifier: PropertyIdentifier::decode_context(0, reader)?,
            property_array_index: reader.read_optional(1)?,
            value: PropertyValue::decode_context(2, reader)?,
            priority: reader.read_optional(3)?,
        })
    }
}

/// COVNotification-Request, shared by the confirmed and unconfirmed
/// services.
#[derive(Debug, Clone, PartialEq)]
pub struct CovNotificationRequest {
    pub subscriber_process_identifier: u32,
    pub initiating_device_identifier: ObjectIdentifier,
    pub monitored_object_identifier: ObjectIdentifier,
    /// Seconds left on the subscription.
    pub time_remaining: u32,
    pub list_of_values: Vec<PropertyValueEntry>,
}

impl Encodable for CovNotificationRequest {
    fn encode(&self, buffer: &mut Vec<u8>) -> Result<()> {
        self.subscriber_process_identifier.encode_context(0, buffer)?;
        self.initiating_device_identifier.encode_context(1, buffer)?;
        self.monitored_object_identifier.encode_context(2, buffer)?;
        self.time_remaining.encode_context(3, buffer)?;
        encode_context_sequence_of(buffer, 4, &self.list_of_values)
    }
}

impl Decodable for CovNotificationRequest {
    fn decode(reader: &mut Reader<'_>) -> Result<Self> {
        Ok(Self {
            subscriber_process_identifier: u32::decode_context(0, reader)?,
            initiating_device_identifier: ObjectIdentifier::decode_context(1, reader)?,
            monitored_object_identifier: ObjectIdentifier::decode_context(2, reader)?,
            time_remaining: u32::decode_context(3, reader)?,
            list_of_values: reader.read_context_sequence_of(4)?,
        })
    }
}
