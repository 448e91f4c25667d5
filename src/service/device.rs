//! Remote device management and discovery services.

use alloc::vec::Vec;

use crate::encoding::{
    impl_enumerated, CharacterString, Decodable, Encodable, EncodingError, Reader, Result, Tag,
};
use crate::generate_custom_enum;
use crate::object::{ObjectIdentifier, Segmentation, MAX_INSTANCE};

use super::alarm::DateTime;

/// Who-Is request. Without limits every device answers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct WhoIsRequest {
    /// Inclusive device instance range.
    pub limits: Option<(u32, u32)>,
}

impl WhoIsRequest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn for_device(instance: u32) -> Self {
        Self::for_range(instance, instance)
    }

    pub fn for_range(low: u32, high: u32) -> Self {
        Self {
            limits: Some((low, high)),
        }
    }

    /// Check if a device instance should answer this request
    pub fn matches(&self, instance: u32) -> bool {
        match self.limits {
            Some((low, high)) => (low..=high).contains(&instance),
            None => true,
        }
    }
}

impl Encodable for WhoIsRequest {
    fn encode(&self, buffer: &mut Vec<u8>) -> Result<()> {
        if let Some((low, high)) = self.limits {
            low.encode_context(0, buffer)?;
            high.encode_context(1, buffer)?;
        }
        Ok(())
    }
}

impl Decodable for WhoIsRequest {
    fn decode(reader: &mut Reader<'_>) -> Result<Self> {
        let limits = decode_limits(reader)?;
        Ok(Self { limits })
    }
}

/// Both instance limits or neither.
fn decode_limits(reader: &mut Reader<'_>) -> Result<Option<(u32, u32)>> {
    match reader.read_optional::<u32>(0)? {
        Some(low) => {
            let high = u32::decode_context(1, reader)?;
            if low > MAX_INSTANCE || high > MAX_INSTANCE {
                return Err(EncodingError::ValueOutOfRange("device instance limit"));
            }
            Ok(Some((low, high)))
        }
        None => Ok(None),
    }
}

/// I-Am request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct IAmRequest {
    pub device_identifier: ObjectIdentifier,
    pub max_apdu_length_accepted: u32,
    pub segmentation_supported: Segmentation,
    pub vendor_identifier: u16,
}

impl IAmRequest {
    pub fn new(
        device_identifier: ObjectIdentifier,
        max_apdu_length_accepted: u32,
        segmentation_supported: Segmentation,
        vendor_identifier: u16,
    ) -> Self {
        Self {
            device_identifier,
            max_apdu_length_accepted,
            segmentation_supported,
            vendor_identifier,
        }
    }
}

impl Encodable for IAmRequest {
    fn encode(&self, buffer: &mut Vec<u8>) -> Result<()> {
        self.device_identifier.encode(buffer)?;
        self.max_apdu_length_accepted.encode(buffer)?;
        self.segmentation_supported.encode(buffer)?;
        self.vendor_identifier.encode(buffer)
    }
}

impl Decodable for IAmRequest {
    fn decode(reader: &mut Reader<'_>) -> Result<Self> {
        Ok(Self {
            device_identifier: ObjectIdentifier::decode(reader)?,
            max_apdu_length_accepted: u32::decode(reader)?,
            segmentation_supported: Segmentation::decode(reader)?,
            vendor_identifier: u16::decode(reader)?,
        })
    }
}

/// The object a Who-Has request looks for.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ObjectSelector {
    Identifier(ObjectIdentifier),
    Name(CharacterString),
}

/// Who-Has request
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct WhoHasRequest {
    pub limits: Option<(u32, u32)>,
    pub object: ObjectSelector,
}

impl Encodable for WhoHasRequest {
    fn encode(&self, buffer: &mut Vec<u8>) -> Result<()> {
        if let Some((low, high)) = self.limits {
            low.encode_context(0, buffer)?;
            high.encode_context(1, buffer)?;
        }
        match &self.object {
            ObjectSelector::Identifier(id) => id.encode_context(2, buffer),
            ObjectSelector::Name(name) => name.encode_context(3, buffer),
        }
    }
}

impl Decodable for WhoHasRequest {
    fn decode(reader: &mut Reader<'_>) -> Result<Self> {
        let limits = decode_limits(reader)?;
        let object = match reader.peek_tag()? {
            Some(Tag::Context { number: 2, .. }) => {
                ObjectSelector::Identifier(ObjectIdentifier::decode_context(2, reader)?)
            }
            Some(Tag::Context { number: 3, .. }) => {
                ObjectSelector::Name(CharacterString::decode_context(3, reader)?)
            }
            found => return Err(EncodingError::ExpectedContextTag { expected: 2, found }),
        };
        Ok(Self { limits, object })
    }
}

/// I-Have request
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct IHaveRequest {
    pub device_identifier: ObjectIdentifier,
    pub object_identifier: ObjectIdentifier,
    pub object_name: CharacterString,
}

impl Encodable for IHaveRequest {
    fn encode(&self, buffer: &mut Vec<u8>) -> Result<()> {
        self.device_identifier.encode(buffer)?;
        self.object_identifier.encode(buffer)?;
        self.object_name.encode(buffer)
    }
}

impl Decodable for IHaveRequest {
    fn decode(reader: &mut Reader<'_>) -> Result<Self> {
        Ok(Self {
            device_identifier: ObjectIdentifier::decode(reader)?,
            object_identifier: ObjectIdentifier::decode(reader)?,
            object_name: CharacterString::decode(reader)?,
        })
    }
}

generate_custom_enum!(
    /// `enable-disable` of DeviceCommunicationControl
    EnableDisable {
        Enable = 0,
        Disable = 1,
        DisableInitiation = 2,
    },
    u32,
    0..0
);

generate_custom_enum!(
    /// `reinitializedStateOfDevice` of ReinitializeDevice
    ReinitializedState {
        Coldstart = 0,
        Warmstart = 1,
        StartBackup = 2,
        EndBackup = 3,
        StartRestore = 4,
        EndRestore = 5,
        AbortRestore = 6,
        ActivateChanges = 7,
    },
    u32,
    0..0
);

impl_enumerated!(EnableDisable => u32, ReinitializedState => u32);

/// DeviceCommunicationControl-Request
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DeviceCommunicationControlRequest {
    /// Minutes; absent means until further notice.
    pub time_duration: Option<u16>,
    pub enable_disable: EnableDisable,
    pub password: Option<CharacterString>,
}

impl Encodable for DeviceCommunicationControlRequest {
    fn encode(&self, buffer: &mut Vec<u8>) -> Result<()> {
        if let Some(duration) = self.time_duration {
            duration.encode_context(0, buffer)?;
        }
        self.enable_disable.encode_context(1, buffer)?;
        if let Some(password) = &self.password {
            password.encode_context(2, buffer)?;
        }
        Ok(())
    }
}

impl Decodable for DeviceCommunicationControlRequest {
    fn decode(reader: &mut Reader<'_>) -> Result<Self> {
        Ok(Self {
            time_duration: reader.read_optional(0)?,
            enable_disable: EnableDisable::decode_context(1, reader)?,
            password: reader.read_optional(2)?,
        })
    }
}

/// ReinitializeDevice-Request
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ReinitializeDeviceRequest {
    pub reinitialized_state: ReinitializedState,
    pub password: Option<CharacterString>,
}

impl Encodable for ReinitializeDeviceRequest {
    fn encode(&self, buffer: &mut Vec<u8>) -> Result<()> {
        self.reinitialized_state.encode_context(0, buffer)?;
        if let Some(password) = &self.password {
            password.encode_context(1, buffer)?;
        }
        Ok(())
    }
}

impl Decodable for ReinitializeDeviceRequest {
    fn decode(reader: &mut Reader<'_>) -> Result<Self> {
        Ok(Self {
            reinitialized_state: ReinitializedState::decode_context(0, reader)?,
            password: reader.read_optional(1)?,
        })
    }
}

/// TimeSynchronization and UTCTimeSynchronization request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TimeSynchronizationRequest {
    pub date_time: DateTime,
}

impl TimeSynchronizationRequest {
    pub fn new(date_time: DateTime) -> Self {
        Self { date_time }
    }

    /// Create Time Synchronization request with current local time
    #[cfg(feature = "std")]
    pub fn now() -> Result<Self> {
        DateTime::now().map(Self::new)
    }

    /// Create Time Synchronization request with current UTC time
    #[cfg(feature = "std")]
    pub fn now_utc() -> Result<Self> {
        DateTime::now_utc().map(Self::new)
    }
}

impl Encodable for TimeSynchronizationRequest {
    fn encode(&self, buffer: &mut Vec<u8>) -> Result<()> {
        self.date_time.encode(buffer)
    }
}

impl Decodable for TimeSynchronizationRequest {
    fn decode(reader: &mut Reader<'_>) -> Result<Self> {
        DateTime::decode(reader).map(Self::new)
    }
}
