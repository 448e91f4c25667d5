//! BACnet object identifiers and the object-related enumerations that
//! service payloads carry.
//!
//! Object and property storage belong to the application embedding the
//! stack; see [`crate::transport::ServiceHandler`]. This module only names
//! things on the wire.
//!
//! # Examples
//!
//! ```rust
//! use bacnet_stack::object::{ObjectIdentifier, ObjectType};
//!
//! let sensor = ObjectIdentifier::new(ObjectType::AnalogInput, 1);
//! assert_eq!(u32::try_from(sensor).unwrap(), 0x0000_0001);
//!
//! let device = ObjectIdentifier::from(0x0200_0457);
//! assert_eq!(device.object_type, ObjectType::Device);
//! assert_eq!(device.instance, 1111);
//! ```

use core::fmt;

use crate::encoding::{impl_enumerated, EncodingError};
use crate::generate_custom_enum;

/// Largest instance number (22 bits).
pub const MAX_INSTANCE: u32 = 0x3F_FFFF;

/// Instance number used as "any device" wildcard.
pub const WILDCARD_INSTANCE: u32 = MAX_INSTANCE;

generate_custom_enum!(
    /// BACnetObjectType
    ObjectType {
        AnalogInput = 0,
        AnalogOutput = 1,
        AnalogValue = 2,
        BinaryInput = 3,
        BinaryOutput = 4,
        BinaryValue = 5,
        Calendar = 6,
        Command = 7,
        Device = 8,
        EventEnrollment = 9,
        File = 10,
        Group = 11,
        Loop = 12,
        MultiStateInput = 13,
        MultiStateOutput = 14,
        NotificationClass = 15,
        Program = 16,
        Schedule = 17,
        Averaging = 18,
        MultiStateValue = 19,
        TrendLog = 20,
        LifeSafetyPoint = 21,
        LifeSafetyZone = 22,
        Accumulator = 23,
        PulseConverter = 24,
        EventLog = 25,
        GlobalGroup = 26,
        TrendLogMultiple = 27,
        LoadControl = 28,
        StructuredView = 29,
        AccessDoor = 30,
        Timer = 31,
        AccessCredential = 32,
        AccessPoint = 33,
        AccessRights = 34,
        AccessUser = 35,
        AccessZone = 36,
        CredentialDataInput = 37,
        NetworkSecurity = 38,
        BitstringValue = 39,
        CharacterstringValue = 40,
        DatePatternValue = 41,
        DateValue = 42,
        DatetimePatternValue = 43,
        DatetimeValue = 44,
        IntegerValue = 45,
        LargeAnalogValue = 46,
        OctetstringValue = 47,
        PositiveIntegerValue = 48,
        TimePatternValue = 49,
        TimeValue = 50,
        NotificationForwarder = 51,
        AlertEnrollment = 52,
        Channel = 53,
        LightingOutput = 54,
        BinaryLightingOutput = 55,
        NetworkPort = 56,
        ElevatorGroup = 57,
        Escalator = 58,
        Lift = 59,
        Staging = 60,
        AuditLog = 61,
        AuditReporter = 62,
        Color = 63,
        ColorTemperature = 64,
    },
    u16,
    128..=1023
);

generate_custom_enum!(
    /// BACnetPropertyIdentifier (commonly used subset; everything else
    /// decodes to `Custom`/`Reserved`).
    PropertyIdentifier {
        AckedTransitions = 0,
        AckRequired = 1,
        Action = 2,
        ActiveText = 4,
        AlarmValue = 6,
        ApduSegmentTimeout = 10,
        ApduTimeout = 11,
        ApplicationSoftwareVersion = 12,
        ChangeOfStateCount = 15,
        CovIncrement = 22,
        DatabaseRevision = 155,
        Deadband = 25,
        Description = 28,
        DeviceAddressBinding = 30,
        EventEnable = 35,
        EventState = 36,
        FirmwareRevision = 44,
        HighLimit = 45,
        InactiveText = 46,
        LocalDate = 56,
        LocalTime = 57,
        Location = 58,
        LowLimit = 59,
        MaxApduLengthAccepted = 62,
        MaxPresValue = 65,
        MinPresValue = 69,
        ModelName = 70,
        NotificationClass = 17,
        NumberOfApduRetries = 73,
        NumberOfStates = 74,
        ObjectIdentifier = 75,
        ObjectList = 76,
        ObjectName = 77,
        ObjectType = 79,
        OutOfService = 81,
        Polarity = 84,
        PresentValue = 85,
        PriorityArray = 87,
        ProtocolObjectTypesSupported = 96,
        ProtocolServicesSupported = 97,
        ProtocolVersion = 98,
        Reliability = 103,
        RelinquishDefault = 104,
        SegmentationSupported = 107,
        StateText = 110,
        StatusFlags = 111,
        SystemStatus = 112,
        TimeDelay = 113,
        Units = 117,
        VendorIdentifier = 120,
        VendorName = 121,
        ProtocolRevision = 139,
        MaxSegmentsAccepted = 167,
        PropertyList = 371,
    },
    u32,
    512..=4_194_303
);

generate_custom_enum!(
    /// BACnetEventState
    EventState {
        Normal = 0,
        Fault = 1,
        Offnormal = 2,
        HighLimit = 3,
        LowLimit = 4,
        LifeSafetyAlarm = 5,
    },
    u32,
    64..=65535
);

generate_custom_enum!(
    /// BACnetSegmentation
    Segmentation {
        Both = 0,
        Transmit = 1,
        Receive = 2,
        NoSegmentation = 3,
    },
    u32,
    0..0
);

impl Segmentation {
    /// Whether a device with this setting can send segmented messages.
    pub fn can_transmit(&self) -> bool {
        matches!(self, Segmentation::Both | Segmentation::Transmit)
    }

    /// Whether a device with this setting can accept segmented messages.
    pub fn can_receive(&self) -> bool {
        matches!(self, Segmentation::Both | Segmentation::Receive)
    }
}

impl_enumerated!(
    ObjectType => u16,
    PropertyIdentifier => u32,
    EventState => u32,
    Segmentation => u32,
);

/// Object identifier (type + instance number)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ObjectIdentifier {
    pub object_type: ObjectType,
    pub instance: u32,
}

impl ObjectIdentifier {
    pub fn new(object_type: ObjectType, instance: u32) -> Self {
        Self {
            object_type,
            instance,
        }
    }

    /// Check if instance number is valid (0-4194303)
    pub fn is_valid(&self) -> bool {
        self.instance <= MAX_INSTANCE && u16::from(self.object_type) <= 0x3FF
    }
}

impl fmt::Display for ObjectIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.object_type, self.instance)
    }
}

impl From<u32> for ObjectIdentifier {
    /// See clause 20.2.14.
    fn from(value: u32) -> Self {
        let object_type = ((value >> 22) & 0x3FF) as u16;
        Self::new(object_type.into(), value & MAX_INSTANCE)
    }
}

impl TryFrom<ObjectIdentifier> for u32 {
    type Error = EncodingError;

    fn try_from(value: ObjectIdentifier) -> Result<Self, Self::Error> {
        if !value.is_valid() {
            return Err(EncodingError::ValueOutOfRange("object identifier"));
        }
        let object_type: u16 = value.object_type.into();
        Ok(((object_type as u32) << 22) | value.instance)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_object_identifier_packing() {
        let id = ObjectIdentifier::new(ObjectType::Device, 123);
        assert_eq!(u32::try_from(id).unwrap(), 0x0200_007B);
        assert_eq!(ObjectIdentifier::from(0x0200_007B), id);
        assert!(id.is_valid());
    }

    #[test]
    fn test_object_identifier_limits() {
        let id = ObjectIdentifier::new(ObjectType::from(1023u16), MAX_INSTANCE);
        assert_eq!(u32::try_from(id).unwrap(), u32::MAX);
        assert!(u32::try_from(ObjectIdentifier::new(ObjectType::from(1024u16), 0)).is_err());
    }

    #[test]
    fn test_unknown_object_type_is_tolerated() {
        let id = ObjectIdentifier::from((600u32 << 22) | 5);
        match id.object_type {
            ObjectType::Custom(value) => assert_eq!(value.value(), 600),
            other => panic!("unexpected {other:?}"),
        }
        assert!(matches!(ObjectType::from(100u16), ObjectType::Reserved(_)));
        assert_eq!(id.to_string(), "(Custom(600), 5)");
    }

    #[test]
    fn test_segmentation_capabilities() {
        assert!(Segmentation::Both.can_transmit());
        assert!(Segmentation::Both.can_receive());
        assert!(!Segmentation::Receive.can_transmit());
        assert!(!Segmentation::NoSegmentation.can_receive());
    }

    #[test]
    fn test_event_state_values() {
        assert_eq!(u32::from(EventState::HighLimit), 3);
        assert!(matches!(EventState::from(70u32), EventState::Custom(_)));
        assert!(matches!(EventState::from(9u32), EventState::Reserved(_)));
    }
}
