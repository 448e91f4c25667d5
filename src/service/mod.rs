//! BACnet Application Layer Services
//!
//! Typed payloads for the services this crate understands, the closed
//! request/acknowledgement unions that carry them and the
//! [`ServiceRegistry`] deciding which decoder applies to a service choice.
//!
//! # Service Categories
//!
//! ## Alarm and Event Services
//! - **AcknowledgeAlarm**
//! - **ConfirmedCOVNotification** / **UnconfirmedCOVNotification**
//! - **SubscribeCOV**
//!
//! ## Object Access Services
//! - **ReadProperty**
//! - **ReadPropertyMultiple**
//! - **WriteProperty**
//!
//! ## Remote Device Management Services
//! - **DeviceCommunicationControl**
//! - **ReinitializeDevice**
//! - **ConfirmedPrivateTransfer** / **UnconfirmedPrivateTransfer**
//! - **TimeSynchronization** / **UTCTimeSynchronization**
//!
//! ## Remote Device Discovery
//! - **Who-Is** / **I-Am**
//! - **Who-Has** / **I-Have**
//!
//! Any other service travels as opaque service data in the `Other` arms.
//!
//! # Examples
//!
//! ```rust
//! use bacnet_stack::object::{ObjectIdentifier, ObjectType, PropertyIdentifier};
//! use bacnet_stack::service::{ConfirmedServiceRequest, ReadPropertyRequest, ServiceRegistry};
//!
//! let request = ConfirmedServiceRequest::ReadProperty(ReadPropertyRequest::new(
//!     ObjectIdentifier::new(ObjectType::AnalogInput, 1),
//!     PropertyIdentifier::PresentValue,
//! ));
//! let data = request.to_bytes().unwrap();
//!
//! let registry = ServiceRegistry::standard();
//! let decoded = registry.decode_confirmed(request.service_choice(), &data).unwrap();
//! assert_eq!(decoded, request);
//! ```

use alloc::vec::Vec;

use bytes::Bytes;

use crate::encoding::{impl_enumerated, Decodable, Encodable, EncodingError, Reader};
use crate::generate_custom_enum;

pub mod alarm;
pub mod cov;
pub mod device;
pub mod private;
pub mod property;
pub mod registry;

pub use alarm::{AcknowledgeAlarmRequest, DateTime, TimeStamp};
pub use cov::{CovNotificationRequest, PropertyValueEntry, SubscribeCovRequest};
pub use device::{
    DeviceCommunicationControlRequest, EnableDisable, IAmRequest, IHaveRequest, ObjectSelector,
    ReinitializeDeviceRequest, ReinitializedState, TimeSynchronizationRequest, WhoHasRequest,
    WhoIsRequest,
};
pub use private::{
    FieldKind, PrivateParameters, PrivateTransferAck, PrivateTransferRequest, VendorField,
    VendorParameter, VendorSchema,
};
pub use property::{
    PropertyReference, ReadAccessResult, ReadAccessSpecification, ReadPropertyAck,
    ReadPropertyMultipleAck, ReadPropertyMultipleRequest, ReadPropertyRequest, ReadResult,
    ReadResultElement, WritePropertyRequest, ARRAY_ALL,
};
pub use registry::ServiceRegistry;

generate_custom_enum!(
    /// BACnetConfirmedServiceChoice
    ConfirmedServiceChoice {
        AcknowledgeAlarm = 0,
        ConfirmedCovNotification = 1,
        ConfirmedEventNotification = 2,
        GetAlarmSummary = 3,
        GetEnrollmentSummary = 4,
        SubscribeCov = 5,
        AtomicReadFile = 6,
        AtomicWriteFile = 7,
        AddListElement = 8,
        RemoveListElement = 9,
        CreateObject = 10,
        DeleteObject = 11,
        ReadProperty = 12,
        ReadPropertyConditional = 13,
        ReadPropertyMultiple = 14,
        WriteProperty = 15,
        WritePropertyMultiple = 16,
        DeviceCommunicationControl = 17,
        ConfirmedPrivateTransfer = 18,
        ConfirmedTextMessage = 19,
        ReinitializeDevice = 20,
        VtOpen = 21,
        VtClose = 22,
        VtData = 23,
        Authenticate = 24,
        RequestKey = 25,
        ReadRange = 26,
        LifeSafetyOperation = 27,
        SubscribeCovProperty = 28,
        GetEventInformation = 29,
        SubscribeCovPropertyMultiple = 30,
        ConfirmedCovNotificationMultiple = 31,
        ConfirmedAuditNotification = 32,
        AuditLogQuery = 33,
        AuthRequest = 34,
    },
    u8,
    0..0
);

generate_custom_enum!(
    /// BACnetUnconfirmedServiceChoice
    UnconfirmedServiceChoice {
        IAm = 0,
        IHave = 1,
        UnconfirmedCovNotification = 2,
        UnconfirmedEventNotification = 3,
        UnconfirmedPrivateTransfer = 4,
        UnconfirmedTextMessage = 5,
        TimeSynchronization = 6,
        WhoHas = 7,
        WhoIs = 8,
        UtcTimeSynchronization = 9,
        WriteGroup = 10,
        UnconfirmedCovNotificationMultiple = 11,
        UnconfirmedAuditNotification = 12,
        WhoAmI = 13,
        YouAre = 14,
    },
    u8,
    0..0
);

generate_custom_enum!(
    /// BACnetRejectReason
    RejectReason {
        Other = 0,
        BufferOverflow = 1,
        InconsistentParameters = 2,
        InvalidParameterDataType = 3,
        InvalidTag = 4,
        MissingRequiredParameter = 5,
        ParameterOutOfRange = 6,
        TooManyArguments = 7,
        UndefinedEnumeration = 8,
        UnrecognizedService = 9,
    },
    u8,
    64..=255
);

generate_custom_enum!(
    /// BACnetAbortReason
    AbortReason {
        Other = 0,
        BufferOverflow = 1,
        InvalidApduInThisState = 2,
        PreemptedByHigherPriorityTask = 3,
        SegmentationNotSupported = 4,
        SecurityError = 5,
        InsufficientSecurity = 6,
        WindowSizeOutOfRange = 7,
        ApplicationExceededReplyTime = 8,
        OutOfResources = 9,
        TsmTimeout = 10,
        ApduTooLong = 11,
    },
    u8,
    64..=255
);

generate_custom_enum!(
    /// Error class of an Error PDU
    ErrorClass {
        Device = 0,
        Object = 1,
        Property = 2,
        Resources = 3,
        Security = 4,
        Services = 5,
        Vt = 6,
        Communication = 7,
    },
    u16,
    64..=65535
);

generate_custom_enum!(
    /// Error code of an Error PDU
    ErrorCode {
        Other = 0,
        AuthenticationFailed = 1,
        ConfigurationInProgress = 2,
        DeviceBusy = 3,
        DynamicCreationNotSupported = 4,
        FileAccessDenied = 5,
        IncompatibleSecurityLevels = 6,
        InconsistentParameters = 7,
        InconsistentSelectionCriterion = 8,
        InvalidDataType = 9,
        InvalidFileAccessMethod = 10,
        InvalidFileStartPosition = 11,
        InvalidOperatorName = 12,
        InvalidParameterDataType = 13,
        InvalidTimeStamp = 14,
        KeyGenerationError = 15,
        MissingRequiredParameter = 16,
        NoObjectsOfSpecifiedType = 17,
        NoSpaceForObject = 18,
        NoSpaceToAddListElement = 19,
        NoSpaceToWriteProperty = 20,
        NoVtSessionsAvailable = 21,
        PropertyIsNotAList = 22,
        ObjectDeletionNotPermitted = 23,
        ObjectIdentifierAlreadyExists = 24,
        OperationalProblem = 25,
        PasswordFailure = 26,
        ReadAccessDenied = 27,
        SecurityNotSupported = 28,
        ServiceRequestDenied = 29,
        Timeout = 30,
        UnknownObject = 31,
        UnknownProperty = 32,
        UnknownVtClass = 34,
        UnknownVtSession = 35,
        UnsupportedObjectType = 36,
        ValueOutOfRange = 37,
        VtSessionAlreadyClosed = 38,
        VtSessionTerminationFailure = 39,
        WriteAccessDenied = 40,
        CharacterSetNotSupported = 41,
        InvalidArrayIndex = 42,
        CovSubscriptionFailed = 43,
        NotCovProperty = 44,
        OptionalFunctionalityNotSupported = 45,
        InvalidConfigurationData = 46,
        DatatypeNotSupported = 47,
        DuplicateName = 48,
        DuplicateObjectId = 49,
        PropertyIsNotAnArray = 50,
        CommunicationDisabled = 83,
    },
    u16,
    256..=65535
);

impl_enumerated!(ErrorClass => u16, ErrorCode => u16);

/// The (class, code) pair reported by a failed service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct BacnetError {
    pub error_class: ErrorClass,
    pub error_code: ErrorCode,
}

impl BacnetError {
    pub fn new(error_class: ErrorClass, error_code: ErrorCode) -> Self {
        Self {
            error_class,
            error_code,
        }
    }
}

impl Encodable for BacnetError {
    fn encode(&self, buffer: &mut Vec<u8>) -> crate::encoding::Result<()> {
        self.error_class.encode(buffer)?;
        self.error_code.encode(buffer)
    }
}

impl Decodable for BacnetError {
    fn decode(reader: &mut Reader<'_>) -> crate::encoding::Result<Self> {
        Ok(Self::new(ErrorClass::decode(reader)?, ErrorCode::decode(reader)?))
    }
}

/// Result type for service handlers
pub type Result<T> = core::result::Result<T, ServiceError>;

/// Failure outcome of a service, answered with an Error, Reject or Abort
/// PDU.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ServiceError {
    #[error("service error: class {class}, code {code}")]
    Error { class: ErrorClass, code: ErrorCode },
    #[error("service rejected: {0}")]
    Reject(RejectReason),
    #[error("service aborted: {0}")]
    Abort(AbortReason),
}

impl ServiceError {
    pub fn error(class: ErrorClass, code: ErrorCode) -> Self {
        ServiceError::Error { class, code }
    }
}

impl From<BacnetError> for ServiceError {
    fn from(error: BacnetError) -> Self {
        ServiceError::error(error.error_class, error.error_code)
    }
}

impl From<&EncodingError> for RejectReason {
    /// Reject reason for a request whose service data failed to decode.
    fn from(error: &EncodingError) -> Self {
        match error {
            EncodingError::UnexpectedEndOfData { .. }
            | EncodingError::ExpectedContextTag { found: None, .. }
            | EncodingError::ExpectedOpeningTag { found: None, .. } => {
                RejectReason::MissingRequiredParameter
            }
            EncodingError::ExpectedApplicationTag { .. } => RejectReason::InvalidParameterDataType,
            EncodingError::ExpectedContextTag { .. }
            | EncodingError::ExpectedOpeningTag { .. }
            | EncodingError::ExpectedClosingTag { .. }
            | EncodingError::LengthExceedsBuffer { .. } => RejectReason::InvalidTag,
            EncodingError::ValueOutOfRange(_) => RejectReason::ParameterOutOfRange,
            EncodingError::TrailingData { .. } => RejectReason::TooManyArguments,
            EncodingError::InvalidLength { .. } | EncodingError::InvalidFormat(_) => {
                RejectReason::Other
            }
        }
    }
}

/// A decoded confirmed service request.
#[derive(Debug, Clone, PartialEq)]
pub enum ConfirmedServiceRequest {
    AcknowledgeAlarm(AcknowledgeAlarmRequest),
    ConfirmedCovNotification(CovNotificationRequest),
    SubscribeCov(SubscribeCovRequest),
    ReadProperty(ReadPropertyRequest),
    ReadPropertyMultiple(ReadPropertyMultipleRequest),
    WriteProperty(WritePropertyRequest),
    DeviceCommunicationControl(DeviceCommunicationControlRequest),
    ReinitializeDevice(ReinitializeDeviceRequest),
    ConfirmedPrivateTransfer(PrivateTransferRequest),
    /// A service without a typed payload; `data` is the raw service data.
    Other {
        service_choice: ConfirmedServiceChoice,
        data: Bytes,
    },
}

impl ConfirmedServiceRequest {
    pub fn service_choice(&self) -> ConfirmedServiceChoice {
        match self {
            Self::AcknowledgeAlarm(_) => ConfirmedServiceChoice::AcknowledgeAlarm,
            Self::ConfirmedCovNotification(_) => ConfirmedServiceChoice::ConfirmedCovNotification,
            Self::SubscribeCov(_) => ConfirmedServiceChoice::SubscribeCov,
            Self::ReadProperty(_) => ConfirmedServiceChoice::ReadProperty,
            Self::ReadPropertyMultiple(_) => ConfirmedServiceChoice::ReadPropertyMultiple,
            Self::WriteProperty(_) => ConfirmedServiceChoice::WriteProperty,
            Self::DeviceCommunicationControl(_) => {
                ConfirmedServiceChoice::DeviceCommunicationControl
            }
            Self::ReinitializeDevice(_) => ConfirmedServiceChoice::ReinitializeDevice,
            Self::ConfirmedPrivateTransfer(_) => ConfirmedServiceChoice::ConfirmedPrivateTransfer,
            Self::Other { service_choice, .. } => *service_choice,
        }
    }

    /// Encoded service data.
    pub fn to_bytes(&self) -> crate::encoding::Result<Bytes> {
        let mut buffer = Vec::new();
        self.encode(&mut buffer)?;
        Ok(buffer.into())
    }
}

impl Encodable for ConfirmedServiceRequest {
    fn encode(&self, buffer: &mut Vec<u8>) -> crate::encoding::Result<()> {
        match self {
            Self::AcknowledgeAlarm(request) => request.encode(buffer),
            Self::ConfirmedCovNotification(request) => request.encode(buffer),
            Self::SubscribeCov(request) => request.encode(buffer),
            Self::ReadProperty(request) => request.encode(buffer),
            Self::ReadPropertyMultiple(request) => request.encode(buffer),
            Self::WriteProperty(request) => request.encode(buffer),
            Self::DeviceCommunicationControl(request) => request.encode(buffer),
            Self::ReinitializeDevice(request) => request.encode(buffer),
            Self::ConfirmedPrivateTransfer(request) => request.encode(buffer),
            Self::Other { data, .. } => {
                buffer.extend_from_slice(data);
                Ok(())
            }
        }
    }
}

/// The payload of a ComplexACK.
#[derive(Debug, Clone, PartialEq)]
pub enum ConfirmedServiceAck {
    ReadProperty(ReadPropertyAck),
    ReadPropertyMultiple(ReadPropertyMultipleAck),
    ConfirmedPrivateTransfer(PrivateTransferAck),
    Other {
        service_choice: ConfirmedServiceChoice,
        data: Bytes,
    },
}

impl ConfirmedServiceAck {
    pub fn service_choice(&self) -> ConfirmedServiceChoice {
        match self {
            Self::ReadProperty(_) => ConfirmedServiceChoice::ReadProperty,
            Self::ReadPropertyMultiple(_) => ConfirmedServiceChoice::ReadPropertyMultiple,
            Self::ConfirmedPrivateTransfer(_) => ConfirmedServiceChoice::ConfirmedPrivateTransfer,
            Self::Other { service_choice, .. } => *service_choice,
        }
    }

    pub fn to_bytes(&self) -> crate::encoding::Result<Bytes> {
        let mut buffer = Vec::new();
        self.encode(&mut buffer)?;
        Ok(buffer.into())
    }
}

impl Encodable for ConfirmedServiceAck {
    fn encode(&self, buffer: &mut Vec<u8>) -> crate::encoding::Result<()> {
        match self {
            Self::ReadProperty(ack) => ack.encode(buffer),
            Self::ReadPropertyMultiple(ack) => ack.encode(buffer),
            Self::ConfirmedPrivateTransfer(ack) => ack.encode(buffer),
            Self::Other { data, .. } => {
                buffer.extend_from_slice(data);
                Ok(())
            }
        }
    }
}

/// A decoded unconfirmed service request.
#[derive(Debug, Clone, PartialEq)]
pub enum UnconfirmedServiceRequest {
    WhoIs(WhoIsRequest),
    IAm(IAmRequest),
    WhoHas(WhoHasRequest),
    IHave(IHaveRequest),
    UnconfirmedCovNotification(CovNotificationRequest),
    UnconfirmedPrivateTransfer(PrivateTransferRequest),
    TimeSynchronization(TimeSynchronizationRequest),
    UtcTimeSynchronization(TimeSynchronizationRequest),
    Other {
        service_choice: UnconfirmedServiceChoice,
        data: Bytes,
    },
}

impl UnconfirmedServiceRequest {
    pub fn service_choice(&self) -> UnconfirmedServiceChoice {
        match self {
            Self::WhoIs(_) => UnconfirmedServiceChoice::WhoIs,
            Self::IAm(_) => UnconfirmedServiceChoice::IAm,
            Self::WhoHas(_) => UnconfirmedServiceChoice::WhoHas,
            Self::IHave(_) => UnconfirmedServiceChoice::IHave,
            Self::UnconfirmedCovNotification(_) => {
                UnconfirmedServiceChoice::UnconfirmedCovNotification
            }
            Self::UnconfirmedPrivateTransfer(_) => {
                UnconfirmedServiceChoice::UnconfirmedPrivateTransfer
            }
            Self::TimeSynchronization(_) => UnconfirmedServiceChoice::TimeSynchronization,
            Self::UtcTimeSynchronization(_) => UnconfirmedServiceChoice::UtcTimeSynchronization,
            Self::Other { service_choice, .. } => *service_choice,
        }
    }

    pub fn to_bytes(&self) -> crate::encoding::Result<Bytes> {
        let mut buffer = Vec::new();
        self.encode(&mut buffer)?;
        Ok(buffer.into())
    }
}

impl Encodable for UnconfirmedServiceRequest {
    fn encode(&self, buffer: &mut Vec<u8>) -> crate::encoding::Result<()> {
        match self {
            Self::WhoIs(request) => request.encode(buffer),
            Self::IAm(request) => request.encode(buffer),
            Self::WhoHas(request) => request.encode(buffer),
            Self::IHave(request) => request.encode(buffer),
            Self::UnconfirmedCovNotification(request) => request.encode(buffer),
            Self::UnconfirmedPrivateTransfer(request) => request.encode(buffer),
            Self::TimeSynchronization(request) => request.encode(buffer),
            Self::UtcTimeSynchronization(request) => request.encode(buffer),
            Self::Other { data, .. } => {
                buffer.extend_from_slice(data);
                Ok(())
            }
        }
    }
}
