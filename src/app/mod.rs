//! BACnet Application Layer Module
//!
//! Application Protocol Data Units (clause 20.1) and the segmentation
//! helpers used to move service payloads larger than one APDU.
//!
//! # APDU Types
//!
//! - Confirmed Request PDU
//! - Unconfirmed Request PDU
//! - SimpleACK PDU
//! - ComplexACK PDU
//! - SegmentACK PDU
//! - Error PDU
//! - Reject PDU
//! - Abort PDU
//!
//! # Example
//!
//! ```rust
//! use bacnet_stack::app::{Apdu, UnconfirmedRequest};
//! use bacnet_stack::service::UnconfirmedServiceChoice;
//!
//! let apdu = Apdu::UnconfirmedRequest(UnconfirmedRequest {
//!     service_choice: UnconfirmedServiceChoice::WhoIs,
//!     service_data: Default::default(),
//! });
//! assert_eq!(apdu.encode(), vec![0x10, 0x08]);
//! ```

use alloc::vec::Vec;

use bitflags::bitflags;
use bytes::Bytes;

use crate::encoding::{Decodable, Encodable, EncodingError, Enumerated, Reader, Tag};
use crate::service::{
    AbortReason, ConfirmedServiceChoice, ErrorClass, ErrorCode, RejectReason, ServiceRegistry,
    UnconfirmedServiceChoice,
};

pub mod segmentation;

pub use segmentation::{
    clamp_window, split_segments, SegmentReassembly, SegmentVerdict, SegmentWindow, WindowAdvance,
    MAX_SEGMENTS, MAX_WINDOW_SIZE,
};

/// Result type for application layer operations
pub type Result<T> = core::result::Result<T, ApplicationError>;

/// Errors that can occur in application layer operations
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ApplicationError {
    #[error("APDU truncated: {pdu} needs {needed} bytes, got {actual}")]
    Truncated {
        pdu: ApduType,
        needed: usize,
        actual: usize,
    },
    #[error("empty APDU")]
    Empty,
    #[error("unknown PDU type {0}")]
    UnknownPduType(u8),
    #[error("invalid APDU: {0}")]
    InvalidApdu(&'static str),
    #[error("request {invoke_id} rejected: {reason}")]
    Rejected { invoke_id: u8, reason: RejectReason },
    #[error(transparent)]
    Encoding(#[from] EncodingError),
}

/// APDU types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ApduType {
    ConfirmedRequest = 0,
    UnconfirmedRequest = 1,
    SimpleAck = 2,
    ComplexAck = 3,
    SegmentAck = 4,
    Error = 5,
    Reject = 6,
    Abort = 7,
}

impl TryFrom<u8> for ApduType {
    type Error = ApplicationError;

    fn try_from(value: u8) -> Result<Self> {
        Ok(match value {
            0 => ApduType::ConfirmedRequest,
            1 => ApduType::UnconfirmedRequest,
            2 => ApduType::SimpleAck,
            3 => ApduType::ComplexAck,
            4 => ApduType::SegmentAck,
            5 => ApduType::Error,
            6 => ApduType::Reject,
            7 => ApduType::Abort,
            other => return Err(ApplicationError::UnknownPduType(other)),
        })
    }
}

impl core::fmt::Display for ApduType {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Debug::fmt(self, f)
    }
}

bitflags! {
    /// Control bits in the low nibble of the first APDU octet. The meaning
    /// of a bit depends on the PDU type, hence the aliases.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct PduFlags: u8 {
        const SEGMENTED = 0x08;
        const MORE_FOLLOWS = 0x04;
        const SEGMENTED_RESPONSE_ACCEPTED = 0x02;
        const NEGATIVE_ACK = 0x02;
        const SERVER = 0x01;
    }
}

/// Maximum segments that can be accepted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum MaxSegments {
    Unspecified = 0,
    Two = 1,
    Four = 2,
    Eight = 3,
    Sixteen = 4,
    ThirtyTwo = 5,
    SixtyFour = 6,
    GreaterThan64 = 7,
}

impl MaxSegments {
    pub fn from_code(code: u8) -> Self {
        match code & 0x07 {
            0 => MaxSegments::Unspecified,
            1 => MaxSegments::Two,
            2 => MaxSegments::Four,
            3 => MaxSegments::Eight,
            4 => MaxSegments::Sixteen,
            5 => MaxSegments::ThirtyTwo,
            6 => MaxSegments::SixtyFour,
            _ => MaxSegments::GreaterThan64,
        }
    }

    /// Number of segments this value allows a sender to use. Unspecified
    /// and "more than 64" are bounded only by the 8 bit sequence number.
    pub fn limit(&self) -> usize {
        match self {
            MaxSegments::Two => 2,
            MaxSegments::Four => 4,
            MaxSegments::Eight => 8,
            MaxSegments::Sixteen => 16,
            MaxSegments::ThirtyTwo => 32,
            MaxSegments::SixtyFour => 64,
            MaxSegments::Unspecified | MaxSegments::GreaterThan64 => 256,
        }
    }
}

/// Maximum APDU size that can be accepted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum MaxApduSize {
    Up50 = 0,
    Up128 = 1,
    Up206 = 2,
    Up480 = 3,
    Up1024 = 4,
    Up1476 = 5,
}

impl MaxApduSize {
    /// Get the actual size in bytes
    pub fn size(&self) -> usize {
        match self {
            MaxApduSize::Up50 => 50,
            MaxApduSize::Up128 => 128,
            MaxApduSize::Up206 => 206,
            MaxApduSize::Up480 => 480,
            MaxApduSize::Up1024 => 1024,
            MaxApduSize::Up1476 => 1476,
        }
    }

    /// Reserved codes fall back to the smallest size.
    pub fn from_code(code: u8) -> Self {
        match code & 0x0F {
            1 => MaxApduSize::Up128,
            2 => MaxApduSize::Up206,
            3 => MaxApduSize::Up480,
            4 => MaxApduSize::Up1024,
            5 => MaxApduSize::Up1476,
            _ => MaxApduSize::Up50,
        }
    }

    /// Largest code not exceeding `size` octets.
    pub fn from_size(size: usize) -> Self {
        [
            MaxApduSize::Up1476,
            MaxApduSize::Up1024,
            MaxApduSize::Up480,
            MaxApduSize::Up206,
            MaxApduSize::Up128,
        ]
        .into_iter()
        .find(|code| code.size() <= size)
        .unwrap_or(MaxApduSize::Up50)
    }
}

/// Header octets of an unsegmented confirmed request.
pub const CONFIRMED_REQUEST_HEADER: usize = 4;
/// Header octets of a segmented confirmed request.
pub const SEGMENTED_REQUEST_HEADER: usize = 6;
/// Header octets of an unsegmented ComplexACK.
pub const COMPLEX_ACK_HEADER: usize = 3;
/// Header octets of a segmented ComplexACK.
pub const SEGMENTED_COMPLEX_ACK_HEADER: usize = 5;

/// Segmentation control of one segment of a segmented message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SegmentHeader {
    pub sequence_number: u8,
    pub proposed_window_size: u8,
    pub more_follows: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfirmedRequest {
    /// Present only on segments of a segmented request.
    pub segment: Option<SegmentHeader>,
    pub segmented_response_accepted: bool,
    pub max_segments: MaxSegments,
    pub max_apdu: MaxApduSize,
    pub invoke_id: u8,
    pub service_choice: ConfirmedServiceChoice,
    pub service_data: Bytes,
}

impl ConfirmedRequest {
    pub fn is_segmented(&self) -> bool {
        self.segment.is_some()
    }

    pub fn more_follows(&self) -> bool {
        self.segment.is_some_and(|s| s.more_follows)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnconfirmedRequest {
    pub service_choice: UnconfirmedServiceChoice,
    pub service_data: Bytes,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SimpleAck {
    pub invoke_id: u8,
    pub service_choice: ConfirmedServiceChoice,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComplexAck {
    pub segment: Option<SegmentHeader>,
    pub invoke_id: u8,
    pub service_choice: ConfirmedServiceChoice,
    pub service_data: Bytes,
}

impl ComplexAck {
    pub fn is_segmented(&self) -> bool {
        self.segment.is_some()
    }

    pub fn more_follows(&self) -> bool {
        self.segment.is_some_and(|s| s.more_follows)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentAck {
    pub negative: bool,
    /// Set when the acknowledging side is the server of the transaction.
    pub server: bool,
    pub invoke_id: u8,
    pub sequence_number: u8,
    pub actual_window_size: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ErrorPdu {
    pub invoke_id: u8,
    pub service_choice: ConfirmedServiceChoice,
    pub error_class: ErrorClass,
    pub error_code: ErrorCode,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RejectPdu {
    pub invoke_id: u8,
    pub reason: RejectReason,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AbortPdu {
    /// Set when the server of the transaction sent the abort.
    pub server: bool,
    pub invoke_id: u8,
    pub reason: AbortReason,
}

/// Application Protocol Data Unit
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Apdu {
    ConfirmedRequest(ConfirmedRequest),
    UnconfirmedRequest(UnconfirmedRequest),
    SimpleAck(SimpleAck),
    ComplexAck(ComplexAck),
    SegmentAck(SegmentAck),
    Error(ErrorPdu),
    Reject(RejectPdu),
    Abort(AbortPdu),
}

fn truncated(pdu: ApduType, needed: usize, actual: usize) -> ApplicationError {
    ApplicationError::Truncated {
        pdu,
        needed,
        actual,
    }
}

fn segment_header(flags: PduFlags, seq: u8, window: u8) -> Option<SegmentHeader> {
    flags.contains(PduFlags::SEGMENTED).then_some(SegmentHeader {
        sequence_number: seq,
        proposed_window_size: window,
        more_follows: flags.contains(PduFlags::MORE_FOLLOWS),
    })
}

impl Apdu {
    pub fn apdu_type(&self) -> ApduType {
        match self {
            Apdu::ConfirmedRequest(_) => ApduType::ConfirmedRequest,
            Apdu::UnconfirmedRequest(_) => ApduType::UnconfirmedRequest,
            Apdu::SimpleAck(_) => ApduType::SimpleAck,
            Apdu::ComplexAck(_) => ApduType::ComplexAck,
            Apdu::SegmentAck(_) => ApduType::SegmentAck,
            Apdu::Error(_) => ApduType::Error,
            Apdu::Reject(_) => ApduType::Reject,
            Apdu::Abort(_) => ApduType::Abort,
        }
    }

    /// Invoke ID, present on everything except unconfirmed requests.
    pub fn invoke_id(&self) -> Option<u8> {
        match self {
            Apdu::ConfirmedRequest(pdu) => Some(pdu.invoke_id),
            Apdu::UnconfirmedRequest(_) => None,
            Apdu::SimpleAck(pdu) => Some(pdu.invoke_id),
            Apdu::ComplexAck(pdu) => Some(pdu.invoke_id),
            Apdu::SegmentAck(pdu) => Some(pdu.invoke_id),
            Apdu::Error(pdu) => Some(pdu.invoke_id),
            Apdu::Reject(pdu) => Some(pdu.invoke_id),
            Apdu::Abort(pdu) => Some(pdu.invoke_id),
        }
    }

    /// Encode APDU to bytes
    pub fn encode(&self) -> Vec<u8> {
        let mut buffer = Vec::new();
        let pdu_type = (self.apdu_type() as u8) << 4;

        match self {
            Apdu::ConfirmedRequest(pdu) => {
                let mut flags = PduFlags::empty();
                flags.set(PduFlags::SEGMENTED, pdu.segment.is_some());
                flags.set(PduFlags::MORE_FOLLOWS, pdu.more_follows());
                flags.set(
                    PduFlags::SEGMENTED_RESPONSE_ACCEPTED,
                    pdu.segmented_response_accepted,
                );
                buffer.push(pdu_type | flags.bits());
                buffer.push(((pdu.max_segments as u8) << 4) | pdu.max_apdu as u8);
                buffer.push(pdu.invoke_id);
                if let Some(segment) = pdu.segment {
                    buffer.push(segment.sequence_number);
                    buffer.push(segment.proposed_window_size);
                }
                buffer.push(pdu.service_choice.into());
                buffer.extend_from_slice(&pdu.service_data);
            }
            Apdu::UnconfirmedRequest(pdu) => {
                buffer.push(pdu_type);
                buffer.push(pdu.service_choice.into());
                buffer.extend_from_slice(&pdu.service_data);
            }
            Apdu::SimpleAck(pdu) => {
                buffer.extend_from_slice(&[pdu_type, pdu.invoke_id, pdu.service_choice.into()]);
            }
            Apdu::ComplexAck(pdu) => {
                let mut flags = PduFlags::empty();
                flags.set(PduFlags::SEGMENTED, pdu.segment.is_some());
                flags.set(PduFlags::MORE_FOLLOWS, pdu.more_follows());
                buffer.push(pdu_type | flags.bits());
                buffer.push(pdu.invoke_id);
                if let Some(segment) = pdu.segment {
                    buffer.push(segment.sequence_number);
                    buffer.push(segment.proposed_window_size);
                }
                buffer.push(pdu.service_choice.into());
                buffer.extend_from_slice(&pdu.service_data);
            }
            Apdu::SegmentAck(pdu) => {
                let mut flags = PduFlags::empty();
                flags.set(PduFlags::NEGATIVE_ACK, pdu.negative);
                flags.set(PduFlags::SERVER, pdu.server);
                buffer.extend_from_slice(&[
                    pdu_type | flags.bits(),
                    pdu.invoke_id,
                    pdu.sequence_number,
                    pdu.actual_window_size,
                ]);
            }
            Apdu::Error(pdu) => {
                buffer.extend_from_slice(&[pdu_type, pdu.invoke_id, pdu.service_choice.into()]);
                // enumerated values never fail to encode
                let _ = Enumerated(u16::from(pdu.error_class).into()).encode(&mut buffer);
                let _ = Enumerated(u16::from(pdu.error_code).into()).encode(&mut buffer);
            }
            Apdu::Reject(pdu) => {
                buffer.extend_from_slice(&[pdu_type, pdu.invoke_id, pdu.reason.into()]);
            }
            Apdu::Abort(pdu) => {
                let flags = if pdu.server {
                    PduFlags::SERVER
                } else {
                    PduFlags::empty()
                };
                buffer.extend_from_slice(&[
                    pdu_type | flags.bits(),
                    pdu.invoke_id,
                    pdu.reason.into(),
                ]);
            }
        }

        buffer
    }

    /// Encode into a shareable frame.
    pub fn to_bytes(&self) -> Bytes {
        Bytes::from(self.encode())
    }

    /// Decode the APDU header. Service data is left undecoded.
    pub fn decode(data: &[u8]) -> Result<Self> {
        Self::decode_bytes(&Bytes::copy_from_slice(data))
    }

    /// Like [`Apdu::decode`], sharing `data` for the service payload.
    pub fn decode_bytes(data: &Bytes) -> Result<Self> {
        let first = *data.first().ok_or(ApplicationError::Empty)?;
        let pdu_type = ApduType::try_from(first >> 4)?;
        let flags = PduFlags::from_bits_truncate(first & 0x0F);
        let len = data.len();

        let apdu = match pdu_type {
            ApduType::ConfirmedRequest => {
                let segmented = flags.contains(PduFlags::SEGMENTED);
                let header = if segmented {
                    SEGMENTED_REQUEST_HEADER
                } else {
                    CONFIRMED_REQUEST_HEADER
                };
                if len < header {
                    return Err(truncated(pdu_type, header, len));
                }
                let segment = segment_header(flags, data[3], data[4]);
                Apdu::ConfirmedRequest(ConfirmedRequest {
                    segment,
                    segmented_response_accepted: flags
                        .contains(PduFlags::SEGMENTED_RESPONSE_ACCEPTED),
                    max_segments: MaxSegments::from_code(data[1] >> 4),
                    max_apdu: MaxApduSize::from_code(data[1]),
                    invoke_id: data[2],
                    service_choice: data[header - 1].into(),
                    service_data: data.slice(header..),
                })
            }
            ApduType::UnconfirmedRequest => {
                if len < 2 {
                    return Err(truncated(pdu_type, 2, len));
                }
                Apdu::UnconfirmedRequest(UnconfirmedRequest {
                    service_choice: data[1].into(),
                    service_data: data.slice(2..),
                })
            }
            ApduType::SimpleAck => {
                if len < 3 {
                    return Err(truncated(pdu_type, 3, len));
                }
                Apdu::SimpleAck(SimpleAck {
                    invoke_id: data[1],
                    service_choice: data[2].into(),
                })
            }
            ApduType::ComplexAck => {
                let header = if flags.contains(PduFlags::SEGMENTED) {
                    SEGMENTED_COMPLEX_ACK_HEADER
                } else {
                    COMPLEX_ACK_HEADER
                };
                if len < header {
                    return Err(truncated(pdu_type, header, len));
                }
                Apdu::ComplexAck(ComplexAck {
                    segment: segment_header(flags, data[2], data[3]),
                    invoke_id: data[1],
                    service_choice: data[header - 1].into(),
                    service_data: data.slice(header..),
                })
            }
            ApduType::SegmentAck => {
                if len < 4 {
                    return Err(truncated(pdu_type, 4, len));
                }
                Apdu::SegmentAck(SegmentAck {
                    negative: flags.contains(PduFlags::NEGATIVE_ACK),
                    server: flags.contains(PduFlags::SERVER),
                    invoke_id: data[1],
                    sequence_number: data[2],
                    actual_window_size: data[3],
                })
            }
            ApduType::Error => {
                if len < 3 {
                    return Err(truncated(pdu_type, 3, len));
                }
                let (error_class, error_code) = decode_error_body(&data[3..])?;
                Apdu::Error(ErrorPdu {
                    invoke_id: data[1],
                    service_choice: data[2].into(),
                    error_class,
                    error_code,
                })
            }
            ApduType::Reject => {
                if len < 3 {
                    return Err(truncated(pdu_type, 3, len));
                }
                Apdu::Reject(RejectPdu {
                    invoke_id: data[1],
                    reason: data[2].into(),
                })
            }
            ApduType::Abort => {
                if len < 3 {
                    return Err(truncated(pdu_type, 3, len));
                }
                Apdu::Abort(AbortPdu {
                    server: flags.contains(PduFlags::SERVER),
                    invoke_id: data[1],
                    reason: data[2].into(),
                })
            }
        };
        Ok(apdu)
    }

    /// Decode the header and check that a confirmed request names a service
    /// `services` can decode.
    ///
    /// An unknown confirmed service becomes [`ApplicationError::Rejected`]
    /// carrying the invoke ID, so the caller can answer with a Reject PDU.
    pub fn parse(data: &Bytes, services: &ServiceRegistry) -> Result<Self> {
        let apdu = Self::decode_bytes(data)?;
        if let Apdu::ConfirmedRequest(request) = &apdu {
            if !services.supports_confirmed(request.service_choice) {
                return Err(ApplicationError::Rejected {
                    invoke_id: request.invoke_id,
                    reason: RejectReason::UnrecognizedService,
                });
            }
        }
        Ok(apdu)
    }
}

/// Error class and code of an Error PDU. Services with a structured error
/// wrap them in context tag 0; trailing members are ignored.
fn decode_error_body(body: &[u8]) -> Result<(ErrorClass, ErrorCode)> {
    let mut reader = Reader::new(body);
    let wrapped = matches!(reader.peek_tag()?, Some(Tag::Opening(0)));
    if wrapped {
        reader.expect_opening(0)?;
    }
    let class = Enumerated::decode(&mut reader)?.0;
    let code = Enumerated::decode(&mut reader)?.0;
    // out of range values saturate into the proprietary range
    let class = u16::try_from(class).unwrap_or(u16::MAX);
    let code = u16::try_from(code).unwrap_or(u16::MAX);
    Ok((class.into(), code.into()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec;

    fn round_trip(apdu: Apdu) -> Vec<u8> {
        let encoded = apdu.encode();
        assert_eq!(Apdu::decode(&encoded).unwrap(), apdu);
        encoded
    }

    #[test]
    fn test_unconfirmed_request_encode_decode() {
        let encoded = round_trip(Apdu::UnconfirmedRequest(UnconfirmedRequest {
            service_choice: UnconfirmedServiceChoice::WhoIs,
            service_data: Bytes::from_static(&[0x09, 0x7B, 0x19, 0x7B]),
        }));
        assert_eq!(encoded, vec![0x10, 0x08, 0x09, 0x7B, 0x19, 0x7B]);
    }

    #[test]
    fn test_confirmed_request_header() {
        let encoded = round_trip(Apdu::ConfirmedRequest(ConfirmedRequest {
            segment: None,
            segmented_response_accepted: false,
            max_segments: MaxSegments::Unspecified,
            max_apdu: MaxApduSize::Up206,
            invoke_id: 7,
            service_choice: ConfirmedServiceChoice::AcknowledgeAlarm,
            service_data: Bytes::from_static(&[0x09, 0x01]),
        }));
        assert_eq!(encoded, vec![0x00, 0x02, 0x07, 0x00, 0x09, 0x01]);
    }

    #[test]
    fn test_segmented_confirmed_request_flags() {
        let encoded = round_trip(Apdu::ConfirmedRequest(ConfirmedRequest {
            segment: Some(SegmentHeader {
                sequence_number: 3,
                proposed_window_size: 4,
                more_follows: true,
            }),
            segmented_response_accepted: true,
            max_segments: MaxSegments::SixtyFour,
            max_apdu: MaxApduSize::Up1476,
            invoke_id: 0x21,
            service_choice: ConfirmedServiceChoice::WriteProperty,
            service_data: Bytes::from_static(&[0xAA]),
        }));
        assert_eq!(encoded, vec![0x0E, 0x65, 0x21, 0x03, 0x04, 0x0F, 0xAA]);
    }

    #[test]
    fn test_acks_encode_decode() {
        assert_eq!(
            round_trip(Apdu::SimpleAck(SimpleAck {
                invoke_id: 9,
                service_choice: ConfirmedServiceChoice::WriteProperty,
            })),
            vec![0x20, 0x09, 0x0F]
        );
        assert_eq!(
            round_trip(Apdu::ComplexAck(ComplexAck {
                segment: Some(SegmentHeader {
                    sequence_number: 0,
                    proposed_window_size: 2,
                    more_follows: true,
                }),
                invoke_id: 1,
                service_choice: ConfirmedServiceChoice::ReadProperty,
                service_data: Bytes::from_static(&[0x0C]),
            })),
            vec![0x3C, 0x01, 0x00, 0x02, 0x0C, 0x0C]
        );
        assert_eq!(
            round_trip(Apdu::SegmentAck(SegmentAck {
                negative: true,
                server: true,
                invoke_id: 4,
                sequence_number: 2,
                actual_window_size: 3,
            })),
            vec![0x43, 0x04, 0x02, 0x03]
        );
    }

    #[test]
    fn test_error_reject_abort() {
        assert_eq!(
            round_trip(Apdu::Error(ErrorPdu {
                invoke_id: 2,
                service_choice: ConfirmedServiceChoice::ReadProperty,
                error_class: ErrorClass::Object,
                error_code: ErrorCode::UnknownObject,
            })),
            vec![0x50, 0x02, 0x0C, 0x91, 0x01, 0x91, 0x1F]
        );
        assert_eq!(
            round_trip(Apdu::Reject(RejectPdu {
                invoke_id: 5,
                reason: RejectReason::UnrecognizedService,
            })),
            vec![0x60, 0x05, 0x09]
        );
        assert_eq!(
            round_trip(Apdu::Abort(AbortPdu {
                server: true,
                invoke_id: 6,
                reason: AbortReason::SegmentationNotSupported,
            })),
            vec![0x71, 0x06, 0x04]
        );
    }

    #[test]
    fn test_wrapped_error_body() {
        // ConfirmedPrivateTransfer-Error: [0] { class, code } [1] vendor ...
        let data = [0x50, 0x03, 0x12, 0x0E, 0x91, 0x05, 0x91, 0x00, 0x0F, 0x19, 0x08];
        match Apdu::decode(&data).unwrap() {
            Apdu::Error(pdu) => {
                assert_eq!(pdu.error_class, ErrorClass::Services);
                assert_eq!(pdu.error_code, ErrorCode::Other);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_unknown_reasons_are_tolerated() {
        match Apdu::decode(&[0x60, 0x01, 0x80]).unwrap() {
            Apdu::Reject(pdu) => assert!(matches!(pdu.reason, RejectReason::Custom(_))),
            other => panic!("unexpected {other:?}"),
        }
        match Apdu::decode(&[0x70, 0x01, 0x2A]).unwrap() {
            Apdu::Abort(pdu) => assert!(matches!(pdu.reason, AbortReason::Reserved(_))),
            other => panic!("unexpected {other:?}"),
        }
        match Apdu::decode(&[0x50, 0x01, 0x0C, 0x91, 0x40, 0x92, 0x01, 0x2C]).unwrap() {
            Apdu::Error(pdu) => {
                assert!(matches!(pdu.error_class, ErrorClass::Custom(_)));
                assert!(matches!(pdu.error_code, ErrorCode::Custom(_)));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_oversized_error_values_saturate() {
        // class 70000 and code 65536 do not fit the 16-bit code space
        let data = [0x50, 0x01, 0x0C, 0x93, 0x01, 0x11, 0x70, 0x93, 0x01, 0x00, 0x00];
        match Apdu::decode(&data).unwrap() {
            Apdu::Error(pdu) => {
                assert_eq!(pdu.error_class, ErrorClass::from(u16::MAX));
                assert_eq!(pdu.error_code, ErrorCode::from(u16::MAX));
                assert!(!pdu.error_class.is_standard());
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_truncated_headers() {
        assert_eq!(Apdu::decode(&[]), Err(ApplicationError::Empty));
        assert!(matches!(
            Apdu::decode(&[0x08, 0x05, 0x01, 0x00]),
            Err(ApplicationError::Truncated { needed: 6, .. })
        ));
        assert!(matches!(
            Apdu::decode(&[0x40, 0x01]),
            Err(ApplicationError::Truncated { .. })
        ));
        assert!(Apdu::decode(&[0x50, 0x01, 0x0C, 0x91]).is_err());
        assert_eq!(
            Apdu::decode(&[0x80, 0x00]),
            Err(ApplicationError::UnknownPduType(8))
        );
    }

    #[test]
    fn test_parse_rejects_unknown_confirmed_service() {
        let registry = ServiceRegistry::standard();
        let frame = Bytes::from_static(&[0x00, 0x05, 0x11, 0x3F]);
        assert_eq!(
            Apdu::parse(&frame, &registry),
            Err(ApplicationError::Rejected {
                invoke_id: 0x11,
                reason: RejectReason::UnrecognizedService,
            })
        );

        let frame = Bytes::from_static(&[0x00, 0x05, 0x12, 0x0C]);
        assert!(Apdu::parse(&frame, &registry).is_ok());
    }

    #[test]
    fn test_max_apdu_size() {
        assert_eq!(MaxApduSize::Up1476.size(), 1476);
        assert_eq!(MaxApduSize::from_size(1500), MaxApduSize::Up1476);
        assert_eq!(MaxApduSize::from_size(480), MaxApduSize::Up480);
        assert_eq!(MaxApduSize::from_size(300), MaxApduSize::Up206);
        assert_eq!(MaxApduSize::from_size(10), MaxApduSize::Up50);
        assert_eq!(MaxApduSize::from_code(9), MaxApduSize::Up50);
        assert_eq!(MaxSegments::from_code(6).limit(), 64);
        assert_eq!(MaxSegments::Unspecified.limit(), 256);
    }
}
