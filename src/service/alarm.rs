//! Alarm and event services.

use alloc::vec::Vec;

use crate::encoding::{
    CharacterString, Date, Decodable, Encodable, EncodingError, Reader, Result, Tag, Time,
};
use crate::object::{EventState, ObjectIdentifier};

/// BACnetDateTime: an application tagged date followed by a time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DateTime {
    pub date: Date,
    pub time: Time,
}

impl DateTime {
    pub fn new(date: Date, time: Time) -> Self {
        Self { date, time }
    }

    /// Current local date and time.
    #[cfg(feature = "std")]
    pub fn now() -> Result<Self> {
        chrono::Local::now().naive_local().try_into()
    }

    /// Current UTC date and time.
    #[cfg(feature = "std")]
    pub fn now_utc() -> Result<Self> {
        chrono::Utc::now().naive_utc().try_into()
    }
}

impl TryFrom<chrono::NaiveDateTime> for DateTime {
    type Error = EncodingError;

    fn try_from(value: chrono::NaiveDateTime) -> Result<Self> {
        Ok(Self::new(value.date().try_into()?, value.time().into()))
    }
}

impl TryFrom<DateTime> for chrono::NaiveDateTime {
    type Error = EncodingError;

    fn try_from(value: DateTime) -> Result<Self> {
        let date = chrono::NaiveDate::try_from(value.date)?;
        let time = chrono::NaiveTime::try_from(value.time)?;
        Ok(date.and_time(time))
    }
}

impl Encodable for DateTime {
    fn encode(&self, buffer: &mut Vec<u8>) -> Result<()> {
        self.date.encode(buffer)?;
        self.time.encode(buffer)
    }
}

impl Decodable for DateTime {
    fn decode(reader: &mut Reader<'_>) -> Result<Self> {
        let date = Date::decode(reader)?;
        let time = Time::decode(reader)?;
        Ok(Self::new(date, time))
    }
}

/// BACnetTimeStamp
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum TimeStamp {
    Time(Time),
    SequenceNumber(u16),
    DateTime(DateTime),
}

impl Encodable for TimeStamp {
    fn encode(&self, buffer: &mut Vec<u8>) -> Result<()> {
        match self {
            TimeStamp::Time(time) => time.encode_context(0, buffer),
            TimeStamp::SequenceNumber(number) => number.encode_context(1, buffer),
            TimeStamp::DateTime(date_time) => date_time.encode_context(2, buffer),
        }
    }
}

impl Decodable for TimeStamp {
    fn decode(reader: &mut Reader<'_>) -> Result<Self> {
        match reader.peek_tag()? {
            Some(Tag::Context { number: 0, .. }) => {
                Time::decode_context(0, reader).map(TimeStamp::Time)
            }
            Some(Tag::Context { number: 1, .. }) => {
                u16::decode_context(1, reader).map(TimeStamp::SequenceNumber)
            }
            Some(Tag::Opening(2)) => DateTime::decode_context(2, reader).map(TimeStamp::DateTime),
            found => Err(EncodingError::ExpectedContextTag { expected: 0, found }),
        }
    }
}

/// AcknowledgeAlarm-Request
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct AcknowledgeAlarmRequest {
    pub acknowledging_process_identifier: u32,
    pub event_object_identifier: ObjectIdentifier,
    pub event_state_acknowledged: EventState,
    pub time_stamp: TimeStamp,
    pub acknowledgment_source: CharacterString,
    pub time_of_acknowledgment: TimeStamp,
}

impl Encodable for AcknowledgeAlarmRequest {
    fn encode(&self, buffer: &mut Vec<u8>) -> Result<()> {
        self.acknowledging_process_identifier.encode_context(0, buffer)?;
        self.event_object_identifier.encode_context(1, buffer)?;
        self.event_state_acknowledged.encode_context(2, buffer)?;
        self.time_stamp.encode_context(3, buffer)?;
        self.acknowledgment_source.encode_context(4, buffer)?;
        self.time_of_acknowledgment.encode_context(5, buffer)
    }
}

impl Decodable for AcknowledgeAlarmRequest {
    fn decode(reader: &mut Reader<'_>) -> Result<Self> {
        Ok(Self {
            acknowledging_process_identifier: u32::decode_context(0, reader)?,
            event_object_identifier: ObjectIdentifier::decode_context(1, reader)?,
            event_state_acknowledged: EventState::decode_context(2, reader)?,
            time_stamp: TimeStamp::decode_context(3, reader)?,
            acknowledgment_source: CharacterString::decode_context(4, reader)?,
            time_of_acknowledgment: TimeStamp::decode_context(5, reader)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoding::decode_all;
    use crate::object::ObjectType;

    /// Service data of the AcknowledgeAlarm example in Annex F.
    const ACK_ALARM: &str = "09011c0000000229033e19103f4c004d444c5e2ea45c0615ffb40d0329092f5f";

    fn example_request() -> AcknowledgeAlarmRequest {
        AcknowledgeAlarmRequest {
            acknowledging_process_identifier: 1,
            event_object_identifier: ObjectIdentifier::new(ObjectType::AnalogInput, 2),
            event_state_acknowledged: EventState::HighLimit,
            time_stamp: TimeStamp::SequenceNumber(16),
            acknowledgment_source: CharacterString::new("MDL"),
            time_of_acknowledgment: TimeStamp::DateTime(DateTime::new(
                Date::new(1992, 6, 21, 0xFF),
                Time::new(13, 3, 41, 9),
            )),
        }
    }

    #[test]
    fn test_acknowledge_alarm_encodes_reference_bytes() {
        let mut buffer = Vec::new();
        example_request().encode(&mut buffer).unwrap();
        assert_eq!(hex::encode(&buffer), ACK_ALARM);
    }

    #[test]
    fn test_acknowledge_alarm_decodes_reference_bytes() {
        let data = hex::decode(ACK_ALARM).unwrap();
        let request: AcknowledgeAlarmRequest = decode_all(&data).unwrap();
        assert_eq!(request, example_request());
    }

    #[test]
    fn test_missing_member_fails() {
        let data = hex::decode(ACK_ALARM).unwrap();
        // drop the acknowledgment source and everything after it
        let truncated = &data[..14];
        assert!(decode_all::<AcknowledgeAlarmRequest>(truncated).is_err());
    }

    #[test]
    fn test_time_stamp_choices() {
        for stamp in [
            TimeStamp::Time(Time::new(1, 2, 3, 4)),
            TimeStamp::SequenceNumber(65535),
            TimeStamp::DateTime(DateTime::new(
                Date::new(2024, 2, 29, 4),
                Time::new(23, 59, 59, 99),
            )),
        ] {
            let mut buffer = Vec::new();
            stamp.encode(&mut buffer).unwrap();
            assert_eq!(decode_all::<TimeStamp>(&buffer).unwrap(), stamp);
        }
        assert!(decode_all::<TimeStamp>(&[0x39, 0x01]).is_err());
    }

    #[test]
    fn test_date_time_chrono_conversion() {
        let naive = chrono::NaiveDate::from_ymd_opt(2023, 11, 5)
            .and_then(|d| d.and_hms_milli_opt(8, 30, 15, 250))
            .unwrap();
        let date_time = DateTime::try_from(naive).unwrap();
        assert_eq!(date_time.date.weekday, 7);
        assert_eq!(date_time.time.hundredths, 25);
        assert_eq!(chrono::NaiveDateTime::try_from(date_time).unwrap(), naive);

        let ancient = chrono::NaiveDate::from_ymd_opt(1066, 10, 14)
            .and_then(|d| d.and_hms_opt(9, 0, 0))
            .unwrap();
        assert!(DateTime::try_from(ancient).is_err());
    }
}
