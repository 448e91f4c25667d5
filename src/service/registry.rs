//! Service choice to payload decoder mapping.
//!
//! A [`ServiceRegistry`] is a plain value. The transport engine receives one
//! at construction; applications add vendor schemas or opaque services to
//! it before handing it over.

use alloc::collections::BTreeMap;

use bytes::Bytes;

use super::{
    ConfirmedServiceAck, ConfirmedServiceChoice, ConfirmedServiceRequest, PrivateParameters,
    UnconfirmedServiceChoice, UnconfirmedServiceRequest, VendorSchema,
};
use crate::encoding::{decode_all, Result};

/// Decoder for the service data of a confirmed request.
pub type ConfirmedDecoder = fn(ConfirmedServiceChoice, &[u8]) -> Result<ConfirmedServiceRequest>;

/// Decoder for the service data of a ComplexACK.
pub type AckDecoder = fn(ConfirmedServiceChoice, &[u8]) -> Result<ConfirmedServiceAck>;

/// Decoder for the service data of an unconfirmed request.
pub type UnconfirmedDecoder =
    fn(UnconfirmedServiceChoice, &[u8]) -> Result<UnconfirmedServiceRequest>;

fn opaque_confirmed(
    service_choice: ConfirmedServiceChoice,
    data: &[u8],
) -> Result<ConfirmedServiceRequest> {
    Ok(ConfirmedServiceRequest::Other {
        service_choice,
        data: Bytes::copy_from_slice(data),
    })
}

#[derive(Debug, Clone, Default)]
pub struct ServiceRegistry {
    confirmed: BTreeMap<u8, ConfirmedDecoder>,
    acks: BTreeMap<u8, AckDecoder>,
    unconfirmed: BTreeMap<u8, UnconfirmedDecoder>,
    vendor_parameters: BTreeMap<(u16, u32), VendorSchema>,
    vendor_results: BTreeMap<(u16, u32), VendorSchema>,
}

impl ServiceRegistry {
    /// An empty registry. Every confirmed request is rejected as
    /// unrecognized until a decoder is registered.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with decoders for every typed payload in [`crate::service`].
    pub fn standard() -> Self {
        use ConfirmedServiceChoice as C;
        use UnconfirmedServiceChoice as U;

        let mut registry = Self::new();
        registry
            .register_confirmed(C::AcknowledgeAlarm, |_, data| {
                decode_all(data).map(ConfirmedServiceRequest::AcknowledgeAlarm)
            })
            .register_confirmed(C::ConfirmedCovNotification, |_, data| {
                decode_all(data).map(ConfirmedServiceRequest::ConfirmedCovNotification)
            })
            .register_confirmed(C::SubscribeCov, |_, data| {
                decode_all(data).map(ConfirmedServiceRequest::SubscribeCov)
            })
            .register_confirmed(C::ReadProperty, |_, data| {
                decode_all(data).map(ConfirmedServiceRequest::ReadProperty)
            })
            .register_confirmed(C::ReadPropertyMultiple, |_, data| {
                decode_all(data).map(ConfirmedServiceRequest::ReadPropertyMultiple)
            })
            .register_confirmed(C::WriteProperty, |_, data| {
                decode_all(data).map(ConfirmedServiceRequest::WriteProperty)
            })
            .register_confirmed(C::DeviceCommunicationControl, |_, data| {
                decode_all(data).map(ConfirmedServiceRequest::DeviceCommunicationControl)
            })
            .register_confirmed(C::ReinitializeDevice, |_, data| {
                decode_all(data).map(ConfirmedServiceRequest::ReinitializeDevice)
            })
            .register_confirmed(C::ConfirmedPrivateTransfer, |_, data| {
                decode_all(data).map(ConfirmedServiceRequest::ConfirmedPrivateTransfer)
            });

        registry
            .register_ack(C::ReadProperty, |_, data| {
                decode_all(data).map(ConfirmedServiceAck::ReadProperty)
            })
            .register_ack(C::ReadPropertyMultiple, |_, data| {
                decode_all(data).map(ConfirmedServiceAck::ReadPropertyMultiple)
            })
            .register_ack(C::ConfirmedPrivateTransfer, |_, data| {
                decode_all(data).map(ConfirmedServiceAck::ConfirmedPrivateTransfer)
            });

        registry
            .register_unconfirmed(U::WhoIs, |_, data| {
                decode_all(data).map(UnconfirmedServiceRequest::WhoIs)
            })
            .register_unconfirmed(U::IAm, |_, data| {
                decode_all(data).map(UnconfirmedServiceRequest::IAm)
            })
            .register_unconfirmed(U::WhoHas, |_, data| {
                decode_all(data).map(UnconfirmedServiceRequest::WhoHas)
            })
            .register_unconfirmed(U::IHave, |_, data| {
                decode_all(data).map(UnconfirmedServiceRequest::IHave)
            })
            .register_unconfirmed(U::UnconfirmedCovNotification, |_, data| {
                decode_all(data).map(UnconfirmedServiceRequest::UnconfirmedCovNotification)
            })
            .register_unconfirmed(U::UnconfirmedPrivateTransfer, |_, data| {
                decode_all(data).map(UnconfirmedServiceRequest::UnconfirmedPrivateTransfer)
            })
            .register_unconfirmed(U::TimeSynchronization, |_, data| {
                decode_all(data).map(UnconfirmedServiceRequest::TimeSynchronization)
            })
            .register_unconfirmed(U::UtcTimeSynchronization, |_, data| {
                decode_all(data).map(UnconfirmedServiceRequest::UtcTimeSynchronization)
            });

        registry
    }

    pub fn register_confirmed(
        &mut self,
        service_choice: ConfirmedServiceChoice,
        decoder: ConfirmedDecoder,
    ) -> &mut Self {
        self.confirmed.insert(service_choice.into(), decoder);
        self
    }

    /// Accept a confirmed service without a typed payload. Requests reach the
    /// handler as [`ConfirmedServiceRequest::Other`].
    pub fn register_confirmed_opaque(
        &mut self,
        service_choice: ConfirmedServiceChoice,
    ) -> &mut Self {
        self.register_confirmed(service_choice, opaque_confirmed)
    }

    pub fn register_ack(
        &mut self,
        service_choice: ConfirmedServiceChoice,
        decoder: AckDecoder,
    ) -> &mut Self {
        self.acks.insert(service_choice.into(), decoder);
        self
    }

    pub fn register_unconfirmed(
        &mut self,
        service_choice: UnconfirmedServiceChoice,
        decoder: UnconfirmedDecoder,
    ) -> &mut Self {
        self.unconfirmed.insert(service_choice.into(), decoder);
        self
    }

    /// Schema for the `serviceParameters` of a private transfer.
    pub fn register_vendor(
        &mut self,
        vendor_id: u16,
        service_number: u32,
        schema: VendorSchema,
    ) -> &mut Self {
        self.vendor_parameters.insert((vendor_id, service_number), schema);
        self
    }

    /// Schema for the `resultBlock` of a ConfirmedPrivateTransfer-ACK.
    pub fn register_vendor_result(
        &mut self,
        vendor_id: u16,
        service_number: u32,
        schema: VendorSchema,
    ) -> &mut Self {
        self.vendor_results.insert((vendor_id, service_number), schema);
        self
    }

    pub fn lookup_confirmed(
        &self,
        service_choice: ConfirmedServiceChoice,
    ) -> Option<ConfirmedDecoder> {
        self.confirmed.get(&u8::from(service_choice)).copied()
    }

    pub fn lookup_ack(&self, service_choice: ConfirmedServiceChoice) -> Option<AckDecoder> {
        self.acks.get(&u8::from(service_choice)).copied()
    }

    pub fn lookup_unconfirmed(
        &self,
        service_choice: UnconfirmedServiceChoice,
    ) -> Option<UnconfirmedDecoder> {
        self.unconfirmed.get(&u8::from(service_choice)).copied()
    }

    pub fn lookup_vendor(&self, vendor_id: u16, service_number: u32) -> Option<&VendorSchema> {
        self.vendor_parameters.get(&(vendor_id, service_number))
    }

    pub fn lookup_vendor_result(
        &self,
        vendor_id: u16,
        service_number: u32,
    ) -> Option<&VendorSchema> {
        self.vendor_results.get(&(vendor_id, service_number))
    }

    /// Whether confirmed requests with this choice are understood.
    pub fn supports_confirmed(&self, service_choice: ConfirmedServiceChoice) -> bool {
        self.confirmed.contains_key(&u8::from(service_choice))
    }

    /// Decode confirmed request service data. Callers check
    /// [`supports_confirmed`](Self::supports_confirmed) first; an
    /// unregistered choice decodes to the opaque arm.
    pub fn decode_confirmed(
        &self,
        service_choice: ConfirmedServiceChoice,
        data: &[u8],
    ) -> Result<ConfirmedServiceRequest> {
        let decoder = self.lookup_confirmed(service_choice).unwrap_or(opaque_confirmed);
        match decoder(service_choice, data)? {
            ConfirmedServiceRequest::ConfirmedPrivateTransfer(mut request) => {
                request.parameters =
                    Self::resolve(
                        &self.vendor_parameters,
                        request.vendor_id,
                        request.service_number,
                        request.parameters,
                    )?;
                Ok(ConfirmedServiceRequest::ConfirmedPrivateTransfer(request))
            }
            request => Ok(request),
        }
    }

    pub fn decode_ack(
        &self,
        service_choice: ConfirmedServiceChoice,
        data: &[u8],
    ) -> Result<ConfirmedServiceAck> {
        let Some(decoder) = self.lookup_ack(service_choice) else {
            return Ok(ConfirmedServiceAck::Other {
                service_choice,
                data: Bytes::copy_from_slice(data),
            });
        };
        match decoder(service_choice, data)? {
            ConfirmedServiceAck::ConfirmedPrivateTransfer(mut ack) => {
                ack.result_block =
                    Self::resolve(
                        &self.vendor_results,
                        ack.vendor_id,
                        ack.service_number,
                        ack.result_block,
                    )?;
                Ok(ConfirmedServiceAck::ConfirmedPrivateTransfer(ack))
            }
            ack => Ok(ack),
        }
    }

    pub fn decode_unconfirmed(
        &self,
        service_choice: UnconfirmedServiceChoice,
        data: &[u8],
    ) -> Result<UnconfirmedServiceRequest> {
        let Some(decoder) = self.lookup_unconfirmed(service_choice) else {
            return Ok(UnconfirmedServiceRequest::Other {
                service_choice,
                data: Bytes::copy_from_slice(data),
            });
        };
        match decoder(service_choice, data)? {
            UnconfirmedServiceRequest::UnconfirmedPrivateTransfer(mut request) => {
                request.parameters =
                    Self::resolve(
                        &self.vendor_parameters,
                        request.vendor_id,
                        request.service_number,
                        request.parameters,
                    )?;
                Ok(UnconfirmedServiceRequest::UnconfirmedPrivateTransfer(request))
            }
            request => Ok(request),
        }
    }

    fn resolve(
        schemas: &BTreeMap<(u16, u32), VendorSchema>,
        vendor_id: u16,
        service_number: u32,
        parameters: Option<PrivateParameters>,
    ) -> Result<Option<PrivateParameters>> {
        match (parameters, schemas.get(&(vendor_id, service_number))) {
            (Some(parameters), Some(schema)) => parameters.resolve(schema).map(Some),
            (parameters, _) => Ok(parameters),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoding::{ApplicationValue, Encodable, EncodingError};
    use crate::object::{ObjectIdentifier, ObjectType, PropertyIdentifier};
    use crate::service::{FieldKind, ReadPropertyRequest, VendorField, WhoIsRequest};
    use alloc::vec;
    use alloc::vec::Vec;

    const TRANSFER: [u8; 13] = [
        0x09, 0x19, 0x19, 0x08, 0x2E, 0x0C, 0x3F, 0x80, 0x00, 0x00, 0x19, 0x02, 0x2F,
    ];

    #[test]
    fn test_standard_registry_decodes_typed_payloads() {
        let registry = ServiceRegistry::standard();
        let request = ReadPropertyRequest::new(
            ObjectIdentifier::new(ObjectType::AnalogValue, 3),
            PropertyIdentifier::PresentValue,
        );
        let mut data = Vec::new();
        request.encode(&mut data).unwrap();

        assert_eq!(
            registry.decode_confirmed(ConfirmedServiceChoice::ReadProperty, &data).unwrap(),
            ConfirmedServiceRequest::ReadProperty(request)
        );
        assert!(registry.supports_confirmed(ConfirmedServiceChoice::ReadProperty));
        assert!(!registry.supports_confirmed(ConfirmedServiceChoice::AtomicReadFile));
    }

    #[test]
    fn test_trailing_bytes_fail_decode() {
        let registry = ServiceRegistry::standard();
        assert_eq!(
            registry.decode_unconfirmed(
                UnconfirmedServiceChoice::WhoIs,
                &[0x09, 0x01, 0x19, 0x05, 0xFF],
            ),
            Err(EncodingError::TrailingData { remaining: 1 })
        );
    }

    #[test]
    fn test_unknown_services_stay_opaque() {
        let registry = ServiceRegistry::standard();
        assert_eq!(
            registry
                .decode_unconfirmed(UnconfirmedServiceChoice::WriteGroup, &[0x01, 0x02])
                .unwrap(),
            UnconfirmedServiceRequest::Other {
                service_choice: UnconfirmedServiceChoice::WriteGroup,
                data: Bytes::from_static(&[0x01, 0x02]),
            }
        );
        assert!(matches!(
            registry.decode_ack(ConfirmedServiceChoice::AtomicReadFile, &[0x00]).unwrap(),
            ConfirmedServiceAck::Other { .. }
        ));
    }

    #[test]
    fn test_opaque_registration() {
        let mut registry = ServiceRegistry::new();
        assert!(!registry.supports_confirmed(ConfirmedServiceChoice::AtomicReadFile));
        registry.register_confirmed_opaque(ConfirmedServiceChoice::AtomicReadFile);
        assert!(registry.supports_confirmed(ConfirmedServiceChoice::AtomicReadFile));
        assert_eq!(
            registry.decode_confirmed(ConfirmedServiceChoice::AtomicReadFile, &[0xC4]).unwrap(),
            ConfirmedServiceRequest::Other {
                service_choice: ConfirmedServiceChoice::AtomicReadFile,
                data: Bytes::from_static(&[0xC4]),
            }
        );
    }

    #[test]
    fn test_vendor_schema_lookup() {
        let mut registry = ServiceRegistry::standard();
        let opaque = registry
            .decode_confirmed(ConfirmedServiceChoice::ConfirmedPrivateTransfer, &TRANSFER)
            .unwrap();
        let ConfirmedServiceRequest::ConfirmedPrivateTransfer(request) = opaque else {
            panic!("expected a private transfer");
        };
        assert!(matches!(request.parameters, Some(PrivateParameters::Opaque(_))));

        registry.register_vendor(
            25,
            8,
            VendorSchema::new(vec![
                VendorField::required("setpoint", 0, FieldKind::Real),
                VendorField::required("mode", 1, FieldKind::Unsigned),
            ]),
        );
        assert!(registry.lookup_vendor(25, 8).is_some());
        assert!(registry.lookup_vendor(25, 9).is_none());

        let structured = registry
            .decode_confirmed(ConfirmedServiceChoice::ConfirmedPrivateTransfer, &TRANSFER)
            .unwrap();
        let ConfirmedServiceRequest::ConfirmedPrivateTransfer(request) = structured else {
            panic!("expected a private transfer");
        };
        let parameters = request.parameters.unwrap();
        assert_eq!(parameters.get("mode"), Some(&ApplicationValue::Unsigned(2)));
    }

    #[test]
    fn test_who_is_roundtrip_through_registry() {
        let registry = ServiceRegistry::standard();
        let request = UnconfirmedServiceRequest::WhoIs(WhoIsRequest::for_range(10, 20));
        let data = request.to_bytes().unwrap();
        assert_eq!(
            registry.decode_unconfirmed(request.service_choice(), &data).unwrap(),
            request
        );
    }
}
