//! Server role: the object model behind the engine.

use async_trait::async_trait;
use bytes::Bytes;

use super::PeerAddress;
use crate::service::{
    self, AcknowledgeAlarmRequest, ConfirmedServiceAck, ConfirmedServiceChoice,
    ConfirmedServiceRequest, CovNotificationRequest, DeviceCommunicationControlRequest,
    IAmRequest, IHaveRequest, PrivateTransferAck, PrivateTransferRequest, ReadPropertyAck,
    ReadPropertyMultipleAck, ReadPropertyMultipleRequest, ReadPropertyRequest,
    ReinitializeDeviceRequest, RejectReason, ServiceError, SubscribeCovRequest,
    TimeSynchronizationRequest, UnconfirmedServiceChoice, UnconfirmedServiceRequest,
    WhoHasRequest, WhoIsRequest, WritePropertyRequest,
};

/// Details of the request being served.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceContext {
    /// `None` for unconfirmed services.
    pub invoke_id: Option<u8>,
    /// Largest service data the response may carry, segmentation included.
    /// `None` for unconfirmed services.
    pub max_response_length: Option<usize>,
}

impl ServiceContext {
    pub fn unconfirmed() -> Self {
        Self {
            invoke_id: None,
            max_response_length: None,
        }
    }
}

fn unrecognized() -> ServiceError {
    ServiceError::Reject(RejectReason::UnrecognizedService)
}

/// Handles decoded requests for the local device.
///
/// The engine calls [`handle_confirmed`](Self::handle_confirmed) and
/// [`handle_unconfirmed`](Self::handle_unconfirmed). Their default
/// implementations route each request to the per-service method, so an
/// implementation usually overrides only the services it supports. Every
/// confirmed service left at its default answers with
/// Reject(unrecognized-service); unconfirmed ones are ignored.
///
/// ```rust
/// use async_trait::async_trait;
/// use bacnet_stack::encoding::PropertyValue;
/// use bacnet_stack::service::{self, ReadPropertyAck, ReadPropertyRequest};
/// use bacnet_stack::transport::{PeerAddress, ServiceContext, ServiceHandler};
///
/// struct Thermostat;
///
/// #[async_trait]
/// impl ServiceHandler for Thermostat {
///     async fn read_property(
///         &self,
///         _ctx: &ServiceContext,
///         _peer: &PeerAddress,
///         request: ReadPropertyRequest,
///     ) -> service::Result<ReadPropertyAck> {
///         Ok(ReadPropertyAck {
///             object_identifier: request.object_identifier,
///             property_identifier: request.property_identifier,
///             property_array_index: request.property_array_index,
///             property_value: PropertyValue::single(21.5f32),
///         })
///     }
/// }
/// ```
#[async_trait]
pub trait ServiceHandler: Send + Sync {
    /// `Ok(None)` is answered with a SimpleACK, `Ok(Some(_))` with a
    /// ComplexACK.
    async fn handle_confirmed(
        &self,
        ctx: &ServiceContext,
        peer: &PeerAddress,
        request: ConfirmedServiceRequest,
    ) -> service::Result<Option<ConfirmedServiceAck>> {
        use ConfirmedServiceRequest as Request;

        match request {
            Request::AcknowledgeAlarm(request) => {
                self.acknowledge_alarm(ctx, peer, request).await.map(|()| None)
            }
            Request::ConfirmedCovNotification(request) => {
                self.cov_notification(ctx, peer, request).await.map(|()| None)
            }
            Request::SubscribeCov(request) => {
                self.subscribe_cov(ctx, peer, request).await.map(|()| None)
            }
            Request::ReadProperty(request) => self
                .read_property(ctx, peer, request)
                .await
                .map(|ack| Some(ConfirmedServiceAck::ReadProperty(ack))),
            Request::ReadPropertyMultiple(request) => self
                .read_property_multiple(ctx, peer, request)
                .await
                .map(|ack| Some(ConfirmedServiceAck::ReadPropertyMultiple(ack))),
            Request::WriteProperty(request) => {
                self.write_property(ctx, peer, request).await.map(|()| None)
            }
            Request::DeviceCommunicationControl(request) => self
                .device_communication_control(ctx, peer, request)
                .await
                .map(|()| None),
            Request::ReinitializeDevice(request) => {
                self.reinitialize_device(ctx, peer, request).await.map(|()| None)
            }
            Request::ConfirmedPrivateTransfer(request) => self
                .private_transfer(ctx, peer, request)
                .await
                .map(|ack| Some(ConfirmedServiceAck::ConfirmedPrivateTransfer(ack))),
            Request::Other {
                service_choice,
                data,
            } => self.other_confirmed(ctx, peer, service_choice, data).await,
        }
    }

    async fn handle_unconfirmed(
        &self,
        ctx: &ServiceContext,
        peer: &PeerAddress,
        request: UnconfirmedServiceRequest,
    ) {
        use UnconfirmedServiceRequest as Request;

        match request {
            Request::WhoIs(request) => self.who_is(ctx, peer, request).await,
            Request::IAm(request) => self.i_am(ctx, peer, request).await,
            Request::WhoHas(request) => self.who_has(ctx, peer, request).await,
            Request::IHave(request) => self.i_have(ctx, peer, request).await,
            Request::UnconfirmedCovNotification(request) => {
                self.unconfirmed_cov_notification(ctx, peer, request).await
            }
            Request::UnconfirmedPrivateTransfer(request) => {
                self.unconfirmed_private_transfer(ctx, peer, request).await
            }
            Request::TimeSynchronization(request) => {
                self.time_synchronization(ctx, peer, request).await
            }
            Request::UtcTimeSynchronization(request) => {
                self.utc_time_synchronization(ctx, peer, request).await
            }
            Request::Other {
                service_choice,
                data,
            } => self.other_unconfirmed(ctx, peer, service_choice, data).await,
        }
    }

    async fn acknowledge_alarm(
        &self,
        _ctx: &ServiceContext,
        _peer: &PeerAddress,
        _request: AcknowledgeAlarmRequest,
    ) -> service::Result<()> {
        Err(unrecognized())
    }

    async fn cov_notification(
        &self,
        _ctx: &ServiceContext,
        _peer: &PeerAddress,
        _request: CovNotificationRequest,
    ) -> service::Result<()> {
        Err(unrecognized())
    }

    async fn subscribe_cov(
        &self,
        _ctx: &ServiceContext,
        _peer: &PeerAddress,
        _request: SubscribeCovRequest,
    ) -> service::Result<()> {
        Err(unrecognized())
    }

    async fn read_property(
        &self,
        _ctx: &ServiceContext,
        _peer: &PeerAddress,
        _request: ReadPropertyRequest,
    ) -> service::Result<ReadPropertyAck> {
        Err(unrecognized())
    }

    async fn read_property_multiple(
        &self,
        _ctx: &ServiceContext,
        _peer: &PeerAddress,
        _request: ReadPropertyMultipleRequest,
    ) -> service::Result<ReadPropertyMultipleAck> {
        Err(unrecognized())
    }

    async fn write_property(
        &self,
        _ctx: &ServiceContext,
        _peer: &PeerAddress,
        _request: WritePropertyRequest,
    ) -> service::Result<()> {
        Err(unrecognized())
    }

    async fn device_communication_control(
        &self,
        _ctx: &ServiceContext,
        _peer: &PeerAddress,
        _request: DeviceCommunicationControlRequest,
    ) -> service::Result<()> {
        Err(unrecognized())
    }

    async fn reinitialize_device(
        &self,
        _ctx: &ServiceContext,
        _peer: &PeerAddress,
        _request: ReinitializeDeviceRequest,
    ) -> service::Result<()> {
        Err(unrecognized())
    }

    async fn private_transfer(
        &self,
        _ctx: &ServiceContext,
        _peer: &PeerAddress,
        _request: PrivateTransferRequest,
    ) -> service::Result<PrivateTransferAck> {
        Err(unrecognized())
    }

    /// Services registered with
    /// [`register_confirmed_opaque`].
    ///
    /// [`register_confirmed_opaque`]: crate::service::ServiceRegistry::register_confirmed_opaque
    async fn other_confirmed(
        &self,
        _ctx: &ServiceContext,
        _peer: &PeerAddress,
        _service_choice: ConfirmedServiceChoice,
        _data: Bytes,
    ) -> service::Result<Option<ConfirmedServiceAck>> {
        Err(unrecognized())
    }

    async fn who_is(&self, _ctx: &ServiceContext, _peer: &PeerAddress, _request: WhoIsRequest) {}

    async fn i_am(&self, _ctx: &ServiceContext, _peer: &PeerAddress, _request: IAmRequest) {}

    async fn who_has(&self, _ctx: &ServiceContext, _peer: &PeerAddress, _request: WhoHasRequest) {}

    async fn i_have(&self, _ctx: &ServiceContext, _peer: &PeerAddress, _request: IHaveRequest) {}

    async fn unconfirmed_cov_notification(
        &self,
        _ctx: &ServiceContext,
        _peer: &PeerAddress,
        _request: CovNotificationRequest,
    ) {
    }

    async fn unconfirmed_private_transfer(
        &self,
        _ctx: &ServiceContext,
        _peer: &PeerAddress,
        _request: PrivateTransferRequest,
    ) {
    }

    async fn time_synchronization(
        &self,
        _ctx: &ServiceContext,
        _peer: &PeerAddress,
        _request: TimeSynchronizationRequest,
    ) {
    }

    async fn utc_time_synchronization(
        &self,
        _ctx: &ServiceContext,
        _peer: &PeerAddress,
        _request: TimeSynchronizationRequest,
    ) {
    }

    async fn other_unconfirmed(
        &self,
        _ctx: &ServiceContext,
        _peer: &PeerAddress,
        _service_choice: UnconfirmedServiceChoice,
        _data: Bytes,
    ) {
    }
}

/// Answers nothing: every confirmed request is rejected and unconfirmed
/// ones are ignored. Suits a pure client.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoServices;

impl ServiceHandler for NoServices {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoding::PropertyValue;
    use crate::object::{ObjectIdentifier, ObjectType, PropertyIdentifier};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Counter {
        writes: AtomicUsize,
    }

    #[async_trait]
    impl ServiceHandler for Counter {
        async fn write_property(
            &self,
            _ctx: &ServiceContext,
            _peer: &PeerAddress,
            _request: WritePropertyRequest,
        ) -> service::Result<()> {
            self.writes.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn write() -> ConfirmedServiceRequest {
        ConfirmedServiceRequest::WriteProperty(WritePropertyRequest::new(
            ObjectIdentifier::new(ObjectType::AnalogValue, 1),
            PropertyIdentifier::PresentValue,
            PropertyValue::single(1.0f32),
        ))
    }

    fn context() -> ServiceContext {
        ServiceContext {
            invoke_id: Some(1),
            max_response_length: Some(1476),
        }
    }

    #[tokio::test]
    async fn test_default_routing() {
        let handler = Counter {
            writes: AtomicUsize::new(0),
        };
        let peer = PeerAddress::broadcast();
        assert_eq!(handler.handle_confirmed(&context(), &peer, write()).await, Ok(None));
        assert_eq!(handler.writes.load(Ordering::SeqCst), 1);

        let read = ConfirmedServiceRequest::ReadProperty(ReadPropertyRequest::new(
            ObjectIdentifier::new(ObjectType::AnalogValue, 1),
            PropertyIdentifier::PresentValue,
        ));
        assert_eq!(
            handler.handle_confirmed(&context(), &peer, read).await,
            Err(ServiceError::Reject(RejectReason::UnrecognizedService))
        );
    }

    #[tokio::test]
    async fn test_no_services_rejects() {
        let peer = PeerAddress::broadcast();
        assert_eq!(
            NoServices.handle_confirmed(&context(), &peer, write()).await,
            Err(ServiceError::Reject(RejectReason::UnrecognizedService))
        );
        NoServices
            .handle_unconfirmed(
                &ServiceContext::unconfirmed(),
                &peer,
                UnconfirmedServiceRequest::WhoIs(WhoIsRequest::new()),
            )
            .await;
    }
}
