//! BACnet Client Utilities
//!
//! Typed helpers for common client operations on top of a
//! [`TransportEngine`]: reading and writing properties, device discovery,
//! COV subscriptions and private transfers.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use bacnet_stack::client::{BacnetClient, DeviceDirectory};
//! use bacnet_stack::object::{ObjectIdentifier, ObjectType, PropertyIdentifier};
//! use bacnet_stack::service::ServiceRegistry;
//! use bacnet_stack::transport::{EngineConfig, NetworkLink, TransportEngine};
//!
//! # async fn run(link: Arc<dyn NetworkLink>) -> Result<(), Box<dyn std::error::Error>> {
//! let directory = Arc::new(DeviceDirectory::new());
//! let engine = TransportEngine::spawn(
//!     EngineConfig::default(),
//!     ServiceRegistry::standard(),
//!     link,
//!     directory.clone(),
//! );
//! let client = BacnetClient::new(engine);
//!
//! let device = client.discover(&directory, 1234, Duration::from_secs(3)).await?;
//! let name = client
//!     .read_property(
//!         &device.address,
//!         ObjectIdentifier::new(ObjectType::Device, 1234),
//!         PropertyIdentifier::ObjectName,
//!     )
//!     .await?;
//! println!("{name:?}");
//! # Ok(())
//! # }
//! ```

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Notify;

use crate::app::MaxApduSize;
use crate::encoding::PropertyValue;
use crate::object::{ObjectIdentifier, PropertyIdentifier, Segmentation};
use crate::service::{
    ConfirmedServiceAck, ConfirmedServiceChoice, ConfirmedServiceRequest, IAmRequest,
    PrivateTransferAck,
    PrivateTransferRequest, ReadAccessResult, ReadAccessSpecification, ReadPropertyMultipleRequest,
    ReadPropertyRequest, SubscribeCovRequest, UnconfirmedServiceRequest, WhoIsRequest,
    WritePropertyRequest,
};
use crate::transport::{
    PeerAddress, PeerConfig, RequestError, ServiceContext, ServiceHandler, TransportEngine,
    TransportError,
};

/// Result type for client operations
pub type Result<T> = core::result::Result<T, ClientError>;

/// Errors that can occur in client operations
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Request(#[from] RequestError),
    /// The peer answered with an acknowledgement of the wrong kind.
    #[error("unexpected response to {0}")]
    UnexpectedResponse(ConfirmedServiceChoice),
    #[error("device {0} did not answer Who-Is")]
    DeviceNotFound(u32),
}

/// A device that announced itself with I-Am.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    pub device_id: u32,
    pub address: PeerAddress,
    pub vendor_id: u16,
    pub max_apdu: u32,
    pub segmentation: Segmentation,
}

impl DeviceInfo {
    pub fn from_i_am(address: PeerAddress, i_am: &IAmRequest) -> Self {
        Self {
            device_id: i_am.device_identifier.instance,
            address,
            vendor_id: i_am.vendor_identifier,
            max_apdu: i_am.max_apdu_length_accepted,
            segmentation: i_am.segmentation_supported,
        }
    }

    /// Peer parameters implied by the announcement.
    pub fn peer_config(&self) -> PeerConfig {
        let max_apdu = usize::try_from(self.max_apdu).unwrap_or(usize::MAX);
        PeerConfig::default()
            .with_max_apdu(MaxApduSize::from_size(max_apdu))
            .with_segmentation(self.segmentation)
    }
}

/// Collects I-Am announcements. Install it as (or call it from) the
/// engine's [`ServiceHandler`].
#[derive(Debug, Default)]
pub struct DeviceDirectory {
    devices: Mutex<BTreeMap<u32, DeviceInfo>>,
    changed: Notify,
}

impl DeviceDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<u32, DeviceInfo>> {
        self.devices.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Record an announcement, replacing an earlier one from the same device.
    pub fn insert(&self, info: DeviceInfo) {
        log::debug!("device {} at {}", info.device_id, info.address);
        self.lock().insert(info.device_id, info);
        self.changed.notify_waiters();
    }

    pub fn get(&self, device_id: u32) -> Option<DeviceInfo> {
        self.lock().get(&device_id).cloned()
    }

    /// Every device seen so far, ordered by instance.
    pub fn devices(&self) -> Vec<DeviceInfo> {
        self.lock().values().cloned().collect()
    }

    /// Wait until `device_id` has announced itself.
    pub async fn wait_for(&self, device_id: u32, timeout: Duration) -> Option<DeviceInfo> {
        let wait = async {
            loop {
                let changed = self.changed.notified();
                if let Some(info) = self.get(device_id) {
                    return info;
                }
                changed.await;
            }
        };
        tokio::time::timeout(timeout, wait).await.ok()
    }
}

#[async_trait]
impl ServiceHandler for DeviceDirectory {
    async fn i_am(&self, _ctx: &ServiceContext, peer: &PeerAddress, request: IAmRequest) {
        self.insert(DeviceInfo::from_i_am(peer.clone(), &request));
    }
}

/// High-level BACnet client
#[derive(Debug, Clone)]
pub struct BacnetClient {
    engine: TransportEngine,
}

impl BacnetClient {
    pub fn new(engine: TransportEngine) -> Self {
        Self { engine }
    }

    pub fn engine(&self) -> &TransportEngine {
        &self.engine
    }

    async fn confirmed(
        &self,
        peer: &PeerAddress,
        request: ConfirmedServiceRequest,
    ) -> Result<Option<ConfirmedServiceAck>> {
        Ok(self.engine.send_confirmed(peer, &request)?.await?)
    }

    /// A request answered with a SimpleACK.
    async fn simple(&self, peer: &PeerAddress, request: ConfirmedServiceRequest) -> Result<()> {
        let service_choice = request.service_choice();
        match self.confirmed(peer, request).await? {
            None => Ok(()),
            Some(_) => Err(ClientError::UnexpectedResponse(service_choice)),
        }
    }

    /// Read one property
    pub async fn read_property(
        &self,
        peer: &PeerAddress,
        object: ObjectIdentifier,
        property: PropertyIdentifier,
    ) -> Result<PropertyValue> {
        self.read(peer, ReadPropertyRequest::new(object, property)).await
    }

    /// Read one element of an array property; index 0 is the array length.
    pub async fn read_property_element(
        &self,
        peer: &PeerAddress,
        object: ObjectIdentifier,
        property: PropertyIdentifier,
        index: u32,
    ) -> Result<PropertyValue> {
        let mut request = ReadPropertyRequest::new(object, property);
        request.property_array_index = Some(index);
        self.read(peer, request).await
    }

    async fn read(
        &self,
        peer: &PeerAddress,
        request: ReadPropertyRequest,
    ) -> Result<PropertyValue> {
        match self.confirmed(peer, ConfirmedServiceRequest::ReadProperty(request)).await? {
            Some(ConfirmedServiceAck::ReadProperty(ack)) => Ok(ack.property_value),
            _ => Err(ClientError::UnexpectedResponse(ConfirmedServiceChoice::ReadProperty)),
        }
    }

    /// Read several properties of several objects in one request
    pub async fn read_property_multiple(
        &self,
        peer: &PeerAddress,
        specifications: Vec<ReadAccessSpecification>,
    ) -> Result<Vec<ReadAccessResult>> {
        let request = ConfirmedServiceRequest::ReadPropertyMultiple(
            ReadPropertyMultipleRequest::new(specifications),
        );
        match self.confirmed(peer, request).await? {
            Some(ConfirmedServiceAck::ReadPropertyMultiple(ack)) => Ok(ack.results),
            _ => Err(ClientError::UnexpectedResponse(
                ConfirmedServiceChoice::ReadPropertyMultiple,
            )),
        }
    }

    pub async fn write_property(
        &self,
        peer: &PeerAddress,
        request: WritePropertyRequest,
    ) -> Result<()> {
        self.simple(peer, ConfirmedServiceRequest::WriteProperty(request)).await
    }

    /// Subscribe to, or with [`SubscribeCovRequest::cancellation`]
    /// unsubscribe from, change-of-value notifications.
    pub async fn subscribe_cov(
        &self,
        peer: &PeerAddress,
        request: SubscribeCovRequest,
    ) -> Result<()> {
        self.simple(peer, ConfirmedServiceRequest::SubscribeCov(request)).await
    }

    pub async fn private_transfer(
        &self,
        peer: &PeerAddress,
        request: PrivateTransferRequest,
    ) -> Result<PrivateTransferAck> {
        match self
            .confirmed(peer, ConfirmedServiceRequest::ConfirmedPrivateTransfer(request))
            .await?
        {
            Some(ConfirmedServiceAck::ConfirmedPrivateTransfer(ack)) => Ok(ack),
            _ => Err(ClientError::UnexpectedResponse(
                ConfirmedServiceChoice::ConfirmedPrivateTransfer,
            )),
        }
    }

    /// Broadcast Who-Is. Answers arrive as I-Am at the engine's handler.
    pub async fn who_is(&self, request: WhoIsRequest) -> Result<()> {
        self.engine
            .send_unconfirmed(&PeerAddress::broadcast(), &UnconfirmedServiceRequest::WhoIs(request))
            .await?;
        Ok(())
    }

    /// Find `device_id` with a Who-Is and remember its parameters for later
    /// requests. `directory` must be receiving the engine's I-Am traffic.
    pub async fn discover(
        &self,
        directory: &DeviceDirectory,
        device_id: u32,
        timeout: Duration,
    ) -> Result<DeviceInfo> {
        if let Some(info) = directory.get(device_id) {
            return Ok(info);
        }
        self.who_is(WhoIsRequest::for_device(device_id)).await?;
        let info = directory
            .wait_for(device_id, timeout)
            .await
            .ok_or(ClientError::DeviceNotFound(device_id))?;
        self.engine.set_peer_config(info.address.clone(), info.peer_config())?;
        Ok(info)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoding::ApplicationValue;
    use crate::object::ObjectType;
    use crate::service::{
        self, ErrorClass, ErrorCode, PropertyReference, ReadPropertyAck, ReadPropertyMultipleAck,
        ReadResult,
        ReadResultElement, ServiceError, ServiceRegistry,
    };
    use crate::transport::{EngineConfig, NetworkLink};
    use bytes::Bytes;
    use std::sync::{Arc, OnceLock};

    const DEVICE: u32 = 1234;

    fn device() -> ObjectIdentifier {
        ObjectIdentifier::new(ObjectType::Device, DEVICE)
    }

    fn address(n: u8) -> PeerAddress {
        PeerAddress::new(vec![192, 168, 0, n, 0xBA, 0xC0])
    }

    /// Delivers frames to the other engine as coming from `local`.
    struct Wire {
        local: PeerAddress,
        remote: OnceLock<TransportEngine>,
    }

    #[async_trait]
    impl NetworkLink for Wire {
        async fn send(&self, _peer: &PeerAddress, apdu: Bytes) -> crate::transport::Result<()> {
            self.remote
                .get()
                .ok_or(TransportError::Closed)?
                .on_receive(self.local.clone(), apdu)
        }
    }

    /// A device that answers Who-Is and a handful of reads.
    struct Server {
        engine: OnceLock<TransportEngine>,
    }

    #[async_trait]
    impl ServiceHandler for Server {
        async fn who_is(&self, _ctx: &ServiceContext, peer: &PeerAddress, request: WhoIsRequest) {
            if !request.matches(DEVICE) {
                return;
            }
            let i_am = IAmRequest::new(device(), 480, Segmentation::NoSegmentation, 260);
            if let Some(engine) = self.engine.get() {
                engine
                    .send_unconfirmed(peer, &UnconfirmedServiceRequest::IAm(i_am))
                    .await
                    .unwrap();
            }
        }

        async fn read_property(
            &self,
            _ctx: &ServiceContext,
            _peer: &PeerAddress,
            request: ReadPropertyRequest,
        ) -> service::Result<ReadPropertyAck> {
            let value = match (request.property_identifier, request.property_array_index) {
                (PropertyIdentifier::ObjectName, None) => PropertyValue::single("boiler room"),
                (PropertyIdentifier::ObjectList, Some(0)) => PropertyValue::single(3u32),
                _ => {
                    return Err(ServiceError::error(
                        ErrorClass::Property,
                        ErrorCode::UnknownProperty,
                    ))
                }
            };
            Ok(ReadPropertyAck {
                object_identifier: request.object_identifier,
                property_identifier: request.property_identifier,
                property_array_index: request.property_array_index,
                property_value: value,
            })
        }

        async fn read_property_multiple(
            &self,
            _ctx: &ServiceContext,
            _peer: &PeerAddress,
            request: ReadPropertyMultipleRequest,
        ) -> service::Result<ReadPropertyMultipleAck> {
            let results = request
                .specifications
                .into_iter()
                .map(|spec| ReadAccessResult {
                    object_identifier: spec.object_identifier,
                    results: Some(
                        spec.property_references
                            .into_iter()
                            .map(|reference| ReadResultElement {
                                property_identifier: reference.property_identifier,
                                property_array_index: reference.property_array_index,
                                result: ReadResult::Value(PropertyValue::single(true)),
                            })
                            .collect(),
                    ),
                })
                .collect();
            Ok(ReadPropertyMultipleAck { results })
        }

        async fn subscribe_cov(
            &self,
            _ctx: &ServiceContext,
            _peer: &PeerAddress,
            _request: SubscribeCovRequest,
        ) -> service::Result<()> {
            Ok(())
        }
    }

    /// Client at address 1 with a directory, server at address 2.
    fn setup() -> (BacnetClient, Arc<DeviceDirectory>) {
        let client_wire = Arc::new(Wire {
            local: address(1),
            remote: OnceLock::new(),
        });
        let server_wire = Arc::new(Wire {
            local: address(2),
            remote: OnceLock::new(),
        });
        let directory = Arc::new(DeviceDirectory::new());
        let server = Arc::new(Server {
            engine: OnceLock::new(),
        });

        let client_engine = TransportEngine::spawn(
            EngineConfig::default(),
            ServiceRegistry::standard(),
            client_wire.clone(),
            directory.clone(),
        );
        let server_engine = TransportEngine::spawn(
            EngineConfig::default(),
            ServiceRegistry::standard(),
            server_wire.clone(),
            server.clone(),
        );
        let _ = client_wire.remote.set(server_engine.clone());
        let _ = server_wire.remote.set(client_engine.clone());
        let _ = server.engine.set(server_engine);
        (BacnetClient::new(client_engine), directory)
    }

    #[tokio::test(start_paused = true)]
    async fn test_discover_configures_peer() {
        let (client, directory) = setup();
        let info = client
            .discover(&directory, DEVICE, Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(info.address, address(2));
        assert_eq!(info.vendor_id, 260);
        assert_eq!(info.peer_config().max_apdu_length_accepted, MaxApduSize::Up480);
        assert_eq!(directory.devices(), vec![info]);

        let missing = client.discover(&directory, 99, Duration::from_secs(1)).await;
        assert!(matches!(missing, Err(ClientError::DeviceNotFound(99))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_read_helpers() {
        let (client, _) = setup();
        let name = client
            .read_property(&address(2), device(), PropertyIdentifier::ObjectName)
            .await
            .unwrap();
        assert_eq!(name.as_single(), Some(&ApplicationValue::from("boiler room")));

        let length = client
            .read_property_element(&address(2), device(), PropertyIdentifier::ObjectList, 0)
            .await
            .unwrap();
        assert_eq!(length, PropertyValue::single(3u32));

        let error = client
            .read_property(&address(2), device(), PropertyIdentifier::Location)
            .await;
        assert!(matches!(
            error,
            Err(ClientError::Request(RequestError::Error {
                class: ErrorClass::Property,
                code: ErrorCode::UnknownProperty,
            }))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_read_property_multiple() {
        let (client, _) = setup();
        let results = client
            .read_property_multiple(
                &address(2),
                vec![ReadAccessSpecification::new(
                    ObjectIdentifier::new(ObjectType::BinaryInput, 3),
                    vec![PropertyReference::new(PropertyIdentifier::PresentValue)],
                )],
            )
            .await
            .unwrap();
        assert_eq!(results.len(), 1);
        let elements = results[0].results.as_ref().unwrap();
        assert_eq!(elements[0].result, ReadResult::Value(PropertyValue::single(true)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_simple_ack_helpers() {
        let (client, _) = setup();
        let subscription = SubscribeCovRequest::new(7, device(), false, 300);
        client.subscribe_cov(&address(2), subscription).await.unwrap();

        // the server does not implement WriteProperty
        let write = WritePropertyRequest::new(
            device(),
            PropertyIdentifier::Description,
            PropertyValue::single("x"),
        );
        assert!(matches!(
            client.write_property(&address(2), write).await,
            Err(ClientError::Request(RequestError::Reject(_)))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_for_late_announcement() {
        let directory = Arc::new(DeviceDirectory::new());
        let announcer = directory.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(200)).await;
            let i_am = IAmRequest::new(device(), 1476, Segmentation::Both, 7);
            announcer
                .handle_unconfirmed(
                    &ServiceContext::unconfirmed(),
                    &address(9),
                    UnconfirmedServiceRequest::IAm(i_am),
                )
                .await;
        });

        let info = directory.wait_for(DEVICE, Duration::from_secs(1)).await.unwrap();
        assert_eq!(info.address, address(9));
        assert_eq!(info.segmentation, Segmentation::Both);
        assert!(directory.wait_for(1, Duration::from_millis(100)).await.is_none());
    }
}
