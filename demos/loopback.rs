//! BACnet Loopback Example
//!
//! Runs a client and a responder device on two transport engines joined by
//! an in-memory wire. The client discovers the device, reads properties
//! (one of them large enough to need a segmented response) and writes one.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;

use async_trait::async_trait;
use bacnet_stack::{
    app::MaxApduSize,
    client::{BacnetClient, DeviceDirectory},
    encoding::{ApplicationValue, Element, PropertyValue},
    object::{ObjectIdentifier, ObjectType, PropertyIdentifier, Segmentation},
    service::{
        self, ErrorClass, ErrorCode, IAmRequest, PropertyReference, ReadAccessSpecification,
        ReadPropertyAck,
        ReadPropertyRequest, ServiceError, ServiceRegistry, UnconfirmedServiceRequest, WhoIsRequest,
        WritePropertyRequest,
    },
    transport::{
        EngineConfig, NetworkLink, PeerAddress, ServiceContext, ServiceHandler, TransportEngine,
        TransportError,
    },
};
use bytes::Bytes;
use tokio::sync::mpsc;

const DEVICE_ID: u32 = 12345;
const VENDOR_ID: u16 = 260;

/// One direction of the wire. Frames are queued and delivered by a
/// forwarding task, the way a socket reader would.
struct Wire {
    frames: mpsc::UnboundedSender<Bytes>,
}

#[async_trait]
impl NetworkLink for Wire {
    async fn send(&self, _peer: &PeerAddress, apdu: Bytes) -> Result<(), TransportError> {
        self.frames
            .send(apdu)
            .map_err(|_| TransportError::Link("wire cut".into()))
    }
}

fn wire(from: PeerAddress, to: Arc<OnceLock<TransportEngine>>) -> Arc<Wire> {
    let (frames, mut rx) = mpsc::unbounded_channel::<Bytes>();
    tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            if let Some(engine) = to.get() {
                if engine.on_receive(from.clone(), frame).is_err() {
                    break;
                }
            }
        }
    });
    Arc::new(Wire { frames })
}

/// A device with a few analog inputs.
struct Responder {
    engine: OnceLock<TransportEngine>,
    properties: Mutex<HashMap<(ObjectIdentifier, PropertyIdentifier), PropertyValue>>,
}

impl Responder {
    fn new(inputs: u32) -> Self {
        let device = ObjectIdentifier::new(ObjectType::Device, DEVICE_ID);
        let mut properties = HashMap::new();
        properties.insert(
            (device, PropertyIdentifier::ObjectName),
            PropertyValue::single(format!("Test Device {DEVICE_ID}").as_str()),
        );
        let object_list = std::iter::once(device)
            .chain((0..inputs).map(|i| ObjectIdentifier::new(ObjectType::AnalogInput, i)))
            .map(|id| Element::Application(ApplicationValue::ObjectIdentifier(id)))
            .collect();
        properties.insert((device, PropertyIdentifier::ObjectList), PropertyValue(object_list));

        for i in 0..inputs {
            let input = ObjectIdentifier::new(ObjectType::AnalogInput, i);
            properties.insert(
                (input, PropertyIdentifier::ObjectName),
                PropertyValue::single(format!("Zone {i} Temperature").as_str()),
            );
            properties.insert(
                (input, PropertyIdentifier::PresentValue),
                PropertyValue::single(20.0f32 + i as f32 * 0.5),
            );
        }
        Self {
            engine: OnceLock::new(),
            properties: Mutex::new(properties),
        }
    }
}

#[async_trait]
impl ServiceHandler for Responder {
    async fn who_is(&self, _ctx: &ServiceContext, peer: &PeerAddress, request: WhoIsRequest) {
        if !request.matches(DEVICE_ID) {
            return;
        }
        let i_am = IAmRequest::new(
            ObjectIdentifier::new(ObjectType::Device, DEVICE_ID),
            1476,
            Segmentation::Both,
            VENDOR_ID,
        );
        if let Some(engine) = self.engine.get() {
            if let Err(error) = engine
                .send_unconfirmed(peer, &UnconfirmedServiceRequest::IAm(i_am))
                .await
            {
                log::warn!("I-Am not sent: {error}");
            }
        }
    }

    async fn read_property(
        &self,
        _ctx: &ServiceContext,
        _peer: &PeerAddress,
        request: ReadPropertyRequest,
    ) -> service::Result<ReadPropertyAck> {
        let properties = self.properties.lock().unwrap();
        let value = properties
            .get(&(request.object_identifier, request.property_identifier))
            .cloned()
            .ok_or(ServiceError::error(ErrorClass::Property, ErrorCode::UnknownProperty))?;
        Ok(ReadPropertyAck {
            object_identifier: request.object_identifier,
            property_identifier: request.property_identifier,
            property_array_index: request.property_array_index,
            property_value: value,
        })
    }

    async fn write_property(
        &self,
        _ctx: &ServiceContext,
        _peer: &PeerAddress,
        request: WritePropertyRequest,
    ) -> service::Result<()> {
        let key = (request.object_identifier, request.property_identifier);
        let mut properties = self.properties.lock().unwrap();
        match properties.get_mut(&key) {
            Some(value) => {
                *value = request.property_value;
                Ok(())
            }
            None => Err(ServiceError::error(ErrorClass::Property, ErrorCode::WriteAccessDenied)),
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    println!("BACnet Loopback Example");
    println!("=======================\n");

    let client_address = PeerAddress::from("10.0.0.1:47808".parse::<std::net::SocketAddr>()?);
    let device_address = PeerAddress::from("10.0.0.2:47808".parse::<std::net::SocketAddr>()?);

    let client_slot = Arc::new(OnceLock::new());
    let device_slot = Arc::new(OnceLock::new());

    let directory = Arc::new(DeviceDirectory::new());
    let client_engine = TransportEngine::spawn(
        // small APDUs so the object list needs a segmented response
        EngineConfig::default().with_max_apdu(MaxApduSize::Up206),
        ServiceRegistry::standard(),
        wire(client_address.clone(), device_slot.clone()),
        directory.clone(),
    );
    let responder = Arc::new(Responder::new(40));
    let device_engine = TransportEngine::spawn(
        EngineConfig::default(),
        ServiceRegistry::standard(),
        wire(device_address.clone(), client_slot.clone()),
        responder.clone(),
    );
    let _ = client_slot.set(client_engine.clone());
    let _ = device_slot.set(device_engine.clone());
    let _ = responder.engine.set(device_engine.clone());

    let client = BacnetClient::new(client_engine.clone());

    let info = client.discover(&directory, DEVICE_ID, Duration::from_secs(3)).await?;
    println!("Found device {} at {} (vendor {})", info.device_id, info.address, info.vendor_id);

    let device = ObjectIdentifier::new(ObjectType::Device, DEVICE_ID);
    let name = client
        .read_property(&info.address, device, PropertyIdentifier::ObjectName)
        .await?;
    println!("Object name: {name:?}");

    let objects = client
        .read_property(&info.address, device, PropertyIdentifier::ObjectList)
        .await?;
    println!("Object list: {} entries (segmented response)", objects.0.len());

    let zone = ObjectIdentifier::new(ObjectType::AnalogInput, 3);
    client
        .write_property(
            &info.address,
            WritePropertyRequest::new(
                zone,
                PropertyIdentifier::PresentValue,
                PropertyValue::single(18.0f32),
            ),
        )
        .await?;

    let results = client
        .read_property_multiple(
            &info.address,
            vec![ReadAccessSpecification::new(
                zone,
                vec![
                    PropertyReference::new(PropertyIdentifier::ObjectName),
                    PropertyReference::new(PropertyIdentifier::PresentValue),
                ],
            )],
        )
        .await;
    match results {
        Ok(results) => println!("ReadPropertyMultiple: {results:?}"),
        // the responder only implements ReadProperty and WriteProperty
        Err(error) => println!("ReadPropertyMultiple refused: {error}"),
    }

    let missing = client
        .read_property(&info.address, zone, PropertyIdentifier::Units)
        .await;
    println!("Units: {missing:?}");

    client_engine.shutdown().await?;
    device_engine.shutdown().await?;
    println!("\nDone.");
    Ok(())
}
