//! BACnet Transport Engine
//!
//! Turns "send a confirmed request, get a response" into the exchange of
//! APDUs defined by clause 5: invoke ID correlation, segmentation in both
//! directions, retransmission and timeouts. The same engine serves inbound
//! requests through a [`ServiceHandler`].
//!
//! # Overview
//!
//! The engine is a single tokio task owning every piece of exchange state:
//! outstanding requests, partially received segmented messages and the
//! cache of responses used to answer duplicate requests. A
//! [`TransportEngine`] handle talks to it over a channel, so every method
//! returns without waiting on the network.
//!
//! Frames leave through a [`NetworkLink`]; frames that arrive on the link
//! are handed to [`TransportEngine::on_receive`]. Addressing below the
//! application layer is the link's business, peers are opaque
//! [`PeerAddress`] values.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use async_trait::async_trait;
//! use bytes::Bytes;
//! use bacnet_stack::object::{ObjectIdentifier, ObjectType, PropertyIdentifier};
//! use bacnet_stack::service::{ConfirmedServiceRequest, ReadPropertyRequest, ServiceRegistry};
//! use bacnet_stack::transport::{
//!     EngineConfig, NetworkLink, NoServices, PeerAddress, TransportEngine, TransportError,
//! };
//!
//! struct Udp(tokio::net::UdpSocket);
//!
//! #[async_trait]
//! impl NetworkLink for Udp {
//!     async fn send(&self, peer: &PeerAddress, apdu: Bytes) -> Result<(), TransportError> {
//!         let target = std::net::SocketAddr::try_from(peer)?;
//!         self.0.send_to(&apdu, target).await?;
//!         Ok(())
//!     }
//! }
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let socket = tokio::net::UdpSocket::bind("0.0.0.0:47808").await?;
//! let engine = TransportEngine::spawn(
//!     EngineConfig::default(),
//!     ServiceRegistry::standard(),
//!     Arc::new(Udp(socket)),
//!     Arc::new(NoServices),
//! );
//!
//! let peer = PeerAddress::from("192.168.1.20:47808".parse::<std::net::SocketAddr>()?);
//! let request = ConfirmedServiceRequest::ReadProperty(ReadPropertyRequest::new(
//!     ObjectIdentifier::new(ObjectType::AnalogInput, 1),
//!     PropertyIdentifier::PresentValue,
//! ));
//! let ack = engine.send_confirmed(&peer, &request)?.await?;
//! println!("{ack:?}");
//! # Ok(())
//! # }
//! ```

use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::{mpsc, oneshot};

use crate::app::{Apdu, UnconfirmedRequest};
use crate::encoding::EncodingError;
use crate::service::{
    ConfirmedServiceChoice, ConfirmedServiceRequest, ServiceRegistry, UnconfirmedServiceRequest,
};

pub mod config;
pub mod correlator;
mod engine;
pub mod handler;
pub mod invoke;


pub use config::{EngineConfig, PeerConfig};
pub use correlator::{RequestError, RequestId, RequestResult, ServiceFuture, WaitElapsed};
pub use handler::{NoServices, ServiceContext, ServiceHandler};
pub use invoke::InvokeIdAllocator;

use engine::{Command, Engine};

/// Result type for transport operations
pub type Result<T> = std::result::Result<T, TransportError>;

/// Errors that can occur in transport operations
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("encoding error: {0}")]
    Encoding(#[from] EncodingError),
    #[error("link error: {0}")]
    Link(String),
    #[error("invalid peer address {0}")]
    InvalidAddress(PeerAddress),
    /// The engine task has stopped.
    #[error("transport engine is not running")]
    Closed,
}

/// Opaque address of a remote device, as understood by the
/// [`NetworkLink`]. The empty address stands for a local broadcast.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct PeerAddress(Bytes);

impl PeerAddress {
    pub fn new(address: impl Into<Bytes>) -> Self {
        Self(address.into())
    }

    pub fn broadcast() -> Self {
        Self(Bytes::new())
    }

    pub fn is_broadcast(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Display for PeerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match SocketAddr::try_from(self) {
            Ok(address) => write!(f, "{address}"),
            Err(_) if self.is_broadcast() => write!(f, "broadcast"),
            Err(_) => write!(f, "{}", hex::encode(&self.0)),
        }
    }
}

/// BACnet/IP style address: the IP octets followed by the port.
impl From<SocketAddr> for PeerAddress {
    fn from(address: SocketAddr) -> Self {
        let mut octets = match address.ip() {
            IpAddr::V4(ip) => ip.octets().to_vec(),
            IpAddr::V6(ip) => ip.octets().to_vec(),
        };
        octets.extend_from_slice(&address.port().to_be_bytes());
        Self(octets.into())
    }
}

impl TryFrom<&PeerAddress> for SocketAddr {
    type Error = TransportError;

    fn try_from(peer: &PeerAddress) -> Result<Self> {
        let bytes = peer.as_bytes();
        let ip = match bytes.len() {
            6 => {
                let octets: [u8; 4] = bytes[..4]
                    .try_into()
                    .map_err(|_| TransportError::InvalidAddress(peer.clone()))?;
                IpAddr::V4(Ipv4Addr::from(octets))
            }
            18 => {
                let octets: [u8; 16] = bytes[..16]
                    .try_into()
                    .map_err(|_| TransportError::InvalidAddress(peer.clone()))?;
                IpAddr::V6(Ipv6Addr::from(octets))
            }
            _ => return Err(TransportError::InvalidAddress(peer.clone())),
        };
        let port = u16::from_be_bytes([bytes[bytes.len() - 2], bytes[bytes.len() - 1]]);
        Ok(SocketAddr::new(ip, port))
    }
}

/// Outbound side of the network layer.
///
/// Implementations frame the APDU for their medium and deliver it to
/// `peer`. The engine shares the link and never assumes exclusive use.
#[async_trait]
pub trait NetworkLink: Send + Sync {
    async fn send(&self, peer: &PeerAddress, apdu: Bytes) -> Result<()>;
}

/// Handle to a running transport engine. Cheap to clone.
#[derive(Clone)]
pub struct TransportEngine {
    commands: mpsc::UnboundedSender<Command>,
    link: Arc<dyn NetworkLink>,
    next_request: Arc<AtomicU64>,
}

impl TransportEngine {
    /// Start the engine task on the current tokio runtime.
    pub fn spawn(
        config: EngineConfig,
        registry: ServiceRegistry,
        link: Arc<dyn NetworkLink>,
        handler: Arc<dyn ServiceHandler>,
    ) -> Self {
        let (commands, command_rx) = mpsc::unbounded_channel();
        let (replies, reply_rx) = mpsc::unbounded_channel();
        let engine = Engine::new(config, Arc::new(registry), Arc::clone(&link), handler, replies);
        tokio::spawn(engine.run(command_rx, reply_rx));
        Self {
            commands,
            link,
            next_request: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Send a confirmed request. The returned future resolves with the
    /// peer's answer, a timeout or a cancellation.
    pub fn send_confirmed(
        &self,
        peer: &PeerAddress,
        request: &ConfirmedServiceRequest,
    ) -> Result<ServiceFuture> {
        self.send_confirmed_data(peer, request.service_choice(), request.to_bytes()?)
    }

    /// Send a confirmed request with pre-encoded service data.
    pub fn send_confirmed_data(
        &self,
        peer: &PeerAddress,
        service_choice: ConfirmedServiceChoice,
        service_data: Bytes,
    ) -> Result<ServiceFuture> {
        let id = RequestId(self.next_request.fetch_add(1, Ordering::Relaxed));
        let (completer, future) = correlator::channel(id, self.commands.clone());
        self.commands
            .send(Command::Send {
                id,
                peer: peer.clone(),
                service_choice,
                service_data,
                completer,
            })
            .map_err(|_| TransportError::Closed)?;
        Ok(future)
    }

    /// Send an unconfirmed request straight to the link.
    pub async fn send_unconfirmed(
        &self,
        peer: &PeerAddress,
        request: &UnconfirmedServiceRequest,
    ) -> Result<()> {
        let apdu = Apdu::UnconfirmedRequest(UnconfirmedRequest {
            service_choice: request.service_choice(),
            service_data: request.to_bytes()?,
        });
        self.link.send(peer, apdu.to_bytes()).await
    }

    /// Feed an APDU received from `peer`.
    pub fn on_receive(&self, peer: PeerAddress, apdu: Bytes) -> Result<()> {
        self.commands
            .send(Command::Receive { peer, apdu })
            .map_err(|_| TransportError::Closed)
    }

    /// Replace what the engine knows about `peer`. Applies to requests sent
    /// afterwards.
    pub fn set_peer_config(&self, peer: PeerAddress, config: PeerConfig) -> Result<()> {
        self.commands
            .send(Command::SetPeerConfig { peer, config })
            .map_err(|_| TransportError::Closed)
    }

    /// Stop the engine. Outstanding requests complete with
    /// [`RequestError::Cancelled`].
    pub async fn shutdown(&self) -> Result<()> {
        let (done, stopped) = oneshot::channel();
        self.commands
            .send(Command::Shutdown(done))
            .map_err(|_| TransportError::Closed)?;
        stopped.await.map_err(|_| TransportError::Closed)
    }
}

impl fmt::Debug for TransportEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransportEngine")
            .field("running", &!self.commands.is_closed())
            .finish_non_exhaustive()
    }
}
