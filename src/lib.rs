#![doc = include_str!("../README.md")]
#![cfg_attr(not(feature = "std"), no_std)]

extern crate alloc;

pub mod app;
pub mod encoding;
pub mod object;
pub mod service;
pub mod util;

#[cfg(feature = "async")]
pub mod client;
#[cfg(feature = "async")]
pub mod transport;

// Re-export main types without glob imports to avoid conflicts
pub use app::{Apdu, MaxApduSize, MaxSegments};
pub use encoding::{ApplicationTag, EncodingError};
pub use object::{ObjectIdentifier, ObjectType, PropertyIdentifier, Segmentation};
pub use service::{ConfirmedServiceChoice, ServiceError, ServiceRegistry, UnconfirmedServiceChoice};

#[cfg(feature = "async")]
pub use transport::{EngineConfig, PeerAddress, PeerConfig, ServiceFuture, TransportEngine};

/// Largest APDU defined by the standard (clause 20.1.2.5).
pub const BACNET_MAX_APDU: usize = 1476;

#[doc(hidden)]
pub mod __private {
    pub use pastey;
}

#[cfg(test)]
mod tests {
    use crate::{Apdu, ApplicationTag, MaxApduSize, ObjectIdentifier, ObjectType, BACNET_MAX_APDU};

    #[cfg(not(feature = "std"))]
    use alloc::format;

    #[test]
    fn test_core_types() {
        let tag = ApplicationTag::Boolean;
        assert_eq!(tag as u8, 1);

        let obj_id = ObjectIdentifier::new(ObjectType::Device, 123);
        assert_eq!(obj_id.instance, 123);
        assert!(obj_id.is_valid());

        assert_eq!(MaxApduSize::Up1476.size(), BACNET_MAX_APDU);
    }

    #[test]
    fn test_decode_error_formats() {
        let err = Apdu::decode(&[0x30]).unwrap_err();
        assert!(!format!("{err}").is_empty());
    }
}
