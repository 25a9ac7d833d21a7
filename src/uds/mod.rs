//! Unified Diagnostic Services (UDS) server, implements the flash programming subset of ISO 14229
//! ## Example
//! ```rust
//! use udsboot::flash::{FlashDriver, FlashLoader, FlashRegion, SimulatedFlash};
//! use udsboot::uds::{UdsConfig, UdsServer};
//!
//! let region = FlashRegion::default();
//! let mut loader = FlashLoader::new(FlashDriver::new(SimulatedFlash::new(region), region));
//! let mut server = UdsServer::new(UdsConfig::default());
//!
//! let response = server.handle(&[0x10, 0x02], &mut loader, 0).unwrap();
//! assert_eq!(response.data[..2], [0x50, 0x02]);
//! ```

mod constants;
mod nrc;
mod request;
mod server;
mod types;

use std::time::Duration;

use crate::flash::FlashRegion;

pub use constants::*;
pub use nrc::NegativeResponseCode;
pub use request::Request;
pub use server::{Response, UdsServer};
pub use types::*;

/// S3: max silence in a non-default session.
pub const S3_SERVER_TIMEOUT_MS: u64 = 60_000;

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct UdsConfig {
    /// Range erase and download requests may target. Must lie within the flash region.
    pub download_region: FlashRegion,
    /// Inactivity after which a programming session falls back to the default session
    pub s3_timeout: Duration,
    pub p2_server_max: Duration,
    pub p2_star_server_max: Duration,
    /// maxNumberOfBlockLength reported by RequestDownload, counts SID and sequence counter
    pub max_block_length: u16,
    /// Returned for [`DataIdentifier::VehicleManufacturerEcuHardwareNumber`]
    pub hardware_id: String,
    /// Returned for [`DataIdentifier::EcuSerialNumber`]
    pub serial_number: String,
}

impl Default for UdsConfig {
    fn default() -> Self {
        Self {
            download_region: FlashRegion::default(),
            s3_timeout: Duration::from_millis(S3_SERVER_TIMEOUT_MS),
            p2_server_max: Duration::from_millis(50),
            p2_star_server_max: Duration::from_millis(5000),
            max_block_length: 0x0402,
            hardware_id: "UDSBOOT-HW-01".to_string(),
            serial_number: "0000000001".to_string(),
        }
    }
}
