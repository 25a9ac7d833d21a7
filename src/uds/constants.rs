//! Constants for the UDS server.
use strum_macros::{Display, EnumIter, FromRepr};

/// Offset added to the request SID in a positive response
pub const POSITIVE_RESPONSE: u8 = 0x40;
/// SID of a negative response
pub const NEGATIVE_RESPONSE: u8 = 0x7f;

/// Service Identifiers (SIDs) as defined in ISO 14229, limited to the served subset
#[derive(Debug, PartialEq, Copy, Clone, Display, FromRepr)]
#[repr(u8)]
pub enum ServiceIdentifier {
    // Diagnostic and Communication Management
    DiagnosticSessionControl = 0x10,
    EcuReset = 0x11,

    // Data Transmission
    ReadDataByIdentifier = 0x22,

    // Routine
    RoutineControl = 0x31,

    // Upload/Download
    RequestDownload = 0x34,
    TransferData = 0x36,
    RequestTransferExit = 0x37,
}

impl ServiceIdentifier {
    /// Services that need an active programming session. Calls to these keep the session alive.
    pub fn is_programming_service(&self) -> bool {
        matches!(
            self,
            ServiceIdentifier::RoutineControl
                | ServiceIdentifier::RequestDownload
                | ServiceIdentifier::TransferData
                | ServiceIdentifier::RequestTransferExit
        )
    }
}

/// Data Identifiers (DIDs) as defined in ISO 14229 that can be read from this ECU
#[derive(Debug, PartialEq, Eq, Copy, Clone, Display, EnumIter, FromRepr)]
#[repr(u16)]
pub enum DataIdentifier {
    EcuSerialNumber = 0xf18c,
    VehicleManufacturerEcuHardwareNumber = 0xf191,
}

/// Diagnostic Session Type Sub-Function ID as defined in ISO 14229, supported sessions only
#[derive(Debug, PartialEq, Eq, Copy, Clone, Display, FromRepr)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[repr(u8)]
pub enum SessionType {
    Default = 0x01,
    Programming = 0x02,
}

/// ECU Reset Sub-Function ID as defined in ISO 14229. Only a hard reset is supported.
#[derive(Debug, PartialEq, Eq, Copy, Clone, FromRepr)]
#[repr(u8)]
pub enum ResetType {
    /// Simulates power-on/start-up sequence after a power loss
    HardReset = 0x01,
}

/// Routine Control Sub-Function ID as defined in ISO 14229
#[derive(Debug, PartialEq, Copy, Clone)]
#[repr(u8)]
pub enum RoutineControlType {
    Start = 0x01,
    Stop = 0x02,
    RequestResults = 0x03,
}

/// Routine Identifier of the erase memory routine
pub const ROUTINE_ERASE_MEMORY: u16 = 0xff00;

/// dataFormatIdentifier for uncompressed, unencrypted data
pub const DATA_FORMAT_RAW: u8 = 0x00;
