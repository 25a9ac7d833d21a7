//! Types used in the UDS protocol.
use std::time::Duration;

/// Session timing record returned by DiagnosticSessionControl (0x10)
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SessionParameterRecord {
    /// Performance requirement for the server (i.e. the ECU) to start with the response message
    /// after the reception of a request message.
    pub p2_server_max: Duration,
    /// Performance requirement for the server (i.e. the ECU) to start with the response message
    /// after the transmission of a "ResponsePending" message.
    pub p2_star_server_max: Duration,
}

impl SessionParameterRecord {
    /// Wire format: P2 in 1 ms resolution, P2* in 10 ms resolution, both big endian u16.
    pub fn to_bytes(&self) -> [u8; 4] {
        let p2 = (self.p2_server_max.as_millis().min(u16::MAX as u128) as u16).to_be_bytes();
        let p2_star = (self.p2_star_server_max.as_millis() / 10).min(u16::MAX as u128) as u16;
        let p2_star = p2_star.to_be_bytes();
        [p2[0], p2[1], p2_star[0], p2_star[1]]
    }
}

/// An open download, created by RequestDownload (0x34) and closed by RequestTransferExit (0x37).
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct DownloadTransfer {
    pub start: u32,
    pub size: u32,
    /// Next address to be written
    pub cursor: u32,
    /// Block sequence counter of the last accepted TransferData
    pub last_seq: u8,
}

impl DownloadTransfer {
    pub fn new(start: u32, size: u32) -> Self {
        Self {
            start,
            size,
            cursor: start,
            last_seq: 0,
        }
    }

    /// Exclusive end address.
    pub fn end(&self) -> u32 {
        self.start + self.size
    }

    pub fn remaining(&self) -> u32 {
        self.end() - self.cursor
    }
}
