//! ISO Transport Protocol (ISO-TP) server side, implements ISO 15765-2 with normal addressing on
//! classic CAN.
//!
//! [`Receiver`] and [`Sender`] reassemble and segment one message each. The [`Dispatcher`] owns at
//! most one of each and decides which frames reach them: one inbound and one outbound message at a
//! time, everything else is dropped.
//! ## Example:
//! ```rust
//! use udsboot::can::{Identifier, RingBufferCan};
//! use udsboot::isotp::{Dispatcher, IsoTpConfig};
//!
//! let mut can = RingBufferCan::default();
//! let mut dispatcher = Dispatcher::new(IsoTpConfig::new(Identifier::Standard(0x7e0)));
//!
//! let events = dispatcher.tick(&mut can, 0);
//! if let Some(request) = events.received {
//!     dispatcher.send(&mut can, 0, &[request.data[0] | 0x40], request.id).unwrap();
//! }
//! ```

mod constants;
mod dispatcher;
pub mod error;
mod receiver;
mod sender;
mod types;

use std::time::Duration;

use crate::can::Identifier;

pub use constants::{FlowStatus, FrameType, MAX_PAYLOAD};
pub use dispatcher::{Dispatcher, Events};
pub use error::Error;
pub use receiver::{Receiver, RxStatus};
pub use sender::Sender;
pub use types::FlowControlConfig;

const DEFAULT_TIMEOUT_MS: u64 = 1000;
const DEFAULT_TX_INTERVAL_MS: u64 = 10;

/// Configuration of the ECU side of the transport.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct IsoTpConfig {
    /// Physical request ID, the tester sends to this
    pub rx_id: Identifier,
    /// Functional (broadcast) request ID
    pub functional_id: Option<Identifier>,
    /// Padding byte (0x00, or more efficient 0xAA)
    pub padding: u8,
    /// Block size advertised in flow control, 0 for no limit
    pub block_size: u8,
    /// Raw ST-min advertised in flow control
    pub st_min: u8,
    /// Minimum time between two outgoing frames of a segmented message
    pub tx_interval: Duration,
    /// Max time between frames of a message, in both directions, before the stream is abandoned
    pub timeout: Duration,
}

impl IsoTpConfig {
    pub fn new(rx_id: Identifier) -> Self {
        let functional_id = match rx_id {
            Identifier::Standard(_) => Identifier::Standard(0x7df),
            Identifier::Extended(_) => Identifier::Extended(0x18db_33f1),
        };

        Self {
            rx_id,
            functional_id: Some(functional_id),
            padding: 0xaa,
            block_size: 0,
            st_min: 0,
            tx_interval: Duration::from_millis(DEFAULT_TX_INTERVAL_MS),
            timeout: Duration::from_millis(DEFAULT_TIMEOUT_MS),
        }
    }

    /// ID the ECU transmits on.
    pub fn tx_id(&self) -> Identifier {
        reply_id(self.rx_id)
    }
}

impl Default for IsoTpConfig {
    fn default() -> Self {
        Self::new(Identifier::Extended(0x18da_00f1))
    }
}

/// ID a response to a request on `id` is sent on. 11-bit IDs respond on `id + 8`, 29-bit normal
/// fixed IDs swap target and source address. The result can be out of range for request IDs near
/// the top of the 11-bit space, check it with [`Identifier::is_valid`].
pub fn reply_id(id: Identifier) -> Identifier {
    match id {
        Identifier::Standard(id) => Identifier::Standard(id.wrapping_add(8)),
        Identifier::Extended(id) => {
            let bytes = id.to_be_bytes();
            // Swap last two bytes
            let id = u32::from_be_bytes([bytes[0], bytes[1], bytes[3], bytes[2]]);
            Identifier::Extended(id)
        }
    }
}

/// A complete inbound message together with the ID it arrived on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub id: Identifier,
    pub data: Vec<u8>,
}

impl Message {
    /// Source address of a 29-bit normal fixed ID.
    pub fn source(&self) -> Option<u8> {
        match self.id {
            Identifier::Extended(id) => Some((id & 0xff) as u8),
            Identifier::Standard(_) => None,
        }
    }

    /// Target address of a 29-bit normal fixed ID.
    pub fn target(&self) -> Option<u8> {
        match self.id {
            Identifier::Extended(id) => Some(((id >> 8) & 0xff) as u8),
            Identifier::Standard(_) => None,
        }
    }
}
