//! Generic CAN types and traits

pub mod ring;

use std::fmt;

pub use ring::RingBufferCan;

/// Maximum payload of a classic CAN frame.
pub const CAN_MAX_DLEN: usize = 8;

/// Flag in a raw arbitration ID marking a 29-bit identifier.
pub const EXTENDED_ID_FLAG: u32 = 0x8000_0000;

const STANDARD_ID_MASK: u32 = 0x7ff;
const EXTENDED_ID_MASK: u32 = 0x1fff_ffff;

/// Identifier for a CAN frame
#[derive(Copy, Clone, PartialOrd, Eq, PartialEq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Identifier {
    Standard(u32),
    Extended(u32),
}

impl Identifier {
    pub fn is_standard(&self) -> bool {
        match self {
            Identifier::Standard(_) => true,
            Identifier::Extended(_) => false,
        }
    }
    pub fn is_extended(&self) -> bool {
        !self.is_standard()
    }

    /// The ID fits its format: 11 bits for standard, 29 bits for extended.
    pub fn is_valid(&self) -> bool {
        match *self {
            Identifier::Standard(id) => id <= STANDARD_ID_MASK,
            Identifier::Extended(id) => id <= EXTENDED_ID_MASK,
        }
    }

    /// Decode a raw arbitration ID where bit 31 selects the extended format.
    pub fn from_raw(raw: u32) -> Identifier {
        if raw & EXTENDED_ID_FLAG != 0 {
            Identifier::Extended(raw & EXTENDED_ID_MASK)
        } else {
            Identifier::Standard(raw & STANDARD_ID_MASK)
        }
    }

    /// Encode into a raw arbitration ID, setting bit 31 for extended IDs.
    pub fn to_raw(&self) -> u32 {
        match *self {
            Identifier::Standard(id) => id & STANDARD_ID_MASK,
            Identifier::Extended(id) => (id & EXTENDED_ID_MASK) | EXTENDED_ID_FLAG,
        }
    }
}

impl fmt::Debug for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Identifier::Extended(id) => write!(f, "0x{:08x}", id),
            Identifier::Standard(id) => write!(f, "0x{:03x}", id),
        }
    }
}

impl From<u32> for Identifier {
    fn from(id: u32) -> Identifier {
        if id <= STANDARD_ID_MASK {
            Identifier::Standard(id)
        } else {
            Identifier::Extended(id)
        }
    }
}

impl From<Identifier> for u32 {
    fn from(val: Identifier) -> u32 {
        match val {
            Identifier::Standard(id) => id,
            Identifier::Extended(id) => id,
        }
    }
}

/// A classic CAN frame
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Frame {
    /// Arbitration ID
    pub id: Identifier,
    /// Data length code, 0..=8
    pub dlc: u8,
    /// Frame Data, only the first `dlc` bytes are valid
    pub data: [u8; CAN_MAX_DLEN],
}

impl Frame {
    pub fn new(id: Identifier, data: &[u8]) -> Result<Frame, crate::error::Error> {
        if data.len() > CAN_MAX_DLEN {
            return Err(crate::error::Error::MalformedFrame);
        }

        // Check if the ID makes sense
        if !id.is_valid() {
            return Err(crate::error::Error::MalformedFrame);
        }

        let mut buf = [0u8; CAN_MAX_DLEN];
        buf[..data.len()].copy_from_slice(data);

        Ok(Frame {
            id,
            dlc: data.len() as u8,
            data: buf,
        })
    }

    /// The valid payload bytes.
    pub fn payload(&self) -> &[u8] {
        &self.data[..(self.dlc as usize).min(CAN_MAX_DLEN)]
    }
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Frame")
            .field("id", &self.id)
            .field("data", &hex::encode(self.payload()))
            .finish()
    }
}

/// Frame level access to a CAN controller. Implementations never block: a full transmit buffer is
/// reported as an error and the frame is dropped by the caller.
pub trait CanAdapter {
    /// Queue a frame for transmission. Fails if no hardware buffer is free.
    fn send(&mut self, frame: &Frame) -> Result<(), crate::error::Error>;
    /// Take the oldest received frame, if any.
    fn recv(&mut self) -> Option<Frame>;
    /// Block until every queued frame has left the controller.
    fn flush(&mut self);
}
