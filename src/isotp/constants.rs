#[derive(Debug, PartialEq, Copy, Clone)]
#[repr(u8)]
pub enum FrameType {
    Single = 0x00,
    First = 0x10,
    Consecutive = 0x20,
    FlowControl = 0x30,
    Unknown = 0xff,
}

pub static FRAME_TYPE_MASK: u8 = 0xf0;

impl From<u8> for FrameType {
    fn from(val: u8) -> FrameType {
        match val & FRAME_TYPE_MASK {
            0x00 => FrameType::Single,
            0x10 => FrameType::First,
            0x20 => FrameType::Consecutive,
            0x30 => FrameType::FlowControl,
            _ => FrameType::Unknown,
        }
    }
}

/// Flow status carried in the low nibble of a flow control frame.
#[derive(Debug, PartialEq, Copy, Clone)]
#[repr(u8)]
pub enum FlowStatus {
    ContinueToSend = 0x00,
    Wait = 0x01,
    Overflow = 0x02,
}

/// Largest payload expressible in a classic first frame.
pub const MAX_PAYLOAD: usize = 4095;
/// Payload bytes of a single frame with normal addressing.
pub const MAX_SF_DL: usize = 7;
/// Payload bytes carried by a first frame.
pub const FF_DATA_LEN: usize = 6;
/// Payload bytes carried by a consecutive frame.
pub const CF_DATA_LEN: usize = 7;
