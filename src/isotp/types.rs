use std::time::Duration;

use crate::isotp::constants::FlowStatus;
use crate::isotp::error::Error;

#[derive(Debug, Copy, Clone, PartialEq)]
pub struct FlowControlConfig {
    pub flow_status: FlowStatus,
    pub block_size: u8,
    pub separation_time_min: Duration,
}

impl TryFrom<&[u8]> for FlowControlConfig {
    type Error = Error;
    fn try_from(data: &[u8]) -> Result<Self, Self::Error> {
        if data.len() < 3 {
            return Err(Error::MalformedFrame);
        }

        let flow_status = match data[0] & 0x0f {
            0x0 => FlowStatus::ContinueToSend,
            0x1 => FlowStatus::Wait,
            0x2 => FlowStatus::Overflow,
            _ => return Err(Error::FlowControl),
        };

        let block_size = data[1];

        let separation_time_min = data[2] as u64;
        let separation_time_min = match separation_time_min {
            0x0..=0x7f => Duration::from_millis(separation_time_min),
            0xf1..=0xf9 => Duration::from_micros((separation_time_min - 0xf0) * 100),
            _ => return Err(Error::MalformedFrame),
        };

        Ok(Self {
            flow_status,
            block_size,
            separation_time_min,
        })
    }
}
