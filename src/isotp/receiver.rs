use tracing::debug;

use crate::can::{Identifier, CAN_MAX_DLEN};
use crate::isotp::constants::{FlowStatus, FrameType, CF_DATA_LEN, FF_DATA_LEN, MAX_SF_DL};
use crate::isotp::error::Error;
use crate::isotp::IsoTpConfig;

#[derive(Debug, PartialEq)]
pub enum RxStatus {
    /// More frames expected. Carries a flow control frame that must be sent to the peer.
    InProgress { flow_control: Option<[u8; CAN_MAX_DLEN]> },
    Complete(Vec<u8>),
}

/// Reassembles one message from the frames of a single peer.
#[derive(Debug)]
pub struct Receiver {
    id: Identifier,
    buf: Vec<u8>,
    len: usize,
    idx: u8,
    block_count: u8,
    last_frame: u32,
}

impl Receiver {
    pub fn new(id: Identifier, now: u32) -> Self {
        Self {
            id,
            buf: Vec::new(),
            len: 0,
            idx: 1,
            block_count: 0,
            last_frame: now,
        }
    }

    pub fn id(&self) -> Identifier {
        self.id
    }

    /// Time the last frame was accepted.
    pub fn last_frame(&self) -> u32 {
        self.last_frame
    }

    fn flow_control(config: &IsoTpConfig) -> [u8; CAN_MAX_DLEN] {
        let mut fc = [config.padding; CAN_MAX_DLEN];
        fc[0] = FrameType::FlowControl as u8 | FlowStatus::ContinueToSend as u8;
        fc[1] = config.block_size;
        fc[2] = config.st_min;
        fc
    }

    pub fn on_frame(
        &mut self,
        data: &[u8],
        now: u32,
        config: &IsoTpConfig,
    ) -> Result<RxStatus, Error> {
        if data.is_empty() {
            return Err(Error::MalformedFrame);
        }
        self.last_frame = now;

        match FrameType::from(data[0]) {
            FrameType::Single => self.single_frame(data),
            FrameType::First => self.first_frame(data, config),
            FrameType::Consecutive => self.consecutive_frame(data, config),
            _ => Err(Error::UnknownFrameType),
        }
    }

    fn single_frame(&mut self, data: &[u8]) -> Result<RxStatus, Error> {
        let len = (data[0] & 0xf) as usize;
        if len == 0 || len > MAX_SF_DL || len + 1 > data.len() {
            return Err(Error::MalformedFrame);
        }

        debug!("RX SF, length: {} data {}", len, hex::encode(&data[1..len + 1]));
        Ok(RxStatus::Complete(data[1..len + 1].to_vec()))
    }

    fn first_frame(&mut self, data: &[u8], config: &IsoTpConfig) -> Result<RxStatus, Error> {
        if data.len() < CAN_MAX_DLEN {
            return Err(Error::MalformedFrame);
        }

        let b0 = data[0] as u16;
        let b1 = data[1] as u16;
        let len = ((b0 << 8 | b1) & 0xfff) as usize;
        if len <= MAX_SF_DL {
            return Err(Error::MalformedFrame);
        }

        debug!("RX FF, length: {}, data {}", len, hex::encode(&data[2..]));

        self.len = len;
        self.buf = Vec::with_capacity(len);
        self.buf.extend(&data[2..2 + FF_DATA_LEN]);
        self.idx = 1;
        self.block_count = 0;

        Ok(RxStatus::InProgress {
            flow_control: Some(Self::flow_control(config)),
        })
    }

    fn consecutive_frame(&mut self, data: &[u8], config: &IsoTpConfig) -> Result<RxStatus, Error> {
        if self.len == 0 {
            return Err(Error::MalformedFrame);
        }

        let msg_idx = data[0] & 0xf;
        if msg_idx != self.idx {
            return Err(Error::OutOfOrder);
        }

        let remaining_len = self.len - self.buf.len();
        let end_idx = std::cmp::min(remaining_len, CF_DATA_LEN) + 1;
        if end_idx > data.len() {
            return Err(Error::MalformedFrame);
        }

        self.buf.extend(&data[1..end_idx]);
        debug!("RX CF, idx: {}, data {}", self.idx, hex::encode(&data[1..end_idx]));

        self.idx = (self.idx + 1) & 0xf;

        if self.buf.len() >= self.len {
            return Ok(RxStatus::Complete(std::mem::take(&mut self.buf)));
        }

        // Ask for the next block once the advertised block size is used up
        let mut flow_control = None;
        if config.block_size > 0 {
            self.block_count += 1;
            if self.block_count == config.block_size {
                self.block_count = 0;
                flow_control = Some(Self::flow_control(config));
            }
        }

        Ok(RxStatus::InProgress { flow_control })
    }
}
