use tracing::debug;

use crate::can::{Identifier, CAN_MAX_DLEN};
use crate::isotp::constants::{
    FlowStatus, FrameType, CF_DATA_LEN, FF_DATA_LEN, MAX_PAYLOAD, MAX_SF_DL,
};
use crate::isotp::error::Error;
use crate::isotp::types::FlowControlConfig;
use crate::time::time_passed;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum TxState {
    /// Single or first frame not out yet
    Start,
    WaitFlowControl { since: u32 },
    /// Sending consecutive frames. `remaining` counts the frames left in the current block, `None`
    /// for unlimited.
    Consecutive { remaining: Option<u8> },
    Done,
}

/// Segments one message into frames. The dispatcher decides when each frame goes out.
#[derive(Debug)]
pub struct Sender {
    peer: Identifier,
    tx_id: Identifier,
    data: Vec<u8>,
    offset: usize,
    idx: u8,
    padding: u8,
    st_min_ms: u32,
    last_tx: Option<u32>,
    /// First failed attempt since the last frame that made it out
    stalled_since: Option<u32>,
    state: TxState,
}

impl Sender {
    /// `peer` is the ID the peer sends flow control on, `tx_id` the ID this message goes out on.
    pub fn new(
        peer: Identifier,
        tx_id: Identifier,
        data: &[u8],
        padding: u8,
    ) -> Result<Self, Error> {
        if data.is_empty() {
            return Err(Error::MalformedFrame);
        }
        if data.len() > MAX_PAYLOAD {
            return Err(Error::DataTooLarge);
        }

        Ok(Self {
            peer,
            tx_id,
            data: data.to_vec(),
            offset: 0,
            idx: 1,
            padding,
            st_min_ms: 0,
            last_tx: None,
            stalled_since: None,
            state: TxState::Start,
        })
    }

    pub fn peer(&self) -> Identifier {
        self.peer
    }

    pub fn tx_id(&self) -> Identifier {
        self.tx_id
    }

    pub fn is_complete(&self) -> bool {
        self.state == TxState::Done
    }

    fn padded(&self, head: &[u8], body: &[u8]) -> [u8; CAN_MAX_DLEN] {
        let mut buf = [self.padding; CAN_MAX_DLEN];
        buf[..head.len()].copy_from_slice(head);
        buf[head.len()..head.len() + body.len()].copy_from_slice(body);
        buf
    }

    /// Frame to transmit next, if the protocol allows one right now. Does not advance; call
    /// [`Sender::commit`] once the frame was accepted by the CAN controller.
    pub fn pending_frame(&self) -> Option<[u8; CAN_MAX_DLEN]> {
        match self.state {
            TxState::Start if self.data.len() <= MAX_SF_DL => {
                let len = self.data.len();
                Some(self.padded(&[FrameType::Single as u8 | len as u8], &self.data))
            }
            TxState::Start => {
                let len = self.data.len();
                let b0 = FrameType::First as u8 | ((len >> 8) & 0xf) as u8;
                let b1 = (len & 0xff) as u8;
                Some(self.padded(&[b0, b1], &self.data[..FF_DATA_LEN]))
            }
            TxState::Consecutive { .. } => {
                let end = (self.offset + CF_DATA_LEN).min(self.data.len());
                let head = [FrameType::Consecutive as u8 | self.idx];
                Some(self.padded(&head, &self.data[self.offset..end]))
            }
            TxState::WaitFlowControl { .. } | TxState::Done => None,
        }
    }

    /// Whether enough time has passed since the previous frame or attempt to send the next one.
    pub fn is_due(&self, now: u32, interval_ms: u32) -> bool {
        match self.last_tx {
            None => true,
            Some(last) => time_passed(now, last) >= interval_ms.max(self.st_min_ms),
        }
    }

    /// Record a transmission attempt that did not make it out. The next one waits a full interval,
    /// and the stall counts toward [`Sender::timed_out`].
    pub fn attempted(&mut self, now: u32) {
        self.last_tx = Some(now);
        self.stalled_since.get_or_insert(now);
    }

    /// Advance past the frame returned by [`Sender::pending_frame`].
    pub fn commit(&mut self, now: u32) {
        self.last_tx = Some(now);
        self.stalled_since = None;

        match self.state {
            TxState::Start if self.data.len() <= MAX_SF_DL => {
                debug!("TX SF, length: {} data {}", self.data.len(), hex::encode(&self.data));
                self.offset = self.data.len();
                self.state = TxState::Done;
            }
            TxState::Start => {
                debug!("TX FF, length: {}", self.data.len());
                self.offset = FF_DATA_LEN;
                self.state = TxState::WaitFlowControl { since: now };
            }
            TxState::Consecutive { remaining } => {
                debug!("TX CF, idx: {}", self.idx);
                self.offset = (self.offset + CF_DATA_LEN).min(self.data.len());
                self.idx = (self.idx + 1) & 0xf;

                self.state = if self.offset >= self.data.len() {
                    TxState::Done
                } else {
                    match remaining {
                        Some(1) => TxState::WaitFlowControl { since: now },
                        Some(n) => TxState::Consecutive { remaining: Some(n - 1) },
                        None => TxState::Consecutive { remaining: None },
                    }
                };
            }
            TxState::WaitFlowControl { .. } | TxState::Done => {}
        }
    }

    /// Apply a flow control frame from the peer. Frames arriving while no flow control is expected
    /// are ignored.
    pub fn on_flow_control(&mut self, data: &[u8], now: u32) -> Result<(), Error> {
        let TxState::WaitFlowControl { .. } = self.state else {
            return Ok(());
        };

        let fc = FlowControlConfig::try_from(data)?;
        debug!("RX FC, data {}", hex::encode(data));

        match fc.flow_status {
            FlowStatus::ContinueToSend => {
                self.st_min_ms = fc.separation_time_min.as_millis() as u32;
                let remaining = if fc.block_size == 0 { None } else { Some(fc.block_size) };
                self.state = TxState::Consecutive { remaining };
                Ok(())
            }
            FlowStatus::Wait => {
                self.state = TxState::WaitFlowControl { since: now };
                Ok(())
            }
            FlowStatus::Overflow => Err(Error::Overflow),
        }
    }

    /// Waited longer than `timeout_ms` for flow control, or for the CAN controller to take a frame.
    pub fn timed_out(&self, now: u32, timeout_ms: u32) -> bool {
        match self.state {
            TxState::WaitFlowControl { since } => time_passed(now, since) > timeout_ms,
            TxState::Start | TxState::Consecutive { .. } => self
                .stalled_since
                .is_some_and(|since| time_passed(now, since) > timeout_ms),
            TxState::Done => false,
        }
    }
}
