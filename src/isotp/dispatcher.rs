//! Single-flight stream arbitration.
//!
//! At most one message is reassembled and one message is segmented at any time. Frames that do not
//! belong to the open streams are dropped, and a second send while one is in flight is rejected.
//! Nothing is queued.
use tracing::{debug, warn};

use crate::can::{CanAdapter, Frame, Identifier};
use crate::isotp::constants::FrameType;
use crate::isotp::error::Error;
use crate::isotp::receiver::{Receiver, RxStatus};
use crate::isotp::sender::Sender;
use crate::isotp::{reply_id, IsoTpConfig, Message};
use crate::time::time_passed;

/// What happened during one [`Dispatcher::tick`].
#[derive(Debug, Default, PartialEq)]
pub struct Events {
    /// A message was fully received.
    pub received: Option<Message>,
    /// The outbound message finished sending.
    pub sent: bool,
}

pub struct Dispatcher {
    config: IsoTpConfig,
    rx: Option<Receiver>,
    tx: Option<Sender>,
    sent: bool,
}

impl Dispatcher {
    pub fn new(config: IsoTpConfig) -> Self {
        Self {
            config,
            rx: None,
            tx: None,
            sent: false,
        }
    }

    pub fn config(&self) -> &IsoTpConfig {
        &self.config
    }

    pub fn is_receiving(&self) -> bool {
        self.rx.is_some()
    }

    pub fn is_sending(&self) -> bool {
        self.tx.is_some()
    }

    fn interval_ms(&self) -> u32 {
        self.config.tx_interval.as_millis() as u32
    }

    fn timeout_ms(&self) -> u32 {
        self.config.timeout.as_millis() as u32
    }

    fn accepts(&self, id: Identifier) -> bool {
        id == self.config.rx_id || Some(id) == self.config.functional_id
    }

    /// Requests on the functional ID are answered on the physical channel.
    fn physical(&self, id: Identifier) -> Identifier {
        if Some(id) == self.config.functional_id {
            self.config.rx_id
        } else {
            id
        }
    }

    /// Process at most one received frame and push the next outgoing frame if one is due.
    pub fn tick<C: CanAdapter>(&mut self, can: &mut C, now: u32) -> Events {
        self.expire(now);

        let received = match can.recv() {
            Some(frame) => self.on_frame(can, &frame, now),
            None => None,
        };

        self.poll_send(can, now);

        Events {
            received,
            sent: std::mem::take(&mut self.sent),
        }
    }

    /// Start sending `data` as the response to a request received on `address`. Rejected with
    /// [`Error::Busy`] while another send is in flight, without touching it. The first frame goes
    /// out right away if the controller has room.
    pub fn send<C: CanAdapter>(
        &mut self,
        can: &mut C,
        now: u32,
        data: &[u8],
        address: Identifier,
    ) -> Result<(), Error> {
        if self.tx.is_some() {
            warn!("Send rejected, previous message still in flight");
            return Err(Error::Busy);
        }

        let peer = self.physical(address);
        debug!("TX {}", hex::encode(data));
        self.tx = Some(Sender::new(peer, reply_id(peer), data, self.config.padding)?);
        self.poll_send(can, now);
        Ok(())
    }

    /// Push the next frame of the outbound message if it is due.
    pub fn poll_send<C: CanAdapter>(&mut self, can: &mut C, now: u32) {
        let interval = self.interval_ms();
        let Some(tx) = self.tx.as_mut() else {
            return;
        };
        if !tx.is_due(now, interval) {
            return;
        }
        let Some(data) = tx.pending_frame() else {
            return;
        };

        let sent = Frame::new(tx.tx_id(), &data).and_then(|frame| can.send(&frame));
        match sent {
            Ok(()) => tx.commit(now),
            Err(e) => {
                debug!("TX deferred: {}", e);
                tx.attempted(now);
            }
        }

        if tx.is_complete() {
            self.tx = None;
            self.sent = true;
        }
    }

    fn expire(&mut self, now: u32) {
        let timeout = self.timeout_ms();

        if let Some(rx) = &self.rx {
            if time_passed(now, rx.last_frame()) > timeout {
                warn!("RX from {:?} timed out", rx.id());
                self.rx = None;
            }
        }

        if let Some(tx) = &self.tx {
            if tx.timed_out(now, timeout) {
                warn!("TX to {:?} timed out", tx.peer());
                self.tx = None;
            }
        }
    }

    fn on_frame<C: CanAdapter>(&mut self, can: &mut C, frame: &Frame, now: u32) -> Option<Message> {
        let data = frame.payload();
        if data.is_empty() || !self.accepts(frame.id) {
            debug!("Dropping {:?}", frame);
            return None;
        }

        match FrameType::from(data[0]) {
            FrameType::FlowControl => {
                self.on_flow_control(frame, now);
                None
            }
            FrameType::Single | FrameType::First => {
                if let Some(rx) = &self.rx {
                    if rx.id() != frame.id {
                        debug!("Dropping {:?}, receive from {:?} in progress", frame, rx.id());
                        return None;
                    }
                }
                self.rx = Some(Receiver::new(frame.id, now));
                self.feed(can, frame, now)
            }
            FrameType::Consecutive => {
                if self.rx.as_ref().map(|rx| rx.id()) == Some(frame.id) {
                    self.feed(can, frame, now)
                } else {
                    debug!("Dropping unexpected CF {:?}", frame);
                    None
                }
            }
            FrameType::Unknown => {
                debug!("Dropping unknown frame type {:?}", frame);
                None
            }
        }
    }

    fn on_flow_control(&mut self, frame: &Frame, now: u32) {
        let Some(tx) = self.tx.as_mut() else {
            debug!("Dropping FC, nothing to send");
            return;
        };
        if tx.peer() != frame.id {
            debug!("Dropping FC from {:?}", frame.id);
            return;
        }

        if let Err(e) = tx.on_flow_control(frame.payload(), now) {
            warn!("TX aborted: {}", e);
            self.tx = None;
        }
    }

    fn feed<C: CanAdapter>(&mut self, can: &mut C, frame: &Frame, now: u32) -> Option<Message> {
        let rx = self.rx.as_mut()?;

        match rx.on_frame(frame.payload(), now, &self.config) {
            Ok(RxStatus::InProgress { flow_control }) => {
                if let Some(fc) = flow_control {
                    let reply = reply_id(self.physical(frame.id));
                    let sent = Frame::new(reply, &fc).and_then(|fc| can.send(&fc));
                    if let Err(e) = sent {
                        warn!("Dropping FC: {}", e);
                    }
                }
                None
            }
            Ok(RxStatus::Complete(data)) => {
                debug!("RX {}", hex::encode(&data));
                self.rx = None;
                Some(Message { id: frame.id, data })
            }
            Err(e) => {
                warn!("RX from {:?} aborted: {}", frame.id, e);
                self.rx = None;
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::can::RingBufferCan;

    const TESTER: Identifier = Identifier::Standard(0x7e0);
    const ECU: Identifier = Identifier::Standard(0x7e8);

    fn setup() -> (Dispatcher, RingBufferCan) {
        let config = IsoTpConfig::new(TESTER);
        (Dispatcher::new(config), RingBufferCan::new(8))
    }

    fn frame(id: Identifier, data: &[u8]) -> Frame {
        Frame::new(id, data).unwrap()
    }

    #[test]
    fn single_frame_request() {
        let (mut dispatcher, mut can) = setup();
        can.inject(frame(TESTER, &[0x02, 0x10, 0x02]));

        let events = dispatcher.tick(&mut can, 0);
        assert_eq!(
            events.received,
            Some(Message {
                id: TESTER,
                data: vec![0x10, 0x02]
            })
        );
        assert!(!dispatcher.is_receiving());
    }

    #[test]
    fn misaddressed_frames_dropped() {
        let (mut dispatcher, mut can) = setup();
        can.inject(frame(Identifier::Standard(0x7e1), &[0x02, 0x10, 0x02]));
        assert_eq!(dispatcher.tick(&mut can, 0), Events::default());
    }

    #[test]
    fn functional_request_answered_on_physical_id() {
        let (mut dispatcher, mut can) = setup();
        let bus = can.clone();
        can.inject(frame(Identifier::Standard(0x7df), &[0x02, 0x3e, 0x00]));

        let request = dispatcher.tick(&mut can, 0).received.unwrap();
        dispatcher.send(&mut can, 0, &[0x7e, 0x00], request.id).unwrap();
        let sent = bus.pop_sent().unwrap();
        assert_eq!(sent.id, ECU);
    }

    #[test]
    fn multi_frame_request_sends_flow_control() {
        let (mut dispatcher, mut can) = setup();
        let bus = can.clone();

        can.inject(frame(TESTER, &[0x10, 0x09, 1, 2, 3, 4, 5, 6]));
        assert_eq!(dispatcher.tick(&mut can, 0).received, None);
        assert!(dispatcher.is_receiving());
        assert_eq!(
            bus.pop_sent().unwrap().payload(),
            &[0x30, 0, 0, 0xaa, 0xaa, 0xaa, 0xaa, 0xaa]
        );

        // A different peer cannot interleave
        can.inject(frame(Identifier::Standard(0x7df), &[0x02, 0x3e, 0x00]));
        assert_eq!(dispatcher.tick(&mut can, 1).received, None);

        can.inject(frame(TESTER, &[0x21, 7, 8, 9]));
        let events = dispatcher.tick(&mut can, 2);
        assert_eq!(events.received.unwrap().data, vec![1, 2, 3, 4, 5, 6, 7, 8, 9]);
    }

    #[test]
    fn receive_times_out() {
        let (mut dispatcher, mut can) = setup();
        can.inject(frame(TESTER, &[0x10, 0x09, 1, 2, 3, 4, 5, 6]));
        dispatcher.tick(&mut can, 0);
        assert!(dispatcher.is_receiving());
        dispatcher.tick(&mut can, 1001);
        assert!(!dispatcher.is_receiving());
    }

    #[test]
    fn second_send_rejected() {
        let (mut dispatcher, mut can) = setup();
        let bus = can.clone();
        let long = [0x55u8; 20];

        dispatcher.send(&mut can, 0, &long, TESTER).unwrap();
        assert!(dispatcher.is_sending());
        assert_eq!(dispatcher.send(&mut can, 0, &[0x50, 0x01], TESTER), Err(Error::Busy));

        // First send unaffected: FF out, still waiting for flow control
        let ff = bus.drain_sent();
        assert_eq!(ff.len(), 1);
        assert_eq!(ff[0].payload()[..2], [0x10, 20]);

        can.inject(frame(TESTER, &[0x30, 0x00, 0x00]));
        dispatcher.tick(&mut can, 10);
        assert_eq!(bus.pop_sent().unwrap().payload()[0], 0x21);
        let events = dispatcher.tick(&mut can, 20);
        assert_eq!(bus.pop_sent().unwrap().payload()[0], 0x22);
        assert!(events.sent);
        assert!(!dispatcher.is_sending());
    }

    #[test]
    fn consecutive_frames_paced() {
        let (mut dispatcher, mut can) = setup();
        let bus = can.clone();

        dispatcher.send(&mut can, 0, &[0x55; 20], TESTER).unwrap();
        bus.drain_sent();
        can.inject(frame(TESTER, &[0x30, 0x00, 0x00]));
        dispatcher.tick(&mut can, 5);
        // Flow control arrived 5ms after the first frame, next CF waits for the 10ms interval
        assert_eq!(bus.pending_tx(), 0);
        dispatcher.tick(&mut can, 10);
        assert_eq!(bus.pending_tx(), 1);
        dispatcher.tick(&mut can, 15);
        assert_eq!(bus.pending_tx(), 1);
    }

    #[test]
    fn full_tx_buffer_retried() {
        let (mut dispatcher, _) = setup();
        let mut can = RingBufferCan::new(1);
        let bus = can.clone();
        can.send(&frame(ECU, &[0])).unwrap();

        dispatcher.send(&mut can, 0, &[0x50, 0x01], TESTER).unwrap();
        assert!(dispatcher.is_sending());
        bus.drain_sent();

        dispatcher.tick(&mut can, 5);
        assert_eq!(bus.pending_tx(), 0);
        let events = dispatcher.tick(&mut can, 10);
        assert!(events.sent);
        assert_eq!(bus.pop_sent().unwrap().payload()[..3], [0x02, 0x50, 0x01]);
    }

    #[test]
    fn stuck_tx_buffer_releases_send_slot() {
        let (mut dispatcher, _) = setup();
        let mut can = RingBufferCan::new(1);
        let bus = can.clone();
        can.send(&frame(ECU, &[0])).unwrap();

        dispatcher.send(&mut can, 0, &[0x50, 0x01], TESTER).unwrap();
        for now in (10..=1000).step_by(10) {
            dispatcher.tick(&mut can, now);
        }
        assert!(dispatcher.is_sending());
        assert_eq!(dispatcher.send(&mut can, 1000, &[0x51, 0x01], TESTER), Err(Error::Busy));

        dispatcher.tick(&mut can, 1001);
        assert!(!dispatcher.is_sending());

        bus.drain_sent();
        dispatcher.send(&mut can, 1002, &[0x51, 0x01], TESTER).unwrap();
        assert_eq!(bus.pop_sent().unwrap().payload()[..3], [0x02, 0x51, 0x01]);
    }

    #[test]
    fn flow_control_from_other_peer_ignored() {
        let (mut dispatcher, mut can) = setup();
        let bus = can.clone();
        dispatcher.send(&mut can, 0, &[0x55; 20], TESTER).unwrap();
        bus.drain_sent();

        can.inject(frame(Identifier::Standard(0x7df), &[0x30, 0x00, 0x00]));
        dispatcher.tick(&mut can, 20);
        assert_eq!(bus.pending_tx(), 0);
        assert!(dispatcher.is_sending());
    }

    #[test]
    fn flow_control_overflow_aborts_send() {
        let (mut dispatcher, mut can) = setup();
        dispatcher.send(&mut can, 0, &[0x55; 20], TESTER).unwrap();
        can.inject(frame(TESTER, &[0x32, 0x00, 0x00]));
        let events = dispatcher.tick(&mut can, 1);
        assert!(!events.sent);
        assert!(!dispatcher.is_sending());
    }
}
