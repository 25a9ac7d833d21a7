//! Tester side of the bus: a minimal ISO-TP client that drives an [`Agent`] tick by tick.
#![allow(dead_code)]
use udsboot::agent::{Agent, AgentConfig, Tick};
use udsboot::can::{Frame, Identifier, RingBufferCan};
use udsboot::flash::SimulatedFlash;
use udsboot::isotp::IsoTpConfig;
use udsboot::script::LampBank;
use udsboot::time::ManualClock;

pub const REQUEST_ID: Identifier = Identifier::Standard(0x7e0);
pub const RESPONSE_ID: Identifier = Identifier::Standard(0x7e8);
pub const FUNCTIONAL_ID: Identifier = Identifier::Standard(0x7df);

/// Max ticks to wait for the agent to put a frame on the bus.
const MAX_WAIT_TICKS: usize = 5000;
const TESTER_PADDING: u8 = 0xcc;

pub type TestAgent = Agent<RingBufferCan, SimulatedFlash, LampBank, ManualClock>;

pub fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_test_writer()
        .try_init();
}

pub fn config() -> AgentConfig {
    AgentConfig {
        isotp: IsoTpConfig::new(REQUEST_ID),
        ..AgentConfig::default()
    }
}

pub struct Tester {
    pub agent: TestAgent,
    pub bus: RingBufferCan,
    pub clock: ManualClock,
    pub reset: bool,
}

impl Tester {
    pub fn new() -> Self {
        let config = config();
        let flash = SimulatedFlash::new(config.flash);
        Self::with_flash(config, flash)
    }

    pub fn with_flash(config: AgentConfig, flash: SimulatedFlash) -> Self {
        init_logging();

        let bus = RingBufferCan::default();
        let clock = ManualClock::new(0);
        let lamp = LampBank::new(2);
        let agent = Agent::new(config, bus.clone(), flash, lamp, clock.clone()).unwrap();
        Self {
            agent,
            bus,
            clock,
            reset: false,
        }
    }

    pub fn flash(&self) -> &SimulatedFlash {
        self.agent.flash().controller()
    }

    /// Advance time by one millisecond and run one agent iteration.
    pub fn tick(&mut self) {
        self.clock.advance(1);
        if let Tick::Reset(_) = self.agent.tick() {
            self.reset = true;
        }
    }

    pub fn ticks(&mut self, n: usize) {
        for _ in 0..n {
            self.tick();
        }
    }

    pub fn inject(&self, id: Identifier, data: &[u8]) {
        let mut buf = [TESTER_PADDING; 8];
        buf[..data.len()].copy_from_slice(data);
        assert!(self.bus.inject(Frame::new(id, &buf).unwrap()));
    }

    /// Tick until the agent sends a frame.
    pub fn wait_frame(&mut self) -> Frame {
        for _ in 0..MAX_WAIT_TICKS {
            if let Some(frame) = self.bus.pop_sent() {
                assert_eq!(frame.id, RESPONSE_ID);
                return frame;
            }
            self.tick();
        }
        panic!("Agent did not send a frame");
    }

    /// Send `data` as one ISO-TP message on `id`.
    pub fn send(&mut self, id: Identifier, data: &[u8]) {
        if data.len() <= 7 {
            let mut sf = vec![data.len() as u8];
            sf.extend(data);
            self.inject(id, &sf);
            return;
        }

        let len = data.len();
        let mut ff = vec![0x10 | (len >> 8) as u8, (len & 0xff) as u8];
        ff.extend(&data[..6]);
        self.inject(id, &ff);

        let mut block_size = self.wait_flow_control();
        let mut in_block = 0;
        for (i, chunk) in data[6..].chunks(7).enumerate() {
            if block_size > 0 && in_block == block_size {
                block_size = self.wait_flow_control();
                in_block = 0;
            }

            let mut cf = vec![0x20 | ((i + 1) & 0xf) as u8];
            cf.extend(chunk);
            self.inject(id, &cf);
            self.tick();
            in_block += 1;
        }
    }

    fn wait_flow_control(&mut self) -> u8 {
        let fc = self.wait_frame();
        assert_eq!(fc.payload()[0], 0x30, "expected flow control, got {:?}", fc);
        fc.payload()[1]
    }

    /// Receive one ISO-TP message from the agent, sending flow control as needed.
    pub fn receive(&mut self) -> Vec<u8> {
        let first = self.wait_frame();
        let data = first.payload();

        match data[0] >> 4 {
            0 => {
                let len = (data[0] & 0xf) as usize;
                data[1..1 + len].to_vec()
            }
            1 => {
                let len = (((data[0] & 0xf) as usize) << 8) | data[1] as usize;
                let mut msg = data[2..].to_vec();
                self.inject(REQUEST_ID, &[0x30, 0x00, 0x00]);

                let mut idx = 1;
                while msg.len() < len {
                    let cf = self.wait_frame();
                    let cf = cf.payload();
                    assert_eq!(cf[0], 0x20 | idx, "consecutive frame out of order");
                    let take = (len - msg.len()).min(7);
                    msg.extend(&cf[1..1 + take]);
                    idx = (idx + 1) & 0xf;
                }
                msg
            }
            _ => panic!("Unexpected frame {:?}", first),
        }
    }

    /// Physical request, returns the response.
    pub fn request(&mut self, data: &[u8]) -> Vec<u8> {
        self.send(REQUEST_ID, data);
        self.receive()
    }

    pub fn programming_session(&mut self) {
        let response = self.request(&[0x10, 0x02]);
        assert_eq!(response[..2], [0x50, 0x02]);
    }

    pub fn erase(&mut self, addr: u32, size: u32) -> Vec<u8> {
        let mut req = vec![0x31, 0x01, 0xff, 0x00];
        req.extend(addr.to_be_bytes());
        req.extend(size.to_be_bytes());
        self.request(&req)
    }

    pub fn request_download(&mut self, addr: u32, size: u32) -> Vec<u8> {
        let mut req = vec![0x34, 0x00, 0x44];
        req.extend(addr.to_be_bytes());
        req.extend(size.to_be_bytes());
        self.request(&req)
    }

    pub fn transfer_data(&mut self, seq: u8, data: &[u8]) -> Vec<u8> {
        let mut req = vec![0x36, seq];
        req.extend(data);
        self.request(&req)
    }

    pub fn transfer_exit(&mut self) -> Vec<u8> {
        self.request(&[0x37])
    }

    /// Erase, download and write `image` at `addr` in `chunk` byte blocks.
    pub fn program(&mut self, addr: u32, image: &[u8], chunk: usize) {
        assert_eq!(self.erase(addr, image.len() as u32), vec![0x71, 0x01, 0xff, 0x00]);
        assert_eq!(self.request_download(addr, image.len() as u32)[0], 0x74);

        for (i, block) in image.chunks(chunk).enumerate() {
            let seq = ((i + 1) & 0xff) as u8;
            assert_eq!(self.transfer_data(seq, block), vec![0x76, seq]);
        }
        assert_eq!(self.transfer_exit(), vec![0x77]);
    }
}

pub fn nrc(sid: u8, code: u8) -> Vec<u8> {
    vec![0x7f, sid, code]
}
