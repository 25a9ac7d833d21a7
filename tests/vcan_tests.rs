#![allow(dead_code, unused_imports)]
//! Runs the agent against a real SocketCAN interface. Needs `vcan0`:
//! `ip link add dev vcan0 type vcan && ip link set up vcan0`
use std::thread;
use std::time::{Duration, Instant};

use udsboot::agent::{Agent, AgentConfig, ResetRequest};
use udsboot::can::{CanAdapter, Frame, Identifier};
use udsboot::flash::SimulatedFlash;
use udsboot::isotp::IsoTpConfig;
use udsboot::script::LampBank;
use udsboot::time::SystemClock;

static RESPONSE_TIMEOUT_MS: u64 = 1000;

#[cfg(feature = "test-vcan")]
fn spawn_agent() -> thread::JoinHandle<ResetRequest> {
    let config = AgentConfig {
        isotp: IsoTpConfig::new(Identifier::Standard(0x7e0)),
        ..AgentConfig::default()
    };
    let adapter = udsboot::socketcan::SocketCan::open("vcan0").unwrap();
    let flash = SimulatedFlash::new(config.flash);
    let lamp = LampBank::new(1);
    let mut agent = Agent::new(config, adapter, flash, lamp, SystemClock::new()).unwrap();

    thread::spawn(move || agent.run())
}

#[cfg(feature = "test-vcan")]
fn request<C: CanAdapter>(tester: &mut C, data: &[u8]) -> Vec<u8> {
    let mut sf = [0xcc; 8];
    sf[0] = data.len() as u8;
    sf[1..1 + data.len()].copy_from_slice(data);
    tester.send(&Frame::new(Identifier::Standard(0x7e0), &sf).unwrap()).unwrap();

    let start = Instant::now();
    while start.elapsed() < Duration::from_millis(RESPONSE_TIMEOUT_MS) {
        match tester.recv() {
            Some(frame) if frame.id == Identifier::Standard(0x7e8) => {
                let len = (frame.data[0] & 0xf) as usize;
                return frame.data[1..1 + len].to_vec();
            }
            Some(_) => {}
            None => thread::sleep(Duration::from_millis(1)),
        }
    }
    panic!("No response to {}", hex::encode(data));
}

#[cfg(feature = "test-vcan")]
#[test]
#[serial_test::serial]
fn vcan_session_and_reset() {
    let agent = spawn_agent();
    let mut tester = udsboot::socketcan::SocketCan::open("vcan0").unwrap();

    assert_eq!(request(&mut tester, &[0x10, 0x02])[..2], [0x50, 0x02]);
    assert_eq!(request(&mut tester, &[0x10, 0x01])[..2], [0x50, 0x01]);
    assert_eq!(request(&mut tester, &[0x11, 0x01]), vec![0x51, 0x01]);

    assert_eq!(agent.join().unwrap(), ResetRequest);
}
