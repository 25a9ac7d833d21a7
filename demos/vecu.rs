//! Virtual ECU: runs the bootloader on a SocketCAN interface with simulated flash.
//!
//! Usage: `cargo run --example vecu --features socketcan -- [interface]`, defaults to `vcan0`. An
//! ECUReset reboots the agent, flash contents survive.
use std::time::Duration;

use udsboot::agent::{Agent, AgentConfig, Tick};
use udsboot::can::Identifier;
use udsboot::flash::SimulatedFlash;
use udsboot::isotp::IsoTpConfig;
use udsboot::script::LampBank;
use udsboot::socketcan::SocketCan;
use udsboot::time::SystemClock;

fn main() -> udsboot::Result<()> {
    tracing_subscriber::fmt::init();

    let name = std::env::args().nth(1).unwrap_or_else(|| "vcan0".to_string());
    let config = AgentConfig {
        isotp: IsoTpConfig::new(Identifier::Standard(0x7e0)),
        ..AgentConfig::default()
    };

    let mut flash = SimulatedFlash::new(config.flash);
    loop {
        let adapter = SocketCan::open(&name)?;
        let lamp = LampBank::new(4);
        let mut agent = Agent::new(config.clone(), adapter, flash, lamp, SystemClock::new())?;

        while agent.tick() == Tick::Continue {
            std::thread::sleep(Duration::from_millis(1));
        }

        println!("ECU reset");
        flash = agent.flash().controller().clone();
    }
}
