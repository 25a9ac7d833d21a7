//! # udsboot
//! An ECU bootloader that lets a diagnostic tester reprogram application flash over CAN. Requests
//! arrive as UDS (ISO 14229) messages carried over ISO-TP (ISO 15765-2). While no programming
//! session is active the ECU runs a small resident script stored at the start of flash.
//!
//! ## Example
//!
//! The agent is generic over its hardware: a [`can::CanAdapter`], a [`flash::FlashController`], a
//! [`script::Lamp`] and a [`time::Clock`]. On a host, the in-memory implementations stand in for
//! the ECU peripherals.
//!
//! ```rust
//! use udsboot::agent::{Agent, AgentConfig, Tick};
//! use udsboot::can::{Frame, Identifier, RingBufferCan};
//! use udsboot::flash::SimulatedFlash;
//! use udsboot::script::LampBank;
//! use udsboot::time::ManualClock;
//!
//! let config = AgentConfig::default();
//! let bus = RingBufferCan::default();
//! let flash = SimulatedFlash::new(config.flash);
//! let lamp = LampBank::new(1);
//! let mut agent = Agent::new(config, bus.clone(), flash, lamp, ManualClock::new(0)).unwrap();
//!
//! // DiagnosticSessionControl, programming session
//! bus.inject(Frame::new(Identifier::Extended(0x18da_00f1), &[0x02, 0x10, 0x02]).unwrap());
//! assert_eq!(agent.tick(), Tick::Continue);
//!
//! let response = bus.pop_sent().unwrap();
//! assert_eq!(response.id, Identifier::Extended(0x18da_f100));
//! assert_eq!(response.payload()[1..3], [0x50, 0x02]);
//! ```
//!
//! ## Supported adapters
//!  - In-memory ring buffers ([`can::RingBufferCan`])
//!  - SocketCAN (Linux only, feature `socketcan`)
//!

pub mod agent;
pub mod can;
mod error;
pub mod flash;
pub mod isotp;
pub mod script;
pub mod time;
pub mod uds;

pub use error::Error;
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(all(target_os = "linux", feature = "socketcan"))]
pub mod socketcan;
