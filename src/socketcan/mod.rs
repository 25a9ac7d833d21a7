//! This module provides a [`CanAdapter`] on a Linux SocketCAN interface, e.g. `vcan0`.
use std::io::ErrorKind;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::can::{CanAdapter, Frame};
use crate::error::Error;
use crate::Result;

mod frame;
mod socket;

use socket::CanSocket;

const FLUSH_TIMEOUT: Duration = Duration::from_millis(100);

/// Non-blocking adapter for a raw CAN socket.
pub struct SocketCan {
    socket: CanSocket,
}

impl SocketCan {
    pub fn open(name: &str) -> Result<Self> {
        let socket = CanSocket::open(name).map_err(|e| match e.kind() {
            ErrorKind::NotFound => Error::NotFound,
            _ => e.into(),
        })?;
        socket.set_nonblocking(true)?;
        socket.set_loopback(true)?;

        info!("Connected to SocketCan on {}", name);
        Ok(Self { socket })
    }
}

impl CanAdapter for SocketCan {
    fn send(&mut self, frame: &Frame) -> Result<()> {
        let raw: libc::can_frame = frame.into();
        self.socket.write_frame(&raw)?;
        Ok(())
    }

    fn recv(&mut self) -> Option<Frame> {
        loop {
            match self.socket.read_frame() {
                Ok(raw) => match Frame::try_from(&raw) {
                    Ok(frame) => return Some(frame),
                    Err(e) => debug!("Dropping frame: {}", e),
                },
                Err(e) if e.kind() == ErrorKind::WouldBlock => return None,
                Err(e) => {
                    warn!("SocketCan read failed: {}", e);
                    return None;
                }
            }
        }
    }

    fn flush(&mut self) {
        let start = Instant::now();
        while start.elapsed() < FLUSH_TIMEOUT {
            match self.socket.pending_output() {
                Ok(0) => return,
                Ok(_) => std::thread::sleep(Duration::from_millis(1)),
                Err(e) => {
                    warn!("SocketCan flush failed: {}", e);
                    return;
                }
            }
        }
        warn!("SocketCan flush timed out");
    }
}
