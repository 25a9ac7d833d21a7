use tracing::{debug, warn};

use super::{
    Error, FlashController, FlashRegion, FlashStatus, PROGRAM_BLOCK_SIZE, SECTOR_SIZE,
};

/// Sector erase and block program over a [`FlashController`], restricted to one [`FlashRegion`].
///
/// Every command blocks until the controller reports completion. There is no timeout: a controller
/// that never completes is unrecoverable. A failed command leaves the driver usable, it can simply
/// be retried.
pub struct FlashDriver<F> {
    controller: F,
    region: FlashRegion,
}

impl<F: FlashController> FlashDriver<F> {
    pub fn new(controller: F, region: FlashRegion) -> Self {
        Self { controller, region }
    }

    pub fn region(&self) -> FlashRegion {
        self.region
    }

    pub fn controller(&self) -> &F {
        &self.controller
    }

    pub fn controller_mut(&mut self) -> &mut F {
        &mut self.controller
    }

    pub fn read(&self, addr: u32, buf: &mut [u8]) -> Result<(), Error> {
        if !self.region.contains_range(addr, buf.len()) {
            return Err(Error::OutOfRange(addr));
        }
        self.controller.read(addr, buf);
        Ok(())
    }

    /// Erase exactly one sector. `addr` must be sector aligned and inside the region.
    pub fn erase_sector(&mut self, addr: u32) -> Result<(), Error> {
        if addr as usize % SECTOR_SIZE != 0 {
            return Err(Error::Misaligned(addr));
        }
        if !self.region.contains_range(addr, SECTOR_SIZE) {
            return Err(Error::OutOfRange(addr));
        }

        debug!("Erase sector 0x{:08x}", addr);
        self.controller.clear_status();
        self.controller.start_erase(addr);
        let status = self.wait();
        check(addr, status)
    }

    /// Program 8 bytes at an 8-byte aligned address inside the region.
    pub fn program_block(
        &mut self,
        addr: u32,
        block: &[u8; PROGRAM_BLOCK_SIZE],
    ) -> Result<(), Error> {
        if addr as usize % PROGRAM_BLOCK_SIZE != 0 {
            return Err(Error::Misaligned(addr));
        }
        if !self.region.contains_range(addr, PROGRAM_BLOCK_SIZE) {
            return Err(Error::OutOfRange(addr));
        }

        self.controller.clear_status();
        self.controller.start_program(addr, block);
        let status = self.wait();
        check(addr, status)
    }

    /// Program a whole sector buffer, one block at a time.
    pub fn program_sector(&mut self, addr: u32, sector: &[u8; SECTOR_SIZE]) -> Result<(), Error> {
        for (idx, chunk) in sector.chunks_exact(PROGRAM_BLOCK_SIZE).enumerate() {
            let mut block = [0u8; PROGRAM_BLOCK_SIZE];
            block.copy_from_slice(chunk);
            self.program_block(addr + (idx * PROGRAM_BLOCK_SIZE) as u32, &block)?;
        }
        Ok(())
    }

    fn wait(&self) -> FlashStatus {
        loop {
            let status = self.controller.status();
            if status.complete {
                return status;
            }
            std::hint::spin_loop();
        }
    }
}

fn check(addr: u32, status: FlashStatus) -> Result<(), Error> {
    if status.program_erase_violation {
        warn!("Flash program/erase violation at 0x{:08x}", addr);
        return Err(Error::ProgramEraseViolation(addr));
    }
    if status.protocol_error {
        warn!("Flash protocol error at 0x{:08x}", addr);
        return Err(Error::ProtocolError(addr));
    }
    Ok(())
}
