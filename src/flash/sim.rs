//! Memory backed [`FlashController`] for host builds and tests.
//!
//! Behaves like NOR flash: erase sets a sector to `0xff`, program can only clear bits. Commands
//! complete immediately. Faults can be injected for the next erase or program command.
use super::{FlashController, FlashRegion, FlashStatus, ERASED, PROGRAM_BLOCK_SIZE, SECTOR_SIZE};

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Fault {
    ProgramEraseViolation,
    ProtocolError,
}

#[derive(Debug, Clone)]
pub struct SimulatedFlash {
    region: FlashRegion,
    memory: Vec<u8>,
    status: FlashStatus,
    erase_fault: Option<Fault>,
    program_fault: Option<Fault>,
    erase_count: usize,
    program_count: usize,
}

impl SimulatedFlash {
    /// Fully erased flash covering `region`.
    pub fn new(region: FlashRegion) -> Self {
        Self {
            region,
            memory: vec![ERASED; region.size()],
            status: FlashStatus::default(),
            erase_fault: None,
            program_fault: None,
            erase_count: 0,
            program_count: 0,
        }
    }

    /// Flash preloaded with `image` at the start of `region`. The rest stays erased.
    pub fn with_image(region: FlashRegion, image: &[u8]) -> Self {
        let mut flash = Self::new(region);
        let len = image.len().min(flash.memory.len());
        flash.memory[..len].copy_from_slice(&image[..len]);
        flash
    }

    pub fn region(&self) -> FlashRegion {
        self.region
    }

    /// The whole memory, index 0 is `region.begin`.
    pub fn contents(&self) -> &[u8] {
        &self.memory
    }

    /// Overwrite memory directly, bypassing erase/program rules.
    pub fn fill(&mut self, addr: u32, data: &[u8]) {
        if let Some(offset) = self.offset(addr, data.len()) {
            self.memory[offset..offset + data.len()].copy_from_slice(data);
        }
    }

    pub fn erase_count(&self) -> usize {
        self.erase_count
    }

    pub fn program_count(&self) -> usize {
        self.program_count
    }

    pub fn fail_next_erase(&mut self, fault: Fault) {
        self.erase_fault = Some(fault);
    }

    pub fn fail_next_program(&mut self, fault: Fault) {
        self.program_fault = Some(fault);
    }

    fn offset(&self, addr: u32, len: usize) -> Option<usize> {
        if self.region.contains_range(addr, len) {
            Some((addr - self.region.begin) as usize)
        } else {
            None
        }
    }

    fn finish(&mut self, fault: Option<Fault>) {
        self.status = FlashStatus {
            complete: true,
            program_erase_violation: fault == Some(Fault::ProgramEraseViolation),
            protocol_error: fault == Some(Fault::ProtocolError),
        };
    }
}

impl FlashController for SimulatedFlash {
    fn read(&self, addr: u32, buf: &mut [u8]) {
        match self.offset(addr, buf.len()) {
            Some(offset) => buf.copy_from_slice(&self.memory[offset..offset + buf.len()]),
            None => buf.fill(ERASED),
        }
    }

    fn start_erase(&mut self, addr: u32) {
        self.erase_count += 1;
        let fault = match (self.erase_fault.take(), self.offset(addr, SECTOR_SIZE)) {
            (Some(fault), _) => Some(fault),
            (None, None) => Some(Fault::ProgramEraseViolation),
            (None, Some(offset)) => {
                self.memory[offset..offset + SECTOR_SIZE].fill(ERASED);
                None
            }
        };
        self.finish(fault);
    }

    fn start_program(&mut self, addr: u32, block: &[u8; PROGRAM_BLOCK_SIZE]) {
        self.program_count += 1;
        let fault = match (self.program_fault.take(), self.offset(addr, PROGRAM_BLOCK_SIZE)) {
            (Some(fault), _) => Some(fault),
            (None, None) => Some(Fault::ProgramEraseViolation),
            (None, Some(offset)) => {
                let cells = &mut self.memory[offset..offset + PROGRAM_BLOCK_SIZE];
                for (cell, byte) in cells.iter_mut().zip(block) {
                    *cell &= *byte;
                }
                None
            }
        };
        self.finish(fault);
    }

    fn status(&self) -> FlashStatus {
        self.status
    }

    fn clear_status(&mut self) {
        self.status = FlashStatus::default();
    }
}
