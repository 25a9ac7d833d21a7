//! Flash storage: region geometry, the controller port, the sector driver and the streaming loader.
//!
//! Layers, bottom up:
//!  - [`FlashController`]: register level access to the flash peripheral (start a command, poll
//!    status).
//!  - [`FlashDriver`]: whole-sector erase and 8-byte program with alignment, bounds and fault
//!    checking.
//!  - [`FlashLoader`]: erase arbitrary byte ranges while preserving the rest of each touched
//!    sector, then stream data into sector sized buffers.

mod driver;
pub mod error;
mod loader;
mod sim;

pub use driver::FlashDriver;
pub use error::Error;
pub use loader::{FlashLoader, LoaderState};
pub use sim::{Fault, SimulatedFlash};

/// Smallest independently erasable unit.
pub const SECTOR_SIZE: usize = 512;
/// Unit and alignment of a program operation.
pub const PROGRAM_BLOCK_SIZE: usize = 8;
/// Value of an erased byte.
pub const ERASED: u8 = 0xff;

const _: () = assert!(SECTOR_SIZE % PROGRAM_BLOCK_SIZE == 0);

/// Contiguous flash address space `[begin, end)`.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct FlashRegion {
    pub begin: u32,
    pub end: u32,
}

impl Default for FlashRegion {
    fn default() -> Self {
        Self {
            begin: 0x0001_0000,
            end: 0x0002_0000,
        }
    }
}

impl FlashRegion {
    pub fn new(begin: u32, end: u32) -> Self {
        Self { begin, end }
    }

    pub fn size(&self) -> usize {
        self.end.saturating_sub(self.begin) as usize
    }

    /// Both bounds sector aligned and the region not empty.
    pub fn is_valid(&self) -> bool {
        self.begin < self.end
            && self.begin as usize % SECTOR_SIZE == 0
            && self.end as usize % SECTOR_SIZE == 0
    }

    pub fn contains(&self, addr: u32) -> bool {
        addr >= self.begin && addr < self.end
    }

    /// Whether `[addr, addr + len)` lies inside the region.
    pub fn contains_range(&self, addr: u32, len: usize) -> bool {
        match (addr as u64).checked_add(len as u64) {
            Some(end) => addr >= self.begin && end <= self.end as u64,
            None => false,
        }
    }
}

/// Start address of the sector containing `addr`.
pub fn sector_base(addr: u32) -> u32 {
    addr - (addr % SECTOR_SIZE as u32)
}

/// Offset of `addr` inside its sector.
pub fn sector_offset(addr: u32) -> usize {
    addr as usize % SECTOR_SIZE
}

/// Flash peripheral status flags, read after a command has been started.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct FlashStatus {
    /// Command complete.
    pub complete: bool,
    /// Program or erase violation, e.g. a protected or unaligned target.
    pub program_erase_violation: bool,
    /// Command sequence error reported by the controller.
    pub protocol_error: bool,
}

impl FlashStatus {
    pub fn is_fault(&self) -> bool {
        self.program_erase_violation || self.protocol_error
    }
}

/// Register level access to the flash peripheral. Commands are started and then polled through
/// [`FlashController::status`].
pub trait FlashController {
    /// Read bytes straight from the memory mapped flash.
    fn read(&self, addr: u32, buf: &mut [u8]);
    /// Start erasing the sector at `addr`.
    fn start_erase(&mut self, addr: u32);
    /// Start programming one block at `addr`.
    fn start_program(&mut self, addr: u32, block: &[u8; PROGRAM_BLOCK_SIZE]);
    fn status(&self) -> FlashStatus;
    fn clear_status(&mut self);
}
