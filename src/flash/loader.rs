use tracing::{debug, info, warn};

use super::{sector_base, sector_offset, Error, FlashController, FlashDriver, ERASED, SECTOR_SIZE};

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum LoaderState {
    Idle,
    Erasing,
    /// Appending data. `cursor` is the next address to write, `end` the exclusive end of the write.
    Streaming { cursor: u32, end: u32 },
}

/// Streaming writer for one logical write at a time.
///
/// A write is `erase_range` (optional), `prepare`, any number of `write` calls, then `finalize`.
/// Data is collected in a single sector buffer and programmed one full sector at a time. Bytes of a
/// touched sector that lie outside the requested range keep their previous value.
pub struct FlashLoader<F> {
    driver: FlashDriver<F>,
    state: LoaderState,
    buffer: [u8; SECTOR_SIZE],
}

impl<F: FlashController> FlashLoader<F> {
    pub fn new(driver: FlashDriver<F>) -> Self {
        Self {
            driver,
            state: LoaderState::Idle,
            buffer: [ERASED; SECTOR_SIZE],
        }
    }

    pub fn state(&self) -> LoaderState {
        self.state
    }

    pub fn driver(&self) -> &FlashDriver<F> {
        &self.driver
    }

    pub fn driver_mut(&mut self) -> &mut FlashDriver<F> {
        &mut self.driver
    }

    fn range_end(&self, start: u32, size: u32) -> Result<u32, Error> {
        if !self.driver.region().contains_range(start, size as usize) {
            return Err(Error::OutOfRange(start));
        }
        start.checked_add(size).ok_or(Error::OutOfRange(start))
    }

    /// Erase `[start, start + size)`. Sectors only partly covered by the range get their outside
    /// bytes read before the erase and programmed back afterwards. Not resumable: after an error
    /// the whole erase must be restarted.
    pub fn erase_range(&mut self, start: u32, size: u32) -> Result<(), Error> {
        let end = self.range_end(start, size)?;
        if size == 0 {
            return Ok(());
        }

        info!("Erasing 0x{:08x}..0x{:08x}", start, end);
        self.state = LoaderState::Erasing;
        let res = self.erase_sectors(start, end);
        self.state = LoaderState::Idle;
        self.buffer.fill(ERASED);
        res
    }

    fn erase_sectors(&mut self, start: u32, end: u32) -> Result<(), Error> {
        let first = sector_base(start);
        let last = sector_base(end - 1);

        let mut sector = first;
        loop {
            let sector_end = sector + SECTOR_SIZE as u32;
            let keep_head = sector == first && start > sector;
            let keep_tail = sector == last && end < sector_end;

            if keep_head || keep_tail {
                // 1. read: keep everything outside the erased range
                self.driver.read(sector, &mut self.buffer)?;
                let lo = (start.max(sector) - sector) as usize;
                let hi = (end.min(sector_end) - sector) as usize;
                self.buffer[lo..hi].fill(ERASED);

                // 2. erase
                self.driver.erase_sector(sector)?;

                // 3. program the kept bytes back
                self.driver.program_sector(sector, &self.buffer)?;
            } else {
                self.driver.erase_sector(sector)?;
            }

            if sector == last {
                return Ok(());
            }
            sector = sector_end;
        }
    }

    /// Start a write of `size` bytes at `addr`. Loads the bytes in front of `addr` within its
    /// sector into the buffer.
    pub fn prepare(&mut self, addr: u32, size: u32) -> Result<(), Error> {
        let end = self.range_end(addr, size)?;

        self.buffer.fill(ERASED);
        let head = sector_offset(addr);
        if head > 0 {
            self.driver.read(sector_base(addr), &mut self.buffer[..head])?;
        }

        debug!("Prepared write 0x{:08x}..0x{:08x}", addr, end);
        self.state = LoaderState::Streaming { cursor: addr, end };
        Ok(())
    }

    /// Append `data` at the cursor. Every filled sector is programmed right away.
    pub fn write(&mut self, data: &[u8]) -> Result<(), Error> {
        let LoaderState::Streaming { mut cursor, end } = self.state else {
            return Err(Error::NotStreaming);
        };
        if cursor as u64 + data.len() as u64 > end as u64 {
            return Err(Error::OutOfRange(cursor));
        }

        let mut rest = data;
        while !rest.is_empty() {
            let offset = sector_offset(cursor);
            let len = (SECTOR_SIZE - offset).min(rest.len());
            self.buffer[offset..offset + len].copy_from_slice(&rest[..len]);
            cursor += len as u32;
            rest = &rest[len..];

            if sector_offset(cursor) == 0 {
                let sector = cursor - SECTOR_SIZE as u32;
                if let Err(e) = self.driver.program_sector(sector, &self.buffer) {
                    warn!("Write aborted in sector 0x{:08x}: {}", sector, e);
                    self.state = LoaderState::Idle;
                    return Err(e);
                }
                self.buffer.fill(ERASED);
            }
        }

        self.state = LoaderState::Streaming { cursor, end };
        Ok(())
    }

    /// Finish the write: complete the last partial sector with the flash contents behind the cursor
    /// and program it.
    pub fn finalize(&mut self) -> Result<(), Error> {
        let LoaderState::Streaming { cursor, .. } = self.state else {
            return Err(Error::NotStreaming);
        };
        self.state = LoaderState::Idle;

        let offset = sector_offset(cursor);
        if offset != 0 {
            let sector = sector_base(cursor);
            self.driver.read(cursor, &mut self.buffer[offset..])?;
            self.driver.program_sector(sector, &self.buffer)?;
        }
        self.buffer.fill(ERASED);

        debug!("Write finalized at 0x{:08x}", cursor);
        Ok(())
    }
}
