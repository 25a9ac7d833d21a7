//! Error types for the flash driver and loader.

use thiserror::Error;

#[derive(Error, Debug, PartialEq)]
pub enum Error {
    #[error("Address 0x{0:08x} Not Aligned")]
    Misaligned(u32),
    #[error("Address 0x{0:08x} Out Of Range")]
    OutOfRange(u32),
    #[error("Program/Erase Violation at 0x{0:08x}")]
    ProgramEraseViolation(u32),
    #[error("Flash Protocol Error at 0x{0:08x}")]
    ProtocolError(u32),
    #[error("No Write In Progress")]
    NotStreaming,
}
