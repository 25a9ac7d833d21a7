//! Resident control script, run while the ECU is not being programmed.
//!
//! The script image sits at the start of the flash region: a little endian magic word, a version
//! word, then one 32-bit instruction per word. The top byte of an instruction is the [`Opcode`],
//! the remaining 24 bits its operand. The interpreter executes at most one instruction per
//! [`ScriptInterpreter::step`] and never blocks, a delay just parks it until enough time has
//! passed.
use strum_macros::{Display, FromRepr};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::flash::{FlashController, FlashDriver};
use crate::time::time_passed;

pub const SCRIPT_MAGIC: u32 = 0x5343_5250;
pub const SCRIPT_VERSION: u32 = 1;

const WORD_SIZE: u32 = 4;
const HEADER_SIZE: u32 = 2 * WORD_SIZE;
const OPERAND_MASK: u32 = 0x00ff_ffff;

#[derive(Error, Debug, PartialEq)]
pub enum Error {
    #[error("Bad script magic 0x{0:08x}")]
    BadMagic(u32),
    #[error("Unsupported script version {0}")]
    UnsupportedVersion(u32),
    #[error("Unknown opcode 0x{opcode:02x} at {pc}")]
    UnknownOpcode { pc: u32, opcode: u8 },
    #[error("Jump target {0} outside of script")]
    JumpOutOfRange(u32),
    #[error(transparent)]
    FlashError(#[from] crate::flash::Error),
}

#[derive(Debug, PartialEq, Copy, Clone, Display, FromRepr)]
#[repr(u8)]
pub enum Opcode {
    Halt = 0x00,
    LampOn = 0x01,
    LampOff = 0x02,
    /// Wait for operand milliseconds
    Delay = 0x03,
    /// Continue at instruction index operand
    Jump = 0x04,
    End = 0xff,
}

/// Encode one instruction word.
pub fn instruction(opcode: Opcode, operand: u32) -> u32 {
    ((opcode as u32) << 24) | (operand & OPERAND_MASK)
}

/// Output driven by the script. `index` is the operand of the lamp instruction.
pub trait Lamp {
    fn set(&mut self, index: u32, on: bool);
}

/// Host side lamp outputs.
#[derive(Debug, Clone, Default)]
pub struct LampBank {
    lamps: Vec<bool>,
    switches: usize,
}

impl LampBank {
    pub fn new(count: usize) -> Self {
        Self {
            lamps: vec![false; count],
            switches: 0,
        }
    }

    pub fn is_on(&self, index: usize) -> bool {
        self.lamps.get(index).copied().unwrap_or(false)
    }

    /// Number of lamp instructions executed, including ones that did not change the state.
    pub fn switches(&self) -> usize {
        self.switches
    }
}

impl Lamp for LampBank {
    fn set(&mut self, index: u32, on: bool) {
        self.switches += 1;
        match self.lamps.get_mut(index as usize) {
            Some(lamp) => *lamp = on,
            None => warn!("Script addressed missing lamp {}", index),
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ScriptState {
    /// No valid image
    Idle,
    Running { pc: u32 },
    Waiting { pc: u32, since: u32, delay: u32 },
    Halted,
}

#[derive(Debug)]
pub struct ScriptInterpreter {
    base: u32,
    len: u32,
    state: ScriptState,
}

impl ScriptInterpreter {
    /// Interpreter without a script. [`ScriptInterpreter::step`] does nothing.
    pub fn idle() -> Self {
        Self {
            base: 0,
            len: 0,
            state: ScriptState::Idle,
        }
    }

    /// Validate the image header at the start of the flash region.
    pub fn load<F: FlashController>(flash: &FlashDriver<F>) -> Result<Self, Error> {
        let region = flash.region();
        let magic = read_word(flash, region.begin)?;
        if magic != SCRIPT_MAGIC {
            return Err(Error::BadMagic(magic));
        }
        let version = read_word(flash, region.begin + WORD_SIZE)?;
        if version != SCRIPT_VERSION {
            return Err(Error::UnsupportedVersion(version));
        }

        let len = (region.size() as u32).saturating_sub(HEADER_SIZE) / WORD_SIZE;
        info!("Loaded script, {} instruction slots", len);
        Ok(Self {
            base: region.begin + HEADER_SIZE,
            len,
            state: ScriptState::Running { pc: 0 },
        })
    }

    /// [`ScriptInterpreter::load`], falling back to an idle interpreter for a missing or bad image.
    pub fn load_or_idle<F: FlashController>(flash: &FlashDriver<F>) -> Self {
        Self::load(flash).unwrap_or_else(|e| {
            warn!("No resident script: {}", e);
            Self::idle()
        })
    }

    pub fn state(&self) -> ScriptState {
        self.state
    }

    /// Run one quantum. Errors halt the script.
    pub fn step<F: FlashController, L: Lamp>(
        &mut self,
        flash: &FlashDriver<F>,
        lamp: &mut L,
        now: u32,
    ) -> Result<(), Error> {
        let res = self.execute(flash, lamp, now);
        if res.is_err() {
            self.state = ScriptState::Halted;
        }
        res
    }

    fn execute<F: FlashController, L: Lamp>(
        &mut self,
        flash: &FlashDriver<F>,
        lamp: &mut L,
        now: u32,
    ) -> Result<(), Error> {
        let pc = match self.state {
            ScriptState::Idle | ScriptState::Halted => return Ok(()),
            ScriptState::Waiting { pc, since, delay } => {
                if time_passed(now, since) >= delay {
                    self.state = ScriptState::Running { pc };
                }
                return Ok(());
            }
            ScriptState::Running { pc } => pc,
        };

        if pc >= self.len {
            debug!("Script ran off the end");
            self.state = ScriptState::Halted;
            return Ok(());
        }

        let word = read_word(flash, self.base + pc * WORD_SIZE)?;
        let operand = word & OPERAND_MASK;
        let raw = (word >> 24) as u8;
        let opcode = Opcode::from_repr(raw).ok_or(Error::UnknownOpcode { pc, opcode: raw })?;

        self.state = match opcode {
            Opcode::Halt | Opcode::End => {
                debug!("Script halted at {}", pc);
                ScriptState::Halted
            }
            Opcode::LampOn | Opcode::LampOff => {
                lamp.set(operand, opcode == Opcode::LampOn);
                ScriptState::Running { pc: pc + 1 }
            }
            Opcode::Delay => ScriptState::Waiting {
                pc: pc + 1,
                since: now,
                delay: operand,
            },
            Opcode::Jump => {
                if operand >= self.len {
                    return Err(Error::JumpOutOfRange(operand));
                }
                ScriptState::Running { pc: operand }
            }
        };
        Ok(())
    }
}

fn read_word<F: FlashController>(flash: &FlashDriver<F>, addr: u32) -> Result<u32, Error> {
    let mut buf = [0; WORD_SIZE as usize];
    flash.read(addr, &mut buf)?;
    Ok(u32::from_le_bytes(buf))
}
