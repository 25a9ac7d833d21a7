//! The bootloader main loop.
//!
//! An [`Agent`] owns every piece of state: the CAN port, the flash loader, the transport
//! dispatcher, the UDS server and the resident script. Each [`Agent::tick`] enforces the session
//! timeout, gives the script one quantum when no programming session is active, and moves the
//! transport forward by at most one received frame and one sent frame.
use tracing::{info, warn};

use crate::can::CanAdapter;
use crate::error::Error;
use crate::flash::{FlashController, FlashDriver, FlashLoader, FlashRegion};
use crate::isotp::{Dispatcher, IsoTpConfig, MAX_PAYLOAD};
use crate::script::{Lamp, ScriptInterpreter};
use crate::time::Clock;
use crate::uds::{SessionType, UdsConfig, UdsServer};

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct AgentConfig {
    pub flash: FlashRegion,
    pub isotp: IsoTpConfig,
    pub uds: UdsConfig,
}

impl Default for AgentConfig {
    fn default() -> Self {
        let flash = FlashRegion::default();
        Self {
            flash,
            isotp: IsoTpConfig::default(),
            uds: UdsConfig {
                download_region: flash,
                ..UdsConfig::default()
            },
        }
    }
}

impl AgentConfig {
    pub fn validate(&self) -> Result<(), Error> {
        if !self.flash.is_valid() {
            return Err(Error::InvalidConfig("flash region must be non-empty and sector aligned"));
        }

        let download = self.uds.download_region;
        if download.begin >= download.end
            || download.begin < self.flash.begin
            || download.end > self.flash.end
        {
            return Err(Error::InvalidConfig("download region must lie within the flash region"));
        }

        let max_block = self.uds.max_block_length as usize;
        if !(3..=MAX_PAYLOAD).contains(&max_block) {
            return Err(Error::InvalidConfig("max block length must fit one ISO-TP message"));
        }

        if !self.isotp.rx_id.is_valid() || !self.isotp.tx_id().is_valid() {
            return Err(Error::InvalidConfig("request and response ID must fit their format"));
        }
        if self.isotp.functional_id.is_some_and(|id| !id.is_valid()) {
            return Err(Error::InvalidConfig("functional ID must fit its format"));
        }
        if self.isotp.functional_id == Some(self.isotp.rx_id) {
            return Err(Error::InvalidConfig("physical and functional ID must differ"));
        }
        if self.isotp.timeout.is_zero() {
            return Err(Error::InvalidConfig("ISO-TP timeout must not be zero"));
        }
        Ok(())
    }
}

/// The ECU has to be reset. Produced after the ECUReset response went out.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct ResetRequest;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Tick {
    Continue,
    Reset(ResetRequest),
}

pub struct Agent<C, F, L, K> {
    can: C,
    clock: K,
    lamp: L,
    loader: FlashLoader<F>,
    dispatcher: Dispatcher,
    server: UdsServer,
    script: ScriptInterpreter,
}

impl<C, F, L, K> Agent<C, F, L, K>
where
    C: CanAdapter,
    F: FlashController,
    L: Lamp,
    K: Clock,
{
    pub fn new(config: AgentConfig, can: C, flash: F, lamp: L, clock: K) -> Result<Self, Error> {
        config.validate()?;

        let driver = FlashDriver::new(flash, config.flash);
        let script = ScriptInterpreter::load_or_idle(&driver);

        info!(
            "Bootloader up, listening on {:?}, flash 0x{:08x}..0x{:08x}",
            config.isotp.rx_id, config.flash.begin, config.flash.end
        );

        Ok(Self {
            can,
            clock,
            lamp,
            loader: FlashLoader::new(driver),
            dispatcher: Dispatcher::new(config.isotp),
            server: UdsServer::new(config.uds),
            script,
        })
    }

    /// One pass of the main loop.
    pub fn tick(&mut self) -> Tick {
        let now = self.clock.now();

        self.server.check_timeout(now);

        if self.server.session() != SessionType::Programming {
            if let Err(e) = self.script.step(self.loader.driver(), &mut self.lamp, now) {
                warn!("Script stopped: {}", e);
            }
        }

        let events = self.dispatcher.tick(&mut self.can, now);
        let Some(request) = events.received else {
            return Tick::Continue;
        };
        let Some(response) = self.server.handle(&request.data, &mut self.loader, now) else {
            return Tick::Continue;
        };

        if let Err(e) = self.dispatcher.send(&mut self.can, now, &response.data, request.id) {
            warn!("Response to 0x{:02x} dropped: {}", request.data[0], e);
        }

        if response.reset {
            self.can.flush();
            info!("Resetting");
            return Tick::Reset(ResetRequest);
        }
        Tick::Continue
    }

    /// Tick until a reset is requested.
    pub fn run(&mut self) -> ResetRequest {
        loop {
            if let Tick::Reset(reset) = self.tick() {
                return reset;
            }
        }
    }

    pub fn can(&self) -> &C {
        &self.can
    }

    pub fn lamp(&self) -> &L {
        &self.lamp
    }

    pub fn flash(&self) -> &FlashDriver<F> {
        self.loader.driver()
    }

    pub fn flash_mut(&mut self) -> &mut FlashDriver<F> {
        self.loader.driver_mut()
    }

    pub fn server(&self) -> &UdsServer {
        &self.server
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    pub fn script(&self) -> &ScriptInterpreter {
        &self.script
    }
}
