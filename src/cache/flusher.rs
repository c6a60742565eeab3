use crate::error::{ConfigError, Result};
use crate::wishbone::{BusMaster, BusResponse, BusSignals, BusTransaction};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FlushState {
    Off,
    Wait(u32),
    Read,
}

/// Low-rate reader walking a region one line at a time. Every read maps to a
/// different cache line, so dirty lines of other tags are eventually written
/// back even when nobody else touches them.
pub struct CacheFlusher {
    base: u32,
    region_words: u32,
    stride: u32,
    backoff: u32,
    flush_adr: u32,
    enabled: bool,
    state: FlushState,
    reads: u64,
}

impl CacheFlusher {
    pub fn new(
        base: u32,
        region_words: u32,
        stride: u32,
        backoff_bits: u32,
    ) -> Result<Self, ConfigError> {
        if region_words == 0 {
            return Err(ConfigError::InvalidFlusher("flush region is empty"));
        }
        if backoff_bits >= u32::BITS {
            return Err(ConfigError::InvalidFlusher("backoff must be below 32 bits"));
        }
        Ok(CacheFlusher {
            base,
            region_words,
            stride,
            backoff: 1 << backoff_bits,
            flush_adr: 0,
            enabled: false,
            state: FlushState::Off,
            reads: 0,
        })
    }

    pub fn enable(&mut self) {
        self.enabled = true;
    }

    pub fn state(&self) -> FlushState {
        self.state
    }

    pub fn reads(&self) -> u64 {
        self.reads
    }
}

impl BusMaster for CacheFlusher {
    fn signals(&self) -> BusSignals {
        match self.state {
            FlushState::Read => {
                BusSignals::strobe(BusTransaction::read(self.base + self.flush_adr))
            }
            _ => BusSignals::idle(),
        }
    }

    fn tick(&mut self, resp: &BusResponse) -> Result<()> {
        self.state = match self.state {
            FlushState::Off if self.enabled => FlushState::Wait(0),
            FlushState::Off => FlushState::Off,
            FlushState::Wait(n) if n + 1 >= self.backoff => FlushState::Read,
            FlushState::Wait(n) => FlushState::Wait(n + 1),
            FlushState::Read if resp.ack => {
                self.reads += 1;
                self.flush_adr = (self.flush_adr + self.stride) % self.region_words;
                FlushState::Wait(0)
            }
            FlushState::Read => FlushState::Read,
        };
        Ok(())
    }
}
