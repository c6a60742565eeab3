use std::collections::VecDeque;

use log::{debug, trace};

use super::{decay_word, unpack, DmaCursor, FramebufferWindow};
use crate::error::{ConfigError, Result};
use crate::wishbone::{BusMaster, BusResponse, BusSignals, BusTransaction, CycleType, SEL_ALL};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PersistConfig {
    /// words per burst
    pub fifo_depth: u32,
    /// idle steps between bursts
    pub holdoff: u32,
    /// intensity removed from every pixel per pass
    pub decay: u8,
}

impl Default for PersistConfig {
    fn default() -> Self {
        PersistConfig { fifo_depth: 16, holdoff: 256, decay: 1 }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PersistState {
    Init,
    /// reading word `i` of `n`
    BurstIn { i: u32, n: u32 },
    /// bus held between read and write back
    Prefetch { n: u32 },
    BurstOut { i: u32, n: u32 },
    Drain { n: u32 },
    Holdoff(u32),
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PersistStats {
    pub bursts_in: u64,
    pub bursts_out: u64,
    /// bursts with nothing lit, skipped without writing back
    pub skipped: u64,
    pub passes: u64,
}

/// Fades the framebuffer: reads it one burst at a time, lowers the intensity
/// of every pixel and writes the burst back in place.
pub struct Persistence {
    window: FramebufferWindow,
    cfg: PersistConfig,
    enabled: bool,
    decay: u8,
    state: PersistState,
    fifo: VecDeque<u32>,
    cursor: DmaCursor,
    any_lit: bool,
    stats: PersistStats,
}

impl Persistence {
    pub fn new(window: FramebufferWindow, cfg: PersistConfig) -> Result<Self, ConfigError> {
        if cfg.fifo_depth == 0 {
            return Err(ConfigError::InvalidFifo("persistence fifo cannot be empty"));
        }
        Ok(Persistence {
            window,
            cfg,
            enabled: false,
            decay: cfg.decay,
            state: PersistState::Init,
            fifo: VecDeque::with_capacity(cfg.fifo_depth as usize),
            cursor: DmaCursor::new(window.len_words()),
            any_lit: false,
            stats: PersistStats::default(),
        })
    }

    /// Takes effect at the next burst boundary.
    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    pub fn set_decay(&mut self, decay: u8) {
        self.cfg.decay = decay;
    }

    pub fn set_holdoff(&mut self, holdoff: u32) {
        self.cfg.holdoff = holdoff;
    }

    pub fn state(&self) -> PersistState {
        self.state
    }

    pub fn stats(&self) -> PersistStats {
        self.stats
    }

    pub fn window(&self) -> &FramebufferWindow {
        &self.window
    }

    // helper functions

    fn adr(&self, i: u32) -> u32 {
        self.window.base + self.cursor.offset() + i
    }

    fn cti(i: u32, n: u32) -> CycleType {
        if i + 1 == n {
            CycleType::EndOfBurst
        } else {
            CycleType::IncrBurst
        }
    }

    fn start_burst(&mut self) -> PersistState {
        if !self.enabled {
            return PersistState::Init;
        }
        self.decay = self.cfg.decay;
        self.any_lit = false;
        // bursts never cross the end of the window
        let n = self.cfg.fifo_depth.min(self.cursor.remaining());
        PersistState::BurstIn { i: 0, n }
    }

    fn finish_burst(&mut self, n: u32) -> PersistState {
        let wraps = self.cursor.wraps();
        self.cursor.advance(n);
        if self.cursor.wraps() != wraps {
            self.stats.passes += 1;
            debug!("persistence pass {} done", self.stats.passes);
        }
        PersistState::Holdoff(0)
    }
}

impl BusMaster for Persistence {
    fn signals(&self) -> BusSignals {
        match self.state {
            PersistState::BurstIn { i, n } => {
                BusSignals::strobe(BusTransaction::read(self.adr(i)).with_cti(Self::cti(i, n)))
            }
            PersistState::Prefetch { .. } => BusSignals::hold(),
            PersistState::BurstOut { i, n } => {
                let dat =
                    self.fifo.front().copied().map(|w| decay_word(w, self.decay)).unwrap_or(0);
                let tx = BusTransaction::write(self.adr(i), dat, SEL_ALL);
                BusSignals::strobe(tx.with_cti(Self::cti(i, n)))
            }
            _ => BusSignals::idle(),
        }
    }

    fn tick(&mut self, resp: &BusResponse) -> Result<()> {
        self.state = match self.state {
            PersistState::Init => self.start_burst(),
            PersistState::BurstIn { i, n } if resp.ack => {
                self.fifo.push_back(resp.dat_r);
                self.any_lit |= unpack(resp.dat_r).iter().any(|p| p.intensity != 0);
                if i + 1 == n {
                    self.stats.bursts_in += 1;
                    PersistState::Prefetch { n }
                } else {
                    PersistState::BurstIn { i: i + 1, n }
                }
            }
            PersistState::Prefetch { n } => {
                if self.any_lit {
                    PersistState::BurstOut { i: 0, n }
                } else {
                    trace!("persistence: nothing lit at +{}", self.cursor.offset());
                    PersistState::Drain { n }
                }
            }
            PersistState::BurstOut { i, n } if resp.ack => {
                self.fifo.pop_front();
                if i + 1 == n {
                    self.stats.bursts_out += 1;
                    self.finish_burst(n)
                } else {
                    PersistState::BurstOut { i: i + 1, n }
                }
            }
            PersistState::Drain { n } => {
                self.fifo.clear();
                self.stats.skipped += 1;
                self.finish_burst(n)
            }
            PersistState::Holdoff(count) => {
                if count + 1 >= self.cfg.holdoff {
                    self.start_burst()
                } else {
                    PersistState::Holdoff(count + 1)
                }
            }
            state => state,
        };
        Ok(())
    }
}
