use std::collections::VecDeque;

use log::{debug, warn};

use super::{DmaCursor, FramebufferWindow};
use crate::error::{ConfigError, Result};
use crate::wishbone::{BusMaster, BusResponse, BusSignals, BusTransaction, CycleType};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ScanoutConfig {
    pub fifo_depth: u32,
    /// a new burst starts once this many words are free
    pub burst_threshold_words: u32,
    /// steps between two words consumed by the display
    pub drain_period: u32,
}

impl Default for ScanoutConfig {
    fn default() -> Self {
        ScanoutConfig { fifo_depth: 512, burst_threshold_words: 128, drain_period: 4 }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ScanoutState {
    Off,
    Burst { i: u32, n: u32 },
    Wait,
    VSync,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ScanoutStats {
    pub words: u64,
    pub bursts: u64,
    pub frames: u64,
    /// display wanted a word and the fifo was empty
    pub underruns: u64,
}

/// Streams the framebuffer into a FIFO drained at a fixed rate by the
/// display side.
pub struct Scanout {
    window: FramebufferWindow,
    cfg: ScanoutConfig,
    enabled: bool,
    state: ScanoutState,
    fifo: VecDeque<u32>,
    cursor: DmaCursor,
    vsync_pending: bool,
    primed: bool,
    drain_count: u32,
    last_word: u32,
    stats: ScanoutStats,
}

impl Scanout {
    pub fn new(window: FramebufferWindow, cfg: ScanoutConfig) -> Result<Self, ConfigError> {
        if cfg.fifo_depth == 0 || cfg.burst_threshold_words >= cfg.fifo_depth {
            return Err(ConfigError::InvalidFifo(
                "burst threshold must be below the scanout fifo depth",
            ));
        }
        Ok(Scanout {
            window,
            cfg,
            enabled: false,
            state: ScanoutState::Off,
            fifo: VecDeque::with_capacity(cfg.fifo_depth as usize),
            cursor: DmaCursor::new(window.len_words()),
            vsync_pending: false,
            primed: false,
            drain_count: 0,
            last_word: 0,
            stats: ScanoutStats::default(),
        })
    }

    pub fn enable(&mut self) {
        self.enabled = true;
    }

    /// Restart from the first word of the window at the next burst boundary.
    pub fn vsync(&mut self) {
        self.vsync_pending = true;
    }

    pub fn state(&self) -> ScanoutState {
        self.state
    }

    pub fn stats(&self) -> ScanoutStats {
        self.stats
    }

    pub fn level(&self) -> u32 {
        self.fifo.len() as u32
    }

    /// Most recent word handed to the display.
    pub fn last_word(&self) -> u32 {
        self.last_word
    }

    // helper functions

    /// fill level below which a new burst fits
    fn refill_level(&self) -> u32 {
        self.cfg.fifo_depth - self.cfg.burst_threshold_words
    }

    fn start_burst(&self) -> ScanoutState {
        let free = self.cfg.fifo_depth - self.level();
        let n = free.min(self.cursor.remaining());
        if n == 0 {
            ScanoutState::Wait
        } else {
            ScanoutState::Burst { i: 0, n }
        }
    }

    fn drain(&mut self) {
        if self.cfg.drain_period == 0 || !self.enabled {
            return;
        }
        self.drain_count += 1;
        if self.drain_count < self.cfg.drain_period {
            return;
        }
        self.drain_count = 0;
        match self.fifo.pop_front() {
            Some(word) => self.last_word = word,
            None if self.primed => {
                if self.stats.underruns == 0 {
                    warn!("scanout underrun at +{}", self.cursor.offset());
                }
                self.stats.underruns += 1;
            }
            None => (),
        }
    }
}

impl BusMaster for Scanout {
    fn signals(&self) -> BusSignals {
        match self.state {
            ScanoutState::Burst { i, n } => {
                let cti = if i + 1 == n { CycleType::EndOfBurst } else { CycleType::IncrBurst };
                let adr = self.window.base + self.cursor.offset();
                BusSignals::strobe(BusTransaction::read(adr).with_cti(cti))
            }
            _ => BusSignals::idle(),
        }
    }

    fn tick(&mut self, resp: &BusResponse) -> Result<()> {
        self.state = match self.state {
            ScanoutState::Off if self.enabled => self.start_burst(),
            ScanoutState::Burst { i, n } if resp.ack => {
                self.fifo.push_back(resp.dat_r);
                self.primed = true;
                self.stats.words += 1;
                let wraps = self.cursor.wraps();
                self.cursor.advance(1);
                if self.cursor.wraps() != wraps {
                    self.stats.frames += 1;
                }
                if i + 1 == n {
                    self.stats.bursts += 1;
                    ScanoutState::Wait
                } else {
                    ScanoutState::Burst { i: i + 1, n }
                }
            }
            ScanoutState::Wait if self.vsync_pending => ScanoutState::VSync,
            ScanoutState::Wait if self.level() < self.refill_level() => self.start_burst(),
            ScanoutState::VSync => {
                debug!("scanout vsync after {} words", self.stats.words);
                self.fifo.clear();
                self.cursor.reset();
                self.vsync_pending = false;
                self.primed = false;
                self.stats.frames += 1;
                self.start_burst()
            }
            state => state,
        };
        self.drain();
        Ok(())
    }
}
