//! High-latency backing store with burst support.
use log::trace;

use crate::error::{ConfigError, ProtocolViolation, Result, SimError};
use crate::wishbone::{BusResponse, BusSignals, BusSlave, CycleType, SEL_ALL};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PsramConfig {
    pub storage_words: u32,
    /// steps before the first word of a transfer is acknowledged
    pub latency_cycles: u32,
}

impl Default for PsramConfig {
    fn default() -> Self {
        PsramConfig { storage_words: 512, latency_cycles: 4 }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PsramState {
    Idle,
    Latency(u32),
    Respond,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PsramStats {
    pub reads: u64,
    pub writes: u64,
    pub bursts: u64,
    pub aborted: u64,
}

pub struct Psram {
    name: String,
    cfg: PsramConfig,
    mem: Vec<u32>,
    state: PsramState,
    in_burst: bool,
    stats: PsramStats,
}

impl Psram {
    pub fn new(name: &str, cfg: PsramConfig) -> Self {
        Psram {
            name: name.to_string(),
            cfg,
            mem: vec![0; cfg.storage_words as usize],
            state: PsramState::Idle,
            in_burst: false,
            stats: PsramStats::default(),
        }
    }

    pub fn config(&self) -> &PsramConfig {
        &self.cfg
    }

    pub fn state(&self) -> PsramState {
        self.state
    }

    pub fn stats(&self) -> PsramStats {
        self.stats
    }

    /// Backdoor read, bypassing the bus.
    pub fn peek(&self, adr: u32) -> u32 {
        self.mem[adr as usize]
    }

    /// Backdoor write, bypassing the bus.
    pub fn poke(&mut self, adr: u32, dat: u32) {
        self.mem[adr as usize] = dat;
    }

    pub fn fill(&mut self, base: u32, data: &[u32]) {
        let base = base as usize;
        self.mem[base..base + data.len()].copy_from_slice(data);
    }

    /// End the transfer in progress, as if `cyc` had dropped. The next
    /// request pays the full latency again.
    pub fn release(&mut self) {
        if self.state != PsramState::Idle {
            trace!("[{}] transfer dropped in {:?}", self.name, self.state);
            self.stats.aborted += 1;
            self.state = PsramState::Idle;
        }
    }

    fn check_access(&self, sig: &BusSignals) -> Result<()> {
        let tx = sig.tx;
        if tx.adr >= self.cfg.storage_words {
            let limit = self.cfg.storage_words;
            let v = ProtocolViolation::AddressOutOfRange { adr: tx.adr, limit };
            return Err(SimError::protocol(&self.name, tx, v));
        }
        if tx.sel != SEL_ALL {
            return Err(ConfigError::SubWordAccess { adr: tx.adr, sel: tx.sel }.into());
        }
        Ok(())
    }
}

impl BusSlave for Psram {
    fn respond(&self, sig: &BusSignals) -> BusResponse {
        match self.state {
            PsramState::Respond if sig.active() => {
                let dat_r = self.mem.get(sig.tx.adr as usize).copied().unwrap_or(0);
                BusResponse::ack(if sig.tx.we { 0 } else { dat_r })
            }
            _ => BusResponse::default(),
        }
    }

    fn tick(&mut self, sig: &BusSignals, resp: &BusResponse) -> Result<()> {
        if !sig.cyc {
            self.release();
            return Ok(());
        }
        match self.state {
            PsramState::Idle => {
                if sig.active() {
                    self.check_access(sig)?;
                    self.in_burst = sig.tx.cti.is_burst();
                    self.state = if self.cfg.latency_cycles == 0 {
                        PsramState::Respond
                    } else {
                        PsramState::Latency(0)
                    };
                }
            }
            PsramState::Latency(count) => {
                self.state = if count + 1 >= self.cfg.latency_cycles {
                    PsramState::Respond
                } else {
                    PsramState::Latency(count + 1)
                };
            }
            PsramState::Respond => {
                if resp.ack {
                    self.check_access(sig)?;
                    let tx = sig.tx;
                    if tx.we {
                        self.mem[tx.adr as usize] = tx.dat_w;
                        self.stats.writes += 1;
                    } else {
                        self.stats.reads += 1;
                    }
                    if !self.in_burst || tx.cti == CycleType::EndOfBurst {
                        if self.in_burst {
                            self.stats.bursts += 1;
                        }
                        self.state = PsramState::Idle;
                    }
                }
            }
        }
        Ok(())
    }
}
