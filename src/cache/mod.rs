//! Direct-mapped write-back cache between bus masters and a slow store.
//!
//! Addresses split into `tag | line | offset`. A line holds one burst of the
//! downstream bus, so every miss costs at most one burst write (the dirty
//! victim) and one burst read (the refill). Replacement is purely index based.
use log::debug;

use crate::commons::{ensure_pow2, Addr};
use crate::error::{ConfigError, Result};
use crate::wishbone::{
    merge_bytes, BusChecker, BusResponse, BusSignals, BusSlave, BusTransaction, CheckerStats,
    CycleType, SEL_ALL,
};

pub mod flusher;

pub use flusher::CacheFlusher;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CacheConfig {
    pub cachesize_words: u32,
    /// words per line and per downstream burst
    pub burst_len: u32,
    pub addr_width: u32,
}

impl Default for CacheConfig {
    fn default() -> Self {
        CacheConfig { cachesize_words: 64, burst_len: 4, addr_width: 22 }
    }
}

impl CacheConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.burst_len <= 1 {
            return Err(ConfigError::BurstTooShort(self.burst_len));
        }
        ensure_pow2("burst length", self.burst_len)?;
        ensure_pow2("cache size", self.cachesize_words)?;
        if self.cachesize_words < self.burst_len {
            return Err(ConfigError::CacheTooSmall {
                cache_words: self.cachesize_words,
                burst_len: self.burst_len,
            });
        }
        let needed = self.offset_bits() + self.line_bits();
        if self.addr_width > 32 || self.addr_width < needed {
            return Err(ConfigError::AddressWidth { width: self.addr_width, needed });
        }
        Ok(())
    }
    pub fn offset_bits(&self) -> u32 {
        self.burst_len.trailing_zeros()
    }
    pub fn line_bits(&self) -> u32 {
        self.lines().trailing_zeros()
    }
    pub fn lines(&self) -> u32 {
        self.cachesize_words / self.burst_len
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CacheLine {
    pub tag: u32,
    pub valid: bool,
    pub dirty: bool,
    pub words: Vec<u32>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CacheState {
    Idle,
    TestHit,
    Ack,
    /// writing back word `n` of the victim line
    Evict(u32),
    WaitRefill,
    /// reading word `n` of the new line
    Refill(u32),
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub refills: u64,
}

pub struct L2Cache {
    name: String,
    cfg: CacheConfig,
    lines: Vec<CacheLine>,
    state: CacheState,
    pending: Addr,
    /// the next hit test follows a refill and is not a new access
    refilled: bool,
    stats: CacheStats,
}

impl L2Cache {
    pub fn new(name: &str, cfg: CacheConfig) -> Result<Self, ConfigError> {
        cfg.validate()?;
        let line = CacheLine {
            tag: 0,
            valid: false,
            dirty: false,
            words: vec![0; cfg.burst_len as usize],
        };
        Ok(L2Cache {
            name: name.to_string(),
            cfg,
            lines: vec![line; cfg.lines() as usize],
            state: CacheState::Idle,
            pending: Addr(0),
            refilled: false,
            stats: CacheStats::default(),
        })
    }

    pub fn config(&self) -> &CacheConfig {
        &self.cfg
    }

    pub fn state(&self) -> CacheState {
        self.state
    }

    pub fn stats(&self) -> CacheStats {
        self.stats
    }

    pub fn line(&self, index: u32) -> &CacheLine {
        &self.lines[index as usize]
    }

    pub fn dirty_lines(&self) -> usize {
        self.lines.iter().filter(|l| l.dirty).count()
    }

    // helper functions

    fn burst_cti(&self, offset: u32) -> CycleType {
        if offset + 1 == self.cfg.burst_len {
            CycleType::EndOfBurst
        } else {
            CycleType::IncrBurst
        }
    }

    fn pending_line(&self) -> (u32, &CacheLine) {
        let (_, line, _) = self.pending.pos(&self.cfg);
        (line, &self.lines[line as usize])
    }

    /// Upstream response this step.
    pub fn respond(&self, up: &BusSignals) -> BusResponse {
        if self.state != CacheState::Ack || !up.active() {
            return BusResponse::default();
        }
        let (offset, _, _) = self.pending.pos(&self.cfg);
        let (_, line) = self.pending_line();
        BusResponse::ack(line.words[offset as usize])
    }

    /// Signals driven on the downstream port this step.
    pub fn downstream(&self) -> BusSignals {
        let (offset, write) = match self.state {
            CacheState::Evict(offset) => (offset, true),
            CacheState::Refill(offset) => (offset, false),
            _ => return BusSignals::idle(),
        };
        let (index, line) = self.pending_line();
        let adr = Addr::from_pos(&self.cfg, offset, index, line.tag).0;
        let tx = if write {
            BusTransaction::write(adr, line.words[offset as usize], SEL_ALL)
        } else {
            BusTransaction::read(adr)
        };
        BusSignals::strobe(tx.with_cti(self.burst_cti(offset)))
    }

    pub fn tick(&mut self, up: &BusSignals, down: &BusResponse) {
        let last = self.cfg.burst_len - 1;
        match self.state {
            CacheState::Idle => {
                if up.active() {
                    self.state = CacheState::TestHit;
                }
            }
            CacheState::TestHit => {
                let refilled = std::mem::take(&mut self.refilled);
                if !up.active() {
                    self.state = CacheState::Idle;
                    return;
                }
                self.pending = Addr(up.tx.adr);
                let (_, index, tag) = self.pending.pos(&self.cfg);
                let line = &mut self.lines[index as usize];
                if line.valid && line.tag == tag {
                    if !refilled {
                        self.stats.hits += 1;
                    }
                    self.state = CacheState::Ack;
                } else if line.dirty {
                    debug!(
                        "[{}] miss 0x{:06x}, evicting line {} (tag 0x{:x})",
                        self.name, up.tx.adr, index, line.tag
                    );
                    self.stats.misses += 1;
                    self.stats.evictions += 1;
                    self.state = CacheState::Evict(0);
                } else {
                    debug!("[{}] miss 0x{:06x}, refilling line {}", self.name, up.tx.adr, index);
                    self.stats.misses += 1;
                    line.tag = tag;
                    line.valid = true;
                    self.state = CacheState::Refill(0);
                }
            }
            CacheState::Ack => {
                if up.active() && up.tx.we {
                    let (offset, index, _) = self.pending.pos(&self.cfg);
                    let line = &mut self.lines[index as usize];
                    let word = &mut line.words[offset as usize];
                    *word = merge_bytes(*word, up.tx.dat_w, up.tx.sel);
                    line.dirty = true;
                }
                self.state = CacheState::Idle;
            }
            CacheState::Evict(offset) => {
                if down.ack {
                    self.state = if offset == last {
                        CacheState::WaitRefill
                    } else {
                        CacheState::Evict(offset + 1)
                    };
                }
            }
            CacheState::WaitRefill => {
                let (_, index, tag) = self.pending.pos(&self.cfg);
                let line = &mut self.lines[index as usize];
                line.tag = tag;
                line.valid = true;
                line.dirty = false;
                self.state = CacheState::Refill(0);
            }
            CacheState::Refill(offset) => {
                if down.ack {
                    let (_, index, _) = self.pending.pos(&self.cfg);
                    self.lines[index as usize].words[offset as usize] = down.dat_r;
                    self.state = if offset == last {
                        self.stats.refills += 1;
                        self.refilled = true;
                        CacheState::TestHit
                    } else {
                        CacheState::Refill(offset + 1)
                    };
                }
            }
        }
    }
}

/// A cache with its own backing slave behind it.
pub struct CachedStore<S: BusSlave> {
    cache: L2Cache,
    store: S,
    checker: BusChecker,
}

impl<S: BusSlave> CachedStore<S> {
    pub fn new(cfg: CacheConfig, store: S) -> Result<Self, ConfigError> {
        Ok(CachedStore {
            cache: L2Cache::new("l2", cfg)?,
            store,
            checker: BusChecker::new("l2->store"),
        })
    }

    pub fn cache(&self) -> &L2Cache {
        &self.cache
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut S {
        &mut self.store
    }

    /// Traffic seen between the cache and the store.
    pub fn downstream_stats(&self) -> CheckerStats {
        self.checker.stats()
    }
}

impl<S: BusSlave> BusSlave for CachedStore<S> {
    fn respond(&self, sig: &BusSignals) -> BusResponse {
        self.cache.respond(sig)
    }

    fn tick(&mut self, sig: &BusSignals, _: &BusResponse) -> Result<()> {
        let down = self.cache.downstream();
        let down_resp = self.store.respond(&down);
        self.checker.check(&down, &down_resp)?;
        self.store.tick(&down, &down_resp)?;
        self.cache.tick(sig, &down_resp);
        Ok(())
    }
}
