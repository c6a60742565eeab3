//! Audio delay lines: one writer, any number of read taps.
//!
//! Samples live in a circular buffer of `max_delay` slots, either in a local
//! SRAM or, two samples per word, in the shared backing store behind a
//! private cache. The writer and the taps share one internal 16-bit bus.
use log::{debug, trace};

use crate::cache::{CacheConfig, L2Cache};
use crate::commons::ensure_pow2;
use crate::error::{ConfigError, Result};
use crate::sram::Sram;
use crate::wishbone::{
    Arbiter, ArbiterConfig, BusChecker, BusMaster, BusResponse, BusSignals, BusSlave,
    BusTransaction, CheckerStats, Policy,
};

/// 16-bit signed fixed point sample (1 sign bit, 15 fractional bits).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct Sample(pub i16);

impl Sample {
    pub const ZERO: Sample = Sample(0);

    pub fn from_f32(x: f32) -> Self {
        Sample((x * 32768.0).round().clamp(-32768.0, 32767.0) as i16)
    }

    pub fn to_f32(self) -> f32 {
        self.0 as f32 / 32768.0
    }

    fn to_bus(self) -> u32 {
        self.0 as u16 as u32
    }

    fn from_bus(dat: u32) -> Self {
        Sample(dat as u16 as i16)
    }
}

/// byte select of one 16-bit sample on the internal bus
const SEL_SAMPLE: u8 = 0b11;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Backing {
    /// dedicated on-chip memory
    Local,
    /// shared backing store at word address `base`, behind a private cache
    Psram { base: u32, cache: CacheConfig },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DelayLineConfig {
    pub max_delay: u32,
    /// every write is followed by one read per tap
    pub write_triggers_read: bool,
    pub backing: Backing,
}

/// Maps the 16-bit sample bus onto a 32-bit word bus, two samples per word.
#[derive(Clone, Copy, Debug)]
pub struct WidthAdapter {
    base: u32,
}

impl WidthAdapter {
    pub fn new(base: u32) -> Self {
        WidthAdapter { base }
    }

    pub fn request(&self, sig: &BusSignals) -> BusSignals {
        let tx = sig.tx;
        let upper = tx.adr & 1 != 0;
        let wide = BusTransaction {
            adr: self.base + (tx.adr >> 1),
            dat_w: if upper { tx.dat_w << 16 } else { tx.dat_w },
            sel: if upper { tx.sel << 2 } else { tx.sel },
            ..tx
        };
        BusSignals { tx: wide, ..*sig }
    }

    pub fn response(&self, sig: &BusSignals, resp: &BusResponse) -> BusResponse {
        let dat = if sig.tx.adr & 1 != 0 { resp.dat_r >> 16 } else { resp.dat_r };
        BusResponse { dat_r: dat & 0xffff, ..*resp }
    }
}

enum Store {
    Local(Sram),
    Psram { adapter: WidthAdapter, cache: L2Cache },
}

#[derive(Clone, Copy, Debug)]
struct TapRequest {
    head: u32,
    delay: u32,
    /// samples written when the request was made
    available: u32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum TapState {
    Idle,
    Read(u32),
    Ready(Sample),
}

struct Tap {
    fixed_delay: Option<u32>,
    pending: Option<TapRequest>,
    state: TapState,
}

impl Tap {
    fn can_accept(&self) -> bool {
        self.pending.is_none() && self.state == TapState::Idle
    }

    fn signals(&self) -> BusSignals {
        match self.state {
            TapState::Read(adr) => {
                BusSignals::strobe(BusTransaction { sel: SEL_SAMPLE, ..BusTransaction::read(adr) })
            }
            _ => BusSignals::idle(),
        }
    }

    fn tick(&mut self, resp: &BusResponse, max_delay: u32) {
        match self.state {
            TapState::Idle => {
                if let Some(req) = self.pending.take() {
                    self.state = if req.delay >= req.available {
                        TapState::Ready(Sample::ZERO)
                    } else {
                        TapState::Read((req.head + max_delay - req.delay) & (max_delay - 1))
                    };
                }
            }
            TapState::Read(_) => {
                if resp.ack {
                    self.state = TapState::Ready(Sample::from_bus(resp.dat_r));
                }
            }
            TapState::Ready(_) => (),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum WriterState {
    WaitValid,
    Write { adr: u32, sample: Sample },
    Dispatch,
}

pub struct DelayLine {
    name: String,
    cfg: DelayLineConfig,
    arbiter: Arbiter,
    store: Store,
    checker: BusChecker,
    writer: WriterState,
    input: Option<Sample>,
    wrpointer: u32,
    head: u32,
    written: u32,
    taps: Vec<Tap>,
    started: bool,
}

impl DelayLine {
    pub fn new(name: &str, cfg: DelayLineConfig) -> Result<Self, ConfigError> {
        ensure_pow2("max delay", cfg.max_delay)?;
        let store = match cfg.backing {
            Backing::Local => Store::Local(Sram::new(cfg.max_delay)),
            Backing::Psram { base, cache } => Store::Psram {
                adapter: WidthAdapter::new(base),
                cache: L2Cache::new(&format!("{name}.l2"), cache)?,
            },
        };
        let mut arbiter =
            Arbiter::new(ArbiterConfig { capacity: usize::MAX, policy: Policy::RoundRobin });
        arbiter.add_master("writer")?;
        Ok(DelayLine {
            name: name.to_string(),
            cfg,
            arbiter,
            store,
            checker: BusChecker::new(&format!("{name}.internal")),
            writer: WriterState::WaitValid,
            input: None,
            wrpointer: 0,
            head: cfg.max_delay - 1,
            written: 0,
            taps: Vec::new(),
            started: false,
        })
    }

    /// Register a tap. Taps cannot be added once the line has been ticked.
    pub fn add_tap(&mut self, fixed_delay: Option<u32>) -> Result<usize, ConfigError> {
        if self.started {
            return Err(ConfigError::TopologyFrozen { component: "delay line" });
        }
        match fixed_delay {
            None if self.cfg.write_triggers_read => return Err(ConfigError::MissingTapDelay),
            Some(delay) if delay >= self.cfg.max_delay => {
                return Err(ConfigError::TapDelayTooLong { delay, max_delay: self.cfg.max_delay })
            }
            _ => (),
        }
        let id = self.taps.len();
        self.arbiter.add_master(&format!("tap{id}"))?;
        self.taps.push(Tap { fixed_delay, pending: None, state: TapState::Idle });
        Ok(id)
    }

    /// Offer the next sample. Returns false if the previous one has not been
    /// taken by the writer yet.
    pub fn offer(&mut self, sample: Sample) -> bool {
        if self.input.is_some() {
            return false;
        }
        self.input = Some(sample);
        true
    }

    /// Ask `tap` for the sample written `delay` writes before the newest one.
    /// Returns false while the tap is still busy with an earlier request.
    pub fn request(&mut self, tap: usize, delay: u32) -> Result<bool, ConfigError> {
        if delay >= self.cfg.max_delay {
            return Err(ConfigError::TapDelayTooLong { delay, max_delay: self.cfg.max_delay });
        }
        let head = self.head;
        let available = self.written;
        let tap = self.taps.get_mut(tap).ok_or(ConfigError::UnknownTap(tap))?;
        if !tap.can_accept() {
            return Ok(false);
        }
        tap.pending = Some(TapRequest { head, delay, available });
        Ok(true)
    }

    /// Take the output of `tap`, if one is ready.
    pub fn take(&mut self, tap: usize) -> Option<Sample> {
        let tap = self.taps.get_mut(tap)?;
        match tap.state {
            TapState::Ready(sample) => {
                tap.state = TapState::Idle;
                Some(sample)
            }
            _ => None,
        }
    }

    pub fn taps(&self) -> usize {
        self.taps.len()
    }

    /// Samples written so far, saturating at the line size.
    pub fn written(&self) -> u32 {
        self.written
    }

    pub fn cache(&self) -> Option<&L2Cache> {
        match &self.store {
            Store::Psram { cache, .. } => Some(cache),
            Store::Local(_) => None,
        }
    }

    pub fn internal_stats(&self) -> CheckerStats {
        self.checker.stats()
    }

    // helper functions

    fn writer_signals(&self) -> BusSignals {
        match self.writer {
            WriterState::Write { adr, sample } => {
                BusSignals::strobe(BusTransaction::write(adr, sample.to_bus(), SEL_SAMPLE))
            }
            _ => BusSignals::idle(),
        }
    }

    fn tick_writer(&mut self, resp: &BusResponse, taps_ready: bool) {
        match self.writer {
            WriterState::WaitValid => {
                if let Some(sample) = self.input.take() {
                    self.writer = WriterState::Write { adr: self.wrpointer, sample };
                }
            }
            WriterState::Write { adr, sample } => {
                if resp.ack {
                    trace!("[{}] wrote {:?} at slot {}", self.name, sample, adr);
                    self.head = adr;
                    self.wrpointer = (adr + 1) & (self.cfg.max_delay - 1);
                    self.written = (self.written + 1).min(self.cfg.max_delay);
                    self.writer = if self.cfg.write_triggers_read && !self.taps.is_empty() {
                        WriterState::Dispatch
                    } else {
                        WriterState::WaitValid
                    };
                }
            }
            WriterState::Dispatch => {
                if taps_ready {
                    for tap in self.taps.iter_mut() {
                        // fixed delays are checked when taps are added
                        let delay = tap.fixed_delay.unwrap_or(0);
                        let available = self.written;
                        tap.pending = Some(TapRequest { head: self.head, delay, available });
                    }
                    self.writer = WriterState::WaitValid;
                }
            }
        }
    }
}

impl BusMaster for DelayLine {
    fn signals(&self) -> BusSignals {
        match &self.store {
            Store::Psram { cache, .. } => cache.downstream(),
            Store::Local(_) => BusSignals::idle(),
        }
    }

    fn tick(&mut self, ext: &BusResponse) -> Result<()> {
        if !self.started {
            debug!("[{}] starting with {} taps", self.name, self.taps.len());
            self.started = true;
        }
        let mut sigs = Vec::with_capacity(1 + self.taps.len());
        sigs.push(self.writer_signals());
        sigs.extend(self.taps.iter().map(Tap::signals));
        let owner = self.arbiter.select(&sigs);
        let fwd = self.arbiter.forward(&sigs, owner);

        let resp = match &mut self.store {
            Store::Local(sram) => {
                let resp = sram.respond(&fwd);
                self.checker.check(&fwd, &resp)?;
                sram.tick(&fwd, &resp)?;
                resp
            }
            Store::Psram { adapter, cache } => {
                let wide = adapter.request(&fwd);
                let wide_resp = cache.respond(&wide);
                let resp = adapter.response(&fwd, &wide_resp);
                self.checker.check(&fwd, &resp)?;
                cache.tick(&wide, ext);
                resp
            }
        };

        let taps_ready = self.taps.iter().all(Tap::can_accept);
        self.arbiter.tick(&sigs);
        let max_delay = self.cfg.max_delay;
        for (i, tap) in self.taps.iter_mut().enumerate() {
            tap.tick(&self.arbiter.route(i + 1, owner, &resp), max_delay);
        }
        let writer_resp = self.arbiter.route(0, owner, &resp);
        self.tick_writer(&writer_resp, taps_ready);
        Ok(())
    }
}
