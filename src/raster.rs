//! Pixel plotting into a framebuffer through a shared cache.
use std::collections::VecDeque;

use log::{debug, trace};

use crate::cache::{CacheConfig, CacheFlusher, CacheStats, L2Cache};
use crate::error::{ConfigError, Result};
use crate::framebuffer::{FramebufferWindow, Pixel};
use crate::wishbone::{
    Arbiter, ArbiterConfig, BusChecker, BusMaster, BusResponse, BusSignals, BusTransaction, Policy,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BlendMode {
    /// overwrite the pixel
    Replace,
    /// add intensities, saturating, and take the new color
    Additive,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PlotRequest {
    pub x: i32,
    pub y: i32,
    pub pixel: Pixel,
    pub blend: BlendMode,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum PlotState {
    Idle,
    Read { adr: u32, lane: u32, pixel: Pixel },
    Write { adr: u32, dat: u32, sel: u8 },
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PlotStats {
    pub plotted: u64,
    pub clipped: u64,
}

/// Bus master turning plot requests into byte writes.
pub struct FramebufferPlotter {
    window: FramebufferWindow,
    depth: usize,
    queue: VecDeque<PlotRequest>,
    state: PlotState,
    stats: PlotStats,
}

impl FramebufferPlotter {
    pub fn new(window: FramebufferWindow, depth: usize) -> Result<Self, ConfigError> {
        if window.bytes_per_pixel != 1 {
            return Err(ConfigError::InvalidWindow("plotting needs one byte per pixel"));
        }
        if depth == 0 {
            return Err(ConfigError::InvalidFifo("plot queue cannot be empty"));
        }
        Ok(FramebufferPlotter {
            window,
            depth,
            queue: VecDeque::with_capacity(depth),
            state: PlotState::Idle,
            stats: PlotStats::default(),
        })
    }

    /// Queue a request. Returns false if the queue is full.
    pub fn push(&mut self, req: PlotRequest) -> bool {
        if self.queue.len() >= self.depth {
            return false;
        }
        self.queue.push_back(req);
        true
    }

    pub fn is_idle(&self) -> bool {
        self.state == PlotState::Idle && self.queue.is_empty()
    }

    pub fn stats(&self) -> PlotStats {
        self.stats
    }

    fn write(adr: u32, lane: u32, pixel: Pixel) -> PlotState {
        PlotState::Write {
            adr,
            dat: (pixel.to_byte() as u32) << (8 * lane),
            sel: 1 << lane,
        }
    }

    fn next_request(&mut self) -> PlotState {
        while let Some(req) = self.queue.pop_front() {
            let Some((adr, lane)) = self.window.pixel_address(req.x, req.y) else {
                trace!("plot ({}, {}) off screen", req.x, req.y);
                self.stats.clipped += 1;
                continue;
            };
            return match req.blend {
                BlendMode::Replace => Self::write(adr, lane, req.pixel),
                BlendMode::Additive => PlotState::Read { adr, lane, pixel: req.pixel },
            };
        }
        PlotState::Idle
    }
}

impl BusMaster for FramebufferPlotter {
    fn signals(&self) -> BusSignals {
        match self.state {
            PlotState::Read { adr, .. } => BusSignals::strobe(BusTransaction::read(adr)),
            PlotState::Write { adr, dat, sel } => {
                BusSignals::strobe(BusTransaction::write(adr, dat, sel))
            }
            PlotState::Idle => BusSignals::idle(),
        }
    }

    fn tick(&mut self, resp: &BusResponse) -> Result<()> {
        self.state = match self.state {
            PlotState::Idle => self.next_request(),
            PlotState::Read { adr, lane, pixel } if resp.ack => {
                let old = Pixel::from_byte((resp.dat_r >> (8 * lane)) as u8);
                let blended = Pixel {
                    color: pixel.color,
                    intensity: (old.intensity + pixel.intensity).min(0xf),
                };
                Self::write(adr, lane, blended)
            }
            PlotState::Write { .. } if resp.ack => {
                self.stats.plotted += 1;
                PlotState::Idle
            }
            state => state,
        };
        Ok(())
    }
}

/// Plotters and a flusher sharing one cache. The cache's downstream port is
/// this component's bus master port.
pub struct PlotterCache {
    arbiter: Arbiter,
    cache: L2Cache,
    flusher: CacheFlusher,
    plotters: Vec<FramebufferPlotter>,
    checker: BusChecker,
    flush_armed: bool,
}

impl PlotterCache {
    pub fn new(
        cfg: CacheConfig,
        flusher: CacheFlusher,
        max_plotters: usize,
    ) -> Result<Self, ConfigError> {
        let capacity = max_plotters + 1;
        let mut arbiter = Arbiter::new(ArbiterConfig { capacity, policy: Policy::RoundRobin });
        arbiter.add_master("flusher")?;
        Ok(PlotterCache {
            arbiter,
            cache: L2Cache::new("plot.l2", cfg)?,
            flusher,
            plotters: Vec::new(),
            checker: BusChecker::new("plot.internal"),
            flush_armed: false,
        })
    }

    pub fn add_plotter(&mut self, plotter: FramebufferPlotter) -> Result<usize, ConfigError> {
        let id = self.plotters.len();
        self.arbiter.add_master(&format!("plotter{id}"))?;
        self.plotters.push(plotter);
        Ok(id)
    }

    /// Queue a request on plotter `id`. Returns false if its queue is full.
    pub fn plot(&mut self, id: usize, req: PlotRequest) -> bool {
        self.plotters.get_mut(id).map_or(false, |p| p.push(req))
    }

    pub fn plotter(&self, id: usize) -> Option<&FramebufferPlotter> {
        self.plotters.get(id)
    }

    pub fn is_idle(&self) -> bool {
        self.plotters.iter().all(FramebufferPlotter::is_idle)
    }

    pub fn cache(&self) -> &L2Cache {
        &self.cache
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    pub fn flusher(&self) -> &CacheFlusher {
        &self.flusher
    }
}

impl BusMaster for PlotterCache {
    fn signals(&self) -> BusSignals {
        self.cache.downstream()
    }

    fn tick(&mut self, ext: &BusResponse) -> Result<()> {
        let mut sigs = Vec::with_capacity(1 + self.plotters.len());
        sigs.push(self.flusher.signals());
        sigs.extend(self.plotters.iter().map(|p| p.signals()));
        let owner = self.arbiter.select(&sigs);
        let fwd = self.arbiter.forward(&sigs, owner);
        let resp = self.cache.respond(&fwd);
        self.checker.check(&fwd, &resp)?;
        self.cache.tick(&fwd, ext);
        if ext.ack && !self.flush_armed {
            debug!("plotter cache: first store access, enabling flusher");
            self.flusher.enable();
            self.flush_armed = true;
        }

        self.arbiter.tick(&sigs);
        self.flusher.tick(&self.arbiter.route(0, owner, &resp))?;
        for (i, plotter) in self.plotters.iter_mut().enumerate() {
            plotter.tick(&self.arbiter.route(i + 1, owner, &resp))?;
        }
        Ok(())
    }
}
