use serde::{Deserialize, Serialize};

use crate::cache::CacheConfig;
use crate::delay_line::{Backing, DelayLineConfig};
use crate::error::ConfigError;
use crate::framebuffer::{PersistConfig, ScanoutConfig};
use crate::psram::PsramConfig;
use crate::wishbone::arbiter::{ArbiterConfig, Policy};

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SystemSpec {             // unit         reasonable defaults
    pub addr_width: u32,            // bits         22
    pub psram_words: u32,           // words        4096
    pub psram_latency: u32,         // cycles       4
    pub cache_words: u32,           // words        64
    pub burst_len: u32,             // words        4
    pub max_masters: usize,         // ports        8
    pub fifo_depth: u32,            // words        16
    pub holdoff: u32,               // cycles       256
    pub decay: u8,                  // intensity    1
    pub scanout_fifo_depth: u32,    // words        512
    pub scanout_threshold: u32,     // words        128
    pub scanout_drain_period: u32,  // cycles       4
    pub delay_max: u32,             // samples      256
    pub flush_backoff_bits: u32,    // bits         10
}

impl Default for SystemSpec {
    fn default() -> Self {
        SystemSpec {
            addr_width: 22,
            psram_words: 4096,
            psram_latency: 4,
            cache_words: 64,
            burst_len: 4,
            max_masters: 8,
            fifo_depth: 16,
            holdoff: 256,
            decay: 1,
            scanout_fifo_depth: 512,
            scanout_threshold: 128,
            scanout_drain_period: 4,
            delay_max: 256,
            flush_backoff_bits: 10,
        }
    }
}

impl SystemSpec {
    pub fn from_json(text: &str) -> serde_json::Result<Self> {
        serde_json::from_str(text)
    }

    pub fn psram(&self) -> PsramConfig {
        PsramConfig {
            storage_words: self.psram_words,
            latency_cycles: self.psram_latency,
        }
    }

    pub fn cache(&self) -> CacheConfig {
        CacheConfig {
            cachesize_words: self.cache_words,
            burst_len: self.burst_len,
            addr_width: self.addr_width,
        }
    }

    pub fn arbiter(&self) -> ArbiterConfig {
        ArbiterConfig {
            capacity: self.max_masters,
            policy: Policy::RoundRobin,
        }
    }

    pub fn persist(&self) -> PersistConfig {
        PersistConfig {
            fifo_depth: self.fifo_depth,
            holdoff: self.holdoff,
            decay: self.decay,
        }
    }

    pub fn scanout(&self) -> ScanoutConfig {
        ScanoutConfig {
            fifo_depth: self.scanout_fifo_depth,
            burst_threshold_words: self.scanout_threshold,
            drain_period: self.scanout_drain_period,
        }
    }

    /// PSRAM backed delay line stored at `base`, with a cache of the
    /// system's geometry in front of it.
    pub fn delay_line(&self, base: u32) -> DelayLineConfig {
        DelayLineConfig {
            max_delay: self.delay_max,
            write_triggers_read: true,
            backing: Backing::Psram { base, cache: self.cache() },
        }
    }
}

pub mod timing {
    //! Worst-case step counts of a single uncontended access through an
    //! `L2Cache` to a `Psram`, counted from the step the request is first
    //! presented up to and including the step it is acknowledged.
    use super::SystemSpec;

    /// idle -> test -> ack
    pub fn hit() -> u32 {
        3
    }
    pub fn line_transfer(spec: &SystemSpec) -> u32 {
        // store leaves idle, waits out its latency, then streams one word per step
        1 + spec.psram_latency + spec.burst_len
    }
    pub fn miss_clean(spec: &SystemSpec) -> u32 {
        2 + line_transfer(spec) + 2
    }
    pub fn miss_dirty(spec: &SystemSpec) -> u32 {
        // eviction, one step with strobe released, refill
        2 + line_transfer(spec) + 1 + line_transfer(spec) + 2
    }
}

/// Word address on a bus.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Addr(pub u32);

impl Addr {
    /// get (offset, line, tag) of this address under the given cache geometry
    pub fn pos(&self, cfg: &CacheConfig) -> (u32, u32, u32) {
        let offset_bits = cfg.offset_bits();
        let line_bits = cfg.line_bits();
        let offset = self.0 & ((1 << offset_bits) - 1);
        let line = (self.0 >> offset_bits) & ((1 << line_bits) - 1);
        let tag = self.0 >> (offset_bits + line_bits);
        (offset, line, tag)
    }

    pub fn from_pos(cfg: &CacheConfig, offset: u32, line: u32, tag: u32) -> Self {
        let offset_bits = cfg.offset_bits();
        Addr((tag << (offset_bits + cfg.line_bits())) | (line << offset_bits) | offset)
    }
}

pub(crate) fn ensure_pow2(what: &'static str, value: u32) -> Result<(), ConfigError> {
    if value.is_power_of_two() {
        Ok(())
    } else {
        Err(ConfigError::NotPowerOfTwo { what, value })
    }
}
