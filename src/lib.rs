//! Cycle-stepped model of a write-back L2 cache and burst DMA engines sharing
//! one bus in front of a high-latency PSRAM.

pub mod cache;
pub mod commons;
pub mod delay_line;
pub mod error;
pub mod framebuffer;
pub mod interconnect;
pub mod psram;
pub mod raster;
pub mod sim;
pub mod sram;
pub mod wishbone;

pub use commons::{timing, Addr, SystemSpec};
pub use error::{ConfigError, ProtocolViolation, SimError};
