//! Bus signal types and the two roles a component can take on a bus.
//!
//! A step is evaluated in two phases. First every master presents its
//! signals (a function of its state only) and every slave computes its
//! response from the signals it sees. Then every component commits its
//! transition from the values of the first phase. Nothing observes a
//! half-updated system.
use std::fmt;

use crate::error::Result;

pub mod arbiter;
pub mod checker;
pub mod traffic;

pub use arbiter::{Arbiter, ArbiterConfig, Policy, PortId};
pub use checker::{BusChecker, CheckerStats};
pub use traffic::{Op, TrafficGen};

/// byte select of a full 32-bit word
pub const SEL_ALL: u8 = 0b1111;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum CycleType {
    #[default]
    Classic,
    ConstBurst,
    IncrBurst,
    EndOfBurst,
}

impl CycleType {
    pub fn is_burst(&self) -> bool {
        !matches!(self, CycleType::Classic)
    }
}

/// The address phase of one bus transfer.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BusTransaction {
    pub adr: u32,
    pub dat_w: u32,
    pub sel: u8,
    pub we: bool,
    pub cti: CycleType,
}

impl BusTransaction {
    pub fn read(adr: u32) -> Self {
        BusTransaction { adr, sel: SEL_ALL, ..Default::default() }
    }
    pub fn write(adr: u32, dat_w: u32, sel: u8) -> Self {
        BusTransaction { adr, dat_w, sel, we: true, cti: CycleType::Classic }
    }
    pub fn with_cti(self, cti: CycleType) -> Self {
        BusTransaction { cti, ..self }
    }
}

impl fmt::Display for BusTransaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.we {
            write!(
                f,
                "adr=0x{:06x} dat_w=0x{:08x} sel=0b{:04b} {:?}",
                self.adr, self.dat_w, self.sel, self.cti
            )
        } else {
            write!(f, "adr=0x{:06x} read sel=0b{:04b} {:?}", self.adr, self.sel, self.cti)
        }
    }
}

/// What a master drives onto the bus during one step.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BusSignals {
    pub cyc: bool,
    pub stb: bool,
    pub tx: BusTransaction,
}

impl BusSignals {
    pub fn idle() -> Self {
        BusSignals::default()
    }
    /// request `tx`
    pub fn strobe(tx: BusTransaction) -> Self {
        BusSignals { cyc: true, stb: true, tx }
    }
    /// keep the bus without requesting anything
    pub fn hold() -> Self {
        BusSignals { cyc: true, stb: false, tx: BusTransaction::default() }
    }
    pub fn active(&self) -> bool {
        self.cyc && self.stb
    }
}

/// What a slave drives back during one step.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BusResponse {
    pub ack: bool,
    pub err: bool,
    pub rty: bool,
    pub dat_r: u32,
}

impl BusResponse {
    pub fn ack(dat_r: u32) -> Self {
        BusResponse { ack: true, dat_r, ..Default::default() }
    }
    pub fn terminations(&self) -> u32 {
        self.ack as u32 + self.err as u32 + self.rty as u32
    }
}

pub trait BusMaster {
    /// Signals driven this step, from the current state only.
    fn signals(&self) -> BusSignals;
    /// Commit this step given the response to `signals()`.
    fn tick(&mut self, resp: &BusResponse) -> Result<()>;
}

pub trait BusSlave {
    /// Response to `sig` this step. Must not change state.
    fn respond(&self, sig: &BusSignals) -> BusResponse;
    /// Commit this step given what was requested and what was answered.
    fn tick(&mut self, sig: &BusSignals, resp: &BusResponse) -> Result<()>;
}

/// One step of a point-to-point link. Returns the response the master saw.
pub fn step_link(master: &mut dyn BusMaster, slave: &mut dyn BusSlave) -> Result<BusResponse> {
    let sig = master.signals();
    let resp = slave.respond(&sig);
    slave.tick(&sig, &resp)?;
    master.tick(&resp)?;
    Ok(resp)
}

/// Overwrite the bytes of `word` selected by `sel` with those of `dat`.
pub fn merge_bytes(word: u32, dat: u32, sel: u8) -> u32 {
    let mask = (0..4)
        .filter(|b| sel & (1 << b) != 0)
        .fold(0u32, |m, b| m | (0xff << (8 * b)));
    (word & !mask) | (dat & mask)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn byte_merge() {
        assert_eq!(merge_bytes(0x11223344, 0xaabbccdd, 0b0000), 0x11223344);
        assert_eq!(merge_bytes(0x11223344, 0xaabbccdd, 0b0001), 0x112233dd);
        assert_eq!(merge_bytes(0x11223344, 0xaabbccdd, 0b1100), 0xaabb3344);
        assert_eq!(merge_bytes(0x11223344, 0xaabbccdd, SEL_ALL), 0xaabbccdd);
    }
}
