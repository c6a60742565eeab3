use log::trace;

use super::{BusResponse, BusSignals, BusTransaction, CycleType};
use crate::error::{ProtocolViolation, Result, SimError};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CheckerStats {
    pub reads: u64,
    pub writes: u64,
    pub read_bursts: u64,
    pub write_bursts: u64,
    /// steps spent with a request waiting for its acknowledge
    pub stalls: u64,
}

/// Passive snooper of one bus segment. Every rule it checks is fatal.
pub struct BusChecker {
    name: String,
    pending: Option<(BusTransaction, u32)>,
    burst_next: Option<u32>,
    stats: CheckerStats,
}

impl BusChecker {
    pub fn new(name: &str) -> Self {
        BusChecker {
            name: name.to_string(),
            pending: None,
            burst_next: None,
            stats: CheckerStats::default(),
        }
    }

    pub fn stats(&self) -> CheckerStats {
        self.stats
    }

    /// Forget any transfer or burst in flight. Used when the segment changes
    /// hands without `cyc` dropping in between.
    pub fn end_cycle(&mut self) {
        self.pending = None;
        self.burst_next = None;
    }

    fn violation(&self, tx: BusTransaction, v: ProtocolViolation) -> SimError {
        SimError::protocol(&self.name, tx, v)
    }

    /// Check one step of the segment and record it.
    pub fn check(&mut self, sig: &BusSignals, resp: &BusResponse) -> Result<()> {
        let tx = sig.tx;
        if sig.stb && !sig.cyc {
            return Err(self.violation(tx, ProtocolViolation::StbWithoutCyc));
        }
        if resp.terminations() > 1 {
            return Err(self.violation(tx, ProtocolViolation::MultipleTerminations));
        }
        if resp.terminations() > 0 && !sig.active() {
            return Err(self.violation(tx, ProtocolViolation::SpuriousTermination));
        }
        if !sig.cyc {
            self.pending = None;
            self.burst_next = None;
            return Ok(());
        }
        if !sig.active() {
            // master owns the bus but requests nothing this step
            self.pending = None;
            return Ok(());
        }

        if let Some((prev, _)) = self.pending {
            let unstable = if prev.we != tx.we {
                Some("we")
            } else if prev.adr != tx.adr {
                Some("adr")
            } else if prev.sel != tx.sel {
                Some("sel")
            } else if tx.we && prev.dat_w != tx.dat_w {
                Some("dat_w")
            } else if prev.cti != tx.cti {
                Some("cti")
            } else {
                None
            };
            if let Some(signal) = unstable {
                return Err(self.violation(tx, ProtocolViolation::Unstable(signal)));
            }
        }
        if tx.we && tx.sel == 0 {
            return Err(self.violation(tx, ProtocolViolation::EmptySelect));
        }
        let incrementing = matches!(tx.cti, CycleType::IncrBurst | CycleType::EndOfBurst);
        if let Some(expected) = self.burst_next.filter(|_| incrementing) {
            if tx.adr != expected {
                let v = ProtocolViolation::BurstAddress { expected, got: tx.adr };
                return Err(self.violation(tx, v));
            }
        }

        let waited = self.pending.map(|(_, w)| w).unwrap_or(0);
        if resp.terminations() == 0 {
            self.stats.stalls += 1;
            self.pending = Some((tx, waited + 1));
            return Ok(());
        }

        self.pending = None;
        if tx.we {
            self.stats.writes += 1;
            trace!("[{}] {} Δt={}", self.name, tx, waited);
        } else {
            self.stats.reads += 1;
            trace!("[{}] {} dat_r=0x{:08x} Δt={}", self.name, tx, resp.dat_r, waited);
        }
        self.burst_next = match tx.cti {
            CycleType::IncrBurst => Some(tx.adr.wrapping_add(1)),
            CycleType::EndOfBurst => {
                if tx.we {
                    self.stats.write_bursts += 1;
                } else {
                    self.stats.read_bursts += 1;
                }
                None
            }
            _ => None,
        };
        Ok(())
    }
}
