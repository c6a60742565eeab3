//! The shared bus: every DMA master behind one arbiter, in front of the
//! backing store.
use log::debug;
use serde::Serialize;

use crate::commons::SystemSpec;
use crate::error::{ConfigError, Result};
use crate::psram::Psram;
use crate::wishbone::{
    Arbiter, BusChecker, BusMaster, BusResponse, BusSignals, BusSlave, CheckerStats, PortId,
};

/// What happened on the shared segment during one step.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StepReport {
    pub cycle: u64,
    pub owner: Option<PortId>,
    pub signals: BusSignals,
    pub response: BusResponse,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct InterconnectStats {
    pub cycles: u64,
    /// steps with some master owning the bus
    pub busy: u64,
    /// acknowledged words per port
    pub acks: Vec<u64>,
    pub reads: u64,
    pub writes: u64,
    pub read_bursts: u64,
    pub write_bursts: u64,
}

pub struct Interconnect {
    arbiter: Arbiter,
    store: Psram,
    checker: BusChecker,
    /// owner during the previous step
    owner: Option<PortId>,
    cycle: u64,
    busy: u64,
    acks: Vec<u64>,
}

impl Interconnect {
    pub fn new(spec: &SystemSpec) -> Self {
        Interconnect {
            arbiter: Arbiter::new(spec.arbiter()),
            store: Psram::new("psram", spec.psram()),
            checker: BusChecker::new("shared"),
            owner: None,
            cycle: 0,
            busy: 0,
            acks: Vec::new(),
        }
    }

    pub fn add_master(&mut self, name: &str) -> Result<PortId, ConfigError> {
        let port = self.arbiter.add_master(name)?;
        self.acks.push(0);
        Ok(port)
    }

    pub fn arbiter(&self) -> &Arbiter {
        &self.arbiter
    }

    pub fn store(&self) -> &Psram {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut Psram {
        &mut self.store
    }

    pub fn cycle(&self) -> u64 {
        self.cycle
    }

    pub fn checker_stats(&self) -> CheckerStats {
        self.checker.stats()
    }

    pub fn stats(&self) -> InterconnectStats {
        let c = self.checker.stats();
        InterconnectStats {
            cycles: self.cycle,
            busy: self.busy,
            acks: self.acks.clone(),
            reads: c.reads,
            writes: c.writes,
            read_bursts: c.read_bursts,
            write_bursts: c.write_bursts,
        }
    }

    /// Advance every master and the store by one step. `masters` are given in
    /// port order.
    pub fn step(&mut self, masters: &mut [&mut dyn BusMaster]) -> Result<StepReport> {
        if masters.len() != self.arbiter.len() {
            let expected = self.arbiter.len();
            return Err(ConfigError::MasterCountMismatch { expected, got: masters.len() }.into());
        }
        if self.cycle == 0 {
            debug!("shared bus starting with {} masters", masters.len());
        }
        let sigs: Vec<BusSignals> = masters.iter().map(|m| m.signals()).collect();
        let owner = self.arbiter.select(&sigs);
        let fwd = self.arbiter.forward(&sigs, owner);
        if owner != self.owner {
            // a hand-over without cyc dropping still ends the previous cycle
            self.store.release();
            self.checker.end_cycle();
            self.owner = owner;
        }
        let resp = self.store.respond(&fwd);
        self.checker.check(&fwd, &resp)?;
        self.store.tick(&fwd, &resp)?;

        self.arbiter.tick(&sigs);
        for (port, master) in masters.iter_mut().enumerate() {
            master.tick(&self.arbiter.route(port, owner, &resp))?;
        }

        if let Some(port) = owner {
            self.busy += 1;
            if resp.ack {
                self.acks[port] += 1;
            }
        }
        let report = StepReport { cycle: self.cycle, owner, signals: fwd, response: resp };
        self.cycle += 1;
        Ok(report)
    }
}

/// An interconnect that owns its masters.
pub struct Soc {
    interconnect: Interconnect,
    masters: Vec<Box<dyn BusMaster + Send>>,
}

impl Soc {
    pub fn new(interconnect: Interconnect) -> Self {
        Soc { interconnect, masters: Vec::new() }
    }

    pub fn add_master(
        &mut self,
        name: &str,
        master: Box<dyn BusMaster + Send>,
    ) -> Result<PortId, ConfigError> {
        let port = self.interconnect.add_master(name)?;
        self.masters.push(master);
        Ok(port)
    }

    pub fn interconnect(&self) -> &Interconnect {
        &self.interconnect
    }

    pub fn interconnect_mut(&mut self) -> &mut Interconnect {
        &mut self.interconnect
    }

    pub fn step(&mut self) -> Result<StepReport> {
        let mut masters: Vec<&mut dyn BusMaster> =
            self.masters.iter_mut().map(|m| m.as_mut() as &mut dyn BusMaster).collect();
        self.interconnect.step(&mut masters)
    }
}
