use log::debug;

use super::{BusResponse, BusSignals};
use crate::error::ConfigError;

pub type PortId = usize;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Policy {
    /// scan starts after the last owner
    RoundRobin,
    /// scan always starts at port 0
    Priority,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ArbiterConfig {
    pub capacity: usize,
    pub policy: Policy,
}

/// Grants one master at a time access to a shared segment. A grant lasts as
/// long as its owner keeps `cyc` asserted and is never preempted.
pub struct Arbiter {
    cfg: ArbiterConfig,
    ports: Vec<String>,
    owner: Option<PortId>,
    last: Option<PortId>,
    started: bool,
    grants: Vec<u64>,
    history: Vec<PortId>,
}

impl Arbiter {
    pub fn new(cfg: ArbiterConfig) -> Self {
        Arbiter {
            cfg,
            ports: Vec::new(),
            owner: None,
            last: None,
            started: false,
            grants: Vec::new(),
            history: Vec::new(),
        }
    }

    pub fn add_master(&mut self, name: &str) -> Result<PortId, ConfigError> {
        if self.started {
            return Err(ConfigError::TopologyFrozen { component: "arbiter" });
        }
        if self.ports.len() >= self.cfg.capacity {
            return Err(ConfigError::TooManyMasters { capacity: self.cfg.capacity });
        }
        self.ports.push(name.to_string());
        self.grants.push(0);
        Ok(self.ports.len() - 1)
    }

    pub fn len(&self) -> usize {
        self.ports.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ports.is_empty()
    }

    pub fn port_name(&self, port: PortId) -> &str {
        &self.ports[port]
    }

    /// Grants handed out per port.
    pub fn grants(&self) -> &[u64] {
        &self.grants
    }

    /// Every grant in the order it was handed out.
    pub fn history(&self) -> &[PortId] {
        &self.history
    }

    /// Owner of the segment this step, given every port's signals.
    pub fn select(&self, masters: &[BusSignals]) -> Option<PortId> {
        let n = masters.len().min(self.ports.len());
        if let Some(owner) = self.owner {
            if owner < n && masters[owner].cyc {
                return Some(owner);
            }
        }
        let start = match (self.cfg.policy, self.owner.or(self.last)) {
            (Policy::RoundRobin, Some(prev)) => prev + 1,
            _ => 0,
        };
        (0..n).map(|i| (start + i) % n).find(|&i| masters[i].cyc)
    }

    /// Signals seen downstream: the owner's, or an idle bus.
    pub fn forward(&self, masters: &[BusSignals], owner: Option<PortId>) -> BusSignals {
        owner.map(|o| masters[o]).unwrap_or_default()
    }

    /// Response seen by `port`. Only the owner ever sees a termination.
    pub fn route(&self, port: PortId, owner: Option<PortId>, resp: &BusResponse) -> BusResponse {
        if owner == Some(port) {
            *resp
        } else {
            BusResponse::default()
        }
    }

    pub fn tick(&mut self, masters: &[BusSignals]) {
        self.started = true;
        let next = self.select(masters);
        if next != self.owner {
            if let Some(port) = next {
                debug!("grant -> {}", self.ports[port]);
                self.grants[port] += 1;
                self.history.push(port);
            }
            if self.owner.is_some() {
                self.last = self.owner;
            }
            self.owner = next;
        }
    }
}
