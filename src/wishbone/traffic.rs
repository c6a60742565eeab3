use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use log::debug;

use super::{BusMaster, BusResponse, BusSignals, BusTransaction, CycleType, SEL_ALL};
use crate::error::Result;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Op {
    Read(u32),
    Write(u32, u32),
    /// write with an explicit byte select
    WriteSel(u32, u32, u8),
    /// incrementing burst read of `len` words
    BurstRead(u32, u32),
    BurstWrite(u32, Vec<u32>),
    /// release the bus for this many steps
    Idle(u32),
}

impl Op {
    fn words(&self) -> u32 {
        match self {
            Op::Read(_) | Op::Write(..) | Op::WriteSel(..) => 1,
            Op::BurstRead(_, len) => *len,
            Op::BurstWrite(_, data) => data.len() as u32,
            Op::Idle(_) => 0,
        }
    }
}

/// One finished op: data read back, and the steps from first presenting the
/// op until its last acknowledge.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Completion {
    pub op: usize,
    pub data: Vec<u32>,
    pub steps: u32,
}

enum GenState {
    Issuing { word: u32, steps: u32, data: Vec<u32> },
    /// bus released for one step after an op, so others can be granted
    Release,
    Idle(u32),
    Done,
}

/// Bus master replaying a fixed list of ops in order.
pub struct TrafficGen {
    name: String,
    ops: Vec<Op>,
    pc: usize,
    state: GenState,
    completed: Vec<Completion>,
    done: Option<Arc<AtomicBool>>,
}

impl TrafficGen {
    pub fn new(name: &str, ops: Vec<Op>) -> Self {
        let mut gen = TrafficGen {
            name: name.to_string(),
            ops,
            pc: 0,
            state: GenState::Done,
            completed: Vec::new(),
            done: None,
        };
        gen.enter();
        gen
    }

    /// Raise `done` once the last op has completed.
    pub fn with_done(mut self, done: Arc<AtomicBool>) -> Self {
        done.store(self.is_done(), Ordering::Relaxed);
        self.done = Some(done);
        self
    }

    pub fn is_done(&self) -> bool {
        matches!(self.state, GenState::Done)
    }

    pub fn completed(&self) -> &[Completion] {
        &self.completed
    }

    /// Data of the completed op at `index` in the op list.
    pub fn result(&self, index: usize) -> Option<&Completion> {
        self.completed.iter().find(|c| c.op == index)
    }

    // helper functions

    fn enter(&mut self) {
        loop {
            let Some(op) = self.ops.get(self.pc) else {
                debug!("[{}] all ops done", self.name);
                self.state = GenState::Done;
                if let Some(done) = &self.done {
                    done.store(true, Ordering::Relaxed);
                }
                return;
            };
            match op {
                Op::Idle(0) => self.pc += 1,
                Op::Idle(n) => {
                    self.state = GenState::Idle(*n);
                    return;
                }
                op if op.words() == 0 => {
                    self.completed.push(Completion { op: self.pc, data: Vec::new(), steps: 0 });
                    self.pc += 1;
                }
                _ => {
                    self.state = GenState::Issuing { word: 0, steps: 0, data: Vec::new() };
                    return;
                }
            }
        }
    }

    fn burst_cti(word: u32, len: u32) -> CycleType {
        if word + 1 == len {
            CycleType::EndOfBurst
        } else {
            CycleType::IncrBurst
        }
    }
}

impl BusMaster for TrafficGen {
    fn signals(&self) -> BusSignals {
        let GenState::Issuing { word, .. } = self.state else {
            return BusSignals::idle();
        };
        let tx = match &self.ops[self.pc] {
            Op::Read(adr) => BusTransaction::read(*adr),
            Op::Write(adr, dat) => BusTransaction::write(*adr, *dat, SEL_ALL),
            Op::WriteSel(adr, dat, sel) => BusTransaction::write(*adr, *dat, *sel),
            Op::BurstRead(adr, len) => {
                BusTransaction::read(adr + word).with_cti(Self::burst_cti(word, *len))
            }
            Op::BurstWrite(adr, data) => {
                let cti = Self::burst_cti(word, data.len() as u32);
                BusTransaction::write(adr + word, data[word as usize], SEL_ALL).with_cti(cti)
            }
            Op::Idle(_) => return BusSignals::idle(),
        };
        BusSignals::strobe(tx)
    }

    fn tick(&mut self, resp: &BusResponse) -> Result<()> {
        match &mut self.state {
            GenState::Issuing { word, steps, data } => {
                *steps += 1;
                if !resp.ack {
                    return Ok(());
                }
                let op = &self.ops[self.pc];
                if !matches!(op, Op::Write(..) | Op::WriteSel(..) | Op::BurstWrite(..)) {
                    data.push(resp.dat_r);
                }
                *word += 1;
                if *word == op.words() {
                    let data = std::mem::take(data);
                    let done = Completion { op: self.pc, data, steps: *steps };
                    self.completed.push(done);
                    self.pc += 1;
                    self.state = GenState::Release;
                }
            }
            GenState::Release => self.enter(),
            GenState::Idle(n) => {
                *n -= 1;
                if *n == 0 {
                    self.pc += 1;
                    self.enter();
                }
            }
            GenState::Done => (),
        }
        Ok(())
    }
}
