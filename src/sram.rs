use crate::error::{ProtocolViolation, Result, SimError};
use crate::wishbone::{merge_bytes, BusResponse, BusSignals, BusSlave};

/// Small on-chip memory. Acknowledges one step after a request is presented
/// and honours byte selects.
pub struct Sram {
    mem: Vec<u32>,
    ready: bool,
}

impl Sram {
    pub fn new(words: u32) -> Self {
        Sram { mem: vec![0; words as usize], ready: false }
    }

    pub fn peek(&self, adr: u32) -> u32 {
        self.mem[adr as usize]
    }
}

impl BusSlave for Sram {
    fn respond(&self, sig: &BusSignals) -> BusResponse {
        if self.ready && sig.active() {
            BusResponse::ack(self.mem.get(sig.tx.adr as usize).copied().unwrap_or(0))
        } else {
            BusResponse::default()
        }
    }

    fn tick(&mut self, sig: &BusSignals, resp: &BusResponse) -> Result<()> {
        if !sig.active() {
            self.ready = false;
            return Ok(());
        }
        let tx = sig.tx;
        let limit = self.mem.len() as u32;
        if tx.adr >= limit {
            let v = ProtocolViolation::AddressOutOfRange { adr: tx.adr, limit };
            return Err(SimError::protocol("sram", tx, v));
        }
        if resp.ack {
            if tx.we {
                let word = &mut self.mem[tx.adr as usize];
                *word = merge_bytes(*word, tx.dat_w, tx.sel);
            }
            self.ready = false;
        } else {
            self.ready = true;
        }
        Ok(())
    }
}
