use thiserror::Error;

use crate::wishbone::BusTransaction;

/// Errors raised while building a system. All of them are fatal: nothing is
/// simulated with an invalid topology.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("{what} must be a power of two, got {value}")]
    NotPowerOfTwo { what: &'static str, value: u32 },
    #[error("burst length must be greater than 1, got {0}")]
    BurstTooShort(u32),
    #[error("cache of {cache_words} words cannot hold a line of {burst_len} words")]
    CacheTooSmall { cache_words: u32, burst_len: u32 },
    #[error("address width {width} cannot hold {needed} index bits")]
    AddressWidth { width: u32, needed: u32 },
    #[error("tap delay {delay} must be less than the delay line size {max_delay}")]
    TapDelayTooLong { delay: u32, max_delay: u32 },
    #[error("taps need a fixed delay when writes trigger reads")]
    MissingTapDelay,
    #[error("no tap with id {0}")]
    UnknownTap(usize),
    #[error("arbiter is full ({capacity} masters)")]
    TooManyMasters { capacity: usize },
    #[error("{component}: topology cannot change once the simulation has started")]
    TopologyFrozen { component: &'static str },
    #[error("sub-word access to the backing store at 0x{adr:06x} (sel=0b{sel:04b})")]
    SubWordAccess { adr: u32, sel: u8 },
    #[error("invalid framebuffer window: {0}")]
    InvalidWindow(&'static str),
    #[error("invalid cache flusher: {0}")]
    InvalidFlusher(&'static str),
    #[error("invalid fifo setup: {0}")]
    InvalidFifo(&'static str),
    #[error("expected {expected} bus masters, got {got}")]
    MasterCountMismatch { expected: usize, got: usize },
}

/// Bus protocol rules a component can break at run time.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolViolation {
    #[error("stb asserted without cyc")]
    StbWithoutCyc,
    #[error("more than one of ack/err/rty asserted")]
    MultipleTerminations,
    #[error("termination asserted with no request outstanding")]
    SpuriousTermination,
    #[error("{0} changed during an unacknowledged transfer")]
    Unstable(&'static str),
    #[error("write with an empty byte select")]
    EmptySelect,
    #[error("incrementing burst expected address 0x{expected:06x}, got 0x{got:06x}")]
    BurstAddress { expected: u32, got: u32 },
    #[error("address 0x{adr:06x} is outside the {limit} word store")]
    AddressOutOfRange { adr: u32, limit: u32 },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SimError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("[{component}] {violation} ({transaction})")]
    Protocol {
        component: String,
        transaction: BusTransaction,
        violation: ProtocolViolation,
    },
}

impl SimError {
    pub fn protocol(
        component: &str,
        transaction: BusTransaction,
        violation: ProtocolViolation,
    ) -> Self {
        SimError::Protocol {
            component: component.to_string(),
            transaction,
            violation,
        }
    }
}

pub type Result<T, E = SimError> = std::result::Result<T, E>;
