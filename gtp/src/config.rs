//! Process-wide configuration, bundled explicitly instead of living as
//! scattered globals (the source's `config.py` constants).

use crate::field::FieldConfig;

/// Default relay host, matching the source's `config.py::SERVER_HOST`.
pub const DEFAULT_HOST: &str = "127.0.0.1";

/// Default relay port, matching the source's `config.py::SERVER_PORT`.
pub const DEFAULT_PORT: u16 = 8888;

/// Default field modulus: a prime substantially larger than `FIELD_SIZE^2`.
pub const DEFAULT_PRIME: u64 = 2_147_483_647; // 2^31 - 1

/// Default side length of the guessable grid.
pub const DEFAULT_FIELD_SIZE: u64 = 5;

/// Address of the relay server a peer connects to.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RelayAddress {
    pub host: String,
    pub port: u16,
}

impl Default for RelayAddress {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
        }
    }
}

impl RelayAddress {
    pub fn socket_addr_string(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Immutable game configuration, threaded by reference through every
/// component (field, wire, relay, demux, protocol, coordinator).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Config {
    pub field: FieldConfig,
    pub field_size: u64,
    pub players: usize,
    pub relay: RelayAddress,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            field: FieldConfig::new(DEFAULT_PRIME),
            field_size: DEFAULT_FIELD_SIZE,
            players: 2,
            relay: RelayAddress::default(),
        }
    }
}
