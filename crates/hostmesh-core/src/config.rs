//! Protocol-level timeouts and retry budgets (spec §6). Deliberately
//! separate from the CLI's `clap`-parsed configuration in `hostmesh-cli`,
//! which constructs one of these from its own `PROTOCOL_TIMEOUT` /
//! `PROTOCOL_RETRIES` / `PROTOCOL_VERBOSE` fields.

use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProtocolConfig {
    /// How long any single send-and-wait blocks before giving up (spec §6:
    /// `PROTOCOL_TIMEOUT`, default 1s).
    pub timeout: Duration,
    /// Retry budget per phase (spec §6: `PROTOCOL_RETRIES`, default 3).
    pub retries: u32,
    pub verbose: bool,
    /// Mirrors `SIMULATION_ACTIVE`; when set, CSV exports are named after
    /// this node's primary IP (spec §6).
    pub simulation_active: bool,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        ProtocolConfig {
            timeout: Duration::from_secs(1),
            retries: 3,
            verbose: false,
            simulation_active: false,
        }
    }
}
