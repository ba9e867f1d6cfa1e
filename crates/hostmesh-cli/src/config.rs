//! CLI configuration, loaded with `clap::Parser`'s `env` feature the way
//! `flow_cli_common::LogArgs` combines flags and environment variables in
//! one struct. Field names, defaults and validation match spec.md §6.

use std::net::IpAddr;
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

use hostmesh_core::Requirements;

use crate::logging::LogArgs;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HostCapacity {
    pub cpu: u32,
    pub ram: f64,
    pub disk: f64,
}

impl HostCapacity {
    pub fn as_requirements(&self) -> Requirements {
        Requirements {
            cpu: self.cpu,
            ram: self.ram,
            disk: self.disk,
        }
    }
}

#[derive(Debug, Parser)]
#[command(name = "hostmesh", about = "Decentralized P2P network-application hosting exchange node")]
pub struct Config {
    #[command(flatten)]
    pub log: LogArgs,

    /// Path to the sqlite database file, or `:memory:`.
    #[arg(long, env = "DATABASE_PATH", default_value = ":memory:")]
    pub database_path: String,

    /// Schema script to load on open; falls back to the embedded default.
    #[arg(long, env = "DATABASE_DEFS_PATH")]
    pub database_defs_path: Option<PathBuf>,

    /// Run the application executor against a bounded random delay instead
    /// of real work (spec Non-goals: real application execution is out of
    /// scope either way; this only toggles the delay bounds below).
    #[arg(long, env = "SIMULATION_ACTIVE", default_value_t = false)]
    pub simulation_active: bool,

    #[arg(long, env = "SIMULATION_EXEC_MIN", default_value_t = 0.0)]
    pub simulation_exec_min: f64,

    #[arg(long, env = "SIMULATION_EXEC_MAX", default_value_t = 1.0)]
    pub simulation_exec_max: f64,

    /// Use `hosts_default` as every peer's capacity unless a `HOSTS_<ip>`
    /// override is present.
    #[arg(long, env = "HOSTS_USE_DEFAULT", default_value_t = true)]
    pub hosts_use_default: bool,

    #[arg(long, env = "HOSTS_DEFAULT_CPU", default_value_t = 4)]
    pub hosts_default_cpu: u32,
    #[arg(long, env = "HOSTS_DEFAULT_RAM", default_value_t = 4096.0)]
    pub hosts_default_ram: f64,
    #[arg(long, env = "HOSTS_DEFAULT_DISK", default_value_t = 40.0)]
    pub hosts_default_disk: f64,

    #[arg(long, env = "PROTOCOL_TIMEOUT_SECS", default_value_t = 1)]
    pub protocol_timeout_secs: u64,
    #[arg(long, env = "PROTOCOL_RETRIES", default_value_t = 3)]
    pub protocol_retries: u32,
    #[arg(long, env = "PROTOCOL_VERBOSE", default_value_t = false)]
    pub protocol_verbose: bool,

    /// Local address to bind the UDP transport to.
    #[arg(long, env = "BIND_ADDR", default_value = "0.0.0.0")]
    pub bind_addr: IpAddr,
    /// Port shared by every node on the segment for unicast and the
    /// broadcast destination (spec §6).
    #[arg(long, env = "HOSTMESH_PORT", default_value_t = 7799)]
    pub port: u16,
}

impl Config {
    pub fn hosts_default(&self) -> HostCapacity {
        HostCapacity {
            cpu: self.hosts_default_cpu,
            ram: self.hosts_default_ram,
            disk: self.hosts_default_disk,
        }
    }

    pub fn protocol_timeout(&self) -> Duration {
        Duration::from_secs(self.protocol_timeout_secs)
    }

    /// Resets an invalid or inverted exec-delay range to the spec default
    /// of `[0, 1]` (spec §6).
    pub fn normalize(mut self) -> Self {
        let valid = self.simulation_exec_min.is_finite()
            && self.simulation_exec_max.is_finite()
            && self.simulation_exec_min >= 0.0
            && self.simulation_exec_max >= self.simulation_exec_min;
        if !valid {
            tracing::warn!(
                min = self.simulation_exec_min,
                max = self.simulation_exec_max,
                "invalid SIMULATION_EXEC_MIN/MAX, resetting to [0, 1]"
            );
            self.simulation_exec_min = 0.0;
            self.simulation_exec_max = 1.0;
        }
        self
    }

    /// Per-host capacity overrides. `clap`'s derive can't express a
    /// dynamic-key `HOSTS_<ip>` map, so this one piece of configuration is
    /// read directly from the environment at startup (spec §6).
    pub fn host_overrides() -> Vec<(IpAddr, HostCapacity)> {
        let mut overrides = Vec::new();
        for (key, value) in std::env::vars() {
            let Some(ip_part) = key.strip_prefix("HOSTS_") else {
                continue;
            };
            if matches!(ip_part, "USE_DEFAULT" | "DEFAULT_CPU" | "DEFAULT_RAM" | "DEFAULT_DISK") {
                continue;
            }
            let Ok(ip) = ip_part.replace('_', ".").parse::<IpAddr>() else {
                tracing::warn!(key, "ignoring malformed HOSTS_<ip> key");
                continue;
            };
            let Some(capacity) = parse_host_capacity(&value) else {
                tracing::warn!(key, value, "ignoring malformed HOSTS_<ip> value");
                continue;
            };
            overrides.push((ip, capacity));
        }
        overrides
    }
}

/// Parses a `cpu,ram,disk` triple, e.g. `HOSTS_10_0_0_2=4,4096,40`.
fn parse_host_capacity(value: &str) -> Option<HostCapacity> {
    let mut parts = value.split(',');
    let cpu = parts.next()?.trim().parse().ok()?;
    let ram = parts.next()?.trim().parse().ok()?;
    let disk = parts.next()?.trim().parse().ok()?;
    if parts.next().is_some() {
        return None;
    }
    Some(HostCapacity { cpu, ram, disk })
}
