use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use anyhow::{bail, Context};
use rustc_hash::FxHashSet;
use serde::Deserialize;
use tracing::info;

const DEFAULT_QUEUE_SIZE: usize = 1000;
const DEFAULT_AGENT_TIMEOUT_MS: u64 = 2000;

/// Process-lifetime configuration, shared immutably by all workers. Built
/// from the JSON file given as the first CLI argument; addresses and
/// durations are validated at load time so the rest of the code never deals
/// with raw strings.
#[derive(Debug)]
pub struct GatewayConfig {
    pub cmd: CmdConfig,
    pub msc_endpoints: Vec<MscEndpointConfig>,
    pub stream_ports: Vec<StreamPortConfig>,
}

/// The command / control endpoint.
#[derive(Debug)]
pub struct CmdConfig {
    /// where command packets are received
    pub local_addr: SocketAddr,
    /// acknowledgement / broadcast sink
    pub remote_addr: SocketAddr,
    /// per-request fan-out deadline
    pub response_timeout: Duration,
    /// bound on the packet queues
    pub queue_size: usize,
    pub default_agent_timeout: Duration,
}

/// One external MSC endpoint fronted by this gateway.
#[derive(Debug, Clone)]
pub struct MscEndpointConfig {
    pub id: String,
    /// where this endpoint's packets are received
    pub local_addr: SocketAddr,
    /// where sub-commands are sent
    pub remote_addr: SocketAddr,
    pub response_timeout: Duration,
}

/// Stream ports are bound configuration: parsed and validated here, not
/// consumed by the dispatch core.
#[derive(Debug, Clone)]
pub struct StreamPortConfig {
    pub id: String,
    pub local_addr: SocketAddr,
    pub remote_addr: SocketAddr,
    pub format: String,
}

// the raw file shape, before address parsing and validation

#[derive(Deserialize)]
struct ConfigFile {
    cmd: CmdSection,
    msc_agent: Vec<MscAgentSection>,
    stream_ports: Vec<StreamPortSection>,
}

#[derive(Deserialize)]
struct CmdSection {
    local_address: String,
    remote_address: String,
    response_timeout_ms: u64,
    agent_settings: Option<AgentSettingsSection>,
}

#[derive(Deserialize)]
struct AgentSettingsSection {
    queue_size: Option<usize>,
    default_timeout_ms: Option<u64>,
}

#[derive(Deserialize)]
struct MscAgentSection {
    id: String,
    local_address: String,
    remote_address: String,
    response_timeout_ms: u64,
    #[allow(dead_code)] // accepted per entry for compatibility, not consumed
    agent_settings: Option<AgentSettingsSection>,
}

#[derive(Deserialize)]
struct StreamPortSection {
    id: String,
    local_address: String,
    remote_address: String,
    format: String,
}

impl GatewayConfig {
    pub fn load(path: &Path, verbose: bool) -> anyhow::Result<GatewayConfig> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("cannot read config file {}", path.display()))?;
        let config = Self::parse(&raw)?;
        if verbose {
            config.log();
        }
        Ok(config)
    }

    pub fn parse(raw: &str) -> anyhow::Result<GatewayConfig> {
        let file: ConfigFile = serde_json::from_str(raw).context("invalid configuration JSON")?;

        let agent_settings = file.cmd.agent_settings.as_ref();
        let queue_size = agent_settings
            .and_then(|s| s.queue_size)
            .unwrap_or(DEFAULT_QUEUE_SIZE);
        if queue_size == 0 {
            bail!("cmd.agent_settings.queue_size must be at least 1");
        }
        let default_agent_timeout_ms = agent_settings
            .and_then(|s| s.default_timeout_ms)
            .unwrap_or(DEFAULT_AGENT_TIMEOUT_MS);

        let cmd = CmdConfig {
            local_addr: parse_addr(&file.cmd.local_address, "cmd.local_address")?,
            remote_addr: parse_addr(&file.cmd.remote_address, "cmd.remote_address")?,
            response_timeout: Duration::from_millis(file.cmd.response_timeout_ms),
            queue_size,
            default_agent_timeout: Duration::from_millis(default_agent_timeout_ms),
        };

        let mut msc_ids = FxHashSet::default();
        let mut msc_endpoints = Vec::with_capacity(file.msc_agent.len());
        for entry in &file.msc_agent {
            if entry.id.is_empty() {
                bail!("msc_agent entries must have a non-empty id");
            }
            if !msc_ids.insert(entry.id.clone()) {
                bail!("duplicate msc_agent id {:?}", entry.id);
            }
            msc_endpoints.push(MscEndpointConfig {
                id: entry.id.clone(),
                local_addr: parse_addr(
                    &entry.local_address,
                    &format!("msc_agent[{}].local_address", entry.id),
                )?,
                remote_addr: parse_addr(
                    &entry.remote_address,
                    &format!("msc_agent[{}].remote_address", entry.id),
                )?,
                response_timeout: Duration::from_millis(entry.response_timeout_ms),
            });
        }

        let mut stream_ids = FxHashSet::default();
        let mut stream_ports = Vec::with_capacity(file.stream_ports.len());
        for entry in &file.stream_ports {
            if entry.id.is_empty() {
                bail!("stream_ports entries must have a non-empty id");
            }
            if !stream_ids.insert(entry.id.clone()) {
                bail!("duplicate stream_ports id {:?}", entry.id);
            }
            stream_ports.push(StreamPortConfig {
                id: entry.id.clone(),
                local_addr: parse_addr(
                    &entry.local_address,
                    &format!("stream_ports[{}].local_address", entry.id),
                )?,
                remote_addr: parse_addr(
                    &entry.remote_address,
                    &format!("stream_ports[{}].remote_address", entry.id),
                )?,
                format: entry.format.clone(),
            });
        }

        Ok(GatewayConfig {
            cmd,
            msc_endpoints,
            stream_ports,
        })
    }

    /// Configured MSC ids, in declaration order. This order is what a
    /// `target: "all"` command fans out in.
    pub fn msc_ids(&self) -> Vec<String> {
        self.msc_endpoints.iter().map(|m| m.id.clone()).collect()
    }

    fn log(&self) {
        info!(
            "cmd: local={}, remote={}, timeout={:?}, queue_size={}, default_agent_timeout={:?}",
            self.cmd.local_addr,
            self.cmd.remote_addr,
            self.cmd.response_timeout,
            self.cmd.queue_size,
            self.cmd.default_agent_timeout,
        );
        for msc in &self.msc_endpoints {
            info!(
                "msc_agent {}: local={}, remote={}, timeout={:?}",
                msc.id, msc.local_addr, msc.remote_addr, msc.response_timeout
            );
        }
        for stream in &self.stream_ports {
            info!(
                "stream_port {}: local={}, remote={}, format={}",
                stream.id, stream.local_addr, stream.remote_addr, stream.format
            );
        }
    }
}

fn parse_addr(raw: &str, what: &str) -> anyhow::Result<SocketAddr> {
    raw.parse()
        .with_context(|| format!("invalid address {:?} for {}", raw, what))
}
