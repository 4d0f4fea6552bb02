use anyhow::{Context, Result};
use doin_types::{Domain, DoinParams, PluginHandles};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    pub node: NodeSettings,
    #[serde(default)]
    pub consensus: ConsensusSettings,
    #[serde(default)]
    pub network: NetworkSettings,
    #[serde(default)]
    pub api: ApiSettings,
    #[serde(default)]
    pub logging: LoggingSettings,
    #[serde(default)]
    pub domains: Vec<DomainEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeSettings {
    pub data_dir: PathBuf,
    #[serde(default)]
    pub key_path: Option<PathBuf>,
    pub name: String,
    /// Roles this node serves: "optimizer", "evaluator".
    #[serde(default)]
    pub roles: Vec<String>,
}

/// The recognized consensus options, mirrored onto `DoinParams`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsensusSettings {
    pub target_block_time_seconds: f64,
    pub initial_threshold: f64,
    pub confirmation_depth: u64,
    pub quorum_min_evaluators: usize,
    pub quorum_max_evaluators: usize,
    pub quorum_fraction: f64,
    pub quorum_tolerance: f64,
    pub commit_reveal_window_blocks: u64,
    pub voting_timeout_blocks: u64,
    pub max_param_bytes: usize,
    pub max_training_seconds: u64,
    pub max_memory_mb: u64,
    pub reputation_half_life_seconds: f64,
    pub min_reputation_for_consensus: f64,
    pub external_anchor_interval_blocks: u64,
    pub epoch_length_blocks: u64,
    pub claim_timeout_seconds: u64,
    pub max_pending_commits_per_peer: usize,
}

impl Default for ConsensusSettings {
    fn default() -> Self {
        let params = DoinParams::default();
        Self {
            target_block_time_seconds: params.target_block_time_seconds,
            initial_threshold: params.initial_threshold,
            confirmation_depth: params.confirmation_depth,
            quorum_min_evaluators: params.quorum_min_evaluators,
            quorum_max_evaluators: params.quorum_max_evaluators,
            quorum_fraction: params.quorum_fraction,
            quorum_tolerance: params.quorum_tolerance,
            commit_reveal_window_blocks: params.commit_reveal_window_blocks,
            voting_timeout_blocks: params.voting_timeout_blocks,
            max_param_bytes: params.max_param_bytes,
            max_training_seconds: params.max_training_seconds,
            max_memory_mb: params.max_memory_mb,
            reputation_half_life_seconds: params.reputation_half_life_seconds,
            min_reputation_for_consensus: params.min_reputation_for_consensus,
            external_anchor_interval_blocks: params.external_anchor_interval_blocks,
            epoch_length_blocks: params.epoch_length_blocks,
            claim_timeout_seconds: params.claim_timeout_seconds,
            max_pending_commits_per_peer: params.max_pending_commits_per_peer,
        }
    }
}

impl From<&ConsensusSettings> for DoinParams {
    fn from(settings: &ConsensusSettings) -> Self {
        DoinParams {
            target_block_time_seconds: settings.target_block_time_seconds,
            initial_threshold: settings.initial_threshold,
            confirmation_depth: settings.confirmation_depth,
            quorum_min_evaluators: settings.quorum_min_evaluators,
            quorum_max_evaluators: settings.quorum_max_evaluators,
            quorum_fraction: settings.quorum_fraction,
            quorum_tolerance: settings.quorum_tolerance,
            commit_reveal_window_blocks: settings.commit_reveal_window_blocks,
            voting_timeout_blocks: settings.voting_timeout_blocks,
            max_param_bytes: settings.max_param_bytes,
            max_training_seconds: settings.max_training_seconds,
            max_memory_mb: settings.max_memory_mb,
            reputation_half_life_seconds: settings.reputation_half_life_seconds,
            min_reputation_for_consensus: settings.min_reputation_for_consensus,
            external_anchor_interval_blocks: settings.external_anchor_interval_blocks,
            epoch_length_blocks: settings.epoch_length_blocks,
            claim_timeout_seconds: settings.claim_timeout_seconds,
            max_pending_commits_per_peer: settings.max_pending_commits_per_peer,
            ..DoinParams::default()
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkSettings {
    pub listen_addr: String,
    pub bootstrap_peers: Vec<String>,
    pub max_peers: usize,
    pub flood_ttl: u8,
}

impl Default for NetworkSettings {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:9400".to_string(),
            bootstrap_peers: Vec::new(),
            max_peers: 64,
            flood_ttl: 5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiSettings {
    pub enabled: bool,
    pub host: String,
    pub port: u16,
}

impl Default for ApiSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            host: "127.0.0.1".to_string(),
            port: 9480,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    pub level: String,
    /// "pretty" or "json".
    pub format: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DomainEntry {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub performance_metric: String,
    pub higher_is_better: bool,
    #[serde(default = "default_weight")]
    pub weight: f64,
    #[serde(default = "default_tolerance")]
    pub tolerance: f64,
    #[serde(default)]
    pub dimension_bounds: Option<(usize, usize)>,
    pub plugins: PluginHandles,
}

fn default_weight() -> f64 {
    1.0
}

fn default_tolerance() -> f64 {
    0.15
}

impl From<&DomainEntry> for Domain {
    fn from(entry: &DomainEntry) -> Self {
        Domain {
            id: entry.id.clone(),
            name: entry.name.clone(),
            description: entry.description.clone(),
            performance_metric: entry.performance_metric.clone(),
            higher_is_better: entry.higher_is_better,
            weight: entry.weight,
            tolerance: entry.tolerance,
            dimension_bounds: entry.dimension_bounds,
            plugins: entry.plugins.clone(),
        }
    }
}

impl NodeConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("cannot read config file {}", path.display()))?;
        let mut config: NodeConfig =
            toml::from_str(&raw).with_context(|| format!("invalid config {}", path.display()))?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Environment overrides for deployment knobs.
    fn apply_env_overrides(&mut self) {
        if let Ok(port) = env::var("DOIN_API_PORT") {
            if let Ok(port) = port.parse() {
                self.api.port = port;
            }
        }
        if let Ok(addr) = env::var("DOIN_LISTEN_ADDR") {
            self.network.listen_addr = addr;
        }
        if let Ok(level) = env::var("DOIN_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Ok(dir) = env::var("DOIN_DATA_DIR") {
            self.node.data_dir = PathBuf::from(dir);
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.node.name.is_empty() {
            anyhow::bail!("node.name must not be empty");
        }
        if self.consensus.quorum_min_evaluators == 0 {
            anyhow::bail!("consensus.quorum_min_evaluators must be at least 1");
        }
        if self.consensus.quorum_min_evaluators > self.consensus.quorum_max_evaluators {
            anyhow::bail!("consensus.quorum_min_evaluators exceeds quorum_max_evaluators");
        }
        if !(0.0..=1.0).contains(&self.consensus.quorum_fraction) {
            anyhow::bail!("consensus.quorum_fraction must be in [0, 1]");
        }
        if self.consensus.quorum_tolerance <= 0.0 {
            anyhow::bail!("consensus.quorum_tolerance must be positive");
        }
        if self.consensus.initial_threshold <= 0.0 {
            anyhow::bail!("consensus.initial_threshold must be positive");
        }
        for domain in &self.domains {
            if domain.weight <= 0.0 {
                anyhow::bail!("domain {} has non-positive weight", domain.id);
            }
        }
        Ok(())
    }

    pub fn params(&self) -> DoinParams {
        (&self.consensus).into()
    }

    pub fn domain_list(&self) -> Vec<Domain> {
        self.domains.iter().map(Domain::from).collect()
    }
}
