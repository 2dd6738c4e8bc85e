// Simulation Configuration

use std::fs;
use std::path::Path;

use crate::cg_country::Country;
use crate::cg_interface::{ComputingPower, Money, Protocol, Tick};

/// Main simulation configuration
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct SimConfig {
    /// Random seed for reproducibility; drawn from thread_rng when absent
    pub seed: Option<[u8; 32]>,
    /// Active fork-choice rule
    pub protocol: Protocol,
    pub nodes: NodeCounts,
    /// One entry per initial miner, in id order
    pub initial_miners: Vec<MinerSeed>,
    pub topology: TopologyConfig,
    pub economy: EconomyConfig,
    pub schedule: ScheduleConfig,
    pub growth: GrowthConfig,
    pub gossip: GossipConfig,
}

/// How many nodes of each role the initial graph gets
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct NodeCounts {
    pub full: usize,
    pub miners: usize,
    pub light: usize,
    pub listening: usize,
}

impl NodeCounts {
    pub fn non_miners(&self) -> usize {
        self.full + self.light + self.listening
    }

    pub fn total(&self) -> usize {
        self.non_miners() + self.miners
    }
}

/// Starting state of one initial miner
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct MinerSeed {
    pub country: Country,
    pub money: Money,
    pub computing_power: ComputingPower,
}

/// Initial topology shape
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct TopologyConfig {
    /// Chance of an extra link between any two non-miners (0.0 to 1.0)
    pub extra_edge_probability: f64,
    /// Non-miners each initial miner links to
    pub miner_anchors: usize,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct EconomyConfig {
    /// Paid to the miner of every block
    pub block_reward: Money,
    /// Base fee charged to every miner on each payment tick, before the
    /// country price is applied
    pub payment_amount: Money,
}

/// Periods of the drivers in [crate::cg_runner::SimRunner], in ticks
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct ScheduleConfig {
    /// Total number of ticks to run
    pub ticks: Tick,
    /// Ticks per month; charts are sampled once a month
    pub ticks_per_month: Tick,
    pub block_interval: Tick,
    pub payment_interval: Tick,
    pub update_interval: Tick,
}

/// Miner growth process
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct GrowthConfig {
    pub enabled: bool,
    /// New miners per month at speed 1
    pub miners_per_month: u64,
    pub simulation_speed: u64,
    /// Inclusive bounds for a new miner's money
    pub money_range: (Money, Money),
    /// Inclusive bounds for a new miner's computing power
    pub power_range: (ComputingPower, ComputingPower),
}

impl GrowthConfig {
    /// Ticks between two new miners. None when growth is effectively off.
    pub fn period(&self, ticks_per_month: Tick) -> Option<Tick> {
        let per_month = self.miners_per_month.checked_mul(self.simulation_speed)?;
        if !self.enabled || per_month == 0 {
            return None;
        }
        Some((ticks_per_month / per_month).max(1))
    }
}

/// Gossip flood limits
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct GossipConfig {
    /// Steps a used link stays hot
    pub edge_ttl: u64,
    /// Uses of one directed link allowed while it is hot
    pub max_edge_uses: u32,
    /// Events processed per tick before the rest waits for the next tick
    pub max_events_per_tick: usize,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("configuration has no nodes")]
    NoNodes,
    #[error("{0} miners requested but no full, light or listening node to anchor them")]
    NoAnchorForMiners(usize),
    #[error("{seeds} miner seeds given for {miners} miners")]
    MissingMinerSeeds { miners: usize, seeds: usize },
    #[error("miner seed {index} has zero computing power")]
    ZeroComputingPower { index: usize },
    #[error("{0} must be greater than 0")]
    ZeroValue(&'static str),
    #[error("{name} = {value} is not in the range 0.0..=1.0")]
    ProbabilityOutOfRange { name: &'static str, value: f64 },
    #[error("{0} range is empty")]
    EmptyRange(&'static str),
    #[error("failed to read configuration")]
    Io(#[from] std::io::Error),
    #[error("failed to parse configuration")]
    Parse(#[from] serde_yaml::Error),
}

impl SimConfig {
    pub fn from_yaml_str(yaml: &str) -> Result<Self, ConfigError> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        Self::from_yaml_str(&content)
    }

    pub fn to_yaml(&self) -> Result<String, ConfigError> {
        Ok(serde_yaml::to_string(self)?)
    }

    /// Reject configurations no graph can be built from
    pub fn validate(&self) -> Result<(), ConfigError> {
        use ConfigError::*;

        if self.nodes.total() == 0 {
            return Err(NoNodes);
        }
        if self.nodes.miners > 0 && self.nodes.non_miners() == 0 {
            return Err(NoAnchorForMiners(self.nodes.miners));
        }
        if self.initial_miners.len() < self.nodes.miners {
            return Err(MissingMinerSeeds {
                miners: self.nodes.miners,
                seeds: self.initial_miners.len(),
            });
        }
        if let Some(index) = self.initial_miners[..self.nodes.miners]
            .iter()
            .position(|seed| seed.computing_power == 0)
        {
            return Err(ZeroComputingPower { index });
        }

        let p = self.topology.extra_edge_probability;
        if !(0.0..=1.0).contains(&p) {
            return Err(ProbabilityOutOfRange {
                name: "topology.extra_edge_probability",
                value: p,
            });
        }

        for (name, value) in [
            ("schedule.ticks_per_month", self.schedule.ticks_per_month),
            ("schedule.block_interval", self.schedule.block_interval),
            ("schedule.payment_interval", self.schedule.payment_interval),
            ("schedule.update_interval", self.schedule.update_interval),
            ("gossip.edge_ttl", self.gossip.edge_ttl),
        ] {
            if value == 0 {
                return Err(ZeroValue(name));
            }
        }
        if self.gossip.max_edge_uses == 0 {
            return Err(ZeroValue("gossip.max_edge_uses"));
        }
        if self.gossip.max_events_per_tick == 0 {
            return Err(ZeroValue("gossip.max_events_per_tick"));
        }

        if self.growth.money_range.0 > self.growth.money_range.1 {
            return Err(EmptyRange("growth.money_range"));
        }
        let (low, high) = self.growth.power_range;
        if low == 0 || low > high {
            return Err(EmptyRange("growth.power_range"));
        }

        Ok(())
    }
}

// ============================================================================
// Default Configurations
// ============================================================================

impl Default for SimConfig {
    fn default() -> Self {
        let nodes = NodeCounts::default();
        let initial_miners = (0..nodes.miners)
            .map(|i| MinerSeed {
                country: Country::ALL[i % Country::ALL.len()],
                money: 1000,
                computing_power: 1 + (i as ComputingPower % 5),
            })
            .collect();

        Self {
            seed: None,
            protocol: Protocol::default(),
            nodes,
            initial_miners,
            topology: TopologyConfig::default(),
            economy: EconomyConfig::default(),
            schedule: ScheduleConfig::default(),
            growth: GrowthConfig::default(),
            gossip: GossipConfig::default(),
        }
    }
}

impl Default for NodeCounts {
    fn default() -> Self {
        Self {
            full: 3,
            miners: 5,
            light: 2,
            listening: 2,
        }
    }
}

impl Default for TopologyConfig {
    fn default() -> Self {
        Self {
            extra_edge_probability: 0.2,
            miner_anchors: 1,
        }
    }
}

impl Default for EconomyConfig {
    fn default() -> Self {
        Self {
            block_reward: 10,
            payment_amount: 5,
        }
    }
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            ticks: 1200,
            ticks_per_month: 100,
            block_interval: 1,
            payment_interval: 10,
            update_interval: 25,
        }
    }
}

impl Default for GrowthConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            miners_per_month: 2,
            simulation_speed: 1,
            money_range: (50, 150),
            power_range: (1, 10),
        }
    }
}

impl Default for GossipConfig {
    fn default() -> Self {
        Self {
            edge_ttl: 16,
            max_edge_uses: 4,
            max_events_per_tick: 10_000,
        }
    }
}
