//! # cgRust - Chain Gossip Simulator
//!
//! A deterministic simulator for block propagation and fork choice in a
//! peer-to-peer blockchain network. Miners, full nodes and light/listening
//! relays mine and gossip blocks over a changing topology, under an economy
//! that evicts miners who can no longer pay, with a pluggable fork-choice rule
//! (longest chain or GHOST).
//!
//! ## Core Components
//!
//! - **Simulation**: event coordinator processing one `SimulationEvent` per step
//! - **SimRunner**: periodic driver for mining, chain updates, payments, growth and charts
//! - **Graph / Node**: network model with per-node chain views
//! - **BlockTree**: arena of blocks owned by a full node, with the fork-choice rules
//!
//! ```no_run
//! use cg_rust::{SimConfig, SimRunner};
//!
//! let config = SimConfig {
//!     seed: Some([7u8; 32]),
//!     ..SimConfig::default()
//! };
//! let result = SimRunner::new(config)?.run()?;
//! result.log_summary();
//! # Ok::<(), cg_rust::SimError>(())
//! ```
//!
//! Single events can be driven by hand through [Simulation::submit] and
//! [Simulation::step], which is how replays and tests use the coordinator.

// Data model
pub mod cg_blocks;
pub mod cg_country;
pub mod cg_graph;
pub mod cg_interface;
pub mod cg_node;

// Coordination
pub mod cg_config;
pub mod cg_edges;
pub mod cg_runner;
pub mod cg_simulation;
pub mod cg_stats;

// Re-export commonly used types
pub use cg_blocks::{Block, BlockTree, TreeError};
pub use cg_config::{ConfigError, SimConfig};
pub use cg_country::Country;
pub use cg_graph::{Graph, GraphError};
pub use cg_interface::{
    BlockId, Event, EventSink, Hop, Money, NoOpSink, NodeId, NodeRole, Protocol,
    SimulationEvent, Step, Tick, ROOT_BLOCK_ID,
};
pub use cg_node::Node;
pub use cg_runner::{PeriodicTrigger, RunResult, SimRunner};
pub use cg_simulation::{SimError, Simulation, StepGate};
pub use cg_stats::{
    GraphSnapshot, MinerFilter, MinerSnapshot, RecordingSink, SimCounters, SnapshotSink,
};
