// Simulation Statistics and Snapshots

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;

use crate::cg_blocks::Block;
use crate::cg_country::Country;
use crate::cg_graph::Graph;
use crate::cg_interface::{BlockId, ComputingPower, Money, NodeId, NodeRole, Protocol, Step};
use crate::cg_node::Node;

// ============================================================================
// Graph Snapshot
// ============================================================================

/// One block as seen in one full node's tree
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct BlockSnapshot {
    pub id: BlockId,
    pub mined_by: Option<NodeId>,
    /// Parent the block was mined on
    pub parent: Option<BlockId>,
    /// Parent it hangs under in this tree (the root for orphans)
    pub linked_parent: Option<BlockId>,
    pub children: Vec<BlockId>,
    pub weight: u64,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct NodeSnapshot {
    pub id: NodeId,
    pub role: NodeRole,
    pub country: Country,
    pub money: Money,
    pub alive: bool,
    pub computing_power: ComputingPower,
    pub mined: u64,
    pub chain_length: u64,
    pub neighbours: Vec<NodeId>,
    /// Head of the node's chain under the snapshot's protocol
    pub tip: Option<Block>,
    /// Full nodes only, in arrival order, root excluded
    pub tree: Option<Vec<BlockSnapshot>>,
}

/// Everything the visualization layer needs to draw the network
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct GraphSnapshot {
    pub step: Step,
    pub protocol: Protocol,
    pub next_id: NodeId,
    pub nodes: Vec<NodeSnapshot>,
}

#[derive(Debug, thiserror::Error)]
pub enum SnapshotError {
    #[error("snapshot serialization failed")]
    Yaml(#[from] serde_yaml::Error),
    #[error("snapshot tree of node {node} is corrupt")]
    Tree {
        node: NodeId,
        #[source]
        source: crate::cg_blocks::TreeError,
    },
}

impl NodeSnapshot {
    pub fn capture(node: &Node, protocol: Protocol) -> Self {
        let tree = node.tree().map(|tree| {
            tree.entries()
                .filter(|entry| !entry.block.is_root())
                .map(|entry| BlockSnapshot {
                    id: entry.block.id,
                    mined_by: entry.block.mined_by,
                    parent: entry.block.parent,
                    linked_parent: entry.linked_parent,
                    children: entry.children.clone(),
                    weight: entry.weight,
                })
                .collect()
        });

        Self {
            id: node.id(),
            role: node.role(),
            country: node.country(),
            money: node.money(),
            alive: node.is_alive(),
            computing_power: node.computing_power(),
            mined: node.mined(),
            chain_length: node.chain_length(),
            neighbours: node.neighbours().iter().copied().collect(),
            tip: node.get_last(protocol).cloned(),
            tree,
        }
    }
}

impl GraphSnapshot {
    pub fn capture(step: Step, graph: &Graph, protocol: Protocol) -> Self {
        Self {
            step,
            protocol,
            next_id: graph.next_id(),
            nodes: graph
                .nodes()
                .map(|node| NodeSnapshot::capture(node, protocol))
                .collect(),
        }
    }

    pub fn to_yaml(&self) -> Result<String, SnapshotError> {
        Ok(serde_yaml::to_string(self)?)
    }

    pub fn from_yaml(yaml: &str) -> Result<Self, SnapshotError> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    /// Rebuild the graph this snapshot was taken from
    pub fn restore(&self) -> Result<Graph, SnapshotError> {
        let mut nodes = Vec::with_capacity(self.nodes.len());
        for snap in &self.nodes {
            let mut node = if snap.role.is_miner() {
                Node::new_miner(snap.id, snap.country, snap.money, snap.computing_power)
            } else {
                Node::new(snap.id, snap.role, snap.country, snap.money)
            };
            node.restore_progress(snap.mined, snap.chain_length, snap.alive);
            for neighbour in &snap.neighbours {
                node.connect(*neighbour);
            }

            // trees are replayed in arrival order, tip holders just get their tip
            let result = if node.tree().is_some() {
                snap.tree.iter().flatten().try_for_each(|b| {
                    node.add_block(Block {
                        id: b.id,
                        mined_by: b.mined_by,
                        parent: b.parent,
                    })
                    .map(|_| ())
                })
            } else {
                match &snap.tip {
                    Some(tip) => node.add_block(tip.clone()).map(|_| ()),
                    None => Ok(()),
                }
            };
            result.map_err(|source| SnapshotError::Tree {
                node: snap.id,
                source,
            })?;

            nodes.push(node);
        }
        Ok(Graph::from_parts(nodes, self.next_id))
    }
}

// ============================================================================
// Miner Roster and Country Aggregation
// ============================================================================

/// Which nodes count as miners for rosters and charts
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum MinerFilter {
    /// Nodes with the miner role
    MinersOnly,
    /// Nodes with the miner role, plus any node holding money
    MinersOrFunded,
}

impl MinerFilter {
    pub fn admits(&self, node: &Node) -> bool {
        match self {
            MinerFilter::MinersOnly => node.role().is_miner(),
            MinerFilter::MinersOrFunded => node.role().is_miner() || node.money() > 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct MinerSnapshot {
    pub id: NodeId,
    pub country: Country,
    pub money: Money,
    pub computing_power: ComputingPower,
    pub mined: u64,
}

pub fn miner_roster(graph: &Graph, filter: MinerFilter) -> Vec<MinerSnapshot> {
    graph
        .nodes()
        .filter(|node| filter.admits(node))
        .map(|node| MinerSnapshot {
            id: node.id(),
            country: node.country(),
            money: node.money(),
            computing_power: node.computing_power(),
            mined: node.mined(),
        })
        .collect()
}

/// One chart sample: a figure per country plus the overall figure
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct CountryFigures {
    pub total: f64,
    pub by_country: BTreeMap<Country, f64>,
}

impl CountryFigures {
    fn zeroed() -> Self {
        Self {
            total: 0.0,
            by_country: Country::ALL.iter().map(|c| (*c, 0.0)).collect(),
        }
    }

    pub fn country(&self, country: Country) -> f64 {
        self.by_country.get(&country).copied().unwrap_or(0.0)
    }
}

/// Number of admitted nodes, per country and in total
pub fn collect_amount_data(graph: &Graph, filter: MinerFilter) -> CountryFigures {
    let mut figures = CountryFigures::zeroed();
    for node in graph.nodes().filter(|n| filter.admits(n)) {
        *figures.by_country.entry(node.country()).or_insert(0.0) += 1.0;
        figures.total += 1.0;
    }
    figures
}

/// Mean money of admitted nodes, per country and in total; 0 for empty buckets
pub fn collect_mean_money(graph: &Graph, filter: MinerFilter) -> CountryFigures {
    let mut sums: BTreeMap<Country, (Money, u64)> = BTreeMap::new();
    let mut total: (Money, u64) = (0, 0);
    for node in graph.nodes().filter(|n| filter.admits(n)) {
        let bucket = sums.entry(node.country()).or_insert((0, 0));
        bucket.0 = bucket.0.saturating_add(node.money());
        bucket.1 += 1;
        total.0 = total.0.saturating_add(node.money());
        total.1 += 1;
    }

    let mean = |(sum, count): (Money, u64)| sum as f64 / count.max(1) as f64;
    let mut figures = CountryFigures::zeroed();
    for (country, bucket) in sums {
        figures.by_country.insert(country, mean(bucket));
    }
    figures.total = mean(total);
    figures
}

/// Chart samples keyed by month index
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct MonthlySeries {
    pub points: BTreeMap<u64, CountryFigures>,
}

impl MonthlySeries {
    pub fn record(&mut self, month: u64, figures: CountryFigures) {
        self.points.insert(month, figures);
    }

    pub fn get(&self, month: u64) -> Option<&CountryFigures> {
        self.points.get(&month)
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Totals in month order
    pub fn totals(&self) -> Vec<f64> {
        self.points.values().map(|f| f.total).collect()
    }
}

// ============================================================================
// Run Counters
// ============================================================================

/// Tallies of what happened during a run, including the non-fatal conditions
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct SimCounters {
    pub events_processed: u64,
    pub initializations: u64,
    pub blocks_mined: u64,
    pub hops_sent: u64,
    pub hops_suppressed: u64,
    pub hops_dropped: u64,
    /// Hops where receiver and sender already agreed
    pub hops_converged: u64,
    pub adoptions: u64,
    pub chain_updates: u64,
    pub empty_population: u64,
    pub payment_passes: u64,
    pub miners_died: u64,
    pub miners_joined: u64,
    pub growth_failures: u64,
}

// ============================================================================
// Snapshot Publication
// ============================================================================

/// Receives the state of the network after every processed event
pub trait SnapshotSink {
    fn publish_graph(&mut self, _step: Step, _graph: &Graph, _protocol: Protocol) {}

    fn publish_miners(&mut self, _step: Step, _miners: &[MinerSnapshot]) {}

    /// Whether `publish_miners` should be fed at all
    fn wants_miners(&self) -> bool {
        true
    }
}

/// Discards everything
pub struct NoOpSnapshots;

impl SnapshotSink for NoOpSnapshots {
    fn wants_miners(&self) -> bool {
        false
    }
}

/// Keeps a snapshot of every step
#[derive(Default)]
pub struct RecordingSink {
    pub graphs: Vec<GraphSnapshot>,
    pub rosters: Vec<(Step, Vec<MinerSnapshot>)>,
}

impl SnapshotSink for RecordingSink {
    fn publish_graph(&mut self, step: Step, graph: &Graph, protocol: Protocol) {
        self.graphs.push(GraphSnapshot::capture(step, graph, protocol));
    }

    fn publish_miners(&mut self, step: Step, miners: &[MinerSnapshot]) {
        self.rosters.push((step, miners.to_vec()));
    }
}

impl<S: SnapshotSink> SnapshotSink for Rc<RefCell<S>> {
    fn publish_graph(&mut self, step: Step, graph: &Graph, protocol: Protocol) {
        self.borrow_mut().publish_graph(step, graph, protocol);
    }

    fn publish_miners(&mut self, step: Step, miners: &[MinerSnapshot]) {
        self.borrow_mut().publish_miners(step, miners);
    }

    fn wants_miners(&self) -> bool {
        self.borrow().wants_miners()
    }
}
