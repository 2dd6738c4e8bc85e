//! The network: every node of a run, keyed by id.
//!
//! Neighbour sets are kept symmetric by going through [Graph::connect] and
//! [Graph::remove_node]. Ids come from a per-graph counter and are never reused.

use std::collections::BTreeMap;

use log::debug;
use rand::seq::index;
use rand::Rng;

use crate::cg_config::{MinerSeed, NodeCounts, TopologyConfig};
use crate::cg_country::Country;
use crate::cg_interface::{ComputingPower, Money, NodeId, NodeRole};
use crate::cg_node::Node;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GraphError {
    #[error("no non-miner node to anchor a new node to")]
    NoEligibleAnchor,
    #[error("node {0} is not in the graph")]
    UnknownNode(NodeId),
    #[error("{seeds} miner seeds given for {miners} miners")]
    MissingMinerSeeds { miners: usize, seeds: usize },
}

#[derive(Debug, Clone, Default)]
pub struct Graph {
    nodes: BTreeMap<NodeId, Node>,
    next_id: NodeId,
}

impl Graph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reassemble a graph from already linked nodes
    pub(crate) fn from_parts(nodes: Vec<Node>, next_id: NodeId) -> Self {
        let nodes: BTreeMap<NodeId, Node> = nodes.into_iter().map(|n| (n.id(), n)).collect();
        let next_id = nodes
            .keys()
            .next_back()
            .map_or(next_id, |last| next_id.max(last + 1));
        Self { nodes, next_id }
    }

    /// Build a connected network with the requested role counts.
    ///
    /// Ids are handed out full, light, listening, then miners. Non-miners form a
    /// random spanning tree plus random extra edges; each miner hangs off
    /// `miner_anchors` distinct non-miners.
    pub fn generate<R: Rng + ?Sized>(
        counts: &NodeCounts,
        seeds: &[MinerSeed],
        topology: &TopologyConfig,
        rng: &mut R,
    ) -> Result<Graph, GraphError> {
        if seeds.len() < counts.miners {
            return Err(GraphError::MissingMinerSeeds {
                miners: counts.miners,
                seeds: seeds.len(),
            });
        }

        let mut graph = Graph::new();

        let mut backbone = Vec::with_capacity(counts.non_miners());
        for (role, count) in [
            (NodeRole::Full, counts.full),
            (NodeRole::Light, counts.light),
            (NodeRole::Listening, counts.listening),
        ] {
            for _ in 0..count {
                let country = Country::random(rng);
                backbone.push(graph.spawn(role, country, 0, 0));
            }
        }

        if counts.miners > 0 && backbone.is_empty() {
            return Err(GraphError::NoEligibleAnchor);
        }

        // random spanning tree keeps the backbone connected
        for i in 1..backbone.len() {
            let j = rng.gen_range(0..i);
            graph.link(backbone[i], backbone[j]);
        }
        if topology.extra_edge_probability > 0.0 {
            for i in 0..backbone.len() {
                for j in (i + 1)..backbone.len() {
                    if rng.gen_bool(topology.extra_edge_probability) {
                        graph.link(backbone[i], backbone[j]);
                    }
                }
            }
        }

        let anchors_per_miner = topology.miner_anchors.clamp(1, backbone.len().max(1));
        for seed in &seeds[..counts.miners] {
            let miner = graph.spawn(NodeRole::Miner, seed.country, seed.money, seed.computing_power);
            for idx in index::sample(rng, backbone.len(), anchors_per_miner) {
                graph.link(miner, backbone[idx]);
            }
        }

        debug!(
            "generated graph: {} nodes ({} miners), {} links",
            graph.len(),
            counts.miners,
            graph.edge_count()
        );

        Ok(graph)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Id the next node will get
    pub fn next_id(&self) -> NodeId {
        self.next_id
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.nodes.contains_key(&id)
    }

    pub fn get(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(&id)
    }

    pub fn get_mut(&mut self, id: NodeId) -> Option<&mut Node> {
        self.nodes.get_mut(&id)
    }

    /// All nodes in id order
    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.values()
    }

    pub fn nodes_mut(&mut self) -> impl Iterator<Item = &mut Node> {
        self.nodes.values_mut()
    }

    pub fn miners(&self) -> impl Iterator<Item = &Node> {
        self.nodes().filter(|n| n.role().is_miner())
    }

    pub fn non_miners(&self) -> impl Iterator<Item = &Node> {
        self.nodes().filter(|n| !n.role().is_miner())
    }

    pub fn full_nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes().filter(|n| n.role() == NodeRole::Full)
    }

    /// Number of undirected links
    pub fn edge_count(&self) -> usize {
        self.nodes().map(|n| n.neighbours().len()).sum::<usize>() / 2
    }

    /// Insert an unconnected node and return its id
    pub fn spawn(
        &mut self,
        role: NodeRole,
        country: Country,
        money: Money,
        computing_power: ComputingPower,
    ) -> NodeId {
        let id = self.next_id;
        self.next_id += 1;

        let node = if role.is_miner() {
            Node::new_miner(id, country, money, computing_power)
        } else {
            Node::new(id, role, country, money)
        };
        self.nodes.insert(id, node);
        id
    }

    /// Add a node linked to one randomly chosen non-miner.
    ///
    /// Fails, without allocating an id, when there is no non-miner to anchor to.
    pub fn add_node<R: Rng + ?Sized>(
        &mut self,
        role: NodeRole,
        country: Country,
        money: Money,
        computing_power: ComputingPower,
        rng: &mut R,
    ) -> Result<NodeId, GraphError> {
        let anchors: Vec<NodeId> = self.non_miners().map(Node::id).collect();
        if anchors.is_empty() {
            return Err(GraphError::NoEligibleAnchor);
        }
        let anchor = anchors[rng.gen_range(0..anchors.len())];

        let id = self.spawn(role, country, money, computing_power);
        self.link(id, anchor);
        Ok(id)
    }

    /// Link two nodes in both directions
    pub fn connect(&mut self, a: NodeId, b: NodeId) -> Result<(), GraphError> {
        for id in [a, b] {
            if !self.contains(id) {
                return Err(GraphError::UnknownNode(id));
            }
        }
        self.link(a, b);
        Ok(())
    }

    fn link(&mut self, a: NodeId, b: NodeId) {
        if a == b {
            return;
        }
        if let Some(node) = self.nodes.get_mut(&a) {
            node.connect(b);
        }
        if let Some(node) = self.nodes.get_mut(&b) {
            node.connect(a);
        }
    }

    /// Detach `id` from all of its neighbours, then drop it
    pub fn remove_node(&mut self, id: NodeId) -> Option<Node> {
        let neighbours: Vec<NodeId> = self.nodes.get(&id)?.neighbours().iter().copied().collect();
        for neighbour in neighbours {
            if let Some(node) = self.nodes.get_mut(&neighbour) {
                node.detach(id);
            }
        }
        debug_assert!(self.nodes().all(|n| n.id() == id || !n.is_connected(id)));

        self.nodes.remove(&id)
    }

    /// Every neighbour reference points at an existing node that links back
    pub fn is_consistent(&self) -> bool {
        self.nodes().all(|node| {
            node.neighbours().iter().all(|other| {
                self.get(*other)
                    .map(|o| o.is_connected(node.id()))
                    .unwrap_or(false)
            })
        })
    }

    /// Whether every node can reach every other node
    pub fn is_connected(&self) -> bool {
        let Some(start) = self.nodes.keys().next().copied() else {
            return true;
        };
        let mut seen = std::collections::BTreeSet::from([start]);
        let mut stack = vec![start];
        while let Some(id) = stack.pop() {
            if let Some(node) = self.get(id) {
                for next in node.neighbours() {
                    if seen.insert(*next) {
                        stack.push(*next);
                    }
                }
            }
        }
        seen.len() == self.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn seeds(n: usize) -> Vec<MinerSeed> {
        (0..n)
            .map(|i| MinerSeed {
                country: Country::Spain,
                money: 100,
                computing_power: i as ComputingPower + 1,
            })
            .collect()
    }

    fn counts(full: usize, miners: usize, light: usize, listening: usize) -> NodeCounts {
        NodeCounts {
            full,
            miners,
            light,
            listening,
        }
    }

    #[test]
    fn test_generate_is_connected_and_consistent() {
        for seed in 0..20u8 {
            let mut rng = StdRng::from_seed([seed; 32]);
            let graph = Graph::generate(
                &counts(3, 6, 2, 2),
                &seeds(6),
                &TopologyConfig::default(),
                &mut rng,
            )
            .unwrap();

            assert_eq!(graph.len(), 13);
            assert!(graph.is_connected());
            assert!(graph.is_consistent());
            assert_eq!(graph.miners().count(), 6);
            assert_eq!(graph.full_nodes().count(), 3);
        }
    }

    #[test]
    fn test_generate_assigns_sequential_ids_and_seeds() {
        let mut rng = StdRng::from_seed([1u8; 32]);
        let graph = Graph::generate(
            &counts(2, 3, 0, 0),
            &seeds(3),
            &TopologyConfig::default(),
            &mut rng,
        )
        .unwrap();

        let ids: Vec<NodeId> = graph.nodes().map(Node::id).collect();
        assert_eq!(ids, vec![0, 1, 2, 3, 4]);
        assert_eq!(graph.next_id(), 5);

        let powers: Vec<ComputingPower> = graph.miners().map(Node::computing_power).collect();
        assert_eq!(powers, vec![1, 2, 3]);

        // miners only hang off non-miners
        for miner in graph.miners() {
            assert!(miner
                .neighbours()
                .iter()
                .all(|n| !graph.get(*n).unwrap().role().is_miner()));
        }
    }

    #[test]
    fn test_generate_rejects_missing_seeds() {
        let mut rng = StdRng::from_seed([1u8; 32]);
        let err = Graph::generate(
            &counts(1, 3, 0, 0),
            &seeds(2),
            &TopologyConfig::default(),
            &mut rng,
        )
        .unwrap_err();
        assert_eq!(err, GraphError::MissingMinerSeeds { miners: 3, seeds: 2 });
    }

    #[test]
    fn test_add_node_anchors_to_non_miner() {
        let mut rng = StdRng::from_seed([2u8; 32]);
        let mut graph = Graph::new();
        let full = graph.spawn(NodeRole::Full, Country::Spain, 0, 0);
        let old_miner = graph.spawn(NodeRole::Miner, Country::Spain, 10, 1);
        graph.connect(full, old_miner).unwrap();

        for _ in 0..10 {
            let id = graph
                .add_node(NodeRole::Miner, Country::Poland, 50, 2, &mut rng)
                .unwrap();
            let node = graph.get(id).unwrap();
            assert_eq!(node.neighbours().len(), 1);
            assert!(node.is_connected(full));
            assert!(graph.get(full).unwrap().is_connected(id));
        }
        assert!(graph.is_consistent());
    }

    #[test]
    fn test_add_node_without_anchor_fails() {
        let mut rng = StdRng::from_seed([2u8; 32]);
        let mut graph = Graph::new();
        graph.spawn(NodeRole::Miner, Country::Spain, 10, 1);

        let err = graph
            .add_node(NodeRole::Miner, Country::Spain, 10, 1, &mut rng)
            .unwrap_err();
        assert_eq!(err, GraphError::NoEligibleAnchor);
        assert_eq!(graph.len(), 1);
        assert_eq!(graph.next_id(), 1);
    }

    #[test]
    fn test_remove_node_detaches_everywhere() {
        let mut graph = Graph::new();
        let a = graph.spawn(NodeRole::Full, Country::Spain, 0, 0);
        let b = graph.spawn(NodeRole::Light, Country::Spain, 0, 0);
        let m = graph.spawn(NodeRole::Miner, Country::Spain, 0, 1);
        graph.connect(a, b).unwrap();
        graph.connect(a, m).unwrap();
        graph.connect(b, m).unwrap();

        let removed = graph.remove_node(m).unwrap();
        assert_eq!(removed.id(), m);
        assert!(!graph.contains(m));
        assert!(graph.nodes().all(|n| !n.is_connected(m)));
        assert!(graph.is_consistent());
        assert!(graph.remove_node(m).is_none());

        // ids are not reused
        let next = graph.spawn(NodeRole::Miner, Country::Spain, 0, 1);
        assert_eq!(next, 3);
    }

    #[test]
    fn test_connect_unknown_node() {
        let mut graph = Graph::new();
        let a = graph.spawn(NodeRole::Full, Country::Spain, 0, 0);
        assert_eq!(graph.connect(a, 9), Err(GraphError::UnknownNode(9)));
    }
}
