//! Event-driven core of the simulator.
//!
//! [Simulation] owns everything a run touches: configuration, the random
//! generator, the graph, the pending event queue and the sinks. Events are
//! processed strictly one at a time through a [StepGate]; gossip fan-out only
//! enqueues further events, it never recurses.

use std::collections::VecDeque;

use log::{debug, info};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::cg_blocks::{Block, TreeError};
use crate::cg_config::{ConfigError, SimConfig};
use crate::cg_country::Country;
use crate::cg_edges::EdgeTtlTracker;
use crate::cg_graph::{Graph, GraphError};
use crate::cg_interface::{
    BlockId, ComputingPower, DropReason, Event, EventSink, Hop, Money, NodeId, NodeRole, NoOpSink,
    Population, Protocol, SimulationEvent, Step, ROOT_BLOCK_ID,
};
use crate::cg_node::{ChainView, Node};
use crate::cg_stats::{
    collect_amount_data, collect_mean_money, miner_roster, CountryFigures, MinerFilter,
    MinerSnapshot, NoOpSnapshots, SimCounters, SnapshotSink,
};

#[derive(Debug, thiserror::Error)]
pub enum SimError {
    #[error("invalid configuration")]
    Config(#[from] ConfigError),
    #[error("graph error")]
    Graph(#[from] GraphError),
    #[error("block tree of node {node} is corrupt")]
    Tree {
        node: NodeId,
        #[source]
        source: TreeError,
    },
    #[error("step {step} admitted before the previous step was released")]
    GateClosed { step: Step },
}

// ============================================================================
// Step Gate
// ============================================================================

/// Pairs each event with one step. A step is admitted only after the previous
/// one was released, which happens once all mutation and publication for it
/// are done.
#[derive(Debug, Clone)]
pub struct StepGate {
    step: Step,
    open: bool,
}

impl StepGate {
    pub fn new() -> Self {
        Self { step: 0, open: true }
    }

    pub fn admit(&mut self) -> Result<Step, SimError> {
        if !self.open {
            return Err(SimError::GateClosed { step: self.step });
        }
        self.open = false;
        Ok(self.step)
    }

    pub fn release(&mut self) {
        if !self.open {
            self.open = true;
            self.step += 1;
        }
    }

    /// Step the next admitted event gets
    pub fn step(&self) -> Step {
        self.step
    }

    pub fn is_open(&self) -> bool {
        self.open
    }
}

impl Default for StepGate {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Simulation Coordinator
// ============================================================================

pub struct Simulation {
    config: SimConfig,
    seed: [u8; 32],
    rng: StdRng,
    graph: Graph,
    next_block_id: BlockId,
    queue: VecDeque<SimulationEvent>,
    gate: StepGate,
    edges: EdgeTtlTracker,
    counters: SimCounters,
    roster_filter: MinerFilter,
    event_sink: Box<dyn EventSink>,
    snapshots: Box<dyn SnapshotSink>,
}

impl Simulation {
    /// Create a coordinator with no-op sinks. The graph stays empty until an
    /// `Initialization` event is processed.
    pub fn new(config: SimConfig) -> Result<Self, SimError> {
        Self::new_with_sinks(config, Box::new(NoOpSink), Box::new(NoOpSnapshots))
    }

    pub fn new_with_sinks(
        config: SimConfig,
        event_sink: Box<dyn EventSink>,
        snapshots: Box<dyn SnapshotSink>,
    ) -> Result<Self, SimError> {
        config.validate()?;

        let seed = config.seed.unwrap_or_else(|| {
            let mut seed = [0u8; 32];
            rand::thread_rng().fill(&mut seed);
            seed
        });

        Ok(Self {
            edges: EdgeTtlTracker::new(config.gossip.edge_ttl, config.gossip.max_edge_uses),
            config,
            seed,
            rng: StdRng::from_seed(seed),
            graph: Graph::new(),
            next_block_id: 0,
            queue: VecDeque::new(),
            gate: StepGate::new(),
            counters: SimCounters::default(),
            roster_filter: MinerFilter::MinersOnly,
            event_sink,
            snapshots,
        })
    }

    /// Start from a hand-built graph instead of a generated one
    pub fn with_graph(config: SimConfig, graph: Graph) -> Result<Self, SimError> {
        let mut sim = Self::new(config)?;
        sim.next_block_id = next_free_block_id(&graph);
        sim.graph = graph;
        Ok(sim)
    }

    pub fn set_event_sink(&mut self, sink: Box<dyn EventSink>) {
        self.event_sink = sink;
    }

    pub fn set_snapshot_sink(&mut self, sink: Box<dyn SnapshotSink>) {
        self.snapshots = sink;
    }

    /// Filter used for the roster published after every step
    pub fn set_roster_filter(&mut self, filter: MinerFilter) {
        self.roster_filter = filter;
    }

    pub fn set_protocol(&mut self, protocol: Protocol) {
        self.config.protocol = protocol;
    }

    pub fn protocol(&self) -> Protocol {
        self.config.protocol
    }

    pub fn config(&self) -> &SimConfig {
        &self.config
    }

    /// Seed the random generator was created from
    pub fn seed(&self) -> [u8; 32] {
        self.seed
    }

    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    pub fn counters(&self) -> &SimCounters {
        &self.counters
    }

    pub fn edges(&self) -> &EdgeTtlTracker {
        &self.edges
    }

    /// Step the next processed event gets
    pub fn current_step(&self) -> Step {
        self.gate.step()
    }

    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    pub fn submit(&mut self, event: SimulationEvent) {
        self.queue.push_back(event);
    }

    /// Process the next queued event. Returns false when the queue was empty.
    pub fn step(&mut self) -> Result<bool, SimError> {
        let Some(event) = self.queue.pop_front() else {
            return Ok(false);
        };

        // a fatal error leaves the gate closed
        let step = self.gate.admit()?;
        self.handle(step, event)?;
        self.publish(step);
        self.edges.deplete();
        self.counters.events_processed += 1;
        self.gate.release();
        Ok(true)
    }

    /// Process events until the queue is empty or `max_steps` were processed.
    /// Returns the number processed.
    pub fn run_until_idle(&mut self, max_steps: usize) -> Result<usize, SimError> {
        let mut processed = 0;
        while processed < max_steps && self.step()? {
            processed += 1;
        }
        Ok(processed)
    }

    fn handle(&mut self, step: Step, event: SimulationEvent) -> Result<(), SimError> {
        match event {
            SimulationEvent::Initialization => self.initialize(),
            SimulationEvent::BlockMined => self.mine(step),
            SimulationEvent::BlockReceived(hop) => self.receive(step, hop),
            SimulationEvent::BlockchainUpdate => {
                self.chain_update(step);
                Ok(())
            }
        }
    }

    fn publish(&mut self, step: Step) {
        let protocol = self.config.protocol;
        self.snapshots.publish_graph(step, &self.graph, protocol);
        if self.snapshots.wants_miners() {
            let roster = miner_roster(&self.graph, self.roster_filter);
            self.snapshots.publish_miners(step, &roster);
        }
    }

    // ------------------------------------------------------------------------
    // event handlers
    // ------------------------------------------------------------------------

    fn initialize(&mut self) -> Result<(), SimError> {
        self.graph = Graph::generate(
            &self.config.nodes,
            &self.config.initial_miners,
            &self.config.topology,
            &mut self.rng,
        )?;
        self.next_block_id = 0;
        self.edges.clear();
        // hops of the old graph would address the new one
        self.queue
            .retain(|event| !matches!(event, SimulationEvent::BlockReceived(_)));
        self.counters.initializations += 1;

        info!(
            "initialized graph: {} nodes, {} miners, {} links, protocol {:?}",
            self.graph.len(),
            self.graph.miners().count(),
            self.graph.edge_count(),
            self.config.protocol
        );
        Ok(())
    }

    /// Weighted lottery: one ticket per unit of computing power
    fn draw_miner(&mut self) -> Option<NodeId> {
        let candidates: Vec<(NodeId, ComputingPower)> = self
            .graph
            .miners()
            .filter(|m| m.is_alive() && m.computing_power() > 0)
            .map(|m| (m.id(), m.computing_power()))
            .collect();
        let tickets: ComputingPower = candidates.iter().map(|(_, power)| power).sum();
        if tickets == 0 {
            return None;
        }

        let mut ticket = self.rng.gen_range(0..tickets);
        candidates.into_iter().find_map(|(id, power)| {
            if ticket < power {
                Some(id)
            } else {
                ticket -= power;
                None
            }
        })
    }

    fn mine(&mut self, step: Step) -> Result<(), SimError> {
        let Some(winner) = self.draw_miner() else {
            self.empty_population(step, Population::LiveMiners);
            return Ok(());
        };

        let protocol = self.config.protocol;
        let reward = self.config.economy.block_reward;
        let block_id = self.next_block_id;
        self.next_block_id += 1;

        let Some(node) = self.graph.get_mut(winner) else {
            return Ok(());
        };
        let parent = node.last_id(protocol).unwrap_or(ROOT_BLOCK_ID);
        node.mine_block(Block::new(block_id, winner, parent))
            .map_err(|source| SimError::Tree {
                node: winner,
                source,
            })?;
        node.receive_reward(reward);

        self.counters.blocks_mined += 1;
        debug!("step {step}: node {winner} mined block {block_id} on {parent}");
        self.event_sink.log(
            step,
            Event::BlockMined {
                block_id,
                miner: winner,
                parent,
            },
        );

        self.flood(step, winner, None);
        Ok(())
    }

    fn receive(&mut self, step: Step, hop: Hop) -> Result<(), SimError> {
        let reason = if !self.graph.contains(hop.sender) {
            Some(DropReason::UnknownSender)
        } else if !self.graph.contains(hop.receiver) {
            Some(DropReason::UnknownReceiver)
        } else {
            None
        };
        if let Some(reason) = reason {
            self.counters.hops_dropped += 1;
            debug!("step {step}: dropped hop {hop:?} ({reason:?})");
            self.event_sink.log(step, Event::HopDropped { hop, reason });
            return Ok(());
        }

        let protocol = self.config.protocol;
        let (offered, sender_head) = match self.graph.get(hop.sender) {
            Some(sender) => (sender.offer(protocol), sender.last_id(protocol)),
            None => return Ok(()),
        };
        let Some(receiver) = self.graph.get_mut(hop.receiver) else {
            return Ok(());
        };
        let before = receiver.last_id(protocol);
        if sender_head.is_none() || sender_head == before {
            self.counters.hops_converged += 1;
            return Ok(());
        }

        for block in offered {
            receiver
                .add_block(block)
                .map_err(|source| SimError::Tree {
                    node: hop.receiver,
                    source,
                })?;
        }
        let after = receiver.last_id(protocol);
        if after == before {
            // learned a branch it does not prefer
            self.counters.hops_converged += 1;
            return Ok(());
        }

        self.counters.adoptions += 1;
        if let Some(block_id) = after {
            debug!(
                "step {step}: node {} adopted block {block_id} from {}",
                hop.receiver, hop.sender
            );
            self.event_sink.log(
                step,
                Event::BlockAdopted {
                    block_id,
                    node: hop.receiver,
                    from: hop.sender,
                },
            );
        }
        self.flood(step, hop.receiver, Some(hop.sender));
        Ok(())
    }

    fn chain_update(&mut self, step: Step) {
        // largest tree wins, first in id order on ties
        let mut canonical: Option<&Node> = None;
        for node in self.graph.full_nodes() {
            if canonical.map_or(true, |best| node.tree_size() > best.tree_size()) {
                canonical = Some(node);
            }
        }
        let Some(canonical) = canonical else {
            self.empty_population(step, Population::FullNodes);
            return;
        };

        let sender = canonical.id();
        debug!(
            "step {step}: full node {sender} pushes its tree of {} blocks",
            canonical.tree_size()
        );
        let neighbours: Vec<NodeId> = canonical.neighbours().iter().copied().collect();
        for receiver in neighbours {
            // explicit updates are not subject to link limits
            self.queue
                .push_back(SimulationEvent::BlockReceived(Hop::new(sender, receiver)));
            self.counters.hops_sent += 1;
        }
        self.counters.chain_updates += 1;
    }

    /// Queue a hop from `sender` to each neighbour except `except`
    fn flood(&mut self, step: Step, sender: NodeId, except: Option<NodeId>) {
        let Some(node) = self.graph.get(sender) else {
            return;
        };
        let targets: Vec<NodeId> = node
            .neighbours()
            .iter()
            .copied()
            .filter(|n| Some(*n) != except)
            .collect();

        for receiver in targets {
            let hop = Hop::new(sender, receiver);
            if self.edges.record(hop) {
                self.queue.push_back(SimulationEvent::BlockReceived(hop));
                self.counters.hops_sent += 1;
            } else {
                self.counters.hops_suppressed += 1;
                self.event_sink
                    .log(step, Event::HopSuppressed { sender, receiver });
            }
        }
    }

    fn empty_population(&mut self, step: Step, population: Population) {
        self.counters.empty_population += 1;
        debug!("step {step}: nothing to do, {population:?} is empty");
        self.event_sink
            .log(step, Event::EmptyPopulation { population });
    }

    // ------------------------------------------------------------------------
    // periodic passes
    // ------------------------------------------------------------------------

    /// Charge every miner and evict, in one batch, those that could not pay
    pub fn settle_payments(&mut self) -> Vec<NodeId> {
        let step = self.gate.step();
        let amount = self.config.economy.payment_amount;
        self.counters.payment_passes += 1;

        let mut broke = Vec::new();
        for node in self.graph.nodes_mut() {
            if node.role().is_miner() && !node.settle_payment(amount) {
                broke.push((node.id(), node.money()));
            }
        }

        let mut evicted = Vec::with_capacity(broke.len());
        for (id, money) in broke {
            if self.graph.remove_node(id).is_none() {
                continue;
            }
            self.edges.forget_node(id);
            self.counters.miners_died += 1;
            info!("miner {id} could not pay and left the network with {money}");
            self.event_sink.log(step, Event::MinerDied { node: id, money });
            evicted.push(id);
        }
        evicted
    }

    /// Add a miner with random country, money and power from the growth bounds
    pub fn add_random_miner(&mut self) -> Result<NodeId, GraphError> {
        let (money_low, money_high) = self.config.growth.money_range;
        let (power_low, power_high) = self.config.growth.power_range;
        let country = Country::random(&mut self.rng);
        let money = self.rng.gen_range(money_low..=money_high);
        let power = self.rng.gen_range(power_low..=power_high);
        self.add_miner_with(country, money, power)
    }

    /// Add a miner anchored to a random non-miner
    pub fn add_miner_with(
        &mut self,
        country: Country,
        money: Money,
        computing_power: ComputingPower,
    ) -> Result<NodeId, GraphError> {
        let step = self.gate.step();
        let id = match self.graph.add_node(
            NodeRole::Miner,
            country,
            money,
            computing_power,
            &mut self.rng,
        ) {
            Ok(id) => id,
            Err(err) => {
                self.counters.growth_failures += 1;
                self.event_sink.log(
                    step,
                    Event::EmptyPopulation {
                        population: Population::Anchors,
                    },
                );
                return Err(err);
            }
        };

        let anchor = self
            .graph
            .get(id)
            .and_then(|node| node.neighbours().first().copied())
            .unwrap_or(id);
        self.counters.miners_joined += 1;
        info!("miner {id} joined from {country:?} with {money} and power {computing_power}");
        self.event_sink
            .log(step, Event::MinerJoined { node: id, anchor });
        Ok(id)
    }

    // ------------------------------------------------------------------------
    // queries
    // ------------------------------------------------------------------------

    pub fn miners(&self, filter: MinerFilter) -> Vec<MinerSnapshot> {
        miner_roster(&self.graph, filter)
    }

    pub fn collect_amount_data(&self, filter: MinerFilter) -> CountryFigures {
        collect_amount_data(&self.graph, filter)
    }

    pub fn collect_mean_money(&self, filter: MinerFilter) -> CountryFigures {
        collect_mean_money(&self.graph, filter)
    }
}

/// First block id not used anywhere in `graph`
fn next_free_block_id(graph: &Graph) -> BlockId {
    let highest = graph
        .nodes()
        .filter_map(|node| match node.chain() {
            ChainView::Tip(tip) => tip.as_ref().map(|b| b.id),
            ChainView::Tree(tree) => tree.entries().map(|e| e.block.id).max(),
        })
        .max()
        .unwrap_or(ROOT_BLOCK_ID);
    highest + 1
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cg_config::{MinerSeed, NodeCounts};
    use crate::cg_interface::CollectingSink;
    use crate::cg_stats::{GraphSnapshot, RecordingSink};
    use std::cell::RefCell;
    use std::rc::Rc;

    fn seeded_config(seed: u8) -> SimConfig {
        SimConfig {
            seed: Some([seed; 32]),
            ..SimConfig::default()
        }
    }

    fn two_miner_config() -> SimConfig {
        let mut config = seeded_config(42);
        config.nodes = NodeCounts {
            full: 1,
            miners: 2,
            light: 0,
            listening: 0,
        };
        config.initial_miners = vec![
            MinerSeed {
                country: Country::Spain,
                money: 1000,
                computing_power: 1,
            },
            MinerSeed {
                country: Country::Spain,
                money: 1000,
                computing_power: 9,
            },
        ];
        config.economy.block_reward = 10;
        config.economy.payment_amount = 5;
        config
    }

    fn collecting(sim: &mut Simulation) -> Rc<RefCell<CollectingSink>> {
        let sink = Rc::new(RefCell::new(CollectingSink::default()));
        sim.set_event_sink(Box::new(sink.clone()));
        sink
    }

    #[test]
    fn test_step_gate_pairs_events_with_steps() {
        let mut gate = StepGate::new();
        assert_eq!(gate.admit().unwrap(), 0);
        assert!(matches!(gate.admit(), Err(SimError::GateClosed { step: 0 })));
        gate.release();
        assert_eq!(gate.admit().unwrap(), 1);
        gate.release();
        gate.release();
        assert_eq!(gate.step(), 2);
        assert!(gate.is_open());
    }

    #[test]
    fn test_invalid_config_is_rejected_up_front() {
        let mut config = SimConfig::default();
        config.initial_miners.clear();
        assert!(matches!(
            Simulation::new(config),
            Err(SimError::Config(ConfigError::MissingMinerSeeds { .. }))
        ));
    }

    #[test]
    fn test_initialization_builds_and_replaces_graph() {
        let mut sim = Simulation::new(seeded_config(1)).unwrap();
        assert!(sim.graph().is_empty());

        sim.submit(SimulationEvent::Initialization);
        assert!(sim.step().unwrap());
        assert_eq!(sim.graph().len(), 12);
        assert!(sim.graph().is_connected());

        sim.submit(SimulationEvent::BlockMined);
        sim.run_until_idle(10_000).unwrap();
        assert_eq!(sim.counters().blocks_mined, 1);

        sim.submit(SimulationEvent::Initialization);
        sim.step().unwrap();
        assert_eq!(sim.graph().len(), 12);
        assert!(sim
            .graph()
            .nodes()
            .all(|n| n.last_id(Protocol::LongestChain).is_none() && n.mined() == 0));
        assert!(!sim.step().unwrap());
    }

    #[test]
    fn test_hundred_blocks_follow_computing_power() {
        let mut sim = Simulation::new(two_miner_config()).unwrap();
        sim.submit(SimulationEvent::Initialization);
        sim.step().unwrap();

        for _ in 0..100 {
            sim.submit(SimulationEvent::BlockMined);
            sim.run_until_idle(10_000).unwrap();
        }

        let mined: Vec<u64> = sim.graph().miners().map(Node::mined).collect();
        assert_eq!(mined.len(), 2);
        assert_eq!(mined[0] + mined[1], 100);
        assert_eq!(sim.counters().blocks_mined, 100);
        assert!(mined[1] >= 75, "strong miner mined only {}", mined[1]);
        assert!(mined[1] >= 3 * mined[0]);

        // each block paid its miner the reward
        let money: Vec<Money> = sim.graph().miners().map(Node::money).collect();
        assert_eq!(money[0], 1000 + 10 * mined[0]);
        assert_eq!(money[1], 1000 + 10 * mined[1]);
    }

    #[test]
    fn test_lottery_share_over_many_draws() {
        let mut graph = Graph::new();
        graph.spawn(NodeRole::Full, Country::Spain, 0, 0);
        let weak = graph.spawn(NodeRole::Miner, Country::Spain, 0, 1);
        graph.spawn(NodeRole::Miner, Country::Spain, 0, 3);
        let mut sim = Simulation::with_graph(seeded_config(5), graph).unwrap();

        let weak_wins = (0..4000)
            .filter(|_| sim.draw_miner() == Some(weak))
            .count();
        // expected 1000
        assert!((880..=1120).contains(&weak_wins), "weak miner won {weak_wins}");
    }

    #[test]
    fn test_broke_miner_is_evicted_after_one_payment() {
        let mut graph = Graph::new();
        let full = graph.spawn(NodeRole::Full, Country::Spain, 0, 0);
        let light = graph.spawn(NodeRole::Light, Country::Spain, 0, 0);
        let poor = graph.spawn(NodeRole::Miner, Country::Spain, 10, 1);
        let rich = graph.spawn(NodeRole::Miner, Country::Spain, 1000, 1);
        for (a, b) in [(full, light), (full, poor), (light, poor), (full, rich)] {
            graph.connect(a, b).unwrap();
        }

        let mut config = seeded_config(3);
        config.economy.payment_amount = 20;
        let mut sim = Simulation::with_graph(config, graph).unwrap();
        let sink = collecting(&mut sim);

        assert_eq!(sim.settle_payments(), vec![poor]);
        assert!(!sim.graph().contains(poor));
        assert!(sim.graph().nodes().all(|n| !n.is_connected(poor)));
        assert!(sim.graph().is_consistent());
        assert_eq!(sim.graph().get(rich).unwrap().money(), 980);
        assert_eq!(sim.counters().miners_died, 1);
        assert_eq!(
            sink.borrow().events,
            vec![(0, Event::MinerDied { node: poor, money: 10 })]
        );

        // a hop still addressed to the dead miner is dropped quietly
        sim.submit(SimulationEvent::BlockReceived(Hop::new(full, poor)));
        sim.submit(SimulationEvent::BlockReceived(Hop::new(poor, full)));
        assert_eq!(sim.run_until_idle(10).unwrap(), 2);
        assert_eq!(sim.counters().hops_dropped, 2);
        let sink = sink.borrow();
        assert!(matches!(
            sink.events[1].1,
            Event::HopDropped {
                reason: DropReason::UnknownReceiver,
                ..
            }
        ));
        assert!(matches!(
            sink.events[2].1,
            Event::HopDropped {
                reason: DropReason::UnknownSender,
                ..
            }
        ));
    }

    fn two_full_nodes() -> (Graph, NodeId, NodeId, NodeId) {
        let mut graph = Graph::new();
        let a = graph.spawn(NodeRole::Full, Country::Spain, 0, 0);
        let b = graph.spawn(NodeRole::Full, Country::Spain, 0, 0);
        let relay = graph.spawn(NodeRole::Light, Country::Spain, 0, 0);
        graph.connect(a, b).unwrap();
        graph.connect(b, relay).unwrap();

        let node_a = graph.get_mut(a).unwrap();
        node_a.add_block(Block::new(0, 7, ROOT_BLOCK_ID)).unwrap();
        for id in 1..5 {
            node_a.add_block(Block::new(id, 7, id - 1)).unwrap();
        }
        let node_b = graph.get_mut(b).unwrap();
        node_b.add_block(Block::new(10, 8, ROOT_BLOCK_ID)).unwrap();
        node_b.add_block(Block::new(11, 8, 10)).unwrap();
        (graph, a, b, relay)
    }

    #[test]
    fn test_blockchain_update_spreads_biggest_tree() {
        for protocol in [Protocol::LongestChain, Protocol::Ghost] {
            let (graph, a, b, relay) = two_full_nodes();
            let mut config = seeded_config(4);
            config.protocol = protocol;
            let mut sim = Simulation::with_graph(config, graph).unwrap();

            sim.submit(SimulationEvent::BlockchainUpdate);
            sim.run_until_idle(1_000).unwrap();

            let graph = sim.graph();
            assert_eq!(graph.get(a).unwrap().last_id(protocol), Some(4));
            assert_eq!(graph.get(b).unwrap().last_id(protocol), Some(4));
            assert_eq!(graph.get(b).unwrap().tree_size(), 7);
            assert_eq!(graph.get(relay).unwrap().last_id(protocol), Some(4));
            assert_eq!(sim.counters().chain_updates, 1);
            assert_eq!(sim.pending(), 0);
        }
    }

    #[test]
    fn test_mined_block_ids_continue_after_existing_blocks() {
        let (mut graph, a, _, _) = two_full_nodes();
        let miner = graph.spawn(NodeRole::Miner, Country::Spain, 0, 1);
        graph.connect(miner, a).unwrap();
        let mut sim = Simulation::with_graph(seeded_config(4), graph).unwrap();
        let sink = collecting(&mut sim);

        sim.submit(SimulationEvent::BlockMined);
        sim.step().unwrap();
        assert_eq!(
            sink.borrow().events[0].1,
            Event::BlockMined {
                block_id: 12,
                miner,
                parent: ROOT_BLOCK_ID
            }
        );
    }

    #[test]
    fn test_flood_on_cycle_terminates() {
        let mut graph = Graph::new();
        let relays: Vec<NodeId> = (0..5)
            .map(|_| graph.spawn(NodeRole::Light, Country::Spain, 0, 0))
            .collect();
        for i in 0..5 {
            graph.connect(relays[i], relays[(i + 1) % 5]).unwrap();
        }
        let miner = graph.spawn(NodeRole::Miner, Country::Spain, 0, 1);
        graph.connect(miner, relays[0]).unwrap();

        let mut sim = Simulation::with_graph(seeded_config(6), graph).unwrap();
        sim.submit(SimulationEvent::BlockMined);
        let processed = sim.run_until_idle(1_000).unwrap();

        // the mining event, one hop into each relay, two hops that meet
        assert_eq!(processed, 8);
        assert_eq!(sim.pending(), 0);
        assert_eq!(sim.counters().adoptions, 5);
        assert_eq!(sim.counters().hops_converged, 2);
        assert!(processed <= 2 * sim.graph().edge_count() + 1);
        for relay in relays {
            assert_eq!(
                sim.graph().get(relay).unwrap().last_id(Protocol::LongestChain),
                Some(0)
            );
        }
    }

    #[test]
    fn test_saturated_link_suppresses_hops() {
        let mut graph = Graph::new();
        let relay = graph.spawn(NodeRole::Light, Country::Spain, 0, 0);
        let miner = graph.spawn(NodeRole::Miner, Country::Spain, 0, 1);
        graph.connect(miner, relay).unwrap();

        let mut config = seeded_config(2);
        config.gossip.max_edge_uses = 2;
        config.gossip.edge_ttl = 100;
        let mut sim = Simulation::with_graph(config, graph).unwrap();

        for _ in 0..3 {
            sim.submit(SimulationEvent::BlockMined);
            sim.run_until_idle(100).unwrap();
        }

        assert_eq!(sim.counters().blocks_mined, 3);
        assert_eq!(sim.counters().hops_suppressed, 1);
        assert_eq!(
            sim.graph().get(relay).unwrap().last_id(Protocol::LongestChain),
            Some(1)
        );
    }

    #[test]
    fn test_empty_populations_are_noops() {
        let mut graph = Graph::new();
        graph.spawn(NodeRole::Light, Country::Spain, 0, 0);
        let mut sim = Simulation::with_graph(seeded_config(7), graph).unwrap();
        let sink = collecting(&mut sim);

        sim.submit(SimulationEvent::BlockMined);
        sim.submit(SimulationEvent::BlockchainUpdate);
        assert_eq!(sim.run_until_idle(10).unwrap(), 2);

        assert_eq!(sim.counters().empty_population, 2);
        assert_eq!(sim.counters().blocks_mined, 0);
        assert_eq!(
            sink.borrow().events,
            vec![
                (
                    0,
                    Event::EmptyPopulation {
                        population: Population::LiveMiners
                    }
                ),
                (
                    1,
                    Event::EmptyPopulation {
                        population: Population::FullNodes
                    }
                ),
            ]
        );
    }

    #[test]
    fn test_add_miner_with_anchors_to_non_miner() {
        let mut graph = Graph::new();
        let full = graph.spawn(NodeRole::Full, Country::Spain, 0, 0);
        let mut sim = Simulation::with_graph(seeded_config(8), graph).unwrap();
        let sink = collecting(&mut sim);

        let id = sim.add_miner_with(Country::Germany, 120, 4).unwrap();
        let node = sim.graph().get(id).unwrap();
        assert_eq!(node.country(), Country::Germany);
        assert_eq!(node.computing_power(), 4);
        assert!(node.is_connected(full));
        assert_eq!(
            sink.borrow().events,
            vec![(0, Event::MinerJoined { node: id, anchor: full })]
        );

        let random = sim.add_random_miner().unwrap();
        let node = sim.graph().get(random).unwrap();
        assert!((50..=150).contains(&node.money()));
        assert!((1..=10).contains(&node.computing_power()));
        assert_eq!(sim.counters().miners_joined, 2);
        assert_eq!(sim.miners(MinerFilter::MinersOnly).len(), 2);
    }

    #[test]
    fn test_add_miner_without_anchor_is_reported() {
        let mut graph = Graph::new();
        graph.spawn(NodeRole::Miner, Country::Spain, 0, 1);
        let mut sim = Simulation::with_graph(seeded_config(8), graph).unwrap();

        assert_eq!(
            sim.add_random_miner(),
            Err(GraphError::NoEligibleAnchor)
        );
        assert_eq!(sim.counters().growth_failures, 1);
        assert_eq!(sim.graph().len(), 1);
    }

    #[test]
    fn test_snapshots_published_every_step() {
        let mut sim = Simulation::new(seeded_config(9)).unwrap();
        let recorder = Rc::new(RefCell::new(RecordingSink::default()));
        sim.set_snapshot_sink(Box::new(recorder.clone()));

        sim.submit(SimulationEvent::Initialization);
        sim.submit(SimulationEvent::BlockMined);
        let processed = sim.run_until_idle(10_000).unwrap();

        let recorder = recorder.borrow();
        assert_eq!(recorder.graphs.len(), processed);
        assert_eq!(recorder.rosters.len(), processed);
        let steps: Vec<Step> = recorder.graphs.iter().map(|g| g.step).collect();
        assert_eq!(steps, (0..processed as Step).collect::<Vec<_>>());
        assert_eq!(recorder.rosters[0].1.len(), 5);
        assert_eq!(
            recorder.graphs.last().unwrap(),
            &GraphSnapshot::capture(processed as Step - 1, sim.graph(), sim.protocol())
        );
    }

    #[test]
    fn test_same_seed_same_run() {
        let run = |seed: u8| {
            let mut config = seeded_config(seed);
            config.protocol = Protocol::Ghost;
            let mut sim = Simulation::new(config).unwrap();
            sim.submit(SimulationEvent::Initialization);
            for i in 0..30 {
                sim.submit(SimulationEvent::BlockMined);
                if i % 10 == 9 {
                    sim.submit(SimulationEvent::BlockchainUpdate);
                }
                sim.run_until_idle(10_000).unwrap();
            }
            let step = sim.current_step();
            (
                GraphSnapshot::capture(step, sim.graph(), sim.protocol()),
                sim.counters().clone(),
            )
        };
        assert_eq!(run(11), run(11));
    }
}
