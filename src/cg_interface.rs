use std::cell::RefCell;
use std::rc::Rc;

// all node ids share one numeric type; ids are never reused within a run
pub type NodeId = u64;
// -1 is reserved for the synthetic root of every block tree
pub type BlockId = i64;

pub type Money = u64;
pub type ComputingPower = u64;

/// Index of a processed simulation event (one gate cycle)
pub type Step = u64;
/// Index of a periodic-trigger tick in [crate::cg_runner::SimRunner]
pub type Tick = u64;

pub const ROOT_BLOCK_ID: BlockId = -1;

/// Role of a participant in the network
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
pub enum NodeRole {
    /// Mines blocks and pays for it; keeps only its tip
    Miner,
    /// Keeps the full block tree
    Full,
    /// Relay that keeps the last block it saw
    Light,
    /// Relay that keeps the last block it saw
    Listening,
}

impl NodeRole {
    pub fn is_miner(&self) -> bool {
        matches!(self, NodeRole::Miner)
    }
}

/// Fork-choice rule used to pick the canonical leaf of a block tree
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum Protocol {
    /// Deepest root-to-leaf path
    #[default]
    LongestChain,
    /// Greedy heaviest-observed-subtree
    Ghost,
}

/// Directed use of a link: `sender` gossips its view to `receiver`
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct Hop {
    pub sender: NodeId,
    pub receiver: NodeId,
}

impl Hop {
    pub fn new(sender: NodeId, receiver: NodeId) -> Self {
        Self { sender, receiver }
    }
}

/// Inbound work item for the coordinator. Each one is consumed by exactly one step.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum SimulationEvent {
    /// Rebuild the graph from configuration
    Initialization,
    /// Run the mining lottery once
    BlockMined,
    /// `receiver` compares its view with `sender` and adopts on difference
    BlockReceived(Hop),
    /// The biggest full node pushes its view to its neighbours
    BlockchainUpdate,
}

// ============================================================================
// Event Logging System
// ============================================================================

/// Why a hop was not delivered
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum DropReason {
    /// Sender left the graph before the hop was processed
    UnknownSender,
    /// Receiver left the graph before the hop was processed
    UnknownReceiver,
}

/// Which population was empty
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Population {
    LiveMiners,
    FullNodes,
    Anchors,
}

/// Events emitted by the simulation for debugging and analysis
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    /// A miner won the lottery and extended its tip
    BlockMined {
        block_id: BlockId,
        miner: NodeId,
        parent: BlockId,
    },
    /// A node changed its view after comparing with a neighbour
    BlockAdopted {
        block_id: BlockId,
        node: NodeId,
        from: NodeId,
    },
    /// The edge tracker refused a hop because the link was used too often
    HopSuppressed { sender: NodeId, receiver: NodeId },
    /// A hop referenced a node that no longer exists
    HopDropped { hop: Hop, reason: DropReason },
    /// A miner failed to settle its payment and was evicted
    MinerDied { node: NodeId, money: Money },
    /// A miner joined through the growth process
    MinerJoined { node: NodeId, anchor: NodeId },
    /// Work was requested from an empty population
    EmptyPopulation { population: Population },
}

/// Trait for consuming events from the simulation
pub trait EventSink {
    fn log(&mut self, step: Step, event: Event);
}

/// No-op event sink (zero overhead)
pub struct NoOpSink;

impl EventSink for NoOpSink {
    #[inline(always)]
    fn log(&mut self, _step: Step, _event: Event) {}
}

/// Event sink that keeps everything, mostly for tests
#[derive(Default)]
pub struct CollectingSink {
    pub events: Vec<(Step, Event)>,
}

impl EventSink for CollectingSink {
    fn log(&mut self, step: Step, event: Event) {
        self.events.push((step, event));
    }
}

// shared handle so the owner can inspect what the simulation logged
impl<S: EventSink> EventSink for Rc<RefCell<S>> {
    fn log(&mut self, step: Step, event: Event) {
        self.borrow_mut().log(step, event);
    }
}
