use indexmap::IndexSet;

use crate::cg_blocks::{Block, BlockTree, TreeError};
use crate::cg_country::Country;
use crate::cg_interface::{BlockId, ComputingPower, Money, NodeId, NodeRole, Protocol};

/// What a node knows about the chain
#[derive(Debug, Clone)]
pub enum ChainView {
    /// Miners and relays only remember the block they consider the head
    Tip(Option<Block>),
    /// Full nodes keep every block they have seen
    Tree(BlockTree),
}

/// A participant of the simulated network
#[derive(Debug, Clone)]
pub struct Node {
    id: NodeId,
    role: NodeRole,
    country: Country,
    money: Money,
    computing_power: ComputingPower,
    // symmetric with the other side, maintained by Graph
    neighbours: IndexSet<NodeId>,
    alive: bool,
    mined: u64,
    chain_length: u64,
    chain: ChainView,
}

impl Node {
    pub fn new(id: NodeId, role: NodeRole, country: Country, money: Money) -> Self {
        let chain = match role {
            NodeRole::Full => ChainView::Tree(BlockTree::new()),
            NodeRole::Miner | NodeRole::Light | NodeRole::Listening => ChainView::Tip(None),
        };
        Self {
            id,
            role,
            country,
            money,
            computing_power: 0,
            neighbours: IndexSet::new(),
            alive: true,
            mined: 0,
            chain_length: 1,
            chain,
        }
    }

    pub fn new_miner(
        id: NodeId,
        country: Country,
        money: Money,
        computing_power: ComputingPower,
    ) -> Self {
        let mut node = Self::new(id, NodeRole::Miner, country, money);
        node.computing_power = computing_power;
        node
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn role(&self) -> NodeRole {
        self.role
    }

    pub fn country(&self) -> Country {
        self.country
    }

    pub fn money(&self) -> Money {
        self.money
    }

    pub fn computing_power(&self) -> ComputingPower {
        self.computing_power
    }

    pub fn is_alive(&self) -> bool {
        self.alive
    }

    /// Blocks this node won the lottery for
    pub fn mined(&self) -> u64 {
        self.mined
    }

    pub fn chain_length(&self) -> u64 {
        self.chain_length
    }

    pub fn chain(&self) -> &ChainView {
        &self.chain
    }

    pub fn tree(&self) -> Option<&BlockTree> {
        match &self.chain {
            ChainView::Tree(tree) => Some(tree),
            ChainView::Tip(_) => None,
        }
    }

    /// Blocks in this node's tree; 0 for nodes without one
    pub fn tree_size(&self) -> usize {
        self.tree().map(BlockTree::size).unwrap_or(0)
    }

    // ------------------------------------------------------------------------
    // neighbours
    // ------------------------------------------------------------------------

    pub fn neighbours(&self) -> &IndexSet<NodeId> {
        &self.neighbours
    }

    pub fn is_connected(&self, other: NodeId) -> bool {
        self.neighbours.contains(&other)
    }

    pub(crate) fn connect(&mut self, other: NodeId) -> bool {
        other != self.id && self.neighbours.insert(other)
    }

    pub(crate) fn detach(&mut self, other: NodeId) -> bool {
        self.neighbours.shift_remove(&other)
    }

    pub(crate) fn restore_progress(&mut self, mined: u64, chain_length: u64, alive: bool) {
        self.mined = mined;
        self.chain_length = chain_length;
        self.alive = alive;
    }

    // ------------------------------------------------------------------------
    // economy
    // ------------------------------------------------------------------------

    /// Charge the periodic fee, scaled by the country's price.
    ///
    /// Non-miners always succeed and are not charged. A miner that can not pay
    /// is marked dead and keeps its money; the caller evicts it.
    pub fn settle_payment(&mut self, amount: Money) -> bool {
        if !self.role.is_miner() {
            return true;
        }
        if !self.alive {
            return false;
        }

        let required = self.country.scale(amount);
        match self.money.checked_sub(required) {
            Some(left) => {
                self.money = left;
                true
            }
            None => {
                self.alive = false;
                false
            }
        }
    }

    pub fn receive_reward(&mut self, amount: Money) {
        self.money = self.money.saturating_add(amount);
    }

    // ------------------------------------------------------------------------
    // chain
    // ------------------------------------------------------------------------

    /// Adopt a freshly mined block as own head and count it
    pub fn mine_block(&mut self, block: Block) -> Result<(), TreeError> {
        match &mut self.chain {
            ChainView::Tip(tip) => *tip = Some(block),
            ChainView::Tree(tree) => {
                tree.add(block)?;
            }
        }
        self.mined += 1;
        self.chain_length += 1;
        Ok(())
    }

    /// Take in a block received from a neighbour.
    ///
    /// Tip holders replace their tip unconditionally. Full nodes insert it into
    /// their tree (no-op if already present). Returns whether anything changed.
    pub fn add_block(&mut self, block: Block) -> Result<bool, TreeError> {
        match &mut self.chain {
            ChainView::Tip(tip) => {
                let changed = tip.as_ref().map(|b| b.id) != Some(block.id);
                *tip = Some(block);
                Ok(changed)
            }
            ChainView::Tree(tree) => tree.add(block),
        }
    }

    /// Head of this node's chain under `protocol`; None while nothing is known
    pub fn get_last(&self, protocol: Protocol) -> Option<&Block> {
        match &self.chain {
            ChainView::Tip(tip) => tip.as_ref(),
            ChainView::Tree(tree) => Some(tree.tip(protocol)).filter(|b| !b.is_root()),
        }
    }

    pub fn last_id(&self, protocol: Protocol) -> Option<BlockId> {
        self.get_last(protocol).map(|b| b.id)
    }

    /// What this node hands a neighbour when gossiping: full nodes send the
    /// branch leading to their head so the receiver can link it, tip holders
    /// send the tip alone.
    pub fn offer(&self, protocol: Protocol) -> Vec<Block> {
        match &self.chain {
            ChainView::Tip(tip) => tip.iter().cloned().collect(),
            ChainView::Tree(tree) => {
                let head = tree.tip(protocol);
                if head.is_root() {
                    Vec::new()
                } else {
                    tree.path_to(head.id)
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cg_interface::ROOT_BLOCK_ID;

    fn miner(money: Money) -> Node {
        Node::new_miner(1, Country::Spain, money, 3)
    }

    #[test]
    fn test_settle_payment_charges_miner() {
        let mut node = miner(100);
        assert!(node.settle_payment(30));
        assert_eq!(node.money(), 70);
        assert!(node.is_alive());
    }

    #[test]
    fn test_settle_payment_scales_by_country() {
        let mut node = Node::new_miner(1, Country::GreatBritain, 100, 1);
        assert!(node.settle_payment(10));
        assert_eq!(node.money(), 87);
    }

    #[test]
    fn test_settle_payment_kills_broke_miner() {
        let mut node = miner(10);
        assert!(!node.settle_payment(20));
        assert!(!node.is_alive());
        assert_eq!(node.money(), 10);

        // stays dead
        assert!(!node.settle_payment(0));
    }

    #[test]
    fn test_settle_payment_exact_balance_survives() {
        let mut node = miner(20);
        assert!(node.settle_payment(20));
        assert_eq!(node.money(), 0);
        assert!(node.is_alive());
    }

    #[test]
    fn test_settle_payment_ignores_non_miners() {
        for role in [NodeRole::Full, NodeRole::Light, NodeRole::Listening] {
            let mut node = Node::new(2, role, Country::Germany, 5);
            assert!(node.settle_payment(1_000));
            assert_eq!(node.money(), 5);
            assert!(node.is_alive());
        }
    }

    #[test]
    fn test_reward_adds_money() {
        let mut node = miner(5);
        node.receive_reward(10);
        assert_eq!(node.money(), 15);
    }

    #[test]
    fn test_mine_block_sets_tip_and_counts() {
        let mut node = miner(0);
        node.mine_block(Block::new(0, 1, ROOT_BLOCK_ID)).unwrap();
        node.mine_block(Block::new(1, 1, 0)).unwrap();
        assert_eq!(node.last_id(Protocol::LongestChain), Some(1));
        assert_eq!(node.mined(), 2);
        assert_eq!(node.chain_length(), 3);
    }

    #[test]
    fn test_miner_adopts_any_received_block() {
        let mut node = miner(0);
        node.mine_block(Block::new(5, 1, ROOT_BLOCK_ID)).unwrap();
        // older block still replaces the tip
        assert!(node.add_block(Block::new(2, 9, ROOT_BLOCK_ID)).unwrap());
        assert_eq!(node.last_id(Protocol::Ghost), Some(2));
        assert!(!node.add_block(Block::new(2, 9, ROOT_BLOCK_ID)).unwrap());
    }

    #[test]
    fn test_full_node_builds_tree() {
        let mut node = Node::new(3, NodeRole::Full, Country::Poland, 0);
        assert_eq!(node.get_last(Protocol::LongestChain), None);
        assert!(node.offer(Protocol::LongestChain).is_empty());

        node.add_block(Block::new(0, 1, ROOT_BLOCK_ID)).unwrap();
        node.add_block(Block::new(1, 1, 0)).unwrap();
        assert!(!node.add_block(Block::new(1, 1, 0)).unwrap());
        assert_eq!(node.tree_size(), 2);
        assert_eq!(node.last_id(Protocol::LongestChain), Some(1));

        let offered: Vec<BlockId> = node
            .offer(Protocol::LongestChain)
            .iter()
            .map(|b| b.id)
            .collect();
        assert_eq!(offered, vec![0, 1]);
    }

    #[test]
    fn test_connect_is_a_set() {
        let mut node = miner(0);
        assert!(node.connect(4));
        assert!(!node.connect(4));
        assert!(!node.connect(1)); // self
        assert!(node.is_connected(4));
        assert!(node.detach(4));
        assert!(!node.is_connected(4));
    }
}
