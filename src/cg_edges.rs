//! Short-lived record of which directed links carried gossip recently.
//!
//! A link becomes hot when first used and stays hot for `ttl` steps. While hot
//! it may carry at most `max_uses` hops; further hops are refused. This caps
//! re-broadcast storms without touching the neighbour topology.

use hashbrown::HashMap;

use crate::cg_interface::{Hop, NodeId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EdgeRecord {
    /// Steps left before the record is pruned
    pub remaining: u64,
    /// Hops carried since the link became hot
    pub uses: u32,
}

#[derive(Debug, Clone)]
pub struct EdgeTtlTracker {
    ttl: u64,
    max_uses: u32,
    records: HashMap<(NodeId, NodeId), EdgeRecord>,
}

impl EdgeTtlTracker {
    pub fn new(ttl: u64, max_uses: u32) -> Self {
        Self {
            ttl,
            max_uses,
            records: HashMap::new(),
        }
    }

    /// Try to use the link for `hop`. Returns false if the link is saturated.
    pub fn record(&mut self, hop: Hop) -> bool {
        let ttl = self.ttl;
        let record = self
            .records
            .entry((hop.sender, hop.receiver))
            .or_insert(EdgeRecord {
                remaining: ttl,
                uses: 0,
            });
        if record.uses >= self.max_uses {
            return false;
        }
        record.uses += 1;
        true
    }

    /// Age every record by one step and drop the expired ones
    pub fn deplete(&mut self) {
        self.records.retain(|_, record| {
            record.remaining = record.remaining.saturating_sub(1);
            record.remaining > 0
        });
    }

    pub fn get(&self, sender: NodeId, receiver: NodeId) -> Option<&EdgeRecord> {
        self.records.get(&(sender, receiver))
    }

    pub fn is_hot(&self, sender: NodeId, receiver: NodeId) -> bool {
        self.records.contains_key(&(sender, receiver))
    }

    /// Directed links currently hot
    pub fn hot_edges(&self) -> Vec<(NodeId, NodeId)> {
        let mut edges: Vec<_> = self.records.keys().copied().collect();
        edges.sort_unstable();
        edges
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Forget links touching a node that left the graph
    pub fn forget_node(&mut self, id: NodeId) {
        self.records.retain(|(a, b), _| *a != id && *b != id);
    }

    pub fn clear(&mut self) {
        self.records.clear();
    }
}
