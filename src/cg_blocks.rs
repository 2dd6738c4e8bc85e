//! Blocks and the per-node block tree.
//!
//! A tree is an arena keyed by block id. Parents are stored as ids and children
//! as id lists, so there is no shared ownership between blocks. The arena is an
//! [IndexMap]: insertion order is arrival order, and because a block is only ever
//! linked under a block that is already present, insertion order is also a
//! topological order of the tree. Both fork-choice rules rely on that.

use std::collections::HashMap;

use indexmap::IndexMap;

use crate::cg_interface::{BlockId, NodeId, Protocol, ROOT_BLOCK_ID};

/// A mined block. Immutable once created.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Block {
    pub id: BlockId,
    /// None only for the synthetic root
    pub mined_by: Option<NodeId>,
    /// Block this one was mined on top of (None only for the synthetic root)
    pub parent: Option<BlockId>,
}

impl Block {
    pub fn new(id: BlockId, mined_by: NodeId, parent: BlockId) -> Self {
        Self {
            id,
            mined_by: Some(mined_by),
            parent: Some(parent),
        }
    }

    pub fn root() -> Self {
        Self {
            id: ROOT_BLOCK_ID,
            mined_by: None,
            parent: None,
        }
    }

    pub fn is_root(&self) -> bool {
        self.id == ROOT_BLOCK_ID
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TreeError {
    #[error("block {id} already in tree with different contents")]
    ConflictingBlock { id: BlockId },
    #[error("the synthetic root can not be inserted")]
    RootInsert,
}

/// A block together with its position in one tree
#[derive(Debug, Clone)]
pub struct TreeEntry {
    pub block: Block,
    /// Where the block hangs in this tree. Differs from `block.parent` for
    /// orphans, which are attached directly under the root.
    pub linked_parent: Option<BlockId>,
    /// In arrival order
    pub children: Vec<BlockId>,
    /// 1 + number of proper descendants
    pub weight: u64,
}

/// Block tree owned by a full node, rooted at [ROOT_BLOCK_ID]
#[derive(Debug, Clone)]
pub struct BlockTree {
    entries: IndexMap<BlockId, TreeEntry>,
    size: usize,
}

impl BlockTree {
    pub fn new() -> Self {
        let mut entries = IndexMap::new();
        entries.insert(
            ROOT_BLOCK_ID,
            TreeEntry {
                block: Block::root(),
                linked_parent: None,
                children: Vec::new(),
                weight: 1,
            },
        );
        Self { entries, size: 0 }
    }

    /// Number of blocks, not counting the root
    pub fn size(&self) -> usize {
        self.size
    }

    pub fn contains(&self, id: BlockId) -> bool {
        self.entries.contains_key(&id)
    }

    pub fn get(&self, id: BlockId) -> Option<&TreeEntry> {
        self.entries.get(&id)
    }

    pub fn root(&self) -> &Block {
        &self.entries[0].block
    }

    /// All entries including the root, in arrival order
    pub fn entries(&self) -> impl Iterator<Item = &TreeEntry> {
        self.entries.values()
    }

    /// Insert a block. Returns false if the same block was already present.
    ///
    /// A block whose parent is unknown is attached directly under the root.
    pub fn add(&mut self, block: Block) -> Result<bool, TreeError> {
        if block.is_root() {
            return Err(TreeError::RootInsert);
        }
        if let Some(existing) = self.entries.get(&block.id) {
            if existing.block != block {
                return Err(TreeError::ConflictingBlock { id: block.id });
            }
            return Ok(false);
        }

        let linked_parent = match block.parent {
            Some(parent) if self.entries.contains_key(&parent) => parent,
            _ => ROOT_BLOCK_ID,
        };

        let id = block.id;
        if let Some(parent) = self.entries.get_mut(&linked_parent) {
            parent.children.push(id);
        }
        self.entries.insert(
            id,
            TreeEntry {
                block,
                linked_parent: Some(linked_parent),
                children: Vec::new(),
                weight: 1,
            },
        );
        self.size += 1;

        // keep stored weights current: every ancestor gained one descendant
        let mut cursor = Some(linked_parent);
        while let Some(ancestor) = cursor {
            match self.entries.get_mut(&ancestor) {
                Some(entry) => {
                    entry.weight += 1;
                    cursor = entry.linked_parent;
                }
                None => break,
            }
        }

        Ok(true)
    }

    /// Subtree weight of every block: 1 + weight of all proper descendants.
    ///
    /// Single bottom-up pass over reverse arrival order; children always arrive
    /// after their parent so they are finished first.
    pub fn weights(&self) -> HashMap<BlockId, u64> {
        let mut weights = HashMap::with_capacity(self.entries.len());
        for entry in self.entries.values().rev() {
            let below: u64 = entry
                .children
                .iter()
                .map(|child| weights.get(child).copied().unwrap_or(0))
                .sum();
            weights.insert(entry.block.id, 1 + below);
        }
        weights
    }

    /// Length in blocks of the longest downward path starting at each block
    /// (a leaf has height 1).
    pub fn heights(&self) -> HashMap<BlockId, u64> {
        let mut heights = HashMap::with_capacity(self.entries.len());
        for entry in self.entries.values().rev() {
            let below = entry
                .children
                .iter()
                .map(|child| heights.get(child).copied().unwrap_or(0))
                .max()
                .unwrap_or(0);
            heights.insert(entry.block.id, 1 + below);
        }
        heights
    }

    /// Number of links between the root and `id`
    pub fn depth(&self, id: BlockId) -> Option<u64> {
        let mut entry = self.entries.get(&id)?;
        let mut depth = 0;
        while let Some(parent) = entry.linked_parent {
            depth += 1;
            entry = self.entries.get(&parent)?;
        }
        Some(depth)
    }

    pub fn max_depth(&self) -> u64 {
        self.heights()
            .get(&ROOT_BLOCK_ID)
            .map(|h| h - 1)
            .unwrap_or(0)
    }

    /// Walk down from the root, at each block taking the child with the largest
    /// `metric`. Ties go to the child that arrived first.
    fn descend(&self, metric: &HashMap<BlockId, u64>) -> &Block {
        let mut current = &self.entries[0];
        loop {
            let mut best: Option<(&TreeEntry, u64)> = None;
            for child in &current.children {
                let Some(entry) = self.entries.get(child) else {
                    continue;
                };
                let value = metric.get(child).copied().unwrap_or(0);
                match best {
                    Some((_, top)) if top >= value => {}
                    _ => best = Some((entry, value)),
                }
            }
            match best {
                Some((entry, _)) => current = entry,
                None => return &current.block,
            }
        }
    }

    /// End of the deepest root-to-leaf path
    pub fn longest_chain_tip(&self) -> &Block {
        self.descend(&self.heights())
    }

    /// End of the greedy heaviest-subtree walk
    pub fn ghost_tip(&self) -> &Block {
        self.descend(&self.weights())
    }

    pub fn tip(&self, protocol: Protocol) -> &Block {
        match protocol {
            Protocol::LongestChain => self.longest_chain_tip(),
            Protocol::Ghost => self.ghost_tip(),
        }
    }

    /// Blocks from just below the root down to `id`, inclusive
    pub fn path_to(&self, id: BlockId) -> Vec<Block> {
        let mut path = Vec::new();
        let mut cursor = self.entries.get(&id);
        while let Some(entry) = cursor {
            if entry.block.is_root() {
                break;
            }
            path.push(entry.block.clone());
            cursor = entry.linked_parent.and_then(|p| self.entries.get(&p));
        }
        path.reverse();
        path
    }
}

impl Default for BlockTree {
    fn default() -> Self {
        Self::new()
    }
}
