//! Cluster capacity seen by the job master: nodes offering a fixed number of slots,
//! one execution vertex per slot.

use std::collections::{BTreeSet, HashSet};

use crate::error::{MasterError, Result};

pub mod strategy;

pub use strategy::{PackStrategy, PlacementStrategy, PlacementStrategyType, SpreadStrategy};

#[derive(Clone, Serialize, Deserialize, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct NodeId(pub String);

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Clone, Serialize, Deserialize, Debug, Eq, PartialEq, Hash)]
pub struct Slot {
    pub node_id: NodeId,
    pub slot_index: u32,
}

impl Slot {
    pub fn new(node_id: NodeId, slot_index: u32) -> Self {
        Slot {
            node_id,
            slot_index,
        }
    }
}

impl std::fmt::Display for Slot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}#{}", self.node_id, self.slot_index)
    }
}

#[derive(Clone, Debug)]
pub struct Node {
    id: NodeId,
    slots: u32,
    allocated: BTreeSet<u32>,
}

impl Node {
    pub fn new(id: NodeId, slots: u32) -> Self {
        Node {
            id,
            slots,
            allocated: BTreeSet::new(),
        }
    }

    pub fn id(&self) -> &NodeId {
        &self.id
    }

    pub fn slots(&self) -> u32 {
        self.slots
    }

    pub fn free_slots(&self) -> usize {
        self.slots as usize - self.allocated.len()
    }

    pub fn allocated_slots(&self) -> usize {
        self.allocated.len()
    }

    pub fn is_free(&self, slot_index: u32) -> bool {
        slot_index < self.slots && !self.allocated.contains(&slot_index)
    }

    /// free slot indexes in ascending order
    pub fn free_slot_indexes(&self) -> Vec<u32> {
        (0..self.slots).filter(|i| !self.allocated.contains(i)).collect()
    }
}

/// Slot accounting for the cluster.
///
/// `allocate` and `release` are the only mutators of capacity, the free
/// capacity stays within `[0, total_capacity]`.
#[derive(Clone, Debug, Default)]
pub struct Resources {
    nodes: Vec<Node>,
}

impl Resources {
    pub fn new() -> Self {
        Resources { nodes: Vec::new() }
    }

    /// `node_count` nodes named `node-0`.. with `slots_per_node` slots each
    pub fn with_uniform_nodes(node_count: u32, slots_per_node: u32) -> Self {
        let mut resources = Resources::new();
        for i in 0..node_count {
            resources.add_node(NodeId(format!("node-{}", i)), slots_per_node);
        }
        resources
    }

    /// Register a node. Registering a known node is ignored.
    pub fn add_node(&mut self, node_id: NodeId, slots: u32) -> bool {
        if self.nodes.iter().any(|n| n.id.eq(&node_id)) {
            warn!("node {} already registered", node_id);
            return false;
        }

        info!("register node {} with {} slots", node_id, slots);
        self.nodes.push(Node::new(node_id, slots));
        true
    }

    pub fn nodes(&self) -> &[Node] {
        self.nodes.as_slice()
    }

    pub fn total_capacity(&self) -> usize {
        self.nodes.iter().map(|n| n.slots as usize).sum()
    }

    pub fn allocated_capacity(&self) -> usize {
        self.nodes.iter().map(|n| n.allocated_slots()).sum()
    }

    pub fn free_capacity(&self) -> usize {
        self.nodes.iter().map(|n| n.free_slots()).sum()
    }

    /// Allocate exactly `n` slots chosen by `strategy`, or nothing at all.
    pub fn allocate(&mut self, n: usize, strategy: &dyn PlacementStrategy) -> Result<Vec<Slot>> {
        if n == 0 {
            return Ok(Vec::new());
        }

        let free = self.free_capacity();
        if free < n {
            return Err(MasterError::ResourceExhausted { requested: n, free });
        }

        let slots = strategy.select(self.nodes.as_slice(), n);
        self.check_selection(&slots, n, strategy.name())?;

        for slot in &slots {
            if let Some(node) = self.nodes.iter_mut().find(|x| x.id.eq(&slot.node_id)) {
                node.allocated.insert(slot.slot_index);
            }
        }

        debug!(
            "allocate {} slots by {}, free {}/{}",
            n,
            strategy.name(),
            self.free_capacity(),
            self.total_capacity()
        );
        Ok(slots)
    }

    fn check_selection(&self, slots: &[Slot], n: usize, strategy_name: &str) -> Result<()> {
        if slots.len() != n {
            return Err(MasterError::InvalidPlacement(format!(
                "{} selected {} slots, {} requested",
                strategy_name,
                slots.len(),
                n
            )));
        }

        let mut distinct = HashSet::new();
        for slot in slots {
            if !distinct.insert(slot) {
                return Err(MasterError::InvalidPlacement(format!(
                    "{} selected slot {} twice",
                    strategy_name, slot
                )));
            }

            let free = self
                .nodes
                .iter()
                .find(|x| x.id.eq(&slot.node_id))
                .map(|x| x.is_free(slot.slot_index))
                .unwrap_or(false);
            if !free {
                return Err(MasterError::InvalidPlacement(format!(
                    "{} selected slot {} which is not free",
                    strategy_name, slot
                )));
            }
        }

        Ok(())
    }

    /// Return `slot` to the pool. Returns `false` if it was not allocated.
    pub fn release(&mut self, slot: &Slot) -> bool {
        let released = self
            .nodes
            .iter_mut()
            .find(|x| x.id.eq(&slot.node_id))
            .map(|x| x.allocated.remove(&slot.slot_index))
            .unwrap_or(false);

        if released {
            debug!("release slot {}", slot);
        } else {
            debug!("slot {} is not allocated, ignore release", slot);
        }
        released
    }

    pub fn release_all(&mut self, slots: &[Slot]) -> usize {
        slots.iter().filter(|slot| self.release(slot)).count()
    }
}

impl std::fmt::Display for Resources {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Resources{{nodes={}, free={}, allocated={}, total={}}}",
            self.nodes.len(),
            self.free_capacity(),
            self.allocated_capacity(),
            self.total_capacity()
        )
    }
}
