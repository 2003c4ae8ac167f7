use std::collections::HashMap;
use std::convert::TryFrom;

use crate::resource::{Node, NodeId, Slot};

/// Chooses which free slots an allocation takes.
///
/// The chosen slots are validated by `Resources`, a strategy only ever sees
/// a consistent view and has no way to mutate it.
pub trait PlacementStrategy: Send + Sync {
    fn name(&self) -> &str;

    fn select(&self, nodes: &[Node], n: usize) -> Vec<Slot>;
}

/// Round-robin over the nodes, the least loaded node first.
#[derive(Clone, Debug, Default)]
pub struct SpreadStrategy;

impl PlacementStrategy for SpreadStrategy {
    fn name(&self) -> &str {
        "spread"
    }

    fn select(&self, nodes: &[Node], n: usize) -> Vec<Slot> {
        let mut free: HashMap<&NodeId, Vec<u32>> = nodes
            .iter()
            .map(|node| {
                let mut indexes = node.free_slot_indexes();
                indexes.reverse();
                (node.id(), indexes)
            })
            .collect();

        let mut slots = Vec::with_capacity(n);
        while slots.len() < n {
            // most free slots wins, ties resolved by registration order
            let candidate = nodes
                .iter()
                .filter(|node| free.get(node.id()).map(|x| !x.is_empty()).unwrap_or(false))
                .max_by(|a, b| {
                    let a_free = free[a.id()].len();
                    let b_free = free[b.id()].len();
                    a_free.cmp(&b_free).then_with(|| {
                        let a_pos = nodes.iter().position(|x| x.id() == a.id());
                        let b_pos = nodes.iter().position(|x| x.id() == b.id());
                        b_pos.cmp(&a_pos)
                    })
                });

            let node = match candidate {
                Some(node) => node,
                None => break,
            };
            if let Some(slot_index) = free.get_mut(node.id()).and_then(|x| x.pop()) {
                slots.push(Slot::new(node.id().clone(), slot_index));
            }
        }

        slots
    }
}

/// Fill one node before moving to the next.
#[derive(Clone, Debug, Default)]
pub struct PackStrategy;

impl PlacementStrategy for PackStrategy {
    fn name(&self) -> &str {
        "pack"
    }

    fn select(&self, nodes: &[Node], n: usize) -> Vec<Slot> {
        nodes
            .iter()
            .flat_map(|node| {
                node.free_slot_indexes()
                    .into_iter()
                    .map(move |slot_index| Slot::new(node.id().clone(), slot_index))
            })
            .take(n)
            .collect()
    }
}

#[derive(Copy, Clone, Serialize, Deserialize, Debug, Eq, PartialEq)]
pub enum PlacementStrategyType {
    Spread,
    Pack,
}

impl PlacementStrategyType {
    pub fn strategy(&self) -> Box<dyn PlacementStrategy> {
        match self {
            PlacementStrategyType::Spread => Box::new(SpreadStrategy),
            PlacementStrategyType::Pack => Box::new(PackStrategy),
        }
    }
}

impl Default for PlacementStrategyType {
    fn default() -> Self {
        PlacementStrategyType::Spread
    }
}

impl<'a> TryFrom<&'a str> for PlacementStrategyType {
    type Error = anyhow::Error;

    fn try_from(value: &'a str) -> Result<Self, Self::Error> {
        let value = value.to_ascii_lowercase();
        match value.as_str() {
            "spread" => Ok(PlacementStrategyType::Spread),
            "pack" => Ok(PlacementStrategyType::Pack),
            _ => Err(anyhow!("unknown placement strategy `{}`", value)),
        }
    }
}

impl std::fmt::Display for PlacementStrategyType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PlacementStrategyType::Spread => write!(f, "spread"),
            PlacementStrategyType::Pack => write!(f, "pack"),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::convert::TryFrom;

    use crate::resource::strategy::{PlacementStrategy, PlacementStrategyType};
    use crate::resource::{NodeId, PackStrategy, Resources, SpreadStrategy};

    fn count_by_node(slots: &[crate::resource::Slot]) -> HashMap<NodeId, usize> {
        let mut counts = HashMap::new();
        for slot in slots {
            *counts.entry(slot.node_id.clone()).or_insert(0) += 1;
        }
        counts
    }

    #[test]
    pub fn spread_test() {
        let resources = Resources::with_uniform_nodes(3, 4);
        let slots = SpreadStrategy.select(resources.nodes(), 6);
        assert_eq!(slots.len(), 6);

        let counts = count_by_node(&slots);
        assert_eq!(counts.len(), 3);
        assert!(counts.values().all(|c| *c == 2));
    }

    #[test]
    pub fn spread_least_loaded_first_test() {
        let mut resources = Resources::with_uniform_nodes(2, 4);
        resources.allocate(3, &PackStrategy).unwrap();

        // node-0 has 1 free slot, node-1 has 4
        let slots = SpreadStrategy.select(resources.nodes(), 3);
        let counts = count_by_node(&slots);
        assert_eq!(counts[&NodeId("node-1".to_string())], 3);
    }

    #[test]
    pub fn pack_test() {
        let resources = Resources::with_uniform_nodes(3, 4);
        let slots = PackStrategy.select(resources.nodes(), 6);
        let counts = count_by_node(&slots);
        assert_eq!(counts[&NodeId("node-0".to_string())], 4);
        assert_eq!(counts[&NodeId("node-1".to_string())], 2);
        assert!(!counts.contains_key(&NodeId("node-2".to_string())));
    }

    #[test]
    pub fn strategy_type_test() {
        assert_eq!(
            PlacementStrategyType::try_from("PACK").unwrap(),
            PlacementStrategyType::Pack
        );
        assert_eq!(PlacementStrategyType::default().to_string(), "spread");
        assert!(PlacementStrategyType::try_from("random").is_err());
        assert_eq!(PlacementStrategyType::Pack.strategy().name(), "pack");
    }
}
