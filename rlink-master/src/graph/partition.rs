/// Logical semantics of a job edge, as authored by the client.
#[derive(Copy, Clone, Serialize, Deserialize, Debug, Eq, PartialEq, Hash)]
pub enum PartitionStrategy {
    Broadcast,
    KeyBy,
    Random,
}

impl Default for PartitionStrategy {
    fn default() -> Self {
        PartitionStrategy::Random
    }
}

/// Routing rule of an execution wiring.
#[derive(Copy, Clone, Serialize, Deserialize, Debug, Eq, PartialEq, Hash)]
pub enum Partition {
    /// every record goes to every downstream instance
    Broadcast,
    /// records with the same key go to the same downstream instance
    Key,
    RoundRobin,
}

impl From<PartitionStrategy> for Partition {
    fn from(strategy: PartitionStrategy) -> Self {
        match strategy {
            PartitionStrategy::Broadcast => Partition::Broadcast,
            PartitionStrategy::KeyBy => Partition::Key,
            PartitionStrategy::Random => Partition::RoundRobin,
        }
    }
}

impl std::fmt::Display for Partition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Partition::Broadcast => write!(f, "BroadcastPartition"),
            Partition::Key => write!(f, "KeyPartition"),
            Partition::RoundRobin => write!(f, "RoundRobinPartition"),
        }
    }
}
