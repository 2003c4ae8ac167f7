//! Graph model of a job
//! job_graph -> execution_graph

use std::sync::Arc;

use crate::api::properties::Properties;

pub mod execution_graph;
pub mod job_graph;
pub mod partition;

pub use execution_graph::{
    build_execution_graph, rebuild_execution_graph, ExecutionEdge, ExecutionGraph,
    ExecutionJobVertex, ExecutionVertex, ExecutionVertexStatus, WorkerState,
};
pub use job_graph::{JobEdge, JobGraph, JobGraphBuilder, JobVertex};
pub use partition::{Partition, PartitionStrategy};

#[derive(
    Copy, Clone, Serialize, Deserialize, Debug, Eq, PartialEq, Hash, Default, Ord, PartialOrd,
)]
pub struct JobVertexId(pub u32);

impl std::ops::Deref for JobVertexId {
    type Target = u32;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl std::fmt::Display for JobVertexId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique in the whole execution graph, stable across rescaling.
#[derive(
    Copy, Clone, Serialize, Deserialize, Debug, Eq, PartialEq, Hash, Default, Ord, PartialOrd,
)]
pub struct ExecutionVertexId(pub u32);

impl std::ops::Deref for ExecutionVertexId {
    type Target = u32;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl std::fmt::Display for ExecutionVertexId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Copy, Clone, Serialize, Deserialize, Debug, Eq, PartialEq, Hash)]
pub enum VertexType {
    Source,
    Process,
    Sink,
}

impl VertexType {
    /// zero indegree wins over zero outdegree, so an isolated vertex is a `Source`
    pub fn infer(in_degree: usize, out_degree: usize) -> Self {
        if in_degree == 0 {
            VertexType::Source
        } else if out_degree == 0 {
            VertexType::Sink
        } else {
            VertexType::Process
        }
    }
}

impl std::fmt::Display for VertexType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            VertexType::Source => write!(f, "SOURCE"),
            VertexType::Process => write!(f, "PROCESS"),
            VertexType::Sink => write!(f, "SINK"),
        }
    }
}

/// What a job vertex runs. Opaque to the master, forwarded to the worker.
#[derive(Clone, Serialize, Deserialize, Debug, PartialEq)]
pub struct OperatorDescriptor {
    pub name: String,
    pub properties: Properties,
}

impl OperatorDescriptor {
    pub fn new(name: &str) -> Self {
        OperatorDescriptor {
            name: name.to_string(),
            properties: Properties::new(),
        }
    }

    pub fn with_properties(name: &str, properties: Properties) -> Self {
        OperatorDescriptor {
            name: name.to_string(),
            properties,
        }
    }
}

/// The job graph and the execution graph materializing it, published together.
#[derive(Clone, Debug)]
pub struct Graphs {
    job_graph: Arc<JobGraph>,
    execution_graph: ExecutionGraph,
}

impl Graphs {
    pub fn new(job_graph: Arc<JobGraph>, execution_graph: ExecutionGraph) -> Self {
        Graphs {
            job_graph,
            execution_graph,
        }
    }

    pub fn job_graph(&self) -> &Arc<JobGraph> {
        &self.job_graph
    }

    pub fn execution_graph(&self) -> &ExecutionGraph {
        &self.execution_graph
    }

    pub fn execution_graph_mut(&mut self) -> &mut ExecutionGraph {
        &mut self.execution_graph
    }
}
