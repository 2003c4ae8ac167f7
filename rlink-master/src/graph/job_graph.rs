use std::collections::HashMap;
use std::ops::Index;

use daggy::{Dag, NodeIndex, Walker};

use crate::api::properties::Properties;
use crate::error::{MasterError, Result};
use crate::graph::partition::PartitionStrategy;
use crate::graph::{JobVertexId, OperatorDescriptor, VertexType};

#[derive(Clone, Serialize, Deserialize, Debug, PartialEq)]
pub struct JobVertex {
    pub(crate) id: JobVertexId,
    pub(crate) operator: OperatorDescriptor,
    pub(crate) parallelism: u32,
    pub(crate) vertex_type: VertexType,
}

impl JobVertex {
    pub fn id(&self) -> JobVertexId {
        self.id
    }
    pub fn operator(&self) -> &OperatorDescriptor {
        &self.operator
    }
    pub fn parallelism(&self) -> u32 {
        self.parallelism
    }
    pub fn vertex_type(&self) -> VertexType {
        self.vertex_type
    }
}

#[derive(Clone, Serialize, Deserialize, Debug, PartialEq)]
pub struct JobEdge {
    pub(crate) source_id: JobVertexId,
    pub(crate) target_id: JobVertexId,
    pub(crate) partition_strategy: PartitionStrategy,
}

impl JobEdge {
    pub fn source_id(&self) -> JobVertexId {
        self.source_id
    }
    pub fn target_id(&self) -> JobVertexId {
        self.target_id
    }
    pub fn partition_strategy(&self) -> PartitionStrategy {
        self.partition_strategy
    }
}

/// Collects vertices and edges, then validates them into an immutable [`JobGraph`].
#[derive(Debug)]
pub struct JobGraphBuilder {
    job_name: String,
    job_config: Properties,
    vertices: Vec<(JobVertexId, OperatorDescriptor, u32)>,
    edges: Vec<JobEdge>,
}

impl JobGraphBuilder {
    pub fn new(job_name: &str) -> Self {
        JobGraphBuilder {
            job_name: job_name.to_string(),
            job_config: Properties::new(),
            vertices: Vec::new(),
            edges: Vec::new(),
        }
    }

    pub fn job_config(mut self, job_config: Properties) -> Self {
        self.job_config = job_config;
        self
    }

    pub fn add_vertex(mut self, id: u32, operator: OperatorDescriptor, parallelism: u32) -> Self {
        self.vertices.push((JobVertexId(id), operator, parallelism));
        self
    }

    pub fn add_edge(mut self, source_id: u32, target_id: u32, strategy: PartitionStrategy) -> Self {
        self.edges.push(JobEdge {
            source_id: JobVertexId(source_id),
            target_id: JobVertexId(target_id),
            partition_strategy: strategy,
        });
        self
    }

    pub fn build(self) -> Result<JobGraph> {
        if self.vertices.is_empty() {
            return Err(MasterError::GraphConstruction(format!(
                "job `{}` has no vertex",
                self.job_name
            )));
        }

        let mut dag: Dag<JobVertex, JobEdge> = Dag::new();
        let mut job_vertex_indies = HashMap::new();
        for (id, operator, parallelism) in self.vertices {
            if parallelism == 0 {
                return Err(MasterError::GraphConstruction(format!(
                    "job vertex {} has zero parallelism",
                    id
                )));
            }
            if job_vertex_indies.contains_key(&id) {
                return Err(MasterError::GraphConstruction(format!(
                    "duplicate job vertex {}",
                    id
                )));
            }

            let node_index = dag.add_node(JobVertex {
                id,
                operator,
                parallelism,
                // inferred below, once all edges are known
                vertex_type: VertexType::Process,
            });
            job_vertex_indies.insert(id, node_index);
        }

        for edge in self.edges {
            let source = job_vertex_indies.get(&edge.source_id).ok_or_else(|| {
                MasterError::GraphConstruction(format!(
                    "edge {}->{} references unknown source vertex",
                    edge.source_id, edge.target_id
                ))
            })?;
            let target = job_vertex_indies.get(&edge.target_id).ok_or_else(|| {
                MasterError::GraphConstruction(format!(
                    "edge {}->{} references unknown target vertex",
                    edge.source_id, edge.target_id
                ))
            })?;

            let (source_id, target_id) = (edge.source_id, edge.target_id);
            dag.add_edge(*source, *target, edge).map_err(|_e| {
                MasterError::GraphConstruction(format!(
                    "edge {}->{} would cycle",
                    source_id, target_id
                ))
            })?;
        }

        for node_index in job_vertex_indies.values() {
            let in_degree = dag.parents(*node_index).iter(&dag).count();
            let out_degree = dag.children(*node_index).iter(&dag).count();
            dag[*node_index].vertex_type = VertexType::infer(in_degree, out_degree);
        }

        let job_graph = JobGraph {
            job_name: self.job_name,
            job_config: self.job_config,
            job_vertex_indies,
            dag,
        };
        debug!("JobGraph built: {}", job_graph);

        Ok(job_graph)
    }
}

/// Logical DAG of a job, immutable once built.
#[derive(Clone, Debug)]
pub struct JobGraph {
    job_name: String,
    job_config: Properties,
    job_vertex_indies: HashMap<JobVertexId, NodeIndex>,
    dag: Dag<JobVertex, JobEdge>,
}

impl JobGraph {
    pub fn job_name(&self) -> &str {
        self.job_name.as_str()
    }

    pub fn job_config(&self) -> &Properties {
        &self.job_config
    }

    pub fn get_dag(&self) -> &Dag<JobVertex, JobEdge> {
        &self.dag
    }

    pub fn contains_vertex(&self, id: &JobVertexId) -> bool {
        self.job_vertex_indies.contains_key(id)
    }

    pub fn get_vertex(&self, id: &JobVertexId) -> Option<&JobVertex> {
        self.job_vertex_indies
            .get(id)
            .map(|node_index| self.dag.index(*node_index))
    }

    /// vertices in insertion order
    pub fn vertices(&self) -> Vec<&JobVertex> {
        self.dag.raw_nodes().iter().map(|node| &node.weight).collect()
    }

    pub fn edges(&self) -> Vec<&JobEdge> {
        self.dag.raw_edges().iter().map(|edge| &edge.weight).collect()
    }

    pub fn vertex_count(&self) -> usize {
        self.dag.node_count()
    }

    pub fn edge_count(&self) -> usize {
        self.dag.edge_count()
    }

    pub fn parents(&self, id: &JobVertexId) -> Vec<(&JobVertex, &JobEdge)> {
        match self.job_vertex_indies.get(id) {
            Some(node_index) => self
                .dag
                .parents(*node_index)
                .iter(&self.dag)
                .map(|(edge, node)| (self.dag.index(node), self.dag.index(edge)))
                .collect(),
            None => Vec::new(),
        }
    }

    pub fn children(&self, id: &JobVertexId) -> Vec<(&JobVertex, &JobEdge)> {
        match self.job_vertex_indies.get(id) {
            Some(node_index) => self
                .dag
                .children(*node_index)
                .iter(&self.dag)
                .map(|(edge, node)| (self.dag.index(node), self.dag.index(edge)))
                .collect(),
            None => Vec::new(),
        }
    }
}

impl std::fmt::Display for JobGraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let vertices: Vec<String> = self
            .vertices()
            .iter()
            .map(|v| format!("{}:{}({})x{}", v.id, v.operator.name, v.vertex_type, v.parallelism))
            .collect();
        let edges: Vec<String> = self
            .edges()
            .iter()
            .map(|e| format!("{}->{}:{:?}", e.source_id, e.target_id, e.partition_strategy))
            .collect();
        write!(
            f,
            "{}{{vertices=[{}], edges=[{}]}}",
            self.job_name,
            vertices.join(", "),
            edges.join(", ")
        )
    }
}
