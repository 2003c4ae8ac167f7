use std::collections::{BTreeMap, HashMap, HashSet};
use daggy::{Dag, NodeIndex, Walker};

use crate::api::properties::Properties;
use crate::error::{MasterError, Result};
use crate::graph::job_graph::JobGraph;
use crate::graph::partition::Partition;
use crate::graph::{ExecutionVertexId, JobVertexId, OperatorDescriptor, VertexType};
use crate::master::actor::ActorHandle;
use crate::resource::Slot;
use crate::utils::date_time::{current_timestamp_millis, timestamp_str};

/// Scheduling status of an execution vertex.
#[derive(Copy, Clone, Serialize, Deserialize, Debug, Eq, PartialEq, Hash)]
pub enum ExecutionVertexStatus {
    /// new instance, the worker must be created
    ToAdd,
    /// running instance wired to an added instance, must be re-initialized
    ToAddRelated,
    Running,
    /// instance removed by rescaling, the worker must be destroyed
    ToDelete,
    /// running instance that was wired to a deleted instance
    ToDeleteRelated,
}

/// Lifecycle of the remote worker bound to an execution vertex.
///
/// `Uncreated -> Created -> Initialized -> Started`, `Destroyed` is absorbing.
#[derive(Copy, Clone, Serialize, Deserialize, Debug, Eq, PartialEq, Hash)]
pub enum WorkerState {
    Uncreated,
    Created,
    Initialized,
    Started,
    Destroyed,
}

impl WorkerState {
    /// a live worker holds cluster resources and must be destroyed eventually
    pub fn is_live(&self) -> bool {
        match self {
            WorkerState::Created | WorkerState::Initialized | WorkerState::Started => true,
            WorkerState::Uncreated | WorkerState::Destroyed => false,
        }
    }
}

#[derive(Clone, Serialize, Deserialize, Debug)]
pub struct ExecutionVertex {
    id: ExecutionVertexId,
    job_vertex_id: JobVertexId,
    index: u32,
    parallelism: u32,
    vertex_type: VertexType,
    operator_name: String,
    status: ExecutionVertexStatus,
    worker_state: WorkerState,
    slot: Option<Slot>,
    worker_actor: Option<ActorHandle>,
}

impl ExecutionVertex {
    fn new(
        id: ExecutionVertexId,
        job_vertex_id: JobVertexId,
        index: u32,
        parallelism: u32,
        vertex_type: VertexType,
        operator_name: &str,
    ) -> Self {
        ExecutionVertex {
            id,
            job_vertex_id,
            index,
            parallelism,
            vertex_type,
            operator_name: operator_name.to_string(),
            status: ExecutionVertexStatus::ToAdd,
            worker_state: WorkerState::Uncreated,
            slot: None,
            worker_actor: None,
        }
    }

    pub fn id(&self) -> ExecutionVertexId {
        self.id
    }
    pub fn job_vertex_id(&self) -> JobVertexId {
        self.job_vertex_id
    }
    pub fn index(&self) -> u32 {
        self.index
    }
    pub fn parallelism(&self) -> u32 {
        self.parallelism
    }
    pub fn vertex_type(&self) -> VertexType {
        self.vertex_type
    }
    pub fn operator_name(&self) -> &str {
        self.operator_name.as_str()
    }
    pub fn status(&self) -> ExecutionVertexStatus {
        self.status
    }
    pub fn worker_state(&self) -> WorkerState {
        self.worker_state
    }
    pub fn slot(&self) -> Option<&Slot> {
        self.slot.as_ref()
    }
    pub fn worker_actor(&self) -> Option<&ActorHandle> {
        self.worker_actor.as_ref()
    }

    pub fn is_to_add(&self) -> bool {
        self.status == ExecutionVertexStatus::ToAdd
    }

    pub fn is_to_delete(&self) -> bool {
        self.status == ExecutionVertexStatus::ToDelete
    }

    pub fn is_related(&self) -> bool {
        match self.status {
            ExecutionVertexStatus::ToAddRelated | ExecutionVertexStatus::ToDeleteRelated => true,
            _ => false,
        }
    }

    pub(crate) fn set_worker_state(&mut self, worker_state: WorkerState) {
        self.worker_state = worker_state;
    }

    pub(crate) fn set_slot(&mut self, slot: Slot) {
        self.slot = Some(slot);
    }

    pub(crate) fn take_slot(&mut self) -> Option<Slot> {
        self.slot.take()
    }

    pub(crate) fn attach_actor(&mut self, actor: ActorHandle) {
        self.worker_actor = Some(actor);
    }

    pub(crate) fn detach_actor(&mut self) -> Option<ActorHandle> {
        self.worker_actor.take()
    }
}

/// All execution vertices materializing one job vertex.
#[derive(Clone, Serialize, Deserialize, Debug)]
pub struct ExecutionJobVertex {
    job_vertex_id: JobVertexId,
    operator: OperatorDescriptor,
    vertex_type: VertexType,
    parallelism: u32,
    execution_vertices: Vec<ExecutionVertex>,
}

impl ExecutionJobVertex {
    pub fn job_vertex_id(&self) -> JobVertexId {
        self.job_vertex_id
    }
    pub fn operator(&self) -> &OperatorDescriptor {
        &self.operator
    }
    pub fn vertex_type(&self) -> VertexType {
        self.vertex_type
    }
    pub fn parallelism(&self) -> u32 {
        self.parallelism
    }
    pub fn execution_vertices(&self) -> &Vec<ExecutionVertex> {
        &self.execution_vertices
    }

    pub fn is_source_vertex(&self) -> bool {
        self.vertex_type == VertexType::Source
    }

    pub fn is_transformation_vertex(&self) -> bool {
        self.vertex_type == VertexType::Process
    }

    pub fn is_sink_vertex(&self) -> bool {
        self.vertex_type == VertexType::Sink
    }

    /// instances taking part in the wiring
    fn live_vertices(&self) -> impl Iterator<Item = &ExecutionVertex> {
        self.execution_vertices.iter().filter(|v| !v.is_to_delete())
    }
}

#[derive(Copy, Clone, Serialize, Deserialize, Debug, PartialEq, Eq)]
pub struct ExecutionEdge {
    pub source_id: ExecutionVertexId,
    pub target_id: ExecutionVertexId,
    pub partition: Partition,
}

/// Physical plan of a job.
#[derive(Clone, Debug)]
pub struct ExecutionGraph {
    job_name: String,
    job_config: Properties,
    /// key: job vertex id
    execution_job_vertices: BTreeMap<JobVertexId, ExecutionJobVertex>,
    node_indies: HashMap<ExecutionVertexId, NodeIndex>,
    dag: Dag<ExecutionVertexId, ExecutionEdge>,
    max_parallelism: u32,
    build_time: u64,
    /// next unused vertex id, ids are never reused
    next_vertex_id: u32,
}

/// Expand every job vertex into `parallelism` execution vertices and every job
/// edge into a full bipartite wiring.
///
/// `parallelism` overrides the declared parallelism of the named job vertices.
pub fn build_execution_graph(
    job_graph: &JobGraph,
    parallelism: &HashMap<JobVertexId, u32>,
    job_config: &Properties,
) -> Result<ExecutionGraph> {
    let resolved = resolve_parallelism(job_graph, parallelism)?;

    let mut execution_graph = ExecutionGraph::new(job_graph.job_name(), job_config.clone());
    for job_vertex in job_graph.vertices() {
        let p = resolved[&job_vertex.id()];

        let mut execution_vertices = Vec::with_capacity(p as usize);
        for index in 0..p {
            let id = execution_graph.gen_vertex_id();
            execution_vertices.push(ExecutionVertex::new(
                id,
                job_vertex.id(),
                index,
                p,
                job_vertex.vertex_type(),
                job_vertex.operator().name.as_str(),
            ));
        }

        execution_graph.execution_job_vertices.insert(
            job_vertex.id(),
            ExecutionJobVertex {
                job_vertex_id: job_vertex.id(),
                operator: job_vertex.operator().clone(),
                vertex_type: job_vertex.vertex_type(),
                parallelism: p,
                execution_vertices,
            },
        );
    }

    execution_graph.build_edges(job_graph)?;
    info!(
        "ExecutionGraph built, job={}, vertices={}, edges={}, max_parallelism={}",
        execution_graph.job_name,
        execution_graph.vertex_count(),
        execution_graph.edge_count(),
        execution_graph.max_parallelism
    );

    Ok(execution_graph)
}

/// Rebuild `previous` with new parallelism, keeping the identity (id, status,
/// worker state, slot and actor) of every unaffected instance.
///
/// New instances are marked `ToAdd`, instances beyond the new parallelism
/// `ToDelete`, and surviving instances whose neighbours changed are marked
/// `ToAddRelated` / `ToDeleteRelated`.
pub fn rebuild_execution_graph(
    previous: &ExecutionGraph,
    job_graph: &JobGraph,
    parallelism: &HashMap<JobVertexId, u32>,
    job_config: &Properties,
) -> Result<ExecutionGraph> {
    let resolved = resolve_parallelism(job_graph, parallelism)?;

    if job_graph.vertex_count() != previous.execution_job_vertices.len()
        || job_graph
            .vertices()
            .iter()
            .any(|v| !previous.execution_job_vertices.contains_key(&v.id()))
    {
        return Err(MasterError::GraphConstruction(
            "the job vertices differ from the running execution graph".to_string(),
        ));
    }

    let mut execution_graph = ExecutionGraph::new(job_graph.job_name(), job_config.clone());
    execution_graph.next_vertex_id = previous.next_vertex_id;

    let mut deleted_ids = HashSet::new();
    for job_vertex in job_graph.vertices() {
        let p = resolved[&job_vertex.id()];
        let previous_job_vertex = &previous.execution_job_vertices[&job_vertex.id()];

        let mut execution_vertices = Vec::with_capacity(p as usize);
        let mut live_count = 0;
        for vertex in &previous_job_vertex.execution_vertices {
            let mut vertex = vertex.clone();
            if vertex.is_to_delete() {
                // still waiting for destruction from an earlier rescale
                execution_vertices.push(vertex);
                continue;
            }

            live_count += 1;
            if vertex.index < p {
                vertex.parallelism = p;
            } else {
                vertex.status = ExecutionVertexStatus::ToDelete;
                deleted_ids.insert(vertex.id);
            }
            execution_vertices.push(vertex);
        }

        for index in live_count..p {
            let id = execution_graph.gen_vertex_id();
            execution_vertices.push(ExecutionVertex::new(
                id,
                job_vertex.id(),
                index,
                p,
                job_vertex.vertex_type(),
                job_vertex.operator().name.as_str(),
            ));
        }

        execution_graph.execution_job_vertices.insert(
            job_vertex.id(),
            ExecutionJobVertex {
                job_vertex_id: job_vertex.id(),
                operator: job_vertex.operator().clone(),
                vertex_type: job_vertex.vertex_type(),
                parallelism: p,
                execution_vertices,
            },
        );
    }

    execution_graph.build_edges(job_graph)?;
    execution_graph.mark_related(previous, &deleted_ids);

    info!(
        "ExecutionGraph rebuilt, job={}, vertices={}, to_add={}, to_delete={}",
        execution_graph.job_name,
        execution_graph.vertex_count(),
        execution_graph.get_all_added_execution_vertices().len(),
        execution_graph.get_all_deleted_execution_vertices().len(),
    );

    Ok(execution_graph)
}

fn resolve_parallelism(
    job_graph: &JobGraph,
    parallelism: &HashMap<JobVertexId, u32>,
) -> Result<HashMap<JobVertexId, u32>> {
    for (job_vertex_id, p) in parallelism {
        if !job_graph.contains_vertex(job_vertex_id) {
            return Err(MasterError::GraphConstruction(format!(
                "parallelism given for unknown job vertex {}",
                job_vertex_id
            )));
        }
        if *p == 0 {
            return Err(MasterError::GraphConstruction(format!(
                "job vertex {} has zero parallelism",
                job_vertex_id
            )));
        }
    }

    Ok(job_graph
        .vertices()
        .iter()
        .map(|v| {
            let p = parallelism.get(&v.id()).copied().unwrap_or(v.parallelism());
            (v.id(), p)
        })
        .collect())
}

impl ExecutionGraph {
    fn new(job_name: &str, job_config: Properties) -> Self {
        ExecutionGraph {
            job_name: job_name.to_string(),
            job_config,
            execution_job_vertices: BTreeMap::new(),
            node_indies: HashMap::new(),
            dag: Dag::new(),
            max_parallelism: 0,
            build_time: current_timestamp_millis(),
            next_vertex_id: 1,
        }
    }

    fn gen_vertex_id(&mut self) -> ExecutionVertexId {
        let id = ExecutionVertexId(self.next_vertex_id);
        self.next_vertex_id += 1;
        id
    }

    fn build_edges(&mut self, job_graph: &JobGraph) -> Result<()> {
        for execution_job_vertex in self.execution_job_vertices.values() {
            for vertex in execution_job_vertex.live_vertices() {
                let node_index = self.dag.add_node(vertex.id);
                self.node_indies.insert(vertex.id, node_index);
            }
        }

        for job_edge in job_graph.edges() {
            let partition = Partition::from(job_edge.partition_strategy());
            let source = self.live_vertex_ids(&job_edge.source_id());
            let target = self.live_vertex_ids(&job_edge.target_id());

            // build cartesian product execution edge
            for source_id in &source {
                for target_id in &target {
                    let edge = ExecutionEdge {
                        source_id: *source_id,
                        target_id: *target_id,
                        partition,
                    };
                    self.dag
                        .add_edge(
                            self.node_indies[source_id],
                            self.node_indies[target_id],
                            edge,
                        )
                        .map_err(|_e| {
                            MasterError::GraphConstruction(format!(
                                "execution edge {}->{} would cycle",
                                source_id, target_id
                            ))
                        })?;
                }
            }
        }

        self.max_parallelism = self
            .execution_job_vertices
            .values()
            .map(|v| v.parallelism)
            .max()
            .unwrap_or(0);

        Ok(())
    }

    fn live_vertex_ids(&self, job_vertex_id: &JobVertexId) -> Vec<ExecutionVertexId> {
        self.execution_job_vertices
            .get(job_vertex_id)
            .map(|v| v.live_vertices().map(|v| v.id).collect())
            .unwrap_or_default()
    }

    fn mark_related(
        &mut self,
        previous: &ExecutionGraph,
        deleted_ids: &HashSet<ExecutionVertexId>,
    ) {
        let added_ids: HashSet<ExecutionVertexId> = self
            .get_all_added_execution_vertices()
            .iter()
            .map(|v| v.id)
            .collect();

        let mut add_related = HashSet::new();
        let mut delete_related = HashSet::new();
        for vertex in self.get_all_execution_vertices() {
            if vertex.is_to_add() || vertex.is_to_delete() {
                continue;
            }

            let wired_to_added = self
                .neighbour_ids(&vertex.id)
                .iter()
                .any(|id| added_ids.contains(id));
            let wired_to_deleted = previous
                .neighbour_ids(&vertex.id)
                .iter()
                .any(|id| deleted_ids.contains(id));

            if wired_to_added {
                add_related.insert(vertex.id);
            } else if wired_to_deleted {
                delete_related.insert(vertex.id);
            }
        }

        for vertex in self.vertices_mut() {
            if add_related.contains(&vertex.id) {
                vertex.status = ExecutionVertexStatus::ToAddRelated;
            } else if delete_related.contains(&vertex.id) {
                vertex.status = ExecutionVertexStatus::ToDeleteRelated;
            }
        }
    }

    fn neighbour_ids(&self, id: &ExecutionVertexId) -> Vec<ExecutionVertexId> {
        let mut ids: Vec<ExecutionVertexId> =
            self.input_edges(id).iter().map(|e| e.source_id).collect();
        ids.extend(self.output_edges(id).iter().map(|e| e.target_id));
        ids
    }

    fn vertices_mut(&mut self) -> impl Iterator<Item = &mut ExecutionVertex> {
        self.execution_job_vertices
            .values_mut()
            .flat_map(|v| v.execution_vertices.iter_mut())
    }

    pub fn job_name(&self) -> &str {
        self.job_name.as_str()
    }

    pub fn job_config(&self) -> &Properties {
        &self.job_config
    }

    pub fn max_parallelism(&self) -> u32 {
        self.max_parallelism
    }

    pub fn build_time(&self) -> u64 {
        self.build_time
    }

    pub fn get_execution_job_vertices(&self) -> Vec<&ExecutionJobVertex> {
        self.execution_job_vertices.values().collect()
    }

    pub fn get_execution_job_vertex(
        &self,
        job_vertex_id: &JobVertexId,
    ) -> Option<&ExecutionJobVertex> {
        self.execution_job_vertices.get(job_vertex_id)
    }

    /// number of execution vertices, including the ones waiting for deletion
    pub fn vertex_count(&self) -> usize {
        self.execution_job_vertices
            .values()
            .map(|v| v.execution_vertices.len())
            .sum()
    }

    pub fn edge_count(&self) -> usize {
        self.dag.edge_count()
    }

    pub fn edges(&self) -> Vec<&ExecutionEdge> {
        self.dag.raw_edges().iter().map(|edge| &edge.weight).collect()
    }

    pub fn get_all_execution_vertices(&self) -> Vec<&ExecutionVertex> {
        self.execution_job_vertices
            .values()
            .flat_map(|v| v.execution_vertices.iter())
            .collect()
    }

    /// vertices whose status is `ToAdd`
    pub fn get_all_added_execution_vertices(&self) -> Vec<&ExecutionVertex> {
        self.filter_vertices(|v| v.is_to_add())
    }

    /// vertices whose status is `ToDelete`
    pub fn get_all_deleted_execution_vertices(&self) -> Vec<&ExecutionVertex> {
        self.filter_vertices(|v| v.is_to_delete())
    }

    /// vertices whose status is `ToAddRelated` or `ToDeleteRelated`
    pub fn get_all_related_execution_vertices(&self) -> Vec<&ExecutionVertex> {
        self.filter_vertices(|v| v.is_related())
    }

    fn filter_vertices<F>(&self, predicate: F) -> Vec<&ExecutionVertex>
    where
        F: Fn(&ExecutionVertex) -> bool,
    {
        self.execution_job_vertices
            .values()
            .flat_map(|v| v.execution_vertices.iter())
            .filter(|v| predicate(*v))
            .collect()
    }

    pub fn contains_vertex(&self, id: &ExecutionVertexId) -> bool {
        self.get_execution_vertex_by_id(id).is_ok()
    }

    pub fn get_execution_vertex_by_id(&self, id: &ExecutionVertexId) -> Result<&ExecutionVertex> {
        self.execution_job_vertices
            .values()
            .flat_map(|v| v.execution_vertices.iter())
            .find(|v| v.id.eq(id))
            .ok_or(MasterError::VertexNotFound(*id))
    }

    #[cfg(test)]
    pub(crate) fn get_execution_vertex_mut(
        &mut self,
        id: &ExecutionVertexId,
    ) -> Result<&mut ExecutionVertex> {
        self.vertices_mut()
            .find(|v| v.id.eq(id))
            .ok_or(MasterError::VertexNotFound(*id))
    }

    /// Mutable access to several vertices at once, in the order of `ids`.
    pub(crate) fn get_execution_vertices_mut(
        &mut self,
        ids: &[ExecutionVertexId],
    ) -> Result<Vec<&mut ExecutionVertex>> {
        if let Some(id) = ids.iter().find(|id| !self.contains_vertex(id)) {
            return Err(MasterError::VertexNotFound(*id));
        }

        let wanted: HashSet<ExecutionVertexId> = ids.iter().copied().collect();
        let mut vertices: Vec<&mut ExecutionVertex> = self
            .vertices_mut()
            .filter(|v| wanted.contains(&v.id))
            .collect();
        vertices.sort_by_key(|v| ids.iter().position(|id| v.id.eq(id)));

        Ok(vertices)
    }

    /// wirings ending at `id`
    pub fn input_edges(&self, id: &ExecutionVertexId) -> Vec<&ExecutionEdge> {
        match self.node_indies.get(id) {
            Some(node_index) => self
                .dag
                .parents(*node_index)
                .iter(&self.dag)
                .map(|(edge, _node)| &self.dag[edge])
                .collect(),
            None => Vec::new(),
        }
    }

    /// wirings starting at `id`
    pub fn output_edges(&self, id: &ExecutionVertexId) -> Vec<&ExecutionEdge> {
        match self.node_indies.get(id) {
            Some(node_index) => self
                .dag
                .children(*node_index)
                .iter(&self.dag)
                .map(|(edge, _node)| &self.dag[edge])
                .collect(),
            None => Vec::new(),
        }
    }

    pub fn get_all_actors(&self) -> Vec<ActorHandle> {
        self.get_actors_from_job_vertices(|_| true)
    }

    pub fn get_source_actors(&self) -> Vec<ActorHandle> {
        self.get_actors_from_job_vertices(|v| v.is_source_vertex())
    }

    /// transformation and sink actors
    pub fn get_non_source_actors(&self) -> Vec<ActorHandle> {
        self.get_actors_from_job_vertices(|v| v.is_transformation_vertex() || v.is_sink_vertex())
    }

    pub fn get_sink_actors(&self) -> Vec<ActorHandle> {
        self.get_actors_from_job_vertices(|v| v.is_sink_vertex())
    }

    fn get_actors_from_job_vertices<F>(&self, predicate: F) -> Vec<ActorHandle>
    where
        F: Fn(&ExecutionJobVertex) -> bool,
    {
        self.execution_job_vertices
            .values()
            .filter(|v| predicate(*v))
            .flat_map(|v| v.execution_vertices.iter())
            .filter_map(|v| v.worker_actor.clone())
            .collect()
    }

    /// Mark every added and related vertex as `Running`.
    pub(crate) fn mark_running(&mut self) {
        for vertex in self.vertices_mut() {
            match vertex.status {
                ExecutionVertexStatus::ToAdd
                | ExecutionVertexStatus::ToAddRelated
                | ExecutionVertexStatus::ToDeleteRelated => {
                    vertex.status = ExecutionVertexStatus::Running
                }
                _ => {}
            }
        }
    }

    /// Drop `ToDelete` vertices whose worker is gone. Returns the dropped vertices.
    pub(crate) fn remove_deleted_vertices(&mut self) -> Vec<ExecutionVertex> {
        let mut removed = Vec::new();
        for execution_job_vertex in self.execution_job_vertices.values_mut() {
            let (deleted, kept): (Vec<ExecutionVertex>, Vec<ExecutionVertex>) = execution_job_vertex
                .execution_vertices
                .drain(..)
                .partition(|v| v.is_to_delete() && !v.worker_state.is_live());
            execution_job_vertex.execution_vertices = kept;
            removed.extend(deleted);
        }

        removed
    }
}

impl std::fmt::Display for ExecutionGraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let job_vertices: Vec<String> = self
            .execution_job_vertices
            .values()
            .map(|v| {
                let ids: Vec<String> = v
                    .execution_vertices
                    .iter()
                    .map(|v| format!("{}:{:?}/{:?}", v.id, v.status, v.worker_state))
                    .collect();
                format!("{}({})[{}]", v.operator.name, v.vertex_type, ids.join(", "))
            })
            .collect();
        write!(
            f,
            "{}{{build_time={}, max_parallelism={}, edges={}, vertices=[{}]}}",
            self.job_name,
            timestamp_str(self.build_time),
            self.max_parallelism,
            self.edge_count(),
            job_vertices.join(", ")
        )
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use crate::api::properties::Properties;
    use crate::error::MasterError;
    use crate::graph::execution_graph::{
        build_execution_graph, rebuild_execution_graph, ExecutionVertexStatus, WorkerState,
    };
    use crate::graph::job_graph::{JobGraph, JobGraphBuilder};
    use crate::graph::partition::{Partition, PartitionStrategy};
    use crate::graph::{ExecutionVertexId, JobVertexId, OperatorDescriptor, VertexType};
    use crate::master::actor::ActorHandle;

    fn key_by_job_graph() -> JobGraph {
        JobGraphBuilder::new("key_by_job")
            .add_vertex(1, OperatorDescriptor::new("source"), 1)
            .add_vertex(2, OperatorDescriptor::new("key_by"), 1)
            .add_vertex(3, OperatorDescriptor::new("sink"), 2)
            .add_edge(1, 2, PartitionStrategy::KeyBy)
            .add_edge(2, 3, PartitionStrategy::Random)
            .build()
            .unwrap()
    }

    fn diamond_job_graph() -> JobGraph {
        JobGraphBuilder::new("diamond")
            .add_vertex(0, OperatorDescriptor::new("source_a"), 2)
            .add_vertex(1, OperatorDescriptor::new("source_b"), 1)
            .add_vertex(2, OperatorDescriptor::new("join"), 2)
            .add_vertex(3, OperatorDescriptor::new("sink_a"), 3)
            .add_vertex(4, OperatorDescriptor::new("sink_b"), 3)
            .add_edge(0, 2, PartitionStrategy::KeyBy)
            .add_edge(1, 2, PartitionStrategy::Broadcast)
            .add_edge(2, 3, PartitionStrategy::Random)
            .add_edge(2, 4, PartitionStrategy::Random)
            .build()
            .unwrap()
    }

    #[test]
    pub fn vertex_and_edge_count_test() {
        let job_graph = diamond_job_graph();
        let execution_graph =
            build_execution_graph(&job_graph, &HashMap::new(), &Properties::new()).unwrap();

        // 2 + 1 + 2 + 3 + 3
        assert_eq!(execution_graph.vertex_count(), 11);
        // 2*2 + 1*2 + 2*3 + 2*3
        assert_eq!(execution_graph.edge_count(), 18);
        assert_eq!(execution_graph.max_parallelism(), 3);

        let mut ids: Vec<ExecutionVertexId> = execution_graph
            .get_all_execution_vertices()
            .iter()
            .map(|v| v.id())
            .collect();
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), 11);

        for vertex in execution_graph.get_all_execution_vertices() {
            assert_eq!(vertex.status(), ExecutionVertexStatus::ToAdd);
            assert_eq!(vertex.worker_state(), WorkerState::Uncreated);
            assert!(vertex.index() < vertex.parallelism());
        }
        assert_eq!(execution_graph.get_all_added_execution_vertices().len(), 11);
    }

    #[test]
    pub fn parallelism_override_test() {
        let job_graph = diamond_job_graph();
        let mut parallelism = HashMap::new();
        parallelism.insert(JobVertexId(3), 1);
        parallelism.insert(JobVertexId(0), 4);

        let execution_graph =
            build_execution_graph(&job_graph, &parallelism, &Properties::new()).unwrap();
        assert_eq!(execution_graph.vertex_count(), 4 + 1 + 2 + 1 + 3);
        assert_eq!(execution_graph.edge_count(), 4 * 2 + 1 * 2 + 2 * 1 + 2 * 3);

        parallelism.insert(JobVertexId(2), 0);
        let zero = build_execution_graph(&job_graph, &parallelism, &Properties::new());
        assert!(matches!(zero, Err(MasterError::GraphConstruction(_))));

        let mut unknown = HashMap::new();
        unknown.insert(JobVertexId(99), 1);
        let unknown = build_execution_graph(&job_graph, &unknown, &Properties::new());
        assert!(matches!(unknown, Err(MasterError::GraphConstruction(_))));
    }

    #[test]
    pub fn vertex_type_test() {
        let execution_graph =
            build_execution_graph(&diamond_job_graph(), &HashMap::new(), &Properties::new())
                .unwrap();

        for execution_job_vertex in execution_graph.get_execution_job_vertices() {
            let expect = match *execution_job_vertex.job_vertex_id() {
                0 | 1 => VertexType::Source,
                2 => VertexType::Process,
                _ => VertexType::Sink,
            };
            assert_eq!(execution_job_vertex.vertex_type(), expect);
            for vertex in execution_job_vertex.execution_vertices() {
                assert_eq!(vertex.vertex_type(), expect);
            }
        }
    }

    #[test]
    pub fn key_by_wiring_test() {
        let job_graph = key_by_job_graph();
        assert_eq!(job_graph.vertex_count(), 3);
        assert_eq!(job_graph.edge_count(), 2);

        let execution_graph =
            build_execution_graph(&job_graph, &HashMap::new(), &Properties::new()).unwrap();
        assert_eq!(execution_graph.edge_count(), 3);

        let source = &execution_graph
            .get_execution_job_vertex(&JobVertexId(1))
            .unwrap()
            .execution_vertices()[0];
        let key_by = &execution_graph
            .get_execution_job_vertex(&JobVertexId(2))
            .unwrap()
            .execution_vertices()[0];

        let source_outputs = execution_graph.output_edges(&source.id());
        assert_eq!(source_outputs.len(), 1);
        assert_eq!(source_outputs[0].partition, Partition::Key);
        assert_eq!(source_outputs[0].target_id, key_by.id());

        let key_by_outputs = execution_graph.output_edges(&key_by.id());
        assert_eq!(key_by_outputs.len(), 2);
        assert!(key_by_outputs
            .iter()
            .all(|e| e.partition == Partition::RoundRobin));

        let sinks = execution_graph
            .get_execution_job_vertex(&JobVertexId(3))
            .unwrap();
        assert!(sinks.is_sink_vertex());
        for sink in sinks.execution_vertices() {
            let inputs = execution_graph.input_edges(&sink.id());
            assert_eq!(inputs.len(), 1);
            assert_eq!(inputs[0].source_id, key_by.id());
            assert!(execution_graph.output_edges(&sink.id()).is_empty());
        }
    }

    #[test]
    pub fn vertex_not_found_test() {
        let execution_graph =
            build_execution_graph(&key_by_job_graph(), &HashMap::new(), &Properties::new())
                .unwrap();

        let found = execution_graph
            .get_execution_vertex_by_id(&ExecutionVertexId(1))
            .unwrap();
        assert_eq!(found.id(), ExecutionVertexId(1));

        let missing = execution_graph.get_execution_vertex_by_id(&ExecutionVertexId(1000));
        assert!(matches!(
            missing,
            Err(MasterError::VertexNotFound(ExecutionVertexId(1000)))
        ));
    }

    #[test]
    pub fn actor_queries_test() {
        let mut execution_graph =
            build_execution_graph(&key_by_job_graph(), &HashMap::new(), &Properties::new())
                .unwrap();
        assert!(execution_graph.get_all_actors().is_empty());

        let ids: Vec<ExecutionVertexId> = execution_graph
            .get_all_execution_vertices()
            .iter()
            .map(|v| v.id())
            .collect();
        for vertex in execution_graph.get_execution_vertices_mut(&ids).unwrap() {
            let actor = ActorHandle::new(format!("actor-{}", vertex.id()));
            vertex.attach_actor(actor);
        }

        assert_eq!(execution_graph.get_all_actors().len(), 4);
        assert_eq!(execution_graph.get_source_actors().len(), 1);
        assert_eq!(execution_graph.get_non_source_actors().len(), 3);
        assert_eq!(execution_graph.get_sink_actors().len(), 2);
    }

    #[test]
    pub fn get_execution_vertices_mut_test() {
        let mut execution_graph =
            build_execution_graph(&key_by_job_graph(), &HashMap::new(), &Properties::new())
                .unwrap();

        let ids = vec![ExecutionVertexId(3), ExecutionVertexId(1)];
        let vertices = execution_graph.get_execution_vertices_mut(&ids).unwrap();
        let got: Vec<ExecutionVertexId> = vertices.iter().map(|v| v.id()).collect();
        assert_eq!(got, ids);

        let missing = execution_graph
            .get_execution_vertices_mut(&[ExecutionVertexId(1), ExecutionVertexId(77)]);
        assert!(matches!(
            missing,
            Err(MasterError::VertexNotFound(ExecutionVertexId(77)))
        ));
    }

    #[test]
    pub fn rebuild_scale_out_test() {
        let job_graph = JobGraphBuilder::new("scale")
            .add_vertex(1, OperatorDescriptor::new("source"), 1)
            .add_vertex(2, OperatorDescriptor::new("map"), 2)
            .add_vertex(3, OperatorDescriptor::new("sink"), 1)
            .add_edge(1, 2, PartitionStrategy::Random)
            .add_edge(2, 3, PartitionStrategy::Random)
            .build()
            .unwrap();

        let mut previous =
            build_execution_graph(&job_graph, &HashMap::new(), &Properties::new()).unwrap();
        previous.mark_running();
        let previous_ids: Vec<ExecutionVertexId> = previous
            .get_all_execution_vertices()
            .iter()
            .map(|v| v.id())
            .collect();

        let mut parallelism = HashMap::new();
        parallelism.insert(JobVertexId(2), 3);
        let rebuilt =
            rebuild_execution_graph(&previous, &job_graph, &parallelism, &Properties::new())
                .unwrap();

        let added = rebuilt.get_all_added_execution_vertices();
        assert_eq!(added.len(), 1);
        assert_eq!(added[0].job_vertex_id(), JobVertexId(2));
        assert_eq!(added[0].index(), 2);
        assert!(!previous_ids.contains(&added[0].id()));

        for id in &previous_ids {
            let vertex = rebuilt.get_execution_vertex_by_id(id).unwrap();
            assert!(!vertex.is_to_add());
        }

        // source and sink are wired to the new map instance
        let related: Vec<JobVertexId> = rebuilt
            .get_all_related_execution_vertices()
            .iter()
            .map(|v| v.job_vertex_id())
            .collect();
        assert_eq!(related.len(), 2);
        assert!(related.contains(&JobVertexId(1)));
        assert!(related.contains(&JobVertexId(3)));

        assert_eq!(rebuilt.vertex_count(), 5);
        assert_eq!(rebuilt.edge_count(), 6);
    }

    #[test]
    pub fn rebuild_scale_in_test() {
        let job_graph = JobGraphBuilder::new("scale")
            .add_vertex(1, OperatorDescriptor::new("source"), 1)
            .add_vertex(2, OperatorDescriptor::new("sink"), 3)
            .add_edge(1, 2, PartitionStrategy::KeyBy)
            .build()
            .unwrap();

        let mut previous =
            build_execution_graph(&job_graph, &HashMap::new(), &Properties::new()).unwrap();
        previous.mark_running();

        let mut parallelism = HashMap::new();
        parallelism.insert(JobVertexId(2), 1);
        let mut rebuilt =
            rebuild_execution_graph(&previous, &job_graph, &parallelism, &Properties::new())
                .unwrap();

        assert!(rebuilt.get_all_added_execution_vertices().is_empty());
        let deleted: Vec<u32> = rebuilt
            .get_all_deleted_execution_vertices()
            .iter()
            .map(|v| v.index())
            .collect();
        assert_eq!(deleted, vec![1, 2]);
        assert_eq!(rebuilt.edge_count(), 1);

        let related = rebuilt.get_all_related_execution_vertices();
        assert_eq!(related.len(), 1);
        assert_eq!(related[0].status(), ExecutionVertexStatus::ToDeleteRelated);

        // never created, nothing to destroy
        let removed = rebuilt.remove_deleted_vertices();
        assert_eq!(removed.len(), 2);
        assert_eq!(rebuilt.vertex_count(), 2);
        assert!(rebuilt.get_all_deleted_execution_vertices().is_empty());
    }

    #[test]
    pub fn rebuild_reject_topology_change_test() {
        let previous =
            build_execution_graph(&key_by_job_graph(), &HashMap::new(), &Properties::new())
                .unwrap();
        let other = JobGraphBuilder::new("other")
            .add_vertex(1, OperatorDescriptor::new("source"), 1)
            .build()
            .unwrap();

        let rebuilt =
            rebuild_execution_graph(&previous, &other, &HashMap::new(), &Properties::new());
        assert!(matches!(rebuilt, Err(MasterError::GraphConstruction(_))));
    }
}
