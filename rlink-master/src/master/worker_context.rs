use crate::api::properties::Properties;
use crate::error::Result;
use crate::graph::execution_graph::ExecutionGraph;
use crate::graph::partition::Partition;
use crate::graph::{ExecutionVertexId, JobVertexId, OperatorDescriptor, VertexType};
use crate::master::actor::ActorHandle;

/// One side of a wiring as seen by a worker.
#[derive(Clone, Serialize, Deserialize, Debug, PartialEq)]
pub struct ChannelDescriptor {
    pub peer_vertex_id: ExecutionVertexId,
    pub peer_actor: Option<ActorHandle>,
    pub partition: Partition,
}

/// Everything a worker needs to run its operator instance, sent on initialization.
#[derive(Clone, Serialize, Deserialize, Debug, PartialEq)]
pub struct JobWorkerContext {
    pub job_name: String,
    pub job_config: Properties,
    pub vertex_id: ExecutionVertexId,
    pub job_vertex_id: JobVertexId,
    pub vertex_type: VertexType,
    pub operator: OperatorDescriptor,
    pub index: u32,
    pub parallelism: u32,
    pub input_channels: Vec<ChannelDescriptor>,
    pub output_channels: Vec<ChannelDescriptor>,
}

impl JobWorkerContext {
    /// Context of `vertex_id` against the current wiring of `execution_graph`.
    pub fn build(execution_graph: &ExecutionGraph, vertex_id: &ExecutionVertexId) -> Result<Self> {
        let vertex = execution_graph.get_execution_vertex_by_id(vertex_id)?;
        let operator = execution_graph
            .get_execution_job_vertex(&vertex.job_vertex_id())
            .map(|x| x.operator().clone())
            .unwrap_or_else(|| OperatorDescriptor::new(vertex.operator_name()));

        let peer_actor = |peer_vertex_id: &ExecutionVertexId| {
            execution_graph
                .get_execution_vertex_by_id(peer_vertex_id)
                .ok()
                .and_then(|peer| peer.worker_actor().cloned())
        };

        let input_channels = execution_graph
            .input_edges(vertex_id)
            .iter()
            .map(|edge| ChannelDescriptor {
                peer_vertex_id: edge.source_id,
                peer_actor: peer_actor(&edge.source_id),
                partition: edge.partition,
            })
            .collect();
        let output_channels = execution_graph
            .output_edges(vertex_id)
            .iter()
            .map(|edge| ChannelDescriptor {
                peer_vertex_id: edge.target_id,
                peer_actor: peer_actor(&edge.target_id),
                partition: edge.partition,
            })
            .collect();

        Ok(JobWorkerContext {
            job_name: execution_graph.job_name().to_string(),
            job_config: execution_graph.job_config().clone(),
            vertex_id: vertex.id(),
            job_vertex_id: vertex.job_vertex_id(),
            vertex_type: vertex.vertex_type(),
            operator,
            index: vertex.index(),
            parallelism: vertex.parallelism(),
            input_channels,
            output_channels,
        })
    }

    pub fn to_json(&self) -> anyhow::Result<String> {
        serde_json::to_string(self).map_err(|e| anyhow!(e))
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use crate::api::properties::Properties;
    use crate::graph::job_graph::JobGraphBuilder;
    use crate::graph::partition::{Partition, PartitionStrategy};
    use crate::graph::{build_execution_graph, ExecutionVertexId, OperatorDescriptor, VertexType};
    use crate::master::worker_context::JobWorkerContext;

    #[test]
    pub fn build_worker_context_test() {
        let mut job_config = Properties::new();
        job_config.set_str("checkpoint.interval", "10s");

        let job_graph = JobGraphBuilder::new("ctx")
            .add_vertex(1, OperatorDescriptor::new("source"), 2)
            .add_vertex(2, OperatorDescriptor::new("sink"), 1)
            .add_edge(1, 2, PartitionStrategy::Broadcast)
            .build()
            .unwrap();
        let execution_graph =
            build_execution_graph(&job_graph, &HashMap::new(), &job_config).unwrap();

        // ids: source 1, 2; sink 3
        let context = JobWorkerContext::build(&execution_graph, &ExecutionVertexId(3)).unwrap();
        assert_eq!(context.job_name, "ctx");
        assert_eq!(context.vertex_type, VertexType::Sink);
        assert_eq!(context.parallelism, 1);
        assert_eq!(context.input_channels.len(), 2);
        assert!(context.output_channels.is_empty());
        assert!(context
            .input_channels
            .iter()
            .all(|x| x.partition == Partition::Broadcast && x.peer_actor.is_none()));
        assert_eq!(
            context.job_config.get_string("checkpoint.interval").unwrap(),
            "10s"
        );

        let json = context.to_json().unwrap();
        let decoded: JobWorkerContext = serde_json::from_str(json.as_str()).unwrap();
        assert_eq!(decoded, context);

        assert!(JobWorkerContext::build(&execution_graph, &ExecutionVertexId(30)).is_err());
    }
}
