use crate::graph::ExecutionVertexId;
use crate::master::controller::LifecycleFailure;
use crate::master::context::JobMasterRuntimeStatus;

pub type Result<T> = std::result::Result<T, MasterError>;

#[derive(thiserror::Error, Debug)]
pub enum MasterError {
    /// malformed job graph, rejected before any remote call is issued
    #[error("graph construction error: {0}")]
    GraphConstruction(String),

    #[error("resource exhausted, requested {requested} slots but {free} free")]
    ResourceExhausted { requested: usize, free: usize },

    /// per-vertex failures of a batch lifecycle operation
    #[error("remote lifecycle failure on {} vertices: {}", .failed.len(), fmt_failures(.failed))]
    RemoteLifecycle {
        failed: Vec<(ExecutionVertexId, LifecycleFailure)>,
    },

    /// the placement strategy chose slots the resources cannot hand out
    #[error("invalid placement: {0}")]
    InvalidPlacement(String),

    #[error("execution vertex {0} does not exist")]
    VertexNotFound(ExecutionVertexId),

    #[error("illegal status transition {from:?} -> {to:?}")]
    IllegalStatusTransition {
        from: JobMasterRuntimeStatus,
        to: JobMasterRuntimeStatus,
    },

    #[error("config error: {0}")]
    Config(#[from] anyhow::Error),
}

impl MasterError {
    pub fn is_recoverable(&self) -> bool {
        match self {
            MasterError::ResourceExhausted { .. } => true,
            MasterError::RemoteLifecycle { .. } => true,
            _ => false,
        }
    }
}

fn fmt_failures(failed: &[(ExecutionVertexId, LifecycleFailure)]) -> String {
    failed
        .iter()
        .map(|(vertex_id, failure)| format!("{}({})", vertex_id, failure))
        .collect::<Vec<String>>()
        .join(", ")
}
