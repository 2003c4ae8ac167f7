//! Job master control plane: scheduling, worker lifecycle and runtime state.

pub mod actor;
pub mod config;
pub mod context;
pub mod controller;
pub mod scheduler;
pub mod worker_context;

pub use actor::{ActorHandle, ActorRuntime, LocalActorRuntime, Placement};
pub use config::MasterConfig;
pub use context::{JobMasterRuntimeContext, JobMasterRuntimeStatus};
pub use controller::{BatchResult, LifecycleFailure, LifecycleOperation, WorkerLifecycleController};
pub use scheduler::JobScheduler;
pub use worker_context::JobWorkerContext;
