//! Remote worker lifecycle.
//!
//! Every execution vertex owns at most one remote worker actor, driven through
//! `Uncreated -> Created -> Initialized -> Started`, `Destroyed` being absorbing.
//! The batch forms issue all member calls concurrently and apply the state
//! changes only after every call resolved, failures are reported per vertex.

use std::future::Future;
use std::sync::{Arc, Mutex};

use futures::future::join_all;
use tokio_util::sync::CancellationToken;

use crate::error::MasterError;
use crate::graph::{ExecutionVertex, ExecutionVertexId, WorkerState};
use crate::master::actor::{ActorHandle, ActorRuntime, Placement};
use crate::master::config::WorkerConfig;
use crate::master::worker_context::JobWorkerContext;

#[derive(Copy, Clone, Serialize, Deserialize, Debug, Eq, PartialEq, Hash)]
pub enum LifecycleOperation {
    Create,
    Init,
    Start,
    Destroy,
}

impl std::fmt::Display for LifecycleOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LifecycleOperation::Create => write!(f, "create"),
            LifecycleOperation::Init => write!(f, "init"),
            LifecycleOperation::Start => write!(f, "start"),
            LifecycleOperation::Destroy => write!(f, "destroy"),
        }
    }
}

#[derive(Clone, Serialize, Deserialize, Debug, Eq, PartialEq)]
pub struct LifecycleFailure {
    pub operation: LifecycleOperation,
    pub reason: String,
}

impl LifecycleFailure {
    pub fn new<T: Into<String>>(operation: LifecycleOperation, reason: T) -> Self {
        LifecycleFailure {
            operation,
            reason: reason.into(),
        }
    }
}

impl std::fmt::Display for LifecycleFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.operation, self.reason)
    }
}

pub type LifecycleResult<T> = std::result::Result<T, LifecycleFailure>;

#[derive(Clone, Debug)]
pub struct VertexOutcome {
    pub vertex_id: ExecutionVertexId,
    pub result: LifecycleResult<()>,
}

impl VertexOutcome {
    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }
}

/// Per-vertex outcome of a batch lifecycle operation.
#[derive(Clone, Debug)]
pub struct BatchResult {
    operation: LifecycleOperation,
    outcomes: Vec<VertexOutcome>,
}

impl BatchResult {
    pub(crate) fn new(operation: LifecycleOperation, outcomes: Vec<VertexOutcome>) -> Self {
        BatchResult {
            operation,
            outcomes,
        }
    }

    pub fn operation(&self) -> LifecycleOperation {
        self.operation
    }

    pub fn outcomes(&self) -> &Vec<VertexOutcome> {
        &self.outcomes
    }

    /// true only if every member succeeded, an empty batch is a success
    pub fn is_success(&self) -> bool {
        self.outcomes.iter().all(|x| x.is_success())
    }

    pub fn succeeded_vertex_ids(&self) -> Vec<ExecutionVertexId> {
        self.outcomes
            .iter()
            .filter(|x| x.is_success())
            .map(|x| x.vertex_id)
            .collect()
    }

    pub fn failed_vertex_ids(&self) -> Vec<ExecutionVertexId> {
        self.outcomes
            .iter()
            .filter(|x| !x.is_success())
            .map(|x| x.vertex_id)
            .collect()
    }

    pub fn failures(&self) -> Vec<(ExecutionVertexId, LifecycleFailure)> {
        self.outcomes
            .iter()
            .filter_map(|x| match &x.result {
                Ok(_) => None,
                Err(failure) => Some((x.vertex_id, failure.clone())),
            })
            .collect()
    }

    /// Append the outcomes of `other`, keeping this batch's operation.
    pub(crate) fn merge(mut self, other: BatchResult) -> Self {
        self.outcomes.extend(other.outcomes);
        self
    }

    /// `Err(RemoteLifecycle)` carrying every failed member, if any
    pub fn into_result(self) -> crate::error::Result<()> {
        if self.is_success() {
            Ok(())
        } else {
            Err(MasterError::RemoteLifecycle {
                failed: self.failures(),
            })
        }
    }
}

/// A remote call decided from the vertex state before anything is sent.
enum Plan<T> {
    Done,
    Reject(String),
    Call(T),
}

pub struct WorkerLifecycleController {
    actor_runtime: Arc<dyn ActorRuntime>,
    worker_config: WorkerConfig,
    /// token of the current control-loop operation, replaced once cancelled
    cancel_token: Mutex<CancellationToken>,
}

impl WorkerLifecycleController {
    pub fn new(actor_runtime: Arc<dyn ActorRuntime>, worker_config: WorkerConfig) -> Self {
        WorkerLifecycleController {
            actor_runtime,
            worker_config,
            cancel_token: Mutex::new(CancellationToken::new()),
        }
    }

    /// Resolve every outstanding create/init/start call as failed, until the
    /// next `renew_cancel_token`. Destroy calls are never cancelled.
    pub fn cancel(&self) {
        warn!("cancel all outstanding worker lifecycle calls");
        self.cancel_token().cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel_token().is_cancelled()
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel_token
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Start a new operation with a fresh token if the last one was cancelled.
    pub fn renew_cancel_token(&self) {
        let mut cancel_token = self.cancel_token.lock().unwrap_or_else(|e| e.into_inner());
        if cancel_token.is_cancelled() {
            debug!("renew the cancelled lifecycle token");
            *cancel_token = CancellationToken::new();
        }
    }

    async fn remote_call<T, F>(
        &self,
        operation: LifecycleOperation,
        cancellable: bool,
        call: F,
    ) -> LifecycleResult<T>
    where
        F: Future<Output = anyhow::Result<T>>,
    {
        let cancel_token = self.cancel_token();
        if cancellable && cancel_token.is_cancelled() {
            return Err(LifecycleFailure::new(operation, "cancelled"));
        }

        let timed_call = tokio::time::timeout(self.worker_config.call_timeout, call);
        let result = if cancellable {
            tokio::select! {
                _ = cancel_token.cancelled() => {
                    return Err(LifecycleFailure::new(operation, "cancelled"));
                }
                result = timed_call => result,
            }
        } else {
            timed_call.await
        };

        match result {
            Ok(Ok(t)) => Ok(t),
            Ok(Err(e)) => Err(LifecycleFailure::new(operation, e.to_string())),
            Err(_elapsed) => Err(LifecycleFailure::new(
                operation,
                format!(
                    "timeout after {}ms",
                    self.worker_config.call_timeout.as_millis()
                ),
            )),
        }
    }

    fn create_plan(vertex: &ExecutionVertex) -> Plan<Placement> {
        match vertex.worker_state() {
            WorkerState::Uncreated => match vertex.slot() {
                Some(slot) => Plan::Call(Placement {
                    vertex_id: vertex.id(),
                    job_vertex_id: vertex.job_vertex_id(),
                    operator_name: vertex.operator_name().to_string(),
                    index: vertex.index(),
                    slot: slot.clone(),
                }),
                None => Plan::Reject("no slot allocated".to_string()),
            },
            WorkerState::Created | WorkerState::Initialized | WorkerState::Started => Plan::Done,
            WorkerState::Destroyed => Plan::Reject("worker already destroyed".to_string()),
        }
    }

    fn init_plan(vertex: &ExecutionVertex) -> Plan<ActorHandle> {
        match (vertex.worker_state(), vertex.worker_actor()) {
            (WorkerState::Created, Some(actor))
            | (WorkerState::Initialized, Some(actor))
            | (WorkerState::Started, Some(actor)) => Plan::Call(actor.clone()),
            (state, _) => Plan::Reject(format!("can not init a worker in state {:?}", state)),
        }
    }

    fn start_plan(vertex: &ExecutionVertex) -> Plan<ActorHandle> {
        match (vertex.worker_state(), vertex.worker_actor()) {
            (WorkerState::Initialized, Some(actor)) => Plan::Call(actor.clone()),
            (WorkerState::Started, _) => Plan::Done,
            (state, _) => Plan::Reject(format!("can not start a worker in state {:?}", state)),
        }
    }

    fn destroy_plan(vertex: &ExecutionVertex) -> Plan<ActorHandle> {
        match vertex.worker_state() {
            WorkerState::Uncreated | WorkerState::Destroyed => Plan::Done,
            _ => match vertex.worker_actor() {
                Some(actor) => Plan::Call(actor.clone()),
                // nothing left to call, the worker is gone for us
                None => Plan::Done,
            },
        }
    }

    async fn call_create(&self, plan: Plan<Placement>) -> LifecycleResult<Option<ActorHandle>> {
        match plan {
            Plan::Done => Ok(None),
            Plan::Reject(reason) => Err(LifecycleFailure::new(LifecycleOperation::Create, reason)),
            Plan::Call(placement) => self
                .remote_call(
                    LifecycleOperation::Create,
                    true,
                    self.actor_runtime.create_actor(&placement),
                )
                .await
                .map(Some),
        }
    }

    async fn call_init(
        &self,
        plan: Plan<ActorHandle>,
        context: &JobWorkerContext,
    ) -> LifecycleResult<()> {
        match plan {
            Plan::Done => Ok(()),
            Plan::Reject(reason) => Err(LifecycleFailure::new(LifecycleOperation::Init, reason)),
            Plan::Call(actor) => {
                self.remote_call(
                    LifecycleOperation::Init,
                    true,
                    self.actor_runtime.send_init(&actor, context),
                )
                .await
            }
        }
    }

    async fn call_start(&self, plan: Plan<ActorHandle>) -> LifecycleResult<()> {
        match plan {
            Plan::Done => Ok(()),
            Plan::Reject(reason) => Err(LifecycleFailure::new(LifecycleOperation::Start, reason)),
            Plan::Call(actor) => {
                self.remote_call(
                    LifecycleOperation::Start,
                    true,
                    self.actor_runtime.send_start(&actor),
                )
                .await
            }
        }
    }

    async fn call_destroy(&self, plan: Plan<ActorHandle>) -> LifecycleResult<()> {
        let actor = match plan {
            Plan::Call(actor) => actor,
            Plan::Done => return Ok(()),
            Plan::Reject(reason) => {
                return Err(LifecycleFailure::new(LifecycleOperation::Destroy, reason))
            }
        };

        let mut attempt = 0;
        loop {
            let result = self
                .remote_call(
                    LifecycleOperation::Destroy,
                    false,
                    self.actor_runtime.destroy_actor(&actor),
                )
                .await;
            match result {
                Ok(_) => return Ok(()),
                Err(failure) => {
                    if attempt >= self.worker_config.destroy_retry_times {
                        error!("destroy actor {} failed, give up. {}", actor, failure);
                        return Err(failure);
                    }

                    attempt += 1;
                    warn!(
                        "destroy actor {} failed, retry {}/{}. {}",
                        actor, attempt, self.worker_config.destroy_retry_times, failure
                    );
                    tokio::time::sleep(self.worker_config.retry_interval).await;
                }
            }
        }
    }

    fn apply_create(
        vertex: &mut ExecutionVertex,
        result: LifecycleResult<Option<ActorHandle>>,
    ) -> LifecycleResult<()> {
        match result {
            Ok(Some(actor)) => {
                vertex.attach_actor(actor);
                vertex.set_worker_state(WorkerState::Created);
                Ok(())
            }
            Ok(None) => Ok(()),
            Err(failure) => Err(failure),
        }
    }

    fn apply_init(
        vertex: &mut ExecutionVertex,
        result: LifecycleResult<()>,
    ) -> LifecycleResult<()> {
        if result.is_ok() && vertex.worker_state() == WorkerState::Created {
            vertex.set_worker_state(WorkerState::Initialized);
        }
        result
    }

    fn apply_start(
        vertex: &mut ExecutionVertex,
        result: LifecycleResult<()>,
    ) -> LifecycleResult<()> {
        if result.is_ok() {
            vertex.set_worker_state(WorkerState::Started);
        }
        result
    }

    fn apply_destroy(
        vertex: &mut ExecutionVertex,
        result: LifecycleResult<()>,
    ) -> LifecycleResult<()> {
        if result.is_ok() && vertex.worker_state() != WorkerState::Uncreated {
            vertex.detach_actor();
            vertex.set_worker_state(WorkerState::Destroyed);
        }
        result
    }

    pub async fn create_worker(&self, vertex: &mut ExecutionVertex) -> LifecycleResult<()> {
        let result = self.call_create(Self::create_plan(vertex)).await;
        Self::apply_create(vertex, result)
    }

    pub async fn init_worker(
        &self,
        vertex: &mut ExecutionVertex,
        context: &JobWorkerContext,
    ) -> LifecycleResult<()> {
        let result = self.call_init(Self::init_plan(vertex), context).await;
        Self::apply_init(vertex, result)
    }

    pub async fn start_worker(&self, vertex: &mut ExecutionVertex) -> LifecycleResult<()> {
        let result = self.call_start(Self::start_plan(vertex)).await;
        Self::apply_start(vertex, result)
    }

    /// Destroying an uncreated or already destroyed worker is a no-op.
    pub async fn destroy_worker(&self, vertex: &mut ExecutionVertex) -> LifecycleResult<()> {
        let result = self.call_destroy(Self::destroy_plan(vertex)).await;
        Self::apply_destroy(vertex, result)
    }

    pub async fn create_workers(&self, vertices: Vec<&mut ExecutionVertex>) -> BatchResult {
        let plans: Vec<Plan<Placement>> = vertices.iter().map(|v| Self::create_plan(v)).collect();
        let results = join_all(plans.into_iter().map(|plan| self.call_create(plan))).await;

        let outcomes = vertices
            .into_iter()
            .zip(results)
            .map(|(vertex, result)| VertexOutcome {
                vertex_id: vertex.id(),
                result: Self::apply_create(vertex, result),
            })
            .collect();
        Self::log_batch(BatchResult::new(LifecycleOperation::Create, outcomes))
    }

    pub async fn init_workers(
        &self,
        vertices: Vec<(&mut ExecutionVertex, JobWorkerContext)>,
    ) -> BatchResult {
        let results = join_all(
            vertices
                .iter()
                .map(|(vertex, context)| self.call_init(Self::init_plan(vertex), context)),
        )
        .await;

        let outcomes = vertices
            .into_iter()
            .zip(results)
            .map(|((vertex, _context), result)| VertexOutcome {
                vertex_id: vertex.id(),
                result: Self::apply_init(vertex, result),
            })
            .collect();
        Self::log_batch(BatchResult::new(LifecycleOperation::Init, outcomes))
    }

    pub async fn start_workers(&self, vertices: Vec<&mut ExecutionVertex>) -> BatchResult {
        let plans: Vec<Plan<ActorHandle>> = vertices.iter().map(|v| Self::start_plan(v)).collect();
        let results = join_all(plans.into_iter().map(|plan| self.call_start(plan))).await;

        let outcomes = vertices
            .into_iter()
            .zip(results)
            .map(|(vertex, result)| VertexOutcome {
                vertex_id: vertex.id(),
                result: Self::apply_start(vertex, result),
            })
            .collect();
        Self::log_batch(BatchResult::new(LifecycleOperation::Start, outcomes))
    }

    pub async fn destroy_workers(&self, vertices: Vec<&mut ExecutionVertex>) -> BatchResult {
        let plans: Vec<Plan<ActorHandle>> =
            vertices.iter().map(|v| Self::destroy_plan(v)).collect();
        let results = join_all(plans.into_iter().map(|plan| self.call_destroy(plan))).await;

        let outcomes = vertices
            .into_iter()
            .zip(results)
            .map(|(vertex, result)| VertexOutcome {
                vertex_id: vertex.id(),
                result: Self::apply_destroy(vertex, result),
            })
            .collect();
        Self::log_batch(BatchResult::new(LifecycleOperation::Destroy, outcomes))
    }

    /// Destroy every worker still holding cluster resources.
    pub async fn destroy_non_terminal(&self, vertices: Vec<&mut ExecutionVertex>) -> BatchResult {
        let live = vertices
            .into_iter()
            .filter(|v| v.worker_state().is_live())
            .collect();
        self.destroy_workers(live).await
    }

    fn log_batch(batch_result: BatchResult) -> BatchResult {
        if batch_result.is_success() {
            info!(
                "batch {} success on {} workers",
                batch_result.operation,
                batch_result.outcomes.len()
            );
        } else {
            let failures: Vec<String> = batch_result
                .failures()
                .iter()
                .map(|(vertex_id, failure)| format!("{}({})", vertex_id, failure))
                .collect();
            warn!(
                "batch {} failed on {}/{} workers: {}",
                batch_result.operation,
                failures.len(),
                batch_result.outcomes.len(),
                failures.join(", ")
            );
        }
        batch_result
    }
}
