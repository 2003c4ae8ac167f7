use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::error::{MasterError, Result};
use crate::graph::job_graph::JobGraph;
use crate::graph::{
    build_execution_graph, rebuild_execution_graph, ExecutionGraph, ExecutionVertex,
    ExecutionVertexId, Graphs, JobVertexId,
};
use crate::master::actor::ActorRuntime;
use crate::master::context::{JobMasterRuntimeContext, JobMasterRuntimeStatus};
use crate::master::controller::{BatchResult, LifecycleOperation, WorkerLifecycleController};
use crate::master::worker_context::JobWorkerContext;
use crate::resource::PlacementStrategy;

/// Drives a job from submission to shutdown.
///
/// Every operation takes the scheduling lock of the runtime context, works on
/// a private copy of the published `Graphs` and publishes the copy only when
/// the operation has succeeded.
pub struct JobScheduler {
    context: Arc<JobMasterRuntimeContext>,
    controller: WorkerLifecycleController,
    placement: Box<dyn PlacementStrategy>,
    /// workers a roll-back failed to destroy, each still holding its slot
    orphans: Mutex<Vec<ExecutionVertex>>,
}

impl JobScheduler {
    pub fn new(
        context: Arc<JobMasterRuntimeContext>,
        actor_runtime: Arc<dyn ActorRuntime>,
    ) -> Self {
        let controller =
            WorkerLifecycleController::new(actor_runtime, context.config().worker.clone());
        let placement = context.config().resource.placement.strategy();
        info!("create JobScheduler, {}", context.config());

        JobScheduler {
            context,
            controller,
            placement,
            orphans: Mutex::new(Vec::new()),
        }
    }

    pub fn context(&self) -> &Arc<JobMasterRuntimeContext> {
        &self.context
    }

    pub fn status(&self) -> JobMasterRuntimeStatus {
        self.context.status()
    }

    /// Abort the create/init/start calls in flight. The next operation runs
    /// with a fresh token, stop and fail still clean up.
    pub fn cancel(&self) {
        self.controller.cancel();
    }

    /// Number of workers left behind by a failed roll-back.
    pub fn orphan_count(&self) -> usize {
        self.orphans.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    fn current_graphs(&self) -> Result<Arc<Graphs>> {
        self.context
            .graphs()
            .ok_or_else(|| MasterError::GraphConstruction("no job submitted".to_string()))
    }

    /// Build and publish the execution graph of `job_graph`.
    pub async fn submit_job(
        &self,
        job_graph: JobGraph,
        parallelism: HashMap<JobVertexId, u32>,
    ) -> Result<()> {
        let _guard = self.context.schedule_lock().lock().await;
        self.context.transition(JobMasterRuntimeStatus::Submitting)?;
        info!("submit job {}", job_graph.job_name());
        debug!("job config:\n{}", job_graph.job_config().to_lines_string());

        let job_graph = Arc::new(job_graph);
        match build_execution_graph(&job_graph, &parallelism, job_graph.job_config()) {
            Ok(execution_graph) => {
                debug!("ExecutionGraph: {}", execution_graph);
                self.context
                    .publish_graphs(Graphs::new(job_graph, execution_graph));
                self.context.transition(JobMasterRuntimeStatus::Scheduling)
            }
            Err(e) => {
                error!("submit job {} failed. {}", job_graph.job_name(), e);
                self.context.transition(JobMasterRuntimeStatus::Failed)?;
                Err(e)
            }
        }
    }

    /// Place, create, initialize and start every added vertex.
    ///
    /// Failures leave the job in `Scheduling` with nothing allocated except
    /// the slots of orphaned workers, so the call can simply be repeated.
    pub async fn schedule(&self) -> Result<()> {
        let _guard = self.context.schedule_lock().lock().await;

        let status = self.context.status();
        if status != JobMasterRuntimeStatus::Scheduling {
            return Err(MasterError::IllegalStatusTransition {
                from: status,
                to: JobMasterRuntimeStatus::Running,
            });
        }
        self.context.transition(JobMasterRuntimeStatus::Scheduling)?;
        self.controller.renew_cancel_token();
        self.destroy_orphans().await;

        let mut graphs = self.current_graphs()?.as_ref().clone();
        let added = vertex_ids(graphs.execution_graph().get_all_added_execution_vertices());

        self.allocate_slots(graphs.execution_graph_mut(), &added)?;

        if let Err(e) = self.deploy(graphs.execution_graph_mut(), &added).await {
            error!("schedule failed, roll back {} vertices. {}", added.len(), e);
            return Err(self.roll_back(graphs.execution_graph_mut(), &added, e).await);
        }

        graphs.execution_graph_mut().mark_running();
        self.context.publish_graphs(graphs);
        self.context.transition(JobMasterRuntimeStatus::Running)
    }

    /// Change the parallelism of running job vertices.
    ///
    /// On failure the added workers are rolled back, related workers get
    /// their previous context back and the previous graphs stay published.
    pub async fn rescale(&self, parallelism: HashMap<JobVertexId, u32>) -> Result<()> {
        let _guard = self.context.schedule_lock().lock().await;
        self.context.transition(JobMasterRuntimeStatus::Rescaling)?;
        self.controller.renew_cancel_token();
        self.destroy_orphans().await;

        match self.rescale0(&parallelism).await {
            Ok(graphs) => {
                self.context.publish_graphs(graphs);
                self.context.transition(JobMasterRuntimeStatus::Running)
            }
            Err(e) => {
                error!("rescale failed, keep the previous graphs. {}", e);
                self.context.transition(JobMasterRuntimeStatus::Running)?;
                Err(e)
            }
        }
    }

    async fn rescale0(&self, parallelism: &HashMap<JobVertexId, u32>) -> Result<Graphs> {
        let previous = self.current_graphs()?;
        let job_graph = previous.job_graph().clone();
        let execution_graph = rebuild_execution_graph(
            previous.execution_graph(),
            &job_graph,
            parallelism,
            job_graph.job_config(),
        )?;
        let mut graphs = Graphs::new(job_graph, execution_graph);
        let execution_graph = graphs.execution_graph_mut();

        let added = vertex_ids(execution_graph.get_all_added_execution_vertices());
        let related = vertex_ids(execution_graph.get_all_related_execution_vertices());
        let deleted = vertex_ids(execution_graph.get_all_deleted_execution_vertices());
        info!(
            "rescale job {}, add {}, reinit {}, delete {}",
            execution_graph.job_name(),
            added.len(),
            related.len(),
            deleted.len()
        );

        self.allocate_slots(execution_graph, &added)?;
        if let Err(e) = self.deploy(execution_graph, &added).await {
            return Err(self.roll_back(execution_graph, &added, e).await);
        }

        // related workers learn the new wiring once every added worker runs
        let contexts = build_contexts(execution_graph, &related)?;
        let batch_result = self.init_workers(execution_graph, &related, contexts).await?;
        let reinitialized = batch_result.succeeded_vertex_ids();
        if let Err(e) = batch_result.into_result() {
            warn!("restore the context of {} related workers", reinitialized.len());
            let contexts = build_contexts(previous.execution_graph(), &reinitialized)?;
            let restored = self
                .init_workers(execution_graph, &reinitialized, contexts)
                .await?;
            let e = merge_failures(e, &restored);
            return Err(self.roll_back(execution_graph, &added, e).await);
        }

        let batch_result = self
            .controller
            .destroy_workers(execution_graph.get_execution_vertices_mut(&deleted)?)
            .await;
        if !batch_result.is_success() {
            warn!(
                "{} deleted workers not destroyed, retry on the next rescale or stop",
                batch_result.failed_vertex_ids().len()
            );
        }
        self.release_slots(execution_graph, &batch_result.succeeded_vertex_ids())?;

        execution_graph.remove_deleted_vertices();
        execution_graph.mark_running();

        Ok(graphs)
    }

    /// Destroy every worker, release every slot and stop.
    pub async fn stop(&self) -> Result<()> {
        let _guard = self.context.schedule_lock().lock().await;
        self.context.transition(JobMasterRuntimeStatus::Stopping)?;

        let batch_result = self.tear_down().await?;
        match batch_result.into_result() {
            Ok(_) => self.context.transition(JobMasterRuntimeStatus::Stopped),
            Err(e) => {
                error!("stop job failed, some workers may leak. {}", e);
                self.context.transition(JobMasterRuntimeStatus::Failed)?;
                Err(e)
            }
        }
    }

    /// Destroy every worker and mark the job failed.
    pub async fn fail(&self, reason: &str) -> Result<()> {
        let _guard = self.context.schedule_lock().lock().await;

        let status = self.context.status();
        if !status.can_transition_to(JobMasterRuntimeStatus::Failed) {
            return Err(MasterError::IllegalStatusTransition {
                from: status,
                to: JobMasterRuntimeStatus::Failed,
            });
        }

        error!("job master failed: {}", reason);
        let batch_result = self.tear_down().await?;
        if !batch_result.is_success() {
            error!(
                "{} workers not destroyed on failure",
                batch_result.failed_vertex_ids().len()
            );
        }
        self.context.transition(JobMasterRuntimeStatus::Failed)
    }

    async fn tear_down(&self) -> Result<BatchResult> {
        let orphan_result = self.destroy_orphans().await;
        let mut graphs = match self.context.graphs() {
            Some(graphs) => graphs.as_ref().clone(),
            None => return Ok(orphan_result),
        };

        let execution_graph = graphs.execution_graph_mut();
        let ids = vertex_ids(execution_graph.get_all_execution_vertices());
        let batch_result = self
            .controller
            .destroy_non_terminal(execution_graph.get_execution_vertices_mut(&ids)?)
            .await;

        let released = terminal_ids(execution_graph, &ids)?;
        self.release_slots(execution_graph, &released)?;

        self.context.publish_graphs(graphs);
        Ok(batch_result.merge(orphan_result))
    }

    /// Retry the destroy of orphaned workers, releasing the slot of each one
    /// destroyed.
    async fn destroy_orphans(&self) -> BatchResult {
        let mut orphans = {
            let mut orphans = self.orphans.lock().unwrap_or_else(|e| e.into_inner());
            std::mem::take(&mut *orphans)
        };
        if orphans.is_empty() {
            return BatchResult::new(LifecycleOperation::Destroy, Vec::new());
        }

        info!("destroy {} orphaned workers", orphans.len());
        let batch_result = self.controller.destroy_workers(orphans.iter_mut().collect()).await;

        let slots: Vec<_> = orphans
            .iter_mut()
            .filter(|v| !v.worker_state().is_live())
            .filter_map(|v| v.take_slot())
            .collect();
        self.context
            .with_resources_mut(|resources| resources.release_all(&slots));
        orphans.retain(|v| v.worker_state().is_live());

        self.orphans
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .extend(orphans);
        batch_result
    }

    fn allocate_slots(
        &self,
        execution_graph: &mut ExecutionGraph,
        ids: &[ExecutionVertexId],
    ) -> Result<()> {
        let slots = self.context.with_resources_mut(|resources| {
            resources.allocate(ids.len(), self.placement.as_ref())
        })?;

        for (vertex, slot) in execution_graph
            .get_execution_vertices_mut(ids)?
            .into_iter()
            .zip(slots)
        {
            vertex.set_slot(slot);
        }
        info!(
            "allocate {} slots by {}, {} free",
            ids.len(),
            self.placement.name(),
            self.context.free_capacity()
        );

        Ok(())
    }

    fn release_slots(
        &self,
        execution_graph: &mut ExecutionGraph,
        ids: &[ExecutionVertexId],
    ) -> Result<()> {
        let slots: Vec<_> = execution_graph
            .get_execution_vertices_mut(ids)?
            .into_iter()
            .filter_map(|v| v.take_slot())
            .collect();
        let released = self
            .context
            .with_resources_mut(|resources| resources.release_all(&slots));
        debug!("release {} slots", released);

        Ok(())
    }

    /// create `added` (retrying the failed subset), then init and start it
    async fn deploy(
        &self,
        execution_graph: &mut ExecutionGraph,
        added: &[ExecutionVertexId],
    ) -> Result<()> {
        let create_retry_times = self.context.config().scheduler.create_retry_times;
        let mut pending = added.to_vec();
        let mut attempt = 0;
        loop {
            let batch_result = self
                .controller
                .create_workers(execution_graph.get_execution_vertices_mut(&pending)?)
                .await;
            if batch_result.is_success() {
                break;
            }
            if attempt >= create_retry_times || self.controller.is_cancelled() {
                return batch_result.into_result();
            }

            attempt += 1;
            pending = batch_result.failed_vertex_ids();
            warn!(
                "create {} workers failed, retry {}/{}",
                pending.len(),
                attempt,
                create_retry_times
            );
            tokio::time::sleep(self.context.config().worker.retry_interval).await;
        }

        // contexts are built once every added worker exists, so peers are complete
        let contexts = build_contexts(execution_graph, added)?;
        self.init_workers(execution_graph, added, contexts)
            .await?
            .into_result()?;

        self.controller
            .start_workers(execution_graph.get_execution_vertices_mut(added)?)
            .await
            .into_result()
    }

    async fn init_workers(
        &self,
        execution_graph: &mut ExecutionGraph,
        ids: &[ExecutionVertexId],
        contexts: Vec<JobWorkerContext>,
    ) -> Result<BatchResult> {
        let members = execution_graph
            .get_execution_vertices_mut(ids)?
            .into_iter()
            .zip(contexts)
            .collect();
        Ok(self.controller.init_workers(members).await)
    }

    /// Destroy the workers of `ids` and release the slots of those destroyed.
    /// Workers that survive become orphans and their failures join `e`.
    async fn roll_back(
        &self,
        execution_graph: &mut ExecutionGraph,
        ids: &[ExecutionVertexId],
        e: MasterError,
    ) -> MasterError {
        match self.roll_back0(execution_graph, ids).await {
            Ok(batch_result) => merge_failures(e, &batch_result),
            Err(roll_back_error) => {
                error!("roll back failed. {}", roll_back_error);
                e
            }
        }
    }

    async fn roll_back0(
        &self,
        execution_graph: &mut ExecutionGraph,
        ids: &[ExecutionVertexId],
    ) -> Result<BatchResult> {
        let batch_result = self
            .controller
            .destroy_non_terminal(execution_graph.get_execution_vertices_mut(ids)?)
            .await;

        let released = terminal_ids(execution_graph, ids)?;
        self.release_slots(execution_graph, &released)?;

        let leaked = batch_result.failed_vertex_ids();
        if !leaked.is_empty() {
            error!("roll back leaves {} orphaned workers", leaked.len());
            let mut orphans = Vec::with_capacity(leaked.len());
            for id in &leaked {
                orphans.push(execution_graph.get_execution_vertex_by_id(id)?.clone());
            }
            self.orphans
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .extend(orphans);
        }

        Ok(batch_result)
    }
}

fn vertex_ids(vertices: Vec<&ExecutionVertex>) -> Vec<ExecutionVertexId> {
    vertices.iter().map(|v| v.id()).collect()
}

/// the vertices of `ids` no longer holding a worker
fn terminal_ids(
    execution_graph: &ExecutionGraph,
    ids: &[ExecutionVertexId],
) -> Result<Vec<ExecutionVertexId>> {
    let mut terminal = Vec::new();
    for id in ids {
        let vertex = execution_graph.get_execution_vertex_by_id(id)?;
        if !vertex.worker_state().is_live() {
            terminal.push(*id);
        }
    }
    Ok(terminal)
}

fn build_contexts(
    execution_graph: &ExecutionGraph,
    ids: &[ExecutionVertexId],
) -> Result<Vec<JobWorkerContext>> {
    ids.iter()
        .map(|id| JobWorkerContext::build(execution_graph, id))
        .collect()
}

/// Add the failures of `batch_result` to a lifecycle error.
fn merge_failures(e: MasterError, batch_result: &BatchResult) -> MasterError {
    if batch_result.is_success() {
        return e;
    }

    match e {
        MasterError::RemoteLifecycle { mut failed } => {
            failed.extend(batch_result.failures());
            MasterError::RemoteLifecycle { failed }
        }
        e => {
            error!(
                "{} also failed on {} workers",
                batch_result.operation(),
                batch_result.failed_vertex_ids().len()
            );
            e
        }
    }
}
