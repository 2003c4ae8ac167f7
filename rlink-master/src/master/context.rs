use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use crate::error::MasterError;
use crate::graph::Graphs;
use crate::master::config::MasterConfig;
use crate::metrics::JobMasterGauges;
use crate::resource::Resources;

#[atomic_enum]
#[derive(Serialize, Deserialize, PartialEq)]
pub enum JobMasterRuntimeStatus {
    /// nothing submitted yet
    Init = 0,
    Submitting = 1,
    Scheduling = 2,
    Running = 3,
    Rescaling = 4,
    Stopping = 5,
    Stopped = 6,
    Failed = 7,
}

impl Default for JobMasterRuntimeStatus {
    fn default() -> Self {
        JobMasterRuntimeStatus::Init
    }
}

impl JobMasterRuntimeStatus {
    pub fn is_terminal(&self) -> bool {
        match self {
            JobMasterRuntimeStatus::Stopped | JobMasterRuntimeStatus::Failed => true,
            _ => false,
        }
    }

    pub fn can_transition_to(&self, to: JobMasterRuntimeStatus) -> bool {
        use JobMasterRuntimeStatus::*;

        if to == Failed {
            return !self.is_terminal();
        }

        match (*self, to) {
            (Init, Submitting) => true,
            (Submitting, Scheduling) => true,
            (Scheduling, Scheduling) => true,
            (Scheduling, Running) => true,
            (Running, Rescaling) => true,
            (Rescaling, Running) => true,
            (Scheduling, Stopping) | (Running, Stopping) | (Rescaling, Stopping) => true,
            (Stopping, Stopped) => true,
            _ => false,
        }
    }
}

impl std::fmt::Display for JobMasterRuntimeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobMasterRuntimeStatus::Init => write!(f, "INIT"),
            JobMasterRuntimeStatus::Submitting => write!(f, "SUBMITTING"),
            JobMasterRuntimeStatus::Scheduling => write!(f, "SCHEDULING"),
            JobMasterRuntimeStatus::Running => write!(f, "RUNNING"),
            JobMasterRuntimeStatus::Rescaling => write!(f, "RESCALING"),
            JobMasterRuntimeStatus::Stopping => write!(f, "STOPPING"),
            JobMasterRuntimeStatus::Stopped => write!(f, "STOPPED"),
            JobMasterRuntimeStatus::Failed => write!(f, "FAILED"),
        }
    }
}

/// Runtime state of one job master.
///
/// The `Graphs` are published as an immutable snapshot: readers clone the
/// `Arc` and never block the scheduler, a new snapshot replaces the old one
/// as a whole. Resources are mutated only under their mutex, control-loop
/// operations are serialised by `schedule_lock`.
pub struct JobMasterRuntimeContext {
    config: MasterConfig,
    graphs: RwLock<Option<Arc<Graphs>>>,
    graphs_version: AtomicU64,
    resources: Mutex<Resources>,
    status: AtomicJobMasterRuntimeStatus,
    schedule_lock: tokio::sync::Mutex<()>,
    gauges: JobMasterGauges,
}

impl JobMasterRuntimeContext {
    pub fn new(config: MasterConfig) -> Self {
        let resources = Resources::with_uniform_nodes(
            config.resource.node_count,
            config.resource.slots_per_node,
        );
        JobMasterRuntimeContext::with_resources(config, resources)
    }

    pub fn with_resources(config: MasterConfig, resources: Resources) -> Self {
        let gauges = JobMasterGauges::register(config.job_name.as_str());
        gauges.free_slots.set(resources.free_capacity() as f64);
        gauges.status.set(JobMasterRuntimeStatus::Init as u32 as f64);

        JobMasterRuntimeContext {
            config,
            graphs: RwLock::new(None),
            graphs_version: AtomicU64::new(0),
            resources: Mutex::new(resources),
            status: AtomicJobMasterRuntimeStatus::new(JobMasterRuntimeStatus::Init),
            schedule_lock: tokio::sync::Mutex::new(()),
            gauges,
        }
    }

    pub fn config(&self) -> &MasterConfig {
        &self.config
    }

    pub fn status(&self) -> JobMasterRuntimeStatus {
        self.status.load(Ordering::SeqCst)
    }

    /// Move to `to`, checked against the status state machine.
    ///
    /// Callers hold `schedule_lock`, so load and store do not race.
    pub fn transition(&self, to: JobMasterRuntimeStatus) -> crate::error::Result<()> {
        let from = self.status();
        if !from.can_transition_to(to) {
            return Err(MasterError::IllegalStatusTransition { from, to });
        }

        self.status.store(to, Ordering::SeqCst);
        self.gauges.status.set(to as u32 as f64);
        info!("job master status {} -> {}", from, to);

        Ok(())
    }

    pub fn graphs(&self) -> Option<Arc<Graphs>> {
        self.graphs
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Replace the published snapshot, returning its version.
    pub fn publish_graphs(&self, graphs: Graphs) -> u64 {
        let vertex_count = graphs.execution_graph().vertex_count();
        {
            let mut current = self.graphs.write().unwrap_or_else(|e| e.into_inner());
            *current = Some(Arc::new(graphs));
        }

        let version = self.graphs_version.fetch_add(1, Ordering::SeqCst) + 1;
        self.gauges.execution_vertices.set(vertex_count as f64);
        debug!("publish graphs version {}, {} execution vertices", version, vertex_count);

        version
    }

    pub fn graphs_version(&self) -> u64 {
        self.graphs_version.load(Ordering::SeqCst)
    }

    /// Run `f` with exclusive access to the resources.
    pub fn with_resources_mut<F, T>(&self, f: F) -> T
    where
        F: FnOnce(&mut Resources) -> T,
    {
        let mut resources = self.resources.lock().unwrap_or_else(|e| e.into_inner());
        let t = f(&mut resources);
        self.gauges.free_slots.set(resources.free_capacity() as f64);
        t
    }

    pub fn free_capacity(&self) -> usize {
        self.resources
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .free_capacity()
    }

    pub fn schedule_lock(&self) -> &tokio::sync::Mutex<()> {
        &self.schedule_lock
    }
}

impl std::fmt::Display for JobMasterRuntimeContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let resources = self
            .resources
            .lock()
            .map(|x| x.to_string())
            .unwrap_or_else(|e| e.into_inner().to_string());
        match self.graphs() {
            Some(graphs) => write!(
                f,
                "status={}, version={}, {}, graph={}",
                self.status(),
                self.graphs_version(),
                resources,
                graphs.execution_graph()
            ),
            None => write!(
                f,
                "status={}, version={}, {}, graph=None",
                self.status(),
                self.graphs_version(),
                resources
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use crate::api::properties::Properties;
    use crate::error::MasterError;
    use crate::graph::job_graph::JobGraphBuilder;
    use crate::graph::{build_execution_graph, Graphs, OperatorDescriptor};
    use crate::master::config::MasterConfig;
    use crate::master::context::{JobMasterRuntimeContext, JobMasterRuntimeStatus};
    use crate::resource::SpreadStrategy;

    #[test]
    pub fn status_transition_test() {
        use JobMasterRuntimeStatus::*;

        let context = JobMasterRuntimeContext::new(MasterConfig::default());
        assert_eq!(context.status(), Init);

        for to in vec![Submitting, Scheduling, Scheduling, Running, Rescaling, Running] {
            context.transition(to).unwrap();
            assert_eq!(context.status(), to);
        }

        let err = context.transition(Submitting).unwrap_err();
        assert!(matches!(
            err,
            MasterError::IllegalStatusTransition {
                from: Running,
                to: Submitting
            }
        ));

        context.transition(Stopping).unwrap();
        context.transition(Stopped).unwrap();
        assert!(context.transition(Failed).is_err());
        assert!(context.status().is_terminal());
    }

    #[test]
    pub fn failed_reachable_test() {
        use JobMasterRuntimeStatus::*;

        for from in vec![Init, Submitting, Scheduling, Running, Rescaling, Stopping] {
            assert!(from.can_transition_to(Failed), "{}", from);
        }
        assert!(!Failed.can_transition_to(Running));
        assert!(!Init.can_transition_to(Running));
        assert!(!Running.can_transition_to(Scheduling));
    }

    #[test]
    pub fn publish_graphs_test() {
        let context = JobMasterRuntimeContext::new(MasterConfig::default());
        assert!(context.graphs().is_none());
        assert_eq!(context.graphs_version(), 0);

        let job_graph = JobGraphBuilder::new("publish")
            .add_vertex(1, OperatorDescriptor::new("source"), 2)
            .build()
            .unwrap();
        let execution_graph =
            build_execution_graph(&job_graph, &HashMap::new(), &Properties::new()).unwrap();
        let graphs = Graphs::new(Arc::new(job_graph), execution_graph);

        assert_eq!(context.publish_graphs(graphs.clone()), 1);
        let snapshot = context.graphs().unwrap();
        assert_eq!(context.publish_graphs(graphs), 2);

        // an old snapshot stays readable after the swap
        assert_eq!(snapshot.execution_graph().vertex_count(), 2);
        assert!(!Arc::ptr_eq(&snapshot, &context.graphs().unwrap()));
        assert!(context.to_string().starts_with("status=INIT, version=2"));
    }

    #[test]
    pub fn resources_test() {
        let context = JobMasterRuntimeContext::new(MasterConfig::default());
        assert_eq!(context.free_capacity(), 8);

        let slots = context
            .with_resources_mut(|resources| resources.allocate(3, &SpreadStrategy))
            .unwrap();
        assert_eq!(context.free_capacity(), 5);

        context.with_resources_mut(|resources| resources.release_all(&slots));
        assert_eq!(context.free_capacity(), 8);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    pub async fn concurrent_resources_test() {
        let context = Arc::new(JobMasterRuntimeContext::new(MasterConfig::default()));
        let total = context.free_capacity();
        let held = Arc::new(AtomicUsize::new(0));

        let tasks: Vec<_> = (0..8usize)
            .map(|i| {
                let context = context.clone();
                let held = held.clone();
                tokio::spawn(async move {
                    for _ in 0..200 {
                        let slots = context.with_resources_mut(|resources| {
                            let slots = resources.allocate(1 + i % 3, &SpreadStrategy).ok();
                            if let Some(slots) = &slots {
                                held.fetch_add(slots.len(), Ordering::SeqCst);
                            }
                            assert_eq!(resources.allocated_capacity(), held.load(Ordering::SeqCst));
                            slots
                        });
                        tokio::task::yield_now().await;

                        if let Some(slots) = slots {
                            context.with_resources_mut(|resources| {
                                assert_eq!(resources.release_all(&slots), slots.len());
                                held.fetch_sub(slots.len(), Ordering::SeqCst);
                                assert_eq!(
                                    resources.free_capacity() + held.load(Ordering::SeqCst),
                                    total
                                );
                            });
                        }
                    }
                })
            })
            .collect();

        for result in futures::future::join_all(tasks).await {
            result.unwrap();
        }
        assert_eq!(held.load(Ordering::SeqCst), 0);
        assert_eq!(context.free_capacity(), total);
    }
}
