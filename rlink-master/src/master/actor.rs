use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;

use crate::graph::{ExecutionVertexId, JobVertexId};
use crate::master::worker_context::JobWorkerContext;
use crate::resource::Slot;

/// Address of a remote worker actor.
#[derive(Clone, Serialize, Deserialize, Debug, Eq, PartialEq, Hash)]
pub struct ActorHandle {
    address: String,
}

impl ActorHandle {
    pub fn new(address: String) -> Self {
        ActorHandle { address }
    }

    pub fn address(&self) -> &str {
        self.address.as_str()
    }
}

impl std::fmt::Display for ActorHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.address)
    }
}

/// Where and what to create for an execution vertex.
#[derive(Clone, Serialize, Deserialize, Debug, PartialEq)]
pub struct Placement {
    pub vertex_id: ExecutionVertexId,
    pub job_vertex_id: JobVertexId,
    pub operator_name: String,
    pub index: u32,
    pub slot: Slot,
}

/// The cluster execution layer creating and driving remote worker actors.
#[async_trait]
pub trait ActorRuntime: Send + Sync {
    async fn create_actor(&self, placement: &Placement) -> anyhow::Result<ActorHandle>;

    async fn send_init(&self, actor: &ActorHandle, context: &JobWorkerContext)
        -> anyhow::Result<()>;

    async fn send_start(&self, actor: &ActorHandle) -> anyhow::Result<()>;

    async fn destroy_actor(&self, actor: &ActorHandle) -> anyhow::Result<()>;
}

#[derive(Clone, Debug)]
pub struct LocalWorker {
    pub placement: Placement,
    pub context: Option<JobWorkerContext>,
    pub started: bool,
}

/// In-process actor runtime for the local cluster mode.
#[derive(Debug, Default)]
pub struct LocalActorRuntime {
    workers: DashMap<ActorHandle, LocalWorker>,
    actor_seq: AtomicU64,
}

impl LocalActorRuntime {
    pub fn new() -> Self {
        LocalActorRuntime {
            workers: DashMap::new(),
            actor_seq: AtomicU64::new(0),
        }
    }

    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    pub fn started_count(&self) -> usize {
        self.workers.iter().filter(|x| x.value().started).count()
    }

    pub fn worker(&self, actor: &ActorHandle) -> Option<LocalWorker> {
        self.workers.get(actor).map(|x| x.value().clone())
    }
}

#[async_trait]
impl ActorRuntime for LocalActorRuntime {
    async fn create_actor(&self, placement: &Placement) -> anyhow::Result<ActorHandle> {
        let seq = self.actor_seq.fetch_add(1, Ordering::SeqCst);
        let actor = ActorHandle::new(format!(
            "local://{}/{}-{}-{}",
            placement.slot, placement.operator_name, placement.index, seq
        ));

        self.workers.insert(
            actor.clone(),
            LocalWorker {
                placement: placement.clone(),
                context: None,
                started: false,
            },
        );
        debug!("create local actor {}", actor);

        Ok(actor)
    }

    async fn send_init(
        &self,
        actor: &ActorHandle,
        context: &JobWorkerContext,
    ) -> anyhow::Result<()> {
        let mut worker = self
            .workers
            .get_mut(actor)
            .ok_or_else(|| anyhow!("actor {} not found", actor))?;

        debug!("init local actor {} with context {}", actor, context.to_json()?);
        worker.context = Some(context.clone());

        Ok(())
    }

    async fn send_start(&self, actor: &ActorHandle) -> anyhow::Result<()> {
        let mut worker = self
            .workers
            .get_mut(actor)
            .ok_or_else(|| anyhow!("actor {} not found", actor))?;
        if worker.context.is_none() {
            return Err(anyhow!("actor {} started before init", actor));
        }

        worker.started = true;
        debug!("start local actor {}", actor);

        Ok(())
    }

    async fn destroy_actor(&self, actor: &ActorHandle) -> anyhow::Result<()> {
        self.workers
            .remove(actor)
            .map(|_| debug!("destroy local actor {}", actor))
            .ok_or_else(|| anyhow!("actor {} not found", actor))
    }
}

/// Scriptable actor runtime for lifecycle tests.
#[cfg(test)]
pub(crate) mod mock {
    use std::collections::{HashMap, HashSet};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    use crate::graph::ExecutionVertexId;
    use crate::master::actor::{ActorHandle, ActorRuntime, Placement};
    use crate::master::worker_context::JobWorkerContext;

    #[derive(Default)]
    pub(crate) struct MockActorRuntime {
        fail_create: Mutex<HashSet<ExecutionVertexId>>,
        fail_init: Mutex<HashSet<ExecutionVertexId>>,
        fail_start: Mutex<HashSet<ExecutionVertexId>>,
        /// remaining destroy failures per actor
        fail_destroy: Mutex<HashMap<ExecutionVertexId, usize>>,
        delay: Mutex<Option<Duration>>,

        actors: Mutex<HashMap<ActorHandle, ExecutionVertexId>>,
        inits: Mutex<Vec<ExecutionVertexId>>,
        /// last context acknowledged per vertex
        contexts: Mutex<HashMap<ExecutionVertexId, JobWorkerContext>>,

        pub create_calls: AtomicUsize,
        pub init_calls: AtomicUsize,
        pub start_calls: AtomicUsize,
        pub destroy_calls: AtomicUsize,
    }

    impl MockActorRuntime {
        pub fn new() -> Self {
            MockActorRuntime::default()
        }

        pub fn fail_create(&self, vertex_id: ExecutionVertexId) {
            self.fail_create.lock().unwrap().insert(vertex_id);
        }

        pub fn recover_create(&self, vertex_id: ExecutionVertexId) {
            self.fail_create.lock().unwrap().remove(&vertex_id);
        }

        pub fn fail_init(&self, vertex_id: ExecutionVertexId) {
            self.fail_init.lock().unwrap().insert(vertex_id);
        }

        pub fn fail_start(&self, vertex_id: ExecutionVertexId) {
            self.fail_start.lock().unwrap().insert(vertex_id);
        }

        pub fn fail_destroy(&self, vertex_id: ExecutionVertexId, times: usize) {
            self.fail_destroy.lock().unwrap().insert(vertex_id, times);
        }

        pub fn set_delay(&self, delay: Duration) {
            *self.delay.lock().unwrap() = Some(delay);
        }

        pub fn live_actors(&self) -> usize {
            self.actors.lock().unwrap().len()
        }

        pub fn init_vertices(&self) -> Vec<ExecutionVertexId> {
            self.inits.lock().unwrap().clone()
        }

        pub fn context_of(&self, vertex_id: ExecutionVertexId) -> Option<JobWorkerContext> {
            self.contexts.lock().unwrap().get(&vertex_id).cloned()
        }

        async fn maybe_delay(&self) {
            let delay = *self.delay.lock().unwrap();
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
        }

        fn vertex_of(&self, actor: &ActorHandle) -> anyhow::Result<ExecutionVertexId> {
            self.actors
                .lock()
                .unwrap()
                .get(actor)
                .copied()
                .ok_or_else(|| anyhow!("actor {} not found", actor))
        }
    }

    #[async_trait]
    impl ActorRuntime for MockActorRuntime {
        async fn create_actor(&self, placement: &Placement) -> anyhow::Result<ActorHandle> {
            self.create_calls.fetch_add(1, Ordering::SeqCst);
            self.maybe_delay().await;

            if self.fail_create.lock().unwrap().contains(&placement.vertex_id) {
                return Err(anyhow!("no capacity"));
            }

            let actor = ActorHandle::new(format!(
                "mock://{}/{}",
                placement.slot, placement.vertex_id
            ));
            self.actors
                .lock()
                .unwrap()
                .insert(actor.clone(), placement.vertex_id);
            Ok(actor)
        }

        async fn send_init(
            &self,
            actor: &ActorHandle,
            context: &JobWorkerContext,
        ) -> anyhow::Result<()> {
            self.init_calls.fetch_add(1, Ordering::SeqCst);
            self.maybe_delay().await;

            let vertex_id = self.vertex_of(actor)?;
            if self.fail_init.lock().unwrap().contains(&vertex_id) {
                return Err(anyhow!("init rejected"));
            }
            self.inits.lock().unwrap().push(vertex_id);
            self.contexts
                .lock()
                .unwrap()
                .insert(vertex_id, context.clone());
            Ok(())
        }

        async fn send_start(&self, actor: &ActorHandle) -> anyhow::Result<()> {
            self.start_calls.fetch_add(1, Ordering::SeqCst);
            self.maybe_delay().await;

            let vertex_id = self.vertex_of(actor)?;
            if self.fail_start.lock().unwrap().contains(&vertex_id) {
                return Err(anyhow!("start rejected"));
            }
            Ok(())
        }

        async fn destroy_actor(&self, actor: &ActorHandle) -> anyhow::Result<()> {
            self.destroy_calls.fetch_add(1, Ordering::SeqCst);

            let vertex_id = self.vertex_of(actor)?;
            {
                let mut fail_destroy = self.fail_destroy.lock().unwrap();
                if let Some(remaining) = fail_destroy.get_mut(&vertex_id) {
                    if *remaining > 0 {
                        *remaining -= 1;
                        return Err(anyhow!("destroy timeout"));
                    }
                }
            }

            self.actors.lock().unwrap().remove(actor);
            Ok(())
        }
    }
}
