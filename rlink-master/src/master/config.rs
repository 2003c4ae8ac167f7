use std::convert::TryFrom;
use std::time::Duration;

use crate::api::properties::Properties;
use crate::error::Result;
use crate::resource::PlacementStrategyType;

pub const MASTER_RESOURCE: &str = "master.resource";
pub const MASTER_WORKER: &str = "master.worker";
pub const MASTER_SCHEDULER: &str = "master.scheduler";
pub const MASTER_JOB_NAME: &str = "master.job.name";

pub const NODE_COUNT: &str = "node_count";
pub const SLOTS_PER_NODE: &str = "slots_per_node";
pub const PLACEMENT: &str = "placement";
pub const CALL_TIMEOUT_MS: &str = "call_timeout_ms";
pub const DESTROY_RETRY_TIMES: &str = "destroy_retry_times";
pub const RETRY_INTERVAL_MS: &str = "retry_interval_ms";
pub const CREATE_RETRY_TIMES: &str = "create_retry_times";

#[derive(Clone, Debug, PartialEq)]
pub struct ResourceConfig {
    pub node_count: u32,
    pub slots_per_node: u32,
    pub placement: PlacementStrategyType,
}

impl Default for ResourceConfig {
    fn default() -> Self {
        ResourceConfig {
            node_count: 1,
            slots_per_node: 8,
            placement: PlacementStrategyType::Spread,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct WorkerConfig {
    /// upper bound of every single remote call
    pub call_timeout: Duration,
    pub destroy_retry_times: u32,
    pub retry_interval: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        WorkerConfig {
            call_timeout: Duration::from_millis(30000),
            destroy_retry_times: 3,
            retry_interval: Duration::from_millis(200),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct SchedulerConfig {
    /// retries of the failed subset of a batch create
    pub create_retry_times: u32,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        SchedulerConfig {
            create_retry_times: 2,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct MasterConfig {
    pub job_name: String,
    pub resource: ResourceConfig,
    pub worker: WorkerConfig,
    pub scheduler: SchedulerConfig,
}

impl Default for MasterConfig {
    fn default() -> Self {
        MasterConfig {
            job_name: "default-job".to_string(),
            resource: ResourceConfig::default(),
            worker: WorkerConfig::default(),
            scheduler: SchedulerConfig::default(),
        }
    }
}

impl MasterConfig {
    /// Absent keys take their default, malformed values are a config error.
    pub fn from_properties(properties: &Properties) -> Result<Self> {
        let default = MasterConfig::default();

        let resource_properties = properties.to_sub_properties(MASTER_RESOURCE);
        let placement = match resource_properties.get_string(PLACEMENT) {
            Ok(placement) => PlacementStrategyType::try_from(placement.as_str())?,
            Err(_e) => default.resource.placement,
        };
        let resource = ResourceConfig {
            node_count: resource_properties.get_u32_or(NODE_COUNT, default.resource.node_count)?,
            slots_per_node: resource_properties
                .get_u32_or(SLOTS_PER_NODE, default.resource.slots_per_node)?,
            placement,
        };

        let worker_properties = properties.to_sub_properties(MASTER_WORKER);
        let worker = WorkerConfig {
            call_timeout: worker_properties
                .get_duration_or(CALL_TIMEOUT_MS, default.worker.call_timeout)?,
            destroy_retry_times: worker_properties
                .get_u32_or(DESTROY_RETRY_TIMES, default.worker.destroy_retry_times)?,
            retry_interval: worker_properties
                .get_duration_or(RETRY_INTERVAL_MS, default.worker.retry_interval)?,
        };

        let scheduler_properties = properties.to_sub_properties(MASTER_SCHEDULER);
        let scheduler = SchedulerConfig {
            create_retry_times: scheduler_properties
                .get_u32_or(CREATE_RETRY_TIMES, default.scheduler.create_retry_times)?,
        };

        Ok(MasterConfig {
            job_name: properties.get_string_or(MASTER_JOB_NAME, default.job_name.as_str()),
            resource,
            worker,
            scheduler,
        })
    }
}

impl std::fmt::Display for MasterConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "job={}, nodes={}x{} slots, placement={}, call_timeout={}ms, \
             destroy_retry={}, create_retry={}",
            self.job_name,
            self.resource.node_count,
            self.resource.slots_per_node,
            self.resource.placement,
            self.worker.call_timeout.as_millis(),
            self.worker.destroy_retry_times,
            self.scheduler.create_retry_times
        )
    }
}
