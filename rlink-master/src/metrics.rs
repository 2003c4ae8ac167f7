//! Gauges of the job master, exported by whatever recorder the host installs.
//! Without a recorder every gauge is a no-op.

use ::metrics::{Gauge, Key, KeyName, Label};

pub const JOB_MASTER_STATUS: &str = "job_master_status";
pub const FREE_SLOTS: &str = "free_slots";
pub const EXECUTION_VERTICES: &str = "execution_vertices";

#[derive(Clone, Debug, Hash, Eq, PartialEq)]
pub struct Tag(pub(crate) String, pub(crate) String);

impl Tag {
    pub fn new<F, C>(field: F, context: C) -> Self
    where
        F: ToString,
        C: ToString,
    {
        Tag(field.to_string(), context.to_string())
    }
}

pub fn register_gauge<K>(name: K, tags: Vec<Tag>) -> Gauge
where
    K: ToString,
{
    let tags: Vec<Label> = tags.into_iter().map(|t| Label::new(t.0, t.1)).collect();

    let key = Key::from_parts(KeyName::from(name.to_string()), tags);

    if let Some(recorder) = ::metrics::try_recorder() {
        recorder.register_gauge(&key)
    } else {
        Gauge::noop()
    }
}

/// The gauges a runtime context keeps current.
#[derive(Clone)]
pub struct JobMasterGauges {
    pub status: Gauge,
    pub free_slots: Gauge,
    pub execution_vertices: Gauge,
}

impl JobMasterGauges {
    pub fn register(job_name: &str) -> Self {
        let tags = vec![Tag::new("job_name", job_name)];
        JobMasterGauges {
            status: register_gauge(JOB_MASTER_STATUS, tags.clone()),
            free_slots: register_gauge(FREE_SLOTS, tags.clone()),
            execution_vertices: register_gauge(EXECUTION_VERTICES, tags),
        }
    }
}
