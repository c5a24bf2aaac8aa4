use std::time::SystemTime;
use uuid::Uuid;

/// Identity of one test run, handed to teardown and failover.
#[derive(Debug, Clone)]
pub struct RunContext {
    run_id: Uuid,
    cluster: String,
    started_at: SystemTime,
}

impl RunContext {
    pub fn new(cluster: impl Into<String>) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            cluster: cluster.into(),
            started_at: SystemTime::now(),
        }
    }

    /// For resuming against a run that started earlier.
    pub fn with_started_at(mut self, started_at: SystemTime) -> Self {
        self.started_at = started_at;
        self
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn cluster(&self) -> &str {
        &self.cluster
    }

    /// Coredumps older than this belong to someone else.
    pub fn started_at(&self) -> SystemTime {
        self.started_at
    }
}
