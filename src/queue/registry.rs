//! Job registry mapping job class strings to handlers and schedules.
//!
//! Each job class registers once at startup. When a worker claims a job,
//! it looks up the registration here and hands both to the wrapper.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Duration;

use super::wrapper::JobHandler;

/// Scheduling policy for a job class.
#[derive(Debug, Clone, Copy)]
pub struct Schedule {
    /// At most one handler body for a given `(class, args)` runs at a time.
    pub singleton: bool,
    /// For singletons, re-enqueue this long after each successful run.
    pub every: Option<Duration>,
}

impl Schedule {
    /// A plain job: claimed, run once, deleted.
    pub fn one_shot() -> Self {
        Self {
            singleton: false,
            every: None,
        }
    }

    /// A recurring singleton rescheduled `every` after each success.
    pub fn cron(every: Duration) -> Self {
        Self {
            singleton: true,
            every: Some(every),
        }
    }
}

pub struct Registration {
    pub handler: Arc<dyn JobHandler>,
    pub schedule: Schedule,
}

#[derive(Default)]
pub struct JobRegistry {
    registrations: HashMap<&'static str, Registration>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &mut self,
        job_class: &'static str,
        schedule: Schedule,
        handler: impl JobHandler + 'static,
    ) {
        self.registrations.insert(
            job_class,
            Registration {
                handler: Arc::new(handler),
                schedule,
            },
        );
    }

    pub fn get(&self, job_class: &str) -> Option<&Registration> {
        self.registrations.get(job_class)
    }

    pub fn is_registered(&self, job_class: &str) -> bool {
        self.registrations.contains_key(job_class)
    }

    pub fn registered_classes(&self) -> Vec<&'static str> {
        self.registrations.keys().copied().collect()
    }
}
