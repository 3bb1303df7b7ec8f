//! Poll loop that fires due schedules.

use crate::errors::BackupError;
use crate::services::backup_service::BackupService;
use chrono::{Local, NaiveDateTime};
use futures::future::join_all;
use std::time::Duration;
use tokio::{task::JoinHandle, time::MissedTickBehavior};
use tracing::{debug, error, info, warn};

pub struct Scheduler {
    service: BackupService,
    interval: Duration,
}

impl Scheduler {
    pub fn new(service: BackupService, interval: Duration) -> Self {
        Self { service, interval }
    }

    /// Spawn the loop on the runtime. Each due schedule runs in its own
    /// task so a long archive does not hold up the next tick.
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!("scheduler polling every {:?}", self.interval);
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                self.tick(Local::now().naive_local()).await;
            }
        })
    }

    /// Start every schedule due at `now` and return their task handles.
    pub async fn tick(&self, now: NaiveDateTime) -> Vec<JoinHandle<()>> {
        let due = match self.service.due_schedules(now).await {
            Ok(due) => due,
            Err(err) => {
                error!("loading due schedules failed: {}", err);
                return Vec::new();
            }
        };
        if due.is_empty() {
            debug!("no schedules due at {}", now);
        }

        due.into_iter()
            .map(|schedule| {
                let service = self.service.clone();
                tokio::spawn(async move {
                    match service.run_schedule(schedule.id).await {
                        Ok(_) => {}
                        Err(BackupError::AlreadyRunning(id)) => {
                            debug!("schedule {} still running, skipped", id);
                        }
                        // Already logged and recorded by the pipeline.
                        Err(err) => warn!("schedule {} run ended with: {}", schedule.id, err),
                    }
                })
            })
            .collect()
    }

    /// Evaluate once, wait for every started run, and return how many ran.
    pub async fn run_once(&self, now: NaiveDateTime) -> usize {
        let handles = self.tick(now).await;
        let count = handles.len();
        for joined in join_all(handles).await {
            if let Err(err) = joined {
                error!("backup task panicked: {}", err);
            }
        }
        count
    }
}
