//! In-memory registry of background restore jobs.

use crate::models::restore::RestoreJob;
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use tracing::debug;
use uuid::Uuid;

/// Hours a finished or failed job stays pollable.
pub const FINISHED_JOB_TTL_HOURS: i64 = 24;
/// Upper bound on finished or failed jobs kept at once.
pub const MAX_FINISHED_JOBS: usize = 256;

pub struct RestoreJobs {
    jobs: DashMap<Uuid, RestoreJob>,
    ttl: Duration,
    max_finished: usize,
}

impl RestoreJobs {
    pub fn new() -> Self {
        Self::with_limits(Duration::hours(FINISHED_JOB_TTL_HOURS), MAX_FINISHED_JOBS)
    }

    pub fn with_limits(ttl: Duration, max_finished: usize) -> Self {
        Self {
            jobs: DashMap::new(),
            ttl,
            max_finished,
        }
    }

    pub fn insert(&self, job: RestoreJob) {
        self.jobs.insert(job.id, job);
    }

    pub fn get(&self, id: &Uuid) -> Option<RestoreJob> {
        self.jobs.get(id).map(|job| job.clone())
    }

    pub fn update(&self, id: &Uuid, apply: impl FnOnce(&mut RestoreJob)) {
        if let Some(mut job) = self.jobs.get_mut(id) {
            apply(&mut job);
        }
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    /// Drop finished and failed jobs older than the TTL, then the oldest
    /// ones beyond the cap. Pending and running jobs are never dropped.
    pub fn prune(&self, now: DateTime<Utc>) -> usize {
        let before = self.jobs.len();
        let cutoff = now - self.ttl;
        self.jobs
            .retain(|_, job| job.finished_at.is_none_or(|at| at > cutoff));

        let mut finished: Vec<(DateTime<Utc>, Uuid)> = self
            .jobs
            .iter()
            .filter_map(|job| job.finished_at.map(|at| (at, job.id)))
            .collect();
        if finished.len() > self.max_finished {
            finished.sort();
            let excess = finished.len() - self.max_finished;
            for (_, id) in finished.into_iter().take(excess) {
                self.jobs.remove(&id);
            }
        }

        let pruned = before.saturating_sub(self.jobs.len());
        if pruned > 0 {
            debug!("pruned {} restore jobs", pruned);
        }
        pruned
    }
}

impl Default for RestoreJobs {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::restore::{RestoreFlags, RestoreJobState};

    fn job(state: RestoreJobState, finished_at: Option<DateTime<Utc>>) -> RestoreJob {
        RestoreJob {
            id: Uuid::new_v4(),
            archive_path: "/srv/backups/olga/olga_2024-03-06_02-00-00_full.tar.gz".into(),
            account_id: Uuid::new_v4(),
            flags: RestoreFlags::default(),
            state,
            report: None,
            error: None,
            created_at: finished_at.unwrap_or_else(Utc::now),
            finished_at,
        }
    }

    #[test]
    fn expired_jobs_are_dropped_and_running_ones_kept() {
        let jobs = RestoreJobs::with_limits(Duration::hours(1), 100);
        let now = Utc::now();
        let old = job(RestoreJobState::Finished, Some(now - Duration::hours(2)));
        let failed = job(RestoreJobState::Failed, Some(now - Duration::hours(3)));
        let recent = job(RestoreJobState::Finished, Some(now - Duration::minutes(5)));
        let running = job(RestoreJobState::Running, None);
        let (old_id, failed_id, recent_id, running_id) = (old.id, failed.id, recent.id, running.id);
        for j in [old, failed, recent, running] {
            jobs.insert(j);
        }

        assert_eq!(jobs.prune(now), 2);
        assert!(jobs.get(&old_id).is_none());
        assert!(jobs.get(&failed_id).is_none());
        assert!(jobs.get(&recent_id).is_some());
        assert!(jobs.get(&running_id).is_some());
        assert_eq!(jobs.prune(now), 0);
    }

    #[test]
    fn oldest_finished_jobs_go_past_the_cap() {
        let jobs = RestoreJobs::with_limits(Duration::hours(24), 2);
        let now = Utc::now();
        let mut ids = Vec::new();
        for minutes in [30, 20, 10] {
            let j = job(
                RestoreJobState::Finished,
                Some(now - Duration::minutes(minutes)),
            );
            ids.push(j.id);
            jobs.insert(j);
        }
        let pending = job(RestoreJobState::Pending, None);
        let pending_id = pending.id;
        jobs.insert(pending);

        assert_eq!(jobs.prune(now), 1);
        assert!(jobs.get(&ids[0]).is_none());
        assert!(jobs.get(&ids[1]).is_some());
        assert!(jobs.get(&ids[2]).is_some());
        assert!(jobs.get(&pending_id).is_some());
        assert_eq!(jobs.len(), 3);
    }

    #[test]
    fn update_applies_in_place() {
        let jobs = RestoreJobs::new();
        let j = job(RestoreJobState::Pending, None);
        let id = j.id;
        jobs.insert(j);

        jobs.update(&id, |job| job.state = RestoreJobState::Running);
        assert_eq!(jobs.get(&id).unwrap().state, RestoreJobState::Running);

        jobs.update(&Uuid::new_v4(), |job| job.state = RestoreJobState::Failed);
        assert_eq!(jobs.len(), 1);
    }
}
