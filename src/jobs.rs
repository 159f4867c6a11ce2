//! Scheduled background jobs.
//!
//! One ticker task wakes every few seconds and fires whatever is due.
//! The only built-in job is digest assembly, driven by a restricted
//! cron expression (see [`crate::cron`]).

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tracing::{debug, error, info};

use crate::config::{Account, JobsConfig};
use crate::cron::CronSchedule;
use crate::digest::DigestAssembler;
use crate::error::CronError;

/// Fires due jobs when ticked.
pub struct JobRunner {
    account: Account,
    digest: DigestAssembler,
    schedule: Option<CronSchedule>,
    next_digest: RwLock<Option<DateTime<Utc>>>,
}

impl JobRunner {
    /// Build the runner, validating and pre-computing the digest
    /// schedule's first firing.
    pub fn new(
        account: Account,
        digest: DigestAssembler,
        config: &JobsConfig,
    ) -> Result<Self, CronError> {
        let schedule = match &config.digest_schedule {
            Some(expr) => Some(CronSchedule::parse(expr)?),
            None => None,
        };
        let next = match &schedule {
            Some(schedule) => {
                let at = schedule.next_run(Utc::now())?;
                info!(next = %at, "digest scheduled");
                Some(at)
            }
            None => None,
        };
        Ok(Self {
            account,
            digest,
            schedule,
            next_digest: RwLock::new(next),
        })
    }

    /// Run whatever is due now.
    pub async fn tick(&self) {
        self.tick_at(Utc::now()).await;
    }

    async fn tick_at(&self, now: DateTime<Utc>) {
        let Some(schedule) = &self.schedule else {
            return;
        };

        let due = {
            let mut next = self.next_digest.write().await;
            match *next {
                Some(at) if at <= now => {
                    *next = schedule.next_run(now).ok();
                    if let Some(upcoming) = *next {
                        debug!(next = %upcoming, "digest rescheduled");
                    }
                    true
                }
                _ => false,
            }
        };

        if due {
            // Background loop: failures are logged, never fatal.
            if let Err(e) = self.digest.assemble_and_send(&self.account).await {
                error!(error = %e, "digest job failed");
            }
        }
    }
}

/// Spawn the job ticker background task.
pub fn spawn_job_ticker(
    runner: Arc<JobRunner>,
    interval: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        // Skip immediate first tick
        ticker.tick().await;

        loop {
            ticker.tick().await;
            runner.tick().await;
        }
    })
}
