use chrono::{DateTime, Duration, Utc};
use cron::Schedule;
use entropy_db::models::JobType;
use log::{info, warn};
use miette::Diagnostic;
use std::str::FromStr;
use std::sync::Arc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::jobs::{JobRequest, Orchestrator};

/// Actor recorded on scheduled runs. Exempt from the per-actor active
/// job cap, which exists to protect interactive callers.
pub const SCHEDULER_ACTOR: &str = "scheduler";

/// How far back each scheduled run looks from its fire time.
const SUITE_LOOKBACK: Duration = Duration::hours(1);
const ASSESSMENT_LOOKBACK: Duration = Duration::days(7);

#[derive(Debug, Error, Diagnostic)]
#[error("invalid cron expression {expression:?}")]
pub struct ScheduleError {
    pub expression: String,
    #[source]
    source: cron::error::Error,
}

fn parse_schedule(expression: &str) -> Result<Schedule, ScheduleError> {
    Schedule::from_str(expression).map_err(|source| ScheduleError {
        expression: expression.to_string(),
        source,
    })
}

/// Picks whichever scheduled run fires next. `None` only for schedules
/// that have run out of future occurrences.
fn next_run(
    suite: &Schedule,
    assessment: &Schedule,
    now: DateTime<Utc>,
) -> Option<(DateTime<Utc>, JobType, Duration)> {
    let next_suite = suite
        .after(&now)
        .next()
        .map(|at| (at, JobType::Suite22, SUITE_LOOKBACK));
    let next_assessment = assessment
        .after(&now)
        .next()
        .map(|at| (at, JobType::Assess90b, ASSESSMENT_LOOKBACK));

    match (next_suite, next_assessment) {
        (Some(suite), Some(assessment)) => {
            if suite.0 <= assessment.0 {
                Some(suite)
            } else {
                Some(assessment)
            }
        }
        (Some(run), None) | (None, Some(run)) => Some(run),
        (None, None) => None,
    }
}

/// Drives the hourly suite run and the weekly 90B run. Scheduled jobs
/// go through the same submission path and worker pool as operator jobs.
pub struct Scheduler {
    orchestrator: Arc<Orchestrator>,
    suite: Schedule,
    assessment: Schedule,
}

impl Scheduler {
    pub fn new(
        orchestrator: Arc<Orchestrator>,
        suite_cron: &str,
        assessment_cron: &str,
    ) -> Result<Self, ScheduleError> {
        Ok(Self {
            orchestrator,
            suite: parse_schedule(suite_cron)?,
            assessment: parse_schedule(assessment_cron)?,
        })
    }

    pub async fn run(self, cancel: CancellationToken) {
        loop {
            let Some((fire_at, job_type, lookback)) =
                next_run(&self.suite, &self.assessment, Utc::now())
            else {
                warn!("No future scheduled runs; scheduler exiting");
                return;
            };

            let wait = (fire_at - Utc::now())
                .to_std()
                .unwrap_or(std::time::Duration::ZERO);
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = tokio::time::sleep(wait) => {}
            }

            let request = JobRequest {
                job_type,
                window_start: fire_at - lookback,
                window_end: fire_at,
                actor: SCHEDULER_ACTOR.to_string(),
                caller_token: None,
            };
            match self.orchestrator.submit(request).await {
                Ok(job) => info!("Scheduled {job_type:?} run queued as job {}", job.id),
                Err(e) => warn!("Scheduled {job_type:?} run could not be submitted: {e}"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn rejects_malformed_cron_expressions() {
        assert!(parse_schedule("not a cron line").is_err());
        assert!(parse_schedule("0 0 * * * *").is_ok());
    }

    #[test]
    fn hourly_run_fires_before_the_weekly_one() {
        let suite = parse_schedule("0 0 * * * *").unwrap();
        let assessment = parse_schedule("0 0 3 * * Sun").unwrap();
        // A Wednesday, mid-hour
        let now = Utc.with_ymd_and_hms(2026, 7, 1, 12, 30, 0).unwrap();

        let (fire_at, job_type, lookback) = next_run(&suite, &assessment, now).unwrap();
        assert_eq!(job_type, JobType::Suite22);
        assert_eq!(fire_at, Utc.with_ymd_and_hms(2026, 7, 1, 13, 0, 0).unwrap());
        assert_eq!(lookback, Duration::hours(1));
    }

    #[test]
    fn weekly_run_wins_when_it_is_closer() {
        // A suite schedule that fires once a year, far in the future
        let suite = parse_schedule("0 0 0 1 Jan * 2099").unwrap();
        let assessment = parse_schedule("0 0 3 * * Sun").unwrap();
        let now = Utc.with_ymd_and_hms(2026, 7, 1, 12, 30, 0).unwrap();

        let (fire_at, job_type, lookback) = next_run(&suite, &assessment, now).unwrap();
        assert_eq!(job_type, JobType::Assess90b);
        // July 5th 2026 is the following Sunday
        assert_eq!(fire_at, Utc.with_ymd_and_hms(2026, 7, 5, 3, 0, 0).unwrap());
        assert_eq!(lookback, Duration::days(7));
    }

    #[test]
    fn scheduled_window_covers_the_lookback() {
        let suite = parse_schedule("0 0 * * * *").unwrap();
        let assessment = parse_schedule("0 0 3 * * Sun").unwrap();
        let now = Utc.with_ymd_and_hms(2026, 7, 1, 12, 30, 0).unwrap();

        let (fire_at, _, lookback) = next_run(&suite, &assessment, now).unwrap();
        let window_start = fire_at - lookback;
        assert_eq!(
            window_start,
            Utc.with_ymd_and_hms(2026, 7, 1, 12, 0, 0).unwrap()
        );
    }
}
