use chrono::Utc;
use entropy_db::models::{
    DbEvent, DbValidationJob, EstimatorTestType, JobType, NewAssessmentResult, NewEstimatorResult,
    NewTestResult,
};
use entropy_db::{ConnectionPool, PoolError, QueryError, db};
use log::{error, info};
use miette::Diagnostic;
use nist::{AssessmentClient, EstimatorEntry, SuiteClient, TokenClient, TokenError, ValidatorError};
use std::sync::Arc;
use thiserror::Error;
use tokio::task::JoinError;
use uuid::Uuid;

use crate::jobs::chunking::{ChunkPlanError, plan_suite_chunks};
use crate::jobs::with_conn;

/// An SP 800-22 test passes when its p-value clears this threshold.
pub const P_VALUE_THRESHOLD: f64 = 0.01;

/// Everything a worker needs to push one job through its lifecycle.
pub(crate) struct JobContext {
    pub pool: ConnectionPool,
    pub suite: SuiteClient,
    pub assessment: AssessmentClient,
    pub tokens: TokenClient,
    pub min_suite_bits: u64,
    pub max_suite_bytes: usize,
    pub max_assessment_bytes: usize,
}

#[derive(Debug, Error, Diagnostic)]
pub enum JobError {
    #[error("couldn't get a database connection")]
    Pool(#[from] PoolError),

    #[error(transparent)]
    Db(#[from] QueryError),

    #[error("database task died")]
    Join(#[from] JoinError),

    #[error(transparent)]
    Chunking(#[from] ChunkPlanError),

    #[error("job row carries unknown type {0:?}")]
    UnknownJobType(String),

    #[error("window contains no whitened data to assess")]
    EmptyBitstream,

    #[error("validator call failed")]
    Validator(#[source] ValidatorError),

    #[error("authentication unavailable")]
    Auth(#[source] TokenError),
}

/// Concatenated whitened bytes of the window, in hardware-timestamp
/// order. When no event carries whitened bytes, falls back to the
/// interval-XOR construction: sort timestamps, take the positive deltas
/// as big-endian 64-bit words, and XOR the first half of the resulting
/// byte string against the second half.
pub fn build_bitstream(events: &[DbEvent]) -> Vec<u8> {
    let mut whitened = Vec::new();
    for event in events {
        if let Some(bytes) = &event.whitened {
            whitened.extend_from_slice(bytes);
        }
    }
    if !whitened.is_empty() {
        return whitened;
    }

    let mut timestamps: Vec<i64> = events.iter().map(|e| e.hw_timestamp_ns).collect();
    timestamps.sort_unstable();

    let bytes: Vec<u8> = timestamps
        .windows(2)
        .map(|pair| pair[1] - pair[0])
        .filter(|&delta| delta > 0)
        .flat_map(|delta| (delta as u64).to_be_bytes())
        .collect();

    let half = bytes.len() / 2;
    (0..half).map(|i| bytes[i] ^ bytes[half + i]).collect()
}

/// Drives one job to a terminal state. Every failure path lands the job
/// in FAILED with the error recorded on the row; nothing is retried.
pub(crate) async fn run_job(
    ctx: Arc<JobContext>,
    job: DbValidationJob,
    caller_token: Option<String>,
) {
    let job_id = job.id;
    if let Err(e) = execute(&ctx, job, caller_token).await {
        error!("Validation job {job_id} failed: {e}");
        let message = e.to_string();
        let marked = with_conn::<_, JobError, _>(&ctx.pool, move |conn| {
            db::mark_job_failed(conn, job_id, &message, Utc::now())?;
            Ok(())
        })
        .await;
        if let Err(e) = marked {
            error!("Couldn't mark job {job_id} as failed: {e}");
        }
    }
}

async fn execute(
    ctx: &Arc<JobContext>,
    job: DbValidationJob,
    caller_token: Option<String>,
) -> Result<(), JobError> {
    let job_id = job.id;
    let job_type: JobType = job
        .job_type
        .parse()
        .map_err(|_| JobError::UnknownJobType(job.job_type.clone()))?;

    with_conn::<_, JobError, _>(&ctx.pool, move |conn| {
        db::mark_job_running(conn, job_id, Utc::now())?;
        Ok(())
    })
    .await?;

    let window_start = job.window_start.and_utc();
    let window_end = job.window_end.and_utc();
    let events = with_conn::<_, JobError, _>(&ctx.pool, move |conn| {
        Ok(db::events_in_window(conn, window_start, window_end)?)
    })
    .await?;
    info!(
        "Job {job_id}: loaded {} events for [{window_start}, {window_end})",
        events.len(),
    );

    let data = build_bitstream(&events);

    let bearer = resolve_bearer(&ctx.tokens, caller_token).await?;

    match job_type {
        JobType::Suite22 => run_suite_job(ctx, &job, data, &bearer).await?,
        JobType::Assess90b => run_assessment_job(ctx, &job, data, &bearer).await?,
    }

    with_conn::<_, JobError, _>(&ctx.pool, move |conn| {
        db::mark_job_completed(conn, job_id, Utc::now())?;
        Ok(())
    })
    .await?;
    info!("Job {job_id} completed");

    Ok(())
}

/// A token provided by the submitting caller is propagated as-is and no
/// service token is requested; only jobs without one run under the
/// service identity. A failed fetch is an auth failure for the job.
async fn resolve_bearer(
    tokens: &TokenClient,
    caller_token: Option<String>,
) -> Result<String, JobError> {
    match caller_token {
        Some(token) => Ok(token),
        None => tokens.service_token().await.map_err(JobError::Auth),
    }
}

async fn run_suite_job(
    ctx: &Arc<JobContext>,
    job: &DbValidationJob,
    data: Vec<u8>,
    bearer: &str,
) -> Result<(), JobError> {
    let job_id = job.id;
    let run_id = job.run_id;

    let chunks = plan_suite_chunks(data.len(), ctx.max_suite_bytes, ctx.min_suite_bits)?;
    let chunk_count = chunks.len() as i32;
    with_conn::<_, JobError, _>(&ctx.pool, move |conn| {
        db::set_job_total_chunks(conn, job_id, chunk_count)?;
        Ok(())
    })
    .await?;

    for (index, range) in chunks.into_iter().enumerate() {
        let chunk = &data[range];
        let chunk_number = index as i32 + 1;

        let response = ctx
            .suite
            .run_suite(chunk, None, bearer)
            .await
            .map_err(JobError::Validator)?;

        let bits_tested = chunk.len() as i64 * 8;
        let window_start = job.window_start;
        let window_end = job.window_end;
        with_conn::<_, JobError, _>(&ctx.pool, move |conn| {
            let executed_at = Utc::now().naive_utc();
            let rows: Vec<NewTestResult> = response
                .results
                .iter()
                .map(|result| NewTestResult {
                    run_id,
                    test_name: &result.name,
                    passed: result
                        .p_value
                        .map_or(result.passed, |p| p >= P_VALUE_THRESHOLD),
                    p_value: result.p_value,
                    bits_tested,
                    window_start,
                    window_end,
                    executed_at,
                    chunk_index: chunk_number,
                    chunk_count,
                    batch_id: None,
                    details: result.warning.as_deref().map(db::coerce_details),
                })
                .collect();
            db::insert_test_results(conn, &rows)?;
            db::update_job_progress(
                conn,
                job_id,
                chunk_number,
                100.0 * chunk_number as f64 / chunk_count as f64,
            )?;
            Ok(())
        })
        .await?;

        info!("Suite job {job_id}: chunk {chunk_number}/{chunk_count} persisted");
    }

    Ok(())
}

async fn run_assessment_job(
    ctx: &Arc<JobContext>,
    job: &DbValidationJob,
    mut data: Vec<u8>,
    bearer: &str,
) -> Result<(), JobError> {
    let job_id = job.id;
    let run_id = job.run_id;

    if data.is_empty() {
        return Err(JobError::EmptyBitstream);
    }
    // The assessor works on a single bounded chunk.
    data.truncate(ctx.max_assessment_bytes);

    with_conn::<_, JobError, _>(&ctx.pool, move |conn| {
        db::set_job_total_chunks(conn, job_id, 1)?;
        Ok(())
    })
    .await?;

    let bits_tested = data.len() as i64 * 8;
    let response = ctx
        .assessment
        .assess(&data, bearer)
        .await
        .map_err(JobError::Validator)?;

    let window_start = job.window_start;
    let window_end = job.window_end;
    with_conn::<_, JobError, _>(&ctx.pool, move |conn| {
        let aggregate = NewAssessmentResult {
            run_id,
            min_entropy: response.min_entropy,
            passed: response.passed,
            bits_tested,
            window_start,
            window_end,
            executed_at: Utc::now().naive_utc(),
            chunk_index: Some(1),
            chunk_count: Some(1),
            details: response.assessment_summary.as_deref().map(db::coerce_details),
        };

        let estimators: Vec<NewEstimatorResult> = response
            .iid_results
            .iter()
            .map(|entry| estimator_row(run_id, EstimatorTestType::Iid, entry))
            .chain(
                response
                    .non_iid_results
                    .iter()
                    .map(|entry| estimator_row(run_id, EstimatorTestType::NonIid, entry)),
            )
            .collect();

        db::insert_assessment_result(conn, &aggregate, &estimators)?;
        db::update_job_progress(conn, job_id, 1, 100.0)?;
        Ok(())
    })
    .await?;

    info!("Assessment job {job_id} persisted");
    Ok(())
}

fn estimator_row(
    run_id: Uuid,
    test_type: EstimatorTestType,
    entry: &EstimatorEntry,
) -> NewEstimatorResult<'_> {
    NewEstimatorResult {
        assessment_run_id: run_id,
        test_type: test_type.to_string(),
        estimator_name: &entry.name,
        entropy_estimate: entry.effective_estimate(),
        // Estimators that don't carry a verdict are informational and
        // never fail an assessment on their own.
        passed: entry.passed.unwrap_or(true),
        details: entry.details.as_deref().map(db::coerce_details),
        description: entry.description.as_deref(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn event(hw_timestamp_ns: i64, whitened: Option<Vec<u8>>) -> DbEvent {
        DbEvent {
            id: 0,
            batch_id: None,
            hw_timestamp_ns,
            sequence_number: 0,
            rpi_timestamp_us: None,
            tdc_timestamp_ps: None,
            channel: None,
            whitened,
            server_received: Utc::now().naive_utc(),
            network_delay_ms: None,
            source_address: None,
            quality_score: None,
        }
    }

    #[test]
    fn whitened_bytes_concatenate_in_order() {
        let events = vec![
            event(100, Some(vec![1, 2])),
            event(200, None),
            event(300, Some(vec![3, 4])),
        ];
        assert_eq!(build_bitstream(&events), vec![1, 2, 3, 4]);
    }

    #[test]
    fn fallback_xor_folds_interval_words() {
        // Timestamps 1000, 1000, 2500, 4000 yield positive deltas
        // [1500, 1500] (the zero delta is filtered), i.e. 16 bytes, and
        // the fold XORs the two words into eight zero bytes.
        let events = vec![
            event(1000, None),
            event(1000, None),
            event(2500, None),
            event(4000, None),
        ];
        assert_eq!(build_bitstream(&events), vec![0u8; 8]);
    }

    #[test]
    fn fallback_sorts_before_taking_deltas() {
        let shuffled = vec![event(4000, None), event(1000, None), event(2500, None)];
        let ordered = vec![event(1000, None), event(2500, None), event(4000, None)];
        assert_eq!(build_bitstream(&shuffled), build_bitstream(&ordered));
    }

    #[test]
    fn lone_event_yields_an_empty_bitstream() {
        assert_eq!(build_bitstream(&[event(1000, None)]), Vec::<u8>::new());
        assert_eq!(build_bitstream(&[]), Vec::<u8>::new());
    }

    fn unreachable_token_client() -> TokenClient {
        // Port 9 (discard) refuses connections on any sane test host
        TokenClient::new(
            "http://127.0.0.1:9/oauth/token".to_string(),
            std::time::Duration::from_secs(2),
            5,
            std::time::Duration::from_secs(60),
        )
    }

    #[tokio::test]
    async fn caller_token_is_propagated_without_a_fetch() {
        // If the client were contacted this would fail; the caller's
        // token must win without any network traffic.
        let tokens = unreachable_token_client();
        let bearer = resolve_bearer(&tokens, Some("caller-jwt".to_string()))
            .await
            .unwrap();
        assert_eq!(bearer, "caller-jwt");
    }

    #[tokio::test]
    async fn missing_token_and_failed_fetch_is_an_auth_error() {
        let tokens = unreachable_token_client();
        let result = resolve_bearer(&tokens, None).await;
        assert!(matches!(result, Err(JobError::Auth(_))));
    }
}
