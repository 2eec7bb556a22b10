use chrono::{DateTime, Utc};
use diesel::{PgConnection, prelude::*};
use uuid::Uuid;

use crate::db::{ListError, guard_page_depth};
use crate::models::{DbValidationJob, JobStatus, NewValidationJob};

pub fn insert_job(conn: &mut PgConnection, job: &NewValidationJob) -> QueryResult<DbValidationJob> {
    use crate::info_schema::info::validation_jobs::dsl;

    job.insert_into(dsl::validation_jobs)
        .returning(DbValidationJob::as_returning())
        .get_result(conn)
}

pub fn get_job(conn: &mut PgConnection, job_id: Uuid) -> QueryResult<Option<DbValidationJob>> {
    use crate::info_schema::info::validation_jobs::dsl;

    dsl::validation_jobs
        .filter(dsl::id.eq(job_id))
        .select(DbValidationJob::as_select())
        .first(conn)
        .optional()
}

/// How many non-terminal jobs the actor currently owns. Backs the
/// submission pre-flight cap.
pub fn active_job_count(conn: &mut PgConnection, actor: &str) -> QueryResult<i64> {
    use crate::info_schema::info::validation_jobs::dsl;

    dsl::validation_jobs
        .filter(dsl::created_by.eq(actor))
        .filter(dsl::status.eq_any([
            JobStatus::Queued.to_string(),
            JobStatus::Running.to_string(),
        ]))
        .count()
        .get_result(conn)
}

/// QUEUED -> RUNNING. The status filter makes the transition a no-op when
/// the row is in any other state, which keeps terminal states immutable.
pub fn mark_job_running(
    conn: &mut PgConnection,
    job_id: Uuid,
    at: DateTime<Utc>,
) -> QueryResult<usize> {
    use crate::info_schema::info::validation_jobs::dsl;

    diesel::update(dsl::validation_jobs)
        .filter(dsl::id.eq(job_id))
        .filter(dsl::status.eq(JobStatus::Queued.to_string()))
        .set((
            dsl::status.eq(JobStatus::Running.to_string()),
            dsl::started_at.eq(at.naive_utc()),
        ))
        .execute(conn)
}

pub fn set_job_total_chunks(
    conn: &mut PgConnection,
    job_id: Uuid,
    total_chunks: i32,
) -> QueryResult<usize> {
    use crate::info_schema::info::validation_jobs::dsl;

    diesel::update(dsl::validation_jobs)
        .filter(dsl::id.eq(job_id))
        .filter(dsl::status.eq(JobStatus::Running.to_string()))
        .set(dsl::total_chunks.eq(total_chunks))
        .execute(conn)
}

pub fn update_job_progress(
    conn: &mut PgConnection,
    job_id: Uuid,
    current_chunk: i32,
    progress_percent: f64,
) -> QueryResult<usize> {
    use crate::info_schema::info::validation_jobs::dsl;

    diesel::update(dsl::validation_jobs)
        .filter(dsl::id.eq(job_id))
        .filter(dsl::status.eq(JobStatus::Running.to_string()))
        .set((
            dsl::current_chunk.eq(current_chunk),
            dsl::progress_percent.eq(progress_percent),
        ))
        .execute(conn)
}

pub fn mark_job_completed(
    conn: &mut PgConnection,
    job_id: Uuid,
    at: DateTime<Utc>,
) -> QueryResult<usize> {
    use crate::info_schema::info::validation_jobs::dsl;

    diesel::update(dsl::validation_jobs)
        .filter(dsl::id.eq(job_id))
        .filter(dsl::status.eq(JobStatus::Running.to_string()))
        .set((
            dsl::status.eq(JobStatus::Completed.to_string()),
            dsl::progress_percent.eq(100.0),
            dsl::completed_at.eq(at.naive_utc()),
        ))
        .execute(conn)
}

pub fn mark_job_failed(
    conn: &mut PgConnection,
    job_id: Uuid,
    error: &str,
    at: DateTime<Utc>,
) -> QueryResult<usize> {
    use crate::info_schema::info::validation_jobs::dsl;

    diesel::update(dsl::validation_jobs)
        .filter(dsl::id.eq(job_id))
        .filter(dsl::status.eq_any([
            JobStatus::Queued.to_string(),
            JobStatus::Running.to_string(),
        ]))
        .set((
            dsl::status.eq(JobStatus::Failed.to_string()),
            dsl::error.eq(error),
            dsl::completed_at.eq(at.naive_utc()),
        ))
        .execute(conn)
}

pub const RECOVERY_ERROR_QUEUED: &str = "job failed before start (process restarted)";
pub const RECOVERY_ERROR_RUNNING: &str = "job failed during processing (process restarted)";

/// Startup sweep: any job the previous process left non-terminal is
/// marked FAILED, with a message that records which state it died in.
/// Returns (previously queued, previously running) counts.
pub fn recover_orphaned_jobs(
    conn: &mut PgConnection,
    at: DateTime<Utc>,
) -> QueryResult<(usize, usize)> {
    use crate::info_schema::info::validation_jobs::dsl;

    conn.transaction(|conn| {
        let queued = diesel::update(dsl::validation_jobs)
            .filter(dsl::status.eq(JobStatus::Queued.to_string()))
            .set((
                dsl::status.eq(JobStatus::Failed.to_string()),
                dsl::error.eq(RECOVERY_ERROR_QUEUED),
                dsl::completed_at.eq(at.naive_utc()),
            ))
            .execute(conn)?;

        let running = diesel::update(dsl::validation_jobs)
            .filter(dsl::status.eq(JobStatus::Running.to_string()))
            .set((
                dsl::status.eq(JobStatus::Failed.to_string()),
                dsl::error.eq(RECOVERY_ERROR_RUNNING),
                dsl::completed_at.eq(at.naive_utc()),
            ))
            .execute(conn)?;

        Ok((queued, running))
    })
}

pub fn count_jobs(conn: &mut PgConnection) -> QueryResult<i64> {
    use crate::info_schema::info::validation_jobs::dsl;

    dsl::validation_jobs.count().get_result(conn)
}

/// Offset-paginated job listing, newest first. The window, when present,
/// bounds `created_at`.
pub fn jobs_page(
    conn: &mut PgConnection,
    page: u32,
    page_size: u32,
    window: Option<(DateTime<Utc>, DateTime<Utc>)>,
) -> Result<Vec<DbValidationJob>, ListError> {
    use crate::info_schema::info::validation_jobs::dsl;

    guard_page_depth(page, window.is_some())?;

    let mut query = dsl::validation_jobs
        .select(DbValidationJob::as_select())
        .into_boxed();
    if let Some((start, end)) = window {
        query = query
            .filter(dsl::created_at.ge(start.naive_utc()))
            .filter(dsl::created_at.lt(end.naive_utc()));
    }

    let jobs = query
        .order_by(dsl::created_at.desc())
        .offset(page as i64 * page_size as i64)
        .limit(page_size as i64)
        .get_results(conn)?;

    Ok(jobs)
}
