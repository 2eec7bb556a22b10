use chrono::NaiveDateTime;
use diesel::prelude::*;
use serde::Serialize;
use strum::{Display, EnumString};
use uuid::Uuid;

/// Validation job kinds. The string forms are what the job rows store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, Serialize)]
pub enum JobType {
    #[strum(serialize = "SUITE_22")]
    Suite22,
    #[strum(serialize = "ASSESS_90B")]
    Assess90b,
}

/// Job lifecycle states. `Completed` and `Failed` are terminal and
/// must never be transitioned out of.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, Serialize)]
pub enum JobStatus {
    #[strum(serialize = "QUEUED")]
    Queued,
    #[strum(serialize = "RUNNING")]
    Running,
    #[strum(serialize = "COMPLETED")]
    Completed,
    #[strum(serialize = "FAILED")]
    Failed,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

/// Which half of an SP 800-90B assessment an estimator row belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, Serialize)]
pub enum EstimatorTestType {
    #[strum(serialize = "IID")]
    Iid,
    #[strum(serialize = "NON_IID")]
    NonIid,
}

#[derive(Debug, PartialEq, Insertable)]
#[diesel(table_name = crate::data_schema::data::events)]
#[diesel(treat_none_as_default_value = false)]
pub struct NewEvent<'a> {
    pub batch_id: Option<&'a str>,
    pub hw_timestamp_ns: i64,
    pub sequence_number: i64,
    pub rpi_timestamp_us: Option<i64>,
    pub tdc_timestamp_ps: Option<i64>,
    pub channel: Option<i32>,
    pub whitened: Option<Vec<u8>>,
    pub server_received: NaiveDateTime,
    pub network_delay_ms: Option<f64>,
    pub source_address: Option<&'a str>,
    pub quality_score: Option<f64>,
}

#[derive(Debug, Clone, Queryable, Selectable, Serialize)]
#[diesel(table_name = crate::data_schema::data::events)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct DbEvent {
    pub id: i64,
    pub batch_id: Option<String>,
    pub hw_timestamp_ns: i64,
    pub sequence_number: i64,
    pub rpi_timestamp_us: Option<i64>,
    pub tdc_timestamp_ps: Option<i64>,
    pub channel: Option<i32>,
    pub whitened: Option<Vec<u8>>,
    pub server_received: NaiveDateTime,
    pub network_delay_ms: Option<f64>,
    pub source_address: Option<String>,
    pub quality_score: Option<f64>,
}

#[derive(Insertable)]
#[diesel(table_name = crate::info_schema::info::validation_jobs)]
pub struct NewValidationJob<'a> {
    pub id: Uuid,
    pub job_type: String,
    pub status: String,
    pub window_start: NaiveDateTime,
    pub window_end: NaiveDateTime,
    pub created_at: NaiveDateTime,
    pub created_by: &'a str,
    pub run_id: Uuid,
}

#[derive(Debug, Clone, Identifiable, Queryable, Selectable, Serialize)]
#[diesel(table_name = crate::info_schema::info::validation_jobs)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct DbValidationJob {
    pub id: Uuid,
    pub job_type: String,
    pub status: String,
    pub progress_percent: f64,
    pub current_chunk: i32,
    pub total_chunks: i32,
    pub window_start: NaiveDateTime,
    pub window_end: NaiveDateTime,
    pub created_at: NaiveDateTime,
    pub started_at: Option<NaiveDateTime>,
    pub completed_at: Option<NaiveDateTime>,
    pub error: Option<String>,
    pub created_by: String,
    pub run_id: Uuid,
}

impl DbValidationJob {
    /// The stored status string, parsed. Rows are only ever written with
    /// strings produced by [`JobStatus`]'s `Display`, so a parse failure
    /// here means the table was edited by hand.
    pub fn parsed_status(&self) -> Option<JobStatus> {
        self.status.parse().ok()
    }
}

#[derive(Debug, Insertable)]
#[diesel(table_name = crate::data_schema::data::test_results)]
#[diesel(treat_none_as_default_value = false)]
pub struct NewTestResult<'a> {
    pub run_id: Uuid,
    pub test_name: &'a str,
    pub passed: bool,
    pub p_value: Option<f64>,
    pub bits_tested: i64,
    pub window_start: NaiveDateTime,
    pub window_end: NaiveDateTime,
    pub executed_at: NaiveDateTime,
    pub chunk_index: i32,
    pub chunk_count: i32,
    pub batch_id: Option<&'a str>,
    pub details: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Queryable, Selectable, Serialize)]
#[diesel(table_name = crate::data_schema::data::test_results)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct DbTestResult {
    pub id: i64,
    pub run_id: Uuid,
    pub test_name: String,
    pub passed: bool,
    pub p_value: Option<f64>,
    pub bits_tested: i64,
    pub window_start: NaiveDateTime,
    pub window_end: NaiveDateTime,
    pub executed_at: NaiveDateTime,
    pub chunk_index: i32,
    pub chunk_count: i32,
    pub batch_id: Option<String>,
    pub details: Option<serde_json::Value>,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = crate::data_schema::data::assessment_results)]
#[diesel(treat_none_as_default_value = false)]
pub struct NewAssessmentResult {
    pub run_id: Uuid,
    pub min_entropy: f64,
    pub passed: bool,
    pub bits_tested: i64,
    pub window_start: NaiveDateTime,
    pub window_end: NaiveDateTime,
    pub executed_at: NaiveDateTime,
    pub chunk_index: Option<i32>,
    pub chunk_count: Option<i32>,
    pub details: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Queryable, Selectable, Serialize)]
#[diesel(table_name = crate::data_schema::data::assessment_results)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct DbAssessmentResult {
    pub id: i64,
    pub run_id: Uuid,
    pub min_entropy: f64,
    pub passed: bool,
    pub bits_tested: i64,
    pub window_start: NaiveDateTime,
    pub window_end: NaiveDateTime,
    pub executed_at: NaiveDateTime,
    pub chunk_index: Option<i32>,
    pub chunk_count: Option<i32>,
    pub details: Option<serde_json::Value>,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = crate::info_schema::info::estimator_results)]
#[diesel(treat_none_as_default_value = false)]
pub struct NewEstimatorResult<'a> {
    pub assessment_run_id: Uuid,
    pub test_type: String,
    pub estimator_name: &'a str,
    pub entropy_estimate: Option<f64>,
    pub passed: bool,
    pub details: Option<serde_json::Value>,
    pub description: Option<&'a str>,
}

#[derive(Debug, Clone, Identifiable, Queryable, Selectable, Serialize)]
#[diesel(table_name = crate::info_schema::info::estimator_results)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct DbEstimatorResult {
    pub id: i64,
    pub assessment_run_id: Uuid,
    pub test_type: String,
    pub estimator_name: String,
    pub entropy_estimate: Option<f64>,
    pub passed: bool,
    pub details: Option<serde_json::Value>,
    pub description: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_enums_round_trip_through_strings() {
        for ty in [JobType::Suite22, JobType::Assess90b] {
            assert_eq!(ty.to_string().parse::<JobType>().unwrap(), ty);
        }
        for status in [
            JobStatus::Queued,
            JobStatus::Running,
            JobStatus::Completed,
            JobStatus::Failed,
        ] {
            assert_eq!(status.to_string().parse::<JobStatus>().unwrap(), status);
        }
        assert_eq!(JobType::Suite22.to_string(), "SUITE_22");
        assert_eq!(JobType::Assess90b.to_string(), "ASSESS_90B");
        assert_eq!(EstimatorTestType::NonIid.to_string(), "NON_IID");
    }

    #[test]
    fn terminal_statuses() {
        assert!(!JobStatus::Queued.is_terminal());
        assert!(!JobStatus::Running.is_terminal());
        assert!(JobStatus::Completed.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
    }
}
