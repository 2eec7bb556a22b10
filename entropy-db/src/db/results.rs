use diesel::{PgConnection, prelude::*};
use uuid::Uuid;

use crate::db::events::INSERT_FLUSH_SIZE;
use crate::models::{
    DbAssessmentResult, DbEstimatorResult, DbTestResult, NewAssessmentResult, NewEstimatorResult,
    NewTestResult,
};

/// Key under which a non-JSON validator payload is wrapped before it is
/// stored in a jsonb column.
pub const DETAILS_FALLBACK_FIELD: &str = "raw_output";

/// The validators return textual summaries that are usually, but not
/// always, JSON. Stored details must always be valid JSON, so anything
/// that doesn't parse is wrapped under [`DETAILS_FALLBACK_FIELD`].
pub fn coerce_details(raw: &str) -> serde_json::Value {
    match serde_json::from_str(raw) {
        Ok(value) => value,
        Err(_) => serde_json::json!({ DETAILS_FALLBACK_FIELD: raw }),
    }
}

/// Persists one chunk's worth of SP 800-22 per-test rows in a single
/// transaction.
pub fn insert_test_results(
    conn: &mut PgConnection,
    results: &[NewTestResult],
) -> QueryResult<usize> {
    use crate::data_schema::data::test_results::dsl;

    conn.transaction(|conn| {
        let mut inserted = 0;
        for slice in results.chunks(INSERT_FLUSH_SIZE) {
            inserted += diesel::insert_into(dsl::test_results)
                .values(slice)
                .execute(conn)?;
        }
        Ok(inserted)
    })
}

/// Persists one SP 800-90B call: the aggregate row plus its per-estimator
/// detail rows, atomically.
pub fn insert_assessment_result(
    conn: &mut PgConnection,
    aggregate: &NewAssessmentResult,
    estimators: &[NewEstimatorResult],
) -> QueryResult<usize> {
    use crate::data_schema::data::assessment_results::dsl as assessment_dsl;
    use crate::info_schema::info::estimator_results::dsl as estimator_dsl;

    conn.transaction(|conn| {
        let mut inserted = aggregate
            .insert_into(assessment_dsl::assessment_results)
            .execute(conn)?;

        for slice in estimators.chunks(INSERT_FLUSH_SIZE) {
            inserted += diesel::insert_into(estimator_dsl::estimator_results)
                .values(slice)
                .execute(conn)?;
        }

        Ok(inserted)
    })
}

/// All SP 800-22 rows of a run, ordered by chunk then test name.
pub fn test_results_for_run(
    conn: &mut PgConnection,
    run_id: Uuid,
) -> QueryResult<Vec<DbTestResult>> {
    use crate::data_schema::data::test_results::dsl;

    dsl::test_results
        .filter(dsl::run_id.eq(run_id))
        .order_by((dsl::chunk_index.asc(), dsl::test_name.asc()))
        .select(DbTestResult::as_select())
        .get_results(conn)
}

pub fn assessment_results_for_run(
    conn: &mut PgConnection,
    run_id: Uuid,
) -> QueryResult<Vec<DbAssessmentResult>> {
    use crate::data_schema::data::assessment_results::dsl;

    dsl::assessment_results
        .filter(dsl::run_id.eq(run_id))
        .order_by(dsl::chunk_index.asc())
        .select(DbAssessmentResult::as_select())
        .get_results(conn)
}

pub fn estimator_results_for_run(
    conn: &mut PgConnection,
    assessment_run_id: Uuid,
) -> QueryResult<Vec<DbEstimatorResult>> {
    use crate::info_schema::info::estimator_results::dsl;

    dsl::estimator_results
        .filter(dsl::assessment_run_id.eq(assessment_run_id))
        .order_by((dsl::test_type.asc(), dsl::estimator_name.asc()))
        .select(DbEstimatorResult::as_select())
        .get_results(conn)
}

/// The most recently executed assessment aggregate, if any. Reported
/// as stored; nothing is fabricated for historical rows.
pub fn latest_assessment_result(
    conn: &mut PgConnection,
) -> QueryResult<Option<DbAssessmentResult>> {
    use crate::data_schema::data::assessment_results::dsl;

    dsl::assessment_results
        .order_by(dsl::executed_at.desc())
        .select(DbAssessmentResult::as_select())
        .first(conn)
        .optional()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_json_details_stored_verbatim() {
        let value = coerce_details(r#"{"p_value": 0.42, "note": "ok"}"#);
        assert_eq!(value["p_value"], 0.42);
        assert_eq!(value["note"], "ok");
    }

    #[test]
    fn non_json_details_get_wrapped() {
        let value = coerce_details("14 of 15 tests passed");
        assert_eq!(value[DETAILS_FALLBACK_FIELD], "14 of 15 tests passed");
    }

    #[test]
    fn bare_json_scalars_count_as_json() {
        // A bare number or string is valid JSON, so it is not wrapped.
        assert_eq!(coerce_details("3.14"), serde_json::json!(3.14));
        assert_eq!(coerce_details(r#""fine""#), serde_json::json!("fine"));
    }
}
