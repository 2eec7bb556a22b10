use chrono::{DateTime, Utc};
use diesel::{PgConnection, prelude::*, sql_query, sql_types::*};

use crate::db::{ListError, guard_page_depth};
use crate::models::{DbEvent, NewEvent};

/// Rows are flushed to the store in slices of this size so that a large
/// batch never holds its full bind set in memory at once. The enclosing
/// transaction still covers the whole batch, so a failure anywhere rolls
/// the entire batch back.
pub const INSERT_FLUSH_SIZE: usize = 100;

pub fn insert_events(conn: &mut PgConnection, events: &[NewEvent]) -> QueryResult<usize> {
    use crate::data_schema::data::events::dsl;

    conn.transaction(|conn| {
        let mut inserted = 0;
        for slice in events.chunks(INSERT_FLUSH_SIZE) {
            inserted += diesel::insert_into(dsl::events)
                .values(slice)
                .execute(conn)?;
        }
        Ok(inserted)
    })
}

/// Events in `[start, end)` of server-received time, ordered by hardware
/// timestamp ascending.
pub fn events_in_window(
    conn: &mut PgConnection,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> QueryResult<Vec<DbEvent>> {
    use crate::data_schema::data::events::dsl;

    dsl::events
        .filter(dsl::server_received.ge(start.naive_utc()))
        .filter(dsl::server_received.lt(end.naive_utc()))
        .order_by(dsl::hw_timestamp_ns.asc())
        .select(DbEvent::as_select())
        .get_results(conn)
}

pub fn count_events_in_window(
    conn: &mut PgConnection,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> QueryResult<i64> {
    use crate::data_schema::data::events::dsl;

    dsl::events
        .filter(dsl::server_received.ge(start.naive_utc()))
        .filter(dsl::server_received.lt(end.naive_utc()))
        .count()
        .get_result(conn)
}

/// The most recent `limit` events by hardware timestamp, newest first.
pub fn recent_events(conn: &mut PgConnection, limit: i64) -> QueryResult<Vec<DbEvent>> {
    use crate::data_schema::data::events::dsl;

    dsl::events
        .order_by(dsl::hw_timestamp_ns.desc())
        .limit(limit)
        .select(DbEvent::as_select())
        .get_results(conn)
}

/// Concatenation input for the kernel feeder and the bitstream builder:
/// just the non-null whitened blobs, in hardware-timestamp order.
pub fn whitened_in_window(
    conn: &mut PgConnection,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> QueryResult<Vec<Vec<u8>>> {
    use crate::data_schema::data::events::dsl;

    dsl::events
        .filter(dsl::server_received.ge(start.naive_utc()))
        .filter(dsl::server_received.lt(end.naive_utc()))
        .filter(dsl::whitened.is_not_null())
        .order_by(dsl::hw_timestamp_ns.asc())
        .select(dsl::whitened.assume_not_null())
        .get_results(conn)
}

#[derive(QueryableByName)]
struct IntervalRow {
    #[diesel(sql_type = Int8)]
    delta_ns: i64,
}

/// Positive consecutive deltas of `hw_timestamp_ns` over the window, in
/// chronological order. The lag window runs inside the database so only
/// the deltas cross the wire, not the rows.
pub fn intervals_in_window(
    conn: &mut PgConnection,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> QueryResult<Vec<i64>> {
    let rows = sql_query(
        "
        select delta_ns
        from (
            select
                hw_timestamp_ns,
                hw_timestamp_ns
                    - lag(hw_timestamp_ns) over (order by hw_timestamp_ns) as delta_ns
            from data.events
            where server_received >= $1 and server_received < $2
        ) deltas
        where delta_ns > 0
        order by hw_timestamp_ns asc
    ",
    )
    .bind::<Timestamp, _>(start.naive_utc())
    .bind::<Timestamp, _>(end.naive_utc())
    .load::<IntervalRow>(conn)?;

    Ok(rows.into_iter().map(|row| row.delta_ns).collect())
}

#[derive(Debug, QueryableByName)]
pub struct IntervalStats {
    #[diesel(sql_type = Int8)]
    pub count: i64,
    #[diesel(sql_type = Nullable<Float8>)]
    pub mean_ns: Option<f64>,
    #[diesel(sql_type = Nullable<Float8>)]
    pub stddev_ns: Option<f64>,
    #[diesel(sql_type = Nullable<Int8>)]
    pub min_ns: Option<i64>,
    #[diesel(sql_type = Nullable<Int8>)]
    pub max_ns: Option<i64>,
    #[diesel(sql_type = Nullable<Float8>)]
    pub median_ns: Option<f64>,
}

/// Aggregated interval statistics for the window in a single round trip.
pub fn interval_stats(
    conn: &mut PgConnection,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> QueryResult<IntervalStats> {
    sql_query(
        "
        select
            count(*) as count,
            avg(delta_ns)::double precision as mean_ns,
            stddev_pop(delta_ns)::double precision as stddev_ns,
            min(delta_ns) as min_ns,
            max(delta_ns) as max_ns,
            percentile_cont(0.5) within group (order by delta_ns) as median_ns
        from (
            select
                hw_timestamp_ns
                    - lag(hw_timestamp_ns) over (order by hw_timestamp_ns) as delta_ns
            from data.events
            where server_received >= $1 and server_received < $2
        ) deltas
        where delta_ns > 0
    ",
    )
    .bind::<Timestamp, _>(start.naive_utc())
    .bind::<Timestamp, _>(end.naive_utc())
    .get_result(conn)
}

/// Offset-paginated event listing, newest first. Deep offsets are
/// rejected unless a window bounds the scan.
pub fn events_page(
    conn: &mut PgConnection,
    page: u32,
    page_size: u32,
    window: Option<(DateTime<Utc>, DateTime<Utc>)>,
) -> Result<Vec<DbEvent>, ListError> {
    use crate::data_schema::data::events::dsl;

    guard_page_depth(page, window.is_some())?;

    let mut query = dsl::events.select(DbEvent::as_select()).into_boxed();
    if let Some((start, end)) = window {
        query = query
            .filter(dsl::server_received.ge(start.naive_utc()))
            .filter(dsl::server_received.lt(end.naive_utc()));
    }

    let events = query
        .order_by(dsl::server_received.desc())
        .offset(page as i64 * page_size as i64)
        .limit(page_size as i64)
        .get_results(conn)?;

    Ok(events)
}
