//! The persistence pipeline: validate, convert, and land one gateway
//! batch in the event store as a single transactional unit.

use chrono::{DateTime, Utc};
use entropy_db::{ConnectionPool, PoolError, QueryError, db};
use log::debug;
use miette::Diagnostic;
use thiserror::Error;

use crate::mapping;
use crate::messages::EventBatch;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PersistOutcome {
    pub received: usize,
    pub persisted: usize,
    pub dropped: usize,
}

#[derive(Debug, Error, Diagnostic)]
pub enum PersistError {
    #[error("couldn't get a database connection")]
    Pool(#[from] PoolError),

    #[error(transparent)]
    Db(#[from] QueryError),
}

/// Maps and persists a batch. Individual events that fail validation are
/// dropped (and logged); a store error rolls back the entire batch, so
/// the event table never holds a partial batch write.
pub fn persist_batch(
    pool: &ConnectionPool,
    batch: &EventBatch,
    received_at: DateTime<Utc>,
) -> Result<PersistOutcome, PersistError> {
    let network_delay_ms = batch
        .sent_at
        .map(|sent_at| (received_at - sent_at).num_milliseconds().max(0) as f64);

    let mut rows = Vec::with_capacity(batch.events.len());
    let mut dropped = 0usize;
    for (index, msg) in batch.events.iter().enumerate() {
        match mapping::map_event(
            msg,
            batch.batch_id.as_deref(),
            received_at,
            network_delay_ms,
            received_at,
        ) {
            Ok(row) => rows.push(row),
            Err(e) => {
                dropped += 1;
                debug!(
                    "Dropping event {index} of batch {:?} (seq {}): {e}",
                    batch.batch_id, batch.batch_sequence,
                );
            }
        }
    }

    let persisted = if rows.is_empty() {
        0
    } else {
        let mut conn = pool.get()?;
        db::insert_events(&mut conn, &rows)?
    };

    Ok(PersistOutcome {
        received: batch.events.len(),
        persisted,
        dropped,
    })
}
