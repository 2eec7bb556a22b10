use log::debug;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use crate::messages::EventBatch;

/// Classic token bucket with burst capacity equal to the refill rate.
/// Refill happens lazily on each take attempt.
#[derive(Debug)]
pub struct TokenBucket {
    capacity: f64,
    tokens: f64,
    refill_per_second: f64,
    last_refill: Instant,
}

impl TokenBucket {
    pub fn new(rate_per_second: u32) -> Self {
        let rate = rate_per_second as f64;
        Self {
            capacity: rate,
            tokens: rate,
            refill_per_second: rate,
            last_refill: Instant::now(),
        }
    }

    pub fn try_take(&mut self, now: Instant) -> bool {
        let elapsed = now.saturating_duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.refill_per_second).min(self.capacity);
        self.last_refill = now;

        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}

struct Subscriber {
    tx: mpsc::Sender<Arc<EventBatch>>,
    bucket: TokenBucket,
}

/// Live subscriber sessions and their paced, non-blocking emitters.
///
/// Fan-out never blocks ingestion: the per-session channel has depth 1,
/// sends are try-sends, and a session that is rate-limited or full
/// simply misses that batch. Sessions whose receiver is gone are pruned
/// on the next fan-out.
pub struct SubscriberRegistry {
    sessions: Mutex<HashMap<u64, Subscriber>>,
    next_session: AtomicU64,
    rate_per_second: u32,
    dropped: AtomicU64,
}

impl SubscriberRegistry {
    pub fn new(rate_per_second: u32) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            next_session: AtomicU64::new(1),
            rate_per_second,
            dropped: AtomicU64::new(0),
        }
    }

    pub fn subscribe(&self) -> (u64, mpsc::Receiver<Arc<EventBatch>>) {
        let (tx, rx) = mpsc::channel(1);
        let session = self.next_session.fetch_add(1, Ordering::Relaxed);

        let mut sessions = self.sessions.lock().expect("subscriber map lock poisoned");
        sessions.insert(
            session,
            Subscriber {
                tx,
                bucket: TokenBucket::new(self.rate_per_second),
            },
        );
        debug!("Subscriber session {session} added ({} live)", sessions.len());

        (session, rx)
    }

    pub fn unsubscribe(&self, session: u64) -> bool {
        let mut sessions = self.sessions.lock().expect("subscriber map lock poisoned");
        let removed = sessions.remove(&session).is_some();
        if removed {
            debug!(
                "Subscriber session {session} removed ({} live)",
                sessions.len()
            );
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.sessions
            .lock()
            .expect("subscriber map lock poisoned")
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Total messages dropped across all sessions, for health surfaces.
    pub fn dropped_total(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Delivers the batch to every session whose token bucket allows it.
    /// Returns how many sessions actually accepted the batch.
    ///
    /// Pacing decisions happen under the map lock; the sends themselves
    /// happen after it is released.
    pub fn fan_out(&self, batch: &Arc<EventBatch>) -> usize {
        let now = Instant::now();

        let targets: Vec<(u64, mpsc::Sender<Arc<EventBatch>>)> = {
            let mut sessions = self.sessions.lock().expect("subscriber map lock poisoned");
            sessions
                .iter_mut()
                .filter_map(|(session, subscriber)| {
                    if subscriber.bucket.try_take(now) {
                        Some((*session, subscriber.tx.clone()))
                    } else {
                        self.dropped.fetch_add(1, Ordering::Relaxed);
                        None
                    }
                })
                .collect()
        };

        let mut delivered = 0;
        let mut closed = Vec::new();
        for (session, tx) in targets {
            match tx.try_send(batch.clone()) {
                Ok(()) => delivered += 1,
                Err(TrySendError::Full(_)) => {
                    self.dropped.fetch_add(1, Ordering::Relaxed);
                }
                Err(TrySendError::Closed(_)) => closed.push(session),
            }
        }

        for session in closed {
            self.unsubscribe(session);
        }

        delivered
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn batch(sequence: u64) -> Arc<EventBatch> {
        Arc::new(EventBatch {
            batch_id: None,
            batch_sequence: sequence,
            events: Vec::new(),
            edge_metrics: None,
            sent_at: None,
        })
    }

    #[test]
    fn bucket_allows_burst_then_limits() {
        let mut bucket = TokenBucket::new(2);
        let t0 = Instant::now();

        assert!(bucket.try_take(t0));
        assert!(bucket.try_take(t0));
        assert!(!bucket.try_take(t0));

        // Half a second refills one token at 2/s
        assert!(bucket.try_take(t0 + Duration::from_millis(500)));
        assert!(!bucket.try_take(t0 + Duration::from_millis(500)));
    }

    #[test]
    fn bucket_never_exceeds_burst_capacity() {
        let mut bucket = TokenBucket::new(2);
        let t0 = Instant::now();

        // A long idle period must not bank more than `capacity` tokens
        let later = t0 + Duration::from_secs(3600);
        assert!(bucket.try_take(later));
        assert!(bucket.try_take(later));
        assert!(!bucket.try_take(later));
    }

    #[tokio::test]
    async fn fan_out_reaches_live_subscribers() {
        let registry = SubscriberRegistry::new(20);
        let (_session, mut rx) = registry.subscribe();

        assert_eq!(registry.fan_out(&batch(1)), 1);
        let received = rx.recv().await.unwrap();
        assert_eq!(received.batch_sequence, 1);
    }

    #[tokio::test]
    async fn full_session_drops_without_affecting_others() {
        let registry = SubscriberRegistry::new(20);
        let (_slow, _slow_rx) = registry.subscribe();
        let (_fast, mut fast_rx) = registry.subscribe();

        // First batch fills the slow session's depth-1 channel (nobody
        // is reading it); the second only fits the fast session.
        assert_eq!(registry.fan_out(&batch(1)), 2);
        assert_eq!(registry.fan_out(&batch(2)), 1);
        assert_eq!(registry.dropped_total(), 1);

        assert_eq!(fast_rx.recv().await.unwrap().batch_sequence, 1);
        assert_eq!(fast_rx.recv().await.unwrap().batch_sequence, 2);
    }

    #[tokio::test]
    async fn disconnected_subscribers_are_pruned() {
        let registry = SubscriberRegistry::new(20);
        let (_session, rx) = registry.subscribe();
        assert_eq!(registry.len(), 1);

        drop(rx);
        registry.fan_out(&batch(1));
        assert_eq!(registry.len(), 0);
    }

    #[tokio::test]
    async fn rate_limited_session_misses_the_batch() {
        let registry = SubscriberRegistry::new(1);
        let (_session, mut rx) = registry.subscribe();

        assert_eq!(registry.fan_out(&batch(1)), 1);
        // Drain so the channel itself has room; the bucket is now empty
        rx.recv().await.unwrap();
        assert_eq!(registry.fan_out(&batch(2)), 0);
        assert_eq!(registry.dropped_total(), 1);
    }
}
