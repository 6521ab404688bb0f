//! Snowflake-style 64-bit id generator.
//!
//! Layout, most significant first: 41 bits of milliseconds since
//! 2024-01-01T00:00:00Z, 5 bits datacenter id, 5 bits worker id, 12 bits
//! sequence. Ids are strictly increasing within one generator. A clock that
//! moves backwards is reported as an error rather than papered over.

use parking_lot::Mutex;

use crate::error::{AppError, Result};

const WORKER_ID_BITS: u64 = 5;
const DATACENTER_ID_BITS: u64 = 5;
const SEQUENCE_BITS: u64 = 12;

/// Largest accepted worker id.
pub const MAX_WORKER_ID: u64 = (1 << WORKER_ID_BITS) - 1;
/// Largest accepted datacenter id.
pub const MAX_DATACENTER_ID: u64 = (1 << DATACENTER_ID_BITS) - 1;
const SEQUENCE_MASK: u64 = (1 << SEQUENCE_BITS) - 1;

const WORKER_ID_SHIFT: u64 = SEQUENCE_BITS;
const DATACENTER_ID_SHIFT: u64 = SEQUENCE_BITS + WORKER_ID_BITS;
const TIMESTAMP_SHIFT: u64 = SEQUENCE_BITS + WORKER_ID_BITS + DATACENTER_ID_BITS;

/// 2024-01-01T00:00:00Z in epoch milliseconds.
pub const EPOCH_MILLIS: i64 = 1_704_067_200_000;

type Clock = Box<dyn Fn() -> i64 + Send + Sync>;

struct State {
    last_timestamp: i64,
    sequence: u64,
}

/// Generates unique, time-ordered ids. Share it behind an `Arc`.
pub struct IdGenerator {
    worker_id: u64,
    datacenter_id: u64,
    state: Mutex<State>,
    clock: Clock,
}

impl std::fmt::Debug for IdGenerator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdGenerator")
            .field("worker_id", &self.worker_id)
            .field("datacenter_id", &self.datacenter_id)
            .finish()
    }
}

impl IdGenerator {
    /// Creates a generator reading the system clock.
    pub fn new(worker_id: u64, datacenter_id: u64) -> Result<Self> {
        Self::with_clock(worker_id, datacenter_id, || {
            chrono::Utc::now().timestamp_millis()
        })
    }

    /// Creates a generator reading milliseconds from `clock`.
    pub fn with_clock<C>(worker_id: u64, datacenter_id: u64, clock: C) -> Result<Self>
    where
        C: Fn() -> i64 + Send + Sync + 'static,
    {
        if worker_id > MAX_WORKER_ID {
            return Err(AppError::ConfigInvalid(format!(
                "Worker ID must be between 0 and {}",
                MAX_WORKER_ID
            )));
        }
        if datacenter_id > MAX_DATACENTER_ID {
            return Err(AppError::ConfigInvalid(format!(
                "Datacenter ID must be between 0 and {}",
                MAX_DATACENTER_ID
            )));
        }

        Ok(Self {
            worker_id,
            datacenter_id,
            state: Mutex::new(State {
                last_timestamp: -1,
                sequence: 0,
            }),
            clock: Box::new(clock),
        })
    }

    /// Returns the next id.
    pub fn next_id(&self) -> Result<u64> {
        let mut state = self.state.lock();
        let mut timestamp = (self.clock)();

        if timestamp < state.last_timestamp {
            return Err(AppError::ClockMovedBackwards {
                millis: state.last_timestamp - timestamp,
            });
        }

        if timestamp == state.last_timestamp {
            state.sequence = (state.sequence + 1) & SEQUENCE_MASK;
            if state.sequence == 0 {
                // Sequence exhausted for this millisecond.
                while timestamp <= state.last_timestamp {
                    std::hint::spin_loop();
                    timestamp = (self.clock)();
                }
            }
        } else {
            state.sequence = 0;
        }

        if timestamp < EPOCH_MILLIS {
            return Err(AppError::Internal(
                "system clock is before the id epoch".to_string(),
            ));
        }

        state.last_timestamp = timestamp;

        Ok((((timestamp - EPOCH_MILLIS) as u64) << TIMESTAMP_SHIFT)
            | (self.datacenter_id << DATACENTER_ID_SHIFT)
            | (self.worker_id << WORKER_ID_SHIFT)
            | state.sequence)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicI64, Ordering};

    const T0: i64 = EPOCH_MILLIS + 1_000;

    fn manual_clock(start: i64) -> (Arc<AtomicI64>, impl Fn() -> i64 + Send + Sync + 'static) {
        let now = Arc::new(AtomicI64::new(start));
        let handle = now.clone();
        (now, move || handle.load(Ordering::SeqCst))
    }

    #[test]
    fn rejects_out_of_range_ids() {
        assert!(IdGenerator::new(MAX_WORKER_ID + 1, 0).is_err());
        assert!(IdGenerator::new(0, MAX_DATACENTER_ID + 1).is_err());
        assert!(IdGenerator::new(MAX_WORKER_ID, MAX_DATACENTER_ID).is_ok());
    }

    #[test]
    fn ids_increase_within_one_millisecond() {
        let (_now, clock) = manual_clock(T0);
        let generator = IdGenerator::with_clock(3, 7, clock).unwrap();
        let first = generator.next_id().unwrap();
        let second = generator.next_id().unwrap();
        assert!(second > first);
        assert_eq!(second - first, 1);
        assert_eq!((first >> WORKER_ID_SHIFT) & MAX_WORKER_ID, 3);
        assert_eq!((first >> DATACENTER_ID_SHIFT) & MAX_DATACENTER_ID, 7);
        assert_eq!(first >> TIMESTAMP_SHIFT, 1_000);
    }

    #[test]
    fn backwards_clock_fails_loudly() {
        let (now, clock) = manual_clock(T0);
        let generator = IdGenerator::with_clock(0, 0, clock).unwrap();
        generator.next_id().unwrap();
        now.store(T0 - 5, Ordering::SeqCst);
        match generator.next_id() {
            Err(AppError::ClockMovedBackwards { millis }) => assert_eq!(millis, 5),
            other => panic!("expected clock error, got {:?}", other),
        }
    }

    #[test]
    fn concurrent_callers_never_collide() {
        let generator = Arc::new(IdGenerator::new(1, 1).unwrap());
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let generator = generator.clone();
                std::thread::spawn(move || {
                    (0..2_000)
                        .map(|_| generator.next_id().unwrap())
                        .collect::<Vec<_>>()
                })
            })
            .collect();

        let mut all: Vec<u64> = handles
            .into_iter()
            .flat_map(|h| h.join().unwrap())
            .collect();
        let total = all.len();
        all.sort_unstable();
        all.dedup();
        assert_eq!(all.len(), total);
    }
}
