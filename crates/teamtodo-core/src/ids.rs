use chrono::Utc;
use parking_lot::Mutex;

use crate::error::{Result, TaskError};

/// Largest id a stored record may carry: the biggest integer a JSON number
/// holds exactly in a browser (`Number.MAX_SAFE_INTEGER`).
pub const MAX_TASK_ID: i64 = (1 << 53) - 1;

/// Hands out timestamp-based task ids that never go backwards.
///
/// Every id observed through [`IdClock::observe`] raises the high-water mark,
/// so an id that existed once (even if its task was deleted since) is never
/// issued again by this clock. Ids never exceed [`MAX_TASK_ID`].
#[derive(Debug, Default)]
pub struct IdClock {
    last: Mutex<i64>,
}

impl IdClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next_id(&self) -> Result<i64> {
        self.next_at(Utc::now().timestamp_millis())
    }

    pub fn next_at(&self, now_millis: i64) -> Result<i64> {
        let mut last = self.last.lock();
        let id = now_millis.max(last.saturating_add(1));
        if id > MAX_TASK_ID {
            return Err(TaskError::IdsExhausted { last: *last });
        }
        *last = id;
        Ok(id)
    }

    pub fn observe<I>(&self, ids: I)
    where
        I: IntoIterator<Item = i64>,
    {
        let mut last = self.last.lock();
        for id in ids {
            if id > *last {
                *last = id;
            }
        }
    }

    pub fn high_water(&self) -> i64 {
        *self.last.lock()
    }
}

#[cfg(test)]
mod tests {
    use super::{IdClock, MAX_TASK_ID};
    use crate::error::TaskError;

    #[test]
    fn ids_strictly_increase_when_clock_stalls() {
        let clock = IdClock::new();
        assert_eq!(clock.next_at(1_000), Ok(1_000));
        assert_eq!(clock.next_at(1_000), Ok(1_001));
        assert_eq!(clock.next_at(999), Ok(1_002));
        assert_eq!(clock.next_at(5_000), Ok(5_000));
    }

    #[test]
    fn observed_ids_are_never_reissued() {
        let clock = IdClock::new();
        clock.observe([10, 9_000_000, 42]);
        assert_eq!(clock.next_at(1_000), Ok(9_000_001));
        assert_eq!(clock.high_water(), 9_000_001);
    }

    #[test]
    fn clock_refuses_to_repeat_at_the_top_of_the_range() {
        let clock = IdClock::new();
        clock.observe([MAX_TASK_ID - 1]);
        assert_eq!(clock.next_at(1_000), Ok(MAX_TASK_ID));
        assert!(matches!(clock.next_at(1_000), Err(TaskError::IdsExhausted { .. })));
        assert!(matches!(clock.next_at(1_000), Err(TaskError::IdsExhausted { .. })));
        assert_eq!(clock.high_water(), MAX_TASK_ID);

        let saturated = IdClock::new();
        saturated.observe([i64::MAX]);
        assert!(saturated.next_at(1_000).is_err());
    }
}
