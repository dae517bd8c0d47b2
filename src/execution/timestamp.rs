// Statement timestamp: every reference inside one execution sees the same
// wall-clock value, assigned on first use and cleared by reset.

use crate::common::Value;
use chrono::Utc;
use parking_lot::Mutex;

pub struct StatementTimestamp {
    value: Mutex<Option<i64>>,
}

impl Default for StatementTimestamp {
    fn default() -> Self {
        Self::new()
    }
}

impl StatementTimestamp {
    pub fn new() -> Self {
        Self {
            value: Mutex::new(None),
        }
    }

    /// Current statement time in microseconds since the epoch.
    pub fn assign(&self) -> Value {
        let mut value = self.value.lock();
        let micros = *value.get_or_insert_with(|| Utc::now().timestamp_micros());
        Value::BigInt(micros)
    }

    pub fn reset(&self) {
        *self.value.lock() = None;
    }
}
