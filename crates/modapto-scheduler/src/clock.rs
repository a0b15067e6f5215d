use chrono::{DateTime, Utc};

use modapto_types::to_seconds;

/// Source of "now" for scheduling arithmetic, at second precision.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall-clock time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        to_seconds(Utc::now())
    }
}
