//! Clock abstraction so that recordings can be driven by a host-provided time source

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

pub type SharedClock = Arc<dyn Clock>;

/// A source of wall-clock time for timestamp frames and time budgets.
pub trait Clock: Send + Sync + 'static {
    fn now_epoch_ms(&self) -> u64;
}

/// The system clock
#[derive(Default)]
pub struct SystemClock;
impl Clock for SystemClock {
    fn now_epoch_ms(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0)
    }
}
