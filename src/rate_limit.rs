//! Global cooldown on the interactive chat path.

use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::error::{AnalystError, Result};

/// Admits at most one request per `interval`. Only admitted requests move the
/// window; a rejected request does not extend it.
#[derive(Debug)]
pub struct Cooldown {
    interval: Duration,
    last_accepted: Mutex<Option<Instant>>,
}

impl Cooldown {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_accepted: Mutex::new(None),
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn check(&self) -> Result<()> {
        self.check_at(Instant::now())
    }

    pub fn check_at(&self, now: Instant) -> Result<()> {
        let mut last = self.last_accepted.lock().unwrap_or_else(|p| p.into_inner());
        if let Some(prev) = *last {
            let elapsed = now.saturating_duration_since(prev);
            if elapsed < self.interval {
                return Err(AnalystError::RateLimited {
                    retry_after: self.interval - elapsed,
                });
            }
        }
        *last = Some(now);
        Ok(())
    }
}
