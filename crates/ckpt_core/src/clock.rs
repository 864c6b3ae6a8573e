//! Injectable wall clock.

use crate::TimeProvider;
use chrono::{DateTime, Utc};
use std::fmt;
use std::sync::Arc;

/// Source of "now" shared by every component of an engine.
///
/// Uses the system clock unless a [`TimeProvider`] was injected.
#[derive(Clone, Default)]
pub struct Clock {
    provider: Option<Arc<dyn TimeProvider>>,
}

impl Clock {
    /// System time.
    pub fn system() -> Self {
        Self::default()
    }

    /// Time from `provider`, in Unix milliseconds.
    pub fn from_provider(provider: impl TimeProvider + 'static) -> Self {
        Self {
            provider: Some(Arc::new(provider)),
        }
    }

    /// Current Unix time in milliseconds.
    pub fn now_ms(&self) -> i64 {
        match &self.provider {
            Some(provider) => provider.now(),
            None => Utc::now().timestamp_millis(),
        }
    }

    /// Current time.
    pub fn now(&self) -> DateTime<Utc> {
        DateTime::<Utc>::from_timestamp_millis(self.now_ms()).unwrap_or_default()
    }
}

impl fmt::Debug for Clock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Clock")
            .field("injected", &self.provider.is_some())
            .finish()
    }
}
