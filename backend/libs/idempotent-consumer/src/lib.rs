//! # Idempotent Event Consumer
//!
//! Exactly-once application of events delivered at-least-once by a realtime
//! change stream. Each delivery carries a stable event id (for row change
//! events: `table:kind:row-id`); the guard remembers ids it has already
//! applied and reports re-deliveries as duplicates.
//!
//! ## Problem
//!
//! Push channels redeliver after reconnects and may fan the same row change
//! out twice. Applying a duplicate insert to a client cache shows the same
//! comment or message twice and drifts counters.
//!
//! ## Solution
//!
//! Track processed event ids in memory:
//! - **Bounded**: at most `capacity` ids are remembered, oldest evicted first
//! - **Retention**: ids older than the retention window are dropped by
//!   [`IdempotencyGuard::cleanup_old_events`]
//! - **Shareable**: clones share the same id set
//!
//! ```text
//! Realtime channel → Subscription → IdempotencyGuard → Reducer → Store
//!                                        ↓
//!                                  (Check/Store)
//!                                        ↓
//!                               processed id window
//! ```
//!
//! ## Usage Example
//!
//! ```ignore
//! use idempotent_consumer::{IdempotencyGuard, ProcessingResult};
//! use std::time::Duration;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let guard = IdempotencyGuard::new(10_000, Duration::from_secs(3600));
//!
//! match guard.process_if_new("comments:insert:42", || async {
//!     // merge the row into local state
//!     Ok(())
//! }).await? {
//!     ProcessingResult::Success => {}
//!     ProcessingResult::AlreadyProcessed => {}
//!     ProcessingResult::Failed(err) => eprintln!("merge failed: {err}"),
//! }
//! # Ok(())
//! # }
//! ```

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

mod error;

pub use error::{IdempotencyError, IdempotencyResult};

/// Maximum accepted length of an event id
const MAX_EVENT_ID_LEN: usize = 255;

/// Result of processing an event with idempotency check
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessingResult {
    /// Event was processed successfully (first time)
    Success,

    /// Event was already processed before (duplicate)
    AlreadyProcessed,

    /// Event processing failed with error message
    Failed(String),
}

impl ProcessingResult {
    /// Check if processing was successful (either first time or already processed)
    pub fn is_ok(&self) -> bool {
        matches!(
            self,
            ProcessingResult::Success | ProcessingResult::AlreadyProcessed
        )
    }

    /// Check if processing failed
    pub fn is_failed(&self) -> bool {
        matches!(self, ProcessingResult::Failed(_))
    }
}

/// A remembered event id
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessedEvent {
    /// Unique event identifier
    pub event_id: String,

    /// Timestamp when event was marked processed
    pub processed_at: DateTime<Utc>,

    /// Optional metadata about processing (scope, table, ...)
    pub metadata: Option<serde_json::Value>,
}

#[derive(Debug, Default)]
struct ProcessedWindow {
    by_id: HashMap<String, ProcessedEvent>,
    order: VecDeque<String>,
}

impl ProcessedWindow {
    fn evict_oldest(&mut self) -> Option<ProcessedEvent> {
        while let Some(oldest) = self.order.pop_front() {
            if let Some(event) = self.by_id.remove(&oldest) {
                return Some(event);
            }
        }
        None
    }
}

/// Idempotency guard for realtime event processing
///
/// Cloning is cheap; clones share one processed-id window.
#[derive(Clone)]
pub struct IdempotencyGuard {
    window: Arc<Mutex<ProcessedWindow>>,
    capacity: usize,
    retention_duration: Duration,
}

impl IdempotencyGuard {
    /// Create a new idempotency guard
    ///
    /// * `capacity` - Maximum number of ids remembered (at least 1)
    /// * `retention_duration` - How long a processed id is kept
    pub fn new(capacity: usize, retention_duration: Duration) -> Self {
        Self {
            window: Arc::new(Mutex::new(ProcessedWindow::default())),
            capacity: capacity.max(1),
            retention_duration,
        }
    }

    /// Check if an event has already been processed
    pub fn is_processed(&self, event_id: &str) -> IdempotencyResult<bool> {
        Self::validate_event_id(event_id)?;

        let exists = self.window.lock().by_id.contains_key(event_id);
        if exists {
            debug!(event_id = %event_id, "Event already processed");
        }

        Ok(exists)
    }

    /// Mark an event as processed
    ///
    /// Returns `Ok(true)` the first time an id is marked and `Ok(false)` for
    /// a duplicate.
    pub fn mark_processed(
        &self,
        event_id: &str,
        metadata: Option<serde_json::Value>,
    ) -> IdempotencyResult<bool> {
        Self::validate_event_id(event_id)?;

        let mut window = self.window.lock();
        if window.by_id.contains_key(event_id) {
            debug!(
                event_id = %event_id,
                "Event already marked as processed (duplicate)"
            );
            return Ok(false);
        }

        while window.by_id.len() >= self.capacity {
            if let Some(evicted) = window.evict_oldest() {
                debug!(event_id = %evicted.event_id, "Evicted processed event id");
            } else {
                break;
            }
        }

        let has_metadata = metadata.is_some();
        window.order.push_back(event_id.to_string());
        window.by_id.insert(
            event_id.to_string(),
            ProcessedEvent {
                event_id: event_id.to_string(),
                processed_at: Utc::now(),
                metadata,
            },
        );

        debug!(
            event_id = %event_id,
            has_metadata,
            "Event marked as processed"
        );

        Ok(true)
    }

    /// Process event only if it hasn't been processed before
    ///
    /// The id is recorded only after `f` succeeds, so a failed merge can be
    /// retried by a later re-delivery.
    pub async fn process_if_new<F, Fut, E>(
        &self,
        event_id: &str,
        f: F,
    ) -> IdempotencyResult<ProcessingResult>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<(), E>>,
        E: std::fmt::Display,
    {
        if self.is_processed(event_id)? {
            return Ok(ProcessingResult::AlreadyProcessed);
        }

        match f().await {
            Ok(()) => {
                // A concurrent delivery may have finished first while `f` was suspended.
                if self.mark_processed(event_id, None)? {
                    Ok(ProcessingResult::Success)
                } else {
                    Ok(ProcessingResult::AlreadyProcessed)
                }
            }
            Err(e) => {
                warn!(
                    event_id = %event_id,
                    error = %e,
                    "Event processing failed"
                );
                Ok(ProcessingResult::Failed(e.to_string()))
            }
        }
    }

    /// Drop ids older than the retention window
    ///
    /// Returns the number of ids removed.
    pub fn cleanup_old_events(&self) -> IdempotencyResult<u64> {
        let retention = chrono::Duration::from_std(self.retention_duration).map_err(|e| {
            IdempotencyError::InvalidRetention(format!("Invalid retention duration: {}", e))
        })?;
        let cutoff_time = Utc::now() - retention;

        let mut window = self.window.lock();
        let before = window.by_id.len();
        window.by_id.retain(|_, event| event.processed_at >= cutoff_time);
        let ProcessedWindow { by_id, order } = &mut *window;
        order.retain(|id| by_id.contains_key(id));
        let deleted_count = (before - window.by_id.len()) as u64;

        if deleted_count > 0 {
            info!(
                deleted_count = deleted_count,
                cutoff_time = %cutoff_time,
                "Cleaned up old processed events"
            );
        } else {
            debug!("No old events to cleanup");
        }

        Ok(deleted_count)
    }

    /// Forget every processed id (used when the protected cache is rebuilt)
    pub fn reset(&self) {
        let mut window = self.window.lock();
        window.by_id.clear();
        window.order.clear();
    }

    /// Number of ids currently remembered
    pub fn len(&self) -> usize {
        self.window.lock().by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Validate event_id format
    fn validate_event_id(event_id: &str) -> IdempotencyResult<()> {
        if event_id.is_empty() {
            return Err(IdempotencyError::InvalidEventId(
                "Event ID cannot be empty".to_string(),
            ));
        }

        if event_id.len() > MAX_EVENT_ID_LEN {
            return Err(IdempotencyError::InvalidEventId(format!(
                "Event ID too long: {} characters (max {})",
                event_id.len(),
                MAX_EVENT_ID_LEN
            )));
        }

        Ok(())
    }
}
