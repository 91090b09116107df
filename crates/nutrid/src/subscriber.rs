//! Update notifications
//!
//! Every `UpdateOutcome` is published once to all registered subscribers.
//! A subscriber that fails or panics is logged and skipped; the others still
//! receive the outcome.

use nutri_common::UpdateOutcome;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{error, info, warn};

/// Receiver of update outcomes
pub trait UpdateSubscriber: Send + Sync {
    fn on_update_complete(&self, outcome: &UpdateOutcome) -> anyhow::Result<()>;
}

impl<F> UpdateSubscriber for F
where
    F: Fn(&UpdateOutcome) -> anyhow::Result<()> + Send + Sync,
{
    fn on_update_complete(&self, outcome: &UpdateOutcome) -> anyhow::Result<()> {
        self(outcome)
    }
}

/// Deliver `outcome` to every subscriber in registration order
pub fn publish(subscribers: &[Arc<dyn UpdateSubscriber>], outcome: &UpdateOutcome) {
    for (index, subscriber) in subscribers.iter().enumerate() {
        match catch_unwind(AssertUnwindSafe(|| subscriber.on_update_complete(outcome))) {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(
                "Update subscriber #{} failed for {}: {:#}",
                index, outcome.source, e
            ),
            Err(_) => error!(
                "Update subscriber #{} panicked for {}",
                index, outcome.source
            ),
        }
    }
}

/// Shared, growable subscriber list.
///
/// Clones share one list, so subscribers can be added while an update cycle
/// holds the manager.
#[derive(Clone, Default)]
pub struct SubscriberList {
    inner: Arc<Mutex<Vec<Arc<dyn UpdateSubscriber>>>>,
}

impl SubscriberList {
    fn entries(&self) -> MutexGuard<'_, Vec<Arc<dyn UpdateSubscriber>>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn add(&self, subscriber: Arc<dyn UpdateSubscriber>) {
        self.entries().push(subscriber);
    }

    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries().is_empty()
    }

    /// Deliver `outcome` without holding the list lock
    pub fn publish(&self, outcome: &UpdateOutcome) {
        let subscribers = self.entries().clone();
        publish(&subscribers, outcome);
    }
}

/// Logs every outcome
pub struct LoggingSubscriber;

impl UpdateSubscriber for LoggingSubscriber {
    fn on_update_complete(&self, outcome: &UpdateOutcome) -> anyhow::Result<()> {
        if outcome.success {
            if outcome.is_noop() {
                info!("Database {} unchanged", outcome.source);
            } else {
                info!(
                    "Database {} updated to {} ({}, {:.1}s)",
                    outcome.source,
                    outcome.new_version.as_deref().unwrap_or("?"),
                    outcome.change_summary(),
                    outcome.duration.as_secs_f64()
                );
            }
        } else {
            warn!(
                "Database {} update failed: {}",
                outcome.source,
                outcome.errors.join("; ")
            );
        }
        Ok(())
    }
}
