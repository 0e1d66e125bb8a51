//! Batching
//!
//! A batch function wraps a group of listener calls so a host scheduler can
//! coalesce the work they trigger. The default calls straight through.
//!
//! There is one process-wide slot, set once at startup by host integration
//! code. Trees read it when they are built; tests inject their own batch
//! through [`super::SubscriptionTree::with_batch`] instead.

use std::sync::{Arc, OnceLock};

use tracing::debug;

use crate::error::{Result, StoreError};

type BatchFn = dyn Fn(&mut dyn FnMut()) + Send + Sync;

/// A pluggable wrapper around groups of listener calls.
#[derive(Clone)]
pub struct Batch {
    run: Arc<BatchFn>,
}

impl Batch {
    /// Wrap a batch function. It must call the closure it receives exactly
    /// once, synchronously.
    pub fn new<F>(run: F) -> Self
    where
        F: Fn(&mut dyn FnMut()) + Send + Sync + 'static,
    {
        Self { run: Arc::new(run) }
    }

    /// No coalescing: run the group immediately.
    pub fn immediate() -> Self {
        Self::new(|callback| callback())
    }

    /// Run `callback` inside this batch.
    pub fn run(&self, callback: &mut dyn FnMut()) {
        (self.run)(callback);
    }
}

impl Default for Batch {
    fn default() -> Self {
        Self::immediate()
    }
}

impl std::fmt::Debug for Batch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Batch")
    }
}

static GLOBAL_BATCH: OnceLock<Batch> = OnceLock::new();

/// Install the process-wide batch function. May only be called once.
pub fn set_batch(batch: Batch) -> Result<()> {
    GLOBAL_BATCH
        .set(batch)
        .map_err(|_| StoreError::Config("the batch function has already been set".into()))?;
    debug!("global batch function installed");
    Ok(())
}

/// The process-wide batch function, or [`Batch::immediate`] if none was set.
pub fn batch() -> Batch {
    GLOBAL_BATCH.get().cloned().unwrap_or_default()
}
