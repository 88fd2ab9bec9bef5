//! Shared settings with generation tracking
//!
//! `SettingsHandle` is the explicit replacement for process-wide settings.
//! Readers get a cheap `Arc<Settings>` snapshot. `reconfigure` swaps in a
//! validated copy and bumps the generation counter, so anything derived from
//! the settings (HTTP clients, caches) can tell that it is stale and rebuild
//! itself on next access.

use crate::config::Settings;
use crate::Result;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use tracing::info;

static NEXT_HANDLE_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug)]
pub struct SettingsHandle {
    id: u64,
    settings: RwLock<Arc<Settings>>,
    generation: AtomicU64,
}

impl SettingsHandle {
    /// Create a handle; the settings are validated first
    pub fn new(settings: Settings) -> Result<Self> {
        settings.validate()?;
        Ok(Self {
            id: NEXT_HANDLE_ID.fetch_add(1, Ordering::Relaxed),
            settings: RwLock::new(Arc::new(settings)),
            generation: AtomicU64::new(0),
        })
    }

    /// Process-unique identifier of this handle
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Current generation; increases on every successful `reconfigure`
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    /// Snapshot of the current settings
    pub fn current(&self) -> Arc<Settings> {
        let guard = self.settings.read().unwrap_or_else(|e| e.into_inner());
        Arc::clone(&guard)
    }

    /// Snapshot together with the generation it belongs to
    pub fn snapshot(&self) -> (u64, Arc<Settings>) {
        let guard = self.settings.read().unwrap_or_else(|e| e.into_inner());
        (self.generation(), Arc::clone(&guard))
    }

    /// Apply a change between runs
    ///
    /// The edit runs on a copy. If the result fails validation nothing
    /// changes and the error is returned.
    pub fn reconfigure(&self, edit: impl FnOnce(&mut Settings)) -> Result<u64> {
        let mut guard = self.settings.write().unwrap_or_else(|e| e.into_inner());
        let mut next = Settings::clone(&guard);
        edit(&mut next);
        next.validate()?;
        *guard = Arc::new(next);
        let generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
        info!(generation, "Settings reconfigured");
        Ok(generation)
    }
}
