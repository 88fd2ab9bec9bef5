//! Application context
//!
//! Everything a calendar run shares: the settings handle, the IR cache
//! handle and the per-worker HTTP clients. It is passed explicitly; there is
//! no process-wide state.
//!
//! # Reconfiguration
//! `reconfigure` bumps the settings generation. HTTP clients are cached per
//! worker thread, one per client kind, tagged with the context id and the
//! generation they were built for; the IR cache handle is tagged with the
//! generation too. A stale entry is rebuilt on its next access, so the next run sees
//! the new settings without a restart.

use crate::error::SourceError;
use crate::fetch::{HttpClient, PageFetcher};
use crate::ir::cache::IrCache;
use crate::types::PatternCodeValidator;
use async_trait::async_trait;
use kabu_common::{Settings, SettingsHandle};
use std::cell::RefCell;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum ClientKind {
    Calendar,
    Ir,
}

thread_local! {
    /// Client kind -> (context id, generation, client)
    static CLIENTS: RefCell<HashMap<ClientKind, (u64, u64, HttpClient)>> =
        RefCell::new(HashMap::new());
}

#[derive(Debug)]
pub struct AppContext {
    settings: SettingsHandle,
    ir_cache: Mutex<Option<(u64, Arc<IrCache>)>>,
}

impl AppContext {
    pub fn new(settings: Settings) -> kabu_common::Result<Arc<Self>> {
        Ok(Arc::new(Self {
            settings: SettingsHandle::new(settings)?,
            ir_cache: Mutex::new(None),
        }))
    }

    /// Snapshot of the current settings
    pub fn settings(&self) -> Arc<Settings> {
        self.settings.current()
    }

    pub fn generation(&self) -> u64 {
        self.settings.generation()
    }

    /// Change settings between runs; dependent handles rebuild lazily
    pub fn reconfigure(&self, edit: impl FnOnce(&mut Settings)) -> kabu_common::Result<u64> {
        self.settings.reconfigure(edit)
    }

    /// HTTP client for calendar sources and history lookups
    pub fn http_client(&self) -> Result<HttpClient, SourceError> {
        self.cached_client(ClientKind::Calendar)
    }

    /// HTTP client for company IR pages (separate timeout)
    pub fn ir_http_client(&self) -> Result<HttpClient, SourceError> {
        self.cached_client(ClientKind::Ir)
    }

    fn cached_client(&self, kind: ClientKind) -> Result<HttpClient, SourceError> {
        let id = self.settings.id();
        let (generation, settings) = self.settings.snapshot();

        let cached = CLIENTS.with(|clients| {
            clients
                .borrow()
                .get(&kind)
                .filter(|(owner, built_for, _)| *owner == id && *built_for == generation)
                .map(|(_, _, client)| client.clone())
        });
        if let Some(client) = cached {
            return Ok(client);
        }

        let timeout = match kind {
            ClientKind::Calendar => settings.timeout(),
            ClientKind::Ir => settings.ir_timeout(),
        };
        let client = HttpClient::new(&settings.user_agent, timeout)?;
        debug!(?kind, generation, "Built HTTP client for worker");

        CLIENTS.with(|clients| {
            clients.borrow_mut().insert(kind, (id, generation, client.clone()));
        });
        Ok(client)
    }

    /// IR cache handle for the current settings
    pub fn ir_cache(&self) -> Arc<IrCache> {
        let (generation, settings) = self.settings.snapshot();
        let mut slot = self.ir_cache.lock().unwrap_or_else(|e| e.into_inner());

        if let Some((built_for, cache)) = slot.as_ref() {
            if *built_for == generation {
                return Arc::clone(cache);
            }
        }

        let cache = Arc::new(IrCache::new(settings.ir_cache_path(), settings.cache_ttl()));
        *slot = Some((generation, Arc::clone(&cache)));
        cache
    }

    /// Code rule from the current settings
    pub fn code_validator(&self) -> kabu_common::Result<PatternCodeValidator> {
        let settings = self.settings();
        PatternCodeValidator::new(&settings.code_pattern).map_err(|e| {
            kabu_common::Error::Config(format!("Invalid code_pattern: {}", e))
        })
    }
}

/// [`PageFetcher`] that takes the current worker's client from a context
pub struct ContextFetcher {
    ctx: Arc<AppContext>,
    kind: ClientKind,
}

impl ContextFetcher {
    /// Uses the calendar client (`timeout_secs`)
    pub fn calendar(ctx: Arc<AppContext>) -> Self {
        Self {
            ctx,
            kind: ClientKind::Calendar,
        }
    }

    /// Uses the IR client (`ir_timeout_secs`)
    pub fn ir(ctx: Arc<AppContext>) -> Self {
        Self {
            ctx,
            kind: ClientKind::Ir,
        }
    }
}

#[async_trait]
impl PageFetcher for ContextFetcher {
    async fn fetch_page(&self, url: &str) -> Result<String, SourceError> {
        let client = self.ctx.cached_client(self.kind)?;
        client.get_text(url).await
    }
}
