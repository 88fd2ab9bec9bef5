//! IR page discovery
//!
//! Finding an arbitrary company's IR page needs heuristics or a language
//! model, which this crate does not ship. [`CuratedDiscovery`] covers the
//! practical case: pages listed by hand (or learned earlier) in the IR cache
//! file, plus any URLs registered in code.

use super::cache::IrCache;
use super::{detect_page_type, IrPageInfo};
use crate::error::SourceError;
use crate::types::StockCode;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

#[async_trait]
pub trait IrDiscovery: Send + Sync {
    /// IR page for `code`, or `None` when none is known
    async fn discover(&self, code: &StockCode) -> Result<Option<IrPageInfo>, SourceError>;
}

/// Discovery backed by known URLs
///
/// Registered URLs win over cache entries. Cache entries are used even when
/// expired: the URL of an IR page rarely changes, only its content does.
pub struct CuratedDiscovery {
    cache: Arc<IrCache>,
    urls: HashMap<StockCode, String>,
}

impl CuratedDiscovery {
    pub fn new(cache: Arc<IrCache>) -> Self {
        Self {
            cache,
            urls: HashMap::new(),
        }
    }

    /// Register a URL for a code
    pub fn with_url(mut self, code: StockCode, url: impl Into<String>) -> Self {
        self.urls.insert(code, url.into());
        self
    }
}

#[async_trait]
impl IrDiscovery for CuratedDiscovery {
    async fn discover(&self, code: &StockCode) -> Result<Option<IrPageInfo>, SourceError> {
        if let Some(url) = self.urls.get(code) {
            return Ok(Some(IrPageInfo {
                url: url.clone(),
                page_type: detect_page_type(url, None),
                code: code.clone(),
                discovered_via: "manual".to_string(),
            }));
        }

        match self.cache.get(code.as_str(), true) {
            Some(entry) => Ok(Some(IrPageInfo {
                url: entry.ir_url,
                page_type: entry.ir_type,
                code: code.clone(),
                discovered_via: entry.discovered_via,
            })),
            None => {
                debug!(code = %code, "No known IR page");
                Ok(None)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::cache::CacheUpdate;
    use crate::ir::IrPageType;
    use std::time::Duration;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_registered_url_wins() {
        let dir = TempDir::new().unwrap();
        let cache = Arc::new(IrCache::new(dir.path().join("c.json"), Duration::from_secs(60)));
        cache.set("7203", CacheUpdate::new("https://cached/ir/", IrPageType::Landing));

        let discovery = CuratedDiscovery::new(cache)
            .with_url(StockCode::new("7203"), "https://manual.example/ir/calendar/");
        let info = discovery.discover(&StockCode::new("7203")).await.unwrap().unwrap();

        assert_eq!(info.url, "https://manual.example/ir/calendar/");
        assert_eq!(info.page_type, IrPageType::Calendar);
        assert_eq!(info.discovered_via, "manual");
    }

    #[tokio::test]
    async fn test_cache_entry_used() {
        let dir = TempDir::new().unwrap();
        let cache = Arc::new(IrCache::new(dir.path().join("c.json"), Duration::from_secs(60)));
        cache.set("6758", CacheUpdate::new("https://sony/ir/news/", IrPageType::News));

        let discovery = CuratedDiscovery::new(cache);
        let info = discovery.discover(&StockCode::new("6758")).await.unwrap().unwrap();
        assert_eq!(info.url, "https://sony/ir/news/");
        assert_eq!(info.page_type, IrPageType::News);

        assert!(discovery.discover(&StockCode::new("9999")).await.unwrap().is_none());
    }
}
