//! Cached IR lookups: discover, fetch, parse, remember

use super::cache::{CacheUpdate, IrCache};
use super::discovery::IrDiscovery;
use super::parser::{parse_earnings_from_html, ParseConfidence};
use super::{detect_page_type, IrObservation, IrPageType, IrProvider};
use crate::error::SourceError;
use crate::fetch::PageFetcher;
use crate::types::StockCode;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info};

/// [`IrProvider`] with a TTL cache in front
///
/// Without `eager`, a fresh cached datetime is returned without any network
/// access. Otherwise the page is discovered, fetched and parsed, and the
/// cache is updated with what was found.
///
/// Only results with an explicit time are reported. A page that gives just
/// the date is remembered as a known IR page but yields no observation.
pub struct CachedIrProvider {
    discovery: Arc<dyn IrDiscovery>,
    cache: Arc<IrCache>,
    fetcher: Arc<dyn PageFetcher>,
}

impl CachedIrProvider {
    pub fn new(
        discovery: Arc<dyn IrDiscovery>,
        cache: Arc<IrCache>,
        fetcher: Arc<dyn PageFetcher>,
    ) -> Self {
        Self {
            discovery,
            cache,
            fetcher,
        }
    }
}

#[async_trait]
impl IrProvider for CachedIrProvider {
    async fn lookup(
        &self,
        code: &StockCode,
        eager: bool,
    ) -> Result<Option<IrObservation>, SourceError> {
        if !eager {
            if let Some(datetime) = self
                .cache
                .get(code.as_str(), false)
                .and_then(|entry| entry.earnings_datetime())
            {
                debug!(code = %code, %datetime, "IR datetime from cache");
                return Ok(Some(IrObservation {
                    datetime,
                    parse_confidence: ParseConfidence::High,
                    method: "cache".to_string(),
                }));
            }
        }

        let Some(page) = self.discovery.discover(code).await? else {
            return Ok(None);
        };

        let html = self.fetcher.fetch_page(&page.url).await?;
        let page_type = match page.page_type {
            IrPageType::Unknown => detect_page_type(&page.url, Some(&html)),
            known => known,
        };

        let mut update = CacheUpdate::new(page.url.clone(), page_type);
        update.discovered_via = page.discovered_via.clone();

        let parsed = parse_earnings_from_html(&html, Some(code.as_str()));
        let observation = match parsed {
            Some(info) if info.has_time => {
                update.last_earnings_datetime = Some(info.datetime);
                info!(code = %code, datetime = %info.datetime, url = %page.url, "IR datetime parsed");
                Some(IrObservation {
                    datetime: info.datetime,
                    parse_confidence: info.confidence,
                    method: info.source,
                })
            }
            Some(info) => {
                debug!(code = %code, date = %info.datetime.date(), "IR page gave a date without time");
                None
            }
            None => {
                debug!(code = %code, url = %page.url, "No earnings datetime on IR page");
                None
            }
        };

        self.cache.set(code.as_str(), update);
        Ok(observation)
    }
}
