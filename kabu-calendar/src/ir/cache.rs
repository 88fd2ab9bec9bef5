//! JSON cache of IR page discoveries
//!
//! One pretty-printed JSON file, meant to be readable and hand-editable:
//!
//! ```json
//! {
//!   "version": "1.0",
//!   "updated": "2026-02-13T18:00:00",
//!   "companies": {
//!     "7203": {
//!       "ir_url": "https://global.toyota/jp/ir/calendar/",
//!       "ir_type": "calendar",
//!       "last_updated": "2026-02-13T18:00:00",
//!       "discovered_via": "manual",
//!       "parse_pattern": null,
//!       "success_count": 3,
//!       "last_earnings_datetime": "2026-02-06T13:55:00"
//!     }
//!   }
//! }
//! ```
//!
//! The file is read lazily on first access. A file that cannot be read or
//! parsed is logged and treated as empty; the next save rewrites it. An
//! entry with an unparseable `last_updated` counts as expired.

use super::IrPageType;
use crate::types::Timestamp;
use chrono::{Local, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;
use tracing::{debug, warn};

const CACHE_VERSION: &str = "1.0";

/// Cached knowledge about one company's IR page
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub ir_url: String,
    #[serde(default = "unknown_page_type")]
    pub ir_type: IrPageType,
    /// ISO-8601 local time of the last update
    pub last_updated: String,
    #[serde(default = "default_discovered_via")]
    pub discovered_via: String,
    #[serde(default)]
    pub parse_pattern: Option<String>,
    #[serde(default = "default_success_count")]
    pub success_count: u32,
    #[serde(default)]
    pub last_earnings_datetime: Option<String>,
}

fn unknown_page_type() -> IrPageType {
    IrPageType::Unknown
}

fn default_discovered_via() -> String {
    "pattern".to_string()
}

fn default_success_count() -> u32 {
    1
}

impl CacheEntry {
    /// True when `last_updated + ttl` is in the past or unparseable
    pub fn is_expired(&self, ttl: Duration) -> bool {
        let Ok(updated) = self.last_updated.parse::<NaiveDateTime>() else {
            return true;
        };
        let ttl = chrono::Duration::seconds(i64::try_from(ttl.as_secs()).unwrap_or(i64::MAX / 1000));
        match updated.checked_add_signed(ttl) {
            Some(expiry) => Local::now().naive_local() > expiry,
            None => false,
        }
    }

    /// Last parsed announcement datetime, if any and well-formed
    pub fn earnings_datetime(&self) -> Option<Timestamp> {
        self.last_earnings_datetime
            .as_deref()
            .and_then(|s| s.parse::<NaiveDateTime>().ok())
    }
}

/// Values written by [`IrCache::set`]
#[derive(Debug, Clone)]
pub struct CacheUpdate {
    pub ir_url: String,
    pub ir_type: IrPageType,
    pub discovered_via: String,
    pub parse_pattern: Option<String>,
    pub last_earnings_datetime: Option<Timestamp>,
}

impl CacheUpdate {
    pub fn new(ir_url: impl Into<String>, ir_type: IrPageType) -> Self {
        Self {
            ir_url: ir_url.into(),
            ir_type,
            discovered_via: default_discovered_via(),
            parse_pattern: None,
            last_earnings_datetime: None,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct CacheFile {
    version: String,
    updated: String,
    #[serde(default)]
    companies: BTreeMap<String, serde_json::Value>,
}

#[derive(Debug, Default)]
struct CacheState {
    loaded: bool,
    entries: BTreeMap<String, CacheEntry>,
}

/// Thread-safe handle on the cache file
#[derive(Debug)]
pub struct IrCache {
    path: PathBuf,
    ttl: Duration,
    state: Mutex<CacheState>,
}

impl IrCache {
    pub fn new(path: PathBuf, ttl: Duration) -> Self {
        Self {
            path,
            ttl,
            state: Mutex::new(CacheState::default()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Entry for `code`; expired entries are hidden unless `ignore_expired`
    pub fn get(&self, code: &str, ignore_expired: bool) -> Option<CacheEntry> {
        let mut state = self.lock();
        self.load(&mut state);

        let entry = state.entries.get(code)?;
        if !ignore_expired && entry.is_expired(self.ttl) {
            debug!(code, "IR cache entry expired");
            return None;
        }
        Some(entry.clone())
    }

    /// Record a discovery
    ///
    /// Same URL as the existing entry: refresh it and bump `success_count`.
    /// Otherwise the entry is replaced.
    pub fn set(&self, code: &str, update: CacheUpdate) -> CacheEntry {
        let mut state = self.lock();
        self.load(&mut state);
        let now = now_iso();

        if let Some(existing) = state
            .entries
            .get_mut(code)
            .filter(|e| e.ir_url == update.ir_url)
        {
            // A kept datetime keeps its original expiry
            if update.last_earnings_datetime.is_some() || existing.last_earnings_datetime.is_none() {
                existing.last_updated = now;
            }
            existing.success_count += 1;
            if update.parse_pattern.is_some() {
                existing.parse_pattern = update.parse_pattern;
            }
            if let Some(dt) = update.last_earnings_datetime {
                existing.last_earnings_datetime = Some(format_timestamp(&dt));
            }
            let entry = existing.clone();
            self.save(&state);
            return entry;
        }

        let entry = CacheEntry {
            ir_url: update.ir_url,
            ir_type: update.ir_type,
            last_updated: now,
            discovered_via: update.discovered_via,
            parse_pattern: update.parse_pattern,
            success_count: 1,
            last_earnings_datetime: update.last_earnings_datetime.map(|dt| format_timestamp(&dt)),
        };
        state.entries.insert(code.to_string(), entry.clone());

        self.save(&state);
        entry
    }

    /// Remove one entry; false when it was not cached
    pub fn delete(&self, code: &str) -> bool {
        let mut state = self.lock();
        self.load(&mut state);
        if state.entries.remove(code).is_some() {
            self.save(&state);
            true
        } else {
            false
        }
    }

    /// Remove everything; returns how many entries were dropped
    pub fn clear(&self) -> usize {
        let mut state = self.lock();
        self.load(&mut state);
        let count = state.entries.len();
        state.entries.clear();
        self.save(&state);
        count
    }

    /// All entries, expired ones included
    pub fn entries(&self) -> BTreeMap<String, CacheEntry> {
        let mut state = self.lock();
        self.load(&mut state);
        state.entries.clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, CacheState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn load(&self, state: &mut CacheState) {
        if state.loaded {
            return;
        }
        state.loaded = true;

        if !self.path.exists() {
            return;
        }

        let file: CacheFile = match std::fs::read_to_string(&self.path)
            .map_err(|e| e.to_string())
            .and_then(|raw| serde_json::from_str(&raw).map_err(|e| e.to_string()))
        {
            Ok(file) => file,
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Failed to load IR cache, starting empty");
                return;
            }
        };

        for (code, value) in file.companies {
            match serde_json::from_value::<CacheEntry>(value) {
                Ok(entry) => {
                    state.entries.insert(code, entry);
                }
                Err(e) => warn!(code = %code, error = %e, "Invalid IR cache entry skipped"),
            }
        }
        debug!(entries = state.entries.len(), "Loaded IR cache");
    }

    fn save(&self, state: &CacheState) {
        let companies = state
            .entries
            .iter()
            .filter_map(|(code, entry)| {
                serde_json::to_value(entry).ok().map(|v| (code.clone(), v))
            })
            .collect();
        let file = CacheFile {
            version: CACHE_VERSION.to_string(),
            updated: now_iso(),
            companies,
        };

        let result = (|| -> std::io::Result<()> {
            if let Some(parent) = self.path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let json = serde_json::to_string_pretty(&file)?;
            std::fs::write(&self.path, json)
        })();

        match result {
            Ok(()) => debug!(entries = state.entries.len(), "Saved IR cache"),
            Err(e) => warn!(path = %self.path.display(), error = %e, "Failed to save IR cache"),
        }
    }
}

fn now_iso() -> String {
    format_timestamp(&Local::now().naive_local())
}

fn format_timestamp(ts: &Timestamp) -> String {
    ts.format("%Y-%m-%dT%H:%M:%S").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use tempfile::TempDir;

    const TTL: Duration = Duration::from_secs(30 * 24 * 60 * 60);

    fn cache_in(dir: &TempDir) -> IrCache {
        IrCache::new(dir.path().join("ir_cache.json"), TTL)
    }

    #[test]
    fn test_set_then_get() {
        let dir = TempDir::new().unwrap();
        let cache = cache_in(&dir);
        let dt = NaiveDate::from_ymd_opt(2026, 2, 6).unwrap().and_hms_opt(13, 55, 0).unwrap();

        let mut update = CacheUpdate::new("https://example.co.jp/ir/calendar/", IrPageType::Calendar);
        update.last_earnings_datetime = Some(dt);
        cache.set("7203", update);

        let entry = cache.get("7203", false).unwrap();
        assert_eq!(entry.success_count, 1);
        assert_eq!(entry.earnings_datetime(), Some(dt));
        assert!(cache.get("6758", false).is_none());
    }

    #[test]
    fn test_same_url_increments_success_count() {
        let dir = TempDir::new().unwrap();
        let cache = cache_in(&dir);
        let url = "https://example.co.jp/ir/";

        cache.set("7203", CacheUpdate::new(url, IrPageType::Landing));
        let entry = cache.set("7203", CacheUpdate::new(url, IrPageType::Landing));
        assert_eq!(entry.success_count, 2);

        let entry = cache.set("7203", CacheUpdate::new("https://other.co.jp/ir/", IrPageType::Landing));
        assert_eq!(entry.success_count, 1);
        assert_eq!(entry.ir_url, "https://other.co.jp/ir/");
    }

    #[test]
    fn test_stale_datetime_not_refreshed_without_new_one() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("ir_cache.json");
        std::fs::write(
            &path,
            r#"{"version":"1.0","updated":"2020-01-01T00:00:00","companies":{
                "7203":{"ir_url":"https://a/ir/","ir_type":"calendar","last_updated":"2020-01-01T00:00:00",
                        "success_count":1,"last_earnings_datetime":"2019-11-07T13:55:00"}
            }}"#,
        )
        .unwrap();
        let cache = IrCache::new(path, TTL);

        let entry = cache.set("7203", CacheUpdate::new("https://a/ir/", IrPageType::Calendar));
        assert_eq!(entry.success_count, 2);
        assert_eq!(entry.last_updated, "2020-01-01T00:00:00");
        assert!(cache.get("7203", false).is_none());

        let fresh = NaiveDate::from_ymd_opt(2026, 2, 6).unwrap().and_hms_opt(13, 55, 0).unwrap();
        let mut update = CacheUpdate::new("https://a/ir/", IrPageType::Calendar);
        update.last_earnings_datetime = Some(fresh);
        cache.set("7203", update);
        let entry = cache.get("7203", false).unwrap();
        assert_eq!(entry.earnings_datetime(), Some(fresh));
        assert_eq!(entry.success_count, 3);
    }

    #[test]
    fn test_persists_across_handles() {
        let dir = TempDir::new().unwrap();
        cache_in(&dir).set("7203", CacheUpdate::new("https://example.co.jp/ir/", IrPageType::Landing));

        let reopened = cache_in(&dir);
        assert!(reopened.get("7203", false).is_some());

        let raw = std::fs::read_to_string(dir.path().join("ir_cache.json")).unwrap();
        assert!(raw.contains("\"version\": \"1.0\""));
        assert!(raw.contains("\"ir_type\": \"landing\""));
    }

    #[test]
    fn test_expired_entry_hidden_unless_ignored() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("ir_cache.json");
        std::fs::write(
            &path,
            r#"{"version":"1.0","updated":"2020-01-01T00:00:00","companies":{
                "7203":{"ir_url":"https://a/ir/","ir_type":"calendar","last_updated":"2020-01-01T00:00:00"},
                "6758":{"ir_url":"https://b/ir/","ir_type":"weird","last_updated":"not a date"}
            }}"#,
        )
        .unwrap();
        let cache = IrCache::new(path, TTL);

        assert!(cache.get("7203", false).is_none());
        assert!(cache.get("7203", true).is_some());
        assert!(cache.get("6758", false).is_none());
        let odd = cache.get("6758", true).unwrap();
        assert_eq!(odd.ir_type, IrPageType::Unknown);
        assert_eq!(odd.success_count, 1);
        assert_eq!(odd.discovered_via, "pattern");
    }

    #[test]
    fn test_corrupt_file_treated_as_empty_and_rewritten() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("ir_cache.json");
        std::fs::write(&path, "{ not json").unwrap();
        let cache = IrCache::new(path.clone(), TTL);

        assert!(cache.get("7203", true).is_none());
        cache.set("7203", CacheUpdate::new("https://a/ir/", IrPageType::Landing));

        let raw = std::fs::read_to_string(&path).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert!(parsed["companies"]["7203"].is_object());
    }

    #[test]
    fn test_delete_and_clear() {
        let dir = TempDir::new().unwrap();
        let cache = cache_in(&dir);
        cache.set("7203", CacheUpdate::new("https://a/ir/", IrPageType::Landing));
        cache.set("6758", CacheUpdate::new("https://b/ir/", IrPageType::Landing));

        assert!(cache.delete("7203"));
        assert!(!cache.delete("7203"));
        assert_eq!(cache.clear(), 1);
        assert!(cache.entries().is_empty());
    }
}
