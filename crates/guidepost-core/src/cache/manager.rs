use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tracing::{debug, warn};

use crate::models::{Guide, TicketBucket, Tour};
use crate::sync::{CacheInvalidator, EntityKey, EntityKind};

/// Snapshots older than an hour are shown as stale.
const CACHE_STALE_MINUTES: i64 = 60;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CachedData<T> {
    pub data: T,
    pub cached_at: DateTime<Utc>,
}

impl<T> CachedData<T> {
    pub fn new(data: T) -> Self {
        Self {
            data,
            cached_at: Utc::now(),
        }
    }

    pub fn age_minutes(&self) -> i64 {
        (Utc::now() - self.cached_at).num_minutes()
    }

    /// "just now", "12m ago", "3h ago", "2d ago". Hours and days round half up.
    pub fn age_display(&self) -> String {
        let minutes = self.age_minutes();
        if minutes < 1 {
            // Also covers clock skew
            "just now".to_string()
        } else if minutes < 60 {
            format!("{}m ago", minutes)
        } else if minutes < 1440 {
            let hours = (minutes + 30) / 60;
            format!("{}h ago", hours)
        } else {
            let days = (minutes + 720) / 1440;
            format!("{}d ago", days)
        }
    }

    pub fn is_stale(&self) -> bool {
        self.age_minutes() > CACHE_STALE_MINUTES
    }
}

/// JSON snapshots of cached views, one file per entity under the cache dir.
///
/// Files are named `{kind}_{id}.json` so an invalidation for an entity key
/// maps straight to the file holding its view.
pub struct CacheManager {
    cache_dir: PathBuf,
}

impl CacheManager {
    pub fn new(cache_dir: PathBuf) -> Result<Self> {
        std::fs::create_dir_all(&cache_dir)
            .with_context(|| format!("Failed to create cache directory: {}", cache_dir.display()))?;
        Ok(Self { cache_dir })
    }

    fn cache_path(&self, name: &str) -> PathBuf {
        self.cache_dir.join(format!("{}.json", name))
    }

    fn key_name(key: &EntityKey) -> String {
        format!("{}_{}", key.kind.as_str(), key.id)
    }

    fn load<T: DeserializeOwned>(&self, name: &str) -> Result<Option<CachedData<T>>> {
        let path = self.cache_path(name);
        if !path.exists() {
            return Ok(None);
        }

        let contents =
            std::fs::read_to_string(&path).with_context(|| format!("Failed to read cache file: {}", name))?;

        let cached: CachedData<T> =
            serde_json::from_str(&contents).with_context(|| format!("Failed to parse cache file: {}", name))?;

        Ok(Some(cached))
    }

    fn save<T: Serialize>(&self, name: &str, data: &T) -> Result<()> {
        let cached = CachedData::new(data);
        let contents = serde_json::to_string_pretty(&cached)?;
        std::fs::write(self.cache_path(name), contents)
            .with_context(|| format!("Failed to write cache file: {}", name))?;
        debug!(cache = name, "Cache snapshot saved");
        Ok(())
    }

    /// Remove the snapshot for `key`. Missing files are fine.
    pub fn remove(&self, key: &EntityKey) -> Result<bool> {
        let path = self.cache_path(&Self::key_name(key));
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e).with_context(|| format!("Failed to remove cache file: {}", path.display())),
        }
    }

    // ===== Tours =====

    pub fn load_tour(&self, tour_id: &str) -> Result<Option<CachedData<Tour>>> {
        self.load(&Self::key_name(&EntityKey::tour(tour_id)))
    }

    pub fn save_tour(&self, tour: &Tour) -> Result<()> {
        self.save(&Self::key_name(&EntityKey::tour(&tour.id)), tour)
    }

    // ===== Ticket buckets =====

    pub fn save_buckets(&self, buckets: &[TicketBucket]) -> Result<()> {
        for bucket in buckets {
            self.save(&Self::key_name(&EntityKey::bucket(&bucket.id)), bucket)?;
        }
        Ok(())
    }

    /// Cached buckets dated `date`, skipping unreadable files.
    pub fn load_buckets_for_date(&self, date: NaiveDate) -> Result<Vec<CachedData<TicketBucket>>> {
        let prefix = format!("{}_", EntityKind::TicketBucket.as_str());
        let mut buckets = Vec::new();
        for entry in std::fs::read_dir(&self.cache_dir)? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().to_string();
            let Some(stem) = name.strip_suffix(".json") else {
                continue;
            };
            if !stem.starts_with(&prefix) {
                continue;
            }
            match self.load::<TicketBucket>(stem) {
                Ok(Some(cached)) if cached.data.date == date => buckets.push(cached),
                Ok(_) => {}
                Err(e) => debug!(cache = stem, error = %e, "Skipping unreadable bucket snapshot"),
            }
        }
        buckets.sort_by(|a, b| a.data.reference.cmp(&b.data.reference));
        Ok(buckets)
    }

    // ===== Guides =====

    pub fn save_guides(&self, guides: &[Guide]) -> Result<()> {
        self.save("guides", &guides)
    }

    // ===== Cache age information =====

    /// Age of the snapshot for `key`, or `None` if there is none.
    pub fn age(&self, key: &EntityKey) -> Option<String> {
        match self.load::<serde_json::Value>(&Self::key_name(key)) {
            Ok(Some(cached)) => Some(cached.age_display()),
            Ok(None) => None,
            Err(e) => {
                debug!(key = %key, error = %e, "Failed to load cache for age display");
                None
            }
        }
    }

    /// Missing and unreadable snapshots count as stale.
    pub fn is_stale(&self, key: &EntityKey) -> bool {
        match self.load::<serde_json::Value>(&Self::key_name(key)) {
            Ok(Some(cached)) => cached.is_stale(),
            Ok(None) => true,
            Err(e) => {
                debug!(key = %key, error = %e, "Failed to load cache for staleness check");
                true
            }
        }
    }
}

impl CacheInvalidator for CacheManager {
    fn invalidate(&self, key: &EntityKey) {
        match self.remove(key) {
            Ok(true) => debug!(key = %key, "Cache snapshot invalidated"),
            Ok(false) => {}
            Err(e) => warn!(key = %key, error = %e, "Failed to invalidate cache snapshot"),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
