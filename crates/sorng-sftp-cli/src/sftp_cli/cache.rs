//! Short-lived memo of decoded directory listings, keyed by path.

use crate::sftp_cli::types::DirEntry;
use std::collections::HashMap;
use std::time::Duration;
use tokio::time::Instant;

/// Fixed lifetime of a cached listing.
pub const LISTING_TTL: Duration = Duration::from_secs(10);

#[derive(Debug, Clone)]
struct CacheEntry {
    expires_at: Instant,
    entries: Vec<DirEntry>,
}

/// Expired entries are evicted lazily on lookup; there is no sweeper.
#[derive(Debug, Default)]
pub struct ListingCache {
    entries: HashMap<String, CacheEntry>,
}

impl ListingCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&mut self, path: &str) -> Option<Vec<DirEntry>> {
        self.get_at(path, Instant::now())
    }

    pub fn get_at(&mut self, path: &str, now: Instant) -> Option<Vec<DirEntry>> {
        let key = normalize(path);
        match self.entries.get(key) {
            Some(entry) if now < entry.expires_at => Some(entry.entries.clone()),
            Some(_) => {
                self.entries.remove(key);
                None
            }
            None => None,
        }
    }

    pub fn put(&mut self, path: &str, entries: Vec<DirEntry>) {
        self.put_at(path, entries, Instant::now());
    }

    pub fn put_at(&mut self, path: &str, entries: Vec<DirEntry>, now: Instant) {
        self.entries.insert(
            normalize(path).to_string(),
            CacheEntry {
                expires_at: now + LISTING_TTL,
                entries,
            },
        );
    }

    pub fn invalidate(&mut self, path: &str) -> bool {
        self.entries.remove(normalize(path)).is_some()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Entries held, expired or not.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// "/srv/" and "/srv" list the same directory
fn normalize(path: &str) -> &str {
    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() && path.starts_with('/') {
        "/"
    } else {
        trimmed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(path: &str) -> DirEntry {
        DirEntry {
            permissions: "-rw-r--r--".into(),
            hard_links: 1,
            owner: "alice".into(),
            group: "staff".into(),
            size: 1,
            last_modified: "Jan  1 00:00".into(),
            path: path.into(),
            link_target: None,
        }
    }

    #[test]
    fn hit_within_ttl() {
        let mut cache = ListingCache::new();
        let t0 = Instant::now();
        cache.put_at("/srv", vec![entry("a")], t0);
        let hit = cache.get_at("/srv/", t0 + Duration::from_secs(9)).unwrap();
        assert_eq!(hit, vec![entry("a")]);
    }

    #[test]
    fn expired_entry_is_evicted_on_lookup() {
        let mut cache = ListingCache::new();
        let t0 = Instant::now();
        cache.put_at("/srv", vec![entry("a")], t0);
        assert_eq!(cache.len(), 1);
        assert!(cache.get_at("/srv", t0 + LISTING_TTL).is_none());
        assert_eq!(cache.len(), 0);
    }

    #[test]
    fn put_overwrites() {
        let mut cache = ListingCache::new();
        let t0 = Instant::now();
        cache.put_at("/srv", vec![entry("a")], t0);
        cache.put_at("/srv", vec![entry("b")], t0 + Duration::from_secs(5));
        // new expiry counts from the second put
        let hit = cache.get_at("/srv", t0 + Duration::from_secs(12)).unwrap();
        assert_eq!(hit[0].path, "b");
    }

    #[test]
    fn invalidate_and_root_normalization() {
        let mut cache = ListingCache::new();
        cache.put("/", vec![entry("etc")]);
        assert!(cache.get("//").is_some());
        assert!(cache.invalidate("/"));
        assert!(!cache.invalidate("/"));
        assert!(cache.is_empty());
    }
}
