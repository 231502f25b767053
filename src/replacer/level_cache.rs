//! Decoded level bytes shared between textures with the same content.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, TryLockError, Weak};
use std::time::Duration;

use texreplace_formats::{AlphaStatus, DataFormat};
use web_time::Instant;

/// Everything guarded by a cache entry's lock.
#[derive(Debug)]
pub struct LevelData {
    /// Pixel format shared by every level
    pub fmt: DataFormat,
    /// One buffer per mip level; empty buffers are not decoded yet
    pub data: Vec<Vec<u8>>,
    /// Alpha classification of the decoded content
    pub alpha: AlphaStatus,
}

impl LevelData {
    /// Bytes of `level`, `None` if missing or not decoded.
    pub fn level(&self, level: usize) -> Option<&[u8]> {
        self.data
            .get(level)
            .map(Vec::as_slice)
            .filter(|bytes| !bytes.is_empty())
    }

    pub fn has_level(&self, level: usize) -> bool {
        self.level(level).is_some()
    }

    /// Buffer for `level`, growing the list if needed.
    pub fn level_mut(&mut self, level: usize) -> &mut Vec<u8> {
        if self.data.len() <= level {
            self.data.resize_with(level + 1, Vec::new);
        }
        &mut self.data[level]
    }

    pub fn is_empty(&self) -> bool {
        self.data.iter().all(Vec::is_empty)
    }
}

/// Lock-protected decoded levels, shared through an `Arc`.
///
/// The lock is held for a whole decode. Use time and purge generation sit
/// outside it so polling textures never wait on a sibling's decode.
#[derive(Debug)]
pub struct ReplacedLevelsCache {
    inner: Mutex<LevelData>,
    epoch: Instant,
    /// Microseconds after `epoch`
    last_used: AtomicU64,
    generation: AtomicU64,
}

impl Default for ReplacedLevelsCache {
    fn default() -> Self {
        Self::new()
    }
}

impl ReplacedLevelsCache {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(LevelData {
                fmt: DataFormat::Undefined,
                data: Vec::new(),
                alpha: AlphaStatus::Unknown,
            }),
            epoch: Instant::now(),
            last_used: AtomicU64::new(0),
            generation: AtomicU64::new(0),
        }
    }

    /// Lock the entry for reading or writing.
    pub fn lock(&self) -> MutexGuard<'_, LevelData> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn offset_of(&self, at: Instant) -> u64 {
        let micros = at.saturating_duration_since(self.epoch).as_micros();
        u64::try_from(micros).unwrap_or(u64::MAX)
    }

    /// Record a use at `now`. Never moves the time backwards.
    pub fn touch(&self, now: Instant) {
        self.last_used.fetch_max(self.offset_of(now), Ordering::Relaxed);
    }

    pub fn last_used(&self) -> Instant {
        self.epoch + Duration::from_micros(self.last_used.load(Ordering::Relaxed))
    }

    /// Purge count; changes every time the bytes are dropped.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    /// Drop the decoded bytes if they were last used before `threshold`.
    ///
    /// Returns whether anything was purged. Every texture sharing the entry
    /// sees the generation change and re-decodes on its next poll. An entry
    /// locked by a decode in progress is left alone.
    pub fn purge_if_older(&self, threshold: Instant) -> bool {
        if self.last_used.load(Ordering::Relaxed) >= self.offset_of(threshold) {
            return false;
        }
        let mut data = match self.inner.try_lock() {
            Ok(data) => data,
            Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
            Err(TryLockError::WouldBlock) => return false,
        };
        self.clear(&mut data)
    }

    /// Drop whatever a failed decode left behind.
    pub fn discard(&self) {
        let mut data = self.lock();
        self.clear(&mut data);
    }

    fn clear(&self, data: &mut LevelData) -> bool {
        if data.is_empty() {
            return false;
        }
        data.data.clear();
        let generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
        log::debug!("Purged replacement level cache (generation {})", generation);
        true
    }
}

/// Identity of decoded content: the texture cache key and its hash.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ReplacementCacheKey {
    pub cachekey: u64,
    pub hash: u32,
}

impl ReplacementCacheKey {
    pub fn new(cachekey: u64, hash: u32) -> Self {
        Self { cachekey, hash }
    }

    /// The default replacement filename stem for this key.
    pub fn hash_name(&self) -> String {
        format!("{:016x}{:08x}", self.cachekey, self.hash)
    }
}

/// Hands out one shared cache entry per key while anyone holds it.
#[derive(Debug, Default)]
pub struct LevelCacheRegistry {
    entries: Mutex<HashMap<ReplacementCacheKey, Weak<ReplacedLevelsCache>>>,
}

impl LevelCacheRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_or_create(&self, key: ReplacementCacheKey) -> Arc<ReplacedLevelsCache> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(cache) = entries.get(&key).and_then(Weak::upgrade) {
            return cache;
        }
        let cache = Arc::new(ReplacedLevelsCache::new());
        entries.insert(key, Arc::downgrade(&cache));
        cache
    }

    /// Forget keys whose entry has no holders left. Returns how many went.
    pub fn prune(&self) -> usize {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        let before = entries.len();
        entries.retain(|_, cache| cache.strong_count() > 0);
        before - entries.len()
    }

    /// Number of tracked keys, dead ones included until pruned.
    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_purge_respects_threshold() {
        let cache = ReplacedLevelsCache::new();
        *cache.lock().level_mut(0) = vec![1, 2, 3, 4];
        cache.touch(Instant::now());
        let used = cache.last_used();

        assert!(!cache.purge_if_older(used));
        assert!(cache.lock().has_level(0));

        assert!(cache.purge_if_older(used + Duration::from_millis(1)));
        assert!(cache.lock().is_empty());
        assert_eq!(cache.generation(), 1);
    }

    #[test]
    fn test_touch_never_goes_backwards() {
        let cache = ReplacedLevelsCache::new();
        let later = Instant::now() + Duration::from_secs(5);
        cache.touch(later);
        cache.touch(Instant::now());
        assert!(cache.last_used() + Duration::from_millis(1) > later);
    }

    #[test]
    fn test_use_time_readable_while_locked() {
        let cache = ReplacedLevelsCache::new();
        let held = cache.lock();
        cache.touch(Instant::now());
        assert_eq!(cache.generation(), 0);
        assert!(!cache.purge_if_older(Instant::now() + Duration::from_secs(60)));
        drop(held);
    }

    #[test]
    fn test_level_mut_grows() {
        let cache = ReplacedLevelsCache::new();
        let mut data = cache.lock();
        data.level_mut(2).push(9);
        assert_eq!(data.data.len(), 3);
        assert!(!data.has_level(0));
        assert_eq!(data.level(2), Some(&[9u8][..]));
    }

    #[test]
    fn test_registry_shares_live_entries() {
        let registry = LevelCacheRegistry::new();
        let key = ReplacementCacheKey::new(0x1234, 0xabcd);
        let a = registry.get_or_create(key);
        let b = registry.get_or_create(key);
        assert!(Arc::ptr_eq(&a, &b));

        let other = registry.get_or_create(ReplacementCacheKey::new(0x1234, 0));
        assert!(!Arc::ptr_eq(&a, &other));

        drop(a);
        drop(b);
        assert_eq!(registry.prune(), 1);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_hash_name() {
        let key = ReplacementCacheKey::new(0x0000_0001_0000_0002, 0xdead_beef);
        assert_eq!(key.hash_name(), "0000000100000002deadbeef");
    }
}
