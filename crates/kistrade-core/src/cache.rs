//! Lock-guarded in-memory store with lazy expiry.

use std::any::Any;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use time::OffsetDateTime;

/// When a cache entry stops being readable.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Expiry {
    /// Absolute wall-clock deadline.
    At(OffsetDateTime),
    /// Relative to the moment of `set`.
    After(Duration),
    /// Relative to the moment of `set`, in seconds.
    Seconds(f64),
}

impl Expiry {
    /// Normalize to a monotonic deadline measured from `now`.
    fn deadline(self, now: Instant) -> Instant {
        let offset = match self {
            Self::At(at) => {
                let remaining = at - OffsetDateTime::now_utc();
                if remaining.is_negative() {
                    return now;
                }
                Duration::try_from(remaining).unwrap_or(Duration::ZERO)
            }
            Self::After(duration) => duration,
            Self::Seconds(seconds) => {
                Duration::try_from_secs_f64(seconds.max(0.0)).unwrap_or(Duration::MAX)
            }
        };
        now.checked_add(offset).unwrap_or(now + Duration::from_secs(u32::MAX as u64))
    }
}

impl From<Duration> for Expiry {
    fn from(value: Duration) -> Self {
        Self::After(value)
    }
}

impl From<OffsetDateTime> for Expiry {
    fn from(value: OffsetDateTime) -> Self {
        Self::At(value)
    }
}

impl From<f64> for Expiry {
    fn from(value: f64) -> Self {
        Self::Seconds(value)
    }
}

struct CacheEntry {
    value: Box<dyn Any + Send + Sync>,
    expires_at: Option<Instant>,
}

impl CacheEntry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|deadline| deadline <= now)
    }
}

/// Thread-safe expiring key/value store shared by a client and its scopes.
///
/// Reads that find an expired entry evict it; there is no background sweep.
#[derive(Clone, Default)]
pub struct CacheStore {
    inner: Arc<Mutex<HashMap<String, CacheEntry>>>,
}

impl CacheStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `value` under `key`, replacing any previous entry.
    pub fn set<V>(&self, key: impl Into<String>, value: V, expiry: Option<Expiry>)
    where
        V: Any + Send + Sync,
    {
        let now = Instant::now();
        let entry = CacheEntry {
            value: Box::new(value),
            expires_at: expiry.map(|expiry| expiry.deadline(now)),
        };
        self.lock().insert(key.into(), entry);
    }

    /// Read a live entry of type `V`.
    ///
    /// Returns `None` when the key is absent, the stored value has a different
    /// type, or the entry expired (in which case it is evicted).
    pub fn get<V>(&self, key: &str) -> Option<V>
    where
        V: Any + Clone,
    {
        let mut store = self.lock();
        let expired = store.get(key)?.is_expired(Instant::now());
        if expired {
            store.remove(key);
            return None;
        }

        store
            .get(key)
            .and_then(|entry| entry.value.downcast_ref::<V>())
            .cloned()
    }

    /// [`CacheStore::get`] with a fallback value.
    pub fn get_or<V>(&self, key: &str, default: V) -> V
    where
        V: Any + Clone,
    {
        self.get(key).unwrap_or(default)
    }

    pub fn remove(&self, key: &str) -> bool {
        self.lock().remove(key).is_some()
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.lock().contains_key(key)
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    /// Drop every expired entry now.
    pub fn purge_expired(&self) {
        let now = Instant::now();
        self.lock().retain(|_, entry| !entry.is_expired(now));
    }

    /// Number of stored entries, expired ones included.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, CacheEntry>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for CacheStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheStore")
            .field("len", &self.len())
            .finish()
    }
}
