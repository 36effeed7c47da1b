//! In-memory gallery of enrolled identities, synced wholesale from the record store.
//!
//! The published snapshot is an `Arc<Gallery>` behind a read-write lock.
//! A reload builds a complete new gallery off to the side and swaps it in,
//! so readers see either the previous or the new snapshot, never a partial one.

use crate::types::Embedding;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use thiserror::Error;

/// Read side of the record store, as seen by the gallery cache.
pub trait EmbeddingSource: Send + Sync {
    /// Every stored embedding, keyed by identity, still in its stored encoding.
    fn list_embeddings(&self) -> Result<HashMap<String, String>, SourceError>;

    /// Display names for identities. Missing names are not an error.
    fn identity_names(&self) -> Result<HashMap<String, String>, SourceError> {
        Ok(HashMap::new())
    }
}

#[derive(Error, Debug)]
#[error("embedding source: {0}")]
pub struct SourceError(pub String);

#[derive(Error, Debug)]
pub enum GalleryError {
    #[error("gallery reload failed: {0}")]
    Source(#[from] SourceError),
}

/// Identity → embedding snapshot.
#[derive(Debug, Clone, Default)]
pub struct Gallery {
    entries: HashMap<String, Embedding>,
    names: HashMap<String, String>,
}

impl Gallery {
    pub fn insert(&mut self, identity: impl Into<String>, embedding: Embedding) {
        self.entries.insert(identity.into(), embedding);
    }

    pub fn set_name(&mut self, identity: impl Into<String>, name: impl Into<String>) {
        self.names.insert(identity.into(), name.into());
    }

    pub fn get(&self, identity: &str) -> Option<&Embedding> {
        self.entries.get(identity)
    }

    /// Display name of an identity, if the store knows one.
    pub fn name(&self, identity: &str) -> Option<&str> {
        self.names.get(identity).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Embedding)> {
        self.entries.iter().map(|(id, emb)| (id.as_str(), emb))
    }
}

/// Decode one stored embedding (a JSON array of numbers).
///
/// Returns `None` for anything that is not a non-empty array of finite numbers.
pub fn decode_embedding(encoded: &str) -> Option<Embedding> {
    let raw: Vec<f64> = serde_json::from_str(encoded).ok()?;
    let values: Vec<f32> = raw.into_iter().map(|v| v as f32).collect();
    let embedding = Embedding::new(values);
    embedding.is_well_formed().then_some(embedding)
}

/// Shared, reloadable gallery snapshot.
pub struct GalleryCache {
    source: Arc<dyn EmbeddingSource>,
    snapshot: RwLock<Arc<Gallery>>,
    /// Serializes reloads so an earlier reload can never publish over a later one.
    reload_lock: Mutex<()>,
}

impl GalleryCache {
    /// Create an empty cache over `source`. Call [`reload`](Self::reload) to populate it.
    pub fn new(source: Arc<dyn EmbeddingSource>) -> Self {
        Self {
            source,
            snapshot: RwLock::new(Arc::new(Gallery::default())),
            reload_lock: Mutex::new(()),
        }
    }

    /// Create a cache and populate it from `source`.
    pub fn load(source: Arc<dyn EmbeddingSource>) -> Result<Self, GalleryError> {
        let cache = Self::new(source);
        cache.reload()?;
        Ok(cache)
    }

    /// Rebuild the gallery from the store and publish it.
    ///
    /// Undecodable entries are dropped. If the store cannot be read at all the
    /// previous snapshot stays published and the error is returned.
    /// Returns the number of identities in the new snapshot.
    pub fn reload(&self) -> Result<usize, GalleryError> {
        let _guard = self.reload_lock.lock().unwrap_or_else(PoisonError::into_inner);

        let raw = self.source.list_embeddings()?;
        let names = match self.source.identity_names() {
            Ok(names) => names,
            Err(e) => {
                tracing::warn!(error = %e, "identity names unavailable; recognized faces will have no name");
                HashMap::new()
            }
        };

        let total = raw.len();
        let mut gallery = Gallery::default();
        for (identity, encoded) in raw {
            match decode_embedding(&encoded) {
                Some(embedding) => {
                    if let Some(name) = names.get(&identity) {
                        gallery.set_name(identity.clone(), name.clone());
                    }
                    gallery.insert(identity, embedding);
                }
                None => tracing::debug!(identity = %identity, "dropping undecodable gallery entry"),
            }
        }

        let loaded = gallery.len();
        *self.snapshot.write().unwrap_or_else(PoisonError::into_inner) = Arc::new(gallery);

        tracing::info!(loaded, dropped = total - loaded, "gallery reloaded");
        Ok(loaded)
    }

    /// Latest published snapshot. Cheap: clones an `Arc`.
    pub fn current(&self) -> Arc<Gallery> {
        Arc::clone(&self.snapshot.read().unwrap_or_else(PoisonError::into_inner))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    /// In-memory embedding source for tests.
    #[derive(Default)]
    pub(crate) struct MemorySource {
        pub(crate) entries: Mutex<HashMap<String, String>>,
        pub(crate) names: Mutex<HashMap<String, String>>,
        pub(crate) failing: AtomicBool,
    }

    impl MemorySource {
        pub(crate) fn with(entries: &[(&str, &str)]) -> Arc<Self> {
            let source = Self::default();
            {
                let mut map = source.entries.lock().unwrap();
                for (id, encoded) in entries {
                    map.insert(id.to_string(), encoded.to_string());
                }
            }
            Arc::new(source)
        }

        pub(crate) fn put(&self, id: &str, encoded: &str) {
            self.entries.lock().unwrap().insert(id.into(), encoded.into());
        }

        pub(crate) fn remove(&self, id: &str) {
            self.entries.lock().unwrap().remove(id);
        }
    }

    impl EmbeddingSource for MemorySource {
        fn list_embeddings(&self) -> Result<HashMap<String, String>, SourceError> {
            if self.failing.load(Ordering::SeqCst) {
                return Err(SourceError("database locked".into()));
            }
            Ok(self.entries.lock().unwrap().clone())
        }

        fn identity_names(&self) -> Result<HashMap<String, String>, SourceError> {
            Ok(self.names.lock().unwrap().clone())
        }
    }

    #[test]
    fn test_decode_embedding_accepts_numbers() {
        let emb = decode_embedding("[1, 0.5, -2e-1]").unwrap();
        assert_eq!(emb.values, vec![1.0, 0.5, -0.2]);
    }

    #[test]
    fn test_decode_embedding_rejects_malformed() {
        assert!(decode_embedding("").is_none());
        assert!(decode_embedding("not json").is_none());
        assert!(decode_embedding("[]").is_none());
        assert!(decode_embedding("[1, \"a\", 3]").is_none());
        assert!(decode_embedding("[1, null]").is_none());
        assert!(decode_embedding("{\"v\": [1]}").is_none());
        assert!(decode_embedding("[1e300]").is_none());
    }

    #[test]
    fn test_reload_drops_undecodable_entries() {
        let source = MemorySource::with(&[
            ("s1", "[1, 0, 0]"),
            ("s2", "garbage"),
            ("s3", "[0, \"x\", 1]"),
            ("s4", "[0, 1, 0]"),
        ]);
        let cache = GalleryCache::load(source).unwrap();
        let gallery = cache.current();
        assert_eq!(gallery.len(), 2);
        assert!(gallery.get("s1").is_some());
        assert!(gallery.get("s4").is_some());
        assert!(gallery.get("s2").is_none());
    }

    #[test]
    fn test_reload_idempotent() {
        let source = MemorySource::with(&[("s1", "[1, 0]"), ("s2", "[0, 1]")]);
        let cache = GalleryCache::load(source).unwrap();
        let first = cache.current();
        assert_eq!(cache.reload().unwrap(), 2);
        let second = cache.current();
        assert_eq!(first.len(), second.len());
        for (id, emb) in first.iter() {
            assert_eq!(second.get(id), Some(emb));
        }
    }

    #[test]
    fn test_reload_reflects_mutations() {
        let source = MemorySource::with(&[("s1", "[1, 0]")]);
        let cache = GalleryCache::load(source.clone()).unwrap();

        source.put("s2", "[0, 1]");
        assert_eq!(cache.current().len(), 1, "cache must not change until reload");
        cache.reload().unwrap();
        assert_eq!(cache.current().len(), 2);

        source.remove("s1");
        cache.reload().unwrap();
        let gallery = cache.current();
        assert!(gallery.get("s1").is_none());
        assert_eq!(gallery.len(), 1);
    }

    #[test]
    fn test_reload_failure_keeps_previous_snapshot() {
        let source = MemorySource::with(&[("s1", "[1, 0]")]);
        let cache = GalleryCache::load(source.clone()).unwrap();

        source.failing.store(true, Ordering::SeqCst);
        assert!(cache.reload().is_err());
        assert_eq!(cache.current().len(), 1);
    }

    #[test]
    fn test_old_snapshot_survives_reload() {
        let source = MemorySource::with(&[("s1", "[1, 0]")]);
        let cache = GalleryCache::load(source.clone()).unwrap();
        let held = cache.current();

        source.remove("s1");
        cache.reload().unwrap();

        assert_eq!(held.len(), 1, "in-flight readers keep their snapshot");
        assert!(cache.current().is_empty());
    }

    #[test]
    fn test_names_attached_to_entries() {
        let source = MemorySource::with(&[("s1", "[1, 0]")]);
        source.names.lock().unwrap().insert("s1".into(), "Ada".into());
        source.names.lock().unwrap().insert("s9".into(), "Nobody".into());
        let cache = GalleryCache::load(source).unwrap();
        let gallery = cache.current();
        assert_eq!(gallery.name("s1"), Some("Ada"));
        assert_eq!(gallery.name("s9"), None);
    }

    #[test]
    fn test_concurrent_readers_see_whole_snapshots() {
        let source = MemorySource::with(&[("a", "[1, 0]"), ("b", "[0, 1]")]);
        let cache = Arc::new(GalleryCache::load(source.clone()).unwrap());

        let readers: Vec<_> = (0..4)
            .map(|_| {
                let cache = Arc::clone(&cache);
                std::thread::spawn(move || {
                    for _ in 0..200 {
                        let len = cache.current().len();
                        assert!(len == 2 || len == 3, "partial snapshot of size {len}");
                    }
                })
            })
            .collect();

        for i in 0..50 {
            if i % 2 == 0 {
                source.put("c", "[1, 1]");
            } else {
                source.remove("c");
            }
            cache.reload().unwrap();
        }

        for reader in readers {
            reader.join().unwrap();
        }
    }
}
