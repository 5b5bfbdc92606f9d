//! Local handle registry for image bytes.
//!
//! A [`BlobHandle`] is the local, dereferenceable counterpart of an image held
//! in memory (a selection preview or a fetched Grad-CAM map). The store keeps
//! the bytes alive only while the handle is live:
//! - `BlobStore::create` → live handle
//! - `BlobHandle::release` (or drop) → bytes removed, id no longer resolves
//!
//! Release consumes the handle, so a handle is released exactly once.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use base64::Engine;
use bytes::Bytes;
use dashmap::DashMap;

/// Identifier of a live blob, rendered as `blob:teaguard/<uuid>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandleId(uuid::Uuid);

impl HandleId {
    fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }
}

impl std::fmt::Display for HandleId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "blob:teaguard/{}", self.0)
    }
}

#[derive(Debug, Clone)]
pub struct Blob {
    pub bytes: Bytes,
    pub media_type: String,
}

impl Blob {
    /// Inline `data:` URL for renderers that cannot resolve handles.
    pub fn data_url(&self) -> String {
        let encoded = base64::engine::general_purpose::STANDARD.encode(&self.bytes);
        format!("data:{};base64,{}", self.media_type, encoded)
    }
}

#[derive(Default)]
pub struct BlobStore {
    blobs: DashMap<HandleId, Blob>,
    created: AtomicUsize,
    released: AtomicUsize,
}

impl BlobStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn create(self: &Arc<Self>, bytes: Bytes, media_type: impl Into<String>) -> BlobHandle {
        let id = HandleId::new();
        let blob = Blob {
            bytes,
            media_type: media_type.into(),
        };
        tracing::debug!(handle = %id, size = blob.bytes.len(), "Blob created");
        self.blobs.insert(id, blob);
        self.created.fetch_add(1, Ordering::SeqCst);

        BlobHandle {
            id,
            store: Arc::clone(self),
            released: false,
        }
    }

    /// Look up a live blob. Released ids resolve to `None`.
    pub fn resolve(&self, id: HandleId) -> Option<Blob> {
        self.blobs.get(&id).map(|entry| entry.value().clone())
    }

    pub fn is_live(&self, id: HandleId) -> bool {
        self.blobs.contains_key(&id)
    }

    pub fn live_count(&self) -> usize {
        self.blobs.len()
    }

    pub fn created_count(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    pub fn released_count(&self) -> usize {
        self.released.load(Ordering::SeqCst)
    }

    fn release(&self, id: HandleId) -> bool {
        let removed = self.blobs.remove(&id).is_some();
        if removed {
            self.released.fetch_add(1, Ordering::SeqCst);
            tracing::debug!(handle = %id, "Blob released");
        }
        removed
    }
}

/// Owning handle to a live blob.
pub struct BlobHandle {
    id: HandleId,
    store: Arc<BlobStore>,
    released: bool,
}

impl BlobHandle {
    pub fn id(&self) -> HandleId {
        self.id
    }

    pub fn resolve(&self) -> Option<Blob> {
        self.store.resolve(self.id)
    }

    pub fn release(mut self) {
        self.release_inner();
    }

    fn release_inner(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        if !self.store.release(self.id) {
            tracing::error!(handle = %self.id, "Bug: blob was already gone on release");
        }
    }
}

impl std::fmt::Debug for BlobHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlobHandle")
            .field("id", &self.id)
            .field("released", &self.released)
            .finish()
    }
}

impl Drop for BlobHandle {
    fn drop(&mut self) {
        self.release_inner();
    }
}
