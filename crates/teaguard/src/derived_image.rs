//! Derived-image lifecycle: fetch the Grad-CAM map for a result and own its handle.
//!
//! Lifecycle per result:
//! 1. `load()` releases any previous handle, marks `Pending`, spawns one fetch
//! 2. fetch completes → `Ready(handle)` or `Unavailable` (diagnosis stays visible)
//! 3. `release()` on reset/teardown → handle released, back to `Empty`
//!
//! A fetch completing for a result that is no longer current is dropped
//! without ever creating a handle.

use std::sync::{Arc, Mutex};

use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::blob::{BlobHandle, BlobStore, HandleId};
use crate::gateway::Gateway;
use crate::lock_unpoisoned;

/// What the presentation layer may show for the derived image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum DerivedImageStatus {
    /// No result to explain
    Empty,
    /// Fetch in flight; not an error
    Pending,
    Ready {
        #[serde(serialize_with = "serialize_handle")]
        handle: HandleId,
    },
    /// Fetch failed; only the textual diagnosis is shown
    Unavailable,
}

fn serialize_handle<S: serde::Serializer>(id: &HandleId, s: S) -> Result<S::Ok, S::Error> {
    s.collect_str(id)
}

enum SlotState {
    Empty,
    Pending,
    Ready(BlobHandle),
    Unavailable,
}

struct Slot {
    generation: u64,
    state: SlotState,
}

struct Shared {
    gateway: Arc<dyn Gateway>,
    blobs: Arc<BlobStore>,
    slot: Mutex<Slot>,
    status: watch::Sender<DerivedImageStatus>,
}

#[derive(Clone)]
pub struct DerivedImageManager {
    shared: Arc<Shared>,
}

impl DerivedImageManager {
    pub fn new(gateway: Arc<dyn Gateway>, blobs: Arc<BlobStore>) -> Self {
        let (status, _) = watch::channel(DerivedImageStatus::Empty);
        Self {
            shared: Arc::new(Shared {
                gateway,
                blobs,
                slot: Mutex::new(Slot {
                    generation: 0,
                    state: SlotState::Empty,
                }),
                status,
            }),
        }
    }

    pub fn status(&self) -> DerivedImageStatus {
        *self.shared.status.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<DerivedImageStatus> {
        self.shared.status.subscribe()
    }

    /// Resolve the current handle to bytes; `None` unless `Ready`.
    pub fn current(&self) -> Option<crate::blob::Blob> {
        match self.status() {
            DerivedImageStatus::Ready { handle } => self.shared.blobs.resolve(handle),
            _ => None,
        }
    }

    /// Start fetching the derived image for the result of `generation`.
    pub fn load(&self, generation: u64, reference: &str) -> JoinHandle<()> {
        let previous = {
            let mut slot = lock_unpoisoned(&self.shared.slot);
            slot.generation = generation;
            let previous = std::mem::replace(&mut slot.state, SlotState::Pending);
            self.shared.status.send_replace(DerivedImageStatus::Pending);
            previous
        };
        discard(previous);

        tracing::debug!(generation, %reference, "Fetching derived image");
        let shared = Arc::clone(&self.shared);
        let reference = reference.to_string();
        tokio::spawn(async move { fetch(shared, generation, reference).await })
    }

    /// Release the current handle, if any, and return to `Empty`.
    pub fn release(&self) {
        let previous = {
            let mut slot = lock_unpoisoned(&self.shared.slot);
            let previous = std::mem::replace(&mut slot.state, SlotState::Empty);
            self.shared.status.send_replace(DerivedImageStatus::Empty);
            previous
        };
        discard(previous);
    }
}

fn discard(state: SlotState) {
    if let SlotState::Ready(handle) = state {
        tracing::debug!(handle = %handle.id(), "Releasing derived image");
        handle.release();
    }
}

async fn fetch(shared: Arc<Shared>, generation: u64, reference: String) {
    let outcome = shared.gateway.fetch_derived_image(&reference).await;

    let mut slot = lock_unpoisoned(&shared.slot);
    if slot.generation != generation || !matches!(slot.state, SlotState::Pending) {
        tracing::debug!(generation, %reference, "Dropping derived image for superseded result");
        return;
    }

    match outcome {
        Ok(bytes) => {
            let media_type = mime_guess::from_path(&reference)
                .first_or(mime_guess::mime::IMAGE_PNG)
                .to_string();
            let handle = shared.blobs.create(bytes, media_type);
            let id = handle.id();
            slot.state = SlotState::Ready(handle);
            shared
                .status
                .send_replace(DerivedImageStatus::Ready { handle: id });
        }
        Err(e) => {
            tracing::error!(error = %e, %reference, "Failed to load Grad-CAM image");
            slot.state = SlotState::Unavailable;
            shared.status.send_replace(DerivedImageStatus::Unavailable);
        }
    }
}
