//! Selection & submission controller.
//!
//! Holds at most one selected image together with its preview handle and
//! hands it to the workflow on request. Selection and workflow gate each
//! other: nothing is submitted without a selection, and the selection cannot
//! change while a submission is in flight.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use bytes::Bytes;

use crate::blob::{BlobHandle, BlobStore, HandleId};
use crate::gateway::Submission;
use crate::lock_unpoisoned;
use crate::workflow::{AnalysisRejected, AnalysisTicket, Workflow};

#[derive(Debug, Clone)]
pub enum FileSource {
    Memory(Bytes),
    Path(PathBuf),
}

/// A file offered for selection (drag-and-drop or file picker).
#[derive(Debug, Clone)]
pub struct CandidateFile {
    pub name: String,
    /// Declared media type; guessed from `name` when absent.
    pub media_type: Option<String>,
    pub source: FileSource,
}

impl CandidateFile {
    pub fn from_bytes(
        name: impl Into<String>,
        media_type: impl Into<String>,
        bytes: impl Into<Bytes>,
    ) -> Self {
        Self {
            name: name.into(),
            media_type: Some(media_type.into()),
            source: FileSource::Memory(bytes.into()),
        }
    }

    pub fn from_path(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        Self {
            name,
            media_type: None,
            source: FileSource::Path(path),
        }
    }

    pub fn media_type(&self) -> String {
        match &self.media_type {
            Some(declared) => declared.clone(),
            None => mime_guess::from_path(&self.name)
                .first_or_octet_stream()
                .to_string(),
        }
    }

    pub fn is_image(&self) -> bool {
        self.media_type().starts_with("image/")
    }

    async fn read(&self) -> std::io::Result<Bytes> {
        match &self.source {
            FileSource::Memory(bytes) => Ok(bytes.clone()),
            FileSource::Path(path) => tokio::fs::read(path).await.map(Bytes::from),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SelectionError {
    #[error("'{filename}' is not an image ({media_type})")]
    NotAnImage {
        filename: String,
        media_type: String,
    },

    #[error("A submission is already in flight")]
    SubmissionInFlight,

    #[error("No image selected")]
    NothingSelected,

    #[error("Failed to read '{filename}': {source}")]
    Read {
        filename: String,
        #[source]
        source: std::io::Error,
    },
}

impl From<AnalysisRejected> for SelectionError {
    fn from(rejected: AnalysisRejected) -> Self {
        match rejected {
            AnalysisRejected::AlreadyAnalyzing => SelectionError::SubmissionInFlight,
        }
    }
}

/// The accepted candidate: bytes plus a live preview handle.
#[derive(Debug)]
pub struct SelectedImage {
    filename: String,
    media_type: String,
    bytes: Bytes,
    preview: BlobHandle,
}

impl SelectedImage {
    pub fn filename(&self) -> &str {
        &self.filename
    }

    pub fn media_type(&self) -> &str {
        &self.media_type
    }

    pub fn size(&self) -> usize {
        self.bytes.len()
    }

    pub fn preview(&self) -> HandleId {
        self.preview.id()
    }

    fn submission(&self) -> Submission {
        Submission {
            bytes: self.bytes.clone(),
            media_type: self.media_type.clone(),
            filename: self.filename.clone(),
        }
    }

    fn discard(self) {
        tracing::debug!(filename = %self.filename, "Discarding selected image");
        self.preview.release();
    }
}

/// Read the candidate and register its bytes as a renderable preview.
async fn load_preview(
    blobs: &Arc<BlobStore>,
    file: &CandidateFile,
    media_type: &str,
) -> Result<(Bytes, BlobHandle), SelectionError> {
    let bytes = file.read().await.map_err(|source| SelectionError::Read {
        filename: file.name.clone(),
        source,
    })?;
    let preview = blobs.create(bytes.clone(), media_type);
    Ok((bytes, preview))
}

pub struct SelectionController {
    workflow: Arc<Workflow>,
    blobs: Arc<BlobStore>,
    current: Mutex<Option<SelectedImage>>,
}

impl SelectionController {
    pub fn new(workflow: Arc<Workflow>, blobs: Arc<BlobStore>) -> Self {
        Self {
            workflow,
            blobs,
            current: Mutex::new(None),
        }
    }

    /// Accept `file` as the selection, replacing and releasing the previous one.
    ///
    /// Non-image files and selections during a submission are rejected and
    /// leave the current selection untouched.
    pub async fn select(&self, file: CandidateFile) -> Result<(), SelectionError> {
        if self.workflow.is_analyzing() {
            return Err(SelectionError::SubmissionInFlight);
        }

        let media_type = file.media_type();
        if !media_type.starts_with("image/") {
            tracing::debug!(filename = %file.name, %media_type, "Ignoring non-image file");
            return Err(SelectionError::NotAnImage {
                filename: file.name,
                media_type,
            });
        }

        let (bytes, preview) = load_preview(&self.blobs, &file, &media_type).await?;
        let selected = SelectedImage {
            filename: file.name,
            media_type,
            bytes,
            preview,
        };

        // A submission may have started while the file was being read. The
        // check and the swap happen under the selection lock, which
        // `request_analysis` holds until the workflow is `Analyzing`.
        let previous = {
            let mut current = lock_unpoisoned(&self.current);
            if self.workflow.is_analyzing() {
                drop(current);
                selected.discard();
                return Err(SelectionError::SubmissionInFlight);
            }
            tracing::debug!(
                filename = %selected.filename,
                size = selected.bytes.len(),
                preview = %selected.preview.id(),
                "Image selected"
            );
            current.replace(selected)
        };

        if let Some(previous) = previous {
            previous.discard();
        }
        Ok(())
    }

    /// Drop the selection and release its preview.
    pub fn clear(&self) -> Result<(), SelectionError> {
        let previous = {
            let mut current = lock_unpoisoned(&self.current);
            if self.workflow.is_analyzing() {
                return Err(SelectionError::SubmissionInFlight);
            }
            current.take()
        };
        if let Some(previous) = previous {
            previous.discard();
        }
        Ok(())
    }

    /// Hand the selection to the workflow.
    ///
    /// Lock order is selection, then workflow generation.
    pub fn request_analysis(&self) -> Result<AnalysisTicket, SelectionError> {
        let current = lock_unpoisoned(&self.current);
        let submission = current
            .as_ref()
            .map(SelectedImage::submission)
            .ok_or(SelectionError::NothingSelected)?;

        Ok(self.workflow.request_analysis(submission)?)
    }

    pub fn has_selection(&self) -> bool {
        lock_unpoisoned(&self.current).is_some()
    }

    pub fn selected_filename(&self) -> Option<String> {
        self.with_selected(|s| s.filename.clone())
    }

    /// Read the current selection in place; the controller keeps ownership.
    pub fn with_selected<R>(&self, f: impl FnOnce(&SelectedImage) -> R) -> Option<R> {
        lock_unpoisoned(&self.current).as_ref().map(f)
    }

    /// Handle of the current preview, resolvable through the blob store.
    pub fn preview(&self) -> Option<HandleId> {
        lock_unpoisoned(&self.current)
            .as_ref()
            .map(SelectedImage::preview)
    }

    /// Unconditional discard used on teardown.
    pub(crate) fn discard(&self) {
        let previous = lock_unpoisoned(&self.current).take();
        if let Some(previous) = previous {
            previous.discard();
        }
    }
}
