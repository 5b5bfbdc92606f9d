//! teaguard: client core for the tea-leaf disease analysis service.

use std::sync::{Mutex, MutexGuard, PoisonError};

mod blob;
mod config;
mod derived_image;
mod liveness;
mod notice;
mod prediction;
mod selection;
mod session;
mod telemetry;
mod version;
mod workflow;

pub mod gateway;

#[cfg(test)]
mod test_support;

pub use blob::{Blob, BlobHandle, BlobStore, HandleId};
pub use config::{BYPASS_HEADER_NAME, ClientConfig, ConfigError, DEFAULT_BASE_URL};
pub use derived_image::{DerivedImageManager, DerivedImageStatus};
pub use gateway::{Gateway, GatewayError, HttpGateway, Submission};
pub use liveness::{LivenessPoller, LivenessStatus, MIN_POLL_INTERVAL};
pub use notice::{ANALYSIS_FAILED_MESSAGE, Notice, NoticeKind};
pub use prediction::PredictionResult;
pub use selection::{
    CandidateFile, FileSource, SelectedImage, SelectionController, SelectionError,
};
pub use session::Session;
pub use telemetry::init_tracing;
pub use version::{TEAGUARD_VERSION, user_agent};
pub use workflow::{AnalysisOutcome, AnalysisRejected, AnalysisTicket, Workflow, WorkflowState};

/// Lock a mutex, recovering the guard if a panicking holder poisoned it.
pub(crate) fn lock_unpoisoned<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
