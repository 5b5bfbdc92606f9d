//! Session: the host object wiring poller, selection and workflow together.
//!
//! Owns:
//! - one liveness poller (independent of everything else)
//! - one workflow with its derived-image manager
//! - one selection controller feeding that workflow
//! - the blob store backing preview and derived-image handles
//!
//! `shutdown()` is the teardown path: the poll schedule is cancelled and every
//! live handle is released.

use std::sync::Arc;
use std::time::Duration;

use crate::blob::BlobStore;
use crate::config::{ClientConfig, ConfigError};
use crate::gateway::{Gateway, HttpGateway};
use crate::liveness::LivenessPoller;
use crate::selection::SelectionController;
use crate::workflow::Workflow;

pub struct Session {
    blobs: Arc<BlobStore>,
    poller: LivenessPoller,
    workflow: Arc<Workflow>,
    selection: SelectionController,
}

impl Session {
    /// Build a session talking HTTP to the configured analysis server.
    pub fn new(config: ClientConfig) -> Result<Self, ConfigError> {
        let poll_interval = config.poll_interval;
        let gateway = Arc::new(HttpGateway::new(config)?);
        Ok(Self::with_gateway(gateway, poll_interval))
    }

    pub fn with_gateway(gateway: Arc<dyn Gateway>, poll_interval: Duration) -> Self {
        let blobs = BlobStore::new();
        let workflow = Workflow::new(Arc::clone(&gateway), Arc::clone(&blobs));
        let selection = SelectionController::new(Arc::clone(&workflow), Arc::clone(&blobs));
        let poller = LivenessPoller::new(gateway, poll_interval);

        Self {
            blobs,
            poller,
            workflow,
            selection,
        }
    }

    /// Begin liveness polling.
    pub fn start(&self) {
        self.poller.start();
    }

    pub fn liveness(&self) -> &LivenessPoller {
        &self.poller
    }

    pub fn selection(&self) -> &SelectionController {
        &self.selection
    }

    pub fn workflow(&self) -> &Arc<Workflow> {
        &self.workflow
    }

    pub fn blobs(&self) -> &Arc<BlobStore> {
        &self.blobs
    }

    /// "Analyze another": drop the result, its derived image and the selection.
    pub fn analyze_another(&self) {
        self.workflow.reset();
        self.selection.discard();
    }

    pub fn shutdown(&self) {
        self.poller.stop();
        self.workflow.reset();
        self.selection.discard();
        tracing::debug!(live_handles = self.blobs.live_count(), "Session shut down");
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.shutdown();
    }
}
