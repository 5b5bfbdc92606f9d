//! Prediction workflow state machine.
//!
//! ```text
//! Idle ──request_analysis──▶ Analyzing ──ok──▶ Succeeded(result)
//!  ▲                            │
//!  │                            └──err──▶ Failed
//!  └────────────── reset ─────────────────────┘
//! ```
//!
//! Every transition bumps a generation counter. A submission only applies its
//! outcome if the generation it started with is still current, so a late
//! completion never lands after a reset or a newer request.

use std::sync::{Arc, Mutex};

use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;

use crate::blob::BlobStore;
use crate::derived_image::DerivedImageManager;
use crate::gateway::{Gateway, GatewayError, Submission};
use crate::lock_unpoisoned;
use crate::notice::Notice;
use crate::prediction::PredictionResult;

#[derive(Debug, Clone, Default, PartialEq)]
pub enum WorkflowState {
    #[default]
    Idle,
    Analyzing,
    Succeeded(Arc<PredictionResult>),
    /// No result stored; the cause is only logged.
    Failed,
}

impl WorkflowState {
    pub fn is_analyzing(&self) -> bool {
        matches!(self, Self::Analyzing)
    }

    pub fn result(&self) -> Option<&Arc<PredictionResult>> {
        match self {
            Self::Succeeded(result) => Some(result),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Analyzing => "analyzing",
            Self::Succeeded(_) => "succeeded",
            Self::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum AnalysisRejected {
    #[error("An analysis is already in progress")]
    AlreadyAnalyzing,
}

/// How a submission ended.
#[derive(Debug, Clone, PartialEq)]
pub enum AnalysisOutcome {
    Succeeded(Arc<PredictionResult>),
    Failed(GatewayError),
    /// Completed after a reset or a newer request; not applied.
    Discarded,
}

/// Handle to an accepted submission.
#[derive(Debug)]
pub struct AnalysisTicket {
    generation: u64,
    task: JoinHandle<AnalysisOutcome>,
}

impl AnalysisTicket {
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Wait for the submission to finish.
    pub async fn wait(self) -> AnalysisOutcome {
        match self.task.await {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::error!(generation = self.generation, error = %e, "Analysis task aborted");
                AnalysisOutcome::Discarded
            }
        }
    }
}

pub struct Workflow {
    gateway: Arc<dyn Gateway>,
    derived: DerivedImageManager,
    generation: Mutex<u64>,
    state: watch::Sender<WorkflowState>,
    notices: broadcast::Sender<Notice>,
}

impl Workflow {
    pub fn new(gateway: Arc<dyn Gateway>, blobs: Arc<BlobStore>) -> Arc<Self> {
        let (state, _) = watch::channel(WorkflowState::Idle);
        let (notices, _) = broadcast::channel(16);
        Arc::new(Self {
            derived: DerivedImageManager::new(Arc::clone(&gateway), blobs),
            gateway,
            generation: Mutex::new(0),
            state,
            notices,
        })
    }

    pub fn state(&self) -> WorkflowState {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<WorkflowState> {
        self.state.subscribe()
    }

    pub fn notices(&self) -> broadcast::Receiver<Notice> {
        self.notices.subscribe()
    }

    pub fn is_analyzing(&self) -> bool {
        self.state.borrow().is_analyzing()
    }

    pub fn result(&self) -> Option<Arc<PredictionResult>> {
        self.state.borrow().result().cloned()
    }

    pub fn derived_image(&self) -> &DerivedImageManager {
        &self.derived
    }

    /// Begin an analysis. Rejected, not queued, while one is in flight.
    ///
    /// Any previous result is cleared and its derived image released before
    /// the submission starts.
    pub fn request_analysis(
        self: &Arc<Self>,
        submission: Submission,
    ) -> Result<AnalysisTicket, AnalysisRejected> {
        let generation = {
            let mut generation = lock_unpoisoned(&self.generation);
            if self.is_analyzing() {
                tracing::debug!(filename = %submission.filename, "Rejecting overlapping analysis");
                return Err(AnalysisRejected::AlreadyAnalyzing);
            }
            *generation += 1;
            self.derived.release();
            self.state.send_replace(WorkflowState::Analyzing);
            *generation
        };

        tracing::info!(generation, filename = %submission.filename, "Analysis started");
        let workflow = Arc::clone(self);
        let task = tokio::spawn(async move { workflow.run(generation, submission).await });

        Ok(AnalysisTicket { generation, task })
    }

    async fn run(&self, generation: u64, submission: Submission) -> AnalysisOutcome {
        let outcome = self.gateway.submit_for_prediction(&submission).await;

        let current = lock_unpoisoned(&self.generation);
        if *current != generation {
            tracing::debug!(
                generation,
                current = *current,
                "Discarding completion for superseded analysis"
            );
            return AnalysisOutcome::Discarded;
        }

        match outcome {
            Ok(result) => {
                let result = Arc::new(result);
                tracing::info!(
                    generation,
                    prediction = %result.prediction,
                    confidence = result.confidence,
                    "Analysis succeeded"
                );
                self.state
                    .send_replace(WorkflowState::Succeeded(Arc::clone(&result)));
                self.derived.load(generation, &result.gradcam_image);
                let _ = self.notices.send(Notice::analysis_complete(&result));
                AnalysisOutcome::Succeeded(result)
            }
            Err(e) => {
                tracing::error!(generation, error = %e, "Prediction error");
                self.state.send_replace(WorkflowState::Failed);
                let _ = self.notices.send(Notice::analysis_failed());
                AnalysisOutcome::Failed(e)
            }
        }
    }

    /// Return to `Idle`, discarding any result and releasing its derived image.
    ///
    /// An in-flight submission is not aborted; its completion is ignored.
    pub fn reset(&self) {
        let mut generation = lock_unpoisoned(&self.generation);
        *generation += 1;
        self.derived.release();
        self.state.send_replace(WorkflowState::Idle);
        tracing::debug!(generation = *generation, "Workflow reset");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::derived_image::DerivedImageStatus;
    use crate::notice::NoticeKind;
    use crate::test_support::{MockGateway, leaf_result};
    use bytes::Bytes;

    fn submission(filename: &str) -> Submission {
        Submission {
            bytes: Bytes::from_static(b"leaf"),
            media_type: "image/jpeg".to_string(),
            filename: filename.to_string(),
        }
    }

    fn workflow(gateway: &Arc<MockGateway>) -> (Arc<Workflow>, Arc<BlobStore>) {
        let blobs = BlobStore::new();
        (Workflow::new(gateway.clone(), Arc::clone(&blobs)), blobs)
    }

    async fn derived_settled(workflow: &Workflow) -> DerivedImageStatus {
        let mut rx = workflow.derived_image().subscribe();
        let status = *rx
            .wait_for(|s| *s != DerivedImageStatus::Pending)
            .await
            .unwrap();
        status
    }

    #[test]
    fn state_names() {
        assert_eq!(WorkflowState::default().as_str(), "idle");
        assert_eq!(WorkflowState::Analyzing.as_str(), "analyzing");
        assert_eq!(WorkflowState::Failed.as_str(), "failed");
    }

    #[tokio::test]
    async fn success_stores_result_and_loads_derived_image() {
        let gateway = Arc::new(MockGateway::new());
        let (workflow, blobs) = workflow(&gateway);

        let ticket = workflow.request_analysis(submission("leaf.jpg")).unwrap();
        assert_eq!(workflow.state(), WorkflowState::Analyzing);

        let outcome = ticket.wait().await;
        assert!(matches!(outcome, AnalysisOutcome::Succeeded(_)));

        let result = workflow.result().unwrap();
        assert_eq!(*result, leaf_result("/static/cam1.png"));

        assert!(matches!(
            derived_settled(&workflow).await,
            DerivedImageStatus::Ready { .. }
        ));
        assert_eq!(gateway.fetches(), vec!["/static/cam1.png".to_string()]);
        assert_eq!(blobs.live_count(), 1);
    }

    #[tokio::test]
    async fn overlapping_request_is_rejected() {
        let gateway = Arc::new(MockGateway::new());
        let (workflow, _blobs) = workflow(&gateway);

        let first = workflow.request_analysis(submission("a.jpg")).unwrap();
        let second = workflow.request_analysis(submission("b.jpg"));
        assert!(matches!(second, Err(AnalysisRejected::AlreadyAnalyzing)));

        first.wait().await;
        let submitted = gateway.submissions();
        assert_eq!(submitted.len(), 1);
        assert_eq!(submitted[0].filename, "a.jpg");
    }

    #[tokio::test]
    async fn failure_is_stable_and_retriable() {
        let gateway = Arc::new(
            MockGateway::new()
                .with_submit_response(Err(GatewayError::ServiceError {
                    status: 500,
                    reason: "Internal Server Error".to_string(),
                }))
                .with_submit_response(Ok(leaf_result("/static/cam2.png"))),
        );
        let (workflow, _blobs) = workflow(&gateway);
        let mut notices = workflow.notices();

        let outcome = workflow
            .request_analysis(submission("a.jpg"))
            .unwrap()
            .wait()
            .await;
        assert!(matches!(
            outcome,
            AnalysisOutcome::Failed(GatewayError::ServiceError { status: 500, .. })
        ));
        assert_eq!(workflow.state(), WorkflowState::Failed);
        assert!(workflow.result().is_none());
        assert_eq!(
            workflow.derived_image().status(),
            DerivedImageStatus::Empty
        );

        let notice = notices.recv().await.unwrap();
        assert_eq!(notice, Notice::analysis_failed());

        let outcome = workflow
            .request_analysis(submission("b.jpg"))
            .unwrap()
            .wait()
            .await;
        assert!(matches!(outcome, AnalysisOutcome::Succeeded(_)));
        assert_eq!(notices.recv().await.unwrap().kind, NoticeKind::Info);
    }

    #[tokio::test]
    async fn late_success_after_reset_is_discarded() {
        let gateway = Arc::new(MockGateway::new().with_gated_submissions());
        let (workflow, blobs) = workflow(&gateway);

        let ticket = workflow.request_analysis(submission("a.jpg")).unwrap();
        tokio::task::yield_now().await;
        workflow.reset();
        assert_eq!(workflow.state(), WorkflowState::Idle);

        gateway.release_submission();
        assert_eq!(ticket.wait().await, AnalysisOutcome::Discarded);

        assert_eq!(workflow.state(), WorkflowState::Idle);
        assert!(gateway.fetches().is_empty());
        assert_eq!(blobs.created_count(), 0);
    }

    #[tokio::test]
    async fn late_result_does_not_clobber_newer_request() {
        let gateway = Arc::new(
            MockGateway::new()
                .with_gated_submissions()
                .with_submit_response(Ok(leaf_result("/static/old.png")))
                .with_submit_response(Ok(leaf_result("/static/new.png"))),
        );
        let (workflow, _blobs) = workflow(&gateway);

        let stale = workflow.request_analysis(submission("a.jpg")).unwrap();
        tokio::task::yield_now().await;
        workflow.reset();
        let fresh = workflow.request_analysis(submission("b.jpg")).unwrap();
        tokio::task::yield_now().await;

        gateway.release_submission();
        gateway.release_submission();
        let outcomes = [stale.wait().await, fresh.wait().await];

        let applied: Vec<_> = outcomes
            .iter()
            .filter(|o| matches!(o, AnalysisOutcome::Succeeded(_)))
            .collect();
        assert_eq!(applied.len(), 1);
        assert!(matches!(outcomes[0], AnalysisOutcome::Discarded));
        assert!(matches!(workflow.state(), WorkflowState::Succeeded(_)));
    }

    #[tokio::test]
    async fn reset_releases_derived_image() {
        let gateway = Arc::new(MockGateway::new());
        let (workflow, blobs) = workflow(&gateway);

        workflow
            .request_analysis(submission("a.jpg"))
            .unwrap()
            .wait()
            .await;
        let DerivedImageStatus::Ready { handle } = derived_settled(&workflow).await else {
            panic!("expected derived image");
        };

        workflow.reset();

        assert_eq!(workflow.state(), WorkflowState::Idle);
        assert!(workflow.result().is_none());
        assert!(blobs.resolve(handle).is_none());
        assert_eq!(blobs.released_count(), 1);
    }

    #[tokio::test]
    async fn new_request_releases_previous_handle_before_next_one() {
        let gateway = Arc::new(MockGateway::new().with_gated_submissions());
        let (workflow, blobs) = workflow(&gateway);

        gateway.release_submission();
        workflow
            .request_analysis(submission("a.jpg"))
            .unwrap()
            .wait()
            .await;
        let DerivedImageStatus::Ready { handle } = derived_settled(&workflow).await else {
            panic!("expected derived image");
        };

        let ticket = workflow.request_analysis(submission("b.jpg")).unwrap();
        assert!(workflow.result().is_none());
        assert!(!blobs.is_live(handle));
        assert_eq!(blobs.live_count(), 0);

        gateway.release_submission();
        ticket.wait().await;
        assert!(matches!(
            derived_settled(&workflow).await,
            DerivedImageStatus::Ready { .. }
        ));
        assert_eq!(blobs.created_count(), 2);
        assert_eq!(blobs.released_count(), 1);
    }
}
