//! Scriptable in-memory gateway for state machine tests.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::Semaphore;

use crate::gateway::{Gateway, GatewayError, Submission};
use crate::prediction::PredictionResult;

pub(crate) fn leaf_result(gradcam_image: &str) -> PredictionResult {
    PredictionResult {
        filename: "leaf.jpg".to_string(),
        prediction: "Healthy".to_string(),
        confidence: 0.97,
        gradcam_image: gradcam_image.to_string(),
    }
}

pub(crate) struct MockGateway {
    probes: Mutex<VecDeque<(Duration, bool)>>,
    alternating: bool,
    probe_calls: AtomicUsize,
    probe_outcomes: Mutex<Vec<bool>>,

    submit_responses: Mutex<VecDeque<Result<PredictionResult, GatewayError>>>,
    submissions: Mutex<Vec<Submission>>,
    /// When set, each submission waits for one permit before answering.
    submit_gate: Option<Semaphore>,

    fetch_responses: Mutex<HashMap<String, Result<Bytes, GatewayError>>>,
    fetches: Mutex<Vec<String>>,
    fetch_gate: Option<Semaphore>,
}

impl MockGateway {
    pub(crate) fn new() -> Self {
        Self {
            probes: Mutex::new(VecDeque::new()),
            alternating: false,
            probe_calls: AtomicUsize::new(0),
            probe_outcomes: Mutex::new(Vec::new()),
            submit_responses: Mutex::new(VecDeque::new()),
            submissions: Mutex::new(Vec::new()),
            submit_gate: None,
            fetch_responses: Mutex::new(HashMap::new()),
            fetches: Mutex::new(Vec::new()),
            fetch_gate: None,
        }
    }

    /// Probes answer `true, false, true, ...` once scripted probes run out.
    pub(crate) fn with_alternating_probe(mut self) -> Self {
        self.alternating = true;
        self
    }

    pub(crate) fn with_probe_outcomes(self, outcomes: impl IntoIterator<Item = bool>) -> Self {
        self.with_scripted_probes(outcomes.into_iter().map(|up| (Duration::ZERO, up)))
    }

    pub(crate) fn with_scripted_probes(
        self,
        probes: impl IntoIterator<Item = (Duration, bool)>,
    ) -> Self {
        self.probes.lock().unwrap().extend(probes);
        self
    }

    pub(crate) fn with_submit_response(
        self,
        response: Result<PredictionResult, GatewayError>,
    ) -> Self {
        self.submit_responses.lock().unwrap().push_back(response);
        self
    }

    pub(crate) fn with_fetch_response(
        self,
        reference: &str,
        response: Result<Bytes, GatewayError>,
    ) -> Self {
        self.fetch_responses
            .lock()
            .unwrap()
            .insert(reference.to_string(), response);
        self
    }

    pub(crate) fn with_gated_submissions(mut self) -> Self {
        self.submit_gate = Some(Semaphore::new(0));
        self
    }

    pub(crate) fn with_gated_fetches(mut self) -> Self {
        self.fetch_gate = Some(Semaphore::new(0));
        self
    }

    pub(crate) fn release_submission(&self) {
        if let Some(gate) = &self.submit_gate {
            gate.add_permits(1);
        }
    }

    pub(crate) fn release_fetch(&self) {
        if let Some(gate) = &self.fetch_gate {
            gate.add_permits(1);
        }
    }

    pub(crate) fn probe_count(&self) -> usize {
        self.probe_calls.load(Ordering::SeqCst)
    }

    pub(crate) fn probe_outcomes(&self) -> Vec<bool> {
        self.probe_outcomes.lock().unwrap().clone()
    }

    pub(crate) fn submissions(&self) -> Vec<Submission> {
        self.submissions.lock().unwrap().clone()
    }

    pub(crate) fn fetches(&self) -> Vec<String> {
        self.fetches.lock().unwrap().clone()
    }
}

#[async_trait]
impl Gateway for MockGateway {
    async fn probe_liveness(&self) -> bool {
        let call = self.probe_calls.fetch_add(1, Ordering::SeqCst);
        let scripted = self.probes.lock().unwrap().pop_front();

        let up = match scripted {
            Some((delay, up)) => {
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                up
            }
            None if self.alternating => call % 2 == 0,
            None => true,
        };

        self.probe_outcomes.lock().unwrap().push(up);
        up
    }

    async fn submit_for_prediction(
        &self,
        submission: &Submission,
    ) -> Result<PredictionResult, GatewayError> {
        self.submissions.lock().unwrap().push(submission.clone());

        if let Some(gate) = &self.submit_gate {
            gate.acquire().await.unwrap().forget();
        }

        self.submit_responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(leaf_result("/static/cam1.png")))
    }

    async fn fetch_derived_image(&self, reference: &str) -> Result<Bytes, GatewayError> {
        self.fetches.lock().unwrap().push(reference.to_string());

        if let Some(gate) = &self.fetch_gate {
            gate.acquire().await.unwrap().forget();
        }

        self.fetch_responses
            .lock()
            .unwrap()
            .get(reference)
            .cloned()
            .unwrap_or_else(|| Ok(Bytes::from_static(b"gradcam-png")))
    }
}
