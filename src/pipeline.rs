// THEORY:
// The `pipeline` module is the top-level API for the scan engine. It wraps the
// synchronous computation core (ingest, extract, score, detect, estimate) in a
// paced, cancellable state machine that a UI can drive and observe.
//
// Key architectural principles:
// 1.  **Pacing on top, computation underneath**: every number in a `ScanReport`
//     comes from a pure function in `core_modules`. The orchestrator only decides
//     *when* to call them and layers wall-clock pacing (the `Loading` pause, the six
//     named scanning steps, the `Analyzing` pause) on top for UI feedback.
// 2.  **Token-based cancellation**: each suspension point is a checkpoint. After the
//     delay resolves, the continuation compares its token to the current one under
//     the state lock; a mismatch means the session was cancelled or superseded, and
//     the continuation returns without touching state or emitting events.
// 3.  **Live inputs**: the image, selection and vehicle class are not captured when
//     a scan starts. Detection reads the image and class after the scanning steps;
//     the final analysis reads image, selection and class once more after the
//     `Analyzing` pause. A caller that moves the selection mid-scan changes the
//     outcome.
// 4.  **Owned detector capability**: the external detector lives in a
//     `DetectorSlot` owned by this orchestrator, initialized at most once, and any
//     failure degrades to the fallback heuristic instead of failing the scan.

use crate::core_modules::detection::{Detection, DetectorSlot, ExternalDetector};
use crate::core_modules::estimate::{self, EstimateBreakdown, VehicleClass};
use crate::core_modules::pixel_grid::{self, PixelGrid};
use crate::core_modules::region::{SelectionRect, extract_region};
use crate::core_modules::scan_session::{ScanSession, ScanStage, ScanStep, ScanToken};
use crate::core_modules::severity::{self, SeverityScore, SeveritySignals};
use crate::errors::{ConfigError, IngestError, PipelineError, ScanError};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::{Mutex as AsyncMutex, broadcast};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

const MAX_DELAY_MS: u64 = 60_000;
pub const CANCEL_MESSAGE: &str = "Scan cancelled by user";
pub const DROPPED_MESSAGE: &str = "Scan abandoned before it finished";

/// Per-step pacing of the `Scanning` stage, in milliseconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StepDelays {
    pub normalize: u64,
    pub detect_vehicle: u64,
    pub localize_damage: u64,
    pub score: u64,
    pub estimate: u64,
    pub fraud: u64,
}

impl Default for StepDelays {
    fn default() -> Self {
        Self {
            normalize: 450,
            detect_vehicle: 550,
            localize_damage: 600,
            score: 500,
            estimate: 450,
            fraud: 400,
        }
    }
}

impl StepDelays {
    /// The same delay for every step.
    pub fn uniform(millis: u64) -> Self {
        Self {
            normalize: millis,
            detect_vehicle: millis,
            localize_damage: millis,
            score: millis,
            estimate: millis,
            fraud: millis,
        }
    }

    pub fn millis_for(&self, step: ScanStep) -> u64 {
        match step {
            ScanStep::Normalize => self.normalize,
            ScanStep::DetectVehicle => self.detect_vehicle,
            ScanStep::LocalizeDamage => self.localize_damage,
            ScanStep::Score => self.score,
            ScanStep::Estimate => self.estimate,
            ScanStep::Fraud => self.fraud,
        }
    }

    /// Field name and value of every step delay.
    pub fn entries(&self) -> [(&'static str, u64); 6] {
        [
            ("normalize", self.normalize),
            ("detect_vehicle", self.detect_vehicle),
            ("localize_damage", self.localize_damage),
            ("score", self.score),
            ("estimate", self.estimate),
            ("fraud", self.fraud),
        ]
    }

    pub fn for_step(&self, step: ScanStep) -> Duration {
        Duration::from_millis(self.millis_for(step))
    }
}

/// Configuration for the ScanPipeline, allowing for tunable pacing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Pause between `Loading` and `Scanning`.
    pub loading_delay_ms: u64,
    /// Pause between detection and the final analysis.
    pub analyzing_delay_ms: u64,
    pub step_delays_ms: StepDelays,
    /// Capacity of the progress event channel. Slow subscribers that fall further
    /// behind than this miss events.
    pub event_capacity: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            loading_delay_ms: 250,
            analyzing_delay_ms: 200,
            step_delays_ms: StepDelays::default(),
            event_capacity: 64,
        }
    }
}

impl PipelineConfig {
    /// No pacing at all; every checkpoint resumes immediately.
    pub fn immediate() -> Self {
        Self {
            loading_delay_ms: 0,
            analyzing_delay_ms: 0,
            step_delays_ms: StepDelays::uniform(0),
            ..Self::default()
        }
    }

    pub fn from_json_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.event_capacity == 0 {
            return Err(ConfigError::Invalid {
                message: "event_capacity must be greater than 0".to_string(),
            });
        }
        let delays = [
            ("loading_delay_ms", self.loading_delay_ms),
            ("analyzing_delay_ms", self.analyzing_delay_ms),
        ]
        .into_iter()
        .chain(self.step_delays_ms.entries());
        for (name, millis) in delays {
            if millis > MAX_DELAY_MS {
                return Err(ConfigError::Invalid {
                    message: format!("{name} = {millis}ms exceeds the {MAX_DELAY_MS}ms limit"),
                });
            }
        }
        Ok(())
    }

    fn loading_delay(&self) -> Duration {
        Duration::from_millis(self.loading_delay_ms)
    }

    fn analyzing_delay(&self) -> Duration {
        Duration::from_millis(self.analyzing_delay_ms)
    }
}

/// The structured result of a completed scan.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanReport {
    pub token: ScanToken,
    pub vehicle_class: VehicleClass,
    /// The selection that was read for the final analysis.
    pub selection: Option<SelectionRect>,
    pub detections: Vec<Detection>,
    pub severity: SeverityScore,
    pub signals: SeveritySignals,
    pub estimate: EstimateBreakdown,
    pub used_fallback_detector: bool,
}

/// Progress notifications for the UI collaborator.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ScanEvent {
    StageChanged {
        token: ScanToken,
        stage: ScanStage,
    },
    StepCompleted {
        token: ScanToken,
        #[serde(rename = "stageKey")]
        step: ScanStep,
        #[serde(rename = "logMessage")]
        log_message: String,
    },
    Finished {
        token: ScanToken,
        report: ScanReport,
    },
    Failed {
        token: ScanToken,
        message: String,
    },
    Cancelled {
        token: ScanToken,
        message: String,
    },
}

/// How a scan session's future resolved.
#[derive(Debug, Clone, PartialEq)]
pub enum ScanOutcome {
    Done(ScanReport),
    Failed { message: String },
    /// The caller cancelled this session.
    Cancelled,
    /// A newer session took over; this one left no trace.
    Superseded,
}

/// A point-in-time copy of the orchestrator's visible state.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanSnapshot {
    pub session: ScanSession,
    pub vehicle_class: VehicleClass,
    pub selection: Option<SelectionRect>,
    pub detections: Vec<Detection>,
    pub severity: Option<SeverityScore>,
    pub estimate: Option<EstimateBreakdown>,
    pub used_fallback_detector: bool,
    pub approved: bool,
}

#[derive(Debug, Default)]
struct ScanInputs {
    image: Option<Arc<PixelGrid>>,
    selection: Option<SelectionRect>,
    vehicle_class: VehicleClass,
}

#[derive(Debug, Default)]
struct ScanOutputs {
    detections: Vec<Detection>,
    severity: Option<SeverityScore>,
    estimate: Option<EstimateBreakdown>,
    used_fallback_detector: bool,
}

#[derive(Debug, Default)]
struct ScanState {
    session: ScanSession,
    inputs: ScanInputs,
    outputs: ScanOutputs,
    approved: bool,
    last_cancelled: Option<ScanToken>,
}

struct Shared {
    config: PipelineConfig,
    state: Mutex<ScanState>,
    detector: AsyncMutex<DetectorSlot>,
    events: broadcast::Sender<ScanEvent>,
}

/// The main, top-level handle for the scan engine. Cloning is cheap and every
/// clone drives the same session state.
#[derive(Clone)]
pub struct ScanPipeline {
    shared: Arc<Shared>,
}

/// Cancels its session when dropped while the session is still in flight, so
/// a dropped `scan()` future or an aborted task does not leave the pipeline busy.
struct SessionGuard {
    pipeline: ScanPipeline,
    token: ScanToken,
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        self.pipeline.cancel_session(Some(self.token), DROPPED_MESSAGE);
    }
}

impl ScanPipeline {
    /// A pipeline without an external detector; every scan uses the fallback heuristic.
    pub fn new(config: PipelineConfig) -> Self {
        Self::build(config, None)
    }

    pub fn with_detector(config: PipelineConfig, detector: Box<dyn ExternalDetector>) -> Self {
        Self::build(config, Some(detector))
    }

    fn build(config: PipelineConfig, detector: Option<Box<dyn ExternalDetector>>) -> Self {
        let (events, _) = broadcast::channel(config.event_capacity.max(1));
        Self {
            shared: Arc::new(Shared {
                config,
                state: Mutex::new(ScanState::default()),
                detector: AsyncMutex::new(DetectorSlot::new(detector)),
                events,
            }),
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.shared.config
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ScanEvent> {
        self.shared.events.subscribe()
    }

    fn state(&self) -> MutexGuard<'_, ScanState> {
        self.shared
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn emit(&self, event: ScanEvent) {
        // No subscribers is not an error.
        let _ = self.shared.events.send(event);
    }

    // --- Inputs -----------------------------------------------------------

    /// Decodes and stores the photo to scan. On failure the previous image stays.
    pub fn load_image(&self, bytes: &[u8], mime_type: &str) -> Result<(), IngestError> {
        let grid = pixel_grid::decode(bytes, mime_type)?;
        self.load_grid(grid);
        Ok(())
    }

    pub fn load_grid(&self, grid: PixelGrid) {
        debug!(width = grid.width(), height = grid.height(), "image loaded");
        self.state().inputs.image = Some(Arc::new(grid));
    }

    pub fn set_selection(&self, selection: Option<SelectionRect>) {
        self.state().inputs.selection = selection;
    }

    pub fn set_vehicle_class(&self, vehicle_class: VehicleClass) {
        self.state().inputs.vehicle_class = vehicle_class;
    }

    /// Marks the claim as approved; approved claims cannot be re-scanned.
    pub fn set_approved(&self, approved: bool) {
        self.state().approved = approved;
    }

    // --- Observation ------------------------------------------------------

    pub fn stage(&self) -> ScanStage {
        self.state().session.stage
    }

    pub fn can_start(&self) -> bool {
        let state = self.state();
        !state.approved && !state.session.stage.is_in_flight() && state.inputs.image.is_some()
    }

    pub fn snapshot(&self) -> ScanSnapshot {
        let state = self.state();
        ScanSnapshot {
            session: state.session.clone(),
            vehicle_class: state.inputs.vehicle_class,
            selection: state.inputs.selection,
            detections: state.outputs.detections.clone(),
            severity: state.outputs.severity,
            estimate: state.outputs.estimate,
            used_fallback_detector: state.outputs.used_fallback_detector,
            approved: state.approved,
        }
    }

    // --- Control ----------------------------------------------------------

    /// Runs a full scan session to completion.
    ///
    /// Dropping the returned future before it resolves cancels the session.
    pub async fn scan(&self) -> Result<ScanOutcome, ScanError> {
        let token = self.begin(false)?;
        let _guard = SessionGuard {
            pipeline: self.clone(),
            token,
        };
        Ok(self.drive(token).await)
    }

    /// Starts a scan session on the tokio runtime. Aborting the handle cancels
    /// the session.
    pub fn spawn_scan(&self) -> Result<JoinHandle<ScanOutcome>, ScanError> {
        let token = self.begin(false)?;
        Ok(self.spawn_drive(token))
    }

    /// Starts a scan session even if one is in flight; the in-flight session is
    /// superseded and its pending continuations become no-ops.
    pub fn restart(&self) -> Result<JoinHandle<ScanOutcome>, ScanError> {
        let token = self.begin(true)?;
        Ok(self.spawn_drive(token))
    }

    /// Cancels the in-flight session, if any, and returns its token.
    pub fn cancel(&self) -> Option<ScanToken> {
        self.cancel_session(None, CANCEL_MESSAGE)
    }

    /// Cancels the in-flight session if it holds `only` (or any session for `None`).
    fn cancel_session(&self, only: Option<ScanToken>, message: &str) -> Option<ScanToken> {
        let mut state = self.state();
        if !state.session.stage.is_in_flight() {
            return None;
        }
        let cancelled = state.session.token;
        if only.is_some_and(|token| token != cancelled) {
            return None;
        }
        state.session.token = cancelled.next();
        state.session.stage = ScanStage::Idle;
        state.session.cancelled = true;
        state.session.message = Some(message.to_string());
        state.last_cancelled = Some(cancelled);
        info!(
            token = %cancelled,
            completed = state.session.completed_steps.len(),
            reason = message,
            "scan cancelled"
        );
        self.emit(ScanEvent::Cancelled {
            token: cancelled,
            message: message.to_string(),
        });
        Some(cancelled)
    }

    fn spawn_drive(&self, token: ScanToken) -> JoinHandle<ScanOutcome> {
        let guard = SessionGuard {
            pipeline: self.clone(),
            token,
        };
        tokio::spawn(async move { guard.pipeline.drive(guard.token).await })
    }

    /// Applies the start guard, resets transient outputs and allocates a token.
    fn begin(&self, supersede: bool) -> Result<ScanToken, ScanError> {
        let mut state = self.state();
        if state.approved {
            return Err(ScanError::Approved);
        }
        if !supersede && state.session.stage.is_in_flight() {
            return Err(ScanError::Busy {
                stage: state.session.stage,
            });
        }
        let Some(image) = state.inputs.image.as_ref() else {
            return Err(ScanError::NoImage);
        };
        let (width, height) = (image.width(), image.height());

        let token = state.session.token.next();
        state.outputs = ScanOutputs::default();
        state.session = ScanSession::start(token);
        info!(
            token = %token,
            width,
            height,
            vehicle_class = %state.inputs.vehicle_class,
            "scan started"
        );
        self.emit(ScanEvent::StageChanged {
            token,
            stage: ScanStage::Loading,
        });
        Ok(token)
    }

    /// Runs `apply` under the state lock if `token` is still current.
    fn update<T>(&self, token: ScanToken, apply: impl FnOnce(&mut ScanState) -> T) -> Option<T> {
        let mut state = self.state();
        if state.session.token != token {
            debug!(token = %token, current = %state.session.token, "dropping stale continuation");
            return None;
        }
        Some(apply(&mut state))
    }

    /// A checkpoint: suspends for `delay`, then applies `apply` if still current.
    async fn resume_after<T>(
        &self,
        token: ScanToken,
        delay: Duration,
        apply: impl FnOnce(&mut ScanState) -> T,
    ) -> Option<T> {
        tokio::time::sleep(delay).await;
        self.update(token, apply)
    }

    fn abandoned(&self, token: ScanToken) -> ScanOutcome {
        if self.state().last_cancelled == Some(token) {
            ScanOutcome::Cancelled
        } else {
            ScanOutcome::Superseded
        }
    }

    fn fail(&self, token: ScanToken, err: PipelineError) -> ScanOutcome {
        let message = err.to_string();
        let failed = self.update(token, |state| {
            state.session.stage = ScanStage::Error;
            state.session.message = Some(message.clone());
            error!(token = %token, error = %err, "scan failed");
            self.emit(ScanEvent::Failed {
                token,
                message: message.clone(),
            });
        });
        match failed {
            Some(()) => ScanOutcome::Failed { message },
            None => self.abandoned(token),
        }
    }

    async fn drive(&self, token: ScanToken) -> ScanOutcome {
        // --- Loading ---
        let detector_ready = {
            let mut slot = self.shared.detector.lock().await;
            if self.update(token, |_| ()).is_none() {
                return self.abandoned(token);
            }
            slot.ensure_ready().await
        };
        if !detector_ready {
            self.update(token, |state| state.outputs.used_fallback_detector = true);
        }

        let config = &self.shared.config;
        let scanning = self
            .resume_after(token, config.loading_delay(), |state| {
                state.session.stage = ScanStage::Scanning;
                debug!(token = %token, "stage -> scanning");
                self.emit(ScanEvent::StageChanged {
                    token,
                    stage: ScanStage::Scanning,
                });
            })
            .await;
        if scanning.is_none() {
            return self.abandoned(token);
        }

        // --- Scanning ---
        for step in ScanStep::ALL {
            let completed = self
                .resume_after(token, config.step_delays_ms.for_step(step), |state| {
                    state.session.complete_step(step);
                    debug!(token = %token, step = step.key(), "step completed");
                    self.emit(ScanEvent::StepCompleted {
                        token,
                        step,
                        log_message: step.log_message().to_string(),
                    });
                })
                .await;
            if completed.is_none() {
                return self.abandoned(token);
            }
        }

        self.analyze(token).await
    }

    async fn analyze(&self, token: ScanToken) -> ScanOutcome {
        // Detection runs on the full image, read now.
        let Some((image, vehicle_class)) = self.update(token, |state| {
            (state.inputs.image.clone(), state.inputs.vehicle_class)
        }) else {
            return self.abandoned(token);
        };
        let Some(image) = image else {
            return self.fail(token, PipelineError::MissingImage);
        };

        // A stale session already inside `detect` keeps the slot until its call
        // returns; one still waiting for the slot gives up here.
        let run = {
            let mut slot = self.shared.detector.lock().await;
            if self.update(token, |_| ()).is_none() {
                return self.abandoned(token);
            }
            slot.detect(&image, vehicle_class).await
        };

        let analyzing = self.update(token, move |state| {
            state.outputs.used_fallback_detector |= run.used_fallback;
            state.outputs.detections = run.detections;
            state.session.stage = ScanStage::Analyzing;
            debug!(token = %token, "stage -> analyzing");
            self.emit(ScanEvent::StageChanged {
                token,
                stage: ScanStage::Analyzing,
            });
        });
        if analyzing.is_none() {
            return self.abandoned(token);
        }

        // --- Analyzing: the selection is read here, not at scan start. ---
        let inputs = self
            .resume_after(token, self.shared.config.analyzing_delay(), |state| {
                (
                    state.inputs.image.clone(),
                    state.inputs.selection,
                    state.inputs.vehicle_class,
                    state.outputs.detections.clone(),
                )
            })
            .await;
        let Some((image, selection, vehicle_class, detections)) = inputs else {
            return self.abandoned(token);
        };
        let Some(image) = image else {
            return self.fail(token, PipelineError::MissingImage);
        };

        let region = match extract_region(&image, selection.as_ref()) {
            Ok(region) => region,
            Err(err) => return self.fail(token, err.into()),
        };
        let (severity, signals) = severity::score_with_signals(&region);
        let estimate = estimate::calculate(vehicle_class, severity, &detections);

        let finished = self.update(token, |state| {
            state.outputs.severity = Some(severity);
            state.outputs.estimate = Some(estimate);
            state.session.stage = ScanStage::Done;
            let report = ScanReport {
                token,
                vehicle_class,
                selection,
                detections,
                severity,
                signals,
                estimate,
                used_fallback_detector: state.outputs.used_fallback_detector,
            };
            info!(
                token = %token,
                severity,
                total = estimate.total,
                fallback = report.used_fallback_detector,
                "scan finished"
            );
            self.emit(ScanEvent::Finished {
                token,
                report: report.clone(),
            });
            report
        });
        match finished {
            Some(report) => ScanOutcome::Done(report),
            None => self.abandoned(token),
        }
    }
}
