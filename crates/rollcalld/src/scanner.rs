//! Periodic capture → detect → match loop.
//!
//! A fixed-period ticker drives scan cycles. The scanner state machine
//! (`Idle` → `Capturing` → `Idle`, or → `Stopped` on a match or teardown)
//! guarantees a single cycle in flight: a tick that arrives while a cycle
//! is running is dropped. Cycles run on the blocking pool since capture
//! and landmark detection are blocking I/O.

use crate::capture::{CaptureDevice, CaptureError};
use rollcall_core::{DetectorError, IdentityMatcher, IdentityRecord, LandmarkDetector, MatchOutcome};
use rollcall_store::{Store, StoreError};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

const EVENT_BUFFER: usize = 16;

#[derive(Error, Debug)]
pub enum ScanError {
    #[error("capture: {0}")]
    Capture(#[from] CaptureError),
    #[error("detector: {0}")]
    Detector(#[from] DetectorError),
    #[error("registry: {0}")]
    Registry(#[from] StoreError),
    #[error("scanner stopped during cycle")]
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanState {
    Idle,
    Capturing,
    Stopped,
}

/// Status reported to the session owner after each completed cycle.
#[derive(Debug, Clone, PartialEq)]
pub enum ScanEvent {
    Matched(IdentityRecord),
    NoMatch,
    NoFaceDetected,
    /// Capture or detection failed this tick; scanning continues.
    CycleFailed(String),
}

impl From<MatchOutcome> for ScanEvent {
    fn from(outcome: MatchOutcome) -> Self {
        match outcome {
            MatchOutcome::Matched(record) => ScanEvent::Matched(record),
            MatchOutcome::NoMatch => ScanEvent::NoMatch,
            MatchOutcome::NoFaceDetected => ScanEvent::NoFaceDetected,
        }
    }
}

/// Source of registered identities, read afresh on every cycle.
pub trait IdentitySource: Send + 'static {
    fn identities(&self) -> Result<Vec<IdentityRecord>, StoreError>;
}

impl IdentitySource for Arc<Mutex<Store>> {
    fn identities(&self) -> Result<Vec<IdentityRecord>, StoreError> {
        lock(self).identities()
    }
}

/// State shared between the session handle and the running scanner.
struct ScanShared {
    state: Mutex<ScanState>,
    stop: Notify,
}

impl ScanShared {
    fn new() -> Self {
        Self {
            state: Mutex::new(ScanState::Idle),
            stop: Notify::new(),
        }
    }

    fn state(&self) -> ScanState {
        *lock(&self.state)
    }

    /// Idle → Capturing. False if a cycle is in flight or the scanner stopped.
    fn begin_cycle(&self) -> bool {
        let mut state = lock(&self.state);
        match *state {
            ScanState::Idle => {
                *state = ScanState::Capturing;
                true
            }
            ScanState::Capturing | ScanState::Stopped => false,
        }
    }

    /// Capturing → Idle, or → Stopped on a match. False when the scanner
    /// was torn down mid-cycle and the result must be discarded.
    fn finish_cycle(&self, event: &ScanEvent) -> bool {
        let mut state = lock(&self.state);
        if *state == ScanState::Stopped {
            return false;
        }
        if matches!(event, ScanEvent::Matched(_)) {
            *state = ScanState::Stopped;
            self.stop.notify_one();
        } else {
            *state = ScanState::Idle;
        }
        true
    }

    fn teardown(&self) {
        let mut state = lock(&self.state);
        if *state != ScanState::Stopped {
            *state = ScanState::Stopped;
            self.stop.notify_one();
        }
    }
}

/// Exclusively owned cycle resources.
struct Cycle<C, D, R> {
    capture: C,
    matcher: IdentityMatcher<D>,
    registry: R,
}

impl<C: CaptureDevice, D: LandmarkDetector, R: IdentitySource> Cycle<C, D, R> {
    /// Capture, evaluate, then hand the image back to the device whatever
    /// the outcome.
    fn run(&mut self, shared: &ScanShared) -> Result<MatchOutcome, ScanError> {
        let probe = self.capture.capture()?;
        let result = self.evaluate(&probe, shared);
        self.capture.release(&probe);
        result
    }

    fn evaluate(&self, probe: &Path, shared: &ScanShared) -> Result<MatchOutcome, ScanError> {
        if shared.state() == ScanState::Stopped {
            return Err(ScanError::Cancelled);
        }

        let faces = self.matcher.detector().detect(probe)?;
        if faces.is_empty() {
            return Ok(MatchOutcome::NoFaceDetected);
        }

        let records = self.registry.identities()?;
        Ok(self.matcher.match_detections(&faces, &records))
    }
}

struct ScanCore<C, D, R> {
    shared: Arc<ScanShared>,
    cycle: Mutex<Cycle<C, D, R>>,
    events: mpsc::Sender<ScanEvent>,
}

impl<C, D, R> ScanCore<C, D, R>
where
    C: CaptureDevice,
    D: LandmarkDetector + 'static,
    R: IdentitySource,
{
    /// Handle one timer tick. Returns the spawned cycle, or `None` if the
    /// tick was dropped.
    fn tick(self: &Arc<Self>) -> Option<JoinHandle<()>> {
        if !self.shared.begin_cycle() {
            tracing::trace!(state = ?self.shared.state(), "tick dropped");
            return None;
        }
        let core = Arc::clone(self);
        Some(tokio::spawn(core.run_cycle()))
    }

    async fn run_cycle(self: Arc<Self>) {
        let core = Arc::clone(&self);
        let result = tokio::task::spawn_blocking(move || {
            let mut cycle = lock(&core.cycle);
            cycle.run(&core.shared)
        })
        .await;

        let event = match result {
            Ok(Ok(outcome)) => ScanEvent::from(outcome),
            Ok(Err(ScanError::Cancelled)) => {
                tracing::debug!("cycle cancelled by teardown");
                return;
            }
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "scan cycle failed");
                ScanEvent::CycleFailed(e.to_string())
            }
            Err(e) => {
                tracing::warn!(error = %e, "scan cycle panicked");
                ScanEvent::CycleFailed(format!("cycle task: {e}"))
            }
        };

        if !self.shared.finish_cycle(&event) {
            tracing::debug!(?event, "discarding result of cycle finished after teardown");
            return;
        }
        tracing::debug!(?event, "scan cycle complete");
        // Receiver gone means the session was dropped; nothing to report to.
        let _ = self.events.send(event).await;
    }

    async fn run_loop(self: Arc<Self>, period: Duration) {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        // The first tick completes immediately; the first cycle starts one period in.
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = self.shared.stop.notified() => break,
                _ = ticker.tick() => {
                    if self.shared.state() == ScanState::Stopped {
                        break;
                    }
                    self.tick();
                }
            }
        }
        tracing::debug!("scan loop exited");
    }
}

/// Scanner configured with its capture device, matcher and registry.
pub struct Scanner<C, D, R> {
    cycle: Cycle<C, D, R>,
    period: Duration,
}

impl<C, D, R> Scanner<C, D, R>
where
    C: CaptureDevice,
    D: LandmarkDetector + 'static,
    R: IdentitySource,
{
    pub fn new(capture: C, matcher: IdentityMatcher<D>, registry: R, period: Duration) -> Self {
        Self {
            cycle: Cycle {
                capture,
                matcher,
                registry,
            },
            period,
        }
    }

    /// Start ticking. Must be called within a Tokio runtime.
    pub fn start(self) -> ScanSession {
        let period = self.period;
        let (core, mut session) = self.attach();
        session.task = Some(tokio::spawn(core.run_loop(period)));
        tracing::info!(period_ms = period.as_millis() as u64, "scanning started");
        session
    }

    fn attach(self) -> (Arc<ScanCore<C, D, R>>, ScanSession) {
        let shared = Arc::new(ScanShared::new());
        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        let core = Arc::new(ScanCore {
            shared: Arc::clone(&shared),
            cycle: Mutex::new(self.cycle),
            events: tx,
        });
        let session = ScanSession {
            shared,
            events: rx,
            task: None,
        };
        (core, session)
    }
}

/// Handle to a running scan. Dropping it tears the scan down.
pub struct ScanSession {
    shared: Arc<ScanShared>,
    events: mpsc::Receiver<ScanEvent>,
    task: Option<JoinHandle<()>>,
}

impl ScanSession {
    #[cfg(test)]
    pub fn state(&self) -> ScanState {
        self.shared.state()
    }

    /// Next cycle result. `None` once the scanner has stopped and every
    /// pending result has been delivered.
    pub async fn next_event(&mut self) -> Option<ScanEvent> {
        self.events.recv().await
    }

    /// Wait until an identity is matched. Transient failures are skipped.
    #[cfg(test)]
    pub async fn wait_for_match(&mut self) -> Option<IdentityRecord> {
        while let Some(event) = self.next_event().await {
            if let ScanEvent::Matched(record) = event {
                return Some(record);
            }
        }
        None
    }

    /// Stop ticking and discard any cycle still in flight.
    pub fn stop(&self) {
        self.shared.teardown();
        tracing::info!("scanning stopped");
    }

    /// Wait for the tick loop to exit.
    pub async fn join(mut self) {
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for ScanSession {
    fn drop(&mut self) {
        self.shared.teardown();
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
