//! Back-to-back scan sessions, recording attendance for each match.

use crate::capture::CaptureDevice;
use crate::scanner::{ScanEvent, Scanner};
use chrono::Local;
use rollcall_core::{
    record_attendance, AttendanceOutcome, IdentityMatcher, IdentityRecord, LandmarkDetector,
};
use rollcall_store::Store;
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

pub struct Kiosk<C, D> {
    pub device: C,
    pub detector: Arc<D>,
    pub store: Arc<Mutex<Store>>,
    pub period: Duration,
    pub signature_cache: bool,
}

impl<C, D> Kiosk<C, D>
where
    C: CaptureDevice + Clone,
    D: LandmarkDetector + 'static,
{
    /// Scan until `shutdown` completes. The same future is watched for the
    /// whole run, including while a match is being recorded.
    pub async fn run(self, shutdown: impl Future<Output = ()>) {
        tokio::pin!(shutdown);

        loop {
            let matcher = if self.signature_cache {
                IdentityMatcher::with_cache(Arc::clone(&self.detector))
            } else {
                IdentityMatcher::new(Arc::clone(&self.detector))
            };
            let mut session = Scanner::new(
                self.device.clone(),
                matcher,
                Arc::clone(&self.store),
                self.period,
            )
            .start();

            let matched = loop {
                tokio::select! {
                    event = session.next_event() => match event {
                        Some(ScanEvent::Matched(record)) => break Some(record),
                        Some(ScanEvent::NoMatch) => tracing::info!("face not recognised"),
                        Some(ScanEvent::NoFaceDetected) => tracing::debug!("no face in frame"),
                        Some(ScanEvent::CycleFailed(reason)) => {
                            tracing::debug!(%reason, "scan cycle failed")
                        }
                        None => break None,
                    },
                    _ = &mut shutdown => {
                        session.stop();
                        return;
                    }
                }
            };

            let Some(record) = matched else {
                tracing::warn!("scan session ended without a match");
                return;
            };
            self.record(&record);

            tokio::select! {
                _ = session.join() => {}
                _ = &mut shutdown => return,
            }
        }
    }

    fn record(&self, record: &IdentityRecord) {
        // One calendar day per match, derived once.
        let now = Local::now();
        let today = now.date_naive();
        let outcome = {
            let mut store = self.store.lock().unwrap_or_else(PoisonError::into_inner);
            record_attendance(&record.name, today, now, &mut *store)
        };
        match outcome {
            Ok(AttendanceOutcome::Recorded(mark)) => tracing::info!(
                name = %mark.name,
                worker_id = %record.worker_id,
                date = %mark.date,
                "attendance recorded"
            ),
            Ok(AttendanceOutcome::Duplicate) => {
                tracing::info!(name = %record.name, date = %today, "already marked today")
            }
            Err(e) => tracing::error!(name = %record.name, error = %e, "failed to record attendance"),
        }
    }
}
