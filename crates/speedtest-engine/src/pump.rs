/// ProgressPump: turns a running transfer into an ordered event sequence.
///
/// Each wait multiplexes, in priority order:
///
/// 1. external cancellation (client gone, server shutting down)
/// 2. the transfer's completion signal
/// 3. the next rate sample
/// 4. a short poll timeout, used only to re-check the deadline
///
/// Exactly one terminal event (`complete` or `error`) is produced, or none at
/// all when cancelled. Reported elapsed time never decreases.

use std::sync::Arc;
use std::time::Duration;

use futures_util::Stream;
use speedtest_types::{ErrorKind, ProgressEvent};
use tokio::sync::oneshot;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::deadline::DeadlineController;
use crate::engine::TransferReport;
use crate::error::TransferError;
use crate::logging::{SessionEvent, SessionLog, SessionLogger};
use crate::sampler::{RateSample, SampleReceiver};
use crate::session::{SessionState, TransferSession};

/// Upper bound on the delay between deadline expiry and the forced stop when
/// no samples are arriving.
pub const POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Completion signal sent by the transfer task.
pub type TransferDone = oneshot::Receiver<Result<TransferReport, TransferError>>;

pub struct ProgressPump {
    session: TransferSession,
    deadline: DeadlineController,
    samples: SampleReceiver,
    samples_open: bool,
    done: TransferDone,
    cancel: CancellationToken,
    transfer: CancellationToken,
    poll_interval: Duration,
    last_elapsed: Duration,
    logger: Arc<dyn SessionLogger>,
}

impl ProgressPump {
    /// `cancel` is the external signal; `transfer` is cancelled whenever the
    /// pump stops, including when it is dropped.
    pub fn new(
        session: TransferSession,
        samples: SampleReceiver,
        done: TransferDone,
        cancel: CancellationToken,
        transfer: CancellationToken,
        logger: Arc<dyn SessionLogger>,
    ) -> Self {
        let deadline = session.deadline();
        Self {
            session,
            deadline,
            samples,
            samples_open: true,
            done,
            cancel,
            transfer,
            poll_interval: POLL_INTERVAL,
            last_elapsed: Duration::ZERO,
            logger,
        }
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn session(&self) -> &TransferSession {
        &self.session
    }

    /// Wait for the next event. `None` once the session is over.
    pub async fn next_event(&mut self) -> Option<ProgressEvent> {
        if self.session.state().is_final() {
            return None;
        }
        if matches!(self.session.state(), SessionState::Idle | SessionState::Started) {
            self.session.set_state(SessionState::Streaming);
        }

        loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    self.on_cancel();
                    return None;
                }
                result = &mut self.done => {
                    return Some(self.on_transfer_done(result));
                }
                sample = self.samples.recv(), if self.samples_open => match sample {
                    Some(sample) => return Some(self.on_sample(sample)),
                    None => self.samples_open = false,
                },
                _ = tokio::time::sleep(self.poll_interval) => {
                    let now = Instant::now();
                    if self.deadline.is_expired(now) {
                        let elapsed = self.advance(self.deadline.elapsed(now));
                        let speed = self.session.last_rate_mbps;
                        return Some(self.forced_stop(speed, elapsed));
                    }
                }
            }
        }
    }

    /// Drive the pump to the end as a stream.
    pub fn into_stream(self) -> impl Stream<Item = ProgressEvent> + Send {
        futures_util::stream::unfold(self, |mut pump| async move {
            pump.next_event().await.map(|event| (event, pump))
        })
    }

    fn on_sample(&mut self, sample: RateSample) -> ProgressEvent {
        let elapsed = self.advance(self.deadline.elapsed(sample.observed_at));
        self.session.last_rate_mbps = sample.speed_mbps;

        if self.deadline.is_expired(sample.observed_at) {
            return self.forced_stop(sample.speed_mbps, elapsed);
        }

        self.log(SessionEvent::Sample {
            speed_mbps: sample.speed_mbps,
            elapsed_sec: elapsed.as_secs_f64(),
        });
        ProgressEvent::Progress {
            speed_mbps: sample.speed_mbps,
            elapsed_sec: elapsed.as_secs_f64(),
        }
    }

    fn forced_stop(&mut self, speed_mbps: f64, elapsed: Duration) -> ProgressEvent {
        self.log(SessionEvent::ForcedStop {
            speed_mbps,
            elapsed_sec: elapsed.as_secs_f64(),
        });
        self.finish(SessionState::Done);
        ProgressEvent::Complete {
            speed_mbps,
            elapsed_sec: elapsed.as_secs_f64(),
        }
    }

    fn on_transfer_done(
        &mut self,
        result: Result<Result<TransferReport, TransferError>, oneshot::error::RecvError>,
    ) -> ProgressEvent {
        match result {
            Ok(Ok(report)) => {
                self.session.set_state(SessionState::Completing);
                let elapsed = self.advance(self.deadline.elapsed(Instant::now()));

                // A zero final rate may mean "too short to measure" or a real
                // zero; both report the last sample.
                let mut speed_mbps = report.final_mbps();
                if !(speed_mbps.is_finite() && speed_mbps > 0.0) {
                    speed_mbps = self.session.last_rate_mbps;
                    self.log(SessionEvent::FallbackRate { speed_mbps });
                }

                self.log(SessionEvent::Completed {
                    speed_mbps,
                    elapsed_sec: elapsed.as_secs_f64(),
                    bytes: report.bytes,
                });
                self.finish(SessionState::Done);
                ProgressEvent::Complete {
                    speed_mbps,
                    elapsed_sec: elapsed.as_secs_f64(),
                }
            }
            Ok(Err(e)) => self.fail(ErrorKind::Transfer, e.to_string()),
            Err(_) => self.fail(
                ErrorKind::Internal,
                "transfer task ended without reporting a result".into(),
            ),
        }
    }

    fn fail(&mut self, kind: ErrorKind, message: String) -> ProgressEvent {
        self.log(SessionEvent::Failed {
            kind: kind.as_str(),
            message: message.clone(),
        });
        self.finish(SessionState::Error);
        ProgressEvent::Error { kind, message }
    }

    fn on_cancel(&mut self) {
        let elapsed = self.deadline.elapsed(Instant::now());
        self.log(SessionEvent::Cancelled {
            elapsed_sec: elapsed.as_secs_f64(),
        });
        self.finish(SessionState::Cancelled);
    }

    fn finish(&mut self, state: SessionState) {
        self.session.set_state(state);
        self.transfer.cancel();
        let dropped = self.samples.dropped();
        if dropped > 0 {
            self.log(SessionEvent::SamplesDropped { count: dropped });
        }
    }

    fn advance(&mut self, elapsed: Duration) -> Duration {
        self.last_elapsed = self.last_elapsed.max(elapsed);
        self.last_elapsed
    }

    fn log(&self, event: SessionEvent) {
        self.logger.log(SessionLog {
            component: "pump",
            session_id: self.session.id,
            event,
        });
    }
}

impl Drop for ProgressPump {
    fn drop(&mut self) {
        self.transfer.cancel();
    }
}
