/// Session driver: discovery → probe → `start` → transfer + pump.

use std::sync::Arc;
use std::time::Duration;

use futures_util::Stream;
use speedtest_types::ProgressEvent;
use tokio::sync::oneshot;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::deadline::{DeadlineController, clamp_duration_secs};
use crate::endpoint::{Endpoint, EndpointSelector};
use crate::engine::{Direction, TransferEngine, TransferJob};
use crate::error::SessionError;
use crate::logging::{SessionEvent, SessionLog, SessionLogger};
use crate::pump::{POLL_INTERVAL, ProgressPump};
use crate::sampler::{SAMPLE_QUEUE_CAPACITY, rate_channel};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Started,
    Streaming,
    Completing,
    Done,
    Error,
    Cancelled,
}

impl SessionState {
    pub fn is_final(&self) -> bool {
        matches!(self, Self::Done | Self::Error | Self::Cancelled)
    }
}

/// One test run. Owned by the pump driving it; never shared.
#[derive(Debug, Clone)]
pub struct TransferSession {
    pub id: Uuid,
    pub endpoint: Endpoint,
    pub latency: Duration,
    pub started_at: Instant,
    pub max_duration: Duration,
    pub last_rate_mbps: f64,
    state: SessionState,
}

impl TransferSession {
    /// A session whose clock starts now. `Idle` until its `start` event is built.
    pub fn new(id: Uuid, endpoint: Endpoint, latency: Duration, max_duration: Duration) -> Self {
        let started_at = Instant::now();
        let max_duration = DeadlineController::new(started_at, max_duration).max_duration();
        Self {
            id,
            endpoint,
            latency,
            started_at,
            max_duration,
            last_rate_mbps: 0.0,
            state: SessionState::Idle,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn set_state(&mut self, state: SessionState) {
        self.state = state;
    }

    pub fn deadline(&self) -> DeadlineController {
        DeadlineController::new(self.started_at, self.max_duration)
    }

    pub fn latency_ms(&self) -> f64 {
        self.latency.as_secs_f64() * 1000.0
    }

    /// The `start` event; moves an `Idle` session to `Started`.
    pub fn start_event(&mut self) -> ProgressEvent {
        if self.state == SessionState::Idle {
            self.state = SessionState::Started;
        }
        ProgressEvent::Start {
            server_id: self.endpoint.id.clone(),
            server_name: self.endpoint.name.clone(),
            latency_ms: self.latency_ms(),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct SessionConfig {
    pub direction: Direction,
    pub max_duration: Duration,
    pub poll_interval: Duration,
    pub queue_capacity: usize,
}

impl SessionConfig {
    /// Defaults for a requested duration in seconds (clamped to `[1, 30]`).
    pub fn new(direction: Direction, requested_secs: i64) -> Self {
        Self {
            direction,
            max_duration: Duration::from_secs(clamp_duration_secs(requested_secs)),
            poll_interval: POLL_INTERVAL,
            queue_capacity: SAMPLE_QUEUE_CAPACITY,
        }
    }
}

/// Run one streaming session.
///
/// Discovery or probe failures yield a single `error` event with no `start`.
/// Cancelling `cancel` ends the stream silently at any point; dropping the
/// stream stops the transfer task.
pub fn run_session<S, E>(
    selector: Arc<S>,
    engine: Arc<E>,
    config: SessionConfig,
    cancel: CancellationToken,
    logger: Arc<dyn SessionLogger>,
) -> impl Stream<Item = ProgressEvent> + Send + 'static
where
    S: EndpointSelector,
    E: TransferEngine,
{
    async_stream::stream! {
        let session_id = Uuid::new_v4();
        let fail = |err: SessionError| {
            logger.log(SessionLog {
                component: "session",
                session_id,
                event: SessionEvent::Failed { kind: err.kind().as_str(), message: err.to_string() },
            });
            err.to_event()
        };

        let selected = tokio::select! {
            biased;
            _ = cancel.cancelled() => return,
            selected = selector.select() => selected,
        };
        let endpoint = match selected {
            Ok(endpoint) => endpoint,
            Err(err) => {
                yield fail(err);
                return;
            }
        };

        let probed = tokio::select! {
            biased;
            _ = cancel.cancelled() => return,
            probed = selector.probe(&endpoint) => probed,
        };
        let latency = match probed {
            Ok(latency) => latency,
            Err(err) => {
                yield fail(err);
                return;
            }
        };

        let mut session = TransferSession::new(session_id, endpoint, latency, config.max_duration);
        logger.log(SessionLog {
            component: "session",
            session_id,
            event: SessionEvent::Started {
                endpoint_id: session.endpoint.id.clone(),
                endpoint_name: session.endpoint.name.clone(),
                latency_ms: session.latency_ms(),
                max_duration_secs: session.max_duration.as_secs(),
            },
        });
        yield session.start_event();

        let (sampler, samples) = rate_channel(config.queue_capacity);
        let transfer = cancel.child_token();
        let (done_tx, done_rx) = oneshot::channel();
        let work = engine.run(TransferJob {
            endpoint: session.endpoint.clone(),
            direction: config.direction,
            max_duration: session.max_duration,
            sampler,
            cancel: transfer.clone(),
        });
        tokio::spawn(async move {
            let _ = done_tx.send(work.await);
        });

        let mut pump = ProgressPump::new(session, samples, done_rx, cancel, transfer, logger.clone())
            .with_poll_interval(config.poll_interval);
        while let Some(event) = pump.next_event().await {
            yield event;
        }
    }
}
