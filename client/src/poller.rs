//! Status polling for a submitted diagnosis job.
//!
//! One loop per job drives the cached snapshot from `processing` to a
//! terminal state. Ticks fire on a fixed interval whether or not the
//! previous request has answered; every request carries its tick number
//! and answers older than the newest applied one are dropped.

use crate::api::{with_timeout, DiagnosisApi};
use crate::error::ClientError;
use common::{DiagnosisJob, JobStatus, StatusUpdate, DEFAULT_POLL_INTERVAL_MS, DEFAULT_REQUEST_TIMEOUT_MS};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{oneshot, watch};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{self, Instant, MissedTickBehavior};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollState {
    Idle,
    Polling,
    Completed,
    Failed,
    Cancelled,
}

impl PollState {
    pub fn is_final(self) -> bool {
        !matches!(self, PollState::Polling)
    }
}

#[derive(Debug, Clone)]
pub struct PollSnapshot {
    pub state: PollState,
    pub job: DiagnosisJob,
    pub ticks_issued: u64,
    pub last_applied_tick: u64,
}

impl PollSnapshot {
    fn new(job: DiagnosisJob, state: PollState) -> Self {
        Self {
            state,
            job,
            ticks_issued: 0,
            last_applied_tick: 0,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct PollerConfig {
    pub interval: Duration,
    pub request_timeout: Duration,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
            request_timeout: Duration::from_millis(DEFAULT_REQUEST_TIMEOUT_MS),
        }
    }
}

/// Admits each tick's answer at most once and never after a newer one.
#[derive(Debug, Default)]
struct TickGate {
    highest_applied: u64,
}

impl TickGate {
    fn admit(&mut self, tick: u64) -> bool {
        if tick <= self.highest_applied {
            return false;
        }
        self.highest_applied = tick;
        true
    }
}

pub struct StatusPoller {
    api: Arc<DiagnosisApi>,
    config: PollerConfig,
}

impl StatusPoller {
    /// A zero interval or timeout falls back to the default.
    pub fn new(api: Arc<DiagnosisApi>, mut config: PollerConfig) -> Self {
        let defaults = PollerConfig::default();
        if config.interval.is_zero() {
            log::warn!("Poll interval must be positive, using {:?}", defaults.interval);
            config.interval = defaults.interval;
        }
        if config.request_timeout.is_zero() {
            log::warn!("Request timeout must be positive, using {:?}", defaults.request_timeout);
            config.request_timeout = defaults.request_timeout;
        }
        Self { api, config }
    }

    /// Start following `job`. Only a `processing` job is polled; a
    /// terminal one gets its full record fetched once, and a `pending`
    /// one is left idle.
    pub fn start(&self, job: DiagnosisJob) -> PollHandle {
        let (cancel_tx, cancel_rx) = oneshot::channel();
        let initial_state = match job.status {
            JobStatus::Processing => PollState::Polling,
            _ => PollState::Idle,
        };
        let initial = PollSnapshot::new(job, initial_state);
        let (updates_tx, updates_rx) = watch::channel(initial.clone());

        let api = self.api.clone();
        let config = self.config;
        let task = match initial.job.status {
            JobStatus::Processing => tokio::spawn(run_loop(api, config, initial, updates_tx, cancel_rx)),
            status if status.is_terminal() => {
                tokio::spawn(settle(api, config, initial, updates_tx, cancel_rx))
            }
            _ => {
                log::debug!("Job {} is still pending, not polling", initial.job.id);
                tokio::spawn(async move { initial })
            }
        };

        PollHandle {
            cancel: Some(cancel_tx),
            updates: updates_rx,
            task: Some(task),
        }
    }
}

/// Owner's side of a running poll loop. Dropping it cancels the loop.
pub struct PollHandle {
    cancel: Option<oneshot::Sender<()>>,
    updates: watch::Receiver<PollSnapshot>,
    task: Option<JoinHandle<PollSnapshot>>,
}

impl PollHandle {
    pub fn subscribe(&self) -> watch::Receiver<PollSnapshot> {
        self.updates.clone()
    }

    pub fn latest(&self) -> PollSnapshot {
        self.updates.borrow().clone()
    }

    /// Stop issuing ticks. Requests already in flight are abandoned and
    /// their answers discarded.
    pub fn cancel(&mut self) {
        if let Some(tx) = self.cancel.take() {
            let _ = tx.send(());
        }
    }

    pub async fn finished(mut self) -> PollSnapshot {
        match self.task.take() {
            Some(task) => match task.await {
                Ok(snapshot) => snapshot,
                Err(e) => {
                    log::error!("Poll loop ended abnormally: {}", e);
                    self.latest()
                }
            },
            None => self.latest(),
        }
    }
}

impl Drop for PollHandle {
    fn drop(&mut self) {
        self.cancel();
    }
}

enum Exit {
    Cancelled,
    Terminal,
}

async fn run_loop(
    api: Arc<DiagnosisApi>,
    config: PollerConfig,
    mut snapshot: PollSnapshot,
    updates: watch::Sender<PollSnapshot>,
    mut cancel: oneshot::Receiver<()>,
) -> PollSnapshot {
    let id = snapshot.job.id.clone();
    let mut ticker = time::interval_at(Instant::now() + config.interval, config.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut in_flight: JoinSet<(u64, Result<StatusUpdate, ClientError>)> = JoinSet::new();
    let mut gate = TickGate::default();

    log::info!("Polling job {} every {:?}", id, config.interval);

    let exit = loop {
        tokio::select! {
            biased;

            _ = &mut cancel => break Exit::Cancelled,

            Some(joined) = in_flight.join_next(), if !in_flight.is_empty() => {
                let (tick, outcome) = match joined {
                    Ok(answer) => answer,
                    Err(e) => {
                        log::warn!("Status tick for job {} did not finish: {}", id, e);
                        continue;
                    }
                };
                let update = match outcome {
                    Ok(update) => update,
                    Err(e) => {
                        log::warn!("Status poll #{} for job {} failed: {}", tick, id, e);
                        continue;
                    }
                };
                if !gate.admit(tick) {
                    log::debug!("Discarding stale status #{} for job {}", tick, id);
                    continue;
                }

                snapshot.last_applied_tick = tick;
                snapshot.job.apply_status(&update);
                if snapshot.job.status.is_terminal() {
                    break Exit::Terminal;
                }
                updates.send_replace(snapshot.clone());
            }

            _ = ticker.tick() => {
                snapshot.ticks_issued += 1;
                let tick = snapshot.ticks_issued;
                let api = api.clone();
                let id = id.clone();
                let limit = config.request_timeout;
                in_flight.spawn(async move { (tick, with_timeout(limit, api.status(&id)).await) });
            }
        }
    };

    in_flight.abort_all();

    match exit {
        Exit::Cancelled => {
            log::info!("Polling for job {} cancelled after {} ticks", id, snapshot.ticks_issued);
            snapshot.state = PollState::Cancelled;
        }
        Exit::Terminal => {
            log::info!("Job {} reached {} after {} ticks", id, snapshot.job.status, snapshot.ticks_issued);
            fetch_final(&api, config, &mut snapshot, &mut cancel).await;
        }
    }

    updates.send_replace(snapshot.clone());
    snapshot
}

async fn settle(
    api: Arc<DiagnosisApi>,
    config: PollerConfig,
    mut snapshot: PollSnapshot,
    updates: watch::Sender<PollSnapshot>,
    mut cancel: oneshot::Receiver<()>,
) -> PollSnapshot {
    fetch_final(&api, config, &mut snapshot, &mut cancel).await;
    updates.send_replace(snapshot.clone());
    snapshot
}

/// Fetch the full record of a terminal job, exactly once.
async fn fetch_final(
    api: &DiagnosisApi,
    config: PollerConfig,
    snapshot: &mut PollSnapshot,
    cancel: &mut oneshot::Receiver<()>,
) {
    let id = snapshot.job.id.clone();
    let fetch = with_timeout(config.request_timeout, api.get(&id));
    tokio::select! {
        biased;

        _ = cancel => {
            snapshot.state = PollState::Cancelled;
            return;
        }

        outcome = fetch => match outcome {
            Ok(record) => snapshot.job.merge_record(record),
            Err(e) => log::error!("Fetching record of job {} failed: {}", id, e),
        }
    }

    snapshot.state = match snapshot.job.status {
        JobStatus::Failed => PollState::Failed,
        _ => PollState::Completed,
    };
}
