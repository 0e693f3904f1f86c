//! # Historical Backfill Controller
//!
//! A single-writer actor owns the batch runner and the job-control row. Operators talk to it
//! through [`BackfillHandle`]: every command travels over a bounded channel and gets a
//! oneshot reply, so at most one batch is ever in flight per process. The `backfill` run
//! lock extends that to every process sharing the database.
//!
//! Pausing is cooperative. The handle raises a shared flag before the command is queued; a
//! batch in progress checks the flag before each window, so the current window completes
//! and no further window starts.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::config::BackfillConfig;
use crate::models::JobStatus;
use crate::models::history_job_control;
use crate::repositories::{JobControlRepository, JobSettings};
use crate::sync::{SyncContext, SyncError};

pub mod batch;
pub mod window;

pub use batch::{BackfillRunner, BatchOptions, BatchReport};

const COMMAND_BUFFER: usize = 16;

/// Job-control row as exposed to operators.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct JobControlView {
    pub status: JobStatus,
    pub historical_start_at: Option<DateTime<Utc>>,
    pub max_windows_per_run: i32,
    pub window_seconds: i32,
    pub last_heartbeat_at: Option<DateTime<Utc>>,
    pub last_run_id: Option<Uuid>,
    pub updated_at: DateTime<Utc>,
}

impl From<history_job_control::Model> for JobControlView {
    fn from(row: history_job_control::Model) -> Self {
        Self {
            status: row.job_status(),
            historical_start_at: row.historical_start_at.map(|at| at.with_timezone(&Utc)),
            max_windows_per_run: row.max_windows_per_run,
            window_seconds: row.window_seconds,
            last_heartbeat_at: row.last_heartbeat_at.map(|at| at.with_timezone(&Utc)),
            last_run_id: row.last_run_id,
            updated_at: row.updated_at.with_timezone(&Utc),
        }
    }
}

/// Operator overrides accepted by `start`.
#[derive(Debug, Clone, Default)]
pub struct StartRequest {
    pub historical_start: Option<DateTime<Utc>>,
    pub max_windows_per_run: Option<u32>,
}

type Reply<T> = oneshot::Sender<Result<T, SyncError>>;

enum BackfillCommand {
    Start {
        request: StartRequest,
        reply: Reply<JobControlView>,
    },
    Pause {
        reply: Reply<JobControlView>,
    },
    Resume {
        reply: Reply<JobControlView>,
    },
    RunOnce {
        reply: Reply<BatchReport>,
    },
    Tick {
        reply: Reply<Option<BatchReport>>,
    },
}

/// Cloneable front door to the controller actor.
#[derive(Clone)]
pub struct BackfillHandle {
    tx: mpsc::Sender<BackfillCommand>,
    pause: Arc<AtomicBool>,
}

impl BackfillHandle {
    pub async fn start(&self, request: StartRequest) -> Result<JobControlView, SyncError> {
        self.call(|reply| BackfillCommand::Start { request, reply })
            .await
    }

    pub async fn pause(&self) -> Result<JobControlView, SyncError> {
        let was_paused = self.pause.swap(true, Ordering::SeqCst);
        let result = self.call(|reply| BackfillCommand::Pause { reply }).await;
        if result.is_err() && !was_paused {
            self.pause.store(false, Ordering::SeqCst);
        }
        result
    }

    pub async fn resume(&self) -> Result<JobControlView, SyncError> {
        self.call(|reply| BackfillCommand::Resume { reply }).await
    }

    /// Run one bounded batch regardless of the persisted status.
    pub async fn run_once(&self) -> Result<BatchReport, SyncError> {
        self.call(|reply| BackfillCommand::RunOnce { reply }).await
    }

    /// Behave like a scheduled tick: runs a batch only while the job is running.
    pub async fn tick(&self) -> Result<Option<BatchReport>, SyncError> {
        self.call(|reply| BackfillCommand::Tick { reply }).await
    }

    pub fn is_pause_requested(&self) -> bool {
        self.pause.load(Ordering::SeqCst)
    }

    async fn call<T>(
        &self,
        build: impl FnOnce(Reply<T>) -> BackfillCommand,
    ) -> Result<T, SyncError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(build(reply))
            .await
            .map_err(|_| SyncError::ControllerUnavailable)?;
        rx.await.map_err(|_| SyncError::ControllerUnavailable)?
    }
}

/// The state owned by the actor task. Also usable directly for one-shot CLI batches.
pub struct BackfillController {
    runner: BackfillRunner,
    jobs: JobControlRepository,
    config: BackfillConfig,
    pause: Arc<AtomicBool>,
}

impl BackfillController {
    pub fn new(ctx: SyncContext, config: BackfillConfig) -> Self {
        let pause = Arc::new(AtomicBool::new(false));
        Self {
            runner: BackfillRunner::new(ctx.clone(), pause.clone()),
            jobs: JobControlRepository::new(ctx.db.clone()),
            config,
            pause,
        }
    }

    /// Spawn the actor. Scheduled ticks only fire when backfill is enabled in config.
    pub fn spawn(self, shutdown: CancellationToken) -> (BackfillHandle, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(COMMAND_BUFFER);
        let handle = BackfillHandle {
            tx,
            pause: self.pause.clone(),
        };
        let task = tokio::spawn(self.run(rx, shutdown));
        (handle, task)
    }

    #[instrument(skip_all)]
    async fn run(self, mut rx: mpsc::Receiver<BackfillCommand>, shutdown: CancellationToken) {
        match self.jobs.load().await {
            Ok(row) => {
                let status = row.job_status();
                self.pause.store(status == JobStatus::Paused, Ordering::SeqCst);
                info!(status = %status, "Historical backfill controller started");
            }
            Err(err) => error!(error = %err, "Failed to load history job control"),
        }

        let tick_every = StdDuration::from_secs(self.config.tick_seconds.max(1));
        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + tick_every, tick_every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Historical backfill controller shutdown requested");
                    break;
                }
                command = rx.recv() => match command {
                    Some(command) => self.handle(command).await,
                    None => break,
                },
                _ = ticker.tick(), if self.config.enabled => {
                    match self.scheduled_batch().await {
                        Ok(Some(report)) => debug!(run_id = %report.run.id, windows = report.windows_attempted, "Scheduled backfill batch done"),
                        Ok(None) => {}
                        Err(SyncError::AlreadyRunning { .. }) => {
                            info!("Skipping scheduled backfill batch; another batch holds the lock");
                        }
                        Err(err) => warn!(error = %err, "Scheduled backfill batch failed"),
                    }
                }
            }
        }

        info!("Historical backfill controller stopped");
    }

    async fn handle(&self, command: BackfillCommand) {
        match command {
            BackfillCommand::Start { request, reply } => {
                let started = self.start(request).await;
                let run_now = started.is_ok();
                let _ = reply.send(started);
                if run_now {
                    match self.scheduled_batch().await {
                        Ok(_) => {}
                        Err(SyncError::AlreadyRunning { .. }) => {
                            info!("Backfill batch already running elsewhere; first batch deferred")
                        }
                        Err(err) => warn!(error = %err, "First backfill batch failed"),
                    }
                }
            }
            BackfillCommand::Pause { reply } => {
                let _ = reply.send(self.pause().await);
            }
            BackfillCommand::Resume { reply } => {
                let _ = reply.send(self.resume().await);
            }
            BackfillCommand::RunOnce { reply } => {
                let _ = reply.send(self.run_once().await);
            }
            BackfillCommand::Tick { reply } => {
                let _ = reply.send(self.scheduled_batch().await);
            }
        }
    }

    /// `start` is allowed from any state. The historical start comes from the request, the
    /// stored row, or config, in that order.
    pub async fn start(&self, request: StartRequest) -> Result<JobControlView, SyncError> {
        let row = self.jobs.load().await?;
        let historical_start = request
            .historical_start
            .or(row.historical_start_at.map(|at| at.with_timezone(&Utc)))
            .or(self.config.historical_start)
            .ok_or(SyncError::MissingStart)?;

        let row = self
            .jobs
            .start(&JobSettings {
                historical_start: Some(historical_start),
                max_windows_per_run: Some(
                    request
                        .max_windows_per_run
                        .unwrap_or(self.config.max_windows_per_run)
                        .max(1),
                ),
                window_seconds: Some(u32::try_from(self.config.window_seconds).unwrap_or(u32::MAX)),
            })
            .await?;
        self.pause.store(false, Ordering::SeqCst);
        info!(historical_start = %historical_start, max_windows = row.max_windows_per_run, "Historical backfill started");
        Ok(row.into())
    }

    pub async fn pause(&self) -> Result<JobControlView, SyncError> {
        let row = self.jobs.load().await?;
        let status = row.job_status();
        if status == JobStatus::Idle {
            return Err(SyncError::InvalidTransition {
                action: "pause",
                status,
            });
        }
        let row = self.jobs.set_status(JobStatus::Paused).await?;
        self.pause.store(true, Ordering::SeqCst);
        info!("Historical backfill paused");
        Ok(row.into())
    }

    pub async fn resume(&self) -> Result<JobControlView, SyncError> {
        let row = self.jobs.load().await?;
        let status = row.job_status();
        if status == JobStatus::Idle {
            return Err(SyncError::InvalidTransition {
                action: "resume",
                status,
            });
        }
        let row = self.jobs.set_status(JobStatus::Running).await?;
        self.pause.store(false, Ordering::SeqCst);
        info!("Historical backfill resumed");
        Ok(row.into())
    }

    /// One batch ignoring the persisted status and the pause flag.
    pub async fn run_once(&self) -> Result<BatchReport, SyncError> {
        let row = self.jobs.load().await?;
        let opts = self.batch_options(&row, false)?;
        self.runner.run_batch(&opts).await
    }

    /// One batch if the job is running and no pause is pending, otherwise nothing.
    pub async fn scheduled_batch(&self) -> Result<Option<BatchReport>, SyncError> {
        let row = self.jobs.load().await?;
        if row.job_status() != JobStatus::Running || self.pause.load(Ordering::SeqCst) {
            return Ok(None);
        }
        let opts = self.batch_options(&row, true)?;
        self.runner.run_batch(&opts).await.map(Some)
    }

    fn batch_options(
        &self,
        row: &history_job_control::Model,
        honor_pause: bool,
    ) -> Result<BatchOptions, SyncError> {
        let historical_start = row
            .historical_start_at
            .map(|at| at.with_timezone(&Utc))
            .or(self.config.historical_start)
            .ok_or(SyncError::MissingStart)?;
        let window_seconds = if row.window_seconds > 0 {
            i64::from(row.window_seconds)
        } else {
            i64::try_from(self.config.window_seconds).unwrap_or(300)
        };
        Ok(BatchOptions {
            max_windows: u32::try_from(row.max_windows_per_run.max(1)).unwrap_or(1),
            window: Duration::seconds(window_seconds),
            historical_start,
            honor_pause,
        })
    }
}
