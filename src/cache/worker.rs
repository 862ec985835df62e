use super::barrier::MonthBatches;
use crate::core::{DayState, DayStateError, Result};
use crate::storage::DayStatePersistence;
use log::warn;
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot};
use tracing::{Instrument, Level, Span, event};

enum PersistJob {
    Save {
        date_key: String,
        state: DayState,
        done: Option<oneshot::Sender<Result<()>>>,
    },
    Flush {
        batches: MonthBatches,
        month_merge: bool,
        span: Span,
        done: oneshot::Sender<FlushOutcome>,
    },
    Drain(oneshot::Sender<()>),
}

/// Result of flushing barrier batches, applied back to the cache by the caller.
#[derive(Debug, Default)]
pub(crate) struct FlushOutcome {
    /// Flushed date, the snapshot that was written, and the merged day when a month merge ran.
    pub(crate) written: Vec<(String, DayState, Option<DayState>)>,
    pub(crate) failed: Vec<String>,
    pub(crate) last_error: Option<String>,
}

/// Single background task applying day saves in the order they were enqueued.
///
/// Dropping the queue closes the channel; jobs already enqueued still run.
pub(crate) struct PersistQueue {
    sender: mpsc::UnboundedSender<PersistJob>,
}

impl PersistQueue {
    pub(crate) fn spawn(persistence: Arc<dyn DayStatePersistence>) -> Result<Self> {
        let runtime = Handle::try_current().map_err(|err| {
            DayStateError::Worker(format!("persist queue needs a tokio runtime: {}", err))
        })?;
        let (sender, receiver) = mpsc::unbounded_channel();
        runtime.spawn(run_queue(persistence, receiver));
        Ok(Self { sender })
    }

    /// Enqueues a save without waiting for it. Failures are logged by the queue.
    pub(crate) fn enqueue(&self, date_key: String, state: DayState) -> Result<()> {
        self.submit(PersistJob::Save {
            date_key,
            state,
            done: None,
        })
    }

    /// Enqueues a save whose result arrives on the returned receiver.
    pub(crate) fn save(
        &self,
        date_key: String,
        state: DayState,
    ) -> Result<oneshot::Receiver<Result<()>>> {
        let (done, result) = oneshot::channel();
        self.submit(PersistJob::Save {
            date_key,
            state,
            done: Some(done),
        })?;
        Ok(result)
    }

    /// Enqueues a barrier flush behind every save already queued.
    ///
    /// Submission is synchronous so callers can order it against other work under a lock.
    pub(crate) fn flush(
        &self,
        batches: MonthBatches,
        month_merge: bool,
        span: Span,
    ) -> Result<oneshot::Receiver<FlushOutcome>> {
        let (done, outcome) = oneshot::channel();
        self.submit(PersistJob::Flush {
            batches,
            month_merge,
            span,
            done,
        })?;
        Ok(outcome)
    }

    /// Waits until every job enqueued so far has been applied.
    pub(crate) async fn drain(&self) -> Result<()> {
        let (done, finished) = oneshot::channel();
        self.submit(PersistJob::Drain(done))?;
        finished
            .await
            .map_err(|_| DayStateError::Worker("persist queue stopped".to_string()))
    }

    fn submit(&self, job: PersistJob) -> Result<()> {
        self.sender
            .send(job)
            .map_err(|_| DayStateError::Worker("persist queue stopped".to_string()))
    }
}

async fn run_queue(
    persistence: Arc<dyn DayStatePersistence>,
    mut receiver: mpsc::UnboundedReceiver<PersistJob>,
) {
    while let Some(job) = receiver.recv().await {
        match job {
            PersistJob::Save {
                date_key,
                state,
                done,
            } => {
                let result = persistence.save_day(&date_key, &state).await;
                match done {
                    Some(done) => {
                        let _ = done.send(result);
                    }
                    None => {
                        if let Err(err) = result {
                            event!(Level::ERROR, date = %date_key, error = %err, "scheduled day save failed");
                        }
                    }
                }
            }
            PersistJob::Flush {
                batches,
                month_merge,
                span,
                done,
            } => {
                let outcome = flush_batches(persistence.as_ref(), batches, month_merge)
                    .instrument(span)
                    .await;
                let _ = done.send(outcome);
            }
            PersistJob::Drain(done) => {
                let _ = done.send(());
            }
        }
    }
}

/// Writes each month with one merge when possible, else day by day.
///
/// Every date is attempted; a failed month merge falls back to day saves.
async fn flush_batches(
    persistence: &dyn DayStatePersistence,
    batches: MonthBatches,
    month_merge: bool,
) -> FlushOutcome {
    let mut outcome = FlushOutcome::default();

    for (month_key, days) in batches {
        if month_merge {
            match persistence.merge_and_save_month(&month_key, days.clone()).await {
                Ok(mut report) => {
                    event!(
                        Level::DEBUG,
                        month = %month_key,
                        conflicts = report.conflict_count,
                        "pending month merged"
                    );
                    for (date_key, snapshot) in days {
                        let merged = report.days.remove(&date_key);
                        outcome.written.push((date_key, snapshot, merged));
                    }
                    continue;
                }
                Err(err) => {
                    warn!(
                        "month merge for {} failed, falling back to day saves: {}",
                        month_key, err
                    );
                }
            }
        }

        for (date_key, snapshot) in days {
            match persistence.save_day(&date_key, &snapshot).await {
                Ok(()) => outcome.written.push((date_key, snapshot, None)),
                Err(err) => {
                    event!(Level::ERROR, date = %date_key, error = %err, "pending day save failed");
                    outcome.failed.push(date_key);
                    outcome.last_error = Some(err.to_string());
                }
            }
        }
    }

    outcome
}
