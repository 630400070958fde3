//! Buffer/flush coordinator.
//!
//! One task owns the pending batch. It selects over the shutdown token, the
//! flush timer and the event channel, so no other task ever touches the
//! batch. Writes are awaited in place, which keeps flushes single-flight
//! and in order; events keep queueing in the channel meanwhile.

use std::borrow::Cow;

use backon::{BackoffBuilder, ExponentialBuilder};
use metrics::{counter, histogram};
use shared::{config::IngestConfig, models::ChatMessage};
use thiserror::Error;
use tokio::{
    sync::watch,
    time::{self, Instant, MissedTickBehavior},
};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};

use super::writer::{BulkWriter, WriteError};
use crate::transport::{ChatEvent, EventReceiver};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoordinatorState {
    /// Nothing pending.
    Idle,
    /// At least one event is waiting for the next flush.
    Accumulating,
    /// A batch is being written.
    Flushing,
    /// Shutdown requested; writing what was queued.
    Draining,
    Stopped,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestSummary {
    pub flushes: u64,
    pub persisted: u64,
}

#[derive(Debug, Error)]
pub enum IngestError {
    /// A mid-run batch could not be written within the retry budget. The
    /// queue was still drained afterwards.
    #[error("flush failed after retries; {dropped} messages were not persisted: {source}")]
    FlushFailed {
        dropped: usize,
        #[source]
        source: WriteError,
    },
    /// The final flush on shutdown failed. `dropped` includes messages lost
    /// by an earlier failed flush.
    #[error("final drain failed; {dropped} messages were not persisted: {source}")]
    DrainFailed {
        dropped: usize,
        #[source]
        source: WriteError,
    },
}

struct FlushFailure {
    written: usize,
    dropped: usize,
    source: WriteError,
}

#[derive(Debug)]
pub struct Coordinator {
    writer: BulkWriter,
    config: IngestConfig,
    events: EventReceiver,
    shutdown: CancellationToken,
    state: watch::Sender<CoordinatorState>,
    summary: IngestSummary,
}

impl Coordinator {
    pub fn new(
        writer: BulkWriter,
        config: IngestConfig,
        events: EventReceiver,
        shutdown: CancellationToken,
    ) -> Self {
        let (state, _) = watch::channel(CoordinatorState::Idle);
        Self {
            writer,
            config,
            events,
            shutdown,
            state,
            summary: IngestSummary::default(),
        }
    }

    /// Observes state transitions.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<CoordinatorState> {
        self.state.subscribe()
    }

    fn set_state(&self, state: CoordinatorState) {
        self.state.send_replace(state);
    }

    fn backoff(&self) -> ExponentialBuilder {
        let retry = &self.config.retry;
        ExponentialBuilder::default()
            .with_min_delay(retry.min_backoff())
            .with_max_delay(retry.max_backoff())
            .with_max_times(retry.max_attempts.saturating_sub(1))
            .with_jitter()
    }

    /// Runs until shutdown, the event channel closing, or a flush failing
    /// for good. Every path ends with the drain.
    ///
    /// # Errors
    /// [`IngestError::DrainFailed`] when the final flush fails,
    /// [`IngestError::FlushFailed`] when an earlier flush exhausted its
    /// retries.
    #[instrument(name = "coordinator", skip_all)]
    pub async fn run(mut self) -> Result<IngestSummary, IngestError> {
        let period = self.config.flush_interval();
        let mut ticker = time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut batch: Vec<ChatMessage> = Vec::new();
        let mut failure = None;
        info!(flush_interval = ?period, max_batch_size = ?self.config.max_batch_size, "coordinator started");

        loop {
            tokio::select! {
                biased;
                () = self.shutdown.cancelled() => {
                    info!("shutdown requested");
                    break;
                }
                _ = ticker.tick() => {
                    if batch.is_empty() {
                        continue;
                    }
                    if let Err(err) = self.flush(&mut batch, CoordinatorState::Flushing).await {
                        failure = Some(err);
                        break;
                    }
                    self.set_state(CoordinatorState::Idle);
                }
                received = self.events.recv() => {
                    let Some(event) = received else {
                        info!("event channel closed");
                        break;
                    };
                    self.accept(&mut batch, event);

                    if self.config.max_batch_size.is_some_and(|max| batch.len() >= max) {
                        if let Err(err) = self.flush(&mut batch, CoordinatorState::Flushing).await {
                            failure = Some(err);
                            break;
                        }
                        self.set_state(CoordinatorState::Idle);
                        ticker.reset();
                    }
                }
            }
        }

        self.drain(batch, failure).await
    }

    fn accept(&self, batch: &mut Vec<ChatMessage>, event: ChatEvent) {
        batch.push(event.into_message());
        counter!("chatlog_ingest_messages_received_total").increment(1);
        if batch.len() == 1 {
            self.set_state(CoordinatorState::Accumulating);
        }
    }

    /// Swaps the batch out and writes it. On success the emptied buffer is
    /// handed back for reuse.
    async fn flush(
        &mut self,
        batch: &mut Vec<ChatMessage>,
        during: CoordinatorState,
    ) -> Result<(), FlushFailure> {
        let mut pending = std::mem::take(batch);
        self.set_state(during);
        let started = Instant::now();

        let outcome = self.write_with_retry(&pending).await;
        let written = match &outcome {
            Ok(written) => *written,
            Err(failure) => failure.written,
        };
        self.summary.persisted += written as u64;
        counter!("chatlog_ingest_messages_flushed_total").increment(written as u64);
        histogram!("chatlog_ingest_flush_latency_ms").record(started.elapsed().as_secs_f64() * 1000.0);

        match outcome {
            Ok(written) => {
                self.summary.flushes += 1;
                info!(written, elapsed = ?started.elapsed(), "flushed batch");
                pending.clear();
                *batch = pending;
                Ok(())
            }
            Err(failure) => {
                counter!("chatlog_ingest_flush_failures_total").increment(1);
                error!(
                    error = %failure.source,
                    written,
                    dropped = failure.dropped,
                    "giving up on batch"
                );
                Err(failure)
            }
        }
    }

    /// Writes `batch`, backing off between attempts. After a partial failure
    /// only the rejected messages are sent again, so nothing is stored
    /// twice. Returns the number of messages persisted.
    async fn write_with_retry(&self, batch: &[ChatMessage]) -> Result<usize, FlushFailure> {
        let mut delays = self.backoff().build();
        let mut pending = Cow::Borrowed(batch);
        let mut written = 0;

        loop {
            let source = match self.writer.write(&pending).await {
                Ok(report) => return Ok(written + report.written),
                Err(source) => source,
            };
            let persisted = source.persisted().min(pending.len());
            written += persisted;

            match delays.next() {
                Some(delay) if source.is_retryable() => {
                    if let WriteError::Partial { rejected, .. } = &source {
                        pending = Cow::Owned(
                            rejected
                                .iter()
                                .map(|&position| pending[position].clone())
                                .collect(),
                        );
                    }
                    counter!("chatlog_ingest_flush_retries_total").increment(1);
                    warn!(error = %source, resend = pending.len(), retry_in = ?delay, "bulk write failed, retrying");
                    time::sleep(delay).await;
                }
                _ => {
                    return Err(FlushFailure {
                        written,
                        dropped: pending.len() - persisted,
                        source,
                    });
                }
            }
        }
    }

    /// Stops intake, collects what is already queued and writes it once.
    async fn drain(
        mut self,
        mut batch: Vec<ChatMessage>,
        failure: Option<FlushFailure>,
    ) -> Result<IngestSummary, IngestError> {
        self.set_state(CoordinatorState::Draining);
        self.events.close();

        let mut queued = 0_usize;
        while let Ok(event) = self.events.try_recv() {
            batch.push(event.into_message());
            queued += 1;
        }
        counter!("chatlog_ingest_messages_received_total").increment(queued as u64);
        info!(pending = batch.len(), queued, "draining");

        let earlier = failure.as_ref().map_or(0, |failure| failure.dropped);
        if !batch.is_empty() {
            if let Err(drain) = self.flush(&mut batch, CoordinatorState::Draining).await {
                self.set_state(CoordinatorState::Stopped);
                return Err(IngestError::DrainFailed {
                    dropped: drain.dropped + earlier,
                    source: drain.source,
                });
            }
        }

        self.set_state(CoordinatorState::Stopped);
        info!(
            flushes = self.summary.flushes,
            persisted = self.summary.persisted,
            "coordinator stopped"
        );

        match failure {
            Some(FlushFailure {
                dropped, source, ..
            }) => Err(IngestError::FlushFailed { dropped, source }),
            None => Ok(self.summary),
        }
    }
}
