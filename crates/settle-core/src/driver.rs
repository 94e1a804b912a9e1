//! Pipeline driver: load checkpoint, read, filter, write, advance, commit.
//!
//! One invocation runs inside one destination transaction. The checkpoint
//! is read and saved through that transaction, so the records written and
//! the progress recorded for them commit or roll back together.

use std::time::{Duration, Instant};

use chrono::{NaiveDate, NaiveDateTime, Utc};
use settle_state::{CheckpointStore, Session, Warehouse};
use settle_types::checkpoint::{Checkpoint, Stall};
use settle_types::key::KeySchema;
use settle_types::state::{PipelineKey, RunStats};

use crate::errors::PipelineError;
use crate::gap::{truncate_at_gap, Gap, GapOutcome, ReferenceResolver};
use crate::reader::{BatchReader, ReadRequest};
use crate::record::{batch_max, Record};
use crate::result::{Progress, RunOutcome};
use crate::writer::{BatchWriter, WriteOutcome};

/// Batch limit used when a pipeline does not configure one.
pub const DEFAULT_BATCH_LIMIT: usize = 100;

/// Blocked time after which a stalled pipeline logs at `error`.
pub const DEFAULT_STALL_ALARM: Duration = Duration::from_secs(60 * 60);

/// How many batches one invocation processes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    /// Read one batch and stop; the scheduler drains over several runs.
    Single,
    /// Keep reading at an accumulating offset until a read comes back
    /// empty, then commit once.
    Drain,
}

impl RunMode {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Single => "single",
            Self::Drain => "drain",
        }
    }
}

/// Anything the orchestrator can invoke.
pub trait Pipeline {
    fn key(&self) -> &PipelineKey;

    /// Run one invocation against `warehouse`.
    ///
    /// `start_date` seeds the first run of a pipeline that has no stored
    /// checkpoint; it is ignored once a checkpoint exists.
    ///
    /// # Errors
    ///
    /// Any read, write or checkpoint failure aborts the invocation with
    /// nothing committed.
    fn run(
        &mut self,
        warehouse: &mut dyn Warehouse,
        start_date: Option<NaiveDate>,
    ) -> Result<RunOutcome, PipelineError>;
}

/// Generic incremental pipeline over records of type `R`.
pub struct PipelineDriver<R> {
    key: PipelineKey,
    schema: KeySchema,
    store: CheckpointStore,
    mode: RunMode,
    limit: usize,
    reader: Box<dyn BatchReader<R>>,
    resolver: Option<Box<dyn ReferenceResolver<R>>>,
    writer: Box<dyn BatchWriter<R>>,
    track_offset: bool,
    stall_alarm_after: Duration,
}

/// State accumulated while batches are processed.
struct Progressed {
    checkpoint: Checkpoint,
    stats: RunStats,
    gap: Option<Gap>,
}

impl<R: Record> PipelineDriver<R> {
    pub fn new(
        key: PipelineKey,
        schema: KeySchema,
        store: CheckpointStore,
        reader: impl BatchReader<R> + 'static,
        writer: impl BatchWriter<R> + 'static,
    ) -> Self {
        Self {
            key,
            schema,
            store,
            mode: RunMode::Single,
            limit: DEFAULT_BATCH_LIMIT,
            reader: Box::new(reader),
            resolver: None,
            writer: Box::new(writer),
            track_offset: false,
            stall_alarm_after: DEFAULT_STALL_ALARM,
        }
    }

    #[must_use]
    pub fn with_mode(mut self, mode: RunMode) -> Self {
        self.mode = mode;
        self
    }

    #[must_use]
    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit.max(1);
        self
    }

    /// Admit only records whose references resolve; cut the batch at the
    /// first one that does not.
    #[must_use]
    pub fn with_resolver(mut self, resolver: impl ReferenceResolver<R> + 'static) -> Self {
        self.resolver = Some(Box::new(resolver));
        self
    }

    /// Persist a source offset advanced by the number of admitted records,
    /// for sources that resume by position rather than by key.
    #[must_use]
    pub fn tracking_offset(mut self) -> Self {
        self.track_offset = true;
        self
    }

    #[must_use]
    pub fn with_stall_alarm(mut self, after: Duration) -> Self {
        self.stall_alarm_after = after;
        self
    }

    #[must_use]
    pub fn schema(&self) -> &KeySchema {
        &self.schema
    }

    #[must_use]
    pub fn mode(&self) -> RunMode {
        self.mode
    }

    #[must_use]
    pub fn limit(&self) -> usize {
        self.limit
    }

    fn process(
        &mut self,
        session: &mut dyn Session,
        before: &Checkpoint,
    ) -> Result<Progressed, PipelineError> {
        let mut checkpoint = before.clone();
        let mut stats = RunStats::default();
        let mut read_offset = 0u64;

        let gap = loop {
            let request = ReadRequest {
                checkpoint: before,
                offset: read_offset,
                limit: self.limit,
            };
            let batch = self.reader.read(session, &request)?;
            tracing::info!(
                pipeline = %self.key,
                records = batch.len(),
                offset = read_offset,
                "Found records to load"
            );
            if batch.is_empty() {
                break None;
            }
            let fetched = batch.len() as u64;
            stats.records_read += fetched;
            stats.batches += 1;

            let outcome = match self.resolver.as_mut() {
                Some(resolver) => {
                    truncate_at_gap(batch, |record| resolver.resolve(&mut *session, record))?
                }
                None => GapOutcome::complete(batch),
            };
            stats.records_held_back += outcome.held_back as u64;

            for record in &outcome.admitted {
                match self.writer.write(session, record)? {
                    WriteOutcome::Applied => stats.records_written += 1,
                    WriteOutcome::Skipped => stats.records_skipped += 1,
                }
            }

            if let Some(max) = batch_max(&outcome.admitted) {
                if max > checkpoint.watermark {
                    checkpoint.watermark = max;
                }
            }
            if self.track_offset {
                let admitted = outcome.admitted.len() as u64;
                checkpoint.offset = Some(checkpoint.offset.unwrap_or(0) + admitted);
            }
            read_offset += fetched;

            if let Some(gap) = outcome.gap {
                tracing::warn!(
                    pipeline = %self.key,
                    admitted = outcome.admitted.len(),
                    held_back = outcome.held_back,
                    blocked_at = %gap.key,
                    reference = %gap.reference,
                    "Stopped at unresolved reference"
                );
                break Some(gap);
            }
            if self.mode == RunMode::Single {
                break None;
            }
        };

        Ok(Progressed {
            checkpoint,
            stats,
            gap,
        })
    }

    /// Record or clear the stall marker and raise the alarm once a block
    /// has lasted longer than the configured threshold.
    fn mark_stall(&self, before: &Checkpoint, after: &mut Checkpoint, gap: Option<&Gap>, now: NaiveDateTime) {
        let Some(gap) = gap else {
            after.stall = None;
            return;
        };
        let since = match &before.stall {
            Some(stall) if stall.blocked_at == gap.key => stall.since,
            _ => now,
        };
        let stalled_for = (now - since).to_std().unwrap_or_default();
        if stalled_for >= self.stall_alarm_after {
            tracing::error!(
                pipeline = %self.key,
                blocked_at = %gap.key,
                reference = %gap.reference,
                stalled_for_secs = stalled_for.as_secs(),
                "Pipeline blocked on a missing reference beyond the alarm threshold"
            );
        }
        after.stall = Some(Stall {
            blocked_at: gap.key.clone(),
            reference: gap.reference.clone(),
            since,
        });
    }

    fn run_in(
        &mut self,
        warehouse: &mut dyn Warehouse,
        start_date: Option<NaiveDate>,
        started: Instant,
    ) -> Result<RunOutcome, PipelineError> {
        let mut tx = warehouse.begin()?;
        let before = self.store.get(tx.session(), &self.key, &self.schema, start_date)?;
        tracing::info!(
            pipeline = %self.key,
            watermark = %before.watermark,
            offset = before.offset,
            mode = self.mode.as_str(),
            "Loaded checkpoint"
        );

        let Progressed {
            checkpoint: mut after,
            stats,
            gap,
        } = self.process(tx.session(), &before)?;
        self.mark_stall(&before, &mut after, gap.as_ref(), Utc::now().naive_utc());

        let admitted = stats.records_admitted();
        if admitted > 0 || after != before {
            self.store.put(tx.session(), &self.key, &self.schema, &after)?;
            tx.commit()?;
            tracing::info!(
                pipeline = %self.key,
                watermark = %after.watermark,
                offset = after.offset,
                records_written = stats.records_written,
                records_skipped = stats.records_skipped,
                "Saved checkpoint"
            );
        } else {
            drop(tx);
            tracing::info!(pipeline = %self.key, "No rows processed");
        }

        let progress = if admitted > 0 {
            Progress::Advanced
        } else if gap.is_some() {
            Progress::Stalled
        } else {
            Progress::NoRows
        };

        Ok(RunOutcome {
            pipeline: self.key.clone(),
            progress,
            stats,
            checkpoint_before: before,
            checkpoint_after: after,
            duration_secs: started.elapsed().as_secs_f64(),
        })
    }
}

impl<R: Record> Pipeline for PipelineDriver<R> {
    fn key(&self) -> &PipelineKey {
        &self.key
    }

    fn run(
        &mut self,
        warehouse: &mut dyn Warehouse,
        start_date: Option<NaiveDate>,
    ) -> Result<RunOutcome, PipelineError> {
        let started = Instant::now();
        let result = self.run_in(warehouse, start_date, started);
        self.reader.release();
        if let Err(ref err) = result {
            tracing::error!(
                pipeline = %self.key,
                retryable = err.is_retryable(),
                error = %err,
                "Pipeline run failed, nothing committed"
            );
        }
        result
    }
}
