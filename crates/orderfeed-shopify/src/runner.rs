//! Pipeline orchestrator
//!
//! One run: load checkpoint → fetch → transform → write → publish → commit.
//! The checkpoint is written last and only after the publish succeeded, so a
//! failure anywhere leaves it where it was and the next run re-fetches the
//! same orders into the same output key.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use chrono::Utc;
use indicatif::ProgressBar;
use serde::Serialize;

use orderfeed_core::{ProgressContext, RetryPolicy, is_shutdown_requested};
use orderfeed_store::{Checkpoint, CheckpointStore, Cursor};

use crate::error::{ErrorCategory, PipelineError};
use crate::fetch::{OrderFilter, OrderSource, fetch_since};
use crate::publish::{PublishReceipt, Publisher};
use crate::schema::RawOrder;
use crate::transform::{TransformError, Transformer};
use crate::writer::OutputWriter;

/// Orchestrator state. Runs move forward only; `Failed` and `Done` are final.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Idle,
    LoadingCheckpoint,
    Fetching,
    Transforming,
    Writing,
    Publishing,
    CommittingCheckpoint,
    Done,
    Failed,
}

impl RunState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::LoadingCheckpoint => "loading_checkpoint",
            Self::Fetching => "fetching",
            Self::Transforming => "transforming",
            Self::Writing => "writing",
            Self::Publishing => "publishing",
            Self::CommittingCheckpoint => "committing_checkpoint",
            Self::Done => "done",
            Self::Failed => "failed",
        }
    }

    /// Legal transitions: the next state in sequence, `Fetching → Done`
    /// (nothing new), or any active state → `Failed`.
    pub fn can_advance_to(self, next: RunState) -> bool {
        match (self, next) {
            (Self::Done | Self::Failed, _) | (Self::Idle, Self::Failed) => false,
            (_, Self::Failed) | (Self::Fetching, Self::Done) => true,
            _ => next as u8 == self as u8 + 1,
        }
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Knobs of a run that are not components
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub retry: RetryPolicy,
    /// Pause between order pages
    pub page_delay: Duration,
    /// Without a checkpoint, only fetch orders created in the last N days
    pub initial_lookback_days: Option<u32>,
    /// Also upload the raw order JSON
    pub publish_raw: bool,
    /// Leave staged files in place after a successful run
    pub keep_staging: bool,
    /// Cancellation flag; the process-wide shutdown flag when `None`
    pub cancel: Option<Arc<AtomicBool>>,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            page_delay: Duration::from_millis(500),
            initial_lookback_days: None,
            publish_raw: false,
            keep_staging: false,
            cancel: None,
        }
    }
}

/// Result of a successful run
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub orders_fetched: usize,
    pub orders_transformed: usize,
    pub orders_excluded: usize,
    pub rows: usize,
    /// Cursor the run started after (`None`: no checkpoint)
    pub previous_cursor: Option<u64>,
    /// Cursor stored at the end of the run
    pub cursor: Option<u64>,
    pub output: Option<PublishReceipt>,
    pub elapsed_secs: f64,
}

/// Why and where a run stopped
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunFailure {
    pub category: ErrorCategory,
    pub message: String,
    /// Last state entered before the failure
    pub state: RunState,
}

impl fmt::Display for RunFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} during {}: {}", self.category, self.state, self.message)
    }
}

impl std::error::Error for RunFailure {}

/// State tracker; logs every transition.
struct Tracker {
    state: RunState,
    bar: ProgressBar,
}

impl Tracker {
    fn enter(&mut self, next: RunState) {
        let legal = self.state.can_advance_to(next);
        debug_assert!(legal, "illegal transition {} -> {next}", self.state);
        if !legal {
            log::error!("illegal run state transition {} -> {next}", self.state);
        }
        log::info!("state: {} -> {next}", self.state);
        self.state = next;
        self.bar.set_message(next.as_str());
    }
}

/// The incremental extraction pipeline.
pub struct Pipeline {
    source: Arc<dyn OrderSource>,
    checkpoints: CheckpointStore,
    transformer: Transformer,
    writer: OutputWriter,
    publisher: Publisher,
    options: RunOptions,
}

impl fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pipeline")
            .field("checkpoints", &self.checkpoints)
            .field("writer", &self.writer)
            .field("publisher", &self.publisher)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl Pipeline {
    pub fn new(
        source: Arc<dyn OrderSource>,
        checkpoints: CheckpointStore,
        transformer: Transformer,
        writer: OutputWriter,
        publisher: Publisher,
        options: RunOptions,
    ) -> Self {
        Self {
            source,
            checkpoints,
            transformer,
            writer,
            publisher,
            options,
        }
    }

    pub fn checkpoints(&self) -> &CheckpointStore {
        &self.checkpoints
    }

    pub fn options(&self) -> &RunOptions {
        &self.options
    }

    fn cancel_requested(&self) -> bool {
        match &self.options.cancel {
            Some(flag) => flag.load(Ordering::Relaxed),
            None => is_shutdown_requested(),
        }
    }

    /// Execute one run.
    pub fn run(&self, progress: &ProgressContext) -> Result<RunSummary, RunFailure> {
        let start = Instant::now();
        let mut tracker = Tracker {
            state: RunState::Idle,
            bar: progress.stage_line("orderfeed"),
        };

        let result = self.run_stages(&mut tracker, start);
        match result {
            Ok(summary) => {
                tracker.bar.finish_and_clear();
                log::info!(
                    "Run complete: {} orders, {} rows in {:.1}s",
                    summary.orders_fetched,
                    summary.rows,
                    summary.elapsed_secs
                );
                Ok(summary)
            }
            Err(e) => {
                let failure = RunFailure {
                    category: e.category(),
                    message: e.to_string(),
                    state: tracker.state,
                };
                tracker.enter(RunState::Failed);
                tracker.bar.finish_and_clear();
                log::error!("Run failed: {failure}");
                Err(failure)
            }
        }
    }

    fn run_stages(
        &self,
        tracker: &mut Tracker,
        start: Instant,
    ) -> Result<RunSummary, PipelineError> {
        tracker.enter(RunState::LoadingCheckpoint);
        let previous = self.checkpoints.load()?;
        let previous_cursor = previous.as_ref().and_then(Checkpoint::cursor);

        tracker.enter(RunState::Fetching);
        let filter = self.filter_for(previous_cursor);
        log::info!("Fetching orders: {filter}");
        let orders: Vec<RawOrder> = fetch_since(self.source.as_ref(), filter, self.options.retry)
            .with_page_delay(self.options.page_delay)
            .collect::<Result<_, _>>()?;
        log::info!("Fetched {} new orders", orders.len());

        if orders.is_empty() {
            tracker.enter(RunState::Done);
            log::info!("No new orders; checkpoint unchanged");
            return Ok(RunSummary {
                orders_fetched: 0,
                orders_transformed: 0,
                orders_excluded: 0,
                rows: 0,
                previous_cursor: previous_cursor.map(Cursor::value),
                cursor: previous_cursor.map(Cursor::value),
                output: None,
                elapsed_secs: start.elapsed().as_secs_f64(),
            });
        }

        tracker.enter(RunState::Transforming);
        let batch = self.transformer.transform_batch(&orders)?;
        log::info!(
            "Transformed {} orders into {} rows ({} excluded by status)",
            batch.orders_transformed,
            batch.rows.len(),
            batch.orders_excluded
        );

        tracker.enter(RunState::Writing);
        let (first, last) = cursor_range(&orders)?;
        let stem = self.publisher.layout().file_stem(first.0, last.0);
        let csv_path = self.writer.write(&batch.rows, &format!("{stem}.csv"))?;
        let raw_path = self.writer.stage_raw(&orders, &format!("{stem}.json"))?;

        if self.cancel_requested() {
            return Err(PipelineError::Cancelled(RunState::Publishing));
        }
        tracker.enter(RunState::Publishing);
        let raw = self.options.publish_raw.then_some(raw_path.as_path());
        let receipt = self.publisher.publish(&csv_path, &stem, raw)?;

        if self.cancel_requested() {
            return Err(PipelineError::Cancelled(RunState::CommittingCheckpoint));
        }
        tracker.enter(RunState::CommittingCheckpoint);
        let newest = last.1;
        let checkpoint = Checkpoint {
            id: newest.id.clone(),
            name: Some(newest.name.clone()),
            created_at: Some(newest.created_at),
            committed_at: Some(Utc::now()),
            order_count: orders.len(),
            output: Some(receipt.output_key.clone()),
            content_hash: Some(receipt.content_hash.clone()),
        };
        self.checkpoints.save(&checkpoint)?;

        tracker.enter(RunState::Done);
        if !self.options.keep_staging {
            if let Err(e) = self.writer.discard(&[&csv_path, &raw_path]) {
                log::warn!(
                    "Cannot remove staged files from {}: {e}",
                    self.writer.staging_dir().display()
                );
            }
        }

        Ok(RunSummary {
            orders_fetched: orders.len(),
            orders_transformed: batch.orders_transformed,
            orders_excluded: batch.orders_excluded,
            rows: batch.rows.len(),
            previous_cursor: previous_cursor.map(Cursor::value),
            cursor: Some(last.0.value()),
            output: Some(receipt),
            elapsed_secs: start.elapsed().as_secs_f64(),
        })
    }

    fn filter_for(&self, cursor: Option<Cursor>) -> OrderFilter {
        match (cursor, self.options.initial_lookback_days) {
            (Some(cursor), _) => OrderFilter::After(cursor),
            (None, Some(days)) => {
                OrderFilter::CreatedAfter(Utc::now() - chrono::Duration::days(i64::from(days)))
            }
            (None, None) => OrderFilter::All,
        }
    }
}

/// Lowest and highest order in the batch by cursor.
fn cursor_range(
    orders: &[RawOrder],
) -> Result<((Cursor, &RawOrder), (Cursor, &RawOrder)), TransformError> {
    let mut with_cursor = orders
        .iter()
        .filter_map(|o| Cursor::from_gid(&o.id).map(|c| (c, o)));
    let first = with_cursor.next().ok_or_else(|| TransformError {
        order: "batch".to_string(),
        reason: "no order with a numeric id".to_string(),
    })?;
    Ok(with_cursor.fold((first, first), |(lo, hi), cur| {
        (
            if cur.0 < lo.0 { cur } else { lo },
            if cur.0 > hi.0 { cur } else { hi },
        )
    }))
}
