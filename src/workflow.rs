use std::path::PathBuf;

use tokio_util::sync::CancellationToken;
use tracing::{error, info, info_span, Instrument};
use uuid::Uuid;

use crate::backup::{BackupStore, SessionHandle};
use crate::config::Config;
use crate::dataset::{
    format_flag, Dataset, BACK_ERROR_COLUMN, BACK_TRANSLATED_COLUMN, FORWARD_ERROR_COLUMN,
    TRANSLATED_COLUMN,
};
use crate::error::{BacktransError, Result};
use crate::languages::LanguageSelection;
use crate::pipeline::{FieldOutcome, RowPipeline, RowRecord};
use crate::providers::{BackTranslator, ForwardTranslator, RetryPolicy};

/// Receives a call after each row reaches `BackDone`
pub trait ProgressObserver: Send + Sync {
    fn row_completed(&self, index: usize, total: usize);
}

impl ProgressObserver for indicatif::ProgressBar {
    fn row_completed(&self, _index: usize, _total: usize) {
        self.inc(1);
    }
}

/// Result of a completed run
#[derive(Debug)]
pub struct RunOutcome {
    /// Original columns followed by the four translation columns
    pub dataset: Dataset,
    pub session_id: String,
    pub session_dir: PathBuf,
    pub forward_failures: usize,
    pub back_failures: usize,
}

/// Drives the row pipeline over a whole dataset
pub struct BatchController {
    forward: Box<dyn ForwardTranslator>,
    back: Box<dyn BackTranslator>,
    store: BackupStore,
    retry: RetryPolicy,
    chunk_size: usize,
    cancel: CancellationToken,
    observer: Option<Box<dyn ProgressObserver>>,
}

impl BatchController {
    pub fn new(
        forward: Box<dyn ForwardTranslator>,
        back: Box<dyn BackTranslator>,
        store: BackupStore,
    ) -> Self {
        Self {
            forward,
            back,
            store,
            retry: RetryPolicy::none(),
            chunk_size: 50,
            cancel: CancellationToken::new(),
            observer: None,
        }
    }

    pub fn from_config(
        config: &Config,
        forward: Box<dyn ForwardTranslator>,
        back: Box<dyn BackTranslator>,
    ) -> Self {
        Self::new(forward, back, BackupStore::new(&config.backup.root_dir))
            .with_retry(RetryPolicy::from_config(&config.retry))
            .with_chunk_size(config.back.chunk_size)
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Rows per grouped back-translation call
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    /// Checked between rows
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn with_observer(mut self, observer: Box<dyn ProgressObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Translate and back-translate every row of `column`
    ///
    /// Row-level provider failures end up as error flags in the returned
    /// dataset. Errors are returned when the backup session cannot be
    /// created, or as `Aborted` for any failure after it was opened; in the
    /// latter case a `CRITICAL ERROR` line is appended to the session log and
    /// the snapshots written so far remain on disk.
    pub async fn run(
        &self,
        dataset: Dataset,
        column: &str,
        language: &LanguageSelection,
        original_filename: &str,
    ) -> Result<RunOutcome> {
        let source_texts = dataset.text_column(column)?;

        let span = info_span!("run", run_id = %Uuid::new_v4(), dataset = %original_filename);
        async move {
            let mut session = self.store.open_session(original_filename)?;

            info!(
                "Translating {} rows of '{}' to {} (backup session {})",
                dataset.len(), column, language.name, session.id()
            );

            let (augmented, forward_failures, back_failures) =
                match self.complete(dataset, source_texts, language, &mut session).await {
                    Ok(result) => result,
                    Err(e) => return Err(self.abort(&session, e)),
                };

            info!(
                "Run finished: {} rows, {} forward errors, {} back errors",
                augmented.len(), forward_failures, back_failures
            );

            Ok(RunOutcome {
                dataset: augmented,
                session_id: session.id().to_string(),
                session_dir: session.dir().to_path_buf(),
                forward_failures,
                back_failures,
            })
        }
        .instrument(span)
        .await
    }

    /// Everything after the session exists: original snapshot, rows, final commit
    async fn complete(
        &self,
        dataset: Dataset,
        source_texts: Vec<String>,
        language: &LanguageSelection,
        session: &mut SessionHandle,
    ) -> Result<(Dataset, usize, usize)> {
        session.snapshot_original(&dataset)?;
        let rows = self.drive(&dataset, source_texts, language, session).await?;
        let assembled = assemble(dataset, &rows)?;
        session.commit_final(&assembled.0)?;
        Ok(assembled)
    }

    async fn drive(
        &self,
        dataset: &Dataset,
        source_texts: Vec<String>,
        language: &LanguageSelection,
        session: &SessionHandle,
    ) -> Result<Vec<RowRecord>> {
        let pipeline = RowPipeline::new(
            self.forward.as_ref(),
            self.back.as_ref(),
            &self.retry,
            session,
            dataset.headers(),
            language,
        );

        let total = dataset.len();
        let mut rows: Vec<RowRecord> = Vec::with_capacity(total);

        for (index, source_text) in source_texts.into_iter().enumerate() {
            if self.cancel.is_cancelled() {
                return Err(BacktransError::Cancelled { row: index });
            }

            let fields = dataset.row(index).map(<[String]>::to_vec).unwrap_or_default();
            let mut row = RowRecord::new(index, fields, source_text);
            pipeline.forward_step(&mut row).await?;
            rows.push(row);

            let chunk_full = rows.len() % self.chunk_size == 0;
            if chunk_full || index + 1 == total {
                let start = (rows.len() - 1) / self.chunk_size * self.chunk_size;
                pipeline.back_chunk(&mut rows[start..]).await?;
                if let Some(observer) = &self.observer {
                    for row in &rows[start..] {
                        observer.row_completed(row.index, total);
                    }
                }
            }
        }

        Ok(rows)
    }

    fn abort(&self, session: &SessionHandle, err: BacktransError) -> BacktransError {
        error!("CRITICAL: {}; partial results remain in {}", err, session.dir().display());
        if let Err(log_err) = session.append_log(&format!("CRITICAL ERROR: {}", err)) {
            error!("Could not record the failure in the session log: {}", log_err);
        }
        BacktransError::Aborted {
            session_dir: session.dir().to_path_buf(),
            source: Box::new(err),
        }
    }
}

/// Flatten row outcomes into the four export columns
fn assemble(mut dataset: Dataset, rows: &[RowRecord]) -> Result<(Dataset, usize, usize)> {
    let mut translated = Vec::with_capacity(rows.len());
    let mut forward_errors = Vec::with_capacity(rows.len());
    let mut back_translated = Vec::with_capacity(rows.len());
    let mut back_errors = Vec::with_capacity(rows.len());
    let (mut forward_failures, mut back_failures) = (0, 0);

    for row in rows {
        let (forward, back) = match (&row.forward, &row.back) {
            (Some(forward), Some(back)) => (forward, back),
            _ => {
                return Err(BacktransError::Pipeline(format!(
                    "Row {} finished the batch without both translations", row.index
                )));
            }
        };

        if matches!(forward, FieldOutcome::Failed { .. }) {
            forward_failures += 1;
        }
        if matches!(back, FieldOutcome::Failed { .. }) {
            back_failures += 1;
        }

        translated.push(forward.text().to_string());
        forward_errors.push(format_flag(forward.is_error()).to_string());
        back_translated.push(back.text().to_string());
        back_errors.push(format_flag(back.is_error()).to_string());
    }

    dataset.push_column(TRANSLATED_COLUMN, translated)?;
    dataset.push_column(FORWARD_ERROR_COLUMN, forward_errors)?;
    dataset.push_column(BACK_TRANSLATED_COLUMN, back_translated)?;
    dataset.push_column(BACK_ERROR_COLUMN, back_errors)?;
    Ok((dataset, forward_failures, back_failures))
}
